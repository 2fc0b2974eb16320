use serde::{Deserialize, Serialize};

use crate::amount::Amount;

/// Default value advertised in `maxTimeoutSeconds`.
pub const DEFAULT_MAX_TIMEOUT_SECONDS: u64 = 60;

/// What a protected route demands before it will execute.
///
/// Built once when the route is registered and shared read-only (usually
/// behind an `Arc`) by every request to that route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequirement {
    pub path: String,
    pub price: Amount,
    pub asset: String,
    pub recipient: String,
    pub network: String,
    pub facilitator_url: String,
    pub max_timeout_seconds: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequirementError {
    #[error("requirement field '{0}' must not be empty")]
    EmptyField(&'static str),
}

impl PaymentRequirement {
    pub fn new(
        path: impl Into<String>,
        price: Amount,
        asset: impl Into<String>,
        recipient: impl Into<String>,
        network: impl Into<String>,
        facilitator_url: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            price,
            asset: asset.into(),
            recipient: recipient.into(),
            network: network.into(),
            facilitator_url: facilitator_url.into(),
            max_timeout_seconds: DEFAULT_MAX_TIMEOUT_SECONDS,
            description: None,
            mime_type: Some("application/json".to_string()),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_max_timeout_seconds(mut self, seconds: u64) -> Self {
        self.max_timeout_seconds = seconds;
        self
    }

    /// Reject requirements no client could ever satisfy.
    pub fn validate(&self) -> Result<(), RequirementError> {
        let fields = [
            ("path", &self.path),
            ("asset", &self.asset),
            ("recipient", &self.recipient),
            ("network", &self.network),
            ("facilitatorUrl", &self.facilitator_url),
        ];
        match fields.iter().find(|(_, value)| value.trim().is_empty()) {
            Some((name, _)) => Err(RequirementError::EmptyField(*name)),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn requirement() -> PaymentRequirement {
        PaymentRequirement::new(
            "/api/payment/initiate",
            "0.01".parse().unwrap(),
            "USDC",
            "RecipientAddress111",
            "example-net",
            "https://facilitator.example",
        )
    }

    #[test]
    fn test_wire_format_is_camel_case() {
        let accepts = serde_json::to_value(requirement()).unwrap();
        assert_eq!(accepts["price"], "0.01");
        assert_eq!(accepts["asset"], "USDC");
        assert_eq!(accepts["recipient"], "RecipientAddress111");
        assert_eq!(accepts["network"], "example-net");
        assert_eq!(accepts["facilitatorUrl"], "https://facilitator.example");
        assert_eq!(accepts["path"], "/api/payment/initiate");
    }

    #[test]
    fn test_validate_rejects_blank_recipient() {
        let mut req = requirement();
        assert!(req.validate().is_ok());
        req.recipient = "  ".to_string();
        assert_eq!(
            req.validate(),
            Err(RequirementError::EmptyField("recipient"))
        );
    }

    #[test]
    fn test_description_is_optional_on_the_wire() {
        let plain = serde_json::to_value(requirement()).unwrap();
        assert!(plain.get("description").is_none());
        let described =
            serde_json::to_value(requirement().with_description("unlock content")).unwrap();
        assert_eq!(described["description"], "unlock content");
    }
}
