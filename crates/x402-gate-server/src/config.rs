use std::str::FromStr;
use std::time::Duration;

use url::Url;
use x402_gate::{Amount, PaymentRequirement};

const DEFAULT_FACILITATOR_URL: &str = "https://facilitator.payai.network";
const DEFAULT_ASSET: &str = "USDC";
const DEFAULT_PRICE: &str = "0.01";
const DEFAULT_PORT: u16 = 8000;
const DEFAULT_FACILITATOR_TIMEOUT_SECS: u64 = 10;
const DEFAULT_REPLAY_RETENTION_SECS: u64 = 24 * 60 * 60;
const DEFAULT_RATE_LIMIT_RPM: u64 = 60;

#[derive(Clone)]
pub struct GateConfig {
    /// Wallet that receives payments
    pub recipient: String,
    /// Network identifier, opaque to the gate (e.g. "solana-devnet")
    pub network: String,
    /// Asset identifier, opaque to the gate (symbol or mint/contract address)
    pub asset: String,
    /// Price of the protected endpoint
    pub price: Amount,
    pub facilitator_url: String,
    pub facilitator_timeout: Duration,
    /// HMAC shared secret for facilitator auth (None = unsigned)
    pub hmac_secret: Option<Vec<u8>>,
    /// SQLite replay store (None = in-memory, single process only)
    pub replay_db_path: Option<String>,
    /// How long consumed identifiers are kept when a proof has no expiry
    pub replay_retention: Duration,
    pub port: u16,
    pub rate_limit_rpm: u64,
    /// CORS allowed origins (empty = localhost only)
    pub allowed_origins: Vec<String>,
    /// Bearer token required for /metrics
    pub metrics_token: Option<String>,
    /// Serve /metrics without a token
    pub public_metrics: bool,
}

impl std::fmt::Debug for GateConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GateConfig")
            .field("recipient", &self.recipient)
            .field("network", &self.network)
            .field("asset", &self.asset)
            .field("price", &self.price.to_string())
            .field("facilitator_url", &self.facilitator_url)
            .field("facilitator_timeout", &self.facilitator_timeout)
            .field(
                "hmac_secret",
                &self.hmac_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .field("replay_db_path", &self.replay_db_path)
            .field("replay_retention", &self.replay_retention)
            .field("port", &self.port)
            .field("rate_limit_rpm", &self.rate_limit_rpm)
            .field("allowed_origins", &self.allowed_origins)
            .field(
                "metrics_token",
                &self.metrics_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("public_metrics", &self.public_metrics)
            .finish()
    }
}

impl GateConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build the config from any key/value source. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        // Required
        let recipient = get("ADDRESS")
            .or_else(|| get("WALLET_ADDRESS"))
            .ok_or(ConfigError::MissingRequired("ADDRESS"))?;
        let network = get("NETWORK")
            .or_else(|| get("SOLANA_NETWORK"))
            .ok_or(ConfigError::MissingRequired("NETWORK"))?;

        let facilitator_url =
            get("FACILITATOR_URL").unwrap_or_else(|| DEFAULT_FACILITATOR_URL.to_string());
        let parsed = Url::parse(&facilitator_url)
            .map_err(|_| ConfigError::InvalidUrl(facilitator_url.clone()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidUrl(facilitator_url));
        }

        let asset = get("ASSET")
            .or_else(|| get("USDC_TOKEN_ADDRESS"))
            .unwrap_or_else(|| DEFAULT_ASSET.to_string());

        let price_str = get("PRICE").unwrap_or_else(|| DEFAULT_PRICE.to_string());
        let price = Amount::parse_price(&price_str)
            .map_err(|e| ConfigError::InvalidPrice(format!("{price_str}: {e}")))?;
        if price == Amount::ZERO {
            return Err(ConfigError::InvalidPrice(format!("{price_str}: must be positive")));
        }

        let port = parse_or(&get, "PORT", DEFAULT_PORT)?;

        let timeout_secs = parse_or(
            &get,
            "FACILITATOR_TIMEOUT_SECS",
            DEFAULT_FACILITATOR_TIMEOUT_SECS,
        )?;
        if timeout_secs == 0 {
            return Err(invalid("FACILITATOR_TIMEOUT_SECS", "0"));
        }

        let hmac_secret = get("FACILITATOR_SHARED_SECRET").map(String::into_bytes);
        match &hmac_secret {
            Some(secret) if secret.len() < 32 => tracing::warn!(
                "FACILITATOR_SHARED_SECRET is short ({} bytes, 32 recommended)",
                secret.len()
            ),
            Some(_) => {}
            None => tracing::warn!(
                "FACILITATOR_SHARED_SECRET not set, facilitator requests and receipts are unsigned"
            ),
        }

        let replay_db_path = get("REPLAY_DB_PATH");
        let retention_secs = parse_or(
            &get,
            "REPLAY_RETENTION_SECS",
            DEFAULT_REPLAY_RETENTION_SECS,
        )?;

        let rate_limit_rpm = parse_or(&get, "RATE_LIMIT_RPM", DEFAULT_RATE_LIMIT_RPM)?;
        if rate_limit_rpm == 0 {
            return Err(invalid("RATE_LIMIT_RPM", "0"));
        }

        let allowed_origins: Vec<String> = get("ALLOWED_ORIGINS")
            .map(|origins| {
                origins
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();
        // Payment endpoints must not be callable cross-origin from anywhere.
        if allowed_origins.iter().any(|o| o == "*") {
            return Err(invalid("ALLOWED_ORIGINS", "*"));
        }

        let metrics_token = get("METRICS_TOKEN");
        let public_metrics = get("X402_PUBLIC_METRICS")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        Ok(Self {
            recipient,
            network,
            asset,
            price,
            facilitator_url,
            facilitator_timeout: Duration::from_secs(timeout_secs),
            hmac_secret,
            replay_db_path,
            replay_retention: Duration::from_secs(retention_secs),
            port,
            rate_limit_rpm,
            allowed_origins,
            metrics_token,
            public_metrics,
        })
    }

    /// Requirement for a protected path at the configured price.
    pub fn requirement(&self, path: &str) -> PaymentRequirement {
        PaymentRequirement::new(
            path,
            self.price,
            self.asset.clone(),
            self.recipient.clone(),
            self.network.clone(),
            self.facilitator_url.clone(),
        )
    }

    /// Recipient reduced to its first and last 8 characters. Short
    /// recipients keep at most their last 4.
    pub fn masked_recipient(&self) -> String {
        let chars: Vec<char> = self.recipient.chars().collect();
        if chars.len() <= 4 {
            return "...".to_string();
        }
        if chars.len() <= 16 {
            let tail: String = chars[chars.len() - 4..].iter().collect();
            return format!("...{tail}");
        }
        let head: String = chars[..8].iter().collect();
        let tail: String = chars[chars.len() - 8..].iter().collect();
        format!("{head}...{tail}")
    }
}

fn parse_or<T: FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match get(name) {
        Some(raw) => raw.parse().map_err(|_| invalid(name, &raw)),
        None => Ok(default),
    }
}

fn invalid(name: &'static str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        name,
        value: value.to_string(),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingRequired(&'static str),

    #[error("invalid value for {name}: {value:?}")]
    InvalidValue { name: &'static str, value: String },

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("invalid price: {0}")]
    InvalidPrice(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<GateConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        GateConfig::from_lookup(|name| vars.get(name).cloned())
    }

    const REQUIRED: [(&str, &str); 2] = [
        ("ADDRESS", "9xQeWvG816bUx9EPjHmaT23yvVM2ZWbrrpZb9PusVFin"),
        ("NETWORK", "solana-devnet"),
    ];

    #[test]
    fn test_defaults() {
        let config = load(&REQUIRED).unwrap();
        assert_eq!(config.facilitator_url, "https://facilitator.payai.network");
        assert_eq!(config.asset, "USDC");
        assert_eq!(config.price.to_string(), "0.01");
        assert_eq!(config.port, 8000);
        assert_eq!(config.facilitator_timeout, Duration::from_secs(10));
        assert_eq!(config.replay_retention, Duration::from_secs(86_400));
        assert_eq!(config.rate_limit_rpm, 60);
        assert!(config.hmac_secret.is_none());
        assert!(config.replay_db_path.is_none());
        assert!(config.allowed_origins.is_empty());
        assert!(!config.public_metrics);
    }

    #[test]
    fn test_missing_required() {
        let err = load(&[("NETWORK", "solana-devnet")]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingRequired("ADDRESS")));

        let err = load(&[("ADDRESS", "abc"), ("NETWORK", "  ")]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingRequired("NETWORK")));
    }

    #[test]
    fn test_legacy_aliases() {
        let config = load(&[
            ("WALLET_ADDRESS", "W"),
            ("SOLANA_NETWORK", "solana-mainnet"),
            ("USDC_TOKEN_ADDRESS", "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v"),
        ])
        .unwrap();
        assert_eq!(config.recipient, "W");
        assert_eq!(config.network, "solana-mainnet");
        assert_eq!(config.asset, "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v");
    }

    #[test]
    fn test_invalid_values_fail_fast() {
        let mut vars = REQUIRED.to_vec();
        vars.push(("PORT", "eighty"));
        assert!(matches!(
            load(&vars).unwrap_err(),
            ConfigError::InvalidValue { name: "PORT", .. }
        ));

        let mut vars = REQUIRED.to_vec();
        vars.push(("FACILITATOR_URL", "not a url"));
        assert!(matches!(load(&vars).unwrap_err(), ConfigError::InvalidUrl(_)));

        let mut vars = REQUIRED.to_vec();
        vars.push(("FACILITATOR_URL", "ftp://facilitator.example"));
        assert!(matches!(load(&vars).unwrap_err(), ConfigError::InvalidUrl(_)));

        let mut vars = REQUIRED.to_vec();
        vars.push(("PRICE", "0.01.2"));
        assert!(matches!(load(&vars).unwrap_err(), ConfigError::InvalidPrice(_)));

        let mut vars = REQUIRED.to_vec();
        vars.push(("PRICE", "0"));
        assert!(matches!(load(&vars).unwrap_err(), ConfigError::InvalidPrice(_)));

        let mut vars = REQUIRED.to_vec();
        vars.push(("ALLOWED_ORIGINS", "https://a.example, *"));
        assert!(matches!(
            load(&vars).unwrap_err(),
            ConfigError::InvalidValue {
                name: "ALLOWED_ORIGINS",
                ..
            }
        ));
    }

    #[test]
    fn test_dollar_price_and_origins() {
        let mut vars = REQUIRED.to_vec();
        vars.push(("PRICE", "$0.25"));
        vars.push(("ALLOWED_ORIGINS", "https://a.example, https://b.example,"));
        let config = load(&vars).unwrap();
        assert_eq!(config.price.to_string(), "0.25");
        assert_eq!(
            config.allowed_origins,
            vec!["https://a.example", "https://b.example"]
        );
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let mut vars = REQUIRED.to_vec();
        vars.push(("FACILITATOR_SHARED_SECRET", "super-secret-value"));
        vars.push(("METRICS_TOKEN", "metrics-token-value"));
        let config = load(&vars).unwrap();
        let debug = format!("{config:?}");
        assert!(!debug.contains("super-secret-value"));
        assert!(!debug.contains("metrics-token-value"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn test_requirement_and_masking() {
        let config = load(&REQUIRED).unwrap();
        let requirement = config.requirement("/api/payment/initiate");
        assert_eq!(requirement.path, "/api/payment/initiate");
        assert_eq!(requirement.network, "solana-devnet");
        assert!(requirement.validate().is_ok());
        assert_eq!(config.masked_recipient(), "9xQeWvG8...9PusVFin");
    }

    #[test]
    fn test_short_recipient_is_still_masked() {
        let mut config = load(&REQUIRED).unwrap();
        config.recipient = "0xabc123def4567".to_string();
        assert_eq!(config.masked_recipient(), "...4567");
        assert!(!config.masked_recipient().contains("0xabc"));

        config.recipient = "R1".to_string();
        assert_eq!(config.masked_recipient(), "...");
    }
}
