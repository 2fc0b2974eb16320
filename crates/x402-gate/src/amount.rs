//! Exact decimal amounts for prices and payment proofs.
//!
//! Prices and proof amounts are compared with `>=`, so they are parsed with
//! integer arithmetic only. No `f64` anywhere in the pipeline.

use std::fmt;
use std::str::FromStr;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Number of fractional digits an [`Amount`] can carry.
pub const AMOUNT_SCALE: u32 = 18;

const UNIT: u128 = 10u128.pow(AMOUNT_SCALE);

/// A non-negative decimal amount stored as a count of 10^-18 units.
///
/// Serialized as a canonical decimal string (`"0.01"`, `"5"`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Amount(u128);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AmountError {
    #[error("invalid amount '{0}': no numeric content")]
    Empty(String),

    #[error("invalid amount '{0}': unexpected character '{1}'")]
    InvalidCharacter(String, char),

    #[error("invalid amount '{0}': more than 18 fractional digits")]
    TooPrecise(String),

    #[error("invalid amount '{0}': overflow")]
    Overflow(String),
}

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub const fn from_units(units: u128) -> Self {
        Self(units)
    }

    pub const fn units(self) -> u128 {
        self.0
    }

    /// Parse a configured price. Accepts a leading `$` (`"$0.01"`) on top of
    /// the plain decimal syntax accepted by [`FromStr`].
    pub fn parse_price(price: &str) -> Result<Self, AmountError> {
        let trimmed = price.trim();
        trimmed.strip_prefix('$').unwrap_or(trimmed).parse()
    }
}

impl FromStr for Amount {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (integer_part, fractional_part) = s.split_once('.').unwrap_or((s, ""));

        if integer_part.is_empty() && fractional_part.is_empty() {
            return Err(AmountError::Empty(s.to_string()));
        }
        if let Some(c) = integer_part
            .chars()
            .chain(fractional_part.chars())
            .find(|c| !c.is_ascii_digit())
        {
            return Err(AmountError::InvalidCharacter(s.to_string(), c));
        }

        // Trailing zeros carry no value, so "0.010000000000000000000" is fine.
        let fractional_part = fractional_part.trim_end_matches('0');
        if fractional_part.len() > AMOUNT_SCALE as usize {
            return Err(AmountError::TooPrecise(s.to_string()));
        }

        let overflow = || AmountError::Overflow(s.to_string());

        // Only digits remain, so the only possible parse failure is overflow.
        let integer: u128 = if integer_part.is_empty() {
            0
        } else {
            integer_part.parse().map_err(|_| overflow())?
        };
        let fractional: u128 = if fractional_part.is_empty() {
            0
        } else {
            let digits: u128 = fractional_part.parse().map_err(|_| overflow())?;
            digits * 10u128.pow(AMOUNT_SCALE - fractional_part.len() as u32)
        };

        integer
            .checked_mul(UNIT)
            .and_then(|units| units.checked_add(fractional))
            .map(Amount)
            .ok_or_else(overflow)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let integer = self.0 / UNIT;
        let fraction = self.0 % UNIT;
        if fraction == 0 {
            return write!(f, "{integer}");
        }
        let digits = format!("{fraction:018}");
        write!(f, "{integer}.{}", digits.trim_end_matches('0'))
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct AmountVisitor;

        impl Visitor<'_> for AmountVisitor {
            type Value = Amount;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a non-negative decimal string or integer")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Amount, E> {
                v.parse().map_err(E::custom)
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Amount, E> {
                u128::from(v)
                    .checked_mul(UNIT)
                    .map(Amount)
                    .ok_or_else(|| E::custom("amount overflow"))
            }
        }

        deserializer.deserialize_any(AmountVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display_cent() {
        let amount: Amount = "0.01".parse().unwrap();
        assert_eq!(amount.units(), 10_000_000_000_000_000);
        assert_eq!(amount.to_string(), "0.01");
    }

    #[test]
    fn test_parse_whole_and_trailing_dot() {
        assert_eq!("5".parse::<Amount>().unwrap().to_string(), "5");
        assert_eq!("5.".parse::<Amount>().unwrap().to_string(), "5");
        assert_eq!(".5".parse::<Amount>().unwrap().to_string(), "0.5");
        assert_eq!("100.50".parse::<Amount>().unwrap().to_string(), "100.5");
    }

    #[test]
    fn test_parse_price_strips_dollar() {
        let amount = Amount::parse_price("$0.001").unwrap();
        assert_eq!(amount, "0.001".parse().unwrap());
        assert!(Amount::parse_price("$").is_err());
    }

    #[test]
    fn test_ordering_is_exact() {
        let price: Amount = "0.01".parse().unwrap();
        let just_below: Amount = "0.009999999999999999".parse().unwrap();
        let just_above: Amount = "0.010000000000000001".parse().unwrap();
        assert!(just_below < price);
        assert!(just_above > price);
        assert_eq!("0.0100".parse::<Amount>().unwrap(), price);
    }

    #[test]
    fn test_rejects_signs_and_exponents() {
        assert!(matches!(
            "-1".parse::<Amount>(),
            Err(AmountError::InvalidCharacter(_, '-'))
        ));
        assert!(matches!(
            "1e3".parse::<Amount>(),
            Err(AmountError::InvalidCharacter(_, 'e'))
        ));
        assert!(matches!("".parse::<Amount>(), Err(AmountError::Empty(_))));
        assert!(matches!(".".parse::<Amount>(), Err(AmountError::Empty(_))));
    }

    #[test]
    fn test_rejects_excess_precision() {
        assert!(matches!(
            "0.0000000000000000001".parse::<Amount>(),
            Err(AmountError::TooPrecise(_))
        ));
        // Trailing zeros beyond the scale are harmless.
        assert!("0.1000000000000000000000".parse::<Amount>().is_ok());
    }

    #[test]
    fn test_rejects_overflow() {
        assert!(matches!(
            "99999999999999999999999".parse::<Amount>(),
            Err(AmountError::Overflow(_))
        ));
    }

    #[test]
    fn test_serde_uses_strings() {
        let amount: Amount = "0.25".parse().unwrap();
        assert_eq!(serde_json::to_string(&amount).unwrap(), "\"0.25\"");
        let back: Amount = serde_json::from_str("\"0.25\"").unwrap();
        assert_eq!(back, amount);
        let whole: Amount = serde_json::from_str("3").unwrap();
        assert_eq!(whole.to_string(), "3");
        assert!(serde_json::from_str::<Amount>("0.25").is_err());
    }
}
