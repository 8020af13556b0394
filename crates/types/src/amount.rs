//! Native token amounts.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Number of nano units in one whole token.
pub const NANO_PER_TOKEN: u64 = 1_000_000_000;

/// A native token amount in nano units.
///
/// Serialized as a plain integer. Displayed as a decimal with nine
/// fractional digits (`1.500000000`).
#[derive(
    Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Amount(pub u64);

impl Amount {
    /// Zero amount.
    pub const ZERO: Self = Self(0);

    /// Create an amount from nano units.
    pub const fn from_nano(nano: u64) -> Self {
        Self(nano)
    }

    /// Create an amount from whole tokens, saturating on overflow.
    pub const fn from_tokens(tokens: u64) -> Self {
        Self(tokens.saturating_mul(NANO_PER_TOKEN))
    }

    /// Amount in nano units.
    pub const fn as_nano(self) -> u64 {
        self.0
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, other: Self) -> Option<Self> {
        self.0.checked_add(other.0).map(Self)
    }

    pub fn checked_sub(self, other: Self) -> Option<Self> {
        self.0.checked_sub(other.0).map(Self)
    }

    pub fn saturating_sub(self, other: Self) -> Self {
        Self(self.0.saturating_sub(other.0))
    }
}

impl fmt::Debug for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Amount({})", self)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{:09}",
            self.0 / NANO_PER_TOKEN,
            self.0 % NANO_PER_TOKEN
        )
    }
}

/// Errors that can occur when parsing an amount.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseAmountError {
    #[error("Invalid amount: {0}")]
    Invalid(String),

    #[error("Amount has more than 9 fractional digits: {0}")]
    TooPrecise(String),

    #[error("Amount overflows: {0}")]
    Overflow(String),
}

impl FromStr for Amount {
    type Err = ParseAmountError;

    /// Parses either nano units (`"1500"`) or a decimal token amount (`"1.5"`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = || ParseAmountError::Invalid(s.to_string());

        match s.split_once('.') {
            None => s.parse::<u64>().map(Self).map_err(|_| invalid()),
            Some((whole, frac)) => {
                if frac.len() > 9 {
                    return Err(ParseAmountError::TooPrecise(s.to_string()));
                }
                if whole.is_empty() && frac.is_empty() {
                    return Err(invalid());
                }
                let whole: u64 = if whole.is_empty() {
                    0
                } else {
                    whole.parse().map_err(|_| invalid())?
                };
                let frac_nano: u64 = if frac.is_empty() {
                    0
                } else {
                    let digits: u64 = frac.parse().map_err(|_| invalid())?;
                    digits * 10u64.pow(9 - frac.len() as u32)
                };
                whole
                    .checked_mul(NANO_PER_TOKEN)
                    .and_then(|n| n.checked_add(frac_nano))
                    .map(Self)
                    .ok_or_else(|| ParseAmountError::Overflow(s.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(Amount::from_nano(1_500_000_000).to_string(), "1.500000000");
        assert_eq!(Amount::ZERO.to_string(), "0.000000000");
    }

    #[test]
    fn test_parse_nano_and_decimal() {
        assert_eq!("1500".parse::<Amount>().unwrap(), Amount::from_nano(1500));
        assert_eq!("1.5".parse::<Amount>().unwrap(), Amount::from_nano(1_500_000_000));
        assert_eq!(".25".parse::<Amount>().unwrap(), Amount::from_nano(250_000_000));
        assert_eq!("2.".parse::<Amount>().unwrap(), Amount::from_tokens(2));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("abc".parse::<Amount>().is_err());
        assert!(".".parse::<Amount>().is_err());
        assert!(matches!(
            "0.0000000001".parse::<Amount>(),
            Err(ParseAmountError::TooPrecise(_))
        ));
    }

    #[test]
    fn test_checked_arithmetic() {
        let a = Amount::from_nano(10);
        assert_eq!(a.checked_sub(Amount::from_nano(11)), None);
        assert_eq!(a.saturating_sub(Amount::from_nano(11)), Amount::ZERO);
        assert_eq!(a.checked_add(Amount::from_nano(5)), Some(Amount::from_nano(15)));
    }
}
