// Integer money type backing every amount, rate and USD value column.
//
// Amounts are non-negative integers of up to 78 decimal digits, expressed in
// the asset's smallest unit. USD rates and USD values use the same type,
// scaled by 10^8. No floating point is involved anywhere.

use std::{fmt, str::FromStr};

use lazy_static::lazy_static;
use primitive_types::U512;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

// USD rates and values carry 8 fractional digits
pub const USD_SCALE: u64 = 100_000_000;

// Maximum number of decimal digits a stored amount may have
pub const MAX_DIGITS: u32 = 78;

lazy_static! {
    // 10^78 - 1, the largest storable amount
    static ref MAX_UNITS: U512 = U512::from(10).pow(U512::from(MAX_DIGITS)) - 1;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AmountError {
    #[error("amount overflow")]
    Overflow,
    #[error("amount exceeds {MAX_DIGITS} digits")]
    TooLarge,
    #[error("invalid decimal amount '{0}'")]
    InvalidDecimal(String),
}

/// A non-negative integer amount of up to 78 decimal digits.
///
/// Serializes as a decimal string so it survives JSON payloads and cache
/// values without precision loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Amount(U512);

impl Amount {
    pub fn zero() -> Self {
        Self(U512::zero())
    }

    // Largest storable amount: 10^78 - 1
    pub fn max_value() -> Self {
        Self(*MAX_UNITS)
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    // Parse a decimal string, rejecting anything above the 78-digit cap
    pub fn from_dec_str(value: &str) -> Result<Self, AmountError> {
        let units = U512::from_dec_str(value)
            .map_err(|_| AmountError::InvalidDecimal(value.to_owned()))?;
        if units > *MAX_UNITS {
            return Err(AmountError::TooLarge);
        }
        Ok(Self(units))
    }

    pub fn checked_add(&self, other: Amount) -> Result<Amount, AmountError> {
        let units = self.0.checked_add(other.0).ok_or(AmountError::Overflow)?;
        if units > *MAX_UNITS {
            return Err(AmountError::TooLarge);
        }
        Ok(Amount(units))
    }

    pub fn checked_sub(&self, other: Amount) -> Result<Amount, AmountError> {
        self.0
            .checked_sub(other.0)
            .map(Amount)
            .ok_or(AmountError::Overflow)
    }

    /// Convert a per-whole-token USD price (scaled by 10^8) into the
    /// per-smallest-unit rate stored on entries: price * 10^8 / 10^decimals.
    ///
    /// For 8-decimal assets the two coincide. The multiplication happens
    /// before the division so precision is only lost to the final floor.
    pub fn per_unit_rate(&self, decimals: u8) -> Result<Amount, AmountError> {
        let scaled = self
            .0
            .checked_mul(U512::from(USD_SCALE))
            .ok_or(AmountError::Overflow)?;
        let divisor = U512::from(10).pow(U512::from(decimals));
        let rate = scaled / divisor;
        if rate > *MAX_UNITS {
            return Err(AmountError::TooLarge);
        }
        Ok(Amount(rate))
    }

    /// USD value of this amount at the given rate: floor(amount * rate / 10^8).
    ///
    /// Truncates, never rounds. The intermediate product is computed in full
    /// 512-bit width; a product that does not fit is an overflow error rather
    /// than a silently wrong value.
    pub fn usd_value(&self, rate: Amount) -> Result<Amount, AmountError> {
        let product = self.0.checked_mul(rate.0).ok_or(AmountError::Overflow)?;
        let value = product / U512::from(USD_SCALE);
        if value > *MAX_UNITS {
            return Err(AmountError::TooLarge);
        }
        Ok(Amount(value))
    }
}

impl From<u64> for Amount {
    fn from(value: u64) -> Self {
        Self(U512::from(value))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // U512 displays in decimal
        write!(f, "{}", self.0)
    }
}

impl FromStr for Amount {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_dec_str(s)
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Amount::from_dec_str(&value).map_err(de::Error::custom)
    }
}

/// A signed 78-digit integer, used for account balances.
///
/// Entry amounts are always positive; balances are signed because the running
/// `debits - credits` sum legitimately goes negative for income and clearing
/// accounts. Zero is canonically non-negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SignedAmount {
    negative: bool,
    magnitude: Amount,
}

impl SignedAmount {
    pub fn zero() -> Self {
        Self::default()
    }

    pub fn positive(magnitude: Amount) -> Self {
        Self {
            negative: false,
            magnitude,
        }
    }

    pub fn negative(magnitude: Amount) -> Self {
        Self {
            negative: !magnitude.is_zero(),
            magnitude,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.magnitude.is_zero()
    }

    pub fn is_negative(&self) -> bool {
        self.negative
    }

    pub fn magnitude(&self) -> Amount {
        self.magnitude
    }

    /// The non-negative value, or `None` when the balance is below zero.
    pub fn as_amount(&self) -> Option<Amount> {
        (!self.negative).then_some(self.magnitude)
    }

    pub fn checked_add(&self, amount: Amount) -> Result<SignedAmount, AmountError> {
        if self.negative {
            if amount >= self.magnitude {
                Ok(Self::positive(amount.checked_sub(self.magnitude)?))
            } else {
                Ok(Self::negative(self.magnitude.checked_sub(amount)?))
            }
        } else {
            Ok(Self::positive(self.magnitude.checked_add(amount)?))
        }
    }

    pub fn checked_sub(&self, amount: Amount) -> Result<SignedAmount, AmountError> {
        if self.negative {
            Ok(Self::negative(self.magnitude.checked_add(amount)?))
        } else if self.magnitude >= amount {
            Ok(Self::positive(self.magnitude.checked_sub(amount)?))
        } else {
            Ok(Self::negative(amount.checked_sub(self.magnitude)?))
        }
    }
}

impl From<Amount> for SignedAmount {
    fn from(magnitude: Amount) -> Self {
        Self::positive(magnitude)
    }
}

impl PartialOrd for SignedAmount {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SignedAmount {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        use std::cmp::Ordering;
        match (self.negative, other.negative) {
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            (false, false) => self.magnitude.cmp(&other.magnitude),
            (true, true) => other.magnitude.cmp(&self.magnitude),
        }
    }
}

impl fmt::Display for SignedAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negative {
            write!(f, "-{}", self.magnitude)
        } else {
            write!(f, "{}", self.magnitude)
        }
    }
}

impl FromStr for SignedAmount {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.strip_prefix('-') {
            Some(rest) => Ok(Self::negative(Amount::from_dec_str(rest)?)),
            None => Ok(Self::positive(Amount::from_dec_str(s)?)),
        }
    }
}

impl Serialize for SignedAmount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SignedAmount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        value.parse().map_err(de::Error::custom)
    }
}
