// This file is part of conviction-oracle.
// SPDX-License-Identifier: Apache-2.0

//! Chain amounts travel through the whole pipeline as a single big-integer type. Per the data
//! model, the Store must not silently truncate values exceeding a 64-bit integer; on disk,
//! amounts are represented as fixed-width, zero-padded decimal strings so that lexicographic
//! and numeric order coincide.

use num_bigint::{BigInt, BigUint, Sign};
use num_traits::Zero;
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    ops::{Add, Sub},
    str::FromStr,
};

/// Width (in decimal digits) of the fixed-width encoding used at the Store boundary. 40 digits
/// comfortably exceeds any realistic raw SPL token amount (u64 base units times any plausible
/// decimals) while leaving room to grow.
const ENCODED_WIDTH: usize = 40;

/// A non-negative, arbitrary-precision chain amount (raw base units, i.e. pre-decimals).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Amount(BigUint);

impl Amount {
    pub const ZERO: Amount = Amount(BigUint::ZERO);

    pub fn from_u64(value: u64) -> Self {
        Amount(BigUint::from(value))
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Lossy conversion to `f64`, used only for classification ratios where precision loss is
    /// acceptable (retention is a display/bucketing quantity, not a balance).
    pub fn to_f64_lossy(&self) -> f64 {
        self.0.to_string().parse().unwrap_or(f64::MAX)
    }

    /// Encode as a fixed-width, zero-padded decimal string safe for lexicographic ordering.
    pub fn encode(&self) -> String {
        let digits = self.0.to_str_radix(10);
        assert!(
            digits.len() <= ENCODED_WIDTH,
            "amount {digits} exceeds encoded width {ENCODED_WIDTH}"
        );
        format!("{digits:0>ENCODED_WIDTH$}")
    }

    /// Decode a value previously produced by [`Amount::encode`].
    pub fn decode(s: &str) -> Result<Self, AmountParseError> {
        let trimmed = s.trim_start_matches('0');
        let digits = if trimmed.is_empty() { "0" } else { trimmed };
        let value = BigUint::from_str(digits).map_err(|_| AmountParseError(s.to_owned()))?;
        Ok(Amount(value))
    }

    pub fn saturating_add_signed(&self, delta: &SignedAmount) -> Amount {
        let signed = BigInt::from_biguint(Sign::Plus, self.0.clone()) + &delta.0;
        if signed.sign() == Sign::Minus {
            Amount::ZERO
        } else {
            Amount(signed.to_biguint().unwrap_or_default())
        }
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Amount {
    type Err = AmountParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = BigUint::from_str(s).map_err(|_| AmountParseError(s.to_owned()))?;
        Ok(Amount(value))
    }
}

impl Serialize for Amount {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Amount::from_str(&s).map_err(serde::de::Error::custom)
    }
}

impl Add for Amount {
    type Output = Amount;

    fn add(self, rhs: Amount) -> Amount {
        Amount(self.0 + rhs.0)
    }
}

impl Add<&Amount> for &Amount {
    type Output = Amount;

    fn add(self, rhs: &Amount) -> Amount {
        Amount(&self.0 + &rhs.0)
    }
}

impl Sub for Amount {
    type Output = Amount;

    /// Saturating at zero: the data model forbids negative balances.
    fn sub(self, rhs: Amount) -> Amount {
        if rhs.0 > self.0 {
            Amount::ZERO
        } else {
            Amount(self.0 - rhs.0)
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("cannot parse amount: {0}")]
pub struct AmountParseError(pub String);

/// A signed, arbitrary-precision delta, as carried by a [`BalanceChange`](super::BalanceChange).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedAmount(BigInt);

impl SignedAmount {
    pub fn zero() -> Self {
        SignedAmount(BigInt::ZERO)
    }

    pub fn from_amount(amount: &Amount) -> Self {
        SignedAmount(BigInt::from_biguint(Sign::Plus, amount.0.clone()))
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn is_positive(&self) -> bool {
        self.0.sign() == Sign::Plus
    }

    pub fn is_negative(&self) -> bool {
        self.0.sign() == Sign::Minus
    }

    pub fn abs(&self) -> Amount {
        Amount(self.0.magnitude().clone())
    }
}

impl Add for SignedAmount {
    type Output = SignedAmount;

    fn add(self, rhs: SignedAmount) -> SignedAmount {
        SignedAmount(self.0 + rhs.0)
    }
}

impl Sub for SignedAmount {
    type Output = SignedAmount;

    fn sub(self, rhs: SignedAmount) -> SignedAmount {
        SignedAmount(self.0 - rhs.0)
    }
}

impl fmt::Display for SignedAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SignedAmount {
    type Err = AmountParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = BigInt::from_str(s).map_err(|_| AmountParseError(s.to_owned()))?;
        Ok(SignedAmount(value))
    }
}

impl Serialize for SignedAmount {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for SignedAmount {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        SignedAmount::from_str(&s).map_err(serde::de::Error::custom)
    }
}

impl From<i64> for SignedAmount {
    fn from(value: i64) -> Self {
        SignedAmount(BigInt::from(value))
    }
}
