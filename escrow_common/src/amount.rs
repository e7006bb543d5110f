use std::{
    fmt::Display,
    iter::Sum,
    ops::{Add, Mul},
    str::FromStr,
};

use serde::{Deserialize, Serialize};
use sqlx::Type;
use thiserror::Error;

use crate::op;

pub const DEFAULT_CURRENCY: &str = "EUR";
/// Amounts are stored in minor units (cents). There are this many minor units in one major unit.
pub const MINOR_UNITS_PER_MAJOR: i64 = 100;

//--------------------------------------       Amount        ---------------------------------------------------------
/// A monetary amount in integer minor units. All ledger arithmetic is exact; there is no floating point anywhere
/// between the API surface and the database.
#[derive(Debug, Clone, Copy, Default, Type, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[sqlx(transparent)]
pub struct Amount(i64);

op!(binary Amount, Add, add);
op!(binary Amount, Sub, sub);
op!(inplace Amount, AddAssign, add_assign);
op!(inplace Amount, SubAssign, sub_assign);
op!(unary Amount, Neg, neg);

impl Mul<i64> for Amount {
    type Output = Self;

    fn mul(self, rhs: i64) -> Self::Output {
        Self(self.0 * rhs)
    }
}

impl Sum for Amount {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), Add::add)
    }
}

impl From<i64> for Amount {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub fn value(&self) -> i64 {
        self.0
    }

    pub fn from_major(major: i64) -> Self {
        Self(major * MINOR_UNITS_PER_MAJOR)
    }

    pub fn is_positive(&self) -> bool {
        self.0 > 0
    }

    pub fn is_negative(&self) -> bool {
        self.0 < 0
    }

    pub fn abs(&self) -> Self {
        Self(self.0.abs())
    }

    pub fn checked_add(self, rhs: Self) -> Option<Self> {
        self.0.checked_add(rhs.0).map(Self)
    }

    pub fn checked_sub(self, rhs: Self) -> Option<Self> {
        self.0.checked_sub(rhs.0).map(Self)
    }
}

impl Display for Amount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let per = MINOR_UNITS_PER_MAJOR.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / per, abs % per)
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("'{0}' is not a valid amount. Use a decimal value with at most two fractional digits")]
pub struct AmountParseError(String);

impl FromStr for Amount {
    type Err = AmountParseError;

    /// Parses a decimal string ("12", "12.5", "-0.75") into minor units without going through a float.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || AmountParseError(s.to_string());
        let trimmed = s.trim();
        let (negative, digits) = match trimmed.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, trimmed),
        };
        let (major, minor) = digits.split_once('.').unwrap_or((digits, ""));
        if major.is_empty() || minor.len() > 2 || !major.chars().all(|c| c.is_ascii_digit()) {
            return Err(err());
        }
        if !minor.chars().all(|c| c.is_ascii_digit()) {
            return Err(err());
        }
        let major = major.parse::<i64>().map_err(|_| err())?;
        let minor = match minor.len() {
            0 => 0,
            1 => minor.parse::<i64>().map_err(|_| err())? * 10,
            _ => minor.parse::<i64>().map_err(|_| err())?,
        };
        let value = major.checked_mul(MINOR_UNITS_PER_MAJOR).and_then(|v| v.checked_add(minor)).ok_or_else(err)?;
        Ok(Self(if negative { -value } else { value }))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn display() {
        assert_eq!(Amount::from(0).to_string(), "0.00");
        assert_eq!(Amount::from(5).to_string(), "0.05");
        assert_eq!(Amount::from(12_345).to_string(), "123.45");
        assert_eq!(Amount::from(-150).to_string(), "-1.50");
    }

    #[test]
    fn parse() {
        assert_eq!("12".parse::<Amount>().unwrap(), Amount::from(1200));
        assert_eq!("12.5".parse::<Amount>().unwrap(), Amount::from(1250));
        assert_eq!("0.07".parse::<Amount>().unwrap(), Amount::from(7));
        assert_eq!("-3.10".parse::<Amount>().unwrap(), Amount::from(-310));
        assert!("1.005".parse::<Amount>().is_err());
        assert!("abc".parse::<Amount>().is_err());
        assert!(".50".parse::<Amount>().is_err());
        assert!("1.-5".parse::<Amount>().is_err());
    }

    #[test]
    fn arithmetic_is_exact() {
        // 0.1 + 0.2 style drift cannot happen with minor units
        let total: Amount = std::iter::repeat(Amount::from(10)).take(3).sum();
        assert_eq!(total, Amount::from(30));
        let mut a = Amount::from_major(5);
        a -= Amount::from(1);
        assert_eq!(a.value(), 499);
        assert_eq!(-a, Amount::from(-499));
        assert_eq!(Amount::from(i64::MAX).checked_add(Amount::from(1)), None);
    }

    #[test]
    fn serializes_as_minor_units() {
        let json = serde_json::to_string(&Amount::from(2500)).unwrap();
        assert_eq!(json, "2500");
    }
}
