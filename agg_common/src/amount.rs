use std::{
    fmt::Display,
    iter::Sum,
    ops::{Add, AddAssign, Neg, Sub, SubAssign},
    str::FromStr,
};

use serde::{Deserialize, Serialize};
use sqlx::Type;
use thiserror::Error;

use crate::op;

/// Number of micro-units in one whole unit of a token or fiat currency.
pub const UNIT: i64 = 1_000_000;

//--------------------------------------       Amount        ---------------------------------------------------------
/// A fixed-point quantity with six decimal places, stored as an integer number of micro-units.
///
/// Used for token amounts, fiat amounts and exchange rates alike. Multiplication of two amounts (e.g. a token amount by
/// a rate) is done with [`Amount::mul_rate`], which rounds toward zero.
#[derive(Debug, Clone, Copy, Default, Type, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[sqlx(transparent)]
pub struct Amount(i64);

op!(binary Amount, Add, add);
op!(binary Amount, Sub, sub);
op!(inplace Amount, AddAssign, add_assign);
op!(inplace Amount, SubAssign, sub_assign);
op!(unary Amount, Neg, neg);

impl Sum for Amount {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), Add::add)
    }
}

#[derive(Debug, Clone, Error)]
#[error("Value cannot be represented as a fixed-point amount: {0}")]
pub struct AmountConversionError(String);

impl From<i64> for Amount {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl TryFrom<u64> for Amount {
    type Error = AmountConversionError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        if value > i64::MAX as u64 {
            Err(AmountConversionError(format!("Value {value} is too large to convert to an Amount")))
        } else {
            #[allow(clippy::cast_possible_wrap)]
            Ok(Self(value as i64))
        }
    }
}

impl Display for Amount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let whole = abs / UNIT as u64;
        let frac = abs % UNIT as u64;
        if frac == 0 {
            write!(f, "{sign}{whole}")
        } else {
            let frac = format!("{frac:06}");
            write!(f, "{sign}{whole}.{}", frac.trim_end_matches('0'))
        }
    }
}

impl FromStr for Amount {
    type Err = AmountConversionError;

    /// Parses decimal strings such as `"75000"`, `"0.25"` or `"-1.5"`. More than six decimal places is an error.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (negative, digits) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        let (whole, frac) = digits.split_once('.').unwrap_or((digits, ""));
        if whole.is_empty() && frac.is_empty() {
            return Err(AmountConversionError(format!("'{s}' is not a number")));
        }
        if frac.len() > 6 {
            return Err(AmountConversionError(format!("'{s}' has more than 6 decimal places")));
        }
        let whole = if whole.is_empty() {
            0
        } else {
            whole.parse::<i64>().map_err(|e| AmountConversionError(format!("'{s}': {e}")))?
        };
        let frac = if frac.is_empty() {
            0
        } else {
            format!("{frac:0<6}").parse::<i64>().map_err(|e| AmountConversionError(format!("'{s}': {e}")))?
        };
        let value = whole
            .checked_mul(UNIT)
            .and_then(|w| w.checked_add(frac))
            .ok_or_else(|| AmountConversionError(format!("'{s}' is out of range")))?;
        Ok(Self(if negative { -value } else { value }))
    }
}

impl Amount {
    pub fn value(&self) -> i64 {
        self.0
    }

    pub fn from_units(units: i64) -> Self {
        Self(units * UNIT)
    }

    pub fn zero() -> Self {
        Self(0)
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn is_positive(&self) -> bool {
        self.0 > 0
    }

    pub fn abs(&self) -> Self {
        Self(self.0.abs())
    }

    /// Multiplies this amount by a rate (itself a fixed-point value), e.g. converting a token amount to fiat.
    pub fn mul_rate(&self, rate: Amount) -> Amount {
        let product = i128::from(self.0) * i128::from(rate.0) / i128::from(UNIT);
        Self(clamp_i128(product))
    }

    /// Multiplies this amount by a fractional factor expressed in basis points (1/100th of a percent).
    pub fn mul_bps(&self, bps: i64) -> Amount {
        let product = i128::from(self.0) * i128::from(bps) / 10_000;
        Self(clamp_i128(product))
    }

    /// This amount as a percentage of `total`. Returns zero if `total` is not positive.
    pub fn percent_of(&self, total: Amount) -> Amount {
        if !total.is_positive() {
            return Self::zero();
        }
        let ratio = i128::from(self.0) * 100 * i128::from(UNIT) / i128::from(total.0);
        Self(clamp_i128(ratio))
    }
}

fn clamp_i128(v: i128) -> i64 {
    v.clamp(i128::from(i64::MIN), i128::from(i64::MAX)) as i64
}
