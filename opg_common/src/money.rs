//! Canonical money representation and the minor-unit normalizer.
//!
//! Internally every amount is a [`Money`] value, a thin wrapper around an exact [`Decimal`] in *major* units of its
//! currency (e.g. `64.99` dollars). Payment providers disagree on what goes over the wire: some want integer minor
//! units (cents, kobo), others want the decimal major-unit amount. The helpers in this module convert between the two
//! without ever going through floating point, and refuse conversions that would silently drop value.
use std::{fmt::Display, str::FromStr};

use rust_decimal::{prelude::ToPrimitive, Decimal};
use serde::{Deserialize, Serialize};
use sqlx::{
    encode::IsNull,
    error::BoxDynError,
    sqlite::{Sqlite, SqliteArgumentValue, SqliteTypeInfo, SqliteValueRef},
    Decode,
    Encode,
    Type,
};
use thiserror::Error;

use crate::op;

pub const DEFAULT_CURRENCY_CODE: &str = "USD";

/// ISO 4217 currencies without a minor unit.
const ZERO_DECIMAL_CURRENCIES: [&str; 16] =
    ["BIF", "CLP", "DJF", "GNF", "ISK", "JPY", "KMF", "KRW", "PYG", "RWF", "UGX", "VND", "VUV", "XAF", "XOF", "XPF"];
/// ISO 4217 currencies with three decimal places.
const THREE_DECIMAL_CURRENCIES: [&str; 5] = ["BHD", "JOD", "KWD", "OMR", "TND"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MoneyError {
    #[error("{amount} {currency} cannot be expressed in whole minor units")]
    PrecisionLoss { amount: Decimal, currency: String },
    #[error("{0} {1} is too large to be expressed in minor units")]
    Overflow(Decimal, String),
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),
    #[error("Amounts may not be negative: {0}")]
    Negative(Decimal),
}

//--------------------------------------        Money        ---------------------------------------------------------
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(Decimal);

op!(binary Money, Add, add);
op!(binary Money, Sub, sub);
op!(inplace Money, AddAssign, add_assign);
op!(unary Money, Neg, neg);

impl From<Decimal> for Money {
    fn from(value: Decimal) -> Self {
        Self(value)
    }
}

impl FromStr for Money {
    type Err = MoneyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Decimal::from_str(s.trim()).map(Self).map_err(|e| MoneyError::InvalidAmount(format!("{s}: {e}")))
    }
}

impl Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Money {
    pub fn new(value: Decimal) -> Self {
        Self(value)
    }

    pub fn zero() -> Self {
        Self(Decimal::ZERO)
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    pub fn is_negative(&self) -> bool {
        self.0.is_sign_negative() && !self.0.is_zero()
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// `self + rhs`, or `None` if the result does not fit in a `Decimal`.
    pub fn checked_add(self, rhs: Money) -> Option<Money> {
        self.0.checked_add(rhs.0).map(Self)
    }

    /// `self × quantity`, or `None` if the result does not fit in a `Decimal`.
    pub fn checked_mul(self, quantity: i64) -> Option<Money> {
        self.0.checked_mul(Decimal::from(quantity)).map(Self)
    }

    /// The sum of `amounts`, or `None` if any partial sum overflows.
    pub fn checked_sum<I: IntoIterator<Item = Money>>(amounts: I) -> Option<Money> {
        amounts.into_iter().try_fold(Money::zero(), Money::checked_add)
    }

    /// Builds a canonical amount from an integer number of minor units of `currency`.
    pub fn from_minor_units(units: i64, currency: &str) -> Self {
        Self(Decimal::new(units, minor_unit_exponent(currency)))
    }

    /// Expresses this amount as an integer number of minor units of `currency`.
    ///
    /// Fails if the amount carries more precision than the currency's minor unit allows (e.g. `1.005 USD`).
    pub fn to_minor_units(&self, currency: &str) -> Result<i64, MoneyError> {
        let factor = Decimal::from(10i64.pow(minor_unit_exponent(currency)));
        let scaled = self.0.checked_mul(factor).ok_or_else(|| MoneyError::Overflow(self.0, currency.to_string()))?;
        if !scaled.fract().is_zero() {
            return Err(MoneyError::PrecisionLoss { amount: self.0, currency: currency.to_string() });
        }
        scaled.to_i64().ok_or_else(|| MoneyError::Overflow(self.0, currency.to_string()))
    }
}

/// The number of decimal places of the minor unit of `currency` (ISO 4217). Unknown currencies use 2.
pub fn minor_unit_exponent(currency: &str) -> u32 {
    let code = currency.trim().to_ascii_uppercase();
    if ZERO_DECIMAL_CURRENCIES.contains(&code.as_str()) {
        0
    } else if THREE_DECIMAL_CURRENCIES.contains(&code.as_str()) {
        3
    } else {
        2
    }
}

/// Converts a canonical amount into the value a provider expects on the wire.
///
/// When `minor_units` is true the result is a whole number of minor units (`64.99 USD` -> `6499`), otherwise the
/// major-unit decimal is passed through unchanged.
pub fn to_provider_amount(amount: Money, currency: &str, minor_units: bool) -> Result<Decimal, MoneyError> {
    if amount.is_negative() {
        return Err(MoneyError::Negative(amount.value()));
    }
    if minor_units {
        amount.to_minor_units(currency).map(Decimal::from)
    } else {
        Ok(amount.value())
    }
}

/// Converts an amount reported by a provider back into a canonical amount. This is the inverse of
/// [`to_provider_amount`].
pub fn from_provider_amount(raw: Decimal, currency: &str, minor_units: bool) -> Result<Money, MoneyError> {
    if minor_units {
        if !raw.fract().is_zero() {
            return Err(MoneyError::InvalidAmount(format!("{raw} is not a whole number of {currency} minor units")));
        }
        let units = raw.to_i64().ok_or_else(|| MoneyError::Overflow(raw, currency.to_string()))?;
        Ok(Money::from_minor_units(units, currency))
    } else {
        Ok(Money(raw))
    }
}

//--------------------------------------   SQLite mapping   ---------------------------------------------------------
// Amounts are persisted as decimal text so that no precision is lost in the database.
impl Type<Sqlite> for Money {
    fn type_info() -> SqliteTypeInfo {
        <String as Type<Sqlite>>::type_info()
    }

    fn compatible(ty: &SqliteTypeInfo) -> bool {
        <String as Type<Sqlite>>::compatible(ty)
    }
}

impl<'q> Encode<'q, Sqlite> for Money {
    fn encode_by_ref(&self, buf: &mut Vec<SqliteArgumentValue<'q>>) -> IsNull {
        <String as Encode<'q, Sqlite>>::encode(self.0.to_string(), buf)
    }
}

impl<'r> Decode<'r, Sqlite> for Money {
    fn decode(value: SqliteValueRef<'r>) -> Result<Self, BoxDynError> {
        let s = <&str as Decode<'r, Sqlite>>::decode(value)?;
        Ok(Money(Decimal::from_str(s)?))
    }
}
