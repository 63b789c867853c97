mod money;

pub mod helpers;
pub mod op;
mod secret;

pub use money::{
    from_provider_amount,
    minor_unit_exponent,
    to_provider_amount,
    Money,
    MoneyError,
    DEFAULT_CURRENCY_CODE,
};
pub use secret::Secret;
