use std::{env, fmt::Display, str::FromStr};

use crate::Secret;

/// Parse a boolean flag from a string value, or return the given default value otherwise.
pub fn parse_boolean_flag(value: Option<String>, default: bool) -> bool {
    let value = match value {
        Some(v) => v,
        None => return default,
    };
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => default,
    }
}

/// Reads a boolean flag from the environment variable `name`.
pub fn env_flag(name: &str, default: bool) -> bool {
    parse_boolean_flag(env::var(name).ok(), default)
}

/// Reads and parses the environment variable `name`.
///
/// Missing variables yield `Ok(None)`. Unparseable values are returned as an error message naming the variable, so
/// that callers can decide whether to warn and fall back to a default.
pub fn env_parse<T>(name: &str) -> Result<Option<T>, String>
where
    T: FromStr,
    T::Err: Display,
{
    match env::var(name) {
        Ok(s) if s.trim().is_empty() => Ok(None),
        Ok(s) => s.trim().parse::<T>().map(Some).map_err(|e| format!("Invalid value for {name} ({s}): {e}")),
        Err(_) => Ok(None),
    }
}

/// Reads the environment variable `name` into a [`Secret`]. Missing variables produce an empty secret.
pub fn env_secret(name: &str) -> Secret<String> {
    Secret::new(env::var(name).unwrap_or_default())
}
