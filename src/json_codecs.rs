//! Decoders for the hex encoded quantities EVM nodes respond with.

use serde::{de, Deserialize, Deserializer};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HexQuantityError {
    #[error("hex quantity {0:?} is missing the 0x prefix")]
    MissingPrefix(String),
    #[error("hex quantity {0:?} has no digits")]
    Empty(String),
    #[error("hex quantity {0:?} is not valid hex or does not fit within 128 bits")]
    Invalid(String),
}

pub fn parse_hex_quantity(s: &str) -> Result<u128, HexQuantityError> {
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .ok_or_else(|| HexQuantityError::MissingPrefix(s.to_string()))?;

    if digits.is_empty() {
        return Err(HexQuantityError::Empty(s.to_string()));
    }

    u128::from_str_radix(digits, 16).map_err(|_| HexQuantityError::Invalid(s.to_string()))
}

pub fn to_hex_quantity(num: u128) -> String {
    format!("0x{num:x}")
}

pub fn u128_from_hex_str<'de, D>(deserializer: D) -> Result<u128, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    parse_hex_quantity(&s).map_err(|error| {
        de::Error::invalid_value(
            de::Unexpected::Str(&format!("unexpected value: {}, error: {}", s, error)),
            &"a hex quantity string e.g. \"0x1b4\", which fits within u128",
        )
    })
}

pub fn i128_from_hex_str<'de, D>(deserializer: D) -> Result<i128, D::Error>
where
    D: Deserializer<'de>,
{
    let num = u128_from_hex_str(deserializer)?;
    i128::try_from(num).map_err(|_| {
        de::Error::invalid_value(
            de::Unexpected::Str(&format!("{num:#x}")),
            &"a hex quantity which fits within i128",
        )
    })
}
