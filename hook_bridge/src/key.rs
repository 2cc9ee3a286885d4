use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Opaque 64-bit identifier naming a native engine function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FunctionKey(u64);

/// Builds a formatted text value on the engine side; used for long-text emission.
pub const VAR_STRING: FunctionKey = FunctionKey::new(0xFA92_5AC0_0EB8_30B9);

/// First argument of a `VAR_STRING` call that marks the payload as literal text.
pub const VAR_STRING_LITERAL_FLAGS: i32 = 10;

/// Second argument of a `VAR_STRING` call that marks the payload as literal text.
pub const LITERAL_STRING: &str = "LITERAL_STRING";

impl FunctionKey {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl From<u64> for FunctionKey {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for FunctionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016X}", self.0)
    }
}

/// Accepts `0x`-prefixed hexadecimal or plain decimal.
impl FromStr for FunctionKey {
    type Err = ParseIntError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let trimmed = input.trim();
        let raw = match trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
        {
            Some(hex) => u64::from_str_radix(&hex.replace('_', ""), 16)?,
            None => trimmed.parse::<u64>()?,
        };
        Ok(Self(raw))
    }
}

impl Serialize for FunctionKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

struct FunctionKeyVisitor;

impl<'de> Visitor<'de> for FunctionKeyVisitor {
    type Value = FunctionKey;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a function key as an unsigned integer or hex string")
    }

    fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        Ok(FunctionKey(value))
    }

    fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        u64::try_from(value)
            .map(FunctionKey)
            .map_err(|_| E::custom(format!("function key {value} is negative")))
    }

    fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        value
            .parse()
            .map_err(|err| E::custom(format!("invalid function key {value:?}: {err}")))
    }
}

impl<'de> Deserialize<'de> for FunctionKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(FunctionKeyVisitor)
    }
}
