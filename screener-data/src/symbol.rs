use crate::error::DataError;
use serde::{Deserialize, Deserializer, Serialize};
use smol_str::{SmolStr, format_smolstr};
use std::{fmt, str::FromStr};

/// Normalised `BASE/QUOTE` trading pair identifier, eg/ "BTC/USDT".
///
/// Exchange native formats (eg/ "BTCUSDT") are converted by the relevant exchange integration.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize)]
pub struct Symbol(SmolStr);

impl Symbol {
    /// Construct a validated [`Symbol`] from a `BASE/QUOTE` string. Letters are upper-cased.
    pub fn new(input: &str) -> Result<Self, DataError> {
        let invalid = |reason: &str| DataError::InvalidSymbol {
            input: input.to_string(),
            reason: reason.to_string(),
        };

        if input.chars().any(char::is_whitespace) {
            return Err(invalid("contains whitespace"));
        }

        let (base, quote) = input
            .split_once('/')
            .ok_or_else(|| invalid("missing '/' separator"))?;

        if base.is_empty() || quote.is_empty() {
            return Err(invalid("empty base or quote"));
        }
        if quote.contains('/') {
            return Err(invalid("more than one '/' separator"));
        }

        Ok(Self(format_smolstr!(
            "{}/{}",
            base.to_uppercase(),
            quote.to_uppercase()
        )))
    }

    /// Construct a [`Symbol`] from separate base and quote assets.
    pub fn from_parts(base: &str, quote: &str) -> Result<Self, DataError> {
        Self::new(&format!("{base}/{quote}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn base(&self) -> &str {
        self.0.split_once('/').map(|(base, _)| base).unwrap_or_default()
    }

    pub fn quote(&self) -> &str {
        self.0.split_once('/').map(|(_, quote)| quote).unwrap_or_default()
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Symbol {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl AsRef<str> for Symbol {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl<'de> Deserialize<'de> for Symbol {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Symbol::new(&raw).map_err(serde::de::Error::custom)
    }
}
