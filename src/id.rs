//! Tiers and sequence identifiers
//!
//! A record is addressed by `(catalog_tag, tier, ordinal)`. The ordinal is the
//! universal join key across all artifacts of one tier. Identifiers render as
//! `GMSC10.90AA.000_001_234`: the ordinal is zero-padded to nine digits and
//! grouped in threes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, QueryError, Result};

/// Granularity level of the catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tier {
    /// Coarse tier: cluster representatives at 90% amino-acid identity
    #[serde(rename = "90AA")]
    Aa90,
    /// Fine tier: the full, non-redundant set
    #[serde(rename = "100AA")]
    Aa100,
}
impl Tier {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Aa90 => "90AA",
            Self::Aa100 => "100AA",
        }
    }
}
impl FromStr for Tier {
    type Err = ConfigError;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "90AA" => Ok(Self::Aa90),
            "100AA" => Ok(Self::Aa100),
            _ => Err(ConfigError::UnknownTier(s.to_string())),
        }
    }
}
impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fully qualified record identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SeqId {
    pub catalog_tag: String,
    pub tier: Tier,
    pub ordinal: u64,
}
impl SeqId {
    #[must_use]
    pub fn new(catalog_tag: &str, tier: Tier, ordinal: u64) -> Self {
        Self {
            catalog_tag: catalog_tag.to_string(),
            tier,
            ordinal,
        }
    }

    /// Parses an identifier of the form `TAG.TIER.ORDINAL`
    pub fn parse(id: &str) -> Result<Self> {
        let mut tokens = id.split('.');
        let (Some(tag), Some(tier), Some(ordinal), None) =
            (tokens.next(), tokens.next(), tokens.next(), tokens.next())
        else {
            return Err(QueryError::InvalidSequenceId(id.to_string()).into());
        };
        if tag.is_empty() {
            return Err(QueryError::InvalidSequenceId(id.to_string()).into());
        }
        let tier = tier
            .parse::<Tier>()
            .map_err(|_| QueryError::InvalidSequenceId(id.to_string()))?;
        let ordinal = parse_ordinal_digits(ordinal)
            .ok_or_else(|| QueryError::InvalidSequenceId(id.to_string()))?;
        Ok(Self {
            catalog_tag: tag.to_string(),
            tier,
            ordinal,
        })
    }
}
impl fmt::Display for SeqId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}",
            self.catalog_tag,
            self.tier,
            group_digits(self.ordinal)
        )
    }
}
impl Serialize for SeqId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Extracts the ordinal from the final dot-separated segment of an identifier
///
/// Used on raw input lines, where the tag and tier are not validated.
#[must_use]
pub fn ordinal_of(id: &str) -> Option<u64> {
    id.rsplit('.').next().and_then(parse_ordinal_digits)
}

/// Parses digits with optional `_` separators
fn parse_ordinal_digits(s: &str) -> Option<u64> {
    if s.is_empty() || s.starts_with('_') || s.ends_with('_') {
        return None;
    }
    let mut value: u64 = 0;
    let mut seen_digit = false;
    for b in s.bytes() {
        match b {
            b'0'..=b'9' => {
                value = value.checked_mul(10)?.checked_add(u64::from(b - b'0'))?;
                seen_digit = true;
            }
            b'_' => {}
            _ => return None,
        }
    }
    seen_digit.then_some(value)
}

/// Renders an ordinal zero-padded to nine digits, grouped in threes from the right
fn group_digits(ordinal: u64) -> String {
    let digits = format!("{ordinal:09}");
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push('_');
        }
        out.push(c);
    }
    out
}
