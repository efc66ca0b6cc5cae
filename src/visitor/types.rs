//! Core types for the visitor subsystem.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Sentinel for any string field no provider could fill.
pub const UNKNOWN: &str = "unknown";

/// Canonical visitor record, independent of any provider's schema.
///
/// Every field is always serialized. Coordinates serialize as `null`
/// when unresolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisitorInfo {
    pub ip: String,
    pub city: String,
    pub region: String,
    pub country: String,
    pub asn: String,
    pub org: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub timezone: String,
}

impl VisitorInfo {
    /// The all-unknown record returned when no provider answered.
    pub fn unknown() -> Self {
        Self {
            ip: UNKNOWN.into(),
            city: UNKNOWN.into(),
            region: UNKNOWN.into(),
            country: UNKNOWN.into(),
            asn: UNKNOWN.into(),
            org: UNKNOWN.into(),
            latitude: None,
            longitude: None,
            timezone: UNKNOWN.into(),
        }
    }

    /// True when `city` holds a real name rather than the sentinel.
    pub fn has_city(&self) -> bool {
        is_known(&self.city)
    }

    /// True when every string field is the sentinel and coordinates are absent.
    pub fn is_unknown(&self) -> bool {
        *self == Self::unknown()
    }

    pub fn summary_line(&self) -> String {
        let coords = match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => format!("{:.4}, {:.4}", lat, lon),
            _ => "no coordinates".into(),
        };
        format!(
            "{} \u{2192} {}, {}, {} ({}) [{}]",
            self.ip, self.city, self.region, self.country, self.timezone, coords
        )
    }
}

impl Default for VisitorInfo {
    fn default() -> Self {
        Self::unknown()
    }
}

pub(crate) fn is_known(value: &str) -> bool {
    !value.is_empty() && value != UNKNOWN
}

/// How providers are queried during one resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FanOut {
    /// One provider at a time, in configured order.
    #[default]
    Sequential,
    /// All providers at once; results reduced in configured order.
    Parallel,
}

impl fmt::Display for FanOut {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sequential => write!(f, "sequential"),
            Self::Parallel => write!(f, "parallel"),
        }
    }
}

/// A single provider attempt that produced nothing usable.
///
/// Always absorbed by the resolver; never reaches its caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderUnavailable {
    #[error("network error: {0}")]
    Network(String),
    #[error("HTTP status {0}")]
    Status(u16),
    #[error("timed out")]
    Timeout,
    #[error("malformed response: {0}")]
    Malformed(String),
}
