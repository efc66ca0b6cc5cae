//! Geolocation providers: descriptors, response normalization, and the HTTP source.

use super::types::{ProviderUnavailable, VisitorInfo, UNKNOWN};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::io;
use std::time::Duration;

// ─── Provider descriptors ───────────────────────────────────────

/// Source field names tried, in order, for each canonical field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldMap {
    pub ip: Vec<String>,
    pub city: Vec<String>,
    pub region: Vec<String>,
    pub country: Vec<String>,
    pub asn: Vec<String>,
    pub org: Vec<String>,
    pub latitude: Vec<String>,
    pub longitude: Vec<String>,
    pub timezone: Vec<String>,
}

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

impl Default for FieldMap {
    fn default() -> Self {
        Self {
            ip: names(&["ip", "query"]),
            city: names(&["city"]),
            region: names(&["region", "regionName"]),
            country: names(&["country_name", "country"]),
            asn: names(&["asn"]),
            org: names(&["org", "isp"]),
            latitude: names(&["latitude", "lat"]),
            longitude: names(&["longitude", "lon"]),
            timezone: names(&["timezone"]),
        }
    }
}

/// One configured geolocation provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderDescriptor {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub fields: FieldMap,
}

impl ProviderDescriptor {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            fields: FieldMap::default(),
        }
    }
}

/// Built-in provider chain, highest priority first.
pub fn default_providers() -> Vec<ProviderDescriptor> {
    vec![
        ProviderDescriptor::new("ipapi.co", "https://ipapi.co/json/"),
        // The free ip-api.com tier is HTTP only.
        ProviderDescriptor::new("ip-api.com", "http://ip-api.com/json/"),
        ProviderDescriptor::new("ipinfo.io", "https://ipinfo.io/json"),
    ]
}

// ─── Normalization ──────────────────────────────────────────────

fn pick_string(obj: &Map<String, Value>, candidates: &[String]) -> String {
    for key in candidates {
        match obj.get(key) {
            Some(Value::String(s)) if !s.trim().is_empty() => return s.trim().to_string(),
            Some(Value::Number(n)) => return n.to_string(),
            _ => {}
        }
    }
    UNKNOWN.to_string()
}

fn pick_coord(obj: &Map<String, Value>, candidates: &[String]) -> Option<f64> {
    candidates.iter().find_map(|key| {
        let v = match obj.get(key)? {
            Value::Number(n) => n.as_f64()?,
            Value::String(s) => s.trim().parse::<f64>().ok()?,
            _ => return None,
        };
        v.is_finite().then_some(v)
    })
}

/// Normalize one provider response into the canonical record.
///
/// Only a non-object body is an error; absent or unusable fields default.
pub fn normalize(body: &Value, fields: &FieldMap) -> Result<VisitorInfo, ProviderUnavailable> {
    let obj = body
        .as_object()
        .ok_or_else(|| ProviderUnavailable::Malformed("expected a JSON object".into()))?;

    Ok(VisitorInfo {
        ip: pick_string(obj, &fields.ip),
        city: pick_string(obj, &fields.city),
        region: pick_string(obj, &fields.region),
        country: pick_string(obj, &fields.country),
        asn: pick_string(obj, &fields.asn),
        org: pick_string(obj, &fields.org),
        latitude: pick_coord(obj, &fields.latitude),
        longitude: pick_coord(obj, &fields.longitude),
        timezone: pick_string(obj, &fields.timezone),
    })
}

// ─── Provider source ────────────────────────────────────────────

/// Fetches a provider's raw JSON body.
pub trait ProviderSource: Send + Sync {
    fn fetch(
        &self,
        provider: &ProviderDescriptor,
        timeout: Duration,
    ) -> Result<Value, ProviderUnavailable>;
}

/// Blocking HTTP source backed by a shared `ureq` agent.
pub struct HttpSource {
    agent: ureq::Agent,
}

impl HttpSource {
    pub fn new(user_agent: &str) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().user_agent(user_agent).build(),
        }
    }
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock)
}

fn classify_transport(t: &ureq::Transport) -> ProviderUnavailable {
    let timed_out = std::error::Error::source(t)
        .and_then(|src| src.downcast_ref::<io::Error>())
        .is_some_and(is_timeout);
    if timed_out {
        ProviderUnavailable::Timeout
    } else {
        ProviderUnavailable::Network(t.to_string())
    }
}

impl ProviderSource for HttpSource {
    fn fetch(
        &self,
        provider: &ProviderDescriptor,
        timeout: Duration,
    ) -> Result<Value, ProviderUnavailable> {
        let response = self
            .agent
            .get(&provider.url)
            .set("Accept", "application/json")
            .timeout(timeout)
            .call()
            .map_err(|e| match e {
                ureq::Error::Status(code, _) => ProviderUnavailable::Status(code),
                ureq::Error::Transport(t) => classify_transport(&t),
            })?;

        response.into_json::<Value>().map_err(|e| {
            if is_timeout(&e) {
                ProviderUnavailable::Timeout
            } else {
                ProviderUnavailable::Malformed(e.to_string())
            }
        })
    }
}
