//! Backend notification: POSTs the resolved visitor plus page context.

use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use crate::stats::EventKind;
use crate::visitor::VisitorInfo;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("network error: {0}")]
    Network(String),
    #[error("backend answered HTTP {0}")]
    Status(u16),
}

/// Where the event happened and who triggered it.
#[derive(Debug, Clone, Default)]
pub struct PageContext {
    pub url: String,
    pub referrer: Option<String>,
    pub language: String,
    pub user_agent: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VisitPayload {
    #[serde(flatten)]
    pub visitor: VisitorInfo,
    pub url: String,
    pub referrer: String,
    pub language: String,
    #[serde(rename = "userAgent")]
    pub user_agent: String,
}

impl VisitPayload {
    pub fn new(visitor: VisitorInfo, page: &PageContext) -> Self {
        let referrer = page
            .referrer
            .as_deref()
            .filter(|r| !r.is_empty())
            .unwrap_or("direct")
            .to_string();
        Self {
            visitor,
            url: page.url.clone(),
            referrer,
            language: page.language.clone(),
            user_agent: page.user_agent.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DownloadPayload {
    #[serde(flatten)]
    pub visitor: VisitorInfo,
    pub url: String,
    pub language: String,
    #[serde(rename = "userAgent")]
    pub user_agent: String,
}

impl DownloadPayload {
    pub fn new(visitor: VisitorInfo, page: &PageContext) -> Self {
        Self {
            visitor,
            url: page.url.clone(),
            language: page.language.clone(),
            user_agent: page.user_agent.clone(),
        }
    }
}

/// Endpoint path for an event kind.
pub fn endpoint_path(kind: EventKind) -> &'static str {
    match kind {
        EventKind::Visit => "/api/notify-visit",
        EventKind::Download => "/api/notify-download",
    }
}

/// Posts visit/download events to the backend.
pub struct Notifier {
    agent: ureq::Agent,
    base_url: String,
}

impl Notifier {
    pub fn new(base_url: &str, timeout: Duration, user_agent: &str) -> Self {
        Self {
            agent: ureq::AgentBuilder::new()
                .user_agent(user_agent)
                .timeout(timeout)
                .build(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn notify_visit(&self, payload: &VisitPayload) -> Result<(), NotifyError> {
        self.post(EventKind::Visit, payload)
    }

    pub fn notify_download(&self, payload: &DownloadPayload) -> Result<(), NotifyError> {
        self.post(EventKind::Download, payload)
    }

    fn post<T: Serialize>(&self, kind: EventKind, payload: &T) -> Result<(), NotifyError> {
        let url = format!("{}{}", self.base_url, endpoint_path(kind));
        debug!(%url, "sending notification");

        self.agent.post(&url).send_json(payload).map_err(|e| match e {
            ureq::Error::Status(code, _) => NotifyError::Status(code),
            ureq::Error::Transport(t) => NotifyError::Network(t.to_string()),
        })?;

        info!(%url, "notification delivered");
        Ok(())
    }
}

/// Link the page uses to fetch a download.
///
/// Pages opened from disk use a relative path; served pages use the
/// server's `/downloads/` route with the file name percent-encoded.
pub fn download_url(page_url: &str, file_name: &str) -> String {
    if page_url.starts_with("file:") {
        format!("./downloads/{}", file_name)
    } else {
        format!("/downloads/{}", encode_uri_component(file_name))
    }
}

// ─── URL encoding (minimal, no extra dep) ───────────────────────

/// Percent-encode like JavaScript's `encodeURIComponent`.
fn encode_uri_component(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            'A'..='Z' | 'a'..='z' | '0'..='9' => out.push(c),
            '-' | '_' | '.' | '!' | '~' | '*' | '\'' | '(' | ')' => out.push(c),
            _ => {
                let mut buf = [0u8; 4];
                for b in c.encode_utf8(&mut buf).bytes() {
                    out.push_str(&format!("%{:02X}", b));
                }
            }
        }
    }
    out
}
