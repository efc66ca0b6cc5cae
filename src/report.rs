//! Event reporting: resolve the visitor, count the event, notify the backend.
//!
//! Notification is best effort. A failed POST is logged and reported back as
//! `delivered: false`; only stats persistence can fail the call.

use tracing::warn;

use crate::notify::{DownloadPayload, NotifyError, Notifier, PageContext, VisitPayload};
use crate::stats::{EventKind, StatsError, StatsStore};
use crate::visitor::VisitorInfoResolver;

/// Outcome of reporting one event.
#[derive(Debug, Clone)]
pub struct Report<P> {
    pub payload: P,
    /// Whether the backend accepted the notification.
    pub delivered: bool,
}

fn delivered(kind: &str, result: Option<Result<(), NotifyError>>) -> bool {
    match result {
        Some(Ok(())) => true,
        Some(Err(e)) => {
            warn!(error = %e, "{} notification could not be sent", kind);
            false
        }
        None => false,
    }
}

/// Record a page visit. `notifier: None` skips the backend POST.
pub fn report_visit(
    resolver: &VisitorInfoResolver,
    stats: &mut StatsStore,
    notifier: Option<&Notifier>,
    page: &PageContext,
) -> Result<Report<VisitPayload>, StatsError> {
    let info = resolver.resolve();
    stats.increment(EventKind::Visit)?;
    stats.record_visitor(&info.ip)?;

    let payload = VisitPayload::new(info, page);
    let result = notifier.map(|n| n.notify_visit(&payload));
    Ok(Report {
        delivered: delivered("visit", result),
        payload,
    })
}

/// Record a download. `notifier: None` skips the backend POST.
pub fn report_download(
    resolver: &VisitorInfoResolver,
    stats: &mut StatsStore,
    notifier: Option<&Notifier>,
    page: &PageContext,
) -> Result<Report<DownloadPayload>, StatsError> {
    let info = resolver.resolve();
    stats.increment(EventKind::Download)?;

    let payload = DownloadPayload::new(info, page);
    let result = notifier.map(|n| n.notify_download(&payload));
    Ok(Report {
        delivered: delivered("download", result),
        payload,
    })
}
