//! Bus clients and the five long-running workers that own them (spec.md
//! §2 items 2–3, §4.4).

pub mod box_worker;
pub mod client;
pub mod command;
pub mod therm_worker;
pub mod turbo_worker;
pub mod vac_worker;

use cryo_protocol::ErrorRecord;
use tracing::warn;

use crate::supervisor::ErrorSender;

/// Pushes a record onto the shared error channel; a full channel is a
/// log-and-drop locally (spec.md §5 shared-resource policy).
pub(crate) async fn report(errors: &ErrorSender, record: ErrorRecord) {
    if errors.try_send(record.clone()).is_err() {
        warn!(message = %record.message, "error channel full, dropping locally");
    }
}
