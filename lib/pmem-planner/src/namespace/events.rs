use tracing::{error, info, warn};

use super::{EventLog, EventSeverity, ManagementEvent};

/// An event log that emits every management event as a tracing record.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingEventLog;

impl EventLog for TracingEventLog {
    fn log_event(&self, event: ManagementEvent) {
        let ManagementEvent {
            severity,
            code,
            subject_uid,
            namespace_name,
            action_required,
        } = event;

        match severity {
            EventSeverity::Info => info!(?code, %subject_uid, %namespace_name, action_required, "Namespace event."),
            EventSeverity::Warning => warn!(?code, %subject_uid, %namespace_name, action_required, "Namespace event."),
            EventSeverity::Critical => {
                error!(?code, %subject_uid, %namespace_name, action_required, "Namespace event.")
            }
        }
    }

    fn acknowledge_action_required(&self, subject_uid: &str) {
        info!(subject_uid, "Acknowledged action-required events.");
    }
}
