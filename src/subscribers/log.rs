//! # Simple logging subscriber for debugging and demos.
//!
//! [`LogWriter`] prints events to stdout in a human-readable format.
//! Primarily useful for development and debugging.
//!
//! ## Output format
//! ```text
//! [launched] job=7
//! [cancelling] job=7 reason=failure
//! [cancelled] job=7 reason=failure
//! [completed] job=8
//! [escalated] job=7 reason="boom"
//! [isolated] job=9 reason="boom"
//! [rejected] job=11 dispatcher=compute
//! ```

use async_trait::async_trait;

use crate::events::{Event, EventKind};

use super::Subscribe;

/// Simple stdout logging subscriber.
///
/// Enabled via the `logging` feature. Not intended for production use —
/// implement a custom [`Subscribe`] for structured logging or metrics.
#[derive(Default)]
pub struct LogWriter;

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        match e.kind {
            EventKind::JobLaunched => {
                println!("[launched] job={:?}", e.job);
            }
            EventKind::JobCompleted => {
                println!("[completed] job={:?}", e.job);
            }
            EventKind::JobCancelling => {
                println!("[cancelling] job={:?} reason={:?}", e.job, e.reason);
            }
            EventKind::JobCancelled => {
                println!("[cancelled] job={:?} reason={:?}", e.job, e.reason);
            }
            EventKind::FailureEscalated => {
                println!("[escalated] job={:?} reason={:?}", e.job, e.reason);
            }
            EventKind::FailureIsolated => {
                println!("[isolated] job={:?} reason={:?}", e.job, e.reason);
            }
            EventKind::DispatcherRejected => {
                println!("[rejected] job={:?} dispatcher={:?}", e.job, e.dispatcher);
            }
            EventKind::SubscriberOverflow | EventKind::SubscriberPanicked => {
                println!(
                    "[subscriber-issue] kind={} name={:?} reason={:?}",
                    e.kind.as_label(),
                    e.dispatcher,
                    e.reason
                );
            }
        }
    }

    fn name(&self) -> &'static str {
        "log_writer"
    }
}
