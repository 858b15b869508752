//! Human-review tickets
//!
//! When an evaluated change regresses, the system never reverses it. It
//! files a ticket carrying everything a human needs to decide, including the
//! ready-to-run rollback reference, and leaves the deployed state alone.

use crate::domain::{ContinualMetrics, TaskId};
use crate::error::Result;

/// Escalation request for a regressed change
#[derive(Debug, Clone, PartialEq)]
pub struct ReviewTicket {
    pub task_id: TaskId,
    pub version_number: u32,

    /// Metrics captured immediately before the deploy
    pub before: ContinualMetrics,

    /// Metrics at the close of the evaluation window
    pub after: ContinualMetrics,

    /// Producer's summary of the change under review
    pub change_summary: String,

    /// Ready-to-run reference for reverting the change; filed, never invoked
    pub rollback_reference: String,

    pub label: String,
}

impl ReviewTicket {
    pub const REGRESSION_LABEL: &'static str = "needs-human-review";
}

/// Destination for human-review tickets
pub trait TicketSink: Send + Sync {
    /// File a ticket, returning its external id
    fn create_ticket(&self, ticket: ReviewTicket) -> Result<String>;
}

/// Sink that writes tickets to the daemon log.
///
/// Default for deployments with no tracker integration; the ticket text
/// carries everything a human needs, including the rollback reference.
pub struct LogTicketSink;

impl TicketSink for LogTicketSink {
    fn create_ticket(&self, ticket: ReviewTicket) -> Result<String> {
        let id = crate::id::generate_ticket_id();
        tracing::warn!(
            ticket_id = %id,
            task_id = %ticket.task_id,
            version = ticket.version_number,
            label = %ticket.label,
            before_gap = ticket.before.stability_gap,
            after_gap = ticket.after.stability_gap,
            change_summary = %ticket.change_summary,
            rollback = %ticket.rollback_reference,
            "Filed human-review ticket"
        );
        Ok(id)
    }
}

/// In-memory sink for tests; collects filed tickets
#[derive(Default)]
pub struct MemoryTicketSink {
    tickets: std::sync::Mutex<Vec<ReviewTicket>>,
}

impl MemoryTicketSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tickets(&self) -> Vec<ReviewTicket> {
        self.tickets.lock().unwrap().clone()
    }
}

impl TicketSink for MemoryTicketSink {
    fn create_ticket(&self, ticket: ReviewTicket) -> Result<String> {
        let mut tickets = self.tickets.lock().unwrap();
        tickets.push(ticket);
        Ok(crate::id::generate_ticket_id())
    }
}
