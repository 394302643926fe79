//! Persistence seam of the workflow engine.
//!
//! The engine reads the status registry, roles and edges as one
//! [`TransitionGraph`] per request and writes exactly one ticket row plus one
//! history record per mutation. Writes are guarded on the state the caller
//! validated against; a guard miss is reported as `Ok(false)` and nothing is
//! written.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::error::StoreError;
use crate::workflow::{HistoryRecord, LockState, RoleId, StatusId, Ticket, TicketId, TransitionGraph};

/// A status move validated by the transition executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub ticket_id: TicketId,
    /// Status the ticket must still be in for the write to happen.
    pub from: StatusId,
    pub to: StatusId,
    pub new_owner: Option<RoleId>,
}

/// A lock overlay change validated by the lock executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockChange {
    pub ticket_id: TicketId,
    /// Overlay the ticket must still carry for the write to happen.
    pub from: LockState,
    pub to: LockState,
}

pub trait WorkflowStore {
    fn load_graph(&self) -> Result<TransitionGraph, StoreError>;

    fn ticket(&self, id: TicketId) -> Result<Option<Ticket>, StoreError>;

    fn ticket_exists(&self, id: TicketId) -> Result<bool, StoreError> {
        Ok(self.ticket(id)?.is_some())
    }

    /// Moves the ticket to `change.to` and appends `record`, only if it is
    /// still unlocked and at `change.from`.
    fn commit_status(
        &mut self,
        change: &StatusChange,
        record: &HistoryRecord,
    ) -> Result<bool, StoreError>;

    /// Replaces the lock overlay and appends `record`, only if the overlay
    /// still equals `change.from`.
    fn commit_lock(&mut self, change: &LockChange, record: &HistoryRecord)
    -> Result<bool, StoreError>;

    /// History of one ticket in append order.
    fn history(&self, id: TicketId) -> Result<Vec<HistoryRecord>, StoreError>;

    /// Writes registry rows and tickets produced by the workflow editor.
    ///
    /// The transition set is replaced by the graph's. Tickets that already
    /// exist are left untouched; only new ids are seeded.
    fn install(&mut self, graph: &TransitionGraph, tickets: &[Ticket]) -> Result<(), StoreError>;
}
