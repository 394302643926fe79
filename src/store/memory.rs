use std::collections::BTreeMap;

use crate::error::StoreError;
use crate::workflow::{HistoryRecord, Ticket, TicketId, TransitionGraph};

use super::{LockChange, StatusChange, WorkflowStore};

/// Map-backed store for tests and embedding.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    graph: TransitionGraph,
    tickets: BTreeMap<TicketId, Ticket>,
    history: Vec<HistoryRecord>,
}

impl MemoryStore {
    pub fn new(graph: TransitionGraph, tickets: impl IntoIterator<Item = Ticket>) -> Self {
        Self {
            graph,
            tickets: tickets.into_iter().map(|t| (t.id, t)).collect(),
            history: Vec::new(),
        }
    }

    /// Direct access for tests that simulate a concurrent writer.
    #[cfg(test)]
    pub(crate) fn ticket_mut(&mut self, id: TicketId) -> Option<&mut Ticket> {
        self.tickets.get_mut(&id)
    }
}

impl WorkflowStore for MemoryStore {
    fn load_graph(&self) -> Result<TransitionGraph, StoreError> {
        Ok(self.graph.clone())
    }

    fn ticket(&self, id: TicketId) -> Result<Option<Ticket>, StoreError> {
        Ok(self.tickets.get(&id).cloned())
    }

    fn commit_status(
        &mut self,
        change: &StatusChange,
        record: &HistoryRecord,
    ) -> Result<bool, StoreError> {
        let Some(ticket) = self.tickets.get_mut(&change.ticket_id) else {
            return Ok(false);
        };
        if ticket.lock.is_locked() || ticket.status_id != change.from {
            return Ok(false);
        }
        ticket.status_id = change.to;
        ticket.current_role_id = change.new_owner;
        self.history.push(record.clone());
        Ok(true)
    }

    fn commit_lock(
        &mut self,
        change: &LockChange,
        record: &HistoryRecord,
    ) -> Result<bool, StoreError> {
        let Some(ticket) = self.tickets.get_mut(&change.ticket_id) else {
            return Ok(false);
        };
        if ticket.lock != change.from {
            return Ok(false);
        }
        ticket.lock = change.to;
        self.history.push(record.clone());
        Ok(true)
    }

    fn history(&self, id: TicketId) -> Result<Vec<HistoryRecord>, StoreError> {
        Ok(self
            .history
            .iter()
            .filter(|record| record.ticket_id == id)
            .cloned()
            .collect())
    }

    fn install(&mut self, graph: &TransitionGraph, tickets: &[Ticket]) -> Result<(), StoreError> {
        self.graph = graph.clone();
        for ticket in tickets {
            self.tickets
                .entry(ticket.id)
                .or_insert_with(|| ticket.clone());
        }
        Ok(())
    }
}
