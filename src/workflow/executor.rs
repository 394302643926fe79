use serde::Serialize;
use tracing::{info, warn};

use crate::error::WorkflowError;
use crate::store::{StatusChange, WorkflowStore};

use super::graph::TransitionGraph;
use super::model::{Edge, EdgeId, HistoryRecord, RoleId, StatusId, Ticket, TicketId};

/// Result of a successfully applied transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransitionOutcome {
    pub ticket_id: TicketId,
    pub edge_id: EdgeId,
    pub old_status: StatusId,
    pub new_status: StatusId,
    pub new_owner: Option<RoleId>,
}

/// Checks whether `actor` may fire `edge` on `ticket` as it is now.
///
/// Checked in order: the ticket is unlocked, the edge belongs to the ticket's
/// flow type and still leaves its current status, and the actor holds the
/// edge's allowed role.
pub fn check_transition(
    ticket: &Ticket,
    edge: &Edge,
    actor: RoleId,
) -> Result<StatusChange, WorkflowError> {
    if ticket.lock.is_locked() {
        return Err(WorkflowError::Locked {
            ticket: ticket.id,
            lock: ticket.lock,
        });
    }
    if edge.flow_type != ticket.flow_type {
        return Err(WorkflowError::Validation(format!(
            "transition {} belongs to flow `{}`, ticket #{} follows `{}`",
            edge.id, edge.flow_type, ticket.id, ticket.flow_type
        )));
    }
    if edge.from_status_id != ticket.status_id {
        return Err(WorkflowError::conflict(
            ticket.id,
            format!(
                "transition {} starts at status {} but the ticket is at {}",
                edge.id, edge.from_status_id, ticket.status_id
            ),
        ));
    }
    if edge.allowed_role_id != actor {
        return Err(WorkflowError::unauthorized(
            actor,
            format!("transition {} requires role {}", edge.id, edge.allowed_role_id),
        ));
    }
    Ok(StatusChange {
        ticket_id: ticket.id,
        from: edge.from_status_id,
        to: edge.to_status_id,
        new_owner: edge.target_owner_role_id,
    })
}

/// Applies `edge_id` to the ticket on behalf of `actor`.
///
/// The ticket is re-read from the store right before the write, and the
/// write itself only lands if the ticket is still unlocked and at the edge's
/// source status. Either the ticket row and one history record are written,
/// or nothing is.
pub fn apply<S: WorkflowStore>(
    store: &mut S,
    graph: &TransitionGraph,
    ticket_id: TicketId,
    edge_id: EdgeId,
    actor: RoleId,
) -> Result<TransitionOutcome, WorkflowError> {
    let edge = graph
        .edge(edge_id)
        .ok_or_else(|| WorkflowError::Validation(format!("unknown transition {edge_id}")))?;
    let ticket = store
        .ticket(ticket_id)?
        .ok_or_else(|| WorkflowError::Validation(format!("unknown ticket #{ticket_id}")))?;

    let change = check_transition(&ticket, edge, actor).inspect_err(|err| {
        warn!(%ticket_id, %edge_id, %actor, error = %err, "transition rejected");
    })?;

    let record = HistoryRecord::status(ticket_id, change.from, change.to, actor);
    if !store.commit_status(&change, &record)? {
        // Someone else moved or locked the ticket between the read and the write.
        let err = match store.ticket(ticket_id)? {
            Some(current) if current.lock.is_locked() => WorkflowError::Locked {
                ticket: ticket_id,
                lock: current.lock,
            },
            Some(current) => WorkflowError::conflict(
                ticket_id,
                format!(
                    "status moved to {} before transition {edge_id} was written",
                    current.status_id
                ),
            ),
            None => WorkflowError::conflict(ticket_id, "ticket disappeared"),
        };
        warn!(%ticket_id, %edge_id, error = %err, "transition lost a race");
        return Err(err);
    }

    info!(
        %ticket_id,
        %edge_id,
        from = %change.from,
        to = %change.to,
        owner = ?change.new_owner,
        "transition applied"
    );

    Ok(TransitionOutcome {
        ticket_id,
        edge_id,
        old_status: change.from,
        new_status: change.to,
        new_owner: change.new_owner,
    })
}
