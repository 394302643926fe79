use tracing::{info, warn};

use crate::error::WorkflowError;
use crate::store::{LockChange, WorkflowStore};

use super::graph::TransitionGraph;
use super::model::{HistoryRecord, LockKind, LockState, RoleId, Ticket, TicketId};

/// Who may set or revoke a lock.
///
/// The owning role of the ticket's current status always holds lock authority.
/// When `gate_role` is set, the actor must additionally be that role.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LockPolicy {
    pub gate_role: Option<RoleId>,
}

impl LockPolicy {
    pub fn gated(role: RoleId) -> Self {
        Self {
            gate_role: Some(role),
        }
    }

    /// The owning role is the stage role of the current status; a status
    /// without one falls back to the ticket's current owner.
    pub fn authorize(
        &self,
        graph: &TransitionGraph,
        ticket: &Ticket,
        actor: RoleId,
    ) -> Result<(), WorkflowError> {
        let owner = graph
            .status(ticket.status_id)
            .and_then(|status| status.stage_role_id)
            .or(ticket.current_role_id);

        match owner {
            None => {
                return Err(WorkflowError::unauthorized(
                    actor,
                    format!(
                        "status {} of ticket #{} has no owning role",
                        ticket.status_id, ticket.id
                    ),
                ));
            }
            Some(owner) if owner != actor => {
                return Err(WorkflowError::unauthorized(
                    actor,
                    format!("locks on ticket #{} are managed by role {owner}", ticket.id),
                ));
            }
            Some(_) => {}
        }

        if let Some(gate) = self.gate_role
            && gate != actor
        {
            return Err(WorkflowError::unauthorized(
                actor,
                format!("only role {gate} may manage locks"),
            ));
        }
        Ok(())
    }
}

/// Validates the requested overlay. A redirect needs a positive target other
/// than the ticket itself that references an existing ticket; other lock
/// kinds take no target.
pub fn requested_lock<S: WorkflowStore>(
    store: &S,
    ticket_id: TicketId,
    kind: LockKind,
    redirect_target: Option<i64>,
) -> Result<LockState, WorkflowError> {
    match (kind, redirect_target) {
        (LockKind::Obsolete, None) => Ok(LockState::Obsolete),
        (LockKind::OnHold, None) => Ok(LockState::OnHold),
        (LockKind::Obsolete | LockKind::OnHold, Some(_)) => Err(WorkflowError::Validation(
            format!("a redirect target is only accepted with a redirect lock, not {kind}"),
        )),
        (LockKind::Redirect, None) => Err(WorkflowError::Validation(
            "a redirect lock needs a successor ticket".into(),
        )),
        (LockKind::Redirect, Some(target)) => {
            if target <= 0 {
                return Err(WorkflowError::Validation(format!(
                    "redirect target {target} is not a valid ticket id"
                )));
            }
            let target = TicketId(target);
            if target == ticket_id {
                return Err(WorkflowError::Validation(format!(
                    "ticket #{ticket_id} cannot redirect to itself"
                )));
            }
            if !store.ticket_exists(target)? {
                return Err(WorkflowError::Validation(format!(
                    "redirect target #{target} does not exist"
                )));
            }
            Ok(LockState::Redirect { target })
        }
    }
}

fn load_ticket<S: WorkflowStore>(store: &S, ticket_id: TicketId) -> Result<Ticket, WorkflowError> {
    store
        .ticket(ticket_id)?
        .ok_or_else(|| WorkflowError::Validation(format!("unknown ticket #{ticket_id}")))
}

fn commit<S: WorkflowStore>(
    store: &mut S,
    change: LockChange,
    actor: RoleId,
) -> Result<(), WorkflowError> {
    let record = HistoryRecord::lock(change.ticket_id, &change.from, &change.to, actor);
    if store.commit_lock(&change, &record)? {
        return Ok(());
    }
    let err = WorkflowError::conflict(
        change.ticket_id,
        format!("lock was no longer `{}` when writing", change.from),
    );
    warn!(ticket_id = %change.ticket_id, error = %err, "lock change lost a race");
    Err(err)
}

/// Puts a lock on an unlocked ticket and returns the new overlay.
pub fn set_lock<S: WorkflowStore>(
    store: &mut S,
    graph: &TransitionGraph,
    policy: &LockPolicy,
    ticket_id: TicketId,
    kind: LockKind,
    actor: RoleId,
    redirect_target: Option<i64>,
) -> Result<LockState, WorkflowError> {
    let ticket = load_ticket(store, ticket_id)?;

    let lock = policy
        .authorize(graph, &ticket, actor)
        .and_then(|()| {
            if ticket.lock.is_locked() {
                return Err(WorkflowError::Locked {
                    ticket: ticket_id,
                    lock: ticket.lock,
                });
            }
            requested_lock(store, ticket_id, kind, redirect_target)
        })
        .inspect_err(|err| {
            warn!(%ticket_id, %actor, %kind, error = %err, "lock rejected");
        })?;

    commit(
        store,
        LockChange {
            ticket_id,
            from: LockState::None,
            to: lock,
        },
        actor,
    )?;
    info!(%ticket_id, %actor, lock = %lock, "lock set");
    Ok(lock)
}

/// Clears the lock of a locked ticket and returns the overlay that was removed.
pub fn revoke_lock<S: WorkflowStore>(
    store: &mut S,
    graph: &TransitionGraph,
    policy: &LockPolicy,
    ticket_id: TicketId,
    actor: RoleId,
) -> Result<LockState, WorkflowError> {
    let ticket = load_ticket(store, ticket_id)?;

    policy
        .authorize(graph, &ticket, actor)
        .and_then(|()| {
            if ticket.lock.is_locked() {
                Ok(())
            } else {
                Err(WorkflowError::Validation(format!(
                    "ticket #{ticket_id} is not locked"
                )))
            }
        })
        .inspect_err(|err| {
            warn!(%ticket_id, %actor, error = %err, "lock revocation rejected");
        })?;

    commit(
        store,
        LockChange {
            ticket_id,
            from: ticket.lock,
            to: LockState::None,
        },
        actor,
    )?;
    info!(%ticket_id, %actor, reverted = %ticket.lock, "lock revoked");
    Ok(ticket.lock)
}
