use serde::Serialize;

use super::graph::TransitionGraph;
use super::model::{Edge, LockState, Role, RoleId, StatusId, Ticket};

/// Edges `actor` may fire on `ticket` right now.
///
/// An active lock suppresses every edge regardless of role. Otherwise the
/// result is the edges of the ticket's flow type leaving its current status
/// whose allowed role is `actor`, in edge id order. The order carries no meaning.
pub fn resolve<'g>(graph: &'g TransitionGraph, ticket: &Ticket, actor: RoleId) -> Vec<&'g Edge> {
    if ticket.lock.is_locked() {
        return Vec::new();
    }
    graph
        .outgoing(&ticket.flow_type, ticket.status_id)
        .filter(|edge| edge.allowed_role_id == actor)
        .collect()
}

/// What an actor sees when looking at a ticket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Availability {
    /// The actor has at least one transition available.
    Open { transitions: Vec<Edge> },
    /// A lock suppresses all transitions.
    Locked { lock: LockState },
    /// The ticket sits in a terminal status with nothing left to fire.
    Terminal { status: StatusId },
    /// Nothing for this actor; the ticket is waiting on the stage role of its status.
    Blocked { waiting_on: Option<Role> },
}

impl Availability {
    pub fn transitions(&self) -> &[Edge] {
        match self {
            Availability::Open { transitions } => transitions,
            _ => &[],
        }
    }
}

pub fn availability(graph: &TransitionGraph, ticket: &Ticket, actor: RoleId) -> Availability {
    if ticket.lock.is_locked() {
        return Availability::Locked { lock: ticket.lock };
    }

    let transitions: Vec<Edge> = resolve(graph, ticket, actor).into_iter().cloned().collect();
    if !transitions.is_empty() {
        return Availability::Open { transitions };
    }

    let status = graph.status(ticket.status_id);
    if status.is_some_and(|s| s.is_terminal)
        && graph.outgoing(&ticket.flow_type, ticket.status_id).next().is_none()
    {
        return Availability::Terminal {
            status: ticket.status_id,
        };
    }

    Availability::Blocked {
        waiting_on: waiting_on(graph, ticket).cloned(),
    }
}

/// Stage role of the ticket's current status, i.e. who the ticket is waiting on.
pub fn waiting_on<'g>(graph: &'g TransitionGraph, ticket: &Ticket) -> Option<&'g Role> {
    graph
        .status(ticket.status_id)
        .and_then(|status| status.stage_role_id)
        .and_then(|role| graph.role(role))
}
