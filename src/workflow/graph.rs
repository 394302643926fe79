use std::collections::{BTreeMap, BTreeSet};

use crate::error::WorkflowError;

use super::model::{Edge, EdgeId, FlowType, Role, RoleId, Status, StatusId};

/// Status registry, roles and transition edges as loaded for one request.
///
/// Construction checks the referential invariants once, so every lookup on
/// an edge endpoint afterwards is known to succeed.
#[derive(Debug, Clone, Default)]
pub struct TransitionGraph {
    roles: BTreeMap<RoleId, Role>,
    statuses: BTreeMap<StatusId, Status>,
    edges: BTreeMap<EdgeId, Edge>,
}

impl TransitionGraph {
    pub fn new(
        roles: impl IntoIterator<Item = Role>,
        statuses: impl IntoIterator<Item = Status>,
        edges: impl IntoIterator<Item = Edge>,
    ) -> Result<Self, WorkflowError> {
        let mut graph = Self::default();

        for role in roles {
            if graph.roles.insert(role.id, role).is_some() {
                return Err(WorkflowError::Validation("duplicate role id".into()));
            }
        }

        for status in statuses {
            if status.id.0 <= 0 {
                return Err(WorkflowError::Validation(format!(
                    "status id {} must be positive",
                    status.id
                )));
            }
            if let Some(stage) = status.stage_role_id
                && !graph.roles.contains_key(&stage)
            {
                return Err(WorkflowError::Validation(format!(
                    "status {} references unknown stage role {stage}",
                    status.id
                )));
            }
            let id = status.id;
            if graph.statuses.insert(id, status).is_some() {
                return Err(WorkflowError::Validation(format!(
                    "duplicate status id {id}"
                )));
            }
        }

        for edge in edges {
            graph.check_edge(&edge)?;
            let id = edge.id;
            if graph.edges.insert(id, edge).is_some() {
                return Err(WorkflowError::Validation(format!(
                    "duplicate transition id {id}"
                )));
            }
        }

        Ok(graph)
    }

    fn check_edge(&self, edge: &Edge) -> Result<(), WorkflowError> {
        for endpoint in [edge.from_status_id, edge.to_status_id] {
            if !self.statuses.contains_key(&endpoint) {
                return Err(WorkflowError::Validation(format!(
                    "transition {} references unknown status {endpoint}",
                    edge.id
                )));
            }
        }
        let roles = std::iter::once(edge.allowed_role_id).chain(edge.target_owner_role_id);
        for role in roles {
            if !self.roles.contains_key(&role) {
                return Err(WorkflowError::Validation(format!(
                    "transition {} references unknown role {role}",
                    edge.id
                )));
            }
        }
        if edge.flow_type.as_str().trim().is_empty() {
            return Err(WorkflowError::Validation(format!(
                "transition {} has an empty flow type",
                edge.id
            )));
        }
        Ok(())
    }

    pub fn role(&self, id: RoleId) -> Option<&Role> {
        self.roles.get(&id)
    }

    pub fn status(&self, id: StatusId) -> Option<&Status> {
        self.statuses.get(&id)
    }

    pub fn edge(&self, id: EdgeId) -> Option<&Edge> {
        self.edges.get(&id)
    }

    pub fn roles(&self) -> impl Iterator<Item = &Role> {
        self.roles.values()
    }

    pub fn statuses(&self) -> impl Iterator<Item = &Status> {
        self.statuses.values()
    }

    /// All edges in id order.
    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.values()
    }

    /// Edges of one flow type, in id order.
    ///
    /// The iterator borrows only the graph, so `flow` may come from a
    /// shorter-lived ticket.
    pub fn flow_edges<'a>(&'a self, flow: &FlowType) -> impl Iterator<Item = &'a Edge> + use<'a> {
        let flow = flow.clone();
        self.edges.values().filter(move |edge| edge.flow_type == flow)
    }

    /// Edges leaving `from` within `flow`, in id order.
    pub fn outgoing<'a>(
        &'a self,
        flow: &FlowType,
        from: StatusId,
    ) -> impl Iterator<Item = &'a Edge> + use<'a> {
        self.flow_edges(flow)
            .filter(move |edge| edge.from_status_id == from)
    }

    pub fn flow_types(&self) -> BTreeSet<&FlowType> {
        self.edges.values().map(|edge| &edge.flow_type).collect()
    }

    /// Statuses that are an endpoint of some edge of `flow`.
    pub fn flow_statuses(&self, flow: &FlowType) -> BTreeSet<StatusId> {
        self.flow_edges(flow)
            .flat_map(|edge| [edge.from_status_id, edge.to_status_id])
            .collect()
    }

    /// Highest status id that appears on any edge, across all flow types.
    pub fn max_used_status_id(&self) -> Option<StatusId> {
        self.edges
            .values()
            .flat_map(|edge| [edge.from_status_id, edge.to_status_id])
            .max()
    }
}
