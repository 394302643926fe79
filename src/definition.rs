//! Workflow definition files.
//!
//! A definition is the TOML export of the workflow editor: roles, statuses,
//! transitions and the tickets to seed. Importing one performs the
//! derivations the editor does when it saves a row, and nothing else
//! recomputes them later:
//!
//! - an edge without an explicit `kind` is classified from its button label;
//! - a status without an explicit `color` caches its stage role's color.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::error::WorkflowError;
use crate::workflow::{
    Edge, EdgeId, EdgeKind, FlowType, LockState, Role, RoleId, Status, StatusId, Ticket, TicketId,
    TransitionGraph,
};

/// Fill used for statuses that have neither an override nor a stage role.
pub const DEFAULT_STATUS_COLOR: &str = "#e0e0e0";

#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowDefinition {
    #[serde(default)]
    pub roles: Vec<RoleDef>,
    #[serde(default)]
    pub statuses: Vec<StatusDef>,
    #[serde(default)]
    pub transitions: Vec<TransitionDef>,
    #[serde(default)]
    pub tickets: Vec<TicketDef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RoleDef {
    pub id: i64,
    pub name: String,
    #[serde(default = "default_color")]
    pub color: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusDef {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub explanation: String,
    pub stage_role: Option<i64>,
    #[serde(default)]
    pub terminal: bool,
    /// Explicit override; when absent the stage role's color is cached.
    pub color: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransitionDef {
    pub id: i64,
    pub flow: String,
    pub from: i64,
    pub to: i64,
    pub role: i64,
    pub owner: Option<i64>,
    pub label: String,
    pub kind: Option<EdgeKind>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TicketDef {
    pub id: i64,
    pub flow: String,
    pub status: i64,
    pub owner: Option<i64>,
}

fn default_color() -> String {
    DEFAULT_STATUS_COLOR.to_string()
}

/// Classifies a button label by keyword scoring.
///
/// Affirmative wording makes a `success` edge, returning or failing wording
/// a `fallback` edge. Ties between the two go to `fallback`.
pub fn classify_label(label: &str) -> EdgeKind {
    let lower = label.to_lowercase();

    let keyword_kinds: &[(&str, EdgeKind, u32)] = &[
        ("confirm", EdgeKind::Success, 10),
        ("created", EdgeKind::Success, 10),
        ("approve", EdgeKind::Success, 10),
        ("accept", EdgeKind::Success, 5),
        ("done", EdgeKind::Success, 5),
        ("ok", EdgeKind::Success, 3),
        ("failed", EdgeKind::Fallback, 10),
        ("reject", EdgeKind::Fallback, 10),
        ("return", EdgeKind::Fallback, 10),
        ("loop", EdgeKind::Fallback, 7),
        ("back", EdgeKind::Fallback, 5),
    ];

    let words: Vec<&str> = lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();

    let mut success = 0;
    let mut fallback = 0;
    for &(keyword, kind, weight) in keyword_kinds {
        // "ok" only counts as a whole word, so "look" or "book" stay neutral.
        let hit = if keyword.len() <= 2 {
            words.contains(&keyword)
        } else {
            words.iter().any(|w| w.starts_with(keyword))
        };
        if hit {
            match kind {
                EdgeKind::Success => success += weight,
                EdgeKind::Fallback => fallback += weight,
                EdgeKind::Normal => {}
            }
        }
    }

    match (success, fallback) {
        (0, 0) => EdgeKind::Normal,
        (s, f) if f >= s => EdgeKind::Fallback,
        _ => EdgeKind::Success,
    }
}

impl WorkflowDefinition {
    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading workflow definition {}", path.display()))?;
        Self::from_toml(&text)
            .with_context(|| format!("parsing workflow definition {}", path.display()))
    }

    /// Resolves the editor-side derivations and checks references.
    pub fn build(&self) -> Result<(TransitionGraph, Vec<Ticket>), WorkflowError> {
        let roles: Vec<Role> = self
            .roles
            .iter()
            .map(|r| Role {
                id: RoleId(r.id),
                name: r.name.clone(),
                display_color: r.color.clone(),
            })
            .collect();
        let role_colors: HashMap<RoleId, &str> = roles
            .iter()
            .map(|r| (r.id, r.display_color.as_str()))
            .collect();

        let statuses = self.statuses.iter().map(|s| {
            let stage_role_id = s.stage_role.map(RoleId);
            let (color_override, display_color) = match &s.color {
                Some(color) => (true, color.clone()),
                None => (
                    false,
                    stage_role_id
                        .and_then(|role| role_colors.get(&role).copied())
                        .unwrap_or(DEFAULT_STATUS_COLOR)
                        .to_string(),
                ),
            };
            Status {
                id: StatusId(s.id),
                name: s.name.clone(),
                explanation: s.explanation.clone(),
                stage_role_id,
                is_terminal: s.terminal,
                color_override,
                display_color,
            }
        });

        let edges = self.transitions.iter().map(|t| Edge {
            id: EdgeId(t.id),
            flow_type: FlowType::new(t.flow.clone()),
            from_status_id: StatusId(t.from),
            to_status_id: StatusId(t.to),
            allowed_role_id: RoleId(t.role),
            target_owner_role_id: t.owner.map(RoleId),
            button_label: t.label.clone(),
            edge_kind: t.kind.unwrap_or_else(|| classify_label(&t.label)),
        });

        let graph = TransitionGraph::new(roles.clone(), statuses, edges)?;

        let mut tickets = Vec::with_capacity(self.tickets.len());
        let mut seen = HashSet::new();
        for t in &self.tickets {
            if t.id <= 0 {
                return Err(WorkflowError::Validation(format!(
                    "ticket id {} must be positive",
                    t.id
                )));
            }
            if !seen.insert(t.id) {
                return Err(WorkflowError::Validation(format!(
                    "duplicate ticket id {}",
                    t.id
                )));
            }
            let flow = FlowType::new(t.flow.clone());
            if graph.flow_edges(&flow).next().is_none() {
                return Err(WorkflowError::Validation(format!(
                    "ticket #{} follows flow `{flow}`, which has no transitions",
                    t.id
                )));
            }
            if graph.status(StatusId(t.status)).is_none() {
                return Err(WorkflowError::Validation(format!(
                    "ticket #{} references unknown status {}",
                    t.id, t.status
                )));
            }
            if let Some(owner) = t.owner
                && graph.role(RoleId(owner)).is_none()
            {
                return Err(WorkflowError::Validation(format!(
                    "ticket #{} references unknown role {owner}",
                    t.id
                )));
            }
            tickets.push(Ticket {
                id: TicketId(t.id),
                flow_type: flow,
                status_id: StatusId(t.status),
                current_role_id: t.owner.map(RoleId),
                lock: LockState::None,
            });
        }

        Ok((graph, tickets))
    }
}
