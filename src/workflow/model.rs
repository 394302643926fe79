use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }
    };
}

id_type!(
    /// Identifies a node of the status registry.
    StatusId
);
id_type!(
    /// Identifies a role. Roles gate transitions and name the current owner of a ticket.
    RoleId
);
id_type!(
    /// Identifies a single transition edge.
    EdgeId
);
id_type!(
    /// Identifies a ticket.
    TicketId
);

/// Named partition of the transition graph, e.g. `external` or `internal`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlowType(String);

impl FlowType {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FlowType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FlowType {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,
    pub name: String,
    pub display_color: String,
}

/// A node of the status registry.
///
/// `display_color` is a cached value: either the explicit override, or the
/// stage role's color as it was when the status was last saved. It is not
/// re-resolved on read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub id: StatusId,
    pub name: String,
    pub explanation: String,
    pub stage_role_id: Option<RoleId>,
    pub is_terminal: bool,
    pub color_override: bool,
    pub display_color: String,
}

/// Rendering emphasis of an edge. Assigned by the workflow editor, consumed as data here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    #[default]
    Normal,
    Success,
    Fallback,
}

impl EdgeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeKind::Normal => "normal",
            EdgeKind::Success => "success",
            EdgeKind::Fallback => "fallback",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "normal" => Some(EdgeKind::Normal),
            "success" => Some(EdgeKind::Success),
            "fallback" => Some(EdgeKind::Fallback),
            _ => None,
        }
    }
}

impl fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A role-gated transition between two statuses within one flow type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub id: EdgeId,
    pub flow_type: FlowType,
    pub from_status_id: StatusId,
    pub to_status_id: StatusId,
    pub allowed_role_id: RoleId,
    /// Owner after the transition fires. `None` means no specific next owner.
    pub target_owner_role_id: Option<RoleId>,
    pub button_label: String,
    pub edge_kind: EdgeKind,
}

/// The lock variants a caller may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockKind {
    Obsolete,
    OnHold,
    Redirect,
}

impl LockKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LockKind::Obsolete => "obsolete",
            LockKind::OnHold => "on_hold",
            LockKind::Redirect => "redirect",
        }
    }
}

impl fmt::Display for LockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Suspension overlay of a ticket. Scalar, so at most one lock is ever active,
/// and a redirect always carries its successor ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LockState {
    #[default]
    None,
    Obsolete,
    OnHold,
    Redirect { target: TicketId },
}

impl LockState {
    pub fn kind(&self) -> Option<LockKind> {
        match self {
            LockState::None => None,
            LockState::Obsolete => Some(LockKind::Obsolete),
            LockState::OnHold => Some(LockKind::OnHold),
            LockState::Redirect { .. } => Some(LockKind::Redirect),
        }
    }

    pub fn is_locked(&self) -> bool {
        !matches!(self, LockState::None)
    }

    pub fn redirect_target(&self) -> Option<TicketId> {
        match self {
            LockState::Redirect { target } => Some(*target),
            _ => None,
        }
    }

    /// Value of the `lock_type` column.
    pub fn column_value(&self) -> &'static str {
        self.kind().map_or("none", |kind| kind.as_str())
    }

    /// Rebuilds the overlay from its two stored columns.
    pub fn from_columns(lock_type: &str, redirect: Option<i64>) -> Result<Self, String> {
        match (lock_type, redirect) {
            ("none", _) => Ok(LockState::None),
            ("obsolete", _) => Ok(LockState::Obsolete),
            ("on_hold", _) => Ok(LockState::OnHold),
            ("redirect", Some(target)) => Ok(LockState::Redirect {
                target: TicketId(target),
            }),
            ("redirect", None) => Err("redirect lock without a target ticket".to_string()),
            (other, _) => Err(format!("unknown lock type `{other}`")),
        }
    }
}

impl fmt::Display for LockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockState::Redirect { target } => write!(f, "redirect:#{target}"),
            other => f.write_str(other.column_value()),
        }
    }
}

/// The workflow-relevant fields of a ticket. Everything else about a ticket
/// belongs to other parts of the application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: TicketId,
    pub flow_type: FlowType,
    pub status_id: StatusId,
    pub current_role_id: Option<RoleId>,
    #[serde(default)]
    pub lock: LockState,
}

impl Ticket {
    pub fn new(id: TicketId, flow_type: FlowType, status_id: StatusId) -> Self {
        Self {
            id,
            flow_type,
            status_id,
            current_role_id: None,
            lock: LockState::None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Status,
    Lock,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::Status => "status",
            ChangeType::Lock => "lock",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "status" => Some(ChangeType::Status),
            "lock" => Some(ChangeType::Lock),
            _ => None,
        }
    }
}

/// Append-only history entry written alongside every ticket mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub ticket_id: TicketId,
    pub change_type: ChangeType,
    pub old_value: String,
    pub new_value: String,
    pub actor: RoleId,
    pub recorded_at: DateTime<Utc>,
}

impl HistoryRecord {
    pub fn status(ticket_id: TicketId, old: StatusId, new: StatusId, actor: RoleId) -> Self {
        Self {
            ticket_id,
            change_type: ChangeType::Status,
            old_value: old.to_string(),
            new_value: new.to_string(),
            actor,
            recorded_at: Utc::now(),
        }
    }

    pub fn lock(ticket_id: TicketId, old: &LockState, new: &LockState, actor: RoleId) -> Self {
        Self {
            ticket_id,
            change_type: ChangeType::Lock,
            old_value: old.to_string(),
            new_value: new.to_string(),
            actor,
            recorded_at: Utc::now(),
        }
    }
}
