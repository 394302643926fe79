pub mod executor;
pub mod flowchart;
pub mod graph;
pub mod lock;
mod model;
pub mod resolver;

pub use executor::TransitionOutcome;
pub use flowchart::{Flowchart, NodeIds, RenderOptions, parse_node_id};
pub use graph::TransitionGraph;
pub use lock::LockPolicy;
pub use model::{
    ChangeType, Edge, EdgeId, EdgeKind, FlowType, HistoryRecord, LockKind, LockState, Role, RoleId,
    Status, StatusId, Ticket, TicketId,
};
pub use resolver::Availability;
