//! Saída de terminal do ticketflow com estilos coloridos.
//!
//! Usa a crate `console` para estilização. O [`Printer`] formata
//! transições, travas, tickets e erros para o usuário.

use console::Style;
use ticketflow::workflow::{
    Availability, EdgeKind, LockState, StatusId, Ticket, TransitionGraph, TransitionOutcome,
};
use ticketflow::{ErrorKind, WorkflowError};

pub struct Printer {
    // Estilo verde para sucesso.
    green: Style,
    // Estilo vermelho para falhas e retornos.
    red: Style,
    // Estilo amarelo para travas e bloqueios.
    yellow: Style,
    dim: Style,
}

impl Default for Printer {
    fn default() -> Self {
        Self::new()
    }
}

impl Printer {
    pub fn new() -> Self {
        Self {
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
            dim: Style::new().dim(),
        }
    }

    fn edge_style(&self, kind: EdgeKind) -> &Style {
        match kind {
            EdgeKind::Success => &self.green,
            EdgeKind::Fallback => &self.red,
            EdgeKind::Normal => &self.dim,
        }
    }

    /// Imprime o que o papel pode fazer com o ticket, ou por que não pode.
    pub fn availability(&self, ticket: &Ticket, graph: &TransitionGraph, available: &Availability) {
        let status = graph
            .status(ticket.status_id)
            .map_or_else(|| ticket.status_id.to_string(), |s| s.name.clone());
        println!("Ticket #{} [{}] {status}", ticket.id, ticket.flow_type);

        match available {
            Availability::Open { transitions } => {
                for edge in transitions {
                    let target = graph
                        .status(edge.to_status_id)
                        .map_or_else(|| edge.to_status_id.to_string(), |s| s.name.clone());
                    println!(
                        "  {} {}  {}",
                        self.edge_style(edge.edge_kind)
                            .apply_to(format!("[{}]", edge.id)),
                        edge.button_label,
                        self.dim.apply_to(format!("→ {target}")),
                    );
                }
            }
            Availability::Locked { lock } => {
                println!("  {} {}", self.yellow.apply_to("⏸"), describe_lock(lock));
            }
            Availability::Terminal { .. } => {
                println!("  {} final status reached", self.green.apply_to("✓"));
            }
            Availability::Blocked { waiting_on } => {
                let role = waiting_on
                    .as_ref()
                    .map_or("no role", |r| r.name.as_str());
                println!("  {} waiting on {role}", self.yellow.apply_to("…"));
            }
        }
    }

    pub fn outcome(&self, outcome: &TransitionOutcome, graph: &TransitionGraph) {
        let name = |id: StatusId| {
            graph
                .status(id)
                .map_or_else(|| id.to_string(), |s| s.name.clone())
        };
        let owner = outcome
            .new_owner
            .and_then(|r| graph.role(r))
            .map_or("nobody", |r| r.name.as_str());
        println!(
            "  {} #{}: {} → {} (next: {owner})",
            self.green.apply_to("✓"),
            outcome.ticket_id,
            name(outcome.old_status),
            name(outcome.new_status),
        );
    }

    pub fn lock_set(&self, ticket: i64, lock: &LockState) {
        println!("  {} #{ticket}: {}", self.yellow.apply_to("⏸"), describe_lock(lock));
    }

    pub fn lock_revoked(&self, ticket: i64, reverted: &LockState) {
        println!(
            "  {} #{ticket}: lock removed (was {})",
            self.green.apply_to("✓"),
            describe_lock(reverted)
        );
    }

    pub fn ticket(&self, ticket: &Ticket) {
        println!(
            "{}",
            serde_json::to_string_pretty(ticket).unwrap_or_default()
        );
    }

    /// Imprime o erro com a categoria, para o usuário decidir se tenta de novo.
    pub fn error(&self, err: &WorkflowError) {
        let style = match err.kind() {
            ErrorKind::Persistence => &self.red,
            _ => &self.yellow,
        };
        eprintln!("  {} [{}] {err}", style.apply_to("✗"), err.kind());
    }
}

fn describe_lock(lock: &LockState) -> String {
    match lock {
        LockState::None => "not locked".to_string(),
        LockState::Obsolete => "obsolete".to_string(),
        LockState::OnHold => "on hold".to_string(),
        LockState::Redirect { target } => format!("superseded by #{target}"),
    }
}
