//! Interface de linha de comando do ticketflow baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (init, transitions,
//! apply, lock, unlock, render, show, history) e flags globais
//! (--db, --verbose, --json-logs).

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use ticketflow::workflow::LockKind;

/// ticketflow: motor de fluxo de tickets com transições por papel.
#[derive(Debug, Parser)]
#[command(name = "ticketflow", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Caminho do banco SQLite (sobrepõe config e `TICKETFLOW_DB`).
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Habilita saída detalhada (verbose).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,

    /// Emite logs em JSON.
    #[arg(long, global = true, default_value_t = false)]
    pub json_logs: bool,
}

/// Tipo de trava aceito pela CLI, mapeado para [`LockKind`] internamente.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LockArg {
    /// O ticket não é mais relevante.
    Obsolete,
    /// O ticket está suspenso.
    OnHold,
    /// O ticket foi substituído por outro (requer --redirect).
    Redirect,
}

impl From<LockArg> for LockKind {
    fn from(arg: LockArg) -> Self {
        match arg {
            LockArg::Obsolete => LockKind::Obsolete,
            LockArg::OnHold => LockKind::OnHold,
            LockArg::Redirect => LockKind::Redirect,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Cria o esquema e importa uma definição de fluxo (TOML).
    Init {
        /// Arquivo de definição com papéis, status, transições e tickets.
        definition: PathBuf,
    },

    /// Lista as transições disponíveis para um papel.
    Transitions {
        ticket: i64,
        /// Papel sob o qual o usuário está agindo.
        #[arg(long)]
        role: i64,
    },

    /// Executa uma transição.
    Apply {
        ticket: i64,
        /// Id da transição escolhida.
        edge: i64,
        #[arg(long)]
        role: i64,
    },

    /// Aplica uma trava ao ticket.
    Lock {
        ticket: i64,
        #[arg(value_enum)]
        kind: LockArg,
        #[arg(long)]
        role: i64,
        /// Ticket sucessor, para travas do tipo redirect.
        #[arg(long)]
        redirect: Option<i64>,
    },

    /// Remove a trava ativa do ticket.
    Unlock {
        ticket: i64,
        #[arg(long)]
        role: i64,
    },

    /// Imprime o fluxograma (Mermaid) de um tipo de fluxo.
    Render {
        flow: String,
        /// Destaca o status atual (e a trava) deste ticket.
        #[arg(long)]
        ticket: Option<i64>,
    },

    /// Mostra o estado de um ticket.
    Show { ticket: i64 },

    /// Mostra o histórico de um ticket em JSON.
    History { ticket: i64 },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_parses_apply_subcommand() {
        let cli = Cli::parse_from(["ticketflow", "apply", "12", "3", "--role", "1"]);
        match cli.command {
            Command::Apply { ticket, edge, role } => {
                assert_eq!((ticket, edge, role), (12, 3, 1));
            }
            _ => panic!("expected Apply command"),
        }
    }

    #[test]
    fn cli_parses_redirect_lock() {
        let cli = Cli::parse_from([
            "ticketflow",
            "lock",
            "5",
            "redirect",
            "--role",
            "1",
            "--redirect",
            "6",
        ]);
        match cli.command {
            Command::Lock {
                ticket,
                kind,
                role,
                redirect,
            } => {
                assert_eq!(ticket, 5);
                assert_eq!(kind, LockArg::Redirect);
                assert_eq!(role, 1);
                assert_eq!(redirect, Some(6));
                assert_eq!(LockKind::from(kind), LockKind::Redirect);
            }
            _ => panic!("expected Lock command"),
        }
    }

    #[test]
    fn cli_parses_global_flags() {
        let cli = Cli::parse_from([
            "ticketflow",
            "--db",
            "/tmp/flow.db",
            "--verbose",
            "--json-logs",
            "render",
            "external",
            "--ticket",
            "4",
        ]);
        assert!(cli.verbose);
        assert!(cli.json_logs);
        assert_eq!(cli.db, Some(PathBuf::from("/tmp/flow.db")));
        assert!(matches!(cli.command, Command::Render { ticket: Some(4), .. }));
    }

    #[test]
    fn on_hold_uses_kebab_case() {
        let cli = Cli::parse_from(["ticketflow", "lock", "1", "on-hold", "--role", "2"]);
        assert!(matches!(
            cli.command,
            Command::Lock {
                kind: LockArg::OnHold,
                ..
            }
        ));
    }

    #[test]
    fn cli_verify() {
        Cli::command().debug_assert();
    }
}
