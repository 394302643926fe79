mod cli;
mod ui;

use std::path::Path;
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use cli::{Cli, Command};
use ticketflow::config::{LogFormat, TicketflowConfig};
use ticketflow::definition::WorkflowDefinition;
use ticketflow::telemetry::init_logging;
use ticketflow::workflow::{EdgeId, FlowType, RoleId, TicketId};
use ticketflow::{SqliteStore, WorkflowEngine, WorkflowError, WorkflowStore};
use ui::Printer;

fn main() -> ExitCode {
    let cli = Cli::parse();
    let printer = Printer::new();

    match run(cli, &printer) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => match err.downcast_ref::<WorkflowError>() {
            Some(workflow) => {
                printer.error(workflow);
                ExitCode::from(2)
            }
            None => {
                eprintln!("error: {err:#}");
                ExitCode::FAILURE
            }
        },
    }
}

fn run(cli: Cli, printer: &Printer) -> Result<()> {
    let mut config = TicketflowConfig::load()?;
    if let Some(db) = cli.db {
        config.database = db;
    }
    let format = if cli.json_logs {
        LogFormat::Json
    } else {
        config.log_format
    };
    init_logging(cli.verbose, format)?;

    match cli.command {
        Command::Init { definition } => init(&config, &definition),
        Command::Transitions { ticket, role } => {
            let engine = open_engine(&config)?;
            let ticket = engine.ticket(TicketId(ticket))?;
            let available = engine.availability(ticket.id, RoleId(role))?;
            let graph = engine.store().load_graph().map_err(WorkflowError::from)?;
            printer.availability(&ticket, &graph, &available);
            Ok(())
        }
        Command::Apply { ticket, edge, role } => {
            let mut engine = open_engine(&config)?;
            let outcome = engine.apply_transition(TicketId(ticket), EdgeId(edge), RoleId(role))?;
            let graph = engine.store().load_graph().map_err(WorkflowError::from)?;
            printer.outcome(&outcome, &graph);
            Ok(())
        }
        Command::Lock {
            ticket,
            kind,
            role,
            redirect,
        } => {
            let mut engine = open_engine(&config)?;
            let lock = engine.set_lock(TicketId(ticket), kind.into(), RoleId(role), redirect)?;
            printer.lock_set(ticket, &lock);
            Ok(())
        }
        Command::Unlock { ticket, role } => {
            let mut engine = open_engine(&config)?;
            let reverted = engine.revoke_lock(TicketId(ticket), RoleId(role))?;
            printer.lock_revoked(ticket, &reverted);
            Ok(())
        }
        Command::Render { flow, ticket } => {
            let engine = open_engine(&config)?;
            let chart = engine.render_flow(&FlowType::new(flow), ticket.map(TicketId))?;
            print!("{}", chart.text);
            Ok(())
        }
        Command::Show { ticket } => {
            let engine = open_engine(&config)?;
            printer.ticket(&engine.ticket(TicketId(ticket))?);
            Ok(())
        }
        Command::History { ticket } => {
            let engine = open_engine(&config)?;
            let records = engine.history(TicketId(ticket))?;
            println!("{}", serde_json::to_string_pretty(&records)?);
            Ok(())
        }
    }
}

fn open_engine(config: &TicketflowConfig) -> Result<WorkflowEngine<SqliteStore>> {
    let store = SqliteStore::open_existing(&config.database).map_err(WorkflowError::from)?;
    Ok(WorkflowEngine::new(store)
        .with_lock_policy(config.lock_policy())
        .with_render_options(config.render_options()))
}

fn init(config: &TicketflowConfig, definition: &Path) -> Result<()> {
    let (graph, tickets) = WorkflowDefinition::load(definition)?.build()?;
    let mut store = SqliteStore::open(&config.database).map_err(WorkflowError::from)?;
    store
        .install(&graph, &tickets)
        .map_err(WorkflowError::from)?;
    info!(database = %config.database.display(), "database initialised");
    println!(
        "Imported {} statuses, {} transitions and {} tickets into {}",
        graph.statuses().count(),
        graph.edges().count(),
        tickets.len(),
        config.database.display()
    );
    Ok(())
}
