use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OpenFlags, OptionalExtension, params};
use tracing::{debug, info};

use crate::error::StoreError;
use crate::workflow::{
    ChangeType, Edge, EdgeId, EdgeKind, FlowType, HistoryRecord, LockState, Role, RoleId, Status,
    StatusId, Ticket, TicketId, TransitionGraph,
};

use super::{LockChange, StatusChange, WorkflowStore};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS roles (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        display_color TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS statuses (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        explanation TEXT NOT NULL DEFAULT '',
        stage_role_id INTEGER REFERENCES roles(id),
        is_terminal INTEGER NOT NULL DEFAULT 0,
        color_override INTEGER NOT NULL DEFAULT 0,
        display_color TEXT NOT NULL DEFAULT ''
    );

    CREATE TABLE IF NOT EXISTS transitions (
        id INTEGER PRIMARY KEY,
        flow_type TEXT NOT NULL,
        from_status_id INTEGER NOT NULL REFERENCES statuses(id),
        to_status_id INTEGER NOT NULL REFERENCES statuses(id),
        allowed_role_id INTEGER NOT NULL REFERENCES roles(id),
        target_owner_role_id INTEGER REFERENCES roles(id),
        button_label TEXT NOT NULL,
        edge_kind TEXT NOT NULL DEFAULT 'normal'
    );

    CREATE TABLE IF NOT EXISTS tickets (
        id INTEGER PRIMARY KEY,
        flow_type TEXT NOT NULL,
        status_id INTEGER NOT NULL REFERENCES statuses(id),
        current_role_id INTEGER REFERENCES roles(id),
        lock_type TEXT NOT NULL DEFAULT 'none',
        redirect_ticket_id INTEGER
    );

    CREATE TABLE IF NOT EXISTS ticket_history (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        ticket_id INTEGER NOT NULL REFERENCES tickets(id),
        change_type TEXT NOT NULL,
        old_value TEXT NOT NULL,
        new_value TEXT NOT NULL,
        actor_role_id INTEGER NOT NULL,
        recorded_at TEXT NOT NULL
    );
";

/// Columns the engine reads or writes, per table.
const REQUIRED_COLUMNS: &[(&str, &[&str])] = &[
    ("roles", &["id", "name", "display_color"]),
    (
        "statuses",
        &[
            "id",
            "name",
            "explanation",
            "stage_role_id",
            "is_terminal",
            "color_override",
            "display_color",
        ],
    ),
    (
        "transitions",
        &[
            "id",
            "flow_type",
            "from_status_id",
            "to_status_id",
            "allowed_role_id",
            "target_owner_role_id",
            "button_label",
            "edge_kind",
        ],
    ),
    (
        "tickets",
        &[
            "id",
            "flow_type",
            "status_id",
            "current_role_id",
            "lock_type",
            "redirect_ticket_id",
        ],
    ),
    (
        "ticket_history",
        &[
            "ticket_id",
            "change_type",
            "old_value",
            "new_value",
            "actor_role_id",
            "recorded_at",
        ],
    ),
];

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Opens (or creates) the database, creating missing tables and adding the
    /// lock columns to a ticket table that predates them.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Self::bootstrap(conn)
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::bootstrap(conn)
    }

    /// Opens an existing database without touching its schema. An incomplete
    /// schema is reported instead of repaired.
    pub fn open_existing(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        let store = Self { conn };
        store.verify_schema()?;
        Ok(store)
    }

    fn bootstrap(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        let store = Self { conn };
        store.migrate_lock_columns()?;
        store.verify_schema()?;
        Ok(store)
    }

    fn columns(&self, table: &str) -> Result<Vec<String>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT name FROM pragma_table_info(?1)")?;
        let names = stmt
            .query_map(params![table], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    }

    fn migrate_lock_columns(&self) -> Result<(), StoreError> {
        let columns = self.columns("tickets")?;
        if !columns.iter().any(|c| c == "lock_type") {
            info!("adding tickets.lock_type column");
            self.conn.execute_batch(
                "ALTER TABLE tickets ADD COLUMN lock_type TEXT NOT NULL DEFAULT 'none';",
            )?;
        }
        if !columns.iter().any(|c| c == "redirect_ticket_id") {
            info!("adding tickets.redirect_ticket_id column");
            self.conn
                .execute_batch("ALTER TABLE tickets ADD COLUMN redirect_ticket_id INTEGER;")?;
        }
        Ok(())
    }

    pub fn verify_schema(&self) -> Result<(), StoreError> {
        for (table, required) in REQUIRED_COLUMNS {
            let present = self.columns(table)?;
            if present.is_empty() {
                return Err(StoreError::MissingTable(table.to_string()));
            }
            if let Some(missing) = required.iter().find(|c| !present.iter().any(|p| p == *c)) {
                return Err(StoreError::MissingColumn {
                    table: table.to_string(),
                    column: missing.to_string(),
                });
            }
        }
        Ok(())
    }

    fn load_roles(&self) -> Result<Vec<Role>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, display_color FROM roles ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            Ok(Role {
                id: RoleId(row.get(0)?),
                name: row.get(1)?,
                display_color: row.get(2)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn load_statuses(&self) -> Result<Vec<Status>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, explanation, stage_role_id, is_terminal, color_override, display_color
             FROM statuses ORDER BY id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(Status {
                id: StatusId(row.get(0)?),
                name: row.get(1)?,
                explanation: row.get(2)?,
                stage_role_id: row.get::<_, Option<i64>>(3)?.map(RoleId),
                is_terminal: row.get(4)?,
                color_override: row.get(5)?,
                display_color: row.get(6)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn load_edges(&self) -> Result<Vec<Edge>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, flow_type, from_status_id, to_status_id, allowed_role_id,
                    target_owner_role_id, button_label, edge_kind
             FROM transitions ORDER BY id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                Edge {
                    id: EdgeId(row.get(0)?),
                    flow_type: FlowType::new(row.get::<_, String>(1)?),
                    from_status_id: StatusId(row.get(2)?),
                    to_status_id: StatusId(row.get(3)?),
                    allowed_role_id: RoleId(row.get(4)?),
                    target_owner_role_id: row.get::<_, Option<i64>>(5)?.map(RoleId),
                    button_label: row.get(6)?,
                    edge_kind: EdgeKind::Normal,
                },
                row.get::<_, String>(7)?,
            ))
        })?;

        let mut edges = Vec::new();
        for row in rows {
            let (mut edge, kind) = row?;
            edge.edge_kind = EdgeKind::parse(&kind).ok_or_else(|| StoreError::Corrupt {
                table: "transitions".into(),
                detail: format!("transition {} has unknown edge kind `{kind}`", edge.id),
            })?;
            edges.push(edge);
        }
        Ok(edges)
    }
}

struct TicketRow {
    id: i64,
    flow_type: String,
    status_id: i64,
    current_role_id: Option<i64>,
    lock_type: String,
    redirect_ticket_id: Option<i64>,
}

impl TicketRow {
    fn into_ticket(self) -> Result<Ticket, StoreError> {
        let lock = LockState::from_columns(&self.lock_type, self.redirect_ticket_id).map_err(
            |detail| StoreError::Corrupt {
                table: "tickets".into(),
                detail: format!("ticket {}: {detail}", self.id),
            },
        )?;
        Ok(Ticket {
            id: TicketId(self.id),
            flow_type: FlowType::new(self.flow_type),
            status_id: StatusId(self.status_id),
            current_role_id: self.current_role_id.map(RoleId),
            lock,
        })
    }
}

fn insert_history(conn: &Connection, record: &HistoryRecord) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO ticket_history
            (ticket_id, change_type, old_value, new_value, actor_role_id, recorded_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            record.ticket_id.0,
            record.change_type.as_str(),
            record.old_value,
            record.new_value,
            record.actor.0,
            record.recorded_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

impl WorkflowStore for SqliteStore {
    fn load_graph(&self) -> Result<TransitionGraph, StoreError> {
        let graph = TransitionGraph::new(self.load_roles()?, self.load_statuses()?, self.load_edges()?)
            .map_err(|err| StoreError::Corrupt {
                table: "transitions".into(),
                detail: err.to_string(),
            })?;
        debug!(edges = graph.edges().count(), "loaded transition graph");
        Ok(graph)
    }

    fn ticket(&self, id: TicketId) -> Result<Option<Ticket>, StoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT id, flow_type, status_id, current_role_id, lock_type, redirect_ticket_id
                 FROM tickets WHERE id = ?1",
                params![id.0],
                |row| {
                    Ok(TicketRow {
                        id: row.get(0)?,
                        flow_type: row.get(1)?,
                        status_id: row.get(2)?,
                        current_role_id: row.get(3)?,
                        lock_type: row.get(4)?,
                        redirect_ticket_id: row.get(5)?,
                    })
                },
            )
            .optional()?;
        row.map(TicketRow::into_ticket).transpose()
    }

    fn ticket_exists(&self, id: TicketId) -> Result<bool, StoreError> {
        let found = self
            .conn
            .query_row("SELECT 1 FROM tickets WHERE id = ?1", params![id.0], |_| Ok(()))
            .optional()?;
        Ok(found.is_some())
    }

    fn commit_status(
        &mut self,
        change: &StatusChange,
        record: &HistoryRecord,
    ) -> Result<bool, StoreError> {
        let tx = self.conn.transaction()?;
        let updated = tx.execute(
            "UPDATE tickets SET status_id = ?1, current_role_id = ?2
             WHERE id = ?3 AND status_id = ?4 AND lock_type = 'none'",
            params![
                change.to.0,
                change.new_owner.map(|r| r.0),
                change.ticket_id.0,
                change.from.0,
            ],
        )?;
        if updated == 0 {
            return Ok(false);
        }
        insert_history(&tx, record)?;
        tx.commit()?;
        Ok(true)
    }

    fn commit_lock(
        &mut self,
        change: &LockChange,
        record: &HistoryRecord,
    ) -> Result<bool, StoreError> {
        let tx = self.conn.transaction()?;
        let updated = tx.execute(
            "UPDATE tickets SET lock_type = ?1, redirect_ticket_id = ?2
             WHERE id = ?3 AND lock_type = ?4 AND redirect_ticket_id IS ?5",
            params![
                change.to.column_value(),
                change.to.redirect_target().map(|t| t.0),
                change.ticket_id.0,
                change.from.column_value(),
                change.from.redirect_target().map(|t| t.0),
            ],
        )?;
        if updated == 0 {
            return Ok(false);
        }
        insert_history(&tx, record)?;
        tx.commit()?;
        Ok(true)
    }

    fn history(&self, id: TicketId) -> Result<Vec<HistoryRecord>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT change_type, old_value, new_value, actor_role_id, recorded_at
             FROM ticket_history WHERE ticket_id = ?1 ORDER BY seq",
        )?;
        let rows = stmt.query_map(params![id.0], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;

        let corrupt = |detail: String| StoreError::Corrupt {
            table: "ticket_history".into(),
            detail,
        };
        let mut records = Vec::new();
        for row in rows {
            let (change_type, old_value, new_value, actor, recorded_at) = row?;
            let change_type = ChangeType::parse(&change_type)
                .ok_or_else(|| corrupt(format!("unknown change type `{change_type}`")))?;
            let recorded_at = DateTime::parse_from_rfc3339(&recorded_at)
                .map_err(|err| corrupt(format!("bad timestamp `{recorded_at}`: {err}")))?
                .with_timezone(&Utc);
            records.push(HistoryRecord {
                ticket_id: id,
                change_type,
                old_value,
                new_value,
                actor: RoleId(actor),
                recorded_at,
            });
        }
        Ok(records)
    }

    fn install(&mut self, graph: &TransitionGraph, tickets: &[Ticket]) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;
        for role in graph.roles() {
            tx.execute(
                "INSERT INTO roles (id, name, display_color) VALUES (?1, ?2, ?3)
                 ON CONFLICT(id) DO UPDATE SET name = excluded.name,
                     display_color = excluded.display_color",
                params![role.id.0, role.name, role.display_color],
            )?;
        }
        for status in graph.statuses() {
            tx.execute(
                "INSERT INTO statuses
                    (id, name, explanation, stage_role_id, is_terminal, color_override, display_color)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(id) DO UPDATE SET name = excluded.name,
                     explanation = excluded.explanation,
                     stage_role_id = excluded.stage_role_id,
                     is_terminal = excluded.is_terminal,
                     color_override = excluded.color_override,
                     display_color = excluded.display_color",
                params![
                    status.id.0,
                    status.name,
                    status.explanation,
                    status.stage_role_id.map(|r| r.0),
                    status.is_terminal,
                    status.color_override,
                    status.display_color,
                ],
            )?;
        }
        for edge in graph.edges() {
            tx.execute(
                "INSERT INTO transitions
                    (id, flow_type, from_status_id, to_status_id, allowed_role_id,
                     target_owner_role_id, button_label, edge_kind)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(id) DO UPDATE SET flow_type = excluded.flow_type,
                     from_status_id = excluded.from_status_id,
                     to_status_id = excluded.to_status_id,
                     allowed_role_id = excluded.allowed_role_id,
                     target_owner_role_id = excluded.target_owner_role_id,
                     button_label = excluded.button_label,
                     edge_kind = excluded.edge_kind",
                params![
                    edge.id.0,
                    edge.flow_type.as_str(),
                    edge.from_status_id.0,
                    edge.to_status_id.0,
                    edge.allowed_role_id.0,
                    edge.target_owner_role_id.map(|r| r.0),
                    edge.button_label,
                    edge.edge_kind.as_str(),
                ],
            )?;
        }
        // The transition set is replaced, not merged.
        let stale: Vec<i64> = {
            let mut stmt = tx.prepare("SELECT id FROM transitions")?;
            let ids = stmt
                .query_map([], |row| row.get::<_, i64>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            ids.into_iter()
                .filter(|id| graph.edge(EdgeId(*id)).is_none())
                .collect()
        };
        for id in &stale {
            tx.execute("DELETE FROM transitions WHERE id = ?1", params![id])?;
        }

        // Tickets are seeded once. Status, owner and lock of an existing
        // ticket only change through the executors.
        let mut seeded = 0;
        for ticket in tickets {
            seeded += tx.execute(
                "INSERT INTO tickets
                    (id, flow_type, status_id, current_role_id, lock_type, redirect_ticket_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(id) DO NOTHING",
                params![
                    ticket.id.0,
                    ticket.flow_type.as_str(),
                    ticket.status_id.0,
                    ticket.current_role_id.map(|r| r.0),
                    ticket.lock.column_value(),
                    ticket.lock.redirect_target().map(|t| t.0),
                ],
            )?;
        }
        tx.commit()?;
        info!(
            roles = graph.roles().count(),
            statuses = graph.statuses().count(),
            transitions = graph.edges().count(),
            removed_transitions = stale.len(),
            seeded_tickets = seeded,
            skipped_tickets = tickets.len() - seeded,
            "installed workflow definition"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::graph::fixtures::*;

    fn seeded() -> SqliteStore {
        let mut store = SqliteStore::in_memory().unwrap();
        let tickets = [
            Ticket::new(TicketId(1), FlowType::from("external"), StatusId(10)),
            Ticket::new(TicketId(2), FlowType::from("external"), StatusId(20)),
        ];
        store.install(&sample_graph(), &tickets).unwrap();
        store
    }

    #[test]
    fn installed_graph_loads_back() {
        let store = seeded();
        let graph = store.load_graph().unwrap();
        assert_eq!(graph.edges().count(), 5);
        assert_eq!(graph.edge(EdgeId(4)).unwrap().edge_kind, EdgeKind::Fallback);
        assert!(graph.status(StatusId(40)).unwrap().is_terminal);
        assert!(store.ticket_exists(TicketId(2)).unwrap());
        assert!(!store.ticket_exists(TicketId(3)).unwrap());
    }

    #[test]
    fn status_commit_is_guarded_and_recorded() {
        let mut store = seeded();
        let change = StatusChange {
            ticket_id: TicketId(1),
            from: StatusId(10),
            to: StatusId(20),
            new_owner: Some(DEV),
        };
        let record = HistoryRecord::status(TicketId(1), StatusId(10), StatusId(20), QUALITY);
        assert!(store.commit_status(&change, &record).unwrap());
        assert!(!store.commit_status(&change, &record).unwrap());

        let ticket = store.ticket(TicketId(1)).unwrap().unwrap();
        assert_eq!(ticket.status_id, StatusId(20));
        assert_eq!(ticket.current_role_id, Some(DEV));

        let history = store.history(TicketId(1)).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].change_type, ChangeType::Status);
        assert_eq!(history[0].old_value, "10");
        assert_eq!(history[0].new_value, "20");
    }

    #[test]
    fn redirect_lock_persists_target() {
        let mut store = seeded();
        let change = LockChange {
            ticket_id: TicketId(1),
            from: LockState::None,
            to: LockState::Redirect {
                target: TicketId(2),
            },
        };
        let record = HistoryRecord::lock(TicketId(1), &change.from, &change.to, QUALITY);
        assert!(store.commit_lock(&change, &record).unwrap());
        let ticket = store.ticket(TicketId(1)).unwrap().unwrap();
        assert_eq!(ticket.lock.redirect_target(), Some(TicketId(2)));

        // A locked ticket refuses status writes.
        let status = StatusChange {
            ticket_id: TicketId(1),
            from: StatusId(10),
            to: StatusId(20),
            new_owner: None,
        };
        let record = HistoryRecord::status(TicketId(1), StatusId(10), StatusId(20), QUALITY);
        assert!(!store.commit_status(&status, &record).unwrap());
    }

    #[test]
    fn reinstall_keeps_live_ticket_state() {
        let mut store = seeded();
        let change = StatusChange {
            ticket_id: TicketId(1),
            from: StatusId(10),
            to: StatusId(20),
            new_owner: Some(DEV),
        };
        let record = HistoryRecord::status(TicketId(1), StatusId(10), StatusId(20), QUALITY);
        assert!(store.commit_status(&change, &record).unwrap());
        let lock = LockChange {
            ticket_id: TicketId(1),
            from: LockState::None,
            to: LockState::OnHold,
        };
        let record = HistoryRecord::lock(TicketId(1), &lock.from, &lock.to, DEV);
        assert!(store.commit_lock(&lock, &record).unwrap());

        let seeds = [
            Ticket::new(TicketId(1), FlowType::from("external"), StatusId(10)),
            Ticket::new(TicketId(3), FlowType::from("internal"), StatusId(10)),
        ];
        store.install(&sample_graph(), &seeds).unwrap();

        let ticket = store.ticket(TicketId(1)).unwrap().unwrap();
        assert_eq!(ticket.status_id, StatusId(20));
        assert_eq!(ticket.current_role_id, Some(DEV));
        assert_eq!(ticket.lock, LockState::OnHold);
        assert_eq!(store.history(TicketId(1)).unwrap().len(), 2);
        // New tickets are still seeded.
        assert!(store.ticket_exists(TicketId(3)).unwrap());
    }

    #[test]
    fn reinstall_drops_removed_transitions() {
        let mut store = seeded();
        let full = sample_graph();
        let trimmed = TransitionGraph::new(
            full.roles().cloned(),
            full.statuses().cloned(),
            full.edges().filter(|e| e.id != EdgeId(4)).cloned(),
        )
        .unwrap();
        store.install(&trimmed, &[]).unwrap();

        let graph = store.load_graph().unwrap();
        assert!(graph.edge(EdgeId(4)).is_none());
        assert_eq!(graph.edges().count(), 4);
        let from_verification: Vec<_> = graph
            .outgoing(&FlowType::from("external"), StatusId(30))
            .map(|e| e.id.0)
            .collect();
        assert_eq!(from_verification, vec![3]);
    }

    #[test]
    fn legacy_ticket_table_gets_lock_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("legacy.db");
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch(
                "CREATE TABLE tickets (
                    id INTEGER PRIMARY KEY,
                    flow_type TEXT NOT NULL,
                    status_id INTEGER NOT NULL,
                    current_role_id INTEGER
                );",
            )
            .unwrap();
            // Every other table is current; only the ticket table predates locks.
            conn.execute_batch(SCHEMA).unwrap();
        }

        let err = SqliteStore::open_existing(&path).err().unwrap();
        assert!(matches!(err, StoreError::MissingColumn { ref column, .. } if column == "lock_type"));

        SqliteStore::open(&path).unwrap();
        SqliteStore::open_existing(&path).unwrap();
    }

    #[test]
    fn open_existing_reports_missing_tables() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.db");
        Connection::open(&path)
            .unwrap()
            .execute_batch("PRAGMA user_version = 1;")
            .unwrap();
        let err = SqliteStore::open_existing(&path).err().unwrap();
        assert!(matches!(err, StoreError::MissingTable(ref table) if table == "roles"));
    }
}
