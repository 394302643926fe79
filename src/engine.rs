use tracing::debug;

use crate::error::WorkflowError;
use crate::store::WorkflowStore;
use crate::telemetry::operation_span;
use crate::workflow::{
    Availability, Edge, EdgeId, Flowchart, FlowType, HistoryRecord, LockKind, LockPolicy,
    LockState, RenderOptions, RoleId, Ticket, TicketId, TransitionGraph, TransitionOutcome,
    executor, flowchart, lock, resolver,
};

/// Entry point the surrounding application calls into.
///
/// Every operation loads the registry fresh from the store, acts on exactly
/// one ticket, and takes the acting role as an explicit argument.
pub struct WorkflowEngine<S> {
    store: S,
    lock_policy: LockPolicy,
    render_options: RenderOptions,
}

impl<S: WorkflowStore> WorkflowEngine<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            lock_policy: LockPolicy::default(),
            render_options: RenderOptions::default(),
        }
    }

    pub fn with_lock_policy(mut self, policy: LockPolicy) -> Self {
        self.lock_policy = policy;
        self
    }

    pub fn with_render_options(mut self, options: RenderOptions) -> Self {
        self.render_options = options;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    fn graph(&self) -> Result<TransitionGraph, WorkflowError> {
        Ok(self.store.load_graph()?)
    }

    pub fn ticket(&self, ticket_id: TicketId) -> Result<Ticket, WorkflowError> {
        self.store
            .ticket(ticket_id)?
            .ok_or_else(|| WorkflowError::Validation(format!("unknown ticket #{ticket_id}")))
    }

    /// Transitions `actor` may execute on the ticket now; empty while locked.
    pub fn allowed_transitions(
        &self,
        ticket_id: TicketId,
        actor: RoleId,
    ) -> Result<Vec<Edge>, WorkflowError> {
        let span = operation_span("allowed_transitions", Some(ticket_id), Some(actor));
        let _enter = span.enter();

        let graph = self.graph()?;
        let ticket = self.ticket(ticket_id)?;
        let edges: Vec<Edge> = resolver::resolve(&graph, &ticket, actor)
            .into_iter()
            .cloned()
            .collect();
        debug!(count = edges.len(), "resolved transitions");
        Ok(edges)
    }

    /// Like [`allowed_transitions`](Self::allowed_transitions), but explains an empty result.
    pub fn availability(
        &self,
        ticket_id: TicketId,
        actor: RoleId,
    ) -> Result<Availability, WorkflowError> {
        let span = operation_span("availability", Some(ticket_id), Some(actor));
        let _enter = span.enter();

        let graph = self.graph()?;
        let ticket = self.ticket(ticket_id)?;
        Ok(resolver::availability(&graph, &ticket, actor))
    }

    pub fn apply_transition(
        &mut self,
        ticket_id: TicketId,
        edge_id: EdgeId,
        actor: RoleId,
    ) -> Result<TransitionOutcome, WorkflowError> {
        let span = operation_span("apply_transition", Some(ticket_id), Some(actor));
        let _enter = span.enter();

        let graph = self.graph()?;
        executor::apply(&mut self.store, &graph, ticket_id, edge_id, actor)
    }

    pub fn set_lock(
        &mut self,
        ticket_id: TicketId,
        kind: LockKind,
        actor: RoleId,
        redirect_target: Option<i64>,
    ) -> Result<LockState, WorkflowError> {
        let span = operation_span("set_lock", Some(ticket_id), Some(actor));
        let _enter = span.enter();

        let graph = self.graph()?;
        lock::set_lock(
            &mut self.store,
            &graph,
            &self.lock_policy,
            ticket_id,
            kind,
            actor,
            redirect_target,
        )
    }

    /// Returns the lock that was removed.
    pub fn revoke_lock(
        &mut self,
        ticket_id: TicketId,
        actor: RoleId,
    ) -> Result<LockState, WorkflowError> {
        let span = operation_span("revoke_lock", Some(ticket_id), Some(actor));
        let _enter = span.enter();

        let graph = self.graph()?;
        lock::revoke_lock(&mut self.store, &graph, &self.lock_policy, ticket_id, actor)
    }

    /// Renders `flow`, highlighting the ticket's status and lock when a ticket is given.
    pub fn render_flow(
        &self,
        flow: &FlowType,
        ticket_id: Option<TicketId>,
    ) -> Result<Flowchart, WorkflowError> {
        let span = operation_span("render_flow", ticket_id, None);
        let _enter = span.enter();

        let graph = self.graph()?;
        if graph.flow_edges(flow).next().is_none() {
            return Err(WorkflowError::Validation(format!(
                "flow type `{flow}` has no transitions"
            )));
        }

        let (highlighted, lock) = match ticket_id {
            Some(id) => {
                let ticket = self.ticket(id)?;
                if &ticket.flow_type != flow {
                    return Err(WorkflowError::Validation(format!(
                        "ticket #{id} follows flow `{}`, not `{flow}`",
                        ticket.flow_type
                    )));
                }
                (Some(ticket.status_id), ticket.lock.kind())
            }
            None => (None, None),
        };

        Ok(flowchart::render(
            &graph,
            flow,
            highlighted,
            lock,
            &self.render_options,
        ))
    }

    pub fn history(&self, ticket_id: TicketId) -> Result<Vec<HistoryRecord>, WorkflowError> {
        let span = operation_span("history", Some(ticket_id), None);
        let _enter = span.enter();

        if !self.store.ticket_exists(ticket_id)? {
            return Err(WorkflowError::Validation(format!(
                "unknown ticket #{ticket_id}"
            )));
        }
        let records = self.store.history(ticket_id)?;
        debug!(count = records.len(), "loaded history");
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::store::{MemoryStore, SqliteStore};
    use crate::workflow::graph::fixtures::*;
    use crate::workflow::{ChangeType, StatusId};
    use std::fmt;
    use std::sync::{Arc, Mutex};
    use tracing::field::{Field, Visit};
    use tracing::span;
    use tracing_subscriber::Layer;
    use tracing_subscriber::layer::{Context, SubscriberExt};

    /// Collects the `op` field of every span opened while installed.
    struct SpanOps(Arc<Mutex<Vec<String>>>);

    struct OpField<'a>(&'a mut Vec<String>);

    impl Visit for OpField<'_> {
        fn record_str(&mut self, field: &Field, value: &str) {
            if field.name() == "op" {
                self.0.push(value.to_string());
            }
        }

        fn record_debug(&mut self, _field: &Field, _value: &dyn fmt::Debug) {}
    }

    impl<S: tracing::Subscriber> Layer<S> for SpanOps {
        fn on_new_span(&self, attrs: &span::Attributes<'_>, _id: &span::Id, _ctx: Context<'_, S>) {
            if let Ok(mut ops) = self.0.lock() {
                attrs.record(&mut OpField(&mut ops));
            }
        }
    }

    fn tickets() -> Vec<Ticket> {
        vec![
            Ticket::new(TicketId(1), FlowType::from("external"), StatusId(10)),
            Ticket::new(TicketId(2), FlowType::from("external"), StatusId(10)),
            Ticket::new(TicketId(3), FlowType::from("internal"), StatusId(10)),
        ]
    }

    fn engine() -> WorkflowEngine<MemoryStore> {
        WorkflowEngine::new(MemoryStore::new(sample_graph(), tickets()))
    }

    fn edge_ids(edges: &[Edge]) -> Vec<i64> {
        edges.iter().map(|e| e.id.0).collect()
    }

    #[test]
    fn evaluate_moves_ticket_to_dev() {
        let mut engine = engine();
        let allowed = engine.allowed_transitions(TicketId(1), QUALITY).unwrap();
        assert_eq!(edge_ids(&allowed), vec![1]);
        assert_eq!(allowed[0].button_label, "Evaluate");

        let outcome = engine.apply_transition(TicketId(1), EdgeId(1), QUALITY).unwrap();
        assert_eq!(outcome.new_status, StatusId(20));
        assert_eq!(outcome.new_owner, Some(DEV));

        let ticket = engine.ticket(TicketId(1)).unwrap();
        assert_eq!(ticket.status_id, StatusId(20));
        assert_eq!(ticket.current_role_id, Some(DEV));
    }

    #[test]
    fn role_gate_hides_edges_from_other_roles() {
        let engine = engine();
        assert!(engine.allowed_transitions(TicketId(1), DEV).unwrap().is_empty());
    }

    #[test]
    fn stale_edge_after_concurrent_apply() {
        let mut engine = engine();
        let resolved = engine.allowed_transitions(TicketId(1), QUALITY).unwrap();
        // Another request applies the same edge first.
        engine.apply_transition(TicketId(1), resolved[0].id, QUALITY).unwrap();

        let err = engine
            .apply_transition(TicketId(1), resolved[0].id, QUALITY)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(engine.ticket(TicketId(1)).unwrap().status_id, StatusId(20));
        assert_eq!(engine.history(TicketId(1)).unwrap().len(), 1);
    }

    #[test]
    fn lock_round_trip_restores_transitions() {
        let mut engine = engine();
        let before = engine.allowed_transitions(TicketId(1), QUALITY).unwrap();

        engine
            .set_lock(TicketId(1), LockKind::Redirect, QUALITY, Some(2))
            .unwrap();
        for role in [QUALITY, DEV, SUPPORT] {
            assert!(engine.allowed_transitions(TicketId(1), role).unwrap().is_empty());
        }
        let err = engine
            .apply_transition(TicketId(1), EdgeId(1), QUALITY)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Locked);

        engine.revoke_lock(TicketId(1), QUALITY).unwrap();
        let after = engine.allowed_transitions(TicketId(1), QUALITY).unwrap();
        assert_eq!(before, after);

        let history = engine.history(TicketId(1)).unwrap();
        assert_eq!(history.len(), 2);
        assert!(history.iter().all(|r| r.change_type == ChangeType::Lock));
    }

    #[test]
    fn redirect_validation_through_engine() {
        let mut engine = engine();
        let self_ref = engine
            .set_lock(TicketId(1), LockKind::Redirect, QUALITY, Some(1))
            .unwrap_err();
        assert_eq!(self_ref.kind(), ErrorKind::Validation);
        let missing = engine
            .set_lock(TicketId(1), LockKind::Redirect, QUALITY, Some(404))
            .unwrap_err();
        assert_eq!(missing.kind(), ErrorKind::Validation);

        engine
            .set_lock(TicketId(1), LockKind::Redirect, QUALITY, Some(2))
            .unwrap();
        assert_eq!(
            engine.ticket(TicketId(1)).unwrap().lock,
            LockState::Redirect {
                target: TicketId(2)
            }
        );
    }

    #[test]
    fn render_highlights_ticket_and_lock() {
        let mut engine = engine();
        engine
            .set_lock(TicketId(1), LockKind::Obsolete, QUALITY, None)
            .unwrap();
        let chart = engine
            .render_flow(&FlowType::from("external"), Some(TicketId(1)))
            .unwrap();
        assert!(chart.text.contains("class S10 current,lockObsolete"));
    }

    #[test]
    fn render_rejects_mismatched_or_unknown_flow() {
        let engine = engine();
        let err = engine
            .render_flow(&FlowType::from("external"), Some(TicketId(3)))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        let err = engine
            .render_flow(&FlowType::from("nonexistent"), None)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn render_without_ticket_has_no_highlight() {
        let engine = engine().with_render_options(RenderOptions {
            node_prefix: "N".into(),
            direction: "LR".into(),
        });
        let chart = engine
            .render_flow(&FlowType::from("internal"), None)
            .unwrap();
        assert!(chart.text.starts_with("flowchart LR\n"));
        assert!(chart.text.contains("N10 -->|\"Accept\"| N50"));
        assert!(!chart.text.contains("class "));
    }

    #[test]
    fn sqlite_engine_walks_the_flow() {
        let mut store = SqliteStore::in_memory().unwrap();
        store.install(&sample_graph(), &tickets()).unwrap();
        let mut engine = WorkflowEngine::new(store).with_lock_policy(LockPolicy::gated(QUALITY));

        engine.apply_transition(TicketId(1), EdgeId(1), QUALITY).unwrap();
        engine.apply_transition(TicketId(1), EdgeId(2), DEV).unwrap();
        engine.apply_transition(TicketId(1), EdgeId(4), QUALITY).unwrap();

        let ticket = engine.ticket(TicketId(1)).unwrap();
        assert_eq!(ticket.status_id, StatusId(20));
        assert_eq!(ticket.current_role_id, Some(DEV));

        // Dev owns status 20, but the gate keeps lock authority with Quality.
        let err = engine
            .set_lock(TicketId(1), LockKind::OnHold, DEV, None)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authorization);

        let history = engine.history(TicketId(1)).unwrap();
        let moves: Vec<_> = history
            .iter()
            .map(|r| (r.old_value.as_str(), r.new_value.as_str()))
            .collect();
        assert_eq!(moves, vec![("10", "20"), ("20", "30"), ("30", "20")]);
    }

    #[test]
    fn every_operation_opens_its_span() {
        let ops = Arc::new(Mutex::new(Vec::new()));
        let subscriber = tracing_subscriber::registry().with(SpanOps(ops.clone()));
        let mut engine = engine();
        tracing::subscriber::with_default(subscriber, || {
            engine.allowed_transitions(TicketId(1), QUALITY).unwrap();
            engine.apply_transition(TicketId(1), EdgeId(1), QUALITY).unwrap();
            engine.history(TicketId(1)).unwrap();
        });
        assert_eq!(
            *ops.lock().unwrap(),
            vec!["allowed_transitions", "apply_transition", "history"]
        );
    }

    #[test]
    fn unknown_ticket_is_a_validation_error() {
        let engine = engine();
        let err = engine.allowed_transitions(TicketId(99), QUALITY).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(
            engine.history(TicketId(99)).unwrap_err().kind(),
            ErrorKind::Validation
        );
    }
}
