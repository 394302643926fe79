//! Mermaid flowchart projection of one flow type.
//!
//! Rendering is pure: the same graph, flow type, highlight and lock always
//! produce byte-identical text. Nodes are exactly the statuses that are an
//! endpoint of some edge of the flow. Node ids are a fixed prefix plus the
//! zero-padded status id, padded to `max(2, digits(max used status id))`, so
//! they keep a fixed width and can be mapped back with [`parse_node_id`].

use std::collections::BTreeMap;
use std::fmt::Write;

use super::graph::TransitionGraph;
use super::model::{EdgeKind, FlowType, LockKind, StatusId};

pub const DEFAULT_NODE_PREFIX: &str = "S";

const SUCCESS_LINK: &str = "stroke:#2e7d32,stroke-width:2px";
const FALLBACK_LINK: &str = "stroke:#c62828,stroke-width:2px,stroke-dasharray:5 3";
const NORMAL_LINK: &str = "stroke:#607d8b,stroke-width:1px";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderOptions {
    pub node_prefix: String,
    /// Mermaid direction: `TD`, `LR`, ...
    pub direction: String,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            node_prefix: DEFAULT_NODE_PREFIX.to_string(),
            direction: "TD".to_string(),
        }
    }
}

/// Bijection between status ids and diagram node ids, built once per render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeIds {
    prefix: String,
    width: usize,
    by_status: BTreeMap<StatusId, String>,
    by_node: BTreeMap<String, StatusId>,
}

impl NodeIds {
    pub fn new(
        prefix: &str,
        max_used: Option<StatusId>,
        statuses: impl IntoIterator<Item = StatusId>,
    ) -> Self {
        let width = pad_width(max_used);
        let mut ids = Self {
            prefix: prefix.to_string(),
            width,
            by_status: BTreeMap::new(),
            by_node: BTreeMap::new(),
        };
        for status in statuses {
            let node = format!("{prefix}{:0width$}", status.0);
            ids.by_node.insert(node.clone(), status);
            ids.by_status.insert(status, node);
        }
        ids
    }

    pub fn node_id(&self, status: StatusId) -> Option<&str> {
        self.by_status.get(&status).map(String::as_str)
    }

    pub fn status_for(&self, node: &str) -> Option<StatusId> {
        self.by_node.get(node).copied()
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn len(&self) -> usize {
        self.by_status.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_status.is_empty()
    }

    /// Node ids in status id order.
    pub fn iter(&self) -> impl Iterator<Item = (StatusId, &str)> {
        self.by_status.iter().map(|(id, node)| (*id, node.as_str()))
    }
}

fn pad_width(max_used: Option<StatusId>) -> usize {
    let digits = max_used.map_or(1, |id| id.0.max(0).to_string().len());
    digits.max(2)
}

/// Maps a clicked node id (`<prefix><digits>`) back to its status id.
pub fn parse_node_id(prefix: &str, node: &str) -> Option<StatusId> {
    let digits = node.strip_prefix(prefix)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok().map(StatusId)
}

/// A rendered diagram together with the node id mapping it used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Flowchart {
    pub text: String,
    pub nodes: NodeIds,
}

fn lock_class(kind: LockKind) -> (&'static str, &'static str) {
    match kind {
        LockKind::Obsolete => (
            "lockObsolete",
            "fill:#9e9e9e,stroke:#424242,stroke-width:3px,stroke-dasharray:6 4,color:#ffffff",
        ),
        LockKind::OnHold => ("lockOnHold", "fill:#fff59d,stroke:#f9a825,stroke-width:4px"),
        LockKind::Redirect => (
            "lockRedirect",
            "fill:#e1bee7,stroke:#6a1b9a,stroke-width:4px,stroke-dasharray:2 2",
        ),
    }
}

fn escape_label(text: &str) -> String {
    text.replace('"', "#quot;")
        .replace('|', "#124;")
        .replace(['\n', '\r'], " ")
}

fn is_safe_color(color: &str) -> bool {
    !color.is_empty()
        && color
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '#' | '(' | ')' | ',' | '.' | ' ' | '%'))
}

/// Renders `flow` as a Mermaid flowchart.
///
/// `highlighted` marks the node of the ticket's current status; `lock`
/// additionally tags that node with one of three lock treatments. A highlight
/// on a status outside the flow is ignored.
pub fn render(
    graph: &TransitionGraph,
    flow: &FlowType,
    highlighted: Option<StatusId>,
    lock: Option<LockKind>,
    options: &RenderOptions,
) -> Flowchart {
    let nodes = NodeIds::new(
        &options.node_prefix,
        graph.max_used_status_id(),
        graph.flow_statuses(flow),
    );

    // Writing into a String cannot fail.
    let mut out = String::new();
    let _ = writeln!(out, "flowchart {}", options.direction);

    for (status_id, node) in nodes.iter() {
        let Some(status) = graph.status(status_id) else {
            continue;
        };
        let label = escape_label(&status.name);
        if status.is_terminal {
            let _ = writeln!(out, "    {node}([\"{label}\"])");
        } else {
            let _ = writeln!(out, "    {node}[\"{label}\"]");
        }
    }

    let mut link_styles = Vec::new();
    for (index, edge) in graph.flow_edges(flow).enumerate() {
        let (Some(from), Some(to)) = (
            nodes.node_id(edge.from_status_id),
            nodes.node_id(edge.to_status_id),
        ) else {
            continue;
        };
        let label = escape_label(&edge.button_label);
        let arrow = match edge.edge_kind {
            EdgeKind::Fallback => "-.->",
            EdgeKind::Success => "==>",
            EdgeKind::Normal => "-->",
        };
        let _ = writeln!(out, "    {from} {arrow}|\"{label}\"| {to}");
        let style = match edge.edge_kind {
            EdgeKind::Success => SUCCESS_LINK,
            EdgeKind::Fallback => FALLBACK_LINK,
            EdgeKind::Normal => NORMAL_LINK,
        };
        link_styles.push(format!("    linkStyle {index} {style}"));
    }

    for (status_id, node) in nodes.iter() {
        if let Some(status) = graph.status(status_id)
            && is_safe_color(&status.display_color)
        {
            let _ = writeln!(out, "    style {node} fill:{}", status.display_color);
        }
    }
    for line in &link_styles {
        let _ = writeln!(out, "{line}");
    }

    if let Some(node) = highlighted.and_then(|id| nodes.node_id(id)) {
        let _ = writeln!(out, "    classDef current stroke:#1565c0,stroke-width:4px");
        match lock {
            Some(kind) => {
                let (class, style) = lock_class(kind);
                let _ = writeln!(out, "    classDef {class} {style}");
                let _ = writeln!(out, "    class {node} current,{class}");
            }
            None => {
                let _ = writeln!(out, "    class {node} current");
            }
        }
    }

    Flowchart { text: out, nodes }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::graph::fixtures::*;

    fn external() -> FlowType {
        FlowType::from("external")
    }

    #[test]
    fn nodes_are_exactly_the_flow_endpoints() {
        let graph = sample_graph();
        let chart = render(&graph, &external(), None, None, &RenderOptions::default());
        for node in ["S10", "S20", "S30", "S40"] {
            assert!(chart.text.contains(&format!("    {node}")), "missing {node}");
        }
        // 50 only belongs to the internal flow, 60 to no edge at all.
        assert!(!chart.text.contains("S50"));
        assert!(!chart.text.contains("S60"));
        assert!(!chart.text.contains("Unused"));
        assert_eq!(chart.nodes.len(), 4);
    }

    #[test]
    fn render_is_deterministic() {
        let graph = sample_graph();
        let options = RenderOptions::default();
        let a = render(&graph, &external(), Some(StatusId(30)), Some(LockKind::OnHold), &options);
        let b = render(&graph, &external(), Some(StatusId(30)), Some(LockKind::OnHold), &options);
        assert_eq!(a, b);
    }

    #[test]
    fn full_external_chart() {
        let graph = sample_graph();
        let chart = render(
            &graph,
            &external(),
            Some(StatusId(20)),
            None,
            &RenderOptions::default(),
        );
        let expected = "\
flowchart TD
    S10[\"Reported\"]
    S20[\"In development\"]
    S30[\"Verification\"]
    S40([\"Closed\"])
    S10 -->|\"Evaluate\"| S20
    S20 ==>|\"Fix created\"| S30
    S30 ==>|\"Confirm\"| S40
    S30 -.->|\"Reject\"| S20
    style S10 fill:#cfd8dc
    style S20 fill:#cfd8dc
    style S30 fill:#cfd8dc
    style S40 fill:#cfd8dc
    linkStyle 0 stroke:#607d8b,stroke-width:1px
    linkStyle 1 stroke:#2e7d32,stroke-width:2px
    linkStyle 2 stroke:#2e7d32,stroke-width:2px
    linkStyle 3 stroke:#c62828,stroke-width:2px,stroke-dasharray:5 3
    classDef current stroke:#1565c0,stroke-width:4px
    class S20 current
";
        assert_eq!(chart.text, expected);
    }

    #[test]
    fn each_lock_kind_gets_its_own_class() {
        let graph = sample_graph();
        let options = RenderOptions::default();
        let classes: Vec<_> = [LockKind::Obsolete, LockKind::OnHold, LockKind::Redirect]
            .into_iter()
            .map(|kind| {
                let chart = render(&graph, &external(), Some(StatusId(10)), Some(kind), &options);
                let line = chart
                    .text
                    .lines()
                    .find(|l| l.trim_start().starts_with("class S10"))
                    .unwrap()
                    .to_string();
                assert!(line.contains("current,"));
                line
            })
            .collect();
        assert_eq!(classes[0], "    class S10 current,lockObsolete");
        assert_eq!(classes[1], "    class S10 current,lockOnHold");
        assert_eq!(classes[2], "    class S10 current,lockRedirect");
    }

    #[test]
    fn highlight_outside_flow_is_ignored() {
        let graph = sample_graph();
        let chart = render(
            &graph,
            &external(),
            Some(StatusId(50)),
            Some(LockKind::Obsolete),
            &RenderOptions::default(),
        );
        assert!(!chart.text.contains("classDef"));
    }

    #[test]
    fn node_ids_pad_to_widest_used_status() {
        let ids = NodeIds::new("S", Some(StatusId(1234)), [StatusId(7), StatusId(1234)]);
        assert_eq!(ids.width(), 4);
        assert_eq!(ids.node_id(StatusId(7)), Some("S0007"));
        assert_eq!(ids.status_for("S1234"), Some(StatusId(1234)));

        let small = NodeIds::new("S", Some(StatusId(3)), [StatusId(3)]);
        assert_eq!(small.node_id(StatusId(3)), Some("S03"));
    }

    #[test]
    fn node_ids_map_back_to_statuses() {
        let graph = sample_graph();
        let chart = render(&graph, &external(), None, None, &RenderOptions::default());
        for (status, node) in chart.nodes.iter() {
            assert_eq!(chart.nodes.status_for(node), Some(status));
            assert_eq!(parse_node_id(chart.nodes.prefix(), node), Some(status));
        }
    }

    #[test]
    fn parse_node_id_rejects_foreign_text() {
        assert_eq!(parse_node_id("S", "S007"), Some(StatusId(7)));
        assert_eq!(parse_node_id("S", "S"), None);
        assert_eq!(parse_node_id("S", "X10"), None);
        assert_eq!(parse_node_id("S", "S1a"), None);
        assert_eq!(parse_node_id("S", "S-1"), None);
    }

    #[test]
    fn labels_are_escaped() {
        assert_eq!(escape_label("say \"ok\" | go"), "say #quot;ok#quot; #124; go");
    }
}
