//! State-tree visualization - multi-format tree rendering
//!
//! Renders a compiled statechart's tree in three formats:
//! - **DOT/Graphviz** - professional diagrams rendered with graphviz tools
//! - **Mermaid** - diagrams for markdown and web documentation
//! - **ASCII** - quick console output for debugging
//!
//! Rendering is pure string generation from the structural summary; the
//! engine is never locked and no I/O happens here.
//!
//! # Quick start
//!
//! ```rust
//! use strata::{visualize, Design, StateConfig, VisualizationOptions};
//!
//! # fn example() -> strata::Result<()> {
//! let machine = Design::new()
//!     .id("player")
//!     .initial("stopped")
//!     .state("stopped", StateConfig::new())
//!     .state("playing", StateConfig::new())
//!     .compile()?;
//!
//! let dot = visualize(&machine, &VisualizationOptions::dot());
//! assert!(dot.contains("digraph"));
//! // Render with: dot -Tpng tree.dot -o tree.png
//! # Ok(())
//! # }
//! ```

use crate::machine::Statechart;
use crate::tree::{NodeKind, StateSummary};

/// Output format for tree rendering
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VisualizationFormat {
    /// Graphviz DOT
    Dot,
    /// Mermaid `graph TD`
    Mermaid,
    /// Indented console listing
    Ascii,
}

/// Rendering options
#[derive(Clone, Debug)]
pub struct VisualizationOptions {
    /// Output format
    pub format: VisualizationFormat,
    /// Optional title label
    pub title: Option<String>,
    /// Mark currently-active states
    pub show_active: bool,
}

impl VisualizationOptions {
    /// DOT output
    pub fn dot() -> Self {
        Self { format: VisualizationFormat::Dot, title: None, show_active: false }
    }

    /// Mermaid output
    pub fn mermaid() -> Self {
        Self { format: VisualizationFormat::Mermaid, title: None, show_active: false }
    }

    /// ASCII output
    pub fn ascii() -> Self {
        Self { format: VisualizationFormat::Ascii, title: None, show_active: false }
    }

    /// Add a title label
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Highlight active states in the output
    pub fn with_active(mut self) -> Self {
        self.show_active = true;
        self
    }
}

/// Render the machine's state tree in the requested format
pub fn visualize(machine: &Statechart, options: &VisualizationOptions) -> String {
    let summary = machine.state_summary();
    match options.format {
        VisualizationFormat::Dot => render_dot(&summary, options),
        VisualizationFormat::Mermaid => render_mermaid(&summary, options),
        VisualizationFormat::Ascii => render_ascii(&summary, options),
    }
}

fn node_id(path: &str) -> String {
    path.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn kind_label(kind: NodeKind) -> &'static str {
    match kind {
        NodeKind::Leaf => "leaf",
        NodeKind::Branch => "branch",
        NodeKind::Parallel => "parallel",
    }
}

fn render_dot(summary: &StateSummary, options: &VisualizationOptions) -> String {
    let mut out = String::from("digraph statechart {\n");
    if let Some(title) = &options.title {
        out.push_str(&format!("  label=\"{title}\";\n"));
    }
    out.push_str("  rankdir=TB;\n  node [shape=box, style=rounded];\n");
    dot_nodes(summary, options, &mut out);
    dot_edges(summary, &mut out);
    out.push_str("}\n");
    out
}

fn dot_nodes(node: &StateSummary, options: &VisualizationOptions, out: &mut String) {
    let mut attrs = vec![format!("label=\"{}\"", node.name)];
    match node.kind {
        NodeKind::Parallel => attrs.push("style=\"rounded,dashed\"".to_string()),
        NodeKind::Branch => attrs.push("peripheries=2".to_string()),
        NodeKind::Leaf => {}
    }
    if options.show_active && node.active {
        attrs.push("penwidth=2".to_string());
    }
    out.push_str(&format!("  {} [{}];\n", node_id(&node.path), attrs.join(", ")));
    for child in &node.children {
        dot_nodes(child, options, out);
    }
}

fn dot_edges(node: &StateSummary, out: &mut String) {
    for child in &node.children {
        let style = match &node.initial {
            Some(initial) if initial == &child.name => "",
            _ if node.kind == NodeKind::Parallel => "",
            _ => " [style=dashed]",
        };
        out.push_str(&format!(
            "  {} -> {}{};\n",
            node_id(&node.path),
            node_id(&child.path),
            style
        ));
        dot_edges(child, out);
    }
}

fn render_mermaid(summary: &StateSummary, options: &VisualizationOptions) -> String {
    let mut out = String::from("graph TD\n");
    if let Some(title) = &options.title {
        out.push_str(&format!("  %% {title}\n"));
    }
    mermaid_nodes(summary, options, &mut out);
    out
}

fn mermaid_nodes(node: &StateSummary, options: &VisualizationOptions, out: &mut String) {
    for child in &node.children {
        let marker = if options.show_active && child.active { "*" } else { "" };
        let shape = match child.kind {
            NodeKind::Parallel => format!("{}{{{{{}{}}}}}", node_id(&child.path), child.name, marker),
            _ => format!("{}[{}{}]", node_id(&child.path), child.name, marker),
        };
        out.push_str(&format!("  {} --> {}\n", node_id(&node.path), shape));
        mermaid_nodes(child, options, out);
    }
}

fn render_ascii(summary: &StateSummary, options: &VisualizationOptions) -> String {
    let mut out = String::new();
    if let Some(title) = &options.title {
        out.push_str(&format!("{title}\n"));
    }
    ascii_nodes(summary, options, 0, &mut out);
    out
}

fn ascii_nodes(node: &StateSummary, options: &VisualizationOptions, depth: usize, out: &mut String) {
    let marker = if options.show_active && node.active { " *" } else { "" };
    out.push_str(&format!(
        "{}{} ({}){}\n",
        "  ".repeat(depth),
        node.name,
        kind_label(node.kind),
        marker
    ));
    for child in &node.children {
        ascii_nodes(child, options, depth + 1, out);
    }
}
