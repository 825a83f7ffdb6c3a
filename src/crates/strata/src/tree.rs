//! The compiled state tree
//!
//! [`Design::compile`](crate::Design::compile) turns the declarative
//! state configuration into an arena of [`StateNode`]s. Structural fields
//! (name, path, kind, children, handler chains) are fixed at build time;
//! the runtime fields (`active`, `history`, the repeat handle) are
//! mutated only by the engine.
//!
//! Nodes are addressed by arena index. Parent links are plain indices -
//! back-references, not ownership - so the tree is cycle-free by
//! construction. Child order follows declaration order and is observable
//! through event propagation and the depth-first `active` list.

use std::collections::HashMap;

use serde::Serialize;
use tokio::task::AbortHandle;

use crate::design::StateConfig;
use crate::error::{ChartError, Result};
use crate::handler::{compile_chain, CompiledChain, Libraries, Slot, TaskFn, TimeFn};

/// How a node treats its children
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    /// No children
    Leaf,
    /// Has an `initial` child; exactly one child active at a time
    Branch,
    /// Children but no `initial`; all children active together
    Parallel,
}

/// Compiled repeat effect attached to a node
#[derive(Clone)]
pub(crate) struct CompiledRepeat {
    pub delay: Option<TimeFn>,
    pub on_repeat: CompiledChain,
}

/// Compiled asynchronous task attached to a node
#[derive(Clone)]
pub(crate) struct CompiledTask {
    pub run: TaskFn,
    pub on_resolve: CompiledChain,
    pub on_reject: Option<CompiledChain>,
}

/// One node in the compiled tree
pub(crate) struct StateNode {
    pub name: String,
    /// Dot-joined path from the instance id: `#id.root.a.b`
    pub path: String,
    pub kind: NodeKind,
    pub parent: Option<usize>,
    /// Child indices in declaration order
    pub children: Vec<usize>,
    /// Index of the initially-active child (branch nodes only)
    pub initial: Option<usize>,
    pub on: HashMap<String, CompiledChain>,
    pub on_event: Option<CompiledChain>,
    pub on_enter: Option<CompiledChain>,
    pub on_exit: Option<CompiledChain>,
    pub repeat: Option<CompiledRepeat>,
    pub task: Option<CompiledTask>,
    // Runtime fields, engine-owned
    pub active: bool,
    /// Last active child (branch nodes), seeded with `initial`
    pub history: Option<usize>,
    /// Abort handle for the running repeat effect
    pub effect: Option<AbortHandle>,
}

/// Arena-backed state tree; index 0 is the root
pub(crate) struct StateTree {
    pub nodes: Vec<StateNode>,
}

pub(crate) const ROOT: usize = 0;

impl StateTree {
    /// Build the tree from the root state configuration
    pub fn build(instance_id: &str, root: &StateConfig, libs: &Libraries) -> Result<StateTree> {
        let mut tree = StateTree { nodes: Vec::new() };
        let root_path = format!("{instance_id}.root");
        tree.add_state("root", root_path, None, root, libs)?;
        Ok(tree)
    }

    fn add_state(
        &mut self,
        name: &str,
        path: String,
        parent: Option<usize>,
        config: &StateConfig,
        libs: &Libraries,
    ) -> Result<usize> {
        let index = self.nodes.len();
        let mut on = HashMap::new();
        for (event, handler) in &config.on {
            on.insert(event.clone(), compile_chain(handler, libs)?);
        }
        let compile_opt = |h: &Option<crate::handler::Handler>| -> Result<Option<CompiledChain>> {
            h.as_ref().map(|h| compile_chain(h, libs)).transpose()
        };
        let repeat = match &config.repeat {
            Some(r) => Some(CompiledRepeat {
                delay: match &r.delay {
                    Some(Slot::Fn(f)) => Some(f.clone()),
                    Some(Slot::Named(n)) => Some(
                        libs.times.get(n).cloned().ok_or_else(|| ChartError::UnknownReference {
                            library: "times",
                            name: n.clone(),
                        })?,
                    ),
                    None => None,
                },
                on_repeat: compile_chain(&r.on_repeat, libs)?,
            }),
            None => None,
        };
        let task = match &config.task {
            Some(t) => {
                t.validate()?;
                Some(CompiledTask {
                    run: match &t.task {
                        Slot::Fn(f) => f.clone(),
                        Slot::Named(n) => libs.tasks.get(n).cloned().ok_or_else(|| {
                            ChartError::UnknownReference { library: "tasks", name: n.clone() }
                        })?,
                    },
                    on_resolve: compile_chain(
                        t.on_resolve.as_ref().expect("validated above"),
                        libs,
                    )?,
                    on_reject: compile_opt(&t.on_reject)?,
                })
            }
            None => None,
        };

        self.nodes.push(StateNode {
            name: name.to_string(),
            path: path.clone(),
            kind: NodeKind::Leaf,
            parent,
            children: Vec::new(),
            initial: None,
            on,
            on_event: compile_opt(&config.on_event)?,
            on_enter: compile_opt(&config.on_enter)?,
            on_exit: compile_opt(&config.on_exit)?,
            repeat,
            task,
            active: false,
            history: None,
            effect: None,
        });

        let mut children = Vec::with_capacity(config.states.len());
        for (child_name, child_config) in &config.states {
            if config.states.iter().filter(|(n, _)| n == child_name).count() > 1 {
                return Err(ChartError::Design(format!(
                    "duplicate state name '{child_name}' under '{path}'"
                )));
            }
            let child_path = format!("{path}.{child_name}");
            let child = self.add_state(child_name, child_path, Some(index), child_config, libs)?;
            children.push(child);
        }

        let initial = match &config.initial {
            Some(initial_name) => {
                let found = children
                    .iter()
                    .copied()
                    .find(|&c| self.nodes[c].name == *initial_name);
                match found {
                    Some(c) => Some(c),
                    None => {
                        return Err(ChartError::Design(format!(
                            "initial state '{initial_name}' is not a child of '{path}'"
                        )))
                    }
                }
            }
            None => None,
        };

        let kind = if initial.is_some() {
            NodeKind::Branch
        } else if !children.is_empty() {
            NodeKind::Parallel
        } else {
            NodeKind::Leaf
        };

        let node = &mut self.nodes[index];
        node.children = children;
        node.initial = initial;
        node.kind = kind;
        node.history = initial;
        Ok(index)
    }

    /// Look up a direct child by name
    pub fn child_named(&self, node: usize, name: &str) -> Option<usize> {
        self.nodes[node]
            .children
            .iter()
            .copied()
            .find(|&c| self.nodes[c].name == name)
    }

    /// All node indices in depth-first declaration order
    pub fn dfs(&self) -> Vec<usize> {
        let mut out = Vec::with_capacity(self.nodes.len());
        self.push_dfs(ROOT, &mut out, false);
        out
    }

    /// Active node indices in depth-first declaration order
    pub fn active_dfs(&self) -> Vec<usize> {
        let mut out = Vec::new();
        self.push_dfs(ROOT, &mut out, true);
        out
    }

    fn push_dfs(&self, node: usize, out: &mut Vec<usize>, active_only: bool) {
        if active_only && !self.nodes[node].active {
            return;
        }
        out.push(node);
        for &child in &self.nodes[node].children {
            self.push_dfs(child, out, active_only);
        }
    }

    /// Resolve a partial path to matching nodes, shallowest first
    ///
    /// A node matches when its path ends with `"." + path` or equals the
    /// instance-qualified path exactly. Matches are ordered by depth,
    /// with declaration order breaking ties among equally-deep matches,
    /// so callers picking the last match always get a deepest node.
    pub fn find_targets(&self, path: &str) -> Vec<usize> {
        let suffix = format!(".{}", path.trim_start_matches('.'));
        let mut matches: Vec<usize> = self
            .dfs()
            .into_iter()
            .filter(|&n| {
                let node_path = &self.nodes[n].path;
                node_path == path || node_path.ends_with(&suffix)
            })
            .collect();
        matches.sort_by_key(|&n| self.depth(n));
        matches
    }

    fn depth(&self, node: usize) -> usize {
        let mut depth = 0;
        let mut cursor = node;
        while let Some(parent) = self.nodes[cursor].parent {
            depth += 1;
            cursor = parent;
        }
        depth
    }

    /// Path segments below the root for a node (`#id.root.a.b` → `[a, b]`)
    pub fn segments_below_root(&self, node: usize) -> Vec<String> {
        let mut segments = Vec::new();
        let mut cursor = node;
        while let Some(parent) = self.nodes[cursor].parent {
            segments.push(self.nodes[cursor].name.clone());
            cursor = parent;
        }
        segments.reverse();
        segments
    }
}

/// Serializable snapshot of the tree structure
///
/// Mirrors the compiled tree with the per-node activity flags from the
/// latest update; handler chains and functions are omitted.
#[derive(Clone, Debug, Serialize)]
pub struct StateSummary {
    /// Leaf segment of the path
    pub name: String,
    /// Full instance-qualified path
    pub path: String,
    /// Branch, parallel, or leaf
    pub kind: NodeKind,
    /// Name of the initially-active child, if any
    pub initial: Option<String>,
    /// Whether the node was active at snapshot time
    pub active: bool,
    /// Children in declaration order
    pub children: Vec<StateSummary>,
}

impl StateTree {
    pub(crate) fn summarize(&self, node: usize, active_paths: &[String]) -> StateSummary {
        let n = &self.nodes[node];
        StateSummary {
            name: n.name.clone(),
            path: n.path.clone(),
            kind: n.kind,
            initial: n.initial.map(|c| self.nodes[c].name.clone()),
            active: active_paths.iter().any(|p| p == &n.path),
            children: n
                .children
                .iter()
                .map(|&c| self.summarize(c, active_paths))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::design::{Design, StateConfig};

    fn tree_of(design: Design) -> StateTree {
        StateTree::build("#test", &design.root, &design.libraries).unwrap()
    }

    #[test]
    fn classification_follows_initial_and_children() {
        let tree = tree_of(
            Design::new()
                .initial("branchy")
                .state(
                    "branchy",
                    StateConfig::new()
                        .initial("x")
                        .state("x", StateConfig::new())
                        .state("y", StateConfig::new()),
                )
                .state(
                    "para",
                    StateConfig::new()
                        .state("m", StateConfig::new())
                        .state("n", StateConfig::new()),
                ),
        );

        let kind_of = |path: &str| {
            let n = *tree.find_targets(path).last().unwrap();
            tree.nodes[n].kind
        };
        assert_eq!(kind_of("root"), NodeKind::Branch);
        assert_eq!(kind_of("branchy"), NodeKind::Branch);
        assert_eq!(kind_of("para"), NodeKind::Parallel);
        assert_eq!(kind_of("x"), NodeKind::Leaf);
    }

    #[test]
    fn paths_are_instance_qualified() {
        let tree = tree_of(
            Design::new()
                .initial("a")
                .state("a", StateConfig::new().initial("b").state("b", StateConfig::new())),
        );
        let b = *tree.find_targets("a.b").last().unwrap();
        assert_eq!(tree.nodes[b].path, "#test.root.a.b");
        assert_eq!(tree.segments_below_root(b), ["a", "b"]);
    }

    #[test]
    fn history_is_seeded_with_initial() {
        let tree = tree_of(
            Design::new()
                .initial("a")
                .state(
                    "a",
                    StateConfig::new()
                        .initial("one")
                        .state("one", StateConfig::new())
                        .state("two", StateConfig::new()),
                ),
        );
        let a = *tree.find_targets("a").last().unwrap();
        let one = *tree.find_targets("a.one").last().unwrap();
        assert_eq!(tree.nodes[a].history, Some(one));
    }

    #[test]
    fn find_targets_prefers_deepest_regardless_of_declaration_order() {
        // Two states named "b" at different depths. Either declaration
        // order must resolve to the deeper one.
        let shallow_first = tree_of(
            Design::new()
                .initial("a")
                .state(
                    "a",
                    StateConfig::new()
                        .initial("b")
                        .state("b", StateConfig::new())
                        .state(
                            "c",
                            StateConfig::new().initial("b").state("b", StateConfig::new()),
                        ),
                ),
        );
        let targets = shallow_first.find_targets("b");
        assert_eq!(targets.len(), 2);
        let last = *targets.last().unwrap();
        assert_eq!(shallow_first.nodes[last].path, "#test.root.a.c.b");

        // Deep duplicate declared in an earlier sibling: plain
        // depth-first order would visit it before the shallow one.
        let deep_first = tree_of(
            Design::new()
                .initial("a")
                .state(
                    "a",
                    StateConfig::new()
                        .initial("c")
                        .state(
                            "c",
                            StateConfig::new().initial("b").state("b", StateConfig::new()),
                        )
                        .state("b", StateConfig::new()),
                ),
        );
        let targets = deep_first.find_targets("b");
        assert_eq!(targets.len(), 2);
        let last = *targets.last().unwrap();
        assert_eq!(deep_first.nodes[last].path, "#test.root.a.c.b");
    }

    #[test]
    fn find_targets_breaks_depth_ties_by_declaration_order() {
        // Equal-depth duplicates under parallel siblings: the later
        // declaration wins.
        let tree = tree_of(
            Design::new()
                .state(
                    "p",
                    StateConfig::new().initial("x").state("x", StateConfig::new()),
                )
                .state(
                    "q",
                    StateConfig::new().initial("x").state("x", StateConfig::new()),
                ),
        );
        let targets = tree.find_targets("x");
        assert_eq!(targets.len(), 2);
        assert_eq!(tree.nodes[targets[0]].path, "#test.root.p.x");
        assert_eq!(tree.nodes[*targets.last().unwrap()].path, "#test.root.q.x");
    }

    #[test]
    fn dfs_follows_declaration_order() {
        let tree = tree_of(
            Design::new()
                .state("z", StateConfig::new())
                .state("a", StateConfig::new())
                .state("m", StateConfig::new()),
        );
        let names: Vec<&str> = tree.dfs().iter().map(|&n| tree.nodes[n].name.as_str()).collect();
        assert_eq!(names, ["root", "z", "a", "m"]);
    }
}
