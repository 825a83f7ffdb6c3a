//! Activation and deactivation cascades
//!
//! Transitions reshape the active set in two sweeps: the whole tree is
//! deactivated (recording branch histories), then re-activated from the
//! root along the target path. The engine diffs the before/after active
//! lists to decide which exit and entry handlers to run.
//!
//! Re-entry modifiers:
//!
//! - `previous` - the deepest explicitly-named branch re-activates its
//!   last active child instead of its initial; deeper levels reset.
//! - `restore` - history applies at every branch below the target,
//!   restoring the full previously-active subtree.

use crate::error::{ChartError, Result};
use crate::tree::{NodeKind, StateTree};

/// Activate a subtree.
///
/// `path_down` carries the remaining explicit segments of the transition
/// target. Branch nodes consume its head; parallel nodes route the tail
/// into the matching child only, while every child receives the flags.
pub(crate) fn activate(
    tree: &mut StateTree,
    node: usize,
    path_down: &[String],
    previous: bool,
    restore: bool,
) -> Result<()> {
    tree.nodes[node].active = true;
    match tree.nodes[node].kind {
        NodeKind::Leaf => Ok(()),
        NodeKind::Parallel => {
            let children = tree.nodes[node].children.clone();
            let head_child = path_down.first().and_then(|h| tree.child_named(node, h));
            for child in children {
                if Some(child) == head_child {
                    activate(tree, child, &path_down[1..], previous, restore)?;
                } else {
                    activate(tree, child, &[], previous, restore)?;
                }
            }
            Ok(())
        }
        NodeKind::Branch => {
            let (chosen, consumed_path) = match path_down.first() {
                Some(head) => {
                    let child = tree.child_named(node, head).ok_or_else(|| {
                        ChartError::UnknownTarget {
                            path: format!("{}.{head}", tree.nodes[node].path),
                        }
                    })?;
                    (child, true)
                }
                None if previous || restore => {
                    let n = &tree.nodes[node];
                    (n.history.or(n.initial).expect("branch node has initial"), false)
                }
                None => (tree.nodes[node].initial.expect("branch node has initial"), false),
            };
            tree.nodes[node].history = Some(chosen);
            let rest = if consumed_path { &path_down[1..] } else { &[] };
            // `previous` applies once, at the first branch past the
            // explicit path; `restore` keeps applying all the way down.
            let next_previous = if consumed_path { previous } else { false };
            activate(tree, chosen, rest, next_previous, restore)
        }
    }
}

/// Deactivate a subtree, recording the last active child of every branch
/// node on the way so `previous`/`restore` re-entries see it.
pub(crate) fn deactivate(tree: &mut StateTree, node: usize) {
    if tree.nodes[node].kind == NodeKind::Branch {
        let active_child = tree.nodes[node]
            .children
            .iter()
            .copied()
            .find(|&c| tree.nodes[c].active);
        if let Some(child) = active_child {
            tree.nodes[node].history = Some(child);
        }
    }
    tree.nodes[node].active = false;
    let children = tree.nodes[node].children.clone();
    for child in children {
        deactivate(tree, child);
    }
}
