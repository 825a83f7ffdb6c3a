//! Handler-chain evaluation and transition execution
//!
//! Each chain evaluates as one transaction over `data`: a draft is cloned
//! from the committed value, actions mutate the draft, and the draft
//! commits when the chain finishes. A failing action discards the draft.
//! The commit happens before any transition the chain requested, so exit
//! and entry handlers observe post-action data.
//!
//! The scratch `result` lives on the engine core: it resets at each event
//! dispatch and flows through `get` producers, guards, actions, and
//! target functions for the remainder of that dispatch.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::Value;
use tokio::task::AbortHandle;

use crate::active::{activate, deactivate};
use crate::error::{ChartError, Result};
use crate::handler::{ActionFn, CompiledChain, Event, TargetFn};
use crate::machine::{effects, Core, Inner};
use crate::tree::ROOT;

/// Notification flags for one completed dispatch
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct Flags {
    pub did_action: bool,
    pub did_transition: bool,
}

impl Flags {
    pub fn notify(&self) -> bool {
        self.did_action || self.did_transition
    }
}

/// Per-dispatch evaluation context
///
/// `transitioned` tracks structural transitions (quiet ones included) and
/// drives chain termination and propagation short-circuits;
/// `did_transition` only reflects notification-worthy transitions.
pub(crate) struct EvalCtx {
    pub event: String,
    pub did_action: bool,
    pub did_transition: bool,
    pub transitioned: bool,
    pub transitions: usize,
    /// Repeat handles taken from exited states; aborted once the
    /// evaluation settles (they cannot tick while the engine is locked)
    pub stopped_effects: Vec<AbortHandle>,
}

impl EvalCtx {
    pub fn new(event: impl Into<String>) -> Self {
        EvalCtx {
            event: event.into(),
            did_action: false,
            did_transition: false,
            transitioned: false,
            transitions: 0,
            stopped_effects: Vec::new(),
        }
    }

    pub fn flags(&self) -> Flags {
        Flags { did_action: self.did_action, did_transition: self.did_transition }
    }

    pub fn settle(&mut self) {
        for handle in self.stopped_effects.drain(..) {
            handle.abort();
        }
    }
}

/// Outcome of one chain evaluation
#[derive(Default)]
struct ChainOutcome {
    did_action: bool,
    transition: Option<TransitionRequest>,
}

struct TransitionRequest {
    target: TargetFn,
    quiet: bool,
}

/// Run the bootstrap root transition through the normal machinery
pub(crate) async fn run_initial(inner: &Arc<Inner>, core: &mut Core) -> Result<()> {
    let mut ctx = EvalCtx::new("@init");
    let outcome = run_transition(inner, core, "root", false, &mut ctx).await;
    ctx.settle();
    outcome
}

/// Dispatch one event against the active tree
pub(crate) async fn dispatch_event(
    inner: &Arc<Inner>,
    core: &mut Core,
    event: &Event,
) -> Result<Flags> {
    core.payload = event.payload.clone();
    core.result = Value::Null;
    let mut ctx = EvalCtx::new(&event.name);

    let outcome = handle_event_on_state(inner, core, ROOT, event, &mut ctx).await;

    core.payload = Value::Null;
    core.result = Value::Null;
    ctx.settle();
    outcome?;
    Ok(ctx.flags())
}

/// Recursive propagation: `on[event]`, then `on_event`, then active
/// children in declaration order, stopping once a transition fires.
fn handle_event_on_state<'a>(
    inner: &'a Arc<Inner>,
    core: &'a mut Core,
    node: usize,
    event: &'a Event,
    ctx: &'a mut EvalCtx,
) -> BoxFuture<'a, Result<()>> {
    Box::pin(async move {
        if !core.tree.nodes[node].active {
            return Ok(());
        }

        if let Some(chain) = core.tree.nodes[node].on.get(&event.name).cloned() {
            evaluate_and_apply(inner, core, node, &chain, ctx).await?;
            if ctx.transitioned {
                return Ok(());
            }
        }

        if let Some(chain) = core.tree.nodes[node].on_event.clone() {
            evaluate_and_apply(inner, core, node, &chain, ctx).await?;
            if ctx.transitioned {
                return Ok(());
            }
        }

        let children = core.tree.nodes[node].children.clone();
        for child in children {
            if !core.tree.nodes[child].active {
                continue;
            }
            handle_event_on_state(inner, core, child, event, ctx).await?;
            if ctx.transitioned {
                return Ok(());
            }
        }
        Ok(())
    })
}

/// Evaluate a chain, then perform any transition it requested
pub(crate) fn evaluate_and_apply<'a>(
    inner: &'a Arc<Inner>,
    core: &'a mut Core,
    node: usize,
    chain: &'a CompiledChain,
    ctx: &'a mut EvalCtx,
) -> BoxFuture<'a, Result<()>> {
    Box::pin(async move {
        let outcome = evaluate_chain(inner, core, node, chain).await?;
        if outcome.did_action {
            ctx.did_action = true;
        }
        if let Some(request) = outcome.transition {
            let path = (request.target)(&core.data, &core.payload, &core.result);
            run_transition(inner, core, &path, request.quiet, ctx).await?;
        }
        Ok(())
    })
}

async fn evaluate_chain(
    inner: &Arc<Inner>,
    core: &mut Core,
    node: usize,
    chain: &CompiledChain,
) -> Result<ChainOutcome> {
    let mut draft = (*core.data).clone();
    let payload = core.payload.clone();
    let mut outcome = ChainOutcome::default();

    'items: for item in chain.iter() {
        for get in &item.get {
            let next = get(&draft, &payload, &core.result);
            core.result = next;
        }

        let mut passed = item.when.iter().all(|cond| cond(&draft, &payload, &core.result));
        if passed && !item.unless.is_empty() {
            passed = !item.unless.iter().any(|cond| cond(&draft, &payload, &core.result));
        }
        if passed && !item.when_any.is_empty() {
            passed = item.when_any.iter().any(|cond| cond(&draft, &payload, &core.result));
        }

        // The pause sits between guard evaluation and branch execution;
        // queued events wait behind the engine lock meanwhile.
        if let Some(wait) = &item.wait {
            let secs = wait(&draft, &payload, &core.result);
            if secs > 0.0 {
                tokio::time::sleep(Duration::from_secs_f64(secs)).await;
            }
        }

        if passed {
            for action in &item.then {
                run_action(core, node, action, &mut draft, &payload)?;
            }
            if !item.then.is_empty() {
                outcome.did_action = true;
            }
            for action in &item.quietly {
                run_action(core, node, action, &mut draft, &payload)?;
            }
            if let Some(send) = &item.send {
                let event = send(&draft, &payload, &core.result);
                inner.queue.lock().push_back(event);
            }
            if let Some(to) = &item.to {
                outcome.transition = Some(TransitionRequest { target: to.clone(), quiet: false });
                break 'items;
            }
            if let Some(to) = &item.quietly_to {
                outcome.transition = Some(TransitionRequest { target: to.clone(), quiet: true });
                break 'items;
            }
        } else {
            for action in &item.else_then {
                run_action(core, node, action, &mut draft, &payload)?;
            }
            if !item.else_then.is_empty() {
                outcome.did_action = true;
            }
            if let Some(send) = &item.else_send {
                let event = send(&draft, &payload, &core.result);
                inner.queue.lock().push_back(event);
            }
            if let Some(to) = &item.else_to {
                outcome.transition = Some(TransitionRequest { target: to.clone(), quiet: false });
                break 'items;
            }
        }
    }

    core.data = Arc::new(draft);
    Ok(outcome)
}

fn run_action(
    core: &Core,
    node: usize,
    action: &ActionFn,
    draft: &mut Value,
    payload: &Value,
) -> Result<()> {
    action(draft, payload, &core.result).map_err(|error| ChartError::Handler {
        state: core.tree.nodes[node].path.clone(),
        error,
    })
}

/// Perform a transition: resolve the target, reshape the active set, and
/// run the exit/enter cascades.
pub(crate) fn run_transition<'a>(
    inner: &'a Arc<Inner>,
    core: &'a mut Core,
    target: &'a str,
    quiet: bool,
    ctx: &'a mut EvalCtx,
) -> BoxFuture<'a, Result<()>> {
    Box::pin(async move {
        let (path, previous, restore) = if let Some(stripped) = target.strip_suffix(".previous") {
            (stripped, true, false)
        } else if let Some(stripped) = target.strip_suffix(".restore") {
            (stripped, false, true)
        } else {
            (target, false, false)
        };

        let targets = core.tree.find_targets(path);
        let Some(&resolved) = targets.last() else {
            tracing::warn!(id = %inner.id, target = %target, "no state matches transition target; skipping");
            return Ok(());
        };

        ctx.transitions += 1;
        if ctx.transitions > inner.transition_limit {
            return Err(ChartError::LoopDetected {
                event: ctx.event.clone(),
                limit: inner.transition_limit,
            });
        }

        let path_down = core.tree.segments_below_root(resolved);
        let before = core.tree.active_dfs();
        deactivate(&mut core.tree, ROOT);
        activate(&mut core.tree, ROOT, &path_down, previous, restore)?;
        let after = core.tree.active_dfs();

        let exited: Vec<usize> = before.iter().copied().filter(|n| !after.contains(n)).collect();
        let entered: Vec<usize> = after.iter().copied().filter(|n| !before.contains(n)).collect();

        if !quiet {
            ctx.did_transition = true;
        }
        ctx.transitioned = true;
        tracing::debug!(
            id = %inner.id,
            target = %path,
            exited = exited.len(),
            entered = entered.len(),
            "transition"
        );

        // Stop repeats on every exited state before any exit handler
        // runs. Handles are aborted when the evaluation settles; the
        // engine lock keeps them from ticking in the meantime.
        for &node in &exited {
            if let Some(handle) = core.tree.nodes[node].effect.take() {
                ctx.stopped_effects.push(handle);
            }
        }

        // A nested transition inside an exit or entry chain takes over
        // the cascade; the rest of this transition is abandoned.
        let checkpoint = ctx.transitions;

        for &node in &exited {
            if let Some(chain) = core.tree.nodes[node].on_exit.clone() {
                evaluate_and_apply(inner, core, node, &chain, ctx).await?;
                if ctx.transitions != checkpoint {
                    return Ok(());
                }
            }
        }

        for &node in &entered {
            if core.tree.nodes[node].repeat.is_some() {
                effects::start_repeat(inner, core, node);
            }
            if let Some(chain) = core.tree.nodes[node].on_enter.clone() {
                evaluate_and_apply(inner, core, node, &chain, ctx).await?;
                if ctx.transitions != checkpoint {
                    return Ok(());
                }
            }
            if core.tree.nodes[node].task.is_some() {
                effects::launch_task(inner, core, node);
            }
        }

        Ok(())
    })
}
