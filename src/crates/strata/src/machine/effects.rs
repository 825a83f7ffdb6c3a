//! Timed repeats and asynchronous task completion
//!
//! Both effects evaluate their handler chains *off the send queue*: they
//! take the engine lock directly, keep their own transition accounting,
//! and notify subscribers immediately when their evaluation did
//! something. They never consume slots in an in-flight drain's loop
//! guard.
//!
//! Spawned tasks hold only a weak reference to the instance; dropping the
//! last [`Statechart`](crate::Statechart) handle lets every effect task
//! wind down on its next tick.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::time::{Instant, MissedTickBehavior};

use crate::handler::CompiledChain;
use crate::machine::{eval, notify_subscribers, publish, Core, Inner};

/// Tick period of a repeat with no delay, in seconds
pub(crate) const FRAME_SECS: f64 = 1.0 / 60.0;

/// Floor for computed repeat delays, in **milliseconds**
///
/// A repeat delay schedules at `max(MIN_INTERVAL_MS, secs * 1000)` ms.
/// The floor is 1/60 of a millisecond, not of a second; sub-millisecond
/// delays therefore clamp to ~16.7 µs rather than a frame. Kept as-is -
/// designs may depend on the resulting cadence.
pub(crate) const MIN_INTERVAL_MS: f64 = 1.0 / 60.0;

/// Start the repeat effect for a freshly-entered state
///
/// The delay function is evaluated once, at start, against the entering
/// evaluation's data, payload, and result.
pub(crate) fn start_repeat(inner: &Arc<Inner>, core: &mut Core, node: usize) {
    let Some(repeat) = core.tree.nodes[node].repeat.clone() else {
        return;
    };
    let period_ms = match &repeat.delay {
        None => FRAME_SECS * 1000.0,
        Some(delay) => (delay(&core.data, &core.payload, &core.result) * 1000.0).max(MIN_INTERVAL_MS),
    };

    let weak = Arc::downgrade(inner);
    let chain = repeat.on_repeat.clone();
    let handle = tokio::spawn(async move {
        let started = Instant::now();
        let mut last = started;
        let mut ticker = tokio::time::interval(Duration::from_secs_f64(period_ms / 1000.0));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; the cadence counts from here.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let Some(inner) = weak.upgrade() else {
                break;
            };
            let now = Instant::now();
            let tick = json!({
                "interval": (now - last).as_secs_f64() * 1000.0,
                "elapsed": (now - started).as_secs_f64() * 1000.0,
            });
            last = now;
            if !run_off_thread(&inner, node, &chain, tick, "repeat").await {
                break;
            }
        }
    });
    core.tree.nodes[node].effect = Some(handle.abort_handle());
}

/// Launch the async task of a freshly-entered state
///
/// The future is created under the engine lock (so it sees entry-time
/// data) and awaited on its own task. Completions are dropped when the
/// owning state has already exited; rejections without a reject handler
/// are dropped with a debug trace.
pub(crate) fn launch_task(inner: &Arc<Inner>, core: &mut Core, node: usize) {
    let Some(task) = core.tree.nodes[node].task.clone() else {
        return;
    };
    let future = (task.run)(&core.data, &core.payload, &core.result);
    let weak = Arc::downgrade(inner);
    tokio::spawn(async move {
        let settled = future.await;
        let Some(inner) = weak.upgrade() else {
            return;
        };
        match settled {
            Ok(value) => {
                run_off_thread(&inner, node, &task.on_resolve, value, "resolve").await;
            }
            Err(value) => match &task.on_reject {
                Some(chain) => {
                    run_off_thread(&inner, node, chain, value, "reject").await;
                }
                None => {
                    tracing::debug!(id = %inner.id, node, "task rejected with no reject handler; dropping");
                }
            },
        }
    });
}

/// Evaluate a chain outside the send queue.
///
/// Returns `false` when the owning state is no longer active or the
/// evaluation failed - either way the caller stops.
async fn run_off_thread(
    inner: &Arc<Inner>,
    node: usize,
    chain: &CompiledChain,
    result: Value,
    kind: &'static str,
) -> bool {
    let mut core = inner.core.lock().await;
    if !core.tree.nodes[node].active {
        return false;
    }
    core.result = result;

    let mut ctx = eval::EvalCtx::new(kind);
    let outcome = eval::evaluate_and_apply(inner, &mut core, node, chain, &mut ctx).await;
    ctx.settle();
    match outcome {
        Ok(()) => {
            let update = publish(inner, &core);
            let flags = ctx.flags();
            drop(core);
            if flags.notify() {
                notify_subscribers(inner, &update);
            }
            true
        }
        Err(error) => {
            publish(inner, &core);
            tracing::error!(id = %inner.id, kind, error = %error, "off-thread handler failed");
            false
        }
    }
}
