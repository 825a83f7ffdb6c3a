//! The live statechart instance
//!
//! A [`Statechart`] is compiled from a [`Design`](crate::Design) and
//! processes events through a serialized send queue. Each event walks the
//! active tree from the root, evaluating matching handler chains;
//! transitions reshape the active set through ordered exit/enter
//! cascades; repeats and asynchronous tasks run off the queue and notify
//! subscribers directly.
//!
//! # Execution model
//!
//! One engine mutex guards all mutation. An event drain, a repeat tick,
//! and an async completion each hold it for their full evaluation, so the
//! runtime is single-threaded-cooperative: nothing interleaves inside an
//! evaluation, and suspension points (`wait`, exit/enter chains) keep the
//! engine exclusive. `send` enqueues without the engine lock, so calls
//! made while a drain is in flight line up behind it in FIFO order.
//!
//! Synchronous reads ([`is_in`](Statechart::is_in),
//! [`can`](Statechart::can), [`values`](Statechart::values), ...) never
//! touch the engine lock: every committed evaluation publishes a
//! [`Update`] snapshot that the read surface consumes.
//!
//! # Example
//!
//! ```rust
//! use serde_json::json;
//! use strata::{Design, Handler};
//!
//! # async fn example() -> strata::Result<()> {
//! let machine = Design::new()
//!     .data(json!({ "count": 0 }))
//!     .on(
//!         "INCREMENT",
//!         Handler::action(|d, _, _| {
//!             d["count"] = (d["count"].as_i64().unwrap_or(0) + 1).into()
//!         }),
//!     )
//!     .compile()?;
//!
//! machine.send("INCREMENT").await?;
//! machine.send("INCREMENT").await?;
//! assert_eq!(machine.data()["count"], 2);
//! # Ok(())
//! # }
//! ```

pub(crate) mod effects;
pub(crate) mod eval;
mod introspection;
mod subscribe;

pub use introspection::WhenEntry;
pub use subscribe::{Subscription, Update, UpdateStream};

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde_json::Value;

use crate::design::Design;
use crate::error::Result;
use crate::handler::{CompiledChain, Event};
use crate::tree::{StateSummary, StateTree};

static INSTANCE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Engine-owned mutable state, guarded by the engine mutex
pub(crate) struct Core {
    pub tree: StateTree,
    /// Committed user data; drafts clone from here and commit back
    pub data: Arc<Value>,
    /// Payload of the event in flight; null between events
    pub payload: Value,
    /// Scratch result flowing through handler evaluation
    pub result: Value,
    /// Whether the initial root transition has run
    pub started: bool,
}

pub(crate) type Callback = Arc<dyn Fn(&Update) + Send + Sync>;
pub(crate) type SubscriberMap = Arc<Mutex<HashMap<u64, Callback>>>;

pub(crate) struct Inner {
    pub id: String,
    pub design: Design,
    pub core: tokio::sync::Mutex<Core>,
    pub queue: Mutex<VecDeque<Event>>,
    pub snapshot: RwLock<Update>,
    pub subscribers: SubscriberMap,
    pub next_subscriber: AtomicU64,
    pub transition_limit: usize,
    /// Immutable `on` chains keyed by state path, for lock-free `can`
    pub event_index: HashMap<String, HashMap<String, CompiledChain>>,
    /// Blank structural summary; activity flags merge in per call
    pub skeleton: StateSummary,
}

/// A live statechart instance
///
/// `Statechart` is a cheap handle (`Clone` shares the same instance) and
/// is `Send + Sync`; its methods must still be treated as cooperative -
/// event processing is serialized internally.
///
/// Use [`fork`](Self::fork) for an independent instance built from the
/// same design.
#[derive(Clone)]
pub struct Statechart {
    pub(crate) inner: Arc<Inner>,
}

impl Statechart {
    pub(crate) fn new(design: Design) -> Result<Self> {
        let id = match &design.id {
            Some(configured) => format!("#{configured}"),
            None => format!("#state_{}", INSTANCE_COUNTER.fetch_add(1, Ordering::Relaxed)),
        };
        let tree = StateTree::build(&id, &design.root, &design.libraries)?;

        let mut event_index: HashMap<String, HashMap<String, CompiledChain>> = HashMap::new();
        for node in tree.dfs() {
            if !tree.nodes[node].on.is_empty() {
                event_index.insert(tree.nodes[node].path.clone(), tree.nodes[node].on.clone());
            }
        }
        let skeleton = tree.summarize(crate::tree::ROOT, &[]);

        let data = Arc::new(design.data.clone());
        let values = compute_values(&design, &data);
        let snapshot = Update {
            id: id.clone(),
            data: data.clone(),
            active: Vec::new(),
            values,
        };
        let transition_limit = design.transition_limit;

        tracing::debug!(id = %id, states = tree.nodes.len(), "compiled statechart");

        Ok(Statechart {
            inner: Arc::new(Inner {
                id,
                design,
                core: tokio::sync::Mutex::new(Core {
                    tree,
                    data,
                    payload: Value::Null,
                    result: Value::Null,
                    started: false,
                }),
                queue: Mutex::new(VecDeque::new()),
                snapshot: RwLock::new(snapshot),
                subscribers: Arc::new(Mutex::new(HashMap::new())),
                next_subscriber: AtomicU64::new(0),
                transition_limit,
                event_index,
                skeleton,
            }),
        })
    }

    /// Instance id: `#<design id>` or `#state_<n>`
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// The committed `data` value as of the latest update
    ///
    /// The returned handle stays valid (and unchanged) across later
    /// updates; re-read to observe new commits.
    pub fn data(&self) -> Arc<Value> {
        self.inner.snapshot.read().data.clone()
    }

    /// Paths of the active states, depth-first, as of the latest update
    pub fn active(&self) -> Vec<String> {
        self.inner.snapshot.read().active.clone()
    }

    /// Computed values as of the latest update
    pub fn values(&self) -> serde_json::Map<String, Value> {
        self.inner.snapshot.read().values.clone()
    }

    /// The design this instance was compiled from
    pub fn get_config(&self) -> Design {
        self.inner.design.clone()
    }

    /// Compile a fresh, independent instance from the same design
    ///
    /// The fork starts inactive with the design's original `data`;
    /// replaying the same event sequence on both instances yields the
    /// same `data`, `active`, and `values`.
    pub fn fork(&self) -> Result<Statechart> {
        self.inner.design.clone().compile()
    }

    /// Run the initial root transition if it has not run yet
    ///
    /// Activation goes through the normal transition machinery, so
    /// root-level entry handlers, repeats, and tasks fire. Calling
    /// [`send`](Self::send) first is equivalent: the drain starts the
    /// machine before processing its first event.
    pub async fn start(&self) -> Result<&Self> {
        self.drain().await?;
        Ok(self)
    }

    /// Submit an event with a null payload
    pub async fn send(&self, event: impl Into<String>) -> Result<&Self> {
        self.send_with(event, Value::Null).await
    }

    /// Submit an event with a payload
    ///
    /// The event is appended to the FIFO queue. The returned future
    /// resolves once the queue is empty: if another drain is already in
    /// flight, this call waits behind it rather than interleaving.
    ///
    /// # Errors
    ///
    /// [`ChartError::LoopDetected`](crate::ChartError::LoopDetected) and
    /// [`ChartError::Handler`](crate::ChartError::Handler) terminate the
    /// drain early; events still queued are picked up by the next drain.
    pub async fn send_with(&self, event: impl Into<String>, payload: Value) -> Result<&Self> {
        self.inner.queue.lock().push_back(Event::new(event, payload));
        self.drain().await?;
        Ok(self)
    }

    /// Serialized drain: one event at a time, each fully evaluated under
    /// the engine lock before the next is popped.
    async fn drain(&self) -> Result<()> {
        let inner = &self.inner;
        loop {
            let mut core = inner.core.lock().await;

            if !core.started {
                core.started = true;
                let started = eval::run_initial(inner, &mut core).await;
                publish(inner, &core);
                started?;
            }

            let Some(event) = inner.queue.lock().pop_front() else {
                break;
            };

            tracing::debug!(id = %inner.id, event = %event.name, "dispatching event");
            let outcome = eval::dispatch_event(inner, &mut core, &event).await;
            let update = publish(inner, &core);
            drop(core);

            match outcome {
                Ok(flags) => {
                    if flags.notify() {
                        notify_subscribers(inner, &update);
                    }
                }
                Err(e) => {
                    tracing::error!(id = %inner.id, event = %event.name, error = %e, "event drain terminated");
                    return Err(e);
                }
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for Statechart {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snapshot = self.inner.snapshot.read();
        f.debug_struct("Statechart")
            .field("id", &self.inner.id)
            .field("active", &snapshot.active)
            .finish()
    }
}

/// Recompute values, refresh the read snapshot, and return the update
pub(crate) fn publish(inner: &Inner, core: &Core) -> Update {
    let values = compute_values(&inner.design, &core.data);
    let active: Vec<String> = core
        .tree
        .active_dfs()
        .iter()
        .map(|&n| core.tree.nodes[n].path.clone())
        .collect();
    let update = Update {
        id: inner.id.clone(),
        data: core.data.clone(),
        active,
        values,
    };
    *inner.snapshot.write() = update.clone();
    update
}

/// Invoke subscriber callbacks outside the engine lock
pub(crate) fn notify_subscribers(inner: &Inner, update: &Update) {
    let callbacks: Vec<Callback> = inner.subscribers.lock().values().cloned().collect();
    for callback in callbacks {
        callback(update);
    }
}

fn compute_values(design: &Design, data: &Value) -> serde_json::Map<String, Value> {
    design
        .values
        .iter()
        .map(|(name, compute)| (name.clone(), compute(data)))
        .collect()
}
