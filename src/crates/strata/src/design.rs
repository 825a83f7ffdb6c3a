//! Declarative statechart designs
//!
//! A [`Design`] describes a statechart's shape: its nested states, the
//! events each state handles, entry/exit behavior, timed repeats,
//! asynchronous tasks, named function libraries, and computed values.
//! Designs are plain values - build one with the fluent API, then
//! [`compile`](Design::compile) it into a live
//! [`Statechart`](crate::Statechart).
//!
//! # Quick start
//!
//! ```rust
//! use serde_json::json;
//! use strata::{Design, Handler, HandlerItem, StateConfig};
//!
//! # async fn example() -> strata::Result<()> {
//! let machine = Design::new()
//!     .id("toggle")
//!     .data(json!({ "flips": 0 }))
//!     .initial("low")
//!     .state(
//!         "low",
//!         StateConfig::new().on(
//!             "TOGGLE",
//!             Handler::chain([
//!                 Handler::action(|d, _, _| {
//!                     d["flips"] = (d["flips"].as_i64().unwrap_or(0) + 1).into()
//!                 }),
//!                 Handler::from(HandlerItem::new().to("high")),
//!             ]),
//!         ),
//!     )
//!     .state(
//!         "high",
//!         StateConfig::new().on("TOGGLE", HandlerItem::new().to("low")),
//!     )
//!     .compile()?;
//!
//! machine.send("TOGGLE").await?;
//! assert!(machine.is_in(["high"]));
//! # Ok(())
//! # }
//! ```
//!
//! # State classification
//!
//! A state with an `initial` child is a **branch** - exactly one child is
//! active at a time. A state with children but no `initial` is
//! **parallel** - all children are active together. A state without
//! children is a **leaf**.
//!
//! # Libraries
//!
//! Handlers may reference named functions registered on the design:
//! [`action`](Design::action), [`condition`](Design::condition),
//! [`result`](Design::result), [`time`](Design::time), and
//! [`task`](Design::task). References are resolved once at compile time;
//! unknown names fail compilation.

use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;

use crate::error::{ChartError, Result};
use crate::handler::{
    ActionFn, ComputeFn, CondFn, Handler, Libraries, ResultFn, Slot, TaskFn, TimeFn,
};
use crate::machine::Statechart;

/// Transitions allowed within one event drain before the engine declares
/// a loop
pub const DEFAULT_TRANSITION_LIMIT: usize = 200;

/// A declarative statechart design
///
/// Cloning a design is cheap: handler functions are reference-counted.
/// [`Statechart::get_config`](crate::Statechart::get_config) returns a
/// clone of the design an instance was compiled from, and compiling the
/// same design twice yields independent instances.
#[derive(Clone)]
pub struct Design {
    pub(crate) id: Option<String>,
    pub(crate) data: Value,
    pub(crate) root: StateConfig,
    pub(crate) libraries: Libraries,
    pub(crate) values: Vec<(String, ComputeFn)>,
    pub(crate) transition_limit: usize,
}

impl Default for Design {
    fn default() -> Self {
        Self::new()
    }
}

impl Design {
    /// Start an empty design
    pub fn new() -> Self {
        Design {
            id: None,
            data: Value::Null,
            root: StateConfig::new(),
            libraries: Libraries::default(),
            values: Vec::new(),
            transition_limit: DEFAULT_TRANSITION_LIMIT,
        }
    }

    /// Set the design id; the instance id becomes `#<id>`
    ///
    /// Without an id, instances are numbered `#state_0`, `#state_1`, ...
    /// in creation order.
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Set the initial `data` value
    pub fn data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    /// Name the initially-active child of the root
    pub fn initial(mut self, name: impl Into<String>) -> Self {
        self.root.initial = Some(name.into());
        self
    }

    /// Declare a child state of the root
    ///
    /// Declaration order is preserved and observable: children are
    /// visited in this order during event propagation.
    pub fn state(mut self, name: impl Into<String>, config: StateConfig) -> Self {
        self.root.states.push((name.into(), config));
        self
    }

    /// Attach a handler for an event on the root
    pub fn on(mut self, event: impl Into<String>, handler: impl Into<Handler>) -> Self {
        self.root.on.push((event.into(), handler.into()));
        self
    }

    /// Attach a handler that runs for every event reaching the root
    pub fn on_event(mut self, handler: impl Into<Handler>) -> Self {
        self.root.on_event = Some(handler.into());
        self
    }

    /// Attach a handler run when the root is entered
    pub fn on_enter(mut self, handler: impl Into<Handler>) -> Self {
        self.root.on_enter = Some(handler.into());
        self
    }

    /// Attach a handler run when the root is exited
    pub fn on_exit(mut self, handler: impl Into<Handler>) -> Self {
        self.root.on_exit = Some(handler.into());
        self
    }

    /// Attach a timed repeat to the root
    pub fn repeat(mut self, repeat: RepeatConfig) -> Self {
        self.root.repeat = Some(repeat);
        self
    }

    /// Attach an asynchronous task to the root
    pub fn invoke(mut self, task: TaskConfig) -> Self {
        self.root.task = Some(task);
        self
    }

    /// Register a named action in the `actions` library
    pub fn action(
        mut self,
        name: impl Into<String>,
        f: impl Fn(&mut Value, &Value, &Value) + Send + Sync + 'static,
    ) -> Self {
        let f: ActionFn = Arc::new(move |d, p, r| {
            f(d, p, r);
            Ok(())
        });
        self.libraries.actions.insert(name.into(), f);
        self
    }

    /// Register a named fallible action
    pub fn try_action<E: fmt::Display>(
        mut self,
        name: impl Into<String>,
        f: impl Fn(&mut Value, &Value, &Value) -> std::result::Result<(), E> + Send + Sync + 'static,
    ) -> Self {
        let f: ActionFn = Arc::new(move |d, p, r| f(d, p, r).map_err(|e| e.to_string()));
        self.libraries.actions.insert(name.into(), f);
        self
    }

    /// Register a named condition in the `conditions` library
    pub fn condition(
        mut self,
        name: impl Into<String>,
        f: impl Fn(&Value, &Value, &Value) -> bool + Send + Sync + 'static,
    ) -> Self {
        let f: CondFn = Arc::new(f);
        self.libraries.conditions.insert(name.into(), f);
        self
    }

    /// Register a named result producer in the `results` library
    pub fn result(
        mut self,
        name: impl Into<String>,
        f: impl Fn(&Value, &Value, &Value) -> Value + Send + Sync + 'static,
    ) -> Self {
        let f: ResultFn = Arc::new(f);
        self.libraries.results.insert(name.into(), f);
        self
    }

    /// Register a named time producer (seconds) in the `times` library
    pub fn time(
        mut self,
        name: impl Into<String>,
        f: impl Fn(&Value, &Value, &Value) -> f64 + Send + Sync + 'static,
    ) -> Self {
        let f: TimeFn = Arc::new(f);
        self.libraries.times.insert(name.into(), f);
        self
    }

    /// Register a named asynchronous task in the `tasks` library
    pub fn task(
        mut self,
        name: impl Into<String>,
        f: impl Fn(&Value, &Value, &Value) -> BoxFuture<'static, std::result::Result<Value, Value>>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        let f: TaskFn = Arc::new(f);
        self.libraries.tasks.insert(name.into(), f);
        self
    }

    /// Register a computed value, recomputed from `data` on every update
    ///
    /// Registration order is preserved in the published `values` map.
    pub fn value(
        mut self,
        name: impl Into<String>,
        f: impl Fn(&Value) -> Value + Send + Sync + 'static,
    ) -> Self {
        self.values.push((name.into(), Arc::new(f)));
        self
    }

    /// Override the per-drain transition limit
    ///
    /// Defaults to [`DEFAULT_TRANSITION_LIMIT`].
    pub fn transition_limit(mut self, limit: usize) -> Self {
        self.transition_limit = limit.max(1);
        self
    }

    /// Compile the design into a live [`Statechart`]
    ///
    /// Validates the state shape, resolves every library reference, and
    /// builds the state tree. The returned instance is fully inactive;
    /// the initial activation runs through the normal transition
    /// machinery on [`start`](Statechart::start) (or automatically before
    /// the first [`send`](Statechart::send) drain).
    ///
    /// # Errors
    ///
    /// [`ChartError::Design`] for malformed shapes and
    /// [`ChartError::UnknownReference`] for dangling library names.
    pub fn compile(self) -> Result<Statechart> {
        Statechart::new(self)
    }
}

impl fmt::Debug for Design {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Design")
            .field("id", &self.id)
            .field("states", &self.root.states.len())
            .field("values", &self.values.len())
            .finish()
    }
}

/// Configuration for one state in a design
///
/// The same slots exist at the design root; [`Design`] forwards its
/// state-shaped methods to an implicit root state.
#[derive(Clone, Default)]
pub struct StateConfig {
    pub(crate) initial: Option<String>,
    pub(crate) states: Vec<(String, StateConfig)>,
    pub(crate) on: Vec<(String, Handler)>,
    pub(crate) on_event: Option<Handler>,
    pub(crate) on_enter: Option<Handler>,
    pub(crate) on_exit: Option<Handler>,
    pub(crate) repeat: Option<RepeatConfig>,
    pub(crate) task: Option<TaskConfig>,
}

impl StateConfig {
    /// Start an empty state
    pub fn new() -> Self {
        Self::default()
    }

    /// Name the initially-active child, making this state a branch
    pub fn initial(mut self, name: impl Into<String>) -> Self {
        self.initial = Some(name.into());
        self
    }

    /// Declare a child state (declaration order is observable)
    pub fn state(mut self, name: impl Into<String>, config: StateConfig) -> Self {
        self.states.push((name.into(), config));
        self
    }

    /// Attach a handler for an event
    pub fn on(mut self, event: impl Into<String>, handler: impl Into<Handler>) -> Self {
        self.on.push((event.into(), handler.into()));
        self
    }

    /// Attach a handler that runs for every event reaching this state
    pub fn on_event(mut self, handler: impl Into<Handler>) -> Self {
        self.on_event = Some(handler.into());
        self
    }

    /// Attach a handler run on entry
    pub fn on_enter(mut self, handler: impl Into<Handler>) -> Self {
        self.on_enter = Some(handler.into());
        self
    }

    /// Attach a handler run on exit
    pub fn on_exit(mut self, handler: impl Into<Handler>) -> Self {
        self.on_exit = Some(handler.into());
        self
    }

    /// Attach a timed repeat, started on entry and cancelled on exit
    pub fn repeat(mut self, repeat: RepeatConfig) -> Self {
        self.repeat = Some(repeat);
        self
    }

    /// Attach an asynchronous task, launched on entry
    pub fn invoke(mut self, task: TaskConfig) -> Self {
        self.task = Some(task);
        self
    }
}

impl fmt::Debug for StateConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateConfig")
            .field("initial", &self.initial)
            .field("states", &self.states.len())
            .field("on", &self.on.len())
            .field("repeat", &self.repeat.is_some())
            .field("task", &self.task.is_some())
            .finish()
    }
}

/// A timed repeat: a handler chain evaluated on a cadence while the
/// owning state is active
///
/// Without a delay the repeat ticks at frame cadence (1/60 s). With a
/// delay, the tick interval is the computed seconds - see
/// [`effects`](crate::machine) for the exact clamping. Each tick exposes
/// `{ "interval": ms_since_last_tick, "elapsed": ms_since_start }` as the
/// scratch `result`.
#[derive(Clone)]
pub struct RepeatConfig {
    pub(crate) delay: Option<Slot<TimeFn>>,
    pub(crate) on_repeat: Handler,
}

impl RepeatConfig {
    /// Repeat at frame cadence
    pub fn frame(on_repeat: impl Into<Handler>) -> Self {
        RepeatConfig { delay: None, on_repeat: on_repeat.into() }
    }

    /// Repeat every `secs` seconds
    pub fn every(secs: f64, on_repeat: impl Into<Handler>) -> Self {
        RepeatConfig {
            delay: Some(Slot::Fn(Arc::new(move |_, _, _| secs))),
            on_repeat: on_repeat.into(),
        }
    }

    /// Repeat with a computed delay, evaluated when the repeat starts
    pub fn every_with(
        f: impl Fn(&Value, &Value, &Value) -> f64 + Send + Sync + 'static,
        on_repeat: impl Into<Handler>,
    ) -> Self {
        RepeatConfig { delay: Some(Slot::Fn(Arc::new(f))), on_repeat: on_repeat.into() }
    }

    /// Repeat with a named delay from the `times` library
    pub fn every_named(name: impl Into<String>, on_repeat: impl Into<Handler>) -> Self {
        RepeatConfig { delay: Some(Slot::Named(name.into())), on_repeat: on_repeat.into() }
    }
}

/// An asynchronous task launched when its state is entered
///
/// The resolved value (or rejection value, if an `on_reject` handler is
/// attached) becomes the scratch `result` for the routed handler chain.
/// Completions arriving after the owning state exited are dropped.
#[derive(Clone)]
pub struct TaskConfig {
    pub(crate) task: Slot<TaskFn>,
    pub(crate) on_resolve: Option<Handler>,
    pub(crate) on_reject: Option<Handler>,
}

impl TaskConfig {
    /// Launch the given future-producing function on entry
    pub fn run(
        f: impl Fn(&Value, &Value, &Value) -> BoxFuture<'static, std::result::Result<Value, Value>>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        TaskConfig { task: Slot::Fn(Arc::new(f)), on_resolve: None, on_reject: None }
    }

    /// Launch a named task from the `tasks` library on entry
    pub fn named(name: impl Into<String>) -> Self {
        TaskConfig { task: Slot::Named(name.into()), on_resolve: None, on_reject: None }
    }

    /// Handler chain for the resolved value (required)
    pub fn on_resolve(mut self, handler: impl Into<Handler>) -> Self {
        self.on_resolve = Some(handler.into());
        self
    }

    /// Handler chain for the rejection value
    ///
    /// Without one, rejections are dropped with a debug trace.
    pub fn on_reject(mut self, handler: impl Into<Handler>) -> Self {
        self.on_reject = Some(handler.into());
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.on_resolve.is_none() {
            return Err(ChartError::Design(
                "task block is missing its on_resolve handler".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn design_preserves_state_declaration_order() {
        let design = Design::new()
            .state("first", StateConfig::new())
            .state("second", StateConfig::new())
            .state("third", StateConfig::new());
        let names: Vec<&str> = design.root.states.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, ["first", "second", "third"]);
    }

    #[test]
    fn compile_rejects_initial_without_matching_state() {
        let err = Design::new().initial("ghost").compile().unwrap_err();
        match err {
            ChartError::Design(msg) => assert!(msg.contains("ghost")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn compile_rejects_duplicate_sibling_names() {
        let err = Design::new()
            .initial("a")
            .state("a", StateConfig::new())
            .state("a", StateConfig::new())
            .compile()
            .unwrap_err();
        assert!(matches!(err, ChartError::Design(_)));
    }

    #[test]
    fn compile_rejects_task_without_resolve_handler() {
        let design = Design::new().invoke(TaskConfig::run(|_, _, _| {
            Box::pin(async { Ok(json!(1)) })
        }));
        assert!(matches!(design.compile(), Err(ChartError::Design(_))));
    }

    #[test]
    fn compile_rejects_unknown_library_reference() {
        let err = Design::new().on("GO", "missing_action").compile().unwrap_err();
        assert!(matches!(err, ChartError::UnknownReference { .. }));
    }

    #[test]
    fn custom_id_prefixes_the_instance_id() {
        let machine = Design::new().id("clock").compile().unwrap();
        assert_eq!(machine.id(), "#clock");
    }

    #[test]
    fn anonymous_ids_are_monotonic() {
        let a = Design::new().compile().unwrap();
        let b = Design::new().compile().unwrap();
        let num = |id: &str| id.trim_start_matches("#state_").parse::<u64>().unwrap();
        assert!(num(b.id()) > num(a.id()));
    }
}
