//! Handler chains: the unit of behavior attached to event slots
//!
//! Every event slot in a design - `on` entries, `on_enter`, `on_exit`,
//! `on_event`, a repeat's tick handler, a task's resolve/reject handlers -
//! holds a **handler chain**: an ordered list of items evaluated in
//! sequence. Each item can derive a scratch `result`, gate itself behind
//! guards, pause, mutate `data`, enqueue follow-up events, or request a
//! transition.
//!
//! # Shorthand forms
//!
//! Slots accept several shorthands, all normalized at compile time into
//! the same chain-of-items representation:
//!
//! - a closure (via [`Handler::action`]) - one item running that action;
//! - a string - a reference into the design's named libraries, slotted by
//!   the library it resolves against;
//! - a [`HandlerItem`] - a single item, slot by slot;
//! - a list (via [`Handler::chain`]) - one item per element.
//!
//! ```rust
//! use strata::{Handler, HandlerItem};
//!
//! // Closure shorthand
//! let bump = Handler::action(|data, _payload, _result| {
//!     data["count"] = (data["count"].as_i64().unwrap_or(0) + 1).into();
//! });
//!
//! // Full item form: guard + transition
//! let advance = Handler::from(
//!     HandlerItem::new()
//!         .when(|data, _, _| data["ready"].as_bool().unwrap_or(false))
//!         .to("running"),
//! );
//! # let _ = (bump, advance);
//! ```
//!
//! Unknown library references fail at [`Design::compile`](crate::Design::compile);
//! the instance is never created with a dangling name.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;

use crate::error::{ChartError, Result};

/// Result-producer: folds `(data, payload, result)` into the next `result`
pub type ResultFn = Arc<dyn Fn(&Value, &Value, &Value) -> Value + Send + Sync>;

/// Guard predicate over `(data, payload, result)`
pub type CondFn = Arc<dyn Fn(&Value, &Value, &Value) -> bool + Send + Sync>;

/// Action: mutates the `data` draft; an `Err` discards the draft and
/// surfaces as [`ChartError::Handler`]
pub type ActionFn =
    Arc<dyn Fn(&mut Value, &Value, &Value) -> std::result::Result<(), String> + Send + Sync>;

/// Time producer returning seconds (fractional allowed)
pub type TimeFn = Arc<dyn Fn(&Value, &Value, &Value) -> f64 + Send + Sync>;

/// Event producer for `send` slots
pub type EventFn = Arc<dyn Fn(&Value, &Value, &Value) -> Event + Send + Sync>;

/// Transition-target producer returning a state path
pub type TargetFn = Arc<dyn Fn(&Value, &Value, &Value) -> String + Send + Sync>;

/// Asynchronous work launched on state entry; resolves or rejects with a
/// JSON value routed to the state's resolve/reject handlers
pub type TaskFn = Arc<
    dyn Fn(&Value, &Value, &Value) -> BoxFuture<'static, std::result::Result<Value, Value>>
        + Send
        + Sync,
>;

/// Computed-value producer over `data`
pub type ComputeFn = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

/// An event submitted to a statechart: a name plus an arbitrary payload
#[derive(Clone, Debug, PartialEq)]
pub struct Event {
    /// Event name, matched against `on` slots
    pub name: String,
    /// Payload visible to handlers as the second argument
    pub payload: Value,
}

impl Event {
    /// Create an event with a payload
    pub fn new(name: impl Into<String>, payload: Value) -> Self {
        Self { name: name.into(), payload }
    }

    /// Create an event with a null payload
    pub fn named(name: impl Into<String>) -> Self {
        Self::new(name, Value::Null)
    }
}

/// A slot value that is either a function or a named library reference
#[derive(Clone)]
pub(crate) enum Slot<T> {
    Fn(T),
    Named(String),
}

impl<T: Clone> Slot<T> {
    fn resolve(&self, library: &'static str, table: &HashMap<String, T>) -> Result<T> {
        match self {
            Slot::Fn(f) => Ok(f.clone()),
            Slot::Named(name) => {
                table
                    .get(name)
                    .cloned()
                    .ok_or_else(|| ChartError::UnknownReference { library, name: name.clone() })
            }
        }
    }
}

/// Named function libraries shared by every handler in a design
///
/// Populated through the registration methods on
/// [`Design`](crate::Design); string shorthands resolve against these
/// tables at compile time.
#[derive(Clone, Default)]
pub(crate) struct Libraries {
    pub results: HashMap<String, ResultFn>,
    pub conditions: HashMap<String, CondFn>,
    pub actions: HashMap<String, ActionFn>,
    pub tasks: HashMap<String, TaskFn>,
    pub times: HashMap<String, TimeFn>,
}

/// A handler in one of its shorthand forms
///
/// See the [module docs](self) for the forms and how they normalize.
#[derive(Clone)]
pub enum Handler {
    /// Bare action shorthand: one item running this action
    Action(ActionFn),
    /// Reference to a named library entry, slotted by its library
    Named(String),
    /// Full single-item form
    Item(HandlerItem),
    /// One item per element
    Chain(Vec<Handler>),
}

impl Handler {
    /// Wrap an infallible action closure
    pub fn action(f: impl Fn(&mut Value, &Value, &Value) + Send + Sync + 'static) -> Self {
        Handler::Action(wrap_action(f))
    }

    /// Wrap a fallible action closure; the error message surfaces as
    /// [`ChartError::Handler`]
    pub fn try_action<E: fmt::Display>(
        f: impl Fn(&mut Value, &Value, &Value) -> std::result::Result<(), E> + Send + Sync + 'static,
    ) -> Self {
        Handler::Action(Arc::new(move |d, p, r| f(d, p, r).map_err(|e| e.to_string())))
    }

    /// Reference a named library entry
    pub fn named(name: impl Into<String>) -> Self {
        Handler::Named(name.into())
    }

    /// Build a chain from several handlers, one item per element
    pub fn chain(handlers: impl IntoIterator<Item = Handler>) -> Self {
        Handler::Chain(handlers.into_iter().collect())
    }

    /// Normalize into compiled items, resolving named references
    pub(crate) fn normalize(&self, libs: &Libraries) -> Result<Vec<CompiledItem>> {
        match self {
            Handler::Action(f) => Ok(vec![CompiledItem::from_action(f.clone())]),
            Handler::Named(name) => {
                // A bare string slots by whichever library defines it:
                // actions run, conditions guard, results derive, times wait.
                if let Some(f) = libs.actions.get(name) {
                    Ok(vec![CompiledItem::from_action(f.clone())])
                } else if let Some(c) = libs.conditions.get(name) {
                    Ok(vec![CompiledItem { when: vec![c.clone()], ..CompiledItem::default() }])
                } else if let Some(g) = libs.results.get(name) {
                    Ok(vec![CompiledItem { get: vec![g.clone()], ..CompiledItem::default() }])
                } else if let Some(t) = libs.times.get(name) {
                    Ok(vec![CompiledItem { wait: Some(t.clone()), ..CompiledItem::default() }])
                } else {
                    Err(ChartError::UnknownReference { library: "handler", name: name.clone() })
                }
            }
            Handler::Item(item) => Ok(vec![item.resolve(libs)?]),
            Handler::Chain(parts) => {
                let mut items = Vec::with_capacity(parts.len());
                for part in parts {
                    items.extend(part.normalize(libs)?);
                }
                Ok(items)
            }
        }
    }
}

impl From<&str> for Handler {
    fn from(name: &str) -> Self {
        Handler::Named(name.to_string())
    }
}

impl From<String> for Handler {
    fn from(name: String) -> Self {
        Handler::Named(name)
    }
}

impl From<HandlerItem> for Handler {
    fn from(item: HandlerItem) -> Self {
        Handler::Item(item)
    }
}

impl From<Vec<Handler>> for Handler {
    fn from(parts: Vec<Handler>) -> Self {
        Handler::Chain(parts)
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Handler::Action(_) => f.write_str("Handler::Action(<fn>)"),
            Handler::Named(name) => write!(f, "Handler::Named({name:?})"),
            Handler::Item(_) => f.write_str("Handler::Item(..)"),
            Handler::Chain(parts) => write!(f, "Handler::Chain({} items)", parts.len()),
        }
    }
}

/// Builder for the full single-item handler form
///
/// Slots, in evaluation order:
///
/// 1. [`get`](Self::get) - fold result producers into the scratch `result`
/// 2. [`when`](Self::when) (all must hold), [`unless`](Self::unless)
///    (none may hold), [`when_any`](Self::when_any) (at least one)
/// 3. [`wait`](Self::wait) - suspend for a computed number of seconds
/// 4. on pass: [`then`](Self::then) actions, [`send`](Self::send),
///    [`to`](Self::to) (terminates the chain)
/// 5. on fail: [`else_then`](Self::else_then),
///    [`else_send`](Self::else_send), [`else_to`](Self::else_to)
///
/// The [`quietly`](Self::quietly) and [`quietly_to`](Self::quietly_to)
/// slots behave like `then`/`to` but do not mark the update as
/// notification-worthy - subscribers are not called for changes made only
/// through quiet slots.
#[derive(Clone, Default)]
pub struct HandlerItem {
    pub(crate) get: Vec<Slot<ResultFn>>,
    pub(crate) when: Vec<Slot<CondFn>>,
    pub(crate) when_any: Vec<Slot<CondFn>>,
    pub(crate) unless: Vec<Slot<CondFn>>,
    pub(crate) wait: Option<Slot<TimeFn>>,
    pub(crate) then: Vec<Slot<ActionFn>>,
    pub(crate) else_then: Vec<Slot<ActionFn>>,
    pub(crate) quietly: Vec<Slot<ActionFn>>,
    pub(crate) send: Option<EventFn>,
    pub(crate) else_send: Option<EventFn>,
    pub(crate) to: Option<TargetFn>,
    pub(crate) else_to: Option<TargetFn>,
    pub(crate) quietly_to: Option<TargetFn>,
}

impl HandlerItem {
    /// Start an empty item
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a result producer
    pub fn get(mut self, f: impl Fn(&Value, &Value, &Value) -> Value + Send + Sync + 'static) -> Self {
        self.get.push(Slot::Fn(Arc::new(f)));
        self
    }

    /// Add a named result producer from the `results` library
    pub fn get_named(mut self, name: impl Into<String>) -> Self {
        self.get.push(Slot::Named(name.into()));
        self
    }

    /// Require a condition to hold
    pub fn when(mut self, f: impl Fn(&Value, &Value, &Value) -> bool + Send + Sync + 'static) -> Self {
        self.when.push(Slot::Fn(Arc::new(f)));
        self
    }

    /// Require a named condition from the `conditions` library
    pub fn when_named(mut self, name: impl Into<String>) -> Self {
        self.when.push(Slot::Named(name.into()));
        self
    }

    /// Require at least one of the `when_any` conditions to hold
    pub fn when_any(
        mut self,
        f: impl Fn(&Value, &Value, &Value) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.when_any.push(Slot::Fn(Arc::new(f)));
        self
    }

    /// Named variant of [`when_any`](Self::when_any)
    pub fn when_any_named(mut self, name: impl Into<String>) -> Self {
        self.when_any.push(Slot::Named(name.into()));
        self
    }

    /// Require a condition *not* to hold
    pub fn unless(
        mut self,
        f: impl Fn(&Value, &Value, &Value) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.unless.push(Slot::Fn(Arc::new(f)));
        self
    }

    /// Named variant of [`unless`](Self::unless)
    pub fn unless_named(mut self, name: impl Into<String>) -> Self {
        self.unless.push(Slot::Named(name.into()));
        self
    }

    /// Suspend for a computed number of seconds after guards are
    /// evaluated, before either branch runs
    pub fn wait(mut self, f: impl Fn(&Value, &Value, &Value) -> f64 + Send + Sync + 'static) -> Self {
        self.wait = Some(Slot::Fn(Arc::new(f)));
        self
    }

    /// Suspend for a fixed number of seconds
    pub fn wait_secs(self, secs: f64) -> Self {
        self.wait(move |_, _, _| secs)
    }

    /// Named variant of [`wait`](Self::wait), from the `times` library
    pub fn wait_named(mut self, name: impl Into<String>) -> Self {
        self.wait = Some(Slot::Named(name.into()));
        self
    }

    /// Run an action when the guards pass
    pub fn then(mut self, f: impl Fn(&mut Value, &Value, &Value) + Send + Sync + 'static) -> Self {
        self.then.push(Slot::Fn(wrap_action(f)));
        self
    }

    /// Run a fallible action when the guards pass
    pub fn try_then<E: fmt::Display>(
        mut self,
        f: impl Fn(&mut Value, &Value, &Value) -> std::result::Result<(), E> + Send + Sync + 'static,
    ) -> Self {
        self.then.push(Slot::Fn(Arc::new(move |d, p, r| f(d, p, r).map_err(|e| e.to_string()))));
        self
    }

    /// Run a named action from the `actions` library when the guards pass
    pub fn then_named(mut self, name: impl Into<String>) -> Self {
        self.then.push(Slot::Named(name.into()));
        self
    }

    /// Run an action when the guards fail
    pub fn else_then(
        mut self,
        f: impl Fn(&mut Value, &Value, &Value) + Send + Sync + 'static,
    ) -> Self {
        self.else_then.push(Slot::Fn(wrap_action(f)));
        self
    }

    /// Named variant of [`else_then`](Self::else_then)
    pub fn else_then_named(mut self, name: impl Into<String>) -> Self {
        self.else_then.push(Slot::Named(name.into()));
        self
    }

    /// Run an action without marking the update as notification-worthy
    pub fn quietly(
        mut self,
        f: impl Fn(&mut Value, &Value, &Value) + Send + Sync + 'static,
    ) -> Self {
        self.quietly.push(Slot::Fn(wrap_action(f)));
        self
    }

    /// Named variant of [`quietly`](Self::quietly)
    pub fn quietly_named(mut self, name: impl Into<String>) -> Self {
        self.quietly.push(Slot::Named(name.into()));
        self
    }

    /// Enqueue a fixed event (null payload) when the guards pass
    ///
    /// The event is processed after the current drain finishes the event
    /// in flight, never re-entrantly.
    pub fn send(mut self, event: impl Into<String>) -> Self {
        let name = event.into();
        self.send = Some(Arc::new(move |_, _, _| Event::named(name.clone())));
        self
    }

    /// Enqueue a computed event when the guards pass
    pub fn send_with(
        mut self,
        f: impl Fn(&Value, &Value, &Value) -> Event + Send + Sync + 'static,
    ) -> Self {
        self.send = Some(Arc::new(f));
        self
    }

    /// Enqueue a fixed event when the guards fail
    pub fn else_send(mut self, event: impl Into<String>) -> Self {
        let name = event.into();
        self.else_send = Some(Arc::new(move |_, _, _| Event::named(name.clone())));
        self
    }

    /// Enqueue a computed event when the guards fail
    pub fn else_send_with(
        mut self,
        f: impl Fn(&Value, &Value, &Value) -> Event + Send + Sync + 'static,
    ) -> Self {
        self.else_send = Some(Arc::new(f));
        self
    }

    /// Transition to a fixed target path when the guards pass; terminates
    /// the chain
    pub fn to(mut self, path: impl Into<String>) -> Self {
        let path = path.into();
        self.to = Some(Arc::new(move |_, _, _| path.clone()));
        self
    }

    /// Transition to a computed target path when the guards pass
    pub fn to_with(
        mut self,
        f: impl Fn(&Value, &Value, &Value) -> String + Send + Sync + 'static,
    ) -> Self {
        self.to = Some(Arc::new(f));
        self
    }

    /// Transition to a fixed target when the guards fail
    pub fn else_to(mut self, path: impl Into<String>) -> Self {
        let path = path.into();
        self.else_to = Some(Arc::new(move |_, _, _| path.clone()));
        self
    }

    /// Transition to a computed target when the guards fail
    pub fn else_to_with(
        mut self,
        f: impl Fn(&Value, &Value, &Value) -> String + Send + Sync + 'static,
    ) -> Self {
        self.else_to = Some(Arc::new(f));
        self
    }

    /// Transition without marking the update as notification-worthy
    pub fn quietly_to(mut self, path: impl Into<String>) -> Self {
        let path = path.into();
        self.quietly_to = Some(Arc::new(move |_, _, _| path.clone()));
        self
    }

    /// Computed variant of [`quietly_to`](Self::quietly_to)
    pub fn quietly_to_with(
        mut self,
        f: impl Fn(&Value, &Value, &Value) -> String + Send + Sync + 'static,
    ) -> Self {
        self.quietly_to = Some(Arc::new(f));
        self
    }

    fn resolve(&self, libs: &Libraries) -> Result<CompiledItem> {
        let resolve_conds = |slots: &[Slot<CondFn>]| -> Result<Vec<CondFn>> {
            slots.iter().map(|s| s.resolve("conditions", &libs.conditions)).collect()
        };
        let resolve_actions = |slots: &[Slot<ActionFn>]| -> Result<Vec<ActionFn>> {
            slots.iter().map(|s| s.resolve("actions", &libs.actions)).collect()
        };
        Ok(CompiledItem {
            get: self
                .get
                .iter()
                .map(|s| s.resolve("results", &libs.results))
                .collect::<Result<_>>()?,
            when: resolve_conds(&self.when)?,
            when_any: resolve_conds(&self.when_any)?,
            unless: resolve_conds(&self.unless)?,
            wait: self.wait.as_ref().map(|s| s.resolve("times", &libs.times)).transpose()?,
            then: resolve_actions(&self.then)?,
            else_then: resolve_actions(&self.else_then)?,
            quietly: resolve_actions(&self.quietly)?,
            send: self.send.clone(),
            else_send: self.else_send.clone(),
            to: self.to.clone(),
            else_to: self.else_to.clone(),
            quietly_to: self.quietly_to.clone(),
        })
    }
}

impl fmt::Debug for HandlerItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerItem")
            .field("get", &self.get.len())
            .field("when", &self.when.len())
            .field("when_any", &self.when_any.len())
            .field("unless", &self.unless.len())
            .field("wait", &self.wait.is_some())
            .field("then", &self.then.len())
            .field("else_then", &self.else_then.len())
            .field("quietly", &self.quietly.len())
            .field("send", &self.send.is_some())
            .field("to", &self.to.is_some())
            .finish()
    }
}

/// Normalized handler item: every slot resolved to functions
#[derive(Clone, Default)]
pub(crate) struct CompiledItem {
    pub get: Vec<ResultFn>,
    pub when: Vec<CondFn>,
    pub when_any: Vec<CondFn>,
    pub unless: Vec<CondFn>,
    pub wait: Option<TimeFn>,
    pub then: Vec<ActionFn>,
    pub else_then: Vec<ActionFn>,
    pub quietly: Vec<ActionFn>,
    pub send: Option<EventFn>,
    pub else_send: Option<EventFn>,
    pub to: Option<TargetFn>,
    pub else_to: Option<TargetFn>,
    pub quietly_to: Option<TargetFn>,
}

impl fmt::Debug for CompiledItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledItem")
            .field("get", &self.get.len())
            .field("when", &self.when.len())
            .field("when_any", &self.when_any.len())
            .field("unless", &self.unless.len())
            .field("wait", &self.wait.is_some())
            .field("then", &self.then.len())
            .field("else_then", &self.else_then.len())
            .field("quietly", &self.quietly.len())
            .field("send", &self.send.is_some())
            .field("else_send", &self.else_send.is_some())
            .field("to", &self.to.is_some())
            .field("else_to", &self.else_to.is_some())
            .field("quietly_to", &self.quietly_to.is_some())
            .finish()
    }
}

impl CompiledItem {
    fn from_action(f: ActionFn) -> Self {
        CompiledItem { then: vec![f], ..CompiledItem::default() }
    }
}

/// A normalized chain, shared cheaply between the tree and the event index
pub(crate) type CompiledChain = Arc<Vec<CompiledItem>>;

pub(crate) fn compile_chain(handler: &Handler, libs: &Libraries) -> Result<CompiledChain> {
    Ok(Arc::new(handler.normalize(libs)?))
}

fn wrap_action(f: impl Fn(&mut Value, &Value, &Value) + Send + Sync + 'static) -> ActionFn {
    Arc::new(move |d, p, r| {
        f(d, p, r);
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn libs_with_action() -> Libraries {
        let mut libs = Libraries::default();
        libs.actions.insert(
            "increment".to_string(),
            Arc::new(|d: &mut Value, _: &Value, _: &Value| {
                d["count"] = (d["count"].as_i64().unwrap_or(0) + 1).into();
                Ok(())
            }),
        );
        libs.conditions
            .insert("ready".to_string(), Arc::new(|d: &Value, _: &Value, _: &Value| {
                d["ready"].as_bool().unwrap_or(false)
            }));
        libs
    }

    #[test]
    fn closure_shorthand_becomes_single_action_item() {
        let handler = Handler::action(|d, _, _| d["hit"] = json!(true));
        let items = handler.normalize(&Libraries::default()).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].then.len(), 1);
        assert!(items[0].when.is_empty());
    }

    #[test]
    fn named_shorthand_slots_by_library() {
        let libs = libs_with_action();

        let items = Handler::named("increment").normalize(&libs).unwrap();
        assert_eq!(items[0].then.len(), 1);

        let items = Handler::named("ready").normalize(&libs).unwrap();
        assert_eq!(items[0].when.len(), 1);
        assert!(items[0].then.is_empty());
    }

    #[test]
    fn unknown_reference_is_a_compile_error() {
        let err = Handler::named("missing").normalize(&Libraries::default()).unwrap_err();
        match err {
            ChartError::UnknownReference { name, .. } => assert_eq!(name, "missing"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn chain_form_yields_one_item_per_element() {
        let libs = libs_with_action();
        let handler = Handler::chain([
            Handler::named("increment"),
            Handler::from(HandlerItem::new().when_named("ready").to("done")),
        ]);
        let items = handler.normalize(&libs).unwrap();
        assert_eq!(items.len(), 2);
        assert!(items[1].to.is_some());
    }

    #[test]
    fn item_resolution_reports_the_failing_library() {
        let item = HandlerItem::new().when_named("nope");
        let err = Handler::from(item).normalize(&Libraries::default()).unwrap_err();
        match err {
            ChartError::UnknownReference { library, name } => {
                assert_eq!(library, "conditions");
                assert_eq!(name, "nope");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
