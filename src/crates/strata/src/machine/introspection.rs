//! The synchronous read surface
//!
//! Everything here evaluates against the latest published snapshot -
//! never the engine lock - so these methods are safe to call from
//! subscriber callbacks, other tasks, or mid-drain from the outside.
//!
//! # Path matching
//!
//! Queries use the same suffix rule as transition targets: a query
//! matches an active path that ends with `"." + query`. A leading dot is
//! added when missing; a query starting with `#` must match the full
//! instance-qualified path exactly.

use std::sync::Arc;

use serde_json::Value;

use crate::machine::Statechart;
use crate::tree::StateSummary;

/// One entry for [`Statechart::when_in_fold`]: a plain value or a thunk
/// evaluated only when its key matches an active state
#[derive(Clone)]
pub enum WhenEntry {
    /// Included as-is
    Value(Value),
    /// Evaluated lazily on inclusion
    Thunk(Arc<dyn Fn() -> Value + Send + Sync>),
}

impl WhenEntry {
    /// A lazily-evaluated entry
    pub fn thunk(f: impl Fn() -> Value + Send + Sync + 'static) -> Self {
        WhenEntry::Thunk(Arc::new(f))
    }

    fn resolve(&self) -> Value {
        match self {
            WhenEntry::Value(v) => v.clone(),
            WhenEntry::Thunk(f) => f(),
        }
    }
}

impl From<Value> for WhenEntry {
    fn from(v: Value) -> Self {
        WhenEntry::Value(v)
    }
}

fn matches_active(active: &[String], query: &str) -> bool {
    if query.starts_with('#') {
        return active.iter().any(|path| path == query);
    }
    let suffix = if query.starts_with('.') {
        query.to_string()
    } else {
        format!(".{query}")
    };
    active.iter().any(|path| path.ends_with(&suffix))
}

impl Statechart {
    /// True iff *every* query matches some active state
    ///
    /// ```rust
    /// # use strata::Design;
    /// # use strata::StateConfig;
    /// # async fn example() -> strata::Result<()> {
    /// let machine = Design::new()
    ///     .initial("low")
    ///     .state("low", StateConfig::new())
    ///     .state("high", StateConfig::new())
    ///     .compile()?;
    /// machine.start().await?;
    /// assert!(machine.is_in(["low"]));
    /// assert!(!machine.is_in(["low", "high"]));
    /// # Ok(())
    /// # }
    /// ```
    pub fn is_in<'a>(&self, queries: impl IntoIterator<Item = &'a str>) -> bool {
        let active = self.inner.snapshot.read().active.clone();
        queries.into_iter().all(|q| matches_active(&active, q))
    }

    /// True iff *any* query matches some active state
    pub fn is_in_any<'a>(&self, queries: impl IntoIterator<Item = &'a str>) -> bool {
        let active = self.inner.snapshot.read().active.clone();
        queries.into_iter().any(|q| matches_active(&active, q))
    }

    /// Whether some active state would handle the event (null payload)
    pub fn can(&self, event: &str) -> bool {
        self.can_with(event, Value::Null)
    }

    /// Whether some active state's handler for the event has an item
    /// whose guards pass
    ///
    /// Evaluation is pure: `get` producers run against the snapshot to
    /// derive the scratch result, guards are tested, and nothing is
    /// committed or enqueued. Unknown events simply return `false`.
    pub fn can_with(&self, event: &str, payload: Value) -> bool {
        let snapshot = self.inner.snapshot.read().clone();
        let mut result = Value::Null;
        for path in &snapshot.active {
            let Some(events) = self.inner.event_index.get(path) else {
                continue;
            };
            let Some(chain) = events.get(event) else {
                continue;
            };
            for item in chain.iter() {
                for get in &item.get {
                    let next = get(&snapshot.data, &payload, &result);
                    result = next;
                }
                let mut passed =
                    item.when.iter().all(|cond| cond(&snapshot.data, &payload, &result));
                if passed && !item.unless.is_empty() {
                    passed = !item.unless.iter().any(|cond| cond(&snapshot.data, &payload, &result));
                }
                if passed && !item.when_any.is_empty() {
                    passed = item.when_any.iter().any(|cond| cond(&snapshot.data, &payload, &result));
                }
                if passed {
                    return true;
                }
            }
        }
        false
    }

    /// Collect entry values whose keys match active states
    ///
    /// Entries are visited in the given order; a key of `"root"` always
    /// matches. Values are included as-is - use
    /// [`when_in_fold`](Self::when_in_fold) for thunks or a custom fold.
    pub fn when_in(&self, entries: &[(&str, Value)]) -> Vec<Value> {
        self.when_in_fold(
            entries.iter().map(|(key, value)| (*key, WhenEntry::Value(value.clone()))),
            Vec::new(),
            |mut acc, _key, value| {
                acc.push(value);
                acc
            },
        )
    }

    /// Fold entry values whose keys match active states
    pub fn when_in_fold<'a, T>(
        &self,
        entries: impl IntoIterator<Item = (&'a str, WhenEntry)>,
        initial: T,
        mut fold: impl FnMut(T, &str, Value) -> T,
    ) -> T {
        let active = self.inner.snapshot.read().active.clone();
        let mut acc = initial;
        for (key, entry) in entries {
            if key == "root" || matches_active(&active, key) {
                acc = fold(acc, key, entry.resolve());
            }
        }
        acc
    }

    /// Serializable structural summary with current activity flags
    pub fn state_summary(&self) -> StateSummary {
        let active = self.inner.snapshot.read().active.clone();
        mark_active(&self.inner.skeleton, &active)
    }
}

fn mark_active(skeleton: &StateSummary, active: &[String]) -> StateSummary {
    StateSummary {
        name: skeleton.name.clone(),
        path: skeleton.path.clone(),
        kind: skeleton.kind,
        initial: skeleton.initial.clone(),
        active: active.iter().any(|p| p == &skeleton.path),
        children: skeleton.children.iter().map(|c| mark_active(c, active)).collect(),
    }
}
