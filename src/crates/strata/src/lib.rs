//! # strata - hierarchical statechart runtime
//!
//! Build a declarative **design** of nested states - branch and parallel
//! regions, guarded event handlers, entry/exit behavior, timed repeats,
//! asynchronous tasks - and compile it into a live **statechart** that
//! processes events serially, tracks the active state tree, runs side
//! effects in a defined order, and publishes updates to subscribers.
//!
//! ## Overview
//!
//! - **Declarative designs** - states, handlers, and effects as plain
//!   values with a fluent builder
//! - **Hierarchical + parallel** - branch states activate one child,
//!   parallel states activate all of them
//! - **History re-entry** - `.previous` re-enters a branch's last active
//!   child; `.restore` restores the full subtree
//! - **Serialized events** - a FIFO send queue; handlers never interleave
//! - **Guarded handler chains** - result derivation, conditions, timed
//!   waits, actions, follow-up sends, transitions
//! - **Timed & async effects** - per-state repeat loops and awaitable
//!   tasks routed to resolve/reject handlers
//! - **Loop protection** - runaway transition cycles terminate the drain
//!   with an error instead of hanging the process
//!
//! ## Quick start
//!
//! ```rust
//! use serde_json::json;
//! use strata::{Design, Handler, HandlerItem, StateConfig};
//!
//! #[tokio::main]
//! async fn main() -> strata::Result<()> {
//!     let machine = Design::new()
//!         .id("stoplight")
//!         .data(json!({ "cycles": 0 }))
//!         .initial("red")
//!         .state(
//!             "red",
//!             StateConfig::new().on("NEXT", HandlerItem::new().to("green")),
//!         )
//!         .state(
//!             "green",
//!             StateConfig::new().on(
//!                 "NEXT",
//!                 HandlerItem::new()
//!                     .then(|d, _, _| {
//!                         d["cycles"] = (d["cycles"].as_i64().unwrap_or(0) + 1).into()
//!                     })
//!                     .to("red"),
//!             ),
//!         )
//!         .compile()?;
//!
//!     machine.start().await?;
//!     machine.send("NEXT").await?;
//!     assert!(machine.is_in(["green"]));
//!
//!     machine.send("NEXT").await?;
//!     assert!(machine.is_in(["red"]));
//!     assert_eq!(machine.data()["cycles"], 1);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//!                ┌──────────────────────────────────────┐
//!                │             Design (builder)         │
//!                │  states · handlers · libraries       │
//!                │  repeats · tasks · computed values   │
//!                └───────────────┬──────────────────────┘
//!                                │ compile()
//!                                ▼
//!                ┌──────────────────────────────────────┐
//!                │          Statechart (runtime)        │
//!                │  send() ──► FIFO queue ──► drain     │
//!                │  is_in / can / when_in / values      │
//!                └───────┬──────────────────┬───────────┘
//!                        │                  │
//!                        ▼                  ▼
//!            ┌───────────────────┐  ┌──────────────────┐
//!            │  Handler chains   │  │  State tree       │
//!            │  get → guards →   │  │  branch/parallel  │
//!            │  wait → do/send/  │─►│  activate/exit    │
//!            │  transition       │  │  history          │
//!            └───────────────────┘  └──────────────────┘
//!                        │                  │
//!                        ▼                  ▼
//!            ┌───────────────────┐  ┌──────────────────┐
//!            │  Effects          │  │  Updates          │
//!            │  repeat ticks     │  │  on_update        │
//!            │  async tasks      │─►│  updates() stream │
//!            └───────────────────┘  └──────────────────┘
//! ```
//!
//! ## Module organization
//!
//! - [`design`] - [`Design`], [`StateConfig`], [`RepeatConfig`],
//!   [`TaskConfig`]: the declarative surface
//! - [`handler`] - [`Handler`], [`HandlerItem`], [`Event`], and the
//!   function type aliases
//! - [`machine`] - [`Statechart`], [`Update`], [`Subscription`],
//!   [`UpdateStream`]: the runtime
//! - [`tree`] - [`NodeKind`], [`StateSummary`]: the compiled structure
//! - [`error`] - [`ChartError`] and the crate [`Result`]
//! - [`visualization`] - DOT/Mermaid/ASCII tree rendering
//!
//! ## Concurrency
//!
//! The runtime is single-threaded-cooperative: one engine lock serializes
//! every evaluation (event drains, repeat ticks, async completions).
//! `send` calls made while a drain is in flight enqueue behind it and
//! resolve once the queue empties. The read surface (`is_in`, `can`,
//! `values`, `get_update`) works from published snapshots and never
//! blocks on the engine.

mod active;
pub mod design;
pub mod error;
pub mod handler;
pub mod machine;
pub mod tree;
pub mod visualization;

pub use design::{Design, RepeatConfig, StateConfig, TaskConfig, DEFAULT_TRANSITION_LIMIT};
pub use error::{ChartError, Result};
pub use handler::{
    ActionFn, ComputeFn, CondFn, Event, EventFn, Handler, HandlerItem, ResultFn, TargetFn, TaskFn,
    TimeFn,
};
pub use machine::{Statechart, Subscription, Update, UpdateStream, WhenEntry};
pub use tree::{NodeKind, StateSummary};
pub use visualization::{visualize, VisualizationFormat, VisualizationOptions};
