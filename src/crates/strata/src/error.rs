//! Error types for design compilation and event processing
//!
//! All fallible operations in this crate return [`Result`], an alias over
//! [`ChartError`]. Errors split into two families:
//!
//! - **Construction errors** ([`ChartError::Design`],
//!   [`ChartError::UnknownReference`]) are raised by
//!   [`Design::compile`](crate::Design::compile). The instance is never
//!   created.
//! - **Runtime errors** ([`ChartError::LoopDetected`],
//!   [`ChartError::Handler`]) surface from
//!   [`Statechart::send`](crate::Statechart::send) and terminate the
//!   current event drain early. Events still queued are processed by the
//!   next drain.
//!
//! A transition target that matches no state is *not* an error at runtime:
//! it is reported through `tracing::warn!` and the transition is skipped.
//! [`ChartError::UnknownTarget`] exists for the internal paths that detect
//! the condition and for hosts that want to match on it.

use thiserror::Error;

/// Convenience result type used throughout the crate
pub type Result<T> = std::result::Result<T, ChartError>;

/// Errors produced while compiling a design or running a statechart
#[derive(Debug, Error)]
pub enum ChartError {
    /// Design validation failed
    ///
    /// Raised at compile time for malformed designs: an `initial` naming a
    /// state that was never declared, duplicate sibling state names, a
    /// repeat or task block missing its handler, and similar shape
    /// problems.
    #[error("invalid design: {0}")]
    Design(String),

    /// A handler referenced a named library entry that does not exist
    ///
    /// Raised at compile time when a string shorthand (for example
    /// `"increment"`) resolves against none of the design's libraries.
    #[error("unknown {library} reference '{name}'")]
    UnknownReference {
        /// Library the name was resolved against (`actions`, `conditions`, ...)
        library: &'static str,
        /// The unresolved name
        name: String,
    },

    /// A transition target path matched no state in the tree
    ///
    /// At runtime this is reported and the transition is skipped; the
    /// variant surfaces only where callers resolve paths directly.
    #[error("no state matches transition target '{path}'")]
    UnknownTarget {
        /// The path that failed to resolve
        path: String,
    },

    /// Too many transitions fired while handling one event
    ///
    /// Guards against designs whose entry and exit handlers transition
    /// into each other forever. The drain terminates early; the instance
    /// keeps the active set from the last completed transition.
    #[error("transition loop detected while handling '{event}': more than {limit} transitions in one drain")]
    LoopDetected {
        /// Event whose drain exceeded the limit
        event: String,
        /// The configured transition limit
        limit: usize,
    },

    /// An action returned an error during handler evaluation
    ///
    /// The draft the action was mutating is discarded; `data` keeps the
    /// value committed by the last successful chain evaluation.
    #[error("handler failed in state '{state}': {error}")]
    Handler {
        /// Path of the state whose handler failed
        state: String,
        /// Error message from the failing action
        error: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_formats_carry_context() {
        let err = ChartError::UnknownReference {
            library: "actions",
            name: "increment".to_string(),
        };
        assert_eq!(format!("{err}"), "unknown actions reference 'increment'");

        let err = ChartError::LoopDetected {
            event: "PING".to_string(),
            limit: 200,
        };
        assert!(format!("{err}").contains("more than 200 transitions"));
    }

    #[test]
    fn handler_failure_names_the_state() {
        let err = ChartError::Handler {
            state: "#clock.root.running".to_string(),
            error: "count out of range".to_string(),
        };
        assert!(format!("{err}").contains("#clock.root.running"));
    }
}
