// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Engine error types.

use crate::types::ObjKind;
use thiserror::Error;

/// Errors surfaced by the embedding API and the configuration protocol.
///
/// Invalid input, missing targets and graph inconsistencies are rejected
/// without state change; the rejection is logged at the call site and
/// returned here so hosts can observe it.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed argument: empty name, unknown operator, zero period.
    #[error("invalid input: {0}")]
    Invalid(String),

    /// No object with this name exists in the registry.
    #[error("unknown {kind} '{name}'")]
    NotFound {
        /// Expected kind.
        kind: ObjKind,
        /// Requested name.
        name: String,
    },

    /// The name resolves to an object of a different kind.
    #[error("'{name}' is a {actual}, expected a {expected}")]
    KindMismatch {
        /// Offending name.
        name: String,
        /// Kind the caller asked for.
        expected: ObjKind,
        /// Kind found in the registry.
        actual: ObjKind,
    },

    /// The requested dependency edge would introduce a cycle.
    #[error("dependency '{parent}' -> '{child}' would create a cycle")]
    CycleRejected {
        /// Parent end of the refused edge.
        parent: String,
        /// Child end of the refused edge.
        child: String,
    },

    /// A truncated name collides with an existing object.
    #[error("name '{0}' collides with an existing truncated name")]
    NameCollision(String),

    /// A configuration protocol command was rejected; the rest of the
    /// batch is unaffected.
    #[error("configuration command '{command}' rejected: {reason}")]
    Config {
        /// Top-level command key.
        command: String,
        /// Why the command was dropped.
        reason: String,
    },

    /// The engine has been shut down.
    #[error("engine is shut down")]
    ShutDown,
}

/// Convenience alias used throughout the engine.
pub type EngineResult<T> = Result<T, EngineError>;
