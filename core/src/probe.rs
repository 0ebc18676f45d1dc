// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Host-supplied callables.
//!
//! Probes and action handlers are plain values satisfying "callable with
//! (instance, context) -> result". Contexts are opaque to the engine and
//! carried by value; there is no global registry of function pointers.

use crate::types::DiagResult;
use std::any::Any;
use std::sync::Arc;

/// Opaque per-registration or per-instance context handed back to the
/// host on every callout.
pub type ProbeContext = Arc<dyn Any + Send + Sync>;

/// A test probe. Invoked off the DB lock on a worker thread with the
/// instance name (None for the base instance) and the registered or
/// per-instance context.
pub type ProbeFn =
    Arc<dyn Fn(Option<&str>, Option<&ProbeContext>) -> DiagResult + Send + Sync>;

/// A recovery action handler. Same calling convention as [`ProbeFn`];
/// `InProgress` transfers completion to `action_complete`.
pub type ActionFn =
    Arc<dyn Fn(Option<&str>, Option<&ProbeContext>) -> DiagResult + Send + Sync>;

/// Wrap a plain closure as a [`ProbeFn`].
pub fn probe_fn<F>(f: F) -> ProbeFn
where
    F: Fn(Option<&str>, Option<&ProbeContext>) -> DiagResult + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Wrap a plain closure as an [`ActionFn`].
pub fn action_fn<F>(f: F) -> ActionFn
where
    F: Fn(Option<&str>, Option<&ProbeContext>) -> DiagResult + Send + Sync + 'static,
{
    Arc::new(f)
}
