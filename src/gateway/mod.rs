//! API gateway route tables.
//!
//! This module renders the gateway policy document from route bindings and
//! applies it with a single replace call.

mod policy;
mod synchronizer;

pub use policy::{PendingRoute, PolicyDocument, PolicyRoute, RenderedPolicy, render_policy};
pub use synchronizer::{PolicySynchronizer, SyncOutcome};
