//! Cloud provider integration.
//!
//! This module provides the control-plane client trait and its HTTP and
//! in-memory implementations, plus the state reader, the retry policy and
//! the resource provisioner built on top of it.

mod client;
mod http;
mod memory;
mod types;
mod reader;
mod retry;
mod provisioner;

pub use client::CloudProvider;
pub use http::HttpProvider;
pub use memory::{Fault, HOSTNAME_SUFFIX, InMemoryProvider, ProviderOp, RecordedCall};
pub use types::{AppResource, AppSpec, AppState, PlanResource, PlanSpec};
pub use reader::{ObservedState, StateReader};
pub use retry::{Attempted, RetryPolicy};
pub use provisioner::ResourceProvisioner;
