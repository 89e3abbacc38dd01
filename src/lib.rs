// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![deny(missing_docs)]                // All public items must be documented
#![deny(dead_code)]                   // Unused code is forbidden
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![deny(unused_imports)]              // Unused imports are forbidden
#![deny(unused_variables)]            // Unused variables are forbidden
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::missing_const_for_fn)] // Force const when possible
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::module_inception)]    // Module with same name as crate warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::shadow_unrelated)]    // Shadowing unrelated variables warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # funcsync
//!
//! A declarative, idempotent reconciler for serverless search function apps
//! placed behind an API gateway.
//!
//! ## Overview
//!
//! funcsync reads a desired-state document (hosting plans, function apps with
//! their settings, gateway routes) and drives a cloud provider's control
//! plane to that state. Re-running it against a converged provider changes
//! nothing, and a failure in one app never blocks unrelated apps.
//!
//! ## Architecture
//!
//! 1. **Desired state**: defined in `funcsync.yaml`
//! 2. **Observed state**: read from the provider
//! 3. **Plan**: ordered Create/Update/Delete/Skip operations with dependencies
//! 4. **Execution**: tier by tier, bounded parallelism, per-resource results
//!
//! ## Modules
//!
//! - [`config`]: Document parsing, validation and hashing
//! - [`provider`]: Control-plane client, state reader and provisioner
//! - [`settings`]: Secret resolution and app settings
//! - [`gateway`]: Gateway policy rendering and synchronization
//! - [`planner`]: Diff, plan execution and results
//! - [`reconciler`]: Observe, diff, execute, report
//! - [`journal`]: Run journal and its lock (local, S3)
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! version: 1
//! resource_group: rg-search
//! region: eastus
//! plans:
//!   - name: search-plan
//!     sku: Y1
//! apps:
//!   - name: html-search
//!     plan: search-plan
//!     runtime: { language: python, version: "3.11" }
//!     profile: custom
//!     storage_account: searchfuncstore
//!     artifact: { location: "https://builds/html-search.zip", sha256: "<64 hex>" }
//! routes:
//!   - path: /search
//!     method: POST
//!     backend: html-search
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cli;
pub mod config;
pub mod error;
pub mod gateway;
pub mod journal;
pub mod planner;
pub mod provider;
pub mod reconciler;
pub mod settings;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{ConfigHasher, ConfigParser, ConfigValidator, DesiredState};
pub use error::{FuncsyncError, Result};
pub use journal::{JournalStore, LocalJournalStore, S3JournalStore};
pub use planner::{DeploymentReport, DiffEngine, PlanExecutor, ReconciliationPlan};
pub use provider::{CloudProvider, HttpProvider, InMemoryProvider};
pub use reconciler::{DriftReport, ReconcileOptions, Reconciler};
