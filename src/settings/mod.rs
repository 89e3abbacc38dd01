//! App settings resolution and application.
//!
//! This module resolves literal and secret-referenced settings and applies
//! them to function apps, all-or-nothing per app.

mod credentials;
mod configurator;

pub use credentials::{CredentialStore, EnvCredentialStore, StaticCredentialStore};
pub use configurator::{ResolvedSettings, SettingsConfigurator};

#[cfg(test)]
pub use credentials::MockCredentialStore;
