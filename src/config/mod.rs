//! Desired-state model for funcsync.
//!
//! This module handles all document-related functionality:
//! - Parsing and deserializing `funcsync.yaml`
//! - Validation of fields and cross-entity references
//! - Computing document and secret-reference digests

mod spec;
mod parser;
mod validator;
mod hash;

pub use spec::{
    Artifact, DesiredState, FunctionApp, GatewayConfig, HostingPlan, HttpMethod, JournalBackend,
    JournalConfig, OsType, ResourceId, RouteBinding, RuntimeDescriptor, RuntimeProfile,
    SUPPORTED_VERSION, SecretRef, SettingValue,
};
pub use parser::{ConfigParser, DEFAULT_STATE_FILES, apply_env_overrides, find_state_file};
pub use validator::{ConfigValidator, ValidationError, ValidationResult};
pub use hash::{ConfigHasher, SECRET_DIGEST_KEY};
