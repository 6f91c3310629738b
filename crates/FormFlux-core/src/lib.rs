//! # FormFlux Core Library
//!
//! Headless engine for schema-driven forms: the schema model, conditional
//! visibility, rule-based validation and per-session form state. Rendering is
//! left to the host.
//!

pub mod condition;
pub mod config;
pub mod error;
pub mod manager;
pub mod schema;
pub mod schema_loader;
pub mod state;

pub mod validation;

pub use config::{CyclePolicy, EngineConfig, ValidationMode};
pub use error::{ImportError, RuleExecutionError, SchemaError, StateError};
pub use manager::{FormManager, FormManagerBuilder, SubmissionResult, SubmitHandler};
pub use schema::{FieldDefinition, FieldKind, FormSchema, Section};
pub use state::{FieldStatus, FormState};
