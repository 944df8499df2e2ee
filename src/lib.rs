//! Versioned lifecycle manager for per-tenant lead conversion models.
//!
//! Trains a binary classifier from labelled lead rows, publishes every fitted
//! artifact as an immutable version, keeps a durable "active version" pointer
//! per tenant, serves single and batch predictions against it, and rolls the
//! pointer back to any earlier version without retraining.

pub mod config;
pub mod error;
pub mod events;
pub mod ml;
pub mod registry;
pub mod state;
pub mod tenant;

pub use config::Config;
pub use error::{AppError, Result};
pub use events::{ChannelEventSink, EventSink, LifecycleEvent, TracingEventSink};
pub use ml::LeadScoringService;
pub use registry::{ModelRegistry, VersionId};
pub use tenant::{TenantId, DEFAULT_TENANT};
