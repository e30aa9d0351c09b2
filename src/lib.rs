//! Package triage: classifies software packages as malicious or benign.
//!
//! A package (archive or directory) is normalized into a snapshot, its
//! metadata is extracted, and a decision engine drives a bounded,
//! tool-mediated classification over the snapshot.

/// Pipeline configuration
pub mod config;
/// Core data types module
pub mod core;
/// Error taxonomy
pub mod error;
/// Bounded file reading
pub mod io;
/// Tracing setup and logging macros
pub mod logging;
/// Async timeout helpers
pub mod timeout;

/// Archive normalizer
pub mod normalize;
/// Analysis tools callable by the decision engine
pub mod tools;
/// Decision engine seam
pub mod engine;
/// Stage orchestration
pub mod stages;
/// Retry wrapper and result assembly
pub mod classify;

/// Classification record persistence
pub mod store;
/// Request staging and the classification service
pub mod ingress;

pub use classify::Classifier;
pub use config::PipelineConfig;
pub use error::{PkgTriageError, Result};
