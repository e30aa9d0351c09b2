//! Core data types for package triage.
//!
//! Identifiers, the package snapshot, the per-request analysis context and
//! the record types produced by a classification.

pub mod context;
pub mod id;
pub mod record;
pub mod snapshot;
