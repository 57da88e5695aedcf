//! Integration Tests
//!
//! Cross-crate tests over an in-memory deployment:
//! - registration: embedding find-or-create and tags
//! - boosting: boosting factors and statistics through views
//! - pipeline: the twelve stages, alone and end to end
//! - failures: remote failures and missing inputs

#[path = "../common/mod.rs"]
mod common;

mod boosting;
mod failures;
mod pipeline;
mod registration;
