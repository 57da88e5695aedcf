//! In-memory collaborators for neurosim
//!
//! Reference implementations of the contracts in `neurosim-core`, used by
//! the test suites and by local runs without a remote deployment:
//! - store: revisioned, taggable entity store for one bucket
//! - index: brute-force scoring index
//! - deployment: stores per bucket plus live views over them

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod deployment;
pub mod index;
pub mod store;

pub use deployment::MemoryDeployment;
pub use index::BruteForceIndex;
pub use store::MemoryStore;
