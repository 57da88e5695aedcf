//! Persistence-diagram vectorization for neurosim
//!
//! Turns variable-length persistence diagrams into fixed-length feature
//! vectors:
//! - math: kernel density, persistence points, legacy kernel-density vectors
//! - topology: persistence images, Betti and life-entropy curves
//! - diagram: validation, per-diagram scaling, the diagram cache
//! - engine: the two-pass vectorization engine
//! - artifact: JSON and compressed vector files

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod artifact;
pub mod diagram;
pub mod engine;
pub mod math;
pub mod topology;

pub use artifact::{RequestedKey, VectorArtifact, VectorEncoding};
pub use diagram::{
    Diagram, DiagramCache, DiagramSource, DiagramStore, NeuriteType, RawDiagram, ScalingPolicy,
};
pub use engine::{GlobalLimits, VectorizationEngine, VectorizationTechnique};
pub use topology::{get_limits, Limits, NativeTopology, TopologySummary};
