//! Software agents recorded in generation activities

use neurosim_core::SoftwareAgent;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// The registration tooling itself
pub fn registration_agent() -> SoftwareAgent {
    SoftwareAgent {
        id: format!("urn:neurosim:registration:{}", VERSION),
        name: "neurosim registration".to_string(),
    }
}

/// The vectorization tooling that produced the vectors
pub fn vectorization_agent() -> SoftwareAgent {
    SoftwareAgent {
        id: format!("urn:neurosim:vectorize:{}", VERSION),
        name: "neurosim vectorize".to_string(),
    }
}

/// Agents of an activity, with the vectorization agent when it took part
pub fn was_associated_with(vectorized: bool) -> Vec<SoftwareAgent> {
    if vectorized {
        vec![vectorization_agent(), registration_agent()]
    } else {
        vec![registration_agent()]
    }
}
