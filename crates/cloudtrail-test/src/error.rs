//! Error types for CloudTrail verification

use atmos_component_helper::HarnessError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrailError {
    #[error("Trail not found: {0}")]
    NotFound(String),

    #[error("Trail name {name} matched {count} trails, expected exactly one")]
    Ambiguous { name: String, count: usize },

    #[error(transparent)]
    Harness(#[from] HarnessError),
}

pub type TrailResult<T> = Result<T, TrailError>;
