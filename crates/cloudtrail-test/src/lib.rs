//! Integration tests for the Atmos CloudTrail component
//!
//! The `component` test binary deploys the `cloudtrail-bucket` dependency,
//! runs every [`Scenario`] against it and compares the component outputs
//! with what CloudTrail reports for the deployed trail.

pub mod error;
pub mod scenario;
pub mod trail;
pub mod verify;

pub use error::{TrailError, TrailResult};
pub use scenario::{register, Scenario, BUCKET_OUTPUT, DEPENDENCY_COMPONENT, STACK, TEST_REGION};
pub use trail::{find_trail, CloudTrailClient, TrailLookup, TrailRecord};
pub use verify::{compare, Expectation, FieldCheck, TrailOutputs};
