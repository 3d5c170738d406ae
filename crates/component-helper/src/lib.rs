//! Atmos component test helper
//!
//! Deploys Terraform components through atmos, hands their outputs to test
//! bodies, and guarantees teardown:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ Fixture                                                      │
//! │   set_up()      copy fixtures + component into a temp dir    │
//! │   suite(name) ──► Suite                                      │
//! │                    add_dependency(component, stack, vars)    │
//! │                    test(name, |case| async { ... })          │
//! │                    run() -> SuiteReport                      │
//! │   tear_down()   remove the temp dir                          │
//! ├──────────────────────────────────────────────────────────────┤
//! │ CaseContext                                                  │
//! │   deploy / output / destroy                                  │
//! │   drift_test / verify_enabled_flag                           │
//! │   check / check_eq   (non-fatal assertions)                  │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod atmos;
pub mod bucket;
pub mod case;
pub mod config;
pub mod context;
pub mod dependency;
pub mod error;
pub mod fixture;
pub mod lifecycle;
pub mod report;
pub mod suite;

pub use atmos::{AtmosCli, ComponentRef, Orchestrator, Outputs, PlanSummary, Subcommand, Vars};
pub use bucket::{BucketCleaner, S3BucketCleaner};
pub use case::{CaseContext, Deployment};
pub use config::{HarnessConfig, Operation, SkipFlags, Timeouts};
pub use context::CallContext;
pub use error::{HarnessError, HarnessResult};
pub use fixture::{AtmosOptions, Fixture};
pub use lifecycle::CaseState;
pub use report::{CaseReport, SuiteReport};
pub use suite::{Suite, SuiteEnv};
