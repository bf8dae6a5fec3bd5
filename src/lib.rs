//! See README.md for more

mod misc;
/// Parsing helpers for ECS ARNs and names
pub mod parsing;
/// Service redeploy orchestration
pub mod deploy;
/// Thin adapter over the ECS control plane
pub mod ecs;
/// Interactive shells into running containers
pub mod exec;
/// Task definition JSON documents
pub mod taskdef;
pub use misc::*;
/// This reexport helps with dependency wrangling
pub use stacked_errors;
