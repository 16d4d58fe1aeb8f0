//! Workflow execution engine for plans of LLM-generated scripts.
//!
//! A plan is an ordered JSON list of task descriptors. The engine walks the
//! list, asking external collaborator commands to generate (and, on failure,
//! repair) a script per task, validating the script's imports against the
//! local environment and a package registry, and executing candidates inside
//! a shared workspace directory. Vision tasks take a separate retry-only
//! path whose output lands in an artifact file rather than the prompt
//! context.
//!
//! Seams are traits: [`agents`] defines the collaborator roles and [`deps`]
//! the import probe and registry, so tests script them without spawning
//! model processes or touching the network.

pub mod agents;
pub mod config;
pub mod deps;
pub mod driver;
pub mod fence;
pub mod interp;
pub mod logging;
pub mod plan;
pub mod process;
pub mod prompt;
pub mod retry;
pub mod sandbox;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod vision;
pub mod workspace;
