//! Orchestrator metadata resolution and log record enrichment.
//!
//! Log records emitted by containers scheduled through Mesos frameworks (Marathon, Chronos) are annotated with the
//! framework, application, and task that produced them. Metadata is derived from each container's environment
//! variables, fetched through an [`EnvironmentProvider`][taskmeta_env::EnvironmentProvider] and cached per container.
#![deny(warnings)]
#![deny(missing_docs)]

pub mod enrichment;
pub mod metadata;
pub mod record;
