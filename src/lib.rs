pub mod cli;
pub mod domain;
pub mod infra;
pub mod services;

// Make test_support available for integration tests
pub mod test_support;

pub use domain::{
    Blueprint, ContainerEngine, EngineError, Handshake, Lifecycle, LifecycleError, LifecycleState,
};
pub use infra::CliEngine;
pub use services::{CancelToken, Entity, WaitPolicy, run, run_all};
