pub mod blueprint;
mod container;
pub mod document;
pub mod errors;
pub mod handshake;
pub mod traits;

pub use blueprint::{Blueprint, POSTGIS_HOST_PORT, RABBITMQ_HOST_PORT, Readiness};
pub use container::{
    ContainerConfig, CreateContainerOptions, EmptyObject, HostConfig, ImageRef, LifecycleState,
    PortBinding, PullImageOptions, RemoveContainerOptions,
};
pub use document::{load_document, parse_document};
pub use errors::{DocumentError, EngineError, LifecycleError};
pub use handshake::{AMQP_PROTOCOL_HEADER, AmqpHandshake, BareConnect};
pub use traits::{ContainerEngine, Handshake, Lifecycle};
