use super::{CreateContainerOptions, PullImageOptions, RemoveContainerOptions};
use anyhow::Result;
use std::fmt::Debug;
use std::io::{self, Write};
use std::net::TcpStream;

/// Trait for container engine operations
///
/// Implementations must tolerate concurrent use: several entities may be
/// provisioned at once against the same engine.
pub trait ContainerEngine: Send + Sync + Debug {
    /// Create a container and return the engine-assigned id
    fn create_container(&self, options: &CreateContainerOptions) -> Result<String>;

    /// Start a created container
    fn start_container(&self, id: &str) -> Result<()>;

    /// Stop a container, killing it after `grace_secs`
    fn stop_container(&self, id: &str, grace_secs: u64) -> Result<()>;

    /// Remove a container
    fn remove_container(&self, options: &RemoveContainerOptions) -> Result<()>;

    /// Pull an image, streaming progress into `output`
    fn pull_image(&self, options: &PullImageOptions, output: &mut dyn Write) -> Result<()>;
}

/// The capability set the lifecycle orchestrator drives.
pub trait Lifecycle {
    /// Human readable name used in logs and error context.
    fn label(&self) -> &str;

    fn create(&mut self) -> Result<String>;

    fn pull(&mut self) -> Result<()>;

    fn start(&mut self) -> Result<()>;

    fn stop(&mut self) -> Result<()>;

    /// Block until the service accepts its wire protocol.
    fn wait_ok(&mut self) -> Result<()>;

    fn remove(&mut self) -> Result<()>;
}

/// Protocol-specific exchange proving a listener is functionally up.
///
/// Called with a freshly connected stream that already carries the probe's
/// read and write timeouts. Any error means "not ready yet".
pub trait Handshake: Send + Sync + Debug {
    fn name(&self) -> &'static str;

    fn exchange(&self, stream: &mut TcpStream) -> io::Result<()>;
}
