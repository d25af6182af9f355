//! In-memory collaborators for exercising lifecycles without a container
//! engine or a real service.

use crate::domain::{
    ContainerEngine, CreateContainerOptions, EngineError, ImageRef, PullImageOptions,
    RemoveContainerOptions,
};
use anyhow::{Result, bail};
use std::collections::{HashMap, HashSet};
use std::io::{self, ErrorKind, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use uuid::Uuid;

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockState {
    Created,
    Running,
    Stopped,
}

#[derive(Debug, Clone)]
pub struct MockContainer {
    pub id: String,
    pub name: String,
    pub state: MockState,
    pub options: CreateContainerOptions,
}

/// Engine double. Records every call as `op:arg` and can be told to fail.
///
/// Create fails with `ImageNotFound` until the image is added or pulled, the
/// way a daemon behaves on a fresh host.
#[derive(Debug, Default)]
pub struct MockEngine {
    containers: RwLock<HashMap<String, MockContainer>>,
    images: RwLock<HashSet<String>>,
    commands: RwLock<Vec<String>>,
    // op -> remaining failures, None means every call fails
    failures: RwLock<HashMap<String, Option<u32>>>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_image(&self, image: &str) {
        write(&self.images).insert(ImageRef::parse(image).to_string());
    }

    pub fn has_image(&self, image: &str) -> bool {
        read(&self.images).contains(&ImageRef::parse(image).to_string())
    }

    /// Every call to `operation` fails from now on.
    pub fn set_fail_on(&self, operation: &str) {
        write(&self.failures).insert(operation.to_string(), None);
    }

    /// The next `times` calls to `operation` fail.
    pub fn fail_times(&self, operation: &str, times: u32) {
        write(&self.failures).insert(operation.to_string(), Some(times));
    }

    pub fn get_commands(&self) -> Vec<String> {
        read(&self.commands).clone()
    }

    /// Number of recorded calls to `operation`.
    pub fn count(&self, operation: &str) -> usize {
        let prefix = format!("{operation}:");
        read(&self.commands)
            .iter()
            .filter(|c| c.starts_with(&prefix))
            .count()
    }

    pub fn container(&self, id: &str) -> Option<MockContainer> {
        read(&self.containers).get(id).cloned()
    }

    pub fn containers(&self) -> Vec<MockContainer> {
        read(&self.containers).values().cloned().collect()
    }

    fn record_command(&self, cmd: String) {
        write(&self.commands).push(cmd);
    }

    fn check_fail(&self, operation: &str) -> Result<()> {
        let mut failures = write(&self.failures);
        match failures.get_mut(operation) {
            Some(None) => bail!("Mock failure on: {operation}"),
            Some(Some(remaining)) if *remaining > 0 => {
                *remaining -= 1;
                bail!("Mock failure on: {operation}")
            }
            _ => Ok(()),
        }
    }

    fn set_state(&self, id: &str, state: MockState) -> Result<()> {
        match write(&self.containers).get_mut(id) {
            Some(container) => {
                container.state = state;
                Ok(())
            }
            None => Err(EngineError::ContainerNotFound(id.to_string()).into()),
        }
    }
}

impl ContainerEngine for MockEngine {
    fn create_container(&self, options: &CreateContainerOptions) -> Result<String> {
        self.record_command(format!("create:{}", options.name));
        self.check_fail("create")?;

        if !self.has_image(&options.config.image) {
            return Err(EngineError::ImageNotFound(options.config.image.clone()).into());
        }

        let mut containers = write(&self.containers);
        if containers.values().any(|c| c.name == options.name) {
            return Err(EngineError::NameConflict(options.name.clone()).into());
        }

        let id = Uuid::new_v4().simple().to_string();
        containers.insert(
            id.clone(),
            MockContainer {
                id: id.clone(),
                name: options.name.clone(),
                state: MockState::Created,
                options: options.clone(),
            },
        );
        Ok(id)
    }

    fn start_container(&self, id: &str) -> Result<()> {
        self.record_command(format!("start:{id}"));
        self.check_fail("start")?;
        self.set_state(id, MockState::Running)
    }

    fn stop_container(&self, id: &str, grace_secs: u64) -> Result<()> {
        self.record_command(format!("stop:{id}:{grace_secs}"));
        self.check_fail("stop")?;
        self.set_state(id, MockState::Stopped)
    }

    fn remove_container(&self, options: &RemoveContainerOptions) -> Result<()> {
        self.record_command(format!("remove:{}", options.id));
        self.check_fail("remove")?;

        match write(&self.containers).remove(&options.id) {
            Some(_) => Ok(()),
            None => Err(EngineError::ContainerNotFound(options.id.clone()).into()),
        }
    }

    fn pull_image(&self, options: &PullImageOptions, output: &mut dyn Write) -> Result<()> {
        let reference = options.reference();
        self.record_command(format!("pull:{reference}"));
        self.check_fail("pull")?;

        writeln!(output, "{}: Pulling from {}", options.tag, options.repository)?;
        writeln!(output, "Status: Downloaded newer image for {reference}")?;
        write(&self.images).insert(reference);
        Ok(())
    }
}

/// Clonable in-memory `Write` sink.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl SharedBuffer {
    pub fn contents(&self) -> String {
        let bytes = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// What a [`FakeService`] does with each accepted connection.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Read the client's opening bytes, then answer with these bytes.
    Line(Vec<u8>),
    /// Read the client's opening bytes, then hang up.
    Close,
    /// Read until the client hangs up, never answering.
    Silent,
}

/// A TCP listener on 127.0.0.1 standing in for a service's published port.
pub struct FakeService {
    port: u16,
    accepted: Arc<AtomicUsize>,
    closed_by_client: Arc<AtomicUsize>,
    received: Arc<Mutex<Vec<Vec<u8>>>>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl FakeService {
    pub fn spawn(reply: Reply) -> io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let port = listener.local_addr()?.port();
        Ok(Self::serve(port, Some(listener), Duration::ZERO, reply))
    }

    /// Starts listening only after `delay`, so early probes are refused.
    pub fn spawn_delayed(delay: Duration, reply: Reply) -> io::Result<Self> {
        let port = TcpListener::bind("127.0.0.1:0")?.local_addr()?.port();
        Ok(Self::serve(port, None, delay, reply))
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    /// Connections the client closed from its side.
    pub fn closed_by_client(&self) -> usize {
        self.closed_by_client.load(Ordering::SeqCst)
    }

    /// Opening bytes read from each connection, in accept order.
    pub fn received(&self) -> Vec<Vec<u8>> {
        self.received
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn serve(port: u16, listener: Option<TcpListener>, delay: Duration, reply: Reply) -> Self {
        let accepted = Arc::new(AtomicUsize::new(0));
        let closed_by_client = Arc::new(AtomicUsize::new(0));
        let received = Arc::new(Mutex::new(Vec::new()));
        let stop = Arc::new(AtomicBool::new(false));

        let handle = {
            let accepted = accepted.clone();
            let closed_by_client = closed_by_client.clone();
            let received = received.clone();
            let stop = stop.clone();

            thread::spawn(move || {
                if !delay.is_zero() {
                    thread::sleep(delay);
                }
                let listener = match listener {
                    Some(listener) => listener,
                    None => match TcpListener::bind(("127.0.0.1", port)) {
                        Ok(listener) => listener,
                        Err(_) => return,
                    },
                };
                if listener.set_nonblocking(true).is_err() {
                    return;
                }

                while !stop.load(Ordering::SeqCst) {
                    match listener.accept() {
                        Ok((stream, _)) => {
                            accepted.fetch_add(1, Ordering::SeqCst);
                            let outcome = handle_connection(stream, &reply);
                            if let Ok((opening, client_closed)) = outcome {
                                if client_closed {
                                    closed_by_client.fetch_add(1, Ordering::SeqCst);
                                }
                                received
                                    .lock()
                                    .unwrap_or_else(PoisonError::into_inner)
                                    .push(opening);
                            }
                        }
                        Err(e) if e.kind() == ErrorKind::WouldBlock => {
                            thread::sleep(Duration::from_millis(5));
                        }
                        Err(_) => break,
                    }
                }
            })
        };

        Self {
            port,
            accepted,
            closed_by_client,
            received,
            stop,
            handle: Some(handle),
        }
    }
}

impl Drop for FakeService {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn handle_connection(mut stream: TcpStream, reply: &Reply) -> io::Result<(Vec<u8>, bool)> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(Duration::from_millis(500)))?;

    let mut opening = Vec::new();
    let mut client_closed = false;
    let mut chunk = [0u8; 64];

    // Opening bytes: up to the 8-byte protocol header, or until the client
    // closes or goes quiet.
    while opening.len() < 8 {
        match stream.read(&mut chunk) {
            Ok(0) => {
                client_closed = true;
                break;
            }
            Ok(n) => opening.extend_from_slice(&chunk[..n]),
            Err(_) => break,
        }
    }

    match reply {
        Reply::Line(bytes) => stream.write_all(bytes)?,
        Reply::Close => {}
        Reply::Silent => {
            if !client_closed {
                stream.set_read_timeout(Some(Duration::from_secs(2)))?;
                loop {
                    match stream.read(&mut chunk) {
                        Ok(0) => {
                            client_closed = true;
                            break;
                        }
                        Ok(_) => continue,
                        Err(_) => break,
                    }
                }
            }
        }
    }

    Ok((opening, client_closed))
}
