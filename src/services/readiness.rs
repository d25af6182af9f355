//! Readiness probing.
//!
//! A published port can lag container start by an image-dependent interval,
//! so "running" is not "ready". The prober dials the host-side port, runs the
//! service's handshake and retries on a fixed interval until the exchange
//! succeeds, the policy's bounds are hit, or the wait is cancelled.

use crate::domain::{Handshake, LifecycleError};
use std::fmt;
use std::io;
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_millis(500);
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(120);
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(1);
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(2);

/// Bounds and pacing of a readiness wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitPolicy {
    /// Fixed pause between attempts.
    pub interval: Duration,
    pub max_attempts: Option<u32>,
    /// Overall deadline, measured from the first attempt.
    pub timeout: Option<Duration>,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            interval: DEFAULT_PROBE_INTERVAL,
            max_attempts: None,
            timeout: Some(DEFAULT_READY_TIMEOUT),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }
}

impl WaitPolicy {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Connect and read timeouts for one attempt. Sockets reject a zero
    /// timeout, so zero falls back to the default.
    pub fn socket_timeouts(&self) -> (Duration, Duration) {
        let or_default = |value: Duration, default| if value.is_zero() { default } else { value };
        (
            or_default(self.connect_timeout, DEFAULT_CONNECT_TIMEOUT),
            or_default(self.read_timeout, DEFAULT_READ_TIMEOUT),
        )
    }
}

/// Shared abort signal for readiness waits. Clones observe the same state.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        let (flag, wake) = &*self.inner;
        *flag.lock().unwrap_or_else(PoisonError::into_inner) = true;
        wake.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sleeps for `duration` or until cancelled. Returns true if cancelled.
    pub fn sleep(&self, duration: Duration) -> bool {
        let (flag, wake) = &*self.inner;
        let guard = flag.lock().unwrap_or_else(PoisonError::into_inner);
        let (guard, _) = wake
            .wait_timeout_while(guard, duration, |cancelled| !*cancelled)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }
}

/// The host-side endpoint a service is reachable on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeTarget {
    pub host: String,
    pub port: u16,
}

impl ProbeTarget {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for ProbeTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Polls `target` until `handshake` succeeds. Returns the number of attempts.
pub fn wait_ready(
    target: &ProbeTarget,
    handshake: &dyn Handshake,
    policy: &WaitPolicy,
    cancel: &CancelToken,
) -> Result<u32, LifecycleError> {
    let started = Instant::now();
    let mut attempts = 0u32;

    loop {
        if cancel.is_cancelled() {
            return Err(LifecycleError::Cancelled {
                target: target.to_string(),
                attempts,
            });
        }

        attempts += 1;
        match probe_once(target, handshake, policy) {
            Ok(()) => {
                debug!(
                    %target,
                    handshake = handshake.name(),
                    attempts,
                    elapsed = ?started.elapsed(),
                    "service is ready"
                );
                return Ok(attempts);
            }
            Err(e) => trace!(%target, attempt = attempts, error = %e, "not ready yet"),
        }

        let exhausted = policy.max_attempts.is_some_and(|max| attempts >= max)
            || policy
                .timeout
                .is_some_and(|limit| started.elapsed() + policy.interval > limit);
        if exhausted {
            return Err(LifecycleError::Timeout {
                target: target.to_string(),
                attempts,
                elapsed: started.elapsed(),
            });
        }

        if cancel.sleep(policy.interval) {
            return Err(LifecycleError::Cancelled {
                target: target.to_string(),
                attempts,
            });
        }
    }
}

/// One connect + handshake. The connection never outlives the attempt.
pub fn probe_once(
    target: &ProbeTarget,
    handshake: &dyn Handshake,
    policy: &WaitPolicy,
) -> io::Result<()> {
    let (connect_timeout, read_timeout) = policy.socket_timeouts();
    let mut stream = connect(target, connect_timeout)?;
    stream.set_read_timeout(Some(read_timeout))?;
    stream.set_write_timeout(Some(read_timeout))?;

    let outcome = handshake.exchange(&mut stream);
    let _ = stream.shutdown(Shutdown::Both);
    outcome
}

fn connect(target: &ProbeTarget, timeout: Duration) -> io::Result<TcpStream> {
    let mut last_err = None;

    for addr in (target.host.as_str(), target.port).to_socket_addrs()? {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => last_err = Some(e),
        }
    }

    Err(last_err.unwrap_or_else(|| {
        io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            format!("{target} resolved to no addresses"),
        )
    }))
}
