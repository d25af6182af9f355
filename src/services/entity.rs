use super::readiness::{CancelToken, ProbeTarget, WaitPolicy, wait_ready};
use crate::domain::{
    Blueprint, ContainerEngine, EngineError, Lifecycle, LifecycleError, LifecycleState,
    RemoveContainerOptions,
};
use anyhow::{Context, Result};
use std::fmt;
use std::io::{self, Write};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Seconds the engine waits after SIGTERM before killing on stop.
pub const STOP_GRACE_SECS: u64 = 3;

/// One conjurable service: its blueprint plus the container it owns.
///
/// The container id is set once a create succeeds and never changes after.
pub struct Entity {
    engine: Arc<dyn ContainerEngine>,
    blueprint: Blueprint,
    probe_host: String,
    policy: WaitPolicy,
    cancel: CancelToken,
    pull_output: Box<dyn Write + Send>,
    id: Option<String>,
    name: Option<String>,
    started: bool,
    state: LifecycleState,
}

impl Entity {
    pub fn new(engine: Arc<dyn ContainerEngine>, blueprint: Blueprint) -> Self {
        Self {
            engine,
            blueprint,
            probe_host: "localhost".to_string(),
            policy: WaitPolicy::default(),
            cancel: CancelToken::new(),
            pull_output: Box::new(io::stdout()),
            id: None,
            name: None,
            started: false,
            state: LifecycleState::Unprovisioned,
        }
    }

    pub fn rabbitmq(engine: Arc<dyn ContainerEngine>) -> Self {
        Self::new(engine, Blueprint::rabbitmq())
    }

    pub fn postgis(engine: Arc<dyn ContainerEngine>) -> Self {
        Self::new(engine, Blueprint::postgis())
    }

    pub fn with_wait_policy(mut self, policy: WaitPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_probe_host(mut self, host: impl Into<String>) -> Self {
        self.probe_host = host.into();
        self
    }

    pub fn with_pull_output(mut self, output: Box<dyn Write + Send>) -> Self {
        self.pull_output = output;
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn blueprint(&self) -> &Blueprint {
        &self.blueprint
    }

    pub fn host_port(&self) -> Option<u16> {
        self.blueprint.host_port()
    }

    pub fn probe_target(&self) -> Option<ProbeTarget> {
        self.blueprint
            .readiness()
            .map(|r| ProbeTarget::new(self.probe_host.clone(), r.host_port))
    }

    /// A handle that aborts this entity's readiness wait from another thread.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    fn require_id(&self) -> Result<String> {
        self.id.clone().ok_or_else(|| {
            LifecycleError::NotCreated {
                entity: self.blueprint.label().to_string(),
            }
            .into()
        })
    }

    fn track<T>(&mut self, outcome: Result<T>) -> Result<T> {
        if outcome.is_err() {
            self.state = LifecycleState::Failed;
        }
        outcome
    }
}

/// Force-removes `id` and its volumes. A container the engine no longer knows
/// counts as removed; the returned flag says whether it was still there.
pub fn force_remove(engine: &dyn ContainerEngine, id: &str) -> Result<bool> {
    let options = RemoveContainerOptions {
        id: id.to_string(),
        remove_volumes: true,
        force: true,
    };

    match engine.remove_container(&options) {
        Ok(()) => Ok(true),
        Err(e)
            if matches!(
                e.downcast_ref::<EngineError>(),
                Some(EngineError::ContainerNotFound(_))
            ) =>
        {
            Ok(false)
        }
        Err(e) => Err(e.context(format!("removing container {id}"))),
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("label", &self.blueprint.label())
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl Lifecycle for Entity {
    fn label(&self) -> &str {
        self.blueprint.label()
    }

    fn create(&mut self) -> Result<String> {
        if let Some(id) = &self.id {
            return Err(LifecycleError::AlreadyCreated {
                entity: self.label().to_string(),
                id: id.clone(),
            }
            .into());
        }

        let options = self.blueprint.container_options();
        debug!(name = %options.name, image = %options.config.image, "creating container");

        let outcome = self
            .engine
            .create_container(&options)
            .with_context(|| format!("creating container {}", options.name));
        let id = self.track(outcome)?;

        info!(entity = self.label(), name = %options.name, %id, "container created");
        self.id = Some(id.clone());
        self.name = Some(options.name);
        self.state = LifecycleState::Created;
        Ok(id)
    }

    fn pull(&mut self) -> Result<()> {
        let image = self.blueprint.image();
        info!(entity = self.label(), %image, "pulling image");
        self.state = LifecycleState::Pulling;

        let outcome = self
            .engine
            .pull_image(&image.pull_options(), &mut *self.pull_output)
            .with_context(|| format!("pulling image {image}"));
        self.track(outcome)?;

        self.state = LifecycleState::Unprovisioned;
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        let id = self.require_id()?;
        self.state = LifecycleState::Starting;

        let outcome = self
            .engine
            .start_container(&id)
            .with_context(|| format!("starting container {id}"));
        self.track(outcome)?;

        info!(entity = self.label(), %id, "container started");
        self.started = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        let id = self.require_id()?;

        let outcome = self
            .engine
            .stop_container(&id, STOP_GRACE_SECS)
            .with_context(|| format!("stopping container {id}"));
        self.track(outcome)?;

        info!(entity = self.label(), %id, "container stopped");
        self.started = false;
        self.state = LifecycleState::Stopped;
        Ok(())
    }

    fn wait_ok(&mut self) -> Result<()> {
        if !self.started {
            return Err(LifecycleError::NotStarted {
                entity: self.label().to_string(),
            }
            .into());
        }

        let Some(readiness) = self.blueprint.readiness().cloned() else {
            debug!(entity = self.label(), "no readiness probe, started is ready");
            self.state = LifecycleState::Ready;
            return Ok(());
        };

        let target = ProbeTarget::new(self.probe_host.clone(), readiness.host_port);
        info!(
            entity = self.label(),
            %target,
            handshake = readiness.handshake.name(),
            "waiting for service"
        );

        let outcome = wait_ready(
            &target,
            readiness.handshake.as_ref(),
            &self.policy,
            &self.cancel,
        )
        .map_err(anyhow::Error::from);
        self.track(outcome)?;

        self.state = LifecycleState::Ready;
        Ok(())
    }

    fn remove(&mut self) -> Result<()> {
        let Some(id) = self.id.clone() else {
            debug!(entity = self.label(), "nothing to remove, container never created");
            return Ok(());
        };

        match force_remove(self.engine.as_ref(), &id) {
            Ok(true) => info!(entity = self.label(), %id, "container removed"),
            Ok(false) => warn!(entity = self.label(), %id, "container already gone"),
            Err(e) => {
                self.state = LifecycleState::Failed;
                return Err(e);
            }
        }

        self.started = false;
        self.state = LifecycleState::Removed;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MockEngine;

    fn mock_with_images() -> Arc<MockEngine> {
        let mock = Arc::new(MockEngine::new());
        mock.add_image("rabbitmq:latest");
        mock.add_image("postgis/postgis:latest");
        mock
    }

    #[test]
    fn test_create_records_id_and_name() {
        let mock = mock_with_images();
        let mut entity = Entity::rabbitmq(mock.clone());

        let id = entity.create().unwrap();

        assert_eq!(entity.id(), Some(id.as_str()));
        assert!(entity.name().unwrap().starts_with("conjured-rabbitmq-"));
        assert_eq!(entity.state(), LifecycleState::Created);
        assert!(mock.container(&id).is_some());
    }

    #[test]
    fn test_create_failure_leaves_id_unset() {
        let mock = Arc::new(MockEngine::new());
        let mut entity = Entity::rabbitmq(mock.clone());

        let err = entity.create().unwrap_err();

        assert!(matches!(
            err.downcast_ref::<EngineError>(),
            Some(EngineError::ImageNotFound(_))
        ));
        assert!(entity.id().is_none());
        assert_eq!(entity.state(), LifecycleState::Failed);
    }

    #[test]
    fn test_create_twice_is_rejected() {
        let mock = mock_with_images();
        let mut entity = Entity::rabbitmq(mock.clone());
        entity.create().unwrap();

        let err = entity.create().unwrap_err();

        assert!(matches!(
            err.downcast_ref::<LifecycleError>(),
            Some(LifecycleError::AlreadyCreated { .. })
        ));
        assert_eq!(mock.count("create"), 1);
    }

    #[test]
    fn test_start_without_id_fails() {
        let mock = mock_with_images();
        let mut entity = Entity::postgis(mock.clone());

        let err = entity.start().unwrap_err();

        assert!(matches!(
            err.downcast_ref::<LifecycleError>(),
            Some(LifecycleError::NotCreated { .. })
        ));
        assert!(mock.get_commands().is_empty());
    }

    #[test]
    fn test_wait_ok_before_start_fails() {
        let mock = mock_with_images();
        let mut entity = Entity::postgis(mock);
        entity.create().unwrap();

        let err = entity.wait_ok().unwrap_err();

        assert!(matches!(
            err.downcast_ref::<LifecycleError>(),
            Some(LifecycleError::NotStarted { .. })
        ));
    }

    #[test]
    fn test_stop_uses_grace_period() {
        let mock = mock_with_images();
        let mut entity = Entity::rabbitmq(mock.clone());
        let id = entity.create().unwrap();
        entity.start().unwrap();

        entity.stop().unwrap();

        assert!(mock.get_commands().contains(&format!("stop:{id}:3")));
        assert_eq!(entity.state(), LifecycleState::Stopped);
    }

    #[test]
    fn test_pull_streams_progress_to_sink() {
        let mock = mock_with_images();
        let sink = crate::test_support::SharedBuffer::default();
        let mut entity =
            Entity::postgis(mock.clone()).with_pull_output(Box::new(sink.clone()));

        entity.pull().unwrap();

        assert!(sink.contents().contains("postgis/postgis:latest"));
        assert!(mock.get_commands().contains(&"pull:postgis/postgis:latest".to_string()));
    }

    #[test]
    fn test_remove_never_created_is_noop() {
        let mock = mock_with_images();
        let mut entity = Entity::rabbitmq(mock.clone());

        entity.remove().unwrap();

        assert!(mock.get_commands().is_empty());
    }

    #[test]
    fn test_remove_twice_tolerates_not_found() {
        let mock = mock_with_images();
        let mut entity = Entity::rabbitmq(mock.clone());
        let id = entity.create().unwrap();

        entity.remove().unwrap();
        entity.remove().unwrap();

        assert_eq!(mock.count("remove"), 2);
        assert!(mock.container(&id).is_none());
        assert_eq!(entity.state(), LifecycleState::Removed);
        assert_eq!(entity.id(), Some(id.as_str()));
    }

    #[test]
    fn test_remove_surfaces_other_engine_errors() {
        let mock = mock_with_images();
        let mut entity = Entity::rabbitmq(mock.clone());
        entity.create().unwrap();
        mock.set_fail_on("remove");

        assert!(entity.remove().is_err());
        assert_eq!(entity.state(), LifecycleState::Failed);
    }

    #[test]
    fn test_probe_target_uses_host_port() {
        let mock = mock_with_images();
        let entity = Entity::rabbitmq(mock).with_probe_host("127.0.0.1");

        assert_eq!(
            entity.probe_target(),
            Some(ProbeTarget::new("127.0.0.1", 35672))
        );
    }
}
