use crate::domain::{Blueprint, ContainerEngine};
use crate::infra::config::{DEFAULT_CONFIG_NAME, default_config_path, expand_path, load_layered};
use crate::infra::{AppConfig, CliEngine};
use crate::services::{Entity, WaitPolicy};
use anyhow::Result;
use clap::Args;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Readiness flags shared by the commands that provision containers.
#[derive(Args, Debug, Clone, Default)]
pub struct WaitArgs {
    /// Give up waiting for readiness after this many seconds (0 waits forever)
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Give up after this many probe attempts
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u32).range(1..))]
    pub max_attempts: Option<u32>,

    /// Remove containers that fail to become ready
    #[arg(long)]
    pub cleanup_on_failure: bool,
}

/// Everything a command needs: the resolved config and an engine client.
pub struct CliContext {
    pub config: AppConfig,
    pub engine: Arc<dyn ContainerEngine>,
}

impl CliContext {
    /// Loads the config file and applies command line overrides on top.
    pub fn load(config_path: Option<&str>, engine: Option<&str>) -> Result<Self> {
        // An explicit file replaces the user and project layers.
        let paths = match config_path {
            Some(raw) => vec![expand_path(raw)?],
            None => vec![default_config_path(), PathBuf::from(DEFAULT_CONFIG_NAME)],
        };
        let mut config = load_layered(&paths)?;

        if let Some(binary) = engine {
            config.engine.binary = Some(binary.to_string());
        }

        debug!(config = ?paths, engine = config.engine_binary(), "configuration loaded");

        let engine = Arc::new(CliEngine::new(config.engine_binary()));
        Ok(Self::new(config, engine))
    }

    pub fn new(config: AppConfig, engine: Arc<dyn ContainerEngine>) -> Self {
        Self { config, engine }
    }

    pub fn wait_policy(&self, args: &WaitArgs) -> WaitPolicy {
        let mut policy = self.config.wait_policy();
        if let Some(secs) = args.timeout {
            policy.timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Some(attempts) = args.max_attempts {
            policy.max_attempts = Some(attempts);
        }
        policy
    }

    pub fn entity(&self, blueprint: Blueprint, args: &WaitArgs) -> Entity {
        Entity::new(self.engine.clone(), blueprint)
            .with_probe_host(self.config.probe_host())
            .with_wait_policy(self.wait_policy(args))
    }
}
