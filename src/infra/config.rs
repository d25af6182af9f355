use crate::domain::Blueprint;
use crate::services::WaitPolicy;
use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_CONFIG_NAME: &str = "conjure.toml";

pub fn default_config_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
        .join(".config/conjure")
}

pub fn default_config_path() -> PathBuf {
    default_config_dir().join(DEFAULT_CONFIG_NAME)
}

/// Expands `~` and environment variables in a user supplied path.
pub fn expand_path(raw: &str) -> Result<PathBuf> {
    let expanded =
        shellexpand::full(raw).with_context(|| format!("expanding path {raw:?}"))?;
    Ok(PathBuf::from(expanded.as_ref()))
}

#[derive(Deserialize, Debug, Default, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// Engine CLI to drive, `docker` when unset.
    pub binary: Option<String>,
}

#[derive(Deserialize, Debug, Default, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ReadinessConfig {
    pub host: Option<String>,
    pub interval_ms: Option<u64>,
    pub max_attempts: Option<u32>,
    /// 0 disables the deadline.
    pub timeout_secs: Option<u64>,
    pub connect_timeout_ms: Option<u64>,
    pub read_timeout_ms: Option<u64>,
}

/// Per-service overrides applied on top of a built-in blueprint.
#[derive(Deserialize, Debug, Default, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ServiceOverride {
    pub image: Option<String>,
    pub tag: Option<String>,
    pub host_port: Option<u16>,
}

#[derive(Deserialize, Debug, Default, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub readiness: ReadinessConfig,
    /// Overrides defined as [services.NAME]
    #[serde(default)]
    pub services: HashMap<String, ServiceOverride>,
}

impl AppConfig {
    /// Merges another AppConfig into self.
    /// Values from `other` overwrite values in `self` if present.
    pub fn merge(&mut self, other: AppConfig) {
        if let Some(binary) = other.engine.binary {
            self.engine.binary = Some(binary);
        }

        let ours = &mut self.readiness;
        let theirs = other.readiness;
        if theirs.host.is_some() {
            ours.host = theirs.host;
        }
        if theirs.interval_ms.is_some() {
            ours.interval_ms = theirs.interval_ms;
        }
        if theirs.max_attempts.is_some() {
            ours.max_attempts = theirs.max_attempts;
        }
        if theirs.timeout_secs.is_some() {
            ours.timeout_secs = theirs.timeout_secs;
        }
        if theirs.connect_timeout_ms.is_some() {
            ours.connect_timeout_ms = theirs.connect_timeout_ms;
        }
        if theirs.read_timeout_ms.is_some() {
            ours.read_timeout_ms = theirs.read_timeout_ms;
        }

        // Services with the same name in `other` replace field by field
        for (name, service) in other.services {
            let existing = self.services.entry(name).or_default();
            if service.image.is_some() {
                existing.image = service.image;
            }
            if service.tag.is_some() {
                existing.tag = service.tag;
            }
            if service.host_port.is_some() {
                existing.host_port = service.host_port;
            }
        }
    }

    pub fn engine_binary(&self) -> &str {
        self.engine.binary.as_deref().unwrap_or("docker")
    }

    pub fn probe_host(&self) -> &str {
        self.readiness.host.as_deref().unwrap_or("localhost")
    }

    pub fn wait_policy(&self) -> WaitPolicy {
        let defaults = WaitPolicy::default();
        let r = &self.readiness;

        WaitPolicy {
            interval: r
                .interval_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.interval),
            max_attempts: r.max_attempts.or(defaults.max_attempts),
            timeout: match r.timeout_secs {
                Some(0) => None,
                Some(secs) => Some(Duration::from_secs(secs)),
                None => defaults.timeout,
            },
            connect_timeout: r
                .connect_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.connect_timeout),
            read_timeout: r
                .read_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.read_timeout),
        }
    }

    /// Built-in blueprint for `label` with this config's overrides applied.
    pub fn blueprint(&self, label: &str) -> Result<Blueprint> {
        let Some(mut blueprint) = Blueprint::builtin(label) else {
            bail!(
                "unknown service '{label}', expected one of: {}",
                Blueprint::builtin_labels().join(", ")
            );
        };

        if let Some(overrides) = self.services.get(label) {
            if let Some(image) = &overrides.image {
                blueprint = blueprint.with_image(image);
            }
            if let Some(tag) = &overrides.tag {
                blueprint = blueprint.with_tag(tag);
            }
            if let Some(port) = overrides.host_port {
                blueprint = blueprint.with_host_port(port);
            }
        }

        Ok(blueprint)
    }

    /// Rejects overrides for services that do not exist and readiness
    /// values a probe cannot run with.
    pub fn validate(&self) -> Result<()> {
        let r = &self.readiness;
        let zeroed = [
            ("interval_ms", r.interval_ms),
            ("connect_timeout_ms", r.connect_timeout_ms),
            ("read_timeout_ms", r.read_timeout_ms),
            ("max_attempts", r.max_attempts.map(u64::from)),
        ]
        .into_iter()
        .find_map(|(key, value)| (value == Some(0)).then_some(key));
        if let Some(key) = zeroed {
            bail!("[readiness] {key} must be greater than 0");
        }

        for name in self.services.keys() {
            if Blueprint::builtin(name).is_none() {
                bail!(
                    "[services.{name}] does not name a known service ({})",
                    Blueprint::builtin_labels().join(", ")
                );
            }
        }
        Ok(())
    }
}

/// Loads `path`, falling back to defaults when the file does not exist.
pub fn load_app_config(path: &Path) -> Result<AppConfig> {
    if !path.exists() {
        debug!(path = %path.display(), "no config file, using defaults");
        return Ok(AppConfig::default());
    }

    let content =
        fs::read_to_string(path).with_context(|| format!("reading config {:?}", path))?;
    let config: AppConfig =
        toml::from_str(&content).with_context(|| format!("parsing config {:?}", path))?;
    config.validate()?;

    Ok(config)
}

/// Loads each existing file in order, later files overriding earlier ones.
pub fn load_layered(paths: &[PathBuf]) -> Result<AppConfig> {
    let mut config = AppConfig::default();
    for path in paths {
        config.merge(load_app_config(path)?);
    }
    Ok(config)
}
