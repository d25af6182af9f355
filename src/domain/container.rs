use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Where an entity sits in its provisioning lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Unprovisioned,
    Pulling,
    Created,
    Starting,
    Ready,
    Stopped,
    Removed,
    Failed,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Unprovisioned => "unprovisioned",
            Self::Pulling => "pulling",
            Self::Created => "created",
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Stopped => "stopped",
            Self::Removed => "removed",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Serializes as `{}`, the value type of the engine's `ExposedPorts` map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmptyObject {}

/// Request body for container creation, shaped like the engine API body
/// so a declarative document can be forwarded without translation.
///
/// Keys outside the modelled subset are rejected instead of ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct CreateContainerOptions {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub config: ContainerConfig,
    #[serde(default)]
    pub host_config: HostConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct ContainerConfig {
    #[serde(default)]
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entrypoint: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    /// Keys are `<port>/<proto>`, e.g. `5672/tcp`.
    #[serde(default)]
    pub exposed_ports: BTreeMap<String, EmptyObject>,
    #[serde(default)]
    pub env: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cmd: Option<Vec<String>>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct HostConfig {
    #[serde(default)]
    pub port_bindings: BTreeMap<String, Vec<PortBinding>>,
    /// `host:container[:mode]` volume binds.
    #[serde(default)]
    pub binds: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_mode: Option<String>,
    #[serde(default)]
    pub publish_all_ports: bool,
    #[serde(default)]
    pub privileged: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct PortBinding {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_ip: Option<String>,
    #[serde(default)]
    pub host_port: String,
}

impl PortBinding {
    pub fn host_port(port: u16) -> Self {
        Self {
            host_ip: None,
            host_port: port.to_string(),
        }
    }
}

impl HostConfig {
    /// The first host port published by this config, in port-key order.
    pub fn first_host_port(&self) -> Option<u16> {
        self.port_bindings
            .values()
            .flatten()
            .find_map(|binding| binding.host_port.parse().ok())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoveContainerOptions {
    pub id: String,
    pub remove_volumes: bool,
    pub force: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullImageOptions {
    pub repository: String,
    pub tag: String,
}

impl PullImageOptions {
    /// `repo:tag`, or `repo@digest` when the tag is a content digest.
    pub fn reference(&self) -> String {
        if self.tag.contains(':') {
            format!("{}@{}", self.repository, self.tag)
        } else {
            format!("{}:{}", self.repository, self.tag)
        }
    }
}

/// An image reference split into repository and tag (or digest).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    pub repository: String,
    pub tag: String,
}

impl ImageRef {
    pub fn parse(image: &str) -> Self {
        let image = image.trim();

        if let Some((repository, digest)) = image.split_once('@') {
            return Self {
                repository: repository.to_string(),
                tag: digest.to_string(),
            };
        }

        // A colon before the last slash belongs to a registry host:port.
        let name_start = image.rfind('/').map(|i| i + 1).unwrap_or(0);
        match image[name_start..].rfind(':') {
            Some(offset) => {
                let split = name_start + offset;
                Self {
                    repository: image[..split].to_string(),
                    tag: image[split + 1..].to_string(),
                }
            }
            None => Self {
                repository: image.to_string(),
                tag: "latest".to_string(),
            },
        }
    }

    pub fn pull_options(&self) -> PullImageOptions {
        PullImageOptions {
            repository: self.repository.clone(),
            tag: self.tag.clone(),
        }
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.pull_options().reference())
    }
}
