use super::handshake::{AmqpHandshake, BareConnect};
use super::traits::Handshake;
use super::{CreateContainerOptions, EmptyObject, ImageRef, PortBinding};
use std::sync::Arc;
use uuid::Uuid;

pub const RABBITMQ_HOST_PORT: u16 = 35672;
pub const POSTGIS_HOST_PORT: u16 = 35432;

/// How readiness is probed once the container is started.
#[derive(Debug, Clone)]
pub struct Readiness {
    /// Host-side published port, not the container port.
    pub host_port: u16,
    pub handshake: Arc<dyn Handshake>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Naming {
    /// `<prefix>-<random suffix>`, fresh on every create.
    Prefixed(String),
    Fixed(String),
}

/// Everything that distinguishes one conjurable service from another.
#[derive(Debug, Clone)]
pub struct Blueprint {
    label: String,
    naming: Naming,
    options: CreateContainerOptions,
    container_port: Option<String>,
    readiness: Option<Readiness>,
}

impl Blueprint {
    /// Builds a blueprint publishing `container_port` (e.g. `5672/tcp`) on
    /// `host_port`, with every created container named `conjured-<label>-XXXXXX`.
    pub fn service(
        label: &str,
        image: &str,
        container_port: &str,
        host_port: u16,
        handshake: Arc<dyn Handshake>,
    ) -> Self {
        let mut options = CreateContainerOptions::default();
        options.config.image = image.to_string();
        options
            .config
            .exposed_ports
            .insert(container_port.to_string(), EmptyObject {});
        options.host_config.port_bindings.insert(
            container_port.to_string(),
            vec![PortBinding::host_port(host_port)],
        );
        options.host_config.publish_all_ports = true;
        options.host_config.privileged = false;

        Self {
            label: label.to_string(),
            naming: Naming::Prefixed(format!("conjured-{label}")),
            options,
            container_port: Some(container_port.to_string()),
            readiness: Some(Readiness {
                host_port,
                handshake,
            }),
        }
    }

    pub fn rabbitmq() -> Self {
        Self::service(
            "rabbitmq",
            "rabbitmq",
            "5672/tcp",
            RABBITMQ_HOST_PORT,
            Arc::new(AmqpHandshake),
        )
    }

    pub fn postgis() -> Self {
        // The stock image refuses to boot without a password or trust auth.
        Self::service(
            "postgis",
            "postgis/postgis",
            "5432/tcp",
            POSTGIS_HOST_PORT,
            Arc::new(BareConnect),
        )
        .with_env("POSTGRES_HOST_AUTH_METHOD=trust")
    }

    /// Looks up a built-in variant by label.
    pub fn builtin(label: &str) -> Option<Self> {
        match label {
            "rabbitmq" => Some(Self::rabbitmq()),
            "postgis" => Some(Self::postgis()),
            _ => None,
        }
    }

    pub fn builtin_labels() -> &'static [&'static str] {
        &["rabbitmq", "postgis"]
    }

    /// Wraps a parsed declarative document. The document's name is kept as is;
    /// readiness is a bare connect on its first published host port, if any.
    pub fn from_document(options: CreateContainerOptions) -> Self {
        let label = if options.name.is_empty() {
            ImageRef::parse(&options.config.image).repository
        } else {
            options.name.clone()
        };

        let naming = if options.name.is_empty() {
            Naming::Prefixed(format!("conjured-{}", label.replace('/', "-")))
        } else {
            Naming::Fixed(options.name.clone())
        };

        let readiness = options
            .host_config
            .first_host_port()
            .map(|host_port| Readiness {
                host_port,
                handshake: Arc::new(BareConnect) as Arc<dyn Handshake>,
            });

        Self {
            label,
            naming,
            options,
            container_port: None,
            readiness,
        }
    }

    pub fn with_image(mut self, image: &str) -> Self {
        self.options.config.image = image.to_string();
        self
    }

    /// Replaces only the tag of the current image.
    pub fn with_tag(mut self, tag: &str) -> Self {
        let image = ImageRef::parse(&self.options.config.image);
        self.options.config.image = format!("{}:{}", image.repository, tag);
        self
    }

    /// Rebinds the primary published port and the readiness target with it.
    pub fn with_host_port(mut self, host_port: u16) -> Self {
        if let Some(port) = &self.container_port {
            self.options
                .host_config
                .port_bindings
                .insert(port.clone(), vec![PortBinding::host_port(host_port)]);
        }
        if let Some(readiness) = &mut self.readiness {
            readiness.host_port = host_port;
        }
        self
    }

    pub fn with_env(mut self, entry: &str) -> Self {
        self.options.config.env.push(entry.to_string());
        self
    }

    pub fn with_handshake(mut self, handshake: Arc<dyn Handshake>) -> Self {
        if let Some(readiness) = &mut self.readiness {
            readiness.handshake = handshake;
        }
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn image(&self) -> ImageRef {
        ImageRef::parse(&self.options.config.image)
    }

    pub fn host_port(&self) -> Option<u16> {
        self.readiness
            .as_ref()
            .map(|r| r.host_port)
            .or_else(|| self.options.host_config.first_host_port())
    }

    pub fn readiness(&self) -> Option<&Readiness> {
        self.readiness.as_ref()
    }

    /// Options for one create call. Prefixed names get a fresh suffix each time.
    pub fn container_options(&self) -> CreateContainerOptions {
        let mut options = self.options.clone();
        options.name = match &self.naming {
            Naming::Prefixed(prefix) => format!("{prefix}-{}", random_suffix()),
            Naming::Fixed(name) => name.clone(),
        };
        options
    }
}

fn random_suffix() -> String {
    Uuid::new_v4().simple().to_string()[..6].to_string()
}
