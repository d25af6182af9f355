use super::context::{CliContext, WaitArgs};
use super::up::settle;
use crate::domain::{Blueprint, load_document};
use crate::infra::config::expand_path;
use crate::services;
use anyhow::{Context, Result};
use clap::Args;
use tracing::info;

#[derive(Args, Debug)]
pub struct ApplyOptions {
    /// Container document (JSON or YAML) with Name, Config and HostConfig
    #[arg(value_name = "FILE")]
    pub file: String,

    #[command(flatten)]
    pub wait: WaitArgs,
}

pub fn run(options: ApplyOptions, ctx: &CliContext) -> Result<()> {
    let path = expand_path(&options.file)?;
    let document =
        load_document(&path).with_context(|| format!("loading {}", path.display()))?;

    let blueprint = Blueprint::from_document(document);
    info!("Conjuring {} from {}...", blueprint.label(), path.display());

    let mut entity = ctx.entity(blueprint, &options.wait);
    let result = services::run(&mut entity);

    settle(
        std::slice::from_mut(&mut entity),
        vec![result],
        options.wait.cleanup_on_failure,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DocumentError;
    use crate::infra::AppConfig;
    use crate::test_support::MockEngine;
    use std::io::Write;
    use std::sync::Arc;
    use tempfile::NamedTempFile;

    #[test]
    fn test_malformed_document_never_reaches_engine() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"{ \"Name\": \"broken\", ").unwrap();

        let mock = Arc::new(MockEngine::new());
        let ctx = CliContext::new(AppConfig::default(), mock.clone());
        let options = ApplyOptions {
            file: file.path().display().to_string(),
            wait: WaitArgs::default(),
        };

        let err = run(options, &ctx).unwrap_err();

        assert!(matches!(
            err.downcast_ref::<DocumentError>(),
            Some(DocumentError::Json(_))
        ));
        assert!(mock.get_commands().is_empty());
    }

    #[test]
    fn test_document_without_ports_is_ready_after_start() {
        let mut file = NamedTempFile::new().unwrap();
        let yaml = "Name: fixture-busybox\nConfig:\n  Image: busybox\n  Cmd: [sleep, \"60\"]\n";
        file.write_all(yaml.as_bytes()).unwrap();

        let mock = Arc::new(MockEngine::new());
        mock.add_image("busybox");
        let ctx = CliContext::new(AppConfig::default(), mock.clone());
        let options = ApplyOptions {
            file: file.path().display().to_string(),
            wait: WaitArgs::default(),
        };

        run(options, &ctx).unwrap();

        assert_eq!(
            mock.get_commands()[0],
            "create:fixture-busybox".to_string()
        );
        let created = &mock.containers()[0];
        assert_eq!(
            created.options.config.cmd,
            Some(vec!["sleep".to_string(), "60".to_string()])
        );
    }
}
