use super::context::CliContext;
use crate::domain::EngineError;
use crate::services::{STOP_GRACE_SECS, force_remove};
use anyhow::{Result, bail};
use clap::Args;
use tracing::{debug, error, info, warn};

#[derive(Args, Debug)]
pub struct DownOptions {
    /// Container ids (or names) to tear down
    #[arg(value_name = "ID", required = true)]
    pub ids: Vec<String>,

    /// Skip the graceful stop and force-remove right away
    #[arg(long)]
    pub no_stop: bool,
}

/// Stops and removes every container, continuing even if individual operations fail
pub fn run(options: DownOptions, ctx: &CliContext) -> Result<()> {
    let mut failed = Vec::new();

    for id in &options.ids {
        if !options.no_stop {
            match ctx.engine.stop_container(id, STOP_GRACE_SECS) {
                Ok(()) => debug!("Container {id} stopped"),
                Err(e)
                    if matches!(
                        e.downcast_ref::<EngineError>(),
                        Some(EngineError::ContainerNotFound(_))
                    ) =>
                {
                    debug!("Container {id} already gone")
                }
                Err(e) => warn!("Failed to stop {id}, removing anyway: {e:#}"),
            }
        }

        match force_remove(ctx.engine.as_ref(), id) {
            Ok(true) => info!("Removed {id}"),
            Ok(false) => warn!("{id} was already removed"),
            Err(e) => {
                error!("Failed to remove {id}: {e:#}");
                failed.push(id.clone());
            }
        }
    }

    if !failed.is_empty() {
        bail!("could not remove: {}", failed.join(", "));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Blueprint, Lifecycle};
    use crate::infra::AppConfig;
    use crate::services::Entity;
    use crate::test_support::MockEngine;
    use std::sync::Arc;

    #[test]
    fn test_down_stops_then_removes() {
        let mock = Arc::new(MockEngine::new());
        mock.add_image("rabbitmq");
        let mut entity = Entity::new(mock.clone(), Blueprint::rabbitmq());
        let id = entity.create().unwrap();
        entity.start().unwrap();

        let ctx = CliContext::new(AppConfig::default(), mock.clone());
        run(
            DownOptions {
                ids: vec![id.clone()],
                no_stop: false,
            },
            &ctx,
        )
        .unwrap();

        assert_eq!(
            &mock.get_commands()[2..],
            &[format!("stop:{id}:3"), format!("remove:{id}")]
        );
        assert!(mock.container(&id).is_none());
    }

    #[test]
    fn test_down_tolerates_unknown_ids() {
        let mock = Arc::new(MockEngine::new());
        let ctx = CliContext::new(AppConfig::default(), mock.clone());

        run(
            DownOptions {
                ids: vec!["gone".into()],
                no_stop: true,
            },
            &ctx,
        )
        .unwrap();

        assert_eq!(mock.get_commands(), vec!["remove:gone".to_string()]);
    }

    #[test]
    fn test_down_reports_remove_failures() {
        let mock = Arc::new(MockEngine::new());
        mock.set_fail_on("remove");
        let ctx = CliContext::new(AppConfig::default(), mock.clone());

        let err = run(
            DownOptions {
                ids: vec!["a".into(), "b".into()],
                no_stop: true,
            },
            &ctx,
        )
        .unwrap_err();

        assert!(err.to_string().contains("a, b"));
        assert_eq!(mock.count("remove"), 2);
    }
}
