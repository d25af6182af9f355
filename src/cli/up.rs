use super::context::{CliContext, WaitArgs};
use crate::domain::{Blueprint, Lifecycle};
use crate::services::{Entity, run_all};
use anyhow::{Result, bail};
use clap::Args;
use tracing::{error, info, warn};

#[derive(Args, Debug)]
pub struct UpOptions {
    /// Services to conjure (default: every built-in service)
    #[arg(value_name = "SERVICE")]
    pub services: Vec<String>,

    #[command(flatten)]
    pub wait: WaitArgs,
}

pub fn run(options: UpOptions, ctx: &CliContext) -> Result<()> {
    let labels: Vec<String> = if options.services.is_empty() {
        Blueprint::builtin_labels()
            .iter()
            .map(|s| s.to_string())
            .collect()
    } else {
        options.services.clone()
    };

    let mut entities = labels
        .iter()
        .map(|label| Ok(ctx.entity(ctx.config.blueprint(label)?, &options.wait)))
        .collect::<Result<Vec<_>>>()?;

    info!("Conjuring {}...", labels.join(", "));
    let results = run_all(&mut entities);

    settle(&mut entities, results, options.wait.cleanup_on_failure)
}

/// Prints one line per ready entity and reports the failed ones, removing
/// their containers when asked to.
pub fn settle(
    entities: &mut [Entity],
    results: Vec<Result<()>>,
    cleanup_on_failure: bool,
) -> Result<()> {
    let mut failed = Vec::new();

    for (entity, result) in entities.iter_mut().zip(results) {
        match result {
            Ok(()) => println!("{}", summary_line(entity)),
            Err(e) => {
                error!("{} failed: {e:#}", entity.label());
                failed.push(entity.label().to_string());

                if cleanup_on_failure && entity.id().is_some() {
                    if let Err(e) = entity.remove() {
                        warn!("Could not remove {}: {e:#}", entity.label());
                    }
                }
            }
        }
    }

    if !failed.is_empty() {
        bail!("{} service(s) failed: {}", failed.len(), failed.join(", "));
    }

    Ok(())
}

/// `label  name  id  host:port`, tab separated.
pub fn summary_line(entity: &Entity) -> String {
    let endpoint = entity
        .probe_target()
        .map(|t| t.to_string())
        .or_else(|| entity.host_port().map(|p| format!("localhost:{p}")))
        .unwrap_or_else(|| "-".to_string());

    format!(
        "{}\t{}\t{}\t{}",
        entity.label(),
        entity.name().unwrap_or("-"),
        entity.id().unwrap_or("-"),
        endpoint
    )
}
