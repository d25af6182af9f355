use super::Entity;
use crate::domain::Lifecycle;
use anyhow::{Context, Result};
use std::thread;
use tracing::{info, warn};

/// Drives an entity from unprovisioned to ready.
///
/// A failed create is retried once after pulling the image, which covers a
/// fresh host where the image was never cached. A second create failure is a
/// configuration problem and is returned as is.
pub fn run<L: Lifecycle + ?Sized>(entity: &mut L) -> Result<()> {
    let label = entity.label().to_string();

    if let Err(e) = entity.create() {
        warn!(entity = %label, error = %e, "create failed, pulling image and retrying");

        entity
            .pull()
            .with_context(|| format!("{label}: pull after failed create"))?;
        entity
            .create()
            .with_context(|| format!("{label}: create after pull"))?;
    }

    entity.start().with_context(|| format!("{label}: start"))?;
    entity
        .wait_ok()
        .with_context(|| format!("{label}: wait for readiness"))?;

    info!(entity = %label, "ready");
    Ok(())
}

/// Runs every entity on its own thread. Results come back in input order.
pub fn run_all(entities: &mut [Entity]) -> Vec<Result<()>> {
    if entities.is_empty() {
        return Vec::new();
    }

    thread::scope(|scope| {
        let handles: Vec<_> = entities
            .iter_mut()
            .map(|entity| scope.spawn(move || run(entity)))
            .collect();

        handles
            .into_iter()
            .map(|handle| {
                handle
                    .join()
                    .unwrap_or_else(|_| Err(anyhow::anyhow!("provisioning thread panicked")))
            })
            .collect()
    })
}
