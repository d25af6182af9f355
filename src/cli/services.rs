use super::context::CliContext;
use crate::domain::Blueprint;
use anyhow::Result;

/// One line per built-in service: label, image, host port and handshake.
pub fn list(ctx: &CliContext) -> Result<Vec<String>> {
    Blueprint::builtin_labels()
        .iter()
        .map(|label| {
            let blueprint = ctx.config.blueprint(label)?;
            let port = blueprint
                .host_port()
                .map(|p| p.to_string())
                .unwrap_or_else(|| "-".to_string());
            let handshake = blueprint
                .readiness()
                .map(|r| r.handshake.name())
                .unwrap_or("none");

            Ok(format!(
                "{label}\t{}\t{port}\t{handshake}",
                blueprint.image()
            ))
        })
        .collect()
}

pub fn run(ctx: &CliContext) -> Result<()> {
    for line in list(ctx)? {
        println!("{line}");
    }
    Ok(())
}
