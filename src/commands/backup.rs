use crate::output::UserOutput;
use myfleet::LifecycleController;
use std::path::Path;

pub async fn run_backup(
    controller: &LifecycleController,
    name: &str,
    output: Option<&Path>,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    out.progress(&format!("Backing up '{}'... ", name));
    let artifact = match controller.backup(name, output).await {
        Ok(artifact) => artifact,
        Err(e) => {
            out.finish_progress("failed");
            return Err(e.into());
        }
    };
    out.finish_progress("done");
    out.success(&format!(
        "Backup complete: {} ({} bytes, sha256 {})",
        artifact.path.display(),
        artifact.size_bytes,
        artifact.sha256
    ));
    Ok(())
}

pub fn run_backups(
    controller: &LifecycleController,
    name: &str,
    dir: Option<&Path>,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    let artifacts = controller.list_backups(name, dir)?;
    if artifacts.is_empty() {
        out.status(&format!("No complete backups for '{}'", name));
        return Ok(());
    }

    out.status(&format!(
        "{:<26} {:>14}  {:<18} {}",
        "TIMESTAMP", "BYTES", "MODE", "PATH"
    ));
    for artifact in artifacts {
        out.status(&format!(
            "{:<26} {:>14}  {:<18} {}",
            artifact.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
            artifact.size_bytes,
            format!("{:?}", artifact.mode),
            artifact.path.display()
        ));
    }
    Ok(())
}

pub async fn run_restore(
    controller: &LifecycleController,
    name: &str,
    artifact: &Path,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    let summary = controller.restore(name, artifact).await?;
    if !summary.checksum_verified {
        out.warning("No manifest found; the dump was applied without checksum verification");
    }
    out.success(&format!(
        "Restored '{}' from {}",
        name,
        summary.dump_path.display()
    ));
    Ok(())
}
