use super::version_label;
use crate::output::UserOutput;
use myfleet::upgrade::{CheckOutcome, UpgradePlan, UpgradeRequest};
use myfleet::{LifecycleController, MysqlVersion};
use std::path::PathBuf;

/// Command-line options for `myfleet upgrade`.
pub struct UpgradeOptions {
    pub target: String,
    pub no_backup: bool,
    pub allow_cross_major: bool,
    pub backup_dir: Option<PathBuf>,
    pub dry_run: bool,
}

pub async fn run_upgrade(
    controller: &LifecycleController,
    name: &str,
    options: UpgradeOptions,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    let mut request = UpgradeRequest::new(options.target.parse::<MysqlVersion>()?);
    request.take_backup = !options.no_backup;
    request.allow_cross_major = options.allow_cross_major;
    request.backup_dir = options.backup_dir;

    if options.dry_run {
        let plan = controller.plan_upgrade(name, request).await?;
        print_checks(&plan, out);
        if plan.passed() {
            out.success(&format!(
                "Pre-checks passed for '{}' ({} -> {})",
                name,
                version_label(plan.from),
                version_label(plan.to)
            ));
        } else {
            out.warning("Pre-checks failed; the upgrade would not start");
        }
        return Ok(());
    }

    let plan = controller.upgrade(name, request).await?;
    print_checks(&plan, out);
    if let Some(backup) = &plan.backup {
        out.status(&format!("Pre-upgrade backup: {}", backup.path.display()));
    }
    out.success(&format!(
        "Upgraded '{}' from {} to {} ({})",
        name,
        version_label(plan.from),
        version_label(plan.to),
        plan.status
    ));
    Ok(())
}

fn print_checks(plan: &UpgradePlan, out: &dyn UserOutput) {
    out.status("Pre-checks:");
    for check in &plan.checks {
        let line = format!("  {:<18} {}", check.check, check.outcome.detail());
        match check.outcome {
            CheckOutcome::Passed(_) => out.status(&format!("+{}", line)),
            CheckOutcome::Skipped(_) => out.status(&format!("-{}", line)),
            CheckOutcome::Warning(_) => out.warning(&format!("!{}", line)),
            CheckOutcome::Failed(_) => out.error(&format!("x{}", line)),
        }
    }
    out.blank();
}

pub async fn run_install(
    controller: &LifecycleController,
    line: &str,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    let line = line.parse::<MysqlVersion>()?;
    let version = controller.install(&line).await?;
    out.success(&format!("Installed MySQL {}", version));
    Ok(())
}

pub async fn run_list_available(
    controller: &LifecycleController,
    line: &str,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    let line = line.parse::<MysqlVersion>()?;
    let versions = controller.list_available(&line).await?;
    if versions.is_empty() {
        out.status(&format!("No versions available in line {}", line.to_line()));
        return Ok(());
    }
    for version in versions {
        out.status(&version.to_string());
    }
    Ok(())
}
