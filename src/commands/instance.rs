use super::version_label;
use crate::output::UserOutput;
use myfleet::{InitOutcome, InitRequest, LifecycleController, LifecycleState, MysqlVersion};

pub async fn run_init(
    controller: &LifecycleController,
    name: String,
    port: Option<u16>,
    mysql_version: Option<String>,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    let mut request = InitRequest::new(name).offer_start();
    if let Some(port) = port {
        request = request.port(port);
    }
    if let Some(version) = mysql_version {
        request = request.version(version.parse::<MysqlVersion>()?);
    }

    out.status(&format!("Provisioning '{}'", request.name));
    let outcome = controller.init(request).await?;
    match &outcome {
        InitOutcome::Created(record) => {
            if record.lifecycle_state == LifecycleState::Running {
                out.success(&format!(
                    "Instance '{}' created and started on port {} (MySQL {})",
                    record.name,
                    record.port,
                    version_label(record.mysql_version)
                ));
            } else {
                out.success(&format!(
                    "Instance '{}' created on port {} (MySQL {}). Start it with `myfleet start {}`",
                    record.name,
                    record.port,
                    version_label(record.mysql_version),
                    record.name
                ));
            }
        }
        InitOutcome::AlreadyExists(record) => {
            out.status(&format!(
                "Instance '{}' already exists on port {} ({}); nothing changed",
                record.name, record.port, record.lifecycle_state
            ));
        }
    }
    Ok(())
}

pub fn run_list(
    controller: &LifecycleController,
    json: bool,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    let records = controller.list()?;

    if json {
        out.status(&serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    if records.is_empty() {
        out.status("No instances registered. Create one with `myfleet init <name>`.");
        return Ok(());
    }

    out.status(&format!(
        "{:<24} {:>5}  {:<12} {:<10} {}",
        "NAME", "PORT", "STATE", "VERSION", "DATADIR"
    ));
    for record in records {
        out.status(&format!(
            "{:<24} {:>5}  {:<12} {:<10} {}",
            record.name,
            record.port,
            record.lifecycle_state.to_string(),
            version_label(record.mysql_version),
            record.datadir.display()
        ));
    }
    Ok(())
}

pub async fn run_start(
    controller: &LifecycleController,
    name: &str,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    controller.start(name).await?;
    out.success(&format!("Instance '{}' is running", name));
    Ok(())
}

pub async fn run_stop(
    controller: &LifecycleController,
    name: &str,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    controller.stop(name).await?;
    out.success(&format!("Instance '{}' is stopped", name));
    Ok(())
}

pub async fn run_restart(
    controller: &LifecycleController,
    name: &str,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    controller.restart(name).await?;
    out.success(&format!("Instance '{}' restarted", name));
    Ok(())
}

pub async fn run_status(
    controller: &LifecycleController,
    name: &str,
    json: bool,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    let status = controller.status(name).await?;
    let record = &status.record;

    if json {
        use serde_json::json;

        let value = json!({
            "record": record,
            "unit": status.unit.map(|u| u.to_string()),
            "unit_error": status.unit_error,
        });
        out.status(&serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    out.status(&format!("Instance: {}", record.name));
    out.status(&format!("{:-<50}", ""));
    out.status(&format!("  State:       {}", record.lifecycle_state));
    match (&status.unit, &status.unit_error) {
        (Some(unit), _) => out.status(&format!("  Unit:        {} ({})", record.service_unit, unit)),
        (None, Some(e)) => out.status(&format!("  Unit:        {} (unavailable: {})", record.service_unit, e)),
        (None, None) => out.status(&format!("  Unit:        {}", record.service_unit)),
    }
    out.status(&format!("  Port:        {}", record.port));
    out.status(&format!("  Version:     {}", version_label(record.mysql_version)));
    out.status(&format!("  Socket:      {}", record.socket.display()));
    out.status(&format!("  Datadir:     {}", record.datadir.display()));
    out.status(&format!("  Config:      {}", record.config_path.display()));
    out.status(&format!("  Error log:   {}", record.error_log.display()));
    out.status(&format!("  Backups:     {}", record.backup_dir.display()));
    out.status(&format!("  Created:     {}", record.created_at.to_rfc3339()));
    out.status(&format!("  Modified:    {}", record.last_modified.to_rfc3339()));

    if status.diverged() {
        out.warning(&format!(
            "The registry says '{}' is {} but the supervisor reports the unit {}",
            record.name,
            record.lifecycle_state,
            status.unit.map(|u| u.to_string()).unwrap_or_default()
        ));
    }
    if matches!(
        record.lifecycle_state,
        LifecycleState::Initializing | LifecycleState::Upgrading | LifecycleState::Removing
    ) {
        out.warning(&format!(
            "'{}' is in a transient state. If no myfleet command is running, inspect it manually.",
            record.name
        ));
    }
    Ok(())
}

pub async fn run_remove(
    controller: &LifecycleController,
    name: &str,
    keep_data: bool,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    controller.remove(name, keep_data).await?;
    if keep_data {
        out.success(&format!(
            "Instance '{}' removed; its datadir and backups were kept",
            name
        ));
    } else {
        out.success(&format!("Instance '{}' removed", name));
    }
    Ok(())
}

pub fn run_suggest_port(controller: &LifecycleController, out: &dyn UserOutput) -> anyhow::Result<()> {
    let port = controller.suggest_port()?;
    out.status(&port.to_string());
    Ok(())
}
