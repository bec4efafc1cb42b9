use crate::output::UserOutput;
use myfleet::parameter::{format_size, LiveStatus, ParamValue};
use myfleet::LifecycleController;

pub async fn run_set(
    controller: &LifecycleController,
    name: &str,
    key: &str,
    value: &str,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    let outcome = controller.set_parameter(name, key, value).await?;
    let param = &outcome.parameter;

    out.success(&format!("Set {}={} for '{}'", param.key, param.raw_value, name));
    if !param.validated {
        out.warning(&format!(
            "'{}' is not a known parameter; its value was written unchecked",
            param.key
        ));
    }
    if outcome.restarted {
        out.status(&format!("Restarted '{}' to apply the change", name));
    } else if outcome.restart_pending {
        out.warning(&format!(
            "'{}' still runs with the old value. Apply it with `myfleet restart {}`",
            name, name
        ));
    }
    Ok(())
}

pub async fn run_show(
    controller: &LifecycleController,
    name: &str,
    key: Option<&str>,
    live: bool,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    let report = controller.show_parameters(name, key, live).await?;
    let queried = report.live == LiveStatus::Queried;

    out.status(&format!("[mysqld] in {}", report.config_path.display()));
    if queried {
        out.status(&format!("  {:<32} {:<24} {}", "KEY", "CONFIGURED", "LIVE"));
    }
    for row in &report.rows {
        let configured = describe(&row.configured.value, &row.configured.raw_value);
        if queried {
            let live_text = match (&row.live_value, &row.live_raw) {
                (Some(value), Some(raw)) => describe(value, raw),
                (None, Some(raw)) => raw.clone(),
                _ => "-".to_string(),
            };
            let marker = if row.drift { "  <- drift" } else { "" };
            out.status(&format!(
                "  {:<32} {:<24} {}{}",
                row.configured.key, configured, live_text, marker
            ));
        } else {
            out.status(&format!("  {} = {}", row.configured.key, configured));
        }
    }

    match &report.live {
        LiveStatus::Skipped(reason) => {
            out.warning(&format!("Live values not queried: {}", reason))
        }
        LiveStatus::Queried => {
            let drifted = report.drifted().count();
            if drifted > 0 {
                out.warning(&format!(
                    "{} parameter(s) differ from the running server; a restart applies the configured values",
                    drifted
                ));
            }
        }
        LiveStatus::NotRequested => {}
    }
    Ok(())
}

/// Sizes show both forms, e.g. `2G (2147483648)`.
fn describe(value: &ParamValue, raw: &str) -> String {
    match value {
        ParamValue::SizeBytes(bytes) => format!("{} ({})", format_size(*bytes), bytes),
        _ => raw.to_string(),
    }
}
