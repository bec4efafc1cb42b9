mod backup;
mod instance;
mod parameter;
mod upgrade;

pub use backup::{run_backup, run_backups, run_restore};
pub use instance::{
    run_init, run_list, run_remove, run_restart, run_start, run_status, run_stop,
    run_suggest_port,
};
pub use parameter::{run_set, run_show};
pub use upgrade::{run_install, run_list_available, run_upgrade, UpgradeOptions};

use myfleet::MysqlVersion;

fn version_label(version: Option<MysqlVersion>) -> String {
    version
        .map(|v| v.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}
