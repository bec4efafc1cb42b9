use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "myfleet", version)]
#[command(about = "myfleet - Manage several MySQL server instances on one host")]
pub struct Cli {
    /// Settings file (defaults to $MYFLEET_CONFIG, then /etc/myfleet/config.yaml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Place every directory under this root instead of the system paths
    #[arg(long, global = true, conflicts_with = "config")]
    pub root: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Answer yes to every confirmation prompt
    #[arg(short, long, global = true)]
    pub yes: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Provision a new instance (stopped afterwards)
    Init {
        /// Instance name
        name: String,
        /// TCP port (defaults to the first free port from 3306)
        #[arg(short, long)]
        port: Option<u16>,
        /// MySQL version to record (detected from mysqld when omitted)
        #[arg(long, value_name = "VERSION")]
        mysql_version: Option<String>,
    },
    /// List registered instances
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Start an instance
    Start {
        /// Instance name
        name: String,
    },
    /// Stop an instance
    Stop {
        /// Instance name
        name: String,
    },
    /// Restart a running instance
    Restart {
        /// Instance name
        name: String,
    },
    /// Show an instance record next to its service unit state
    Status {
        /// Instance name
        name: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Remove an instance, its unit and its directories
    Remove {
        /// Instance name
        name: String,
        /// Keep the datadir and backups
        #[arg(long)]
        keep_data: bool,
    },
    /// Set a [mysqld] parameter
    Set {
        /// Instance name
        name: String,
        /// Parameter name (dashes and underscores are equivalent)
        key: String,
        /// New value (sizes accept K, M, G, T and P suffixes)
        value: String,
    },
    /// Show configured parameters
    Show {
        /// Instance name
        name: String,
        /// Only this parameter
        key: Option<String>,
        /// Compare with the live server values
        #[arg(long)]
        live: bool,
    },
    /// Take a logical backup
    Backup {
        /// Instance name
        name: String,
        /// Backup root (defaults to the instance backup directory)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// List complete backups
    Backups {
        /// Instance name
        name: String,
        /// Backup root (defaults to the instance backup directory)
        #[arg(short, long)]
        dir: Option<PathBuf>,
    },
    /// Restore a backup into a running instance
    Restore {
        /// Instance name
        name: String,
        /// Artifact directory or dump file
        artifact: PathBuf,
    },
    /// Upgrade the MySQL server packages for an instance
    Upgrade {
        /// Instance name
        name: String,
        /// Target version: major.minor (newest patch) or major.minor.patch
        target: String,
        /// Skip the pre-upgrade backup
        #[arg(long)]
        no_backup: bool,
        /// Allow moving to another major version
        #[arg(long)]
        allow_cross_major: bool,
        /// Backup root for the pre-upgrade backup
        #[arg(long)]
        backup_dir: Option<PathBuf>,
        /// Run the pre-checks only
        #[arg(long)]
        dry_run: bool,
    },
    /// Install the newest MySQL server package of a version line
    Install {
        /// Version line, e.g. 8.0
        line: String,
    },
    /// List versions available from the package repositories
    ListAvailable {
        /// Version line, e.g. 8.0
        line: String,
    },
    /// Print the first free port
    SuggestPort,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_name = "SHELL")]
        shell: clap_complete::Shell,
    },
}
