//! Command-line interface definitions for the `skiff` binary.
//!
//! This module centralises the clap parser structures so both the main
//! binary and the build script can reuse them when generating the manual
//! page. It must stay free of dependencies on the rest of the crate.

use clap::{Args, Parser, Subcommand};

/// Top-level CLI for the `skiff` binary.
#[derive(Debug, Parser)]
#[command(
    name = "skiff",
    about = "Manage ephemeral Alibaba Cloud ECS instances as named sessions",
    arg_required_else_help = true
)]
pub(crate) struct Cli {
    /// Path to the state file (default: $SKIFF_STATE_FILE or ~/.skiff/state.json).
    #[arg(long, global = true, value_name = "PATH")]
    pub(crate) state_file: Option<String>,
    #[command(subcommand)]
    pub(crate) command: Command,
}

/// All skiff subcommands.
#[derive(Debug, Subcommand)]
pub(crate) enum Command {
    /// Print the resolved state file path.
    Path,
    /// List sessions in a table.
    List,
    /// Show the full record for one session.
    Info {
        /// Session name.
        name: String,
    },
    /// Create a session: provision an instance, start it, and wait for it.
    Create(CreateCommand),
    /// Print a session's public IP, allocating one when none is recorded.
    PublicIp {
        /// Session name.
        name: String,
        #[command(flatten)]
        wait: WaitArgs,
    },
    /// Reconcile local records against live instance listings.
    Sync(SyncCommand),
    /// Rename a session locally; the remote instance is untouched.
    Rename {
        /// Current session name.
        old: String,
        /// New session name.
        new: String,
    },
    /// SSH into a session (agent forwarding on). Extra args after `--` go to ssh.
    Connect(ConnectCommand),
    /// Copy files to or from a session with scp. Prefix the remote path with ':'.
    Scp(ScpCommand),
    /// Delete a session's instance and remove the record.
    Delete {
        /// Session name.
        name: String,
        /// Delete even if the instance is running (the default).
        #[arg(long, overrides_with = "no_force")]
        force: bool,
        /// Refuse to delete a running instance.
        #[arg(long = "no-force", overrides_with = "force")]
        no_force: bool,
        /// Keep the local session record after the instance is gone.
        #[arg(long)]
        keep_record: bool,
        /// Skip the confirmation prompt.
        #[arg(long, short = 'y')]
        yes: bool,
    },
    /// Stop a session's instance.
    Stop {
        /// Session name.
        name: String,
        /// Skip the guest OS shutdown.
        #[arg(long)]
        force: bool,
        /// Billing mode while stopped: stop-charging or keep-charging.
        #[arg(long, default_value = "stop-charging", value_name = "MODE")]
        mode: String,
        #[command(flatten)]
        wait: WaitArgs,
    },
    /// Start a stopped session's instance.
    Start {
        /// Session name.
        name: String,
        #[command(flatten)]
        wait: WaitArgs,
    },
    /// Inspect or edit the global config.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Manage named create templates.
    #[command(subcommand)]
    Template(TemplateCommand),
    /// Manage the per-session ~/.ssh/config blocks.
    #[command(subcommand)]
    Ssh(SshCommand),
}

/// Arguments for `skiff create`.
#[derive(Debug, Args)]
pub(crate) struct CreateCommand {
    /// Session name; must be unused.
    pub(crate) name: String,
    /// Template to layer between global config and flags.
    #[arg(long, short = 't', value_name = "NAME")]
    pub(crate) template: Option<String>,
    /// Region or zone id (zone ids are normalized).
    #[arg(long, value_name = "REGION")]
    pub(crate) region_id: Option<String>,
    /// Image id.
    #[arg(long, value_name = "IMAGE")]
    pub(crate) image_id: Option<String>,
    /// Instance type.
    #[arg(long, value_name = "TYPE")]
    pub(crate) instance_type: Option<String>,
    /// Security group id.
    #[arg(long, value_name = "SG")]
    pub(crate) security_group_id: Option<String>,
    /// VSwitch id.
    #[arg(long, value_name = "VSW")]
    pub(crate) v_switch_id: Option<String>,
    /// Key pair name.
    #[arg(long, value_name = "KEYPAIR")]
    pub(crate) key_pair_name: Option<String>,
    /// OS hostname (default: derived from the session name).
    #[arg(long, value_name = "HOSTNAME")]
    pub(crate) hostname: Option<String>,
    /// System disk category; disables the fallback retry chain.
    #[arg(long, value_name = "CATEGORY")]
    pub(crate) system_disk_category: Option<String>,
    /// System disk size in GB.
    #[arg(long, value_name = "GB")]
    pub(crate) system_disk_size: Option<i64>,
    /// ESSD performance level.
    #[arg(long, value_name = "LEVEL")]
    pub(crate) system_disk_performance_level: Option<String>,
    /// Outbound bandwidth cap in Mbps.
    #[arg(long, value_name = "MBPS")]
    pub(crate) internet_max_bandwidth_out: Option<i64>,
    /// Allocate a public IP once the instance runs.
    #[arg(long, overrides_with = "no_public_ip")]
    pub(crate) public_ip: bool,
    /// Do not allocate a public IP.
    #[arg(long = "no-public-ip", overrides_with = "public_ip")]
    pub(crate) no_public_ip: bool,
    /// Spot strategy: NoSpot, SpotAsPriceGo, or SpotWithPriceLimit.
    #[arg(long, value_name = "STRATEGY")]
    pub(crate) spot_strategy: Option<String>,
    /// Spot price ceiling; required for SpotWithPriceLimit.
    #[arg(long, value_name = "PRICE")]
    pub(crate) spot_price_limit: Option<f64>,
    /// SSH user saved on the session record.
    #[arg(long, value_name = "USER")]
    pub(crate) ssh_user: Option<String>,
    /// Overall wait timeout in seconds.
    #[arg(long, value_name = "SECONDS")]
    pub(crate) timeout: Option<u64>,
    /// Status poll interval in seconds.
    #[arg(long, value_name = "SECONDS")]
    pub(crate) poll_interval: Option<u64>,
    /// Do not wait for the instance to reach Running.
    #[arg(long)]
    pub(crate) no_wait: bool,
}

/// Wait behaviour shared by the commands that poll the provider.
#[derive(Debug, Args)]
pub(crate) struct WaitArgs {
    /// Do not poll for the target status.
    #[arg(long)]
    pub(crate) no_wait: bool,
    /// Overall wait timeout in seconds (default: config `timeout_seconds`).
    #[arg(long, value_name = "SECONDS")]
    pub(crate) timeout_seconds: Option<u64>,
    /// Status poll interval in seconds (default: config `poll_interval_seconds`).
    #[arg(long, value_name = "SECONDS")]
    pub(crate) poll_interval_seconds: Option<u64>,
}

/// Arguments for `skiff sync`.
#[derive(Debug, Args)]
pub(crate) struct SyncCommand {
    /// Regions to sync (repeatable); default: config and session regions.
    #[arg(long = "region-id", value_name = "REGION")]
    pub(crate) regions: Vec<String>,
    /// Sync every region visible to the account.
    #[arg(long, conflicts_with = "regions")]
    pub(crate) all_regions: bool,
    /// Remove vanished sessions instead of marking them NotFound.
    #[arg(long)]
    pub(crate) prune: bool,
    /// Import unknown instances as sessions (tagged skiff=true only).
    #[arg(long = "import")]
    pub(crate) import_new: bool,
    /// With --import: import every instance, tagged or not.
    #[arg(long, requires = "import_new")]
    pub(crate) import_all: bool,
}

/// Arguments for `skiff connect`.
#[derive(Debug, Args)]
pub(crate) struct ConnectCommand {
    /// Session name.
    pub(crate) name: String,
    /// Connect to the private IP instead of the public one.
    #[arg(long)]
    pub(crate) private: bool,
    /// Skip the pre-connect refresh from the provider.
    #[arg(long)]
    pub(crate) no_refresh: bool,
    /// SSH user (default: session record, then config, then root).
    #[arg(long, value_name = "USER")]
    pub(crate) user: Option<String>,
    /// Private key path (default: $SKIFF_SSH_KEY or config ssh_private_key_path).
    #[arg(long, value_name = "PATH")]
    pub(crate) key_file: Option<String>,
    /// Print the ssh command instead of running it.
    #[arg(long)]
    pub(crate) dry_run: bool,
    /// Extra arguments passed through to ssh (use -- to separate).
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub(crate) passthrough: Vec<String>,
}

/// Arguments for `skiff scp`.
#[derive(Debug, Args)]
pub(crate) struct ScpCommand {
    /// Session name.
    pub(crate) name: String,
    /// Source path; prefix with ':' for the remote side.
    pub(crate) source: String,
    /// Destination path; prefix with ':' for the remote side.
    pub(crate) destination: String,
    /// Use the private IP instead of the public one.
    #[arg(long)]
    pub(crate) private: bool,
    /// Skip the pre-transfer refresh from the provider.
    #[arg(long)]
    pub(crate) no_refresh: bool,
    /// SSH user (default: session record, then config, then root).
    #[arg(long, value_name = "USER")]
    pub(crate) user: Option<String>,
    /// Private key path (default: $SKIFF_SSH_KEY or config ssh_private_key_path).
    #[arg(long, value_name = "PATH")]
    pub(crate) key_file: Option<String>,
    /// Print the scp command instead of running it.
    #[arg(long)]
    pub(crate) dry_run: bool,
    /// Extra arguments passed through to scp (use -- to separate).
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub(crate) passthrough: Vec<String>,
}

/// Subcommands of `skiff config`.
#[derive(Debug, Subcommand)]
pub(crate) enum ConfigCommand {
    /// Print the global config as JSON.
    Show,
    /// Set config values from key=value pairs.
    Set {
        /// Pairs such as region_id=eu-central-1 system_disk_size=40.
        #[arg(required = true, value_name = "KEY=VALUE")]
        pairs: Vec<String>,
    },
}

/// Subcommands of `skiff template`.
#[derive(Debug, Subcommand)]
pub(crate) enum TemplateCommand {
    /// List templates with their descriptions.
    List,
    /// Show one template as JSON.
    Show {
        /// Template name.
        name: String,
    },
    /// Create or update a template from key=value pairs.
    Set {
        /// Template name.
        name: String,
        /// Pairs such as instance_type=ecs.gn7.xlarge.
        #[arg(required = true, value_name = "KEY=VALUE")]
        pairs: Vec<String>,
        /// Free-text description.
        #[arg(long, value_name = "TEXT")]
        description: Option<String>,
    },
    /// Remove keys from a template.
    Unset {
        /// Template name.
        name: String,
        /// Keys to remove.
        #[arg(required = true, value_name = "KEY")]
        keys: Vec<String>,
    },
    /// Delete a template.
    Delete {
        /// Template name.
        name: String,
    },
}

/// Subcommands of `skiff ssh`.
#[derive(Debug, Subcommand)]
pub(crate) enum SshCommand {
    /// Write or update the managed ssh config block for a session.
    Add {
        /// Session name.
        name: String,
        /// Use the private IP instead of the public one.
        #[arg(long)]
        private: bool,
    },
    /// Remove the managed ssh config block for a session.
    Del {
        /// Session name.
        name: String,
    },
}
