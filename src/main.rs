//! Binary entry point for the skiff CLI.

use std::io::{self, Write};
use std::process;
use std::time::Duration;

use camino::Utf8PathBuf;
use clap::Parser;
use serde_json::Value;
use thiserror::Error;

use skiff::config::coerce_value;
use skiff::lifecycle::CreateOutcome;
use skiff::reconcile::ReconcileError;
use skiff::ssh::{SSH_KEY_ENV, SshError, SshSettings, SshTarget};
use skiff::ssh_config::{DEFAULT_HOST_PREFIX, SshConfigError, default_host_alias};
use skiff::state::{StateDocument, Template, known_config_keys};
use skiff::util::now_iso_utc;
use skiff::{
    AliyunEcs, CreateOverrides, LifecycleError, ProviderError, Reconciler, SessionLifecycle,
    SessionRecord, SshConfigEntry, StateError, StateStore, StopMode, SyncOptions, SyncReport,
    remediation_hint,
};

mod cli;

use cli::{
    Cli, Command, ConfigCommand, ConnectCommand, CreateCommand, ScpCommand, SshCommand,
    SyncCommand, TemplateCommand, WaitArgs,
};

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    #[error(transparent)]
    Sync(#[from] ReconcileError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Ssh(#[from] SshError),
    #[error(transparent)]
    SshConfig(#[from] SshConfigError),
    #[error("{0}")]
    Usage(String),
    #[error("failed to run {command}: {message}")]
    Spawn { command: String, message: String },
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl CliError {
    /// Digs out the provider error code, when one is buried in this error.
    fn api_code(&self) -> Option<&str> {
        match self {
            Self::Provider(err) | Self::Lifecycle(LifecycleError::Provider(err)) => err.api_code(),
            _ => None,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let exit_code = match dispatch(cli).await {
        Ok(code) => code,
        Err(err) => {
            report_error(&err);
            1
        }
    };
    process::exit(exit_code);
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "error: {err}").ok();
    if let Some(hint) = err.api_code().and_then(remediation_hint) {
        writeln!(target, "hint: {hint}").ok();
    }
}

async fn dispatch(cli: Cli) -> Result<i32, CliError> {
    let store = StateStore::resolve(cli.state_file.map(Utf8PathBuf::from))?;
    match cli.command {
        Command::Path => {
            writeln!(io::stdout(), "{}", store.path())?;
            Ok(0)
        }
        Command::List => list_sessions(&store),
        Command::Info { name } => show_info(&store, &name),
        Command::Create(args) => create_session(store, &args).await,
        Command::PublicIp { name, wait } => public_ip(store, &name, &wait).await,
        Command::Sync(args) => sync_sessions(store, &args).await,
        Command::Rename { old, new } => rename_session(store, &old, &new),
        Command::Connect(args) => connect_session(&store, &args).await,
        Command::Scp(args) => scp_session(&store, &args).await,
        Command::Delete {
            name,
            force: _,
            no_force,
            keep_record,
            yes,
        } => delete_session(store, &name, !no_force, keep_record, yes).await,
        Command::Stop {
            name,
            force,
            mode,
            wait,
        } => stop_session(store, &name, force, &mode, &wait).await,
        Command::Start { name, wait } => start_session(store, &name, &wait).await,
        Command::Config(command) => run_config(&store, command),
        Command::Template(command) => run_template(&store, command),
        Command::Ssh(command) => run_ssh_config(&store, command),
    }
}

fn provider() -> Result<AliyunEcs, CliError> {
    Ok(AliyunEcs::from_env()?)
}

fn list_sessions(store: &StateStore) -> Result<i32, CliError> {
    let document = store.load()?;
    writeln!(io::stdout(), "{}", render_session_table(&document))?;
    Ok(0)
}

fn render_session_table(document: &StateDocument) -> String {
    let headers = ["NAME", "STATUS", "PUBLIC_IP", "INSTANCE_ID", "REGION"];
    let rows: Vec<[String; 5]> = document
        .sessions
        .values()
        .map(|record| {
            [
                record.name.clone(),
                record.status.clone(),
                record.public_ip.clone().unwrap_or_else(|| String::from("-")),
                record.instance_id.clone(),
                record.region_id.clone(),
            ]
        })
        .collect();

    let mut widths = headers.map(str::len);
    for row in &rows {
        for (index, cell) in row.iter().enumerate() {
            if let Some(width) = widths.get_mut(index) {
                *width = (*width).max(cell.len());
            }
        }
    }

    let render_row = |cells: [&str; 5]| -> String {
        let mut line = String::new();
        for (index, cell) in cells.iter().enumerate() {
            let width = widths.get(index).copied().unwrap_or(0);
            if index > 0 {
                line.push_str("  ");
            }
            line.push_str(cell);
            for _ in cell.len()..width {
                line.push(' ');
            }
        }
        line.trim_end().to_owned()
    };

    let mut output = render_row(headers);
    for row in &rows {
        output.push('\n');
        output.push_str(&render_row([
            row[0].as_str(),
            row[1].as_str(),
            row[2].as_str(),
            row[3].as_str(),
            row[4].as_str(),
        ]));
    }
    output
}

fn show_info(store: &StateStore, name: &str) -> Result<i32, CliError> {
    let document = store.load()?;
    let record = document
        .sessions
        .get(name)
        .ok_or_else(|| LifecycleError::SessionNotFound(name.to_owned()))?;
    let rendered = serde_json::to_string_pretty(record)
        .map_err(|err| CliError::Usage(err.to_string()))?;
    writeln!(io::stdout(), "{rendered}")?;
    Ok(0)
}

fn overrides_from(args: &CreateCommand) -> CreateOverrides {
    let allocate_public_ip = if args.public_ip {
        Some(true)
    } else if args.no_public_ip {
        Some(false)
    } else {
        None
    };
    CreateOverrides {
        region_id: args.region_id.clone(),
        image_id: args.image_id.clone(),
        instance_type: args.instance_type.clone(),
        security_group_id: args.security_group_id.clone(),
        v_switch_id: args.v_switch_id.clone(),
        key_pair_name: args.key_pair_name.clone(),
        hostname: args.hostname.clone(),
        system_disk_category: args.system_disk_category.clone(),
        system_disk_size: args.system_disk_size,
        system_disk_performance_level: args.system_disk_performance_level.clone(),
        allocate_public_ip,
        internet_max_bandwidth_out: args.internet_max_bandwidth_out,
        spot_strategy: args.spot_strategy.clone(),
        spot_price_limit: args.spot_price_limit,
        ssh_user: args.ssh_user.clone(),
        timeout_seconds: args.timeout,
        poll_interval_seconds: args.poll_interval,
    }
}

async fn create_session(store: StateStore, args: &CreateCommand) -> Result<i32, CliError> {
    let lifecycle = SessionLifecycle::new(provider()?, store);
    let overrides = overrides_from(args);
    let outcome = lifecycle
        .create(&args.name, args.template.as_deref(), &overrides)
        .await?;
    let CreateOutcome {
        record, effective, warnings,
    } = outcome;
    for warning in &warnings {
        writeln!(io::stderr(), "warning: {warning}")?;
    }
    writeln!(
        io::stdout(),
        "Created: {} ({}) in {}",
        record.name,
        record.instance_id,
        record.region_id
    )?;

    if args.no_wait {
        return Ok(0);
    }

    let running = lifecycle
        .await_running(&args.name, effective.timeout, effective.poll_interval)
        .await?;
    let public_ip = if effective.allocate_public_ip && running.public_ip.is_none() {
        lifecycle
            .ensure_public_ip(&args.name, effective.timeout, effective.poll_interval)
            .await?
    } else {
        running.public_ip.clone()
    };

    match (&public_ip, &running.private_ip) {
        (Some(ip), _) => {
            writeln!(
                io::stdout(),
                "Ready: {} -> {}@{ip}",
                args.name,
                effective.ssh_user
            )?;
        }
        (None, Some(private)) => {
            writeln!(
                io::stdout(),
                "Ready (no public ip): {} -> {}@{private}",
                args.name,
                effective.ssh_user
            )?;
        }
        (None, None) => {
            writeln!(io::stdout(), "Ready: {} (no IP reported yet)", args.name)?;
        }
    }

    let document = lifecycle.store().load()?;
    if document.config_bool("auto_ssh_config", true)
        && let Some(host) = public_ip
    {
        let outcome = upsert_ssh_block(&document, &args.name, &host);
        if let Ok(alias) = &outcome {
            writeln!(io::stdout(), "SSH config: Host {alias}")?;
        }
        if let Err(err) = &outcome {
            writeln!(io::stderr(), "warning: ssh config not updated: {err}")?;
        }
    }
    Ok(0)
}

async fn public_ip(store: StateStore, name: &str, wait: &WaitArgs) -> Result<i32, CliError> {
    let lifecycle = SessionLifecycle::new(provider()?, store);
    let record = lifecycle.refresh(name).await?;
    if let Some(ip) = record.public_ip {
        writeln!(io::stdout(), "{ip}")?;
        return Ok(0);
    }
    let (timeout, poll) = wait_settings(lifecycle.store(), wait)?;
    let window = if wait.no_wait { Duration::ZERO } else { timeout };
    let Some(ip) = lifecycle.ensure_public_ip(name, window, poll).await? else {
        writeln!(io::stderr(), "no public ip for {name}; allocation did not yield one")?;
        return Ok(1);
    };
    writeln!(io::stdout(), "{ip}")?;
    Ok(0)
}

async fn sync_sessions(store: StateStore, args: &SyncCommand) -> Result<i32, CliError> {
    let reconciler = Reconciler::new(provider()?, store);
    let options = SyncOptions {
        regions: args.regions.clone(),
        all_regions: args.all_regions,
        prune: args.prune,
        import_new: args.import_new,
        import_all: args.import_all,
    };
    let report = reconciler.run(&options).await?;
    print_sync_report(&report)?;
    Ok(0)
}

fn print_sync_report(report: &SyncReport) -> Result<(), CliError> {
    let mut stdout = io::stdout();
    writeln!(stdout, "Synced regions: {}", report.regions.join(", "))?;
    writeln!(
        stdout,
        "refreshed: {}  missing: {}  removed: {}  imported: {}",
        report.refreshed.len(),
        report.marked_missing.len(),
        report.removed.len(),
        report.imported.len()
    )?;
    for name in &report.removed {
        writeln!(stdout, "removed: {name}")?;
    }
    for name in &report.imported {
        writeln!(stdout, "imported: {name}")?;
    }
    for warning in &report.warnings {
        writeln!(io::stderr(), "warning: {warning}")?;
    }
    Ok(())
}

fn rename_session(store: StateStore, old: &str, new: &str) -> Result<i32, CliError> {
    let lifecycle = SessionLifecycle::new(NoProvider, store);
    lifecycle.rename(old, new)?;
    if let Ok(path) = ssh_config_path()
        && skiff::ssh_config::remove(&path, old).unwrap_or(false)
    {
        writeln!(
            io::stderr(),
            "note: removed ssh config block for {old}; run `skiff ssh add {new}` to recreate it"
        )?;
    }
    writeln!(io::stdout(), "Renamed: {old} -> {new}")?;
    Ok(0)
}

async fn connect_session(store: &StateStore, args: &ConnectCommand) -> Result<i32, CliError> {
    let (document, record) = refreshed_record(store, &args.name, args.no_refresh).await?;
    let target = build_target(&document, &record, args.user.as_deref(), args.private)?;
    let settings = connection_settings(&document, args.key_file.as_deref())?;
    let command = skiff::ssh::ssh_command(&target, &settings, &args.passthrough);
    if args.dry_run {
        writeln!(io::stdout(), "{}", skiff::ssh::render_command(&command))?;
        return Ok(0);
    }
    writeln!(
        io::stderr(),
        "Connecting to {} (instance {}) ...",
        target.destination(),
        record.instance_id
    )?;
    run_interactive(&command)
}

async fn scp_session(store: &StateStore, args: &ScpCommand) -> Result<i32, CliError> {
    let (document, record) = refreshed_record(store, &args.name, args.no_refresh).await?;
    let target = build_target(&document, &record, args.user.as_deref(), args.private)?;
    let settings = connection_settings(&document, args.key_file.as_deref())?;
    let command = skiff::ssh::scp_command(
        &target,
        &settings,
        &args.source,
        &args.destination,
        &args.passthrough,
    )?;
    if args.dry_run {
        writeln!(io::stdout(), "{}", skiff::ssh::render_command(&command))?;
        return Ok(0);
    }
    run_interactive(&command)
}

/// Loads the session record, refreshing it from the provider first unless
/// asked not to. Refresh failures degrade to a warning so a broken API
/// never blocks connecting to a cached address.
async fn refreshed_record(
    store: &StateStore,
    name: &str,
    no_refresh: bool,
) -> Result<(StateDocument, SessionRecord), CliError> {
    if !no_refresh {
        refresh_best_effort(store, name).await?;
    }
    let document = store.load()?;
    let record = document
        .sessions
        .get(name)
        .cloned()
        .ok_or_else(|| LifecycleError::SessionNotFound(name.to_owned()))?;
    Ok((document, record))
}

async fn refresh_best_effort(store: &StateStore, name: &str) -> Result<(), CliError> {
    let ecs = match provider() {
        Ok(ecs) => ecs,
        Err(err) => {
            writeln!(io::stderr(), "warning: refresh skipped: {err}")?;
            return Ok(());
        }
    };
    let lifecycle = SessionLifecycle::new(ecs, store.clone());
    if let Err(err) = lifecycle.refresh(name).await {
        writeln!(io::stderr(), "warning: refresh failed: {err}")?;
    }
    Ok(())
}

fn build_target(
    document: &StateDocument,
    record: &SessionRecord,
    user_flag: Option<&str>,
    private: bool,
) -> Result<SshTarget, CliError> {
    let recorded = if private {
        record.private_ip.clone()
    } else {
        record.public_ip.clone()
    };
    let host = recorded.ok_or_else(|| {
        let kind = if private { "private" } else { "public" };
        CliError::Usage(format!(
            "no {kind} ip recorded for {}; try `skiff sync` first",
            record.name
        ))
    })?;
    let user = user_flag
        .map(str::to_owned)
        .or_else(|| record.ssh_user.clone())
        .or_else(|| document.config_str("ssh_user").map(str::to_owned))
        .unwrap_or_else(|| String::from("root"));
    Ok(SshTarget { user, host })
}

fn connection_settings(
    document: &StateDocument,
    key_flag: Option<&str>,
) -> Result<SshSettings, CliError> {
    let env_key = std::env::var(SSH_KEY_ENV).ok();
    let key_path = skiff::ssh::resolve_key_path(
        key_flag,
        env_key.as_deref(),
        document.config_str("ssh_private_key_path"),
    )?;
    let extra_args = document
        .config
        .get("ssh_extra_args")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_owned)
                .collect()
        })
        .unwrap_or_default();
    Ok(SshSettings {
        key_path,
        strict_host_key_checking: document.config_bool("ssh_strict_host_key_checking", false),
        extra_args,
    })
}

fn run_interactive(command: &[String]) -> Result<i32, CliError> {
    let Some((program, rest)) = command.split_first() else {
        return Err(CliError::Usage(String::from("empty command")));
    };
    let status = process::Command::new(program)
        .args(rest)
        .status()
        .map_err(|err| CliError::Spawn {
            command: program.clone(),
            message: err.to_string(),
        })?;
    Ok(status.code().unwrap_or(1))
}

async fn delete_session(
    store: StateStore,
    name: &str,
    force: bool,
    keep_record: bool,
    yes: bool,
) -> Result<i32, CliError> {
    if !yes && !confirm(&format!("Delete session {name} and its instance? [y/N] "))? {
        writeln!(io::stdout(), "aborted")?;
        return Ok(1);
    }
    let lifecycle = SessionLifecycle::new(provider()?, store);
    let record = lifecycle.delete(name, force, keep_record).await?;
    if let Ok(path) = ssh_config_path() {
        skiff::ssh_config::remove(&path, name).ok();
    }
    let instance = if record.instance_id.is_empty() {
        "no instance"
    } else {
        record.instance_id.as_str()
    };
    if keep_record {
        writeln!(io::stdout(), "Deleted: {name} ({instance}); record kept")?;
    } else {
        writeln!(io::stdout(), "Deleted: {name} ({instance})")?;
    }
    Ok(0)
}

fn confirm(prompt: &str) -> Result<bool, CliError> {
    write!(io::stderr(), "{prompt}")?;
    io::stderr().flush()?;
    let mut answer = String::new();
    io::stdin().read_line(&mut answer)?;
    let normalized = answer.trim().to_ascii_lowercase();
    Ok(normalized == "y" || normalized == "yes")
}

async fn stop_session(
    store: StateStore,
    name: &str,
    force: bool,
    mode: &str,
    wait: &WaitArgs,
) -> Result<i32, CliError> {
    let parsed: StopMode = mode.parse()?;
    let lifecycle = SessionLifecycle::new(provider()?, store);
    let result = lifecycle.stop(name, force, parsed).await;
    if let Err(err) = &result
        && parsed == StopMode::StopCharging
        && matches!(err, LifecycleError::Provider(_))
    {
        writeln!(
            io::stderr(),
            "hint: StopCharging is not supported everywhere; try `skiff stop {name} --mode keep-charging`"
        )?;
    }
    let record = result?;
    writeln!(io::stdout(), "Stopping: {name} ({})", record.instance_id)?;
    if !wait.no_wait {
        let (timeout, poll) = wait_settings(lifecycle.store(), wait)?;
        lifecycle
            .await_status(name, skiff::state::status::STOPPED, timeout, poll)
            .await?;
        writeln!(io::stdout(), "Stopped: {name}")?;
    }
    Ok(0)
}

async fn start_session(store: StateStore, name: &str, wait: &WaitArgs) -> Result<i32, CliError> {
    let lifecycle = SessionLifecycle::new(provider()?, store);
    let record = lifecycle.start(name).await?;
    writeln!(io::stdout(), "Starting: {name} ({})", record.instance_id)?;
    if !wait.no_wait {
        let (timeout, poll) = wait_settings(lifecycle.store(), wait)?;
        let running = lifecycle.await_running(name, timeout, poll).await?;
        let suffix = running
            .public_ip
            .map_or_else(String::new, |ip| format!(" ({ip})"));
        writeln!(io::stdout(), "Running: {name}{suffix}")?;
    }
    Ok(0)
}

fn wait_settings(store: &StateStore, wait: &WaitArgs) -> Result<(Duration, Duration), CliError> {
    let document = store.load()?;
    let config_timeout =
        u64::try_from(document.config_i64("timeout_seconds").unwrap_or(600)).unwrap_or(600);
    let config_poll =
        u64::try_from(document.config_i64("poll_interval_seconds").unwrap_or(5)).unwrap_or(5);
    let timeout = wait.timeout_seconds.unwrap_or(config_timeout);
    let poll = wait.poll_interval_seconds.unwrap_or(config_poll).max(1);
    Ok((Duration::from_secs(timeout), Duration::from_secs(poll)))
}

fn run_config(store: &StateStore, command: ConfigCommand) -> Result<i32, CliError> {
    match command {
        ConfigCommand::Show => {
            let document = store.load()?;
            let rendered = serde_json::to_string_pretty(&Value::Object(document.config))
                .map_err(|err| CliError::Usage(err.to_string()))?;
            writeln!(io::stdout(), "{rendered}")?;
            Ok(0)
        }
        ConfigCommand::Set { pairs } => {
            let mut document = store.load()?;
            let known = known_config_keys();
            // Every pair is validated before anything is written.
            let mut updates = Vec::with_capacity(pairs.len());
            for pair in &pairs {
                let (key, raw) = split_pair(pair)?;
                if !known.iter().any(|candidate| candidate == key) {
                    return Err(CliError::Usage(format!(
                        "unknown config key `{key}`; allowed keys: {}",
                        known.join(", ")
                    )));
                }
                updates.push((key.to_owned(), coerce_value(raw)));
            }
            for (key, value) in updates {
                document.config.insert(key, value);
            }
            store.save(&mut document)?;
            writeln!(io::stdout(), "updated {} value(s)", pairs.len())?;
            Ok(0)
        }
    }
}

fn split_pair(pair: &str) -> Result<(&str, &str), CliError> {
    pair.split_once('=')
        .map(|(key, value)| (key.trim(), value))
        .filter(|(key, _)| !key.is_empty())
        .ok_or_else(|| CliError::Usage(format!("expected KEY=VALUE, got `{pair}`")))
}

fn run_template(store: &StateStore, command: TemplateCommand) -> Result<i32, CliError> {
    match command {
        TemplateCommand::List => {
            let document = store.load()?;
            let mut stdout = io::stdout();
            if document.templates.is_empty() {
                writeln!(stdout, "no templates")?;
                return Ok(0);
            }
            for (name, template) in &document.templates {
                if template.description.is_empty() {
                    writeln!(stdout, "{name}")?;
                } else {
                    writeln!(stdout, "{name}  {}", template.description)?;
                }
            }
            Ok(0)
        }
        TemplateCommand::Show { name } => {
            let document = store.load()?;
            let template = document
                .templates
                .get(&name)
                .ok_or_else(|| CliError::Usage(format!("template `{name}` not found")))?;
            let rendered = serde_json::to_string_pretty(template)
                .map_err(|err| CliError::Usage(err.to_string()))?;
            writeln!(io::stdout(), "{rendered}")?;
            Ok(0)
        }
        TemplateCommand::Set {
            name,
            pairs,
            description,
        } => {
            let mut document = store.load()?;
            let template = document
                .templates
                .entry(name.clone())
                .or_insert_with(|| Template {
                    name: name.clone(),
                    created_at: Some(now_iso_utc()),
                    ..Template::default()
                });
            for pair in &pairs {
                let (key, raw) = split_pair(pair)?;
                template.config.insert(key.to_owned(), coerce_value(raw));
            }
            if let Some(text) = description {
                template.description = text;
            }
            template.updated_at = Some(now_iso_utc());
            store.save(&mut document)?;
            writeln!(io::stdout(), "template {name} updated")?;
            Ok(0)
        }
        TemplateCommand::Unset { name, keys } => {
            let mut document = store.load()?;
            let template = document
                .templates
                .get_mut(&name)
                .ok_or_else(|| CliError::Usage(format!("template `{name}` not found")))?;
            for key in &keys {
                template.config.remove(key);
            }
            template.updated_at = Some(now_iso_utc());
            store.save(&mut document)?;
            writeln!(io::stdout(), "template {name} updated")?;
            Ok(0)
        }
        TemplateCommand::Delete { name } => {
            let mut document = store.load()?;
            if document.templates.remove(&name).is_none() {
                return Err(CliError::Usage(format!("template `{name}` not found")));
            }
            store.save(&mut document)?;
            writeln!(io::stdout(), "template {name} deleted")?;
            Ok(0)
        }
    }
}

fn run_ssh_config(store: &StateStore, command: SshCommand) -> Result<i32, CliError> {
    match command {
        SshCommand::Add { name, private } => {
            let document = store.load()?;
            let record = document
                .sessions
                .get(&name)
                .ok_or_else(|| LifecycleError::SessionNotFound(name.clone()))?;
            let recorded = if private {
                record.private_ip.clone()
            } else {
                record.public_ip.clone()
            };
            let host = recorded.ok_or_else(|| {
                CliError::Usage(format!("no ip recorded for {name}; run `skiff sync` first"))
            })?;
            let alias = upsert_ssh_block(&document, &name, &host)?;
            writeln!(io::stdout(), "SSH config: Host {alias}")?;
            Ok(0)
        }
        SshCommand::Del { name } => {
            let path = ssh_config_path()?;
            let removed = skiff::ssh_config::remove(&path, &name)?;
            if removed {
                writeln!(io::stdout(), "removed ssh config block for {name}")?;
            } else {
                writeln!(io::stdout(), "no ssh config block for {name}")?;
            }
            Ok(0)
        }
    }
}

/// Writes or replaces the managed block for a session, returning the host
/// alias that was written.
fn upsert_ssh_block(
    document: &StateDocument,
    name: &str,
    host: &str,
) -> Result<String, CliError> {
    let record = document
        .sessions
        .get(name)
        .ok_or_else(|| LifecycleError::SessionNotFound(name.to_owned()))?;
    let settings = connection_settings(document, None)?;
    let prefix = document
        .config_str("ssh_config_host_prefix")
        .unwrap_or(DEFAULT_HOST_PREFIX);
    let alias = default_host_alias(name, prefix);
    let user = record
        .ssh_user
        .clone()
        .or_else(|| document.config_str("ssh_user").map(str::to_owned))
        .unwrap_or_else(|| String::from("root"));
    let entry = SshConfigEntry {
        identity_file: Some(settings.key_path.clone()),
        strict_host_key_checking: settings.strict_host_key_checking,
        ..SshConfigEntry::new(name, &alias, host, &user)
    };
    let path = ssh_config_path()?;
    skiff::ssh_config::upsert(&path, &entry)?;
    Ok(alias)
}

fn ssh_config_path() -> Result<Utf8PathBuf, CliError> {
    for var in ["HOME", "USERPROFILE"] {
        if let Ok(value) = std::env::var(var)
            && !value.trim().is_empty()
        {
            return Ok(Utf8PathBuf::from(value).join(".ssh").join("config"));
        }
    }
    Err(CliError::Usage(String::from(
        "cannot determine home directory for ~/.ssh/config",
    )))
}

/// Provider stand-in for commands that never touch the network.
struct NoProvider;

impl skiff::ComputeProvider for NoProvider {
    fn create_instance(
        &self,
        _spec: &skiff::CreateInstanceSpec,
    ) -> skiff::provider::ProviderFuture<'_, String> {
        Box::pin(async { Err(offline()) })
    }

    fn start_instance(
        &self,
        _region_id: &str,
        _instance_id: &str,
    ) -> skiff::provider::ProviderFuture<'_, ()> {
        Box::pin(async { Err(offline()) })
    }

    fn stop_instance(
        &self,
        _region_id: &str,
        _instance_id: &str,
        _force: bool,
        _mode: StopMode,
    ) -> skiff::provider::ProviderFuture<'_, ()> {
        Box::pin(async { Err(offline()) })
    }

    fn delete_instance(
        &self,
        _region_id: &str,
        _instance_id: &str,
        _force: bool,
    ) -> skiff::provider::ProviderFuture<'_, ()> {
        Box::pin(async { Err(offline()) })
    }

    fn describe_instance(
        &self,
        _region_id: &str,
        _instance_id: &str,
    ) -> skiff::provider::ProviderFuture<'_, Option<skiff::InstanceSnapshot>> {
        Box::pin(async { Err(offline()) })
    }

    fn list_instances(
        &self,
        _region_id: &str,
        _tag_filter: Option<&skiff::provider::TagFilter>,
    ) -> skiff::provider::ProviderFuture<'_, Vec<skiff::InstanceSnapshot>> {
        Box::pin(async { Err(offline()) })
    }

    fn list_regions(
        &self,
        _seed_region: &str,
    ) -> skiff::provider::ProviderFuture<'_, Vec<String>> {
        Box::pin(async { Err(offline()) })
    }

    fn allocate_public_ip(
        &self,
        _region_id: &str,
        _instance_id: &str,
    ) -> skiff::provider::ProviderFuture<'_, String> {
        Box::pin(async { Err(offline()) })
    }
}

fn offline() -> ProviderError {
    ProviderError::Validation(String::from("this command does not use the provider"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, status: &str, public_ip: Option<&str>) -> SessionRecord {
        SessionRecord {
            name: name.to_owned(),
            status: status.to_owned(),
            public_ip: public_ip.map(str::to_owned),
            instance_id: format!("i-{name}"),
            region_id: String::from("eu-central-1"),
            ..SessionRecord::default()
        }
    }

    #[test]
    fn session_table_aligns_columns() {
        let mut document = StateDocument::new();
        for session in [
            record("dev", "Running", Some("203.0.113.9")),
            record("long-session-name", "Stopped", None),
        ] {
            document.sessions.insert(session.name.clone(), session);
        }
        let table = render_session_table(&document);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines.first().is_some_and(|line| line.starts_with("NAME")));
        assert!(table.contains("long-session-name"));
        assert!(table.contains("203.0.113.9"));
        assert!(table.contains("  -  "), "missing placeholder for no ip");
    }

    #[test]
    fn empty_table_is_just_the_header() {
        let document = StateDocument::new();
        assert_eq!(
            render_session_table(&document),
            "NAME  STATUS  PUBLIC_IP  INSTANCE_ID  REGION"
        );
    }

    #[test]
    fn write_error_includes_remediation_hints() {
        let err = CliError::Provider(ProviderError::Api {
            code: String::from("InvalidSystemDiskCategory.ValueNotSupported"),
            message: String::from("nope"),
            request_id: String::from("req-1"),
        });
        let mut buffer = Vec::new();
        write_error(&mut buffer, &err);
        let text = String::from_utf8_lossy(&buffer);
        assert!(text.contains("error:"));
        assert!(text.contains("hint:"));
    }

    #[test]
    fn pairs_must_contain_an_equals_sign() {
        assert!(split_pair("region_id=eu-central-1").is_ok());
        assert!(split_pair("region_id").is_err());
        assert!(split_pair("=value").is_err());
    }
}
