//! Construction of the `ssh` and `scp` command lines used by connect and
//! copy operations.
//!
//! The commands always pin the identity (`IdentitiesOnly=yes`) and forward
//! the agent; with host key checking relaxed (the default for ephemeral
//! instances) known hosts go to the platform null device so recreated
//! instances never trip a changed-key warning.

use thiserror::Error;

use crate::util::{expand_tilde, null_device};

/// Environment variable supplying the private key path.
pub const SSH_KEY_ENV: &str = "SKIFF_SSH_KEY";

/// Errors raised while building ssh or scp command lines.
#[derive(Debug, Error)]
pub enum SshError {
    /// No private key path could be resolved from flag, env, or config.
    #[error(
        "missing SSH key file; set {SSH_KEY_ENV}, run `skiff config set ssh_private_key_path <path>`, or pass --key-file"
    )]
    MissingKey,
    /// Neither or both scp paths were marked remote.
    #[error(
        "exactly one of SOURCE or DEST must start with ':' to mark the remote side, \
         e.g. `skiff scp dev ./file.txt :/root/file.txt`"
    )]
    AmbiguousRemote,
}

/// Who and where to connect to.
#[derive(Clone, Debug)]
pub struct SshTarget {
    /// Login user.
    pub user: String,
    /// Address to connect to.
    pub host: String,
}

impl SshTarget {
    /// Renders the `user@host` form.
    #[must_use]
    pub fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }
}

/// Connection settings shared by ssh and scp.
#[derive(Clone, Debug)]
pub struct SshSettings {
    /// Private key path.
    pub key_path: String,
    /// Whether host keys are verified against known hosts.
    pub strict_host_key_checking: bool,
    /// Extra arguments from config, inserted before the destination.
    pub extra_args: Vec<String>,
}

/// Resolves the private key path: explicit flag, then the `SKIFF_SSH_KEY`
/// environment variable, then the `ssh_private_key_path` config value. A
/// leading `~/` is expanded.
///
/// # Errors
///
/// Returns [`SshError::MissingKey`] when every source is empty.
pub fn resolve_key_path(
    flag: Option<&str>,
    env: Option<&str>,
    config: Option<&str>,
) -> Result<String, SshError> {
    [flag, env, config]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|candidate| !candidate.is_empty())
        .map(expand_tilde)
        .ok_or(SshError::MissingKey)
}

fn common_options(settings: &SshSettings) -> Vec<String> {
    let mut options = vec![
        String::from("-i"),
        settings.key_path.clone(),
        String::from("-o"),
        String::from("IdentitiesOnly=yes"),
        String::from("-o"),
        String::from("ForwardAgent=yes"),
    ];
    if !settings.strict_host_key_checking {
        options.push(String::from("-o"));
        options.push(String::from("StrictHostKeyChecking=no"));
        options.push(String::from("-o"));
        options.push(format!("UserKnownHostsFile={}", null_device()));
    }
    options.extend(settings.extra_args.iter().cloned());
    options
}

/// Builds the argv for an interactive SSH session, agent forwarding on.
/// `passthrough` lands after the destination so it can carry a remote
/// command as well as ssh flags.
#[must_use]
pub fn ssh_command(
    target: &SshTarget,
    settings: &SshSettings,
    passthrough: &[String],
) -> Vec<String> {
    let mut command = vec![String::from("ssh"), String::from("-A")];
    command.extend(common_options(settings));
    command.push(target.destination());
    command.extend(passthrough.iter().cloned());
    command
}

/// Builds the argv for an scp transfer. A leading `:` marks the remote
/// side and is rewritten to `user@host:`; exactly one side must be remote.
/// `passthrough` lands before the paths so flags like `-r` apply.
///
/// # Errors
///
/// Returns [`SshError::AmbiguousRemote`] when zero or both paths are
/// marked remote.
pub fn scp_command(
    target: &SshTarget,
    settings: &SshSettings,
    source: &str,
    destination: &str,
    passthrough: &[String],
) -> Result<Vec<String>, SshError> {
    let source_remote = is_remote_spec(source);
    let destination_remote = is_remote_spec(destination);
    if source_remote == destination_remote {
        return Err(SshError::AmbiguousRemote);
    }
    let prefix = target.destination();
    let qualified_source = if source_remote {
        format!("{prefix}{source}")
    } else {
        source.to_owned()
    };
    let qualified_destination = if destination_remote {
        format!("{prefix}{destination}")
    } else {
        destination.to_owned()
    };

    let mut command = vec![String::from("scp")];
    command.extend(common_options(settings));
    command.extend(passthrough.iter().cloned());
    command.push(qualified_source);
    command.push(qualified_destination);
    Ok(command)
}

fn is_remote_spec(path: &str) -> bool {
    path.len() > 1 && path.starts_with(':')
}

/// Renders an argv for display, quoting arguments as a shell would expect.
#[must_use]
pub fn render_command(command: &[String]) -> String {
    command
        .iter()
        .map(|arg| shell_escape::escape(std::borrow::Cow::from(arg.as_str())).into_owned())
        .collect::<Vec<String>>()
        .join(" ")
}
