//! Managed `~/.ssh/config` blocks.
//!
//! Each session gets one block delimited by marker comments, so skiff can
//! rewrite or delete its own entries without touching anything the user
//! wrote. Blocks are matched by session name; host aliases are sanitized
//! and prefixed to keep them out of the way of hand-written hosts.

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use thiserror::Error;

use crate::util::null_device;

const BEGIN_PREFIX: &str = "# >>> skiff session:";
const END_PREFIX: &str = "# <<< skiff session:";

/// Default host alias prefix used when config does not override it.
pub const DEFAULT_HOST_PREFIX: &str = "skiff-";

/// Errors raised while editing the SSH config file.
#[derive(Debug, Error)]
pub enum SshConfigError {
    /// Raised when the config file cannot be read or written.
    #[error("failed to access {path}: {message}")]
    Io {
        /// Path that could not be accessed.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when the config path has no filename component.
    #[error("invalid ssh config path: {0}")]
    InvalidPath(Utf8PathBuf),
}

/// One managed host entry.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SshConfigEntry {
    /// Session the block belongs to; also the block marker key.
    pub session_name: String,
    /// `Host` alias exposed to the user.
    pub host_alias: String,
    /// Address or hostname to connect to.
    pub host_name: String,
    /// Login user.
    pub user: String,
    /// Private key path, when one is configured.
    pub identity_file: Option<String>,
    /// Emit `ForwardAgent yes`.
    pub forward_agent: bool,
    /// Emit `IdentitiesOnly yes`.
    pub identities_only: bool,
    /// When false, host key checking is disabled and known hosts are sent
    /// to the platform null device.
    pub strict_host_key_checking: bool,
}

impl SshConfigEntry {
    /// Builds an entry with the defaults used for ephemeral instances:
    /// agent forwarding on, identities pinned, host key checking off.
    #[must_use]
    pub fn new(session_name: &str, host_alias: &str, host_name: &str, user: &str) -> Self {
        Self {
            session_name: session_name.to_owned(),
            host_alias: host_alias.to_owned(),
            host_name: host_name.to_owned(),
            user: user.to_owned(),
            identity_file: None,
            forward_agent: true,
            identities_only: true,
            strict_host_key_checking: false,
        }
    }
}

/// Rewrites a session name into a safe `Host` alias and applies the prefix.
#[must_use]
pub fn default_host_alias(session_name: &str, prefix: &str) -> String {
    let mut alias = String::new();
    let mut last_was_hyphen = true;
    for ch in session_name.trim().chars() {
        if ch.is_ascii_alphanumeric() || ch == '.' || ch == '_' || ch == '-' {
            last_was_hyphen = ch == '-';
            if !(last_was_hyphen && alias.ends_with('-')) {
                alias.push(ch);
            }
        } else if !last_was_hyphen {
            alias.push('-');
            last_was_hyphen = true;
        }
    }
    let trimmed = alias.trim_matches('-');
    let body = if trimmed.is_empty() { "session" } else { trimmed };
    format!("{prefix}{body}")
}

/// Renders one managed block, markers included, with a trailing newline.
#[must_use]
pub fn render_entry(entry: &SshConfigEntry) -> String {
    let mut lines = vec![
        format!("{BEGIN_PREFIX} {}", entry.session_name),
        format!("Host {}", entry.host_alias),
        format!("  HostName {}", entry.host_name),
        format!("  User {}", entry.user),
    ];
    if let Some(identity) = &entry.identity_file {
        // Forward slashes keep the entry portable across platforms.
        lines.push(format!("  IdentityFile {}", identity.replace('\\', "/")));
    }
    if entry.forward_agent {
        lines.push(String::from("  ForwardAgent yes"));
    }
    if entry.identities_only {
        lines.push(String::from("  IdentitiesOnly yes"));
    }
    if !entry.strict_host_key_checking {
        lines.push(String::from("  StrictHostKeyChecking no"));
        lines.push(format!("  UserKnownHostsFile {}", null_device()));
    }
    lines.push(format!("{END_PREFIX} {}", entry.session_name));
    let mut rendered = lines.join("\n");
    rendered.push('\n');
    rendered
}

/// Inserts or replaces the managed block for `entry.session_name`, leaving
/// all other content byte-for-byte intact.
///
/// # Errors
///
/// Returns [`SshConfigError`] when the file cannot be read or written.
pub fn upsert(path: &Utf8Path, entry: &SshConfigEntry) -> Result<(), SshConfigError> {
    let existing = read_optional(path)?.unwrap_or_default();
    let (mut stripped, _) = remove_block(&existing, &entry.session_name);
    if !stripped.is_empty() && !stripped.ends_with('\n') {
        stripped.push('\n');
    }
    stripped.push_str(&render_entry(entry));
    write_all(path, stripped.as_bytes())
}

/// Removes the managed block for a session. Returns whether a block was
/// found; a missing file or block is not an error.
///
/// # Errors
///
/// Returns [`SshConfigError`] when the file cannot be read or written.
pub fn remove(path: &Utf8Path, session_name: &str) -> Result<bool, SshConfigError> {
    let Some(existing) = read_optional(path)? else {
        return Ok(false);
    };
    let (stripped, removed) = remove_block(&existing, session_name);
    if removed {
        write_all(path, stripped.as_bytes())?;
    }
    Ok(removed)
}

/// Drops the marker-delimited block for one session, keeping line endings
/// of the surrounding content untouched.
fn remove_block(text: &str, session_name: &str) -> (String, bool) {
    let begin = format!("{BEGIN_PREFIX} {session_name}");
    let end = format!("{END_PREFIX} {session_name}");
    let mut out = String::with_capacity(text.len());
    let mut removed = false;
    let mut inside = false;
    for line in text.split_inclusive('\n') {
        let trimmed = line.trim();
        if inside {
            if trimmed == end {
                inside = false;
            }
            continue;
        }
        if trimmed == begin {
            removed = true;
            inside = true;
            continue;
        }
        out.push_str(line);
    }
    (out, removed)
}

fn split_path(path: &Utf8Path) -> Result<(&Utf8Path, &str), SshConfigError> {
    let parent = path.parent().unwrap_or_else(|| Utf8Path::new("."));
    let file_name = path
        .file_name()
        .ok_or_else(|| SshConfigError::InvalidPath(path.to_path_buf()))?;
    Ok((parent, file_name))
}

fn read_optional(path: &Utf8Path) -> Result<Option<String>, SshConfigError> {
    let (parent, file_name) = split_path(path)?;
    let dir = match Dir::open_ambient_dir(parent, ambient_authority()) {
        Ok(dir) => dir,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(SshConfigError::Io {
                path: parent.to_path_buf(),
                message: err.to_string(),
            });
        }
    };
    match dir.read_to_string(file_name) {
        Ok(contents) => Ok(Some(contents)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(SshConfigError::Io {
            path: path.to_path_buf(),
            message: err.to_string(),
        }),
    }
}

fn write_all(path: &Utf8Path, bytes: &[u8]) -> Result<(), SshConfigError> {
    let (parent, file_name) = split_path(path)?;
    Dir::create_ambient_dir_all(parent, ambient_authority()).map_err(|err| SshConfigError::Io {
        path: parent.to_path_buf(),
        message: err.to_string(),
    })?;
    let dir = Dir::open_ambient_dir(parent, ambient_authority()).map_err(|err| {
        SshConfigError::Io {
            path: parent.to_path_buf(),
            message: err.to_string(),
        }
    })?;
    dir.write(file_name, bytes).map_err(|err| SshConfigError::Io {
        path: path.to_path_buf(),
        message: err.to_string(),
    })
}
