//! Small shared helpers: timestamps, platform quirks, path expansion.

use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Returns the current UTC time as a second-precision RFC 3339 string,
/// for example `2026-08-27T12:34:56Z`.
#[must_use]
pub fn now_iso_utc() -> String {
    let now = OffsetDateTime::now_utc();
    let trimmed = now.replace_nanosecond(0).unwrap_or(now);
    trimmed
        .format(&Rfc3339)
        .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"))
}

/// Returns the platform null device path used to disable known-hosts files.
#[must_use]
pub const fn null_device() -> &'static str {
    if cfg!(windows) { "NUL" } else { "/dev/null" }
}

/// Expands a leading `~/` prefix to the user's home directory.
///
/// When the `HOME` environment variable is not set the input is returned
/// unchanged; callers that need a hard failure should resolve the home
/// directory explicitly.
#[must_use]
pub fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/")
        && let Some(home) = std::env::var_os("HOME")
    {
        return format!("{}/{rest}", home.to_string_lossy());
    }
    path.to_owned()
}
