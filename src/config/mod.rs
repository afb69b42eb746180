//! Effective-configuration resolution for instance creation.
//!
//! Three layers feed the parameters of a create: the global config map in
//! the state document, an optional named template, and per-invocation
//! overrides from command-line flags. Later layers win key by key. The
//! result is a fully typed [`EffectiveCreate`] with every required value
//! present, or a [`ConfigError`] naming the first missing key.

use std::time::Duration;

use serde_json::{Map, Value};
use thiserror::Error;

use crate::state::StateDocument;

/// Errors raised while resolving or coercing configuration values.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required create parameter is absent from every layer.
    #[error(
        "missing required config value `{0}`; set it with `skiff config set {0} <value>` or pass the matching flag"
    )]
    MissingKey(String),
    /// A config value has the wrong JSON type for its key.
    #[error("config value `{key}` has the wrong type: expected {expected}")]
    WrongType {
        /// The offending key.
        key: String,
        /// Expected JSON type, for the error message.
        expected: &'static str,
    },
    /// The named template does not exist in the state document.
    #[error("template `{0}` not found")]
    UnknownTemplate(String),
}

/// A region identifier, normalized from a zone-style id when necessary.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ResolvedRegion {
    /// The normalized region id used for API calls.
    pub region_id: String,
    /// Present when the input looked like a zone id and was rewritten.
    pub warning: Option<String>,
}

/// Normalizes a region id, accepting zone-style ids by trimming the zone
/// suffix. `ap-northeast-1c` becomes `ap-northeast-1`; `cn-hangzhou-i`
/// becomes `cn-hangzhou`; a plain region id passes through untouched.
#[must_use]
pub fn normalize_region_id(raw: &str) -> ResolvedRegion {
    let trimmed = raw.trim();
    let normalized = strip_zone_suffix(trimmed);
    let warning = (normalized != trimmed).then(|| {
        format!("`{trimmed}` looks like a zone id; using region `{normalized}` for API calls")
    });
    ResolvedRegion {
        region_id: normalized.to_owned(),
        warning,
    }
}

/// `<region>-<n><letter>` zone form, e.g. `ap-northeast-1c`.
fn ends_with_digit_then_letter(value: &str) -> bool {
    let mut chars = value.chars().rev();
    matches!(
        (chars.next(), chars.next()),
        (Some(last), Some(prev)) if last.is_ascii_lowercase() && prev.is_ascii_digit()
    )
}

fn strip_zone_suffix(value: &str) -> &str {
    if ends_with_digit_then_letter(value) {
        return value.trim_end_matches(|ch: char| ch.is_ascii_lowercase());
    }
    // Single-letter final segment, e.g. `cn-hangzhou-i`.
    if let Some((head, tail)) = value.rsplit_once('-')
        && tail.len() == 1
        && tail.chars().all(|ch| ch.is_ascii_lowercase())
        && !head.is_empty()
    {
        return head;
    }
    value
}

/// Parses a CLI-supplied string into the most specific JSON value: `true`,
/// `false`, `null`, integers, floats, and inline JSON objects or arrays are
/// recognized, everything else stays a string. Numbers with leading zeros
/// such as `007` stay strings so identifiers are not mangled.
#[must_use]
pub fn coerce_value(raw: &str) -> Value {
    let trimmed = raw.trim();
    match trimmed {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        "null" => return Value::Null,
        _ => {}
    }
    if looks_like_plain_number(trimmed)
        && let Ok(parsed) = serde_json::from_str::<Value>(trimmed)
        && parsed.is_number()
    {
        return parsed;
    }
    if (trimmed.starts_with('{') || trimmed.starts_with('['))
        && let Ok(parsed) = serde_json::from_str::<Value>(trimmed)
    {
        return parsed;
    }
    Value::String(raw.to_owned())
}

fn looks_like_plain_number(value: &str) -> bool {
    let digits = value.strip_prefix('-').unwrap_or(value);
    if digits.is_empty() || !digits.chars().next().is_some_and(|ch| ch.is_ascii_digit()) {
        return false;
    }
    // A leading zero marks an identifier, not a number ("007", "0123-id").
    if digits.len() > 1 && digits.starts_with('0') && !digits.starts_with("0.") {
        return false;
    }
    digits.chars().all(|ch| ch.is_ascii_digit() || ch == '.')
}

/// Per-invocation create overrides, the highest-precedence config layer.
/// Every field is optional; `None` defers to the template and global layers.
#[derive(Clone, Debug, Default)]
pub struct CreateOverrides {
    /// Region or zone id; zone ids are normalized with a warning.
    pub region_id: Option<String>,
    /// Image id.
    pub image_id: Option<String>,
    /// Commercial instance type.
    pub instance_type: Option<String>,
    /// Security group id.
    pub security_group_id: Option<String>,
    /// VSwitch id.
    pub v_switch_id: Option<String>,
    /// Key pair name.
    pub key_pair_name: Option<String>,
    /// Explicit OS hostname; wins over `set_hostname_to_session`.
    pub hostname: Option<String>,
    /// System disk category; when set, disables the fallback retry chain.
    pub system_disk_category: Option<String>,
    /// System disk size in GB.
    pub system_disk_size: Option<i64>,
    /// ESSD performance level.
    pub system_disk_performance_level: Option<String>,
    /// Whether to allocate a public IP after the instance starts.
    pub allocate_public_ip: Option<bool>,
    /// Outbound bandwidth cap in Mbps.
    pub internet_max_bandwidth_out: Option<i64>,
    /// Spot strategy (`NoSpot`, `SpotAsPriceGo`, `SpotWithPriceLimit`).
    pub spot_strategy: Option<String>,
    /// Spot price ceiling; required by `SpotWithPriceLimit`.
    pub spot_price_limit: Option<f64>,
    /// SSH login user recorded on the session.
    pub ssh_user: Option<String>,
    /// Overall lifecycle timeout in seconds.
    pub timeout_seconds: Option<u64>,
    /// Status poll interval in seconds.
    pub poll_interval_seconds: Option<u64>,
}

/// Fully resolved create parameters after layering and validation.
#[derive(Clone, Debug)]
pub struct EffectiveCreate {
    /// Normalized region for all API calls.
    pub region_id: String,
    /// Image id.
    pub image_id: String,
    /// Commercial instance type.
    pub instance_type: String,
    /// Security group id.
    pub security_group_id: String,
    /// VSwitch id.
    pub v_switch_id: String,
    /// Key pair name.
    pub key_pair_name: String,
    /// OS hostname to request, if any.
    pub hostname: Option<String>,
    /// System disk category; `None` defers to the provider default.
    pub system_disk_category: Option<String>,
    /// Whether the category was pinned explicitly (disables fallbacks).
    pub disk_category_pinned: bool,
    /// Ordered categories retried when the provider rejects the default.
    pub disk_category_fallbacks: Vec<String>,
    /// System disk size in GB.
    pub system_disk_size: Option<i64>,
    /// ESSD performance level.
    pub system_disk_performance_level: Option<String>,
    /// Whether to allocate a public IP after start.
    pub allocate_public_ip: bool,
    /// Billing mode for public traffic.
    pub internet_charge_type: String,
    /// Outbound bandwidth cap in Mbps.
    pub internet_max_bandwidth_out: Option<i64>,
    /// Spot strategy, when set.
    pub spot_strategy: Option<String>,
    /// Spot price ceiling.
    pub spot_price_limit: Option<f64>,
    /// Spot protection duration in hours.
    pub spot_duration: Option<i64>,
    /// Behavior on spot interruption.
    pub spot_interruption_behavior: Option<String>,
    /// SSH login user recorded on the session.
    pub ssh_user: String,
    /// Overall lifecycle timeout.
    pub timeout: Duration,
    /// Status poll interval.
    pub poll_interval: Duration,
    /// Non-fatal notes gathered during resolution (zone rewrites and the
    /// like), for the caller to surface.
    pub warnings: Vec<String>,
}

/// Resolves the effective create parameters for a session.
///
/// Layering is global config, then the named template's config, then
/// `overrides`, later layers winning key by key. Absent required keys
/// produce [`ConfigError::MissingKey`] naming the key.
///
/// # Errors
///
/// Returns [`ConfigError::UnknownTemplate`] when `template` names a
/// template the document does not contain, [`ConfigError::MissingKey`] for
/// absent required values, and [`ConfigError::WrongType`] when a layered
/// value has an unusable JSON type.
pub fn resolve_create(
    document: &StateDocument,
    template: Option<&str>,
    session_name: &str,
    overrides: &CreateOverrides,
) -> Result<EffectiveCreate, ConfigError> {
    let mut merged = document.config.clone();
    if let Some(name) = template {
        let found = document
            .templates
            .get(name)
            .ok_or_else(|| ConfigError::UnknownTemplate(name.to_owned()))?;
        for (key, value) in &found.config {
            merged.insert(key.clone(), value.clone());
        }
    }
    apply_overrides(&mut merged, overrides);

    let mut warnings = Vec::new();
    let region = normalize_region_id(&required_str(&merged, "region_id")?);
    if let Some(warning) = region.warning {
        warnings.push(warning);
    }

    let hostname = resolve_hostname(&merged, session_name)?;
    let disk_category_pinned = overrides.system_disk_category.is_some();

    Ok(EffectiveCreate {
        region_id: region.region_id,
        image_id: required_str(&merged, "image_id")?,
        instance_type: required_str(&merged, "instance_type")?,
        security_group_id: required_str(&merged, "security_group_id")?,
        v_switch_id: required_str(&merged, "v_switch_id")?,
        key_pair_name: required_str(&merged, "key_pair_name")?,
        hostname,
        system_disk_category: optional_str(&merged, "system_disk_category")?,
        disk_category_pinned,
        disk_category_fallbacks: string_list(&merged, "system_disk_category_fallbacks")?,
        system_disk_size: optional_i64(&merged, "system_disk_size")?,
        system_disk_performance_level: optional_str(&merged, "system_disk_performance_level")?,
        allocate_public_ip: optional_bool(&merged, "auto_allocate_public_ip")?.unwrap_or(true),
        internet_charge_type: optional_str(&merged, "internet_charge_type")?
            .unwrap_or_else(|| String::from("PayByTraffic")),
        internet_max_bandwidth_out: optional_i64(&merged, "internet_max_bandwidth_out")?,
        spot_strategy: optional_str(&merged, "spot_strategy")?,
        spot_price_limit: optional_f64(&merged, "spot_price_limit")?,
        spot_duration: optional_i64(&merged, "spot_duration")?,
        spot_interruption_behavior: optional_str(&merged, "spot_interruption_behavior")?,
        ssh_user: optional_str(&merged, "ssh_user")?.unwrap_or_else(|| String::from("root")),
        timeout: Duration::from_secs(
            optional_u64(&merged, "timeout_seconds")?.unwrap_or(600),
        ),
        poll_interval: Duration::from_secs(
            optional_u64(&merged, "poll_interval_seconds")?.unwrap_or(5).max(1),
        ),
        warnings,
    })
}

/// Rewrites a session name into a hostname-safe label: non-alphanumerics
/// become hyphens, runs collapse, edges are trimmed, and the result is
/// capped at 63 characters.
#[must_use]
pub fn sanitize_hostname(name: &str) -> String {
    let mut label = String::new();
    let mut last_was_hyphen = true;
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            label.push(ch.to_ascii_lowercase());
            last_was_hyphen = false;
        } else if !last_was_hyphen {
            label.push('-');
            last_was_hyphen = true;
        }
        if label.len() == 63 {
            break;
        }
    }
    let trimmed = label.trim_matches('-');
    if trimmed.is_empty() {
        String::from("skiff")
    } else {
        trimmed.to_owned()
    }
}

fn resolve_hostname(
    merged: &Map<String, Value>,
    session_name: &str,
) -> Result<Option<String>, ConfigError> {
    if let Some(explicit) = optional_str(merged, "hostname")? {
        return Ok(Some(explicit));
    }
    let from_session = optional_bool(merged, "set_hostname_to_session")?.unwrap_or(true);
    Ok(from_session.then(|| sanitize_hostname(session_name)))
}

fn apply_overrides(merged: &mut Map<String, Value>, overrides: &CreateOverrides) {
    let strings = [
        ("region_id", &overrides.region_id),
        ("image_id", &overrides.image_id),
        ("instance_type", &overrides.instance_type),
        ("security_group_id", &overrides.security_group_id),
        ("v_switch_id", &overrides.v_switch_id),
        ("key_pair_name", &overrides.key_pair_name),
        ("hostname", &overrides.hostname),
        ("system_disk_category", &overrides.system_disk_category),
        (
            "system_disk_performance_level",
            &overrides.system_disk_performance_level,
        ),
        ("spot_strategy", &overrides.spot_strategy),
        ("ssh_user", &overrides.ssh_user),
    ];
    for (key, slot) in strings {
        if let Some(text) = slot {
            merged.insert(key.to_owned(), Value::String(text.clone()));
        }
    }
    let integers = [
        ("system_disk_size", overrides.system_disk_size),
        (
            "internet_max_bandwidth_out",
            overrides.internet_max_bandwidth_out,
        ),
    ];
    for (key, slot) in integers {
        if let Some(number) = slot {
            merged.insert(key.to_owned(), Value::from(number));
        }
    }
    if let Some(value) = overrides.allocate_public_ip {
        merged.insert(String::from("auto_allocate_public_ip"), Value::Bool(value));
    }
    if let Some(value) = overrides.spot_price_limit {
        merged.insert(String::from("spot_price_limit"), Value::from(value));
    }
    if let Some(value) = overrides.timeout_seconds {
        merged.insert(String::from("timeout_seconds"), Value::from(value));
    }
    if let Some(value) = overrides.poll_interval_seconds {
        merged.insert(String::from("poll_interval_seconds"), Value::from(value));
    }
}

fn required_str(merged: &Map<String, Value>, key: &str) -> Result<String, ConfigError> {
    optional_str(merged, key)?.ok_or_else(|| ConfigError::MissingKey(key.to_owned()))
}

fn optional_str(merged: &Map<String, Value>, key: &str) -> Result<Option<String>, ConfigError> {
    match merged.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(value)) => {
            let trimmed = value.trim();
            Ok((!trimmed.is_empty()).then(|| trimmed.to_owned()))
        }
        Some(other) => {
            // Numbers typed into string-valued keys still read back cleanly.
            if let Some(number) = other.as_i64() {
                return Ok(Some(number.to_string()));
            }
            Err(ConfigError::WrongType {
                key: key.to_owned(),
                expected: "string",
            })
        }
    }
}

fn optional_i64(merged: &Map<String, Value>, key: &str) -> Result<Option<i64>, ConfigError> {
    match merged.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(number)) if number.as_i64().is_some() => Ok(number.as_i64()),
        Some(Value::String(value)) if value.trim().is_empty() => Ok(None),
        Some(Value::String(value)) => value.trim().parse().map(Some).map_err(|_| {
            ConfigError::WrongType {
                key: key.to_owned(),
                expected: "integer",
            }
        }),
        Some(_) => Err(ConfigError::WrongType {
            key: key.to_owned(),
            expected: "integer",
        }),
    }
}

fn optional_u64(merged: &Map<String, Value>, key: &str) -> Result<Option<u64>, ConfigError> {
    match optional_i64(merged, key)? {
        None => Ok(None),
        Some(value) => u64::try_from(value).map(Some).map_err(|_| {
            ConfigError::WrongType {
                key: key.to_owned(),
                expected: "non-negative integer",
            }
        }),
    }
}

fn optional_f64(merged: &Map<String, Value>, key: &str) -> Result<Option<f64>, ConfigError> {
    match merged.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(number)) => Ok(number.as_f64()),
        Some(Value::String(value)) if value.trim().is_empty() => Ok(None),
        Some(Value::String(value)) => value.trim().parse().map(Some).map_err(|_| {
            ConfigError::WrongType {
                key: key.to_owned(),
                expected: "number",
            }
        }),
        Some(_) => Err(ConfigError::WrongType {
            key: key.to_owned(),
            expected: "number",
        }),
    }
}

fn optional_bool(merged: &Map<String, Value>, key: &str) -> Result<Option<bool>, ConfigError> {
    match merged.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(value)) => Ok(Some(*value)),
        Some(_) => Err(ConfigError::WrongType {
            key: key.to_owned(),
            expected: "boolean",
        }),
    }
}

fn string_list(merged: &Map<String, Value>, key: &str) -> Result<Vec<String>, ConfigError> {
    match merged.get(key) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str().map(str::to_owned).ok_or_else(|| {
                    ConfigError::WrongType {
                        key: key.to_owned(),
                        expected: "array of strings",
                    }
                })
            })
            .collect(),
        Some(_) => Err(ConfigError::WrongType {
            key: key.to_owned(),
            expected: "array of strings",
        }),
    }
}

#[cfg(test)]
mod tests;
