//! Session lifecycle: create, start, stop, delete, rename, and the bounded
//! waits that follow provider state transitions.
//!
//! Every mutation follows the same discipline: remote call first, then the
//! local record, then a save. A crash between provider call and save can
//! leave an untracked remote instance (recoverable with `sync --import`),
//! never a record pointing at provisioning work that was not attempted.

use std::time::{Duration, Instant};

use tokio::time::sleep;

use crate::config::{ConfigError, CreateOverrides, EffectiveCreate, resolve_create};
use crate::provider::{
    ComputeProvider, CreateInstanceSpec, InstanceSnapshot, ProviderError, StopMode, TagFilter,
};
use crate::state::{SessionRecord, StateError, StateStore, status};
use crate::util::now_iso_utc;

use thiserror::Error;

/// Tag marking instances managed by this tool.
pub const MANAGED_TAG_KEY: &str = "skiff";
/// Tag carrying the session name on the remote instance.
pub const SESSION_TAG_KEY: &str = "skiff_session";

/// Cap on the extra wait for a public address after the instance runs.
const PUBLIC_IP_WAIT_CAP: Duration = Duration::from_secs(120);

/// Errors raised by lifecycle operations.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// A session with this name already exists.
    #[error("session `{0}` already exists")]
    DuplicateSession(String),
    /// No session with this name is recorded.
    #[error("session `{0}` not found")]
    SessionNotFound(String),
    /// The record lacks the region or instance id needed for a remote call.
    #[error("session `{0}` has no usable instance reference; run `skiff sync`")]
    MissingInstance(String),
    /// Configuration resolution failed.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The provider rejected or failed a request.
    #[error(transparent)]
    Provider(#[from] ProviderError),
    /// The state store failed.
    #[error(transparent)]
    State(#[from] StateError),
    /// A bounded wait expired before the desired status was observed.
    #[error("timed out waiting for `{name}` to reach {desired}; last status was {last_status}")]
    Timeout {
        /// Session being watched.
        name: String,
        /// Status that was awaited.
        desired: String,
        /// Last status observed before the deadline.
        last_status: String,
    },
}

/// Result of a successful create: the persisted record plus the resolved
/// parameters the caller needs for follow-up waits.
#[derive(Clone, Debug)]
pub struct CreateOutcome {
    /// The session record as last saved.
    pub record: SessionRecord,
    /// Fully resolved create parameters.
    pub effective: EffectiveCreate,
    /// Non-fatal notes: zone rewrites, disk category retries.
    pub warnings: Vec<String>,
}

/// Drives session state transitions against a [`ComputeProvider`],
/// persisting every observation through a [`StateStore`].
#[derive(Debug)]
pub struct SessionLifecycle<P> {
    provider: P,
    store: StateStore,
}

impl<P: ComputeProvider> SessionLifecycle<P> {
    /// Creates a lifecycle manager.
    #[must_use]
    pub const fn new(provider: P, store: StateStore) -> Self {
        Self { provider, store }
    }

    /// Returns the underlying state store.
    #[must_use]
    pub const fn store(&self) -> &StateStore {
        &self.store
    }

    /// Creates the instance for a new session and issues the start call.
    ///
    /// The record is saved with status `Created` as soon as the provider
    /// returns an instance id, before the start is attempted, so a crash in
    /// between never orphans the instance. A failed start is recorded as
    /// `StartFailed` with the error text in `last_error`, then surfaced.
    ///
    /// When no disk category is configured and the provider answers
    /// `InvalidSystemDiskCategory.ValueNotSupported`, creation is retried
    /// once per configured fallback category, in order.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::DuplicateSession`] for a name collision,
    /// plus config, provider, and state errors from the steps involved.
    pub async fn create(
        &self,
        name: &str,
        template: Option<&str>,
        overrides: &CreateOverrides,
    ) -> Result<CreateOutcome, LifecycleError> {
        let mut document = self.store.load()?;
        if document.sessions.contains_key(name) {
            return Err(LifecycleError::DuplicateSession(name.to_owned()));
        }
        let effective = resolve_create(&document, template, name, overrides)?;
        let mut warnings = effective.warnings.clone();

        let spec = build_spec(name, &effective);
        let (instance_id, used_category) = self
            .create_with_disk_fallback(&spec, &effective, &mut warnings)
            .await?;

        let mut record = record_for_create(name, template, &effective, &instance_id);
        record.system_disk_category = used_category;
        document.sessions.insert(name.to_owned(), record.clone());
        self.store.save(&mut document)?;

        if let Err(err) = self
            .provider
            .start_instance(&effective.region_id, &instance_id)
            .await
        {
            if let Some(stored) = document.sessions.get_mut(name) {
                stored.status = String::from(status::START_FAILED);
                stored.last_error = Some(err.to_string());
            }
            self.store.save(&mut document)?;
            return Err(err.into());
        }

        if let Some(stored) = document.sessions.get_mut(name) {
            stored.status = String::from(status::STARTING);
            record = stored.clone();
        }
        self.store.save(&mut document)?;

        Ok(CreateOutcome {
            record,
            effective,
            warnings,
        })
    }

    async fn create_with_disk_fallback(
        &self,
        spec: &CreateInstanceSpec,
        effective: &EffectiveCreate,
        warnings: &mut Vec<String>,
    ) -> Result<(String, Option<String>), LifecycleError> {
        let first_attempt = spec.clone();
        let outcome = self.provider.create_instance(&first_attempt).await;
        let retryable = effective.system_disk_category.is_none()
            && !effective.disk_category_pinned
            && !effective.disk_category_fallbacks.is_empty();
        let err = match outcome {
            Ok(instance_id) => {
                return Ok((instance_id, effective.system_disk_category.clone()));
            }
            Err(err) => err,
        };
        if !retryable || !is_disk_category_rejection(&err) {
            return Err(err.into());
        }

        let mut last_err = err;
        for category in &effective.disk_category_fallbacks {
            warnings.push(format!(
                "default system disk category not supported; retrying with {category}"
            ));
            let mut attempt = spec.clone();
            attempt.system_disk_category = Some(category.clone());
            match self.provider.create_instance(&attempt).await {
                Ok(instance_id) => return Ok((instance_id, Some(category.clone()))),
                Err(retry_err) if is_disk_category_rejection(&retry_err) => {
                    last_err = retry_err;
                }
                Err(retry_err) => return Err(retry_err.into()),
            }
        }
        Err(last_err.into())
    }

    /// Waits until the provider reports `Running` for this session.
    ///
    /// # Errors
    ///
    /// See [`SessionLifecycle::await_status`].
    pub async fn await_running(
        &self,
        name: &str,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<SessionRecord, LifecycleError> {
        self.await_status(name, status::RUNNING, timeout, poll_interval)
            .await
    }

    /// Polls the provider until the session's instance reports `desired`,
    /// persisting every observation so progress survives an interrupt.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Timeout`] when the deadline passes; the
    /// record keeps the last observed status. Provider errors during
    /// polling are surfaced immediately.
    pub async fn await_status(
        &self,
        name: &str,
        desired: &str,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<SessionRecord, LifecycleError> {
        let (region, instance) = self.instance_ref_of(name)?;
        let deadline = Instant::now() + timeout;
        let mut last_status = self
            .store
            .load()?
            .sessions
            .get(name)
            .map(|record| record.status.clone())
            .unwrap_or_default();

        loop {
            let snapshot = self.provider.describe_instance(&region, &instance).await?;
            if let Some(observed) = snapshot {
                last_status.clone_from(&observed.status);
                let record = self.apply_snapshot(name, &observed)?;
                if observed.status == desired {
                    return Ok(record);
                }
            }
            if Instant::now() + poll_interval > deadline {
                return Err(LifecycleError::Timeout {
                    name: name.to_owned(),
                    desired: desired.to_owned(),
                    last_status,
                });
            }
            sleep(poll_interval).await;
        }
    }

    /// Fetches one snapshot for the session and persists it.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::SessionNotFound`] or
    /// [`LifecycleError::MissingInstance`] for unusable records, and
    /// provider or state errors otherwise.
    pub async fn refresh(&self, name: &str) -> Result<SessionRecord, LifecycleError> {
        let (region, instance) = self.instance_ref_of(name)?;
        let snapshot = self.provider.describe_instance(&region, &instance).await?;
        match snapshot {
            Some(observed) => self.apply_snapshot(name, &observed),
            None => self.mark_not_found(name),
        }
    }

    /// Ensures the session has a public address, allocating one when the
    /// provider supports it. Allocation failure is not fatal; the caller
    /// gets `None` and decides how loudly to warn.
    ///
    /// # Errors
    ///
    /// Returns record and state errors; provider errors during allocation
    /// are swallowed into the `None` outcome.
    pub async fn ensure_public_ip(
        &self,
        name: &str,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<Option<String>, LifecycleError> {
        let (region, instance) = self.instance_ref_of(name)?;
        let document = self.store.load()?;
        if let Some(ip) = document
            .sessions
            .get(name)
            .and_then(|record| record.public_ip.clone())
        {
            return Ok(Some(ip));
        }

        if let Ok(ip) = self.provider.allocate_public_ip(&region, &instance).await {
            if let Some(observed) = self.provider.describe_instance(&region, &instance).await? {
                self.apply_snapshot(name, &observed)?;
            }
            return Ok(Some(ip));
        }

        // Some setups assign an address asynchronously; give it a short,
        // bounded window to appear.
        let deadline = Instant::now() + timeout.min(PUBLIC_IP_WAIT_CAP);
        while Instant::now() <= deadline {
            if let Some(observed) = self.provider.describe_instance(&region, &instance).await? {
                let record = self.apply_snapshot(name, &observed)?;
                if record.public_ip.is_some() {
                    return Ok(record.public_ip);
                }
            }
            sleep(poll_interval).await;
        }
        Ok(None)
    }

    /// Starts the session's instance and records status `Starting`.
    ///
    /// # Errors
    ///
    /// Returns record, provider, and state errors.
    pub async fn start(&self, name: &str) -> Result<SessionRecord, LifecycleError> {
        let (region, instance) = self.instance_ref_of(name)?;
        self.provider.start_instance(&region, &instance).await?;
        self.set_status(name, status::STARTING)
    }

    /// Stops the session's instance and records status `Stopping`.
    ///
    /// The stop mode is validated by the caller when parsing flags, so an
    /// invalid spelling never reaches the provider.
    ///
    /// # Errors
    ///
    /// Returns record, provider, and state errors.
    pub async fn stop(
        &self,
        name: &str,
        force: bool,
        mode: StopMode,
    ) -> Result<SessionRecord, LifecycleError> {
        let (region, instance) = self.instance_ref_of(name)?;
        self.provider
            .stop_instance(&region, &instance, force, mode)
            .await?;
        self.set_status(name, status::STOPPING)
    }

    /// Deletes the session's instance, then removes the local record unless
    /// the caller asked to keep it.
    ///
    /// The remote delete happens first; when it fails the record is left
    /// untouched so the operation can be retried. A provider answer that
    /// the instance no longer exists counts as success.
    ///
    /// # Errors
    ///
    /// Returns record, provider, and state errors.
    pub async fn delete(
        &self,
        name: &str,
        force: bool,
        keep_record: bool,
    ) -> Result<SessionRecord, LifecycleError> {
        let mut document = self.store.load()?;
        let record = document
            .sessions
            .get(name)
            .cloned()
            .ok_or_else(|| LifecycleError::SessionNotFound(name.to_owned()))?;

        if let Some((region, instance)) = record.instance_ref() {
            match self.provider.delete_instance(region, instance, force).await {
                Ok(()) => {}
                Err(err) if is_instance_missing(&err) => {}
                Err(err) => return Err(err.into()),
            }
        }

        if keep_record {
            return Ok(record);
        }
        document.sessions.remove(name);
        self.store.save(&mut document)?;
        Ok(record)
    }

    /// Renames a session locally. The remote instance and its tags are left
    /// untouched; only the record key moves.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::SessionNotFound`] when `old` is absent and
    /// [`LifecycleError::DuplicateSession`] when `new` is taken.
    pub fn rename(&self, old: &str, new: &str) -> Result<SessionRecord, LifecycleError> {
        let mut document = self.store.load()?;
        if document.sessions.contains_key(new) {
            return Err(LifecycleError::DuplicateSession(new.to_owned()));
        }
        let mut record = document
            .sessions
            .remove(old)
            .ok_or_else(|| LifecycleError::SessionNotFound(old.to_owned()))?;
        record.name = new.to_owned();
        document.sessions.insert(new.to_owned(), record.clone());
        self.store.save(&mut document)?;
        Ok(record)
    }

    fn instance_ref_of(&self, name: &str) -> Result<(String, String), LifecycleError> {
        let document = self.store.load()?;
        let record = document
            .sessions
            .get(name)
            .ok_or_else(|| LifecycleError::SessionNotFound(name.to_owned()))?;
        let (region, instance) = record
            .instance_ref()
            .ok_or_else(|| LifecycleError::MissingInstance(name.to_owned()))?;
        Ok((region.to_owned(), instance.to_owned()))
    }

    fn apply_snapshot(
        &self,
        name: &str,
        observed: &InstanceSnapshot,
    ) -> Result<SessionRecord, LifecycleError> {
        let mut document = self.store.load()?;
        let record = document
            .sessions
            .get_mut(name)
            .ok_or_else(|| LifecycleError::SessionNotFound(name.to_owned()))?;
        apply_snapshot_to_record(record, observed);
        let updated = record.clone();
        self.store.save(&mut document)?;
        Ok(updated)
    }

    fn mark_not_found(&self, name: &str) -> Result<SessionRecord, LifecycleError> {
        let mut document = self.store.load()?;
        let record = document
            .sessions
            .get_mut(name)
            .ok_or_else(|| LifecycleError::SessionNotFound(name.to_owned()))?;
        record.status = String::from(status::NOT_FOUND);
        record.last_refresh_at = Some(now_iso_utc());
        if record.missing_since.is_none() {
            record.missing_since = Some(now_iso_utc());
        }
        let updated = record.clone();
        self.store.save(&mut document)?;
        Ok(updated)
    }

    fn set_status(&self, name: &str, new_status: &str) -> Result<SessionRecord, LifecycleError> {
        let mut document = self.store.load()?;
        let record = document
            .sessions
            .get_mut(name)
            .ok_or_else(|| LifecycleError::SessionNotFound(name.to_owned()))?;
        record.status = new_status.to_owned();
        record.last_refresh_at = Some(now_iso_utc());
        let updated = record.clone();
        self.store.save(&mut document)?;
        Ok(updated)
    }
}

/// Copies the observed fields onto a record and stamps the refresh time.
/// A successful observation always clears `missing_since`.
pub(crate) fn apply_snapshot_to_record(record: &mut SessionRecord, observed: &InstanceSnapshot) {
    if !observed.status.is_empty() {
        record.status.clone_from(&observed.status);
    }
    record.public_ip.clone_from(&observed.public_ip);
    record.private_ip.clone_from(&observed.private_ip);
    if observed.image_id.is_some() {
        record.image_id.clone_from(&observed.image_id);
    }
    if observed.instance_type.is_some() {
        record.instance_type.clone_from(&observed.instance_type);
    }
    if observed.instance_name.is_some() {
        record.instance_name.clone_from(&observed.instance_name);
    }
    record.last_refresh_at = Some(now_iso_utc());
    record.missing_since = None;
}

/// Tags attached at creation so sync can rediscover managed instances.
#[must_use]
pub fn managed_tags(session_name: &str) -> Vec<TagFilter> {
    vec![
        TagFilter {
            key: String::from(MANAGED_TAG_KEY),
            value: String::from("true"),
        },
        TagFilter {
            key: String::from(SESSION_TAG_KEY),
            value: session_name.to_owned(),
        },
    ]
}

fn build_spec(name: &str, effective: &EffectiveCreate) -> CreateInstanceSpec {
    CreateInstanceSpec {
        region_id: effective.region_id.clone(),
        image_id: effective.image_id.clone(),
        instance_type: effective.instance_type.clone(),
        security_group_id: effective.security_group_id.clone(),
        v_switch_id: effective.v_switch_id.clone(),
        key_pair_name: effective.key_pair_name.clone(),
        instance_name: name.to_owned(),
        hostname: effective.hostname.clone(),
        system_disk_category: effective.system_disk_category.clone(),
        system_disk_size: effective.system_disk_size,
        system_disk_performance_level: effective.system_disk_performance_level.clone(),
        internet_max_bandwidth_out: effective.internet_max_bandwidth_out,
        internet_charge_type: Some(effective.internet_charge_type.clone()),
        spot_strategy: effective.spot_strategy.clone(),
        spot_price_limit: effective.spot_price_limit,
        spot_duration: effective.spot_duration,
        spot_interruption_behavior: effective.spot_interruption_behavior.clone(),
        tags: managed_tags(name),
    }
}

fn record_for_create(
    name: &str,
    template: Option<&str>,
    effective: &EffectiveCreate,
    instance_id: &str,
) -> SessionRecord {
    SessionRecord {
        name: name.to_owned(),
        template: template.map(str::to_owned),
        region_id: effective.region_id.clone(),
        instance_id: instance_id.to_owned(),
        image_id: Some(effective.image_id.clone()),
        instance_type: Some(effective.instance_type.clone()),
        instance_name: Some(name.to_owned()),
        hostname: effective.hostname.clone(),
        key_pair_name: Some(effective.key_pair_name.clone()),
        system_disk_category: effective.system_disk_category.clone(),
        system_disk_size: effective.system_disk_size,
        system_disk_performance_level: effective.system_disk_performance_level.clone(),
        created_at: Some(now_iso_utc()),
        status: String::from(status::CREATED),
        ssh_user: Some(effective.ssh_user.clone()),
        ..SessionRecord::default()
    }
}

fn is_disk_category_rejection(err: &ProviderError) -> bool {
    err.api_code() == Some("InvalidSystemDiskCategory.ValueNotSupported")
}

fn is_instance_missing(err: &ProviderError) -> bool {
    matches!(
        err.api_code(),
        Some("InvalidInstanceId.NotFound" | "InvalidInstanceIds.NotFound")
    )
}
