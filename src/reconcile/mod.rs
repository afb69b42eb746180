//! Sync engine: reconciles local session records against live provider
//! listings.
//!
//! One pass lists instances per region, refreshes every matched record,
//! marks or prunes the vanished ones, and optionally imports unknown
//! instances as new sessions. Matching uses the instance id only; names,
//! tags, and regions never pair a record with a listing. Per-region listing
//! failures degrade to warnings so one unreachable region does not abort
//! the pass, and the state file is written once at the end.

use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;

use crate::config::normalize_region_id;
use crate::lifecycle::{MANAGED_TAG_KEY, apply_snapshot_to_record};
use crate::provider::{ComputeProvider, InstanceSnapshot, ProviderError, TagFilter};
use crate::state::{SessionRecord, StateDocument, StateError, StateStore, status};
use crate::util::now_iso_utc;

/// Seed region used to address `DescribeRegions` when nothing else is
/// configured.
const FALLBACK_SEED_REGION: &str = "cn-hangzhou";

/// Errors that abort a sync pass outright.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// No region could be determined from flags, config, or sessions.
    #[error(
        "no region to sync; set config region_id, pass --region-id, or use --all-regions"
    )]
    NoRegions,
    /// The full region listing failed while `--all-regions` was requested.
    #[error("failed to list regions: {0}")]
    RegionListing(#[source] ProviderError),
    /// The state store failed.
    #[error(transparent)]
    State(#[from] StateError),
}

/// Options controlling one sync pass.
#[derive(Clone, Debug, Default)]
pub struct SyncOptions {
    /// Explicit regions to sync; zone ids are accepted and normalized.
    pub regions: Vec<String>,
    /// Sync every region the account can see.
    pub all_regions: bool,
    /// Remove vanished sessions instead of marking them `NotFound`.
    pub prune: bool,
    /// Import unknown instances as new sessions.
    pub import_new: bool,
    /// With import: take every instance, not only tagged ones.
    pub import_all: bool,
}

/// Summary of one sync pass.
#[derive(Clone, Debug, Default)]
pub struct SyncReport {
    /// Regions that were queried, in order.
    pub regions: Vec<String>,
    /// Sessions refreshed from a live listing.
    pub refreshed: Vec<String>,
    /// Sessions newly or still marked `NotFound`.
    pub marked_missing: Vec<String>,
    /// Sessions removed by `--prune`.
    pub removed: Vec<String>,
    /// Sessions created by import.
    pub imported: Vec<String>,
    /// Non-fatal problems, one line each.
    pub warnings: Vec<String>,
}

/// Runs sync passes against a [`ComputeProvider`] and a [`StateStore`].
#[derive(Debug)]
pub struct Reconciler<P> {
    provider: P,
    store: StateStore,
}

impl<P: ComputeProvider> Reconciler<P> {
    /// Creates a reconciler.
    #[must_use]
    pub const fn new(provider: P, store: StateStore) -> Self {
        Self { provider, store }
    }

    /// Runs one sync pass and saves the state file once at the end.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::NoRegions`] when no region can be
    /// determined, [`ReconcileError::RegionListing`] when `--all-regions`
    /// cannot enumerate regions, and state errors from load or save.
    /// Per-region listing failures are reported as warnings instead.
    pub async fn run(&self, options: &SyncOptions) -> Result<SyncReport, ReconcileError> {
        let mut document = self.store.load()?;
        let mut report = SyncReport::default();

        let regions = self.determine_regions(&document, options, &mut report).await?;
        report.regions.clone_from(&regions);

        let live = self.collect_instances(&regions, None, &mut report).await;

        refresh_sessions(&mut document, &live, options, &mut report);

        if options.import_new {
            let candidates = if options.import_all {
                live
            } else {
                let filter = TagFilter {
                    key: String::from(MANAGED_TAG_KEY),
                    value: String::from("true"),
                };
                self.collect_instances(&regions, Some(&filter), &mut report)
                    .await
            };
            import_candidates(&mut document, &candidates, &mut report);
        }

        self.store.save(&mut document)?;
        Ok(report)
    }

    async fn determine_regions(
        &self,
        document: &StateDocument,
        options: &SyncOptions,
        report: &mut SyncReport,
    ) -> Result<Vec<String>, ReconcileError> {
        let mut raw: Vec<String> = Vec::new();
        if !options.regions.is_empty() {
            raw.clone_from(&options.regions);
        } else if options.all_regions {
            let seed = document
                .config_str("region_id")
                .map(str::to_owned)
                .or_else(|| {
                    document
                        .sessions
                        .values()
                        .find_map(|record| record.instance_ref().map(|(region, _)| region.to_owned()))
                })
                .unwrap_or_else(|| String::from(FALLBACK_SEED_REGION));
            raw = self
                .provider
                .list_regions(&seed)
                .await
                .map_err(ReconcileError::RegionListing)?;
        } else {
            if let Some(region) = document.config_str("region_id") {
                raw.push(region.to_owned());
            }
            for record in document.sessions.values() {
                if !record.region_id.trim().is_empty() {
                    raw.push(record.region_id.clone());
                }
            }
        }

        let mut seen = BTreeSet::new();
        let mut regions = Vec::new();
        for region in raw {
            let resolved = normalize_region_id(&region);
            if let Some(warning) = resolved.warning {
                report.warnings.push(warning);
            }
            if !resolved.region_id.is_empty() && seen.insert(resolved.region_id.clone()) {
                regions.push(resolved.region_id);
            }
        }
        if regions.is_empty() {
            return Err(ReconcileError::NoRegions);
        }
        Ok(regions)
    }

    /// Lists instances in every region, keyed by instance id. A region that
    /// fails to list contributes a warning and nothing else.
    async fn collect_instances(
        &self,
        regions: &[String],
        filter: Option<&TagFilter>,
        report: &mut SyncReport,
    ) -> BTreeMap<String, (String, InstanceSnapshot)> {
        let mut live = BTreeMap::new();
        for region in regions {
            match self.provider.list_instances(region, filter).await {
                Ok(instances) => {
                    for snapshot in instances {
                        if !snapshot.instance_id.is_empty() {
                            live.insert(
                                snapshot.instance_id.clone(),
                                (region.clone(), snapshot),
                            );
                        }
                    }
                }
                Err(err) => {
                    report
                        .warnings
                        .push(format!("failed to list instances in {region}: {err}"));
                }
            }
        }
        live
    }

}

fn refresh_sessions(
    document: &mut StateDocument,
    live: &BTreeMap<String, (String, InstanceSnapshot)>,
    options: &SyncOptions,
    report: &mut SyncReport,
) {
    let names: Vec<String> = document.sessions.keys().cloned().collect();
    for name in names {
        let Some(record) = document.sessions.get_mut(&name) else {
            continue;
        };
        if record.instance_id.trim().is_empty() {
            continue;
        }
        match live.get(&record.instance_id) {
            Some((region, snapshot)) => {
                apply_snapshot_to_record(record, snapshot);
                // The listing is authoritative for placement.
                record.region_id.clone_from(region);
                report.refreshed.push(name);
            }
            None if options.prune => {
                document.sessions.remove(&name);
                report.removed.push(name);
            }
            None => {
                record.status = String::from(status::NOT_FOUND);
                record.last_refresh_at = Some(now_iso_utc());
                if record.missing_since.is_none() {
                    record.missing_since = Some(now_iso_utc());
                }
                report.marked_missing.push(name);
            }
        }
    }
}

fn import_candidates(
    document: &mut StateDocument,
    candidates: &BTreeMap<String, (String, InstanceSnapshot)>,
    report: &mut SyncReport,
) {
    let known_ids: BTreeSet<String> = document
        .sessions
        .values()
        .map(|record| record.instance_id.clone())
        .filter(|id| !id.trim().is_empty())
        .collect();
    let ssh_user = document
        .config_str("ssh_user")
        .unwrap_or("root")
        .to_owned();

    for (instance_id, (region, snapshot)) in candidates {
        if known_ids.contains(instance_id) {
            continue;
        }
        let base = snapshot
            .instance_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(instance_id)
            .to_owned();
        let name = if document.sessions.contains_key(&base) {
            format!("{base}-{instance_id}")
        } else {
            base
        };
        let record = SessionRecord {
            name: name.clone(),
            region_id: region.clone(),
            instance_id: instance_id.clone(),
            image_id: snapshot.image_id.clone(),
            instance_type: snapshot.instance_type.clone(),
            instance_name: snapshot.instance_name.clone(),
            created_at: Some(now_iso_utc()),
            imported_at: Some(now_iso_utc()),
            status: snapshot.status.clone(),
            public_ip: snapshot.public_ip.clone(),
            private_ip: snapshot.private_ip.clone(),
            ssh_user: Some(ssh_user.clone()),
            last_refresh_at: Some(now_iso_utc()),
            ..SessionRecord::default()
        };
        document.sessions.insert(name.clone(), record);
        report.imported.push(name);
    }
}
