//! Core library for the Skiff session manager.
//!
//! Skiff tracks named "sessions", each backed by exactly one Alibaba Cloud
//! ECS instance, in a local JSON state file. The crate exposes the state
//! store, the effective-configuration resolver, the session lifecycle
//! manager (create → start → poll → running, stop, delete), and the sync
//! engine that reconciles local records against live provider listings.

pub mod aliyun;
pub mod config;
pub mod lifecycle;
pub mod provider;
pub mod reconcile;
pub mod ssh;
pub mod ssh_config;
pub mod state;
pub mod util;

pub use aliyun::{AliyunEcs, Credentials, remediation_hint};
pub use config::{ConfigError, CreateOverrides, EffectiveCreate, ResolvedRegion};
pub use lifecycle::{LifecycleError, SessionLifecycle};
pub use provider::{
    ComputeProvider, CreateInstanceSpec, InstanceSnapshot, ProviderError, StopMode, TagFilter,
};
pub use reconcile::{Reconciler, SyncOptions, SyncReport};
pub use ssh_config::SshConfigEntry;
pub use state::{SessionRecord, StateDocument, StateError, StateStore, Template};
