//! Compute provider abstraction.
//!
//! [`ComputeProvider`] is the seam between the session lifecycle and the
//! cloud API: production code talks to Alibaba Cloud ECS through
//! [`crate::aliyun::AliyunEcs`], and tests substitute scripted fakes. The
//! trait returns boxed futures so it stays object-safe and mockable without
//! an async-trait dependency.

use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;

use thiserror::Error;

/// Errors surfaced by provider implementations.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The API answered with a structured error body.
    #[error("{code}: {message} (request {request_id})")]
    Api {
        /// Provider error code, e.g. `InvalidSystemDiskCategory.ValueNotSupported`.
        code: String,
        /// Human-readable message from the API.
        message: String,
        /// Request id for support tickets.
        request_id: String,
    },
    /// Transport-level failure before a structured answer arrived.
    #[error("HTTP request failed: {0}")]
    Http(String),
    /// The API answered 2xx but the body did not have the expected shape.
    #[error("unexpected API response: {0}")]
    Response(String),
    /// No usable credentials were found in the environment.
    #[error("{0}")]
    Credentials(String),
    /// A request was rejected locally before any network traffic.
    #[error("{0}")]
    Validation(String),
}

impl ProviderError {
    /// Returns the structured API error code, when this is an API error.
    #[must_use]
    pub fn api_code(&self) -> Option<&str> {
        match self {
            Self::Api { code, .. } => Some(code),
            _ => None,
        }
    }
}

/// Point-in-time view of a remote instance, normalized across the
/// provider's several IP representations.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct InstanceSnapshot {
    /// Provider instance id.
    pub instance_id: String,
    /// Provider status string (`Running`, `Stopped`, ...).
    pub status: String,
    /// Preferred public IP: EIP first, then classic public address.
    pub public_ip: Option<String>,
    /// Preferred private IP: VPC address first, then the primary NIC.
    pub private_ip: Option<String>,
    /// Zone the instance lives in.
    pub zone_id: Option<String>,
    /// Image the instance was created from.
    pub image_id: Option<String>,
    /// Commercial instance type.
    pub instance_type: Option<String>,
    /// Instance name as known to the provider.
    pub instance_name: Option<String>,
}

/// Billing treatment of a stopped instance.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum StopMode {
    /// Release compute billing while stopped.
    #[default]
    StopCharging,
    /// Keep the instance billed so its resources stay reserved.
    KeepCharging,
}

impl StopMode {
    /// Wire value expected by the API.
    #[must_use]
    pub const fn as_api_str(self) -> &'static str {
        match self {
            Self::StopCharging => "StopCharging",
            Self::KeepCharging => "KeepCharging",
        }
    }
}

impl FromStr for StopMode {
    type Err = ProviderError;

    /// Accepts the wire values plus kebab and snake case spellings, so a
    /// typo fails locally before any remote call is made.
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let folded: String = raw
            .chars()
            .filter(|ch| *ch != '-' && *ch != '_')
            .collect::<String>()
            .to_ascii_lowercase();
        match folded.as_str() {
            "stopcharging" => Ok(Self::StopCharging),
            "keepcharging" => Ok(Self::KeepCharging),
            _ => Err(ProviderError::Validation(format!(
                "invalid stop mode `{raw}`; expected StopCharging or KeepCharging"
            ))),
        }
    }
}

/// A single `key=value` tag filter for listings.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TagFilter {
    /// Tag key.
    pub key: String,
    /// Tag value.
    pub value: String,
}

/// Validated request to create one instance.
///
/// Built from an [`crate::config::EffectiveCreate`] by the lifecycle layer;
/// [`CreateInstanceSpec::validate`] runs the local checks that do not need
/// the network.
#[derive(Clone, Debug, Default)]
pub struct CreateInstanceSpec {
    /// Target region.
    pub region_id: String,
    /// Image id.
    pub image_id: String,
    /// Commercial instance type.
    pub instance_type: String,
    /// Security group id.
    pub security_group_id: String,
    /// VSwitch id.
    pub v_switch_id: String,
    /// Key pair attached to the instance.
    pub key_pair_name: String,
    /// Instance display name.
    pub instance_name: String,
    /// OS hostname, when requested.
    pub hostname: Option<String>,
    /// System disk category; `None` lets the provider choose.
    pub system_disk_category: Option<String>,
    /// System disk size in GB.
    pub system_disk_size: Option<i64>,
    /// ESSD performance level.
    pub system_disk_performance_level: Option<String>,
    /// Outbound bandwidth cap in Mbps; implies a public address at creation
    /// when positive.
    pub internet_max_bandwidth_out: Option<i64>,
    /// Billing mode for public traffic.
    pub internet_charge_type: Option<String>,
    /// Spot strategy.
    pub spot_strategy: Option<String>,
    /// Spot price ceiling; required by `SpotWithPriceLimit`.
    pub spot_price_limit: Option<f64>,
    /// Spot protection duration in hours.
    pub spot_duration: Option<i64>,
    /// Behavior on spot interruption.
    pub spot_interruption_behavior: Option<String>,
    /// Tags attached at creation, for later discovery by sync.
    pub tags: Vec<TagFilter>,
}

impl CreateInstanceSpec {
    /// Runs local validation: required identifiers present and spot
    /// settings internally consistent.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Validation`] naming the first problem.
    pub fn validate(&self) -> Result<(), ProviderError> {
        let required = [
            ("region_id", &self.region_id),
            ("image_id", &self.image_id),
            ("instance_type", &self.instance_type),
            ("security_group_id", &self.security_group_id),
            ("v_switch_id", &self.v_switch_id),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(ProviderError::Validation(format!(
                    "create request is missing {name}"
                )));
            }
        }
        if self.spot_strategy.as_deref() == Some("SpotWithPriceLimit")
            && self.spot_price_limit.is_none()
        {
            return Err(ProviderError::Validation(String::from(
                "spot strategy SpotWithPriceLimit requires a spot price limit",
            )));
        }
        Ok(())
    }
}

/// Boxed future returned by [`ComputeProvider`] methods.
pub type ProviderFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, ProviderError>> + Send + 'a>>;

/// Operations the session lifecycle needs from a cloud compute API.
pub trait ComputeProvider: Send + Sync {
    /// Creates one instance and returns its id. The instance is left in the
    /// provider's post-create state (typically `Stopped`); starting is a
    /// separate call.
    fn create_instance(
        &self,
        spec: &CreateInstanceSpec,
    ) -> ProviderFuture<'_, String>;

    /// Starts a stopped instance.
    fn start_instance(&self, region_id: &str, instance_id: &str) -> ProviderFuture<'_, ()>;

    /// Stops an instance. `force` skips the guest OS shutdown.
    fn stop_instance(
        &self,
        region_id: &str,
        instance_id: &str,
        force: bool,
        mode: StopMode,
    ) -> ProviderFuture<'_, ()>;

    /// Deletes an instance. `force` allows deleting a running instance.
    fn delete_instance(
        &self,
        region_id: &str,
        instance_id: &str,
        force: bool,
    ) -> ProviderFuture<'_, ()>;

    /// Fetches a snapshot of one instance, or `None` when the provider no
    /// longer knows the id.
    fn describe_instance(
        &self,
        region_id: &str,
        instance_id: &str,
    ) -> ProviderFuture<'_, Option<InstanceSnapshot>>;

    /// Lists instances in a region, optionally filtered by one tag.
    fn list_instances(
        &self,
        region_id: &str,
        tag_filter: Option<&TagFilter>,
    ) -> ProviderFuture<'_, Vec<InstanceSnapshot>>;

    /// Lists all region ids visible to the account. `seed_region` is the
    /// region used to address the listing endpoint itself.
    fn list_regions(&self, seed_region: &str) -> ProviderFuture<'_, Vec<String>>;

    /// Allocates and attaches a public IP, returning the address.
    fn allocate_public_ip(
        &self,
        region_id: &str,
        instance_id: &str,
    ) -> ProviderFuture<'_, String>;
}
