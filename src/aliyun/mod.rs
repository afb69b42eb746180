//! Alibaba Cloud ECS client.
//!
//! Talks to the regional ECS endpoints (`ecs.<region>.aliyuncs.com`)
//! directly over the signed query protocol, without an SDK. Every operation
//! is one GET request whose parameters are canonicalized and signed by
//! [`sign`]; responses are JSON objects matched loosely so additions on the
//! provider side do not break parsing.

mod sign;

use std::sync::LazyLock;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::provider::{
    ComputeProvider, CreateInstanceSpec, InstanceSnapshot, ProviderError, ProviderFuture,
    StopMode, TagFilter,
};
use crate::util::now_iso_utc;

const API_VERSION: &str = "2014-05-26";
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const PAGE_SIZE: u32 = 100;

static HTTP_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
});

/// Environment variable pairs probed for credentials, in priority order.
pub const CREDENTIAL_ENV_PAIRS: [(&str, &str); 3] = [
    (
        "ALIBABA_CLOUD_ACCESS_KEY_ID",
        "ALIBABA_CLOUD_ACCESS_KEY_SECRET",
    ),
    ("ALIYUN_ACCESS_KEY_ID", "ALIYUN_ACCESS_KEY_SECRET"),
    ("ALICLOUD_ACCESS_KEY_ID", "ALICLOUD_ACCESS_KEY_SECRET"),
];

/// Access key pair used to sign API requests.
#[derive(Clone, Debug)]
pub struct Credentials {
    /// Public access key id.
    pub access_key_id: String,
    /// Secret used for signing; never logged or printed.
    pub access_key_secret: String,
}

impl Credentials {
    /// Resolves credentials from the process environment in one pass over
    /// the known variable pairs; the first pair with both halves set wins.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Credentials`] naming the variables when no
    /// complete pair is present.
    pub fn from_env() -> Result<Self, ProviderError> {
        Self::resolve(|name| std::env::var(name).ok())
    }

    fn resolve(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ProviderError> {
        for (id_var, secret_var) in CREDENTIAL_ENV_PAIRS {
            let id = lookup(id_var).filter(|value| !value.trim().is_empty());
            let secret = lookup(secret_var).filter(|value| !value.trim().is_empty());
            if let (Some(access_key_id), Some(access_key_secret)) = (id, secret) {
                return Ok(Self {
                    access_key_id,
                    access_key_secret,
                });
            }
        }
        Err(ProviderError::Credentials(String::from(
            "missing credentials: set ALIBABA_CLOUD_ACCESS_KEY_ID and \
             ALIBABA_CLOUD_ACCESS_KEY_SECRET (or the ALIYUN_* / ALICLOUD_* pair)",
        )))
    }
}

/// Returns a remediation tip for well-known API error codes, for the CLI to
/// print under the error itself.
#[must_use]
pub fn remediation_hint(code: &str) -> Option<&'static str> {
    if code == "InvalidSystemDiskCategory.ValueNotSupported" {
        return Some(
            "this instance family rejects the default disk category; try \
             `skiff config set system_disk_category cloud_essd` or cloud_auto",
        );
    }
    if code.starts_with("InvalidAccessKeyId") || code == "SignatureDoesNotMatch" {
        return Some(
            "check ALIBABA_CLOUD_ACCESS_KEY_ID and ALIBABA_CLOUD_ACCESS_KEY_SECRET",
        );
    }
    if code == "OperationDenied.NoStock" || code == "Zone.NotOnSale" {
        return Some("the instance type is out of stock here; try another type or region");
    }
    if code == "IncorrectInstanceStatus" {
        return Some("the instance is mid-transition; run `skiff sync` and retry");
    }
    None
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(rename = "Code")]
    code: Option<String>,
    #[serde(rename = "Message")]
    message: Option<String>,
    #[serde(rename = "RequestId")]
    request_id: Option<String>,
}

/// ECS client implementing [`ComputeProvider`].
#[derive(Clone, Debug)]
pub struct AliyunEcs {
    credentials: Credentials,
}

impl AliyunEcs {
    /// Creates a client with explicit credentials.
    #[must_use]
    pub const fn new(credentials: Credentials) -> Self {
        Self { credentials }
    }

    /// Creates a client from environment credentials.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Credentials`] when no complete key pair is
    /// found in the environment.
    pub fn from_env() -> Result<Self, ProviderError> {
        Ok(Self::new(Credentials::from_env()?))
    }

    fn common_params(&self, action: &str, region_id: &str) -> Vec<(String, String)> {
        vec![
            (String::from("Action"), action.to_owned()),
            (String::from("RegionId"), region_id.to_owned()),
            (String::from("Format"), String::from("JSON")),
            (String::from("Version"), String::from(API_VERSION)),
            (
                String::from("AccessKeyId"),
                self.credentials.access_key_id.clone(),
            ),
            (
                String::from("SignatureMethod"),
                String::from("HMAC-SHA1"),
            ),
            (String::from("SignatureVersion"), String::from("1.0")),
            (String::from("Timestamp"), now_iso_utc()),
            (
                String::from("SignatureNonce"),
                Uuid::new_v4().simple().to_string(),
            ),
        ]
    }

    async fn call(
        &self,
        region_id: &str,
        action: &str,
        extra: Vec<(String, String)>,
    ) -> Result<Value, ProviderError> {
        let mut params = self.common_params(action, region_id);
        params.extend(extra);
        let canonical = sign::canonical_query(&params);
        let signed = sign::signature(&self.credentials.access_key_secret, &canonical)?;
        let url = format!(
            "https://ecs.{region_id}.aliyuncs.com/?{canonical}&Signature={}",
            sign::percent_encode(&signed)
        );

        let response = HTTP_CLIENT
            .get(&url)
            .send()
            .await
            .map_err(|err| ProviderError::Http(err.to_string()))?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|err| ProviderError::Http(err.to_string()))?;

        if status.is_success() {
            return serde_json::from_slice(&body)
                .map_err(|err| ProviderError::Response(err.to_string()));
        }

        if let Ok(parsed) = serde_json::from_slice::<ApiErrorBody>(&body)
            && let Some(code) = parsed.code
        {
            return Err(ProviderError::Api {
                code,
                message: parsed.message.unwrap_or_default(),
                request_id: parsed.request_id.unwrap_or_default(),
            });
        }
        Err(ProviderError::Http(format!(
            "HTTP {status}: {}",
            String::from_utf8_lossy(&body)
        )))
    }

    async fn describe_page(
        &self,
        region_id: &str,
        page_number: u32,
        tag_filter: Option<&TagFilter>,
        instance_ids: Option<&str>,
    ) -> Result<(Vec<InstanceSnapshot>, u64), ProviderError> {
        let mut extra = vec![
            (String::from("PageSize"), PAGE_SIZE.to_string()),
            (String::from("PageNumber"), page_number.to_string()),
        ];
        if let Some(filter) = tag_filter {
            extra.push((String::from("Tag.1.Key"), filter.key.clone()));
            extra.push((String::from("Tag.1.Value"), filter.value.clone()));
        }
        if let Some(ids) = instance_ids {
            extra.push((String::from("InstanceIds"), ids.to_owned()));
        }
        let body = self.call(region_id, "DescribeInstances", extra).await?;
        let instances = body
            .get("Instances")
            .and_then(|value| value.get("Instance"))
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(parse_snapshot).collect())
            .unwrap_or_default();
        let total = body
            .get("TotalCount")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        Ok((instances, total))
    }
}

fn opt_str(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .filter(|text| !text.is_empty())
        .map(str::to_owned)
}

/// Accepts both IP shapes the API uses: a bare string or a wrapped list.
fn first_ip(value: Option<&Value>) -> Option<String> {
    match value {
        Some(Value::Array(items)) => opt_str(items.first()),
        Some(Value::String(_)) => opt_str(value),
        _ => None,
    }
}

fn public_ip_of(instance: &Value) -> Option<String> {
    // EIP wins over the classic public address pool.
    opt_str(
        instance
            .get("EipAddress")
            .and_then(|eip| eip.get("IpAddress")),
    )
    .or_else(|| {
        first_ip(
            instance
                .get("PublicIpAddress")
                .and_then(|pool| pool.get("IpAddress")),
        )
    })
}

fn private_ip_of(instance: &Value) -> Option<String> {
    first_ip(
        instance
            .get("VpcAttributes")
            .and_then(|vpc| vpc.get("PrivateIpAddress"))
            .and_then(|wrap| wrap.get("IpAddress")),
    )
    .or_else(|| {
        opt_str(
            instance
                .get("NetworkInterfaces")
                .and_then(|wrap| wrap.get("NetworkInterface"))
                .and_then(Value::as_array)
                .and_then(|nics| nics.first())
                .and_then(|nic| nic.get("PrimaryIpAddress")),
        )
    })
}

/// Normalizes one `DescribeInstances` entry; entries without an instance id
/// are dropped.
fn parse_snapshot(instance: &Value) -> Option<InstanceSnapshot> {
    let instance_id = opt_str(instance.get("InstanceId"))?;
    Some(InstanceSnapshot {
        instance_id,
        status: opt_str(instance.get("Status")).unwrap_or_default(),
        public_ip: public_ip_of(instance),
        private_ip: private_ip_of(instance),
        zone_id: opt_str(instance.get("ZoneId")),
        image_id: opt_str(instance.get("ImageId")),
        instance_type: opt_str(instance.get("InstanceType")),
        instance_name: opt_str(instance.get("InstanceName")),
    })
}

fn create_params(spec: &CreateInstanceSpec) -> Vec<(String, String)> {
    let mut params = vec![
        (String::from("ImageId"), spec.image_id.clone()),
        (String::from("InstanceType"), spec.instance_type.clone()),
        (
            String::from("SecurityGroupId"),
            spec.security_group_id.clone(),
        ),
        (String::from("VSwitchId"), spec.v_switch_id.clone()),
        (String::from("KeyPairName"), spec.key_pair_name.clone()),
        (String::from("InstanceName"), spec.instance_name.clone()),
        (String::from("InstanceChargeType"), String::from("PostPaid")),
        (
            String::from("ClientToken"),
            Uuid::new_v4().simple().to_string(),
        ),
    ];
    let optional_strings = [
        ("HostName", &spec.hostname),
        ("SystemDisk.Category", &spec.system_disk_category),
        (
            "SystemDisk.PerformanceLevel",
            &spec.system_disk_performance_level,
        ),
        ("SpotStrategy", &spec.spot_strategy),
        (
            "SpotInterruptionBehavior",
            &spec.spot_interruption_behavior,
        ),
        ("InternetChargeType", &spec.internet_charge_type),
    ];
    for (name, slot) in optional_strings {
        if let Some(text) = slot {
            params.push((name.to_owned(), text.clone()));
        }
    }
    if let Some(size) = spec.system_disk_size {
        params.push((String::from("SystemDisk.Size"), size.to_string()));
    }
    if let Some(bandwidth) = spec.internet_max_bandwidth_out {
        params.push((
            String::from("InternetMaxBandwidthOut"),
            bandwidth.to_string(),
        ));
    }
    if let Some(limit) = spec.spot_price_limit {
        params.push((String::from("SpotPriceLimit"), limit.to_string()));
    }
    if let Some(duration) = spec.spot_duration {
        params.push((String::from("SpotDuration"), duration.to_string()));
    }
    for (index, tag) in spec.tags.iter().enumerate() {
        let position = index.saturating_add(1);
        params.push((format!("Tag.{position}.Key"), tag.key.clone()));
        params.push((format!("Tag.{position}.Value"), tag.value.clone()));
    }
    params
}

impl ComputeProvider for AliyunEcs {
    fn create_instance(&self, spec: &CreateInstanceSpec) -> ProviderFuture<'_, String> {
        let spec = spec.clone();
        Box::pin(async move {
            spec.validate()?;
            let body = self
                .call(&spec.region_id, "CreateInstance", create_params(&spec))
                .await?;
            opt_str(body.get("InstanceId")).ok_or_else(|| {
                ProviderError::Response(String::from(
                    "CreateInstance response missing InstanceId",
                ))
            })
        })
    }

    fn start_instance(&self, region_id: &str, instance_id: &str) -> ProviderFuture<'_, ()> {
        let region = region_id.to_owned();
        let instance = instance_id.to_owned();
        Box::pin(async move {
            self.call(
                &region,
                "StartInstance",
                vec![(String::from("InstanceId"), instance)],
            )
            .await?;
            Ok(())
        })
    }

    fn stop_instance(
        &self,
        region_id: &str,
        instance_id: &str,
        force: bool,
        mode: StopMode,
    ) -> ProviderFuture<'_, ()> {
        let region = region_id.to_owned();
        let instance = instance_id.to_owned();
        Box::pin(async move {
            let mut extra = vec![
                (String::from("InstanceId"), instance),
                (
                    String::from("StoppedMode"),
                    mode.as_api_str().to_owned(),
                ),
            ];
            if force {
                extra.push((String::from("ForceStop"), String::from("true")));
            }
            self.call(&region, "StopInstance", extra).await?;
            Ok(())
        })
    }

    fn delete_instance(
        &self,
        region_id: &str,
        instance_id: &str,
        force: bool,
    ) -> ProviderFuture<'_, ()> {
        let region = region_id.to_owned();
        let instance = instance_id.to_owned();
        Box::pin(async move {
            let mut extra = vec![(String::from("InstanceId"), instance)];
            if force {
                extra.push((String::from("Force"), String::from("true")));
            }
            self.call(&region, "DeleteInstance", extra).await?;
            Ok(())
        })
    }

    fn describe_instance(
        &self,
        region_id: &str,
        instance_id: &str,
    ) -> ProviderFuture<'_, Option<InstanceSnapshot>> {
        let region = region_id.to_owned();
        let instance = instance_id.to_owned();
        Box::pin(async move {
            let ids = serde_json::to_string(&[instance.as_str()])
                .map_err(|err| ProviderError::Response(err.to_string()))?;
            let (instances, _) = self.describe_page(&region, 1, None, Some(&ids)).await?;
            Ok(instances.into_iter().next())
        })
    }

    fn list_instances(
        &self,
        region_id: &str,
        tag_filter: Option<&TagFilter>,
    ) -> ProviderFuture<'_, Vec<InstanceSnapshot>> {
        let region = region_id.to_owned();
        let filter = tag_filter.cloned();
        Box::pin(async move {
            let mut collected = Vec::new();
            let mut page_number: u32 = 1;
            loop {
                let (mut instances, total) = self
                    .describe_page(&region, page_number, filter.as_ref(), None)
                    .await?;
                let empty = instances.is_empty();
                collected.append(&mut instances);
                let seen = u64::try_from(collected.len()).unwrap_or(u64::MAX);
                if empty || seen >= total {
                    break;
                }
                page_number = page_number.saturating_add(1);
            }
            Ok(collected)
        })
    }

    fn list_regions(&self, seed_region: &str) -> ProviderFuture<'_, Vec<String>> {
        let seed = seed_region.to_owned();
        Box::pin(async move {
            let body = self.call(&seed, "DescribeRegions", Vec::new()).await?;
            let regions = body
                .get("Regions")
                .and_then(|wrap| wrap.get("Region"))
                .and_then(Value::as_array)
                .map(|items| {
                    items
                        .iter()
                        .filter_map(|region| opt_str(region.get("RegionId")))
                        .collect()
                })
                .unwrap_or_default();
            Ok(regions)
        })
    }

    fn allocate_public_ip(
        &self,
        region_id: &str,
        instance_id: &str,
    ) -> ProviderFuture<'_, String> {
        let region = region_id.to_owned();
        let instance = instance_id.to_owned();
        Box::pin(async move {
            let body = self
                .call(
                    &region,
                    "AllocatePublicIpAddress",
                    vec![(String::from("InstanceId"), instance)],
                )
                .await?;
            opt_str(body.get("IpAddress")).ok_or_else(|| {
                ProviderError::Response(String::from(
                    "AllocatePublicIpAddress response missing IpAddress",
                ))
            })
        })
    }
}

#[cfg(test)]
mod tests;
