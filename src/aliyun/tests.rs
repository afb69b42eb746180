//! Tests for request signing, credential resolution, and response parsing.

use std::collections::HashMap;

use rstest::rstest;
use serde_json::json;

use super::*;

fn common_test_params() -> Vec<(String, String)> {
    [
        ("AccessKeyId", "testid"),
        ("Action", "DescribeInstances"),
        ("Format", "JSON"),
        ("RegionId", "cn-hangzhou"),
        ("SignatureMethod", "HMAC-SHA1"),
        ("SignatureNonce", "00000000000000000000000000000000"),
        ("SignatureVersion", "1.0"),
        ("Timestamp", "2026-01-02T03:04:05Z"),
        ("Version", "2014-05-26"),
    ]
    .into_iter()
    .map(|(name, value)| (name.to_owned(), value.to_owned()))
    .collect()
}

#[test]
fn canonical_query_sorts_and_encodes() {
    let mut params = common_test_params();
    params.reverse();
    let canonical = sign::canonical_query(&params);
    assert_eq!(
        canonical,
        "AccessKeyId=testid&Action=DescribeInstances&Format=JSON&RegionId=cn-hangzhou\
         &SignatureMethod=HMAC-SHA1&SignatureNonce=00000000000000000000000000000000\
         &SignatureVersion=1.0&Timestamp=2026-01-02T03%3A04%3A05Z&Version=2014-05-26"
    );
}

#[test]
fn signature_matches_known_vector() {
    let canonical = sign::canonical_query(&common_test_params());
    let signed = sign::signature("testsecret", &canonical)
        .unwrap_or_else(|err| panic!("signing failed: {err}"));
    assert_eq!(signed, "cHz16lFe0F2rlN+eiCk7xdjyF0s=");
}

#[rstest]
#[case::space_and_star("a b*c~d/e", "a%20b%2Ac~d%2Fe")]
#[case::unreserved_pass_through("AZaz09-_.~", "AZaz09-_.~")]
#[case::colon("03:04:05", "03%3A04%3A05")]
fn percent_encoding_uses_the_signing_alphabet(#[case] raw: &str, #[case] expected: &str) {
    assert_eq!(sign::percent_encode(raw), expected);
}

fn lookup_in<'a>(vars: &'a HashMap<&'a str, &'a str>) -> impl Fn(&str) -> Option<String> + 'a {
    move |name| vars.get(name).map(|value| (*value).to_owned())
}

#[test]
fn credentials_prefer_the_alibaba_cloud_pair() {
    let vars = HashMap::from([
        ("ALIBABA_CLOUD_ACCESS_KEY_ID", "primary"),
        ("ALIBABA_CLOUD_ACCESS_KEY_SECRET", "primary-secret"),
        ("ALIYUN_ACCESS_KEY_ID", "legacy"),
        ("ALIYUN_ACCESS_KEY_SECRET", "legacy-secret"),
    ]);
    let credentials = Credentials::resolve(lookup_in(&vars))
        .unwrap_or_else(|err| panic!("resolve failed: {err}"));
    assert_eq!(credentials.access_key_id, "primary");
}

#[test]
fn credentials_skip_incomplete_pairs() {
    let vars = HashMap::from([
        ("ALIBABA_CLOUD_ACCESS_KEY_ID", "half"),
        ("ALICLOUD_ACCESS_KEY_ID", "fallback"),
        ("ALICLOUD_ACCESS_KEY_SECRET", "fallback-secret"),
    ]);
    let credentials = Credentials::resolve(lookup_in(&vars))
        .unwrap_or_else(|err| panic!("resolve failed: {err}"));
    assert_eq!(credentials.access_key_id, "fallback");
}

#[test]
fn missing_credentials_name_the_variables() {
    let vars = HashMap::new();
    let err = Credentials::resolve(lookup_in(&vars)).err();
    let message = err
        .map(|err| err.to_string())
        .unwrap_or_else(|| panic!("expected a credentials error"));
    assert!(message.contains("ALIBABA_CLOUD_ACCESS_KEY_ID"));
}

#[test]
fn eip_wins_over_classic_public_address() {
    let snapshot = parse_snapshot(&json!({
        "InstanceId": "i-abc",
        "Status": "Running",
        "EipAddress": {"IpAddress": "198.51.100.1"},
        "PublicIpAddress": {"IpAddress": ["203.0.113.2"]},
    }))
    .unwrap_or_else(|| panic!("snapshot should parse"));
    assert_eq!(snapshot.public_ip.as_deref(), Some("198.51.100.1"));
}

#[test]
fn classic_public_address_used_when_eip_is_empty() {
    let snapshot = parse_snapshot(&json!({
        "InstanceId": "i-abc",
        "EipAddress": {"IpAddress": ""},
        "PublicIpAddress": {"IpAddress": ["203.0.113.2", "203.0.113.3"]},
    }))
    .unwrap_or_else(|| panic!("snapshot should parse"));
    assert_eq!(snapshot.public_ip.as_deref(), Some("203.0.113.2"));
}

#[test]
fn private_ip_prefers_vpc_then_primary_nic() {
    let vpc = parse_snapshot(&json!({
        "InstanceId": "i-abc",
        "VpcAttributes": {"PrivateIpAddress": {"IpAddress": ["10.0.0.5"]}},
        "NetworkInterfaces": {"NetworkInterface": [{"PrimaryIpAddress": "10.0.0.9"}]},
    }))
    .unwrap_or_else(|| panic!("snapshot should parse"));
    assert_eq!(vpc.private_ip.as_deref(), Some("10.0.0.5"));

    let nic = parse_snapshot(&json!({
        "InstanceId": "i-abc",
        "NetworkInterfaces": {"NetworkInterface": [{"PrimaryIpAddress": "10.0.0.9"}]},
    }))
    .unwrap_or_else(|| panic!("snapshot should parse"));
    assert_eq!(nic.private_ip.as_deref(), Some("10.0.0.9"));
}

#[test]
fn entries_without_an_instance_id_are_dropped() {
    assert_eq!(parse_snapshot(&json!({"Status": "Running"})), None);
}

#[test]
fn create_params_cover_disk_spot_and_tags() {
    let spec = CreateInstanceSpec {
        region_id: String::from("eu-central-1"),
        image_id: String::from("m-1"),
        instance_type: String::from("ecs.g7.large"),
        security_group_id: String::from("sg-1"),
        v_switch_id: String::from("vsw-1"),
        key_pair_name: String::from("kp-1"),
        instance_name: String::from("dev"),
        hostname: Some(String::from("dev")),
        system_disk_category: Some(String::from("cloud_essd")),
        system_disk_size: Some(40),
        spot_strategy: Some(String::from("SpotAsPriceGo")),
        internet_max_bandwidth_out: Some(10),
        internet_charge_type: Some(String::from("PayByTraffic")),
        tags: vec![
            TagFilter {
                key: String::from("skiff"),
                value: String::from("true"),
            },
            TagFilter {
                key: String::from("skiff_session"),
                value: String::from("dev"),
            },
        ],
        ..CreateInstanceSpec::default()
    };

    let params = create_params(&spec);
    let find = |name: &str| {
        params
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    };
    assert_eq!(find("SystemDisk.Category"), Some("cloud_essd"));
    assert_eq!(find("SystemDisk.Size"), Some("40"));
    assert_eq!(find("InstanceChargeType"), Some("PostPaid"));
    assert_eq!(find("Tag.1.Key"), Some("skiff"));
    assert_eq!(find("Tag.2.Value"), Some("dev"));
    assert!(find("ClientToken").is_some());
    assert_eq!(find("SystemDisk.PerformanceLevel"), None);
}

#[rstest]
#[case::disk_category("InvalidSystemDiskCategory.ValueNotSupported", true)]
#[case::bad_key("InvalidAccessKeyId.NotFound", true)]
#[case::unknown("SomethingElse.Entirely", false)]
fn remediation_hints_cover_known_codes(#[case] code: &str, #[case] has_hint: bool) {
    assert_eq!(remediation_hint(code).is_some(), has_hint);
}
