//! Tests for config layering, value coercion, and region normalization.

use rstest::rstest;
use serde_json::{Value, json};

use super::*;
use crate::state::Template;

fn document_with(config: Value) -> StateDocument {
    let mut document = StateDocument {
        config: config.as_object().cloned().unwrap_or_default(),
        ..StateDocument::new()
    };
    document.normalize();
    document
}

fn resolve(
    document: &StateDocument,
    template: Option<&str>,
    overrides: &CreateOverrides,
) -> EffectiveCreate {
    resolve_create(document, template, "dev", overrides)
        .unwrap_or_else(|err| panic!("resolve failed: {err}"))
}

fn base_config() -> Value {
    json!({
        "region_id": "eu-central-1",
        "image_id": "m-global",
        "instance_type": "ecs.g7.large",
        "security_group_id": "sg-1",
        "v_switch_id": "vsw-1",
        "key_pair_name": "kp-1",
    })
}

#[test]
fn later_layers_win_key_by_key() {
    let mut document = document_with(base_config());
    document.config.insert(String::from("ssh_user"), json!("admin"));
    document.templates.insert(
        String::from("gpu"),
        Template {
            name: String::from("gpu"),
            config: json!({"instance_type": "ecs.gn7.xlarge", "image_id": "m-tpl"})
                .as_object()
                .cloned()
                .unwrap_or_default(),
            ..Template::default()
        },
    );
    let overrides = CreateOverrides {
        image_id: Some(String::from("m-flag")),
        ..CreateOverrides::default()
    };

    let effective = resolve(&document, Some("gpu"), &overrides);

    // Global only, template override, flag override.
    assert_eq!(effective.ssh_user, "admin");
    assert_eq!(effective.instance_type, "ecs.gn7.xlarge");
    assert_eq!(effective.image_id, "m-flag");
}

#[test]
fn missing_required_key_names_the_key() {
    let mut config = base_config();
    if let Some(object) = config.as_object_mut() {
        object.remove("security_group_id");
    }
    let document = document_with(config);

    let err = resolve_create(&document, None, "dev", &CreateOverrides::default());
    match err {
        Err(ConfigError::MissingKey(key)) => assert_eq!(key, "security_group_id"),
        other => panic!("expected MissingKey, got {other:?}"),
    }
}

#[test]
fn unknown_template_is_rejected() {
    let document = document_with(base_config());
    let err = resolve_create(&document, Some("nope"), "dev", &CreateOverrides::default());
    assert!(matches!(err, Err(ConfigError::UnknownTemplate(name)) if name == "nope"));
}

#[rstest]
#[case::zone_digit_letter("ap-northeast-1c", "ap-northeast-1", true)]
#[case::zone_single_letter("cn-hangzhou-i", "cn-hangzhou", true)]
#[case::plain_region("cn-hangzhou", "cn-hangzhou", false)]
#[case::numbered_region("eu-central-1", "eu-central-1", false)]
fn zone_ids_normalize_to_regions(
    #[case] input: &str,
    #[case] expected: &str,
    #[case] warns: bool,
) {
    let resolved = normalize_region_id(input);
    assert_eq!(resolved.region_id, expected);
    assert_eq!(resolved.warning.is_some(), warns);
}

#[test]
fn zone_rewrite_surfaces_a_warning_on_resolution() {
    let mut config = base_config();
    if let Some(object) = config.as_object_mut() {
        object.insert(String::from("region_id"), json!("ap-northeast-1c"));
    }
    let document = document_with(config);

    let effective = resolve(&document, None, &CreateOverrides::default());
    assert_eq!(effective.region_id, "ap-northeast-1");
    assert_eq!(effective.warnings.len(), 1);
}

#[rstest]
#[case::boolean_true("true", json!(true))]
#[case::boolean_false("false", json!(false))]
#[case::null("null", json!(null))]
#[case::integer("42", json!(42))]
#[case::negative("-7", json!(-7))]
#[case::float("1.5", json!(1.5))]
#[case::leading_zero_stays_string("007", json!("007"))]
#[case::inline_object(r#"{"a": 1}"#, json!({"a": 1}))]
#[case::inline_array("[1, 2]", json!([1, 2]))]
#[case::plain_string("cn-hangzhou", json!("cn-hangzhou"))]
#[case::instance_id("i-0123abc", json!("i-0123abc"))]
fn coerce_value_picks_the_most_specific_type(#[case] raw: &str, #[case] expected: Value) {
    assert_eq!(coerce_value(raw), expected);
}

#[test]
fn hostname_defaults_to_sanitized_session_name() {
    let document = document_with(base_config());
    let effective = resolve_create(
        &document,
        None,
        "My Dev_Box!",
        &CreateOverrides::default(),
    )
    .unwrap_or_else(|err| panic!("resolve failed: {err}"));
    assert_eq!(effective.hostname.as_deref(), Some("my-dev-box"));
}

#[test]
fn explicit_hostname_wins_over_session_name() {
    let document = document_with(base_config());
    let overrides = CreateOverrides {
        hostname: Some(String::from("box-1")),
        ..CreateOverrides::default()
    };
    let effective = resolve(&document, None, &overrides);
    assert_eq!(effective.hostname.as_deref(), Some("box-1"));
}

#[test]
fn hostname_disabled_when_session_naming_is_off() {
    let mut config = base_config();
    if let Some(object) = config.as_object_mut() {
        object.insert(String::from("set_hostname_to_session"), json!(false));
    }
    let document = document_with(config);
    let effective = resolve(&document, None, &CreateOverrides::default());
    assert_eq!(effective.hostname, None);
}

#[test]
fn pinned_disk_category_disables_fallbacks() {
    let document = document_with(base_config());
    let overrides = CreateOverrides {
        system_disk_category: Some(String::from("cloud_essd")),
        ..CreateOverrides::default()
    };
    let effective = resolve(&document, None, &overrides);
    assert!(effective.disk_category_pinned);
    assert_eq!(effective.system_disk_category.as_deref(), Some("cloud_essd"));
}

#[test]
fn defaults_apply_for_timeouts_and_fallback_chain() {
    let document = document_with(base_config());
    let effective = resolve(&document, None, &CreateOverrides::default());
    assert_eq!(effective.timeout, Duration::from_secs(600));
    assert_eq!(effective.poll_interval, Duration::from_secs(5));
    assert!(effective.allocate_public_ip);
    assert_eq!(
        effective.disk_category_fallbacks,
        vec![String::from("cloud_auto"), String::from("cloud_essd")]
    );
}

#[test]
fn wrong_typed_values_are_rejected() {
    let mut config = base_config();
    if let Some(object) = config.as_object_mut() {
        object.insert(String::from("auto_allocate_public_ip"), json!("yes"));
    }
    let document = document_with(config);
    let err = resolve_create(&document, None, "dev", &CreateOverrides::default());
    assert!(matches!(err, Err(ConfigError::WrongType { key, .. }) if key == "auto_allocate_public_ip"));
}

#[rstest]
#[case::spaces_and_case("My Dev_Box!", "my-dev-box")]
#[case::collapses_runs("a---b", "a-b")]
#[case::empty_falls_back("!!!", "skiff")]
fn sanitize_hostname_produces_valid_labels(#[case] input: &str, #[case] expected: &str) {
    assert_eq!(sanitize_hostname(input), expected);
}
