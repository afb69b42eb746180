//! Tests for state document normalization and atomic persistence.

use camino::Utf8PathBuf;
use rstest::rstest;
use serde_json::{Value, json};
use tempfile::TempDir;

use super::*;

fn store_in(dir: &TempDir) -> StateStore {
    let path = dir.path().join("state.json");
    let utf8 = Utf8PathBuf::from_path_buf(path)
        .unwrap_or_else(|path| panic!("temp dir is not UTF-8: {}", path.display()));
    StateStore::new(utf8)
}

fn write_state(store: &StateStore, contents: &str) {
    std::fs::write(store.path(), contents)
        .unwrap_or_else(|err| panic!("failed to seed state file: {err}"));
}

fn load(store: &StateStore) -> StateDocument {
    store
        .load()
        .unwrap_or_else(|err| panic!("load failed: {err}"))
}

fn save(store: &StateStore, document: &mut StateDocument) {
    store
        .save(document)
        .unwrap_or_else(|err| panic!("save failed: {err}"));
}

#[test]
fn missing_file_yields_fresh_defaults() {
    let dir = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let store = store_in(&dir);

    let document = load(&store);

    assert_eq!(document.version, STATE_SCHEMA_VERSION);
    assert!(document.sessions.is_empty());
    assert!(document.templates.is_empty());
    assert_eq!(document.config_str("ssh_user"), Some("root"));
    assert_eq!(document.config_i64("timeout_seconds"), Some(600));
}

#[test]
fn normalize_fills_missing_keys_and_is_idempotent() {
    let mut document = StateDocument {
        config: json!({"region_id": "eu-central-1", "custom_key": 7})
            .as_object()
            .cloned()
            .unwrap_or_default(),
        ..StateDocument::new()
    };

    document.normalize();
    let once = document.clone();
    document.normalize();

    assert_eq!(document, once);
    assert_eq!(document.config_str("region_id"), Some("eu-central-1"));
    assert_eq!(document.config_i64("custom_key"), Some(7));
    for key in known_config_keys() {
        assert!(document.config.contains_key(&key), "missing key {key}");
    }
}

#[test]
fn save_then_load_round_trips_sessions_and_templates() {
    let dir = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let store = store_in(&dir);

    let mut document = StateDocument::new();
    document.sessions.insert(
        String::from("dev"),
        SessionRecord {
            name: String::from("dev"),
            region_id: String::from("eu-central-1"),
            instance_id: String::from("i-abc123"),
            status: String::from(status::RUNNING),
            public_ip: Some(String::from("203.0.113.9")),
            ..SessionRecord::default()
        },
    );
    document.templates.insert(
        String::from("gpu"),
        Template {
            name: String::from("gpu"),
            description: String::from("big box"),
            ..Template::default()
        },
    );
    save(&store, &mut document);

    let reloaded = load(&store);
    assert_eq!(reloaded.sessions, document.sessions);
    assert_eq!(reloaded.templates, document.templates);
    assert!(reloaded.updated_at.is_some());
}

#[rstest]
#[case::invalid_json("{not json")]
#[case::config_is_array(r#"{"version": 1, "config": []}"#)]
#[case::sessions_is_string(r#"{"version": 1, "sessions": "nope"}"#)]
fn malformed_state_is_rejected_with_path(#[case] contents: &str) {
    let dir = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let store = store_in(&dir);
    write_state(&store, contents);

    let err = store.load().err().map(|err| err.to_string());
    let message = err.unwrap_or_else(|| panic!("expected a corrupt-state error"));
    assert!(message.contains("corrupted"), "unexpected error: {message}");
    assert!(
        message.contains(store.path().as_str()),
        "error should name the file: {message}"
    );
}

#[test]
fn unknown_top_level_keys_survive_a_save_cycle() {
    let dir = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let store = store_in(&dir);
    write_state(
        &store,
        r#"{"version": 1, "config": {}, "sessions": {}, "templates": {}, "notes": ["keep me"]}"#,
    );

    let mut document = load(&store);
    save(&store, &mut document);

    let reloaded = load(&store);
    assert_eq!(reloaded.extra.get("notes"), Some(&json!(["keep me"])));
}

#[test]
fn rendered_file_has_sorted_keys_and_trailing_newline() {
    let dir = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let store = store_in(&dir);

    let mut document = StateDocument::new();
    save(&store, &mut document);

    let text = std::fs::read_to_string(store.path())
        .unwrap_or_else(|err| panic!("read back failed: {err}"));
    assert!(text.ends_with('\n'), "missing trailing newline");
    let config_at = text.find("\"config\"");
    let sessions_at = text.find("\"sessions\"");
    let version_at = text.find("\"version\"");
    assert!(config_at < sessions_at, "keys not sorted");
    assert!(sessions_at < version_at, "keys not sorted");
}

#[test]
fn save_leaves_no_temp_files_behind() {
    let dir = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let store = store_in(&dir);

    let mut document = StateDocument::new();
    save(&store, &mut document);
    save(&store, &mut document);

    let entries: Vec<String> = std::fs::read_dir(dir.path())
        .unwrap_or_else(|err| panic!("read_dir: {err}"))
        .filter_map(Result::ok)
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(entries, vec![String::from("state.json")]);
}

#[test]
fn failed_save_leaves_the_previous_document_intact() {
    let dir = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    // The temp name appends a dot, a 32-char uuid, and `.tmp`; a target
    // name this close to NAME_MAX makes the temp write fail while the
    // target name itself stays legal.
    let long_name = format!("{}.json", "s".repeat(245));
    let path = dir.path().join(long_name);
    let utf8 = Utf8PathBuf::from_path_buf(path)
        .unwrap_or_else(|path| panic!("temp dir is not UTF-8: {}", path.display()));
    let store = StateStore::new(utf8);
    write_state(
        &store,
        r#"{"version": 1, "config": {"region_id": "eu-central-1"}, "sessions": {}, "templates": {}}"#,
    );
    let before = std::fs::read_to_string(store.path())
        .unwrap_or_else(|err| panic!("read failed: {err}"));

    let mut document = load(&store);
    document
        .config
        .insert(String::from("ssh_user"), json!("admin"));
    assert!(store.save(&mut document).is_err());

    let after = std::fs::read_to_string(store.path())
        .unwrap_or_else(|err| panic!("read failed: {err}"));
    assert_eq!(after, before, "failed save must not touch the target");
}

#[test]
fn missing_since_is_absent_from_json_when_unset() {
    let record = SessionRecord {
        name: String::from("dev"),
        ..SessionRecord::default()
    };
    let value = serde_json::to_value(&record)
        .unwrap_or_else(|err| panic!("serialize failed: {err}"));
    let object = value
        .as_object()
        .unwrap_or_else(|| panic!("record did not serialize to an object"));
    assert!(!object.contains_key("missing_since"));
    assert!(!object.contains_key("imported_at"));
    assert!(object.contains_key("status"));
}

#[test]
fn partial_session_records_deserialize_with_defaults() {
    let record: SessionRecord =
        serde_json::from_value(json!({"instance_id": "i-xyz", "region_id": "eu-central-1"}))
            .unwrap_or_else(|err| panic!("deserialize failed: {err}"));
    assert_eq!(record.instance_ref(), Some(("eu-central-1", "i-xyz")));
    assert_eq!(record.status, "");
    assert!(record.missing_since.is_none());
}

#[test]
fn instance_ref_requires_region_and_instance() {
    let record = SessionRecord {
        instance_id: String::from("i-xyz"),
        ..SessionRecord::default()
    };
    assert_eq!(record.instance_ref(), None);
}

#[test]
fn resolve_prefers_explicit_path_and_expands_tilde() {
    let store = StateStore::resolve(Some(Utf8PathBuf::from("/tmp/custom.json")))
        .unwrap_or_else(|err| panic!("resolve failed: {err}"));
    assert_eq!(store.path(), Utf8Path::new("/tmp/custom.json"));
}

#[test]
fn config_value_accessors_trim_and_filter_empty() {
    let mut document = StateDocument::new();
    document
        .config
        .insert(String::from("region_id"), Value::String(String::from("  ")));
    assert_eq!(document.config_str("region_id"), None);
    assert!(document.config_bool("auto_allocate_public_ip", false));
}
