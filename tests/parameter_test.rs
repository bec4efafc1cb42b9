//! Set-then-read behaviour of the `[mysqld]` parameter engine.

use myfleet::exec::SystemExecutor;
use myfleet::parameter::{format_size, parse_value, ParamValue, ParameterEngine};
use myfleet::{ErrorKind, InstanceLayout, InstanceRecord, Settings};
use proptest::prelude::*;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

fn engine() -> ParameterEngine {
    ParameterEngine::new(Arc::new(SystemExecutor::new(false)), Duration::from_secs(5))
}

fn provisioned(root: &Path) -> InstanceRecord {
    let settings = Settings::rooted(root);
    let layout = InstanceLayout::for_name(&settings, "prod01").expect("valid name");
    std::fs::create_dir_all(&layout.conf_dir).expect("Failed to create conf dir");
    engine()
        .write_initial(&layout, 3306)
        .expect("Failed to write my.cnf");
    InstanceRecord::initializing(&layout, 3306, None)
}

/// Set `key=raw`, read the file back and return the stored parameter.
fn set_and_read(key: &str, raw: &str) -> (ParamValue, String, bool) {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let record = provisioned(temp_dir.path());
    let engine = engine();
    engine.set(&record, key, raw).expect("set failed");

    let params = engine.read(&record.config_path).expect("read failed");
    let stored = params
        .into_iter()
        .find(|p| p.key == key)
        .expect("key present after set");
    (stored.value, stored.raw_value, stored.validated)
}

fn integer_key() -> impl Strategy<Value = &'static str> {
    prop_oneof![
        Just("max_connections"),
        Just("server_id"),
        Just("innodb_io_capacity"),
        Just("table_open_cache"),
    ]
}

fn boolean_key() -> impl Strategy<Value = &'static str> {
    prop_oneof![
        Just("slow_query_log"),
        Just("skip_name_resolve"),
        Just("read_only"),
    ]
}

fn boolean_input() -> impl Strategy<Value = &'static str> {
    prop_oneof![
        Just("true"),
        Just("false"),
        Just("on"),
        Just("OFF"),
        Just("1"),
        Just("0"),
        Just("True"),
    ]
}

fn size_key() -> impl Strategy<Value = &'static str> {
    prop_oneof![
        Just("innodb_buffer_pool_size"),
        Just("max_allowed_packet"),
        Just("tmp_table_size"),
    ]
}

fn size_unit() -> impl Strategy<Value = &'static str> {
    prop_oneof![
        Just(""),
        Just("K"),
        Just("k"),
        Just("M"),
        Just("m"),
        Just("G"),
        Just("g"),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn integer_values_read_back_unchanged(key in integer_key(), n in 0u64..u32::MAX as u64) {
        let raw = n.to_string();
        let (value, stored, validated) = set_and_read(key, &raw);
        prop_assert_eq!(&value, &parse_value(key, &raw).unwrap());
        prop_assert_eq!(value, ParamValue::Integer(n));
        prop_assert_eq!(stored, raw);
        prop_assert!(validated);
    }

    #[test]
    fn boolean_values_are_stored_as_on_off(key in boolean_key(), raw in boolean_input()) {
        let (value, stored, validated) = set_and_read(key, raw);
        let expected = parse_value(key, raw).unwrap();
        prop_assert_eq!(&value, &expected);
        prop_assert!(stored == "ON" || stored == "OFF");
        prop_assert_eq!(parse_value(key, &stored).unwrap(), expected);
        prop_assert!(validated);
    }

    #[test]
    fn size_values_keep_their_byte_count(key in size_key(), n in 1u64..100_000, unit in size_unit()) {
        let raw = format!("{}{}", n, unit);
        let (value, stored, validated) = set_and_read(key, &raw);
        let expected = parse_value(key, &raw).unwrap();
        prop_assert_eq!(&value, &expected);
        // The canonical form re-parses to the same byte count
        prop_assert_eq!(parse_value(key, &stored).unwrap(), expected.clone());
        if let ParamValue::SizeBytes(bytes) = expected {
            prop_assert_eq!(stored, format_size(bytes));
        } else {
            prop_assert!(false, "size key parsed as {:?}", expected);
        }
        prop_assert!(validated);
    }
}

#[test]
fn test_buffer_pool_two_gigabytes() {
    let (value, stored, _) = set_and_read("innodb_buffer_pool_size", "2G");
    assert_eq!(value, ParamValue::SizeBytes(2_147_483_648));
    assert_eq!(stored, "2G");

    let (value, stored, _) = set_and_read("innodb_buffer_pool_size", "2147483648");
    assert_eq!(value, ParamValue::SizeBytes(2_147_483_648));
    assert_eq!(stored, "2G");
}

#[test]
fn test_invalid_values_leave_file_untouched() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let record = provisioned(temp_dir.path());
    let before = std::fs::read_to_string(&record.config_path).unwrap();

    for (key, raw) in [
        ("innodb_buffer_pool_size", "2X"),
        ("innodb_buffer_pool_size", "-1G"),
        ("max_connections", "many"),
        ("slow_query_log", "yes"),
        ("bad key", "1"),
    ] {
        let err = engine().set(&record, key, raw).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation, "{}={}", key, raw);
    }

    assert_eq!(std::fs::read_to_string(&record.config_path).unwrap(), before);
}

#[test]
fn test_unknown_key_is_stored_unvalidated() {
    let (value, stored, validated) = set_and_read("character_set_server", "utf8mb4");
    assert_eq!(value, ParamValue::RawString("utf8mb4".to_string()));
    assert_eq!(stored, "utf8mb4");
    assert!(!validated);
}

#[test]
fn test_dashed_key_updates_existing_line() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let record = provisioned(temp_dir.path());
    let engine = engine();

    engine
        .set(&record, "innodb-buffer-pool-size", "512M")
        .unwrap();

    let params = engine.read(&record.config_path).unwrap();
    let pools: Vec<_> = params
        .iter()
        .filter(|p| p.key.replace('-', "_") == "innodb_buffer_pool_size")
        .collect();
    assert_eq!(pools.len(), 1);
    assert_eq!(pools[0].value, ParamValue::SizeBytes(512 * 1024 * 1024));
}

#[tokio::test]
async fn test_show_unknown_key_is_parameter_not_found() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let record = provisioned(temp_dir.path());

    let err = engine()
        .show(&record, Some("query_cache_size"), false)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Precondition);
}

#[tokio::test]
async fn test_show_live_skipped_when_not_running() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let record = provisioned(temp_dir.path());

    let report = engine()
        .show(&record, Some("max_connections"), true)
        .await
        .unwrap();
    assert!(matches!(
        report.live,
        myfleet::parameter::LiveStatus::Skipped(_)
    ));
    assert_eq!(report.rows.len(), 1);
    assert!(report.rows[0].live_raw.is_none());
}

#[test]
fn test_bare_boolean_flag_reads_as_on() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let path = temp_dir.path().join("my.cnf");
    std::fs::write(&path, "[mysqld]\nskip-name-resolve\nlog-bin\n").unwrap();

    let params = engine().read(&path).unwrap();
    assert_eq!(params[0].key, "skip-name-resolve");
    assert_eq!(params[0].value, ParamValue::Boolean(true));
    assert!(params[0].validated);
    assert_eq!(params[0].raw_value, "");

    // A bare flag outside the schema stays unvalidated
    assert_eq!(params[1].value, ParamValue::RawString(String::new()));
    assert!(!params[1].validated);
}
