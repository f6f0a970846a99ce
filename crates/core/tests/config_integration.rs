//! vendorscope.toml 통합 설정 테스트
//!
//! - vendorscope.toml.example 파싱 테스트
//! - 부분 설정 (일부 섹션만) 로딩 테스트
//! - 환경변수 우선순위 테스트
//! - 빈 파일 / 잘못된 형식 에러 테스트

use vendorscope_core::config::VendorscopeConfig;
use vendorscope_core::error::{ConfigError, VendorscopeError};

const EXAMPLE: &str = include_str!("../../../vendorscope.toml.example");

// =============================================================================
// vendorscope.toml.example 파싱 테스트
// =============================================================================

#[test]
fn example_config_parses_and_validates() {
    let config = VendorscopeConfig::parse(EXAMPLE).expect("example config should parse");
    config
        .validate()
        .expect("example config should pass validation");

    assert_eq!(config.general.log_level, "info");
    assert_eq!(config.general.data_dir, "/var/lib/vendorscope");
    assert!(config.rules.category_colors.is_empty());
}

#[test]
fn example_config_matches_code_defaults() {
    let from_file = VendorscopeConfig::parse(EXAMPLE).expect("should parse");
    let from_code = VendorscopeConfig::default();

    assert_eq!(from_file.general.log_level, from_code.general.log_level);
    assert_eq!(from_file.general.log_format, from_code.general.log_format);
    assert_eq!(from_file.general.data_dir, from_code.general.data_dir);

    assert_eq!(from_file.rules.catalog_path, from_code.rules.catalog_path);
    assert_eq!(from_file.rules.overrides_path, from_code.rules.overrides_path);
    assert_eq!(from_file.rules.custom_path, from_code.rules.custom_path);
    assert_eq!(from_file.rules.cache_ttl_secs, from_code.rules.cache_ttl_secs);
    assert_eq!(from_file.rules.default_color, from_code.rules.default_color);

    assert_eq!(from_file.session.persist, from_code.session.persist);
    assert_eq!(from_file.session.debounce_ms, from_code.session.debounce_ms);
    assert_eq!(
        from_file.session.default_capture_window_ms,
        from_code.session.default_capture_window_ms
    );
    assert_eq!(
        from_file.session.history_capacity,
        from_code.session.history_capacity
    );
    assert_eq!(
        from_file.session.history_ttl_secs,
        from_code.session.history_ttl_secs
    );
}

// =============================================================================
// 부분 설정 로딩 테스트
// =============================================================================

#[test]
fn partial_config_session_only() {
    let toml = r#"
[session]
debounce_ms = 250
persist = false
"#;
    let config = VendorscopeConfig::parse(toml).expect("should parse");
    config.validate().expect("should validate");

    assert_eq!(config.session.debounce_ms, 250);
    assert!(!config.session.persist);
    // 나머지는 기본값
    assert_eq!(config.session.history_capacity, 100);
    assert_eq!(config.general.log_format, "json");
}

#[test]
fn partial_config_category_colors_merge() {
    let toml = r##"
[rules.category_colors]
CAPTCHA = "#F59E0B"
WAF = "#10B981"
"##;
    let config = VendorscopeConfig::parse(toml).expect("should parse");
    config.validate().expect("should validate");
    assert_eq!(config.rules.category_colors.len(), 2);
    assert_eq!(config.rules.category_colors["WAF"], "#10B981");
}

// =============================================================================
// 환경변수 우선순위 테스트
// =============================================================================

#[test]
#[serial_test::serial]
fn env_override_takes_precedence_over_toml() {
    let toml = r#"
[general]
log_level = "info"
"#;

    let original = std::env::var("VENDORSCOPE_GENERAL_LOG_LEVEL").ok();
    // SAFETY: serial_test로 직렬화되어 환경변수 조작이 안전합니다.
    unsafe {
        std::env::set_var("VENDORSCOPE_GENERAL_LOG_LEVEL", "error");
    }

    let mut config = VendorscopeConfig::parse(toml).expect("should parse");
    config.apply_env_overrides();
    let result = config.general.log_level.clone();

    // SAFETY: 테스트 정리
    unsafe {
        match original {
            Some(val) => std::env::set_var("VENDORSCOPE_GENERAL_LOG_LEVEL", val),
            None => std::env::remove_var("VENDORSCOPE_GENERAL_LOG_LEVEL"),
        }
    }

    assert_eq!(result, "error");
}

#[test]
#[serial_test::serial]
fn env_override_invalid_number_keeps_toml_value() {
    let toml = r#"
[session]
debounce_ms = 300
"#;

    let original = std::env::var("VENDORSCOPE_SESSION_DEBOUNCE_MS").ok();
    // SAFETY: serial_test로 직렬화되어 환경변수 조작이 안전합니다.
    unsafe {
        std::env::set_var("VENDORSCOPE_SESSION_DEBOUNCE_MS", "soon");
    }

    let mut config = VendorscopeConfig::parse(toml).expect("should parse");
    config.apply_env_overrides();
    let result = config.session.debounce_ms;

    // SAFETY: 테스트 정리
    unsafe {
        match original {
            Some(val) => std::env::set_var("VENDORSCOPE_SESSION_DEBOUNCE_MS", val),
            None => std::env::remove_var("VENDORSCOPE_SESSION_DEBOUNCE_MS"),
        }
    }

    assert_eq!(result, 300);
}

#[tokio::test]
#[serial_test::serial]
async fn load_applies_env_then_validates() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("vendorscope.toml");
    std::fs::write(&path, "[session]\nhistory_capacity = 10\n").expect("write");

    let original = std::env::var("VENDORSCOPE_SESSION_HISTORY_CAPACITY").ok();
    // SAFETY: serial_test로 직렬화되어 환경변수 조작이 안전합니다.
    unsafe {
        std::env::set_var("VENDORSCOPE_SESSION_HISTORY_CAPACITY", "0");
    }

    let result = VendorscopeConfig::load(&path).await;

    // SAFETY: 테스트 정리
    unsafe {
        match original {
            Some(val) => std::env::set_var("VENDORSCOPE_SESSION_HISTORY_CAPACITY", val),
            None => std::env::remove_var("VENDORSCOPE_SESSION_HISTORY_CAPACITY"),
        }
    }

    match result {
        Err(VendorscopeError::Config(ConfigError::InvalidValue { field, .. })) => {
            assert_eq!(field, "session.history_capacity");
        }
        other => panic!("expected InvalidValue, got {other:?}"),
    }
}

// =============================================================================
// 에러 케이스
// =============================================================================

#[test]
fn empty_file_yields_defaults() {
    let config = VendorscopeConfig::parse("").expect("empty should parse");
    config.validate().expect("defaults should validate");
    assert_eq!(config.session.default_capture_window_ms, 15_000);
}

#[test]
fn wrong_type_is_parse_error() {
    let err = VendorscopeConfig::parse("[session]\ndebounce_ms = \"fast\"\n")
        .expect_err("should fail");
    assert!(matches!(
        err,
        VendorscopeError::Config(ConfigError::ParseFailed { .. })
    ));
}

#[test]
fn capture_window_bounds_are_inclusive() {
    for (window, ok) in [(999, false), (1_000, true), (300_000, true), (300_001, false)] {
        let toml = format!("[session]\ndefault_capture_window_ms = {window}\n");
        let config = VendorscopeConfig::parse(&toml).expect("should parse");
        assert_eq!(config.validate().is_ok(), ok, "window {window}");
    }
}

#[tokio::test]
async fn from_file_missing_is_file_not_found() {
    let result = VendorscopeConfig::from_file("/nonexistent/vendorscope.toml").await;
    assert!(matches!(
        result,
        Err(VendorscopeError::Config(ConfigError::FileNotFound { .. }))
    ));
}

#[tokio::test]
async fn load_example_config_from_disk() {
    let manifest_dir = env!("CARGO_MANIFEST_DIR");
    let example_path = format!("{manifest_dir}/../../vendorscope.toml.example");

    let config = VendorscopeConfig::from_file(&example_path)
        .await
        .expect("example on disk should load");
    assert_eq!(config.session.history_ttl_secs, 1_800);
}

// =============================================================================
// 직렬화 라운드트립 테스트
// =============================================================================

#[test]
fn serialize_and_reparse_roundtrip() {
    let mut original = VendorscopeConfig::default();
    original
        .rules
        .category_colors
        .insert("CDN".to_owned(), "#3B82F6".to_owned());
    let toml_str = toml::to_string_pretty(&original).expect("should serialize");
    let parsed = VendorscopeConfig::parse(&toml_str).expect("should reparse");
    parsed.validate().expect("reparsed should validate");

    assert_eq!(original.rules.catalog_path, parsed.rules.catalog_path);
    assert_eq!(original.rules.category_colors, parsed.rules.category_colors);
    assert_eq!(original.session.debounce_ms, parsed.session.debounce_ms);
}
