use parlance_domain::config::ServingConfig;

#[test]
fn default_coalesce_threshold_is_sixteen_kib() {
    let config = ServingConfig::default();
    assert_eq!(config.stream.coalesce_threshold(), 16_384);
}

#[test]
fn explicit_stream_caps_parse() {
    let toml_str = r#"
[stream]
max_event_bytes = 65536
max_buffer_bytes = 1048576
"#;
    let config: ServingConfig = toml::from_str(toml_str).unwrap();
    assert_eq!(config.stream.event_byte_cap(), Some(65_536));
    assert_eq!(config.stream.buffer_byte_cap(), Some(1_048_576));
}

#[test]
fn default_rate_limits_are_off() {
    let config = ServingConfig::default();
    assert!(!config.rate_limit.enabled);
    assert_eq!(config.rate_limit.requests_per_minute, 60);
}

#[test]
fn rate_limit_section_parses_custom_windows() {
    let toml_str = r#"
[rate_limit]
enabled = true
requests_per_minute = 5
tokens_per_minute = 2000
"#;
    let config: ServingConfig = toml::from_str(toml_str).unwrap();
    assert!(config.rate_limit.enabled);
    assert_eq!(config.rate_limit.requests_per_minute, 5);
    assert_eq!(config.rate_limit.tokens_per_minute, 2000);
}

#[test]
fn store_ttl_defaults_to_an_hour() {
    let config = ServingConfig::default();
    assert_eq!(config.store.ttl_seconds, 3600.0);
    assert!(config.store.enabled);
}

#[test]
fn session_timeouts_parse_as_seconds() {
    let toml_str = r#"
[sessions]
ttl_seconds = 45.0
tool_output_timeout_seconds = 10.0
"#;
    let config: ServingConfig = toml::from_str(toml_str).unwrap();
    assert_eq!(
        config.sessions.ttl().unwrap(),
        std::time::Duration::from_secs(45)
    );
    assert_eq!(
        config.sessions.tool_output_timeout(),
        std::time::Duration::from_secs(10)
    );
}
