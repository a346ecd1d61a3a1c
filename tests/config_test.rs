//! Integration tests for configuration loading

use presence_gateway::infra::Config;
use std::io::Write;
use tempfile::NamedTempFile;

#[test]
fn test_load_config_from_file() {
    let mut temp_file = NamedTempFile::new().unwrap();

    let config_content = r#"
[site]
id = "branch-east"

[space]
id = "reading-room"
name = "Reading Room"
latitude = 40.7532
longitude = -73.9822
ssid = "NYPL-Guest"

[scoring]
inside_radius_m = 30.0
outside_radius_m = 300.0
stationary_kmh = 5.0
max_speed_kmh = 20.0
gps_weight = 40
wifi_weight = 40
motion_weight = 20
auto_threshold = 85
borderline_floor = 60

[http]
bind_address = "127.0.0.1"
port = 9090
admin_token = "t0ken"

[event_log]
file = "/tmp/reading-room.jsonl"
replay_on_start = false
max_retries = 5
retry_backoff_ms = 50

[metrics]
interval_secs = 15
"#;

    temp_file.write_all(config_content.as_bytes()).unwrap();
    temp_file.flush().unwrap();

    let config = Config::from_file(temp_file.path()).unwrap();

    assert_eq!(config.site_id(), "branch-east");
    assert_eq!(config.space_id(), "reading-room");
    assert_eq!(config.space_name(), "Reading Room");
    assert_eq!(config.reference_point().latitude, 40.7532);
    assert_eq!(config.expected_ssid(), "NYPL-Guest");
    assert_eq!(config.inside_radius_m(), 30.0);
    assert_eq!(config.wifi_weight(), 40);
    assert_eq!(config.auto_threshold(), 85);
    assert_eq!(config.borderline_floor(), 60);
    assert_eq!(config.http_port(), 9090);
    assert_eq!(config.admin_token(), Some("t0ken"));
    assert!(!config.replay_on_start());
    assert_eq!(config.persist_max_retries(), 5);
    assert_eq!(config.metrics_interval_secs(), 15);
}

#[test]
fn test_invalid_scoring_is_an_error() {
    let mut temp_file = NamedTempFile::new().unwrap();
    let config_content = r#"
[space]
latitude = 0.0
longitude = 0.0
ssid = "x"

[scoring]
stationary_kmh = 30.0
max_speed_kmh = 20.0
"#;
    temp_file.write_all(config_content.as_bytes()).unwrap();
    temp_file.flush().unwrap();

    let err = Config::from_file(temp_file.path()).unwrap_err();
    assert!(err.to_string().contains("stationary_kmh"));
}

#[test]
fn test_load_from_path_fallback() {
    let config = Config::load_from_path("/nonexistent/config.toml");
    assert_eq!(config.config_file(), "default");
    assert_eq!(config.auto_threshold(), 80);
    assert_eq!(config.http_port(), 8080);
}
