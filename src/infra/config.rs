//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml

use crate::domain::geo::GeoPoint;
use anyhow::{bail, Context};
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SiteConfig {
    /// Unique site identifier, used as the `site` metrics label
    #[serde(default = "default_site_id")]
    pub id: String,
}

fn default_site_id() -> String {
    "library".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct SpaceConfig {
    #[serde(default = "default_space_id")]
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Reference coordinate GPS distances are measured against
    pub latitude: f64,
    pub longitude: f64,
    /// Expected WiFi network name (case-sensitive)
    pub ssid: String,
}

fn default_space_id() -> String {
    "main".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScoringConfig {
    #[serde(default = "default_inside_radius_m")]
    pub inside_radius_m: f64,
    #[serde(default = "default_outside_radius_m")]
    pub outside_radius_m: f64,
    #[serde(default = "default_stationary_kmh")]
    pub stationary_kmh: f64,
    #[serde(default = "default_max_speed_kmh")]
    pub max_speed_kmh: f64,
    #[serde(default = "default_gps_weight")]
    pub gps_weight: u32,
    #[serde(default = "default_wifi_weight")]
    pub wifi_weight: u32,
    #[serde(default = "default_motion_weight")]
    pub motion_weight: u32,
    #[serde(default = "default_auto_threshold")]
    pub auto_threshold: u8,
    #[serde(default = "default_borderline_floor")]
    pub borderline_floor: u8,
}

fn default_inside_radius_m() -> f64 {
    50.0
}

fn default_outside_radius_m() -> f64 {
    500.0
}

fn default_stationary_kmh() -> f64 {
    6.0
}

fn default_max_speed_kmh() -> f64 {
    25.0
}

fn default_gps_weight() -> u32 {
    50
}

fn default_wifi_weight() -> u32 {
    30
}

fn default_motion_weight() -> u32 {
    20
}

fn default_auto_threshold() -> u8 {
    80
}

fn default_borderline_floor() -> u8 {
    50
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            inside_radius_m: default_inside_radius_m(),
            outside_radius_m: default_outside_radius_m(),
            stationary_kmh: default_stationary_kmh(),
            max_speed_kmh: default_max_speed_kmh(),
            gps_weight: default_gps_weight(),
            wifi_weight: default_wifi_weight(),
            motion_weight: default_motion_weight(),
            auto_threshold: default_auto_threshold(),
            borderline_floor: default_borderline_floor(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_http_port")]
    pub port: u16,
    /// Bearer token that unlocks the roster and per-subject history
    #[serde(default)]
    pub admin_token: Option<String>,
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_http_port() -> u16 {
    8080
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { bind_address: default_bind_address(), port: default_http_port(), admin_token: None }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventLogConfig {
    /// File path for accepted events (JSONL format)
    #[serde(default = "default_event_log_file")]
    pub file: String,
    /// Rebuild occupancy from the log at startup
    #[serde(default = "default_replay_on_start")]
    pub replay_on_start: bool,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_event_log_file() -> String {
    "entries.jsonl".to_string()
}

fn default_replay_on_start() -> bool {
    true
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    200
}

fn default_channel_capacity() -> usize {
    1024
}

impl Default for EventLogConfig {
    fn default() -> Self {
        Self {
            file: default_event_log_file(),
            replay_on_start: default_replay_on_start(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval")]
    pub interval_secs: u64,
}

fn default_metrics_interval() -> u64 {
    60
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TomlConfig {
    #[serde(default)]
    pub site: SiteConfig,
    pub space: SpaceConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub event_log: EventLogConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    site_id: String,
    space_id: String,
    space_name: String,
    reference_point: GeoPoint,
    expected_ssid: String,
    inside_radius_m: f64,
    outside_radius_m: f64,
    stationary_kmh: f64,
    max_speed_kmh: f64,
    gps_weight: u32,
    wifi_weight: u32,
    motion_weight: u32,
    auto_threshold: u8,
    borderline_floor: u8,
    http_bind_address: String,
    http_port: u16,
    admin_token: Option<String>,
    event_log_file: String,
    replay_on_start: bool,
    persist_max_retries: u32,
    persist_retry_backoff_ms: u64,
    persist_channel_capacity: usize,
    metrics_interval_secs: u64,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        let scoring = ScoringConfig::default();
        Self {
            site_id: default_site_id(),
            space_id: default_space_id(),
            space_name: "Main Library".to_string(),
            reference_point: GeoPoint::new(37.7749, -122.4194),
            expected_ssid: "Library-WiFi".to_string(),
            inside_radius_m: scoring.inside_radius_m,
            outside_radius_m: scoring.outside_radius_m,
            stationary_kmh: scoring.stationary_kmh,
            max_speed_kmh: scoring.max_speed_kmh,
            gps_weight: scoring.gps_weight,
            wifi_weight: scoring.wifi_weight,
            motion_weight: scoring.motion_weight,
            auto_threshold: scoring.auto_threshold,
            borderline_floor: scoring.borderline_floor,
            http_bind_address: default_bind_address(),
            http_port: default_http_port(),
            admin_token: None,
            event_log_file: default_event_log_file(),
            replay_on_start: default_replay_on_start(),
            persist_max_retries: default_max_retries(),
            persist_retry_backoff_ms: default_retry_backoff_ms(),
            persist_channel_capacity: default_channel_capacity(),
            metrics_interval_secs: default_metrics_interval(),
            config_file: "default".to_string(),
        }
    }
}

impl Config {
    /// Determine config file path from args or environment
    pub fn resolve_config_path(args: &[String]) -> String {
        for (i, arg) in args.iter().enumerate() {
            if arg == "--config" {
                if let Some(path) = args.get(i + 1) {
                    return path.clone();
                }
            }
            if let Some(path) = arg.strip_prefix("--config=") {
                return path.to_string();
            }
        }

        if let Ok(path) = env::var("CONFIG_FILE") {
            return path;
        }

        "config/dev.toml".to_string()
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        Self::from_toml(toml_config, path.display().to_string())
    }

    fn from_toml(toml_config: TomlConfig, config_file: String) -> anyhow::Result<Self> {
        let TomlConfig { site, space, scoring, http, event_log, metrics } = toml_config;

        let reference_point = GeoPoint::new(space.latitude, space.longitude);
        if !reference_point.is_valid() {
            bail!(
                "space reference point ({}, {}) is not a valid coordinate",
                space.latitude,
                space.longitude
            );
        }
        validate_scoring(&scoring)?;

        Ok(Self {
            site_id: site.id,
            space_name: space.name.unwrap_or_else(|| space.id.clone()),
            space_id: space.id,
            reference_point,
            expected_ssid: space.ssid,
            inside_radius_m: scoring.inside_radius_m,
            outside_radius_m: scoring.outside_radius_m,
            stationary_kmh: scoring.stationary_kmh,
            max_speed_kmh: scoring.max_speed_kmh,
            gps_weight: scoring.gps_weight,
            wifi_weight: scoring.wifi_weight,
            motion_weight: scoring.motion_weight,
            auto_threshold: scoring.auto_threshold,
            borderline_floor: scoring.borderline_floor,
            http_bind_address: http.bind_address,
            http_port: http.port,
            admin_token: http.admin_token.filter(|t| !t.is_empty()),
            event_log_file: event_log.file,
            replay_on_start: event_log.replay_on_start,
            persist_max_retries: event_log.max_retries,
            persist_retry_backoff_ms: event_log.retry_backoff_ms,
            persist_channel_capacity: event_log.channel_capacity.max(1),
            metrics_interval_secs: metrics.interval_secs.max(1),
            config_file,
        })
    }

    /// Load configuration from an explicit path, falling back to defaults
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Warning: {:#}. Using defaults.", e);
                Self::default()
            }
        }
    }

    /// Load configuration - tries TOML file first, falls back to defaults
    pub fn load(args: &[String]) -> Self {
        let config_path = Self::resolve_config_path(args);
        Self::load_from_path(&config_path)
    }

    // Getters for all config fields
    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    pub fn space_id(&self) -> &str {
        &self.space_id
    }

    pub fn space_name(&self) -> &str {
        &self.space_name
    }

    pub fn reference_point(&self) -> GeoPoint {
        self.reference_point
    }

    pub fn expected_ssid(&self) -> &str {
        &self.expected_ssid
    }

    pub fn inside_radius_m(&self) -> f64 {
        self.inside_radius_m
    }

    pub fn outside_radius_m(&self) -> f64 {
        self.outside_radius_m
    }

    pub fn stationary_kmh(&self) -> f64 {
        self.stationary_kmh
    }

    pub fn max_speed_kmh(&self) -> f64 {
        self.max_speed_kmh
    }

    pub fn gps_weight(&self) -> u32 {
        self.gps_weight
    }

    pub fn wifi_weight(&self) -> u32 {
        self.wifi_weight
    }

    pub fn motion_weight(&self) -> u32 {
        self.motion_weight
    }

    pub fn auto_threshold(&self) -> u8 {
        self.auto_threshold
    }

    pub fn borderline_floor(&self) -> u8 {
        self.borderline_floor
    }

    pub fn http_bind_address(&self) -> &str {
        &self.http_bind_address
    }

    pub fn http_port(&self) -> u16 {
        self.http_port
    }

    pub fn admin_token(&self) -> Option<&str> {
        self.admin_token.as_deref()
    }

    pub fn event_log_file(&self) -> &str {
        &self.event_log_file
    }

    pub fn replay_on_start(&self) -> bool {
        self.replay_on_start
    }

    pub fn persist_max_retries(&self) -> u32 {
        self.persist_max_retries
    }

    pub fn persist_retry_backoff_ms(&self) -> u64 {
        self.persist_retry_backoff_ms
    }

    pub fn persist_channel_capacity(&self) -> usize {
        self.persist_channel_capacity
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder method to set the admin token
    pub fn with_admin_token(mut self, token: &str) -> Self {
        self.admin_token = Some(token.to_string());
        self
    }

    /// Builder method to set the event log path
    pub fn with_event_log_file(mut self, file: &str) -> Self {
        self.event_log_file = file.to_string();
        self
    }

    /// Builder method to set the retry backoff
    pub fn with_persist_retry_backoff_ms(mut self, ms: u64) -> Self {
        self.persist_retry_backoff_ms = ms;
        self
    }
}

/// Largest accepted per-signal weight
pub const MAX_SIGNAL_WEIGHT: u32 = 10_000;

fn validate_scoring(scoring: &ScoringConfig) -> anyhow::Result<()> {
    if !(scoring.inside_radius_m >= 0.0 && scoring.inside_radius_m < scoring.outside_radius_m) {
        bail!(
            "scoring.inside_radius_m ({}) must be >= 0 and below outside_radius_m ({})",
            scoring.inside_radius_m,
            scoring.outside_radius_m
        );
    }
    if !(scoring.stationary_kmh >= 0.0 && scoring.stationary_kmh < scoring.max_speed_kmh) {
        bail!(
            "scoring.stationary_kmh ({}) must be >= 0 and below max_speed_kmh ({})",
            scoring.stationary_kmh,
            scoring.max_speed_kmh
        );
    }
    let weights = [
        ("gps_weight", scoring.gps_weight),
        ("wifi_weight", scoring.wifi_weight),
        ("motion_weight", scoring.motion_weight),
    ];
    for (name, weight) in weights {
        if weight > MAX_SIGNAL_WEIGHT {
            bail!("scoring.{name} ({weight}) must be <= {MAX_SIGNAL_WEIGHT}");
        }
    }
    if weights.iter().map(|(_, w)| u64::from(*w)).sum::<u64>() == 0 {
        bail!("scoring weights must not all be zero");
    }
    if scoring.auto_threshold > 100 {
        bail!("scoring.auto_threshold ({}) must be <= 100", scoring.auto_threshold);
    }
    if scoring.borderline_floor > scoring.auto_threshold {
        bail!(
            "scoring.borderline_floor ({}) must not exceed auto_threshold ({})",
            scoring.borderline_floor,
            scoring.auto_threshold
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(content: &str) -> anyhow::Result<Config> {
        let toml_config: TomlConfig = toml::from_str(content)?;
        Config::from_toml(toml_config, "inline".to_string())
    }

    const MINIMAL: &str = r#"
[space]
latitude = 37.7749
longitude = -122.4194
ssid = "Library-WiFi"
"#;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.auto_threshold(), 80);
        assert_eq!(config.borderline_floor(), 50);
        assert_eq!(config.gps_weight() + config.wifi_weight() + config.motion_weight(), 100);
        assert_eq!(config.http_port(), 8080);
        assert!(config.admin_token().is_none());
        assert_eq!(config.event_log_file(), "entries.jsonl");
    }

    #[test]
    fn test_minimal_file_uses_section_defaults() {
        let config = parse(MINIMAL).unwrap();
        assert_eq!(config.site_id(), "library");
        assert_eq!(config.space_id(), "main");
        assert_eq!(config.space_name(), "main");
        assert_eq!(config.inside_radius_m(), 50.0);
        assert_eq!(config.outside_radius_m(), 500.0);
        assert_eq!(config.persist_max_retries(), 3);
        assert!(config.replay_on_start());
    }

    #[test]
    fn test_empty_admin_token_is_disabled() {
        let content = format!("{MINIMAL}\n[http]\nadmin_token = \"\"\n");
        let config = parse(&content).unwrap();
        assert!(config.admin_token().is_none());
    }

    #[test]
    fn test_rejects_inverted_radii() {
        let content = format!(
            "{MINIMAL}\n[scoring]\ninside_radius_m = 600.0\noutside_radius_m = 500.0\n"
        );
        let err = parse(&content).unwrap_err();
        assert!(err.to_string().contains("inside_radius_m"));
    }

    #[test]
    fn test_rejects_floor_above_threshold() {
        let content = format!("{MINIMAL}\n[scoring]\nauto_threshold = 70\nborderline_floor = 75\n");
        let err = parse(&content).unwrap_err();
        assert!(err.to_string().contains("borderline_floor"));
    }

    #[test]
    fn test_rejects_all_zero_weights() {
        let content =
            format!("{MINIMAL}\n[scoring]\ngps_weight = 0\nwifi_weight = 0\nmotion_weight = 0\n");
        assert!(parse(&content).is_err());
    }

    #[test]
    fn test_rejects_oversized_weight() {
        let content = format!("{MINIMAL}\n[scoring]\ngps_weight = 4294967295\nwifi_weight = 2\n");
        let err = parse(&content).unwrap_err();
        assert!(err.to_string().contains("gps_weight"));
    }

    #[test]
    fn test_accepts_weight_at_cap() {
        let content = format!(
            "{MINIMAL}\n[scoring]\ngps_weight = 10000\nwifi_weight = 10000\nmotion_weight = 10000\n"
        );
        let config = parse(&content).unwrap();
        assert_eq!(config.gps_weight(), MAX_SIGNAL_WEIGHT);
    }

    #[test]
    fn test_rejects_invalid_reference_point() {
        let content = r#"
[space]
latitude = 137.0
longitude = 0.0
ssid = "x"
"#;
        assert!(parse(content).is_err());
    }

    #[test]
    fn test_resolve_config_path_from_arg() {
        let args: Vec<String> = vec![
            "presence-gateway".to_string(),
            "--config".to_string(),
            "config/branch.toml".to_string(),
        ];
        assert_eq!(Config::resolve_config_path(&args), "config/branch.toml");
    }

    #[test]
    fn test_resolve_config_path_from_arg_equals() {
        let args: Vec<String> =
            vec!["presence-gateway".to_string(), "--config=config/annex.toml".to_string()];
        assert_eq!(Config::resolve_config_path(&args), "config/annex.toml");
    }
}
