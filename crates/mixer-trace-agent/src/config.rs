// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use regex::Regex;
use std::env;
use std::sync::OnceLock;

use crate::error::ConfigError;

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_INGESTION_URL: &str = "https://dc.services.visualstudio.com/v2/track";
const DEFAULT_FLUSH_INTERVAL_SECS: u64 = 5;
const DEFAULT_STATS_INTERVAL_SECS: u64 = 60;
const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 900;
const DEFAULT_MAX_REQUEST_CONTENT_LENGTH: usize = 10 * 1024 * 1024;
const DEFAULT_SAMPLING_MAX_PER_SECOND: u32 = 5;

const HOST_VAR: &str = "MIXER_ADAPTER_HOST";
const PORT_VAR: &str = "MIXER_ADAPTER_PORT";
const TARGET_NAMESPACES_VAR: &str = "MIXER_ADAPTER_TARGET_NAMESPACES";
const IGNORED_NAMESPACES_VAR: &str = "MIXER_ADAPTER_IGNORED_NAMESPACES";
const INSTRUMENTATION_KEY_VAR: &str = "MIXER_ADAPTER_INSTRUMENTATION_KEY";
const INGESTION_URL_VAR: &str = "MIXER_ADAPTER_INGESTION_URL";
const FLUSH_INTERVAL_VAR: &str = "MIXER_ADAPTER_FLUSH_INTERVAL_SECS";
const STATS_INTERVAL_VAR: &str = "MIXER_ADAPTER_STATS_INTERVAL_SECS";
const HEARTBEAT_INTERVAL_VAR: &str = "MIXER_ADAPTER_HEARTBEAT_INTERVAL_SECS";
const CONTROL_PORT_VAR: &str = "MIXER_ADAPTER_CONTROL_PORT";
const MAX_REQUEST_CONTENT_LENGTH_VAR: &str = "MIXER_ADAPTER_MAX_REQUEST_CONTENT_LENGTH";
const PROXY_HTTPS_VAR: &str = "MIXER_ADAPTER_PROXY_HTTPS";
const LOG_LEVEL_VAR: &str = "MIXER_ADAPTER_LOG_LEVEL";
const SAMPLING_ENABLED_VAR: &str = "MIXER_ADAPTER_ADAPTIVE_SAMPLING_ENABLED";
const SAMPLING_MAX_EVENTS_VAR: &str = "MIXER_ADAPTER_ADAPTIVE_SAMPLING_MAX_EVENTS_PER_SECOND";
const SAMPLING_MAX_OTHER_ITEMS_VAR: &str =
    "MIXER_ADAPTER_ADAPTIVE_SAMPLING_MAX_OTHER_ITEMS_PER_SECOND";

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Adapter configuration, read from `MIXER_ADAPTER_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Interface the mesh input binds to
    pub host: String,
    /// Port of the mesh input. `None` disables the input entirely.
    pub port: Option<u16>,
    /// Namespaces to monitor. Empty means every namespace.
    pub target_namespaces: Vec<String>,
    pub ignored_namespaces: Vec<String>,
    pub instrumentation_key: String,
    /// Track endpoint telemetry envelopes are posted to
    pub ingestion_url: String,
    /// how often to flush telemetry, in seconds
    pub flush_interval_secs: u64,
    /// how often to log input statistics, in seconds
    pub stats_interval_secs: u64,
    /// how often to send a heartbeat, in seconds
    pub heartbeat_interval_secs: u64,
    /// Port of the cluster info control endpoint. `None` disables it.
    pub control_port: Option<u16>,
    pub max_request_content_length: usize,
    pub proxy_url: Option<String>,
    pub log_level: String,
    /// Thin out requests and dependencies to a target rate, whole operations at a time
    pub adaptive_sampling_enabled: bool,
    /// Target rate of custom events. The adapter emits none, the value is only validated.
    pub adaptive_sampling_max_events_per_second: u32,
    /// Target rate of every other telemetry item
    pub adaptive_sampling_max_other_items_per_second: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: None,
            target_namespaces: Vec::new(),
            ignored_namespaces: Vec::new(),
            instrumentation_key: String::new(),
            ingestion_url: DEFAULT_INGESTION_URL.to_string(),
            flush_interval_secs: DEFAULT_FLUSH_INTERVAL_SECS,
            stats_interval_secs: DEFAULT_STATS_INTERVAL_SECS,
            heartbeat_interval_secs: DEFAULT_HEARTBEAT_INTERVAL_SECS,
            control_port: None,
            max_request_content_length: DEFAULT_MAX_REQUEST_CONTENT_LENGTH,
            proxy_url: None,
            log_level: "info".to_string(),
            adaptive_sampling_enabled: false,
            adaptive_sampling_max_events_per_second: DEFAULT_SAMPLING_MAX_PER_SECOND,
            adaptive_sampling_max_other_items_per_second: DEFAULT_SAMPLING_MAX_PER_SECOND,
        }
    }
}

impl Config {
    pub fn new() -> Result<Config, ConfigError> {
        let instrumentation_key = read_var(INSTRUMENTATION_KEY_VAR)
            .ok_or(ConfigError::MissingVariable(INSTRUMENTATION_KEY_VAR))?;

        let config = Config {
            host: read_var(HOST_VAR).unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: read_var(PORT_VAR).and_then(|port| port.parse::<u16>().ok()),
            target_namespaces: read_var(TARGET_NAMESPACES_VAR)
                .map(|val| split_list(&val))
                .unwrap_or_default(),
            ignored_namespaces: read_var(IGNORED_NAMESPACES_VAR)
                .map(|val| split_list(&val))
                .unwrap_or_default(),
            instrumentation_key,
            ingestion_url: read_var(INGESTION_URL_VAR)
                .unwrap_or_else(|| DEFAULT_INGESTION_URL.to_string()),
            flush_interval_secs: read_parsed(FLUSH_INTERVAL_VAR, DEFAULT_FLUSH_INTERVAL_SECS),
            stats_interval_secs: read_parsed(STATS_INTERVAL_VAR, DEFAULT_STATS_INTERVAL_SECS),
            heartbeat_interval_secs: read_parsed(
                HEARTBEAT_INTERVAL_VAR,
                DEFAULT_HEARTBEAT_INTERVAL_SECS,
            ),
            control_port: read_var(CONTROL_PORT_VAR).and_then(|port| port.parse::<u16>().ok()),
            max_request_content_length: read_parsed(
                MAX_REQUEST_CONTENT_LENGTH_VAR,
                DEFAULT_MAX_REQUEST_CONTENT_LENGTH,
            ),
            proxy_url: read_var(PROXY_HTTPS_VAR).or_else(|| read_var("HTTPS_PROXY")),
            log_level: read_var(LOG_LEVEL_VAR)
                .map(|val| val.to_lowercase())
                .unwrap_or_else(|| "info".to_string()),
            // anything but a case-insensitive "true" leaves sampling off
            adaptive_sampling_enabled: read_var(SAMPLING_ENABLED_VAR)
                .is_some_and(|val| val.eq_ignore_ascii_case("true")),
            adaptive_sampling_max_events_per_second: read_parsed(
                SAMPLING_MAX_EVENTS_VAR,
                DEFAULT_SAMPLING_MAX_PER_SECOND,
            ),
            adaptive_sampling_max_other_items_per_second: read_parsed(
                SAMPLING_MAX_OTHER_ITEMS_VAR,
                DEFAULT_SAMPLING_MAX_PER_SECOND,
            ),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.instrumentation_key.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "instrumentation key cannot be empty".to_string(),
            ));
        }

        if self.port == Some(0) || self.control_port == Some(0) {
            return Err(ConfigError::InvalidConfig(
                "port must be greater than 0".to_string(),
            ));
        }

        if self.flush_interval_secs == 0
            || self.stats_interval_secs == 0
            || self.heartbeat_interval_secs == 0
        {
            return Err(ConfigError::InvalidConfig(
                "intervals must be greater than 0".to_string(),
            ));
        }

        if self.adaptive_sampling_enabled
            && (self.adaptive_sampling_max_events_per_second == 0
                || self.adaptive_sampling_max_other_items_per_second == 0)
        {
            return Err(ConfigError::InvalidConfig(
                "adaptive sampling rates must be greater than 0".to_string(),
            ));
        }

        if !VALID_LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(ConfigError::InvalidConfig(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }

        Ok(())
    }
}

/// Reads an environment variable, expanding `${NAME}` references. Blank values count as unset.
fn read_var(name: &str) -> Option<String> {
    let raw = env::var(name).ok()?;
    let expanded = expand_env_references(&raw);
    let trimmed = expanded.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn read_parsed<T: std::str::FromStr>(name: &str, default: T) -> T {
    read_var(name)
        .and_then(|val| val.parse::<T>().ok())
        .unwrap_or(default)
}

/// Replaces `${NAME}` with the value of the `NAME` environment variable, or nothing when unset.
pub fn expand_env_references(value: &str) -> String {
    static REFERENCE: OnceLock<Option<Regex>> = OnceLock::new();
    let Some(reference) =
        REFERENCE.get_or_init(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").ok())
    else {
        return value.to_string();
    };
    reference
        .replace_all(value, |caps: &regex::Captures| {
            env::var(&caps[1]).unwrap_or_default()
        })
        .into_owned()
}

/// Splits a comma-separated list, trimming entries and dropping empty ones.
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::to_string)
        .collect()
}
