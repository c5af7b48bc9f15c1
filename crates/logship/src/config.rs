// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Output configuration: defaults, validation, and option parsing.
//!
//! Every recognized option lives on [`OutputConfig`]; an instance is built
//! from one fully-populated struct rather than an open-ended option list, so
//! there is no ordering-dependent mutation during construction.

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

/// Listener endpoint used when none is configured.
pub const DEFAULT_ENDPOINT: &str = "https://listener.logz.io:8071";

/// Output id used when the host does not supply one.
pub const DEFAULT_OUTPUT_ID: &str = "logship_output_1";

/// Record `type` label applied when a record carries none.
pub const DEFAULT_LOG_TYPE: &str = "logship";

/// Separator substituted for `.` in keys when de-dotting is enabled.
pub const DEFAULT_DEDOT_SEPARATOR: &str = "_";

const MEGABYTE: usize = 1024 * 1024;

/// Bulk size threshold bounds, in megabytes. The listener rejects request
/// bodies above 10MB; the 9MB ceiling leaves a safety margin.
pub const MIN_BULK_THRESHOLD_MB: usize = 1;
/// Upper bound for [`OutputConfig::bulk_threshold_mb`].
pub const MAX_BULK_THRESHOLD_MB: usize = 9;
/// Threshold applied when the configured value is out of range.
pub const DEFAULT_BULK_THRESHOLD_MB: usize = 9;

/// Errors that can occur while configuring an output instance.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("required parameter 'token' is missing")]
    MissingToken,
}

/// Key de-dotting options.
///
/// De-dotting replaces literal `.` characters in field names with
/// [`separator`](Self::separator), so keys do not collide with nested-field
/// notation in the receiving store.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DedotConfig {
    /// Rewrite keys at the top level of each record.
    pub enabled: bool,
    /// Descend into nested mappings; when off, subtrees below the top level
    /// are copied with their keys untouched.
    pub nested: bool,
    /// Replacement for each literal `.`.
    pub separator: String,
}

impl Default for DedotConfig {
    fn default() -> Self {
        DedotConfig {
            enabled: false,
            nested: false,
            separator: DEFAULT_DEDOT_SEPARATOR.to_string(),
        }
    }
}

impl DedotConfig {
    /// Separator actually used for key rewriting.
    ///
    /// An empty separator would make de-dotting a no-op and `.` would make
    /// it destructive; both fall back to the default.
    #[must_use]
    pub fn effective_separator(&self) -> &str {
        if self.separator.is_empty() || self.separator == "." {
            debug!(
                "invalid de-dot separator {:?}, falling back to {:?}",
                self.separator, DEFAULT_DEDOT_SEPARATOR
            );
            DEFAULT_DEDOT_SEPARATOR
        } else {
            &self.separator
        }
    }
}

/// Explicit outbound proxy. When unset, the transport falls back to
/// environment-based proxy discovery.
#[derive(Debug, Clone, Deserialize)]
pub struct ProxyConfig {
    /// Proxy target as `host:port`.
    pub host: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

/// Configuration for one output instance.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Instance identity; outputs are looked up by this id.
    pub id: String,
    /// Listener URL the bulks are POSTed to.
    pub endpoint: String,
    /// Account token, passed as the `token` query parameter. Required.
    pub token: String,
    /// `type` label stamped on records that do not carry one.
    pub log_type: String,
    /// Request per-instance debug logging from the host.
    pub debug: bool,
    pub dedot: DedotConfig,
    pub proxy: Option<ProxyConfig>,
    /// Extra headers sent with every bulk request.
    pub custom_headers: Vec<(String, String)>,
    /// Flush threshold in megabytes, bounded to
    /// [`MIN_BULK_THRESHOLD_MB`]..=[`MAX_BULK_THRESHOLD_MB`].
    pub bulk_threshold_mb: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        OutputConfig {
            id: DEFAULT_OUTPUT_ID.to_string(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            token: String::new(),
            log_type: DEFAULT_LOG_TYPE.to_string(),
            debug: false,
            dedot: DedotConfig::default(),
            proxy: None,
            custom_headers: Vec::new(),
            bulk_threshold_mb: DEFAULT_BULK_THRESHOLD_MB,
        }
    }
}

impl OutputConfig {
    /// Validate the configuration.
    ///
    /// Only a missing token is fatal; every other out-of-range option is
    /// corrected with a warning at the point of use.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.token.trim().is_empty() {
            return Err(ConfigError::MissingToken);
        }
        Ok(())
    }

    /// Instance id, defaulting when the host left it empty.
    #[must_use]
    pub fn resolved_id(&self) -> &str {
        if self.id.is_empty() {
            debug!("using default output id {DEFAULT_OUTPUT_ID:?}");
            DEFAULT_OUTPUT_ID
        } else {
            &self.id
        }
    }

    /// Flush threshold in bytes.
    ///
    /// Out-of-range values never fail configuration; they fall back to the
    /// default with a warning.
    #[must_use]
    pub fn threshold_bytes(&self) -> usize {
        if (MIN_BULK_THRESHOLD_MB..=MAX_BULK_THRESHOLD_MB).contains(&self.bulk_threshold_mb) {
            self.bulk_threshold_mb * MEGABYTE
        } else {
            warn!(
                "bulk size threshold {}MB outside {}..={}MB, falling back to {}MB",
                self.bulk_threshold_mb,
                MIN_BULK_THRESHOLD_MB,
                MAX_BULK_THRESHOLD_MB,
                DEFAULT_BULK_THRESHOLD_MB
            );
            DEFAULT_BULK_THRESHOLD_MB * MEGABYTE
        }
    }
}

/// Parse a `Key:Value,Key2:Value2` header list.
///
/// Malformed entries are skipped and duplicate keys overwrite the earlier
/// value, each with a warning; parsing never fails.
#[must_use]
pub fn parse_custom_headers(list: &str) -> Vec<(String, String)> {
    let mut headers: Vec<(String, String)> = Vec::new();
    for entry in list.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        match entry.split_once(':') {
            Some((key, value)) if !key.trim().is_empty() => {
                let key = key.trim().to_string();
                let value = value.trim().to_string();
                if let Some(existing) = headers.iter_mut().find(|(k, _)| *k == key) {
                    warn!("duplicate header key {key:?}, overwriting previous value");
                    existing.1 = value;
                } else {
                    headers.push((key, value));
                }
            }
            _ => warn!("skipping malformed header entry {entry:?}, expected Key:Value"),
        }
    }
    headers
}
