// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Ships newline-delimited JSON records from stdin to the configured
//! listener(s). One record per line; the process performs a final forced
//! flush of every configured output before exiting.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::env;
use std::sync::Arc;

use chrono::Utc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use logship::{
    config::parse_custom_headers, deliver_batch, DedotConfig, DeliveryStatus, EventTime,
    OutputConfig, OutputInstance, OutputRegistry, ProxyConfig, RawRecord, RawValue,
};

/// Records accumulated before one delivery batch is dispatched.
const BATCH_SIZE: usize = 500;

#[tokio::main]
pub async fn main() {
    let log_level = env::var("LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());
    let log_level = if env_flag("LOGSHIP_DEBUG") {
        "debug".to_string()
    } else {
        log_level
    };

    let env_filter = format!("h2=off,hyper=off,rustls=off,{log_level}");

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).expect("could not parse log level in configuration"),
        )
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .without_time()
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let registry = Arc::new(OutputRegistry::new());

    let mut configured = 0;
    match registry.configure(&config_from_env()) {
        Ok(()) => configured += 1,
        Err(e) => error!("primary output not registered: {e}"),
    }
    for extra in extra_outputs_from_env() {
        match registry.configure(&extra) {
            Ok(()) => configured += 1,
            Err(e) => error!("output {:?} not registered: {e}", extra.id),
        }
    }
    if configured == 0 {
        error!("no outputs configured, shutting down");
        return;
    }

    let tag = env::var("LOGSHIP_TAG").unwrap_or_else(|_| "stdin".to_string());
    let output_id = env::var("LOGSHIP_OUTPUT_ID").ok();
    let Some(instance) = registry.get(output_id.as_deref()) else {
        error!("output {output_id:?} is not configured, shutting down");
        return;
    };

    info!(
        "shipping stdin records as {tag:?} through outputs {:?}",
        registry.ids()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut batch: Vec<(EventTime, RawRecord)> = Vec::with_capacity(BATCH_SIZE);

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                if let Some(record) = decode_record(&line) {
                    batch.push((EventTime::Timestamp(Utc::now()), record));
                }
                if batch.len() >= BATCH_SIZE {
                    dispatch(&instance, &tag, &mut batch).await;
                }
            }
            Ok(None) => break,
            Err(e) => {
                error!("failed to read from stdin: {e}");
                break;
            }
        }
    }

    dispatch(&instance, &tag, &mut batch).await;
    registry.flush_all().await;
    debug!("all outputs flushed, exiting");
}

async fn dispatch(
    instance: &Arc<Mutex<OutputInstance>>,
    tag: &str,
    batch: &mut Vec<(EventTime, RawRecord)>,
) {
    if batch.is_empty() {
        return;
    }
    let count = batch.len();
    let mut source = batch.drain(..);
    let mut instance = instance.lock().await;
    match deliver_batch(&mut instance, tag, &mut source).await {
        DeliveryStatus::Ok => debug!("delivered batch of {count} records"),
        DeliveryStatus::Retry => {
            // stdin has no redelivery; the drop is the listener's loss to report
            warn!("batch of {count} records hit a retryable failure and was dropped");
        }
        DeliveryStatus::Fatal => {
            error!("batch of {count} records rejected by the listener");
        }
    }
}

fn decode_record(line: &str) -> Option<RawRecord> {
    match serde_json::from_str::<serde_json::Value>(line) {
        Ok(value) => match RawValue::from(value) {
            RawValue::Map(record) => Some(record),
            _ => {
                warn!("skipping non-object record");
                None
            }
        },
        Err(e) => {
            warn!("skipping unparsable line: {e}");
            None
        }
    }
}

fn env_flag(key: &str) -> bool {
    env::var(key)
        .map(|val| val.to_lowercase() == "true")
        .unwrap_or(false)
}

fn config_from_env() -> OutputConfig {
    let defaults = OutputConfig::default();
    OutputConfig {
        id: env::var("LOGSHIP_OUTPUT_ID").unwrap_or(defaults.id),
        endpoint: env::var("LOGSHIP_URL").unwrap_or(defaults.endpoint),
        token: env::var("LOGSHIP_TOKEN").unwrap_or_default(),
        log_type: env::var("LOGSHIP_TYPE").unwrap_or(defaults.log_type),
        debug: env_flag("LOGSHIP_DEBUG"),
        dedot: DedotConfig {
            enabled: env_flag("LOGSHIP_DEDOT_ENABLED"),
            nested: env_flag("LOGSHIP_DEDOT_NESTED"),
            separator: env::var("LOGSHIP_DEDOT_SEPARATOR").unwrap_or(defaults.dedot.separator),
        },
        proxy: env::var("LOGSHIP_PROXY_HOST")
            .ok()
            .filter(|host| !host.is_empty())
            .map(|host| ProxyConfig {
                host,
                user: env::var("LOGSHIP_PROXY_USER").ok(),
                password: env::var("LOGSHIP_PROXY_PASSWORD").ok(),
            }),
        custom_headers: env::var("LOGSHIP_HEADERS")
            .map(|list| parse_custom_headers(&list))
            .unwrap_or_default(),
        bulk_threshold_mb: env::var("LOGSHIP_BULK_SIZE_MB")
            .ok()
            .and_then(|val| val.parse().ok())
            .unwrap_or(defaults.bulk_threshold_mb),
    }
}

/// Additional outputs as a JSON array of output configurations in
/// `LOGSHIP_OUTPUTS`. Invalid JSON is ignored with an error.
fn extra_outputs_from_env() -> Vec<OutputConfig> {
    let Ok(raw) = env::var("LOGSHIP_OUTPUTS") else {
        return Vec::new();
    };
    match serde_json::from_str::<Vec<OutputConfig>>(&raw) {
        Ok(outputs) => outputs,
        Err(e) => {
            error!("ignoring LOGSHIP_OUTPUTS, not a valid output list: {e}");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_record_object() {
        let record = decode_record(r#"{"message":"hello","n":1}"#).unwrap();
        assert_eq!(
            record.get("message"),
            Some(&RawValue::String("hello".to_string()))
        );
        assert_eq!(record.get("n"), Some(&RawValue::Int(1)));
    }

    #[test]
    fn test_decode_record_rejects_non_objects() {
        assert!(decode_record("42").is_none());
        assert!(decode_record("not json at all").is_none());
        assert!(decode_record("[1,2,3]").is_none());
    }

    #[test]
    fn test_env_flag_parsing() {
        env::set_var("LOGSHIP_TEST_FLAG", "TRUE");
        assert!(env_flag("LOGSHIP_TEST_FLAG"));
        env::set_var("LOGSHIP_TEST_FLAG", "no");
        assert!(!env_flag("LOGSHIP_TEST_FLAG"));
        env::remove_var("LOGSHIP_TEST_FLAG");
        assert!(!env_flag("LOGSHIP_TEST_FLAG"));
    }
}
