//! Bulk delivery to the listener: buffering, compression, transport, and
//! response classification.
//!
//! ```text
//!   append ──> [ bulk buffer ] ──(threshold crossed / forced flush)──┐
//!                                                                    │
//!                                                                    v
//!                                  gzip ──> HTTP POST ──> classify outcome
//! ```
//!
//! The client performs no internal retries. Every flush attempt reports one
//! of three classifications and unconditionally clears the buffer; redelivery
//! policy belongs to the host pipeline, which must not have data silently
//! dropped or resent behind its scheduler.

use std::io::Write;
use std::time::Duration;

use flate2::write::GzEncoder;
use flate2::Compression;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_ENCODING, CONTENT_TYPE};
use tracing::{debug, error, warn};

use crate::config::OutputConfig;

/// Fixed request timeout. The listener may be cold; a stalled request must
/// not hold up the pipeline longer than this.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// How much of an error response body is kept for diagnostics.
const MAX_LOGGED_BODY_BYTES: usize = 512;

/// Classification of one delivery attempt, surfaced to the host pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    /// Payload accepted (or nothing to send).
    Ok,
    /// Transient failure; the same records may safely be redelivered later.
    Retry,
    /// Permanent failure; redelivering the same request is pointless.
    Fatal,
}

/// HTTP client that accumulates serialized records and ships them as
/// gzip-compressed newline-delimited bulks.
#[derive(Debug)]
pub struct BulkClient {
    endpoint: String,
    token: String,
    headers: HeaderMap,
    threshold_bytes: usize,
    client: reqwest::Client,
    bulk: Vec<u8>,
}

impl BulkClient {
    /// Build a client from a validated output configuration.
    #[must_use]
    pub fn new(config: &OutputConfig) -> Self {
        Self::with_threshold_bytes(config, config.threshold_bytes())
    }

    /// Build a client with an exact byte threshold, bypassing the megabyte
    /// bounds. Used by tests and embedders with custom sizing.
    #[must_use]
    pub fn with_threshold_bytes(config: &OutputConfig, threshold_bytes: usize) -> Self {
        BulkClient {
            endpoint: config.endpoint.clone(),
            token: config.token.clone(),
            headers: custom_header_map(&config.custom_headers),
            threshold_bytes,
            client: build_http_client(config),
            bulk: Vec::new(),
        }
    }

    /// Bytes currently buffered and not yet shipped.
    #[must_use]
    pub fn buffered_bytes(&self) -> usize {
        self.bulk.len()
    }

    /// Append one serialized record to the bulk.
    ///
    /// If the record plus its newline separator would push the buffer past
    /// the threshold, the buffer is flushed first and the record goes into
    /// the emptied buffer. No single bulk exceeds the threshold, and an
    /// oversized record is still accepted (it ships as the next full bulk).
    /// A non-ok classification from that flush is returned immediately; the
    /// record is not appended and the host decides about redelivery.
    pub async fn append(&mut self, record: &[u8]) -> DeliveryStatus {
        if self.bulk.len() + record.len() + 1 > self.threshold_bytes {
            let status = self.flush().await;
            if status != DeliveryStatus::Ok {
                return status;
            }
        }
        debug!("adding record to the bulk ({} bytes)", record.len());
        self.bulk.extend_from_slice(record);
        self.bulk.push(b'\n');
        DeliveryStatus::Ok
    }

    /// Force an out-of-cycle flush of whatever is buffered.
    ///
    /// The buffer is cleared regardless of the outcome: a failed bulk is
    /// dropped rather than replayed by the client, and the classification
    /// tells the host whether redelivery is worthwhile.
    pub async fn flush(&mut self) -> DeliveryStatus {
        let status = self.send_bulk().await;
        self.bulk.clear();
        status
    }

    async fn send_bulk(&self) -> DeliveryStatus {
        if self.bulk.is_empty() {
            return DeliveryStatus::Ok;
        }

        let payload = match compress(&self.bulk) {
            Ok(payload) => payload,
            Err(e) => {
                // the same bytes may compress on a later attempt
                error!("failed to gzip bulk (retryable): {e}");
                return DeliveryStatus::Retry;
            }
        };

        let url = format!("{}/?token={}", self.endpoint, self.token);
        let response = self
            .client
            .post(&url)
            .headers(self.headers.clone())
            .header(CONTENT_TYPE, "application/json")
            .header(CONTENT_ENCODING, "gzip")
            .body(payload)
            .send()
            .await;

        match response {
            Ok(response) => classify(response).await,
            Err(e) => {
                warn!("request to listener failed (retryable): {e}");
                DeliveryStatus::Retry
            }
        }
    }
}

/// Map a listener response onto a delivery classification.
///
/// 2xx is accepted, 5xx may be retried, everything else (1xx, 3xx, 4xx)
/// means the request itself is rejected. The body is diagnostics only;
/// failing to read it never changes the outcome.
async fn classify(response: reqwest::Response) -> DeliveryStatus {
    let status = response.status();
    if status.is_success() {
        debug!("bulk accepted by listener ({status})");
        return DeliveryStatus::Ok;
    }

    let body = match response.text().await {
        Ok(body) => truncate_for_log(&body),
        Err(e) => {
            warn!("failed to read listener response body: {e}");
            String::new()
        }
    };

    if status.as_u16() >= 500 {
        warn!("listener returned retryable status {status}: {body}");
        DeliveryStatus::Retry
    } else {
        error!("listener returned non-retryable status {status}: {body}");
        DeliveryStatus::Fatal
    }
}

fn build_http_client(config: &OutputConfig) -> reqwest::Client {
    match build_http_client_inner(config) {
        Ok(client) => client,
        Err(e) => {
            error!("unable to apply transport configuration: {e}, using a direct client");
            reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_else(|_| reqwest::Client::new())
        }
    }
}

fn build_http_client_inner(config: &OutputConfig) -> Result<reqwest::Client, reqwest::Error> {
    let mut builder = reqwest::Client::builder().timeout(REQUEST_TIMEOUT);

    // An explicit proxy overrides environment discovery; with none set,
    // reqwest applies HTTPS_PROXY and friends on its own.
    if let Some(proxy) = &config.proxy {
        if !proxy.host.is_empty() {
            let mut proxy_target = reqwest::Proxy::all(format!("http://{}", proxy.host))?;
            if let (Some(user), Some(password)) = (&proxy.user, &proxy.password) {
                proxy_target = proxy_target.basic_auth(user, password);
            }
            debug!("routing listener traffic through proxy {}", proxy.host);
            builder = builder.proxy(proxy_target);
        }
    }

    builder.build()
}

fn custom_header_map(headers: &[(String, String)]) -> HeaderMap {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (key, value) in headers {
        match (
            HeaderName::from_bytes(key.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                map.insert(name, value);
            }
            _ => warn!("skipping invalid custom header {key:?}"),
        }
    }
    map
}

fn compress(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 3), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

fn truncate_for_log(body: &str) -> String {
    if body.len() <= MAX_LOGGED_BODY_BYTES {
        return body.to_string();
    }
    let mut end = MAX_LOGGED_BODY_BYTES;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}
