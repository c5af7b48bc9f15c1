//! # Logship
//!
//! Bulk delivery of structured log records from a host ingestion pipeline to
//! a remote log-collection listener over HTTPS.
//!
//! ## Architecture
//!
//! ```text
//!    Host pipeline (decoded records)
//!         │
//!         v
//!   ┌──────────────┐
//!   │ Transformer  │  (de-dot keys, enrich, JSON-encode)
//!   └──────┬───────┘
//!          │
//!          v
//!   ┌──────────────┐
//!   │  BulkClient  │  (buffer by size threshold, gzip, POST)
//!   └──────┬───────┘
//!          │
//!          v
//!   ┌──────────────┐
//!   │   Listener   │  (ok / retry / fatal classification)
//!   └──────────────┘
//! ```
//!
//! Records for one output are flushed in append order; the client never
//! retries on its own. Each flush reports a three-valued
//! [`DeliveryStatus`] and redelivery stays with the host scheduler. A
//! process hosts any number of independently configured outputs through the
//! [`OutputRegistry`].
//!
//! ## Modules
//!
//! - [`client`]: bulk buffering, compression, transport, classification
//! - [`transform`]: record normalization into the wire JSON shape
//! - [`registry`]: per-id ownership of configured outputs
//! - [`pipeline`]: the record-source seam toward the host
//! - [`config`]: the full configuration surface and its validation

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]
#![deny(unreachable_pub)]

pub mod client;
pub mod config;
pub mod hostname;
pub mod pipeline;
pub mod registry;
pub mod transform;

pub use client::{BulkClient, DeliveryStatus};
pub use config::{ConfigError, DedotConfig, OutputConfig, ProxyConfig};
pub use pipeline::{deliver_batch, RecordSource};
pub use registry::{OutputInstance, OutputRegistry};
pub use transform::{EventTime, RawRecord, RawValue, TransformError, Transformer};
