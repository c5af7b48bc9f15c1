//! The seam between the host pipeline and the delivery core.
//!
//! The core needs exactly one capability from a host batch: a cursor over
//! already-decoded records. Modeling that as a trait keeps the core testable
//! against a fake source and never coupled to a real host ABI.

use tracing::{debug, warn};

use crate::client::DeliveryStatus;
use crate::registry::OutputInstance;
use crate::transform::{EventTime, RawRecord};

/// A batch of decoded records; exhaustion signals end-of-batch.
pub trait RecordSource {
    fn next_record(&mut self) -> Option<(EventTime, RawRecord)>;
}

impl<I> RecordSource for I
where
    I: Iterator<Item = (EventTime, RawRecord)>,
{
    fn next_record(&mut self) -> Option<(EventTime, RawRecord)> {
        self.next()
    }
}

/// Drain one batch of records into an output instance and flush.
///
/// Records that cannot be normalized are logged and dropped; the batch
/// continues. A non-ok classification from a threshold-triggered flush ends
/// the batch immediately so the host can schedule redelivery; otherwise the
/// end-of-batch forced flush's classification is returned.
pub async fn deliver_batch<S: RecordSource>(
    instance: &mut OutputInstance,
    tag: &str,
    source: &mut S,
) -> DeliveryStatus {
    debug!("delivering batch for output {:?}", instance.id);

    while let Some((event_time, record)) = source.next_record() {
        let serialized = match instance.transformer.serialize(&event_time, tag, &record) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("dropping malformed record: {e}");
                continue;
            }
        };

        let status = instance.client.append(&serialized).await;
        if status != DeliveryStatus::Ok {
            return status;
        }
    }

    instance.client.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OutputConfig;
    use crate::transform::RawValue;
    use std::collections::HashMap;

    fn instance_for(endpoint: &str) -> OutputInstance {
        OutputInstance::new(&OutputConfig {
            endpoint: endpoint.to_string(),
            token: "test-token".to_string(),
            ..Default::default()
        })
        .unwrap()
    }

    fn record(key: &str, value: &str) -> (EventTime, RawRecord) {
        (
            EventTime::UnixSeconds(1_700_000_000),
            HashMap::from([(key.to_string(), RawValue::String(value.to_string()))]),
        )
    }

    #[tokio::test]
    async fn test_batch_under_threshold_flushes_once() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/")
            .match_query(mockito::Matcher::UrlEncoded(
                "token".into(),
                "test-token".into(),
            ))
            .with_status(200)
            .expect(1)
            .create_async()
            .await;

        let mut instance = instance_for(&server.url());
        let mut source = vec![record("n", "1"), record("n", "2"), record("n", "3")].into_iter();

        let status = deliver_batch(&mut instance, "tag", &mut source).await;

        assert_eq!(status, DeliveryStatus::Ok);
        assert_eq!(instance.client.buffered_bytes(), 0);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_malformed_record_is_dropped_batch_continues() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .expect(1)
            .create_async()
            .await;

        let mut instance = instance_for(&server.url());
        let malformed = (
            EventTime::UnixSeconds(1),
            HashMap::from([("bad".to_string(), RawValue::Float(f64::INFINITY))]),
        );
        let mut source = vec![record("n", "1"), malformed, record("n", "2")].into_iter();

        let status = deliver_batch(&mut instance, "tag", &mut source).await;

        assert_eq!(status, DeliveryStatus::Ok);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_fatal_response_is_surfaced() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/")
            .match_query(mockito::Matcher::Any)
            .with_status(403)
            .create_async()
            .await;

        let mut instance = instance_for(&server.url());
        let mut source = vec![record("n", "1")].into_iter();

        let status = deliver_batch(&mut instance, "tag", &mut source).await;

        assert_eq!(status, DeliveryStatus::Fatal);
    }

    #[tokio::test]
    async fn test_empty_batch_is_ok() {
        // no records, no network: the final flush of an empty buffer is a no-op
        let mut instance = instance_for("http://127.0.0.1:1");
        let mut source = Vec::<(EventTime, RawRecord)>::new().into_iter();

        let status = deliver_batch(&mut instance, "tag", &mut source).await;

        assert_eq!(status, DeliveryStatus::Ok);
    }
}
