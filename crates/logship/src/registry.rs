//! Registry of configured output instances.
//!
//! The registry is the only place multiple concurrently-configured
//! destinations are distinguished; every per-batch dispatch goes through it
//! by instance id. It is an explicit object owned by the embedding service;
//! there is no ambient process-global state.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tokio::sync::Mutex;
use tracing::{debug, error, warn};

use crate::client::{BulkClient, DeliveryStatus};
use crate::config::{ConfigError, OutputConfig, DEFAULT_OUTPUT_ID};
use crate::transform::Transformer;

/// One configured destination: the delivery client and the transformer that
/// shapes records for it.
#[derive(Debug)]
pub struct OutputInstance {
    pub id: String,
    pub client: BulkClient,
    pub transformer: Transformer,
}

impl OutputInstance {
    /// Validate the configuration and build the client/transformer pair.
    pub fn new(config: &OutputConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(OutputInstance {
            id: config.resolved_id().to_string(),
            client: BulkClient::new(config),
            transformer: Transformer::new(config),
        })
    }
}

/// Owns every configured output, keyed by instance id.
///
/// Lookups are concurrent; configuration writes happen at initialization
/// time and take the write lock. Each instance sits behind its own async
/// mutex so batches for different outputs never serialize on each other.
#[derive(Debug, Default)]
pub struct OutputRegistry {
    outputs: RwLock<HashMap<String, Arc<Mutex<OutputInstance>>>>,
}

impl OutputRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the output for `config`'s id, replacing any previous one.
    ///
    /// A missing token fails validation and leaves the registry unchanged;
    /// the instance is not registered.
    pub fn configure(&self, config: &OutputConfig) -> Result<(), ConfigError> {
        let instance = OutputInstance::new(config)?;
        let id = instance.id.clone();

        #[allow(clippy::expect_used)]
        let mut outputs = self.outputs.write().expect("lock poisoned");
        if outputs.contains_key(&id) {
            warn!("output id {id:?} already configured, replacing");
        }
        debug!("registered output {id:?} for endpoint {:?}", config.endpoint);
        outputs.insert(id, Arc::new(Mutex::new(instance)));
        Ok(())
    }

    /// Look up an output by id, defaulting when the caller supplies none.
    #[must_use]
    pub fn get(&self, id: Option<&str>) -> Option<Arc<Mutex<OutputInstance>>> {
        let id = match id {
            Some(id) if !id.is_empty() => id,
            _ => DEFAULT_OUTPUT_ID,
        };
        #[allow(clippy::expect_used)]
        let outputs = self.outputs.read().expect("lock poisoned");
        outputs.get(id).cloned()
    }

    /// Ids of every configured output.
    #[must_use]
    pub fn ids(&self) -> Vec<String> {
        #[allow(clippy::expect_used)]
        let outputs = self.outputs.read().expect("lock poisoned");
        outputs.keys().cloned().collect()
    }

    /// Final forced flush of every configured output.
    ///
    /// Part of the shutdown path: failures are logged and swallowed, so one
    /// broken destination cannot turn process exit into a fault.
    pub async fn flush_all(&self) {
        let instances: Vec<_> = {
            #[allow(clippy::expect_used)]
            let outputs = self.outputs.read().expect("lock poisoned");
            outputs.values().cloned().collect()
        };

        for instance in instances {
            let mut instance = instance.lock().await;
            let status = instance.client.flush().await;
            match status {
                DeliveryStatus::Ok => debug!("final flush for output {:?} done", instance.id),
                _ => error!("final flush for output {:?} failed: {status:?}", instance.id),
            }
        }
    }
}
