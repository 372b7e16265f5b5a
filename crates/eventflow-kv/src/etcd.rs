//! etcd-backed KV store, the production metadata backend.
//!
//! `etcd_client::Client` is cheap to clone (it shares the underlying
//! channel), so each operation clones the client instead of holding a
//! lock across the await.

use async_trait::async_trait;
use bytes::Bytes;
use etcd_client::{Client, GetOptions};
use tracing::debug;

use crate::{
    error::{Error, Result},
    KvClient, KvPair,
};

pub struct EtcdKvStore {
    client: Client,
}

impl EtcdKvStore {
    /// Connects to the etcd cluster at `endpoints`.
    pub async fn connect(endpoints: Vec<String>) -> Result<Self> {
        let client = Client::connect(&endpoints, None)
            .await
            .map_err(|e| Error::Transient(e.to_string()))?;
        debug!(endpoints = ?endpoints, "connected to etcd");
        Ok(Self { client })
    }
}

#[async_trait]
impl KvClient for EtcdKvStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let mut client = self.client.clone();
        let resp = client
            .get(key, None)
            .await
            .map_err(|e| Error::Transient(e.to_string()))?;
        Ok(resp
            .kvs()
            .first()
            .map(|kv| Bytes::copy_from_slice(kv.value())))
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
        let mut client = self.client.clone();
        client
            .put(key, value, None)
            .await
            .map_err(|e| Error::Transient(e.to_string()))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut client = self.client.clone();
        client
            .delete(key, None)
            .await
            .map_err(|e| Error::Transient(e.to_string()))?;
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<KvPair>> {
        let mut client = self.client.clone();
        let resp = client
            .get(prefix, Some(GetOptions::new().with_prefix()))
            .await
            .map_err(|e| Error::Transient(e.to_string()))?;
        let pairs = resp
            .kvs()
            .iter()
            .map(|kv| {
                Ok(KvPair {
                    key: kv
                        .key_str()
                        .map_err(|e| Error::Transient(e.to_string()))?
                        .to_string(),
                    value: Bytes::copy_from_slice(kv.value()),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(pairs)
    }
}
