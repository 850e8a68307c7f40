// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Decode stage: raw cache documents → final mirror rows.
//!
//! Controllers hand batches ([`DecodePackage`]) to one shared work channel.
//! A fixed pool of workers pulls packages in arrival order, so a type with a
//! huge delta cannot hold every worker while other types wait behind it.
//! Results flow back on the package's own reply channel.
//!
//! ```text
//! controller ──package──▶ [shared queue] ──▶ worker 0..N ──DecodedItem──▶ controller
//! ```

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::SyncError;
use crate::id::Id;
use crate::registry::TypeDescriptor;
use crate::row::Row;

/// One cache document waiting to be decoded.
#[derive(Debug, Clone)]
pub struct DecodeItem {
    /// Internal form of the cache key
    pub id: Id,
    pub raw: Vec<u8>,
    /// Checksum advertised by the cache checksum map
    pub checksum: Option<Id>,
}

/// A batch of documents of one type.
pub struct DecodePackage {
    pub descriptor: Arc<TypeDescriptor>,
    /// Environment snapshot taken at the start of the tick
    pub environment_id: Id,
    pub items: Vec<DecodeItem>,
    pub reply: mpsc::Sender<DecodedItem>,
}

/// Outcome for one document.
#[derive(Debug)]
pub struct DecodedItem {
    pub id: Id,
    pub result: Result<Vec<Box<dyn Row>>, SyncError>,
}

/// Decode one document into its final rows.
///
/// The document's own id must equal the cache key; a document without one
/// takes the key. The environment id always comes from the tick snapshot and
/// missing checksums are filled from the cache's checksum map, both before
/// fan-out, so expanded children inherit them.
pub fn decode_item(
    descriptor: &TypeDescriptor,
    environment_id: &Id,
    item: &DecodeItem,
) -> Result<Vec<Box<dyn Row>>, SyncError> {
    let mut row = descriptor.new_row();
    row.decode(&item.raw)
        .map_err(|e| SyncError::decode(descriptor.object_type, &item.id, e))?;

    if row.id().is_empty() {
        row.set_id(item.id.clone());
    } else if row.id() != &item.id {
        return Err(SyncError::ChecksumMismatch {
            object_type: descriptor.object_type.to_string(),
            expected: item.id.to_hex(),
            actual: row.id().to_hex(),
        });
    }

    // Selects are scoped to the snapshot environment, so a row stored under
    // any other value would be invisible to the next diff.
    if row.environment_id() != environment_id {
        if !row.environment_id().is_empty() {
            debug!(
                object_type = descriptor.object_type,
                id = %item.id,
                document_env = %row.environment_id(),
                env = %environment_id,
                "Document environment overridden by snapshot"
            );
        }
        row.set_environment_id(environment_id.clone());
    }

    if descriptor.has_checksum && row.checksum().is_none() {
        if let Some(checksum) = &item.checksum {
            row.set_checksum(checksum.clone());
        }
    }

    Ok(row.expand())
}

/// Shared pool of decode workers.
pub struct DecodePool {
    sender: mpsc::Sender<DecodePackage>,
    workers: Vec<JoinHandle<()>>,
}

impl DecodePool {
    /// Spawn `workers` tasks on the current runtime.
    #[must_use]
    pub fn spawn(workers: usize, cancel: CancellationToken) -> Self {
        let workers = workers.max(1);
        let (sender, receiver) = mpsc::channel(workers * 2);
        let receiver = Arc::new(Mutex::new(receiver));

        let handles = (0..workers)
            .map(|index| tokio::spawn(worker(index, Arc::clone(&receiver), cancel.clone())))
            .collect();

        info!(workers, "Decode pool started");
        Self {
            sender,
            workers: handles,
        }
    }

    #[must_use]
    pub fn sender(&self) -> mpsc::Sender<DecodePackage> {
        self.sender.clone()
    }

    /// Close the queue and wait for workers to finish what they hold.
    pub async fn shutdown(self) {
        drop(self.sender);
        for handle in self.workers {
            if let Err(e) = handle.await {
                if e.is_panic() {
                    std::panic::resume_unwind(e.into_panic());
                }
            }
        }
        debug!("Decode pool stopped");
    }
}

async fn worker(index: usize, queue: Arc<Mutex<mpsc::Receiver<DecodePackage>>>, cancel: CancellationToken) {
    loop {
        // Hold the queue lock only while waiting for the next package.
        let package = {
            let mut queue = queue.lock().await;
            tokio::select! {
                _ = cancel.cancelled() => None,
                package = queue.recv() => package,
            }
        };
        let Some(package) = package else {
            break;
        };

        let DecodePackage {
            descriptor,
            environment_id,
            items,
            reply,
        } = package;

        for item in &items {
            let result = decode_item(&descriptor, &environment_id, item);
            let decoded = DecodedItem {
                id: item.id.clone(),
                result,
            };
            if reply.send(decoded).await.is_err() {
                // Controller went away (cancelled tick).
                break;
            }
        }
    }
    debug!(worker = index, "Decode worker exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;

    fn item(id: u8, raw: &str) -> DecodeItem {
        DecodeItem {
            id: Id::from_bytes(vec![id]),
            raw: raw.as_bytes().to_vec(),
            checksum: None,
        }
    }

    #[test]
    fn test_decode_fills_missing_environment() {
        let registry = Registry::builtin().unwrap();
        let customvar = registry.get("customvar").unwrap();
        let env = Id::from_bytes(vec![0xee]);

        let rows = decode_item(customvar, &env, &item(0xaa, r#"{"name":"os","value":"\"linux\""}"#)).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id().as_bytes(), &[0xaa]);
        assert_eq!(rows[0].environment_id(), &env);
    }

    #[test]
    fn test_decode_overrides_document_environment() {
        let registry = Registry::builtin().unwrap();
        let range = registry.get("timeperiod_range").unwrap();
        let env = Id::from_bytes(vec![0xee]);

        let rows = decode_item(
            range,
            &env,
            &item(0xab, r#"{"environment_id":"ff","ranges":{"monday":"00:00-24:00"}}"#),
        )
        .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].environment_id(), &env);
    }

    #[test]
    fn test_decode_rejects_foreign_id() {
        let registry = Registry::builtin().unwrap();
        let customvar = registry.get("customvar").unwrap();
        let err = decode_item(
            customvar,
            &Id::default(),
            &item(0xaa, r#"{"id":"bb","name":"os","value":"1"}"#),
        )
        .unwrap_err();
        assert!(matches!(err, SyncError::ChecksumMismatch { .. }));
        assert!(err.is_row_level());
    }

    #[test]
    fn test_decode_error_names_the_row() {
        let registry = Registry::builtin().unwrap();
        let customvar = registry.get("customvar").unwrap();
        let err = decode_item(customvar, &Id::default(), &item(0xaa, "{not json")).unwrap_err();
        match err {
            SyncError::Decode { object_type, id, .. } => {
                assert_eq!(object_type, "customvar");
                assert_eq!(id, "aa");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_checksum_backfill() {
        let registry = Registry::builtin().unwrap();
        let endpoint = registry.get("endpoint").unwrap();
        let mut doc = item(0xaa, r#"{"id":"aa","environment_id":"ee","name":"master"}"#);
        doc.checksum = Some(Id::from_bytes(vec![0x22]));

        let rows = decode_item(endpoint, &Id::default(), &doc).unwrap();
        assert_eq!(rows[0].checksum(), Some(&Id::from_bytes(vec![0x22])));
    }

    #[test]
    fn test_fan_out_inherits_snapshot_values() {
        let registry = Registry::builtin().unwrap();
        let ranges = registry.get("timeperiod_range").unwrap();
        let mut doc = item(0xab, r#"{"ranges":{"monday":"00:00-24:00","friday":"08:00-12:00"}}"#);
        doc.checksum = Some(Id::from_bytes(vec![0x77]));
        let env = Id::from_bytes(vec![0xee]);

        let rows = decode_item(ranges, &env, &doc).unwrap();
        assert_eq!(rows.len(), 2);
        for row in &rows {
            assert_eq!(row.environment_id(), &env);
            assert_eq!(row.checksum(), Some(&Id::from_bytes(vec![0x77])));
        }
    }

    #[tokio::test]
    async fn test_pool_decodes_packages() {
        let registry = Registry::builtin().unwrap();
        let customvar = Arc::clone(registry.get("customvar").unwrap());
        let pool = DecodePool::spawn(3, CancellationToken::new());

        let (reply, mut results) = mpsc::channel(16);
        let items = (1..=5u8)
            .map(|i| item(i, r#"{"name":"n","value":"v"}"#))
            .collect();
        pool.sender()
            .send(DecodePackage {
                descriptor: customvar,
                environment_id: Id::from_bytes(vec![0xee]),
                items,
                reply,
            })
            .await
            .unwrap();

        let mut seen = Vec::new();
        while let Some(decoded) = results.recv().await {
            assert!(decoded.result.is_ok());
            seen.push(decoded.id);
        }
        assert_eq!(seen.len(), 5);
        pool.shutdown().await;
    }
}
