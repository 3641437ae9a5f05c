//! Keeps the BM25 inverted index in sync with the vector tiers.
//!
//! Sync protocol (spec.md §4.9): on open, if the persisted index's
//! `last_synced_vector_count` is behind the routing table's total, the
//! manager incrementally indexes the missing `doc_id`s. On every write it
//! updates in memory immediately and schedules an async flush, batched
//! every `flush_interval` (default 30s) rather than persisting per write.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};

use crate::bm25::{Bm25Params, InvertedIndex};
use crate::collaborators::Tokeniser;
use crate::error::StoreResult;
use crate::persistence::Directory;
use crate::DocId;

enum FlushSignal {
    Dirty,
    Shutdown,
}

/// Owns the in-memory [`InvertedIndex`] plus the background flush task.
pub struct Bm25IndexManager {
    index: Arc<Mutex<InvertedIndex>>,
    tokeniser: Arc<dyn Tokeniser>,
    params: Bm25Params,
    flush_tx: mpsc::UnboundedSender<FlushSignal>,
}

impl Bm25IndexManager {
    pub fn new(
        index: InvertedIndex,
        tokeniser: Arc<dyn Tokeniser>,
        params: Bm25Params,
        dir: Arc<dyn Directory>,
        path: String,
        flush_interval: Duration,
    ) -> Self {
        let index = Arc::new(Mutex::new(index));
        let (flush_tx, mut flush_rx) = mpsc::unbounded_channel::<FlushSignal>();

        let flush_index = index.clone();
        tokio::spawn(async move {
            let mut dirty = false;
            loop {
                tokio::select! {
                    signal = flush_rx.recv() => {
                        match signal {
                            Some(FlushSignal::Dirty) => dirty = true,
                            Some(FlushSignal::Shutdown) | None => break,
                        }
                    }
                    _ = tokio::time::sleep(flush_interval) => {
                        if dirty {
                            let guard = flush_index.lock().await;
                            if let Ok(bytes) = postcard::to_allocvec(&*guard) {
                                let _ = dir.atomic_write(&path, &bytes);
                            }
                            dirty = false;
                        }
                    }
                }
            }
        });

        Self {
            index,
            tokeniser,
            params,
            flush_tx,
        }
    }

    /// Tokenise and index one document's content.
    pub async fn index_document(&self, doc_id: DocId, content: &str) {
        let terms = self.tokeniser.tokenise(content);
        let mut idx = self.index.lock().await;
        idx.add_document(doc_id, &terms);
        let _ = self.flush_tx.send(FlushSignal::Dirty);
    }

    pub async fn remove_document(&self, doc_id: DocId) {
        let mut idx = self.index.lock().await;
        idx.remove_document(doc_id);
        let _ = self.flush_tx.send(FlushSignal::Dirty);
    }

    pub async fn search(&self, query: &str, k: usize) -> Vec<(DocId, f32)> {
        let terms = self.tokeniser.tokenise(query);
        let idx = self.index.lock().await;
        idx.retrieve(&terms, k, self.params)
    }

    pub async fn last_synced_vector_count(&self) -> u32 {
        self.index.lock().await.num_docs()
    }

    /// Incrementally index every `(doc_id, content)` the caller reports as
    /// missing. Called at open when the persisted count trails the routing
    /// table's total.
    pub async fn catch_up<F, Fut>(&self, missing: Vec<DocId>, fetch_content: F) -> StoreResult<()>
    where
        F: Fn(DocId) -> Fut,
        Fut: std::future::Future<Output = Option<String>>,
    {
        for doc_id in missing {
            if let Some(content) = fetch_content(doc_id).await {
                self.index_document(doc_id, &content).await;
            }
        }
        Ok(())
    }

    pub fn shutdown(&self) {
        let _ = self.flush_tx.send(FlushSignal::Shutdown);
    }
}
