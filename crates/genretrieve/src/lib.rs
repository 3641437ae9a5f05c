//! # genretrieve
//!
//! Facade crate for the `genretrieve` generational vector retrieval engine.
//!
//! Re-exports [`genretrieve_core`] under a single, stable namespace and
//! provides [`Engine`], a small convenience wrapper that wires up the
//! collaborator traits from config so callers don't have to hand-assemble a
//! [`GenerationalStore`] themselves. The `cli` binary (see `src/bin/genretrieve.rs`)
//! is built on top of this same `Engine`.

pub mod core {
    pub use genretrieve_core::*;
}

pub use genretrieve_core::prelude::*;

use std::sync::Arc;

use genretrieve_core::collaborators::{Clock, CrossEncoder, DefaultTokeniser, Embedder, SystemClock, TextGenerator};
use genretrieve_core::persistence::{Directory, FsDirectory};

/// A ready-to-use store opened against the local filesystem with the
/// default tokeniser and system clock. Embedding (and optionally
/// reranking/generation) are supplied by the caller, since those are the
/// collaborators genretrieve has no opinion about.
pub struct Engine {
    pub store: Arc<GenerationalStore>,
}

impl Engine {
    /// Open a store rooted at `config.root_dir` on the real filesystem.
    pub async fn open(
        config: Config,
        embedder: Arc<dyn Embedder>,
        text_generator: Option<Arc<dyn TextGenerator>>,
        cross_encoder: Option<Arc<dyn CrossEncoder>>,
    ) -> StoreResult<Self> {
        let directory: Arc<dyn Directory> =
            Arc::new(FsDirectory::new(config.root_dir.clone()).map_err(StoreError::from)?);
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let store = GenerationalStore::open(
            config,
            directory,
            embedder,
            Arc::new(DefaultTokeniser),
            text_generator,
            cross_encoder,
            clock,
        )
        .await?;
        store.start_scheduler().await;
        Ok(Self { store })
    }
}

pub mod prelude {
    pub use crate::core::ann::{AnnParams, AnnType};
    pub use crate::core::collaborators::{Clock, CrossEncoder, Embedder, TextGenerator, Tokeniser};
    pub use crate::core::config::Config;
    pub use crate::core::error::{StoreError, StoreResult};
    pub use crate::core::filtering::{DocumentMetadata, FilterPredicate, MetadataValue};
    pub use crate::core::store::{GenerationalStore, SearchResult};
    pub use crate::core::strategies::RetrievalStrategy;
    pub use crate::core::DocId;
    pub use crate::Engine;
}
