//! Shared application state: one instance of each of the four workers
//! wired against the real production backends (SQLite hot/coord tiers,
//! local-disk or S3 cold tier, HTTP upstream client), handed to every
//! axum handler as `axum::extract::State`.

use std::sync::Arc;

use archival::ArchivalCompactor;
use backfill::BackfillEngine;
use cold_store::{
    ColdStore,
    LocalDiskStorage,
    S3Storage,
    Storage,
};
use common::runtime::ProdRuntime;
use coord_store::CoordStore;
use etl_sync::EtlSync;
use hot_store::HotStore;
use query_router::QueryRouter;
use upstream_client::{
    HttpUpstreamApi,
    UpstreamApi,
};

use crate::config::BackendConfig;

/// The cold tier's backend, type-erased behind `Arc<dyn Storage>` so the
/// binary can pick local-disk or S3 at startup without every generic
/// component needing a second monomorphization.
pub type ColdBackend = Arc<dyn Storage>;

#[derive(Clone)]
pub struct AppState {
    pub hot: HotStore,
    pub cold: ColdStore<ColdBackend>,
    pub coord: CoordStore,
    pub upstream: Arc<dyn UpstreamApi>,
    pub etl: Arc<EtlSync<ProdRuntime>>,
    pub backfill: Arc<BackfillEngine<ColdBackend, ProdRuntime>>,
    pub archival: Arc<ArchivalCompactor<ColdBackend, ProdRuntime>>,
    pub query: Arc<QueryRouter<ColdBackend, ProdRuntime>>,
    pub operator_bearer_token: Arc<str>,
    pub runtime: ProdRuntime,
}

impl AppState {
    pub async fn build(config: &BackendConfig) -> anyhow::Result<Self> {
        let runtime = ProdRuntime;
        let hot = HotStore::open(&config.hot_db_path)?;
        let coord = CoordStore::open(&config.hot_db_path)?;

        let backend: ColdBackend = if config.is_s3_cold_storage() {
            let (bucket, prefix) = config.s3_bucket_and_prefix();
            Arc::new(S3Storage::from_env(bucket, prefix).await)
        } else {
            Arc::new(LocalDiskStorage::new(&config.cold_storage_root))
        };
        let cold = ColdStore::new(backend);

        let upstream: Arc<dyn UpstreamApi> =
            Arc::new(HttpUpstreamApi::new(config.upstream_base_url.clone(), config.upstream_bearer_token.clone())?);

        let etl = Arc::new(EtlSync::new(hot.clone(), coord.clone(), upstream.clone(), runtime));
        let backfill = Arc::new(BackfillEngine::new(cold.clone(), coord.clone(), upstream.clone(), runtime));
        let archival = Arc::new(ArchivalCompactor::new(hot.clone(), cold.clone(), coord.clone(), runtime));
        let query = Arc::new(QueryRouter::new(hot.clone(), cold.clone(), Some(upstream.clone()), runtime));

        Ok(Self {
            hot,
            cold,
            coord,
            upstream,
            etl,
            backfill,
            archival,
            query,
            operator_bearer_token: config.operator_bearer_token.as_str().into(),
            runtime,
        })
    }
}
