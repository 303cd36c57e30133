//! The cold tier: daily compressed chunk objects, keyed
//! `timeseries/{site}/{YYYY}/{MM}/{DD}.ndjson.gz`, sitting on top of the
//! generic [`storage::Storage`] trait. `chunk` owns the codec and the
//! read-merge-dedup-write append semantics; `storage` owns the object-store
//! backends.

pub mod chunk;
pub mod storage;

pub use chunk::{
    chunk_key,
    ChunkMeta,
    ColdStore,
};
pub use storage::{
    LocalDiskStorage,
    ObjectMetadata,
    S3Storage,
    Storage,
};
