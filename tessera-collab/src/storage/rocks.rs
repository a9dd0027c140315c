//! RocksDB-backed durable shape store.
//!
//! Column families:
//! - `shapes`: one record per shape, keyed by id, LZ4-compressed JSON
//!
//! The JSON is the same record the realtime channel carries, so a dump of
//! the column family reads like the shared canvas. An in-memory mirror,
//! loaded on open and updated after every committed write, feeds
//! [`DurableStore::subscribe`] without rescanning the database.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rocksdb::{
    BlockBasedOptions, Cache, ColumnFamilyDescriptor, DBCompressionType, DBWithThreadMode,
    IteratorMode, Options, SingleThreaded, WriteBatch, WriteOptions,
};
use tessera_core::{Shape, ShapeMap, ShapePatch};
use tokio::sync::watch;

use crate::channel::{DurableStore, Subscription};
use crate::error::StoreError;

const CF_SHAPES: &str = "shapes";

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Database directory path
    pub path: PathBuf,
    /// Block cache size in bytes (default: 64MB)
    pub block_cache_size: usize,
    /// Bloom filter bits per key (default: 10)
    pub bloom_filter_bits: i32,
    /// fsync on every write (default: false)
    pub sync_writes: bool,
    /// Max open files for RocksDB (default: 256)
    pub max_open_files: i32,
    /// Write buffer size (default: 16MB)
    pub write_buffer_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("tessera_data"),
            block_cache_size: 64 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 256,
            write_buffer_size: 16 * 1024 * 1024,
        }
    }
}

impl StoreConfig {
    /// Small caches, caller-provided directory.
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            block_cache_size: 8 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 64,
            write_buffer_size: 4 * 1024 * 1024,
        }
    }
}

pub struct RocksStore {
    /// Single-threaded mode; concurrency comes from tokio
    db: DBWithThreadMode<SingleThreaded>,
    config: StoreConfig,
    mirror: watch::Sender<Arc<ShapeMap>>,
}

impl RocksStore {
    /// Open (or create) the store and load the mirror.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_open_files(config.max_open_files);
        db_opts.set_keep_log_file_num(5);
        db_opts.increase_parallelism(num_cpus());

        let cf = ColumnFamilyDescriptor::new(CF_SHAPES, Self::cf_options(&config));
        let db = DBWithThreadMode::<SingleThreaded>::open_cf_descriptors(
            &db_opts,
            &config.path,
            vec![cf],
        )?;

        let shapes = Self::scan(&db)?;
        log::info!("Opened shape store at {} ({} shapes)", config.path.display(), shapes.len());
        let (mirror, _) = watch::channel(Arc::new(shapes));

        Ok(Self { db, config, mirror })
    }

    fn cf_options(config: &StoreConfig) -> Options {
        let mut opts = Options::default();

        let mut block_opts = BlockBasedOptions::default();
        let cache = Cache::new_lru_cache(config.block_cache_size);
        block_opts.set_block_cache(&cache);
        block_opts.set_bloom_filter(config.bloom_filter_bits as f64, false);
        opts.set_block_based_table_factory(&block_opts);

        // Values are already LZ4 framed.
        opts.set_compression_type(DBCompressionType::None);
        opts.set_write_buffer_size(config.write_buffer_size);
        opts.optimize_for_point_lookup(config.block_cache_size as u64);
        opts
    }

    fn scan(db: &DBWithThreadMode<SingleThreaded>) -> Result<ShapeMap, StoreError> {
        let cf = db
            .cf_handle(CF_SHAPES)
            .ok_or_else(|| StoreError::Database(format!("Column family '{CF_SHAPES}' not found")))?;
        let mut shapes = ShapeMap::new();
        for item in db.iterator_cf(&cf, IteratorMode::Start) {
            let (_, value) = item?;
            let shape = decode(&value)?;
            shapes.insert(shape.id.clone(), shape);
        }
        Ok(shapes)
    }

    fn put(&self, shape: &Shape) -> Result<(), StoreError> {
        let cf = self.cf()?;
        let mut batch = WriteBatch::default();
        batch.put_cf(&cf, shape.id.as_bytes(), encode(shape)?);
        self.db.write_opt(batch, &self.write_opts())?;
        Ok(())
    }

    fn write_opts(&self) -> WriteOptions {
        let mut opts = WriteOptions::default();
        opts.set_sync(self.config.sync_writes);
        opts
    }

    fn read(&self, id: &str) -> Result<Option<Shape>, StoreError> {
        let cf = self.cf()?;
        match self.db.get_cf(&cf, id.as_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Number of shapes currently stored.
    pub fn len(&self) -> usize {
        self.mirror.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flush memtables to disk.
    pub fn sync(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    fn cf(&self) -> Result<&rocksdb::ColumnFamily, StoreError> {
        self.db
            .cf_handle(CF_SHAPES)
            .ok_or_else(|| StoreError::Database(format!("Column family '{CF_SHAPES}' not found")))
    }
}

impl DurableStore for RocksStore {
    async fn load_all(&self) -> Result<ShapeMap, StoreError> {
        Self::scan(&self.db)
    }

    async fn save(&self, shape: &Shape) -> Result<(), StoreError> {
        self.put(shape)?;
        self.mirror.send_modify(|shapes| {
            Arc::make_mut(shapes).insert(shape.id.clone(), shape.clone());
        });
        Ok(())
    }

    async fn update(&self, id: &str, patch: &ShapePatch) -> Result<(), StoreError> {
        let mut shape = self
            .read(id)?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        shape.apply_patch(patch);
        self.put(&shape)?;
        log::debug!("Merged patch into {id}");
        self.mirror.send_modify(|shapes| {
            Arc::make_mut(shapes).insert(shape.id.clone(), shape);
        });
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let cf = self.cf()?;
        let mut batch = WriteBatch::default();
        batch.delete_cf(&cf, id.as_bytes());
        self.db.write_opt(batch, &self.write_opts())?;
        self.mirror
            .send_if_modified(|shapes| Arc::make_mut(shapes).remove(id).is_some());
        Ok(())
    }

    fn subscribe(&self) -> Subscription<Arc<ShapeMap>> {
        Subscription::new(self.mirror.subscribe())
    }
}

fn encode(shape: &Shape) -> Result<Vec<u8>, StoreError> {
    let json = serde_json::to_vec(shape)?;
    Ok(lz4_flex::compress_prepend_size(&json))
}

fn decode(bytes: &[u8]) -> Result<Shape, StoreError> {
    let json = lz4_flex::decompress_size_prepended(bytes)
        .map_err(|e| StoreError::Compression(e.to_string()))?;
    Ok(serde_json::from_slice(&json)?)
}

fn num_cpus() -> i32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as i32)
        .unwrap_or(4)
}
