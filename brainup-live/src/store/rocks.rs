//! RocksDB-backed persistence for the store tree.
//!
//! Column families:
//! - `leaves`: one key per leaf, keyed by its slash-joined path;
//!   value is the bincode-encoded leaf, LZ4 compressed
//! - `meta`  : store-wide counters (last committed revision)
//!
//! Writes for one batch land in one RocksDB `WriteBatch`, so a crash never
//! leaves half a quiz transition on disk. Replacing a subtree deletes the
//! exact key plus the `path/` range before writing the new leaves.

use rocksdb::{
    BlockBasedOptions, Cache, ColumnFamilyDescriptor, DBCompressionType, DBWithThreadMode,
    IteratorMode, Options, SingleThreaded, WriteBatch, WriteOptions,
};
use std::path::{Path, PathBuf};

use super::value::leaves_under;
use super::{ResolvedWrite, StoreError, StorePath, Tree, Value};

const CF_LEAVES: &str = "leaves";
const CF_META: &str = "meta";

const COLUMN_FAMILIES: &[&str] = &[CF_LEAVES, CF_META];

const REVISION_KEY: &[u8] = b"revision";

/// Persistence configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Where the tree lives on disk
    pub path: PathBuf,
    /// Block cache size in bytes (default: 64MB)
    pub block_cache_size: usize,
    /// Bloom bits per key for point lookups on `leaves`
    pub bloom_filter_bits: i32,
    /// Enable fsync on every write (default: false)
    pub sync_writes: bool,
    /// Max open files for RocksDB (default: 256)
    pub max_open_files: i32,
    /// Write buffer size per column family (default: 16MB)
    pub write_buffer_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("brainup_data"),
            block_cache_size: 64 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 256,
            write_buffer_size: 16 * 1024 * 1024,
        }
    }
}

impl StoreConfig {
    /// Small caches for tests.
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

/// Durable copy of the store tree.
pub struct TreeStore {
    db: DBWithThreadMode<SingleThreaded>,
    config: StoreConfig,
}

impl TreeStore {
    /// Open the database, creating it and its column families if missing.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_open_files(config.max_open_files);
        db_opts.set_keep_log_file_num(5);
        db_opts.increase_parallelism(num_cpus());

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Self::cf_options(name, &config)))
            .collect();

        let db = DBWithThreadMode::<SingleThreaded>::open_cf_descriptors(
            &db_opts,
            &config.path,
            cf_descriptors,
        )?;

        log::info!("Opened store database at {}", config.path.display());
        Ok(Self { db, config })
    }

    fn cf_options(name: &str, config: &StoreConfig) -> Options {
        let mut opts = Options::default();

        let mut block_opts = BlockBasedOptions::default();
        let cache = Cache::new_lru_cache(config.block_cache_size);
        block_opts.set_block_cache(&cache);
        block_opts.set_bloom_filter(config.bloom_filter_bits as f64, false);
        opts.set_block_based_table_factory(&block_opts);
        opts.set_write_buffer_size(config.write_buffer_size);

        match name {
            CF_LEAVES => {
                // values are already LZ4 framed
                opts.set_compression_type(DBCompressionType::None);
                opts.set_max_write_buffer_number(4);
            }
            CF_META => {
                opts.set_max_write_buffer_number(2);
                opts.optimize_for_point_lookup(config.block_cache_size as u64);
            }
            _ => {}
        }

        opts
    }

    // ─── Writes ───────────────────────────────────────────────────────

    /// Persist one committed batch and its revision atomically.
    pub fn persist(&self, writes: &[ResolvedWrite], revision: u64) -> Result<(), StoreError> {
        let cf_leaves = self.cf(CF_LEAVES)?;
        let cf_meta = self.cf(CF_META)?;

        let mut batch = WriteBatch::default();
        for write in writes {
            let key = write.path.to_string();
            let (from, to) = subtree_range(&key);
            batch.delete_cf(&cf_leaves, key.as_bytes());
            batch.delete_range_cf(&cf_leaves, from.as_bytes(), to.as_bytes());

            if let Some(value) = &write.value {
                for (leaf_path, leaf) in leaves_under(&write.path, value) {
                    batch.put_cf(&cf_leaves, leaf_path.to_string().as_bytes(), encode_leaf(&leaf)?);
                }
            }
        }
        batch.put_cf(&cf_meta, REVISION_KEY, revision.to_be_bytes());

        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.config.sync_writes);
        self.db.write_opt(batch, &write_opts)?;
        Ok(())
    }

    // ─── Recovery ─────────────────────────────────────────────────────

    /// Rebuild the tree from every persisted leaf.
    pub fn load_tree(&self) -> Result<Tree, StoreError> {
        let cf = self.cf(CF_LEAVES)?;
        let mut tree = Tree::new();

        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (key, value) = item?;
            let key = std::str::from_utf8(&key)
                .map_err(|e| StoreError::Persistence(format!("non-UTF-8 key: {e}")))?;
            let path = StorePath::parse(key)?;
            tree.set(&path, Some(decode_leaf(&value)?));
        }

        Ok(tree)
    }

    /// Last persisted revision, or 0 for a fresh database.
    pub fn revision(&self) -> Result<u64, StoreError> {
        let cf = self.cf(CF_META)?;
        match self.db.get_cf(&cf, REVISION_KEY)? {
            Some(bytes) if bytes.len() == 8 => {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(&bytes);
                Ok(u64::from_be_bytes(buf))
            }
            Some(_) => Err(StoreError::Persistence("corrupt revision counter".into())),
            None => Ok(0),
        }
    }

    pub fn leaf_count(&self) -> Result<usize, StoreError> {
        let cf = self.cf(CF_LEAVES)?;
        let mut count = 0;
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            item?;
            count += 1;
        }
        Ok(count)
    }

    /// Flush memtables to disk.
    pub fn sync(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    // ─── Helpers ──────────────────────────────────────────────────────

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Persistence(format!("Column family '{name}' not found")))
    }
}

/// Key range `[key/, key0)` covering every descendant of `key`.
fn subtree_range(key: &str) -> (String, String) {
    (format!("{key}/"), format!("{key}0"))
}

fn encode_leaf(value: &Value) -> Result<Vec<u8>, StoreError> {
    let encoded = bincode::serde::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| StoreError::Persistence(format!("encode leaf: {e}")))?;
    Ok(lz4_flex::compress_prepend_size(&encoded))
}

fn decode_leaf(bytes: &[u8]) -> Result<Value, StoreError> {
    let raw = lz4_flex::decompress_size_prepended(bytes)
        .map_err(|e| StoreError::Persistence(format!("decompress leaf: {e}")))?;
    let (value, _) = bincode::serde::decode_from_slice(&raw, bincode::config::standard())
        .map_err(|e| StoreError::Persistence(format!("decode leaf: {e}")))?;
    Ok(value)
}

/// Background threads for flush and compaction.
fn num_cpus() -> i32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as i32)
        .unwrap_or(4)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(s: &str) -> StorePath {
        StorePath::parse(s).unwrap()
    }

    fn write(p: &str, value: Option<Value>) -> ResolvedWrite {
        ResolvedWrite {
            path: path(p),
            value,
            pushed: false,
        }
    }

    #[test]
    fn test_open_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = TreeStore::open(StoreConfig::for_testing(dir.path())).unwrap();
        assert!(store.path().exists());
        assert_eq!(store.revision().unwrap(), 0);
        assert!(store.load_tree().unwrap().is_empty());
    }

    #[test]
    fn test_persist_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig::for_testing(dir.path());
        {
            let store = TreeStore::open(config.clone()).unwrap();
            let session = Value::map([
                ("hostId", Value::from("alice")),
                ("started", Value::Bool(false)),
            ]);
            store.persist(&[write("sessions/123456", Some(session))], 1).unwrap();
            store
                .persist(&[write("sessions/123456/started", Some(Value::Bool(true)))], 2)
                .unwrap();
            store.sync().unwrap();
        }

        let store = TreeStore::open(config).unwrap();
        assert_eq!(store.revision().unwrap(), 2);
        let tree = store.load_tree().unwrap();
        assert_eq!(tree.get(&path("sessions/123456/started")), Some(Value::Bool(true)));
        assert_eq!(
            tree.get(&path("sessions/123456/hostId")),
            Some(Value::from("alice"))
        );
    }

    #[test]
    fn test_replacing_subtree_drops_stale_leaves() {
        let dir = tempfile::tempdir().unwrap();
        let store = TreeStore::open(StoreConfig::for_testing(dir.path())).unwrap();

        let before = Value::map([("a", Value::Int(1)), ("b", Value::Int(2))]);
        store.persist(&[write("x", Some(before))], 1).unwrap();
        let after = Value::map([("c", Value::Int(3))]);
        store.persist(&[write("x", Some(after))], 2).unwrap();

        assert_eq!(store.leaf_count().unwrap(), 1);
        let tree = store.load_tree().unwrap();
        assert!(tree.get(&path("x/a")).is_none());
        assert_eq!(tree.get(&path("x/c")), Some(Value::Int(3)));
    }

    #[test]
    fn test_removal_keeps_siblings_with_shared_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let store = TreeStore::open(StoreConfig::for_testing(dir.path())).unwrap();

        store
            .persist(
                &[
                    write("s/1/k", Some(Value::Int(1))),
                    write("s/10/k", Some(Value::Int(10))),
                ],
                1,
            )
            .unwrap();
        store.persist(&[write("s/1", None)], 2).unwrap();

        let tree = store.load_tree().unwrap();
        assert!(tree.get(&path("s/1")).is_none());
        assert_eq!(tree.get(&path("s/10/k")), Some(Value::Int(10)));
    }

    #[test]
    fn test_leaf_codec() {
        let leaf = Value::from("Capital of France?");
        let bytes = encode_leaf(&leaf).unwrap();
        assert_eq!(decode_leaf(&bytes).unwrap(), leaf);
        assert!(decode_leaf(b"garbage").is_err());
    }
}
