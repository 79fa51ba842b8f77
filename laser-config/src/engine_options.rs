use serde::{Deserialize, Serialize};

/// Storage-engine tuning knobs. Mirrors the handful of rocksdb-style options
/// the core needs to reopen an engine instance with; anything more exotic is
/// the engine's own business.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct EngineOptions {
    /// Size, in bytes, of a single memtable before it's flushed.
    pub write_buffer_size: u64,
    /// Number of memtables to keep in memory before stalling writes.
    pub max_write_buffer_number: u32,
    /// Block cache size, in bytes, shared across column families.
    pub block_cache_size: u64,
    /// Number of background compaction/flush threads.
    pub max_background_jobs: u32,
    /// Number of level-0 files that triggers compaction.
    pub level0_file_num_compaction_trigger: u32,
    /// Use direct I/O for flush and compaction.
    pub use_direct_io: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            write_buffer_size: 64 * 1024 * 1024,
            max_write_buffer_number: 4,
            block_cache_size: 256 * 1024 * 1024,
            max_background_jobs: 2,
            level0_file_num_compaction_trigger: 4,
            use_direct_io: false,
        }
    }
}

/// A named bundle of tuning options, with a version tag. A table or node
/// references a profile by name; bumping `version` is what tells a mounted
/// partition that it must re-open its engine with new options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TuningProfile {
    pub version: u32,
    #[serde(default)]
    pub options: EngineOptions,
}
