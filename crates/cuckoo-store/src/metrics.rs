//! Metric names of the store engine data path.

pub const TOTAL_BYTES_READ: &str = "cuckoo.store.total_bytes_read";
pub const TOTAL_BYTES_WRITTEN: &str = "cuckoo.store.total_bytes_written";
pub const READS_SUCCESS: &str = "cuckoo.store.reads_success";
pub const READS_FAILED: &str = "cuckoo.store.reads_failed";
pub const WRITES_SUCCESS: &str = "cuckoo.store.writes_success";
pub const WRITES_FAILED: &str = "cuckoo.store.writes_failed";
pub const BLOCKS_PREFETCHED: &str = "cuckoo.store.blocks_prefetched";
pub const OBJECT_FETCHES: &str = "cuckoo.store.object_fetches";
