/// Common constants used across the recovery sync tool.
///
/// These defaults are used when a configuration file does not provide
/// explicit values.
pub const SOURCE_CONNECTION: &str = "source";
pub const DESTINATION_CONNECTION: &str = "destination";

pub const RECOVERY_DATABASE: &str = "recovery";
pub const QUEUE_COLLECTION: &str = "process-list";
pub const TARGET_COLLECTION: &str = "supercontent_old";

/// Hard page bound for one run; records beyond it wait for the next run.
pub const DEFAULT_PAGE_LIMIT: usize = 2000;

pub const DEFAULT_ADDRESS: &str = "data/recovery";
pub const DEFAULT_POOL_SIZE: u32 = 1;
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 2000;
pub const DEFAULT_CACHE_TTL_SECS: u64 = 60;

/// Store-native identity field of every document.
pub const ID_FIELD: &str = "_id";

pub const DEFAULT_QUEUE_ID_FIELD: &str = "id";
pub const DEFAULT_QUEUE_STATUS_FIELD: &str = "status";
pub const DEFAULT_QUEUE_PAYLOAD_FIELD: &str = "payload";

pub const STATUS_NEW: &str = "new";
pub const STATUS_DELETED: &str = "deleted";

/// Addresses with this prefix open a throwaway in-memory database.
pub const MEMORY_ADDRESS_PREFIX: &str = "memory:";

pub const ENV_PREFIX: &str = "RECOVERY_SYNC";
pub const CONFIG_PATH_ENV: &str = "RECOVERY_SYNC_CONFIG";
pub const DEFAULT_LOG_LEVEL: &str = "info";
