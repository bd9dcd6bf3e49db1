pub mod archive;
pub mod codec;
pub mod storage;

pub use archive::{unpack, ArchiveEntry, MoonReader, MoonWriter};
pub use storage::{KvCacheRecord, ModelAssets};
