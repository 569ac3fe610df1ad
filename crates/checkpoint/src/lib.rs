pub mod store;
pub mod wal;

pub use store::{CheckpointStats, CheckpointStore};
pub use wal::WalCheckpointStore;
