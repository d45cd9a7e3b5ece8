//! Discovery: long-lived subscribers over new-token streams and DEX
//! program logs, with heartbeat supervision and bounded reconnect.

pub mod pools;
pub mod stream;

pub use pools::{
    detect_pool, known_programs, DexProgram, ParsedPoolTx, PoolLogConfig, PoolLogSubscriber,
};
pub use stream::{StreamConfig, StreamStats, TokenStreamSubscriber};
