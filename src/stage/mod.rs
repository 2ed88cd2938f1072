pub mod fanout;
pub mod logic;
pub mod runtime;

pub use fanout::{shard_bucket, text_hash_bucket, FanoutPolicy, ProducerGroup};
pub use logic::{BatchOrigin, StageLogic};
pub use runtime::StageRuntime;
