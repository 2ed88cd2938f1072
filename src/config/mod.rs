//! Per-worker environment configuration (spec §6). Every stage binary
//! reads its own required subset via [`env::load_required_env`], collecting
//! every missing or malformed field into one error before the worker
//! refuses to start.

pub mod env;
pub mod stage;

pub use env::{load_required_env, CommonConfig};
pub use stage::{BatchMaxSize, FilterThresholds, JoinerBarriers};
