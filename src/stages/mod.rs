//! Concrete per-query stage implementations (spec §4.5-§4.9): cleaner,
//! filter, mapper, reducer, and sorter are `StageLogic` driven by
//! `StageRuntime`; the joiner and the output builder own their run loops
//! directly against `BrokerAdapter`, since neither fits a single fixed
//! downstream endpoint set.

pub mod cleaner;
pub mod filter;
pub mod joiner;
pub mod mapper;
pub mod output_builder;
pub mod reducer;
pub mod sorter;

pub use cleaner::Cleaner;
pub use filter::{Filter, FilterPredicate};
pub use joiner::{Joiner, JoinerConfig};
pub use mapper::{Mapper, MapperFunction};
pub use output_builder::{OutputBuilder, OutputBuilderConfig};
pub use reducer::{ReduceFn, Reducer, ReducerConfig};
pub use sorter::{Sorter, SorterConfig};
