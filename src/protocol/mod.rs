pub mod codec;
pub mod constants;
pub mod frame;
pub mod record;

pub use codec::FrameDecoder;
pub use frame::{BatchFrame, EofFrame, Frame};
pub use record::Record;
