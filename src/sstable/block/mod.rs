pub mod builder;
pub mod reader;

pub use builder::{BlockBuilder, RESTART_INTERVAL};
pub use reader::{Block, BlockIterator};
