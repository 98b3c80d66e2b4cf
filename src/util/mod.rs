pub use buffer::*;
pub use timer::*;

pub mod buffer;
pub mod timer;
