pub mod error;
pub mod nn;
pub mod util;

pub use clnet_device as device;
pub use error::{BackpropError, Result};
