pub mod backend;
pub mod context;
pub mod error;
#[cfg(feature = "ndarray-backend")]
pub mod ndarr;

pub use backend::{BinaryKernel, BufferId, DeviceBackend};
pub use context::{DeviceBuffer, ExecutionContext, HostRegion};
pub use error::DeviceError;
#[cfg(feature = "ndarray-backend")]
pub use ndarr::NdArrayDevice;
