use thiserror::Error;

use crate::BufferId;

/// Failures raised while allocating, moving or releasing device memory.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("unknown device buffer {0}")]
    UnknownBuffer(BufferId),

    #[error("host region holds {actual} elements, {expected} requested")]
    HostRegionTooSmall { expected: usize, actual: usize },

    #[error("device buffer {buffer} holds {expected} elements, transfer moved {actual}")]
    LengthMismatch {
        buffer: BufferId,
        expected: usize,
        actual: usize,
    },

    #[error("device buffer {0} is bound to a read-only host region")]
    ReadOnlyHost(BufferId),

    #[error("device buffer {0} was wrapped by another execution context")]
    ForeignBuffer(BufferId),

    #[error("device buffer {0} is used both as a kernel input and its output")]
    Aliased(BufferId),

    #[error("launch of {global_size} work items overruns device buffer {buffer} ({len} elements)")]
    LaunchOutOfBounds {
        buffer: BufferId,
        len: usize,
        global_size: usize,
    },

    #[error("device backend failure: {0}")]
    Backend(String),
}

pub type Result<T> = std::result::Result<T, DeviceError>;
