use clnet_device::DeviceError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackpropError {
    #[error("ActivationBackprop::instance_specific, variant id not known: {0}")]
    UnknownVariant(i32),

    #[error("{operation} not implemented on device buffers")]
    NotImplemented { operation: &'static str },

    #[error("invalid geometry: num_planes = {num_planes}, input_image_size = {input_image_size}, both must be positive")]
    InvalidGeometry {
        num_planes: usize,
        input_image_size: usize,
    },

    #[error("unknown activation function: {0}")]
    UnknownActivation(String),

    #[error("host buffer `{buffer}` holds {actual} elements, {expected} required")]
    BufferTooSmall {
        buffer: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error(transparent)]
    Device(#[from] DeviceError),
}

pub type Result<T> = std::result::Result<T, BackpropError>;
