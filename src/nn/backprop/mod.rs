use std::{
    fmt::{self, Debug, Display, Formatter},
    sync::Arc,
};

use clnet_device::{DeviceBuffer, ExecutionContext};
use tracing::debug;

use crate::{
    error::{BackpropError, Result},
    nn::ActivationFunction,
    util::time_check,
};

pub use config::*;
pub use cpu::*;
pub use gpu_naive::*;

pub mod config;
pub mod cpu;
pub mod gpu_naive;

/// The fixed shape of the data flowing through an activation layer.
///
/// An activation is elementwise, so the output image has the same size as the
/// input image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Geometry {
    num_planes: usize,
    input_image_size: usize,
    output_image_size: usize,
    /// `num_planes * input_image_size^2`, the elements of one batch item.
    example_size: usize,
}

impl Geometry {
    /// Fails with [`BackpropError::InvalidGeometry`] if either dimension is
    /// zero or one batch item holds more than `usize::MAX` elements.
    pub fn new(num_planes: usize, input_image_size: usize) -> Result<Self> {
        let example_size = input_image_size
            .checked_mul(input_image_size)
            .and_then(|image| image.checked_mul(num_planes))
            .filter(|&size| size > 0)
            .ok_or(BackpropError::InvalidGeometry {
                num_planes,
                input_image_size,
            })?;
        Ok(Self {
            num_planes,
            input_image_size,
            output_image_size: input_image_size,
            example_size,
        })
    }

    pub fn num_planes(&self) -> usize {
        self.num_planes
    }

    pub fn input_image_size(&self) -> usize {
        self.input_image_size
    }

    pub fn output_image_size(&self) -> usize {
        self.output_image_size
    }

    /// Number of elements in a batch of layer inputs.
    ///
    /// Saturates at `usize::MAX`; no host slice is that long, so a saturated
    /// size is rejected before any device memory is allocated.
    pub fn input_size(&self, batch_size: usize) -> usize {
        batch_size.saturating_mul(self.example_size)
    }

    /// Number of elements in a batch of layer outputs. Saturates like
    /// [`input_size`](Self::input_size).
    pub fn output_size(&self, batch_size: usize) -> usize {
        batch_size.saturating_mul(self.example_size)
    }
}

/// The built-in implementations of [`ActivationBackprop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Variant {
    /// Reference implementation looping over host memory.
    Cpu = 0,
    /// One unblocked elementwise kernel launch on the device.
    GpuNaive = 1,
}

impl Variant {
    pub const ALL: [Variant; 2] = [Variant::Cpu, Variant::GpuNaive];

    /// The variant [`instance`] and [`instance_for_test`] construct.
    pub const DEFAULT: Variant = Variant::GpuNaive;

    pub fn id(self) -> i32 {
        self as i32
    }

    pub fn instantiate(
        self,
        context: Arc<ExecutionContext>,
        geometry: Geometry,
        activation: Arc<dyn ActivationFunction>,
    ) -> Box<dyn ActivationBackprop> {
        match self {
            Variant::Cpu => Box::new(ActivationBackpropCpu::new(context, geometry, activation)),
            Variant::GpuNaive => {
                Box::new(ActivationBackpropGpuNaive::new(context, geometry, activation))
            }
        }
    }
}

impl TryFrom<i32> for Variant {
    type Error = BackpropError;

    fn try_from(id: i32) -> Result<Self> {
        match id {
            0 => Ok(Variant::Cpu),
            1 => Ok(Variant::GpuNaive),
            _ => Err(BackpropError::UnknownVariant(id)),
        }
    }
}

impl Display for Variant {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Variant::Cpu => write!(f, "cpu"),
            Variant::GpuNaive => write!(f, "gpu-naive"),
        }
    }
}

/// Propagates error gradients backward through an activation function.
///
/// There are two entry points. [`backprop_errors`](Self::backprop_errors)
/// takes host slices and moves them to and from the device around a call to
/// [`backprop_errors_on_device`](Self::backprop_errors_on_device), which works
/// on buffers already resident on the device. Implementations must provide
/// the latter; the default only reports that it is missing.
pub trait ActivationBackprop: Debug + Send + Sync {
    fn geometry(&self) -> &Geometry;

    fn context(&self) -> &ExecutionContext;

    fn activation(&self) -> &dyn ActivationFunction;

    /// The built-in variant this is, if any.
    fn variant(&self) -> Option<Variant> {
        None
    }

    fn input_size(&self, batch_size: usize) -> usize {
        self.geometry().input_size(batch_size)
    }

    fn output_size(&self, batch_size: usize) -> usize {
        self.geometry().output_size(batch_size)
    }

    /// Computes `grad_input` from host-resident `inputs` and `grad_output`.
    ///
    /// The slices must hold at least [`input_size`](Self::input_size),
    /// [`output_size`](Self::output_size) and `input_size` elements. Every
    /// device buffer created here is released before returning, whether the
    /// call succeeds or not.
    fn backprop_errors(
        &self,
        batch_size: usize,
        inputs: &[f32],
        grad_output: &[f32],
        grad_input: &mut [f32],
    ) -> Result<()> {
        time_check("ActivationBackprop::backprop_errors host->device start");
        let input_size = self.input_size(batch_size);
        let output_size = self.output_size(batch_size);
        debug!(batch_size, input_size, output_size, "backprop errors through device buffers");

        let context = self.context();
        let inputs_buffer = context.wrap(input_size, inputs)?;
        let grad_output_buffer = context.wrap(output_size, grad_output)?;
        let mut grad_input_buffer = context.wrap(input_size, grad_input)?;

        inputs_buffer.copy_to_device()?;
        grad_output_buffer.copy_to_device()?;
        // grad_input is write-only on the device, its host contents are overwritten.
        self.backprop_errors_on_device(
            batch_size,
            &inputs_buffer,
            &grad_output_buffer,
            &grad_input_buffer,
        )?;
        grad_input_buffer.copy_to_host()?;

        inputs_buffer.release()?;
        grad_output_buffer.release()?;
        grad_input_buffer.release()?;
        time_check("ActivationBackprop::backprop_errors host->device end");
        Ok(())
    }

    /// Computes `grad_input[i] = grad_output[i] * derivative(inputs[i])` on
    /// device buffers, for the first `input_size(batch_size)` elements.
    fn backprop_errors_on_device(
        &self,
        _batch_size: usize,
        _inputs: &DeviceBuffer<'_>,
        _grad_output: &DeviceBuffer<'_>,
        _grad_input: &DeviceBuffer<'_>,
    ) -> Result<()> {
        Err(BackpropError::NotImplemented {
            operation: "ActivationBackprop::backprop_errors_on_device",
        })
    }
}

/// The production implementation.
pub fn instance(
    context: Arc<ExecutionContext>,
    num_planes: usize,
    input_image_size: usize,
    activation: Arc<dyn ActivationFunction>,
) -> Result<Box<dyn ActivationBackprop>> {
    let geometry = Geometry::new(num_planes, input_image_size)?;
    Ok(Variant::DEFAULT.instantiate(context, geometry, activation))
}

/// The implementation tests should exercise.
///
/// This is currently the production implementation as well.
pub fn instance_for_test(
    context: Arc<ExecutionContext>,
    num_planes: usize,
    input_image_size: usize,
    activation: Arc<dyn ActivationFunction>,
) -> Result<Box<dyn ActivationBackprop>> {
    let geometry = Geometry::new(num_planes, input_image_size)?;
    Ok(Variant::DEFAULT.instantiate(context, geometry, activation))
}

/// The implementation with the given variant id: `0` for [`Variant::Cpu`],
/// `1` for [`Variant::GpuNaive`].
pub fn instance_specific(
    id: i32,
    context: Arc<ExecutionContext>,
    num_planes: usize,
    input_image_size: usize,
    activation: Arc<dyn ActivationFunction>,
) -> Result<Box<dyn ActivationBackprop>> {
    let variant = Variant::try_from(id)?;
    let geometry = Geometry::new(num_planes, input_image_size)?;
    Ok(variant.instantiate(context, geometry, activation))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nn::Linear;

    #[test]
    fn geometry_test() {
        let geometry = Geometry::new(3, 8).unwrap();
        assert_eq!(geometry.input_size(5), 960);
        assert_eq!(geometry.output_size(5), 960);
        assert_eq!(geometry.input_size(0), 0);
        assert_eq!(geometry.output_image_size(), geometry.input_image_size());

        assert!(matches!(
            Geometry::new(0, 8),
            Err(BackpropError::InvalidGeometry { num_planes: 0, input_image_size: 8 })
        ));
        assert!(Geometry::new(3, 0).is_err());
    }

    #[test]
    fn geometry_overflow_test() {
        assert!(matches!(
            Geometry::new(1, 1usize << 32),
            Err(BackpropError::InvalidGeometry { num_planes: 1, .. })
        ));
        assert!(Geometry::new(usize::MAX, 2).is_err());

        let geometry = Geometry::new(4, 1 << 10).unwrap();
        assert_eq!(geometry.input_size(1), 1 << 22);
        assert_eq!(geometry.input_size(usize::MAX), usize::MAX);
        assert_eq!(geometry.output_size(usize::MAX), usize::MAX);
    }

    #[test]
    fn oversized_batch_test() {
        let context = Arc::new(ExecutionContext::ndarray());
        for variant in Variant::ALL {
            let backprop =
                variant.instantiate(context.clone(), Geometry::new(2, 4).unwrap(), Arc::new(Linear));
            let host = vec![0.0f32; 32];
            let mut grad_input = vec![0.0f32; 32];
            assert!(backprop
                .backprop_errors(usize::MAX, &host, &host, &mut grad_input)
                .is_err());
        }
        assert_eq!(context.live_buffers(), 0);
        assert_eq!(context.backend().allocated(), 0);
    }

    #[test]
    fn variant_id_test() {
        for variant in Variant::ALL {
            assert_eq!(Variant::try_from(variant.id()).unwrap(), variant);
        }
        assert_eq!(Variant::Cpu.id(), 0);
        assert_eq!(Variant::GpuNaive.id(), 1);
        assert_eq!(Variant::DEFAULT, Variant::GpuNaive);
        assert_eq!(Variant::GpuNaive.to_string(), "gpu-naive");
    }

    #[test]
    fn unknown_variant_test() {
        let context = Arc::new(ExecutionContext::ndarray());
        for id in [2, -1, 42] {
            let err = instance_specific(id, context.clone(), 1, 1, Arc::new(Linear)).unwrap_err();
            assert!(matches!(err, BackpropError::UnknownVariant(bad) if bad == id));
            assert!(err.to_string().contains(&id.to_string()));
        }
        // An unknown id is reported before the geometry is looked at.
        assert!(matches!(
            instance_specific(7, context, 0, 0, Arc::new(Linear)),
            Err(BackpropError::UnknownVariant(7))
        ));
    }
}
