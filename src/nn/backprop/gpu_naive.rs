use std::sync::Arc;

use clnet_device::{BinaryKernel, DeviceBuffer, ExecutionContext};
use tracing::debug;

use super::{ActivationBackprop, Geometry, Variant};
use crate::{error::Result, nn::ActivationFunction};

/// `grad_input = grad_output * derivative(input)`, one work item per element.
#[derive(Debug)]
struct BackpropKernel {
    name: String,
    activation: Arc<dyn ActivationFunction>,
}

impl BinaryKernel for BackpropKernel {
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, input: f32, grad_output: f32) -> f32 {
        grad_output * self.activation.calc_derivative(input)
    }
}

/// Device implementation launching a single elementwise kernel over the whole
/// batch, without tiling.
#[derive(Debug)]
pub struct ActivationBackpropGpuNaive {
    context: Arc<ExecutionContext>,
    geometry: Geometry,
    activation: Arc<dyn ActivationFunction>,
    kernel: BackpropKernel,
}

impl ActivationBackpropGpuNaive {
    pub fn new(
        context: Arc<ExecutionContext>,
        geometry: Geometry,
        activation: Arc<dyn ActivationFunction>,
    ) -> Self {
        let kernel = BackpropKernel {
            name: format!("backprop_errors_{}", activation.name()),
            activation: activation.clone(),
        };
        debug!(kernel = %kernel.name, device = context.backend().name(), "built kernel");
        Self {
            context,
            geometry,
            activation,
            kernel,
        }
    }

    pub fn kernel_name(&self) -> &str {
        &self.kernel.name
    }
}

impl ActivationBackprop for ActivationBackpropGpuNaive {
    fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    fn context(&self) -> &ExecutionContext {
        &self.context
    }

    fn activation(&self) -> &dyn ActivationFunction {
        self.activation.as_ref()
    }

    fn variant(&self) -> Option<Variant> {
        Some(Variant::GpuNaive)
    }

    fn backprop_errors_on_device(
        &self,
        batch_size: usize,
        inputs: &DeviceBuffer<'_>,
        grad_output: &DeviceBuffer<'_>,
        grad_input: &DeviceBuffer<'_>,
    ) -> Result<()> {
        let global_size = self.input_size(batch_size);
        self.context
            .launch_binary(&self.kernel, inputs, grad_output, grad_input, global_size)?;
        Ok(())
    }
}
