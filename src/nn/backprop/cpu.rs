use std::sync::Arc;

use clnet_device::{DeviceBuffer, ExecutionContext};
use itertools::izip;
use tracing::trace;

use super::{ActivationBackprop, Geometry, Variant};
use crate::{
    error::{BackpropError, Result},
    nn::ActivationFunction,
    util::time_check,
};

/// Reference implementation: a plain loop over host memory.
#[derive(Debug)]
pub struct ActivationBackpropCpu {
    context: Arc<ExecutionContext>,
    geometry: Geometry,
    activation: Arc<dyn ActivationFunction>,
}

impl ActivationBackpropCpu {
    pub fn new(
        context: Arc<ExecutionContext>,
        geometry: Geometry,
        activation: Arc<dyn ActivationFunction>,
    ) -> Self {
        Self {
            context,
            geometry,
            activation,
        }
    }

    fn compute(&self, inputs: &[f32], grad_output: &[f32], grad_input: &mut [f32]) {
        for (grad_input, &input, &grad_output) in izip!(grad_input, inputs, grad_output) {
            *grad_input = grad_output * self.activation.calc_derivative(input);
        }
    }
}

fn check_len(buffer: &'static str, actual: usize, expected: usize) -> Result<()> {
    if actual < expected {
        return Err(BackpropError::BufferTooSmall {
            buffer,
            expected,
            actual,
        });
    }
    Ok(())
}

impl ActivationBackprop for ActivationBackpropCpu {
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
        Some(Variant::Cpu)
    }

    /// Runs directly on the host slices; no device buffer is created.
    fn backprop_errors(
        &self,
        batch_size: usize,
        inputs: &[f32],
        grad_output: &[f32],
        grad_input: &mut [f32],
    ) -> Result<()> {
        time_check("ActivationBackpropCpu::backprop_errors start");
        let input_size = self.input_size(batch_size);
        let output_size = self.output_size(batch_size);
        check_len("inputs", inputs.len(), input_size)?;
        check_len("grad_output", grad_output.len(), output_size)?;
        check_len("grad_input", grad_input.len(), input_size)?;

        self.compute(
            &inputs[..input_size],
            &grad_output[..output_size],
            &mut grad_input[..input_size],
        );
        time_check("ActivationBackpropCpu::backprop_errors end");
        Ok(())
    }

    fn backprop_errors_on_device(
        &self,
        batch_size: usize,
        inputs: &DeviceBuffer<'_>,
        grad_output: &DeviceBuffer<'_>,
        grad_input: &DeviceBuffer<'_>,
    ) -> Result<()> {
        let input_size = self.input_size(batch_size);
        let output_size = self.output_size(batch_size);
        check_len("inputs", inputs.len(), input_size)?;
        check_len("grad_output", grad_output.len(), output_size)?;
        check_len("grad_input", grad_input.len(), input_size)?;

        let inputs = inputs.read_device()?;
        let grad_output = grad_output.read_device()?;
        // Start from the current device contents so elements past the batch
        // extent are written back unchanged.
        let mut result = grad_input.read_device()?;
        self.compute(
            &inputs[..input_size],
            &grad_output[..output_size],
            &mut result[..input_size],
        );
        grad_input.write_device(&result)?;
        trace!(batch_size, input_size, "computed gradients on host");
        Ok(())
    }
}
