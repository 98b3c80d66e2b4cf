use std::{
    collections::HashMap,
    sync::atomic::{AtomicU64, Ordering},
};

use ndarray::{s, Array1, ArrayView1, ArrayViewMut1, Zip};
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::{
    backend::{BinaryKernel, BufferId, DeviceBackend},
    error::{DeviceError, Result},
};

/// A device whose memory is a private arena of ndarray buffers.
///
/// Host regions are never aliased by the arena: data only crosses the
/// host/device boundary through [`upload`](DeviceBackend::upload) and
/// [`download`](DeviceBackend::download), so it behaves like a discrete
/// accelerator with explicit transfers.
#[derive(Debug)]
pub struct NdArrayDevice {
    name: String,
    memory: Mutex<HashMap<BufferId, Array1<f32>>>,
    next_id: AtomicU64,
    launches: AtomicU64,
}

impl NdArrayDevice {
    pub fn new() -> Self {
        Self::named("ndarray")
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            memory: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            launches: AtomicU64::new(0),
        }
    }

    /// Number of kernels launched on this device so far.
    pub fn launches(&self) -> u64 {
        self.launches.load(Ordering::SeqCst)
    }
}

impl Default for NdArrayDevice {
    fn default() -> Self {
        Self::new()
    }
}

fn check_extent(id: BufferId, array: &Array1<f32>, global_size: usize) -> Result<()> {
    if array.len() < global_size {
        return Err(DeviceError::LaunchOutOfBounds {
            buffer: id,
            len: array.len(),
            global_size,
        });
    }
    Ok(())
}

fn zip_into(
    kernel: &dyn BinaryKernel,
    out: &mut Array1<f32>,
    lhs: &Array1<f32>,
    rhs: &Array1<f32>,
    global_size: usize,
) {
    Zip::from(out.slice_mut(s![..global_size]))
        .and(lhs.slice(s![..global_size]))
        .and(rhs.slice(s![..global_size]))
        .for_each(|out, &lhs, &rhs| *out = kernel.apply(lhs, rhs));
}

impl DeviceBackend for NdArrayDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn allocate(&self, len: usize) -> Result<BufferId> {
        let id = BufferId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.memory.lock().insert(id, Array1::zeros(len));
        trace!(device = %self.name, buffer = %id, len, "allocated");
        Ok(id)
    }

    fn upload(&self, id: BufferId, data: &[f32]) -> Result<()> {
        let mut memory = self.memory.lock();
        let array = memory.get_mut(&id).ok_or(DeviceError::UnknownBuffer(id))?;
        if array.len() != data.len() {
            return Err(DeviceError::LengthMismatch {
                buffer: id,
                expected: array.len(),
                actual: data.len(),
            });
        }
        array.assign(&ArrayView1::from(data));
        Ok(())
    }

    fn download(&self, id: BufferId, out: &mut [f32]) -> Result<()> {
        let memory = self.memory.lock();
        let array = memory.get(&id).ok_or(DeviceError::UnknownBuffer(id))?;
        if array.len() != out.len() {
            return Err(DeviceError::LengthMismatch {
                buffer: id,
                expected: array.len(),
                actual: out.len(),
            });
        }
        ArrayViewMut1::from(out).assign(array);
        Ok(())
    }

    fn release(&self, id: BufferId) -> Result<()> {
        self.memory
            .lock()
            .remove(&id)
            .ok_or(DeviceError::UnknownBuffer(id))?;
        trace!(device = %self.name, buffer = %id, "released");
        Ok(())
    }

    fn launch_binary(
        &self,
        kernel: &dyn BinaryKernel,
        lhs: BufferId,
        rhs: BufferId,
        out: BufferId,
        global_size: usize,
    ) -> Result<()> {
        if out == lhs || out == rhs {
            return Err(DeviceError::Aliased(out));
        }
        let mut memory = self.memory.lock();
        // The output is taken out of the arena so it can be borrowed mutably
        // next to the two inputs; it goes back in on every path.
        let mut out_array = memory.remove(&out).ok_or(DeviceError::UnknownBuffer(out))?;
        let result = match (memory.get(&lhs), memory.get(&rhs)) {
            (Some(lhs_array), Some(rhs_array)) => check_extent(out, &out_array, global_size)
                .and_then(|_| check_extent(lhs, lhs_array, global_size))
                .and_then(|_| check_extent(rhs, rhs_array, global_size))
                .map(|_| zip_into(kernel, &mut out_array, lhs_array, rhs_array, global_size)),
            (None, _) => Err(DeviceError::UnknownBuffer(lhs)),
            (_, None) => Err(DeviceError::UnknownBuffer(rhs)),
        };
        memory.insert(out, out_array);
        if result.is_ok() {
            self.launches.fetch_add(1, Ordering::SeqCst);
            debug!(device = %self.name, kernel = kernel.name(), global_size, "launched");
        }
        result
    }

    fn allocated(&self) -> usize {
        self.memory.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Sub;

    impl BinaryKernel for Sub {
        fn name(&self) -> &str {
            "sub"
        }

        fn apply(&self, lhs: f32, rhs: f32) -> f32 {
            lhs - rhs
        }
    }

    #[test]
    fn transfer_test() {
        let device = NdArrayDevice::new();
        let id = device.allocate(3).unwrap();
        device.upload(id, &[1.0, 2.0, 3.0]).unwrap();
        let mut out = [0.0; 3];
        device.download(id, &mut out).unwrap();
        assert_eq!(out, [1.0, 2.0, 3.0]);

        assert!(matches!(
            device.upload(id, &[1.0]),
            Err(DeviceError::LengthMismatch { expected: 3, actual: 1, .. })
        ));
    }

    #[test]
    fn launch_test() {
        let device = NdArrayDevice::new();
        let lhs = device.allocate(4).unwrap();
        let rhs = device.allocate(4).unwrap();
        let out = device.allocate(4).unwrap();
        device.upload(lhs, &[5.0, 6.0, 7.0, 8.0]).unwrap();
        device.upload(rhs, &[1.0, 1.0, 2.0, 2.0]).unwrap();

        // Only the first three work items run; the tail keeps its old value.
        device.launch_binary(&Sub, lhs, rhs, out, 3).unwrap();
        let mut result = [0.0; 4];
        device.download(out, &mut result).unwrap();
        assert_eq!(result, [4.0, 5.0, 5.0, 0.0]);
        assert_eq!(device.launches(), 1);
    }

    #[test]
    fn launch_failure_test() {
        let device = NdArrayDevice::new();
        let lhs = device.allocate(2).unwrap();
        let rhs = device.allocate(4).unwrap();
        let out = device.allocate(4).unwrap();

        assert!(matches!(
            device.launch_binary(&Sub, lhs, rhs, out, 4),
            Err(DeviceError::LaunchOutOfBounds { len: 2, global_size: 4, .. })
        ));
        assert!(matches!(
            device.launch_binary(&Sub, lhs, out, out, 2),
            Err(DeviceError::Aliased(_))
        ));
        device.release(rhs).unwrap();
        assert!(matches!(
            device.launch_binary(&Sub, lhs, rhs, out, 2),
            Err(DeviceError::UnknownBuffer(id)) if id == rhs
        ));
        // A failed launch must not lose the output buffer.
        assert_eq!(device.allocated(), 2);
        assert_eq!(device.launches(), 0);
    }

    #[test]
    fn release_test() {
        let device = NdArrayDevice::new();
        let id = device.allocate(8).unwrap();
        assert_eq!(device.allocated(), 1);
        device.release(id).unwrap();
        assert_eq!(device.allocated(), 0);
        assert!(matches!(device.release(id), Err(DeviceError::UnknownBuffer(_))));
        assert!(matches!(device.upload(id, &[0.0; 8]), Err(DeviceError::UnknownBuffer(_))));
    }
}
