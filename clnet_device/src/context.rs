use std::{
    fmt::{self, Debug, Formatter},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use more_asserts::debug_assert_ge;
use tracing::{error, trace};

use crate::{
    backend::{BinaryKernel, BufferId, DeviceBackend},
    error::{DeviceError, Result},
};

/// The host side of a [`DeviceBuffer`].
///
/// A shared region can only feed the device; results can only be copied back
/// into an exclusive one.
pub enum HostRegion<'h> {
    Shared(&'h [f32]),
    Exclusive(&'h mut [f32]),
}

impl<'h> HostRegion<'h> {
    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_slice(&self) -> &[f32] {
        match self {
            HostRegion::Shared(host) => host,
            HostRegion::Exclusive(host) => host,
        }
    }
}

impl<'h> From<&'h [f32]> for HostRegion<'h> {
    fn from(host: &'h [f32]) -> Self {
        HostRegion::Shared(host)
    }
}

impl<'h> From<&'h mut [f32]> for HostRegion<'h> {
    fn from(host: &'h mut [f32]) -> Self {
        HostRegion::Exclusive(host)
    }
}

impl<'h> From<&'h Vec<f32>> for HostRegion<'h> {
    fn from(host: &'h Vec<f32>) -> Self {
        HostRegion::Shared(host.as_slice())
    }
}

impl<'h> From<&'h mut Vec<f32>> for HostRegion<'h> {
    fn from(host: &'h mut Vec<f32>) -> Self {
        HostRegion::Exclusive(host.as_mut_slice())
    }
}

/// Owns the connection to a device and hands out [`DeviceBuffer`]s bound to
/// host memory.
///
/// The context counts the buffers it has handed out that are still alive, so
/// callers can check that nothing leaks.
pub struct ExecutionContext {
    backend: Arc<dyn DeviceBackend>,
    live: Arc<AtomicUsize>,
}

impl Debug for ExecutionContext {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("device", &self.backend.name())
            .field("live_buffers", &self.live_buffers())
            .finish()
    }
}

impl ExecutionContext {
    pub fn new(backend: Arc<dyn DeviceBackend>) -> Self {
        Self {
            backend,
            live: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// A context over a fresh [`NdArrayDevice`](crate::ndarr::NdArrayDevice).
    #[cfg(feature = "ndarray-backend")]
    pub fn ndarray() -> Self {
        Self::new(Arc::new(crate::ndarr::NdArrayDevice::new()))
    }

    pub fn backend(&self) -> &Arc<dyn DeviceBackend> {
        &self.backend
    }

    /// Number of buffers wrapped by this context and not yet released.
    pub fn live_buffers(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Allocates device memory for `len` elements and pairs it with the first
    /// `len` elements of `host`. Nothing is transferred yet.
    pub fn wrap<'h>(&self, len: usize, host: impl Into<HostRegion<'h>>) -> Result<DeviceBuffer<'h>> {
        let host = host.into();
        if host.len() < len {
            return Err(DeviceError::HostRegionTooSmall {
                expected: len,
                actual: host.len(),
            });
        }
        let id = self.backend.allocate(len)?;
        self.live.fetch_add(1, Ordering::SeqCst);
        trace!(device = self.backend.name(), buffer = %id, len, "wrapped host region");
        Ok(DeviceBuffer {
            id,
            len,
            host,
            backend: self.backend.clone(),
            live: self.live.clone(),
            released: false,
        })
    }

    /// Launches `kernel` over `global_size` work items, reading `lhs` and `rhs`
    /// and writing `out` on the device.
    pub fn launch_binary(
        &self,
        kernel: &dyn BinaryKernel,
        lhs: &DeviceBuffer<'_>,
        rhs: &DeviceBuffer<'_>,
        out: &DeviceBuffer<'_>,
        global_size: usize,
    ) -> Result<()> {
        for buffer in [lhs, rhs, out] {
            self.check_owned(buffer)?;
        }
        self.backend
            .launch_binary(kernel, lhs.id, rhs.id, out.id, global_size)
    }

    fn check_owned(&self, buffer: &DeviceBuffer<'_>) -> Result<()> {
        if Arc::ptr_eq(&self.live, &buffer.live) {
            Ok(())
        } else {
            Err(DeviceError::ForeignBuffer(buffer.id))
        }
    }
}

/// Device memory paired with a host region for the lifetime `'h`.
///
/// Transfers only happen through [`copy_to_device`](Self::copy_to_device) and
/// [`copy_to_host`](Self::copy_to_host). The device memory is freed by
/// [`release`](Self::release), or on drop if it was not released explicitly.
pub struct DeviceBuffer<'h> {
    id: BufferId,
    len: usize,
    host: HostRegion<'h>,
    backend: Arc<dyn DeviceBackend>,
    live: Arc<AtomicUsize>,
    released: bool,
}

impl<'h> Debug for DeviceBuffer<'h> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceBuffer")
            .field("id", &self.id)
            .field("len", &self.len)
            .field("device", &self.backend.name())
            .finish()
    }
}

impl<'h> DeviceBuffer<'h> {
    pub fn id(&self) -> BufferId {
        self.id
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The host elements this buffer is paired with.
    pub fn host(&self) -> &[f32] {
        &self.host.as_slice()[..self.len]
    }

    pub fn copy_to_device(&self) -> Result<()> {
        self.backend.upload(self.id, self.host())
    }

    pub fn copy_to_host(&mut self) -> Result<()> {
        match &mut self.host {
            HostRegion::Exclusive(host) => {
                debug_assert_ge!(host.len(), self.len);
                self.backend.download(self.id, &mut host[..self.len])
            }
            HostRegion::Shared(_) => Err(DeviceError::ReadOnlyHost(self.id)),
        }
    }

    /// Reads the device contents into a fresh host vector, leaving the paired
    /// host region untouched.
    pub fn read_device(&self) -> Result<Vec<f32>> {
        let mut out = vec![0.0; self.len];
        self.backend.download(self.id, &mut out)?;
        Ok(out)
    }

    /// Overwrites the device contents with `data`.
    pub fn write_device(&self, data: &[f32]) -> Result<()> {
        self.backend.upload(self.id, data)
    }

    /// Frees the device memory, reporting a failure to do so.
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        self.live.fetch_sub(1, Ordering::SeqCst);
        self.backend.release(self.id)
    }
}

impl<'h> Drop for DeviceBuffer<'h> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.live.fetch_sub(1, Ordering::SeqCst);
        if let Err(err) = self.backend.release(self.id) {
            error!(buffer = %self.id, device = self.backend.name(), %err, "failed to release device buffer");
        }
    }
}

#[cfg(all(test, feature = "ndarray-backend"))]
mod tests {
    use super::*;

    #[test]
    fn round_trip_test() {
        let ctx = ExecutionContext::ndarray();
        let source: Vec<f32> = vec![1.0, 2.0, 3.0, 4.0];
        let mut target: Vec<f32> = vec![0.0; 4];
        {
            let shared = ctx.wrap(4, &source).unwrap();
            shared.copy_to_device().unwrap();
            let mut exclusive = ctx.wrap(4, &mut target).unwrap();
            exclusive.write_device(&shared.read_device().unwrap()).unwrap();
            exclusive.copy_to_host().unwrap();
            assert_eq!(ctx.live_buffers(), 2);
        }
        assert_eq!(target, source);
        assert_eq!(ctx.live_buffers(), 0);
        assert_eq!(ctx.backend().allocated(), 0);
    }

    #[test]
    fn wrap_prefix_test() {
        let ctx = ExecutionContext::ndarray();
        let mut host: Vec<f32> = vec![9.0; 6];
        let mut buffer = ctx.wrap(4, &mut host).unwrap();
        assert_eq!(buffer.host().len(), 4);
        buffer.copy_to_host().unwrap();
        buffer.release().unwrap();
        // Device memory starts zeroed; the elements past the wrapped prefix stay put.
        assert_eq!(host, vec![0.0, 0.0, 0.0, 0.0, 9.0, 9.0]);
    }

    #[test]
    fn wrap_failure_test() {
        let ctx = ExecutionContext::ndarray();
        let host = [0.0f32; 3];
        let err = ctx.wrap(4, &host[..]).unwrap_err();
        assert!(matches!(err, DeviceError::HostRegionTooSmall { expected: 4, actual: 3 }));
        assert_eq!(ctx.live_buffers(), 0);
        assert_eq!(ctx.backend().allocated(), 0);
    }

    #[test]
    fn read_only_host_test() {
        let ctx = ExecutionContext::ndarray();
        let host = [1.0f32, 2.0];
        let mut buffer = ctx.wrap(2, &host[..]).unwrap();
        assert!(matches!(buffer.copy_to_host(), Err(DeviceError::ReadOnlyHost(_))));
    }

    #[test]
    fn foreign_buffer_test() {
        struct Add;
        impl BinaryKernel for Add {
            fn name(&self) -> &str {
                "add"
            }
            fn apply(&self, lhs: f32, rhs: f32) -> f32 {
                lhs + rhs
            }
        }

        let ctx = ExecutionContext::ndarray();
        let other = ExecutionContext::ndarray();
        let host = [1.0f32, 2.0];
        let a = ctx.wrap(2, &host[..]).unwrap();
        let b = ctx.wrap(2, &host[..]).unwrap();
        let c = other.wrap(2, &host[..]).unwrap();
        assert!(matches!(
            ctx.launch_binary(&Add, &a, &b, &c, 2),
            Err(DeviceError::ForeignBuffer(id)) if id == c.id()
        ));
    }
}
