use std::fmt::{self, Debug, Display, Formatter};

use crate::error::Result;

/// Identifies one allocation inside a [`DeviceBackend`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub u64);

impl Display for BufferId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// An elementwise kernel combining two device buffers into a third.
///
/// `apply` is invoked once per work item and must not have side effects: a
/// backend is free to run work items in any order.
pub trait BinaryKernel: Send + Sync {
    fn name(&self) -> &str;
    fn apply(&self, lhs: f32, rhs: f32) -> f32;
}

/// The raw memory and dispatch operations of a compute device.
///
/// Backends never see host pointers beyond the duration of a single call; the
/// pairing of host regions with device allocations lives in
/// [`DeviceBuffer`](crate::DeviceBuffer).
pub trait DeviceBackend: Debug + Send + Sync {
    /// A short, human readable name of the device.
    fn name(&self) -> &str;

    /// Reserves device memory for `len` f32 elements.
    fn allocate(&self, len: usize) -> Result<BufferId>;

    /// Copies `data` into the allocation `id`. `data` must match its length.
    fn upload(&self, id: BufferId, data: &[f32]) -> Result<()>;

    /// Copies the allocation `id` into `out`. `out` must match its length.
    fn download(&self, id: BufferId, out: &mut [f32]) -> Result<()>;

    /// Frees the allocation `id`. Using `id` afterwards is an error.
    fn release(&self, id: BufferId) -> Result<()>;

    /// Runs `kernel` over the first `global_size` elements of `lhs` and `rhs`,
    /// writing into `out`, as a single unit of work.
    fn launch_binary(
        &self,
        kernel: &dyn BinaryKernel,
        lhs: BufferId,
        rhs: BufferId,
        out: BufferId,
        global_size: usize,
    ) -> Result<()>;

    /// Number of allocations currently held by the device.
    fn allocated(&self) -> usize;
}
