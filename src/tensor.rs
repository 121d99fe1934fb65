//! Handles for externally owned tensor storage.
//!
//! bitgrad allocates nothing per call: gradients, compressed payloads, and
//! residuals are all buffers owned by the training driver. A [`TensorHandle`]
//! wraps a raw `u64` pointer with the element count, the device the storage
//! lives on, and the dependency variable the execution engine orders tasks
//! by. The raw `u64` representation keeps handles `Send` and FFI-friendly.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::types::DeviceKind;

/// Dependency variable used by the execution engine to order tasks.
///
/// Two handles that alias the same storage must carry the same `VarId`;
/// that is the caller's contract, since the engine serializes tasks by
/// variable identity, not by pointer range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VarId(u64);

static NEXT_VAR: AtomicU64 = AtomicU64::new(1);

impl VarId {
    /// Allocate a fresh, process-unique variable.
    pub fn fresh() -> Self {
        Self(NEXT_VAR.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric identity.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for VarId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "var#{}", self.0)
    }
}

/// An opaque reference to a contiguous f32 buffer on a specific device.
///
/// Compressed payloads are also carried as f32 buffers; that typing is a
/// transport convenience inherited from the tensor runtime. Kernels never
/// read the compressed storage as floats — they go through
/// [`TensorHandle::host_bytes_mut`], which reinterprets the same allocation
/// as a byte span. f32 and u8 views are never held at the same time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TensorHandle {
    ptr: u64,
    len: usize,
    device: DeviceKind,
    var: VarId,
}

impl TensorHandle {
    /// Wrap raw storage on the given device.
    ///
    /// # Safety
    /// `ptr` must point to at least `len` valid, properly aligned `f32`
    /// elements in the memory space of `device`, and must stay valid for
    /// as long as tasks referencing this handle may run.
    pub unsafe fn from_raw_parts(ptr: u64, len: usize, device: DeviceKind, var: VarId) -> Self {
        Self {
            ptr,
            len,
            device,
            var,
        }
    }

    /// Wrap a host slice, allocating a fresh dependency variable.
    ///
    /// # Safety
    /// The slice must outlive every task submitted against this handle.
    /// The handle does not borrow-check; it captures the raw pointer.
    pub unsafe fn from_host_slice(data: &mut [f32]) -> Self {
        unsafe {
            Self::from_raw_parts(
                data.as_mut_ptr() as u64,
                data.len(),
                DeviceKind::Host,
                VarId::fresh(),
            )
        }
    }

    /// Element count.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the handle has an undefined (zero) shape.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Device the storage lives on.
    pub fn device(&self) -> DeviceKind {
        self.device
    }

    /// Dependency variable for engine ordering.
    pub fn var(&self) -> VarId {
        self.var
    }

    /// Raw pointer value, for accelerator launches.
    pub fn as_u64(&self) -> u64 {
        self.ptr
    }

    /// View the storage as a host f32 slice.
    ///
    /// # Safety
    /// The handle must reference host memory, no mutable view of the same
    /// storage may be live, and the backing allocation must still be valid.
    pub unsafe fn host_f32(&self) -> &[f32] {
        debug_assert_eq!(self.device, DeviceKind::Host);
        unsafe { std::slice::from_raw_parts(self.ptr as *const f32, self.len) }
    }

    /// View the storage as a mutable host f32 slice.
    ///
    /// # Safety
    /// As [`Self::host_f32`], and additionally no other view of the same
    /// storage may be live.
    pub unsafe fn host_f32_mut(&self) -> &mut [f32] {
        debug_assert_eq!(self.device, DeviceKind::Host);
        unsafe { std::slice::from_raw_parts_mut(self.ptr as *mut f32, self.len) }
    }

    /// View the storage as a mutable host byte span of `len * 4` bytes.
    ///
    /// This is the packing view of a compressed buffer: `u8` may alias any
    /// type, so reinterpreting the f32 allocation is sound as long as this
    /// is the only live view. The bit layout produced through this view is
    /// pure byte addressing and therefore identical on little- and
    /// big-endian hosts.
    ///
    /// # Safety
    /// As [`Self::host_f32_mut`].
    pub unsafe fn host_bytes_mut(&self) -> &mut [u8] {
        debug_assert_eq!(self.device, DeviceKind::Host);
        unsafe { std::slice::from_raw_parts_mut(self.ptr as *mut u8, self.len * 4) }
    }

    /// View the storage as a host byte span of `len * 4` bytes.
    ///
    /// # Safety
    /// As [`Self::host_f32`].
    pub unsafe fn host_bytes(&self) -> &[u8] {
        debug_assert_eq!(self.device, DeviceKind::Host);
        unsafe { std::slice::from_raw_parts(self.ptr as *const u8, self.len * 4) }
    }
}

impl std::fmt::Display for TensorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "TensorHandle(0x{:x}, {} x f32, {}, {})",
            self.ptr, self.len, self.device, self.var
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_var_ids_unique() {
        let a = VarId::fresh();
        let b = VarId::fresh();
        assert_ne!(a, b);
    }

    #[test]
    fn test_host_slice_roundtrip() {
        let mut data = vec![1.0f32, -2.0, 3.0];
        let t = unsafe { TensorHandle::from_host_slice(&mut data) };
        assert_eq!(t.len(), 3);
        assert_eq!(t.device(), DeviceKind::Host);
        assert!(!t.is_empty());
        assert_eq!(unsafe { t.host_f32() }, &[1.0, -2.0, 3.0]);
    }

    #[test]
    fn test_byte_view_length() {
        let mut data = vec![0.0f32; 4];
        let t = unsafe { TensorHandle::from_host_slice(&mut data) };
        assert_eq!(unsafe { t.host_bytes_mut() }.len(), 16);
    }

    #[test]
    fn test_empty_handle() {
        let mut data: Vec<f32> = vec![];
        let t = unsafe { TensorHandle::from_host_slice(&mut data) };
        assert!(t.is_empty());
    }

    #[test]
    fn test_display() {
        let t = unsafe {
            TensorHandle::from_raw_parts(0xFF, 8, DeviceKind::Accel, VarId::fresh())
        };
        let s = t.to_string();
        assert!(s.contains("0xff"));
        assert!(s.contains("8 x f32"));
        assert!(s.contains("accel"));
    }
}
