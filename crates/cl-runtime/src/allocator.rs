// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Tensor memory allocation.
//!
//! A [`TensorAllocator`] owns a tensor's [`TensorInfo`] and decides where
//! its bytes live:
//!
//! ```text
//!                 allocate()                  free()
//! Unallocated ───────────────► Owned ─────────────────► Unallocated
//!      │   import_memory()
//!      ├─────────────────────► Imported (shared, never allocated here)
//!      │   set_associated_memory_group() + allocate()
//!      └─────────────────────► Managed  (bound while the group is acquired)
//! ```
//!
//! Contract violations (double allocate, free while unallocated, map
//! without memory, unbalanced map/unmap) panic. Device and pool failures
//! are returned as [`RuntimeError`].

use std::sync::{Arc, OnceLock};

use device_context::{ClContext, ClError, CommandQueue, DeviceBuffer, Event, HostMapping, MemFlags};
use memory_manager::{MemoryGroup, MemorySlot, ObjectId};
use tensor_core::{Status, TensorError, TensorInfo};

use crate::{ClFloatArray, ClInt32Array, ClQuantization, RuntimeError};

// ── Global allocator ────────────────────────────────────────────

/// Strategy creating the device buffers of unmanaged tensors.
pub trait Allocator: Send + Sync {
    /// Creates a buffer of at least `size` bytes.
    fn allocate(&self, context: &ClContext, size: usize, alignment: usize) -> Result<DeviceBuffer, ClError>;

    /// Short name for logs.
    fn name(&self) -> &str;
}

/// Creates one device buffer per tensor.
#[derive(Debug, Default, Clone, Copy)]
pub struct DeviceAllocator;

impl Allocator for DeviceAllocator {
    fn allocate(&self, context: &ClContext, size: usize, _alignment: usize) -> Result<DeviceBuffer, ClError> {
        context.create_buffer(MemFlags::ReadWrite, size)
    }

    fn name(&self) -> &str {
        "device"
    }
}

static GLOBAL_ALLOCATOR: OnceLock<Arc<dyn Allocator>> = OnceLock::new();

/// Installs the allocator used by every subsequent unmanaged `allocate()`.
///
/// Must be called once, at start-up, before any tensor is allocated.
///
/// # Errors
/// [`RuntimeError::GlobalAllocatorAlreadySet`] if an allocator was already
/// installed, or if a tensor has already been allocated with the default.
pub fn set_global_allocator(allocator: Arc<dyn Allocator>) -> Result<(), RuntimeError> {
    let name = allocator.name().to_string();
    GLOBAL_ALLOCATOR
        .set(allocator)
        .map_err(|_| RuntimeError::GlobalAllocatorAlreadySet)?;
    tracing::info!(allocator = %name, "installed global tensor allocator");
    Ok(())
}

fn global_allocator() -> &'static dyn Allocator {
    GLOBAL_ALLOCATOR
        .get_or_init(|| Arc::new(DeviceAllocator))
        .as_ref()
}

// ── TensorAllocator ─────────────────────────────────────────────

enum Backing {
    Unallocated,
    Owned(DeviceBuffer),
    /// Caller-provided memory; the caller keeps it alive.
    Imported(DeviceBuffer),
    /// Memory lent by the associated group while it is acquired.
    Managed,
}

struct GroupAssociation {
    group: MemoryGroup,
    slot: MemorySlot,
    id: ObjectId,
}

/// Owns the device memory of one tensor.
pub struct TensorAllocator {
    context: ClContext,
    info: TensorInfo,
    alignment: usize,
    backing: Backing,
    association: Option<GroupAssociation>,
    mapping: Option<HostMapping>,
    scale: Option<ClFloatArray>,
    offset: Option<ClInt32Array>,
}

impl TensorAllocator {
    pub fn new(context: &ClContext) -> Self {
        Self {
            context: context.clone(),
            info: TensorInfo::default(),
            alignment: 0,
            backing: Backing::Unallocated,
            association: None,
            mapping: None,
            scale: None,
            offset: None,
        }
    }

    /// Replaces the tensor metadata.
    ///
    /// # Panics
    /// Panics if the tensor is allocated.
    pub fn init(&mut self, info: TensorInfo) {
        assert!(!self.is_allocated(), "init() called on an allocated tensor");
        self.info = info;
    }

    pub fn info(&self) -> &TensorInfo {
        &self.info
    }

    /// Mutable metadata.
    ///
    /// # Panics
    /// Panics once the info is fixed by `allocate()` or `import_memory()`.
    pub fn info_mut(&mut self) -> &mut TensorInfo {
        assert!(self.info.is_resizable(), "tensor info is fixed once memory is attached");
        &mut self.info
    }

    pub fn context(&self) -> &ClContext {
        &self.context
    }

    /// Alignment requested from a memory group.
    pub fn alignment(&self) -> usize {
        self.alignment
    }

    pub fn set_alignment(&mut self, alignment: usize) {
        self.alignment = alignment;
    }

    // ── Lifecycle ───────────────────────────────────────────────

    /// Attaches memory of `info().total_size()` bytes and fixes the info.
    ///
    /// Unmanaged tensors get a buffer from the global allocator; managed
    /// tensors report their size to the memory group instead. Per-channel
    /// quantized tensors also get their scale/offset arrays.
    ///
    /// # Panics
    /// Panics if memory is already attached.
    pub fn allocate(&mut self) -> Result<(), RuntimeError> {
        match self.backing {
            Backing::Unallocated => {}
            Backing::Imported(_) => panic!("allocate() called on a tensor backed by imported memory"),
            Backing::Owned(_) | Backing::Managed => {
                panic!("allocate() called on an already allocated tensor")
            }
        }

        let size = self.info.total_size();
        let (scale, offset) = if self.info.dtype().is_quantized_per_channel() {
            self.quantization_arrays()?
        } else {
            (None, None)
        };

        self.backing = match &self.association {
            Some(assoc) => {
                assoc.group.finalize_memory(assoc.id, size, self.alignment)?;
                Backing::Managed
            }
            None => Backing::Owned(global_allocator().allocate(&self.context, size, self.alignment)?),
        };
        self.scale = scale;
        self.offset = offset;
        self.info.set_is_resizable(false);
        tracing::debug!(size, managed = self.is_managed(), dtype = %self.info.dtype(), "tensor allocated");
        Ok(())
    }

    fn quantization_arrays(&self) -> Result<(Option<ClFloatArray>, Option<ClInt32Array>), ClError> {
        let q = self.info.quantization_info();
        let mut scale = ClFloatArray::new(&self.context, q.scales().len())?;
        scale.upload(q.scales())?;
        let offset = if q.offsets().is_empty() {
            None
        } else {
            let mut offset = ClInt32Array::new(&self.context, q.offsets().len())?;
            offset.upload(q.offsets())?;
            Some(offset)
        };
        Ok((Some(scale), offset))
    }

    /// Releases the tensor's memory and makes the info resizable again.
    ///
    /// On a managed tensor this does nothing: the memory group owns the
    /// memory and reclaims it on `release()`.
    ///
    /// # Panics
    /// Panics if the tensor is unallocated or still mapped.
    pub fn free(&mut self) {
        assert!(self.is_allocated(), "free() called on an unallocated tensor");
        assert!(self.mapping.is_none(), "free() called on a mapped tensor");
        if self.is_managed() {
            tracing::debug!("free() on a managed tensor ignored; its memory group owns the memory");
            return;
        }
        self.backing = Backing::Unallocated;
        self.scale = None;
        self.offset = None;
        self.info.set_is_resizable(true);
        tracing::debug!(size = self.info.total_size(), "tensor freed");
    }

    /// Backs the tensor with caller-provided memory.
    ///
    /// The buffer is shared, not taken over: the caller keeps its own
    /// handle and must keep the memory alive while the tensor is used.
    ///
    /// # Errors
    /// - [`TensorError::ManagedImport`] if the tensor belongs to a memory
    ///   group.
    /// - [`TensorError::InsufficientMemory`] if `buffer` is smaller than
    ///   `info().total_size()`.
    ///
    /// # Panics
    /// Panics if the tensor owns memory from `allocate()`.
    pub fn import_memory(&mut self, buffer: DeviceBuffer) -> Status {
        if self.association.is_some() {
            return Err(TensorError::ManagedImport);
        }
        let required = self.info.total_size();
        if buffer.size() < required {
            return Err(TensorError::InsufficientMemory {
                required,
                actual: buffer.size(),
            });
        }
        assert!(
            !matches!(self.backing, Backing::Owned(_)),
            "import_memory() called on a tensor that owns its memory"
        );
        assert!(self.mapping.is_none(), "import_memory() called on a mapped tensor");

        tracing::debug!(required, provided = buffer.size(), "imported tensor memory");
        self.backing = Backing::Imported(buffer);
        self.info.set_is_resizable(false);
        Ok(())
    }

    /// Hands the tensor's memory over to `group`.
    ///
    /// Registration order defines lifetimes: the tensor's lifetime starts
    /// now and ends when it is allocated.
    ///
    /// # Panics
    /// Panics if the tensor is allocated or already in a group.
    pub fn set_associated_memory_group(&mut self, group: &MemoryGroup) {
        assert!(!self.is_allocated(), "memory group must be associated before allocate()");
        assert!(self.association.is_none(), "tensor already belongs to a memory group");
        let slot = MemorySlot::new();
        let id = group.manage(slot.clone());
        self.association = Some(GroupAssociation {
            group: group.clone(),
            slot,
            id,
        });
    }

    // ── Mapping ─────────────────────────────────────────────────

    /// Enqueues a map of the tensor's buffer and keeps the mapping.
    ///
    /// With `blocking == false` the data must not be touched until the
    /// queue has been finished.
    ///
    /// # Panics
    /// Panics if already mapped, or if there is no backing memory
    /// (unallocated, or a managed tensor whose group is not acquired).
    pub fn map(&mut self, queue: &CommandQueue, blocking: bool) {
        assert!(self.mapping.is_none(), "tensor is already mapped");
        let Some(buffer) = self.cl_buffer() else {
            panic!("map() called on a tensor without backing memory");
        };
        self.mapping = Some(queue.enqueue_map(&buffer, blocking));
    }

    /// Enqueues the unmap and drops the mapping. Never waits: kernels
    /// enqueued later on the same queue run after the unmap.
    ///
    /// # Panics
    /// Panics if the tensor is not mapped.
    pub fn unmap(&mut self, queue: &CommandQueue) -> Event {
        let Some(mapping) = self.mapping.take() else {
            panic!("unmap() called on a tensor that is not mapped");
        };
        queue.enqueue_unmap(mapping)
    }

    /// The current host mapping.
    pub fn mapping(&self) -> Option<&HostMapping> {
        self.mapping.as_ref()
    }

    // ── Queries ─────────────────────────────────────────────────

    pub fn is_allocated(&self) -> bool {
        !matches!(self.backing, Backing::Unallocated)
    }

    pub fn is_managed(&self) -> bool {
        self.association.is_some()
    }

    pub fn is_imported(&self) -> bool {
        matches!(self.backing, Backing::Imported(_))
    }

    pub fn memory_group(&self) -> Option<&MemoryGroup> {
        self.association.as_ref().map(|a| &a.group)
    }

    /// The buffer kernels bind, if memory is currently attached.
    pub fn cl_buffer(&self) -> Option<DeviceBuffer> {
        match &self.backing {
            Backing::Owned(buffer) | Backing::Imported(buffer) => Some(buffer.clone()),
            Backing::Managed => self.association.as_ref().and_then(|a| a.slot.get()),
            Backing::Unallocated => None,
        }
    }

    /// Quantization parameters, with the per-channel arrays when present.
    pub fn quantization(&self) -> ClQuantization<'_> {
        ClQuantization::new(
            self.info.quantization_info().uniform(),
            self.scale.as_ref(),
            self.offset.as_ref(),
        )
    }
}

impl std::fmt::Debug for TensorAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let backing = match self.backing {
            Backing::Unallocated => "unallocated",
            Backing::Owned(_) => "owned",
            Backing::Imported(_) => "imported",
            Backing::Managed => "managed",
        };
        f.debug_struct("TensorAllocator")
            .field("shape", self.info.shape())
            .field("dtype", &self.info.dtype())
            .field("total_size", &self.info.total_size())
            .field("backing", &backing)
            .field("mapped", &self.mapping.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use device_context::{DeviceOptions, DeviceProperties};
    use memory_manager::{BlobPool, MemoryBudget};
    use tensor_core::{DType, QuantizationInfo, Shape};

    fn ctx() -> ClContext {
        ClContext::new(DeviceOptions::default())
    }

    fn allocator(ctx: &ClContext, shape: Shape) -> TensorAllocator {
        let mut a = TensorAllocator::new(ctx);
        a.init(TensorInfo::new(shape, DType::F32));
        a
    }

    #[test]
    fn test_allocate_and_free() {
        let ctx = ctx();
        let mut a = allocator(&ctx, Shape::d2(4, 4));
        assert!(a.cl_buffer().is_none());

        a.allocate().unwrap();
        assert!(a.is_allocated());
        assert!(!a.info().is_resizable());
        assert_eq!(a.cl_buffer().unwrap().size(), 64);
        assert_eq!(ctx.allocated_bytes(), 64);

        a.free();
        assert!(!a.is_allocated());
        assert!(a.info().is_resizable());
        assert_eq!(ctx.allocated_bytes(), 0);

        // reusable after free
        a.allocate().unwrap();
        assert!(a.is_allocated());
    }

    #[test]
    #[should_panic(expected = "already allocated")]
    fn test_double_allocate_panics() {
        let ctx = ctx();
        let mut a = allocator(&ctx, Shape::vector(8));
        a.allocate().unwrap();
        let _ = a.allocate();
    }

    #[test]
    #[should_panic(expected = "unallocated tensor")]
    fn test_free_unallocated_panics() {
        let ctx = ctx();
        allocator(&ctx, Shape::vector(8)).free();
    }

    #[test]
    #[should_panic(expected = "fixed")]
    fn test_info_mut_after_allocate_panics() {
        let ctx = ctx();
        let mut a = allocator(&ctx, Shape::vector(8));
        a.allocate().unwrap();
        a.info_mut();
    }

    #[test]
    fn test_out_of_device_memory() {
        let props = DeviceProperties {
            global_mem_size: 1024,
            ..DeviceProperties::default()
        };
        let ctx = ClContext::new(DeviceOptions::from_properties(&props));
        let mut a = allocator(&ctx, Shape::d2(32, 32));
        let err = a.allocate().unwrap_err();
        assert!(matches!(err, RuntimeError::Device(ClError::OutOfMemory { .. })));
        assert!(!a.is_allocated());
        assert!(a.info().is_resizable());
    }

    #[test]
    fn test_import_size_check() {
        let ctx = ctx();
        let mut a = allocator(&ctx, Shape::vector(16));
        let small = ctx.create_buffer(MemFlags::ReadWrite, 32).unwrap();
        assert_eq!(
            a.import_memory(small),
            Err(TensorError::InsufficientMemory {
                required: 64,
                actual: 32
            })
        );
        assert!(!a.is_allocated());

        let big = ctx.create_buffer(MemFlags::ReadWrite, 128).unwrap();
        a.import_memory(big.clone()).unwrap();
        assert!(a.is_imported());
        assert!(a.cl_buffer().unwrap().same_storage(&big));
        // shared, not taken over
        assert_eq!(big.handle_count(), 2);
    }

    #[test]
    #[should_panic(expected = "imported memory")]
    fn test_allocate_after_import_panics() {
        let ctx = ctx();
        let mut a = allocator(&ctx, Shape::vector(4));
        a.import_memory(ctx.create_buffer(MemFlags::ReadWrite, 16).unwrap())
            .unwrap();
        let _ = a.allocate();
    }

    #[test]
    fn test_import_into_managed_rejected() {
        let ctx = ctx();
        let group = MemoryGroup::new(BlobPool::new(ctx.clone(), MemoryBudget::from_mb(1)));
        let mut a = allocator(&ctx, Shape::vector(4));
        a.set_associated_memory_group(&group);
        let buf = ctx.create_buffer(MemFlags::ReadWrite, 16).unwrap();
        assert_eq!(a.import_memory(buf), Err(TensorError::ManagedImport));
    }

    #[test]
    fn test_managed_allocation_follows_group() {
        let ctx = ctx();
        let group = MemoryGroup::new(BlobPool::new(ctx.clone(), MemoryBudget::from_mb(1)));
        let mut a = allocator(&ctx, Shape::vector(10));
        a.set_alignment(64);
        a.set_associated_memory_group(&group);
        assert!(a.is_managed());

        a.allocate().unwrap();
        assert!(a.is_allocated());
        assert!(a.cl_buffer().is_none());
        assert_eq!(group.blob_sizes(), vec![64]);

        group.acquire().unwrap();
        assert_eq!(a.cl_buffer().unwrap().size(), 64);

        // free is a no-op: the group still owns the memory
        a.free();
        assert!(a.is_allocated());
        assert!(a.cl_buffer().is_some());

        group.release();
        assert!(a.cl_buffer().is_none());
    }

    #[test]
    fn test_map_unmap_balance() {
        let ctx = ctx();
        let queue = ctx.create_queue();
        let mut a = allocator(&ctx, Shape::vector(4));
        a.allocate().unwrap();

        a.map(&queue, true);
        assert!(a.mapping().unwrap().is_ready());
        a.mapping().unwrap().bytes()[0] = 7;
        let fence = a.unmap(&queue);
        assert!(a.mapping().is_none());
        fence.wait();
        assert_eq!(a.cl_buffer().unwrap().to_vec()[0], 7);
    }

    #[test]
    #[should_panic(expected = "without backing memory")]
    fn test_map_unallocated_panics() {
        let ctx = ctx();
        let queue = ctx.create_queue();
        allocator(&ctx, Shape::vector(4)).map(&queue, true);
    }

    #[test]
    #[should_panic(expected = "not mapped")]
    fn test_unmap_without_map_panics() {
        let ctx = ctx();
        let queue = ctx.create_queue();
        let mut a = allocator(&ctx, Shape::vector(4));
        a.allocate().unwrap();
        a.unmap(&queue);
    }

    #[test]
    fn test_per_channel_arrays() {
        let ctx = ctx();
        let mut a = TensorAllocator::new(&ctx);
        let q = QuantizationInfo::per_channel_with_offsets(vec![0.5, 0.25, 2.0], vec![0, 1, -1]);
        a.init(TensorInfo::new(Shape::d3(2, 2, 3), DType::QSymm8PerChannel).with_quantization(q));
        assert!(!a.quantization().is_per_channel());

        a.allocate().unwrap();
        let view = a.quantization();
        assert!(view.is_per_channel());
        assert_eq!(view.scale().unwrap().download().unwrap(), vec![0.5, 0.25, 2.0]);
        assert_eq!(view.offset().unwrap().download().unwrap(), vec![0, 1, -1]);
        assert_eq!(view.uniform().scale, 0.5);

        // every view borrows the same arrays
        let again = a.quantization();
        assert!(std::ptr::eq(view.scale().unwrap(), again.scale().unwrap()));
        assert!(std::ptr::eq(view.offset().unwrap(), again.offset().unwrap()));

        a.free();
        assert!(!a.quantization().is_per_channel());
    }

    #[test]
    fn test_uniform_quantization_view() {
        let ctx = ctx();
        let mut a = TensorAllocator::new(&ctx);
        a.init(
            TensorInfo::new(Shape::vector(4), DType::QAsymm8)
                .with_quantization(QuantizationInfo::new(0.1, 128)),
        );
        a.allocate().unwrap();
        let view = a.quantization();
        assert!(!view.is_per_channel());
        assert_eq!(view.uniform().offset, 128);
        assert!(view.scale().is_none());
    }
}
