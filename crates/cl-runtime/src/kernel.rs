// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Kernel base and window-based dispatch.
//!
//! A kernel is created unconfigured by its `configure()` constructor, which
//! validates its tensors once, builds its program through the
//! [`KernelLibrary`] and computes its maximum execution window. From then on
//! [`ClKernel::run`] may be called any number of times: it binds the tensors
//! found in a [`TensorPack`] and enqueues one dispatch per slice of the
//! window, without validating again.
//!
//! # Dispatch
//!
//! ```text
//! Window {(0,64,4), (0,16,1), (0,3,1), ...}
//!       │  gws_from_window: iterations per dimension, z collapses dims ≥ 2
//!       ▼
//! gws (16, 16, 3) ─┐
//! lws hint (4,4,2) ┴─► enqueue(): drop lws if it exceeds the work-group
//!                                  limit or the gws, then enqueue_ndrange
//! ```

use std::fmt;

use device_context::{CommandQueue, DeviceBuffer, Event, NdRange};
use tensor_core::{BorderSize, TensorInfo, Window};

use crate::lws::select_local_work_size_with_default;
use crate::{CompiledKernel, DeviceTensor, KernelLibrary, RuntimeError};

/// Config id of kernels that have not set their own.
pub const DEFAULT_CONFIG_ID: &str = "no_config_id";

// ── Kernel categories ───────────────────────────────────────────

/// Algorithm family of a kernel, used to pick its local work size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
pub enum KernelType {
    #[default]
    Unknown,
    Depthwise,
    Direct,
    Elementwise,
    Gemm,
    Pool,
    Winograd,
}

impl KernelType {
    pub const ALL: [KernelType; 7] = [
        KernelType::Unknown,
        KernelType::Depthwise,
        KernelType::Direct,
        KernelType::Elementwise,
        KernelType::Gemm,
        KernelType::Pool,
        KernelType::Winograd,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            KernelType::Unknown => "unknown",
            KernelType::Depthwise => "depthwise",
            KernelType::Direct => "direct",
            KernelType::Elementwise => "elementwise",
            KernelType::Gemm => "gemm",
            KernelType::Pool => "pool",
            KernelType::Winograd => "winograd",
        }
    }

    /// Parses a category name, case-insensitively.
    pub fn from_name(name: &str) -> Option<Self> {
        let lower = name.to_ascii_lowercase();
        Self::ALL.into_iter().find(|t| t.as_str() == lower)
    }
}

impl fmt::Display for KernelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Tensor binding ──────────────────────────────────────────────

/// Argument slot of a kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub enum TensorSlot {
    Src0,
    Src1,
    Src2,
    Dst,
}

impl TensorSlot {
    fn index(self) -> usize {
        match self {
            TensorSlot::Src0 => 0,
            TensorSlot::Src1 => 1,
            TensorSlot::Src2 => 2,
            TensorSlot::Dst => 3,
        }
    }
}

/// Tensors a kernel runs on, bound by slot.
///
/// The pack only borrows: kernels never own the tensors they process.
#[derive(Clone, Copy, Default)]
pub struct TensorPack<'a> {
    tensors: [Option<&'a dyn DeviceTensor>; 4],
}

impl<'a> TensorPack<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `tensor` to `slot`, replacing any previous binding.
    pub fn with(mut self, slot: TensorSlot, tensor: &'a dyn DeviceTensor) -> Self {
        self.add(slot, tensor);
        self
    }

    pub fn add(&mut self, slot: TensorSlot, tensor: &'a dyn DeviceTensor) {
        self.tensors[slot.index()] = Some(tensor);
    }

    pub fn get(&self, slot: TensorSlot) -> Option<&'a dyn DeviceTensor> {
        self.tensors[slot.index()]
    }

    pub fn len(&self) -> usize {
        self.tensors.iter().filter(|t| t.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Metadata and memory of the tensor in `slot`, for a kernel body.
    pub(crate) fn bind(&self, kernel: &str, slot: TensorSlot) -> Result<BoundTensor, RuntimeError> {
        let tensor = self.get(slot).ok_or_else(|| RuntimeError::MissingTensor {
            kernel: kernel.to_string(),
            slot,
        })?;
        let buffer = tensor.cl_buffer().ok_or_else(|| RuntimeError::UnallocatedTensor {
            kernel: kernel.to_string(),
            slot,
        })?;
        Ok(BoundTensor {
            info: tensor.info().clone(),
            buffer,
        })
    }

    /// Like [`TensorPack::bind`], for optional arguments.
    pub(crate) fn bind_optional(
        &self,
        kernel: &str,
        slot: TensorSlot,
    ) -> Result<Option<BoundTensor>, RuntimeError> {
        match self.get(slot) {
            Some(_) => self.bind(kernel, slot).map(Some),
            None => Ok(None),
        }
    }
}

impl fmt::Debug for TensorPack<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bound: Vec<_> = [TensorSlot::Src0, TensorSlot::Src1, TensorSlot::Src2, TensorSlot::Dst]
            .into_iter()
            .filter(|s| self.get(*s).is_some())
            .collect();
        f.debug_struct("TensorPack").field("bound", &bound).finish()
    }
}

/// A tensor captured by a dispatch: owned metadata plus a buffer handle,
/// so the kernel body can run after `run()` returns.
#[derive(Debug, Clone)]
pub(crate) struct BoundTensor {
    pub(crate) info: TensorInfo,
    pub(crate) buffer: DeviceBuffer,
}

// ── Kernel state ────────────────────────────────────────────────

/// State shared by every kernel: its program, window and launch hints.
#[derive(Debug, Clone)]
pub struct KernelCore {
    program: CompiledKernel,
    kernel_type: KernelType,
    window: Window,
    lws_hint: NdRange,
    default_lws: NdRange,
    use_lws_heuristics: bool,
    use_dummy_work_items: bool,
    max_work_group_size: usize,
    config_id: String,
}

impl KernelCore {
    pub(crate) fn new(library: &KernelLibrary, program: CompiledKernel, kernel_type: KernelType) -> Self {
        let device = library.device();
        Self {
            program,
            kernel_type,
            window: Window::default(),
            lws_hint: library.default_ndrange(),
            default_lws: library.default_ndrange(),
            use_lws_heuristics: library.use_lws_heuristics(),
            use_dummy_work_items: false,
            max_work_group_size: device.max_work_group_size,
            config_id: DEFAULT_CONFIG_ID.to_string(),
        }
    }

    /// Sets the maximum window. A hint still equal to the library default
    /// is replaced by the category heuristic for that window.
    pub(crate) fn configure_window(&mut self, window: Window) {
        self.window = window;
        if self.use_lws_heuristics && self.lws_hint == self.default_lws {
            // dummy work items only pad the gws, so they are left out here
            let gws = gws_from_window(&window, false);
            self.lws_hint = select_local_work_size_with_default(self.kernel_type, gws, self.default_lws);
        }
    }

    pub(crate) fn set_config_id(&mut self, config_id: String) {
        self.config_id = config_id;
    }

    pub(crate) fn set_use_dummy_work_items(&mut self, enabled: bool) {
        self.use_dummy_work_items = enabled;
    }

    pub fn name(&self) -> &str {
        self.program.name()
    }

    pub fn program(&self) -> &CompiledKernel {
        &self.program
    }

    pub fn kernel_type(&self) -> KernelType {
        self.kernel_type
    }

    pub fn window(&self) -> &Window {
        &self.window
    }

    pub fn lws_hint(&self) -> NdRange {
        self.lws_hint
    }

    pub fn config_id(&self) -> &str {
        &self.config_id
    }

    pub fn use_dummy_work_items(&self) -> bool {
        self.use_dummy_work_items
    }

    pub fn max_work_group_size(&self) -> usize {
        self.max_work_group_size
    }
}

// ── Kernel trait ────────────────────────────────────────────────

/// A configured compute kernel.
///
/// Implementors are created by a `configure()` constructor that validates
/// once; `run()` only enqueues work.
pub trait ClKernel: Send + Sync {
    fn core(&self) -> &KernelCore;

    fn core_mut(&mut self) -> &mut KernelCore;

    /// Halo the kernel reads around its output region. Input tensors must
    /// carry at least this much padding.
    fn border_size(&self) -> BorderSize {
        BorderSize::empty()
    }

    /// Enqueues the kernel over `window`, which must lie within
    /// [`ClKernel::window`].
    fn run(&self, pack: &TensorPack<'_>, window: &Window, queue: &CommandQueue) -> Result<(), RuntimeError>;

    fn name(&self) -> &str {
        self.core().name()
    }

    fn kernel_type(&self) -> KernelType {
        self.core().kernel_type()
    }

    /// Maximum execution window.
    fn window(&self) -> &Window {
        self.core().window()
    }

    fn lws_hint(&self) -> NdRange {
        self.core().lws_hint()
    }

    fn set_lws_hint(&mut self, hint: NdRange) {
        self.core_mut().lws_hint = hint;
    }

    fn config_id(&self) -> &str {
        self.core().config_id()
    }
}

// ── Dispatch ────────────────────────────────────────────────────

/// Global work size covering `window`.
///
/// Each of x and y is the number of iterations of that dimension; z is the
/// product of the iterations of every higher dimension. With dummy work
/// items, x and y are rounded up to a power of two. Returns the null range
/// when x or y is empty.
pub fn gws_from_window(window: &Window, use_dummy_work_items: bool) -> NdRange {
    let (x, y) = (window.x(), window.y());
    if x.end() == x.start() || y.end() == y.start() {
        return NdRange::null();
    }
    let mut gws_x = (x.end() - x.start()) / x.step();
    let mut gws_y = (y.end() - y.start()) / y.step();
    let gws_z: usize = (Window::DIM_Z..tensor_core::MAX_DIMS)
        .map(|i| window.num_iterations(i))
        .product();
    if use_dummy_work_items {
        gws_x = gws_x.next_power_of_two();
        gws_y = gws_y.next_power_of_two();
    }
    NdRange::new(gws_x, gws_y, gws_z)
}

/// Enqueues one dispatch of `kernel` over `window`.
///
/// The local size hint is dropped (leaving the choice to the driver) when
/// it asks for more work items than the work-group limit, or when any of
/// its components exceeds the global size. An empty window enqueues
/// nothing and returns a completed event.
pub fn enqueue<F>(
    queue: &CommandQueue,
    kernel: &dyn ClKernel,
    window: &Window,
    lws_hint: NdRange,
    use_dummy_work_items: bool,
    work: F,
) -> Event
where
    F: FnOnce() + Send + 'static,
{
    let gws = gws_from_window(window, use_dummy_work_items);
    if gws.is_null() {
        return Event::completed(kernel.name());
    }

    let max_work_group_size = kernel.core().max_work_group_size();
    let lws = if lws_hint.is_null() {
        None
    } else if lws_hint.total() > max_work_group_size {
        tracing::warn!(
            kernel = kernel.name(),
            %lws_hint,
            max_work_group_size,
            "lws hint exceeds the work-group limit, letting the driver choose"
        );
        None
    } else if lws_hint.dims().iter().zip(gws.dims()).any(|(l, g)| *l > g) {
        tracing::debug!(kernel = kernel.name(), %lws_hint, %gws, "lws hint larger than gws, dropped");
        None
    } else {
        Some(lws_hint)
    };

    queue.enqueue_ndrange(kernel.name(), gws, lws, work)
}

/// Enqueues `body` once per 3-D slice of `window`.
pub(crate) fn for_each_slice<F>(window: &Window, mut body: F) -> Result<(), RuntimeError>
where
    F: FnMut(Window) -> Result<(), RuntimeError>,
{
    let mut slice = window.first_slice_window_3d();
    loop {
        body(slice)?;
        if !window.slide_window_slice_3d(&mut slice) {
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use device_context::{ClContext, DeviceOptions, DeviceProperties};
    use tensor_core::{Dimension, Shape};

    use crate::BuildOptions;

    struct NopKernel {
        core: KernelCore,
    }

    impl NopKernel {
        fn new(library: &KernelLibrary, kernel_type: KernelType, window: Window) -> Self {
            let program = library
                .create_kernel("pooling_layer_2", &BuildOptions::new())
                .unwrap();
            let mut core = KernelCore::new(library, program, kernel_type);
            core.configure_window(window);
            Self { core }
        }
    }

    impl ClKernel for NopKernel {
        fn core(&self) -> &KernelCore {
            &self.core
        }

        fn core_mut(&mut self) -> &mut KernelCore {
            &mut self.core
        }

        fn run(&self, _pack: &TensorPack<'_>, window: &Window, queue: &CommandQueue) -> Result<(), RuntimeError> {
            for_each_slice(window, |slice| {
                enqueue(queue, self, &slice, self.lws_hint(), false, || {});
                Ok(())
            })
        }
    }

    fn library() -> KernelLibrary {
        KernelLibrary::new(DeviceOptions::default())
    }

    #[test]
    fn test_kernel_type_names() {
        for t in KernelType::ALL {
            assert_eq!(KernelType::from_name(t.as_str()), Some(t));
        }
        assert_eq!(KernelType::from_name("GEMM"), Some(KernelType::Gemm));
        assert_eq!(KernelType::from_name("conv"), None);
        assert_eq!(KernelType::default().to_string(), "unknown");
    }

    #[test]
    fn test_gws_from_window() {
        let window = Window::from_shape(&Shape::d4(64, 16, 3, 2), &[4]);
        assert_eq!(gws_from_window(&window, false), NdRange::new(16, 16, 6));

        let odd = Window::from_shape(&Shape::d2(10, 3), &[1]);
        assert_eq!(gws_from_window(&odd, true), NdRange::new(16, 4, 1));

        let mut empty = Window::default();
        empty.set(Window::DIM_X, Dimension::new(4, 4, 1));
        assert!(gws_from_window(&empty, false).is_null());
    }

    #[test]
    fn test_configure_applies_category_heuristic() {
        let window = Window::from_shape(&Shape::d3(300, 10, 1), &[1]);
        let kernel = NopKernel::new(&library(), KernelType::Gemm, window);
        assert_eq!(kernel.lws_hint(), NdRange::new(2, 16, 1));
        assert_eq!(kernel.config_id(), DEFAULT_CONFIG_ID);

        let pool = NopKernel::new(&library(), KernelType::Pool, window);
        assert_eq!(pool.lws_hint(), NdRange::new(128, 1, 1));

        let plain = NopKernel::new(&library().with_lws_heuristics(false), KernelType::Gemm, window);
        assert_eq!(plain.lws_hint(), NdRange::new(128, 1, 1));
    }

    #[test]
    fn test_enqueue_keeps_fitting_hint() {
        let ctx = ClContext::new(DeviceOptions::default());
        let queue = ctx.create_queue();
        let window = Window::from_shape(&Shape::d3(64, 32, 4), &[1]);
        let kernel = NopKernel::new(&library(), KernelType::Depthwise, window);

        kernel.run(&TensorPack::new(), &window, &queue).unwrap();
        queue.finish();
        let history = queue.dispatch_history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].gws, NdRange::new(64, 32, 4));
        assert_eq!(history[0].lws, Some(NdRange::new(8, 4, 2)));
    }

    #[test]
    fn test_enqueue_drops_hint_larger_than_gws() {
        let ctx = ClContext::new(DeviceOptions::default());
        let queue = ctx.create_queue();
        let window = Window::from_shape(&Shape::d2(4, 4), &[1]);
        let kernel = NopKernel::new(&library(), KernelType::Gemm, window);
        assert_eq!(kernel.lws_hint(), NdRange::new(32, 4, 1));

        kernel.run(&TensorPack::new(), &window, &queue).unwrap();
        queue.finish();
        assert_eq!(queue.dispatch_history()[0].lws, None);
    }

    #[test]
    fn test_enqueue_drops_hint_over_work_group_limit() {
        let props = DeviceProperties {
            max_work_group_size: 16,
            ..DeviceProperties::default()
        };
        let options = DeviceOptions::from_properties(&props);
        let ctx = ClContext::new(options.clone());
        let queue = ctx.create_queue();
        let window = Window::from_shape(&Shape::d3(256, 64, 1), &[1]);
        let mut kernel = NopKernel::new(&KernelLibrary::new(options), KernelType::Unknown, window);
        kernel.set_lws_hint(NdRange::new(8, 4, 1));

        kernel.run(&TensorPack::new(), &window, &queue).unwrap();
        queue.finish();
        assert_eq!(queue.dispatch_history()[0].lws, None);
    }

    #[test]
    fn test_run_enqueues_one_dispatch_per_slice() {
        let ctx = ClContext::new(DeviceOptions::default());
        let queue = ctx.create_queue();
        let window = Window::from_shape(&Shape::new(vec![8, 8, 2, 3, 2]), &[1]);
        let kernel = NopKernel::new(&library(), KernelType::Elementwise, window);

        kernel.run(&TensorPack::new(), &window, &queue).unwrap();
        assert_eq!(queue.pending_commands(), 6);
        queue.finish();
        assert!(queue
            .dispatch_history()
            .iter()
            .all(|d| d.gws == NdRange::new(8, 8, 2)));
    }

    #[test]
    fn test_empty_window_enqueues_nothing() {
        let ctx = ClContext::new(DeviceOptions::default());
        let queue = ctx.create_queue();
        let kernel = NopKernel::new(&library(), KernelType::Unknown, Window::default());
        let mut empty = Window::default();
        empty.set(Window::DIM_Y, Dimension::new(0, 0, 1));

        let event = enqueue(&queue, &kernel, &empty, NdRange::null(), false, || {});
        assert!(event.is_complete());
        assert_eq!(queue.pending_commands(), 0);
    }

    #[test]
    fn test_pack_binding() {
        let ctx = ClContext::new(DeviceOptions::default());
        let mut tensor = crate::ClTensor::new(&ctx, TensorInfo::new(Shape::vector(4), tensor_core::DType::F32));
        let pack = TensorPack::new().with(TensorSlot::Src0, &tensor);
        assert_eq!(pack.len(), 1);
        assert!(matches!(
            pack.bind("k", TensorSlot::Dst),
            Err(RuntimeError::MissingTensor { slot: TensorSlot::Dst, .. })
        ));
        assert!(matches!(
            pack.bind("k", TensorSlot::Src0),
            Err(RuntimeError::UnallocatedTensor { slot: TensorSlot::Src0, .. })
        ));
        assert!(pack.bind_optional("k", TensorSlot::Src2).unwrap().is_none());

        tensor.allocate().unwrap();
        let pack = TensorPack::new().with(TensorSlot::Src0, &tensor);
        let bound = pack.bind("k", TensorSlot::Src0).unwrap();
        assert_eq!(bound.buffer.size(), 16);
    }
}
