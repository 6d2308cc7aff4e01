// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Kernel scheduler.
//!
//! The [`Scheduler`] bundles what every dispatch needs: the context, one
//! in-order command queue, the kernel library with its program cache, and
//! the blob pool that backs memory groups. Kernels are enqueued over their
//! maximum window; [`Scheduler::sync`] waits for the queue and, when
//! profiling is enabled, folds the executed dispatches into
//! [`DispatchMetrics`].

use std::sync::{Mutex, MutexGuard, PoisonError};

use device_context::{ClContext, CommandQueue};
use memory_manager::{BlobPool, MemoryGroup};
use tensor_core::{TensorInfo, Window};

use crate::{ClKernel, ClTensor, DispatchMetrics, KernelLibrary, RuntimeConfig, RuntimeError, TensorPack};

pub struct Scheduler {
    context: ClContext,
    queue: CommandQueue,
    library: KernelLibrary,
    pool: BlobPool,
    config: RuntimeConfig,
    metrics: Mutex<DispatchMetrics>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Scheduler {
    /// Creates a scheduler on an existing context.
    ///
    /// # Errors
    /// [`RuntimeError::ConfigError`] if the memory budget does not parse.
    pub fn new(context: ClContext, config: &RuntimeConfig) -> Result<Self, RuntimeError> {
        let budget = config.parse_budget()?;
        let library =
            KernelLibrary::new(context.options().clone()).with_lws_heuristics(config.use_lws_heuristics);
        tracing::info!(
            device = %context.options().name,
            %budget,
            profiling = config.enable_profiling,
            lws_heuristics = config.use_lws_heuristics,
            "scheduler created"
        );
        Ok(Self {
            queue: context.create_queue(),
            pool: BlobPool::new(context.clone(), budget),
            context,
            library,
            config: config.clone(),
            metrics: Mutex::new(DispatchMetrics::new()),
        })
    }

    /// Creates the context of the configured device and a scheduler on it.
    pub fn from_config(config: &RuntimeConfig) -> Result<Self, RuntimeError> {
        Self::new(ClContext::new(config.device_options()), config)
    }

    // ── Dispatch ────────────────────────────────────────────────

    /// Enqueues `kernel` over its maximum window. With `flush`, the queue
    /// is submitted before returning.
    pub fn enqueue(&self, kernel: &dyn ClKernel, pack: &TensorPack<'_>, flush: bool) -> Result<(), RuntimeError> {
        let window = *kernel.window();
        self.enqueue_window(kernel, pack, &window, flush)
    }

    /// Enqueues `kernel` over `window`, which must lie within the kernel's
    /// maximum window.
    pub fn enqueue_window(
        &self,
        kernel: &dyn ClKernel,
        pack: &TensorPack<'_>,
        window: &Window,
        flush: bool,
    ) -> Result<(), RuntimeError> {
        tracing::debug!(kernel = kernel.name(), config_id = kernel.config_id(), flush, "scheduling kernel");
        kernel.run(pack, window, &self.queue)?;
        if flush {
            self.queue.flush();
            self.collect_metrics();
        }
        Ok(())
    }

    /// Waits for every enqueued command.
    pub fn sync(&self) {
        self.queue.finish();
        self.collect_metrics();
    }

    fn collect_metrics(&self) {
        if !self.config.enable_profiling {
            return;
        }
        let executed = self.queue.take_dispatch_history();
        let mut metrics = lock(&self.metrics);
        metrics.record_all(&executed);
        metrics.update_peak_memory(self.context.peak_bytes());
    }

    // ── Resources ───────────────────────────────────────────────

    /// A new memory group drawing from the scheduler's blob pool.
    pub fn new_memory_group(&self) -> MemoryGroup {
        MemoryGroup::new(self.pool.clone())
    }

    /// A tensor on the scheduler's context using the configured alignment.
    pub fn new_tensor(&self, info: TensorInfo) -> ClTensor {
        let mut tensor = ClTensor::new(&self.context, info);
        tensor.allocator_mut().set_alignment(self.config.alignment);
        tensor
    }

    pub fn context(&self) -> &ClContext {
        &self.context
    }

    pub fn queue(&self) -> &CommandQueue {
        &self.queue
    }

    pub fn library(&self) -> &KernelLibrary {
        &self.library
    }

    pub fn pool(&self) -> &BlobPool {
        &self.pool
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Snapshot of the collected dispatch metrics.
    pub fn metrics(&self) -> DispatchMetrics {
        lock(&self.metrics).clone()
    }

    pub fn reset_metrics(&self) {
        lock(&self.metrics).reset();
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("device", &self.context.options().name)
            .field("queue", &self.queue)
            .field("library", &self.library)
            .field("pool", &self.pool)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tensor_core::{DType, Shape};

    use crate::kernels::{ArithmeticOp, ConvertPolicy, ElementwiseKernel};
    use crate::TensorSlot;

    fn add_setup(scheduler: &Scheduler) -> (ElementwiseKernel, ClTensor, ClTensor, ClTensor) {
        let info = TensorInfo::new(Shape::d2(4, 2), DType::F32);
        let mut a = scheduler.new_tensor(info.clone());
        let mut b = scheduler.new_tensor(info);
        let mut out = ClTensor::empty(scheduler.context());
        let k = ElementwiseKernel::configure(
            scheduler.library(),
            ArithmeticOp::Add,
            a.info(),
            b.info(),
            out.info_mut(),
            ConvertPolicy::Saturate,
        )
        .unwrap();
        for t in [&mut a, &mut b, &mut out] {
            t.allocate().unwrap();
        }
        (k, a, b, out)
    }

    #[test]
    fn test_enqueue_and_sync() {
        let scheduler = Scheduler::from_config(&RuntimeConfig::default()).unwrap();
        let queue = scheduler.queue().clone();
        let (k, mut a, mut b, mut out) = add_setup(&scheduler);
        a.fill_f32(&queue, 1.5).unwrap();
        b.fill_f32(&queue, 2.0).unwrap();

        let pack = TensorPack::new()
            .with(TensorSlot::Src0, &a)
            .with(TensorSlot::Src1, &b)
            .with(TensorSlot::Dst, &out);
        scheduler.enqueue(&k, &pack, false).unwrap();
        assert!(queue.pending_commands() > 0);
        scheduler.sync();
        assert_eq!(queue.pending_commands(), 0);
        assert_eq!(out.to_f32_vec(&queue).unwrap(), vec![3.5; 8]);

        let metrics = scheduler.metrics();
        assert_eq!(metrics.kernel("elementwise_operation_ADD").unwrap().dispatches, 1);
        assert!(metrics.peak_device_bytes > 0);
    }

    #[test]
    fn test_profiling_disabled() {
        let config = RuntimeConfig {
            enable_profiling: false,
            ..RuntimeConfig::default()
        };
        let scheduler = Scheduler::from_config(&config).unwrap();
        let (k, a, b, out) = add_setup(&scheduler);
        let pack = TensorPack::new()
            .with(TensorSlot::Src0, &a)
            .with(TensorSlot::Src1, &b)
            .with(TensorSlot::Dst, &out);
        scheduler.enqueue(&k, &pack, true).unwrap();
        assert_eq!(scheduler.metrics().num_dispatches, 0);
    }

    #[test]
    fn test_lws_heuristics_follow_config() {
        let config = RuntimeConfig {
            use_lws_heuristics: false,
            ..RuntimeConfig::default()
        };
        let scheduler = Scheduler::from_config(&config).unwrap();
        assert!(!scheduler.library().use_lws_heuristics());
        assert!(Scheduler::from_config(&RuntimeConfig::default()).unwrap().library().use_lws_heuristics());
    }

    #[test]
    fn test_invalid_budget() {
        let config = RuntimeConfig {
            memory_budget: "lots".to_string(),
            ..RuntimeConfig::default()
        };
        assert!(matches!(Scheduler::from_config(&config), Err(RuntimeError::ConfigError(_))));
    }

    #[test]
    fn test_memory_groups_share_the_pool() {
        let scheduler = Scheduler::from_config(&RuntimeConfig::default()).unwrap();
        let mut t = scheduler.new_tensor(TensorInfo::new(Shape::d2(16, 16), DType::F32));
        assert_eq!(t.allocator().alignment(), 64);
        let group = scheduler.new_memory_group();
        t.associate_memory_group(&group);
        t.allocate().unwrap();
        {
            let _scope = group.scope().unwrap();
            assert!(t.allocator().cl_buffer().is_some());
            assert_eq!(scheduler.pool().allocated_bytes(), 1024);
        }
        assert_eq!(scheduler.pool().allocated_bytes(), 0);
    }
}
