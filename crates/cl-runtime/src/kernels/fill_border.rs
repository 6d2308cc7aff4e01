// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Writes the padding around every x/y plane of a tensor.
//!
//! Border-reading kernels expect defined values in the halo they read.
//! The kernel runs in place on the tensor bound to `Dst`; one work item
//! handles one border element of a plane.

use device_context::CommandQueue;
use tensor_core::{BorderSize, Dimension, Status, TensorError, TensorInfo, Window, MAX_DIMS};

use crate::element::{offset_of_signed, CoordIter, ElementCodec};
use crate::kernel::{enqueue, for_each_slice, BoundTensor};
use crate::{BuildOptions, ClKernel, KernelCore, KernelLibrary, KernelType, RuntimeError, TensorPack, TensorSlot};

const OP: &str = "fill_border";

/// How border elements are filled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
pub enum BorderMode {
    /// A constant value, quantized with the tensor's parameters.
    #[default]
    Constant,
    /// The nearest element inside the tensor.
    Replicate,
}

#[derive(Debug)]
pub struct FillBorderKernel {
    core: KernelCore,
    border: BorderSize,
    mode: BorderMode,
    constant: f32,
}

impl FillBorderKernel {
    pub fn validate(tensor: &TensorInfo, border: BorderSize) -> Status {
        if !tensor.is_initialised() {
            return Err(TensorError::Uninitialised { op: OP });
        }
        if !tensor.padding().covers(&border) {
            return Err(TensorError::InsufficientPadding {
                op: OP,
                required: border,
                available: tensor.padding(),
            });
        }
        Ok(())
    }

    pub fn configure(
        library: &KernelLibrary,
        tensor: &TensorInfo,
        border: BorderSize,
        mode: BorderMode,
        constant: f32,
    ) -> Result<Self, RuntimeError> {
        Self::validate(tensor, border)?;
        let shape = tensor.shape();
        let (w, h) = (shape.dim(0), shape.dim(1));
        let total = (w + border.left + border.right) * (h + border.top + border.bottom);
        let border_elements = if border.is_empty() { 0 } else { total - w * h };

        let kernel_name = match mode {
            BorderMode::Constant => "fill_image_borders_constant",
            BorderMode::Replicate => "fill_image_borders_replicate",
        };
        let mut opts = BuildOptions::new();
        opts.add_option(format!("-DDATA_TYPE={}", tensor.dtype().cl_type_name()));
        opts.add_option(format!("-DBORDER_SIZE_TOP={}", border.top));
        opts.add_option(format!("-DBORDER_SIZE_BOTTOM={}", border.bottom));
        opts.add_option(format!("-DBORDER_SIZE_LEFT={}", border.left));
        opts.add_option(format!("-DBORDER_SIZE_RIGHT={}", border.right));
        opts.add_option_if(mode == BorderMode::Constant, format!("-DCONSTANT_VALUE={constant}"));
        let program = library.create_kernel(kernel_name, &opts)?;

        // x: border elements of one plane, z and up: the planes
        let mut window = Window::from_shape(shape, &[1]);
        window.set(Window::DIM_X, Dimension::new(0, border_elements, 1));
        window.set(Window::DIM_Y, Dimension::new(0, 1, 1));

        let mut core = KernelCore::new(library, program, KernelType::Unknown);
        core.configure_window(window);
        core.set_config_id(format!("{kernel_name}_{}_{w}_{h}", tensor.dtype().as_str()));
        tracing::debug!(kernel = kernel_name, ?border, border_elements, "configured fill border kernel");

        Ok(Self {
            core,
            border,
            mode,
            constant,
        })
    }

    pub fn border(&self) -> BorderSize {
        self.border
    }

    pub fn mode(&self) -> BorderMode {
        self.mode
    }
}

impl ClKernel for FillBorderKernel {
    fn core(&self) -> &KernelCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut KernelCore {
        &mut self.core
    }

    fn run(&self, pack: &TensorPack<'_>, window: &Window, queue: &CommandQueue) -> Result<(), RuntimeError> {
        debug_assert!(window.is_subwindow_of(self.window()), "window outside the kernel's window");
        let tensor = pack.bind(self.name(), TensorSlot::Dst)?;

        for_each_slice(window, |slice| {
            let (tensor, border, mode, constant) = (tensor.clone(), self.border, self.mode, self.constant);
            enqueue(
                queue,
                self,
                &slice,
                self.lws_hint(),
                self.core.use_dummy_work_items(),
                move || fill_planes(&tensor, &slice, border, mode, constant),
            );
            Ok(())
        })
    }
}

fn fill_planes(tensor: &BoundTensor, slice: &Window, border: BorderSize, mode: BorderMode, constant: f32) {
    let info = &tensor.info;
    let codec = ElementCodec::new(info);
    let (w, h) = (info.shape().dim(0) as isize, info.shape().dim(1) as isize);
    let mut bytes = tensor.buffer.bytes();

    let mut start = [0; MAX_DIMS];
    let mut end = [1; MAX_DIMS];
    for i in Window::DIM_Z..MAX_DIMS {
        start[i] = slice.dim(i).start();
        end[i] = slice.dim(i).end().min(info.shape().dim(i));
    }
    for plane in CoordIter::new(start, end) {
        let mut at = [0isize; MAX_DIMS];
        for (a, c) in at.iter_mut().zip(plane.iter()) {
            *a = *c as isize;
        }
        for y in -(border.top as isize)..h + border.bottom as isize {
            for x in -(border.left as isize)..w + border.right as isize {
                if (0..w).contains(&x) && (0..h).contains(&y) {
                    continue;
                }
                let value = match mode {
                    BorderMode::Constant => constant,
                    BorderMode::Replicate => {
                        at[0] = x.clamp(0, w - 1);
                        at[1] = y.clamp(0, h - 1);
                        codec.load(&bytes, offset_of_signed(info, &at))
                    }
                };
                at[0] = x;
                at[1] = y;
                codec.store(&mut bytes, offset_of_signed(info, &at), value);
            }
        }
    }
}
