use std::sync::atomic::Ordering;

use rayon::prelude::*;

use crate::accel::{
    AcceleratorContext, DepthBuffer, Device, IndexView, PositionBuffer, SharedIndexMemory,
};
use crate::error::SortError;
use crate::math::{Vec3, ViewMatrix};

#[cfg(feature = "metal")]
use crate::accel::gpu::{
    compile_library, create_pipeline, dispatch_1d, set_bytes_struct, GpuDepthParams,
    THREADS_PER_GROUP_1D,
};

#[cfg(feature = "metal")]
const DEPTH_PACK_SOURCE: &str = include_str!("../shaders/depth_pack.metal");

/// Camera-space Z of `position`: the third column of the row-vector view
/// matrix dotted with the point, plus the translation row.
#[inline]
pub fn camera_depth(position: Vec3, view: &ViewMatrix) -> f32 {
    let [x, y, z, w] = view.depth_axis();
    position.x * x + position.y * y + position.z * z + w
}

enum KernelProgram {
    Host,
    #[cfg(feature = "metal")]
    Metal(metal::ComputePipelineState),
}

/// Writes `depth[i]` and `index[i] = i` for every splat. Lanes are
/// independent, so the launch is a plain parallel map.
pub struct DepthPackingKernel {
    program: KernelProgram,
}

impl std::fmt::Debug for DepthPackingKernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let program = match self.program {
            KernelProgram::Host => "host",
            #[cfg(feature = "metal")]
            KernelProgram::Metal(_) => "metal",
        };
        f.debug_struct("DepthPackingKernel")
            .field("program", &program)
            .finish()
    }
}

impl DepthPackingKernel {
    pub fn load(context: &AcceleratorContext) -> Result<Self, SortError> {
        let program = match context.device() {
            Device::Cpu(_) => KernelProgram::Host,
            #[cfg(feature = "metal")]
            Device::Metal(gpu) => {
                let library = compile_library(&gpu.device, DEPTH_PACK_SOURCE)?;
                KernelProgram::Metal(create_pipeline(&gpu.device, &library, "pack_depths")?)
            }
        };
        Ok(Self { program })
    }

    /// Enqueues the kernel on the context's stream.
    #[allow(unreachable_patterns)]
    pub fn launch(
        &self,
        context: &mut AcceleratorContext,
        positions: &PositionBuffer,
        depths: &DepthBuffer,
        indices: &IndexView,
        view: &ViewMatrix,
    ) -> Result<(), SortError> {
        indices.ensure_writable()?;
        let count = positions.len();
        if depths.len() != count || indices.len() != count {
            return Err(SortError::Other(format!(
                "depth kernel buffers disagree: {count} positions, {} depths, {} indices",
                depths.len(),
                indices.len()
            )));
        }
        u32::try_from(count)?;

        match (
            &self.program,
            context.device_mut(),
            positions,
            depths,
            indices.memory(),
        ) {
            (
                KernelProgram::Host,
                Device::Cpu(cpu),
                PositionBuffer::Host(points),
                DepthBuffer::Host(depth_words),
                SharedIndexMemory::Host(index_words),
            ) => {
                let index_words = &index_words[..count];
                cpu.install(|| {
                    points
                        .par_iter()
                        .zip(depth_words.par_iter())
                        .zip(index_words.par_iter())
                        .enumerate()
                        .for_each(|(i, ((p, d), idx))| {
                            d.store(camera_depth(*p, view).to_bits(), Ordering::Relaxed);
                            idx.store(i as u32, Ordering::Relaxed);
                        });
                });
                Ok(())
            }
            #[cfg(feature = "metal")]
            (
                KernelProgram::Metal(pipeline),
                Device::Metal(gpu),
                PositionBuffer::Metal {
                    buffer: position_buffer,
                    ..
                },
                DepthBuffer::Metal {
                    buffer: depth_buffer,
                    ..
                },
                SharedIndexMemory::Metal(index_buffer),
            ) => {
                let params = GpuDepthParams {
                    view_z: view.depth_axis(),
                    count: count as u32,
                    _pad: [0; 3],
                };
                let encoder = gpu.command_buffer().new_compute_command_encoder();
                encoder.set_compute_pipeline_state(pipeline);
                encoder.set_buffer(0, Some(position_buffer), 0);
                encoder.set_buffer(1, Some(depth_buffer), 0);
                encoder.set_buffer(2, Some(index_buffer), 0);
                set_bytes_struct(encoder, 3, &params);
                dispatch_1d(encoder, params.count, THREADS_PER_GROUP_1D);
                encoder.end_encoding();
                Ok(())
            }
            _ => Err(SortError::DeviceMismatch {
                operation: "depth kernel launch",
            }),
        }
    }
}
