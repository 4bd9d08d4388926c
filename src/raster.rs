use std::fmt::Debug;
use std::sync::atomic::Ordering;

use slotmap::{new_key_type, SlotMap};

use crate::accel::{AcceleratorContext, SharedIndexMemory};
#[cfg(feature = "metal")]
use crate::accel::{bytes_for_u32_elems, Device};
use crate::error::SortError;

/// The rasterizer side of the shared index buffer. The rasterizer owns the
/// allocation; the sorter only borrows its memory through `export_memory`.
pub trait RasterDevice {
    type Buffer: Copy + Eq + Debug;

    fn create_index_buffer(&mut self, element_count: usize) -> Result<Self::Buffer, SortError>;

    /// Memory backing `buffer`, in a form the compute device can register.
    fn export_memory(&self, buffer: Self::Buffer) -> Option<SharedIndexMemory>;

    fn delete_buffer(&mut self, buffer: Self::Buffer);

    fn is_buffer(&self, buffer: Self::Buffer) -> bool;
}

impl<T: RasterDevice + ?Sized> RasterDevice for &mut T {
    type Buffer = T::Buffer;

    fn create_index_buffer(&mut self, element_count: usize) -> Result<Self::Buffer, SortError> {
        (**self).create_index_buffer(element_count)
    }

    fn export_memory(&self, buffer: Self::Buffer) -> Option<SharedIndexMemory> {
        (**self).export_memory(buffer)
    }

    fn delete_buffer(&mut self, buffer: Self::Buffer) {
        (**self).delete_buffer(buffer)
    }

    fn is_buffer(&self, buffer: Self::Buffer) -> bool {
        (**self).is_buffer(buffer)
    }
}

new_key_type! {
    pub struct RasterBufferId;
}

struct RasterBuffer {
    memory: SharedIndexMemory,
    element_count: usize,
}

enum Allocator {
    Host,
    #[cfg(feature = "metal")]
    Metal(metal::Device),
}

/// In-process rasterizer that only manages index buffers. Draw order can be
/// read back with `read_indices`.
pub struct HeadlessRaster {
    buffers: SlotMap<RasterBufferId, RasterBuffer>,
    allocator: Allocator,
}

impl Default for HeadlessRaster {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessRaster {
    /// Host-memory buffers, shareable with the CPU device.
    pub fn new() -> Self {
        Self {
            buffers: SlotMap::with_key(),
            allocator: Allocator::Host,
        }
    }

    /// Allocates buffers in memory the given context's device can register.
    pub fn for_context(context: &AcceleratorContext) -> Self {
        let allocator = match context.device() {
            #[cfg(feature = "metal")]
            Device::Metal(gpu) => Allocator::Metal(gpu.device.clone()),
            _ => Allocator::Host,
        };

        Self {
            buffers: SlotMap::with_key(),
            allocator,
        }
    }

    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    /// Contents of `buffer` as the draw would consume them. Only meaningful
    /// while the buffer is available for raster.
    pub fn read_indices(&self, buffer: RasterBufferId) -> Option<Vec<u32>> {
        let entry = self.buffers.get(buffer)?;
        match &entry.memory {
            SharedIndexMemory::Host(words) => Some(
                words[..entry.element_count]
                    .iter()
                    .map(|w| w.load(Ordering::Acquire))
                    .collect(),
            ),
            #[cfg(feature = "metal")]
            SharedIndexMemory::Metal(metal_buffer) => {
                if entry.element_count == 0 {
                    return Some(Vec::new());
                }
                let contents = metal_buffer.contents() as *const u32;
                // Shared storage; the buffer holds at least `element_count` words.
                let words = unsafe { std::slice::from_raw_parts(contents, entry.element_count) };
                Some(words.to_vec())
            }
        }
    }
}

impl RasterDevice for HeadlessRaster {
    type Buffer = RasterBufferId;

    fn create_index_buffer(&mut self, element_count: usize) -> Result<RasterBufferId, SortError> {
        let memory = match &self.allocator {
            Allocator::Host => SharedIndexMemory::host(element_count),
            #[cfg(feature = "metal")]
            Allocator::Metal(device) => SharedIndexMemory::Metal(
                crate::accel::gpu::new_shared_buffer(device, bytes_for_u32_elems(element_count)?),
            ),
        };

        Ok(self.buffers.insert(RasterBuffer {
            memory,
            element_count,
        }))
    }

    fn export_memory(&self, buffer: RasterBufferId) -> Option<SharedIndexMemory> {
        self.buffers.get(buffer).map(|entry| entry.memory.clone())
    }

    fn delete_buffer(&mut self, buffer: RasterBufferId) {
        if self.buffers.remove(buffer).is_none() {
            log::warn!("delete of unknown raster buffer {buffer:?}");
        }
    }

    fn is_buffer(&self, buffer: RasterBufferId) -> bool {
        self.buffers.contains_key(buffer)
    }
}
