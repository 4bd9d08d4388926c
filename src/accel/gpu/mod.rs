mod pipeline;
mod sort;
mod sync;
mod types;

use metal::{CommandBuffer, CommandBufferRef, CommandQueue, Device};

use crate::error::SortError;

pub(crate) use pipeline::{
    compile_library, create_pipeline, new_private_buffer, new_shared_buffer, set_bytes_struct,
};
pub(crate) use sort::{
    dispatch_1d, encode_radix_sort, sort_scratch_elements, MetalSortPrograms, MetalSortScratch,
};
pub(crate) use types::{GpuDepthParams, THREADS_PER_GROUP_1D};

/// Metal compute device. The command queue is the single stream; work is
/// encoded into one pending command buffer until `synchronize` commits it.
pub struct MetalDevice {
    pub(crate) device: Device,
    command_queue: CommandQueue,
    pending: Option<CommandBuffer>,
}

impl std::fmt::Debug for MetalDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetalDevice")
            .field("name", &self.device.name())
            .field("pending", &self.pending.is_some())
            .finish()
    }
}

impl MetalDevice {
    pub fn new() -> Result<Self, SortError> {
        let device = Device::system_default().ok_or_else(|| SortError::NoCompatibleDevice {
            reason: "No Metal device found".to_string(),
        })?;
        let command_queue = device.new_command_queue();

        Ok(Self {
            device,
            command_queue,
            pending: None,
        })
    }

    pub fn name(&self) -> String {
        self.device.name().to_string()
    }

    pub(crate) fn command_buffer(&mut self) -> &CommandBufferRef {
        let queue = &self.command_queue;
        self.pending
            .get_or_insert_with(|| queue.new_command_buffer().to_owned())
    }

    pub(crate) fn synchronize(&mut self) -> Result<(), SortError> {
        match self.pending.take() {
            Some(command_buffer) => sync::commit_and_wait(&command_buffer, "sort"),
            None => Ok(()),
        }
    }

    pub(crate) fn discard_pending(&mut self) {
        if self.pending.take().is_some() {
            log::debug!("discarded uncommitted Metal command buffer");
        }
    }
}
