use metal::MTLCommandBufferStatus;

use crate::error::SortError;

/// Commits and blocks until the device finishes. There is deliberately no
/// timeout: a stalled device stalls the caller.
pub fn commit_and_wait(
    command_buffer: &metal::CommandBufferRef,
    stage: &'static str,
) -> Result<(), SortError> {
    command_buffer.commit();
    command_buffer.wait_until_completed();

    match command_buffer.status() {
        MTLCommandBufferStatus::Completed => Ok(()),
        MTLCommandBufferStatus::Error => {
            log::error!("Metal command buffer failed at {stage}");
            Err(SortError::CommandBufferFailed { stage })
        }
        status => Err(SortError::Other(format!(
            "Metal command buffer at {stage} finished in unexpected state {status:?}"
        ))),
    }
}
