use std::fmt;

use crate::accel::{bytes_for_u32_elems, AcceleratorContext, IndexView, ResourceKey};
use crate::error::SortError;
use crate::raster::RasterDevice;

/// Who may touch the shared index buffer right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InteropState {
    AvailableForRaster,
    MappedToCompute,
}

impl fmt::Display for InteropState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AvailableForRaster => f.write_str("available for raster"),
            Self::MappedToCompute => f.write_str("mapped to compute"),
        }
    }
}

/// Access hint supplied when the buffer is registered with the compute device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum MapFlags {
    #[default]
    None,
    /// Compute only reads the buffer; writable views are refused.
    ReadOnly,
    /// Compute overwrites the whole buffer; prior contents need not survive.
    WriteDiscard,
}

/// A rasterizer index buffer registered with the compute device.
///
/// The rasterizer owns the allocation; the compute side holds a registration
/// and may only write through a view obtained while mapped. Transitions are
/// driven by the caller and are not locked.
#[derive(Debug)]
pub struct InteropIndexBuffer<B> {
    raster_buffer: B,
    resource: ResourceKey,
    state: InteropState,
    element_count: usize,
    flags: MapFlags,
    released: bool,
}

impl<B: Copy + Eq + fmt::Debug> InteropIndexBuffer<B> {
    pub fn create<R>(
        context: &mut AcceleratorContext,
        raster: &mut R,
        element_count: usize,
        flags: MapFlags,
    ) -> Result<Self, SortError>
    where
        R: RasterDevice<Buffer = B>,
    {
        let raster_buffer = raster.create_index_buffer(element_count)?;

        let registered = match raster.export_memory(raster_buffer) {
            Some(memory) => context.register_external(memory, flags),
            None => Err(SortError::RegistrationFailed {
                reason: format!("raster buffer {raster_buffer:?} exposes no shareable memory"),
            }),
        };

        let resource = match registered {
            Ok(resource) => resource,
            Err(err) => {
                raster.delete_buffer(raster_buffer);
                return Err(err);
            }
        };

        log::debug!(
            "registered index buffer {raster_buffer:?} ({element_count} elements, {flags:?})"
        );

        Ok(Self {
            raster_buffer,
            resource,
            state: InteropState::AvailableForRaster,
            element_count,
            flags,
            released: false,
        })
    }

    pub fn map_for_compute(&mut self, context: &mut AcceleratorContext) -> Result<(), SortError> {
        if self.state == InteropState::MappedToCompute {
            log::trace!("index buffer already mapped");
            return Ok(());
        }

        context.map_external(self.resource)?;
        self.state = InteropState::MappedToCompute;
        Ok(())
    }

    pub fn compute_view(&self, context: &AcceleratorContext) -> Result<IndexView, SortError> {
        if self.state != InteropState::MappedToCompute {
            return Err(SortError::InvalidState {
                operation: "compute_view",
                state: self.state,
            });
        }

        let (memory, flags) = context.mapped_external(self.resource)?;
        let expected_bytes = bytes_for_u32_elems(self.element_count)?;
        let actual_bytes = memory.byte_len();
        // Device allocators may round small buffers up, never down.
        if actual_bytes < expected_bytes {
            return Err(SortError::SizeMismatch {
                expected_bytes,
                actual_bytes,
            });
        }

        Ok(IndexView::new(
            memory,
            self.element_count,
            flags != MapFlags::ReadOnly,
        ))
    }

    pub fn unmap_from_compute(
        &mut self,
        context: &mut AcceleratorContext,
    ) -> Result<(), SortError> {
        if self.state == InteropState::AvailableForRaster {
            log::trace!("index buffer already unmapped");
            return Ok(());
        }

        context.unmap_external(self.resource)?;
        self.state = InteropState::AvailableForRaster;
        Ok(())
    }

    /// Unmaps, unregisters and deletes the raster buffer, in that order. A
    /// buffer whose registration could not be dropped is never deleted.
    pub fn dispose<R>(
        mut self,
        context: &mut AcceleratorContext,
        raster: &mut R,
    ) -> Result<(), SortError>
    where
        R: RasterDevice<Buffer = B>,
    {
        let unmapped = self.unmap_from_compute(context);
        let unregistered = context.unregister_external(self.resource);
        self.released = true;

        match &unregistered {
            Ok(()) => {
                raster.delete_buffer(self.raster_buffer);
                log::debug!("released index buffer {:?}", self.raster_buffer);
            }
            Err(err) => log::warn!(
                "index buffer {:?} left allocated, unregister failed: {err}",
                self.raster_buffer
            ),
        }
        unmapped.and(unregistered)
    }

    pub fn is_valid<R>(&self, raster: &R) -> bool
    where
        R: RasterDevice<Buffer = B>,
    {
        raster.is_buffer(self.raster_buffer)
    }

    pub fn raster_buffer(&self) -> B {
        self.raster_buffer
    }

    pub fn resource(&self) -> ResourceKey {
        self.resource
    }

    pub fn state(&self) -> InteropState {
        self.state
    }

    pub fn len(&self) -> usize {
        self.element_count
    }

    pub fn is_empty(&self) -> bool {
        self.element_count == 0
    }

    pub fn flags(&self) -> MapFlags {
        self.flags
    }
}

impl<B> Drop for InteropIndexBuffer<B> {
    fn drop(&mut self) {
        if !self.released {
            log::warn!("interop index buffer dropped without dispose; registration leaked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SorterConfig;
    use crate::raster::HeadlessRaster;

    fn setup() -> (AcceleratorContext, HeadlessRaster) {
        let context = AcceleratorContext::new(&SorterConfig::cpu()).unwrap();
        let raster = HeadlessRaster::for_context(&context);
        (context, raster)
    }

    #[test]
    fn view_requires_mapping() {
        let (mut context, mut raster) = setup();
        let mut buffer = InteropIndexBuffer::create(&mut context, &mut raster, 16, MapFlags::None)
            .unwrap();
        assert_eq!(buffer.state(), InteropState::AvailableForRaster);

        let err = buffer.compute_view(&context).unwrap_err();
        assert!(matches!(
            err,
            SortError::InvalidState {
                state: InteropState::AvailableForRaster,
                ..
            }
        ));

        buffer.map_for_compute(&mut context).unwrap();
        let view = buffer.compute_view(&context).unwrap();
        assert_eq!(view.len(), 16);
        assert!(view.is_writable());

        buffer.unmap_from_compute(&mut context).unwrap();
        assert!(buffer.compute_view(&context).is_err());
        buffer.dispose(&mut context, &mut raster).unwrap();
    }

    #[test]
    fn redundant_transitions_are_no_ops() {
        let (mut context, mut raster) = setup();
        let mut buffer =
            InteropIndexBuffer::create(&mut context, &mut raster, 4, MapFlags::None).unwrap();

        buffer.unmap_from_compute(&mut context).unwrap();
        buffer.map_for_compute(&mut context).unwrap();
        buffer.map_for_compute(&mut context).unwrap();
        assert_eq!(buffer.state(), InteropState::MappedToCompute);
        buffer.unmap_from_compute(&mut context).unwrap();
        buffer.unmap_from_compute(&mut context).unwrap();
        assert_eq!(buffer.state(), InteropState::AvailableForRaster);
        buffer.dispose(&mut context, &mut raster).unwrap();
    }

    #[test]
    fn dispose_while_mapped_releases_everything() {
        let (mut context, mut raster) = setup();
        let mut buffer =
            InteropIndexBuffer::create(&mut context, &mut raster, 8, MapFlags::None).unwrap();
        buffer.map_for_compute(&mut context).unwrap();
        let handle = buffer.raster_buffer();
        assert!(buffer.is_valid(&raster));

        buffer.dispose(&mut context, &mut raster).unwrap();
        assert!(!raster.is_buffer(handle));
        assert_eq!(context.live_registrations(), 0);
        assert_eq!(raster.live_buffers(), 0);
    }

    #[test]
    fn read_only_registration_yields_read_only_view() {
        let (mut context, mut raster) = setup();
        let mut buffer =
            InteropIndexBuffer::create(&mut context, &mut raster, 3, MapFlags::ReadOnly).unwrap();
        buffer.map_for_compute(&mut context).unwrap();
        let view = buffer.compute_view(&context).unwrap();
        assert!(!view.is_writable());
        buffer.dispose(&mut context, &mut raster).unwrap();
    }

    #[test]
    fn failed_registration_deletes_raster_buffer() {
        let mut context =
            AcceleratorContext::new(&SorterConfig::cpu().with_max_registrations(1)).unwrap();
        let mut raster = HeadlessRaster::for_context(&context);

        let first =
            InteropIndexBuffer::create(&mut context, &mut raster, 2, MapFlags::None).unwrap();
        let err = InteropIndexBuffer::create(&mut context, &mut raster, 2, MapFlags::None)
            .unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(raster.live_buffers(), 1);

        first.dispose(&mut context, &mut raster).unwrap();
        assert_eq!(raster.live_buffers(), 0);
    }
}
