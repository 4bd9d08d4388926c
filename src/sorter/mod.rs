#[cfg(test)]
mod tests;

use std::borrow::{Borrow, BorrowMut};
use std::time::Instant;

use crate::accel::{AcceleratorContext, DepthBuffer, DeviceKind, PositionBuffer};
use crate::config::{SortDirection, SorterConfig};
use crate::error::SortError;
use crate::interop::{InteropIndexBuffer, InteropState};
use crate::kernel::DepthPackingKernel;
use crate::math::{Vec3, ViewMatrix};
use crate::radix::{RadixSortStage, SortScratch};
use crate::raster::RasterDevice;

/// Everything sized by the splat count. Created together, released together.
struct SortResources<B> {
    positions: PositionBuffer,
    depths: DepthBuffer,
    scratch: SortScratch,
    index: InteropIndexBuffer<B>,
}

/// Sorts splat indices by camera-space depth into an index buffer the
/// rasterizer draws from directly.
///
/// Calls take `&mut self`, so frames on one sorter are serialized. The
/// context is the root of all device resources and is declared last so it
/// outlives them. Like the raster device it may be owned or borrowed as
/// `&mut AcceleratorContext`, so several sorters can be created and disposed
/// against one context.
pub struct PointCloudSorter<R, C = AcceleratorContext>
where
    R: RasterDevice,
    C: BorrowMut<AcceleratorContext>,
{
    config: SorterConfig,
    raster: R,
    resources: Option<SortResources<R::Buffer>>,
    kernel: DepthPackingKernel,
    radix: RadixSortStage,
    context: C,
}

impl<R, C> std::fmt::Debug for PointCloudSorter<R, C>
where
    R: RasterDevice,
    C: BorrowMut<AcceleratorContext>,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PointCloudSorter")
            .field("backend", &self.backend())
            .field("len", &self.len())
            .field("direction", &self.radix.direction())
            .finish()
    }
}

impl<R: RasterDevice> PointCloudSorter<R> {
    pub fn new(config: SorterConfig, raster: R, positions: &[Vec3]) -> Result<Self, SortError> {
        let context = AcceleratorContext::new(&config)?;
        Self::with_context(context, config, raster, positions)
    }
}

impl<R, C> PointCloudSorter<R, C>
where
    R: RasterDevice,
    C: BorrowMut<AcceleratorContext>,
{
    /// Builds the sorter on an already opened context, owned or borrowed. The
    /// raster device must allocate memory that context's device can register.
    pub fn with_context(
        mut context: C,
        config: SorterConfig,
        mut raster: R,
        positions: &[Vec3],
    ) -> Result<Self, SortError> {
        let ctx: &mut AcceleratorContext = context.borrow_mut();
        let kernel = DepthPackingKernel::load(ctx)?;
        let radix = RadixSortStage::load(ctx, config.direction)?;
        let resources = build_resources(ctx, &mut raster, &config, positions)?;

        log::info!(
            "point cloud sorter ready: {} splats on {} ({:?})",
            positions.len(),
            ctx.device_name(),
            config.direction
        );

        Ok(Self {
            config,
            raster,
            resources: Some(resources),
            kernel,
            radix,
            context,
        })
    }

    /// Writes the draw order for `view` into the index buffer. With the
    /// default [`SortDirection::Descending`] and a `look_at` view the nearest
    /// splat comes first, for "under" blending; [`SortDirection::Ascending`]
    /// gives back-to-front for "over" blending. When this returns the buffer
    /// is available for raster again, whether or not the frame succeeded.
    pub fn sort(&mut self, view: &ViewMatrix) -> Result<(), SortError> {
        #[cfg(feature = "metal")]
        {
            objc::rc::autoreleasepool(|| self.sort_frame(view))
        }
        #[cfg(not(feature = "metal"))]
        {
            self.sort_frame(view)
        }
    }

    fn sort_frame(&mut self, view: &ViewMatrix) -> Result<(), SortError> {
        let resources = self.resources.as_mut().ok_or(SortError::Disposed)?;
        let context: &mut AcceleratorContext = self.context.borrow_mut();
        let started = Instant::now();

        resources.index.map_for_compute(context)?;
        let sorted = run_stages(context, &self.kernel, &self.radix, resources, view);
        if sorted.is_err() {
            context.discard_pending();
        }
        let unmapped = resources.index.unmap_from_compute(context);

        log::trace!(
            "sorted {} splats in {:?}",
            resources.index.len(),
            started.elapsed()
        );
        sorted.and(unmapped)
    }

    /// Tears down every count-sized resource and rebuilds them for
    /// `positions`. Programs are kept.
    pub fn reconfigure(&mut self, positions: &[Vec3]) -> Result<(), SortError> {
        log::debug!(
            "reconfiguring sorter: {} -> {} splats",
            self.len(),
            positions.len()
        );
        self.release_resources()?;
        let resources = build_resources(
            self.context.borrow_mut(),
            &mut self.raster,
            &self.config,
            positions,
        )?;
        self.resources = Some(resources);
        Ok(())
    }

    /// Releases the registration and the rasterizer buffer before the
    /// context itself goes away.
    pub fn dispose(mut self) -> Result<(), SortError> {
        self.release_resources()
    }

    fn release_resources(&mut self) -> Result<(), SortError> {
        let Some(resources) = self.resources.take() else {
            return Ok(());
        };

        let SortResources {
            positions,
            depths,
            scratch,
            index,
        } = resources;
        let context: &mut AcceleratorContext = self.context.borrow_mut();
        context.discard_pending();
        let released = index.dispose(context, &mut self.raster);
        drop(scratch);
        drop(depths);
        drop(positions);
        released
    }

    /// Handle the rasterizer binds as its per-instance draw order. Check
    /// `is_valid` first.
    pub fn index_buffer(&self) -> Option<R::Buffer> {
        self.resources
            .as_ref()
            .map(|resources| resources.index.raster_buffer())
    }

    pub fn index_state(&self) -> Option<InteropState> {
        self.resources
            .as_ref()
            .map(|resources| resources.index.state())
    }

    pub fn is_valid(&self) -> bool {
        self.resources
            .as_ref()
            .is_some_and(|resources| resources.index.is_valid(&self.raster))
    }

    pub fn len(&self) -> usize {
        self.resources
            .as_ref()
            .map_or(0, |resources| resources.index.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn backend(&self) -> DeviceKind {
        self.context().kind()
    }

    pub fn direction(&self) -> SortDirection {
        self.radix.direction()
    }

    pub fn context(&self) -> &AcceleratorContext {
        self.context.borrow()
    }

    pub fn raster(&self) -> &R {
        &self.raster
    }

    pub fn config(&self) -> &SorterConfig {
        &self.config
    }
}

impl<R, C> Drop for PointCloudSorter<R, C>
where
    R: RasterDevice,
    C: BorrowMut<AcceleratorContext>,
{
    fn drop(&mut self) {
        if let Err(err) = self.release_resources() {
            log::warn!("point cloud sorter teardown failed: {err}");
        }
    }
}

fn build_resources<R: RasterDevice>(
    context: &mut AcceleratorContext,
    raster: &mut R,
    config: &SorterConfig,
    positions: &[Vec3],
) -> Result<SortResources<R::Buffer>, SortError> {
    let count = positions.len();
    u32::try_from(count)?;

    let positions = context.upload_positions(positions)?;
    let depths = context.alloc_depths(count)?;
    let scratch = RadixSortStage::allocate_scratch(context, count)?;
    let index = InteropIndexBuffer::create(context, raster, count, config.map_flags)?;

    log::debug!(
        "allocated sort resources for {count} splats ({} scratch words)",
        scratch.len_words()
    );

    Ok(SortResources {
        positions,
        depths,
        scratch,
        index,
    })
}

fn run_stages<B: Copy + Eq + std::fmt::Debug>(
    context: &mut AcceleratorContext,
    kernel: &DepthPackingKernel,
    radix: &RadixSortStage,
    resources: &SortResources<B>,
    view: &ViewMatrix,
) -> Result<(), SortError> {
    let indices = resources.index.compute_view(context)?;
    kernel.launch(
        context,
        &resources.positions,
        &resources.depths,
        &indices,
        view,
    )?;
    radix.sort_pairs(context, &resources.depths, &indices, &resources.scratch)?;
    context.synchronize()
}
