//! Per-frame depth ordering of Gaussian splat point clouds.
//!
//! Each frame the splat indices are sorted by camera-space depth on the
//! compute device and written straight into an index buffer owned by the
//! rasterizer, which then draws instances in that order. The default
//! [`SortDirection::Descending`] draws the nearest splat first for a -Z
//! looking camera; [`SortDirection::Ascending`] draws back-to-front.
//!
//! ```no_run
//! use splatsort::{HeadlessRaster, PointCloudSorter, SorterConfig, Vec3, ViewMatrix};
//!
//! let positions = vec![Vec3::new(0.0, 0.0, -1.0), Vec3::new(0.0, 0.0, -2.0)];
//! let mut sorter =
//!     PointCloudSorter::new(SorterConfig::cpu(), HeadlessRaster::new(), &positions)?;
//! sorter.sort(&ViewMatrix::IDENTITY)?;
//! let draw_order = sorter.index_buffer();
//! # let _ = draw_order;
//! # Ok::<(), splatsort::SortError>(())
//! ```

pub mod accel;
pub mod config;
pub mod demo;
pub mod error;
pub mod interop;
pub mod kernel;
pub mod math;
pub mod radix;
pub mod raster;
pub mod sorter;

pub use accel::{AcceleratorContext, DeviceKind, ResourceKey};
pub use config::{BackendPreference, SortDirection, SorterConfig};
pub use error::SortError;
pub use interop::{InteropIndexBuffer, InteropState, MapFlags};
pub use kernel::{camera_depth, DepthPackingKernel};
pub use math::{Vec3, ViewMatrix};
pub use radix::{sortable_key, RadixSortStage, SortScratch};
pub use raster::{HeadlessRaster, RasterBufferId, RasterDevice};
pub use sorter::PointCloudSorter;
