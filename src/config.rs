use clap::ValueEnum;

use crate::interop::MapFlags;

pub const DEFAULT_MAX_REGISTRATIONS: usize = 64;

/// Which compute device the accelerator context should open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum BackendPreference {
    /// GPU when one is available, otherwise the CPU device.
    #[default]
    Auto,
    Gpu,
    Cpu,
}

/// Output order of the depth sort, by camera-space Z.
///
/// A [`crate::math::ViewMatrix::look_at`] camera looks down -Z, so visible
/// points have negative Z and the largest Z is the nearest point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum SortDirection {
    /// Largest Z first: nearest first for a -Z camera. Pairs with
    /// front-to-back ("under") blending.
    #[default]
    Descending,
    /// Smallest Z first: farthest first for a -Z camera. Pairs with
    /// back-to-front ("over") blending.
    Ascending,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SorterConfig {
    pub backend: BackendPreference,
    pub direction: SortDirection,
    pub map_flags: MapFlags,
    /// Worker threads for the CPU device; `None` uses one per core.
    pub cpu_threads: Option<usize>,
    /// Upper bound on simultaneously registered external buffers.
    pub max_registrations: usize,
}

impl Default for SorterConfig {
    fn default() -> Self {
        Self {
            backend: BackendPreference::Auto,
            direction: SortDirection::Descending,
            map_flags: MapFlags::None,
            cpu_threads: None,
            max_registrations: DEFAULT_MAX_REGISTRATIONS,
        }
    }
}

impl SorterConfig {
    pub fn cpu() -> Self {
        Self {
            backend: BackendPreference::Cpu,
            ..Self::default()
        }
    }

    pub fn with_backend(mut self, backend: BackendPreference) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_direction(mut self, direction: SortDirection) -> Self {
        self.direction = direction;
        self
    }

    pub fn with_map_flags(mut self, map_flags: MapFlags) -> Self {
        self.map_flags = map_flags;
        self
    }

    pub fn with_cpu_threads(mut self, threads: usize) -> Self {
        self.cpu_threads = Some(threads.max(1));
        self
    }

    pub fn with_max_registrations(mut self, limit: usize) -> Self {
        self.max_registrations = limit;
        self
    }
}
