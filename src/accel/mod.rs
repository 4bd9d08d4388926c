mod buffers;
mod cpu;
#[cfg(feature = "metal")]
pub(crate) mod gpu;
mod registry;

pub use buffers::{DepthBuffer, IndexView, PositionBuffer, SharedIndexMemory};
pub(crate) use buffers::{bytes_for_u32_elems, host_words};
pub use cpu::CpuDevice;
#[cfg(feature = "metal")]
pub use gpu::MetalDevice;
pub use registry::ResourceKey;

use crate::config::{BackendPreference, SorterConfig};
use crate::error::SortError;
use crate::interop::MapFlags;

use registry::Registry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Cpu,
    Metal,
}

impl std::fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cpu => f.write_str("cpu"),
            Self::Metal => f.write_str("metal"),
        }
    }
}

pub(crate) enum Device {
    Cpu(CpuDevice),
    #[cfg(feature = "metal")]
    Metal(MetalDevice),
}

impl Device {
    fn open_gpu() -> Result<Self, SortError> {
        #[cfg(feature = "metal")]
        {
            MetalDevice::new().map(Self::Metal)
        }
        #[cfg(not(feature = "metal"))]
        {
            Err(SortError::NoCompatibleDevice {
                reason: "built without GPU support (enable the `metal` feature)".to_string(),
            })
        }
    }

    fn kind(&self) -> DeviceKind {
        match self {
            Self::Cpu(_) => DeviceKind::Cpu,
            #[cfg(feature = "metal")]
            Self::Metal(_) => DeviceKind::Metal,
        }
    }

    fn name(&self) -> String {
        match self {
            Self::Cpu(cpu) => cpu.name(),
            #[cfg(feature = "metal")]
            Self::Metal(gpu) => gpu.name(),
        }
    }
}

/// Root of every device resource: the compute device, its single execution
/// stream, and the table of registered external buffers.
pub struct AcceleratorContext {
    device: Device,
    registry: Registry,
}

impl std::fmt::Debug for AcceleratorContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcceleratorContext")
            .field("kind", &self.kind())
            .field("device", &self.device.name())
            .field("live_registrations", &self.registry.len())
            .field("max_registrations", &self.registry.limit())
            .finish()
    }
}

impl AcceleratorContext {
    pub fn new(config: &SorterConfig) -> Result<Self, SortError> {
        let device = match config.backend {
            BackendPreference::Cpu => Device::Cpu(CpuDevice::new(config.cpu_threads)?),
            BackendPreference::Gpu => Device::open_gpu()?,
            BackendPreference::Auto => match Device::open_gpu() {
                Ok(device) => device,
                Err(err) => {
                    log::warn!("GPU unavailable ({err}); falling back to the CPU device");
                    Device::Cpu(CpuDevice::new(config.cpu_threads)?)
                }
            },
        };

        log::info!("Using compute device: {} ({})", device.name(), device.kind());

        Ok(Self {
            device,
            registry: Registry::new(config.max_registrations),
        })
    }

    pub fn kind(&self) -> DeviceKind {
        self.device.kind()
    }

    pub fn device_name(&self) -> String {
        self.device.name()
    }

    pub fn live_registrations(&self) -> usize {
        self.registry.len()
    }

    /// Blocks until every operation enqueued on the stream has completed.
    pub fn synchronize(&mut self) -> Result<(), SortError> {
        match &mut self.device {
            // CPU work runs to completion inside the pool before the launch returns.
            Device::Cpu(_) => Ok(()),
            #[cfg(feature = "metal")]
            Device::Metal(gpu) => gpu.synchronize(),
        }
    }

    /// Drops encoded but uncommitted work.
    pub(crate) fn discard_pending(&mut self) {
        match &mut self.device {
            Device::Cpu(_) => {}
            #[cfg(feature = "metal")]
            Device::Metal(gpu) => gpu.discard_pending(),
        }
    }

    pub(crate) fn device(&self) -> &Device {
        &self.device
    }

    pub(crate) fn device_mut(&mut self) -> &mut Device {
        &mut self.device
    }

    pub(crate) fn register_external(
        &mut self,
        memory: SharedIndexMemory,
        flags: MapFlags,
    ) -> Result<ResourceKey, SortError> {
        if memory.kind() != self.kind() {
            return Err(SortError::RegistrationFailed {
                reason: format!(
                    "{} memory cannot be registered with a {} device",
                    memory.kind(),
                    self.kind()
                ),
            });
        }

        self.registry.register(memory, flags)
    }

    pub(crate) fn map_external(&mut self, key: ResourceKey) -> Result<(), SortError> {
        self.registry.map(key)
    }

    pub(crate) fn unmap_external(&mut self, key: ResourceKey) -> Result<(), SortError> {
        self.registry.unmap(key)
    }

    pub(crate) fn mapped_external(
        &self,
        key: ResourceKey,
    ) -> Result<(SharedIndexMemory, MapFlags), SortError> {
        self.registry.mapped_memory(key)
    }

    pub(crate) fn unregister_external(&mut self, key: ResourceKey) -> Result<(), SortError> {
        self.registry.unregister(key)
    }
}

impl Drop for AcceleratorContext {
    fn drop(&mut self) {
        self.discard_pending();
        let live = self.registry.len();
        if live > 0 {
            log::warn!(
                "accelerator context released with {live} external registrations still live"
            );
        }
    }
}
