use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use rayon::prelude::*;

#[cfg(feature = "metal")]
use metal::{Buffer, NSRange};

use crate::error::SortError;
use crate::math::Vec3;

use super::{AcceleratorContext, Device, DeviceKind};

#[cfg(feature = "metal")]
use super::gpu::{new_private_buffer, new_shared_buffer};

pub(crate) fn host_words(len: usize) -> Box<[AtomicU32]> {
    (0..len).map(|_| AtomicU32::new(0)).collect()
}

pub(crate) fn bytes_for_u32_elems(count: usize) -> Result<usize, SortError> {
    count
        .checked_mul(std::mem::size_of::<u32>())
        .ok_or_else(|| SortError::Other("buffer size overflow".to_string()))
}

/// Memory behind a rasterizer index buffer, exported for registration with
/// the compute device. Cloning shares the same memory.
#[derive(Clone)]
pub enum SharedIndexMemory {
    Host(Arc<[AtomicU32]>),
    #[cfg(feature = "metal")]
    Metal(Buffer),
}

impl std::fmt::Debug for SharedIndexMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedIndexMemory")
            .field("kind", &self.kind())
            .field("byte_len", &self.byte_len())
            .finish()
    }
}

impl SharedIndexMemory {
    pub fn host(element_count: usize) -> Self {
        Self::Host(Arc::from(host_words(element_count)))
    }

    pub fn kind(&self) -> DeviceKind {
        match self {
            Self::Host(_) => DeviceKind::Cpu,
            #[cfg(feature = "metal")]
            Self::Metal(_) => DeviceKind::Metal,
        }
    }

    pub fn byte_len(&self) -> usize {
        match self {
            Self::Host(words) => words.len() * std::mem::size_of::<u32>(),
            #[cfg(feature = "metal")]
            Self::Metal(buffer) => buffer.length() as usize,
        }
    }
}

/// Typed device view of a mapped interop index buffer.
#[derive(Debug, Clone)]
pub struct IndexView {
    memory: SharedIndexMemory,
    len: usize,
    writable: bool,
}

impl IndexView {
    pub(crate) fn new(memory: SharedIndexMemory, len: usize, writable: bool) -> Self {
        Self {
            memory,
            len,
            writable,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    pub(crate) fn memory(&self) -> &SharedIndexMemory {
        &self.memory
    }

    pub(crate) fn ensure_writable(&self) -> Result<(), SortError> {
        if self.writable {
            Ok(())
        } else {
            Err(SortError::ReadOnlyView)
        }
    }
}

pub enum PositionBuffer {
    Host(Box<[Vec3]>),
    #[cfg(feature = "metal")]
    Metal { buffer: Buffer, len: usize },
}

impl PositionBuffer {
    pub fn len(&self) -> usize {
        match self {
            Self::Host(positions) => positions.len(),
            #[cfg(feature = "metal")]
            Self::Metal { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Per-splat depth, stored as raw `f32` bits.
pub enum DepthBuffer {
    Host(Box<[AtomicU32]>),
    #[cfg(feature = "metal")]
    Metal { buffer: Buffer, len: usize },
}

impl DepthBuffer {
    pub fn len(&self) -> usize {
        match self {
            Self::Host(depths) => depths.len(),
            #[cfg(feature = "metal")]
            Self::Metal { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AcceleratorContext {
    pub fn upload_positions(&self, positions: &[Vec3]) -> Result<PositionBuffer, SortError> {
        match self.device() {
            Device::Cpu(_) => Ok(PositionBuffer::Host(positions.into())),
            #[cfg(feature = "metal")]
            Device::Metal(gpu) => {
                let floats = positions
                    .len()
                    .checked_mul(3)
                    .ok_or_else(|| SortError::Other("position buffer size overflow".to_string()))?;
                let buffer = new_shared_buffer(&gpu.device, bytes_for_u32_elems(floats)?);
                let contents = buffer.contents() as *mut f32;
                for (i, p) in positions.iter().enumerate() {
                    unsafe {
                        *contents.add(i * 3) = p.x;
                        *contents.add(i * 3 + 1) = p.y;
                        *contents.add(i * 3 + 2) = p.z;
                    }
                }
                Ok(PositionBuffer::Metal {
                    buffer,
                    len: positions.len(),
                })
            }
        }
    }

    pub fn alloc_depths(&self, element_count: usize) -> Result<DepthBuffer, SortError> {
        match self.device() {
            Device::Cpu(_) => Ok(DepthBuffer::Host(host_words(element_count))),
            #[cfg(feature = "metal")]
            Device::Metal(gpu) => Ok(DepthBuffer::Metal {
                buffer: new_private_buffer(&gpu.device, bytes_for_u32_elems(element_count)?),
                len: element_count,
            }),
        }
    }

    /// Sets every byte of the view to `value`.
    #[allow(unreachable_patterns)]
    pub fn memset(&mut self, view: &IndexView, value: u8) -> Result<(), SortError> {
        view.ensure_writable()?;

        match (self.device_mut(), view.memory()) {
            (Device::Cpu(cpu), SharedIndexMemory::Host(words)) => {
                let word = u32::from_ne_bytes([value; 4]);
                let words = &words[..view.len()];
                cpu.install(|| {
                    words
                        .par_iter()
                        .for_each(|w| w.store(word, Ordering::Relaxed));
                });
                Ok(())
            }
            #[cfg(feature = "metal")]
            (Device::Metal(gpu), SharedIndexMemory::Metal(buffer)) => {
                let bytes = bytes_for_u32_elems(view.len())? as u64;
                if bytes == 0 {
                    return Ok(());
                }
                let blit = gpu.command_buffer().new_blit_command_encoder();
                blit.fill_buffer(buffer, NSRange::new(0, bytes), value);
                blit.end_encoding();
                Ok(())
            }
            _ => Err(SortError::DeviceMismatch { operation: "memset" }),
        }
    }

    /// Device-to-device copy between two mapped views of equal length.
    #[allow(unreachable_patterns)]
    pub fn copy_indices(&mut self, src: &IndexView, dst: &IndexView) -> Result<(), SortError> {
        dst.ensure_writable()?;
        if src.len() != dst.len() {
            return Err(SortError::SizeMismatch {
                expected_bytes: bytes_for_u32_elems(dst.len())?,
                actual_bytes: bytes_for_u32_elems(src.len())?,
            });
        }

        match (self.device_mut(), src.memory(), dst.memory()) {
            (Device::Cpu(cpu), SharedIndexMemory::Host(from), SharedIndexMemory::Host(to)) => {
                let from = &from[..src.len()];
                let to = &to[..dst.len()];
                cpu.install(|| {
                    from.par_iter().zip(to.par_iter()).for_each(|(s, d)| {
                        d.store(s.load(Ordering::Relaxed), Ordering::Relaxed);
                    });
                });
                Ok(())
            }
            #[cfg(feature = "metal")]
            (Device::Metal(gpu), SharedIndexMemory::Metal(from), SharedIndexMemory::Metal(to)) => {
                let bytes = bytes_for_u32_elems(src.len())? as u64;
                if bytes == 0 {
                    return Ok(());
                }
                let blit = gpu.command_buffer().new_blit_command_encoder();
                blit.copy_from_buffer(from, 0, to, 0, bytes);
                blit.end_encoding();
                Ok(())
            }
            _ => Err(SortError::DeviceMismatch {
                operation: "copy_indices",
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SorterConfig;

    fn host_view(values: &[u32], writable: bool) -> IndexView {
        let memory = SharedIndexMemory::host(values.len());
        if let SharedIndexMemory::Host(words) = &memory {
            for (w, v) in words.iter().zip(values) {
                w.store(*v, Ordering::Relaxed);
            }
        }
        IndexView::new(memory, values.len(), writable)
    }

    fn host_values(view: &IndexView) -> Vec<u32> {
        match view.memory() {
            SharedIndexMemory::Host(words) => {
                words.iter().map(|w| w.load(Ordering::Relaxed)).collect()
            }
            #[allow(unreachable_patterns)]
            _ => unreachable!("host view expected"),
        }
    }

    #[test]
    fn memset_fills_every_byte() {
        let mut context = AcceleratorContext::new(&SorterConfig::cpu()).unwrap();
        let view = host_view(&[1, 2, 3], true);
        context.memset(&view, 0xFF).unwrap();
        context.synchronize().unwrap();
        assert_eq!(host_values(&view), vec![u32::MAX; 3]);
    }

    #[test]
    fn memset_rejects_read_only_views() {
        let mut context = AcceleratorContext::new(&SorterConfig::cpu()).unwrap();
        let view = host_view(&[7, 7], false);
        assert!(matches!(
            context.memset(&view, 0),
            Err(SortError::ReadOnlyView)
        ));
        assert_eq!(host_values(&view), vec![7, 7]);
    }

    #[test]
    fn copy_requires_equal_lengths() {
        let mut context = AcceleratorContext::new(&SorterConfig::cpu()).unwrap();
        let src = host_view(&[4, 5, 6], true);
        let dst = host_view(&[0, 0, 0], true);
        context.copy_indices(&src, &dst).unwrap();
        assert_eq!(host_values(&dst), vec![4, 5, 6]);

        let short = host_view(&[0], true);
        assert!(matches!(
            context.copy_indices(&src, &short),
            Err(SortError::SizeMismatch { .. })
        ));
    }

    #[test]
    fn uploads_keep_element_counts() {
        let context = AcceleratorContext::new(&SorterConfig::cpu()).unwrap();
        let positions = context
            .upload_positions(&[Vec3::ZERO, Vec3::new(1.0, 2.0, 3.0)])
            .unwrap();
        assert_eq!(positions.len(), 2);
        let depths = context.alloc_depths(5).unwrap();
        assert_eq!(depths.len(), 5);
        assert!(context.alloc_depths(0).unwrap().is_empty());
    }
}
