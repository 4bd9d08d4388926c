use std::sync::atomic::{AtomicU32, Ordering};

use rayon::prelude::*;

use crate::accel::{
    host_words, AcceleratorContext, CpuDevice, DepthBuffer, Device, IndexView, SharedIndexMemory,
};
use crate::config::SortDirection;
use crate::error::SortError;

#[cfg(feature = "metal")]
use crate::accel::gpu::{
    encode_radix_sort, sort_scratch_elements, MetalSortPrograms, MetalSortScratch,
};

const RADIX_BITS: u32 = 8;
const RADIX_BUCKETS: usize = 1 << RADIX_BITS;
const PASS_SHIFTS: [u32; 4] = [0, 8, 16, 24];
const MIN_HOST_CHUNK: usize = 4096;
const NEGATIVE_ZERO_BITS: u32 = 0x8000_0000;

/// Maps raw `f32` bits to a `u32` whose unsigned order matches the float
/// order (negatives flip entirely, positives flip the sign bit). Descending
/// inverts the key so the same ascending passes produce largest-first.
///
/// `-0.0` shares the key of `+0.0`, so the two compare equal and keep their
/// index order like any other tie.
#[inline]
pub fn sortable_key(bits: u32, direction: SortDirection) -> u32 {
    let bits = if bits == NEGATIVE_ZERO_BITS { 0 } else { bits };
    let mask = if bits & 0x8000_0000 != 0 {
        u32::MAX
    } else {
        0x8000_0000
    };
    let key = bits ^ mask;
    match direction {
        SortDirection::Ascending => key,
        SortDirection::Descending => !key,
    }
}

enum ScratchStorage {
    Host {
        keys: Box<[AtomicU32]>,
        values: Box<[AtomicU32]>,
    },
    #[cfg(feature = "metal")]
    Metal(MetalSortScratch),
}

/// Temporary storage for one sort of exactly `element_count` pairs.
pub struct SortScratch {
    element_count: usize,
    len_words: usize,
    storage: ScratchStorage,
}

impl std::fmt::Debug for SortScratch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SortScratch")
            .field("element_count", &self.element_count)
            .field("len_words", &self.len_words)
            .finish()
    }
}

impl SortScratch {
    pub fn element_count(&self) -> usize {
        self.element_count
    }

    pub fn len_words(&self) -> usize {
        self.len_words
    }
}

enum SortProgram {
    Host,
    #[cfg(feature = "metal")]
    Metal(MetalSortPrograms),
}

/// Stable LSD radix sort of `(depth, index)` pairs, four 8-bit passes. The
/// sorted indices end up in the same view they were read from.
pub struct RadixSortStage {
    direction: SortDirection,
    program: SortProgram,
}

impl std::fmt::Debug for RadixSortStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RadixSortStage")
            .field("direction", &self.direction)
            .finish()
    }
}

impl RadixSortStage {
    pub fn load(context: &AcceleratorContext, direction: SortDirection) -> Result<Self, SortError> {
        let program = match context.device() {
            Device::Cpu(_) => SortProgram::Host,
            #[cfg(feature = "metal")]
            Device::Metal(gpu) => SortProgram::Metal(MetalSortPrograms::load(&gpu.device)?),
        };
        Ok(Self { direction, program })
    }

    pub fn direction(&self) -> SortDirection {
        self.direction
    }

    /// Words of scratch memory the context's backend needs for `element_count` pairs.
    pub fn scratch_len(context: &AcceleratorContext, element_count: usize) -> usize {
        match context.device() {
            Device::Cpu(_) => element_count.saturating_mul(2),
            #[cfg(feature = "metal")]
            Device::Metal(_) => sort_scratch_elements(element_count),
        }
    }

    pub fn allocate_scratch(
        context: &AcceleratorContext,
        element_count: usize,
    ) -> Result<SortScratch, SortError> {
        let storage = match context.device() {
            Device::Cpu(_) => ScratchStorage::Host {
                keys: host_words(element_count),
                values: host_words(element_count),
            },
            #[cfg(feature = "metal")]
            Device::Metal(gpu) => {
                ScratchStorage::Metal(MetalSortScratch::allocate(&gpu.device, element_count)?)
            }
        };

        Ok(SortScratch {
            element_count,
            len_words: Self::scratch_len(context, element_count),
            storage,
        })
    }

    /// Enqueues the sort of `indices` keyed by `depths`.
    #[allow(unreachable_patterns)]
    pub fn sort_pairs(
        &self,
        context: &mut AcceleratorContext,
        depths: &DepthBuffer,
        indices: &IndexView,
        scratch: &SortScratch,
    ) -> Result<(), SortError> {
        indices.ensure_writable()?;
        let count = depths.len();
        if indices.len() != count {
            return Err(SortError::Other(format!(
                "sort keys and payload disagree: {count} depths, {} indices",
                indices.len()
            )));
        }
        if scratch.element_count != count {
            return Err(SortError::ScratchMismatch {
                scratch_elements: scratch.element_count,
                element_count: count,
            });
        }
        u32::try_from(count)?;
        if count < 2 {
            return Ok(());
        }

        match (
            &self.program,
            context.device_mut(),
            depths,
            indices.memory(),
            &scratch.storage,
        ) {
            (
                SortProgram::Host,
                Device::Cpu(cpu),
                DepthBuffer::Host(keys),
                SharedIndexMemory::Host(values),
                ScratchStorage::Host {
                    keys: keys_alt,
                    values: values_alt,
                },
            ) => {
                let values = &values[..count];
                let mut in_primary = true;
                for shift in PASS_SHIFTS {
                    let (src, dst) = if in_primary {
                        ((&keys[..], values), (&keys_alt[..], &values_alt[..]))
                    } else {
                        ((&keys_alt[..], &values_alt[..]), (&keys[..], values))
                    };
                    host_radix_pass(cpu, self.direction, shift, src, dst);
                    in_primary = !in_primary;
                }
                Ok(())
            }
            #[cfg(feature = "metal")]
            (
                SortProgram::Metal(programs),
                Device::Metal(gpu),
                DepthBuffer::Metal { buffer: keys, .. },
                SharedIndexMemory::Metal(values),
                ScratchStorage::Metal(metal_scratch),
            ) => encode_radix_sort(
                gpu.command_buffer(),
                programs,
                metal_scratch,
                keys,
                values,
                count as u32,
                self.direction == SortDirection::Descending,
            ),
            _ => Err(SortError::DeviceMismatch {
                operation: "radix sort",
            }),
        }
    }
}

#[inline]
fn digit_of(bits: u32, direction: SortDirection, shift: u32) -> usize {
    ((sortable_key(bits, direction) >> shift) as usize) & (RADIX_BUCKETS - 1)
}

/// One stable counting pass on the CPU device. Chunks are histogrammed in
/// parallel; each chunk then scatters into a disjoint set of output slots
/// (bucket-major, chunk-minor), which keeps equal digits in input order.
fn host_radix_pass(
    cpu: &CpuDevice,
    direction: SortDirection,
    shift: u32,
    (keys_in, values_in): (&[AtomicU32], &[AtomicU32]),
    (keys_out, values_out): (&[AtomicU32], &[AtomicU32]),
) {
    let count = keys_in.len();
    let chunk_len = count.div_ceil(cpu.threads().max(1)).max(MIN_HOST_CHUNK);

    cpu.install(|| {
        let histograms: Vec<[usize; RADIX_BUCKETS]> = keys_in
            .par_chunks(chunk_len)
            .map(|chunk| {
                let mut hist = [0usize; RADIX_BUCKETS];
                for key in chunk {
                    hist[digit_of(key.load(Ordering::Relaxed), direction, shift)] += 1;
                }
                hist
            })
            .collect();

        let mut offsets = vec![[0usize; RADIX_BUCKETS]; histograms.len()];
        let mut running = 0usize;
        for digit in 0..RADIX_BUCKETS {
            for (chunk_offsets, hist) in offsets.iter_mut().zip(&histograms) {
                chunk_offsets[digit] = running;
                running += hist[digit];
            }
        }

        keys_in
            .par_chunks(chunk_len)
            .zip(values_in.par_chunks(chunk_len))
            .zip(offsets.into_par_iter())
            .for_each(|((keys, values), mut next)| {
                for (key, value) in keys.iter().zip(values) {
                    let bits = key.load(Ordering::Relaxed);
                    let digit = digit_of(bits, direction, shift);
                    let dst = next[digit];
                    next[digit] += 1;
                    keys_out[dst].store(bits, Ordering::Relaxed);
                    values_out[dst].store(value.load(Ordering::Relaxed), Ordering::Relaxed);
                }
            });
    });
}
