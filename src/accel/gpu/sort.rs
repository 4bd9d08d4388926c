use std::{ffi::c_void, mem};

use metal::{Buffer, ComputePipelineState, Device, MTLSize};

use crate::accel::buffers::bytes_for_u32_elems;
use crate::error::SortError;

use super::pipeline::{compile_library, create_pipeline, new_private_buffer, set_bytes_struct};
use super::types::{GpuRadixParams, RADIX_BUCKETS, THREADS_PER_GROUP_1D};

const PREFIX_SCAN_SOURCE: &str = include_str!("../../../shaders/prefix_scan.metal");
const RADIX_SORT_SOURCE: &str = include_str!("../../../shaders/radix_sort.metal");

pub(crate) fn dispatch_1d(
    encoder: &metal::ComputeCommandEncoderRef,
    count: u32,
    threads_per_group: u32,
) {
    if count == 0 {
        return;
    }

    let groups = u64::from(count.div_ceil(threads_per_group));
    encoder.dispatch_thread_groups(
        MTLSize::new(groups, 1, 1),
        MTLSize::new(u64::from(threads_per_group), 1, 1),
    );
}

pub(crate) fn required_block_sum_elements(count: usize) -> usize {
    if count == 0 {
        return 1;
    }

    let mut total = 0usize;
    let mut blocks = count.div_ceil(THREADS_PER_GROUP_1D as usize);
    loop {
        total = total.saturating_add(blocks);
        if blocks <= 1 {
            break;
        }
        blocks = blocks.div_ceil(THREADS_PER_GROUP_1D as usize);
    }
    total
}

fn radix_blocks(element_count: usize) -> usize {
    element_count
        .max(1)
        .div_ceil(THREADS_PER_GROUP_1D as usize)
}

/// Scratch words the Metal sort needs for `element_count` pairs.
pub(crate) fn sort_scratch_elements(element_count: usize) -> usize {
    let histogram_count = radix_blocks(element_count).saturating_mul(RADIX_BUCKETS as usize);
    element_count
        .saturating_mul(2)
        .saturating_add(histogram_count)
        .saturating_add(required_block_sum_elements(histogram_count))
}

pub(crate) struct MetalSortPrograms {
    histogram: ComputePipelineState,
    scatter: ComputePipelineState,
    scan_blocks: ComputePipelineState,
    scan_add_offsets: ComputePipelineState,
}

impl MetalSortPrograms {
    pub(crate) fn load(device: &Device) -> Result<Self, SortError> {
        let scan_library = compile_library(device, PREFIX_SCAN_SOURCE)?;
        let radix_library = compile_library(device, RADIX_SORT_SOURCE)?;

        Ok(Self {
            histogram: create_pipeline(device, &radix_library, "radix_sort_histogram")?,
            scatter: create_pipeline(device, &radix_library, "radix_sort_scatter")?,
            scan_blocks: create_pipeline(device, &scan_library, "prefix_scan_blocks")?,
            scan_add_offsets: create_pipeline(device, &scan_library, "prefix_scan_add_offsets")?,
        })
    }
}

pub(crate) struct MetalSortScratch {
    keys_alt: Buffer,
    values_alt: Buffer,
    histograms: Buffer,
    block_sums: Buffer,
    num_blocks: u32,
    histogram_count: u32,
}

impl MetalSortScratch {
    pub(crate) fn allocate(device: &Device, element_count: usize) -> Result<Self, SortError> {
        let num_blocks = u32::try_from(radix_blocks(element_count))?;
        let histogram_count = num_blocks
            .checked_mul(RADIX_BUCKETS)
            .ok_or_else(|| SortError::Other("histogram count overflow".to_string()))?;
        let block_sums = required_block_sum_elements(histogram_count as usize);

        Ok(Self {
            keys_alt: new_private_buffer(device, bytes_for_u32_elems(element_count)?),
            values_alt: new_private_buffer(device, bytes_for_u32_elems(element_count)?),
            histograms: new_private_buffer(device, bytes_for_u32_elems(histogram_count as usize)?),
            block_sums: new_private_buffer(device, bytes_for_u32_elems(block_sums)?),
            num_blocks,
            histogram_count,
        })
    }
}

fn encode_prefix_scan_recursive(
    command_buffer: &metal::CommandBufferRef,
    programs: &MetalSortPrograms,
    scratch: &MetalSortScratch,
    data_buffer: &Buffer,
    data_offset_bytes: u64,
    count: u32,
    scratch_offset_elems: u64,
) -> Result<(), SortError> {
    if count == 0 {
        return Ok(());
    }

    let num_blocks = count.div_ceil(THREADS_PER_GROUP_1D);
    let block_sums_offset_bytes = scratch_offset_elems
        .checked_mul(mem::size_of::<u32>() as u64)
        .ok_or_else(|| SortError::Other("block sums offset overflow".to_string()))?;

    {
        let encoder = command_buffer.new_compute_command_encoder();
        encoder.set_compute_pipeline_state(&programs.scan_blocks);
        encoder.set_buffer(0, Some(data_buffer), data_offset_bytes);
        encoder.set_buffer(1, Some(&scratch.block_sums), block_sums_offset_bytes);
        encoder.set_bytes(
            2,
            mem::size_of::<u32>() as u64,
            &count as *const _ as *const c_void,
        );
        dispatch_1d(encoder, count, THREADS_PER_GROUP_1D);
        encoder.end_encoding();
    }

    if num_blocks > 1 {
        let next_scratch_offset = scratch_offset_elems
            .checked_add(u64::from(num_blocks))
            .ok_or_else(|| SortError::Other("block sums recursion overflow".to_string()))?;

        encode_prefix_scan_recursive(
            command_buffer,
            programs,
            scratch,
            &scratch.block_sums,
            block_sums_offset_bytes,
            num_blocks,
            next_scratch_offset,
        )?;

        let encoder = command_buffer.new_compute_command_encoder();
        encoder.set_compute_pipeline_state(&programs.scan_add_offsets);
        encoder.set_buffer(0, Some(data_buffer), data_offset_bytes);
        encoder.set_buffer(1, Some(&scratch.block_sums), block_sums_offset_bytes);
        encoder.set_bytes(
            2,
            mem::size_of::<u32>() as u64,
            &count as *const _ as *const c_void,
        );
        dispatch_1d(encoder, count, THREADS_PER_GROUP_1D);
        encoder.end_encoding();
    }

    Ok(())
}

/// Encodes four 8-bit LSD passes over `(keys, values)`. Passes ping-pong
/// through the scratch pair, so after the even pass count the sorted
/// output is back in `keys` and `values`.
pub(crate) fn encode_radix_sort(
    command_buffer: &metal::CommandBufferRef,
    programs: &MetalSortPrograms,
    scratch: &MetalSortScratch,
    keys: &Buffer,
    values: &Buffer,
    count: u32,
    descending: bool,
) -> Result<(), SortError> {
    if count < 2 {
        return Ok(());
    }

    let mut in_primary = true;
    for bit_offset in [0u32, 8, 16, 24] {
        let (keys_in, values_in, keys_out, values_out) = if in_primary {
            (keys, values, &scratch.keys_alt, &scratch.values_alt)
        } else {
            (&scratch.keys_alt, &scratch.values_alt, keys, values)
        };

        let params = GpuRadixParams {
            count,
            bit_offset,
            descending: u32::from(descending),
            num_blocks: scratch.num_blocks,
        };

        let encoder = command_buffer.new_compute_command_encoder();
        encoder.set_compute_pipeline_state(&programs.histogram);
        encoder.set_buffer(0, Some(keys_in), 0);
        encoder.set_buffer(1, Some(&scratch.histograms), 0);
        set_bytes_struct(encoder, 2, &params);
        dispatch_1d(encoder, count, THREADS_PER_GROUP_1D);
        encoder.end_encoding();

        encode_prefix_scan_recursive(
            command_buffer,
            programs,
            scratch,
            &scratch.histograms,
            0,
            scratch.histogram_count,
            0,
        )?;

        let encoder = command_buffer.new_compute_command_encoder();
        encoder.set_compute_pipeline_state(&programs.scatter);
        encoder.set_buffer(0, Some(keys_in), 0);
        encoder.set_buffer(1, Some(values_in), 0);
        encoder.set_buffer(2, Some(keys_out), 0);
        encoder.set_buffer(3, Some(values_out), 0);
        encoder.set_buffer(4, Some(&scratch.histograms), 0);
        set_bytes_struct(encoder, 5, &params);
        dispatch_1d(encoder, count, THREADS_PER_GROUP_1D);
        encoder.end_encoding();

        in_primary = !in_primary;
    }

    Ok(())
}
