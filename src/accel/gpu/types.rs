pub(crate) const THREADS_PER_GROUP_1D: u32 = 256;
pub(crate) const RADIX_BUCKETS: u32 = 256;

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub(crate) struct GpuDepthParams {
    /// `(m[0][2], m[1][2], m[2][2], m[3][2])` of the view matrix.
    pub view_z: [f32; 4],
    pub count: u32,
    pub _pad: [u32; 3],
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub(crate) struct GpuRadixParams {
    pub count: u32,
    pub bit_offset: u32,
    pub descending: u32,
    pub num_blocks: u32,
}

// Must match the MSL structs in shaders/depth_pack.metal and shaders/radix_sort.metal.
const _: [(); 32] = [(); std::mem::size_of::<GpuDepthParams>()];
const _: [(); 16] = [(); std::mem::size_of::<GpuRadixParams>()];
