use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::error::SortError;

/// Fallback compute device: a dedicated rayon pool standing in for the GPU.
/// Device memory is ordinary host memory.
pub struct CpuDevice {
    pool: ThreadPool,
}

impl CpuDevice {
    pub fn new(threads: Option<usize>) -> Result<Self, SortError> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads.unwrap_or(0))
            .thread_name(|i| format!("splatsort-cpu-{i}"))
            .build()
            .map_err(|e| SortError::NoCompatibleDevice {
                reason: format!("CPU thread pool: {e}"),
            })?;

        Ok(Self { pool })
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    pub fn name(&self) -> String {
        format!("cpu ({} threads)", self.threads())
    }

    pub(crate) fn install<OP, R>(&self, op: OP) -> R
    where
        OP: FnOnce() -> R + Send,
        R: Send,
    {
        self.pool.install(op)
    }
}
