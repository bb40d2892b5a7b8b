use std::sync::OnceLock;

/// Frames smaller than this are transposed on the calling thread.
const PARALLEL_MIN_PIXELS: usize = 524_288;
const PARALLEL_MIN_CHUNK_PIXELS: usize = 131_072;
const PARALLEL_MAX_WORKERS: usize = 8;

#[inline]
fn workers() -> usize {
    static WORKERS: OnceLock<usize> = OnceLock::new();
    (*WORKERS.get_or_init(|| {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }))
    .min(PARALLEL_MAX_WORKERS)
}

#[inline]
pub(crate) fn should_parallelize(pixel_count: usize) -> bool {
    let workers = workers();
    if workers <= 1 {
        return false;
    }
    pixel_count >= PARALLEL_MIN_PIXELS.max(PARALLEL_MIN_CHUNK_PIXELS.saturating_mul(workers))
}

/// Run `job` inside the shared pixel pool, or inline when no pool could be
/// built.
pub(crate) fn install<F>(job: F)
where
    F: FnOnce() + Send,
{
    static POOL: OnceLock<Option<rayon::ThreadPool>> = OnceLock::new();
    let pool = POOL.get_or_init(|| {
        let workers = workers();
        if workers <= 1 {
            return None;
        }
        rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|index| format!("snow-duplication-{index}"))
            .build()
            .ok()
    });
    match pool {
        Some(pool) => pool.install(job),
        None => job(),
    }
}
