//! Hardware probe deciding the worker-thread count.

use sysinfo::{CpuRefreshKind, System};
use tracing::info;

/// Threads to run when the probe reports nothing usable.
const FALLBACK_THREADS: usize = 2;

/// Worker count for this machine: physical cores times hardware threads
/// per core. Falls back to a safe small pool when detection fails.
pub(crate) fn probe_worker_count() -> usize {
    let mut system = System::new();
    system.refresh_cpu_specifics(CpuRefreshKind::everything());

    let logical = system.cpus().len();
    if logical == 0 {
        info!(
            "failed to probe core count, playing it safe with {} threads",
            FALLBACK_THREADS
        );
        return FALLBACK_THREADS;
    }

    let physical = system.physical_core_count().unwrap_or(logical).max(1);
    let threads_per_core = (logical / physical).max(1);
    let count = physical * threads_per_core;
    info!("probed {} cores x {} threads", physical, threads_per_core);
    count
}
