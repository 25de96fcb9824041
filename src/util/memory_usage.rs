use log::{debug, info};
use psutil::process::os::linux::ProcessExt;
use std::fmt::Arguments;

const BYTES_IN_GB: f64 = 1024_f64 * 1024_f64 * 1024_f64;

/// Logs the memory footprint of this process. Failing to read it is not an error.
#[allow(clippy::cast_precision_loss)]
pub fn print_memory_usage(msg: Arguments) {
    let statm = psutil::process::Process::new(std::process::id())
        .map_err(|e| e.to_string())
        .and_then(|process| process.procfs_statm().map_err(|e| e.to_string()));
    match statm {
        Ok(mem) => info!(
            "Memory usage: total = {:.6} GB, rss = {:.6} GB, shared = {:.6} GB [{}]",
            mem.size as f64 / BYTES_IN_GB,
            mem.resident as f64 / BYTES_IN_GB,
            mem.shared as f64 / BYTES_IN_GB,
            msg
        ),
        Err(e) => debug!("Memory usage not available ({}) [{}]", e, msg),
    }
}
