//! Host Measurements
//!
//! Wall clock, CPU time, thermal zones and basic machine facts, read the
//! same way in the controller and in workers.

use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds since the Unix epoch
pub fn wall_clock() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

fn rusage(who: libc::c_int) -> (u64, u64) {
    // SAFETY: getrusage only writes into the zeroed struct we pass.
    let usage = unsafe {
        let mut usage: libc::rusage = std::mem::zeroed();
        if libc::getrusage(who, &mut usage) != 0 {
            return (0, 0);
        }
        usage
    };
    let micros = |tv: libc::timeval| tv.tv_sec as u64 * 1_000_000 + tv.tv_usec as u64;
    (micros(usage.ru_utime), micros(usage.ru_stime))
}

/// User and system CPU time of this process and its reaped children, in µs
pub fn cpu_times() -> (u64, u64) {
    let (su, ss) = rusage(libc::RUSAGE_SELF);
    let (cu, cs) = rusage(libc::RUSAGE_CHILDREN);
    (su + cu, ss + cs)
}

/// Page size of the host
pub fn page_size() -> usize {
    // SAFETY: sysconf has no preconditions.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 { size as usize } else { 4096 }
}

/// Online CPUs, at least 1
pub fn online_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Physical memory in bytes, if the host reports it
pub fn physical_memory() -> Option<u64> {
    // SAFETY: sysconf has no preconditions.
    let pages = unsafe { libc::sysconf(libc::_SC_PHYS_PAGES) };
    (pages > 0).then(|| pages as u64 * page_size() as u64)
}

/// Highest thermal-zone reading in millidegrees Celsius (Linux sysfs)
pub fn read_max_thermal() -> Option<i64> {
    let entries = std::fs::read_dir("/sys/class/thermal").ok()?;
    entries
        .filter_map(Result::ok)
        .filter(|e| e.file_name().to_string_lossy().starts_with("thermal_zone"))
        .filter_map(|e| std::fs::read_to_string(e.path().join("temp")).ok())
        .filter_map(|t| t.trim().parse::<i64>().ok())
        .max()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wall_clock_advances() {
        let a = wall_clock();
        std::thread::sleep(std::time::Duration::from_millis(2));
        assert!(wall_clock() > a);
        assert!(a > 1_000_000_000.0);
    }

    #[test]
    fn test_page_size_is_power_of_two() {
        assert!(page_size().is_power_of_two());
    }

    #[test]
    fn test_cpu_times_accumulate() {
        let mut x = 0u64;
        for i in 0..5_000_000u64 {
            x = std::hint::black_box(x.wrapping_add(i));
        }
        let (usr, sys) = cpu_times();
        assert!(usr + sys > 0);
    }

    #[test]
    fn test_online_cpus() {
        assert!(online_cpus() >= 1);
    }
}
