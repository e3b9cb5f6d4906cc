//! Thread dumps for failure diagnosis

use log::error;

use crate::thread::procfs;

/// One thread of this process as seen by the kernel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadInfo {
    pub tid: u32,
    pub name: String,
    pub state: Option<char>,
}

/// Snapshot of every thread in the process
///
/// Empty where the platform offers no way to enumerate threads.
pub fn snapshot() -> Vec<ThreadInfo> {
    procfs::task_ids()
        .into_iter()
        .map(|tid| ThreadInfo {
            tid,
            name: procfs::task_name(tid).unwrap_or_else(|| "<unknown>".to_string()),
            state: procfs::task_state(tid),
        })
        .collect()
}

/// Log every thread of the process with its scheduler state
pub fn dump_test_threads() {
    let threads = snapshot();
    if threads.is_empty() {
        error!("thread dump unavailable on this platform");
        return;
    }
    error!("---- thread dump start ----");
    for info in &threads {
        let state = info.state.map_or_else(|| "?".to_string(), |s| s.to_string());
        error!("  {:>7} {:<16} {}", info.tid, info.name, state);
    }
    error!("---- thread dump end ----");
}

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use super::*;
    use crate::thread::TestThread;
    use std::time::Duration;

    #[test]
    fn test_snapshot_sees_named_thread() {
        let t = TestThread::spawn("tck-dump-probe", || {
            let _ = crate::timing::delay(Duration::from_secs(30));
        })
        .unwrap();
        // The name is set by the thread itself, shortly after spawn.
        let deadline = std::time::Instant::now() + Duration::from_secs(10);
        while !snapshot().iter().any(|info| info.name == "tck-dump-probe") {
            assert!(std::time::Instant::now() < deadline);
            std::thread::yield_now();
        }
        dump_test_threads();
        t.interrupt();
        assert!(t.join_timeout(Duration::from_secs(10)));
    }
}
