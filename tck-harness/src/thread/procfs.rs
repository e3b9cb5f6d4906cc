//! Kernel task state lookup through procfs

#[cfg(target_os = "linux")]
mod imp {
    use std::fs;

    /// Kernel task id of the calling thread
    pub fn current_tid() -> Option<u32> {
        // "/proc/thread-self" links to "<pid>/task/<tid>".
        let link = fs::read_link("/proc/thread-self").ok()?;
        link.file_name()?.to_str()?.parse().ok()
    }

    /// One-letter scheduler state of a task in this process
    pub fn task_state(tid: u32) -> Option<char> {
        let stat = fs::read_to_string(format!("/proc/self/task/{}/stat", tid)).ok()?;
        parse_state(&stat)
    }

    pub fn task_name(tid: u32) -> Option<String> {
        let comm = fs::read_to_string(format!("/proc/self/task/{}/comm", tid)).ok()?;
        Some(comm.trim_end().to_string())
    }

    /// Task ids of every thread in this process
    pub fn task_ids() -> Vec<u32> {
        let mut ids: Vec<u32> = match fs::read_dir("/proc/self/task") {
            Ok(entries) => entries
                .filter_map(|entry| entry.ok()?.file_name().to_str()?.parse().ok())
                .collect(),
            Err(_) => Vec::new(),
        };
        ids.sort_unstable();
        ids
    }

    pub(super) fn parse_state(stat: &str) -> Option<char> {
        // The command name may itself contain ')', so split on the last one.
        let rest = &stat[stat.rfind(')')? + 1..];
        rest.trim_start().chars().next()
    }
}

#[cfg(not(target_os = "linux"))]
mod imp {
    pub fn current_tid() -> Option<u32> {
        None
    }

    pub fn task_state(_tid: u32) -> Option<char> {
        None
    }

    pub fn task_name(_tid: u32) -> Option<String> {
        None
    }

    pub fn task_ids() -> Vec<u32> {
        Vec::new()
    }
}

pub use imp::{current_tid, task_ids, task_name, task_state};

/// Whether a procfs state letter means the task is blocked
pub fn is_waiting_state(state: char) -> bool {
    matches!(state, 'S' | 'D' | 'T' | 't' | 'P' | 'I')
}

/// Whether a procfs state letter means the task has exited
pub fn is_dead_state(state: char) -> bool {
    matches!(state, 'Z' | 'X' | 'x')
}

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use super::*;

    #[test]
    fn test_parse_state_with_parenthesised_name() {
        let stat = "4242 (tck (worker) 1) S 1 4242 4242 0 -1";
        assert_eq!(imp::parse_state(stat), Some('S'));
        assert_eq!(imp::parse_state("garbage"), None);
    }

    #[test]
    fn test_current_thread_is_running() {
        let tid = current_tid().unwrap();
        assert!(task_ids().contains(&tid));
        assert_eq!(task_state(tid), Some('R'));
    }
}
