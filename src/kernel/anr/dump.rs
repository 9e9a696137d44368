use crate::kernel::event::ThreadDump;

/// Captures the state of every live thread in the process.
pub trait ThreadDumper: Send + Sync {
    fn dump_all(&self) -> Vec<ThreadDump>;
}

/// Reads thread names and scheduler states from `/proc/self/task`.
///
/// LIMITATION: `/proc/<tid>/stack` is kernel-side and normally readable only
/// with `CAP_SYS_ADMIN`, and user stacks of other threads cannot be unwound
/// from here. In practice every entry has an empty `stack` except the dumping
/// thread, which carries its own backtrace. The hung thread's entry is
/// usually empty, so the resulting ANR error has no top-level stack.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcfsThreadDumper;

impl ThreadDumper for ProcfsThreadDumper {
    #[cfg(target_os = "linux")]
    fn dump_all(&self) -> Vec<ThreadDump> {
        let entries = match std::fs::read_dir("/proc/self/task") {
            Ok(entries) => entries,
            Err(e) => {
                tracing::debug!("Cannot list /proc/self/task: {}", e);
                return vec![current_thread_dump()];
            }
        };

        // "<pid>/task/<tid>" for the calling thread
        let own_tid = std::fs::read_link("/proc/thread-self")
            .ok()
            .and_then(|link| link.file_name().map(|tid| tid.to_os_string()));

        let mut dumps: Vec<ThreadDump> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let dir = entry.path();
                let name = std::fs::read_to_string(dir.join("comm")).ok()?.trim().to_string();
                let stat = std::fs::read_to_string(dir.join("stat")).unwrap_or_default();
                let stack = if own_tid.as_deref() == Some(entry.file_name().as_os_str()) {
                    std::backtrace::Backtrace::force_capture().to_string()
                } else {
                    std::fs::read_to_string(dir.join("stack")).unwrap_or_default()
                };
                Some(ThreadDump {
                    name,
                    state: parse_state(&stat).to_string(),
                    stack,
                    crashed: false,
                })
            })
            .collect();

        if dumps.is_empty() {
            dumps.push(current_thread_dump());
        }
        dumps
    }

    #[cfg(not(target_os = "linux"))]
    fn dump_all(&self) -> Vec<ThreadDump> {
        vec![current_thread_dump()]
    }
}

fn current_thread_dump() -> ThreadDump {
    let current = std::thread::current();
    ThreadDump {
        name: current.name().unwrap_or("unnamed").to_string(),
        state: "runnable".to_string(),
        stack: std::backtrace::Backtrace::force_capture().to_string(),
        crashed: false,
    }
}

/// Maps the state letter of `/proc/<pid>/task/<tid>/stat` to a readable name.
/// The comm field may contain spaces or parentheses, so look after the last ')'.
fn parse_state(stat: &str) -> &'static str {
    let state = stat
        .rfind(')')
        .and_then(|idx| stat[idx + 1..].split_whitespace().next())
        .unwrap_or("");
    match state {
        "R" => "runnable",
        "S" => "waiting",
        "D" => "blocked",
        "T" | "t" => "stopped",
        "Z" | "X" => "terminated",
        _ => "unknown",
    }
}

/// Marks the dump of `thread_name` as the crashed one. If no live thread
/// matches, a placeholder entry is added so that exactly one is marked.
pub fn mark_hung_thread(mut dumps: Vec<ThreadDump>, thread_name: &str) -> Vec<ThreadDump> {
    let mut marked = false;
    for dump in dumps.iter_mut() {
        dump.crashed = !marked && names_match(&dump.name, thread_name);
        marked |= dump.crashed;
    }
    if !marked {
        dumps.insert(
            0,
            ThreadDump {
                name: thread_name.to_string(),
                state: "blocked".to_string(),
                stack: String::new(),
                crashed: true,
            },
        );
    }
    dumps
}

// Linux truncates thread names to 15 bytes in comm.
fn names_match(dumped: &str, expected: &str) -> bool {
    const COMM_LEN: usize = 15;
    dumped == expected || (dumped.len() == COMM_LEN && expected.starts_with(dumped))
}
