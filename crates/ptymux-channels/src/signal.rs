use nix::sys::signal::{kill, killpg, Signal};
use nix::unistd::Pid;
use ptymux_types::TERMINATE_GRACE_PERIOD;
use std::time::Duration;
use tokio::time::{sleep, Instant};

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Signal a whole process group, falling back to the single pid when the
/// group no longer exists.
pub(crate) fn signal_group(pid: u32, signal: Signal) {
    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    let pid = Pid::from_raw(raw);
    if killpg(pid, signal).is_err() {
        let _ = kill(pid, signal);
    }
}

pub(crate) fn signal_process(pid: u32, signal: Signal) {
    if let Ok(raw) = i32::try_from(pid) {
        let _ = kill(Pid::from_raw(raw), signal);
    }
}

/// Poll `exited` until it reports true or the grace period runs out.
/// Returns whether the child exited in time.
pub(crate) async fn wait_for_exit<F>(mut exited: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + TERMINATE_GRACE_PERIOD;
    loop {
        if exited() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        sleep(EXIT_POLL_INTERVAL).await;
    }
}
