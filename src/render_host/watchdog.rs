//! ### English
//! Parent-liveness watchdog: keeps an orphaned render host from outliving its host.
//!
//! ### 中文
//! 父进程存活看门狗：防止孤立的渲染宿主比宿主活得更久。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crate::shm::NamedEvent;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// ### English
/// Whether process `pid` still exists.
///
/// ### 中文
/// 进程 `pid` 是否仍然存在。
#[cfg(unix)]
pub fn parent_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    // SAFETY: signal 0 performs the existence and permission check only.
    let rc = unsafe { libc::kill(pid, 0) };
    rc == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
pub fn parent_alive(_pid: u32) -> bool {
    true
}

/// ### English
/// Background thread that watches the parent process.
///
/// When the parent is gone it sets the keep-alive event, which releases the main wait and
/// starts an orderly shutdown. If the process is still running after `grace`, the expiry
/// action runs (by default the process exits). [`cancel`](Self::cancel) stops the thread
/// cooperatively at the next poll.
///
/// ### 中文
/// 监视父进程的后台线程。
///
/// 父进程消失后它会触发 keep-alive 事件，从而解除主等待并开始有序关闭。
/// 若经过 `grace` 后进程仍在运行，则执行到期动作（默认退出进程）。
/// [`cancel`](Self::cancel) 会在下一次轮询时协作式地停止该线程。
pub struct ParentWatchdog {
    cancel: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl ParentWatchdog {
    pub fn spawn(
        parent_pid: u32,
        keep_alive: Arc<NamedEvent>,
        grace: Duration,
    ) -> std::io::Result<Self> {
        Self::spawn_with(parent_pid, keep_alive, grace, || {
            tracing::error!("Render host still alive after shutdown grace period; exiting");
            std::process::exit(1);
        })
    }

    /// ### English
    /// Like [`spawn`](Self::spawn) with a custom expiry action.
    ///
    /// ### 中文
    /// 与 [`spawn`](Self::spawn) 相同，但可指定自定义到期动作。
    pub fn spawn_with<F>(
        parent_pid: u32,
        keep_alive: Arc<NamedEvent>,
        grace: Duration,
        on_expire: F,
    ) -> std::io::Result<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let cancel = Arc::new(AtomicBool::new(false));
        let cancel_for_thread = cancel.clone();
        let thread = thread::Builder::new()
            .name("InlayParentWatchdog".to_string())
            .spawn(move || {
                watch(parent_pid, &keep_alive, grace, &cancel_for_thread, on_expire);
            })?;
        tracing::debug!("Watching parent pid {parent_pid}");
        Ok(Self {
            cancel,
            thread: Some(thread),
        })
    }

    pub fn cancel(&mut self) {
        self.cancel.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for ParentWatchdog {
    fn drop(&mut self) {
        self.cancel();
    }
}

fn watch<F: FnOnce()>(
    parent_pid: u32,
    keep_alive: &NamedEvent,
    grace: Duration,
    cancel: &AtomicBool,
    on_expire: F,
) {
    loop {
        if cancel.load(Ordering::Acquire) {
            return;
        }
        if !parent_alive(parent_pid) {
            break;
        }
        thread::sleep(POLL_INTERVAL);
    }

    tracing::warn!("Parent process {parent_pid} exited; shutting down");
    if let Err(e) = keep_alive.set() {
        tracing::error!("Failed to signal keep-alive event: {e}");
    }

    let deadline = Instant::now() + grace;
    while Instant::now() < deadline {
        if cancel.load(Ordering::Acquire) {
            return;
        }
        thread::sleep(POLL_INTERVAL.min(grace));
    }
    if !cancel.load(Ordering::Acquire) {
        on_expire();
    }
}
