//! ### English
//! Host-side owner of the render-host process.
//!
//! ### 中文
//! 宿主侧的渲染宿主进程持有者。

mod output;

use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;

use crate::config::SupervisorConfig;
use crate::ipc::{IpcChannel, IpcError};
use crate::protocol::{DownstreamRequest, RenderProcessArguments, UpstreamRequest};
use crate::shm::{NamedEvent, ResourceNames, ShmError};

const EXIT_POLL: Duration = Duration::from_millis(20);

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("render process is not running")]
    NotRunning,
    #[error("render process exited (code {0:?})")]
    ChildExited(Option<i32>),
    #[error("failed to launch render process: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("failed to encode boot arguments: {0}")]
    Encode(#[source] serde_json::Error),
    #[error(transparent)]
    Ipc(#[from] IpcError),
    #[error(transparent)]
    Shm(#[from] ShmError),
}

impl SupervisorError {
    /// ### English
    /// Whether the render host must be treated as dead until restarted.
    ///
    /// ### 中文
    /// 在重启之前是否必须将渲染宿主视为已失效。
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Ipc(e) => e.is_channel_fatal(),
            Self::Encode(_) => false,
            _ => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderProcessState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

struct Running {
    child: Mutex<Child>,
    channel: IpcChannel<DownstreamRequest, UpstreamRequest>,
    keep_alive: NamedEvent,
    output: Vec<thread::JoinHandle<()>>,
    reaped: AtomicBool,
}

/// ### English
/// Supervisor of the render-host child process.
///
/// State machine: `Stopped -> Starting -> Running -> Stopping -> Stopped`. A crashed child is
/// not restarted: the next send reports [`SupervisorError::ChildExited`] (or times out), and
/// the caller decides whether to [`stop`](Self::stop) and [`start`](Self::start) again.
///
/// Upstream requests from the child are forwarded into the `upstream` sender given at
/// construction, on the IPC reader thread.
///
/// ### 中文
/// 渲染宿主子进程的 supervisor。
///
/// 状态机：`Stopped -> Starting -> Running -> Stopping -> Stopped`。崩溃的子进程不会被自动
/// 重启：下一次发送会报告 [`SupervisorError::ChildExited`]（或超时），由调用方决定是否重新
/// [`stop`](Self::stop) 再 [`start`](Self::start)。
///
/// 子进程发来的上行请求在 IPC 读线程上转发到构造时传入的 `upstream` 发送端。
pub struct RenderProcess {
    config: SupervisorConfig,
    names: ResourceNames,
    upstream: Sender<UpstreamRequest>,
    state: RenderProcessState,
    running: Option<Running>,
}

impl RenderProcess {
    pub fn new(config: SupervisorConfig, upstream: Sender<UpstreamRequest>) -> Self {
        let names = ResourceNames::new(std::process::id(), config.resolved_shm_dir());
        Self {
            config,
            names,
            upstream,
            state: RenderProcessState::Stopped,
            running: None,
        }
    }

    pub fn state(&self) -> RenderProcessState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == RenderProcessState::Running
    }

    pub fn names(&self) -> &ResourceNames {
        &self.names
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    pub fn child_id(&self) -> Option<u32> {
        self.running.as_ref().map(|running| running.child.lock().id())
    }

    /// ### English
    /// Creates the channel and keep-alive event, then launches the child. No-op unless stopped.
    ///
    /// ### 中文
    /// 创建通道与 keep-alive 事件，然后启动子进程。若不处于停止状态则不做任何事。
    pub fn start(&mut self) -> Result<(), SupervisorError> {
        if self.state != RenderProcessState::Stopped {
            return Ok(());
        }
        self.state = RenderProcessState::Starting;
        match self.launch() {
            Ok(running) => {
                self.running = Some(running);
                self.state = RenderProcessState::Running;
                Ok(())
            }
            Err(e) => {
                tracing::error!("Failed to start render process: {e}");
                self.state = RenderProcessState::Stopped;
                Err(e)
            }
        }
    }

    fn launch(&self) -> Result<Running, SupervisorError> {
        let dir = self.names.dir();
        let keep_alive_name = self.names.keep_alive();
        let channel_name = self.names.ipc_channel();

        let keep_alive = NamedEvent::create(dir, &keep_alive_name)?;
        let upstream = self.upstream.clone();
        let channel = IpcChannel::create(dir, &channel_name, self.config.ring_capacity, move |request| {
            if upstream.send(request).is_err() {
                tracing::debug!("Host inbox closed; upstream request dropped");
            }
            None::<()>
        })?;

        let args = RenderProcessArguments {
            parent_pid: self.names.parent_pid(),
            engine_library_dir: self.config.engine_library_dir.clone(),
            asset_dir: self.config.asset_dir.clone(),
            cache_dir: self.config.cache_dir.clone(),
            adapter_id: self.config.adapter_id,
            keep_alive_name: Some(keep_alive_name),
            ipc_channel_name: Some(channel_name),
            shm_dir: Some(dir.to_path_buf()),
        };
        let blob = args.serialize().map_err(SupervisorError::Encode)?;

        let mut child = Command::new(&self.config.executable)
            .arg(blob)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(SupervisorError::Spawn)?;
        tracing::info!(
            "Started render process {} ({})",
            child.id(),
            self.config.executable.display()
        );

        let output = match output::forward_all(&mut child) {
            Ok(output) => output,
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(e);
            }
        };

        Ok(Running {
            child: Mutex::new(child),
            channel,
            keep_alive,
            output,
            reaped: AtomicBool::new(false),
        })
    }

    fn ensure_alive(&self) -> Result<&Running, SupervisorError> {
        let running = match (&self.running, self.state) {
            (Some(running), RenderProcessState::Running) => running,
            _ => return Err(SupervisorError::NotRunning),
        };
        let exited = running.child.lock().try_wait().map_err(SupervisorError::Spawn)?;
        if let Some(status) = exited {
            if !running.reaped.swap(true, Ordering::AcqRel) {
                tracing::error!("Render process exited unexpectedly ({status})");
                self.names.remove_render_regions();
            }
            running.channel.mark_dead("render process exited");
            return Err(SupervisorError::ChildExited(status.code()));
        }
        Ok(running)
    }

    /// ### English
    /// Fire-and-forget send.
    ///
    /// ### 中文
    /// 发送即忘。
    pub fn send(&self, request: &DownstreamRequest) -> Result<(), SupervisorError> {
        let running = self.ensure_alive()?;
        running.channel.notify(request)?;
        Ok(())
    }

    /// ### English
    /// Sends `request` and waits up to the configured request timeout for the answer.
    ///
    /// ### 中文
    /// 发送 `request`，并在配置的请求超时内等待应答。
    pub fn send_request<T: DeserializeOwned>(
        &self,
        request: &DownstreamRequest,
    ) -> Result<T, SupervisorError> {
        let running = self.ensure_alive()?;
        let response = running
            .channel
            .request(request, self.config.request_timeout)
            .inspect_err(|e| {
                if e.is_channel_fatal() {
                    tracing::error!("Render process unresponsive on {}: {e}", request.kind());
                }
            })?;
        Ok(response)
    }

    /// ### English
    /// Signals the keep-alive event, waits out the grace period, then kills the child if it is
    /// still running. Idempotent.
    ///
    /// ### 中文
    /// 触发 keep-alive 事件，等待宽限期结束，若子进程仍在运行则将其终止。可重复调用。
    pub fn stop(&mut self) {
        if self.state != RenderProcessState::Running {
            return;
        }
        self.state = RenderProcessState::Stopping;

        if let Some(running) = self.running.take() {
            if let Err(e) = running.keep_alive.set() {
                tracing::warn!("Failed to signal keep-alive event: {e}");
            }

            {
                let mut child = running.child.lock();
                let deadline = Instant::now() + self.config.shutdown_grace;
                let exited = loop {
                    match child.try_wait() {
                        Ok(Some(status)) => break Some(status),
                        Ok(None) if Instant::now() < deadline => thread::sleep(EXIT_POLL),
                        Ok(None) => break None,
                        Err(e) => {
                            tracing::warn!("Failed to poll render process: {e}");
                            break None;
                        }
                    }
                };
                match exited {
                    Some(status) => tracing::info!("Render process exited ({status})"),
                    None => {
                        tracing::warn!("Render process did not exit within grace period; killing it");
                        let _ = child.kill();
                        let _ = child.wait();
                    }
                }
            }

            self.names.remove_render_regions();
            running.channel.close();
            for handle in running.output {
                let _ = handle.join();
            }
        }

        self.state = RenderProcessState::Stopped;
    }
}

impl Drop for RenderProcess {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::RenderGuid;

    #[test]
    fn send_before_start_fails() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, _rx) = crossbeam_channel::unbounded();
        let mut process = RenderProcess::new(SupervisorConfig::default().with_shm_dir(dir.path()), tx);
        let result = process.send(&DownstreamRequest::DebugInlay {
            guid: RenderGuid::new(),
        });
        assert!(matches!(result, Err(SupervisorError::NotRunning)));
        process.stop();
        assert_eq!(process.state(), RenderProcessState::Stopped);
    }

    #[test]
    fn failed_launch_returns_to_stopped() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, _rx) = crossbeam_channel::unbounded();
        let config = SupervisorConfig::new(dir.path().join("missing-render-host"))
            .with_shm_dir(dir.path());
        let mut process = RenderProcess::new(config, tx);
        assert!(matches!(process.start(), Err(SupervisorError::Spawn(_))));
        assert_eq!(process.state(), RenderProcessState::Stopped);

        // Resources of the failed attempt were released, so a retry fails the same way.
        assert!(matches!(process.start(), Err(SupervisorError::Spawn(_))));
    }
}
