//! ### English
//! Render-host process entry: boot, serve, orderly shutdown.
//!
//! ### 中文
//! 渲染宿主进程入口：启动、服务、有序关闭。

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::RecvTimeoutError;

use super::{Dispatcher, ParentWatchdog, RenderHostError};
use crate::engine::solid::SolidColorEngine;
use crate::engine::{BrowserEngine, EngineSettings};
use crate::gpu::{GpuDevice, ShmDevice};
use crate::ipc::IpcChannel;
use crate::protocol::{DownstreamRequest, RenderProcessArguments, UpstreamRequest};
use crate::shm::NamedEvent;

#[derive(Debug, Clone, Copy)]
pub struct RenderHostOptions {
    /// ### English
    /// How often the main loop re-checks the keep-alive event while idle.
    ///
    /// ### 中文
    /// 空闲时主循环重新检查 keep-alive 事件的间隔。
    pub poll_interval: Duration,
    pub shutdown_grace: Duration,
    pub watch_parent: bool,
}

impl Default for RenderHostOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(20),
            shutdown_grace: Duration::from_millis(1000),
            watch_parent: true,
        }
    }
}

/// ### English
/// Runs the render host with the shared-memory device and the placeholder engine until the
/// keep-alive event is set.
///
/// ### 中文
/// 使用共享内存设备和占位引擎运行渲染宿主，直到 keep-alive 事件被触发。
pub fn run(args: &RenderProcessArguments) -> Result<(), RenderHostError> {
    let device = Arc::new(ShmDevice::new(args.resource_names(), args.adapter_id));
    let engine = Arc::new(SolidColorEngine::new());
    run_with(args, engine, device, RenderHostOptions::default())
}

/// ### English
/// Runs the render host with an explicit engine and device.
///
/// Boot order: keep-alive event, parent watchdog, engine, IPC channel, `ReadyNotification`.
/// Shutdown runs in reverse once the keep-alive event is set or the channel dies.
///
/// ### 中文
/// 使用指定的引擎与设备运行渲染宿主。
///
/// 启动顺序：keep-alive 事件、父进程看门狗、引擎、IPC 通道、`ReadyNotification`。
/// 一旦 keep-alive 事件被触发或通道失效，便按相反顺序关闭。
pub fn run_with<E, D>(
    args: &RenderProcessArguments,
    engine: Arc<E>,
    device: Arc<D>,
    options: RenderHostOptions,
) -> Result<(), RenderHostError>
where
    E: BrowserEngine,
    D: GpuDevice,
{
    let names = args.resource_names();
    let keep_alive = Arc::new(
        NamedEvent::open(names.dir(), &args.keep_alive_name()).map_err(RenderHostError::KeepAlive)?,
    );

    let mut watchdog = if options.watch_parent {
        Some(
            ParentWatchdog::spawn(args.parent_pid, keep_alive.clone(), options.shutdown_grace)
                .map_err(RenderHostError::Spawn)?,
        )
    } else {
        None
    };

    engine.initialize(&EngineSettings::from(args))?;

    let (upstream_tx, upstream_rx) = crossbeam_channel::unbounded();
    let dispatcher = Arc::new(Dispatcher::new(
        engine.clone(),
        device,
        names.clone(),
        upstream_tx,
    ));
    let handler = dispatcher.clone();
    let channel: IpcChannel<UpstreamRequest, DownstreamRequest> =
        IpcChannel::open(names.dir(), &args.ipc_channel_name(), move |request| {
            handler.handle(request)
        })?;

    channel.notify(&UpstreamRequest::ReadyNotification {
        available_transports: dispatcher.available_transports(),
    })?;
    tracing::info!("Render host ready; waiting for keep-alive");

    while !keep_alive.is_set() {
        match upstream_rx.recv_timeout(options.poll_interval) {
            Ok(message) => {
                if let Err(e) = channel.notify(&message) {
                    tracing::warn!("Failed to send upstream message: {e}");
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
        if channel.is_dead() {
            tracing::error!("IPC channel to host is dead");
            break;
        }
    }

    tracing::info!("Render process shutting down");
    channel.close();
    dispatcher.close_all();
    engine.shutdown();
    if let Some(watchdog) = watchdog.as_mut() {
        watchdog.cancel();
    }
    Ok(())
}
