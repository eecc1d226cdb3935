//! ### English
//! Child-process side: engine initialisation, the overlay registry, request dispatch and the
//! parent-liveness watchdog.
//!
//! ### 中文
//! 子进程侧：引擎初始化、overlay 注册表、请求分发以及父进程存活看门狗。

mod dispatch;
mod process;
mod watchdog;

pub use dispatch::Dispatcher;
pub use process::{RenderHostOptions, run, run_with};
pub use watchdog::{ParentWatchdog, parent_alive};

use crate::engine::EngineError;
use crate::ipc::IpcError;
use crate::shm::ShmError;

#[derive(Debug, thiserror::Error)]
pub enum RenderHostError {
    #[error("failed to open keep-alive event: {0}")]
    KeepAlive(#[source] ShmError),
    #[error(transparent)]
    Ipc(#[from] IpcError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("failed to spawn watchdog thread: {0}")]
    Spawn(#[source] std::io::Error),
}
