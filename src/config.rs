//! ### English
//! Host-side configuration.
//!
//! ### 中文
//! 宿主侧配置。

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ipc::DEFAULT_RING_CAPACITY;
use crate::protocol::FrameTransportMode;
use crate::shm::default_shm_dir;

/// ### English
/// Name of the render-host executable, looked up on `PATH` unless configured explicitly.
///
/// ### 中文
/// 渲染宿主可执行文件名；除非显式配置，否则在 `PATH` 中查找。
pub const RENDER_HOST_EXECUTABLE: &str = "inlay-render-host";

/// ### English
/// How the supervisor launches and talks to the render host.
///
/// ### 中文
/// supervisor 启动渲染宿主并与之通信的方式。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorConfig {
    pub executable: PathBuf,
    pub asset_dir: Option<PathBuf>,
    pub engine_library_dir: Option<PathBuf>,
    pub cache_dir: Option<PathBuf>,
    pub adapter_id: Option<u64>,
    /// ### English
    /// Upper bound on every request that expects a response.
    ///
    /// ### 中文
    /// 所有需要响应的请求的等待上限。
    pub request_timeout: Duration,
    /// ### English
    /// How long `stop` waits for a graceful exit before killing the child.
    ///
    /// ### 中文
    /// `stop` 在强制终止子进程前等待其优雅退出的时长。
    pub shutdown_grace: Duration,
    pub shm_dir: Option<PathBuf>,
    pub ring_capacity: usize,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            executable: PathBuf::from(RENDER_HOST_EXECUTABLE),
            asset_dir: None,
            engine_library_dir: None,
            cache_dir: None,
            adapter_id: None,
            request_timeout: Duration::from_millis(5000),
            shutdown_grace: Duration::from_millis(1000),
            shm_dir: None,
            ring_capacity: DEFAULT_RING_CAPACITY,
        }
    }
}

impl SupervisorConfig {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            ..Self::default()
        }
    }

    pub fn with_asset_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.asset_dir = Some(dir.into());
        self
    }

    pub fn with_engine_library_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.engine_library_dir = Some(dir.into());
        self
    }

    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    pub fn with_adapter_id(mut self, adapter_id: u64) -> Self {
        self.adapter_id = Some(adapter_id);
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn with_shm_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.shm_dir = Some(dir.into());
        self
    }

    pub fn with_ring_capacity(mut self, capacity: usize) -> Self {
        self.ring_capacity = capacity;
        self
    }

    /// ### English
    /// Effective shared-memory directory.
    ///
    /// ### 中文
    /// 实际使用的共享内存目录。
    pub fn resolved_shm_dir(&self) -> PathBuf {
        self.shm_dir.clone().unwrap_or_else(default_shm_dir)
    }
}

/// ### English
/// User-facing host settings. Missing fields take their defaults when deserialized.
///
/// ### 中文
/// 面向用户的宿主设置。反序列化时缺失字段取默认值。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub transport_mode: FrameTransportMode,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn supervisor_defaults() {
        let config = SupervisorConfig::default();
        assert_eq!(config.request_timeout, Duration::from_millis(5000));
        assert_eq!(config.shutdown_grace, Duration::from_millis(1000));
        assert_eq!(config.executable, PathBuf::from(RENDER_HOST_EXECUTABLE));

        let config = config.with_shm_dir("/tmp/x").with_adapter_id(9);
        assert_eq!(config.resolved_shm_dir(), PathBuf::from("/tmp/x"));
        assert_eq!(config.adapter_id, Some(9));
    }

    #[test]
    fn host_config_fills_missing_fields() {
        let config: HostConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.transport_mode, FrameTransportMode::SharedTexture);
        let config: HostConfig =
            serde_json::from_str(r#"{"transport_mode":"BitmapBuffer"}"#).unwrap();
        assert_eq!(config.transport_mode, FrameTransportMode::BitmapBuffer);
    }
}
