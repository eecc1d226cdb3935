//! ### English
//! Boot arguments the supervisor hands to the render-host process as one JSON blob.
//!
//! ### 中文
//! supervisor 以单个 JSON 块形式传给渲染宿主进程的启动参数。

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::shm::{ResourceNames, default_shm_dir};

/// ### English
/// Render-host boot arguments.
///
/// Only `parent_pid` is required. Every other field falls back to a default derived from it,
/// so an older host can still launch a newer render host.
///
/// ### 中文
/// 渲染宿主启动参数。
///
/// 只有 `parent_pid` 是必需的。其它字段缺省时都由它推导默认值，
/// 因此旧版宿主依然可以启动新版渲染宿主。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderProcessArguments {
    pub parent_pid: u32,
    #[serde(default)]
    pub engine_library_dir: Option<PathBuf>,
    #[serde(default)]
    pub asset_dir: Option<PathBuf>,
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    /// ### English
    /// GPU adapter both processes must bind, so shared textures are openable. `None` picks the
    /// default adapter.
    ///
    /// ### 中文
    /// 两个进程都必须绑定的 GPU 适配器，以保证共享纹理可被打开。`None` 表示选择默认适配器。
    #[serde(default)]
    pub adapter_id: Option<u64>,
    #[serde(default)]
    pub keep_alive_name: Option<String>,
    #[serde(default)]
    pub ipc_channel_name: Option<String>,
    #[serde(default)]
    pub shm_dir: Option<PathBuf>,
}

impl RenderProcessArguments {
    pub fn new(parent_pid: u32) -> Self {
        Self {
            parent_pid,
            engine_library_dir: None,
            asset_dir: None,
            cache_dir: None,
            adapter_id: None,
            keep_alive_name: None,
            ipc_channel_name: None,
            shm_dir: None,
        }
    }

    pub fn serialize(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn deserialize(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// ### English
    /// Resource naming for the processes described by these arguments.
    ///
    /// ### 中文
    /// 这组参数所描述进程的资源命名。
    pub fn resource_names(&self) -> ResourceNames {
        let dir = self.shm_dir.clone().unwrap_or_else(default_shm_dir);
        ResourceNames::new(self.parent_pid, dir)
    }

    pub fn ipc_channel_name(&self) -> String {
        self.ipc_channel_name
            .clone()
            .unwrap_or_else(|| self.resource_names().ipc_channel())
    }

    pub fn keep_alive_name(&self) -> String {
        self.keep_alive_name
            .clone()
            .unwrap_or_else(|| self.resource_names().keep_alive())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_optional_fields_fall_back() {
        let args = RenderProcessArguments::deserialize(r#"{"parent_pid":4242}"#).unwrap();
        assert_eq!(args, RenderProcessArguments::new(4242));
        assert_eq!(args.ipc_channel_name(), "inlay-render-ipc-4242");
        assert_eq!(args.keep_alive_name(), "inlay-render-keepalive-4242");
    }

    #[test]
    fn explicit_fields_survive_the_blob() {
        let mut args = RenderProcessArguments::new(7);
        args.adapter_id = Some(0x1234);
        args.ipc_channel_name = Some("custom".into());
        args.shm_dir = Some(PathBuf::from("/tmp/shm"));
        let blob = args.serialize().unwrap();
        let parsed = RenderProcessArguments::deserialize(&blob).unwrap();
        assert_eq!(parsed, args);
        assert_eq!(parsed.ipc_channel_name(), "custom");
        assert_eq!(parsed.resource_names().dir(), std::path::Path::new("/tmp/shm"));
    }

    #[test]
    fn parent_pid_is_required() {
        assert!(RenderProcessArguments::deserialize("{}").is_err());
    }
}
