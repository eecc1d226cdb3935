//! ### English
//! `tracing` subscriber setup.
//!
//! ### 中文
//! `tracing` 订阅器初始化。

use std::io::IsTerminal;

use tracing_subscriber::EnvFilter;

/// ### English
/// Installs a fmt subscriber filtered by `RUST_LOG` (default `info`). Later calls are no-ops.
///
/// ### 中文
/// 安装按 `RUST_LOG` 过滤的 fmt 订阅器（默认 `info`）。之后的调用不做任何事。
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_ansi(std::io::stdout().is_terminal())
        .try_init();
}
