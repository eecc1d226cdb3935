//! ### English
//! Render-host process. Launched by the supervisor with one argument: the JSON boot blob.
//!
//! ### 中文
//! 渲染宿主进程。由 supervisor 启动，只接收一个参数：JSON 启动参数块。

use std::process::ExitCode;

use clap::Parser;
use inlay_render::protocol::RenderProcessArguments;
use inlay_render::{logging, render_host};

#[derive(Debug, Parser)]
#[command(name = "inlay-render-host", about = "Out-of-process renderer for web inlays")]
struct Cli {
    /// Serialized `RenderProcessArguments` JSON.
    args: String,
}

fn main() -> ExitCode {
    logging::init();
    let cli = Cli::parse();

    let args = match RenderProcessArguments::deserialize(&cli.args) {
        Ok(args) => args,
        Err(e) => {
            tracing::error!("Invalid boot arguments: {e}");
            return ExitCode::FAILURE;
        }
    };

    tracing::info!("Render process running (parent pid {})", args.parent_pid);
    match render_host::run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("Render process failed: {e}");
            ExitCode::FAILURE
        }
    }
}
