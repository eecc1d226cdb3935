//! ### English
//! Forwards the child's stdout/stderr into the host's log.
//!
//! ### 中文
//! 将子进程的 stdout/stderr 转发到宿主日志。

use std::io::{BufRead, BufReader, Read};
use std::process::Child;
use std::thread;

use super::SupervisorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stream {
    Stdout,
    Stderr,
}

/// ### English
/// Takes both pipes of `child` and starts one forwarding thread per pipe.
///
/// ### 中文
/// 取走 `child` 的两个管道，并为每个管道启动一个转发线程。
pub(super) fn forward_all(child: &mut Child) -> Result<Vec<thread::JoinHandle<()>>, SupervisorError> {
    let mut handles = Vec::with_capacity(2);
    if let Some(stdout) = child.stdout.take() {
        handles.push(forward(stdout, Stream::Stdout)?);
    }
    if let Some(stderr) = child.stderr.take() {
        handles.push(forward(stderr, Stream::Stderr)?);
    }
    Ok(handles)
}

fn forward<R>(pipe: R, stream: Stream) -> Result<thread::JoinHandle<()>, SupervisorError>
where
    R: Read + Send + 'static,
{
    thread::Builder::new()
        .name(format!("InlayRender{stream:?}"))
        .spawn(move || {
            for line in BufReader::new(pipe).lines() {
                let Ok(line) = line else { break };
                match stream {
                    Stream::Stdout => tracing::info!(target: "render", "[render] {line}"),
                    Stream::Stderr => tracing::warn!(target: "render", "[render] {line}"),
                }
            }
        })
        .map_err(SupervisorError::Spawn)
}
