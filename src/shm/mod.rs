//! ### English
//! Named shared memory: the only medium the host and render-host processes share.
//!
//! - [`SharedRegion`]: a named, file-backed mapping created by one process and opened by the other.
//! - [`ShmRing`]: a lock-free ring of variable-length records living inside a region.
//! - [`NamedEvent`]: a manual-reset event word used purely as a shutdown signal.
//! - [`ResourceNames`]: deterministic naming derived from the parent process id.
//!
//! ### 中文
//! 命名共享内存：宿主进程与渲染宿主进程之间唯一共享的介质。
//!
//! - [`SharedRegion`]：由一个进程创建、另一个进程打开的命名文件映射。
//! - [`ShmRing`]：位于共享区域内的变长记录无锁环形缓冲区。
//! - [`NamedEvent`]：仅作为关闭信号使用的手动复位事件字。
//! - [`ResourceNames`]：由父进程 ID 推导出的确定性命名。

mod event;
mod names;
mod region;
mod ring;

use std::io;
use std::path::PathBuf;

pub use event::NamedEvent;
pub use names::{ResourceNames, default_shm_dir};
pub use region::SharedRegion;
pub use ring::{PopError, PushError, ShmRing};

/// ### English
/// Errors raised while creating, opening or addressing shared memory.
///
/// ### 中文
/// 创建、打开或寻址共享内存时产生的错误。
#[derive(Debug, thiserror::Error)]
pub enum ShmError {
    #[error("shared memory region `{name}` already exists")]
    AlreadyExists { name: String },
    #[error("shared memory region `{name}` does not exist")]
    NotFound { name: String },
    #[error("invalid shared memory name `{name}`")]
    InvalidName { name: String },
    #[error("shared memory region `{name}` is {len} bytes, {required} required")]
    TooSmall {
        name: String,
        len: usize,
        required: usize,
    },
    #[error("access at {offset}+{len} exceeds region of {capacity} bytes")]
    OutOfBounds {
        offset: usize,
        len: usize,
        capacity: usize,
    },
    #[error("ring header in `{name}` is corrupt")]
    CorruptHeader { name: String },
    #[error("i/o error on shared memory `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}
