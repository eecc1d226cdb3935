//! ### English
//! Spin-then-park waiting for the shared memory rings and event words.
//!
//! ### 中文
//! 供共享内存环与事件字使用的先自旋后挂起的等待工具。
mod backoff;

pub(crate) use backoff::Backoff;
