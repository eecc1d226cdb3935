//! ### English
//! Named, file-backed shared memory regions.
//!
//! A region is a file under the shared memory directory mapped read/write with `memmap2`. The
//! creating process owns the name and unlinks it on drop; mappings held by the peer stay valid
//! until the peer drops them.
//!
//! ### 中文
//! 命名的、基于文件的共享内存区域。
//!
//! 区域是共享内存目录下的一个文件，通过 `memmap2` 以读写方式映射。创建方进程拥有该名字，
//! 并在 drop 时 unlink；对端持有的映射在其 drop 之前依然有效。

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::ptr;
use std::sync::atomic::{AtomicU32, AtomicU64};

use memmap2::{MmapMut, MmapOptions};

use super::ShmError;

/// ### English
/// One mapped shared memory region.
///
/// ### 中文
/// 一个已映射的共享内存区域。
pub struct SharedRegion {
    /// ### English
    /// Logical name (file name inside the shared memory directory).
    ///
    /// ### 中文
    /// 逻辑名（共享内存目录中的文件名）。
    name: String,
    /// ### English
    /// Full path of the backing file.
    ///
    /// ### 中文
    /// 底层文件的完整路径。
    path: PathBuf,
    /// ### English
    /// Base pointer of the mapping (cached so shared access never needs `&mut MmapMut`).
    ///
    /// ### 中文
    /// 映射基址（缓存起来，使共享访问无需 `&mut MmapMut`）。
    base: *mut u8,
    len: usize,
    /// ### English
    /// Whether this process created the region (and therefore unlinks it on drop).
    ///
    /// ### 中文
    /// 本进程是否为创建方（若是则在 drop 时 unlink）。
    owner: bool,
    _map: MmapMut,
}

unsafe impl Send for SharedRegion {}
unsafe impl Sync for SharedRegion {}

impl std::fmt::Debug for SharedRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedRegion")
            .field("name", &self.name)
            .field("len", &self.len)
            .field("owner", &self.owner)
            .finish()
    }
}

fn validate_name(name: &str) -> Result<(), ShmError> {
    let valid = !name.is_empty()
        && name.len() <= 200
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_' || b == b'.')
        && !name.starts_with('.');
    if valid {
        Ok(())
    } else {
        Err(ShmError::InvalidName {
            name: name.to_string(),
        })
    }
}

impl SharedRegion {
    /// ### English
    /// Creates a new region of `len` zeroed bytes. Fails if the name is already taken.
    ///
    /// #### Parameters
    /// - `dir`: Shared memory directory.
    /// - `name`: Region name (ASCII alphanumerics, `-`, `_`, `.`).
    /// - `len`: Region size in bytes (must be non-zero).
    ///
    /// ### 中文
    /// 创建一个 `len` 字节、内容为 0 的新区域；若名字已被占用则失败。
    ///
    /// #### 参数
    /// - `dir`：共享内存目录。
    /// - `name`：区域名（ASCII 字母数字、`-`、`_`、`.`）。
    /// - `len`：区域大小（字节，必须非 0）。
    pub fn create(dir: &Path, name: &str, len: usize) -> Result<Self, ShmError> {
        validate_name(name)?;
        if len == 0 {
            return Err(ShmError::TooSmall {
                name: name.to_string(),
                len,
                required: 1,
            });
        }

        let path = dir.join(name);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|source| match source.kind() {
                io::ErrorKind::AlreadyExists => ShmError::AlreadyExists {
                    name: name.to_string(),
                },
                _ => ShmError::Io {
                    path: path.clone(),
                    source,
                },
            })?;

        let sized = file.set_len(len as u64).and_then(|()| map(&file, len));
        match sized {
            Ok(map) => Ok(Self::from_map(name, path, map, true)),
            Err(source) => {
                let _ = fs::remove_file(&path);
                Err(ShmError::Io { path, source })
            }
        }
    }

    /// ### English
    /// Opens an existing region created by the peer process.
    ///
    /// ### 中文
    /// 打开由对端进程创建的已有区域。
    pub fn open(dir: &Path, name: &str) -> Result<Self, ShmError> {
        validate_name(name)?;
        let path = dir.join(name);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|source| match source.kind() {
                io::ErrorKind::NotFound => ShmError::NotFound {
                    name: name.to_string(),
                },
                _ => ShmError::Io {
                    path: path.clone(),
                    source,
                },
            })?;

        let len = file
            .metadata()
            .map_err(|source| ShmError::Io {
                path: path.clone(),
                source,
            })?
            .len() as usize;
        if len == 0 {
            return Err(ShmError::TooSmall {
                name: name.to_string(),
                len,
                required: 1,
            });
        }

        let map = map(&file, len).map_err(|source| ShmError::Io {
            path: path.clone(),
            source,
        })?;
        Ok(Self::from_map(name, path, map, false))
    }

    fn from_map(name: &str, path: PathBuf, mut map: MmapMut, owner: bool) -> Self {
        let base = map.as_mut_ptr();
        let len = map.len();
        Self {
            name: name.to_string(),
            path,
            base,
            len,
            owner,
            _map: map,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_owner(&self) -> bool {
        self.owner
    }

    fn check(&self, offset: usize, len: usize) -> Result<(), ShmError> {
        match offset.checked_add(len) {
            Some(end) if end <= self.len => Ok(()),
            _ => Err(ShmError::OutOfBounds {
                offset,
                len,
                capacity: self.len,
            }),
        }
    }

    /// ### English
    /// Copies `src` into the region at `offset`.
    ///
    /// ### 中文
    /// 将 `src` 拷贝到区域的 `offset` 处。
    pub fn write_at(&self, offset: usize, src: &[u8]) -> Result<(), ShmError> {
        self.check(offset, src.len())?;
        unsafe {
            ptr::copy_nonoverlapping(src.as_ptr(), self.base.add(offset), src.len());
        }
        Ok(())
    }

    /// ### English
    /// Copies `dst.len()` bytes starting at `offset` out of the region.
    ///
    /// ### 中文
    /// 从区域的 `offset` 处拷贝出 `dst.len()` 个字节。
    pub fn read_at(&self, offset: usize, dst: &mut [u8]) -> Result<(), ShmError> {
        self.check(offset, dst.len())?;
        unsafe {
            ptr::copy_nonoverlapping(self.base.add(offset), dst.as_mut_ptr(), dst.len());
        }
        Ok(())
    }

    /// ### English
    /// Returns the 32-bit atomic word at `offset` (must be 4-byte aligned and in bounds).
    ///
    /// ### 中文
    /// 返回位于 `offset` 的 32 位原子字（必须 4 字节对齐且不越界）。
    pub(crate) fn atomic_u32(&self, offset: usize) -> Result<&AtomicU32, ShmError> {
        self.check(offset, 4)?;
        if offset % 4 != 0 {
            return Err(ShmError::OutOfBounds {
                offset,
                len: 4,
                capacity: self.len,
            });
        }
        Ok(unsafe { &*(self.base.add(offset) as *const AtomicU32) })
    }

    /// ### English
    /// Returns the 64-bit atomic word at `offset` (must be 8-byte aligned and in bounds).
    ///
    /// ### 中文
    /// 返回位于 `offset` 的 64 位原子字（必须 8 字节对齐且不越界）。
    pub(crate) fn atomic_u64(&self, offset: usize) -> Result<&AtomicU64, ShmError> {
        self.check(offset, 8)?;
        if offset % 8 != 0 {
            return Err(ShmError::OutOfBounds {
                offset,
                len: 8,
                capacity: self.len,
            });
        }
        Ok(unsafe { &*(self.base.add(offset) as *const AtomicU64) })
    }

    /// ### English
    /// Raw base pointer for bulk copies by the ring and transports; callers bound-check first.
    ///
    /// ### 中文
    /// 供环形缓冲区与传输层批量拷贝使用的原始基址；调用方需先做越界检查。
    #[inline]
    pub(crate) fn base_ptr(&self) -> *mut u8 {
        self.base
    }
}

impl Drop for SharedRegion {
    fn drop(&mut self) {
        if self.owner {
            let _ = fs::remove_file(&self.path);
        }
    }
}

fn map(file: &File, len: usize) -> io::Result<MmapMut> {
    unsafe { MmapOptions::new().len(len).map_mut(file) }
}
