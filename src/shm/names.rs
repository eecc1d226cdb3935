use std::path::{Path, PathBuf};
use std::{env, fs, io};

use uuid::Uuid;

/// ### English
/// Environment variable overriding the directory that backs named shared memory.
///
/// ### 中文
/// 覆盖命名共享内存所在目录的环境变量。
pub const SHM_DIR_ENV: &str = "INLAY_RENDER_SHM_DIR";

const PREFIX: &str = "inlay-render";

/// ### English
/// Returns the directory backing named shared memory: `$INLAY_RENDER_SHM_DIR`, then `/dev/shm`,
/// then the OS temp directory.
///
/// ### 中文
/// 返回命名共享内存所在目录：依次为 `$INLAY_RENDER_SHM_DIR`、`/dev/shm`、系统临时目录。
pub fn default_shm_dir() -> PathBuf {
    if let Some(dir) = env::var_os(SHM_DIR_ENV) {
        return PathBuf::from(dir);
    }
    let dev_shm = Path::new("/dev/shm");
    if dev_shm.is_dir() {
        return dev_shm.to_path_buf();
    }
    env::temp_dir()
}

/// ### English
/// Deterministic names for every shared resource of one host instance.
///
/// Every name embeds the host (parent) pid so two hosts on one machine never collide; resources
/// that can coexist per overlay also get a fresh uuid suffix.
///
/// ### 中文
/// 单个宿主实例所有共享资源的确定性命名。
///
/// 每个名字都包含宿主（父进程）pid，保证同一台机器上的多个宿主不会冲突；
/// 每个 overlay 可能同时存在多份的资源还会附加新的 uuid 后缀。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceNames {
    parent_pid: u32,
    dir: PathBuf,
}

impl ResourceNames {
    pub fn new(parent_pid: u32, dir: impl Into<PathBuf>) -> Self {
        Self {
            parent_pid,
            dir: dir.into(),
        }
    }

    /// ### English
    /// Names rooted at the current process id and the default shared memory directory.
    ///
    /// ### 中文
    /// 以当前进程 ID 和默认共享内存目录为根的命名。
    pub fn for_current_process() -> Self {
        Self::new(std::process::id(), default_shm_dir())
    }

    pub fn parent_pid(&self) -> u32 {
        self.parent_pid
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn ipc_channel(&self) -> String {
        format!("{PREFIX}-ipc-{}", self.parent_pid)
    }

    pub fn keep_alive(&self) -> String {
        format!("{PREFIX}-keepalive-{}", self.parent_pid)
    }

    pub fn bitmap_buffer(&self) -> String {
        format!("{PREFIX}-bitmap-{}-{}", self.parent_pid, Uuid::new_v4().simple())
    }

    pub fn frame_info(&self) -> String {
        format!("{PREFIX}-frames-{}-{}", self.parent_pid, Uuid::new_v4().simple())
    }

    /// ### English
    /// Texture region name for a share token; opening a shared texture handle resolves to this.
    ///
    /// ### 中文
    /// 共享 token 对应的纹理区域名；打开共享纹理句柄时解析为该名字。
    pub fn texture(&self, token: u64) -> String {
        format!("{PREFIX}-tex-{}-{token:016x}", self.parent_pid)
    }

    fn is_render_owned(&self, file_name: &str) -> bool {
        ["bitmap", "frames", "tex"].iter().any(|kind| {
            file_name.starts_with(&format!("{PREFIX}-{kind}-{}-", self.parent_pid))
        })
    }

    /// ### English
    /// Deletes every bitmap, frame-ring and texture region the render host created under these
    /// names. Only call once the render host has exited: a dead child never unlinks its own
    /// regions. Returns how many entries were removed.
    ///
    /// ### 中文
    /// 删除渲染宿主在这些命名下创建的所有 bitmap、帧环与纹理区域。只能在渲染宿主退出后调用：
    /// 已死亡的子进程不会自行 unlink 其区域。返回删除的条目数。
    pub fn remove_render_regions(&self) -> usize {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!("Failed to scan {} for leftover regions: {e}", self.dir.display());
                return 0;
            }
        };

        let mut removed = 0;
        for entry in entries.flatten() {
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            if !self.is_render_owned(name) {
                continue;
            }
            match fs::remove_file(entry.path()) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => tracing::warn!("Failed to remove leftover region {name}: {e}"),
            }
        }
        if removed > 0 {
            tracing::info!("Removed {removed} region(s) left behind by the render process");
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_scoped_by_parent_pid() {
        let a = ResourceNames::new(100, "/tmp");
        let b = ResourceNames::new(200, "/tmp");
        assert_ne!(a.ipc_channel(), b.ipc_channel());
        assert_ne!(a.keep_alive(), b.keep_alive());
        assert_eq!(a.ipc_channel(), ResourceNames::new(100, "/other").ipc_channel());
        assert!(a.texture(7).contains("-100-"));
    }

    #[test]
    fn removes_only_render_regions_of_this_host() {
        let dir = tempfile::tempdir().unwrap();
        let names = ResourceNames::new(42, dir.path());
        let other = ResourceNames::new(43, dir.path());
        let leftovers = [names.bitmap_buffer(), names.frame_info(), names.texture(9)];
        let kept = [
            names.ipc_channel(),
            names.keep_alive(),
            other.bitmap_buffer(),
            other.texture(9),
        ];
        for name in leftovers.iter().chain(&kept) {
            fs::write(dir.path().join(name), b"x").unwrap();
        }

        assert_eq!(names.remove_render_regions(), leftovers.len());
        for name in &leftovers {
            assert!(!dir.path().join(name).exists());
        }
        for name in &kept {
            assert!(dir.path().join(name).exists());
        }
        assert_eq!(names.remove_render_regions(), 0);
    }

    #[test]
    fn per_overlay_names_are_unique() {
        let names = ResourceNames::new(1, "/tmp");
        assert_ne!(names.bitmap_buffer(), names.bitmap_buffer());
        assert_ne!(names.frame_info(), names.frame_info());
    }
}
