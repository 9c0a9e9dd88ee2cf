//! 临时写入与原子替换的辅助方法。

use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// 同目录临时文件，`finalize` 时 rename 覆盖目标。
pub struct AtomicFile {
    target: PathBuf,
    temp_path: PathBuf,
    file: File,
}

impl AtomicFile {
    /// 在目标路径同目录创建临时文件（仅属主可读写）。
    pub async fn new(target: &Path) -> io::Result<Self> {
        let parent = parent_dir(target);
        fs::create_dir_all(&parent).await?;
        let base = target
            .file_name()
            .map(|name| name.to_string_lossy())
            .unwrap_or_else(|| "file".into());
        let temp_path = parent.join(format!(".{base}.tmp.{}", Uuid::new_v4()));

        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        options.mode(0o600);
        let file = options.open(&temp_path).await?;
        Ok(Self {
            target: target.to_path_buf(),
            temp_path,
            file,
        })
    }

    pub async fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.file.write_all(bytes).await
    }

    /// 放弃并清理临时文件。
    pub async fn cleanup(self) {
        drop(self.file);
        let _ = fs::remove_file(&self.temp_path).await;
    }

    /// 同步并原子替换目标文件。
    pub async fn finalize(self) -> io::Result<()> {
        if let Err(err) = self.file.sync_all().await {
            let _ = fs::remove_file(&self.temp_path).await;
            return Err(err);
        }
        drop(self.file);

        if let Err(err) = fs::rename(&self.temp_path, &self.target).await {
            #[cfg(windows)]
            {
                if fs::remove_file(&self.target).await.is_ok()
                    && fs::rename(&self.temp_path, &self.target).await.is_ok()
                {
                    return Ok(());
                }
            }
            let _ = fs::remove_file(&self.temp_path).await;
            return Err(err);
        }

        let _ = sync_dir(&parent_dir(&self.target)).await;
        Ok(())
    }
}

/// 一次性写入：临时文件 + fsync + rename。
pub async fn write_atomic(target: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut atomic = AtomicFile::new(target).await?;
    if let Err(err) = atomic.write_all(bytes).await {
        atomic.cleanup().await;
        return Err(err);
    }
    atomic.finalize().await
}

fn parent_dir(target: &Path) -> PathBuf {
    match target.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

async fn sync_dir(path: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || {
            let dir = std::fs::File::open(path)?;
            dir.sync_all()
        })
        .await
        .map_err(|err| io::Error::other(err.to_string()))?
    }
    #[cfg(not(unix))]
    {
        let _ = path;
        Ok(())
    }
}
