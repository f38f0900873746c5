use super::{Progress, RemoteEntry, RemoteSite, UPLOAD_CHUNK_SIZE};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use walkdir::WalkDir;

/// 以本地目录作为同步目标
///
/// 语义和 FTP 一样严格：删除不存在的文件、删除非空目录、创建已存在的目录都会失败。
pub struct LocalSite {
    base_path: PathBuf,
    name: String,
}

impl LocalSite {
    pub fn new(path: &Path) -> Result<Self> {
        if !path.exists() {
            std::fs::create_dir_all(path)
                .with_context(|| format!("无法创建目标目录: {:?}", path))?;
        }
        let name = format!("local:{}", path.display());
        Ok(Self {
            base_path: path.to_path_buf(),
            name,
        })
    }

    fn resolve_path(&self, path: &str) -> PathBuf {
        let path = path.trim_start_matches('/');
        if path.is_empty() {
            self.base_path.clone()
        } else {
            self.base_path.join(path)
        }
    }
}

#[cfg(unix)]
fn perms_of(metadata: &std::fs::Metadata) -> u16 {
    use std::os::unix::fs::PermissionsExt;
    (metadata.permissions().mode() & 0o777) as u16
}

#[cfg(not(unix))]
fn perms_of(metadata: &std::fs::Metadata) -> u16 {
    if metadata.permissions().readonly() {
        0o444
    } else {
        0o644
    }
}

#[async_trait]
impl RemoteSite for LocalSite {
    async fn list_dir(&mut self, path: &str) -> Result<Vec<RemoteEntry>> {
        let dir = self.resolve_path(path);
        if !dir.is_dir() {
            anyhow::bail!("目录不存在: {:?}", dir);
        }

        // 使用 spawn_blocking 避免阻塞 async runtime
        let entries = tokio::task::spawn_blocking(move || -> Result<Vec<RemoteEntry>> {
            let mut out = Vec::new();
            for entry in WalkDir::new(&dir)
                .min_depth(1)
                .max_depth(1)
                .follow_links(false)
                .sort_by_file_name()
            {
                let entry = entry?;
                let Some(name) = entry.file_name().to_str() else {
                    tracing::warn!("跳过非 UTF-8 文件名: {:?}", entry.path());
                    continue;
                };
                let metadata = entry.metadata()?;
                out.push(RemoteEntry {
                    name: name.to_string(),
                    size: if metadata.is_dir() { 0 } else { metadata.len() },
                    is_dir: metadata.is_dir(),
                    perms: perms_of(&metadata),
                });
            }
            Ok(out)
        })
        .await??;

        Ok(entries)
    }

    async fn upload(&mut self, local: &Path, remote: &str, progress: Progress<'_>) -> Result<u64> {
        let full_path = self.resolve_path(remote);
        let mut source = fs::File::open(local)
            .await
            .with_context(|| format!("无法打开本地文件: {:?}", local))?;
        let total = source.metadata().await?.len();

        // 使用临时文件写入，然后原子重命名
        let mut temp_name = full_path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        temp_name.push(".part");
        let temp_path = full_path.with_file_name(temp_name);

        let mut dest = fs::File::create(&temp_path)
            .await
            .with_context(|| format!("无法创建文件: {:?}", temp_path))?;
        let mut buf = vec![0u8; UPLOAD_CHUNK_SIZE];
        let mut sent = 0u64;
        loop {
            let n = source.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            dest.write_all(&buf[..n]).await?;
            sent += n as u64;
            progress(sent, total);
        }
        dest.flush().await?;
        drop(dest);

        fs::rename(&temp_path, &full_path).await?;
        Ok(sent)
    }

    async fn delete_file(&mut self, path: &str) -> Result<()> {
        let full_path = self.resolve_path(path);
        fs::remove_file(&full_path)
            .await
            .with_context(|| format!("删除文件失败: {:?}", full_path))
    }

    async fn make_dir(&mut self, path: &str) -> Result<()> {
        let full_path = self.resolve_path(path);
        fs::create_dir(&full_path)
            .await
            .with_context(|| format!("创建目录失败: {:?}", full_path))
    }

    async fn remove_dir(&mut self, path: &str) -> Result<()> {
        let full_path = self.resolve_path(path);
        fs::remove_dir(&full_path)
            .await
            .with_context(|| format!("删除目录失败: {:?}", full_path))
    }

    async fn rename(&mut self, from: &str, to: &str) -> Result<()> {
        let from_path = self.resolve_path(from);
        let to_path = self.resolve_path(to);
        fs::rename(&from_path, &to_path)
            .await
            .with_context(|| format!("重命名失败: {:?} -> {:?}", from_path, to_path))
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_strict_operations() {
        let dir = tempfile::tempdir().unwrap();
        let mut site = LocalSite::new(dir.path()).unwrap();

        site.make_dir("d").await.unwrap();
        assert!(site.make_dir("d").await.is_err());
        assert!(site.delete_file("d/missing").await.is_err());

        let src = dir.path().join("src.txt");
        std::fs::write(&src, "payload").unwrap();
        let mut calls = Vec::new();
        let sent = site
            .upload(&src, "d/a.txt", &mut |done, total| calls.push((done, total)))
            .await
            .unwrap();
        assert_eq!(sent, 7);
        assert_eq!(calls.last(), Some(&(7, 7)));

        assert!(site.remove_dir("d").await.is_err());
        site.rename("d/a.txt", "d/b.txt").await.unwrap();

        let listing = site.list_dir("d").await.unwrap();
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].name, "b.txt");
        assert_eq!(listing[0].size, 7);
        assert!(!listing[0].is_dir);

        site.delete_file("d/b.txt").await.unwrap();
        site.remove_dir("d").await.unwrap();
        let root = site.list_dir("").await.unwrap();
        assert_eq!(root.len(), 1);
        assert_eq!(root[0].name, "src.txt");
    }
}
