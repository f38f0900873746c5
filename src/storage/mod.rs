pub mod ftp;
pub mod local;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub use ftp::{FtpOptions, FtpSite};
pub use local::LocalSite;

/// 上传时每次写入的块大小
pub const UPLOAD_CHUNK_SIZE: usize = 64 * 1024;

/// 远程目录中的一项
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEntry {
    pub name: String,
    pub size: u64,
    pub is_dir: bool,
    /// rwxrwxrwx 九位权限，未知时为 0
    pub perms: u16,
}

/// 上传进度回调：(已发送字节, 总字节)
pub type Progress<'a> = &'a mut (dyn FnMut(u64, u64) + Send);

/// 远程站点接口
///
/// 所有路径都相对于站点根目录，以 `/` 分隔，空字符串表示根目录本身。
/// 操作一次只执行一个，失败不重试。
#[async_trait]
pub trait RemoteSite: Send {
    /// 列出一个目录（不递归）
    async fn list_dir(&mut self, path: &str) -> Result<Vec<RemoteEntry>>;

    /// 上传本地文件，已存在时覆盖；返回写入的字节数
    async fn upload(&mut self, local: &Path, remote: &str, progress: Progress<'_>) -> Result<u64>;

    /// 删除文件，文件必须存在
    async fn delete_file(&mut self, path: &str) -> Result<()>;

    /// 创建目录，目录不能已存在
    async fn make_dir(&mut self, path: &str) -> Result<()>;

    /// 删除目录，目录必须为空
    async fn remove_dir(&mut self, path: &str) -> Result<()>;

    async fn rename(&mut self, from: &str, to: &str) -> Result<()>;

    /// 结束会话
    async fn close(&mut self) -> Result<()>;

    /// 获取站点名称（用于日志）
    fn name(&self) -> &str;
}

/// 同步目标
#[derive(Debug, Clone)]
pub enum SiteTarget {
    Ftp(FtpOptions),
    /// 本地目录（挂载的远程盘或测试用）
    Local(PathBuf),
}

/// 根据目标创建站点实例
pub async fn create_site(target: &SiteTarget) -> Result<Box<dyn RemoteSite>> {
    match target {
        SiteTarget::Ftp(options) => {
            tracing::info!(
                "连接 FTP 站点: {}@{}:{} (root={:?}, passive={})",
                options.username,
                options.host,
                options.port,
                options.root,
                options.passive
            );
            Ok(Box::new(FtpSite::connect(options).await?) as Box<dyn RemoteSite>)
        }
        SiteTarget::Local(path) => {
            tracing::info!("使用本地目录作为目标: {:?}", path);
            Ok(Box::new(LocalSite::new(path)?) as Box<dyn RemoteSite>)
        }
    }
}
