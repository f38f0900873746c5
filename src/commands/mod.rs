//! 命令行各模式的实现，main.rs 只负责解析参数

pub mod inventory;
pub mod listing;
pub mod sync;

use crate::config::SyncSettings;
use crate::core::listing::RemoteParams;
use crate::storage::{create_site, FtpOptions, RemoteSite, SiteTarget};
use anyhow::{Context, Result};
use std::path::PathBuf;

/// 所有命令共用的参数
#[derive(Debug, Clone)]
pub struct CommandContext {
    pub settings: SyncSettings,
    /// 本地根目录
    pub local_root: PathBuf,
    /// 清单文件路径
    pub listing_path: PathBuf,
    /// 命令行给出的密码，没有时提示输入
    pub password: Option<String>,
}

impl CommandContext {
    /// 清单路径默认位于本地根目录下
    pub fn new(
        settings: SyncSettings,
        local_root: PathBuf,
        listing: Option<PathBuf>,
        password: Option<String>,
    ) -> Self {
        let listing_path = listing.unwrap_or_else(|| local_root.join(&settings.listing_file));
        Self {
            settings,
            local_root,
            listing_path,
            password,
        }
    }

    pub fn engine(&self) -> crate::core::SyncEngine {
        crate::core::SyncEngine::new(self.settings.clone())
    }

    fn password_for(&self, params: &RemoteParams) -> Result<String> {
        match &self.password {
            Some(p) => Ok(p.clone()),
            None => rpassword::prompt_password(format!(
                "{}@{} 的密码: ",
                params.username, params.hostname
            ))
            .context("读取密码失败"),
        }
    }

    /// 按清单中的站点参数连接 FTP
    pub async fn connect_ftp(
        &self,
        params: &RemoteParams,
        passive: bool,
    ) -> Result<Box<dyn RemoteSite>> {
        if params.hostname.is_empty() || params.username.is_empty() {
            anyhow::bail!("清单中缺少主机名或用户名（H/U 行）");
        }
        let options = FtpOptions {
            host: params.hostname.clone(),
            port: params.port,
            username: params.username.clone(),
            password: self.password_for(params)?,
            root: params.root.clone(),
            passive,
        };
        create_site(&SiteTarget::Ftp(options))
            .await
            .with_context(|| format!("无法连接 {}:{}", params.hostname, params.port))
    }
}

/// 命令行的主动/被动选项覆盖配置
pub fn passive_mode(settings: &SyncSettings, active_flag: bool) -> bool {
    if active_flag {
        false
    } else {
        settings.passive
    }
}
