use std::path::PathBuf;

pub mod commands;
pub mod config;
pub mod core;
pub mod logging;
pub mod storage;

pub use config::SyncSettings;
pub use core::{SyncEngine, SyncPlan, SyncReport};

/// 应用配置目录（config.json 和日志所在位置）
pub fn app_config_dir() -> PathBuf {
    dirs::config_dir()
        .map(|p| p.join("ftpsync"))
        .unwrap_or_else(|| PathBuf::from(".ftpsync"))
}

pub mod dirs {
    use std::path::PathBuf;

    pub fn config_dir() -> Option<PathBuf> {
        if cfg!(target_os = "windows") {
            std::env::var("APPDATA").ok().map(PathBuf::from)
        } else if cfg!(target_os = "macos") {
            std::env::var("HOME")
                .ok()
                .map(|h| PathBuf::from(h).join("Library").join("Application Support"))
        } else {
            // Linux: 优先 XDG_CONFIG_HOME
            std::env::var("XDG_CONFIG_HOME")
                .ok()
                .filter(|p| !p.is_empty())
                .map(PathBuf::from)
                .or_else(|| {
                    std::env::var("HOME")
                        .ok()
                        .map(|h| PathBuf::from(h).join(".config"))
                })
        }
    }
}
