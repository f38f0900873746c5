//! 应用配置模块

use crate::core::reconcile::ReconcileOptions;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// 同步配置（config.json 的 `sync` 部分）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSettings {
    /// 清单文件名（位于本地根目录）
    #[serde(default = "default_listing_file")]
    pub listing_file: String,
    /// 每个目录中的过滤规则文件名
    #[serde(default = "default_rules_file")]
    pub rules_file: String,
    /// 修改时间容差（秒）
    #[serde(default = "default_time_tolerance")]
    pub time_tolerance_secs: i64,
    /// 默认使用被动模式
    #[serde(default = "default_true")]
    pub passive: bool,
    /// 上传前计算摘要并写入清单，用于以后检测重命名
    #[serde(default = "default_true")]
    pub hash_uploads: bool,
    /// 清单记录数超过有效条目的多少倍时自动整理，0 表示关闭
    #[serde(default = "default_auto_preen_ratio")]
    pub auto_preen_ratio: usize,
    /// 所有目录共用的规则，在目录规则都不能决定时使用
    #[serde(default = "default_global_rules")]
    pub global_rules: Vec<String>,
}

fn default_listing_file() -> String {
    ".ftpsync-listing".to_string()
}

fn default_rules_file() -> String {
    ".ftpsync-rules".to_string()
}

fn default_time_tolerance() -> i64 {
    2
}

fn default_true() -> bool {
    true
}

fn default_auto_preen_ratio() -> usize {
    4
}

fn default_global_rules() -> Vec<String> {
    ["!.git", "!.svn", "!.DS_Store", "!Thumbs.db", "!*~"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            listing_file: default_listing_file(),
            rules_file: default_rules_file(),
            time_tolerance_secs: default_time_tolerance(),
            passive: default_true(),
            hash_uploads: default_true(),
            auto_preen_ratio: default_auto_preen_ratio(),
            global_rules: default_global_rules(),
        }
    }
}

impl SyncSettings {
    /// 从配置文件加载，文件缺失或格式错误时使用默认值
    pub fn load(config_dir: &Path) -> Self {
        let config_file = config_dir.join("config.json");
        fs::read_to_string(&config_file)
            .ok()
            .and_then(|content| serde_json::from_str::<serde_json::Value>(&content).ok())
            .and_then(|config| config.get("sync").cloned())
            .and_then(|sync| {
                serde_json::from_value::<SyncSettings>(sync)
                    .inspect_err(|e| tracing::warn!("config.json 中的 sync 配置无效: {}", e))
                    .ok()
            })
            .unwrap_or_default()
    }

    pub fn reconcile_options(&self) -> ReconcileOptions {
        ReconcileOptions {
            time_tolerance_secs: self.time_tolerance_secs,
        }
    }
}
