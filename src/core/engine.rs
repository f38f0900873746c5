use crate::config::SyncSettings;
use crate::core::digest::{Blake3Hasher, ContentHasher};
use crate::core::filter::RuleSet;
use crate::core::inventory::scan_remote;
use crate::core::listing::{needs_compaction, ListingRecord, ListingStore, RemoteListing, RemoteParams};
use crate::core::plan::{build_plan, summarize, ActionSummary, SyncAction};
use crate::core::reconcile::reconcile;
use crate::core::scanner::{FileScanner, ScanConfig};
use crate::core::tree::{join_path, EntryId, FileMeta, Tree};
use crate::storage::RemoteSite;
use anyhow::{Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, trace, warn};

/// 同步报告
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub run_id: String,
    pub start_time: i64,
    pub end_time: i64,
    pub summary: ActionSummary,
    pub actions_completed: usize,
    pub bytes_transferred: u64,
    /// 结束后是否自动整理了清单
    pub preened: bool,
    pub duration_ms: u64,
}

/// 分析结果：回放后的远程清单和要执行的动作
#[derive(Debug, Clone)]
pub struct SyncPlan {
    pub listing: RemoteListing,
    pub actions: Vec<SyncAction>,
    pub summary: ActionSummary,
}

impl SyncPlan {
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

/// 清单与实际远程站点的差异
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckReport {
    /// 清单中有但远程没有
    pub missing_remote: Vec<String>,
    /// 远程有但清单中没有
    pub unexpected_remote: Vec<String>,
    /// 一边是文件一边是目录
    pub kind_mismatch: Vec<String>,
    pub size_mismatch: Vec<String>,
}

impl CheckReport {
    pub fn is_clean(&self) -> bool {
        self.missing_remote.is_empty()
            && self.unexpected_remote.is_empty()
            && self.kind_mismatch.is_empty()
            && self.size_mismatch.is_empty()
    }
}

/// 同步引擎
pub struct SyncEngine {
    settings: SyncSettings,
    hasher: Box<dyn ContentHasher + Send + Sync>,
}

impl SyncEngine {
    pub fn new(settings: SyncSettings) -> Self {
        Self::with_hasher(settings, Box::new(Blake3Hasher))
    }

    pub fn with_hasher(settings: SyncSettings, hasher: Box<dyn ContentHasher + Send + Sync>) -> Self {
        Self { settings, hasher }
    }

    /// 本地根目录内需要跳过的路径（清单文件和整理时的临时文件）
    fn listing_skip_paths(listing_path: &Path, local_root: &Path) -> Vec<String> {
        let absolute = |p: &Path| -> PathBuf {
            match (p.parent(), p.file_name()) {
                (Some(parent), Some(name)) if !parent.as_os_str().is_empty() => parent
                    .canonicalize()
                    .map(|dir| dir.join(name))
                    .unwrap_or_else(|_| p.to_path_buf()),
                _ => std::env::current_dir()
                    .map(|dir| dir.join(p))
                    .unwrap_or_else(|_| p.to_path_buf()),
            }
        };
        let root = local_root
            .canonicalize()
            .unwrap_or_else(|_| local_root.to_path_buf());
        let listing = absolute(listing_path);

        match listing.strip_prefix(&root).ok().and_then(|rel| rel.to_str()) {
            Some(rel) if !rel.is_empty() => {
                let rel = rel.replace('\\', "/");
                vec![format!("{}.tmp", rel), rel]
            }
            _ => Vec::new(),
        }
    }

    fn scan_local(&self, listing_path: &Path, local_root: &Path) -> Result<Tree> {
        let config = ScanConfig {
            rules_file: Some(self.settings.rules_file.clone()),
            skip_paths: Self::listing_skip_paths(listing_path, local_root),
        };
        let global = RuleSet::parse(&self.settings.global_rules);
        FileScanner::with_filter(config, Box::new(global)).scan(local_root)
    }

    pub fn load_listing(listing_path: &Path) -> Result<RemoteListing> {
        let store = ListingStore::new(listing_path);
        if !store.exists() {
            anyhow::bail!(
                "清单文件不存在: {:?}（请先运行 inventory 建立清单）",
                listing_path
            );
        }
        Ok(store.load()?)
    }

    /// 试运行：回放清单、扫描本地、对比并生成动作，不访问网络
    pub fn analyze(&self, listing_path: &Path, local_root: &Path) -> Result<SyncPlan> {
        info!("开始分析: 本地 {:?}, 清单 {:?}", local_root, listing_path);

        let listing = Self::load_listing(listing_path)?;
        let mut local = self.scan_local(listing_path, local_root)?;

        let reconciliation = reconcile(
            &listing.tree,
            &mut local,
            local_root,
            self.hasher.as_ref(),
            &self.settings.reconcile_options(),
        )?;
        let actions = build_plan(&listing.tree, &local, &reconciliation);
        let summary = summarize(&actions);

        info!(
            "分析完成: {} 个本地条目, {} 个动作, 需传输 {} 字节",
            local.len(),
            summary.total_actions(),
            summary.total_transfer_bytes()
        );
        Ok(SyncPlan {
            listing,
            actions,
            summary,
        })
    }

    /// 完整同步
    pub async fn run(
        &self,
        listing_path: &Path,
        local_root: &Path,
        site: &mut dyn RemoteSite,
    ) -> Result<SyncReport> {
        let plan = self.analyze(listing_path, local_root)?;
        self.execute(plan, listing_path, local_root, site).await
    }

    /// 按顺序执行动作；每个成功的远程操作立即写入清单
    pub async fn execute(
        &self,
        plan: SyncPlan,
        listing_path: &Path,
        local_root: &Path,
        site: &mut dyn RemoteSite,
    ) -> Result<SyncReport> {
        let run_id = uuid::Uuid::new_v4().to_string();
        let start_time = chrono::Utc::now().timestamp();
        let started = Instant::now();
        let SyncPlan {
            mut listing,
            actions,
            summary,
            ..
        } = plan;

        info!(
            "[{}] 开始同步到 {}: {} 个动作",
            run_id,
            site.name(),
            actions.len()
        );

        let store = ListingStore::new(listing_path);
        let mut journal = store.journal()?;
        let mut completed = 0usize;
        let mut bytes_transferred = 0u64;

        for (index, action) in actions.iter().enumerate() {
            debug!("[{}/{}] {:?}", index + 1, actions.len(), action);
            let (records, bytes) = self
                .perform(action, local_root, site)
                .await
                .with_context(|| format!("[{}] {}", run_id, describe(action)))?;

            // 远程操作已经成功，先落盘再更新内存中的清单
            journal.append(&records)?;
            for record in &records {
                listing
                    .apply(record)
                    .with_context(|| format!("清单与远程操作不一致: {}", record))?;
            }
            listing.records += records.len();
            completed += 1;
            bytes_transferred += bytes;
        }
        drop(journal);

        let preened = self.settings.auto_preen_ratio > 0
            && needs_compaction(
                listing.records,
                listing.tree.len(),
                self.settings.auto_preen_ratio,
            );
        if preened {
            info!("[{}] 清单记录过多，自动整理", run_id);
            store.compact()?;
        }

        let end_time = chrono::Utc::now().timestamp();
        info!(
            "[{}] 同步完成: {} 个动作, {} 字节",
            run_id, completed, bytes_transferred
        );
        Ok(SyncReport {
            run_id,
            start_time,
            end_time,
            summary,
            actions_completed: completed,
            bytes_transferred,
            preened,
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// 执行一个远程操作，返回要写入清单的记录和传输字节数
    async fn perform(
        &self,
        action: &SyncAction,
        local_root: &Path,
        site: &mut dyn RemoteSite,
    ) -> Result<(Vec<ListingRecord>, u64)> {
        match action {
            SyncAction::DeleteFile { path } => {
                site.delete_file(path).await?;
                Ok((vec![ListingRecord::Delete { path: path.clone() }], 0))
            }
            SyncAction::MakeDir { path } => {
                site.make_dir(path).await?;
                Ok((vec![ListingRecord::Dir { path: path.clone() }], 0))
            }
            SyncAction::Rename { from, to, meta } => {
                site.rename(from, to).await?;
                Ok((
                    vec![
                        ListingRecord::Delete { path: from.clone() },
                        ListingRecord::File {
                            path: to.clone(),
                            meta: meta.clone(),
                        },
                    ],
                    0,
                ))
            }
            SyncAction::Upload { path, meta } | SyncAction::Update { path, meta } => {
                let local_path = local_root.join(path);
                let meta = self.upload_meta(&local_path, meta)?;
                let mut progress = |done: u64, total: u64| trace!("{}: {}/{}", path, done, total);
                let sent = site.upload(&local_path, path, &mut progress).await?;
                if sent != meta.size {
                    warn!(
                        "{} 在扫描后发生了变化（扫描时 {} 字节，上传 {} 字节）",
                        path, meta.size, sent
                    );
                }
                Ok((
                    vec![ListingRecord::File {
                        path: path.clone(),
                        meta: FileMeta { size: sent, ..meta },
                    }],
                    sent,
                ))
            }
            SyncAction::RemoveDir { path } => {
                site.remove_dir(path).await?;
                Ok((vec![ListingRecord::Delete { path: path.clone() }], 0))
            }
        }
    }

    /// 上传前补上摘要，清单里有摘要以后才能检测重命名
    fn upload_meta(&self, local_path: &Path, meta: &FileMeta) -> Result<FileMeta> {
        if meta.digest.is_some() || !self.settings.hash_uploads {
            return Ok(meta.clone());
        }
        let digest = self
            .hasher
            .digest_file(local_path)
            .with_context(|| format!("计算摘要失败: {:?}", local_path))?;
        Ok(meta.clone().with_digest(Some(digest)))
    }

    /// 扫描实际远程站点并写入新的清单
    pub async fn build_inventory(
        &self,
        site: &mut dyn RemoteSite,
        params: RemoteParams,
        listing_path: &Path,
    ) -> Result<RemoteListing> {
        let store = ListingStore::new(listing_path);
        if store.exists() {
            warn!("清单文件已存在，将被覆盖: {:?}", listing_path);
        }

        let tree = scan_remote(site).await?;
        let listing = RemoteListing {
            params,
            records: tree.len(),
            tree,
        };
        store.write_snapshot(&listing)?;
        info!(
            "清单已建立: {:?}, {} 个条目",
            listing_path,
            listing.tree.len()
        );
        Ok(listing)
    }

    /// 比较已加载的清单与实际远程站点
    pub async fn check(&self, site: &mut dyn RemoteSite, listing: &RemoteListing) -> Result<CheckReport> {
        let actual = scan_remote(site).await?;

        let mut report = CheckReport::default();
        compare_dirs(
            &listing.tree,
            &actual,
            listing.tree.root(),
            actual.root(),
            &mut report,
        );

        if report.is_clean() {
            info!("清单与远程站点一致");
        } else {
            warn!(
                "清单与远程站点不一致: 远程缺失 {}, 清单缺失 {}, 类型不同 {}, 大小不同 {}",
                report.missing_remote.len(),
                report.unexpected_remote.len(),
                report.kind_mismatch.len(),
                report.size_mismatch.len()
            );
        }
        Ok(report)
    }

    /// 整理清单
    pub fn preen(&self, listing_path: &Path) -> Result<RemoteListing> {
        let store = ListingStore::new(listing_path);
        if !store.exists() {
            anyhow::bail!("清单文件不存在: {:?}", listing_path);
        }
        Ok(store.compact()?)
    }
}

fn describe(action: &SyncAction) -> String {
    match action {
        SyncAction::DeleteFile { path } => format!("删除文件 {} 失败", path),
        SyncAction::MakeDir { path } => format!("创建目录 {} 失败", path),
        SyncAction::Rename { from, to, .. } => format!("重命名 {} -> {} 失败", from, to),
        SyncAction::Upload { path, .. } => format!("上传 {} 失败", path),
        SyncAction::Update { path, .. } => format!("更新 {} 失败", path),
        SyncAction::RemoveDir { path } => format!("删除目录 {} 失败", path),
    }
}

/// 逐层比较，缺失的目录只报告一次
fn compare_dirs(
    expected: &Tree,
    actual: &Tree,
    expected_dir: EntryId,
    actual_dir: EntryId,
    report: &mut CheckReport,
) {
    for &e in expected[expected_dir].children() {
        let entry = &expected[e];
        let Some(a) = actual.child_named(actual_dir, entry.name()) else {
            report.missing_remote.push(entry.path().to_string());
            continue;
        };
        match (entry.file(), actual[a].file()) {
            (None, None) => compare_dirs(expected, actual, e, a, report),
            (Some(em), Some(am)) => {
                if em.size != am.size {
                    report.size_mismatch.push(entry.path().to_string());
                }
            }
            _ => report.kind_mismatch.push(entry.path().to_string()),
        }
    }

    let expected_path = expected[expected_dir].path();
    for &a in actual[actual_dir].children() {
        let name = actual[a].name();
        if expected.child_named(expected_dir, name).is_none() {
            report
                .unexpected_remote
                .push(join_path(expected_path, name));
        }
    }
}
