use crate::core::reconcile::{FileClass, Reconciliation};
use crate::core::tree::{EntryId, FileMeta, Tree};
use serde::Serialize;
use std::fmt::Write as _;

/// 同步动作（远程一侧的变更）
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncAction {
    /// 删除只存在于远程的文件
    DeleteFile { path: String },
    /// 创建只存在于本地的目录
    MakeDir { path: String },
    /// 远程已有相同内容，直接改名
    Rename {
        from: String,
        to: String,
        meta: FileMeta,
    },
    /// 上传新文件
    Upload { path: String, meta: FileMeta },
    /// 覆盖内容已变化的文件
    Update { path: String, meta: FileMeta },
    /// 删除只存在于远程的目录（此时已为空）
    RemoveDir { path: String },
}

fn depth(path: &str) -> usize {
    path.matches('/').count()
}

/// 按固定的六个阶段生成动作列表：
/// 删文件、建目录、改名、上传、更新、删目录
pub fn build_plan(remote: &Tree, local: &Tree, rec: &Reconciliation) -> Vec<SyncAction> {
    let remote_all = remote.pre_order(remote.root());
    let local_all = local.pre_order(local.root());

    let remote_unique = |id: &EntryId| rec.remote_class(remote, *id) == FileClass::Unique;
    let local_is = |id: &EntryId, class: FileClass| rec.local_class(local, *id) == class;

    let mut delete_files: Vec<EntryId> = remote_all
        .iter()
        .copied()
        .filter(|id| !remote[*id].is_dir() && remote_unique(id))
        .collect();
    delete_files.sort_by_key(|id| std::cmp::Reverse(depth(remote[*id].path())));

    let mut make_dirs: Vec<EntryId> = local_all
        .iter()
        .copied()
        .filter(|id| local[*id].is_dir() && local_is(id, FileClass::Unique))
        .collect();
    make_dirs.sort_by_key(|id| depth(local[*id].path()));

    let mut remove_dirs: Vec<EntryId> = remote_all
        .iter()
        .copied()
        .filter(|id| remote[*id].is_dir() && remote_unique(id))
        .collect();
    remove_dirs.sort_by_key(|id| std::cmp::Reverse(depth(remote[*id].path())));

    let local_files: Vec<(EntryId, &FileMeta)> = local_all
        .iter()
        .filter_map(|&id| local[id].file().map(|meta| (id, meta)))
        .collect();

    let mut actions = Vec::new();

    actions.extend(delete_files.into_iter().map(|id| SyncAction::DeleteFile {
        path: remote[id].path().to_string(),
    }));

    actions.extend(make_dirs.into_iter().map(|id| SyncAction::MakeDir {
        path: local[id].path().to_string(),
    }));

    for &(id, meta) in &local_files {
        if local_is(&id, FileClass::Renamed) {
            if let Some(source) = rec.local_links(id).content_peer {
                actions.push(SyncAction::Rename {
                    from: remote[source].path().to_string(),
                    to: local[id].path().to_string(),
                    meta: meta.clone(),
                });
            }
        }
    }

    for &(id, meta) in &local_files {
        if local_is(&id, FileClass::Unique) {
            actions.push(SyncAction::Upload {
                path: local[id].path().to_string(),
                meta: meta.clone(),
            });
        }
    }

    for &(id, meta) in &local_files {
        if local_is(&id, FileClass::Stale) {
            actions.push(SyncAction::Update {
                path: local[id].path().to_string(),
                meta: meta.clone(),
            });
        }
    }

    actions.extend(remove_dirs.into_iter().map(|id| SyncAction::RemoveDir {
        path: remote[id].path().to_string(),
    }));

    actions
}

/// 动作统计
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ActionSummary {
    pub delete_count: usize,
    pub mkdir_count: usize,
    pub rename_count: usize,
    pub upload_count: usize,
    pub upload_bytes: u64,
    pub update_count: usize,
    pub update_bytes: u64,
    pub rmdir_count: usize,
}

impl ActionSummary {
    pub fn total_actions(&self) -> usize {
        self.delete_count
            + self.mkdir_count
            + self.rename_count
            + self.upload_count
            + self.update_count
            + self.rmdir_count
    }

    pub fn total_transfer_bytes(&self) -> u64 {
        self.upload_bytes + self.update_bytes
    }
}

/// 统计同步动作
pub fn summarize(actions: &[SyncAction]) -> ActionSummary {
    let mut summary = ActionSummary::default();

    for action in actions {
        match action {
            SyncAction::DeleteFile { .. } => summary.delete_count += 1,
            SyncAction::MakeDir { .. } => summary.mkdir_count += 1,
            SyncAction::Rename { .. } => summary.rename_count += 1,
            SyncAction::Upload { meta, .. } => {
                summary.upload_count += 1;
                summary.upload_bytes += meta.size;
            }
            SyncAction::Update { meta, .. } => {
                summary.update_count += 1;
                summary.update_bytes += meta.size;
            }
            SyncAction::RemoveDir { .. } => summary.rmdir_count += 1,
        }
    }

    summary
}

fn format_mtime(mtime: i64) -> String {
    if mtime == 0 {
        return "-".to_string();
    }
    chrono::DateTime::from_timestamp(mtime, 0)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| format!("{:x}", mtime))
}

/// 试运行报告
pub fn render_report(actions: &[SyncAction]) -> String {
    let mut out = String::new();

    for action in actions {
        // 写入 String 不会失败
        let _ = match action {
            SyncAction::DeleteFile { path } => writeln!(out, "DELETE  {}", path),
            SyncAction::MakeDir { path } => writeln!(out, "MKDIR   {}", path),
            SyncAction::Rename { from, to, .. } => writeln!(out, "RENAME  {} -> {}", from, to),
            SyncAction::Upload { path, meta } => writeln!(
                out,
                "UPLOAD  {} ({} bytes, {})",
                path,
                meta.size,
                format_mtime(meta.mtime)
            ),
            SyncAction::Update { path, meta } => writeln!(
                out,
                "UPDATE  {} ({} bytes, {})",
                path,
                meta.size,
                format_mtime(meta.mtime)
            ),
            SyncAction::RemoveDir { path } => writeln!(out, "RMDIR   {}", path),
        };
    }

    let summary = summarize(actions);
    let _ = writeln!(
        out,
        "共 {} 个动作: 删除 {}, 建目录 {}, 改名 {}, 上传 {} ({} 字节), 更新 {} ({} 字节), 删目录 {}",
        summary.total_actions(),
        summary.delete_count,
        summary.mkdir_count,
        summary.rename_count,
        summary.upload_count,
        summary.upload_bytes,
        summary.update_count,
        summary.update_bytes,
        summary.rmdir_count
    );
    out
}
