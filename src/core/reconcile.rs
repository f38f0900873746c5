//! 远程清单与本地树的对比
//!
//! 第一遍按路径配对，第二遍按内容摘要找重命名。结果以旁路表的形式返回，
//! 两棵树本身只会被写入本地文件的摘要缓存。

use crate::core::digest::{ContentHasher, Digest};
use crate::core::tree::{EntryId, FileMeta, Tree};
use std::io;
use std::path::Path;
use tracing::{debug, info};

/// 对比选项
#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    /// 修改时间容差（秒）
    pub time_tolerance_secs: i64,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            time_tolerance_secs: 2,
        }
    }
}

/// 一个条目在另一棵树中的对应关系
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Links {
    /// 同路径的条目
    pub path_peer: Option<EntryId>,
    /// 同内容的条目
    pub content_peer: Option<EntryId>,
}

/// 条目分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileClass {
    /// 只存在于这一侧
    Unique,
    /// 对侧同路径的文件内容不同
    Stale,
    /// 对侧有同内容但不同路径的文件
    Renamed,
    Unchanged,
}

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("{path}: 本地和远程的类型不一致（文件/目录）")]
    KindMismatch { path: String },
    #[error("重命名 {remote} -> {local} 依赖于 {blocker} 的另一个重命名，无法按顺序执行")]
    RenameChain {
        local: String,
        remote: String,
        blocker: String,
    },
    #[error("计算摘要失败 {path}: {source}")]
    Hash {
        path: String,
        #[source]
        source: io::Error,
    },
}

/// 对比结果：两侧各一张按 `EntryId` 索引的旁路表
#[derive(Debug, Clone)]
pub struct Reconciliation {
    remote: Vec<Links>,
    local: Vec<Links>,
}

impl Reconciliation {
    fn new(remote: &Tree, local: &Tree) -> Self {
        Self {
            remote: vec![Links::default(); remote.slot_count()],
            local: vec![Links::default(); local.slot_count()],
        }
    }

    pub fn remote_links(&self, id: EntryId) -> Links {
        self.remote[id.index()]
    }

    pub fn local_links(&self, id: EntryId) -> Links {
        self.local[id.index()]
    }

    pub fn remote_class(&self, remote: &Tree, id: EntryId) -> FileClass {
        classify(&self.remote, &self.local, id, remote[id].is_dir())
    }

    pub fn local_class(&self, local: &Tree, id: EntryId) -> FileClass {
        classify(&self.local, &self.remote, id, local[id].is_dir())
    }

    fn link_path(&mut self, remote: EntryId, local: EntryId) {
        self.remote[remote.index()].path_peer = Some(local);
        self.local[local.index()].path_peer = Some(remote);
    }

    fn link_content(&mut self, remote: EntryId, local: EntryId) {
        self.remote[remote.index()].content_peer = Some(local);
        self.local[local.index()].content_peer = Some(remote);
    }
}

fn classify(own: &[Links], other: &[Links], id: EntryId, is_dir: bool) -> FileClass {
    let links = own[id.index()];
    if is_dir {
        return match links.path_peer {
            Some(_) => FileClass::Unchanged,
            None => FileClass::Unique,
        };
    }
    match (links.content_peer, links.path_peer) {
        (Some(content), Some(path)) if content == path => FileClass::Unchanged,
        (Some(_), _) => FileClass::Renamed,
        (None, None) => FileClass::Unique,
        (None, Some(path)) => match other[path.index()].content_peer {
            Some(_) => FileClass::Unique,
            None => FileClass::Stale,
        },
    }
}

/// 大小相同且修改时间一致（任一侧为 0 视为一致），或两侧摘要都已知且相同
fn same_content(remote: &FileMeta, local: &FileMeta, tolerance: i64) -> bool {
    if let (Some(r), Some(l)) = (remote.digest, local.digest) {
        return r == l;
    }
    remote.size == local.size
        && (remote.mtime == 0
            || local.mtime == 0
            || (remote.mtime - local.mtime).abs() <= tolerance)
}

/// 对比远程清单和本地树
pub fn reconcile(
    remote: &Tree,
    local: &mut Tree,
    local_root: &Path,
    hasher: &dyn ContentHasher,
    options: &ReconcileOptions,
) -> Result<Reconciliation, ReconcileError> {
    let mut result = Reconciliation::new(remote, local);

    match_paths(
        &mut result,
        remote,
        local,
        remote.root(),
        local.root(),
        options.time_tolerance_secs,
    )?;
    let renames = match_contents(&mut result, remote, local, local_root, hasher)?;
    check_chains(&result, remote, local)?;

    info!(
        "对比完成: 远程 {} 个条目, 本地 {} 个条目, 检测到 {} 个重命名",
        remote.len(),
        local.len(),
        renames
    );
    Ok(result)
}

fn match_paths(
    result: &mut Reconciliation,
    remote: &Tree,
    local: &Tree,
    remote_dir: EntryId,
    local_dir: EntryId,
    tolerance: i64,
) -> Result<(), ReconcileError> {
    for &r in remote[remote_dir].children() {
        let Some(l) = local.child_named(local_dir, remote[r].name()) else {
            continue;
        };
        match (remote[r].file(), local[l].file()) {
            (None, None) => {
                result.link_path(r, l);
                match_paths(result, remote, local, r, l, tolerance)?;
            }
            (Some(rm), Some(lm)) => {
                result.link_path(r, l);
                if same_content(rm, lm, tolerance) {
                    result.link_content(r, l);
                }
            }
            _ => {
                return Err(ReconcileError::KindMismatch {
                    path: remote[r].path().to_string(),
                })
            }
        }
    }
    Ok(())
}

/// 按摘要匹配剩余文件，返回新建立的重命名数
fn match_contents(
    result: &mut Reconciliation,
    remote: &Tree,
    local: &mut Tree,
    local_root: &Path,
    hasher: &dyn ContentHasher,
) -> Result<usize, ReconcileError> {
    let mut pool: Vec<(Digest, EntryId)> = remote
        .files()
        .filter(|&id| result.remote_links(id).content_peer.is_none())
        .filter_map(|id| remote[id].file().and_then(|m| m.digest).map(|d| (d, id)))
        .collect();
    pool.sort_by(|a, b| {
        a.0.cmp(&b.0)
            .then_with(|| remote[a.1].path().cmp(remote[b.1].path()))
    });

    let candidates: Vec<EntryId> = local
        .files()
        .filter(|&id| result.local_links(id).content_peer.is_none())
        .collect();

    let mut renames = 0;
    for l in candidates {
        if pool.is_empty() {
            break;
        }
        let digest = local_digest(local, l, local_root, hasher)?;
        let start = pool.partition_point(|(d, _)| *d < digest);
        let end = start + pool[start..].partition_point(|(d, _)| *d == digest);
        if let Some(index) = pick_candidate(result, l, &pool, start, end) {
            let (_, r) = pool.remove(index);
            result.link_content(r, l);
            if result.local_links(l).path_peer != Some(r) {
                debug!("重命名: {} -> {}", remote[r].path(), local[l].path());
                renames += 1;
            }
        }
    }
    Ok(renames)
}

/// 在同摘要的一段 `pool[start..end]` 中选择远程文件：
/// 先选本地文件自己的同路径条目，再选没有同路径本地条目的，最后取路径最小的
fn pick_candidate(
    result: &Reconciliation,
    local: EntryId,
    pool: &[(Digest, EntryId)],
    start: usize,
    end: usize,
) -> Option<usize> {
    if start >= end {
        return None;
    }
    let run = &pool[start..end];
    let own = result.local_links(local).path_peer;
    run.iter()
        .position(|&(_, r)| Some(r) == own)
        .or_else(|| {
            run.iter()
                .position(|&(_, r)| result.remote_links(r).path_peer.is_none())
        })
        .or(Some(0))
        .map(|offset| start + offset)
}

/// 取本地文件摘要，未知时计算并缓存到树中
pub fn local_digest(
    local: &mut Tree,
    id: EntryId,
    local_root: &Path,
    hasher: &dyn ContentHasher,
) -> Result<Digest, ReconcileError> {
    if let Some(digest) = local[id].file().and_then(|m| m.digest) {
        return Ok(digest);
    }
    let path = local[id].path().to_string();
    let digest = hasher
        .digest_file(&local_root.join(&path))
        .map_err(|source| ReconcileError::Hash {
            path: path.clone(),
            source,
        })?;
    if let Some(meta) = local.file_mut(id) {
        meta.digest = Some(digest);
    }
    Ok(digest)
}

/// 一个重命名的源或目标被另一个重命名占用时无法按固定顺序执行
fn check_chains(
    result: &Reconciliation,
    remote: &Tree,
    local: &Tree,
) -> Result<(), ReconcileError> {
    for l in local.files() {
        let links = result.local_links(l);
        let Some(r) = links.content_peer else {
            continue;
        };
        if links.path_peer == Some(r) {
            continue;
        }

        let chain = |blocker: &str| ReconcileError::RenameChain {
            local: local[l].path().to_string(),
            remote: remote[r].path().to_string(),
            blocker: blocker.to_string(),
        };

        if let Some(p) = links.path_peer {
            if matches!(result.remote_links(p).content_peer, Some(q) if q != l) {
                return Err(chain(remote[p].path()));
            }
        }
        if let Some(p) = result.remote_links(r).path_peer {
            if matches!(result.local_links(p).content_peer, Some(q) if q != r) {
                return Err(chain(local[p].path()));
            }
        }
    }
    Ok(())
}
