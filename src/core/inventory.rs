use crate::core::tree::{join_path, EntryId, FileMeta, Tree};
use crate::storage::RemoteSite;
use anyhow::{Context, Result};
use tracing::{debug, info};

/// 递归列出远程站点，得到实际的远程文件树
///
/// LIST 不提供可靠的修改时间，所以 mtime 记为 0（未知），摘要也未知。
pub async fn scan_remote(site: &mut dyn RemoteSite) -> Result<Tree> {
    info!("开始扫描远程站点: {}", site.name());

    let mut tree = Tree::new();
    // 显式栈，避免 async 递归
    let mut pending: Vec<EntryId> = vec![tree.root()];
    let mut files = 0usize;

    while let Some(dir) = pending.pop() {
        let path = tree[dir].path().to_string();
        let entries = site.list_dir(&path).await?;
        debug!("/{}: {} 项", path, entries.len());

        let mut subdirs = Vec::new();
        for entry in entries {
            if entry.is_dir {
                let id = tree
                    .add_dir(dir, &entry.name)
                    .with_context(|| format!("远程目录重复: {}", join_path(&path, &entry.name)))?;
                subdirs.push(id);
            } else {
                tree.add_file(dir, &entry.name, FileMeta::new(entry.size, 0))
                    .with_context(|| format!("远程文件重复: {}", join_path(&path, &entry.name)))?;
                files += 1;
            }
        }
        // 反向压栈，按列表顺序处理子目录
        pending.extend(subdirs.into_iter().rev());
    }

    info!(
        "远程扫描完成: {} 个文件, {} 个目录",
        files,
        tree.len() - files
    );
    Ok(tree)
}
