use crate::core::filter::{DirScope, FilterVerdict, NameFilter, NoFilter, RuleSet};
use crate::core::tree::{join_path, EntryId, FileMeta, Tree};
use anyhow::{Context, Result};
use std::path::Path;
use std::time::UNIX_EPOCH;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// 本地扫描配置
#[derive(Debug, Clone, Default)]
pub struct ScanConfig {
    /// 每个目录中的规则文件名（为 None 时不读取）
    pub rules_file: Option<String>,
    /// 始终跳过的相对路径（例如清单文件本身）
    pub skip_paths: Vec<String>,
}

#[derive(Debug, Default, Clone, Copy)]
struct ScanStats {
    files: usize,
    dirs: usize,
    excluded: usize,
}

/// 本地目录扫描器
pub struct FileScanner {
    config: ScanConfig,
    global: Box<dyn NameFilter>,
}

impl FileScanner {
    pub fn new(config: ScanConfig) -> Self {
        Self {
            config,
            global: Box::new(NoFilter),
        }
    }

    /// 使用全局过滤器（在目录规则都不能决定时使用）
    pub fn with_filter(config: ScanConfig, global: Box<dyn NameFilter>) -> Self {
        Self { config, global }
    }

    /// 扫描本地目录并返回文件树
    pub fn scan(&self, root: &Path) -> Result<Tree> {
        info!("开始扫描本地目录: {:?}", root);

        if !root.is_dir() {
            anyhow::bail!("本地目录不存在或不是目录: {:?}", root);
        }

        let mut tree = Tree::new();
        let mut stats = ScanStats::default();
        let scope = DirScope::root(self.load_rules(root)?);
        let tree_root = tree.root();
        self.scan_dir(&mut tree, tree_root, root, &mut Vec::new(), &scope, &mut stats)?;

        info!(
            "扫描完成: {} 个文件, {} 个目录, {} 个被排除",
            stats.files, stats.dirs, stats.excluded
        );
        Ok(tree)
    }

    fn load_rules(&self, dir: &Path) -> Result<Option<RuleSet>> {
        match &self.config.rules_file {
            Some(name) => {
                let path = dir.join(name);
                RuleSet::load(&path).with_context(|| format!("读取规则文件失败: {:?}", path))
            }
            None => Ok(None),
        }
    }

    fn is_excluded(&self, name: &str, chain: &[String], scope: &DirScope<'_>) -> bool {
        if self.config.rules_file.as_deref() == Some(name) {
            return true;
        }
        let rel = join_path(&chain.join("/"), name);
        if self.config.skip_paths.iter().any(|p| *p == rel) {
            return true;
        }

        let verdict = match scope.lookup(name) {
            FilterVerdict::Undecided => {
                let chain: Vec<&str> = chain.iter().map(String::as_str).collect();
                self.global.check(name, &chain)
            }
            verdict => verdict,
        };
        verdict == FilterVerdict::Fail
    }

    fn scan_dir(
        &self,
        tree: &mut Tree,
        dir_id: EntryId,
        dir: &Path,
        chain: &mut Vec<String>,
        scope: &DirScope<'_>,
        stats: &mut ScanStats,
    ) -> Result<()> {
        let walker = WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .follow_links(true)
            .sort_by_file_name();

        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!("无法读取 {:?}: {}", dir, e);
                    continue;
                }
            };

            let Some(name) = entry.file_name().to_str() else {
                warn!("跳过非 UTF-8 文件名: {:?}", entry.path());
                continue;
            };

            if self.is_excluded(name, chain, scope) {
                debug!("排除: {:?}", entry.path());
                stats.excluded += 1;
                continue;
            }

            let metadata = match entry.metadata() {
                Ok(m) => m,
                Err(e) => {
                    warn!("无法获取元数据 {:?}: {}", entry.path(), e);
                    continue;
                }
            };

            if metadata.is_file() {
                let mtime = metadata
                    .modified()
                    .ok()
                    .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                    .map_or(0, |d| d.as_secs() as i64);
                tree.add_file(dir_id, name, FileMeta::new(metadata.len(), mtime))?;
                stats.files += 1;
            } else if metadata.is_dir() {
                if entry.path_is_symlink() {
                    warn!("跳过指向目录的符号链接: {:?}", entry.path());
                    continue;
                }
                let child_id = tree.add_dir(dir_id, name)?;
                stats.dirs += 1;

                let child_scope = scope.child(self.load_rules(entry.path())?);
                chain.push(name.to_string());
                let result =
                    self.scan_dir(tree, child_id, entry.path(), chain, &child_scope, stats);
                chain.pop();
                result?;
            } else {
                warn!("不支持的文件类型，已跳过: {:?}", entry.path());
            }
        }
        Ok(())
    }
}

impl Default for FileScanner {
    fn default() -> Self {
        Self::new(ScanConfig::default())
    }
}
