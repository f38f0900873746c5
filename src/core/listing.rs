//! 远程清单文件
//!
//! 清单文件是远程站点最后已知状态的日志。每行一个记录，同一路径以最后一行为准，
//! 所以每次远程操作成功后只需要在文件末尾追加一行。清单会定期整理（preen）
//! 为最简形式。
//!
//! ```text
//! H <hostname>
//! U <username>
//! P <port>
//! R <remote_root>
//! F <size> <mtime-hex> <digest-hex-or-?> <path>
//! D <path>
//! Z <path>
//! ```

use crate::core::digest::Digest;
use crate::core::tree::{split_path, EntryId, FileMeta, Tree, TreeError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const DEFAULT_PORT: u16 = 21;

/// 远程站点参数（来自清单头部）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteParams {
    pub hostname: String,
    pub username: String,
    pub port: u16,
    pub root: Option<String>,
}

impl Default for RemoteParams {
    fn default() -> Self {
        Self {
            hostname: String::new(),
            username: String::new(),
            port: DEFAULT_PORT,
            root: None,
        }
    }
}

/// 清单中的一条记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListingRecord {
    Host(String),
    User(String),
    Port(u16),
    Root(String),
    File { path: String, meta: FileMeta },
    Dir { path: String },
    Delete { path: String },
}

impl fmt::Display for ListingRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListingRecord::Host(h) => write!(f, "H {}", h),
            ListingRecord::User(u) => write!(f, "U {}", u),
            ListingRecord::Port(p) => write!(f, "P {}", p),
            ListingRecord::Root(r) => write!(f, "R {}", r),
            ListingRecord::File { path, meta } => {
                let digest = meta
                    .digest
                    .map(|d| d.to_hex())
                    .unwrap_or_else(|| "?".to_string());
                write!(
                    f,
                    "F {:>8} {:08x} {} {}",
                    meta.size,
                    meta.mtime.max(0),
                    digest,
                    path
                )
            }
            ListingRecord::Dir { path } => write!(f, "D {}", path),
            ListingRecord::Delete { path } => write!(f, "Z {}", path),
        }
    }
}

/// 单行解析失败的原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineIssue {
    /// 未知标记，跳过并警告
    UnknownTag,
    /// 已知标记但字段错误，致命
    Malformed(String),
}

/// 回放一条记录时的引用错误
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApplyError {
    #[error("{path} 的上级目录不存在")]
    MissingParent { path: String },
    #[error("{path} 的上级路径是文件而不是目录")]
    NotADirectory { path: String },
    #[error("{path} 已作为另一种类型存在")]
    KindConflict { path: String },
    #[error("要删除的 {path} 不存在")]
    MissingEntry { path: String },
    #[error("要删除的目录 {path} 非空")]
    DirectoryNotEmpty { path: String },
}

#[derive(Debug, thiserror::Error)]
pub enum ListingError {
    #[error("无法读取清单文件 {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("清单文件第 {line} 行格式错误: {reason}")]
    Malformed { line: usize, reason: String },
    #[error("清单文件第 {line} 行数据不一致: {source}")]
    Replay {
        line: usize,
        #[source]
        source: ApplyError,
    },
    #[error("写入清单文件 {path:?} 失败: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("替换清单文件 {path:?} 失败: {source}")]
    Replace {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// 取出下一个以空白分隔的字段，返回 (字段, 剩余部分)
fn next_field(s: &str) -> Option<(&str, &str)> {
    let s = s.trim_start();
    if s.is_empty() {
        return None;
    }
    match s.find(char::is_whitespace) {
        Some(pos) => Some((&s[..pos], &s[pos..])),
        None => Some((s, "")),
    }
}

fn parse_record_path(rest: &str) -> Result<String, LineIssue> {
    let path = rest.trim_start().trim_start_matches('/');
    if path.is_empty() {
        return Err(LineIssue::Malformed("缺少路径".to_string()));
    }
    if path.split('/').any(|c| c.is_empty() || c == "." || c == "..") {
        return Err(LineIssue::Malformed(format!("非法路径: {}", path)));
    }
    Ok(path.to_string())
}

/// 解析一行；空行返回 `Ok(None)`
pub fn parse_line(line: &str) -> Result<Option<ListingRecord>, LineIssue> {
    let line = line.trim_end();
    if line.is_empty() {
        return Ok(None);
    }

    let mut chars = line.chars();
    let tag = chars.next().unwrap_or(' ');
    let rest = chars.as_str();
    if !rest.is_empty() && !rest.starts_with(char::is_whitespace) {
        return Err(LineIssue::UnknownTag);
    }

    let value = rest.trim();
    let record = match tag {
        'H' => ListingRecord::Host(value.to_string()),
        'U' => ListingRecord::User(value.to_string()),
        'R' => ListingRecord::Root(value.to_string()),
        'P' => ListingRecord::Port(
            value
                .parse()
                .map_err(|_| LineIssue::Malformed(format!("无效端口: {}", value)))?,
        ),
        'F' => {
            let (size, rest) =
                next_field(rest).ok_or_else(|| LineIssue::Malformed("缺少大小".into()))?;
            let (mtime, rest) =
                next_field(rest).ok_or_else(|| LineIssue::Malformed("缺少修改时间".into()))?;
            let (digest, rest) =
                next_field(rest).ok_or_else(|| LineIssue::Malformed("缺少摘要".into()))?;

            let size: u64 = size
                .parse()
                .map_err(|_| LineIssue::Malformed(format!("无效大小: {}", size)))?;
            let mtime = i64::from_str_radix(mtime, 16)
                .map_err(|_| LineIssue::Malformed(format!("无效修改时间: {}", mtime)))?;
            let digest = match digest {
                "?" => None,
                hex => Some(
                    hex.parse::<Digest>()
                        .map_err(|e| LineIssue::Malformed(e.to_string()))?,
                ),
            };

            ListingRecord::File {
                path: parse_record_path(rest)?,
                meta: FileMeta::new(size, mtime).with_digest(digest),
            }
        }
        'D' => ListingRecord::Dir {
            path: parse_record_path(rest)?,
        },
        'Z' => ListingRecord::Delete {
            path: parse_record_path(rest)?,
        },
        _ => return Err(LineIssue::UnknownTag),
    };
    Ok(Some(record))
}

/// 回放得到的远程状态
#[derive(Debug, Clone, Default)]
pub struct RemoteListing {
    pub params: RemoteParams,
    pub tree: Tree,
    /// 读入的记录数（用于判断是否需要整理）
    pub records: usize,
}

impl RemoteListing {
    pub fn new(params: RemoteParams) -> Self {
        Self {
            params,
            tree: Tree::new(),
            records: 0,
        }
    }

    /// 定位路径的父目录，中间缺失或是文件都视为数据损坏
    fn parent_of(&self, path: &str) -> Result<EntryId, ApplyError> {
        let (parent_path, _) = split_path(path);
        let mut current = self.tree.root();
        for component in parent_path.split('/').filter(|c| !c.is_empty()) {
            current = self
                .tree
                .child_named(current, component)
                .ok_or_else(|| ApplyError::MissingParent {
                    path: path.to_string(),
                })?;
            if !self.tree[current].is_dir() {
                return Err(ApplyError::NotADirectory {
                    path: path.to_string(),
                });
            }
        }
        Ok(current)
    }

    /// 回放一条记录。已存在的同类型条目原地更新（最后一行为准）。
    pub fn apply(&mut self, record: &ListingRecord) -> Result<(), ApplyError> {
        match record {
            ListingRecord::Host(h) => self.params.hostname = h.clone(),
            ListingRecord::User(u) => self.params.username = u.clone(),
            ListingRecord::Port(p) => self.params.port = *p,
            ListingRecord::Root(r) => {
                self.params.root = if r.is_empty() { None } else { Some(r.clone()) }
            }
            ListingRecord::File { path, meta } => {
                let parent = self.parent_of(path)?;
                let (_, name) = split_path(path);
                match self.tree.child_named(parent, name) {
                    Some(existing) => {
                        let slot = self.tree.file_mut(existing).ok_or_else(|| {
                            ApplyError::KindConflict { path: path.clone() }
                        })?;
                        *slot = meta.clone();
                    }
                    None => {
                        self.tree
                            .add_file(parent, name, meta.clone())
                            .map_err(|e| tree_error(path, e))?;
                    }
                }
            }
            ListingRecord::Dir { path } => {
                let parent = self.parent_of(path)?;
                let (_, name) = split_path(path);
                match self.tree.child_named(parent, name) {
                    Some(existing) if self.tree[existing].is_dir() => {}
                    Some(_) => return Err(ApplyError::KindConflict { path: path.clone() }),
                    None => {
                        self.tree
                            .add_dir(parent, name)
                            .map_err(|e| tree_error(path, e))?;
                    }
                }
            }
            ListingRecord::Delete { path } => {
                let parent = self.parent_of(path)?;
                let (_, name) = split_path(path);
                let target = self
                    .tree
                    .child_named(parent, name)
                    .ok_or_else(|| ApplyError::MissingEntry { path: path.clone() })?;
                self.tree.remove(target).map_err(|e| tree_error(path, e))?;
            }
        }
        Ok(())
    }

    /// 规范形式：头部 + 每个有效条目一行（目录在子条目之前）
    pub fn canonical_records(&self) -> Vec<ListingRecord> {
        let mut out = Vec::with_capacity(self.tree.len() + 4);
        if !self.params.hostname.is_empty() {
            out.push(ListingRecord::Host(self.params.hostname.clone()));
        }
        if !self.params.username.is_empty() {
            out.push(ListingRecord::User(self.params.username.clone()));
        }
        if self.params.port != DEFAULT_PORT {
            out.push(ListingRecord::Port(self.params.port));
        }
        if let Some(root) = &self.params.root {
            out.push(ListingRecord::Root(root.clone()));
        }
        for id in self.tree.pre_order(self.tree.root()) {
            let entry = &self.tree[id];
            let path = entry.path().to_string();
            out.push(match entry.file() {
                Some(meta) => ListingRecord::File {
                    path,
                    meta: meta.clone(),
                },
                None => ListingRecord::Dir { path },
            });
        }
        out
    }
}

fn tree_error(path: &str, err: TreeError) -> ApplyError {
    match err {
        TreeError::DirectoryNotEmpty { .. } => ApplyError::DirectoryNotEmpty {
            path: path.to_string(),
        },
        TreeError::ParentNotDirectory { .. } => ApplyError::NotADirectory {
            path: path.to_string(),
        },
        TreeError::DuplicateName { .. } | TreeError::RootRemoval => ApplyError::KindConflict {
            path: path.to_string(),
        },
    }
}

/// 是否值得整理：日志记录数超过有效条目（加头部）的 `ratio` 倍。0 表示关闭。
pub fn needs_compaction(records: usize, live_entries: usize, ratio: usize) -> bool {
    ratio > 0 && records > (live_entries + 4) * ratio
}

/// 清单文件管理器
#[derive(Debug, Clone)]
pub struct ListingStore {
    path: PathBuf,
}

impl ListingStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// 从头到尾回放清单文件
    pub fn load(&self) -> Result<RemoteListing, ListingError> {
        let io_err = |source| ListingError::Io {
            path: self.path.clone(),
            source,
        };
        let file = File::open(&self.path).map_err(io_err)?;
        let mut listing = RemoteListing::default();

        for (index, line) in BufReader::new(file).lines().enumerate() {
            let number = index + 1;
            let line = line.map_err(io_err)?;
            let record = match parse_line(&line) {
                Ok(Some(record)) => record,
                Ok(None) => continue,
                Err(LineIssue::UnknownTag) => {
                    warn!("清单文件 {:?} 第 {} 行无法识别，已跳过", self.path, number);
                    continue;
                }
                Err(LineIssue::Malformed(reason)) => {
                    return Err(ListingError::Malformed {
                        line: number,
                        reason,
                    })
                }
            };
            listing
                .apply(&record)
                .map_err(|source| ListingError::Replay {
                    line: number,
                    source,
                })?;
            listing.records += 1;
        }

        debug!(
            "加载清单 {:?}: {} 条记录, {} 个条目",
            self.path,
            listing.records,
            listing.tree.len()
        );
        Ok(listing)
    }

    /// 以追加模式打开，每次运行打开一次
    pub fn journal(&self) -> Result<Journal, ListingError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| ListingError::Io {
                path: self.path.clone(),
                source,
            })?;
        Ok(Journal {
            file,
            path: self.path.clone(),
        })
    }

    /// 整理清单：回放后以规范形式原子替换原文件
    pub fn compact(&self) -> Result<RemoteListing, ListingError> {
        let listing = self.load()?;
        let before = listing.records;
        self.write_snapshot(&listing)?;
        info!(
            "清单已整理: {} 条记录 -> {} 个条目",
            before,
            listing.tree.len()
        );
        Ok(listing)
    }

    /// 写入完整快照：先写临时文件，成功后重命名覆盖原文件
    pub fn write_snapshot(&self, listing: &RemoteListing) -> Result<(), ListingError> {
        let mut tmp_name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        tmp_name.push(".tmp");
        let tmp_path = self.path.with_file_name(tmp_name);

        // 失败时清理临时文件，成功后解除
        let guard = scopeguard::guard(tmp_path.clone(), |p| {
            let _ = fs::remove_file(p);
        });

        let write_err = |source| ListingError::Write {
            path: tmp_path.clone(),
            source,
        };
        let file = File::create(&tmp_path).map_err(write_err)?;
        let mut writer = BufWriter::new(file);
        for record in listing.canonical_records() {
            writeln!(writer, "{}", record).map_err(write_err)?;
        }
        let file = writer
            .into_inner()
            .map_err(|e| write_err(e.into_error()))?;
        file.sync_all().map_err(write_err)?;
        drop(file);

        fs::rename(&tmp_path, &self.path).map_err(|source| ListingError::Replace {
            path: self.path.clone(),
            source,
        })?;
        scopeguard::ScopeGuard::into_inner(guard);
        Ok(())
    }
}

/// 追加日志，每条记录写入后立即 flush
#[derive(Debug)]
pub struct Journal {
    file: File,
    path: PathBuf,
}

impl Journal {
    /// 一条逻辑记录可以包含多行（重命名 = 删除旧路径 + 新增新路径），一次写入
    pub fn append(&mut self, records: &[ListingRecord]) -> Result<(), ListingError> {
        let mut buf = String::new();
        for record in records {
            buf.push_str(&record.to_string());
            buf.push('\n');
        }
        let write_err = |source| ListingError::Write {
            path: self.path.clone(),
            source,
        };
        self.file.write_all(buf.as_bytes()).map_err(write_err)?;
        self.file.flush().map_err(write_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::digest::hash_bytes;

    fn write_listing(dir: &tempfile::TempDir, body: &str) -> ListingStore {
        let path = dir.path().join("listing");
        let mut f = File::create(&path).unwrap();
        f.write_all(body.as_bytes()).unwrap();
        ListingStore::new(path)
    }

    #[test]
    fn test_parse_file_line() {
        let d = hash_bytes(b"abc");
        let line = format!("F      100 000003e8 {} dir/with space.txt  \n", d.to_hex());
        let record = parse_line(&line).unwrap().unwrap();
        assert_eq!(
            record,
            ListingRecord::File {
                path: "dir/with space.txt".into(),
                meta: FileMeta::new(100, 1000).with_digest(Some(d)),
            }
        );
        assert_eq!(parse_line(&record.to_string()).unwrap().unwrap(), record);
    }

    #[test]
    fn test_parse_issues() {
        assert_eq!(parse_line("   ").unwrap(), None);
        assert_eq!(parse_line("X foo"), Err(LineIssue::UnknownTag));
        assert_eq!(parse_line("Foo bar"), Err(LineIssue::UnknownTag));
        assert!(matches!(parse_line("F abc 0 ? x"), Err(LineIssue::Malformed(_))));
        assert!(matches!(parse_line("F 1 zz ? x"), Err(LineIssue::Malformed(_))));
        assert!(matches!(parse_line("D"), Err(LineIssue::Malformed(_))));
        assert!(matches!(parse_line("Z a/../b"), Err(LineIssue::Malformed(_))));
    }

    #[test]
    fn test_last_line_wins() {
        let dir = tempfile::tempdir().unwrap();
        let store = write_listing(
            &dir,
            "H example.org\nU bob\nF 10 0 ? a.txt\nF 20 10 ? a.txt\nF 30 1f ? a.txt\n",
        );
        let listing = store.load().unwrap();
        let a = listing.tree.lookup("a.txt").unwrap();
        let meta = listing.tree[a].file().unwrap();
        assert_eq!((meta.size, meta.mtime), (30, 0x1f));
        assert_eq!(listing.tree.len(), 1);
        assert_eq!(listing.params.hostname, "example.org");
        assert_eq!(listing.params.username, "bob");
        assert_eq!(listing.records, 5);
    }

    #[test]
    fn test_delete_missing_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = write_listing(&dir, "F 1 0 ? a\nZ b\n");
        let err = store.load().unwrap_err();
        assert!(matches!(
            err,
            ListingError::Replay {
                line: 2,
                source: ApplyError::MissingEntry { .. }
            }
        ));
    }

    #[test]
    fn test_delete_non_empty_dir_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = write_listing(&dir, "D d\nF 1 0 ? d/x\nZ d\n");
        assert!(matches!(
            store.load().unwrap_err(),
            ListingError::Replay {
                source: ApplyError::DirectoryNotEmpty { .. },
                ..
            }
        ));

        let store = write_listing(&dir, "D d\nF 1 0 ? d/x\nZ d/x\nZ d\n");
        assert!(store.load().unwrap().tree.is_empty());
    }

    #[test]
    fn test_missing_parent_and_kind_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let store = write_listing(&dir, "F 1 0 ? nope/x\n");
        assert!(matches!(
            store.load().unwrap_err(),
            ListingError::Replay {
                source: ApplyError::MissingParent { .. },
                ..
            }
        ));

        let store = write_listing(&dir, "F 1 0 ? f\nF 1 0 ? f/x\n");
        assert!(matches!(
            store.load().unwrap_err(),
            ListingError::Replay {
                source: ApplyError::NotADirectory { .. },
                ..
            }
        ));

        let store = write_listing(&dir, "D f\nF 1 0 ? f\n");
        assert!(matches!(
            store.load().unwrap_err(),
            ListingError::Replay {
                source: ApplyError::KindConflict { .. },
                ..
            }
        ));
    }

    #[test]
    fn test_unknown_tag_skipped_malformed_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let store = write_listing(&dir, "# comment\nF 1 0 ? a\n");
        assert_eq!(store.load().unwrap().tree.len(), 1);

        let store = write_listing(&dir, "F 1 0 ? a\nF x 0 ? b\n");
        assert!(matches!(
            store.load().unwrap_err(),
            ListingError::Malformed { line: 2, .. }
        ));
    }

    #[test]
    fn test_journal_then_compact() {
        let dir = tempfile::tempdir().unwrap();
        let store = write_listing(&dir, "H host\nU me\nP 2121\nR /htdocs\n");
        {
            let mut journal = store.journal().unwrap();
            journal
                .append(&[ListingRecord::Dir { path: "d".into() }])
                .unwrap();
            journal
                .append(&[ListingRecord::File {
                    path: "d/a".into(),
                    meta: FileMeta::new(5, 0x10),
                }])
                .unwrap();
            journal
                .append(&[
                    ListingRecord::Delete { path: "d/a".into() },
                    ListingRecord::File {
                        path: "d/b".into(),
                        meta: FileMeta::new(5, 0x10),
                    },
                ])
                .unwrap();
        }

        let listing = store.compact().unwrap();
        assert_eq!(listing.params.port, 2121);

        let text = fs::read_to_string(store.path()).unwrap();
        assert_eq!(
            text,
            "H host\nU me\nP 2121\nR /htdocs\nD d\nF        5 00000010 ? d/b\n"
        );
        assert!(!dir.path().join("listing.tmp").exists());

        let reloaded = store.load().unwrap();
        assert_eq!(reloaded.records, 6);
        assert!(reloaded.tree.lookup("d/a").is_none());
    }

    #[test]
    fn test_failed_replace_keeps_original() {
        // 目标是非空目录，重命名必然失败
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("listing");
        fs::create_dir(&target).unwrap();
        fs::write(target.join("keep"), "original").unwrap();

        let store = ListingStore::new(&target);
        let mut listing = RemoteListing::new(RemoteParams {
            hostname: "host".into(),
            ..Default::default()
        });
        listing
            .apply(&ListingRecord::Dir { path: "d".into() })
            .unwrap();

        assert!(matches!(
            store.write_snapshot(&listing),
            Err(ListingError::Replace { .. })
        ));
        assert!(!dir.path().join("listing.tmp").exists());
        assert_eq!(fs::read_to_string(target.join("keep")).unwrap(), "original");
    }

    #[test]
    fn test_needs_compaction() {
        assert!(!needs_compaction(10, 10, 2));
        assert!(needs_compaction(100, 10, 2));
        assert!(!needs_compaction(100, 10, 0));
    }
}
