//! 文件树存储
//!
//! 条目保存在一个数组里，通过 `EntryId` 引用。目录只保存子条目的句柄列表，
//! 子条目通过 `parent` 找回父目录。被删除的条目从父目录摘除，槽位不再复用。

use crate::core::digest::Digest;
use std::ops::Index;

/// 条目句柄，只在所属的树内有效
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryId(usize);

impl EntryId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// 文件元数据
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMeta {
    pub size: u64,
    /// 修改时间（秒），0 表示未知
    pub mtime: i64,
    pub digest: Option<Digest>,
}

impl FileMeta {
    pub fn new(size: u64, mtime: i64) -> Self {
        Self {
            size,
            mtime,
            digest: None,
        }
    }

    pub fn with_digest(mut self, digest: Option<Digest>) -> Self {
        self.digest = digest;
        self
    }
}

#[derive(Debug, Clone)]
pub enum EntryKind {
    File(FileMeta),
    Dir { children: Vec<EntryId> },
}

#[derive(Debug, Clone)]
pub struct Entry {
    name: String,
    path: String,
    parent: Option<EntryId>,
    kind: EntryKind,
}

impl Entry {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 从树根开始的完整路径，不带前导 `/`
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn parent(&self) -> Option<EntryId> {
        self.parent
    }

    pub fn kind(&self) -> &EntryKind {
        &self.kind
    }

    pub fn is_dir(&self) -> bool {
        matches!(self.kind, EntryKind::Dir { .. })
    }

    pub fn file(&self) -> Option<&FileMeta> {
        match &self.kind {
            EntryKind::File(meta) => Some(meta),
            EntryKind::Dir { .. } => None,
        }
    }

    pub fn children(&self) -> &[EntryId] {
        match &self.kind {
            EntryKind::Dir { children } => children,
            EntryKind::File(_) => &[],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TreeError {
    #[error("{path}: 已存在同名条目")]
    DuplicateName { path: String },
    #[error("{path}: 父条目不是目录")]
    ParentNotDirectory { path: String },
    #[error("{path}: 目录非空，不能删除")]
    DirectoryNotEmpty { path: String },
    #[error("不能删除根目录")]
    RootRemoval,
}

/// 一侧（本地或远程）的文件树快照
#[derive(Debug, Clone)]
pub struct Tree {
    entries: Vec<Entry>,
    live: usize,
}

impl Default for Tree {
    fn default() -> Self {
        Self::new()
    }
}

impl Tree {
    pub fn new() -> Self {
        Self {
            entries: vec![Entry {
                name: String::new(),
                path: String::new(),
                parent: None,
                kind: EntryKind::Dir {
                    children: Vec::new(),
                },
            }],
            live: 0,
        }
    }

    pub fn root(&self) -> EntryId {
        EntryId(0)
    }

    /// 有效条目数（不含根）
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// 已分配的槽位数（含已删除条目），用于按句柄建立旁路表
    pub fn slot_count(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, id: EntryId) -> Option<&Entry> {
        self.entries.get(id.0)
    }

    /// 在目录中按名字查找（线性扫描，目录通常很小）
    pub fn child_named(&self, dir: EntryId, name: &str) -> Option<EntryId> {
        self[dir]
            .children()
            .iter()
            .copied()
            .find(|&c| self[c].name == name)
    }

    /// 按完整路径查找
    pub fn lookup(&self, path: &str) -> Option<EntryId> {
        let mut current = self.root();
        for component in path.split('/').filter(|c| !c.is_empty()) {
            current = self.child_named(current, component)?;
        }
        Some(current)
    }

    pub fn add_file(
        &mut self,
        parent: EntryId,
        name: &str,
        meta: FileMeta,
    ) -> Result<EntryId, TreeError> {
        self.insert(parent, name, EntryKind::File(meta))
    }

    pub fn add_dir(&mut self, parent: EntryId, name: &str) -> Result<EntryId, TreeError> {
        self.insert(
            parent,
            name,
            EntryKind::Dir {
                children: Vec::new(),
            },
        )
    }

    fn insert(
        &mut self,
        parent: EntryId,
        name: &str,
        kind: EntryKind,
    ) -> Result<EntryId, TreeError> {
        let path = join_path(&self[parent].path, name);
        if !self[parent].is_dir() {
            return Err(TreeError::ParentNotDirectory { path });
        }
        if self.child_named(parent, name).is_some() {
            return Err(TreeError::DuplicateName { path });
        }

        let id = EntryId(self.entries.len());
        self.entries.push(Entry {
            name: name.to_string(),
            path,
            parent: Some(parent),
            kind,
        });
        if let EntryKind::Dir { children } = &mut self.entries[parent.0].kind {
            children.push(id);
        }
        self.live += 1;
        Ok(id)
    }

    /// 原地更新文件元数据，目录返回 None
    pub fn file_mut(&mut self, id: EntryId) -> Option<&mut FileMeta> {
        match &mut self.entries.get_mut(id.0)?.kind {
            EntryKind::File(meta) => Some(meta),
            EntryKind::Dir { .. } => None,
        }
    }

    /// 删除条目；目录必须为空
    pub fn remove(&mut self, id: EntryId) -> Result<(), TreeError> {
        let entry = &self[id];
        let parent = entry.parent.ok_or(TreeError::RootRemoval)?;
        if !entry.children().is_empty() {
            return Err(TreeError::DirectoryNotEmpty {
                path: entry.path.clone(),
            });
        }
        if let EntryKind::Dir { children } = &mut self.entries[parent.0].kind {
            children.retain(|&c| c != id);
        }
        self.entries[id.0].parent = None;
        self.live -= 1;
        Ok(())
    }

    /// 前序遍历 `start` 之下的所有条目（父目录在子条目之前）
    pub fn pre_order(&self, start: EntryId) -> Vec<EntryId> {
        let mut out = Vec::new();
        let mut stack: Vec<EntryId> = self[start].children().iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            out.push(id);
            stack.extend(self[id].children().iter().rev().copied());
        }
        out
    }

    /// 后序遍历（子条目在父目录之前，最深的目录最先）
    pub fn post_order(&self, start: EntryId) -> Vec<EntryId> {
        let mut out = Vec::new();
        for &child in self[start].children() {
            out.extend(self.post_order(child));
            out.push(child);
        }
        out
    }

    /// 所有文件（前序）
    pub fn files(&self) -> impl Iterator<Item = EntryId> + '_ {
        self.pre_order(self.root())
            .into_iter()
            .filter(|&id| !self[id].is_dir())
    }
}

impl Index<EntryId> for Tree {
    type Output = Entry;

    fn index(&self, id: EntryId) -> &Entry {
        &self.entries[id.0]
    }
}

/// 拼接父路径和名字
pub fn join_path(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", parent, name)
    }
}

/// 拆分为 (父路径, 最后一段)
pub fn split_path(path: &str) -> (&str, &str) {
    match path.rsplit_once('/') {
        Some((parent, name)) => (parent, name),
        None => ("", path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Tree {
        let mut tree = Tree::new();
        let a = tree.add_dir(tree.root(), "a").unwrap();
        tree.add_file(a, "x", FileMeta::new(1, 0)).unwrap();
        let b = tree.add_dir(a, "b").unwrap();
        tree.add_file(b, "y", FileMeta::new(2, 0)).unwrap();
        tree.add_file(tree.root(), "top", FileMeta::new(3, 0)).unwrap();
        tree
    }

    #[test]
    fn test_paths_and_lookup() {
        let tree = sample();
        let y = tree.lookup("a/b/y").unwrap();
        assert_eq!(tree[y].path(), "a/b/y");
        assert_eq!(tree[y].name(), "y");
        assert_eq!(tree[tree[y].parent().unwrap()].path(), "a/b");
        assert!(tree.lookup("a/nope").is_none());
        assert_eq!(tree.len(), 5);
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut tree = sample();
        let a = tree.lookup("a").unwrap();
        let err = tree.add_file(a, "x", FileMeta::new(9, 0)).unwrap_err();
        assert_eq!(err, TreeError::DuplicateName { path: "a/x".into() });

        let x = tree.lookup("a/x").unwrap();
        assert!(matches!(
            tree.add_file(x, "z", FileMeta::new(0, 0)),
            Err(TreeError::ParentNotDirectory { .. })
        ));
    }

    #[test]
    fn test_remove_requires_empty_dir() {
        let mut tree = sample();
        let b = tree.lookup("a/b").unwrap();
        assert!(matches!(
            tree.remove(b),
            Err(TreeError::DirectoryNotEmpty { .. })
        ));
        tree.remove(tree.lookup("a/b/y").unwrap()).unwrap();
        tree.remove(b).unwrap();
        assert!(tree.lookup("a/b").is_none());
        assert_eq!(tree.len(), 3);
    }

    #[test]
    fn test_traversal_order() {
        let tree = sample();
        let pre: Vec<_> = tree
            .pre_order(tree.root())
            .into_iter()
            .map(|id| tree[id].path().to_string())
            .collect();
        assert_eq!(pre, ["a", "a/x", "a/b", "a/b/y", "top"]);

        let post: Vec<_> = tree
            .post_order(tree.root())
            .into_iter()
            .map(|id| tree[id].path().to_string())
            .collect();
        assert_eq!(post, ["a/x", "a/b/y", "a/b", "a", "top"]);
    }

    #[test]
    fn test_split_path() {
        assert_eq!(split_path("a/b/c"), ("a/b", "c"));
        assert_eq!(split_path("c"), ("", "c"));
    }
}
