//! 文件名过滤规则
//!
//! 规则文件每行一条规则：`#` 开头为注释，`!` 开头表示排除，其余为包含；
//! 模式支持 `*` 通配符。同一个规则集中第一条匹配的规则生效。

use regex::Regex;
use std::fs;
use std::io;
use std::path::Path;
use tracing::warn;

/// 过滤结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterVerdict {
    Pass,
    Fail,
    Undecided,
}

/// 文件名过滤接口
pub trait NameFilter {
    /// `dir_chain` 是从根目录到候选文件所在目录的各级名字
    fn check(&self, name: &str, dir_chain: &[&str]) -> FilterVerdict;
}

/// 永远不做决定的过滤器
#[derive(Debug, Clone, Copy, Default)]
pub struct NoFilter;

impl NameFilter for NoFilter {
    fn check(&self, _name: &str, _dir_chain: &[&str]) -> FilterVerdict {
        FilterVerdict::Undecided
    }
}

#[derive(Debug, Clone)]
struct Rule {
    pass: bool,
    pattern: Regex,
}

/// 一组有序规则
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    pub fn parse<S: AsRef<str>>(lines: impl IntoIterator<Item = S>) -> Self {
        let mut rules = Vec::new();
        for line in lines {
            let line = line.as_ref().trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (pass, pattern) = match line.strip_prefix('!') {
                Some(rest) => (false, rest.trim_start()),
                None => (true, line),
            };
            if pattern.is_empty() {
                continue;
            }
            match glob_to_regex(pattern) {
                Ok(re) => rules.push(Rule { pass, pattern: re }),
                Err(e) => warn!("忽略无效的过滤规则 {:?}: {}", line, e),
            }
        }
        Self { rules }
    }

    /// 读取规则文件，文件不存在时返回 None
    pub fn load(path: &Path) -> io::Result<Option<Self>> {
        match fs::read_to_string(path) {
            Ok(content) => Ok(Some(Self::parse(content.lines()))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn lookup(&self, name: &str) -> FilterVerdict {
        self.rules
            .iter()
            .find(|r| r.pattern.is_match(name))
            .map(|r| {
                if r.pass {
                    FilterVerdict::Pass
                } else {
                    FilterVerdict::Fail
                }
            })
            .unwrap_or(FilterVerdict::Undecided)
    }
}

impl NameFilter for RuleSet {
    fn check(&self, name: &str, _dir_chain: &[&str]) -> FilterVerdict {
        self.lookup(name)
    }
}

/// 把 `*` 通配模式转换为锚定的正则
fn glob_to_regex(pattern: &str) -> Result<Regex, regex::Error> {
    let escaped = pattern
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");
    Regex::new(&format!("^{}$", escaped))
}

/// 扫描递归中的一层目录规则，内层先于外层
#[derive(Debug)]
pub struct DirScope<'a> {
    rules: Option<RuleSet>,
    parent: Option<&'a DirScope<'a>>,
}

impl<'a> DirScope<'a> {
    pub fn root(rules: Option<RuleSet>) -> Self {
        Self {
            rules,
            parent: None,
        }
    }

    pub fn child(&'a self, rules: Option<RuleSet>) -> DirScope<'a> {
        DirScope {
            rules,
            parent: Some(self),
        }
    }

    /// 由内向外查找第一个有结论的规则集
    pub fn lookup(&self, name: &str) -> FilterVerdict {
        let mut scope = Some(self);
        while let Some(s) = scope {
            if let Some(rules) = &s.rules {
                match rules.lookup(name) {
                    FilterVerdict::Undecided => {}
                    verdict => return verdict,
                }
            }
            scope = s.parent;
        }
        FilterVerdict::Undecided
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_match_wins() {
        let rules = RuleSet::parse(["# comment", "keep.tmp", "!*.tmp", "!~*", "* "]);
        assert_eq!(rules.lookup("keep.tmp"), FilterVerdict::Pass);
        assert_eq!(rules.lookup("other.tmp"), FilterVerdict::Fail);
        assert_eq!(rules.lookup("~backup"), FilterVerdict::Fail);
        assert_eq!(rules.lookup("index.html"), FilterVerdict::Pass);
    }

    #[test]
    fn test_literal_characters_escaped() {
        let rules = RuleSet::parse(["!a.b", "!x+(y)*"]);
        assert_eq!(rules.lookup("a.b"), FilterVerdict::Fail);
        assert_eq!(rules.lookup("axb"), FilterVerdict::Undecided);
        assert_eq!(rules.lookup("x+(y)z"), FilterVerdict::Fail);
    }

    #[test]
    fn test_scope_falls_back_to_parent() {
        let root = DirScope::root(Some(RuleSet::parse(["!*.log", "!secret"])));
        let child = root.child(Some(RuleSet::parse(["debug.log"])));
        let grandchild = child.child(None);

        assert_eq!(grandchild.lookup("debug.log"), FilterVerdict::Pass);
        assert_eq!(grandchild.lookup("other.log"), FilterVerdict::Fail);
        assert_eq!(grandchild.lookup("secret"), FilterVerdict::Fail);
        assert_eq!(grandchild.lookup("page.html"), FilterVerdict::Undecided);
        assert_eq!(root.lookup("debug.log"), FilterVerdict::Fail);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(RuleSet::load(&dir.path().join("none")).unwrap().is_none());
        std::fs::write(dir.path().join("rules"), "!*.bak\n").unwrap();
        let rules = RuleSet::load(&dir.path().join("rules")).unwrap().unwrap();
        assert_eq!(rules.lookup("x.bak"), FilterVerdict::Fail);
    }
}
