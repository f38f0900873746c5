//! LIST 输出解析
//!
//! 支持 Unix `ls -l` 风格（owner/group 列数不固定）和 DOS/IIS 风格。
//! 找不到月份列时按最保守的位置取值：名字是最后一列，大小是倒数第五列。

use super::error::{FtpError, FtpResult};
use crate::storage::RemoteEntry;

const MONTHS: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];

/// Unix 风格最少列数
const MIN_UNIX_FIELDS: usize = 8;

/// 按空白切分，同时记录每一列在行中的起始位置
fn fields_with_offsets(line: &str) -> Vec<(usize, &str)> {
    let mut out = Vec::new();
    let mut start = None;
    for (i, c) in line.char_indices() {
        match (c.is_whitespace(), start) {
            (true, Some(s)) => {
                out.push((s, &line[s..i]));
                start = None;
            }
            (false, None) => start = Some(i),
            _ => {}
        }
    }
    if let Some(s) = start {
        out.push((s, &line[s..]));
    }
    out
}

fn is_month(field: &str) -> bool {
    MONTHS.contains(&field.to_ascii_lowercase().as_str())
}

fn is_day(field: &str) -> bool {
    matches!(field.parse::<u8>(), Ok(1..=31))
}

/// `10:00` 或 `2021`
fn is_time_or_year(field: &str) -> bool {
    match field.split_once(':') {
        Some((h, m)) => h.parse::<u8>().is_ok() && m.parse::<u8>().is_ok(),
        None => field.len() == 4 && field.bytes().all(|b| b.is_ascii_digit()),
    }
}

/// `drwxr-xr-x` -> (九位权限, 是否目录)
fn parse_perms(field: &str) -> (u16, bool) {
    let bytes = field.as_bytes();
    let is_dir = bytes.first() == Some(&b'd');
    let mut perms = 0u16;
    for (i, &b) in bytes.iter().skip(1).take(9).enumerate() {
        if b != b'-' {
            perms |= 1 << (8 - i);
        }
    }
    (perms, is_dir)
}

fn looks_like_dos_date(field: &str) -> bool {
    let parts: Vec<&str> = field.split('-').collect();
    parts.len() == 3
        && parts
            .iter()
            .all(|p| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit()))
}

fn parse_dos(line: &str, fields: &[(usize, &str)]) -> Option<RemoteEntry> {
    if fields.len() < 4 || !looks_like_dos_date(fields[0].1) {
        return None;
    }
    let name = line[fields[3].0..].to_string();
    let (size, is_dir) = match fields[2].1 {
        "<DIR>" => (0, true),
        size => (size.replace(',', "").parse().ok()?, false),
    };
    Some(RemoteEntry {
        name,
        size,
        is_dir,
        perms: if is_dir { 0o755 } else { 0o644 },
    })
}

fn parse_unix(line: &str, fields: &[(usize, &str)]) -> FtpResult<RemoteEntry> {
    let n = fields.len();
    if n < MIN_UNIX_FIELDS {
        return Err(FtpError::Protocol(format!("LIST 行字段不足: {:?}", line)));
    }
    let (perms, is_dir) = parse_perms(fields[0].1);

    // 月份前一列是大小，月份后两列是日期和时间/年份，之后都是名字
    let located = (2..n.saturating_sub(3)).find(|&i| {
        is_month(fields[i].1)
            && fields[i - 1].1.parse::<u64>().is_ok()
            && is_day(fields[i + 1].1)
            && is_time_or_year(fields[i + 2].1)
    });

    let (size_field, mut name) = match located {
        Some(i) => (fields[i - 1].1, &line[fields[i + 3].0..]),
        None => (fields[n - 5].1, fields[n - 1].1),
    };
    let size = size_field
        .parse()
        .map_err(|_| FtpError::Protocol(format!("LIST 行大小无效: {:?}", line)))?;

    if fields[0].1.starts_with('l') {
        if let Some((link, _target)) = name.split_once(" -> ") {
            name = link;
        }
    }

    Ok(RemoteEntry {
        name: name.to_string(),
        size: if is_dir { 0 } else { size },
        is_dir,
        perms,
    })
}

/// 解析一次 LIST 的完整输出
pub fn parse_listing(text: &str) -> FtpResult<Vec<RemoteEntry>> {
    let mut entries = Vec::new();

    for line in text.lines() {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() || line.starts_with("total") {
            continue;
        }
        let fields = fields_with_offsets(line);
        let entry = match parse_dos(line, &fields) {
            Some(entry) => entry,
            None => parse_unix(line, &fields)?,
        };
        if entry.name == "." || entry.name == ".." {
            continue;
        }
        entries.push(entry);
    }

    Ok(entries)
}
