use super::{passive_mode, CommandContext};
use crate::core::engine::{CheckReport, SyncEngine};
use anyhow::Result;
use std::fmt::Write as _;

/// 整理清单，返回整理后的有效条目数
pub fn preen(ctx: &CommandContext) -> Result<usize> {
    let listing = ctx.engine().preen(&ctx.listing_path)?;
    Ok(listing.tree.len())
}

/// 比较清单和实际远程站点
pub async fn check(ctx: &CommandContext, active: bool) -> Result<CheckReport> {
    let engine = ctx.engine();
    let listing = SyncEngine::load_listing(&ctx.listing_path)?;
    let passive = passive_mode(&ctx.settings, active);
    let mut site = ctx.connect_ftp(&listing.params, passive).await?;

    let result = engine.check(site.as_mut(), &listing).await;
    let _ = site.close().await;
    result
}

/// 检查结果的文本形式
pub fn render_check(report: &CheckReport) -> String {
    let mut out = String::new();
    let sections = [
        ("清单中有但远程缺失", &report.missing_remote),
        ("远程有但清单中没有", &report.unexpected_remote),
        ("类型不同", &report.kind_mismatch),
        ("大小不同", &report.size_mismatch),
    ];
    for (title, paths) in sections {
        if paths.is_empty() {
            continue;
        }
        let _ = writeln!(out, "{} ({}):", title, paths.len());
        for path in paths {
            let _ = writeln!(out, "  {}", path);
        }
    }
    if out.is_empty() {
        out.push_str("清单与远程站点一致\n");
    }
    out
}
