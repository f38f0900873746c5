use super::{passive_mode, CommandContext};
use crate::core::plan::render_report;
use crate::core::SyncReport;
use crate::storage::{create_site, SiteTarget};
use anyhow::Result;
use std::path::PathBuf;
use tracing::info;

/// 试运行：输出将要执行的动作，不连接远程站点
pub fn diff(ctx: &CommandContext) -> Result<String> {
    let plan = ctx.engine().analyze(&ctx.listing_path, &ctx.local_root)?;
    Ok(render_report(&plan.actions))
}

/// 同步本地目录到远程站点
///
/// 没有需要执行的动作时不建立连接，返回 `None`。
/// `local_target` 给出时把另一个本地目录当作远程站点。
pub async fn sync(
    ctx: &CommandContext,
    active: bool,
    local_target: Option<PathBuf>,
) -> Result<Option<SyncReport>> {
    let engine = ctx.engine();
    let plan = engine.analyze(&ctx.listing_path, &ctx.local_root)?;
    if plan.is_empty() {
        info!("远程站点已是最新，无需同步");
        return Ok(None);
    }

    let mut site = match local_target {
        Some(dir) => create_site(&SiteTarget::Local(dir)).await?,
        None => {
            let passive = passive_mode(&ctx.settings, active);
            ctx.connect_ftp(&plan.listing.params, passive).await?
        }
    };

    let result = engine
        .execute(plan, &ctx.listing_path, &ctx.local_root, site.as_mut())
        .await;
    let _ = site.close().await;
    result.map(Some)
}
