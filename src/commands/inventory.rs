use super::{passive_mode, CommandContext};
use crate::core::listing::{RemoteParams, DEFAULT_PORT};
use anyhow::Result;
use tracing::info;

/// inventory 命令参数
#[derive(Debug, Clone)]
pub struct InventoryArgs {
    pub host: String,
    pub user: String,
    pub port: Option<u16>,
    pub root: Option<String>,
    pub active: bool,
}

impl InventoryArgs {
    pub fn params(&self) -> RemoteParams {
        RemoteParams {
            hostname: self.host.clone(),
            username: self.user.clone(),
            port: self.port.unwrap_or(DEFAULT_PORT),
            root: self.root.clone().filter(|r| !r.is_empty()),
        }
    }
}

/// 扫描远程站点并建立初始清单，返回条目数
pub async fn build_inventory(ctx: &CommandContext, args: &InventoryArgs) -> Result<usize> {
    let params = args.params();
    let passive = passive_mode(&ctx.settings, args.active);
    let mut site = ctx.connect_ftp(&params, passive).await?;

    let result = ctx
        .engine()
        .build_inventory(site.as_mut(), params, &ctx.listing_path)
        .await;
    let _ = site.close().await;

    let listing = result?;
    info!("inventory 完成: {} 个条目", listing.tree.len());
    Ok(listing.tree.len())
}
