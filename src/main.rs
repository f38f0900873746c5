use anyhow::Result;
use clap::{Parser, Subcommand};
use ftpsync_lib::commands::inventory::{build_inventory, InventoryArgs};
use ftpsync_lib::commands::{listing, sync, CommandContext};
use ftpsync_lib::logging::{get_log_dir, LogConfig, SizeRotatingWriter};
use ftpsync_lib::SyncSettings;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::prelude::*;

/// 通过 FTP 把本地目录同步到远程站点，远程状态记录在本地清单文件中
#[derive(Parser)]
#[command(name = "ftpsync", version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// 清单文件路径（默认在本地目录下）
    #[arg(short, long)]
    listing: Option<PathBuf>,

    /// 提高日志级别，可重复
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// FTP 密码，不给出时提示输入
    #[arg(short, long)]
    password: Option<String>,

    /// 本地目录
    #[arg(short = 'C', long = "directory", default_value = ".")]
    local_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 扫描远程站点，建立初始清单
    Inventory {
        host: String,
        #[arg(short, long)]
        user: String,
        #[arg(long)]
        port: Option<u16>,
        /// 远程根目录
        #[arg(short, long)]
        root: Option<String>,
        /// 使用主动模式
        #[arg(long)]
        active: bool,
    },
    /// 试运行，只输出将要执行的动作
    Diff,
    /// 同步到远程站点
    Sync {
        #[arg(long)]
        active: bool,
        /// 把另一个本地目录当作远程站点
        #[arg(long)]
        local_target: Option<PathBuf>,
    },
    /// 整理清单
    Preen,
    /// 比较清单和远程站点
    Check {
        #[arg(long)]
        active: bool,
    },
}

/// 初始化日志系统
fn init_logging(verbosity: u8) {
    let log_dir = get_log_dir();
    let config = LogConfig::load(&log_dir);
    let level = config.effective_level(verbosity);

    let env_filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false);

    let file_layer = if config.enabled {
        SizeRotatingWriter::new(&log_dir, config.max_size_mb)
            .ok()
            .map(|writer| {
                tracing_subscriber::fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_target(false)
            })
    } else {
        None
    };

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer);
    let _ = tracing::subscriber::set_global_default(subscriber);
}

async fn run(cli: Cli) -> Result<()> {
    let settings = SyncSettings::load(&ftpsync_lib::app_config_dir());
    let ctx = CommandContext::new(settings, cli.local_dir, cli.listing, cli.password);

    match cli.command {
        Commands::Inventory {
            host,
            user,
            port,
            root,
            active,
        } => {
            let args = InventoryArgs {
                host,
                user,
                port,
                root,
                active,
            };
            let count = build_inventory(&ctx, &args).await?;
            println!("清单已写入 {:?}（{} 个条目）", ctx.listing_path, count);
        }
        Commands::Diff => {
            print!("{}", sync::diff(&ctx)?);
        }
        Commands::Sync {
            active,
            local_target,
        } => match sync::sync(&ctx, active, local_target).await? {
            Some(report) => println!(
                "同步完成: {} 个动作, 传输 {} 字节, 用时 {} ms",
                report.actions_completed, report.bytes_transferred, report.duration_ms
            ),
            None => println!("远程站点已是最新"),
        },
        Commands::Preen => {
            let count = listing::preen(&ctx)?;
            println!("清单已整理（{} 个条目）", count);
        }
        Commands::Check { active } => {
            let report = listing::check(&ctx, active).await?;
            print!("{}", listing::render_check(&report));
            if !report.is_clean() {
                anyhow::bail!("清单与远程站点不一致");
            }
        }
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
