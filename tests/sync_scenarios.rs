use anyhow::Result;
use async_trait::async_trait;
use ftpsync_lib::commands::{sync, CommandContext};
use ftpsync_lib::core::digest::hash_bytes;
use ftpsync_lib::storage::{Progress, RemoteEntry, RemoteSite};
use ftpsync_lib::{SyncEngine, SyncSettings};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, UNIX_EPOCH};
use tempfile::TempDir;

/// 只记录收到的操作，不做任何实际修改
#[derive(Default)]
struct RecordingSite {
    ops: Vec<String>,
    /// 第几个修改操作（从 1 开始）被拒绝
    reject_at: Option<usize>,
    attempts: usize,
}

impl RecordingSite {
    fn rejecting(n: usize) -> Self {
        Self {
            reject_at: Some(n),
            ..Default::default()
        }
    }

    fn attempt(&mut self, op: String) -> Result<()> {
        self.attempts += 1;
        if self.reject_at == Some(self.attempts) {
            anyhow::bail!("550 {} 被拒绝", op);
        }
        self.ops.push(op);
        Ok(())
    }
}

#[async_trait]
impl RemoteSite for RecordingSite {
    async fn list_dir(&mut self, _path: &str) -> Result<Vec<RemoteEntry>> {
        Ok(Vec::new())
    }

    async fn upload(&mut self, local: &Path, remote: &str, progress: Progress<'_>) -> Result<u64> {
        let size = fs::metadata(local)?.len();
        self.attempt(format!("STOR {}", remote))?;
        progress(size, size);
        Ok(size)
    }

    async fn delete_file(&mut self, path: &str) -> Result<()> {
        self.attempt(format!("DELE {}", path))
    }

    async fn make_dir(&mut self, path: &str) -> Result<()> {
        self.attempt(format!("MKD {}", path))
    }

    async fn remove_dir(&mut self, path: &str) -> Result<()> {
        self.attempt(format!("RMD {}", path))
    }

    async fn rename(&mut self, from: &str, to: &str) -> Result<()> {
        self.attempt(format!("RNFR {} RNTO {}", from, to))
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        "recording"
    }
}

struct Fixture {
    _dirs: (TempDir, TempDir),
    local: PathBuf,
    listing: PathBuf,
}

impl Fixture {
    fn new(listing_body: &str) -> Self {
        let local_dir = tempfile::tempdir().unwrap();
        let state_dir = tempfile::tempdir().unwrap();
        let local = local_dir.path().to_path_buf();
        let listing = state_dir.path().join("site.listing");
        fs::write(&listing, format!("H ftp.example.org\nU web\n{}", listing_body)).unwrap();
        Self {
            _dirs: (local_dir, state_dir),
            local,
            listing,
        }
    }

    fn write(&self, rel: &str, content: &[u8]) -> PathBuf {
        let path = self.local.join(rel);
        fs::write(&path, content).unwrap();
        path
    }

    /// 本次运行追加到清单的行
    fn journal_tail(&self, skip: usize) -> Vec<String> {
        fs::read_to_string(&self.listing)
            .unwrap()
            .lines()
            .skip(skip)
            .map(str::to_string)
            .collect()
    }
}

fn engine() -> SyncEngine {
    SyncEngine::new(SyncSettings {
        auto_preen_ratio: 0,
        ..Default::default()
    })
}

#[tokio::test]
async fn test_new_local_file_is_uploaded() {
    let fx = Fixture::new("");
    fx.write("README", b"hi\n");

    let mut site = RecordingSite::default();
    let report = engine().run(&fx.listing, &fx.local, &mut site).await.unwrap();

    assert_eq!(site.ops, vec!["STOR README"]);
    assert_eq!(report.actions_completed, 1);
    assert_eq!(report.bytes_transferred, 3);

    let tail = fx.journal_tail(2);
    assert_eq!(tail.len(), 1);
    assert!(tail[0].starts_with("F        3 "));
    assert!(tail[0].ends_with(&format!("{} README", hash_bytes(b"hi\n").to_hex())));
}

#[tokio::test]
async fn test_missing_local_file_is_deleted() {
    let fx = Fixture::new("F 10 0 ? old.txt\n");

    let mut site = RecordingSite::default();
    engine().run(&fx.listing, &fx.local, &mut site).await.unwrap();

    assert_eq!(site.ops, vec!["DELE old.txt"]);
    assert_eq!(fx.journal_tail(3), vec!["Z old.txt"]);
}

#[tokio::test]
async fn test_unchanged_file_issues_nothing() {
    let fx = Fixture::new("F 100 3e8 ? notes.txt\n");
    let path = fx.write("notes.txt", &[b'n'; 100]);
    fs::File::options()
        .write(true)
        .open(&path)
        .unwrap()
        .set_modified(UNIX_EPOCH + Duration::from_secs(1000))
        .unwrap();

    let engine = engine();
    let plan = engine.analyze(&fx.listing, &fx.local).unwrap();
    assert!(plan.is_empty());

    let mut site = RecordingSite::default();
    let report = engine.run(&fx.listing, &fx.local, &mut site).await.unwrap();
    assert!(site.ops.is_empty());
    assert_eq!(report.actions_completed, 0);
    assert!(fx.journal_tail(3).is_empty());
}

#[tokio::test]
async fn test_moved_file_is_renamed() {
    let digest = hash_bytes(b"hello").to_hex();
    let fx = Fixture::new(&format!("F 5 0 {} a.txt\n", digest));
    fx.write("b.txt", b"hello");

    let mut site = RecordingSite::default();
    engine().run(&fx.listing, &fx.local, &mut site).await.unwrap();

    assert_eq!(site.ops, vec!["RNFR a.txt RNTO b.txt"]);
    let tail = fx.journal_tail(3);
    assert_eq!(tail.len(), 2);
    assert_eq!(tail[0], "Z a.txt");
    assert!(tail[1].ends_with(&format!("{} b.txt", digest)));

    // 清单回放后与本地一致，再次分析没有动作
    let plan = engine().analyze(&fx.listing, &fx.local).unwrap();
    assert!(plan.is_empty());
}

#[tokio::test]
async fn test_failed_operation_stops_run() {
    let fx = Fixture::new("F 10 0 ? old.txt\n");
    fx.write("a.txt", b"aaa");
    fx.write("b.txt", b"bbb");

    // 删除成功，上传 a.txt 被拒绝
    let mut site = RecordingSite::rejecting(2);
    let err = engine()
        .run(&fx.listing, &fx.local, &mut site)
        .await
        .unwrap_err();
    assert!(format!("{:#}", err).contains("a.txt"));

    assert_eq!(site.ops, vec!["DELE old.txt"]);
    assert_eq!(site.attempts, 2);
    assert_eq!(fx.journal_tail(3), vec!["Z old.txt"]);

    // 清单只记录了成功的操作，下一次运行从上传开始
    let plan = engine().analyze(&fx.listing, &fx.local).unwrap();
    assert_eq!(plan.summary.delete_count, 0);
    assert_eq!(plan.summary.upload_count, 2);
}

#[tokio::test]
async fn test_sync_command_with_local_target() {
    let fx = Fixture::new("");
    fs::create_dir(fx.local.join("docs")).unwrap();
    fx.write("docs/guide.txt", b"guide");
    fx.write("index.html", b"<html></html>");
    let target = tempfile::tempdir().unwrap();

    let ctx = CommandContext::new(
        SyncSettings::default(),
        fx.local.clone(),
        Some(fx.listing.clone()),
        None,
    );

    let report = sync::diff(&ctx).unwrap();
    assert!(report.contains("MKDIR"));
    assert!(report.contains("docs/guide.txt"));

    let first = sync::sync(&ctx, false, Some(target.path().to_path_buf()))
        .await
        .unwrap()
        .expect("有动作时应执行同步");
    assert_eq!(first.actions_completed, 3);
    assert_eq!(
        fs::read(target.path().join("docs/guide.txt")).unwrap(),
        b"guide"
    );

    let second = sync::sync(&ctx, false, Some(target.path().to_path_buf()))
        .await
        .unwrap();
    assert!(second.is_none());
}
