//! FTP 站点
//!
//! - `control` — 控制连接，命令/回应
//! - `data` — 数据连接（PASV / PORT）
//! - `list` — LIST 输出解析
//! - `error` — 传输层错误

pub mod control;
pub mod data;
pub mod error;
pub mod list;

pub use error::{FtpError, FtpResult};

use super::{Progress, RemoteEntry, RemoteSite, UPLOAD_CHUNK_SIZE};
use anyhow::{Context, Result};
use async_trait::async_trait;
use control::{rejected, ControlChannel, Reply};
use data::DataChannel;
use std::path::Path;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info};

/// FTP 连接参数
#[derive(Debug, Clone)]
pub struct FtpOptions {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// 登录后切换到的目录
    pub root: Option<String>,
    /// 被动模式（否则使用 PORT）
    pub passive: bool,
}

pub struct FtpSite {
    control: ControlChannel,
    passive: bool,
    name: String,
}

impl FtpSite {
    /// 连接并登录
    pub async fn connect(options: &FtpOptions) -> FtpResult<Self> {
        let mut control = ControlChannel::connect(&options.host, options.port).await?;

        let greeting = control.read_reply().await?;
        if !greeting.is_success() {
            return Err(rejected("(greeting)", greeting));
        }

        let reply = control
            .command(&format!("USER {}", options.username))
            .await?;
        let reply = match reply.code {
            230 => reply,
            _ if reply.is_intermediate() => {
                let reply = control
                    .command(&format!("PASS {}", options.password))
                    .await?;
                if !reply.is_success() {
                    return Err(auth_failed(reply));
                }
                reply
            }
            _ => return Err(auth_failed(reply)),
        };
        debug!("登录成功: {} {}", reply.code, reply.text);

        control.expect_success("TYPE I").await?;

        if let Some(root) = options.root.as_deref().filter(|r| !r.is_empty()) {
            control.expect_success(&format!("CWD {}", root)).await?;
        }

        let name = format!("ftp://{}@{}:{}", options.username, options.host, options.port);
        info!("已登录 {}", name);
        Ok(Self {
            control,
            passive: options.passive,
            name,
        })
    }

    /// 发出传输命令，必须得到 1xx
    async fn start_transfer(&mut self, command: &str) -> FtpResult<DataChannel> {
        let data = DataChannel::open(&mut self.control, self.passive).await?;
        let reply = self.control.command(command).await?;
        if !reply.is_preliminary() {
            return Err(rejected(command, reply));
        }
        Ok(data)
    }

    /// 数据连接关闭后读取最终回应
    async fn finish_transfer(&mut self, command: &str) -> FtpResult<Reply> {
        let reply = self.control.read_reply().await?;
        if reply.is_success() {
            Ok(reply)
        } else {
            Err(rejected(command, reply))
        }
    }

    pub async fn list(&mut self, path: &str) -> FtpResult<Vec<RemoteEntry>> {
        // 有的服务器不接受 `LIST -a .`，根目录不带参数
        let command = if path.is_empty() || path == "." {
            "LIST -a".to_string()
        } else {
            format!("LIST -a {}", path)
        };

        let data = self.start_transfer(&command).await?;
        let mut stream = data.into_stream().await?;
        let mut raw = Vec::new();
        stream.read_to_end(&mut raw).await?;
        drop(stream);
        self.finish_transfer(&command).await?;

        list::parse_listing(&String::from_utf8_lossy(&raw))
    }

    pub async fn store(
        &mut self,
        local: &Path,
        remote: &str,
        progress: Progress<'_>,
    ) -> FtpResult<u64> {
        let mut file = tokio::fs::File::open(local).await?;
        let total = file.metadata().await?.len();

        let command = format!("STOR {}", remote);
        let data = self.start_transfer(&command).await?;
        let mut stream = data.into_stream().await?;

        let mut buf = vec![0u8; UPLOAD_CHUNK_SIZE];
        let mut sent = 0u64;
        loop {
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            stream.write_all(&buf[..n]).await?;
            sent += n as u64;
            progress(sent, total);
        }
        stream.shutdown().await?;
        drop(stream);

        self.finish_transfer(&command).await?;
        Ok(sent)
    }

    pub async fn rename_path(&mut self, from: &str, to: &str) -> FtpResult<()> {
        let command = format!("RNFR {}", from);
        let reply = self.control.command(&command).await?;
        if !reply.is_intermediate() {
            return Err(rejected(&command, reply));
        }
        self.control.expect_success(&format!("RNTO {}", to)).await?;
        Ok(())
    }

    pub async fn quit(&mut self) -> FtpResult<()> {
        let reply = self.control.command("QUIT").await?;
        debug!("会话结束: {} {}", reply.code, reply.text);
        Ok(())
    }
}

fn auth_failed(reply: Reply) -> FtpError {
    FtpError::Auth {
        code: reply.code,
        text: reply.text,
    }
}

#[async_trait]
impl RemoteSite for FtpSite {
    async fn list_dir(&mut self, path: &str) -> Result<Vec<RemoteEntry>> {
        self.list(path)
            .await
            .with_context(|| format!("列出远程目录失败: /{}", path))
    }

    async fn upload(&mut self, local: &Path, remote: &str, progress: Progress<'_>) -> Result<u64> {
        Ok(self.store(local, remote, progress).await?)
    }

    async fn delete_file(&mut self, path: &str) -> Result<()> {
        self.control.expect_success(&format!("DELE {}", path)).await?;
        Ok(())
    }

    async fn make_dir(&mut self, path: &str) -> Result<()> {
        self.control.expect_success(&format!("MKD {}", path)).await?;
        Ok(())
    }

    async fn remove_dir(&mut self, path: &str) -> Result<()> {
        self.control.expect_success(&format!("RMD {}", path)).await?;
        Ok(())
    }

    async fn rename(&mut self, from: &str, to: &str) -> Result<()> {
        Ok(self.rename_path(from, to).await?)
    }

    async fn close(&mut self) -> Result<()> {
        Ok(self.quit().await?)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::net::{TcpListener, TcpStream};

    const LISTING: &str = "total 2\r\n\
        -rw-r--r--   1 u g   5 Jan 01 2020 a.txt\r\n\
        drwxr-xr-x   2 u g 512 Jan 01 2020 sub\r\n";

    enum Data {
        None,
        Passive(TcpListener),
        Active(SocketAddr),
    }

    impl Data {
        async fn connect(&mut self) -> TcpStream {
            match std::mem::replace(self, Data::None) {
                Data::Passive(listener) => listener.accept().await.unwrap().0,
                Data::Active(addr) => TcpStream::connect(addr).await.unwrap(),
                Data::None => panic!("no data connection prepared"),
            }
        }
    }

    /// 按固定脚本回应的最小 FTP 服务器，返回收到的命令和上传的数据
    async fn fake_server(listener: TcpListener) -> (Vec<String>, Vec<u8>) {
        let (sock, _) = listener.accept().await.unwrap();
        let (read, mut write) = sock.into_split();
        let mut lines = BufReader::new(read).lines();
        write
            .write_all(b"220-Welcome\r\n220 ready\r\n")
            .await
            .unwrap();

        let mut commands = Vec::new();
        let mut stored = Vec::new();
        let mut data = Data::None;

        while let Some(line) = lines.next_line().await.unwrap() {
            commands.push(line.clone());
            let (verb, arg) = line.split_once(' ').unwrap_or((line.as_str(), ""));
            let reply = match verb {
                "USER" => "331 password please".to_string(),
                "PASS" if arg == "secret" => "230 logged in".to_string(),
                "PASS" => "530 login incorrect".to_string(),
                "TYPE" | "PORT" | "CWD" | "RMD" | "RNTO" => {
                    if verb == "PORT" {
                        let addr = data::parse_pasv(arg).unwrap();
                        data = Data::Active(SocketAddr::V4(addr));
                    }
                    "200 ok".to_string()
                }
                "PASV" => {
                    let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
                    let port = l.local_addr().unwrap().port();
                    data = Data::Passive(l);
                    format!(
                        "227 Entering Passive Mode (127,0,0,1,{},{})",
                        port >> 8,
                        port & 0xff
                    )
                }
                "LIST" => {
                    write.write_all(b"150 here it comes\r\n").await.unwrap();
                    let mut s = data.connect().await;
                    s.write_all(LISTING.as_bytes()).await.unwrap();
                    drop(s);
                    "226 done".to_string()
                }
                "STOR" => {
                    write.write_all(b"150 send it\r\n").await.unwrap();
                    let mut s = data.connect().await;
                    s.read_to_end(&mut stored).await.unwrap();
                    "226 stored".to_string()
                }
                "DELE" if arg == "missing" => "550 no such file".to_string(),
                "DELE" => "250 deleted".to_string(),
                "MKD" => format!("257 \"{}\" created", arg),
                "RNFR" => "350 ready for RNTO".to_string(),
                "QUIT" => {
                    write.write_all(b"221 bye\r\n").await.unwrap();
                    break;
                }
                _ => "502 not implemented".to_string(),
            };
            write
                .write_all(format!("{}\r\n", reply).as_bytes())
                .await
                .unwrap();
        }
        (commands, stored)
    }

    type Server = tokio::task::JoinHandle<(Vec<String>, Vec<u8>)>;

    async fn start(passive: bool, password: &str) -> (FtpOptions, Server) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(fake_server(listener));
        let options = FtpOptions {
            host: "127.0.0.1".into(),
            port,
            username: "bob".into(),
            password: password.into(),
            root: Some("/htdocs".into()),
            passive,
        };
        (options, server)
    }

    #[tokio::test]
    async fn test_passive_session() {
        let (options, server) = start(true, "secret").await;
        let mut site = FtpSite::connect(&options).await.unwrap();

        let entries = site.list_dir("").await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "a.txt");
        assert_eq!(entries[0].size, 5);
        assert!(entries[1].is_dir);

        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("f");
        std::fs::write(&local, "hello world").unwrap();
        let mut last = (0, 0);
        let sent = site
            .upload(&local, "sub/f", &mut |done, total| last = (done, total))
            .await
            .unwrap();
        assert_eq!(sent, 11);
        assert_eq!(last, (11, 11));

        site.make_dir("new").await.unwrap();
        site.rename("a.txt", "new/b.txt").await.unwrap();
        site.remove_dir("old").await.unwrap();
        let err = site.delete_file("missing").await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<FtpError>(),
            Some(FtpError::Rejected { code: 550, .. })
        ));
        site.delete_file("sub/f").await.unwrap();
        site.close().await.unwrap();

        let (commands, stored) = server.await.unwrap();
        assert_eq!(stored, b"hello world");
        assert_eq!(
            commands,
            [
                "USER bob",
                "PASS secret",
                "TYPE I",
                "CWD /htdocs",
                "PASV",
                "LIST -a",
                "PASV",
                "STOR sub/f",
                "MKD new",
                "RNFR a.txt",
                "RNTO new/b.txt",
                "RMD old",
                "DELE missing",
                "DELE sub/f",
                "QUIT",
            ]
        );
    }

    #[tokio::test]
    async fn test_active_listing() {
        let (options, server) = start(false, "secret").await;
        let mut site = FtpSite::connect(&options).await.unwrap();
        let entries = site.list_dir("sub").await.unwrap();
        assert_eq!(entries.len(), 2);
        site.close().await.unwrap();

        let (commands, _) = server.await.unwrap();
        assert!(commands[4].starts_with("PORT 127,0,0,1,"));
        assert_eq!(commands[5], "LIST -a sub");
    }

    #[tokio::test]
    async fn test_bad_password() {
        let (options, server) = start(true, "wrong").await;
        let err = FtpSite::connect(&options).await.err().unwrap();
        assert!(matches!(err, FtpError::Auth { code: 530, .. }));
        server.abort();
    }
}
