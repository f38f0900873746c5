//! 控制连接：发送命令、读取回应

use super::error::{FtpError, FtpResult};
use std::net::SocketAddr;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::debug;

/// 服务器回应
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub code: u16,
    /// 所有行的文本（去掉代码），以换行连接
    pub text: String,
}

impl Reply {
    /// 1xx
    pub fn is_preliminary(&self) -> bool {
        (100..200).contains(&self.code)
    }

    /// 2xx
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }

    /// 3xx
    pub fn is_intermediate(&self) -> bool {
        (300..400).contains(&self.code)
    }
}

/// 解析回应行的开头：返回 (代码, 是否还有后续行, 文本)
pub fn parse_reply_line(line: &str) -> Option<(u16, bool, &str)> {
    let bytes = line.as_bytes();
    if bytes.len() < 3 || !bytes[..3].iter().all(u8::is_ascii_digit) {
        return None;
    }
    let code: u16 = line[..3].parse().ok()?;
    match bytes.get(3) {
        None => Some((code, false, "")),
        Some(b' ') => Some((code, false, &line[4..])),
        Some(b'-') => Some((code, true, &line[4..])),
        Some(_) => None,
    }
}

pub struct ControlChannel {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    local_addr: SocketAddr,
    peer_addr: SocketAddr,
}

impl ControlChannel {
    pub async fn connect(host: &str, port: u16) -> FtpResult<Self> {
        let stream = TcpStream::connect((host, port)).await?;
        let local_addr = stream.local_addr()?;
        let peer_addr = stream.peer_addr()?;
        let (read, write) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(read),
            writer: write,
            local_addr,
            peer_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    async fn read_line(&mut self) -> FtpResult<String> {
        let mut buf = Vec::new();
        let n = self.reader.read_until(b'\n', &mut buf).await?;
        if n == 0 {
            return Err(FtpError::Protocol("控制连接被服务器关闭".to_string()));
        }
        let line = String::from_utf8_lossy(&buf);
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }

    /// 读取一个完整回应，多行回应读到 `NNN ` 结束行为止
    pub async fn read_reply(&mut self) -> FtpResult<Reply> {
        let first = self.read_line().await?;
        let (code, mut more, text) = parse_reply_line(&first)
            .ok_or_else(|| FtpError::Protocol(format!("无法解析的回应: {:?}", first)))?;
        let mut lines = vec![text.to_string()];

        while more {
            let line = self.read_line().await?;
            match parse_reply_line(&line) {
                Some((c, false, text)) if c == code => {
                    lines.push(text.to_string());
                    more = false;
                }
                _ => lines.push(line),
            }
        }

        let reply = Reply {
            code,
            text: lines.join("\n"),
        };
        debug!("<-- {} {}", reply.code, reply.text);
        Ok(reply)
    }

    pub async fn send(&mut self, command: &str) -> FtpResult<()> {
        if command.starts_with("PASS ") {
            debug!("--> PASS ****");
        } else {
            debug!("--> {}", command);
        }
        self.writer
            .write_all(format!("{}\r\n", command).as_bytes())
            .await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// 发送命令并读取回应
    pub async fn command(&mut self, command: &str) -> FtpResult<Reply> {
        self.send(command).await?;
        self.read_reply().await
    }

    /// 发送命令，回应不是 2xx 时返回 `Rejected`
    pub async fn expect_success(&mut self, command: &str) -> FtpResult<Reply> {
        let reply = self.command(command).await?;
        if reply.is_success() {
            Ok(reply)
        } else {
            Err(rejected(command, reply))
        }
    }
}

/// 构造拒绝错误，不把密码写进错误信息
pub fn rejected(command: &str, reply: Reply) -> FtpError {
    let command = if command.starts_with("PASS ") {
        "PASS".to_string()
    } else {
        command.to_string()
    };
    FtpError::Rejected {
        command,
        code: reply.code,
        text: reply.text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn test_parse_reply_line() {
        assert_eq!(parse_reply_line("220 ready"), Some((220, false, "ready")));
        assert_eq!(parse_reply_line("230-hello"), Some((230, true, "hello")));
        assert_eq!(parse_reply_line("200"), Some((200, false, "")));
        assert_eq!(parse_reply_line("  hello"), None);
        assert_eq!(parse_reply_line("22x ok"), None);
        assert_eq!(parse_reply_line("2200 ok"), None);
    }

    #[test]
    fn test_reply_classes() {
        let reply = |code| Reply {
            code,
            text: String::new(),
        };
        assert!(reply(150).is_preliminary());
        assert!(reply(226).is_success());
        assert!(reply(350).is_intermediate());
        assert!(!reply(550).is_success());
    }

    #[tokio::test]
    async fn test_multiline_reply() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            sock.write_all(b"220-Welcome\r\n 220 not the end\r\n220 ready\r\n500 bad\r\n")
                .await
                .unwrap();
        });

        let mut control = ControlChannel::connect("127.0.0.1", port).await.unwrap();
        let reply = control.read_reply().await.unwrap();
        assert_eq!(reply.code, 220);
        assert_eq!(reply.text, "Welcome\n 220 not the end\nready");

        let reply = control.read_reply().await.unwrap();
        assert_eq!(reply.code, 500);
        server.await.unwrap();

        assert!(matches!(
            control.read_reply().await,
            Err(FtpError::Protocol(_))
        ));
    }
}
