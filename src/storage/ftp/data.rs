//! 数据连接：被动模式（PASV）和主动模式（PORT）

use super::control::{rejected, ControlChannel};
use super::error::{FtpError, FtpResult};
use regex::Regex;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::OnceLock;
use tokio::net::{TcpListener, TcpStream};
use tracing::debug;

fn host_port_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(\d{1,3}),(\d{1,3}),(\d{1,3}),(\d{1,3}),(\d{1,3}),(\d{1,3})").unwrap()
    })
}

/// 从 227 回应中解析 `h1,h2,h3,h4,p1,p2`
pub fn parse_pasv(text: &str) -> FtpResult<SocketAddrV4> {
    let caps = host_port_regex()
        .captures(text)
        .ok_or_else(|| FtpError::Protocol(format!("无法解析 PASV 回应: {}", text)))?;
    let mut nums = [0u8; 6];
    for (i, n) in nums.iter_mut().enumerate() {
        *n = caps[i + 1]
            .parse()
            .map_err(|_| FtpError::Protocol(format!("PASV 地址超出范围: {}", text)))?;
    }
    let ip = Ipv4Addr::new(nums[0], nums[1], nums[2], nums[3]);
    let port = u16::from(nums[4]) << 8 | u16::from(nums[5]);
    Ok(SocketAddrV4::new(ip, port))
}

/// 生成 PORT 命令
pub fn format_port(addr: SocketAddrV4) -> String {
    let [a, b, c, d] = addr.ip().octets();
    let port = addr.port();
    format!("PORT {},{},{},{},{},{}", a, b, c, d, port >> 8, port & 0xff)
}

/// 在发出传输命令之前建立好的数据连接
pub enum DataChannel {
    /// 被动模式：已连接到服务器
    Connected(TcpStream),
    /// 主动模式：等待服务器连入
    Listening(TcpListener),
}

impl DataChannel {
    /// 准备数据连接。被动模式立即连接，主动模式先监听并发送 PORT。
    pub async fn open(control: &mut ControlChannel, passive: bool) -> FtpResult<Self> {
        if passive {
            let reply = control.command("PASV").await?;
            if reply.code != 227 {
                return Err(rejected("PASV", reply));
            }
            let mut addr = parse_pasv(&reply.text)?;
            // 有的服务器回应 0.0.0.0，此时使用控制连接的地址
            if addr.ip().is_unspecified() {
                if let IpAddr::V4(ip) = control.peer_addr().ip() {
                    addr.set_ip(ip);
                }
            }
            debug!("被动模式数据连接: {}", addr);
            let stream = TcpStream::connect(SocketAddr::V4(addr)).await?;
            Ok(DataChannel::Connected(stream))
        } else {
            let ip = match control.local_addr().ip() {
                IpAddr::V4(ip) => ip,
                IpAddr::V6(_) => {
                    return Err(FtpError::Protocol(
                        "主动模式只支持 IPv4 控制连接".to_string(),
                    ))
                }
            };
            let listener = TcpListener::bind(SocketAddrV4::new(ip, 0)).await?;
            let addr = match listener.local_addr()? {
                SocketAddr::V4(addr) => addr,
                SocketAddr::V6(addr) => {
                    return Err(FtpError::Protocol(format!("监听地址不是 IPv4: {}", addr)))
                }
            };
            let command = format_port(addr);
            control.expect_success(&command).await?;
            debug!("主动模式数据连接监听: {}", addr);
            Ok(DataChannel::Listening(listener))
        }
    }

    /// 传输命令得到 1xx 之后取得数据流
    pub async fn into_stream(self) -> FtpResult<TcpStream> {
        match self {
            DataChannel::Connected(stream) => Ok(stream),
            DataChannel::Listening(listener) => {
                let (stream, peer) = listener.accept().await?;
                debug!("服务器已连入数据端口: {}", peer);
                Ok(stream)
            }
        }
    }
}
