//! 内容摘要 - 用于重命名检测

use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::str::FromStr;

/// 摘要长度（字节）
pub const DIGEST_LEN: usize = 16;

/// 固定长度的内容摘要
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest([u8; DIGEST_LEN]);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("无效的摘要: {0}")]
pub struct DigestParseError(pub String);

impl Digest {
    /// 32 个小写十六进制字符
    pub fn to_hex(&self) -> String {
        let mut out = String::with_capacity(DIGEST_LEN * 2);
        for b in self.0 {
            out.push_str(&format!("{:02x}", b));
        }
        out
    }
}

impl FromStr for Digest {
    type Err = DigestParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != DIGEST_LEN * 2 || !s.is_ascii() {
            return Err(DigestParseError(s.to_string()));
        }
        let mut bytes = [0u8; DIGEST_LEN];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16)
                .map_err(|_| DigestParseError(s.to_string()))?;
        }
        Ok(Self(bytes))
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.to_hex())
    }
}

/// 内容哈希接口
///
/// 实现必须是纯函数：同样的字节流总是得到同样的摘要，可以重复计算。
pub trait ContentHasher {
    fn digest_reader(&self, reader: &mut dyn Read) -> io::Result<Digest>;

    fn digest_file(&self, path: &Path) -> io::Result<Digest> {
        let mut file = File::open(path)?;
        self.digest_reader(&mut file)
    }
}

/// 默认实现：BLAKE3，取前 16 字节
#[derive(Debug, Clone, Copy, Default)]
pub struct Blake3Hasher;

impl ContentHasher for Blake3Hasher {
    fn digest_reader(&self, reader: &mut dyn Read) -> io::Result<Digest> {
        let mut hasher = blake3::Hasher::new();
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let n = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            hasher.update(&buf[..n]);
        }
        Ok(truncate(hasher.finalize()))
    }
}

/// 计算内存数据的摘要
pub fn hash_bytes(data: &[u8]) -> Digest {
    truncate(blake3::hash(data))
}

fn truncate(hash: blake3::Hash) -> Digest {
    let mut bytes = [0u8; DIGEST_LEN];
    bytes.copy_from_slice(&hash.as_bytes()[..DIGEST_LEN]);
    Digest(bytes)
}
