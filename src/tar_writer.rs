//! Minimal streaming ustar writer.
//!
//! Regular files only, with fixed ownership. Names longer than 100 bytes are
//! truncated; there are no long-name extensions.

use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::time::UNIX_EPOCH;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const BLOCK_SIZE: usize = 512;

/// Largest uid or gid the six-digit octal fields hold.
pub const MAX_OCTAL_ID: u32 = 0o777_777;

/// Entries must be smaller than this to fit the eleven-digit size field.
pub const MAX_ENTRY_SIZE: u64 = 8u64.pow(11);

const NAME_LEN: usize = 100;
const OWNER_NAME_LEN: usize = 31;
const CHECKSUM_OFFSET: usize = 148;
const CHECKSUM_LEN: usize = 8;

/// Owner recorded on every entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileOwnership {
    pub uid: u32,
    pub gid: u32,
    pub username: String,
    pub groupname: String,
}

impl Default for FileOwnership {
    fn default() -> Self {
        Self {
            uid: 80,
            gid: 80,
            username: "daitss".to_string(),
            groupname: "daitss".to_string(),
        }
    }
}

pub struct TarWriter<W> {
    inner: W,
    ownership: FileOwnership,
}

impl<W: AsyncWrite + Unpin> TarWriter<W> {
    pub fn new(inner: W, ownership: FileOwnership) -> Self {
        Self { inner, ownership }
    }

    /// Append `source` to the archive under `archive_path`.
    pub async fn write(&mut self, source: &Path, archive_path: &str) -> io::Result<()> {
        let metadata = tokio::fs::metadata(source).await?;
        let size = metadata.len();
        if size >= MAX_ENTRY_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "{} is too large for a ustar entry ({} bytes)",
                    source.display(),
                    size
                ),
            ));
        }
        let mtime = metadata
            .modified()?
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let mode = metadata.permissions().mode();

        let header = self.header(archive_path, mode, size, mtime);
        self.inner.write_all(&header).await?;

        let file = tokio::fs::File::open(source).await?;
        let copied = tokio::io::copy(&mut file.take(size), &mut self.inner).await?;
        if copied != size {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "{} shrank while being archived ({} of {} bytes)",
                    source.display(),
                    copied,
                    size
                ),
            ));
        }

        let remainder = (size % BLOCK_SIZE as u64) as usize;
        if remainder != 0 {
            self.inner
                .write_all(&[0u8; BLOCK_SIZE][..BLOCK_SIZE - remainder])
                .await?;
        }
        Ok(())
    }

    /// Write the end-of-archive marker and shut the stream down.
    pub async fn close(mut self) -> io::Result<W> {
        self.inner.write_all(&[0u8; BLOCK_SIZE * 2]).await?;
        self.inner.flush().await?;
        self.inner.shutdown().await?;
        Ok(self.inner)
    }

    fn header(&self, archive_path: &str, mode: u32, size: u64, mtime: u64) -> [u8; BLOCK_SIZE] {
        let mut block = [0u8; BLOCK_SIZE];

        let name = trim_trailing_slashes(truncate(archive_path.as_bytes(), NAME_LEN));
        put(&mut block, 0, name);
        put(&mut block, 100, format!("{:06o} ", mode & 0o777).as_bytes());
        put(&mut block, 108, format!("{:06o} ", self.ownership.uid).as_bytes());
        put(&mut block, 116, format!("{:06o} ", self.ownership.gid).as_bytes());
        put(&mut block, 124, format!("{:011o} ", size).as_bytes());
        put(&mut block, 136, format!("{:011o} ", mtime).as_bytes());
        block[156] = b'0';
        put(&mut block, 257, b"ustar\0");
        put(&mut block, 263, b"00");
        put(
            &mut block,
            265,
            truncate(self.ownership.username.as_bytes(), OWNER_NAME_LEN),
        );
        put(
            &mut block,
            297,
            truncate(self.ownership.groupname.as_bytes(), OWNER_NAME_LEN),
        );
        put(&mut block, 329, b"000000 \0");
        put(&mut block, 337, b"000000 \0");

        let checksum = header_checksum(&block);
        put(
            &mut block,
            CHECKSUM_OFFSET,
            format!("{:06o}\0 ", checksum).as_bytes(),
        );
        block
    }
}

/// Unsigned byte sum of a header, counting the checksum field as spaces.
pub fn header_checksum(block: &[u8; BLOCK_SIZE]) -> u32 {
    block
        .iter()
        .enumerate()
        .map(|(i, &b)| {
            if (CHECKSUM_OFFSET..CHECKSUM_OFFSET + CHECKSUM_LEN).contains(&i) {
                u32::from(b' ')
            } else {
                u32::from(b)
            }
        })
        .sum()
}

fn put(block: &mut [u8; BLOCK_SIZE], offset: usize, bytes: &[u8]) {
    block[offset..offset + bytes.len()].copy_from_slice(bytes);
}

fn truncate(bytes: &[u8], len: usize) -> &[u8] {
    &bytes[..bytes.len().min(len)]
}

fn trim_trailing_slashes(bytes: &[u8]) -> &[u8] {
    let end = bytes.iter().rposition(|&b| b != b'/').map_or(0, |i| i + 1);
    &bytes[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn field(block: &[u8], offset: usize, len: usize) -> String {
        let raw = &block[offset..offset + len];
        let end = raw.iter().position(|&b| b == 0).unwrap_or(len);
        String::from_utf8_lossy(&raw[..end]).trim().to_string()
    }

    async fn archive(entries: &[(&Path, &str)]) -> Vec<u8> {
        let mut tar = TarWriter::new(Vec::new(), FileOwnership::default());
        for (source, name) in entries {
            tar.write(source, name).await.unwrap();
        }
        tar.close().await.unwrap()
    }

    #[tokio::test]
    async fn test_header_layout() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("a.xsd");
        std::fs::write(&source, b"<schema/>").unwrap();
        std::fs::set_permissions(&source, std::fs::Permissions::from_mode(0o644)).unwrap();

        let bytes = archive(&[(source.as_path(), "FOO/http:/example.org/a.xsd")]).await;
        let header = &bytes[..BLOCK_SIZE];

        assert_eq!(field(header, 0, 100), "FOO/http:/example.org/a.xsd");
        assert_eq!(field(header, 100, 8), "000644");
        assert_eq!(field(header, 108, 8), "000120");
        assert_eq!(field(header, 124, 12), "00000000011");
        assert_eq!(header[156], b'0');
        assert_eq!(&header[257..263], b"ustar\0");
        assert_eq!(&header[263..265], b"00");
        assert_eq!(field(header, 265, 32), "daitss");
        assert_eq!(field(header, 297, 32), "daitss");

        let mut block = [0u8; BLOCK_SIZE];
        block.copy_from_slice(header);
        let stored = u32::from_str_radix(&field(header, 148, 8), 8).unwrap();
        assert_eq!(stored, header_checksum(&block));
    }

    #[tokio::test]
    async fn test_body_is_padded_and_archive_terminated() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("b.xsd");
        let body = vec![b'x'; 700];
        std::fs::write(&source, &body).unwrap();

        let bytes = archive(&[(source.as_path(), "b.xsd")]).await;

        assert_eq!(bytes.len(), BLOCK_SIZE * 3 + BLOCK_SIZE * 2);
        assert_eq!(&bytes[BLOCK_SIZE..BLOCK_SIZE + 700], &body[..]);
        assert!(bytes[BLOCK_SIZE + 700..].iter().all(|&b| b == 0));
    }

    #[tokio::test]
    async fn test_empty_file_has_header_only() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("empty");
        std::fs::write(&source, b"").unwrap();

        let bytes = archive(&[(source.as_path(), "empty")]).await;
        assert_eq!(bytes.len(), BLOCK_SIZE * 3);
    }

    #[tokio::test]
    async fn test_long_names_are_truncated() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("c.xsd");
        std::fs::write(&source, b"c").unwrap();
        let name = format!("{}/tail.xsd", "n".repeat(99));

        let bytes = archive(&[(source.as_path(), name.as_str())]).await;
        assert_eq!(field(&bytes, 0, 100), "n".repeat(99));
    }

    #[tokio::test]
    async fn test_oversized_file_is_rejected() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("huge");
        std::fs::File::create(&source)
            .unwrap()
            .set_len(MAX_ENTRY_SIZE)
            .unwrap();

        let mut tar = TarWriter::new(Vec::new(), FileOwnership::default());
        let error = tar.write(&source, "huge").await.unwrap_err();
        assert_eq!(error.kind(), io::ErrorKind::InvalidInput);

        let bytes = tar.close().await.unwrap();
        assert_eq!(bytes.len(), BLOCK_SIZE * 2);
    }

    #[test]
    fn test_owner_names_are_truncated() {
        let tar = TarWriter::new(
            Vec::new(),
            FileOwnership {
                username: "u".repeat(40),
                ..Default::default()
            },
        );
        let header = tar.header("x", 0o644, 0, 0);
        assert_eq!(field(&header, 265, 32), "u".repeat(31));
    }
}
