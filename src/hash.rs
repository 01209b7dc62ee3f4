use sha2::{Digest, Sha256};
use std::fmt;
use std::io::{self, Read};

/// Incremental SHA256 over streamed content, tracking the byte count
#[derive(Default, Clone)]
pub struct ContentHasher {
    hasher: Sha256,
    size: u64,
}

impl fmt::Debug for ContentHasher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentHasher")
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

impl ContentHasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
        self.size += data.len() as u64;
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Returns `(size, hex digest)`
    pub fn finish(self) -> (u64, String) {
        (self.size, hex::encode(self.hasher.finalize()))
    }
}

/// Compute SHA256 hash of in-memory content
pub fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Hash everything a reader yields; returns `(size, hex digest)`
pub fn hash_reader<R: Read>(mut reader: R) -> io::Result<(u64, String)> {
    let mut hasher = ContentHasher::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finish())
}
