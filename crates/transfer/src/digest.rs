use md5::{Digest, Md5};

/// Incremental MD5 over a file's content, fed in arrival order.
#[derive(Clone, Default)]
pub struct FileDigest {
    hasher: Md5,
}

impl FileDigest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    /// Consumes the accumulator and returns the raw 16-byte digest.
    pub fn finalize(self) -> [u8; 16] {
        let mut out = [0u8; 16];
        out.copy_from_slice(&self.hasher.finalize());
        out
    }

    /// Consumes the accumulator and returns the lowercase hex digest.
    pub fn finalize_hex(self) -> String {
        hex::encode(self.finalize())
    }
}

/// Computes the hex MD5 of `data`.
pub fn digest_bytes(data: &[u8]) -> String {
    let mut digest = FileDigest::new();
    digest.update(data);
    digest.finalize_hex()
}
