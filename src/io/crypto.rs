use crate::error::Result;
use sha2::{Digest, Sha256};
use std::{fs::File, io::Read, path::Path};

pub fn sha256_file(path: &Path) -> Result<String> {
    let mut f = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = f.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// `Ok(false)` on mismatch, `Err` when the file cannot be read.
pub fn verify_sha256(path: &Path, expected_hex: &str) -> Result<bool> {
    // Reject malformed digests instead of comparing against garbage.
    hex::decode(expected_hex)?;
    let got = sha256_file(path)?;
    Ok(got.eq_ignore_ascii_case(expected_hex))
}
