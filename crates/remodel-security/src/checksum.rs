use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use anyhow::{Context, Result};
use sha2::{Digest, Sha384};

pub fn sha384_hex(payload: &[u8]) -> String {
    hex::encode(Sha384::digest(payload))
}

pub fn sha384_reader_hex(reader: &mut impl Read) -> Result<String> {
    let mut hasher = Sha384::new();
    let mut buffer = [0_u8; 64 * 1024];
    loop {
        let read = reader
            .read(&mut buffer)
            .context("failed to read payload for SHA-384 digest")?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Compares against a hex digest, ignoring case and surrounding whitespace.
pub fn verify_sha384(payload: &[u8], expected_hex: &str) -> bool {
    sha384_hex(payload).eq_ignore_ascii_case(expected_hex.trim())
}

pub fn verify_sha384_file(path: &Path, expected_hex: &str) -> Result<bool> {
    let file =
        File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut reader = BufReader::new(file);
    let actual = sha384_reader_hex(&mut reader)
        .with_context(|| format!("failed to digest {}", path.display()))?;
    Ok(actual.eq_ignore_ascii_case(expected_hex.trim()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const EMPTY_SHA384: &str = concat!(
        "38b060a751ac96384cd9327eb1b1e36a21fdb71114be0743",
        "4c0cc7bf63f6e1da274edebfe76f65fbd51ad2f14898b95b"
    );
    const ABC_SHA384: &str = concat!(
        "cb00753f45a35e8bb5a03d699ac65007272c32ab0eded163",
        "1a8b605a43ff5bed8086072ba1e7cc2358baeca134c825a7"
    );

    #[test]
    fn sha384_of_known_payloads() {
        assert_eq!(sha384_hex(b""), EMPTY_SHA384);
        assert_eq!(sha384_hex(b"abc"), ABC_SHA384);
    }

    #[test]
    fn verify_sha384_ignores_case() {
        assert!(verify_sha384(b"abc", &ABC_SHA384.to_uppercase()));
        assert!(!verify_sha384(b"abd", ABC_SHA384));
    }

    #[test]
    fn verify_sha384_file_matches_contents() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("pc-kernel_12.snap");
        std::fs::write(&path, b"abc").expect("write");

        assert!(verify_sha384_file(&path, ABC_SHA384).expect("digest"));
        assert!(!verify_sha384_file(&path, EMPTY_SHA384).expect("digest"));
    }

    #[test]
    fn verify_sha384_file_errors_when_missing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = verify_sha384_file(&dir.path().join("absent.snap"), EMPTY_SHA384)
            .expect_err("missing file");
        assert!(err.to_string().contains("failed to open"));
    }
}
