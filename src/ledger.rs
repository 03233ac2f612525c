// ==============================================================================
// ledger.rs - Per-File Ingestion Ledger
// ==============================================================================
// Description: Content digests and receipts that keep a VCF file from being
//              merged into the additive frequency counts twice
// Created: 2026-10-18
// Modified: 2026-10-18
// Version: 1.0.0
// ==============================================================================
// Frequency merges add counts, so ingesting a file twice doubles them. Every
// ingested file leaves a receipt keyed by the SHA-256 of its bytes, written in
// the same transaction as its frequencies. A receipt means "fully merged";
// an interrupted file leaves neither counts nor a receipt.
// ==============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use uuid::Uuid;

use crate::models::CollectionId;

/// Proof that a file was fully merged into a collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    /// Lowercase hex SHA-256 of the file bytes
    pub digest: String,

    pub file_name: String,
    pub collection_id: CollectionId,
    pub records: u64,
    pub malformed_records: u64,
    pub run_id: Uuid,
    pub ingested_at: DateTime<Utc>,
}

/// SHA-256 of a file, streamed in 8 KiB blocks
pub fn file_digest(path: impl AsRef<Path>) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 8192];

    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_file_digest() {
        let mut temp_file = NamedTempFile::new().unwrap();
        write!(temp_file, "abc").unwrap();
        temp_file.flush().unwrap();

        assert_eq!(
            file_digest(temp_file.path()).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_digest_depends_on_content_only() {
        let mut a = NamedTempFile::new().unwrap();
        let mut b = NamedTempFile::new().unwrap();
        writeln!(a, "chr1\t1000").unwrap();
        writeln!(b, "chr1\t1000").unwrap();

        assert_eq!(file_digest(a.path()).unwrap(), file_digest(b.path()).unwrap());

        writeln!(b, "chr1\t2000").unwrap();
        assert_ne!(file_digest(a.path()).unwrap(), file_digest(b.path()).unwrap());
    }

    #[test]
    fn test_missing_file() {
        assert!(file_digest("/nonexistent/input.vcf").is_err());
    }
}
