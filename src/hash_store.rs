//! Known-malicious SHA-256 set.
//!
//! Loaded once at startup from a CSV feed (MalwareBazaar style dumps) and
//! read-only afterwards, so it can be shared behind an `Arc` without locking.

use crate::error::FeedError;
use crate::types::is_sha256_hex;

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::{debug, info, warn};

/// Hash column names to probe, in order. `_N` names a column by position
/// when the header row does not name it.
pub const HASH_COLUMNS: [&str; 6] = ["sha256_hash", "sha256", "hash", "_1", "_2", "_3"];

pub const TEST_HASHES: [&str; 3] = [
    "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa",
    "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb",
    "cccccccccccccccccccccccccccccccccccccccccccccccccccccccccccccccc",
];

#[derive(Debug, Default, Clone)]
pub struct HashStore {
    hashes: HashSet<String>,
}

impl HashStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Synthetic set used when no feed is available.
    pub fn with_test_hashes() -> Self {
        let mut store = Self::new();
        for hash in TEST_HASHES {
            store.insert(hash);
        }
        store
    }

    /// Parses a feed. The first line is the header; rows whose hash column
    /// does not hold a 64-char hex digest are skipped.
    pub fn load<R: BufRead>(mut reader: R) -> Result<Self, FeedError> {
        let mut buf = Vec::new();

        let header = loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf)? == 0 {
                return Err(FeedError::MissingHeader);
            }
            let line = String::from_utf8_lossy(&buf);
            let line = line.trim();
            if !line.is_empty() {
                break split_row(line);
            }
        };

        let mut store = Self::new();
        let mut skipped = 0usize;

        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf)? == 0 {
                break;
            }
            let line = String::from_utf8_lossy(&buf);
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let cells = split_row(line);
            match pick_hash(&header, &cells) {
                Some(hash) => {
                    store.hashes.insert(hash);
                }
                None => skipped += 1,
            }
        }

        debug!(skipped, "Feed rows without a usable hash");
        Ok(store)
    }

    pub fn load_from_path(path: &Path) -> Result<Self, FeedError> {
        let file = File::open(path)?;
        let store = Self::load(BufReader::new(file))?;
        info!(path = %path.display(), count = store.len(), "Loaded malicious hashes");
        Ok(store)
    }

    /// Never fails: a missing or unreadable feed yields the test set.
    pub fn load_or_fallback(path: &Path) -> Self {
        match Self::load_from_path(path) {
            Ok(store) => store,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "No malware database found, using test data");
                Self::with_test_hashes()
            }
        }
    }

    /// Adds a digest after normalization. Returns false if it is malformed
    /// or already present.
    pub fn insert(&mut self, hash: &str) -> bool {
        let hash = normalize(hash);
        if !is_sha256_hex(&hash) {
            return false;
        }
        self.hashes.insert(hash)
    }

    /// Case-insensitive; malformed input is simply not contained.
    pub fn contains(&self, hash: &str) -> bool {
        let hash = normalize(hash);
        is_sha256_hex(&hash) && self.hashes.contains(&hash)
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }
}

fn normalize(raw: &str) -> String {
    raw.replace('"', "").trim().to_ascii_lowercase()
}

fn column_name(header: &[String], index: usize) -> String {
    match header.get(index) {
        Some(name) if !name.is_empty() => name.clone(),
        _ => format!("_{}", index),
    }
}

fn pick_hash(header: &[String], cells: &[String]) -> Option<String> {
    for wanted in HASH_COLUMNS {
        let Some(index) = (0..cells.len()).find(|&i| column_name(header, i) == wanted) else {
            continue;
        };
        let value = normalize(&cells[index]);
        if !value.is_empty() && is_sha256_hex(&value) {
            return Some(value);
        }
    }
    None
}

/// Splits one CSV line, honouring double-quoted fields and `""` escapes.
fn split_row(line: &str) -> Vec<String> {
    let mut cells = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => cells.push(std::mem::take(&mut current).trim().to_string()),
            _ => current.push(c),
        }
    }
    cells.push(current.trim().to_string());
    cells
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};

    const H1: &str = "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";
    const H2: &str = "fedcba9876543210fedcba9876543210fedcba9876543210fedcba9876543210";

    fn load(feed: &str) -> HashStore {
        HashStore::load(Cursor::new(feed.as_bytes())).unwrap()
    }

    #[test]
    fn loads_named_column() {
        let store = load(&format!(
            "first_seen,sha256_hash,file_name\n2024-01-01,\"{}\",a.exe\n2024-01-02,{},b.exe\n",
            H1,
            H2.to_uppercase()
        ));
        assert_eq!(store.len(), 2);
        assert!(store.contains(H1));
        assert!(store.contains(H2));
    }

    #[test]
    fn falls_through_candidate_columns() {
        let store = load(&format!("id,hash\n1,{}\n", H1));
        assert!(store.contains(H1));
    }

    #[test]
    fn unnamed_columns_resolve_by_position() {
        let feed = format!(
            "################\n\
             # \"first_seen_utc\",\"sha256_hash\",\"md5_hash\"\n\
             \"2024-01-01 00:00:00\", \"{}\", \"d41d8cd98f00b204e9800998ecf8427e\"\n",
            H1
        );
        let store = load(&feed);
        assert_eq!(store.len(), 1);
        assert!(store.contains(H1));
    }

    #[test]
    fn skips_rows_without_valid_hash() {
        let store = load(&format!("sha256\nshort\n{}\n\n{}\n", "z".repeat(64), H1));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn first_valid_candidate_wins() {
        let store = load(&format!("sha256_hash,sha256\nnot-a-hash,{}\n", H2));
        assert!(store.contains(H2));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn empty_feed_is_an_error() {
        assert!(matches!(
            HashStore::load(Cursor::new(Vec::<u8>::new())),
            Err(FeedError::MissingHeader)
        ));
    }

    #[test]
    fn missing_file_falls_back_to_test_hashes() {
        let dir = tempfile::tempdir().unwrap();
        let store = HashStore::load_or_fallback(&dir.path().join("missing.csv"));
        assert_eq!(store.len(), 3);
        for hash in TEST_HASHES {
            assert!(store.contains(hash));
        }
    }

    #[test]
    fn loads_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "sha256").unwrap();
        writeln!(file, "{}", H1).unwrap();
        let store = HashStore::load_or_fallback(file.path());
        assert_eq!(store.len(), 1);
        assert!(!store.contains(TEST_HASHES[0]));
    }

    #[test]
    fn contains_is_case_insensitive_and_fails_closed() {
        let store = HashStore::with_test_hashes();
        assert!(store.contains(&"A".repeat(64)));
        assert!(!store.contains("aaaa"));
        assert!(!store.contains(""));
        assert!(!store.contains(&"a".repeat(65)));
    }

    #[test]
    fn split_row_handles_quotes() {
        assert_eq!(
            split_row(r#"a,"b,c","d""e",  f "#),
            vec!["a", "b,c", "d\"e", "f"]
        );
    }
}
