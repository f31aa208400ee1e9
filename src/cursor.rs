use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::errors::cursor_invalid;

pub const CURSOR_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Unit {
    Rows,
    Cells,
}

/// Opaque, self-describing pagination token. Minified on the wire; short
/// field names keep the base64 payload compact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cursor {
    pub v: u32,
    pub path: String,
    pub sheet: String,
    pub range: String,
    pub unit: Unit,
    pub offset: u64,
    pub page_size: u64,
    pub mtime: u64,
    pub issued_at: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_hash: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub predicate_hash: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub q: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rg: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cl: Option<Vec<usize>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub p: Option<String>,
}

impl Cursor {
    pub fn encode(&self) -> anyhow::Result<String> {
        let bytes = serde_json::to_vec(self).map_err(|e| crate::errors::cursor_build_failed(e.to_string()))?;
        Ok(URL_SAFE_NO_PAD.encode(bytes))
    }

    pub fn decode(token: &str) -> anyhow::Result<Self> {
        if token.trim().is_empty() {
            return Err(cursor_invalid("cursor token is empty").into());
        }
        let bytes = URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|e| cursor_invalid(format!("cursor is not valid base64url: {e}")))?;
        let cursor: Cursor = serde_json::from_slice(&bytes)
            .map_err(|e| cursor_invalid(format!("cursor payload is not well-formed: {e}")))?;
        if cursor.v != CURSOR_VERSION {
            return Err(cursor_invalid(format!("unsupported cursor version {}", cursor.v)).into());
        }
        if cursor.page_size == 0 {
            return Err(cursor_invalid("cursor page_size must be positive").into());
        }
        if cursor.path.is_empty() || cursor.sheet.is_empty() || cursor.range.is_empty() {
            return Err(cursor_invalid("cursor is missing required fields").into());
        }
        Ok(cursor)
    }

    /// Binding checks performed at resume; every failure is `CURSOR_INVALID`.
    pub fn check_binding(
        &self,
        expected_unit: Unit,
        canonical_path: &str,
        current_mtime: u64,
    ) -> anyhow::Result<()> {
        if self.path != canonical_path {
            return Err(cursor_invalid("cursor path does not match the resolved canonical path").into());
        }
        if self.unit != expected_unit {
            return Err(cursor_invalid("cursor unit does not match this tool family").into());
        }
        if self.mtime != current_mtime {
            return Err(cursor_invalid("workbook has changed since the cursor was issued").into());
        }
        Ok(())
    }

    pub fn check_query_hash(&self, recomputed: u64) -> anyhow::Result<()> {
        match self.query_hash {
            Some(hash) if hash == recomputed => Ok(()),
            Some(_) => Err(cursor_invalid("cursor query/columns do not match the supplied parameters").into()),
            None => Ok(()),
        }
    }

    pub fn check_predicate_hash(&self, recomputed: u64) -> anyhow::Result<()> {
        match self.predicate_hash {
            Some(hash) if hash == recomputed => Ok(()),
            Some(_) => Err(cursor_invalid("cursor predicate/columns do not match the supplied parameters").into()),
            None => Ok(()),
        }
    }
}

pub fn next_offset(current: u64, n: u64) -> u64 {
    current + n
}

/// Wall-clock seconds since the epoch, stamped onto every cursor as `issued_at`.
pub fn now_seconds() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// `trim(query) | "0"/"1" for regex | comma-joined sorted unique positive columns`
pub fn search_binding_hash(query: &str, regex: bool, columns: &[usize]) -> u64 {
    let mut cols: Vec<usize> = columns.iter().copied().filter(|&c| c > 0).collect();
    cols.sort_unstable();
    cols.dedup();
    let cols_str = cols.iter().map(|c| c.to_string()).collect::<Vec<_>>().join(",");
    let normalized = format!("{}|{}|{}", query.trim(), if regex { "1" } else { "0" }, cols_str);
    short_digest(normalized.as_bytes())
}

/// `collapse-whitespace(predicate) | comma-joined sorted unique positive columns`
pub fn filter_binding_hash(predicate: &str, columns: &[usize]) -> u64 {
    let collapsed = predicate.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut cols: Vec<usize> = columns.iter().copied().filter(|&c| c > 0).collect();
    cols.sort_unstable();
    cols.dedup();
    let cols_str = cols.iter().map(|c| c.to_string()).collect::<Vec<_>>().join(",");
    let normalized = format!("{}|{}", collapsed, cols_str);
    short_digest(normalized.as_bytes())
}

fn short_digest(bytes: &[u8]) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&digest[0..8]);
    u64::from_le_bytes(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Cursor {
        Cursor {
            v: CURSOR_VERSION,
            path: "/root/book.xlsx".into(),
            sheet: "Sheet1".into(),
            range: "A1:D50".into(),
            unit: Unit::Rows,
            offset: 10,
            page_size: 5,
            mtime: 1_700_000_000,
            issued_at: 1_700_000_000,
            query_hash: Some(search_binding_hash("foo", false, &[1, 2])),
            predicate_hash: None,
            q: Some("foo".into()),
            rg: Some(false),
            cl: Some(vec![1, 2]),
            p: None,
        }
    }

    #[test]
    fn round_trips() {
        let cursor = sample();
        let token = cursor.encode().unwrap();
        assert!(!token.contains('+') && !token.contains('/') && !token.contains('='));
        let decoded = Cursor::decode(&token).unwrap();
        assert_eq!(cursor, decoded);
    }

    #[test]
    fn rejects_malformed_token() {
        let err = Cursor::decode("not-base64!!!").unwrap_err();
        assert!(err.to_string().contains("CURSOR_INVALID"));
    }

    #[test]
    fn rejects_empty_token() {
        let err = Cursor::decode("").unwrap_err();
        assert!(err.to_string().contains("CURSOR_INVALID"));
    }

    #[test]
    fn binding_rejects_path_mismatch() {
        let cursor = sample();
        let err = cursor
            .check_binding(Unit::Rows, "/other/book.xlsx", cursor.mtime)
            .unwrap_err();
        assert!(err.to_string().contains("CURSOR_INVALID"));
    }

    #[test]
    fn binding_rejects_unit_mismatch() {
        let cursor = sample();
        let err = cursor
            .check_binding(Unit::Cells, &cursor.path, cursor.mtime)
            .unwrap_err();
        assert!(err.to_string().contains("CURSOR_INVALID"));
    }

    #[test]
    fn binding_rejects_mtime_drift() {
        let cursor = sample();
        let err = cursor
            .check_binding(Unit::Rows, &cursor.path, cursor.mtime + 1)
            .unwrap_err();
        assert!(err.to_string().contains("CURSOR_INVALID"));
    }

    #[test]
    fn query_hash_mismatch_rejected() {
        let cursor = sample();
        let err = cursor
            .check_query_hash(search_binding_hash("bar", false, &[1, 2]))
            .unwrap_err();
        assert!(err.to_string().contains("CURSOR_INVALID"));
    }

    #[test]
    fn next_offset_adds_nonnegative_count() {
        assert_eq!(next_offset(10, 5), 15);
        assert_eq!(next_offset(10, 0), 10);
    }
}
