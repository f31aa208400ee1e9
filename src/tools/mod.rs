pub mod apply_formula;
pub mod close;
pub mod compute_statistics;
pub mod discover;
pub mod filter;
pub mod preview;
pub mod read_range;
pub mod rowio;
pub mod search;
pub mod write_range;

use schemars::JsonSchema;
use serde::Serialize;

/// Shared truncation/pagination summary attached to every paginated response.
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct PageMeta {
    pub total: u64,
    pub returned: u64,
    pub truncated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

impl PageMeta {
    /// `matches=<total> returned=<returned> truncated=<bool>`, with
    /// ` next_cursor=<token>` appended when one is present.
    pub fn summary_line(&self) -> String {
        let mut line = format!("matches={} returned={} truncated={}", self.total, self.returned, self.truncated);
        if let Some(cursor) = &self.next_cursor {
            line.push_str(&format!(" next_cursor={cursor}"));
        }
        line
    }
}
