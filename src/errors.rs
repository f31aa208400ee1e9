use std::fmt;

use rmcp::ErrorData as McpError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The fixed failure-kind taxonomy surfaced to the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    Validation,
    InvalidHandle,
    InvalidSheet,
    CursorInvalid,
    CursorBuildFailed,
    BusyResource,
    Timeout,
    LimitExceeded,
    PayloadTooLarge,
    FileTooLarge,
    UnsupportedFormat,
    PermissionDenied,
    NotFound,
    CorruptWorkbook,
    OpenFailed,
    DiscoveryFailed,
    PreviewFailed,
    ReadFailed,
    WriteFailed,
    ApplyFormulaFailed,
    SearchFailed,
    FilterFailed,
    StatisticsFailed,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::Validation => "VALIDATION",
            ErrorCode::InvalidHandle => "INVALID_HANDLE",
            ErrorCode::InvalidSheet => "INVALID_SHEET",
            ErrorCode::CursorInvalid => "CURSOR_INVALID",
            ErrorCode::CursorBuildFailed => "CURSOR_BUILD_FAILED",
            ErrorCode::BusyResource => "BUSY_RESOURCE",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::LimitExceeded => "LIMIT_EXCEEDED",
            ErrorCode::PayloadTooLarge => "PAYLOAD_TOO_LARGE",
            ErrorCode::FileTooLarge => "FILE_TOO_LARGE",
            ErrorCode::UnsupportedFormat => "UNSUPPORTED_FORMAT",
            ErrorCode::PermissionDenied => "PERMISSION_DENIED",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::CorruptWorkbook => "CORRUPT_WORKBOOK",
            ErrorCode::OpenFailed => "OPEN_FAILED",
            ErrorCode::DiscoveryFailed => "DISCOVERY_FAILED",
            ErrorCode::PreviewFailed => "PREVIEW_FAILED",
            ErrorCode::ReadFailed => "READ_FAILED",
            ErrorCode::WriteFailed => "WRITE_FAILED",
            ErrorCode::ApplyFormulaFailed => "APPLY_FORMULA_FAILED",
            ErrorCode::SearchFailed => "SEARCH_FAILED",
            ErrorCode::FilterFailed => "FILTER_FAILED",
            ErrorCode::StatisticsFailed => "STATISTICS_FAILED",
        }
    }

    /// Whether a client may usefully retry, per the catalog in spec.md §7.
    pub fn retryable(self) -> bool {
        !matches!(
            self,
            ErrorCode::FileTooLarge
                | ErrorCode::UnsupportedFormat
                | ErrorCode::PermissionDenied
                | ErrorCode::CorruptWorkbook
        )
    }

    fn next_steps(self) -> &'static str {
        match self {
            ErrorCode::Validation => "fix the offending field and retry",
            ErrorCode::InvalidHandle => "reopen the workbook and retry",
            ErrorCode::InvalidSheet => "call discover-structure to list valid sheet names",
            ErrorCode::CursorInvalid => "restart pagination without a cursor",
            ErrorCode::CursorBuildFailed => "retry the call; if it persists, request a smaller page",
            ErrorCode::BusyResource => "retry after a short backoff",
            ErrorCode::Timeout => "retry, or narrow the range/page size",
            ErrorCode::LimitExceeded => "narrow the request (fewer groups/columns) and retry",
            ErrorCode::PayloadTooLarge => "split the request into smaller ranges",
            ErrorCode::FileTooLarge => "this workbook exceeds the configured size limit",
            ErrorCode::UnsupportedFormat => "use a workbook with a supported extension",
            ErrorCode::PermissionDenied => "use a path under an allow-listed root",
            ErrorCode::NotFound => "verify the path exists",
            ErrorCode::CorruptWorkbook => "the workbook could not be parsed",
            _ => "retry; if it persists, report the detail",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A tagged error from the fixed taxonomy, carrying free-form detail.
///
/// Wire form: `CODE: detail | nextSteps: ...`
#[derive(Debug, Error)]
#[error("{code}: {detail} | nextSteps: {steps}", code = self.code.as_str(), detail = self.detail, steps = self.code.next_steps())]
pub struct KernelError {
    pub code: ErrorCode,
    pub detail: String,
}

impl KernelError {
    pub fn new(code: ErrorCode, detail: impl Into<String>) -> Self {
        Self {
            code,
            detail: detail.into(),
        }
    }
}

macro_rules! ctor {
    ($name:ident, $code:ident) => {
        pub fn $name(detail: impl Into<String>) -> KernelError {
            KernelError::new(ErrorCode::$code, detail)
        }
    };
}

ctor!(validation, Validation);
ctor!(invalid_handle, InvalidHandle);
ctor!(invalid_sheet, InvalidSheet);
ctor!(cursor_invalid, CursorInvalid);
ctor!(cursor_build_failed, CursorBuildFailed);
ctor!(busy_resource, BusyResource);
ctor!(timeout, Timeout);
ctor!(limit_exceeded, LimitExceeded);
ctor!(payload_too_large, PayloadTooLarge);
ctor!(file_too_large, FileTooLarge);
ctor!(unsupported_format, UnsupportedFormat);
ctor!(permission_denied, PermissionDenied);
ctor!(not_found, NotFound);
ctor!(corrupt_workbook, CorruptWorkbook);
ctor!(open_failed, OpenFailed);
ctor!(discovery_failed, DiscoveryFailed);
ctor!(preview_failed, PreviewFailed);
ctor!(read_failed, ReadFailed);
ctor!(write_failed, WriteFailed);
ctor!(apply_formula_failed, ApplyFormulaFailed);
ctor!(search_failed, SearchFailed);
ctor!(filter_failed, FilterFailed);
ctor!(statistics_failed, StatisticsFailed);

/// Translate a codec-level failure into the taxonomy by substring match,
/// falling back to a tool-specific `*_FAILED` code.
pub fn classify_codec_error(err: &anyhow::Error, fallback: ErrorCode) -> KernelError {
    let msg = err.to_string();
    let lower = msg.to_ascii_lowercase();
    if (lower.contains("doesn't exist") || lower.contains("does not exist")) && lower.contains("sheet") {
        return KernelError::new(ErrorCode::InvalidSheet, msg);
    }
    if lower.contains("invalid range") || lower.contains("coordinates") {
        return KernelError::new(ErrorCode::Validation, msg);
    }
    KernelError::new(fallback, msg)
}

/// Single boundary conversion from an internal error to the wire `McpError`.
///
/// Every tool handler funnels its failures through this function; there is
/// exactly one place in the crate that knows about `rmcp::ErrorData`.
pub fn to_tool_error(tool: &str, error: anyhow::Error) -> McpError {
    let kernel_err = match error.downcast::<KernelError>() {
        Ok(k) => k,
        Err(other) => KernelError::new(ErrorCode::OpenFailed, other.to_string()),
    };
    let message = format!("[{tool}] {kernel_err}");
    match kernel_err.code {
        ErrorCode::Validation
        | ErrorCode::CursorInvalid
        | ErrorCode::InvalidSheet
        | ErrorCode::PayloadTooLarge
        | ErrorCode::LimitExceeded
        | ErrorCode::UnsupportedFormat
        | ErrorCode::InvalidHandle
        | ErrorCode::NotFound => McpError::invalid_params(message, None),
        ErrorCode::PermissionDenied => McpError::invalid_request(message, None),
        _ => McpError::internal_error(message, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_form_has_code_detail_and_next_steps() {
        let err = validation("missing field 'sheet'");
        let text = err.to_string();
        assert!(text.starts_with("VALIDATION: missing field 'sheet' | nextSteps:"));
    }

    #[test]
    fn non_retryable_codes_are_marked() {
        assert!(!ErrorCode::UnsupportedFormat.retryable());
        assert!(ErrorCode::BusyResource.retryable());
    }

    #[test]
    fn codec_error_classified_by_substring() {
        let err = anyhow::anyhow!("sheet 'Foo' doesn't exist in workbook");
        let classified = classify_codec_error(&err, ErrorCode::ReadFailed);
        assert_eq!(classified.code, ErrorCode::InvalidSheet);
    }

    #[test]
    fn doesnt_exist_without_sheet_does_not_misclassify_as_invalid_sheet() {
        let err = anyhow::anyhow!("file '/tmp/book.xlsx' doesn't exist");
        let classified = classify_codec_error(&err, ErrorCode::OpenFailed);
        assert_eq!(classified.code, ErrorCode::OpenFailed);
    }
}
