//! Error catalog for the repolens analysis service.
//!
//! Defines the closed set of error codes produced by classification, grouped
//! by subsystem. Each code carries:
//! - A unique numeric code (RLS-E001 through RLS-E999)
//! - A default severity
//! - A short title and remediation suggestions (some platform-specific)
//! - A documentation link
//!
//! # Error Code Ranges
//!
//! | Range      | Category        | Description                        |
//! |------------|-----------------|------------------------------------|
//! | E001-E099  | PathValidation  | Repository path validation         |
//! | E100-E199  | PathPermission  | Filesystem permission failures     |
//! | E200-E299  | Network         | Network connectivity               |
//! | E300-E399  | HttpRequest     | HTTP request/response failures     |
//! | E400-E449  | LlmProvider     | LLM provider integration           |
//! | E450-E499  | LlmQuota        | LLM quota and rate limiting        |
//! | E500-E599  | Analysis        | Analysis pipeline failures         |
//! | E900-E999  | Internal        | Unclassified/unexpected errors     |

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error code enumeration covering all classified error scenarios.
///
/// Wire names are SCREAMING_SNAKE_CASE; these are the stable `code` values
/// API consumers deep-link remediation docs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[non_exhaustive]
pub enum ErrorCode {
    // =========================================================================
    // Path Validation (E001-E099)
    // =========================================================================
    /// Repository path does not exist
    PathNotFound,
    /// Repository path exists but is not a directory
    PathNotDirectory,
    /// Repository path is malformed or otherwise unusable
    PathInvalid,

    // =========================================================================
    // Path Permission (E100-E199)
    // =========================================================================
    /// Read access to the repository was denied
    PermissionReadDenied,
    /// Write access (export/cache) was denied
    PermissionWriteDenied,

    // =========================================================================
    // Network (E200-E299)
    // =========================================================================
    /// Network operation timed out
    NetworkTimeout,
    /// Connection refused by remote host
    NetworkConnectionRefused,
    /// Network is unreachable
    NetworkUnreachable,

    // =========================================================================
    // HTTP Request (E300-E399)
    // =========================================================================
    /// Request was malformed (4xx other than 404)
    HttpBadRequest,
    /// Requested resource was not found (404)
    HttpNotFound,
    /// Request failed for an unspecified reason
    HttpRequestFailed,
    /// Upstream returned a server error (5xx)
    HttpServerError,

    // =========================================================================
    // LLM Provider (E400-E449)
    // =========================================================================
    /// Provider rejected the configured credentials
    LlmProviderAuthenticationFailed,
    /// Provider is unreachable or returned an outage response
    LlmProviderUnavailable,
    /// Provider response could not be parsed
    LlmResponseInvalid,

    // =========================================================================
    // LLM Quota (E450-E499)
    // =========================================================================
    /// Provider quota or spending cap exhausted
    LlmProviderQuotaExceeded,
    /// Provider applied rate limiting
    LlmRateLimited,

    // =========================================================================
    // Analysis (E500-E599)
    // =========================================================================
    /// Analysis pipeline failed
    AnalysisFailed,
    /// Analysis was cancelled by the caller
    AnalysisCancelled,
    /// Analysis exceeded its time budget
    AnalysisTimeout,

    // =========================================================================
    // Internal (E900-E999)
    // =========================================================================
    /// No classification rule matched
    Unknown,
}

/// Error category for coarse filtering by UI and log consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    /// Repository path validation (E001-E099)
    PathValidation,
    /// Filesystem permission failures (E100-E199)
    PathPermission,
    /// Network connectivity (E200-E299)
    Network,
    /// HTTP request/response failures (E300-E399)
    HttpRequest,
    /// LLM provider integration (E400-E449)
    LlmProvider,
    /// LLM quota and rate limiting (E450-E499)
    LlmQuota,
    /// Analysis pipeline failures (E500-E599)
    Analysis,
    /// Unclassified/unexpected errors (E900-E999)
    Internal,
}

/// Error severity, ordered from least to most urgent.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// Target platform for a platform-specific remediation suggestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Linux,
    Macos,
    Windows,
}

/// A single remediation suggestion, optionally scoped to one platform.
///
/// Platform filtering happens at format time, not at classification time, so
/// a classified record always carries the full suggestion list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suggestion {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
}

impl Suggestion {
    fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
            platform: None,
        }
    }

    fn for_platform(text: &str, platform: Platform) -> Self {
        Self {
            text: text.to_string(),
            platform: Some(platform),
        }
    }
}

impl ErrorCode {
    /// Returns the numeric error code (without prefix).
    #[must_use]
    pub const fn code_number(&self) -> u16 {
        match self {
            // Path Validation (001-099)
            Self::PathNotFound => 1,
            Self::PathNotDirectory => 2,
            Self::PathInvalid => 3,

            // Path Permission (100-199)
            Self::PermissionReadDenied => 100,
            Self::PermissionWriteDenied => 101,

            // Network (200-299)
            Self::NetworkTimeout => 200,
            Self::NetworkConnectionRefused => 201,
            Self::NetworkUnreachable => 202,

            // HTTP (300-399)
            Self::HttpBadRequest => 300,
            Self::HttpNotFound => 301,
            Self::HttpRequestFailed => 302,
            Self::HttpServerError => 303,

            // LLM Provider (400-449)
            Self::LlmProviderAuthenticationFailed => 400,
            Self::LlmProviderUnavailable => 401,
            Self::LlmResponseInvalid => 402,

            // LLM Quota (450-499)
            Self::LlmProviderQuotaExceeded => 450,
            Self::LlmRateLimited => 451,

            // Analysis (500-599)
            Self::AnalysisFailed => 500,
            Self::AnalysisCancelled => 501,
            Self::AnalysisTimeout => 502,

            // Internal (900-999)
            Self::Unknown => 900,
        }
    }

    /// Returns the formatted error code string (e.g., "RLS-E001").
    #[must_use]
    pub fn code_string(&self) -> String {
        format!("RLS-E{:03}", self.code_number())
    }

    /// Returns the stable wire name (e.g., "PATH_NOT_FOUND").
    ///
    /// Must stay in sync with the serde rename; consumers key remediation
    /// docs and log queries on these strings.
    #[must_use]
    pub const fn wire_name(&self) -> &'static str {
        match self {
            Self::PathNotFound => "PATH_NOT_FOUND",
            Self::PathNotDirectory => "PATH_NOT_DIRECTORY",
            Self::PathInvalid => "PATH_INVALID",
            Self::PermissionReadDenied => "PERMISSION_READ_DENIED",
            Self::PermissionWriteDenied => "PERMISSION_WRITE_DENIED",
            Self::NetworkTimeout => "NETWORK_TIMEOUT",
            Self::NetworkConnectionRefused => "NETWORK_CONNECTION_REFUSED",
            Self::NetworkUnreachable => "NETWORK_UNREACHABLE",
            Self::HttpBadRequest => "HTTP_BAD_REQUEST",
            Self::HttpNotFound => "HTTP_NOT_FOUND",
            Self::HttpRequestFailed => "HTTP_REQUEST_FAILED",
            Self::HttpServerError => "HTTP_SERVER_ERROR",
            Self::LlmProviderAuthenticationFailed => "LLM_PROVIDER_AUTHENTICATION_FAILED",
            Self::LlmProviderUnavailable => "LLM_PROVIDER_UNAVAILABLE",
            Self::LlmResponseInvalid => "LLM_RESPONSE_INVALID",
            Self::LlmProviderQuotaExceeded => "LLM_PROVIDER_QUOTA_EXCEEDED",
            Self::LlmRateLimited => "LLM_RATE_LIMITED",
            Self::AnalysisFailed => "ANALYSIS_FAILED",
            Self::AnalysisCancelled => "ANALYSIS_CANCELLED",
            Self::AnalysisTimeout => "ANALYSIS_TIMEOUT",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Returns the error category.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self.code_number() {
            1..=99 => ErrorCategory::PathValidation,
            100..=199 => ErrorCategory::PathPermission,
            200..=299 => ErrorCategory::Network,
            300..=399 => ErrorCategory::HttpRequest,
            400..=449 => ErrorCategory::LlmProvider,
            450..=499 => ErrorCategory::LlmQuota,
            500..=599 => ErrorCategory::Analysis,
            _ => ErrorCategory::Internal,
        }
    }

    /// Returns the default severity assigned at classification time.
    ///
    /// HTTP classification may override this based on the concrete status
    /// code (4xx -> Medium, 5xx -> High).
    #[must_use]
    pub const fn default_severity(&self) -> Severity {
        match self {
            Self::PathNotFound | Self::PathNotDirectory => Severity::High,
            Self::PathInvalid => Severity::Medium,

            Self::PermissionReadDenied | Self::PermissionWriteDenied => Severity::High,

            Self::NetworkTimeout | Self::NetworkConnectionRefused => Severity::Medium,
            Self::NetworkUnreachable => Severity::High,

            Self::HttpBadRequest | Self::HttpNotFound | Self::HttpRequestFailed => {
                Severity::Medium
            }
            Self::HttpServerError => Severity::High,

            Self::LlmProviderAuthenticationFailed | Self::LlmResponseInvalid => Severity::Medium,
            Self::LlmProviderUnavailable => Severity::High,

            Self::LlmProviderQuotaExceeded | Self::LlmRateLimited => Severity::Medium,

            Self::AnalysisFailed => Severity::High,
            Self::AnalysisCancelled => Severity::Low,
            Self::AnalysisTimeout => Severity::Medium,

            Self::Unknown => Severity::Medium,
        }
    }

    /// Returns the fixed human-facing title attached at classification time.
    #[must_use]
    pub const fn title(&self) -> &'static str {
        match self {
            Self::PathNotFound => "Repository path not found",
            Self::PathNotDirectory => "Path is not a directory",
            Self::PathInvalid => "Invalid repository path",

            Self::PermissionReadDenied => "Permission denied reading repository",
            Self::PermissionWriteDenied => "Permission denied writing output",

            Self::NetworkTimeout => "Network operation timed out",
            Self::NetworkConnectionRefused => "Connection refused",
            Self::NetworkUnreachable => "Network unreachable",

            Self::HttpBadRequest => "Invalid request",
            Self::HttpNotFound => "Resource not found",
            Self::HttpRequestFailed => "Request failed",
            Self::HttpServerError => "Server error",

            Self::LlmProviderAuthenticationFailed => "LLM provider authentication failed",
            Self::LlmProviderUnavailable => "LLM provider unavailable",
            Self::LlmResponseInvalid => "LLM response could not be parsed",

            Self::LlmProviderQuotaExceeded => "LLM provider quota exceeded",
            Self::LlmRateLimited => "LLM provider rate limit hit",

            Self::AnalysisFailed => "Analysis failed",
            Self::AnalysisCancelled => "Analysis cancelled",
            Self::AnalysisTimeout => "Analysis timed out",

            Self::Unknown => "Unexpected error",
        }
    }

    /// Returns remediation suggestions for this code.
    ///
    /// The list is ordered by usefulness. Platform-tagged entries are kept
    /// here and filtered by the formatter when a platform is known.
    #[must_use]
    pub fn suggestions(&self) -> Vec<Suggestion> {
        match self {
            Self::PathNotFound => vec![
                Suggestion::new("Verify the repository path exists and is spelled correctly"),
                Suggestion::new("Use an absolute path to avoid working-directory surprises"),
                Suggestion::for_platform(
                    "Check the path with 'ls -la <path>'",
                    Platform::Linux,
                ),
                Suggestion::for_platform(
                    "Check the path with 'dir <path>' in a terminal",
                    Platform::Windows,
                ),
            ],
            Self::PathNotDirectory => vec![
                Suggestion::new("Point the analysis at the repository root, not a file"),
                Suggestion::new("If the target is an archive, extract it first"),
            ],
            Self::PathInvalid => vec![
                Suggestion::new("Remove unsupported characters from the path"),
                Suggestion::new("Avoid trailing separators and redundant '..' segments"),
            ],
            Self::PermissionReadDenied => vec![
                Suggestion::new("Verify the service account can read the repository"),
                Suggestion::for_platform(
                    "Grant read access with 'chmod -R +r <path>' or adjust ownership",
                    Platform::Linux,
                ),
                Suggestion::for_platform(
                    "Grant Full Disk Access to the app in System Settings > Privacy",
                    Platform::Macos,
                ),
                Suggestion::for_platform(
                    "Check folder permissions in Properties > Security",
                    Platform::Windows,
                ),
            ],
            Self::PermissionWriteDenied => vec![
                Suggestion::new("Verify the output directory is writable"),
                Suggestion::new("Choose a different export location"),
            ],
            Self::NetworkTimeout => vec![
                Suggestion::new("Check network connectivity to the analysis server"),
                Suggestion::new("Retry the operation; transient congestion often clears"),
                Suggestion::new("Increase the request timeout in configuration"),
            ],
            Self::NetworkConnectionRefused => vec![
                Suggestion::new("Verify the analysis server is running"),
                Suggestion::new("Check that the configured host and port are correct"),
                Suggestion::new("Check firewall rules between client and server"),
            ],
            Self::NetworkUnreachable => vec![
                Suggestion::new("Check the local network connection"),
                Suggestion::new("Verify VPN connectivity if the server is internal"),
            ],
            Self::HttpBadRequest => vec![
                Suggestion::new("Check the request payload against the API documentation"),
                Suggestion::new("Ensure all required fields are present and well-formed"),
            ],
            Self::HttpNotFound => vec![
                Suggestion::new("Verify the analysis id or resource path"),
                Suggestion::new("The analysis may have been evicted; resubmit it"),
            ],
            Self::HttpRequestFailed => vec![
                Suggestion::new("Retry the request"),
                Suggestion::new("Check server logs for the correlated error"),
            ],
            Self::HttpServerError => vec![
                Suggestion::new("Retry after a short delay"),
                Suggestion::new("Check server logs for the root cause"),
                Suggestion::new("Report the request id to the operator if it persists"),
            ],
            Self::LlmProviderAuthenticationFailed => vec![
                Suggestion::new("Verify the provider API key is set and not expired"),
                Suggestion::new("Check that the key has access to the configured model"),
            ],
            Self::LlmProviderUnavailable => vec![
                Suggestion::new("Check the provider status page"),
                Suggestion::new("Switch to a fallback provider if one is configured"),
            ],
            Self::LlmResponseInvalid => vec![
                Suggestion::new("Retry the summarization step"),
                Suggestion::new("Reduce the prompt size; truncated responses parse poorly"),
            ],
            Self::LlmProviderQuotaExceeded => vec![
                Suggestion::new("Check the provider billing dashboard for remaining quota"),
                Suggestion::new("Wait for the quota window to reset or raise the cap"),
                Suggestion::new("Run the analysis without LLM summarization"),
            ],
            Self::LlmRateLimited => vec![
                Suggestion::new("Reduce analysis concurrency"),
                Suggestion::new("Retry after the interval indicated by the provider"),
            ],
            Self::AnalysisFailed => vec![
                Suggestion::new("Check the analysis log for the failing step"),
                Suggestion::new("Retry the analysis; transient failures are retried safely"),
            ],
            Self::AnalysisCancelled => vec![
                Suggestion::new("Resubmit the analysis if the cancellation was accidental"),
            ],
            Self::AnalysisTimeout => vec![
                Suggestion::new("Exclude large generated directories from the analysis"),
                Suggestion::new("Increase the analysis time budget in configuration"),
            ],
            Self::Unknown => vec![
                Suggestion::new("Retry the operation"),
                Suggestion::new("Report the error id if the problem persists"),
            ],
        }
    }

    /// Returns the documentation URL for this error.
    #[must_use]
    pub const fn doc_url(&self) -> Option<&'static str> {
        match self.category() {
            ErrorCategory::PathValidation | ErrorCategory::PathPermission => {
                Some("https://repolens.dev/docs/paths")
            }
            ErrorCategory::Network => Some("https://repolens.dev/docs/connectivity"),
            ErrorCategory::HttpRequest => Some("https://repolens.dev/docs/api"),
            ErrorCategory::LlmProvider | ErrorCategory::LlmQuota => {
                Some("https://repolens.dev/docs/llm-providers")
            }
            ErrorCategory::Analysis => Some("https://repolens.dev/docs/analysis"),
            ErrorCategory::Internal => Some("https://repolens.dev/docs/troubleshooting"),
        }
    }

    /// Returns all error codes.
    #[must_use]
    pub const fn all() -> &'static [ErrorCode] {
        &[
            Self::PathNotFound,
            Self::PathNotDirectory,
            Self::PathInvalid,
            Self::PermissionReadDenied,
            Self::PermissionWriteDenied,
            Self::NetworkTimeout,
            Self::NetworkConnectionRefused,
            Self::NetworkUnreachable,
            Self::HttpBadRequest,
            Self::HttpNotFound,
            Self::HttpRequestFailed,
            Self::HttpServerError,
            Self::LlmProviderAuthenticationFailed,
            Self::LlmProviderUnavailable,
            Self::LlmResponseInvalid,
            Self::LlmProviderQuotaExceeded,
            Self::LlmRateLimited,
            Self::AnalysisFailed,
            Self::AnalysisCancelled,
            Self::AnalysisTimeout,
            Self::Unknown,
        ]
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code_string(), self.title())
    }
}

impl ErrorCategory {
    /// Returns the stable wire name (e.g., "PATH_VALIDATION").
    #[must_use]
    pub const fn wire_name(&self) -> &'static str {
        match self {
            Self::PathValidation => "PATH_VALIDATION",
            Self::PathPermission => "PATH_PERMISSION",
            Self::Network => "NETWORK",
            Self::HttpRequest => "HTTP_REQUEST",
            Self::LlmProvider => "LLM_PROVIDER",
            Self::LlmQuota => "LLM_QUOTA",
            Self::Analysis => "ANALYSIS",
            Self::Internal => "INTERNAL",
        }
    }

    /// Returns a human-readable name for the category.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::PathValidation => "Path Validation",
            Self::PathPermission => "Path Permission",
            Self::Network => "Network",
            Self::HttpRequest => "HTTP Request",
            Self::LlmProvider => "LLM Provider",
            Self::LlmQuota => "LLM Quota",
            Self::Analysis => "Analysis",
            Self::Internal => "Internal",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl Severity {
    /// Returns the wire/display name (e.g., "HIGH").
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_numbers_are_unique() {
        let mut seen = std::collections::HashSet::new();
        for code in ErrorCode::all() {
            let num = code.code_number();
            assert!(
                seen.insert(num),
                "Duplicate error code number: {} for {:?}",
                num,
                code
            );
        }
    }

    #[test]
    fn test_error_code_format() {
        assert_eq!(ErrorCode::PathNotFound.code_string(), "RLS-E001");
        assert_eq!(ErrorCode::PermissionReadDenied.code_string(), "RLS-E100");
        assert_eq!(ErrorCode::NetworkTimeout.code_string(), "RLS-E200");
        assert_eq!(ErrorCode::HttpBadRequest.code_string(), "RLS-E300");
        assert_eq!(
            ErrorCode::LlmProviderQuotaExceeded.code_string(),
            "RLS-E450"
        );
        assert_eq!(ErrorCode::AnalysisFailed.code_string(), "RLS-E500");
        assert_eq!(ErrorCode::Unknown.code_string(), "RLS-E900");
    }

    #[test]
    fn test_error_categories() {
        assert_eq!(
            ErrorCode::PathNotFound.category(),
            ErrorCategory::PathValidation
        );
        assert_eq!(
            ErrorCode::PermissionReadDenied.category(),
            ErrorCategory::PathPermission
        );
        assert_eq!(
            ErrorCode::HttpNotFound.category(),
            ErrorCategory::HttpRequest
        );
        assert_eq!(
            ErrorCode::LlmProviderUnavailable.category(),
            ErrorCategory::LlmProvider
        );
        assert_eq!(
            ErrorCode::LlmProviderQuotaExceeded.category(),
            ErrorCategory::LlmQuota
        );
        assert_eq!(ErrorCode::Unknown.category(), ErrorCategory::Internal);
    }

    #[test]
    fn test_wire_names_are_screaming_snake_case() {
        let json = serde_json::to_string(&ErrorCode::PathNotFound).unwrap();
        assert_eq!(json, "\"PATH_NOT_FOUND\"");
        let json = serde_json::to_string(&ErrorCode::LlmProviderQuotaExceeded).unwrap();
        assert_eq!(json, "\"LLM_PROVIDER_QUOTA_EXCEEDED\"");
        let json = serde_json::to_string(&ErrorCategory::PathValidation).unwrap();
        assert_eq!(json, "\"PATH_VALIDATION\"");
        let json = serde_json::to_string(&Severity::High).unwrap();
        assert_eq!(json, "\"HIGH\"");
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
    }

    #[test]
    fn test_every_code_has_suggestions_and_title() {
        for code in ErrorCode::all() {
            assert!(
                !code.suggestions().is_empty(),
                "{:?} has no suggestions",
                code
            );
            assert!(!code.title().is_empty(), "{:?} has no title", code);
        }
    }

    #[test]
    fn test_platform_tagged_suggestions_survive_the_catalog() {
        let tagged: Vec<_> = ErrorCode::PermissionReadDenied
            .suggestions()
            .into_iter()
            .filter(|s| s.platform.is_some())
            .collect();
        assert!(tagged.len() >= 2);
    }

    #[test]
    fn test_doc_urls_cover_all_codes() {
        for code in ErrorCode::all() {
            assert!(code.doc_url().is_some(), "{:?} has no doc url", code);
        }
    }
}
