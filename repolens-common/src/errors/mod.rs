//! Error catalog, classification, and rendering for repolens.
//!
//! Every failure surfaced by the system carries a stable code from the
//! catalog, is classified into a structured record with suggestions, and is
//! rendered per audience by the formatter.
//!
//! # Error Code Ranges
//!
//! | Range      | Category        | Description                          |
//! |------------|-----------------|--------------------------------------|
//! | E001-E099  | PathValidation  | Repository path resolution           |
//! | E100-E199  | PathPermission  | Filesystem permission failures       |
//! | E200-E299  | Network         | Connectivity and timeouts            |
//! | E300-E399  | HttpRequest     | HTTP request/response failures       |
//! | E400-E449  | LlmProvider     | LLM provider auth and availability   |
//! | E450-E499  | LlmQuota        | LLM quota and rate limiting          |
//! | E500-E599  | Analysis        | Analysis lifecycle failures          |
//! | E900       | Internal        | Unclassified errors                  |

pub mod catalog;
pub mod classify;
pub mod format;

pub use catalog::{ErrorCategory, ErrorCode, Platform, Severity, Suggestion};
pub use classify::{
    ApiError, ClassifiedError, ErrorClassifier, ErrorContext, ErrorCorrelation, ErrorResponse,
    ErrorStatistics, TimeRange,
};
pub use format::{ApiFormatOptions, ConsoleFormatOptions, ErrorFormatter};
