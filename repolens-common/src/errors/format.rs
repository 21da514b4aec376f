//! Rendering of classified errors for each output surface.
//!
//! One classified record, several audiences: the HTTP API wants the stable
//! JSON envelope, operators want a laid-out console block, log pipelines want
//! an untruncated structured map, dashboards want a severity-bucketed
//! summary, and end users want plain prose.

use console::Style;
use serde_json::{Value, json};
use unicode_width::UnicodeWidthStr;

use super::catalog::{ErrorCode, Platform, Severity, Suggestion};
use super::classify::{ApiError, ClassifiedError, ErrorResponse};

/// Options for [`ErrorFormatter::format_for_api`].
#[derive(Debug, Clone, Copy)]
pub struct ApiFormatOptions {
    pub include_suggestions: bool,
    pub include_context: bool,
    /// `None` means no cap.
    pub max_suggestions: Option<usize>,
}

impl Default for ApiFormatOptions {
    fn default() -> Self {
        Self {
            include_suggestions: true,
            include_context: false,
            max_suggestions: None,
        }
    }
}

/// Options for [`ErrorFormatter::format_for_console`].
#[derive(Debug, Clone, Copy)]
pub struct ConsoleFormatOptions {
    pub use_colors: bool,
    pub max_width: usize,
    pub max_suggestions: Option<usize>,
    /// Platform filter for tagged suggestions. `None` keeps everything.
    pub platform: Option<Platform>,
}

impl Default for ConsoleFormatOptions {
    fn default() -> Self {
        Self {
            use_colors: true,
            max_width: 80,
            max_suggestions: None,
            platform: None,
        }
    }
}

/// Stateless renderer over [`ClassifiedError`] records. Construct one and
/// pass it explicitly.
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorFormatter;

impl ErrorFormatter {
    pub fn new() -> Self {
        Self
    }

    /// The stable JSON envelope for the HTTP boundary. Suggestions are capped
    /// by `max_suggestions`; context, when included, is sanitized first.
    pub fn format_for_api(
        &self,
        error: &ClassifiedError,
        options: ApiFormatOptions,
    ) -> ErrorResponse {
        let mut suggestions = if options.include_suggestions {
            error.suggestions.clone()
        } else {
            Vec::new()
        };
        if let Some(cap) = options.max_suggestions {
            suggestions.truncate(cap);
        }
        let context = options.include_context.then(|| error.context.sanitized());
        ErrorResponse {
            error: ApiError {
                id: error.id.clone(),
                code: error.code,
                title: error.title.clone(),
                message: error.message.clone(),
                suggestions,
                context,
            },
            path: error.context.path.clone(),
            request_id: error.context.request_id.clone(),
        }
    }

    /// Fixed console layout: title line, id/code line, wrapped message,
    /// "Suggested Actions", then a "Learn More" link when the code carries
    /// one. With `use_colors = false` the output contains no escape bytes.
    pub fn format_for_console(
        &self,
        error: &ClassifiedError,
        options: ConsoleFormatOptions,
    ) -> String {
        let severity = severity_style(error.severity, options.use_colors);
        let dim = plain_or(Style::new().dim(), options.use_colors);

        let mut out = String::new();
        out.push_str(&format!("{}\n", severity.apply_to(&error.title)));
        out.push_str(&format!(
            "{}\n",
            dim.apply_to(format!(
                "{} · {} [{}]",
                error.code.code_string(),
                error.id,
                error.severity.name()
            ))
        ));
        out.push('\n');
        for line in wrap_text(&error.message, options.max_width) {
            out.push_str(&line);
            out.push('\n');
        }

        let mut suggestions = applicable_suggestions(&error.suggestions, options.platform);
        if let Some(cap) = options.max_suggestions {
            suggestions.truncate(cap);
        }
        if !suggestions.is_empty() {
            out.push('\n');
            out.push_str("Suggested Actions:\n");
            for (index, suggestion) in suggestions.iter().enumerate() {
                out.push_str(&format!("  {}. {}\n", index + 1, suggestion.text));
            }
        }

        if let Some(doc_url) = error.code.doc_url() {
            out.push('\n');
            out.push_str(&format!("Learn More: {}\n", dim.apply_to(doc_url)));
        }
        out
    }

    /// Structured map for log pipelines. Nothing is summarized or truncated;
    /// the context is sanitized like every other surfaced rendering.
    pub fn format_for_logging(&self, error: &ClassifiedError) -> Value {
        json!({
            "errorId": error.id,
            "code": error.code,
            "category": error.category,
            "severity": error.severity,
            "timestamp": error.timestamp.to_rfc3339(),
            "correlationId": error.correlation_id,
            "context": error.context.sanitized(),
            "suggestions": error.suggestions,
            "message": error.message,
        })
    }

    /// Severity-bucketed summary. Empty input yields exactly
    /// "No errors to display.".
    pub fn format_error_summary(&self, errors: &[ClassifiedError]) -> String {
        if errors.is_empty() {
            return "No errors to display.".to_string();
        }

        let mut out = format!("Error Summary ({} errors)\n", errors.len());
        for severity in [
            Severity::Critical,
            Severity::High,
            Severity::Medium,
            Severity::Low,
        ] {
            let count = errors.iter().filter(|e| e.severity == severity).count();
            if count > 0 {
                out.push_str(&format!("  {}: {}\n", severity.name(), count));
            }
        }
        out.push('\n');
        for error in errors {
            out.push_str(&format!(
                "  {} {}\n",
                error.code.code_string(),
                error.title
            ));
        }
        out
    }

    /// Plain prose for end users. Recognized codes get an expanded sentence
    /// with context interpolated; UNKNOWN falls back to the raw message
    /// unchanged.
    pub fn user_friendly_message(&self, error: &ClassifiedError) -> String {
        let path = error.context.path.as_deref().unwrap_or("the repository");
        match error.code {
            ErrorCode::PathNotFound => format!(
                "The repository path {} could not be found. Verify that it exists and is spelled correctly, then try again.",
                path
            ),
            ErrorCode::PathNotDirectory => format!(
                "{} is a file, not a directory. Point the analysis at the repository root instead.",
                path
            ),
            ErrorCode::PathInvalid => format!(
                "The path {} could not be used as a repository location. Remove unusual characters and try an absolute path.",
                path
            ),
            ErrorCode::PermissionReadDenied => format!(
                "Repolens is not allowed to read {}. Adjust the folder's permissions and run the analysis again.",
                path
            ),
            ErrorCode::PermissionWriteDenied => {
                "Repolens could not write its output. Pick a writable output location and retry.".to_string()
            }
            ErrorCode::NetworkTimeout => {
                "The connection to the analysis server timed out. Check your network and try again in a moment.".to_string()
            }
            ErrorCode::NetworkConnectionRefused => {
                "The analysis server refused the connection. Make sure the repolens daemon is running and the configured port is correct.".to_string()
            }
            ErrorCode::NetworkUnreachable => {
                "The analysis server could not be reached from this machine. Check your network or VPN connection.".to_string()
            }
            ErrorCode::HttpBadRequest => {
                "The server rejected the request as invalid. This usually means the submitted options were malformed.".to_string()
            }
            ErrorCode::HttpNotFound => {
                "The requested analysis could not be found on the server. It may have finished and been evicted; submit it again.".to_string()
            }
            ErrorCode::HttpRequestFailed => {
                "The request to the analysis server failed. Retrying usually resolves transient failures.".to_string()
            }
            ErrorCode::HttpServerError => {
                "The analysis server hit an internal error while handling the request. Wait a moment and retry.".to_string()
            }
            ErrorCode::LlmProviderAuthenticationFailed => {
                "The configured LLM provider rejected the API key. Check that the key is set, valid, and not expired.".to_string()
            }
            ErrorCode::LlmProviderUnavailable => {
                "The LLM provider is currently unavailable. Check the provider's status page or switch to a fallback provider.".to_string()
            }
            ErrorCode::LlmResponseInvalid => {
                "The LLM provider returned a response that could not be understood. Retrying the summarization step usually helps.".to_string()
            }
            ErrorCode::LlmProviderQuotaExceeded => {
                "Your LLM provider quota is exhausted. Check the billing dashboard, or run the analysis without LLM summarization.".to_string()
            }
            ErrorCode::LlmRateLimited => {
                "The LLM provider is rate limiting requests. Reduce concurrency or wait before retrying.".to_string()
            }
            ErrorCode::AnalysisFailed => {
                "The analysis could not be completed. Check the analysis log for the step that failed, then retry.".to_string()
            }
            ErrorCode::AnalysisCancelled => {
                "The analysis was cancelled before it finished. Submit it again if the cancellation was accidental.".to_string()
            }
            ErrorCode::AnalysisTimeout => {
                "The analysis ran out of time before finishing. Exclude large generated directories or raise the time budget.".to_string()
            }
            _ => error.message.clone(),
        }
    }
}

fn severity_style(severity: Severity, use_colors: bool) -> Style {
    let style = match severity {
        Severity::Low => Style::new().dim(),
        Severity::Medium => Style::new().yellow(),
        Severity::High => Style::new().red(),
        Severity::Critical => Style::new().red().bold(),
    };
    plain_or(style, use_colors)
}

/// With colors on, styling is forced so escapes appear even when the output
/// is not a terminal; with colors off, the style is stripped entirely.
fn plain_or(style: Style, use_colors: bool) -> Style {
    if use_colors {
        style.force_styling(true)
    } else {
        Style::new()
    }
}

/// Greedy word wrap on display width. Words wider than the limit get their
/// own line rather than being split.
fn wrap_text(text: &str, max_width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        if current.is_empty() {
            current = word.to_string();
            continue;
        }
        if UnicodeWidthStr::width(current.as_str()) + 1 + UnicodeWidthStr::width(word)
            > max_width
        {
            lines.push(std::mem::take(&mut current));
            current = word.to_string();
        } else {
            current.push(' ');
            current.push_str(word);
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    if lines.is_empty() {
        lines.push(String::new());
    }
    lines
}

/// Suggestions applicable on `platform`: untagged ones always, tagged ones
/// only on a matching platform. With no platform, tagged entries are kept so
/// nothing actionable is hidden.
fn applicable_suggestions(
    suggestions: &[Suggestion],
    platform: Option<Platform>,
) -> Vec<Suggestion> {
    suggestions
        .iter()
        .filter(|s| match (s.platform, platform) {
            (None, _) | (_, None) => true,
            (Some(tagged), Some(current)) => tagged == current,
        })
        .cloned()
        .collect()
}
