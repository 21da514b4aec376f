//! Rule-based error classification with bounded in-memory history.
//!
//! [`ErrorClassifier`] converts any raised error (or plain message) plus a
//! partial diagnostic context into a [`ClassifiedError`], and keeps a bounded
//! history used for statistics and correlation queries. Classification never
//! fails: when no rule matches, the record degrades to
//! [`ErrorCode::Unknown`] with the message preserved verbatim.
//!
//! The matching logic is an ordered rule table evaluated first-match-wins,
//! with a mandatory fallback entry, so individual rules can be tested in
//! isolation from the dispatch mechanism.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

use super::catalog::{ErrorCategory, ErrorCode, Platform, Severity, Suggestion};
use crate::config::HistoryConfig;

/// Context keys stripped from any sanitized rendering of a context.
const SENSITIVE_KEYS: &[&str] = &[
    "userId",
    "user_id",
    "authorization",
    "apiKey",
    "api_key",
    "token",
    "password",
    "secret",
];

/// Partial diagnostic context attached to a classification request.
///
/// All fields are optional; unknown keys ride along in `extra` and are
/// surfaced verbatim in verbose renderings (after sanitization).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ErrorContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_status_code(mut self, status_code: u16) -> Self {
        self.status_code = Some(status_code);
        self
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Returns a copy safe to surface outside the process: `user_id` and any
    /// sensitive extra key are dropped.
    #[must_use]
    pub fn sanitized(&self) -> Self {
        let mut out = self.clone();
        out.user_id = None;
        out.extra
            .retain(|key, _| !SENSITIVE_KEYS.iter().any(|s| s.eq_ignore_ascii_case(key)));
        out
    }

    /// True when every field is absent, including extras.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// True when the context points at a network operation.
    fn is_network_ish(&self) -> bool {
        self.status_code.is_some()
            || self.request_id.is_some()
            || ["url", "host", "endpoint"]
                .iter()
                .any(|k| self.extra.contains_key(*k))
    }

    /// True when the context points at an LLM provider call.
    fn is_llm_ish(&self) -> bool {
        self.provider.is_some() || self.model.is_some()
    }
}

/// The canonical structured error record produced by classification.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifiedError {
    /// Unique per classification; never reused within a process.
    pub id: String,
    pub code: ErrorCode,
    pub category: ErrorCategory,
    pub severity: Severity,
    pub title: String,
    pub message: String,
    pub context: ErrorContext,
    pub suggestions: Vec<Suggestion>,
    /// Caller-supplied via `context.correlation_id`, else generated fresh.
    pub correlation_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_error_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub child_error_ids: Vec<String>,
    pub timestamp: DateTime<Utc>,
    pub resolved: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Error object embedded in the API envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiError {
    pub id: String,
    pub code: ErrorCode,
    pub title: String,
    pub message: String,
    pub suggestions: Vec<Suggestion>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<ErrorContext>,
}

/// Stable JSON error envelope returned at the HTTP boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub error: ApiError,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

/// Inclusive time window for statistics queries.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Code frequency entry in [`ErrorStatistics::most_common_errors`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorFrequency {
    pub code: ErrorCode,
    pub count: usize,
}

/// Aggregate view over the (optionally time-filtered) history.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorStatistics {
    pub total_errors: usize,
    pub errors_by_category: BTreeMap<String, usize>,
    pub errors_by_severity: BTreeMap<String, usize>,
    /// Ranked by frequency descending; ties broken by first-seen order.
    pub most_common_errors: Vec<ErrorFrequency>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_range: Option<TimeRange>,
}

/// One step of a correlation timeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineEntry {
    pub timestamp: DateTime<Utc>,
    pub error_id: String,
    pub code: ErrorCode,
    pub severity: Severity,
}

/// Read-only view over all errors sharing one correlation id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorCorrelation {
    pub correlation_id: String,
    pub related_errors: Vec<ClassifiedError>,
    /// Sorted non-decreasing by timestamp.
    pub timeline: Vec<TimelineEntry>,
    /// Highest severity wins; ties go to the earliest timestamp.
    pub root_cause: ClassifiedError,
}

/// One entry of the ordered classification table.
///
/// `matches` receives the lowercased message; `resolve` picks the concrete
/// code and severity (the HTTP rule varies both by status code).
struct ClassificationRule {
    name: &'static str,
    matches: fn(&str, &ErrorContext) -> bool,
    resolve: fn(&str, &ErrorContext) -> (ErrorCode, Severity),
}

fn fixed(code: ErrorCode) -> (ErrorCode, Severity) {
    (code, code.default_severity())
}

fn resolve_http(_msg: &str, context: &ErrorContext) -> (ErrorCode, Severity) {
    match context.status_code {
        Some(404) => (ErrorCode::HttpNotFound, Severity::Medium),
        Some(code) if (400..=499).contains(&code) => (ErrorCode::HttpBadRequest, Severity::Medium),
        Some(code) if (500..=599).contains(&code) => (ErrorCode::HttpServerError, Severity::High),
        _ => (ErrorCode::HttpRequestFailed, Severity::Medium),
    }
}

/// The ordered rule table. First match wins; order is part of the contract
/// (path rules shadow network rules, which shadow HTTP status mapping).
const RULES: &[ClassificationRule] = &[
    ClassificationRule {
        name: "permission-denied-with-path",
        matches: |msg, ctx| {
            ctx.path.is_some()
                && (msg.contains("permission denied")
                    || msg.contains("access is denied")
                    || msg.contains("eacces"))
        },
        resolve: |_, _| fixed(ErrorCode::PermissionReadDenied),
    },
    ClassificationRule {
        name: "not-found-with-path",
        matches: |msg, ctx| {
            ctx.path.is_some()
                && (msg.contains("not found")
                    || msg.contains("no such file")
                    || msg.contains("enoent"))
        },
        resolve: |_, _| fixed(ErrorCode::PathNotFound),
    },
    ClassificationRule {
        name: "not-a-directory",
        matches: |msg, ctx| {
            ctx.path.is_some() && (msg.contains("not a directory") || msg.contains("enotdir"))
        },
        resolve: |_, _| fixed(ErrorCode::PathNotDirectory),
    },
    ClassificationRule {
        name: "network-timeout",
        matches: |msg, ctx| {
            ctx.is_network_ish() && (msg.contains("timeout") || msg.contains("timed out"))
        },
        resolve: |_, _| fixed(ErrorCode::NetworkTimeout),
    },
    ClassificationRule {
        name: "connection-refused",
        matches: |msg, _| msg.contains("connection refused") || msg.contains("econnrefused"),
        resolve: |_, _| fixed(ErrorCode::NetworkConnectionRefused),
    },
    ClassificationRule {
        name: "network-unreachable",
        matches: |msg, _| msg.contains("network is unreachable") || msg.contains("enetunreach"),
        resolve: |_, _| fixed(ErrorCode::NetworkUnreachable),
    },
    ClassificationRule {
        name: "http-status",
        matches: |_, ctx| ctx.status_code.is_some(),
        resolve: resolve_http,
    },
    ClassificationRule {
        name: "llm-quota-exceeded",
        matches: |msg, ctx| {
            ctx.is_llm_ish()
                && (msg.contains("quota") || msg.contains("billing") || msg.contains("spending"))
        },
        resolve: |_, _| fixed(ErrorCode::LlmProviderQuotaExceeded),
    },
    ClassificationRule {
        name: "llm-rate-limited",
        matches: |msg, ctx| {
            ctx.is_llm_ish() && (msg.contains("rate limit") || msg.contains("too many requests"))
        },
        resolve: |_, _| fixed(ErrorCode::LlmRateLimited),
    },
    ClassificationRule {
        name: "llm-auth-failed",
        matches: |msg, ctx| {
            ctx.is_llm_ish()
                && (msg.contains("auth")
                    || msg.contains("api key")
                    || msg.contains("unauthorized")
                    || msg.contains("invalid key"))
        },
        resolve: |_, _| fixed(ErrorCode::LlmProviderAuthenticationFailed),
    },
    ClassificationRule {
        name: "llm-unavailable",
        matches: |msg, ctx| {
            ctx.is_llm_ish() && (msg.contains("unavailable") || msg.contains("overloaded"))
        },
        resolve: |_, _| fixed(ErrorCode::LlmProviderUnavailable),
    },
    ClassificationRule {
        name: "analysis-cancelled",
        matches: |msg, _| msg.contains("cancelled") || msg.contains("canceled"),
        resolve: |_, _| fixed(ErrorCode::AnalysisCancelled),
    },
];

/// Resolves a message + context to a code and severity. Never fails; the
/// fallback is [`ErrorCode::Unknown`].
fn match_rules(message: &str, context: &ErrorContext) -> (ErrorCode, Severity, &'static str) {
    let lowered = message.to_lowercase();
    for rule in RULES {
        if (rule.matches)(&lowered, context) {
            let (code, severity) = (rule.resolve)(&lowered, context);
            return (code, severity, rule.name);
        }
    }
    (ErrorCode::Unknown, Severity::Medium, "fallback")
}

/// Bounded classification history.
///
/// Records live in a deque with monotonically increasing sequence numbers;
/// secondary indices map ids and correlation ids to sequences so eviction of
/// the oldest record is O(1) and never leaves dangling index entries.
#[derive(Debug, Default)]
struct HistoryInner {
    records: VecDeque<ClassifiedError>,
    /// Sequence number of `records.front()`.
    base: u64,
    next_seq: u64,
    by_id: HashMap<String, u64>,
    by_correlation: HashMap<String, Vec<u64>>,
}

impl HistoryInner {
    fn offset(&self, seq: u64) -> Option<usize> {
        (seq >= self.base && seq < self.next_seq).then_some((seq - self.base) as usize)
    }

    fn get_by_id(&self, id: &str) -> Option<&ClassifiedError> {
        let seq = *self.by_id.get(id)?;
        self.records.get(self.offset(seq)?)
    }

    fn get_mut_by_id(&mut self, id: &str) -> Option<&mut ClassifiedError> {
        let seq = *self.by_id.get(id)?;
        let offset = self.offset(seq)?;
        self.records.get_mut(offset)
    }

    fn push(&mut self, record: ClassifiedError, max_entries: usize) {
        if max_entries > 0 {
            while self.records.len() >= max_entries {
                self.evict_oldest();
            }
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.by_id.insert(record.id.clone(), seq);
        self.by_correlation
            .entry(record.correlation_id.clone())
            .or_default()
            .push(seq);
        self.records.push_back(record);
    }

    fn evict_oldest(&mut self) {
        let Some(evicted) = self.records.pop_front() else {
            return;
        };
        let seq = self.base;
        self.base += 1;
        self.by_id.remove(&evicted.id);
        if let Some(seqs) = self.by_correlation.get_mut(&evicted.correlation_id) {
            seqs.retain(|s| *s != seq);
            if seqs.is_empty() {
                self.by_correlation.remove(&evicted.correlation_id);
            }
        }
    }

    fn clear(&mut self) {
        self.records.clear();
        self.by_id.clear();
        self.by_correlation.clear();
        self.base = self.next_seq;
    }
}

/// Converts raw errors into [`ClassifiedError`] records and answers
/// statistics/correlation queries over its bounded history.
///
/// Construct one per process and pass it explicitly (e.g., through server
/// state); there is no global instance.
pub struct ErrorClassifier {
    history: Mutex<HistoryInner>,
    max_entries: usize,
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new(HistoryConfig::default())
    }
}

impl ErrorClassifier {
    pub fn new(config: HistoryConfig) -> Self {
        Self {
            history: Mutex::new(HistoryInner::default()),
            max_entries: config.max_entries,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HistoryInner> {
        // A poisoned lock only means a panic elsewhere mid-update; the
        // history is append-only so the data is still usable.
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Classify an error value. Delegates to [`Self::classify_message`] with
    /// the error's display rendering.
    pub fn classify_error(
        &self,
        error: &(dyn std::error::Error + '_),
        context: ErrorContext,
        parent_error_id: Option<&str>,
    ) -> ClassifiedError {
        self.classify_message(error.to_string(), context, parent_error_id)
    }

    /// Classify a raw message. Never fails; unmatched input degrades to
    /// [`ErrorCode::Unknown`] with the message preserved verbatim.
    pub fn classify_message(
        &self,
        message: impl Into<String>,
        context: ErrorContext,
        parent_error_id: Option<&str>,
    ) -> ClassifiedError {
        let message = message.into();
        let (code, severity, rule) = match_rules(&message, &context);
        tracing::debug!(code = code.wire_name(), rule, "classified error");

        let correlation_id = context
            .correlation_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let record = ClassifiedError {
            id: Uuid::new_v4().to_string(),
            code,
            category: code.category(),
            severity,
            title: code.title().to_string(),
            message,
            context,
            suggestions: code.suggestions(),
            correlation_id,
            parent_error_id: parent_error_id.map(str::to_string),
            child_error_ids: Vec::new(),
            timestamp: Utc::now(),
            resolved: false,
            resolution: None,
            resolved_at: None,
        };

        let mut history = self.lock();
        if let Some(parent_id) = parent_error_id
            && let Some(parent) = history.get_mut_by_id(parent_id)
        {
            parent.child_error_ids.push(record.id.clone());
        }
        history.push(record.clone(), self.max_entries);
        record
    }

    /// Build the stable API envelope for a classified error.
    ///
    /// `include_context = false` omits the context entirely; `true` includes
    /// a sanitized copy (never `userId`). `path` and `requestId` are promoted
    /// to the envelope top level when present.
    pub fn create_error_response(
        &self,
        error: &ClassifiedError,
        include_context: bool,
    ) -> ErrorResponse {
        let context = include_context.then(|| error.context.sanitized());
        ErrorResponse {
            error: ApiError {
                id: error.id.clone(),
                code: error.code,
                title: error.title.clone(),
                message: error.message.clone(),
                suggestions: error.suggestions.clone(),
                context,
            },
            path: error.context.path.clone(),
            request_id: error.context.request_id.clone(),
        }
    }

    /// Aggregate statistics over the history, optionally restricted to an
    /// inclusive time range.
    pub fn get_error_statistics(&self, time_range: Option<TimeRange>) -> ErrorStatistics {
        let history = self.lock();
        let in_range = |e: &ClassifiedError| match &time_range {
            Some(range) => e.timestamp >= range.start && e.timestamp <= range.end,
            None => true,
        };

        let mut errors_by_category: BTreeMap<String, usize> = BTreeMap::new();
        let mut errors_by_severity: BTreeMap<String, usize> = BTreeMap::new();
        // code -> (count, first-seen position) for stable tie-breaking
        let mut frequency: HashMap<ErrorCode, (usize, usize)> = HashMap::new();
        let mut total_errors = 0usize;

        for (position, error) in history.records.iter().enumerate() {
            if !in_range(error) {
                continue;
            }
            total_errors += 1;
            *errors_by_category
                .entry(error.category.wire_name().to_string())
                .or_default() += 1;
            *errors_by_severity
                .entry(error.severity.name().to_string())
                .or_default() += 1;
            frequency
                .entry(error.code)
                .and_modify(|(count, _)| *count += 1)
                .or_insert((1, position));
        }

        let mut ranked: Vec<(ErrorCode, usize, usize)> = frequency
            .into_iter()
            .map(|(code, (count, first_seen))| (code, count, first_seen))
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));

        ErrorStatistics {
            total_errors,
            errors_by_category,
            errors_by_severity,
            most_common_errors: ranked
                .into_iter()
                .map(|(code, count, _)| ErrorFrequency { code, count })
                .collect(),
            time_range,
        }
    }

    /// All errors sharing `correlation_id`, with an ascending timeline and a
    /// computed root cause. `None` when nothing matches.
    pub fn get_correlated_errors(&self, correlation_id: &str) -> Option<ErrorCorrelation> {
        let history = self.lock();
        let seqs = history.by_correlation.get(correlation_id)?;
        let mut related_errors: Vec<ClassifiedError> = seqs
            .iter()
            .filter_map(|seq| history.offset(*seq))
            .filter_map(|offset| history.records.get(offset))
            .cloned()
            .collect();
        if related_errors.is_empty() {
            return None;
        }
        related_errors.sort_by_key(|e| e.timestamp);

        let timeline = related_errors
            .iter()
            .map(|e| TimelineEntry {
                timestamp: e.timestamp,
                error_id: e.id.clone(),
                code: e.code,
                severity: e.severity,
            })
            .collect();

        // Highest severity wins; ties go to the earliest timestamp. The list
        // is already time-ascending, so max_by_key on severity keeps the
        // first (earliest) among equals.
        let root_cause = related_errors
            .iter()
            .rev()
            .max_by_key(|e| e.severity)
            .cloned()?;

        Some(ErrorCorrelation {
            correlation_id: correlation_id.to_string(),
            related_errors,
            timeline,
            root_cause,
        })
    }

    /// Mark an error resolved. Returns `false` (with no side effects) when no
    /// record with that id exists. Re-resolution overwrites.
    pub fn resolve_error(&self, id: &str, resolution: impl Into<String>) -> bool {
        let mut history = self.lock();
        match history.get_mut_by_id(id) {
            Some(record) => {
                record.resolved = true;
                record.resolution = Some(resolution.into());
                record.resolved_at = Some(Utc::now());
                true
            }
            None => false,
        }
    }

    /// Fetch a record by id.
    pub fn get_error(&self, id: &str) -> Option<ClassifiedError> {
        self.lock().get_by_id(id).cloned()
    }

    /// Empty the history. Used for test isolation and operator resets.
    pub fn clear_history(&self) {
        self.lock().clear();
    }

    pub fn history_len(&self) -> usize {
        self.lock().records.len()
    }
}
