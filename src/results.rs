//! Result formatting, summarization, and the per-session output cache.
//!
//! Raw tool output is unbounded; the model's context is not. Processing
//! turns each [`ToolResult`] into a bounded display string and model-feedback
//! string, summarizing oversized output with a head/tail excerpt. Processed
//! outputs are cached per `(tool_name, call_id)`; since call ids are unique
//! per invocation, hits only occur on duplicate processing of the same
//! result, never across distinct calls. That conservative keying is a known
//! limitation, kept deliberately.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Instant;

use serde_json::Value;
use tracing::debug;

use crate::chat::{ChatMessage, ToolResult};
use crate::config::CacheConfig;

/// Bounded, render-ready form of one tool result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedOutput {
    /// Human-oriented rendering, with a short status header.
    pub display: String,
    /// Body fed back to the model as a tool-role message.
    pub model_feedback: String,
    /// Rough token cost of `model_feedback` (chars / 4).
    pub token_estimate: u32,
    pub from_cache: bool,
    pub summarized: bool,
}

struct CacheEntry {
    value: ProcessedOutput,
    created_at: Instant,
    hit_count: u64,
}

/// Read-through cache of processed outputs. One instance per session; entry
/// lifetime spans turns. Capacity overflow evicts the single oldest entry by
/// creation time; stale entries are treated as misses on read rather than
/// swept actively.
pub struct ResultCache {
    config: CacheConfig,
    entries: RwLock<HashMap<(String, String), CacheEntry>>,
}

impl ResultCache {
    #[must_use]
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Format one result, consulting the cache first. A miss never fails —
    /// it re-processes.
    pub fn process(&self, result: &ToolResult) -> ProcessedOutput {
        let key = (result.tool_name.clone(), result.call_id.clone());

        {
            let mut entries = self
                .entries
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if let Some(entry) = entries.get_mut(&key) {
                if entry.created_at.elapsed() <= self.config.max_age {
                    entry.hit_count += 1;
                    let mut value = entry.value.clone();
                    value.from_cache = true;
                    return value;
                }
                entries.remove(&key);
            }
        }

        let value = self.render(result);
        self.insert(key, value.clone());
        value
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn render(&self, result: &ToolResult) -> ProcessedOutput {
        if let Some(error) = &result.error {
            let feedback = format!("Error executing {}: {error}", result.tool_name);
            let token_estimate = estimate_tokens(&feedback);
            return ProcessedOutput {
                display: feedback.clone(),
                model_feedback: feedback,
                token_estimate,
                from_cache: false,
                summarized: false,
            };
        }

        let raw = format_tool_output(
            &result.tool_name,
            result.result.as_ref().unwrap_or(&Value::Null),
        );
        let (body, summarized) = if should_summarize(&raw, &self.config) {
            (head_tail_summary(&raw, &self.config), true)
        } else {
            (raw, false)
        };

        let display = format!(
            "{} [{}ms]\n{body}",
            result.tool_name,
            result.duration.as_millis()
        );
        let token_estimate = estimate_tokens(&body);

        ProcessedOutput {
            display,
            model_feedback: body,
            token_estimate,
            from_cache: false,
            summarized,
        }
    }

    fn insert(&self, key: (String, String), value: ProcessedOutput) {
        let mut entries = self
            .entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if entries.len() >= self.config.capacity.max(1) {
            let oldest = entries
                .iter()
                .min_by_key(|(_, entry)| entry.created_at)
                .map(|(key, _)| key.clone());
            if let Some(oldest) = oldest {
                debug!(tool = %oldest.0, call = %oldest.1, "evicting oldest cache entry");
                entries.remove(&oldest);
            }
        }

        entries.insert(
            key,
            CacheEntry {
                value,
                created_at: Instant::now(),
                hit_count: 0,
            },
        );
    }
}

/// Render the tool-role feedback message carried back into the conversation.
#[must_use]
pub fn feedback_message(result: &ToolResult, output: &ProcessedOutput) -> ChatMessage {
    ChatMessage::tool(result.call_id.clone(), output.model_feedback.clone())
}

/// Rough token cost: one token per four characters, rounded up.
#[must_use]
pub fn estimate_tokens(text: &str) -> u32 {
    u32::try_from(text.len().div_ceil(4)).unwrap_or(u32::MAX)
}

fn should_summarize(text: &str, config: &CacheConfig) -> bool {
    text.lines().count() > config.summarize_max_lines || text.len() > config.summarize_max_chars
}

/// Head/tail excerpt: first and last `summary_edge_lines` lines around an
/// omission marker, falling back to hard character truncation when the
/// excerpt itself still exceeds the budget.
fn head_tail_summary(text: &str, config: &CacheConfig) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let edge = config.summary_edge_lines;

    let excerpt = if lines.len() > edge * 2 {
        let omitted = lines.len() - edge * 2;
        let mut parts = Vec::with_capacity(edge * 2 + 1);
        parts.extend_from_slice(&lines[..edge]);
        let marker = format!("… {omitted} lines omitted …");
        parts.push(&marker);
        let joined_head = parts.join("\n");
        let tail = lines[lines.len() - edge..].join("\n");
        format!("{joined_head}\n{tail}")
    } else {
        text.to_string()
    };

    if excerpt.len() > config.summarize_max_chars {
        hard_truncate(&excerpt, config.summarize_max_chars)
    } else {
        excerpt
    }
}

fn hard_truncate(text: &str, max_chars: usize) -> String {
    let mut cutoff = max_chars.min(text.len());
    while cutoff > 0 && !text.is_char_boundary(cutoff) {
        cutoff -= 1;
    }
    format!("{}…", &text[..cutoff])
}

/// Per-tool formatting of the raw result value.
fn format_tool_output(tool_name: &str, value: &Value) -> String {
    match tool_name {
        // File content comes through as a plain string.
        "read_file" => value
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| pretty(value)),
        "list_directory" => format_listing(value),
        "search_files" => format_search_matches(value),
        // Mutating tools return a one-line confirmation.
        "write_file" | "edit_file" => value
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| pretty(value)),
        _ => match value {
            Value::String(text) => text.clone(),
            other => pretty(other),
        },
    }
}

fn format_listing(value: &Value) -> String {
    let Some(entries) = value.as_array() else {
        return pretty(value);
    };
    entries
        .iter()
        .map(|entry| match entry {
            Value::String(name) => name.clone(),
            other => pretty(other),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_search_matches(value: &Value) -> String {
    let Some(matches) = value.as_array() else {
        return pretty(value);
    };
    if matches.is_empty() {
        return "no matches".to_string();
    }
    matches
        .iter()
        .map(|entry| {
            let path = entry.get("path").and_then(Value::as_str).unwrap_or("?");
            let line = entry.get("line").and_then(Value::as_u64).unwrap_or(0);
            let text = entry.get("text").and_then(Value::as_str).unwrap_or("");
            format!("{path}:{line}: {text}")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::{estimate_tokens, feedback_message, ProcessedOutput, ResultCache};
    use crate::chat::{ChatRole, ToolResult};
    use crate::config::CacheConfig;
    use crate::error::ToolError;

    fn success(call_id: &str, tool: &str, value: serde_json::Value) -> ToolResult {
        ToolResult::success(call_id, tool, value, Instant::now())
    }

    fn cache() -> ResultCache {
        ResultCache::new(CacheConfig::default())
    }

    #[test]
    fn file_content_is_passed_through_verbatim() {
        let result = success("call_0", "read_file", json!("fn main() {}\n"));
        let output = cache().process(&result);
        assert_eq!(output.model_feedback, "fn main() {}\n");
        assert!(!output.summarized);
        assert!(!output.from_cache);
    }

    #[test]
    fn listing_renders_one_entry_per_line() {
        let result = success("call_0", "list_directory", json!(["a.rs", "b.rs"]));
        let output = cache().process(&result);
        assert_eq!(output.model_feedback, "a.rs\nb.rs");
    }

    #[test]
    fn search_matches_render_as_grep_lines() {
        let result = success(
            "call_0",
            "search_files",
            json!([{"path": "src/lib.rs", "line": 3, "text": "pub fn run()"}]),
        );
        let output = cache().process(&result);
        assert_eq!(output.model_feedback, "src/lib.rs:3: pub fn run()");
    }

    #[test]
    fn empty_search_reports_no_matches() {
        let result = success("call_0", "search_files", json!([]));
        assert_eq!(cache().process(&result).model_feedback, "no matches");
    }

    #[test]
    fn unknown_tools_fall_back_to_json() {
        let result = success("call_0", "custom_probe", json!({"ok": true}));
        let output = cache().process(&result);
        assert!(output.model_feedback.contains("\"ok\": true"));
    }

    #[test]
    fn errors_render_the_standard_feedback_line() {
        let result = ToolResult::failure(
            "call_0",
            "bash",
            ToolError::Execution("exit status 2".to_string()),
            Instant::now(),
        );
        let output = cache().process(&result);
        assert_eq!(
            output.model_feedback,
            "Error executing bash: tool execution failed: exit status 2"
        );
    }

    #[test]
    fn long_output_gets_head_tail_summary() {
        let body: Vec<String> = (1..=100).map(|n| format!("line {n}")).collect();
        let result = success("call_0", "read_file", json!(body.join("\n")));

        let output = cache().process(&result);
        assert!(output.summarized);
        assert!(output.model_feedback.starts_with("line 1\n"));
        assert!(output.model_feedback.ends_with("line 100"));
        assert!(output.model_feedback.contains("… 80 lines omitted …"));
    }

    #[test]
    fn oversized_single_line_is_hard_truncated_with_ellipsis() {
        let config = CacheConfig {
            summarize_max_chars: 100,
            ..CacheConfig::default()
        };
        let cache = ResultCache::new(config);
        let result = success("call_0", "read_file", json!("x".repeat(500)));

        let output = cache.process(&result);
        assert!(output.summarized);
        assert!(output.model_feedback.ends_with('…'));
        assert!(output.model_feedback.chars().count() <= 101);
    }

    #[test]
    fn duplicate_processing_hits_the_cache() {
        let cache = cache();
        let result = success("call_0", "read_file", json!("content"));

        let first = cache.process(&result);
        assert!(!first.from_cache);
        let second = cache.process(&result);
        assert!(second.from_cache);
        assert_eq!(second.model_feedback, first.model_feedback);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn distinct_call_ids_never_share_entries() {
        let cache = cache();
        let first = cache.process(&success("call_0", "read_file", json!("a")));
        let second = cache.process(&success("call_1", "read_file", json!("a")));
        assert!(!first.from_cache);
        assert!(!second.from_cache);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn overflow_evicts_the_globally_oldest_entry() {
        let config = CacheConfig {
            capacity: 2,
            ..CacheConfig::default()
        };
        let cache = ResultCache::new(config);

        let _ = cache.process(&success("call_0", "read_file", json!("first")));
        std::thread::sleep(Duration::from_millis(2));
        let _ = cache.process(&success("call_1", "read_file", json!("second")));
        std::thread::sleep(Duration::from_millis(2));
        let _ = cache.process(&success("call_2", "read_file", json!("third")));

        assert_eq!(cache.len(), 2);
        // The first entry is gone; re-processing it is a miss.
        let replay = cache.process(&success("call_0", "read_file", json!("first")));
        assert!(!replay.from_cache);
    }

    #[test]
    fn stale_entries_are_misses_on_read() {
        let config = CacheConfig {
            max_age: Duration::from_millis(1),
            ..CacheConfig::default()
        };
        let cache = ResultCache::new(config);
        let result = success("call_0", "read_file", json!("content"));

        let _ = cache.process(&result);
        std::thread::sleep(Duration::from_millis(5));
        let replay = cache.process(&result);
        assert!(!replay.from_cache, "expired entry must be re-processed");
    }

    #[test]
    fn feedback_message_carries_call_correlation() {
        let result = success("call_7", "read_file", json!("body"));
        let output = ProcessedOutput {
            display: "read_file [0ms]\nbody".to_string(),
            model_feedback: "body".to_string(),
            token_estimate: 1,
            from_cache: false,
            summarized: false,
        };
        let message = feedback_message(&result, &output);
        assert_eq!(message.role, ChatRole::Tool);
        assert_eq!(message.tool_call_id.as_deref(), Some("call_7"));
        assert_eq!(message.content, "body");
    }

    #[test]
    fn token_estimate_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }
}
