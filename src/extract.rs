//! Inline tool-call extraction and the structured-output protocol.
//!
//! Some providers cannot emit native structured tool calls and instead embed
//! JSON objects shaped `{"tool": "<name>", "arguments": {...}}` directly in
//! narrative text. This module recognizes those spans, strips them from the
//! narrative, and materializes them as [`ToolCall`]s.
//!
//! The pattern is deliberately non-recursive: `arguments` may not contain
//! nested braces. Single-level argument objects are the documented wire
//! format; do not widen the pattern to a full JSON scanner.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::chat::{ParsedTurn, ToolCall};

/// Literal separator between independent logical messages in one model turn.
pub const SEGMENT_DELIMITER: &str = "\n----\n";

fn tool_call_regex() -> &'static Regex {
    static CACHED: OnceLock<Regex> = OnceLock::new();
    CACHED.get_or_init(|| {
        Regex::new(r#"\{\s*"tool"\s*:\s*"([^"]+)"\s*,\s*"arguments"\s*:\s*(\{[^{}]*\})\s*\}"#)
            .expect("tool-call regex must compile")
    })
}

/// Sequential id assignment for protocols that carry no call ids.
#[derive(Debug, Default)]
pub(crate) struct CallIdAllocator {
    next: usize,
}

impl CallIdAllocator {
    pub(crate) fn assign(&mut self) -> (String, usize) {
        let ordinal = self.next;
        self.next += 1;
        (format!("call_{ordinal}"), ordinal)
    }
}

/// One-shot extraction over a complete model turn.
///
/// Splits on [`SEGMENT_DELIMITER`] and classifies each segment
/// independently: a segment whose content was entirely tool-call JSON
/// contributes calls only, every other segment keeps its (stripped)
/// narrative. No segment is dropped.
#[must_use]
pub fn extract_tool_calls(text: &str) -> ParsedTurn {
    let mut ids = CallIdAllocator::default();
    extract_turn(text, &mut ids)
}

pub(crate) fn extract_turn(text: &str, ids: &mut CallIdAllocator) -> ParsedTurn {
    let mut clean_segments = Vec::new();
    let mut tool_calls = Vec::new();

    for segment in text.split(SEGMENT_DELIMITER) {
        let (contribution, mut segment_calls) = extract_segment(segment, ids);
        tool_calls.append(&mut segment_calls);
        if let Some(clean) = contribution {
            clean_segments.push(clean);
        }
    }

    ParsedTurn {
        clean_text: clean_segments.join(SEGMENT_DELIMITER),
        tool_calls,
    }
}

/// Classify one delimiter-separated segment: all-tool-call segments
/// contribute no narrative, all-text segments are kept verbatim, mixed
/// segments keep their stripped remainder.
pub(crate) fn extract_segment(
    segment: &str,
    ids: &mut CallIdAllocator,
) -> (Option<String>, Vec<ToolCall>) {
    let (clean, calls) = extract_span_pass(segment, ids);
    if calls.is_empty() {
        // Kept byte-identical so no-op extraction reproduces its input.
        return (Some(segment.to_string()), calls);
    }
    if clean.trim().is_empty() {
        (None, calls)
    } else {
        (Some(clean), calls)
    }
}

/// Single pattern pass over `text`: valid spans become calls and are removed,
/// malformed spans stay in the narrative untouched.
pub(crate) fn extract_span_pass(text: &str, ids: &mut CallIdAllocator) -> (String, Vec<ToolCall>) {
    let mut clean = String::with_capacity(text.len());
    let mut calls = Vec::new();
    let mut last_end = 0;

    for captures in tool_call_regex().captures_iter(text) {
        let Some(whole) = captures.get(0) else {
            continue;
        };
        let Some(name) = captures.get(1) else {
            continue;
        };
        let Some(arguments) = captures.get(2) else {
            continue;
        };

        if serde_json::from_str::<Value>(arguments.as_str()).is_err() {
            continue;
        }

        clean.push_str(&text[last_end..whole.start()]);
        last_end = whole.end();

        let (id, source_index) = ids.assign();
        calls.push(ToolCall::new(id, name.as_str(), arguments.as_str(), source_index));
    }

    clean.push_str(&text[last_end..]);
    (clean, calls)
}

/// Whether `tail` could still grow into a tool-call span as more chunks
/// arrive. Used by the assembler to hold back the undecidable suffix of its
/// buffer instead of emitting it as narrative.
pub(crate) fn holdback_index(tail: &str) -> Option<usize> {
    tail.match_indices('{')
        .map(|(position, _)| position)
        .find(|&position| could_extend_into_call(&tail[position..]))
}

/// Prefix-viability test against the inline pattern. Exhausting the input
/// mid-pattern means "still viable"; any divergence means the span can never
/// match, no matter what arrives next.
fn could_extend_into_call(s: &str) -> bool {
    let rest = s.as_bytes();

    let rest = match eat_literal(rest, "{") {
        Ok(rest) => eat_ws(rest),
        Err(viable) => return viable,
    };
    let rest = match eat_literal(rest, "\"tool\"") {
        Ok(rest) => eat_ws(rest),
        Err(viable) => return viable,
    };
    let rest = match eat_literal(rest, ":") {
        Ok(rest) => eat_ws(rest),
        Err(viable) => return viable,
    };
    let rest = match eat_literal(rest, "\"") {
        Ok(rest) => rest,
        Err(viable) => return viable,
    };

    // Tool name: one or more non-quote bytes.
    let Some((&first, _)) = rest.split_first() else {
        return true;
    };
    if first == b'"' {
        return false;
    }
    let Some(quote) = rest.iter().position(|&b| b == b'"') else {
        return true;
    };
    let rest = eat_ws(&rest[quote + 1..]);

    let rest = match eat_literal(rest, ",") {
        Ok(rest) => eat_ws(rest),
        Err(viable) => return viable,
    };
    let rest = match eat_literal(rest, "\"arguments\"") {
        Ok(rest) => eat_ws(rest),
        Err(viable) => return viable,
    };
    let rest = match eat_literal(rest, ":") {
        Ok(rest) => eat_ws(rest),
        Err(viable) => return viable,
    };
    let rest = match eat_literal(rest, "{") {
        Ok(rest) => rest,
        Err(viable) => return viable,
    };

    // Argument body: nested braces can never match the pattern.
    let mut index = 0;
    loop {
        match rest.get(index) {
            None => return true,
            Some(b'{') => return false,
            Some(b'}') => break,
            Some(_) => index += 1,
        }
    }
    let rest = eat_ws(&rest[index + 1..]);

    match rest.first() {
        None => true,
        Some(b'}') => true,
        Some(_) => false,
    }
}

fn eat_literal<'a>(mut rest: &'a [u8], literal: &str) -> Result<&'a [u8], bool> {
    for expected in literal.bytes() {
        match rest.split_first() {
            None => return Err(true),
            Some((&byte, tail)) if byte == expected => rest = tail,
            Some(_) => return Err(false),
        }
    }
    Ok(rest)
}

fn eat_ws(mut rest: &[u8]) -> &[u8] {
    while let Some((&byte, tail)) = rest.split_first() {
        if byte.is_ascii_whitespace() {
            rest = tail;
        } else {
            break;
        }
    }
    rest
}

// ── Structured-output protocol ─────────────────────────────────────────

/// Discriminator for a schema-constrained model response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StructuredResponseType {
    Text,
    ToolCall,
    Both,
}

/// The schema-constrained response shape used when the provider supports
/// structured generation instead of free text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredResponse {
    pub response_type: StructuredResponseType,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub tool_calls: Vec<StructuredToolCall>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredToolCall {
    pub tool: String,
    pub arguments: Value,
}

/// Parse one complete structured response into a [`ParsedTurn`].
pub fn parse_structured_response(raw: &str) -> Result<ParsedTurn, serde_json::Error> {
    let response: StructuredResponse = serde_json::from_str(raw)?;
    let mut ids = CallIdAllocator::default();
    let mut turn = ParsedTurn::default();

    if matches!(
        response.response_type,
        StructuredResponseType::Text | StructuredResponseType::Both
    ) {
        turn.clean_text = response.text.unwrap_or_default();
    }

    if matches!(
        response.response_type,
        StructuredResponseType::ToolCall | StructuredResponseType::Both
    ) {
        for call in response.tool_calls {
            let (id, source_index) = ids.assign();
            turn.tool_calls
                .push(ToolCall::new(id, call.tool, call.arguments.to_string(), source_index));
        }
    }

    Ok(turn)
}
