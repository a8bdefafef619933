//! Incremental assembly of one streamed model turn.
//!
//! The assembler consumes provider deltas one chunk at a time and separates
//! narrative text from embedded tool invocations. Two output protocols are
//! supported and auto-selected: providers that emit native structured
//! tool-call fragments, and providers that embed inline JSON tool calls in
//! ordinary text. Selection happens on the first delta carrying native
//! fragments; until then chunks are treated as inline-protocol text.
//!
//! A tool call is emitted exactly once, at the instant it first becomes
//! complete, no matter how the stream is chunked. Inline-protocol text that
//! could still grow into a tool-call span is held back until the span is
//! settled one way or the other.

use serde_json::Value;

use crate::chat::{ParsedTurn, PartialToolCall, StreamDelta, ToolCall};
use crate::extract::{self, CallIdAllocator, SEGMENT_DELIMITER};

/// Per-chunk output of [`StreamAssembler::process`]: narrative safe to show
/// immediately, plus any tool calls that completed on this chunk.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepOutput {
    pub text: String,
    pub completed: Vec<ToolCall>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Protocol {
    Undetected,
    Native,
    Inline,
}

#[derive(Debug, Default)]
struct ToolCallBuilder {
    name: String,
    arguments: String,
    emitted: bool,
}

impl ToolCallBuilder {
    fn apply(&mut self, fragment: &PartialToolCall) {
        if let Some(name) = &fragment.name {
            // The name is set once; later fragments never replace it.
            if self.name.is_empty() {
                self.name.push_str(name);
            }
        }
        if let Some(arguments) = &fragment.arguments_fragment {
            self.arguments.push_str(arguments);
        }
    }
}

/// Streaming turn assembler. One instance per model turn.
#[derive(Debug)]
pub struct StreamAssembler {
    protocol: Protocol,
    builders: Vec<ToolCallBuilder>,
    /// Inline-protocol text not yet released as narrative.
    pending: String,
    clean_text: String,
    calls: Vec<ToolCall>,
    ids: CallIdAllocator,
    pending_delimiter: bool,
    released_any_text: bool,
    finished: bool,
}

impl Default for StreamAssembler {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamAssembler {
    #[must_use]
    pub fn new() -> Self {
        Self {
            protocol: Protocol::Undetected,
            builders: Vec::new(),
            pending: String::new(),
            clean_text: String::new(),
            calls: Vec::new(),
            ids: CallIdAllocator::default(),
            pending_delimiter: false,
            released_any_text: false,
            finished: false,
        }
    }

    /// Feed one stream chunk; returns narrative to show plus calls that
    /// completed on this chunk.
    pub fn process(&mut self, delta: &StreamDelta) -> StepOutput {
        let mut output = StepOutput::default();

        if !delta.tool_calls.is_empty() && self.protocol != Protocol::Native {
            self.switch_to_native(&mut output);
        }

        if let Some(content) = &delta.content {
            match self.protocol {
                Protocol::Native => self.emit_text(content, &mut output.text),
                Protocol::Undetected | Protocol::Inline => {
                    self.protocol = Protocol::Inline;
                    self.pending.push_str(content);
                    self.release_inline(false, &mut output);
                }
            }
        }

        for fragment in &delta.tool_calls {
            self.apply_native_fragment(fragment);
        }
        if !delta.tool_calls.is_empty() {
            self.drain_completed_native(false, &mut output);
        }

        if delta.finish_reason.is_some() {
            self.finish(&mut output);
        }

        output
    }

    /// Consume the assembler at end of stream, flushing anything still held.
    #[must_use]
    pub fn finalize(mut self) -> ParsedTurn {
        if !self.finished {
            let mut output = StepOutput::default();
            self.finish(&mut output);
        }
        ParsedTurn {
            clean_text: self.clean_text,
            tool_calls: self.calls,
        }
    }

    fn finish(&mut self, output: &mut StepOutput) {
        if self.finished {
            return;
        }
        self.finished = true;
        match self.protocol {
            Protocol::Native => self.drain_completed_native(true, output),
            Protocol::Undetected | Protocol::Inline => self.release_inline(true, output),
        }
    }

    fn switch_to_native(&mut self, output: &mut StepOutput) {
        // Native fragments mean the provider does not speak the inline
        // protocol; buffered text is plain narrative.
        let pending = std::mem::take(&mut self.pending);
        self.emit_text(&pending, &mut output.text);
        self.protocol = Protocol::Native;
    }

    fn apply_native_fragment(&mut self, fragment: &PartialToolCall) {
        while self.builders.len() <= fragment.index {
            self.builders.push(ToolCallBuilder::default());
        }
        self.builders[fragment.index].apply(fragment);
    }

    /// Emit every builder that has just become complete. A forced sweep at
    /// finish additionally treats missing arguments as the empty object, for
    /// providers that never send fragments for zero-argument calls.
    fn drain_completed_native(&mut self, force: bool, output: &mut StepOutput) {
        for (index, builder) in self.builders.iter_mut().enumerate() {
            if builder.emitted || builder.name.is_empty() {
                continue;
            }

            let arguments = if force && builder.arguments.trim().is_empty() {
                "{}"
            } else {
                builder.arguments.as_str()
            };
            if serde_json::from_str::<Value>(arguments).is_err() {
                continue;
            }

            builder.emitted = true;
            let call = ToolCall::new(
                format!("call_{index}"),
                builder.name.clone(),
                arguments.to_string(),
                index,
            );
            self.calls.push(call.clone());
            output.completed.push(call);
        }
    }

    /// Run extraction over the accumulated inline buffer, releasing settled
    /// narrative and newly-completed calls. When not finalizing, the suffix
    /// that could still grow into a tool-call span stays buffered.
    fn release_inline(&mut self, finalizing: bool, output: &mut StepOutput) {
        // Closed segments are classified as a whole.
        while let Some(split) = self.pending.find(SEGMENT_DELIMITER) {
            let segment: String = self.pending[..split].to_string();
            self.pending.drain(..split + SEGMENT_DELIMITER.len());

            let (contribution, calls) = extract::extract_segment(&segment, &mut self.ids);
            self.record_inline_calls(calls, output);
            if let Some(text) = contribution {
                self.emit_text(&text, &mut output.text);
            }
            self.pending_delimiter = self.released_any_text;
        }

        // Open tail: extract what is already complete, hold back what could
        // still extend. The buffer shrinks to the undecided suffix, which
        // bounds its growth.
        let tail = std::mem::take(&mut self.pending);
        let (clean, calls) = extract::extract_span_pass(&tail, &mut self.ids);
        self.record_inline_calls(calls, output);

        let hold_from = if finalizing {
            clean.len()
        } else {
            let span_hold = extract::holdback_index(&clean).unwrap_or(clean.len());
            span_hold.min(clean.len() - Self::delimiter_prefix_len(&clean))
        };
        self.emit_text(&clean[..hold_from], &mut output.text);
        self.pending = clean[hold_from..].to_string();
    }

    fn record_inline_calls(&mut self, calls: Vec<ToolCall>, output: &mut StepOutput) {
        for call in calls {
            self.calls.push(call.clone());
            output.completed.push(call);
        }
    }

    /// Whether a suffix of `text` is a proper prefix of the segment
    /// delimiter; such a suffix must stay buffered until disambiguated.
    fn delimiter_prefix_len(text: &str) -> usize {
        (1..SEGMENT_DELIMITER.len())
            .rev()
            .find(|&len| text.ends_with(&SEGMENT_DELIMITER[..len]))
            .unwrap_or(0)
    }

    fn emit_text(&mut self, text: &str, out: &mut String) {
        if text.is_empty() {
            return;
        }
        if self.pending_delimiter {
            self.pending_delimiter = false;
            self.clean_text.push_str(SEGMENT_DELIMITER);
            out.push_str(SEGMENT_DELIMITER);
        }
        self.clean_text.push_str(text);
        out.push_str(text);
        self.released_any_text = true;
    }
}
