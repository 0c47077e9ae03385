//! Byte-count output truncation, applied uniformly to every tool's string
//! output before it re-enters the conversation. Grounded on
//! `deepseek_agent::tools_runtime::output::truncate_tool_output`,
//! generalized from that module's per-tool line-count schemes to one
//! byte-count scheme shared by all eight tools.

pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 4000;
pub const MAX_OUTPUT_BYTES_CEILING: usize = 65536;

const HEAD_BYTES: usize = 2000;
const TAIL_BYTES: usize = 1500;

/// Truncate `output` to at most `max_bytes`, clamped to the documented
/// ceiling. Below the cap, `output` passes through unchanged. Above it,
/// keeps the first [`HEAD_BYTES`] and last [`TAIL_BYTES`] chars with a
/// marker naming how many bytes were dropped in between.
pub fn truncate_tool_output(output: &str, max_bytes: usize) -> String {
    let max_bytes = max_bytes.min(MAX_OUTPUT_BYTES_CEILING);
    if output.len() <= max_bytes {
        return output.to_string();
    }

    let head_end = char_boundary_at_most(output, HEAD_BYTES);
    let tail_start_from_end = char_boundary_at_least(output, output.len().saturating_sub(TAIL_BYTES));

    let head = &output[..head_end];
    let tail = &output[tail_start_from_end..];
    let omitted = output.len() - head.len() - tail.len();

    format!("{head}\n… [truncated {omitted} bytes] …\n{tail}")
}

fn char_boundary_at_most(s: &str, idx: usize) -> usize {
    let mut idx = idx.min(s.len());
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn char_boundary_at_least(s: &str, idx: usize) -> usize {
    let mut idx = idx.min(s.len());
    while idx < s.len() && !s.is_char_boundary(idx) {
        idx += 1;
    }
    idx
}
