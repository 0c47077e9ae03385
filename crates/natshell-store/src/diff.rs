//! Unified-diff rendering between two versions of a file's text, used by
//! `edit_file`'s preview and by `/undo` to show what a restored backup
//! changes. A plain longest-common-subsequence line diff; NatShell's files
//! are source-sized, so the O(n*m) table is not a concern in practice.

pub struct Hunk {
    pub old_start: usize,
    pub old_lines: usize,
    pub new_start: usize,
    pub new_lines: usize,
    pub lines: Vec<DiffLine>,
}

pub enum DiffLine {
    Context(String),
    Removed(String),
    Added(String),
}

/// Render a unified diff with `context` lines of padding around each
/// changed region, in the conventional `--- a\n+++ b\n@@ ... @@` form.
pub fn unified_diff(old: &str, new: &str, old_label: &str, new_label: &str, context: usize) -> String {
    let old_lines: Vec<&str> = old.lines().collect();
    let new_lines: Vec<&str> = new.lines().collect();
    let ops = diff_ops(&old_lines, &new_lines);
    let hunks = build_hunks(&ops, &old_lines, &new_lines, context);

    if hunks.is_empty() {
        return String::new();
    }

    let mut out = String::new();
    out.push_str(&format!("--- {old_label}\n"));
    out.push_str(&format!("+++ {new_label}\n"));
    for hunk in hunks {
        out.push_str(&format!(
            "@@ -{},{} +{},{} @@\n",
            hunk.old_start, hunk.old_lines, hunk.new_start, hunk.new_lines
        ));
        for line in hunk.lines {
            match line {
                DiffLine::Context(text) => out.push_str(&format!(" {text}\n")),
                DiffLine::Removed(text) => out.push_str(&format!("-{text}\n")),
                DiffLine::Added(text) => out.push_str(&format!("+{text}\n")),
            }
        }
    }
    out
}

#[derive(Clone, Copy, PartialEq)]
enum Op {
    Equal,
    Delete,
    Insert,
}

/// Classic backtracked LCS table: `table[i][j]` is the LCS length of
/// `old[..i]` and `new[..j]`.
fn diff_ops(old: &[&str], new: &[&str]) -> Vec<(Op, usize, usize)> {
    let (n, m) = (old.len(), new.len());
    let mut table = vec![vec![0u32; m + 1]; n + 1];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            table[i][j] = if old[i] == new[j] {
                table[i + 1][j + 1] + 1
            } else {
                table[i + 1][j].max(table[i][j + 1])
            };
        }
    }

    let mut ops = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if old[i] == new[j] {
            ops.push((Op::Equal, i, j));
            i += 1;
            j += 1;
        } else if table[i + 1][j] >= table[i][j + 1] {
            ops.push((Op::Delete, i, j));
            i += 1;
        } else {
            ops.push((Op::Insert, i, j));
            j += 1;
        }
    }
    while i < n {
        ops.push((Op::Delete, i, j));
        i += 1;
    }
    while j < m {
        ops.push((Op::Insert, i, j));
        j += 1;
    }
    ops
}

fn build_hunks(
    ops: &[(Op, usize, usize)],
    old_lines: &[&str],
    new_lines: &[&str],
    context: usize,
) -> Vec<Hunk> {
    let mut changed_indices: Vec<usize> = ops
        .iter()
        .enumerate()
        .filter(|(_, (op, _, _))| *op != Op::Equal)
        .map(|(idx, _)| idx)
        .collect();
    if changed_indices.is_empty() {
        return Vec::new();
    }

    // Merge change indices that are within `2*context` of each other into
    // a single hunk so the padding regions don't double up.
    let mut groups: Vec<(usize, usize)> = Vec::new();
    changed_indices.sort_unstable();
    let mut start = changed_indices[0];
    let mut end = changed_indices[0];
    for &idx in &changed_indices[1..] {
        if idx <= end + 2 * context + 1 {
            end = idx;
        } else {
            groups.push((start, end));
            start = idx;
            end = idx;
        }
    }
    groups.push((start, end));

    let mut hunks = Vec::new();
    for (start, end) in groups {
        let lo = start.saturating_sub(context);
        let hi = (end + context + 1).min(ops.len());

        let mut lines = Vec::new();
        let mut old_start = None;
        let mut new_start = None;
        let mut old_count = 0;
        let mut new_count = 0;
        for &(op, oi, ni) in &ops[lo..hi] {
            if old_start.is_none() {
                old_start = Some(oi);
                new_start = Some(ni);
            }
            match op {
                Op::Equal => {
                    lines.push(DiffLine::Context(old_lines[oi].to_string()));
                    old_count += 1;
                    new_count += 1;
                }
                Op::Delete => {
                    lines.push(DiffLine::Removed(old_lines[oi].to_string()));
                    old_count += 1;
                }
                Op::Insert => {
                    lines.push(DiffLine::Added(new_lines[ni].to_string()));
                    new_count += 1;
                }
            }
        }

        hunks.push(Hunk {
            old_start: old_start.unwrap_or(0) + 1,
            old_lines: old_count,
            new_start: new_start.unwrap_or(0) + 1,
            new_lines: new_count,
            lines,
        });
    }
    hunks
}
