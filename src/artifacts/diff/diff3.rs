//! Three-way line merge
//!
//! Merges two sets of edits against a common base. The base is diffed
//! against each side; runs where one side equals the base (or both sides
//! agree) merge cleanly, anything else becomes a conflict chunk rendered
//! with `<<<<<<<` / `=======` / `>>>>>>>` markers.

use crate::artifacts::diff::myers;
use crate::artifacts::diff::myers::EditKind;
use std::collections::HashMap;

/// One merged region of the output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Chunk {
    Clean {
        lines: Vec<String>,
    },
    Conflict {
        base: Vec<String>,
        left: Vec<String>,
        right: Vec<String>,
    },
}

/// The outcome of a three-way merge
#[derive(Debug, Clone)]
pub struct MergeResult {
    chunks: Vec<Chunk>,
}

impl MergeResult {
    pub fn is_clean(&self) -> bool {
        self.chunks
            .iter()
            .all(|chunk| matches!(chunk, Chunk::Clean { .. }))
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    /// Render the merged file, marking conflicts with the given labels
    pub fn to_text(&self, left_name: &str, right_name: &str) -> String {
        let mut output = String::new();

        for chunk in &self.chunks {
            match chunk {
                Chunk::Clean { lines } => {
                    for line in lines {
                        output.push_str(line);
                    }
                }
                Chunk::Conflict { left, right, .. } => {
                    separate_line(&mut output);
                    output.push_str(&format!("<<<<<<< {}\n", left_name));
                    for line in left {
                        output.push_str(line);
                    }
                    separate_line(&mut output);
                    output.push_str("=======\n");
                    for line in right {
                        output.push_str(line);
                    }
                    separate_line(&mut output);
                    output.push_str(&format!(">>>>>>> {}\n", right_name));
                }
            }
        }

        output
    }
}

/// Terminate a dangling final line before writing a marker
fn separate_line(output: &mut String) {
    if !output.is_empty() && !output.ends_with('\n') {
        output.push('\n');
    }
}

/// Merge `left` and `right` against their common `base`
pub fn merge(base: &str, left: &str, right: &str) -> MergeResult {
    Diff3::new(base, left, right).merge()
}

struct Diff3 {
    o: Vec<String>,
    a: Vec<String>,
    b: Vec<String>,
    /// Base line number -> left line number for unchanged lines
    match_a: HashMap<usize, usize>,
    /// Base line number -> right line number for unchanged lines
    match_b: HashMap<usize, usize>,
    /// Lines consumed so far on each side
    line_o: usize,
    line_a: usize,
    line_b: usize,
    chunks: Vec<Chunk>,
}

impl Diff3 {
    fn new(base: &str, left: &str, right: &str) -> Self {
        Diff3 {
            o: split(base),
            a: split(left),
            b: split(right),
            match_a: match_set(base, left),
            match_b: match_set(base, right),
            line_o: 0,
            line_a: 0,
            line_b: 0,
            chunks: Vec::new(),
        }
    }

    fn merge(mut self) -> MergeResult {
        loop {
            match self.find_next_mismatch() {
                Some(1) => {
                    let (o, a, b) = self.find_next_match();
                    match (a, b) {
                        (Some(a), Some(b)) => self.emit_chunk(o, a, b),
                        _ => {
                            self.emit_final_chunk();
                            break;
                        }
                    }
                }
                Some(i) => self.emit_chunk(self.line_o + i, self.line_a + i, self.line_b + i),
                None => {
                    self.emit_final_chunk();
                    break;
                }
            }
        }

        MergeResult {
            chunks: self.chunks,
        }
    }

    fn find_next_mismatch(&self) -> Option<usize> {
        let mut i = 1;
        while self.in_bounds(i)
            && self.matches(&self.match_a, self.line_a, i)
            && self.matches(&self.match_b, self.line_b, i)
        {
            i += 1;
        }

        if self.in_bounds(i) { Some(i) } else { None }
    }

    fn in_bounds(&self, i: usize) -> bool {
        self.line_o + i <= self.o.len()
            || self.line_a + i <= self.a.len()
            || self.line_b + i <= self.b.len()
    }

    fn matches(&self, matches: &HashMap<usize, usize>, offset: usize, i: usize) -> bool {
        matches.get(&(self.line_o + i)) == Some(&(offset + i))
    }

    /// Find the next base line that survives unchanged on both sides
    fn find_next_match(&self) -> (usize, Option<usize>, Option<usize>) {
        let mut o = self.line_o + 1;
        while o <= self.o.len()
            && !(self.match_a.contains_key(&o) && self.match_b.contains_key(&o))
        {
            o += 1;
        }

        (
            o,
            self.match_a.get(&o).copied(),
            self.match_b.get(&o).copied(),
        )
    }

    fn emit_chunk(&mut self, o: usize, a: usize, b: usize) {
        self.write_chunk(
            self.o[self.line_o..o - 1].to_vec(),
            self.a[self.line_a..a - 1].to_vec(),
            self.b[self.line_b..b - 1].to_vec(),
        );
        self.line_o = o - 1;
        self.line_a = a - 1;
        self.line_b = b - 1;
    }

    fn emit_final_chunk(&mut self) {
        self.write_chunk(
            self.o[self.line_o..].to_vec(),
            self.a[self.line_a..].to_vec(),
            self.b[self.line_b..].to_vec(),
        );
        self.line_o = self.o.len();
        self.line_a = self.a.len();
        self.line_b = self.b.len();
    }

    fn write_chunk(&mut self, o: Vec<String>, a: Vec<String>, b: Vec<String>) {
        if o.is_empty() && a.is_empty() && b.is_empty() {
            return;
        }

        if a == o || a == b {
            self.chunks.push(Chunk::Clean { lines: b });
        } else if b == o {
            self.chunks.push(Chunk::Clean { lines: a });
        } else {
            self.chunks.push(Chunk::Conflict {
                base: o,
                left: a,
                right: b,
            });
        }
    }
}

fn split(text: &str) -> Vec<String> {
    text.split_inclusive('\n').map(|s| s.to_string()).collect()
}

/// Base-line -> side-line mapping for every unchanged line
fn match_set(base: &str, side: &str) -> HashMap<usize, usize> {
    myers::diff(base, side)
        .into_iter()
        .filter(|edit| edit.kind == EditKind::Eql)
        .filter_map(|edit| {
            let a = edit.a_line?;
            let b = edit.b_line?;
            Some((a.number, b.number))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_cleanly_merges_disjoint_edits() {
        let base = "one\ntwo\nthree\n";
        let left = "ONE\ntwo\nthree\n";
        let right = "one\ntwo\nTHREE\n";

        let result = merge(base, left, right);

        assert!(result.is_clean());
        assert_eq!(result.to_text("l", "r"), "ONE\ntwo\nTHREE\n");
    }

    #[test]
    fn test_takes_right_when_left_unchanged() {
        let base = "a\nb\n";
        let right = "a\nchanged\n";

        let result = merge(base, base, right);

        assert!(result.is_clean());
        assert_eq!(result.to_text("l", "r"), right);
    }

    #[test]
    fn test_agreeing_sides_are_clean() {
        let base = "a\n";
        let both = "a\nnew\n";

        let result = merge(base, both, both);

        assert!(result.is_clean());
        assert_eq!(result.to_text("l", "r"), both);
    }

    #[test]
    fn test_conflicting_edits_produce_markers() {
        let base = "one\ntwo\nthree\n";
        let left = "one\nleft\nthree\n";
        let right = "one\nright\nthree\n";

        let result = merge(base, left, right);

        assert!(!result.is_clean());
        assert_eq!(
            result.to_text("HEAD", "topic"),
            "one\n<<<<<<< HEAD\nleft\n=======\nright\n>>>>>>> topic\nthree\n"
        );
    }

    #[test]
    fn test_delete_versus_edit_conflicts() {
        let base = "keep\ndoomed\n";
        let left = "keep\n";
        let right = "keep\nedited\n";

        let result = merge(base, left, right);

        assert!(!result.is_clean());
    }
}
