//! Myers' shortest-edit-script diff over lines
//!
//! The forward O(ND) variant: walk edit distances d outwards, remembering
//! each round's furthest-reaching x per diagonal, then backtrack through the
//! recorded trace to recover the edit script.

use std::fmt;

/// A numbered line; numbers are 1-based
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    pub number: usize,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditKind {
    Eql,
    Ins,
    Del,
}

/// One step of the edit script
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edit {
    pub kind: EditKind,
    pub a_line: Option<Line>,
    pub b_line: Option<Line>,
}

impl fmt::Display for Edit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (tag, line) = match self.kind {
            EditKind::Eql => (' ', self.a_line.as_ref()),
            EditKind::Del => ('-', self.a_line.as_ref()),
            EditKind::Ins => ('+', self.b_line.as_ref()),
        };
        write!(f, "{}{}", tag, line.map(|l| l.text.as_str()).unwrap_or(""))
    }
}

/// Split text into numbered lines, keeping line terminators
pub fn lines(text: &str) -> Vec<Line> {
    text.split_inclusive('\n')
        .enumerate()
        .map(|(index, text)| Line {
            number: index + 1,
            text: text.to_string(),
        })
        .collect()
}

/// Diff two texts line by line
pub fn diff(a: &str, b: &str) -> Vec<Edit> {
    diff_lines(&lines(a), &lines(b))
}

/// Diff two pre-split line lists
pub fn diff_lines(a: &[Line], b: &[Line]) -> Vec<Edit> {
    let trace = shortest_edit(a, b);
    let mut edits = Vec::new();

    backtrack(&trace, a.len(), b.len(), |prev_x, prev_y, x, y| {
        let (a_line, b_line) = (a.get(prev_x), b.get(prev_y));

        let edit = if x == prev_x {
            Edit {
                kind: EditKind::Ins,
                a_line: None,
                b_line: b_line.cloned(),
            }
        } else if y == prev_y {
            Edit {
                kind: EditKind::Del,
                a_line: a_line.cloned(),
                b_line: None,
            }
        } else {
            Edit {
                kind: EditKind::Eql,
                a_line: a_line.cloned(),
                b_line: b_line.cloned(),
            }
        };
        edits.push(edit);
    });

    edits.reverse();
    edits
}

fn shortest_edit(a: &[Line], b: &[Line]) -> Vec<Vec<usize>> {
    let (n, m) = (a.len(), b.len());
    let max = n + m;

    // v is indexed by diagonal k in -max..=max, offset by max
    let mut v = vec![0usize; 2 * max + 2];
    let mut trace = Vec::new();

    for d in 0..=(max as isize) {
        trace.push(v.clone());

        let mut k = -d;
        while k <= d {
            let idx = |k: isize| (k + max as isize) as usize;

            let mut x = if k == -d || (k != d && v[idx(k - 1)] < v[idx(k + 1)]) {
                v[idx(k + 1)]
            } else {
                v[idx(k - 1)] + 1
            };
            let mut y = (x as isize - k) as usize;

            while x < n && y < m && a[x].text == b[y].text {
                x += 1;
                y += 1;
            }

            v[idx(k)] = x;

            if x >= n && y >= m {
                return trace;
            }

            k += 2;
        }
    }

    trace
}

fn backtrack<F>(trace: &[Vec<usize>], n: usize, m: usize, mut step: F)
where
    F: FnMut(usize, usize, usize, usize),
{
    let max = n + m;
    let (mut x, mut y) = (n as isize, m as isize);

    for (d, v) in trace.iter().enumerate().rev() {
        let d = d as isize;
        let idx = |k: isize| (k + max as isize) as usize;
        let k = x - y;

        let prev_k = if k == -d || (k != d && v[idx(k - 1)] < v[idx(k + 1)]) {
            k + 1
        } else {
            k - 1
        };
        let prev_x = v[idx(prev_k)] as isize;
        let prev_y = prev_x - prev_k;

        while x > prev_x && y > prev_y {
            step((x - 1) as usize, (y - 1) as usize, x as usize, y as usize);
            x -= 1;
            y -= 1;
        }

        if d > 0 {
            step(prev_x as usize, prev_y as usize, x as usize, y as usize);
        }

        x = prev_x;
        y = prev_y;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn render(edits: &[Edit]) -> String {
        edits.iter().map(|e| e.to_string()).collect()
    }

    #[test]
    fn test_identical_texts_are_all_eql() {
        let edits = diff("a\nb\n", "a\nb\n");

        assert!(edits.iter().all(|e| e.kind == EditKind::Eql));
    }

    #[test]
    fn test_classic_example() {
        let a = "A\nB\nC\nA\nB\nB\nA\n";
        let b = "C\nB\nA\nB\nA\nC\n";

        let edits = diff(a, b);

        let dels = edits.iter().filter(|e| e.kind == EditKind::Del).count();
        let inss = edits.iter().filter(|e| e.kind == EditKind::Ins).count();
        assert_eq!(dels + inss, 5, "shortest script for this pair has 5 edits");
    }

    #[test]
    fn test_insertion_only() {
        let edits = diff("a\nc\n", "a\nb\nc\n");

        assert_eq!(render(&edits), " a\n+b\n c\n");
    }

    #[test]
    fn test_deletion_only() {
        let edits = diff("a\nb\nc\n", "a\nc\n");

        assert_eq!(render(&edits), " a\n-b\n c\n");
    }

    #[test]
    fn test_empty_sides() {
        assert!(diff("", "").is_empty());
        assert!(diff("x\n", "").iter().all(|e| e.kind == EditKind::Del));
        assert!(diff("", "x\n").iter().all(|e| e.kind == EditKind::Ins));
    }

    #[test]
    fn test_eql_edits_carry_both_line_numbers() {
        let edits = diff("a\nb\n", "b\n");

        let eql = edits.iter().find(|e| e.kind == EditKind::Eql).unwrap();
        assert_eq!(eql.a_line.as_ref().unwrap().number, 2);
        assert_eq!(eql.b_line.as_ref().unwrap().number, 1);
    }
}
