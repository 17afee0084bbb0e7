//! Three-way line merge
//!
//! Both sides are diffed against the base. Runs of base lines that both
//! sides kept unchanged split the files into stable chunks; everything in
//! between is an unstable chunk, resolved when only one side changed it and
//! reported as a conflict otherwise.

use crate::artifacts::diff::diff_algorithm::MyersDiff;
use std::collections::HashMap;

type Lines<'l> = Vec<&'l [u8]>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Chunk<'l> {
    Clean(Lines<'l>),
    Conflict {
        base: Lines<'l>,
        ours: Lines<'l>,
        theirs: Lines<'l>,
    },
}

/// Labels written after the opening and closing conflict markers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeLabels {
    pub ours: String,
    pub theirs: String,
}

impl Default for MergeLabels {
    fn default() -> Self {
        Self {
            ours: "ours".to_string(),
            theirs: "theirs".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diff3Result<'l> {
    chunks: Vec<Chunk<'l>>,
}

impl Diff3Result<'_> {
    pub fn is_clean(&self) -> bool {
        self.chunks
            .iter()
            .all(|chunk| matches!(chunk, Chunk::Clean(_)))
    }

    pub fn conflict_count(&self) -> usize {
        self.chunks
            .iter()
            .filter(|chunk| matches!(chunk, Chunk::Conflict { .. }))
            .count()
    }

    pub fn chunks(&self) -> &[Chunk<'_>] {
        &self.chunks
    }

    /// Merged content, with conflict markers around unresolved chunks
    pub fn to_bytes(&self, labels: &MergeLabels) -> Vec<u8> {
        let mut output = Vec::new();

        for chunk in &self.chunks {
            match chunk {
                Chunk::Clean(lines) => lines.iter().for_each(|line| output.extend_from_slice(line)),
                Chunk::Conflict { ours, theirs, .. } => {
                    write_marker(&mut output, "<<<<<<<", &labels.ours);
                    write_section(&mut output, ours);
                    write_marker(&mut output, "=======", "");
                    write_section(&mut output, theirs);
                    write_marker(&mut output, ">>>>>>>", &labels.theirs);
                }
            }
        }

        output
    }
}

fn write_marker(output: &mut Vec<u8>, marker: &str, label: &str) {
    output.extend_from_slice(marker.as_bytes());
    if !label.is_empty() {
        output.push(b' ');
        output.extend_from_slice(label.as_bytes());
    }
    output.push(b'\n');
}

fn write_section(output: &mut Vec<u8>, lines: &[&[u8]]) {
    lines.iter().for_each(|line| output.extend_from_slice(line));
    if output.last().is_some_and(|&byte| byte != b'\n') {
        output.push(b'\n');
    }
}

/// Split into lines, keeping each line's terminator
pub fn split_lines(content: &[u8]) -> Lines<'_> {
    content.split_inclusive(|&byte| byte == b'\n').collect()
}

pub fn merge<'l>(base: &'l [u8], ours: &'l [u8], theirs: &'l [u8]) -> Diff3Result<'l> {
    Diff3::new(split_lines(base), split_lines(ours), split_lines(theirs)).merge()
}

struct Diff3<'l> {
    base: Lines<'l>,
    ours: Lines<'l>,
    theirs: Lines<'l>,
    /// base line index -> our line index, for lines we kept
    match_ours: HashMap<usize, usize>,
    /// base line index -> their line index, for lines they kept
    match_theirs: HashMap<usize, usize>,
    line_base: usize,
    line_ours: usize,
    line_theirs: usize,
    chunks: Vec<Chunk<'l>>,
}

impl<'l> Diff3<'l> {
    fn new(base: Lines<'l>, ours: Lines<'l>, theirs: Lines<'l>) -> Self {
        let match_ours = MyersDiff::new(&base, &ours).matches().into_iter().collect();
        let match_theirs = MyersDiff::new(&base, &theirs).matches().into_iter().collect();

        Self {
            base,
            ours,
            theirs,
            match_ours,
            match_theirs,
            line_base: 0,
            line_ours: 0,
            line_theirs: 0,
            chunks: Vec::new(),
        }
    }

    fn merge(mut self) -> Diff3Result<'l> {
        loop {
            match self.find_next_mismatch() {
                Some(1) => match self.find_next_match() {
                    Some((base, ours, theirs)) => self.emit_chunk(base, ours, theirs),
                    None => {
                        self.emit_final_chunk();
                        break;
                    }
                },
                Some(offset) => self.emit_chunk(
                    self.line_base + offset - 1,
                    self.line_ours + offset - 1,
                    self.line_theirs + offset - 1,
                ),
                None => {
                    self.emit_final_chunk();
                    break;
                }
            }
        }

        Diff3Result {
            chunks: self.chunks,
        }
    }

    /// Offset (1-based) of the first line after the cursors where the sides stop agreeing
    fn find_next_mismatch(&self) -> Option<usize> {
        let mut offset = 1;
        while self.in_bounds(offset)
            && self.is_match(&self.match_ours, self.line_ours, offset)
            && self.is_match(&self.match_theirs, self.line_theirs, offset)
        {
            offset += 1;
        }

        self.in_bounds(offset).then_some(offset)
    }

    fn in_bounds(&self, offset: usize) -> bool {
        self.line_base + offset <= self.base.len()
            || self.line_ours + offset <= self.ours.len()
            || self.line_theirs + offset <= self.theirs.len()
    }

    fn is_match(&self, matches: &HashMap<usize, usize>, cursor: usize, offset: usize) -> bool {
        matches.get(&(self.line_base + offset - 1)) == Some(&(cursor + offset - 1))
    }

    /// Next base line kept by both sides, as indices into each file
    fn find_next_match(&self) -> Option<(usize, usize, usize)> {
        (self.line_base..self.base.len()).find_map(|base| {
            let ours = self.match_ours.get(&base)?;
            let theirs = self.match_theirs.get(&base)?;
            Some((base, *ours, *theirs))
        })
    }

    /// Emit everything before the given indices and move the cursors there
    fn emit_chunk(&mut self, base: usize, ours: usize, theirs: usize) {
        self.write_chunk(
            self.base[self.line_base..base].to_vec(),
            self.ours[self.line_ours..ours].to_vec(),
            self.theirs[self.line_theirs..theirs].to_vec(),
        );
        self.line_base = base;
        self.line_ours = ours;
        self.line_theirs = theirs;
    }

    fn emit_final_chunk(&mut self) {
        self.write_chunk(
            self.base[self.line_base..].to_vec(),
            self.ours[self.line_ours..].to_vec(),
            self.theirs[self.line_theirs..].to_vec(),
        );
    }

    fn write_chunk(&mut self, base: Lines<'l>, ours: Lines<'l>, theirs: Lines<'l>) {
        if base.is_empty() && ours.is_empty() && theirs.is_empty() {
            return;
        }

        let chunk = if ours == base || ours == theirs {
            Chunk::Clean(theirs)
        } else if theirs == base {
            Chunk::Clean(ours)
        } else {
            Chunk::Conflict { base, ours, theirs }
        };
        self.chunks.push(chunk);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[test]
    fn both_sides_changing_one_line_conflicts() {
        let result = merge(
            b"line1\noriginal\nline3",
            b"line1\nmine\nline3",
            b"line1\ntheirs\nline3",
        );

        assert_eq!(result.conflict_count(), 1);
        assert_eq!(
            String::from_utf8(result.to_bytes(&MergeLabels::default())).unwrap(),
            "line1\n<<<<<<< ours\nmine\n=======\ntheirs\n>>>>>>> theirs\nline3"
        );
    }

    #[rstest]
    #[case::ours_only("a\nb\nc\n", "a\nB\nc\n", "a\nb\nc\n", "a\nB\nc\n")]
    #[case::theirs_only("a\nb\nc\n", "a\nb\nc\n", "a\nb\nC\n", "a\nb\nC\n")]
    #[case::disjoint("a\nb\nc\nd\ne\n", "A\nb\nc\nd\ne\n", "a\nb\nc\nd\nE\n", "A\nb\nc\nd\nE\n")]
    #[case::same_change("a\nb\n", "a\nx\n", "a\nx\n", "a\nx\n")]
    #[case::empty_base("", "", "new\n", "new\n")]
    fn non_overlapping_changes_merge_cleanly(
        #[case] base: &str,
        #[case] ours: &str,
        #[case] theirs: &str,
        #[case] expected: &str,
    ) {
        let result = merge(base.as_bytes(), ours.as_bytes(), theirs.as_bytes());

        assert!(result.is_clean());
        assert_eq!(
            String::from_utf8(result.to_bytes(&MergeLabels::default())).unwrap(),
            expected
        );
    }

    #[test]
    fn both_adding_different_content_conflicts() {
        let result = merge(b"", b"one\n", b"two\n");
        let labels = MergeLabels {
            ours: "HEAD".to_string(),
            theirs: "feature".to_string(),
        };

        assert_eq!(
            String::from_utf8(result.to_bytes(&labels)).unwrap(),
            "<<<<<<< HEAD\none\n=======\ntwo\n>>>>>>> feature\n"
        );
    }
}
