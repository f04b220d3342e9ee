//! Line-oriented deltas for alias and function definitions.
//!
//! A diff is a list of runs. A run either copies consecutive lines from the
//! old text (`line` is the 1-based starting line) or, when `line` is 0, takes
//! the next `run` lines from `new_data`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error applying a line diff.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LineDiffError {
    #[error("not enough new data for diff")]
    MissingNewData,
    #[error("diff index out of bounds {index} old-data-len:{len}")]
    OutOfBounds { index: usize, len: usize },
}

/// One run of a line diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineRun {
    /// 1-based old line number, 0 for new data.
    pub line: usize,
    /// Number of lines in the run.
    pub run: usize,
}

/// Run-length diff between two newline-separated texts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineDiff {
    pub lines: Vec<LineRun>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub new_data: Vec<String>,
}

impl LineDiff {
    /// Diff `old` to `new`; `None` when the texts are identical.
    #[must_use]
    pub fn make(old: &str, new: &str) -> Option<Self> {
        if old == new {
            return None;
        }
        let old_lines: Vec<&str> = old.split('\n').collect();
        let new_lines: Vec<&str> = new.split('\n').collect();
        Some(Self::make_lines(&old_lines, &new_lines))
    }

    fn make_lines(old: &[&str], new: &[&str]) -> Self {
        let mut first_seen: HashMap<&str, usize> = HashMap::new();
        for (idx, line) in old.iter().enumerate() {
            first_seen.entry(*line).or_insert(idx + 1);
        }

        let mut diff = Self::default();
        let mut cur: Option<LineRun> = None;
        for line in new {
            let found = first_seen.get(line).copied();
            if let Some(run) = cur.as_mut() {
                if run.line != 0 {
                    // Extend a copy run while the old text keeps matching.
                    let next = run.line + run.run - 1;
                    if next < old.len() && old[next] == *line {
                        run.run += 1;
                        continue;
                    }
                } else if found.is_none() {
                    run.run += 1;
                    diff.new_data.push((*line).to_string());
                    continue;
                }
            }
            if let Some(run) = cur.take() {
                diff.lines.push(run);
            }
            match found {
                Some(line_no) => cur = Some(LineRun { line: line_no, run: 1 }),
                None => {
                    cur = Some(LineRun { line: 0, run: 1 });
                    diff.new_data.push((*line).to_string());
                }
            }
        }
        if let Some(run) = cur {
            diff.lines.push(run);
        }
        diff
    }

    /// Apply the diff to `old`.
    ///
    /// # Errors
    /// Fails if the diff references lines `old` does not have or runs out of
    /// new data, i.e. it was made against a different text.
    pub fn apply(&self, old: &str) -> Result<String, LineDiffError> {
        let old_lines: Vec<&str> = old.split('\n').collect();
        let mut out: Vec<&str> = Vec::with_capacity(self.lines.len());
        let mut new_data = self.new_data.iter();
        for entry in &self.lines {
            if entry.line == 0 {
                for _ in 0..entry.run {
                    let line = new_data.next().ok_or(LineDiffError::MissingNewData)?;
                    out.push(line.as_str());
                }
            } else {
                let start = entry.line - 1;
                let end = start.checked_add(entry.run).ok_or(LineDiffError::OutOfBounds {
                    index: start,
                    len: old_lines.len(),
                })?;
                for index in start..end {
                    let line = old_lines.get(index).ok_or(LineDiffError::OutOfBounds {
                        index,
                        len: old_lines.len(),
                    })?;
                    out.push(*line);
                }
            }
        }
        Ok(out.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STR1: &str = "\nhello\nline #2\napple\ngrapes\nbanana\napple\n";
    const STR2: &str = "\nline #2\napple\ngrapes\nbanana\n";
    const STR3: &str = "\nmore\nstuff\nbanana\ncoconut\n";
    const STR4: &str = "\nmore\nstuff\nbanana2\ncoconut\n";

    fn roundtrip(a: &str, b: &str) {
        let diff = LineDiff::make(a, b).expect("texts differ");
        assert_eq!(diff.apply(a).unwrap(), b);
    }

    #[test]
    fn test_line_diff_roundtrips() {
        roundtrip(STR1, STR2);
        roundtrip(STR2, STR3);
        roundtrip(STR1, STR3);
        roundtrip(STR3, STR1);
        roundtrip(STR3, STR4);
        roundtrip("", "alias ll='ls -l'");
        roundtrip("alias ll='ls -l'", "");
    }

    #[test]
    fn test_identical_texts_have_no_diff() {
        assert!(LineDiff::make(STR1, STR1).is_none());
    }

    #[test]
    fn test_copy_runs_are_merged() {
        let diff = LineDiff::make("a\nb\nc\nd", "a\nb\nc\nX").unwrap();
        assert_eq!(
            diff.lines,
            vec![LineRun { line: 1, run: 3 }, LineRun { line: 0, run: 1 }]
        );
        assert_eq!(diff.new_data, vec!["X".to_string()]);
    }

    #[test]
    fn test_apply_against_wrong_text_fails() {
        let diff = LineDiff::make("a\nb\nc", "c\nb").unwrap();
        assert_eq!(
            diff.apply("a"),
            Err(LineDiffError::OutOfBounds { index: 2, len: 1 })
        );
    }

    #[test]
    fn test_oversized_run_is_out_of_bounds() {
        let diff = LineDiff {
            lines: vec![LineRun {
                line: 2,
                run: usize::MAX,
            }],
            new_data: Vec::new(),
        };
        assert_eq!(
            diff.apply("a\nb"),
            Err(LineDiffError::OutOfBounds { index: 1, len: 2 })
        );
    }
}
