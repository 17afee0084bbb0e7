//! Myers' shortest edit script over two slices
//!
//! The three-way merge only needs to know which lines of one side line up
//! with which lines of the other, so edits refer to positions instead of
//! carrying the lines themselves.

use derive_new::new;

/// One step of the edit script, by index into the inputs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edit {
    Equal { a: usize, b: usize },
    Delete { a: usize },
    Insert { b: usize },
}

#[derive(Debug, Clone, Copy, new)]
pub struct MyersDiff<'d, T> {
    a: &'d [T],
    b: &'d [T],
}

impl<T: Eq> MyersDiff<'_, T> {
    /// Pairs of `(a index, b index)` for elements the script keeps
    pub fn matches(&self) -> Vec<(usize, usize)> {
        self.edits()
            .into_iter()
            .filter_map(|edit| match edit {
                Edit::Equal { a, b } => Some((a, b)),
                _ => None,
            })
            .collect()
    }

    /// Shortest script turning `a` into `b`, in order
    pub fn edits(&self) -> Vec<Edit> {
        let trace = self.furthest_reaching_paths();
        let mut edits = Vec::new();
        let (mut x, mut y) = (self.a.len(), self.b.len());

        // walk the trace backwards from the end point, one edit per round
        for (d, frontier) in trace.iter().enumerate().rev() {
            let k = x as isize - y as isize;
            let from_k = if Self::came_down(frontier, d as isize, k) { k + 1 } else { k - 1 };
            let from_x = frontier[self.slot(from_k)].max(0) as usize;
            let from_y = (from_x as isize - from_k).max(0) as usize;

            while x > from_x && y > from_y {
                x -= 1;
                y -= 1;
                edits.push(Edit::Equal { a: x, b: y });
            }

            if d == 0 {
                break;
            }
            if x == from_x {
                edits.push(Edit::Insert { b: from_y });
            } else {
                edits.push(Edit::Delete { a: from_x });
            }
            (x, y) = (from_x, from_y);
        }

        edits.reverse();
        edits
    }

    /// The frontier of furthest `x` per diagonal `k`, before each round `d`
    fn furthest_reaching_paths(&self) -> Vec<Vec<isize>> {
        let (n, m) = (self.a.len() as isize, self.b.len() as isize);
        let mut frontier = vec![0isize; self.slot(n + m) + 2];
        let mut trace = Vec::new();

        for d in 0..=(n + m) {
            trace.push(frontier.clone());

            for k in (-d..=d).step_by(2) {
                let mut x = if Self::came_down(&frontier, d, k) {
                    frontier[self.slot(k + 1)]
                } else {
                    frontier[self.slot(k - 1)] + 1
                };
                let mut y = x - k;

                while x < n && y < m && self.a[x as usize] == self.b[y as usize] {
                    x += 1;
                    y += 1;
                }
                frontier[self.slot(k)] = x;

                if x >= n && y >= m {
                    return trace;
                }
            }
        }

        trace
    }

    /// Whether diagonal `k` in round `d` is best reached by an insertion
    fn came_down(frontier: &[isize], d: isize, k: isize) -> bool {
        let offset = (frontier.len() as isize - 2) / 2;
        let at = |k: isize| frontier[(offset + k) as usize];
        k == -d || (k != d && at(k - 1) < at(k + 1))
    }

    fn slot(&self, k: isize) -> usize {
        ((self.a.len() + self.b.len()) as isize + k) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use rstest::rstest;

    fn apply<T: Clone>(a: &[T], b: &[T], edits: &[Edit]) -> Vec<T> {
        edits
            .iter()
            .filter_map(|edit| match *edit {
                Edit::Equal { a: i, .. } => Some(a[i].clone()),
                Edit::Insert { b: j } => Some(b[j].clone()),
                Edit::Delete { .. } => None,
            })
            .collect()
    }

    #[rstest]
    fn finds_shortest_script_for_characters() {
        let a = "abcabba".chars().collect::<Vec<_>>();
        let b = "cbabac".chars().collect::<Vec<_>>();

        let edits = MyersDiff::new(&a, &b).edits();
        let changes = edits
            .iter()
            .filter(|edit| !matches!(edit, Edit::Equal { .. }))
            .count();

        assert_eq!(changes, 5);
        assert_eq!(apply(&a, &b, &edits), b);
    }

    #[rstest]
    fn matches_line_up_kept_lines() {
        let a = vec!["line1", "line2", "line3", "line4"];
        let b = vec!["line2", "line3_modified", "line4", "line5"];

        let matches = MyersDiff::new(&a, &b).matches();

        assert_eq!(matches, vec![(1, 0), (3, 2)]);
    }

    #[rstest]
    #[case(vec![], vec!["x"])]
    #[case(vec!["x"], vec![])]
    #[case(vec![], vec![])]
    fn handles_empty_sides(#[case] a: Vec<&str>, #[case] b: Vec<&str>) {
        let edits = MyersDiff::new(&a, &b).edits();
        assert_eq!(edits.len(), a.len() + b.len());
    }

    proptest! {
        #[test]
        fn script_rebuilds_the_target(a in prop::collection::vec(0u8..4, 0..24), b in prop::collection::vec(0u8..4, 0..24)) {
            let edits = MyersDiff::new(&a, &b).edits();
            prop_assert_eq!(apply(&a, &b, &edits), b);
        }
    }
}
