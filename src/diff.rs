// 🧬 Matcher - LCS alignment over fingerprints
// Produces ordered hunks: runs of deleted stored records and inserted targets

use crate::record::Fingerprint;
use serde::{Deserialize, Serialize};

/// One edit run between two aligned sequences
///
/// Indices are 0-based: `Delete::at` indexes the stored sequence,
/// `Insert::at` indexes the target sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Hunk {
    Delete { at: usize, len: usize },
    Insert { at: usize, len: usize },
}

impl Hunk {
    pub fn len(&self) -> usize {
        match self {
            Hunk::Delete { len, .. } | Hunk::Insert { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Anything that can align two fingerprint sequences into ordered hunks.
///
/// Hunks must come left to right; within one edit region the deletion
/// hunk precedes the insertion hunk.
pub trait Aligner {
    fn align(&self, old: &[Fingerprint], new: &[Fingerprint]) -> Vec<Hunk>;
}

/// Longest-common-subsequence alignment
///
/// Tie-breaking:
/// - equal heads are matched immediately, so the earliest stored occurrence
///   of a repeated fingerprint is the one kept unchanged
/// - otherwise deleting a stored record wins over inserting a target when
///   both keep the LCS length
#[derive(Debug, Clone, Copy, Default)]
pub struct LcsAligner;

impl Aligner for LcsAligner {
    fn align(&self, old: &[Fingerprint], new: &[Fingerprint]) -> Vec<Hunk> {
        align(old, new)
    }
}

pub fn align(old: &[Fingerprint], new: &[Fingerprint]) -> Vec<Hunk> {
    let m = old.len();
    let n = new.len();

    // Suffix table: lcs[i][j] = LCS length of old[i..] and new[j..]
    let mut lcs = vec![vec![0u32; n + 1]; m + 1];
    for i in (0..m).rev() {
        for j in (0..n).rev() {
            lcs[i][j] = if old[i] == new[j] {
                lcs[i + 1][j + 1] + 1
            } else {
                lcs[i + 1][j].max(lcs[i][j + 1])
            };
        }
    }

    let mut hunks = Vec::new();
    let mut region = Region::at(0, 0);
    let (mut i, mut j) = (0usize, 0usize);

    while i < m && j < n {
        if old[i] == new[j] {
            region.flush_into(&mut hunks);
            i += 1;
            j += 1;
            region = Region::at(i, j);
        } else if lcs[i + 1][j] >= lcs[i][j + 1] {
            region.deleted += 1;
            i += 1;
        } else {
            region.inserted += 1;
            j += 1;
        }
    }
    region.deleted += m - i;
    region.inserted += n - j;
    region.flush_into(&mut hunks);

    hunks
}

/// Edit region between two matched pairs; both runs are contiguous
struct Region {
    old_start: usize,
    new_start: usize,
    deleted: usize,
    inserted: usize,
}

impl Region {
    fn at(old_start: usize, new_start: usize) -> Self {
        Region {
            old_start,
            new_start,
            deleted: 0,
            inserted: 0,
        }
    }

    fn flush_into(&self, hunks: &mut Vec<Hunk>) {
        if self.deleted > 0 {
            hunks.push(Hunk::Delete {
                at: self.old_start,
                len: self.deleted,
            });
        }
        if self.inserted > 0 {
            hunks.push(Hunk::Insert {
                at: self.new_start,
                len: self.inserted,
            });
        }
    }
}
