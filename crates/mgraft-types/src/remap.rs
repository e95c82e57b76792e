//! Compact id remap tables stored as sorted runs.
//!
//! Transform id assignment is monotonic, so consecutive source ids usually
//! map to consecutive target ids. Storing the mapping as runs
//! `{from, to, len}` keeps a multi-million-row table in a few entries and
//! makes the bulk flush into the temp SQL remap tables trivial.

/// One run of consecutive mappings: `from + k → to + k` for `k < len`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RemapRun {
    /// First source id of the run.
    pub from: u64,
    /// Target id of `from`.
    pub to: u64,
    /// Number of consecutive mappings.
    pub len: u64,
}

impl RemapRun {
    const fn contains(&self, src: u64) -> bool {
        src >= self.from && src - self.from < self.len
    }

    const fn end(&self) -> u64 {
        self.from + self.len
    }
}

/// Dense integer→integer mapping stored as sorted, non-overlapping runs.
///
/// Re-inserting an identical pair is a no-op; inserting a conflicting
/// mapping for an already-mapped source id is a programming error and
/// panics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompactRemapTable {
    runs: Vec<RemapRun>,
}

impl CompactRemapTable {
    /// Create an empty table.
    pub const fn new() -> Self {
        Self { runs: Vec::new() }
    }

    /// Number of individual mappings.
    pub fn len(&self) -> u64 {
        self.runs.iter().map(|r| r.len).sum()
    }

    /// Whether the table holds no mappings.
    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    /// The runs, sorted by `from`.
    pub fn runs(&self) -> &[RemapRun] {
        &self.runs
    }

    /// Drop all mappings.
    pub fn clear(&mut self) {
        self.runs.clear();
    }

    /// Index of the run that could contain `src` (the last run with
    /// `from <= src`), if any.
    fn candidate(&self, src: u64) -> Option<usize> {
        let idx = self.runs.partition_point(|r| r.from <= src);
        idx.checked_sub(1)
    }

    /// Look up the target id for `src`.
    pub fn get(&self, src: u64) -> Option<u64> {
        let run = &self.runs[self.candidate(src)?];
        run.contains(src).then(|| run.to + (src - run.from))
    }

    /// Insert the mapping `src → tgt`, extending an adjacent run when the
    /// pair is contiguous with it.
    ///
    /// # Panics
    ///
    /// Panics if `src` is already mapped to a different target.
    pub fn remap(&mut self, src: u64, tgt: u64) {
        let insert_at = match self.candidate(src) {
            Some(i) => {
                let prev = self.runs[i];
                if prev.contains(src) {
                    let existing = prev.to + (src - prev.from);
                    assert!(
                        existing == tgt,
                        "overlapping remap: {src:#x} already maps to {existing:#x}, not {tgt:#x}"
                    );
                    return;
                }
                if src == prev.end() && tgt == prev.to + prev.len {
                    self.runs[i].len += 1;
                    self.coalesce_with_next(i);
                    return;
                }
                i + 1
            }
            None => 0,
        };
        if let Some(next) = self.runs.get_mut(insert_at) {
            if src + 1 == next.from && tgt + 1 == next.to {
                next.from -= 1;
                next.to -= 1;
                next.len += 1;
                return;
            }
        }
        self.runs.insert(insert_at, RemapRun { from: src, to: tgt, len: 1 });
    }

    /// Insert a whole run, as produced by state loading or identity seeding.
    ///
    /// # Panics
    ///
    /// Panics on a zero-length run or on overlap with existing runs.
    pub fn insert_run(&mut self, from: u64, to: u64, len: u64) {
        assert!(len > 0, "remap run must not be empty");
        let idx = self.runs.partition_point(|r| r.from <= from);
        if let Some(prev) = idx.checked_sub(1).map(|i| &self.runs[i]) {
            assert!(
                prev.end() <= from,
                "overlapping remap run at {from:#x} (previous run ends at {:#x})",
                prev.end()
            );
        }
        if let Some(next) = self.runs.get(idx) {
            assert!(
                from + len <= next.from,
                "overlapping remap run at {from:#x} (next run starts at {:#x})",
                next.from
            );
        }
        self.runs.insert(idx, RemapRun { from, to, len });
        self.coalesce_with_next(idx);
        if let Some(i) = idx.checked_sub(1) {
            self.coalesce_with_next(i);
        }
    }

    /// Merge `runs[i]` with `runs[i + 1]` when they are contiguous in both
    /// the source and target spaces.
    fn coalesce_with_next(&mut self, i: usize) {
        if i + 1 >= self.runs.len() {
            return;
        }
        let (a, b) = (self.runs[i], self.runs[i + 1]);
        if a.end() == b.from && a.to + a.len == b.to {
            self.runs[i].len += b.len;
            self.runs.remove(i + 1);
        }
    }
}
