//! Bounded per-session output log and the replay plan derived from it.
//!
//! The log is the authoritative record a render surface replays from. Chunks
//! are addressed by an absolute sequence number (`evicted + index`) so a reader
//! can tell "new chunks arrived" apart from "the window slid" and "the log was
//! reset", even once the log sits at its cap.

use std::collections::VecDeque;

/// Default maximum number of chunks kept per session.
pub const MAX_OUTPUT_CHUNKS: usize = 5000;

/// Append-only, capacity-bounded sequence of output chunks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLog {
    chunks: VecDeque<String>,
    cap: usize,
    /// Chunks dropped from the front since the last reset.
    evicted: u64,
    /// Incremented on every explicit reset.
    epoch: u64,
}

/// Position of a reader within an [`OutputLog`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OutputCursor {
    pub epoch: u64,
    /// Absolute sequence number one past the last chunk seen.
    pub end: u64,
}

/// What a render surface has to do to catch up with a log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplayPlan {
    /// Already up to date.
    Nothing,
    /// Write these chunks after what is already shown.
    Append(Vec<String>),
    /// Clear the surface, then write these chunks.
    Replace(Vec<String>),
}

impl OutputLog {
    pub fn new() -> Self {
        Self::with_capacity(MAX_OUTPUT_CHUNKS)
    }

    /// Creates a log bounded to `cap` chunks (at least one).
    pub fn with_capacity(cap: usize) -> Self {
        Self {
            chunks: VecDeque::new(),
            cap: cap.max(1),
            evicted: 0,
            epoch: 0,
        }
    }

    /// Appends one chunk, evicting from the front until the cap holds.
    pub fn append(&mut self, chunk: impl Into<String>) {
        self.chunks.push_back(chunk.into());
        while self.chunks.len() > self.cap {
            self.chunks.pop_front();
            self.evicted += 1;
        }
    }

    /// Drops every chunk and starts a new epoch.
    pub fn clear(&mut self) {
        self.chunks.clear();
        self.evicted = 0;
        self.epoch += 1;
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.chunks.iter().map(String::as_str)
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.chunks.iter().cloned().collect()
    }

    /// Cursor pointing just past the newest chunk.
    pub fn cursor(&self) -> OutputCursor {
        OutputCursor {
            epoch: self.epoch,
            end: self.evicted + self.chunks.len() as u64,
        }
    }

    /// Works out how a reader positioned at `seen` catches up.
    ///
    /// `None` means the reader has never rendered anything. A reader whose
    /// epoch differs, whose position is ahead of the log (the log shrank), or
    /// whose position has already been evicted gets a full replacement; anyone
    /// else gets exactly the chunks after its position.
    pub fn plan_from(&self, seen: Option<OutputCursor>) -> ReplayPlan {
        let current = self.cursor();
        let Some(seen) = seen else {
            return ReplayPlan::Replace(self.to_vec());
        };

        if seen.epoch != current.epoch || seen.end > current.end || seen.end < self.evicted {
            return ReplayPlan::Replace(self.to_vec());
        }
        if seen.end == current.end {
            return ReplayPlan::Nothing;
        }

        let skip = (seen.end - self.evicted) as usize;
        ReplayPlan::Append(self.chunks.iter().skip(skip).cloned().collect())
    }
}

impl Default for OutputLog {
    fn default() -> Self {
        Self::new()
    }
}
