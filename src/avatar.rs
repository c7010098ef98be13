//! Avatar capability seam and the single-owner expression weight store.
//!
//! The renderer that owns the avatar model lives outside this crate. It is
//! reached through [`AvatarCapability`]. Every weight write made by the
//! compositor goes through one [`ExpressionStore`], owned by the session
//! runtime task, so last-write-wins between overlapping chunks happens in a
//! single, observable place.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io::Write;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tracing::warn;

/// Named expression / viseme weights on a loaded avatar.
pub trait AvatarCapability: Send {
    /// Set the blend weight for `name`.
    fn set_expression_weight(&mut self, name: &str, weight: f32);

    /// Current blend weight for `name`; 0.0 if unknown.
    fn expression_weight(&self, name: &str) -> f32;

    /// Called once at the end of every scheduler tick.
    fn end_frame(&mut self) {}
}

/// Exclusive owner of all expression weight writes.
pub struct ExpressionStore {
    avatar: Box<dyn AvatarCapability>,
    touched: BTreeSet<String>,
}

impl ExpressionStore {
    pub fn new(avatar: Box<dyn AvatarCapability>) -> Self {
        Self {
            avatar,
            touched: BTreeSet::new(),
        }
    }

    /// Write `weight` for `name`, clamped to [0, 1]. Non-finite values write 0.
    pub fn set(&mut self, name: &str, weight: f32) {
        let weight = if weight.is_finite() {
            weight.clamp(0.0, 1.0)
        } else {
            0.0
        };
        if !self.touched.contains(name) {
            self.touched.insert(name.to_owned());
        }
        self.avatar.set_expression_weight(name, weight);
    }

    pub fn get(&self, name: &str) -> f32 {
        self.avatar.expression_weight(name)
    }

    /// Reset every weight this store has ever written, plus `extra`, to 0.
    pub fn reset_all<'a>(&mut self, extra: impl IntoIterator<Item = &'a str>) {
        for name in extra {
            if !self.touched.contains(name) {
                self.touched.insert(name.to_owned());
            }
        }
        for name in &self.touched {
            self.avatar.set_expression_weight(name, 0.0);
        }
    }

    /// Current weight of every name this store has written.
    pub fn snapshot(&self) -> BTreeMap<String, f32> {
        self.touched
            .iter()
            .map(|name| (name.clone(), self.avatar.expression_weight(name)))
            .collect()
    }

    pub fn end_frame(&mut self) {
        self.avatar.end_frame();
    }
}

// ---------------------------------------------------------------------------
// In-memory avatar
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct InMemoryState {
    weights: HashMap<String, f32>,
    history: Vec<(String, f32)>,
    frames: u64,
}

/// Avatar that keeps weights in memory.
///
/// Clones share state, so a handle kept outside the runtime task can observe
/// what the runtime wrote.
#[derive(Debug, Clone, Default)]
pub struct InMemoryAvatar {
    state: Arc<Mutex<InMemoryState>>,
}

impl InMemoryAvatar {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, InMemoryState> {
        match self.state.lock() {
            Ok(s) => s,
            Err(p) => p.into_inner(),
        }
    }

    /// Copy of the current weight map.
    pub fn weights(&self) -> HashMap<String, f32> {
        self.lock().weights.clone()
    }

    /// Every write for `name`, in order.
    pub fn history(&self, name: &str) -> Vec<f32> {
        self.lock()
            .history
            .iter()
            .filter(|(n, _)| n == name)
            .map(|(_, w)| *w)
            .collect()
    }

    /// Every write, in order.
    pub fn all_writes(&self) -> Vec<(String, f32)> {
        self.lock().history.clone()
    }

    /// Number of completed scheduler frames.
    pub fn frames(&self) -> u64 {
        self.lock().frames
    }
}

impl AvatarCapability for InMemoryAvatar {
    fn set_expression_weight(&mut self, name: &str, weight: f32) {
        let mut state = self.lock();
        state.weights.insert(name.to_owned(), weight);
        state.history.push((name.to_owned(), weight));
    }

    fn expression_weight(&self, name: &str) -> f32 {
        self.lock().weights.get(name).copied().unwrap_or(0.0)
    }

    fn end_frame(&mut self) {
        self.lock().frames += 1;
    }
}

// ---------------------------------------------------------------------------
// JSON-lines avatar (renderer in another process)
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct FrameLine<'a> {
    frame: u64,
    weights: &'a BTreeMap<String, f32>,
}

/// Avatar adapter that streams changed weights as one JSON object per frame.
///
/// Frames without changes produce no output.
pub struct JsonLinesAvatar<W: Write + Send> {
    writer: W,
    weights: HashMap<String, f32>,
    dirty: BTreeMap<String, f32>,
    frame: u64,
}

impl<W: Write + Send> JsonLinesAvatar<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            weights: HashMap::new(),
            dirty: BTreeMap::new(),
            frame: 0,
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> AvatarCapability for JsonLinesAvatar<W> {
    fn set_expression_weight(&mut self, name: &str, weight: f32) {
        let changed = self
            .weights
            .get(name)
            .is_none_or(|prev| (prev - weight).abs() > f32::EPSILON);
        self.weights.insert(name.to_owned(), weight);
        if changed {
            self.dirty.insert(name.to_owned(), weight);
        }
    }

    fn expression_weight(&self, name: &str) -> f32 {
        self.weights.get(name).copied().unwrap_or(0.0)
    }

    fn end_frame(&mut self) {
        self.frame += 1;
        if self.dirty.is_empty() {
            return;
        }
        let line = FrameLine {
            frame: self.frame,
            weights: &self.dirty,
        };
        match serde_json::to_string(&line) {
            Ok(json) => {
                if let Err(e) = writeln!(self.writer, "{json}").and_then(|()| self.writer.flush())
                {
                    warn!(error = %e, "failed to write weight frame");
                }
            }
            Err(e) => warn!(error = %e, "failed to encode weight frame"),
        }
        self.dirty.clear();
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn store_clamps_writes() {
        let avatar = InMemoryAvatar::new();
        let mut store = ExpressionStore::new(Box::new(avatar.clone()));
        store.set("aa", 1.7);
        store.set("ih", -0.2);
        store.set("happy", f32::NAN);
        assert_eq!(avatar.weights()["aa"], 1.0);
        assert_eq!(avatar.weights()["ih"], 0.0);
        assert_eq!(avatar.weights()["happy"], 0.0);
    }

    #[test]
    fn reset_all_zeroes_touched_and_extra_names() {
        let avatar = InMemoryAvatar::new();
        let mut store = ExpressionStore::new(Box::new(avatar.clone()));
        store.set("aa", 0.5);
        store.set("neutral", 1.0);
        store.reset_all(["blink"]);

        let weights = avatar.weights();
        assert_eq!(weights["aa"], 0.0);
        assert_eq!(weights["neutral"], 0.0);
        assert_eq!(weights["blink"], 0.0);
        assert_eq!(store.snapshot().len(), 3);
    }

    #[test]
    fn store_reads_through_capability() {
        let avatar = InMemoryAvatar::new();
        let mut store = ExpressionStore::new(Box::new(avatar.clone()));
        store.set("aa", 0.25);
        assert!((store.get("aa") - 0.25).abs() < f32::EPSILON);
        assert_eq!(store.get("unknown"), 0.0);
    }

    #[test]
    fn in_memory_history_is_ordered() {
        let mut avatar = InMemoryAvatar::new();
        avatar.set_expression_weight("aa", 0.1);
        avatar.set_expression_weight("ih", 0.2);
        avatar.set_expression_weight("aa", 0.3);
        avatar.end_frame();
        assert_eq!(avatar.history("aa"), vec![0.1, 0.3]);
        assert_eq!(avatar.frames(), 1);
    }

    #[test]
    fn json_lines_emits_only_changed_frames() {
        let mut avatar = JsonLinesAvatar::new(Vec::new());
        avatar.set_expression_weight("aa", 0.5);
        avatar.end_frame();
        avatar.set_expression_weight("aa", 0.5);
        avatar.end_frame();
        avatar.set_expression_weight("aa", 0.0);
        avatar.end_frame();

        let out = String::from_utf8(avatar.into_inner()).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["frame"], 1);
        assert_eq!(first["weights"]["aa"], 0.5);
        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["frame"], 3);
        assert_eq!(second["weights"]["aa"], 0.0);
    }
}
