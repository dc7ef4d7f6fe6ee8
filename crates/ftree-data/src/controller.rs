#![forbid(unsafe_code)]

//! Per-parent active windows.
//!
//! A [`CommunicationController`] owns the window the client asked to see
//! for one level: the children of one expanded parent, or the flat root
//! sequence. It remembers what it sent in each batch so keys that fell out of
//! every live window can be released (passivated).
//!
//! # State machine
//!
//! ```text
//! Idle --set_request_range--> RangeRequested --flush--> Flushed
//! Flushed --confirm_update--> Confirmed
//! Flushed --set_request_range--> Superseded --flush--> Flushed
//! ```
//!
//! Several `set_request_range` calls before a flush keep only the last range.

use std::collections::HashSet;
use std::fmt;

use ftree_core::{Item, KeyMapper, Range};
use serde_json::Value;

use crate::update::{ClientChannel, UpdateQueue, ops};

/// What a controller reads rows from.
pub trait RowSource<T> {
    /// Start a batch carrying the current flat size.
    fn start_update(&self) -> UpdateQueue;

    /// Rows of a level: flat rows for `None`, children of `parent` otherwise.
    fn fetch_rows(&self, parent: Option<&T>, range: Range) -> Vec<T>;

    /// Length of a level: flat size for `None`, child count otherwise.
    fn row_count(&self, parent: Option<&T>) -> usize;

    /// Whether any item is expanded.
    fn has_expanded_items(&self) -> bool;

    /// Client record of `item`, allocating its key. Returns `(key, record)`.
    fn record(&mut self, item: &T) -> (String, Value);
}

/// Lifecycle of a controller's window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ControllerState {
    /// Nothing requested yet.
    #[default]
    Idle,
    /// A range waits for the next flush.
    RangeRequested,
    /// A batch was sent and not yet confirmed.
    Flushed,
    /// The client confirmed the latest batch.
    Confirmed,
    /// A new range arrived before the last batch was confirmed.
    Superseded,
}

/// Summary of one controller flush.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerFlush {
    /// Batch id sent with the confirmation.
    pub update_id: u64,
    /// Page index of the served range.
    pub page: usize,
    /// Served range after clamping.
    pub range: Range,
    /// Rows sent.
    pub rows: usize,
    /// Level length sent with the confirmation.
    pub level_size: usize,
}

#[derive(Debug, Clone)]
struct SentBatch {
    update_id: u64,
    keys: Vec<String>,
}

/// Active window of one level.
pub struct CommunicationController<T: Item> {
    parent: Option<T>,
    parent_key: Option<String>,
    page_size: usize,
    requested: Option<Range>,
    window: Range,
    active: Range,
    sent: Vec<SentBatch>,
    confirmed: Option<SentBatch>,
    held: HashSet<String>,
    state: ControllerState,
    flushes: usize,
}

impl<T: Item> CommunicationController<T> {
    /// Controller for the flat root sequence.
    #[must_use]
    pub fn root(page_size: usize) -> Self {
        Self::build(None, None, page_size)
    }

    /// Controller for the children of `parent`, known to the client as
    /// `parent_key`.
    #[must_use]
    pub fn for_parent(parent: T, parent_key: impl Into<String>, page_size: usize) -> Self {
        Self::build(Some(parent), Some(parent_key.into()), page_size)
    }

    fn build(parent: Option<T>, parent_key: Option<String>, page_size: usize) -> Self {
        Self {
            parent,
            parent_key,
            page_size: page_size.max(1),
            requested: None,
            window: Range::default(),
            active: Range::default(),
            sent: Vec::new(),
            confirmed: None,
            held: HashSet::new(),
            state: ControllerState::Idle,
            flushes: 0,
        }
    }

    /// The parent item, `None` for the root controller.
    #[must_use]
    pub fn parent(&self) -> Option<&T> {
        self.parent.as_ref()
    }

    /// The parent key, `None` for the root controller.
    #[must_use]
    pub fn parent_key(&self) -> Option<&str> {
        self.parent_key.as_deref()
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ControllerState {
        self.state
    }

    /// Range waiting for the next flush.
    #[must_use]
    pub fn requested_range(&self) -> Option<Range> {
        self.requested
    }

    /// Range served by the last flush.
    #[must_use]
    pub fn active_range(&self) -> Range {
        self.active
    }

    /// Number of flushes that produced a batch.
    #[must_use]
    pub fn flush_count(&self) -> usize {
        self.flushes
    }

    /// Whether this controller currently holds `key`.
    #[must_use]
    pub fn holds(&self, key: &str) -> bool {
        self.held.contains(key)
    }

    /// Number of held keys.
    #[must_use]
    pub fn held_len(&self) -> usize {
        self.held.len()
    }

    /// Keys this controller currently holds, in arbitrary order.
    pub fn held_keys(&self) -> impl Iterator<Item = &str> {
        self.held.iter().map(String::as_str)
    }

    /// Record the client's latest window. The last call before a flush wins.
    pub fn set_request_range(&mut self, start: usize, length: usize) {
        self.requested = Some(Range::with_length(start, length));
        self.state = match self.state {
            ControllerState::Flushed | ControllerState::Superseded => ControllerState::Superseded,
            _ => ControllerState::RangeRequested,
        };
    }

    /// Ask for the last requested window again on the next flush.
    ///
    /// The window is re-served unclamped, so rows that appeared since the
    /// last flush are picked up.
    pub fn request_refresh(&mut self) {
        if self.requested.is_none() && !self.window.is_empty() {
            self.set_request_range(self.window.start(), self.window.len());
        }
    }

    /// Serve the requested range, if any, as one committed batch.
    pub fn flush(
        &mut self,
        update_id: u64,
        source: &mut dyn RowSource<T>,
        channel: &mut dyn ClientChannel,
    ) -> Option<ControllerFlush> {
        let requested = self.requested.take()?;
        self.window = requested;
        #[cfg(feature = "tracing")]
        let _span = tracing::debug_span!(
            "controller_flush",
            parent_key = self.parent_key.as_deref().unwrap_or(""),
            start = requested.start(),
            len = requested.len()
        )
        .entered();

        let level_size = source.row_count(self.parent.as_ref());
        let range = requested.clamp_to(level_size);
        let items = source.fetch_rows(self.parent.as_ref(), range);
        let mut keys = Vec::with_capacity(items.len());
        let mut rows = Vec::with_capacity(items.len());
        for item in &items {
            let (key, record) = source.record(item);
            keys.push(key);
            rows.push(record);
        }
        let page = range.start() / self.page_size;
        let (before, after) = self.active.difference(&range);

        let mut queue = source.start_update();
        match &self.parent_key {
            None => {
                let dropped = [before, after]
                    .into_iter()
                    .filter(|r| !r.is_empty())
                    .collect::<Vec<_>>();
                if !dropped.is_empty() && !source.has_expanded_items() {
                    queue.clear_expanded();
                }
                for r in dropped {
                    queue.clear(r.start(), r.len());
                }
                queue.set(range.start(), rows);
                queue.commit_confirm(update_id, channel);
            }
            Some(parent_key) => {
                for r in [before, after] {
                    if !r.is_empty() {
                        queue.clear_for_parent(r.start(), r.len(), parent_key);
                    }
                }
                queue.enqueue(
                    ops::CONFIRM_LEVEL,
                    vec![
                        Value::from(parent_key.as_str()),
                        Value::from(page),
                        Value::Array(rows),
                        Value::from(level_size),
                    ],
                );
                queue.commit_parent(update_id, parent_key, level_size, channel);
            }
        }

        self.held.extend(keys.iter().cloned());
        self.sent.push(SentBatch { update_id, keys });
        self.active = range;
        self.state = ControllerState::Flushed;
        self.flushes += 1;
        ftree_core::debug!(
            parent_key = self.parent_key.as_deref().unwrap_or("<root>"),
            update_id,
            ?range,
            rows = items.len(),
            level_size,
            "controller flushed"
        );
        Some(ControllerFlush {
            update_id,
            page,
            range,
            rows: items.len(),
            level_size,
        })
    }

    /// The client received batch `update_id`. Unknown ids are ignored.
    pub fn confirm_update(&mut self, update_id: u64) -> bool {
        let Some(at) = self.sent.iter().position(|b| b.update_id == update_id) else {
            ftree_core::trace!(update_id, "stale confirmation ignored");
            return false;
        };
        let batch = self.sent.remove(at);
        self.sent.retain(|b| b.update_id > update_id);
        self.confirmed = Some(batch);
        if self.sent.is_empty() && self.requested.is_none() {
            self.state = ControllerState::Confirmed;
        }
        true
    }

    fn live_keys(&self) -> HashSet<&str> {
        let mut live: HashSet<&str> = HashSet::new();
        if let Some(confirmed) = &self.confirmed {
            live.extend(confirmed.keys.iter().map(String::as_str));
        }
        if let Some(latest) = self.sent.last() {
            live.extend(latest.keys.iter().map(String::as_str));
        }
        live
    }

    /// Release keys that are in no live window of this controller.
    ///
    /// Live windows are the confirmed batch and the latest sent batch. A key
    /// for which `still_referenced` answers `true` is dropped from this
    /// controller but stays registered. Returns the released items.
    pub fn unregister_passivated_keys(
        &mut self,
        keys: &mut KeyMapper<T>,
        still_referenced: &dyn Fn(&str) -> bool,
    ) -> Vec<T> {
        let passivated: Vec<String> = {
            let live = self.live_keys();
            self.held
                .iter()
                .filter(|k| !live.contains(k.as_str()))
                .cloned()
                .collect()
        };
        if let Some(latest) = self.sent.pop() {
            self.sent.clear();
            self.sent.push(latest);
        }
        self.release(passivated, keys, still_referenced)
    }

    /// Release every held key, for a discarded controller.
    pub fn release_all(
        &mut self,
        keys: &mut KeyMapper<T>,
        still_referenced: &dyn Fn(&str) -> bool,
    ) -> Vec<T> {
        let all: Vec<String> = self.held.iter().cloned().collect();
        self.sent.clear();
        self.confirmed = None;
        self.window = Range::default();
        self.active = Range::default();
        self.requested = None;
        self.state = ControllerState::Idle;
        self.release(all, keys, still_referenced)
    }

    /// Stop tracking `key` without releasing it.
    pub fn forget_key(&mut self, key: &str) {
        self.held.remove(key);
    }

    fn release(
        &mut self,
        candidates: Vec<String>,
        keys: &mut KeyMapper<T>,
        still_referenced: &dyn Fn(&str) -> bool,
    ) -> Vec<T> {
        let mut released = Vec::new();
        for key in candidates {
            self.held.remove(&key);
            if still_referenced(&key) {
                continue;
            }
            if let Some(item) = keys.remove_key(&key) {
                released.push(item);
            }
        }
        if !released.is_empty() {
            ftree_core::debug!(
                parent_key = self.parent_key.as_deref().unwrap_or("<root>"),
                released = released.len(),
                "passivated keys"
            );
        }
        released
    }
}

impl<T: Item> fmt::Debug for CommunicationController<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommunicationController")
            .field("parent_key", &self.parent_key)
            .field("state", &self.state)
            .field("requested", &self.requested)
            .field("active", &self.active)
            .field("held", &self.held.len())
            .field("flushes", &self.flushes)
            .finish()
    }
}
