#![forbid(unsafe_code)]

//! Client calls and per-turn update batches.
//!
//! An [`UpdateQueue`] collects [`ClientCall`]s for one target during a turn
//! and hands them to a [`ClientChannel`] on commit. Committing consumes the
//! queue, so a batch can only be delivered once and the client sees all of a
//! turn's calls for a target or none of them.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Client operation names.
pub mod ops {
    /// Flat size of the whole visible hierarchy.
    pub const UPDATE_SIZE: &str = "updateSize";
    /// Property name holding the item key.
    pub const UPDATE_UNIQUE_ITEM_ID_PATH: &str = "updateUniqueItemIdPath";
    /// Rows for a range, optionally under a parent key.
    pub const SET: &str = "set";
    /// Drop rows for a range, optionally under a parent key.
    pub const CLEAR: &str = "clear";
    /// Drop all client expansion state.
    pub const CLEAR_EXPANDED: &str = "clearExpanded";
    /// Root batch confirmation.
    pub const CONFIRM: &str = "confirm";
    /// One page of a parent's children.
    pub const CONFIRM_LEVEL: &str = "confirmLevel";
    /// Parent batch confirmation.
    pub const CONFIRM_PARENT: &str = "confirmParent";
    /// Items that became expanded.
    pub const EXPAND_ITEMS: &str = "expandItems";
    /// Items that became collapsed.
    pub const COLLAPSE_ITEMS: &str = "collapseItems";
    /// Full hierarchy resync.
    pub const ENSURE_HIERARCHY: &str = "ensureHierarchy";
    /// Refreshed records for items already on the client.
    pub const UPDATE_DATA: &str = "updateData";
}

/// One named client function invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientCall {
    /// Function name.
    pub name: String,
    /// Positional JSON arguments.
    pub args: Vec<Value>,
}

impl ClientCall {
    /// Create a call.
    #[must_use]
    pub fn new(name: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }
}

/// Sink for committed client calls.
pub trait ClientChannel {
    /// Deliver one call.
    fn call_function(&mut self, call: ClientCall);
}

/// A channel that keeps every call it receives.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordingChannel {
    calls: Vec<ClientCall>,
}

impl RecordingChannel {
    /// Create an empty channel.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All calls received so far.
    #[must_use]
    pub fn calls(&self) -> &[ClientCall] {
        &self.calls
    }

    /// Calls with the given name.
    pub fn calls_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a ClientCall> + 'a {
        self.calls.iter().filter(move |c| c.name == name)
    }

    /// Names of all calls, in order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.calls.iter().map(|c| c.name.as_str()).collect()
    }

    /// Take the calls, leaving the channel empty.
    pub fn take(&mut self) -> Vec<ClientCall> {
        std::mem::take(&mut self.calls)
    }

    /// Whether no calls were received.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}

impl ClientChannel for RecordingChannel {
    fn call_function(&mut self, call: ClientCall) {
        self.calls.push(call);
    }
}

/// An ordered batch of client calls for one target.
#[derive(Debug, Clone, PartialEq)]
#[must_use = "an update queue does nothing until committed"]
pub struct UpdateQueue {
    calls: Vec<ClientCall>,
}

impl UpdateQueue {
    /// Start a batch announcing the flat `size` and the key property.
    pub fn start(size: usize, unique_key_property: &str) -> Self {
        let mut queue = Self { calls: Vec::new() };
        queue.enqueue(ops::UPDATE_SIZE, vec![Value::from(size)]);
        if !unique_key_property.is_empty() {
            queue.enqueue(
                ops::UPDATE_UNIQUE_ITEM_ID_PATH,
                vec![Value::from(unique_key_property)],
            );
        }
        queue
    }

    /// Append an arbitrary call.
    pub fn enqueue(&mut self, name: &str, args: Vec<Value>) {
        self.calls.push(ClientCall::new(name, args));
    }

    /// Send `rows` starting at flat index `start`.
    pub fn set(&mut self, start: usize, rows: Vec<Value>) {
        self.enqueue(ops::SET, vec![Value::from(start), Value::Array(rows)]);
    }

    /// Send `rows` starting at child index `start` of `parent_key`.
    pub fn set_for_parent(&mut self, start: usize, rows: Vec<Value>, parent_key: &str) {
        self.enqueue(
            ops::SET,
            vec![
                Value::from(start),
                Value::Array(rows),
                Value::from(parent_key),
            ],
        );
    }

    /// Drop `length` rows at flat index `start`.
    pub fn clear(&mut self, start: usize, length: usize) {
        self.enqueue(ops::CLEAR, vec![Value::from(start), Value::from(length)]);
    }

    /// Drop `length` child rows at `start` under `parent_key`.
    pub fn clear_for_parent(&mut self, start: usize, length: usize, parent_key: &str) {
        self.enqueue(
            ops::CLEAR,
            vec![
                Value::from(start),
                Value::from(length),
                Value::from(parent_key),
            ],
        );
    }

    /// Drop all client expansion state.
    pub fn clear_expanded(&mut self) {
        self.enqueue(ops::CLEAR_EXPANDED, Vec::new());
    }

    /// Calls enqueued so far.
    #[must_use]
    pub fn calls(&self) -> &[ClientCall] {
        &self.calls
    }

    /// Deliver every call in enqueue order.
    pub fn commit(self, channel: &mut dyn ClientChannel) {
        for call in self.calls {
            channel.call_function(call);
        }
    }

    /// Enqueue `confirm(update_id)` and deliver.
    pub fn commit_confirm(mut self, update_id: u64, channel: &mut dyn ClientChannel) {
        self.enqueue(ops::CONFIRM, vec![Value::from(update_id)]);
        self.commit(channel);
    }

    /// Enqueue `confirmParent(update_id, parent_key, level_size)` and deliver.
    pub fn commit_parent(
        mut self,
        update_id: u64,
        parent_key: &str,
        level_size: usize,
        channel: &mut dyn ClientChannel,
    ) {
        self.enqueue(
            ops::CONFIRM_PARENT,
            vec![
                Value::from(update_id),
                Value::from(parent_key),
                Value::from(level_size),
            ],
        );
        self.commit(channel);
    }
}
