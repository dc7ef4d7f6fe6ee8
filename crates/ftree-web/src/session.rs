#![forbid(unsafe_code)]

//! Host-driven request/response loop.
//!
//! [`TreeGridSession`] runs a [`TreeGrid`] without threads or callbacks. The
//! host controls the loop:
//!
//! 1. Push decoded or raw JSON client messages via
//!    [`TreeGridSession::push_message`].
//! 2. Call [`TreeGridSession::step`] once per server turn. It handles every
//!    pending message in arrival order and then flushes the grid exactly
//!    once.
//! 3. Send [`TreeGridSession::take_outputs`] (or
//!    [`TreeGridSession::outputs_json`]) back to the client.
//!
//! Server-side calls made through [`TreeGridSession::grid_mut`] between steps
//! belong to the next turn.

use std::collections::VecDeque;

use ftree_core::Item;
use ftree_data::{ClientCall, FlushReport, RecordingChannel};

use crate::protocol::{ClientRequest, ProtocolError};
use crate::tree_grid::TreeGrid;

/// Result of a single [`TreeGridSession::step`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepResult {
    /// Messages handled during this step.
    pub messages_processed: usize,
    /// Messages that referred to unknown keys or collapsed parents.
    pub messages_ignored: usize,
    /// Calls committed to the client during this step.
    pub calls_committed: usize,
    /// What the flush did.
    pub report: FlushReport,
    /// Turn index (monotonically increasing).
    pub turn: u64,
}

/// Message inbox, tree grid, and outgoing calls of one client.
pub struct TreeGridSession<T: Item, F: Clone + 'static = ftree_data::ItemFilter<T>> {
    grid: TreeGrid<T, F>,
    inbox: VecDeque<ClientRequest>,
    outbox: RecordingChannel,
    turn: u64,
}

impl<T: Item, F: Clone + 'static> TreeGridSession<T, F> {
    /// Start a session around `grid`.
    #[must_use]
    pub fn new(grid: TreeGrid<T, F>) -> Self {
        Self {
            grid,
            inbox: VecDeque::new(),
            outbox: RecordingChannel::new(),
            turn: 0,
        }
    }

    /// The grid.
    #[must_use]
    pub fn grid(&self) -> &TreeGrid<T, F> {
        &self.grid
    }

    /// The grid, for server-side calls.
    pub fn grid_mut(&mut self) -> &mut TreeGrid<T, F> {
        &mut self.grid
    }

    /// Queue a raw JSON message. Invalid messages are rejected immediately
    /// and never reach the grid.
    pub fn push_message(&mut self, text: &str) -> Result<(), ProtocolError> {
        let request = ClientRequest::parse(text).inspect_err(|err| {
            ftree_core::warn!(%err, "client message rejected");
        })?;
        self.push_request(request);
        Ok(())
    }

    /// Queue a decoded message.
    pub fn push_request(&mut self, request: ClientRequest) {
        self.inbox.push_back(request);
    }

    /// Messages waiting for the next step.
    #[must_use]
    pub fn pending_messages(&self) -> usize {
        self.inbox.len()
    }

    /// Handle all pending messages, then flush the grid once.
    pub fn step(&mut self) -> StepResult {
        #[cfg(feature = "tracing")]
        let _span = tracing::debug_span!("session_step", turn = self.turn + 1).entered();

        let mut messages_processed = 0;
        let mut messages_ignored = 0;
        while let Some(request) = self.inbox.pop_front() {
            messages_processed += 1;
            if !self.grid.handle(request) {
                messages_ignored += 1;
            }
        }

        let before = self.outbox.calls().len();
        let report = self.grid.flush(&mut self.outbox);
        self.turn += 1;
        StepResult {
            messages_processed,
            messages_ignored,
            calls_committed: self.outbox.calls().len() - before,
            report,
            turn: self.turn,
        }
    }

    /// Take the committed client calls, leaving the outbox empty.
    pub fn take_outputs(&mut self) -> Vec<ClientCall> {
        self.outbox.take()
    }

    /// The committed client calls as a JSON array, without taking them.
    pub fn outputs_json(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self.outbox.calls())
            .map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    /// Number of completed steps.
    #[must_use]
    pub fn turn(&self) -> u64 {
        self.turn
    }
}
