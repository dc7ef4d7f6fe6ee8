#![forbid(unsafe_code)]

//! The tree grid component.
//!
//! [`TreeGrid`] is what a host embeds: it owns a
//! [`HierarchicalDataCommunicator`], answers client RPCs addressed by key,
//! offers the server-side expand/collapse API, and queues expand/collapse
//! events for the host to drain.

use std::fmt;
use std::rc::Rc;

use ftree_core::Item;
use ftree_data::{
    ClientChannel, CommunicatorConfig, CommunicatorError, DataProvider, FlushReport,
    HierarchicalDataCommunicator, HierarchicalQuery, ItemFilter,
};

use crate::protocol::ClientRequest;

/// Decides whether the user may collapse an item.
pub type CollapseAllowed<T> = Rc<dyn Fn(&T) -> bool>;

/// Expansion change reported to the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeGridEvent<T> {
    /// Items became expanded.
    Expand { items: Vec<T>, user_originated: bool },
    /// Items became collapsed.
    Collapse { items: Vec<T>, user_originated: bool },
}

impl<T> TreeGridEvent<T> {
    /// Items the event is about.
    #[must_use]
    pub fn items(&self) -> &[T] {
        match self {
            Self::Expand { items, .. } | Self::Collapse { items, .. } => items,
        }
    }

    /// Whether the client asked for the change.
    #[must_use]
    pub fn is_user_originated(&self) -> bool {
        match self {
            Self::Expand {
                user_originated, ..
            }
            | Self::Collapse {
                user_originated, ..
            } => *user_originated,
        }
    }
}

/// A grid showing hierarchical data.
pub struct TreeGrid<T: Item, F: Clone + 'static = ItemFilter<T>> {
    communicator: HierarchicalDataCommunicator<T, F>,
    collapse_allowed: CollapseAllowed<T>,
    events: Vec<TreeGridEvent<T>>,
}

impl<T: Item, F: Clone + 'static> TreeGrid<T, F> {
    /// A grid over `provider` with the default configuration.
    pub fn new(provider: Rc<dyn DataProvider<T, F>>) -> Result<Self, CommunicatorError> {
        Self::with_config(provider, CommunicatorConfig::default())
    }

    /// A grid over `provider` with `config`.
    pub fn with_config(
        provider: Rc<dyn DataProvider<T, F>>,
        config: CommunicatorConfig,
    ) -> Result<Self, CommunicatorError> {
        Ok(Self::from_communicator(HierarchicalDataCommunicator::with_config(
            provider, config,
        )?))
    }

    /// Wrap an existing communicator.
    #[must_use]
    pub fn from_communicator(communicator: HierarchicalDataCommunicator<T, F>) -> Self {
        Self {
            communicator,
            collapse_allowed: Rc::new(|_: &T| true),
            events: Vec::new(),
        }
    }

    /// The data communicator.
    #[must_use]
    pub fn communicator(&self) -> &HierarchicalDataCommunicator<T, F> {
        &self.communicator
    }

    /// The data communicator, mutably.
    pub fn communicator_mut(&mut self) -> &mut HierarchicalDataCommunicator<T, F> {
        &mut self.communicator
    }

    /// Replace the provider. Flat providers are rejected.
    pub fn set_data_provider(
        &mut self,
        provider: Rc<dyn DataProvider<T, F>>,
    ) -> Result<(), CommunicatorError> {
        self.communicator.set_data_provider(provider)
    }

    // --- Client calls ------------------------------------------------------

    /// Dispatch one decoded client message. Returns whether it had an effect.
    pub fn handle(&mut self, request: ClientRequest) -> bool {
        ftree_core::trace!(request = request.type_name(), "client request");
        match request {
            ClientRequest::SetRequestedRange { start, length } => {
                self.set_requested_range(start, length);
                true
            }
            ClientRequest::SetParentRequestedRange {
                start,
                length,
                parent_key,
            } => self.set_parent_requested_range(start, length, &parent_key),
            ClientRequest::UpdateExpandedState { key, expanded } => {
                self.update_expanded_state(&key, expanded)
            }
            ClientRequest::ConfirmUpdate { id } => self.confirm_update(id),
            ClientRequest::ConfirmParentUpdate { id, parent_key } => {
                self.confirm_parent_update(id, &parent_key)
            }
        }
    }

    /// The client scrolled the flat view.
    pub fn set_requested_range(&mut self, start: usize, length: usize) {
        self.communicator.set_requested_range(start, length);
    }

    /// The client scrolled within `parent_key`'s children. Unknown keys and
    /// collapsed parents are ignored.
    pub fn set_parent_requested_range(
        &mut self,
        start: usize,
        length: usize,
        parent_key: &str,
    ) -> bool {
        self.communicator
            .set_parent_requested_range_by_key(start, length, parent_key)
    }

    /// The user toggled the item with `key`. Unknown keys are ignored.
    ///
    /// The client already shows the new state, so nothing is synced back;
    /// collapsing is refused when the collapse policy says no.
    pub fn update_expanded_state(&mut self, key: &str, expanded: bool) -> bool {
        let Some(item) = self.communicator.get_key_mapper().get(key).cloned() else {
            ftree_core::trace!(key, "expansion change for unknown key ignored");
            return false;
        };
        if expanded {
            !self.expand_with(&[item], false, true).is_empty()
        } else if self.is_item_collapse_allowed(&item) {
            !self.collapse_with(&[item], false, true).is_empty()
        } else {
            ftree_core::debug!(key, "collapse refused by policy");
            false
        }
    }

    /// The client applied root batch `id`.
    pub fn confirm_update(&mut self, id: u64) -> bool {
        self.communicator.confirm_update(id)
    }

    /// The client applied batch `id` for `parent_key`.
    pub fn confirm_parent_update(&mut self, id: u64, parent_key: &str) -> bool {
        self.communicator.confirm_parent_update(id, parent_key)
    }

    // --- Server API --------------------------------------------------------

    /// Expand `items`. Already expanded items and leaves are skipped.
    pub fn expand(&mut self, items: &[T]) -> Vec<T> {
        self.expand_with(items, true, false)
    }

    /// Collapse `items`. Already collapsed items are skipped.
    pub fn collapse(&mut self, items: &[T]) -> Vec<T> {
        self.collapse_with(items, true, false)
    }

    fn expand_with(&mut self, items: &[T], sync: bool, user_originated: bool) -> Vec<T> {
        let page_size = if sync {
            self.communicator.config().page_size
        } else {
            0
        };
        let expanded = self.communicator.expand(items, page_size, sync);
        if !expanded.is_empty() {
            self.events.push(TreeGridEvent::Expand {
                items: expanded.clone(),
                user_originated,
            });
        }
        expanded
    }

    fn collapse_with(&mut self, items: &[T], sync: bool, user_originated: bool) -> Vec<T> {
        let collapsed = self.communicator.collapse(items, sync);
        if !collapsed.is_empty() {
            self.events.push(TreeGridEvent::Collapse {
                items: collapsed.clone(),
                user_originated,
            });
        }
        collapsed
    }

    /// Expand `items` and their descendants up to `depth` levels below them.
    ///
    /// `depth == 0` expands only `items`. Fires no events.
    pub fn expand_recursively(&mut self, items: &[T], depth: usize) -> Vec<T> {
        let targets = self.items_with_children_recursively(items, depth);
        let page_size = self.communicator.config().page_size;
        self.communicator.expand(&targets, page_size, true)
    }

    /// Collapse `items` and their descendants up to `depth` levels below
    /// them. Fires no events.
    pub fn collapse_recursively(&mut self, items: &[T], depth: usize) -> Vec<T> {
        let targets = self.items_with_children_recursively(items, depth);
        self.communicator.collapse(&targets, true)
    }

    /// `items` that have children, followed by their descendants with
    /// children down to `depth` levels.
    #[must_use]
    pub fn items_with_children_recursively(&self, items: &[T], depth: usize) -> Vec<T> {
        let Some(provider) = Rc::clone(self.communicator.data_provider()).into_hierarchical()
        else {
            return Vec::new();
        };
        let mut out = Vec::new();
        let mut level: Vec<T> = items.to_vec();
        for remaining in (0..=depth).rev() {
            let mut next = Vec::new();
            for item in level {
                if !provider.has_children(&item) {
                    continue;
                }
                if remaining > 0 {
                    next.extend(provider.fetch_children(&HierarchicalQuery::all(Some(&item))));
                }
                out.push(item);
            }
            level = next;
        }
        out
    }

    /// Expand a collapsed item or collapse an expanded one, as the user would.
    pub fn toggle_expanded_state(&mut self, item: &T) -> Vec<T> {
        let item = std::slice::from_ref(item);
        if self.is_expanded(&item[0]) {
            self.collapse_with(item, false, true)
        } else {
            self.expand_with(item, false, true)
        }
    }

    /// Whether `item` is expanded.
    #[must_use]
    pub fn is_expanded(&self, item: &T) -> bool {
        self.communicator.is_expanded(item)
    }

    /// Replace the policy deciding which items the user may collapse, and
    /// resync the client.
    pub fn set_item_collapse_allowed_provider(&mut self, provider: CollapseAllowed<T>) {
        self.collapse_allowed = provider;
        self.communicator.refresh_all();
    }

    /// Whether the user may collapse `item`.
    #[must_use]
    pub fn is_item_collapse_allowed(&self, item: &T) -> bool {
        (self.collapse_allowed)(item)
    }

    // --- Turn ----------------------------------------------------------------

    /// Events raised since the last drain, oldest first.
    pub fn drain_events(&mut self) -> Vec<TreeGridEvent<T>> {
        std::mem::take(&mut self.events)
    }

    /// Send everything this turn produced.
    pub fn flush(&mut self, channel: &mut dyn ClientChannel) -> FlushReport {
        self.communicator.flush(channel)
    }
}

impl<T: Item, F: Clone + 'static> fmt::Debug for TreeGrid<T, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TreeGrid")
            .field("communicator", &self.communicator)
            .field("events", &self.events.len())
            .finish()
    }
}
