#![forbid(unsafe_code)]

//! The hierarchical data communicator.
//!
//! [`HierarchicalDataCommunicator`] is the single entry point for a tree
//! grid's data: it exposes the tree as a flat paged sequence, routes
//! per-parent page requests to [`CommunicationController`]s, applies
//! expand/collapse, and owns the keys the client sees.
//!
//! # Turn model
//!
//! Nothing is sent while a turn is processed. Every mutation only records a
//! [`DeferredTask`] (at most one per target) and, for whole-tree changes, a
//! tree operation. The host calls [`HierarchicalDataCommunicator::flush`]
//! exactly once before its response goes out; that call drains the provider
//! change journal, runs each pending task once, and then passivates keys that
//! left every live window.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::rc::Rc;

use ftree_core::key_mapper::UniqueKeyProvider;
use ftree_core::{Item, KeyMapper, Range};
use serde_json::{Map, Value};

use crate::config::CommunicatorConfig;
use crate::controller::{CommunicationController, ControllerFlush, RowSource};
use crate::error::CommunicatorError;
use crate::generator::{CompositeDataGenerator, DataGenerator};
use crate::mapper::HierarchyMapper;
use crate::provider::{
    DataChange, DataProvider, HierarchicalDataProvider, QuerySortOrder, SortComparator,
};
use crate::tree_data::{ItemFilter, TreeData, TreeDataProvider};
use crate::update::{ClientChannel, UpdateQueue, ops};

/// Work scheduled for the end of the turn.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DeferredTask {
    /// Commit the accumulated tree operations.
    TreeUpdate,
    /// Flush the root controller.
    FlushRoot,
    /// Flush the controller of this parent key.
    FlushParent(String),
}

#[derive(Debug, Clone)]
enum TreeOp<T> {
    Expand(Vec<T>),
    Collapse(Vec<T>),
    EnsureHierarchy,
    Refresh(Vec<T>),
}

/// What one [`HierarchicalDataCommunicator::flush`] did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Controller flushes that produced a batch.
    pub controller_flushes: usize,
    /// Whole-tree batches committed.
    pub tree_updates: usize,
    /// Keys released by passivation.
    pub released_keys: usize,
    /// Per-controller details, in flush order.
    pub flushed: Vec<ControllerFlush>,
}

impl FlushReport {
    /// Whether the flush sent nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.controller_flushes == 0 && self.tree_updates == 0
    }
}

/// Mapper, keys, and record generation: everything a controller reads from.
struct DataCore<T: Item, F> {
    mapper: HierarchyMapper<T, F>,
    keys: KeyMapper<T>,
    generator: CompositeDataGenerator<T>,
    unique_key_property: String,
    /// Keys handed out during the current turn.
    fresh: HashSet<String>,
    /// Keys that no window held at the last flush.
    loose: HashSet<String>,
    /// Item key to the key sent as its `parentUniqueKey`.
    parent_keys: HashMap<String, String>,
}

impl<T: Item, F> DataCore<T, F> {
    fn records(&mut self, items: &[T]) -> Vec<Value> {
        items.iter().map(|item| self.record(item).1).collect()
    }

    fn forget_issued_keys(&mut self) {
        self.fresh.clear();
        self.loose.clear();
        self.parent_keys.clear();
    }
}

impl<T: Item, F> RowSource<T> for DataCore<T, F> {
    fn start_update(&self) -> UpdateQueue {
        UpdateQueue::start(self.mapper.get_root_size(), &self.unique_key_property)
    }

    fn fetch_rows(&self, parent: Option<&T>, range: Range) -> Vec<T> {
        match parent {
            None => self.mapper.fetch_root_items(range),
            Some(parent) => self.mapper.fetch_child_items(Some(parent), range),
        }
    }

    fn row_count(&self, parent: Option<&T>) -> usize {
        match parent {
            None => self.mapper.get_root_size(),
            Some(parent) => self.mapper.count_child_items(Some(parent)),
        }
    }

    fn has_expanded_items(&self) -> bool {
        self.mapper.has_expanded_items()
    }

    fn record(&mut self, item: &T) -> (String, Value) {
        let key = self.keys.key(item);
        self.fresh.insert(key.clone());
        let mut record = Map::new();
        record.insert("key".into(), Value::from(key.as_str()));
        if self.unique_key_property != "key" && !self.unique_key_property.is_empty() {
            record.insert(self.unique_key_property.clone(), Value::from(key.as_str()));
        }
        record.insert(
            "level".into(),
            Value::from(self.mapper.get_depth(item).unwrap_or(0)),
        );
        record.insert("expanded".into(), Value::from(self.mapper.is_expanded(item)));
        record.insert("leaf".into(), Value::from(!self.mapper.has_children(item)));
        if let Some(parent) = self.mapper.get_parent_of_item(item) {
            let parent_key = self.keys.key(&parent);
            self.fresh.insert(parent_key.clone());
            self.parent_keys.insert(key.clone(), parent_key.clone());
            record.insert("parentUniqueKey".into(), Value::from(parent_key));
        }
        self.generator.generate_data(item, &mut record);
        (key, Value::Object(record))
    }
}

/// Bridges flat paging, keys, and per-parent windows over a hierarchical
/// provider.
pub struct HierarchicalDataCommunicator<T: Item, F: Clone + 'static = ItemFilter<T>> {
    config: CommunicatorConfig,
    provider: Rc<dyn DataProvider<T, F>>,
    core: DataCore<T, F>,
    root: CommunicationController<T>,
    controllers: HashMap<String, CommunicationController<T>>,
    pending: Vec<DeferredTask>,
    scheduled: HashSet<DeferredTask>,
    tree_ops: Vec<TreeOp<T>>,
    next_update_id: u64,
}

impl<T: Item> HierarchicalDataCommunicator<T, ItemFilter<T>> {
    /// A communicator over an empty in-memory tree.
    #[must_use]
    pub fn empty(config: CommunicatorConfig) -> Self {
        let provider: Rc<TreeDataProvider<T>> =
            Rc::new(TreeDataProvider::from_tree(TreeData::new()));
        let hierarchical: Rc<dyn HierarchicalDataProvider<T, ItemFilter<T>>> =
            provider.clone();
        Self::build(provider, hierarchical, config)
    }
}

impl<T: Item, F: Clone + 'static> HierarchicalDataCommunicator<T, F> {
    /// Attach `provider` with the default configuration.
    pub fn new(provider: Rc<dyn DataProvider<T, F>>) -> Result<Self, CommunicatorError> {
        Self::with_config(provider, CommunicatorConfig::default())
    }

    /// Attach `provider` with `config`.
    ///
    /// Fails with [`CommunicatorError::UnsupportedProvider`] for flat
    /// providers.
    pub fn with_config(
        provider: Rc<dyn DataProvider<T, F>>,
        config: CommunicatorConfig,
    ) -> Result<Self, CommunicatorError> {
        let hierarchical = Rc::clone(&provider)
            .into_hierarchical()
            .ok_or(CommunicatorError::UnsupportedProvider)?;
        Ok(Self::build(provider, hierarchical, config))
    }

    fn build(
        provider: Rc<dyn DataProvider<T, F>>,
        hierarchical: Rc<dyn HierarchicalDataProvider<T, F>>,
        config: CommunicatorConfig,
    ) -> Self {
        let mapper = HierarchyMapper::new(hierarchical).with_scan_chunk(config.scan_chunk);
        Self {
            root: CommunicationController::root(config.page_size),
            core: DataCore {
                mapper,
                keys: KeyMapper::new(),
                generator: CompositeDataGenerator::new(),
                unique_key_property: config.unique_key_property.clone(),
                fresh: HashSet::new(),
                loose: HashSet::new(),
                parent_keys: HashMap::new(),
            },
            config,
            provider,
            controllers: HashMap::new(),
            pending: Vec::new(),
            scheduled: HashSet::new(),
            tree_ops: Vec::new(),
            next_update_id: 0,
        }
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &CommunicatorConfig {
        &self.config
    }

    // --- Provider, sorting, filtering ------------------------------------

    /// The attached provider.
    #[must_use]
    pub fn data_provider(&self) -> &Rc<dyn DataProvider<T, F>> {
        &self.provider
    }

    /// Replace the provider.
    ///
    /// All keys, expansion state, and controllers of the old provider are
    /// dropped; sort and filter carry over. A flat provider is rejected and
    /// leaves the communicator untouched.
    pub fn set_data_provider(
        &mut self,
        provider: Rc<dyn DataProvider<T, F>>,
    ) -> Result<(), CommunicatorError> {
        let hierarchical = Rc::clone(&provider)
            .into_hierarchical()
            .ok_or(CommunicatorError::UnsupportedProvider)?;
        #[cfg(feature = "tracing")]
        let _span = tracing::debug_span!("set_data_provider").entered();

        self.core.mapper.destroy_all_data();
        self.core.generator.destroy_all_data();
        let released = self.core.keys.len();
        self.core.keys.remove_all();
        self.core.forget_issued_keys();
        self.controllers.clear();
        self.root = CommunicationController::root(self.config.page_size);
        self.pending.clear();
        self.scheduled.clear();
        self.tree_ops.clear();

        let mut mapper =
            HierarchyMapper::new(hierarchical).with_scan_chunk(self.config.scan_chunk);
        mapper.set_back_end_sorting(self.core.mapper.back_end_sorting().to_vec());
        mapper.set_in_memory_sorting(self.core.mapper.in_memory_sorting().cloned());
        mapper.set_filter(self.core.mapper.filter().cloned());
        self.core.mapper = mapper;
        self.provider = provider;

        ftree_core::info!(released, "data provider replaced");
        self.push_tree_op(TreeOp::EnsureHierarchy);
        Ok(())
    }

    /// Replace the provider and the filter together.
    pub fn set_data_provider_with_filter(
        &mut self,
        provider: Rc<dyn DataProvider<T, F>>,
        filter: Option<F>,
    ) -> Result<(), CommunicatorError> {
        self.set_data_provider(provider)?;
        self.core.mapper.set_filter(filter);
        Ok(())
    }

    /// Replace the backend sort orders and resync.
    ///
    /// Known parents survive a sort change, so only the levels the next
    /// windows read are walked again.
    pub fn set_back_end_sorting(&mut self, sort_orders: Vec<QuerySortOrder>) {
        self.core.mapper.set_back_end_sorting(sort_orders);
        self.resync();
    }

    /// Replace the in-memory comparator and resync.
    pub fn set_in_memory_sorting(&mut self, comparator: Option<SortComparator<T>>) {
        self.core.mapper.set_in_memory_sorting(comparator);
        self.resync();
    }

    /// Replace the filter and resync.
    pub fn set_filter(&mut self, filter: Option<F>) {
        self.core.mapper.set_filter(filter);
        self.resync();
    }

    /// Current filter.
    #[must_use]
    pub fn filter(&self) -> Option<&F> {
        self.core.mapper.filter()
    }

    // --- Keys and records ------------------------------------------------

    /// The key mapper shared by every window.
    #[must_use]
    pub fn get_key_mapper(&self) -> &KeyMapper<T> {
        &self.core.keys
    }

    /// Derive keys from items instead of a counter, for keys allocated from
    /// now on.
    pub fn set_unique_key_provider(&mut self, provider: Option<UniqueKeyProvider<T>>) {
        self.core.keys.set_unique_key_provider(provider);
    }

    /// Register a record generator.
    pub fn add_data_generator(&mut self, generator: Rc<dyn DataGenerator<T>>) {
        self.core.generator.add(generator);
    }

    /// Unregister a record generator.
    pub fn remove_data_generator(&mut self, generator: &Rc<dyn DataGenerator<T>>) -> bool {
        self.core.generator.remove(generator)
    }

    /// The client record of `item`, allocating its key.
    pub fn generate_record(&mut self, item: &T) -> Value {
        self.core.record(item).1
    }

    // --- Flat paging -----------------------------------------------------

    /// Flat rows `[offset, offset + limit)` of the visible hierarchy.
    pub fn fetch_from_provider(&self, offset: usize, limit: usize) -> Vec<T> {
        self.core
            .mapper
            .fetch_root_items(Range::with_length(offset, limit))
    }

    /// Number of visible rows.
    #[must_use]
    pub fn get_data_provider_size(&self) -> usize {
        self.core.mapper.get_root_size()
    }

    /// Number of root items, ignoring descendants.
    #[must_use]
    pub fn root_item_count(&self) -> usize {
        self.core.mapper.root_item_count()
    }

    /// The client's flat window. Served at the next flush.
    pub fn set_requested_range(&mut self, start: usize, length: usize) {
        self.root.set_request_range(start, length);
        self.schedule(DeferredTask::FlushRoot);
    }

    /// The client received root batch `update_id`.
    pub fn confirm_update(&mut self, update_id: u64) -> bool {
        self.root.confirm_update(update_id)
    }

    // --- Per-parent paging -----------------------------------------------

    /// The client's window over the children of `parent`.
    ///
    /// Served at the next flush; later calls for the same parent in the same
    /// turn replace the range. Returns `false` and does nothing when `parent`
    /// is not expanded.
    pub fn set_parent_requested_range(&mut self, start: usize, length: usize, parent: &T) -> bool {
        if !self.core.mapper.is_expanded(parent) {
            ftree_core::trace!(?parent, "page request for collapsed parent ignored");
            return false;
        }
        let parent_key = self.core.keys.key(parent);
        self.core.fresh.insert(parent_key.clone());
        let page_size = self.config.page_size;
        self.controllers
            .entry(parent_key.clone())
            .or_insert_with(|| {
                CommunicationController::for_parent(parent.clone(), parent_key.clone(), page_size)
            })
            .set_request_range(start, length);
        self.schedule(DeferredTask::FlushParent(parent_key));
        true
    }

    /// Same as [`Self::set_parent_requested_range`], addressed by key.
    /// Unknown keys are ignored.
    pub fn set_parent_requested_range_by_key(
        &mut self,
        start: usize,
        length: usize,
        parent_key: &str,
    ) -> bool {
        match self.core.keys.get(parent_key).cloned() {
            Some(parent) => self.set_parent_requested_range(start, length, &parent),
            None => {
                ftree_core::trace!(parent_key, "page request for unknown key ignored");
                false
            }
        }
    }

    /// The client received batch `update_id` for `parent_key`.
    pub fn confirm_parent_update(&mut self, update_id: u64, parent_key: &str) -> bool {
        self.controllers
            .get_mut(parent_key)
            .is_some_and(|c| c.confirm_update(update_id))
    }

    /// Controller of the flat window.
    #[must_use]
    pub fn root_controller(&self) -> &CommunicationController<T> {
        &self.root
    }

    /// Controller of `parent`'s children, if one exists.
    #[must_use]
    pub fn parent_controller(&self, parent: &T) -> Option<&CommunicationController<T>> {
        let key = self.core.keys.key_of(parent)?;
        self.controllers.get(key)
    }

    /// Number of live per-parent controllers.
    #[must_use]
    pub fn controller_count(&self) -> usize {
        self.controllers.len()
    }

    // --- Expansion -------------------------------------------------------

    /// Expand `items`. Returns the items whose state changed.
    ///
    /// With `sync_and_refresh` the client is told at the next flush and,
    /// when `page_size > 0`, the first page of each expanded item is
    /// requested. Without it the caller is responsible for the client.
    pub fn expand(&mut self, items: &[T], page_size: usize, sync_and_refresh: bool) -> Vec<T> {
        let expanded: Vec<T> = items
            .iter()
            .filter(|item| self.core.mapper.expand(item))
            .cloned()
            .collect();
        ftree_core::debug!(requested = items.len(), expanded = expanded.len(), "expand");
        if sync_and_refresh && !expanded.is_empty() {
            if page_size > 0 {
                for item in &expanded {
                    self.set_parent_requested_range(0, page_size, item);
                }
            }
            self.push_tree_op(TreeOp::Expand(expanded.clone()));
        }
        expanded
    }

    /// Collapse `items`. Returns the items whose state changed.
    ///
    /// Controllers of the collapsed items and of their known descendants are
    /// discarded and their keys released.
    pub fn collapse(&mut self, items: &[T], sync_and_refresh: bool) -> Vec<T> {
        let collapsed: Vec<T> = items
            .iter()
            .filter(|item| self.core.mapper.collapse(item))
            .cloned()
            .collect();
        ftree_core::debug!(requested = items.len(), collapsed = collapsed.len(), "collapse");
        for item in &collapsed {
            let doomed: Vec<String> = self
                .controllers
                .iter()
                .filter(|(_, c)| {
                    c.parent().is_some_and(|p| {
                        p == item || self.core.mapper.is_ancestor_of(item, p)
                    })
                })
                .map(|(key, _)| key.clone())
                .collect();
            self.discard_controllers(&doomed);
        }
        if sync_and_refresh && !collapsed.is_empty() {
            self.push_tree_op(TreeOp::Collapse(collapsed.clone()));
        }
        collapsed
    }

    /// Whether `item` is expanded.
    #[must_use]
    pub fn is_expanded(&self, item: &T) -> bool {
        self.core.mapper.is_expanded(item)
    }

    /// Whether `item` has children.
    #[must_use]
    pub fn has_children(&self, item: &T) -> bool {
        self.core.mapper.has_children(item)
    }

    /// Whether any item is expanded.
    #[must_use]
    pub fn has_expanded_items(&self) -> bool {
        self.core.mapper.has_expanded_items()
    }

    /// All expanded items, in arbitrary order.
    #[must_use]
    pub fn get_expanded_items(&self) -> Vec<T> {
        self.core.mapper.get_expanded_items()
    }

    // --- Position queries --------------------------------------------------

    /// Flat row of `item`, `None` when not visible.
    #[must_use]
    pub fn get_index(&self, item: &T) -> Option<usize> {
        self.core.mapper.get_index(item)
    }

    /// Flat row of the parent of `item`, `None` for roots and unknown items.
    #[must_use]
    pub fn get_parent_index(&self, item: &T) -> Option<usize> {
        self.core.mapper.get_parent_index(item)
    }

    /// Parent of `item`.
    #[must_use]
    pub fn get_parent_item(&self, item: &T) -> Option<T> {
        self.core.mapper.get_parent_of_item(item)
    }

    /// Depth of `item`, roots are 0.
    #[must_use]
    pub fn get_depth(&self, item: &T) -> Option<usize> {
        self.core.mapper.get_depth(item)
    }

    // --- Refresh -----------------------------------------------------------

    /// Drop every controller and resync the whole hierarchy.
    pub fn reset(&mut self) {
        self.core.mapper.invalidate_all();
        self.resync();
    }

    /// Release every window and ask the client to rebuild its hierarchy.
    fn resync(&mut self) {
        let mut released = self.release_root();
        let doomed: Vec<String> = self.controllers.keys().cloned().collect();
        released += self.discard_controllers(&doomed);
        ftree_core::debug!(released, "resync");
        self.push_tree_op(TreeOp::EnsureHierarchy);
    }

    /// Anything may have changed.
    pub fn refresh_all(&mut self) {
        self.reset();
    }

    /// `item` changed or was removed from the backend.
    ///
    /// A changed item may have gained or lost children: its subtree is
    /// measured again and the windows showing it are served again.
    pub fn refresh_item(&mut self, item: &T) {
        if self.core.mapper.contains(item) {
            self.refresh_present_item(item);
            return;
        }

        let forgotten = self.core.mapper.remove_item(item);
        for gone in &forgotten {
            let Some(key) = self.core.keys.remove(gone) else {
                continue;
            };
            self.discard_controllers(std::slice::from_ref(&key));
            self.root.forget_key(&key);
            for controller in self.controllers.values_mut() {
                controller.forget_key(&key);
            }
            self.core.generator.destroy_data(gone);
        }
        ftree_core::debug!(?item, forgotten = forgotten.len(), "item removed");

        self.root.request_refresh();
        self.schedule(DeferredTask::FlushRoot);
        let parents: Vec<String> = self
            .controllers
            .iter_mut()
            .filter(|(_, c)| !c.active_range().is_empty())
            .map(|(key, c)| {
                c.request_refresh();
                key.clone()
            })
            .collect();
        for key in parents {
            self.schedule(DeferredTask::FlushParent(key));
        }
    }

    fn refresh_present_item(&mut self, item: &T) {
        self.core.mapper.invalidate(item);
        if self.core.mapper.is_expanded(item) && !self.core.mapper.has_children(item) {
            self.collapse(std::slice::from_ref(item), true);
        }
        if self.core.keys.has(item) {
            self.core.keys.refresh(item);
            self.push_tree_op(TreeOp::Refresh(vec![item.clone()]));
        }
        ftree_core::debug!(?item, "item refreshed");

        self.root.request_refresh();
        self.schedule(DeferredTask::FlushRoot);
        let own = self.core.keys.key_of(item).map(str::to_owned);
        if let Some(key) = own
            && let Some(controller) = self.controllers.get_mut(&key)
        {
            controller.request_refresh();
            self.schedule(DeferredTask::FlushParent(key));
        }
    }

    // --- Deferred flush ----------------------------------------------------

    /// Tasks waiting for the next flush, in scheduling order.
    #[must_use]
    pub fn pending_tasks(&self) -> &[DeferredTask] {
        &self.pending
    }

    fn schedule(&mut self, task: DeferredTask) {
        if self.scheduled.insert(task.clone()) {
            self.pending.push(task);
        }
    }

    fn push_tree_op(&mut self, op: TreeOp<T>) {
        match (self.tree_ops.last_mut(), op) {
            (Some(TreeOp::Expand(items)), TreeOp::Expand(more)) => items.extend(more),
            (Some(TreeOp::Collapse(items)), TreeOp::Collapse(more)) => items.extend(more),
            (Some(TreeOp::Refresh(items)), TreeOp::Refresh(more)) => items.extend(more),
            (Some(TreeOp::EnsureHierarchy), TreeOp::EnsureHierarchy) => {}
            (_, op) => self.tree_ops.push(op),
        }
        self.schedule(DeferredTask::TreeUpdate);
    }

    fn next_update_id(&mut self) -> u64 {
        self.next_update_id += 1;
        self.next_update_id
    }

    /// Send everything this turn produced.
    ///
    /// Order: provider change journal, the tree update, the root window,
    /// parent windows in scheduling order, then key passivation. Each target
    /// is flushed at most once.
    pub fn flush(&mut self, channel: &mut dyn ClientChannel) -> FlushReport {
        #[cfg(feature = "tracing")]
        let _span = tracing::debug_span!("communicator_flush").entered();

        for change in self.provider.take_changes() {
            match change {
                DataChange::RefreshAll => self.refresh_all(),
                DataChange::RefreshItem(item) => self.refresh_item(&item),
            }
        }

        let mut report = FlushReport::default();
        let mut tasks = std::mem::take(&mut self.pending);
        self.scheduled.clear();
        tasks.sort_by_key(|task| match task {
            DeferredTask::TreeUpdate => 0,
            DeferredTask::FlushRoot => 1,
            DeferredTask::FlushParent(_) => 2,
        });

        for task in tasks {
            match task {
                DeferredTask::TreeUpdate => {
                    self.commit_tree_update(channel);
                    report.tree_updates += 1;
                }
                DeferredTask::FlushRoot => {
                    let id = self.next_update_id();
                    if let Some(done) = self.root.flush(id, &mut self.core, channel) {
                        report.flushed.push(done);
                    }
                }
                DeferredTask::FlushParent(key) => {
                    if !self.controllers.contains_key(&key) {
                        continue;
                    }
                    let id = self.next_update_id();
                    let Some(controller) = self.controllers.get_mut(&key) else {
                        continue;
                    };
                    if let Some(done) = controller.flush(id, &mut self.core, channel) {
                        report.flushed.push(done);
                    }
                }
            }
        }
        report.controller_flushes = report.flushed.len();
        report.released_keys = self.passivate();
        ftree_core::debug!(
            controller_flushes = report.controller_flushes,
            tree_updates = report.tree_updates,
            released_keys = report.released_keys,
            "turn flushed"
        );
        report
    }

    fn commit_tree_update(&mut self, channel: &mut dyn ClientChannel) {
        let mut queue = self.core.start_update();
        for op in std::mem::take(&mut self.tree_ops) {
            match op {
                TreeOp::Expand(items) => {
                    let records = self.core.records(&items);
                    queue.enqueue(ops::EXPAND_ITEMS, vec![Value::Array(records)]);
                }
                TreeOp::Collapse(items) => {
                    let records = self.core.records(&items);
                    queue.enqueue(ops::COLLAPSE_ITEMS, vec![Value::Array(records)]);
                }
                TreeOp::EnsureHierarchy => queue.enqueue(ops::ENSURE_HIERARCHY, Vec::new()),
                TreeOp::Refresh(items) => {
                    let records = self.core.records(&items);
                    queue.enqueue(ops::UPDATE_DATA, vec![Value::Array(records)]);
                }
            }
        }
        queue.commit(channel);
    }

    fn passivate(&mut self) -> usize {
        let mut released = {
            let controllers = &self.controllers;
            self.root.unregister_passivated_keys(&mut self.core.keys, &|key: &str| {
                controllers.contains_key(key) || controllers.values().any(|c| c.holds(key))
            })
        };
        let parent_keys: Vec<String> = self.controllers.keys().cloned().collect();
        for parent_key in parent_keys {
            let Some(mut controller) = self.controllers.remove(&parent_key) else {
                continue;
            };
            let root = &self.root;
            let controllers = &self.controllers;
            released.extend(controller.unregister_passivated_keys(
                &mut self.core.keys,
                &|key: &str| {
                    key == parent_key
                        || root.holds(key)
                        || controllers.contains_key(key)
                        || controllers.values().any(|c| c.holds(key))
                },
            ));
            self.controllers.insert(parent_key, controller);
        }
        released.extend(self.release_loose_keys());
        for item in &released {
            self.core.generator.destroy_data(item);
        }
        released.len()
    }

    fn window_holds(&self, key: &str) -> bool {
        self.root.holds(key)
            || self.controllers.contains_key(key)
            || self.controllers.values().any(|c| c.holds(key))
    }

    /// Release keys that only went out in records no window holds.
    ///
    /// Such keys come from tree operations, `parentUniqueKey` fields and
    /// [`Self::generate_record`]. A key survives the flush of the turn that
    /// handed it out. After that it is kept only while a window holds it or
    /// a held row names it as `parentUniqueKey`.
    fn release_loose_keys(&mut self) -> Vec<T> {
        let fresh = std::mem::take(&mut self.core.fresh);
        let mut candidates = std::mem::take(&mut self.core.loose);
        candidates.extend(fresh.iter().cloned());
        if candidates.is_empty() {
            return Vec::new();
        }
        let anchored: HashSet<String> = self
            .root
            .held_keys()
            .chain(self.controllers.values().flat_map(|c| c.held_keys()))
            .filter_map(|key| self.core.parent_keys.get(key).cloned())
            .collect();

        let mut released = Vec::new();
        for key in candidates {
            if !self.core.keys.has_key(&key) || self.window_holds(&key) {
                continue;
            }
            if fresh.contains(&key) || anchored.contains(&key) {
                self.core.loose.insert(key);
            } else if let Some(item) = self.core.keys.remove_key(&key) {
                released.push(item);
            }
        }
        let keys = &self.core.keys;
        self.core
            .parent_keys
            .retain(|item, parent| keys.has_key(item) && keys.has_key(parent));
        if !released.is_empty() {
            ftree_core::trace!(released = released.len(), "loose keys released");
        }
        released
    }

    fn release_root(&mut self) -> usize {
        let controllers = &self.controllers;
        let released = self.root.release_all(&mut self.core.keys, &|key: &str| {
            controllers.contains_key(key) || controllers.values().any(|c| c.holds(key))
        });
        for item in &released {
            self.core.generator.destroy_data(item);
        }
        released.len()
    }

    /// Remove the controllers keyed by `parent_keys` and release their keys.
    fn discard_controllers(&mut self, parent_keys: &[String]) -> usize {
        let removed: Vec<CommunicationController<T>> = parent_keys
            .iter()
            .filter_map(|key| self.controllers.remove(key))
            .collect();
        if removed.is_empty() {
            return 0;
        }
        let gone: HashSet<&str> = parent_keys.iter().map(String::as_str).collect();
        self.pending
            .retain(|t| !matches!(t, DeferredTask::FlushParent(k) if gone.contains(k.as_str())));
        self.scheduled
            .retain(|t| !matches!(t, DeferredTask::FlushParent(k) if gone.contains(k.as_str())));

        let mut released = Vec::new();
        for mut controller in removed {
            let root = &self.root;
            let controllers = &self.controllers;
            released.extend(controller.release_all(&mut self.core.keys, &|key: &str| {
                root.holds(key)
                    || controllers.contains_key(key)
                    || controllers.values().any(|c| c.holds(key))
            }));
        }
        for item in &released {
            self.core.generator.destroy_data(item);
        }
        released.len()
    }
}

impl<T: Item, F: Clone + 'static> fmt::Debug for HierarchicalDataCommunicator<T, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HierarchicalDataCommunicator")
            .field("config", &self.config)
            .field("mapper", &self.core.mapper)
            .field("keys", &self.core.keys)
            .field("root", &self.root)
            .field("controllers", &self.controllers.len())
            .field("pending", &self.pending)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::HierarchicalQuery;
    use crate::update::RecordingChannel;
    use serde_json::json;
    use std::cell::RefCell;

    type Comm = HierarchicalDataCommunicator<&'static str>;

    fn tree() -> Rc<TreeDataProvider<&'static str>> {
        let mut tree = TreeData::new();
        tree.add_root_items(["a", "b"]).unwrap();
        tree.add_items(Some(&"a"), ["a1", "a2"]).unwrap();
        tree.add_item(Some(&"a1"), "a1x").unwrap();
        Rc::new(TreeDataProvider::from_tree(tree))
    }

    fn communicator() -> (Comm, Rc<TreeDataProvider<&'static str>>) {
        let provider = tree();
        let comm: Comm = HierarchicalDataCommunicator::new(provider.clone()).unwrap();
        (comm, provider)
    }

    struct Flat;

    impl DataProvider<u8, ()> for Flat {
        fn size(&self, _: &HierarchicalQuery<'_, u8, ()>) -> usize {
            0
        }
        fn fetch(&self, _: &HierarchicalQuery<'_, u8, ()>) -> Vec<u8> {
            Vec::new()
        }
    }

    #[test]
    fn flat_provider_is_rejected() {
        let result = HierarchicalDataCommunicator::<u8, ()>::new(Rc::new(Flat));
        assert_eq!(result.err(), Some(CommunicatorError::UnsupportedProvider));

        let (mut comm, _) = communicator();
        let flat: Rc<dyn DataProvider<&'static str, ItemFilter<&'static str>>> =
            Rc::new(FlatStr);
        assert_eq!(
            comm.set_data_provider(flat),
            Err(CommunicatorError::UnsupportedProvider)
        );
        assert_eq!(comm.get_data_provider_size(), 2);
    }

    struct FlatStr;

    type StrQuery<'a> = HierarchicalQuery<'a, &'static str, ItemFilter<&'static str>>;

    impl DataProvider<&'static str, ItemFilter<&'static str>> for FlatStr {
        fn size(&self, _: &StrQuery<'_>) -> usize {
            1
        }
        fn fetch(&self, _: &StrQuery<'_>) -> Vec<&'static str> {
            vec!["flat"]
        }
    }

    #[test]
    fn nothing_is_sent_before_flush() {
        let (mut comm, _) = communicator();
        let mut channel = RecordingChannel::new();
        comm.expand(&["a"], 0, true);
        comm.set_requested_range(0, 10);
        assert!(channel.is_empty());
        assert_eq!(
            comm.pending_tasks(),
            &[DeferredTask::TreeUpdate, DeferredTask::FlushRoot]
        );
        let report = comm.flush(&mut channel);
        assert_eq!(report.tree_updates, 1);
        assert_eq!(report.controller_flushes, 1);
        assert!(channel.names().contains(&ops::EXPAND_ITEMS));
        assert!(comm.pending_tasks().is_empty());
        assert!(comm.flush(&mut channel).is_empty());
    }

    #[test]
    fn expand_reports_only_changed_items() {
        let (mut comm, _) = communicator();
        assert_eq!(comm.expand(&["a", "b", "a"], 0, true), vec!["a"]);
        assert_eq!(comm.collapse(&["a", "b"], true), vec!["a"]);
    }

    #[test]
    fn expand_with_page_size_prefetches_children() {
        let (mut comm, _) = communicator();
        let mut channel = RecordingChannel::new();
        comm.expand(&["a"], 50, true);
        let report = comm.flush(&mut channel);
        assert_eq!(report.controller_flushes, 1);
        let level = channel.calls_named(ops::CONFIRM_LEVEL).next().cloned();
        let rows = level.map(|c| c.args[2].clone());
        assert_eq!(
            rows.and_then(|r| r.as_array().map(Vec::len)),
            Some(2)
        );
    }

    #[test]
    fn records_carry_hierarchy_fields() {
        let (mut comm, _) = communicator();
        comm.expand(&["a"], 0, false);
        comm.fetch_from_provider(0, 10);
        let a_key = comm.generate_record(&"a")["key"].clone();
        let record = comm.generate_record(&"a1");
        assert_eq!(record["level"], json!(1));
        assert_eq!(record["expanded"], json!(false));
        assert_eq!(record["leaf"], json!(false));
        assert_eq!(record["parentUniqueKey"], a_key);
        let leaf = comm.generate_record(&"a2");
        assert_eq!(leaf["leaf"], json!(true));
        assert!(comm.generate_record(&"b").get("parentUniqueKey").is_none());
    }

    struct Label(RefCell<Vec<&'static str>>);

    impl DataGenerator<&'static str> for Label {
        fn generate_data(&self, item: &&'static str, record: &mut Map<String, Value>) {
            record.insert("name".into(), json!(item.to_uppercase()));
        }
        fn destroy_data(&self, item: &&'static str) {
            self.0.borrow_mut().push(*item);
        }
    }

    #[test]
    fn generators_contribute_and_hear_about_released_items() {
        let (mut comm, _) = communicator();
        let label = Rc::new(Label(RefCell::new(Vec::new())));
        comm.add_data_generator(label.clone());
        assert_eq!(comm.generate_record(&"b")["name"], json!("B"));

        let mut channel = RecordingChannel::new();
        comm.expand(&["a"], 0, false);
        comm.set_parent_requested_range(0, 10, &"a");
        comm.flush(&mut channel);
        comm.collapse(&["a"], false);
        let destroyed = label.0.borrow().clone();
        assert!(destroyed.contains(&"a1"));
        assert!(destroyed.contains(&"a2"));
    }

    #[test]
    fn collapse_discards_descendant_controllers() {
        let (mut comm, _) = communicator();
        let mut channel = RecordingChannel::new();
        comm.expand(&["a"], 0, false);
        comm.expand(&["a1"], 0, false);
        comm.set_parent_requested_range(0, 10, &"a");
        comm.set_parent_requested_range(0, 10, &"a1");
        comm.flush(&mut channel);
        assert_eq!(comm.controller_count(), 2);
        assert!(comm.get_key_mapper().has(&"a1x"));

        comm.collapse(&["a"], true);
        assert_eq!(comm.controller_count(), 0);
        assert!(!comm.get_key_mapper().has(&"a1x"));
        assert!(!comm.get_key_mapper().has(&"a2"));
        assert!(comm.get_key_mapper().has(&"a"));
        assert!(comm.is_expanded(&"a1"));
    }

    #[test]
    fn page_request_for_collapsed_parent_is_ignored() {
        let (mut comm, _) = communicator();
        assert!(!comm.set_parent_requested_range(0, 10, &"a"));
        assert!(!comm.set_parent_requested_range_by_key(0, 10, "no-such-key"));
        assert!(comm.pending_tasks().is_empty());
    }

    #[test]
    fn confirmations_route_to_controllers() {
        let (mut comm, _) = communicator();
        let mut channel = RecordingChannel::new();
        comm.expand(&["a"], 0, false);
        comm.set_requested_range(0, 10);
        comm.set_parent_requested_range(0, 10, &"a");
        let report = comm.flush(&mut channel);
        let ids: Vec<u64> = report.flushed.iter().map(|f| f.update_id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert!(comm.confirm_update(1));
        let a_key = comm.get_key_mapper().key_of(&"a").map(str::to_owned);
        let a_key = a_key.unwrap_or_default();
        assert!(comm.confirm_parent_update(2, &a_key));
        assert!(!comm.confirm_parent_update(2, "missing"));
    }

    #[test]
    fn stale_parent_task_does_not_use_an_update_id() {
        let (mut comm, _) = communicator();
        let mut channel = RecordingChannel::new();
        comm.schedule(DeferredTask::FlushParent("gone".into()));
        comm.set_requested_range(0, 10);
        let first = comm.flush(&mut channel);
        comm.set_requested_range(0, 10);
        comm.expand(&["a"], 0, false);
        comm.set_parent_requested_range(0, 10, &"a");
        let second = comm.flush(&mut channel);

        let ids = |r: &FlushReport| r.flushed.iter().map(|f| f.update_id).collect::<Vec<_>>();
        assert_eq!(ids(&first), vec![1]);
        assert_eq!(ids(&second), vec![2, 3]);
    }

    #[test]
    fn reset_releases_keys_and_requests_resync() {
        let (mut comm, _) = communicator();
        let mut channel = RecordingChannel::new();
        comm.set_requested_range(0, 10);
        comm.flush(&mut channel);
        assert!(comm.get_key_mapper().has(&"a"));
        channel.take();

        comm.reset();
        assert!(!comm.get_key_mapper().has(&"a"));
        comm.flush(&mut channel);
        assert!(channel.names().contains(&ops::ENSURE_HIERARCHY));
    }

    #[test]
    fn provider_journal_is_drained_on_flush() {
        let (mut comm, provider) = communicator();
        let mut channel = RecordingChannel::new();
        comm.set_requested_range(0, 10);
        comm.flush(&mut channel);
        channel.take();

        provider.tree_data().borrow_mut().add_item(None, "c").unwrap();
        provider.refresh_all();
        comm.flush(&mut channel);
        assert!(channel.names().contains(&ops::ENSURE_HIERARCHY));
        assert_eq!(comm.get_data_provider_size(), 3);
    }

    #[test]
    fn refresh_of_present_item_sends_update_data() {
        let (mut comm, _) = communicator();
        let mut channel = RecordingChannel::new();
        comm.set_requested_range(0, 10);
        comm.flush(&mut channel);
        channel.take();
        comm.refresh_item(&"b");
        comm.flush(&mut channel);
        let update = channel.calls_named(ops::UPDATE_DATA).next().cloned();
        assert!(update.is_some());
    }

    #[test]
    fn sorting_change_resyncs() {
        let (mut comm, _) = communicator();
        let mut channel = RecordingChannel::new();
        let reverse: SortComparator<&'static str> =
            Rc::new(|x: &&'static str, y: &&'static str| y.cmp(x));
        comm.set_in_memory_sorting(Some(reverse));
        comm.flush(&mut channel);
        assert!(channel.names().contains(&ops::ENSURE_HIERARCHY));
        assert_eq!(comm.fetch_from_provider(0, 2), vec!["b", "a"]);
    }

    #[test]
    fn filter_is_kept_across_provider_swap() {
        let (mut comm, _) = communicator();
        let only_a: ItemFilter<&'static str> = Rc::new(|s: &&'static str| s.starts_with('a'));
        comm.set_filter(Some(only_a));
        assert_eq!(comm.get_data_provider_size(), 1);
        comm.set_data_provider(tree()).unwrap();
        assert_eq!(comm.get_data_provider_size(), 1);
        assert!(comm.filter().is_some());
    }
}
