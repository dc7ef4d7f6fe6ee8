#![forbid(unsafe_code)]

//! Tree to flat index projection.
//!
//! [`HierarchyMapper`] turns a lazily fetched tree plus a set of expanded
//! items into one flat, pre-ordered row sequence, and answers index, size,
//! and ancestry questions about it without touching the transport.
//!
//! # Caches
//!
//! The caches live behind a `RefCell` so read-style queries stay `&self`:
//!
//! - **parents**: for every item seen in a backend answer, its parent.
//! - **indices**: for the same items, the index among their siblings under
//!   the current sort and filter.
//! - **sizes**: for a level (the children of one parent, or the roots), the
//!   number of visible rows below that parent: its children plus the visible
//!   rows below each expanded child.
//! - **scanned**: levels that were walked end to end.
//! - **dirty**: refreshed levels whose membership must be read again before
//!   their expanded children are trusted.
//!
//! # Invariants
//!
//! 1. `sizes[level] == child_count(level) + sum(sizes[child])` over expanded
//!    children of the level. Any change to a level's count or to the
//!    expansion of one of its children removes `sizes` for that level and
//!    every ancestor level.
//! 2. Sizes need parents only. Indices are needed only for the levels a
//!    fetch or index query actually reads.
//! 3. Sort changes drop indices and sizes and keep parents, which do not
//!    depend on order. Filter changes drop everything.
//! 4. Collapsing an item keeps the expansion flags of its descendants; they
//!    become visible again when the item is re-expanded.
//!
//! A level is walked only when an expanded item has no known parent, when
//! an expanded child of a read level has no index, or when a refreshed level
//! has expanded children. Fetches for a row range never read a level that
//! lies entirely outside the range.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::rc::Rc;

use ftree_core::{Item, Range};

use crate::config::DEFAULT_SCAN_CHUNK;
use crate::provider::{HierarchicalDataProvider, HierarchicalQuery, QuerySortOrder, SortComparator};

/// Where an item sits: its parent (`None` for roots) and its child index.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Link<T> {
    parent: Option<T>,
    index: usize,
}

#[derive(Debug)]
struct Caches<T> {
    parents: HashMap<T, Option<T>>,
    indices: HashMap<T, usize>,
    sizes: HashMap<Option<T>, usize>,
    scanned: HashSet<Option<T>>,
    dirty: HashSet<Option<T>>,
}

impl<T: Item> Caches<T> {
    fn new() -> Self {
        Self {
            parents: HashMap::new(),
            indices: HashMap::new(),
            sizes: HashMap::new(),
            scanned: HashSet::new(),
            dirty: HashSet::new(),
        }
    }

    fn clear(&mut self) {
        self.parents.clear();
        self.indices.clear();
        self.sizes.clear();
        self.scanned.clear();
        self.dirty.clear();
    }

    /// Forget everything that depends on sibling order.
    fn clear_order(&mut self) {
        self.indices.clear();
        self.sizes.clear();
    }
}

/// Projects a hierarchical provider plus expansion state onto flat rows.
pub struct HierarchyMapper<T: Item, F> {
    provider: Rc<dyn HierarchicalDataProvider<T, F>>,
    expanded: HashSet<T>,
    sort_orders: Vec<QuerySortOrder>,
    in_memory_sorting: Option<SortComparator<T>>,
    filter: Option<F>,
    scan_chunk: usize,
    caches: RefCell<Caches<T>>,
}

impl<T: Item, F> HierarchyMapper<T, F> {
    /// Create a mapper over `provider` with nothing expanded.
    #[must_use]
    pub fn new(provider: Rc<dyn HierarchicalDataProvider<T, F>>) -> Self {
        Self {
            provider,
            expanded: HashSet::new(),
            sort_orders: Vec::new(),
            in_memory_sorting: None,
            filter: None,
            scan_chunk: DEFAULT_SCAN_CHUNK,
            caches: RefCell::new(Caches::new()),
        }
    }

    /// Set the backend page size used when walking a level.
    #[must_use]
    pub fn with_scan_chunk(mut self, scan_chunk: usize) -> Self {
        self.scan_chunk = scan_chunk.max(1);
        self
    }

    /// The provider this mapper reads from.
    #[must_use]
    pub fn provider(&self) -> &Rc<dyn HierarchicalDataProvider<T, F>> {
        &self.provider
    }

    fn query<'a>(
        &'a self,
        parent: Option<&'a T>,
        offset: usize,
        limit: usize,
    ) -> HierarchicalQuery<'a, T, F> {
        HierarchicalQuery {
            parent,
            offset,
            limit,
            sort_orders: &self.sort_orders,
            in_memory_sorting: self.in_memory_sorting.as_ref(),
            filter: self.filter.as_ref(),
        }
    }

    // --- Query configuration -------------------------------------------

    /// Replace the backend sort orders.
    pub fn set_back_end_sorting(&mut self, sort_orders: Vec<QuerySortOrder>) {
        self.sort_orders = sort_orders;
        self.caches.get_mut().clear_order();
    }

    /// Replace the in-memory comparator.
    pub fn set_in_memory_sorting(&mut self, comparator: Option<SortComparator<T>>) {
        self.in_memory_sorting = comparator;
        self.caches.get_mut().clear_order();
    }

    /// Replace the filter.
    pub fn set_filter(&mut self, filter: Option<F>) {
        self.filter = filter;
        self.caches.get_mut().clear();
    }

    /// Current backend sort orders.
    #[must_use]
    pub fn back_end_sorting(&self) -> &[QuerySortOrder] {
        &self.sort_orders
    }

    /// Current in-memory comparator.
    #[must_use]
    pub fn in_memory_sorting(&self) -> Option<&SortComparator<T>> {
        self.in_memory_sorting.as_ref()
    }

    /// Current filter.
    #[must_use]
    pub fn filter(&self) -> Option<&F> {
        self.filter.as_ref()
    }

    // --- Backend passthrough -------------------------------------------

    /// Children of `parent` (roots for `None`) in `range`.
    pub fn fetch_child_items(&self, parent: Option<&T>, range: Range) -> Vec<T> {
        if range.is_empty() {
            return Vec::new();
        }
        let items = self
            .provider
            .fetch_children(&self.query(parent, range.start(), range.len()));
        self.record_links(parent, range.start(), &items);
        items
    }

    /// Number of children of `parent` (roots for `None`).
    #[must_use]
    pub fn count_child_items(&self, parent: Option<&T>) -> usize {
        self.provider.child_count(&self.query(parent, 0, usize::MAX))
    }

    /// Number of root items, ignoring descendants.
    #[must_use]
    pub fn root_item_count(&self) -> usize {
        self.count_child_items(None)
    }

    /// Whether `item` has children in the backend.
    #[must_use]
    pub fn has_children(&self, item: &T) -> bool {
        self.provider.has_children(item)
    }

    fn record_links(&self, parent: Option<&T>, offset: usize, items: &[T]) {
        let mut caches = self.caches.borrow_mut();
        for (i, item) in items.iter().enumerate() {
            caches.parents.insert(item.clone(), parent.cloned());
            caches.indices.insert(item.clone(), offset + i);
        }
    }

    // --- Expansion -----------------------------------------------------

    /// Whether `item` is expanded.
    #[must_use]
    pub fn is_expanded(&self, item: &T) -> bool {
        self.expanded.contains(item)
    }

    /// Whether any item is expanded.
    #[must_use]
    pub fn has_expanded_items(&self) -> bool {
        !self.expanded.is_empty()
    }

    /// All expanded items, in arbitrary order.
    #[must_use]
    pub fn get_expanded_items(&self) -> Vec<T> {
        self.expanded.iter().cloned().collect()
    }

    /// Expand `item`.
    ///
    /// Returns `false` when it is already expanded or has no children.
    pub fn expand(&mut self, item: &T) -> bool {
        if self.expanded.contains(item) || !self.provider.has_children(item) {
            return false;
        }
        self.expanded.insert(item.clone());
        self.invalidate_ancestors(item);
        let level = Some(item.clone());
        self.caches.get_mut().sizes.remove(&level);
        self.level_size(Some(item));
        ftree_core::trace!(?item, "expanded");
        true
    }

    /// Collapse `item`. Returns `false` when it was not expanded.
    ///
    /// Expansion flags of descendants are kept.
    pub fn collapse(&mut self, item: &T) -> bool {
        if !self.expanded.remove(item) {
            return false;
        }
        self.invalidate_ancestors(item);
        ftree_core::trace!(?item, "collapsed");
        true
    }

    // --- Size cache ----------------------------------------------------

    /// The children of `item` may have changed: drop the cached size below
    /// `item` and its ancestors, and the positions of its children.
    pub fn invalidate(&mut self, item: &T) {
        let level = Some(item.clone());
        let Caches {
            parents,
            indices,
            sizes,
            scanned,
            dirty,
        } = self.caches.get_mut();
        sizes.remove(&level);
        indices.retain(|child, _| parents.get(child) != Some(&level));
        scanned.remove(&level);
        dirty.insert(level);
        self.invalidate_ancestors(item);
    }

    /// Drop every cache. Expansion flags are kept.
    pub fn invalidate_all(&mut self) {
        self.caches.get_mut().clear();
    }

    fn invalidate_ancestors(&mut self, item: &T) {
        let caches = self.caches.get_mut();
        let mut cursor = item.clone();
        loop {
            let Some(parent) = caches.parents.get(&cursor).cloned() else {
                // Unknown position: any level may contain it.
                caches.sizes.clear();
                return;
            };
            caches.sizes.remove(&parent);
            match parent {
                Some(p) => cursor = p,
                None => return,
            }
        }
    }

    /// Total number of visible rows.
    #[must_use]
    pub fn get_root_size(&self) -> usize {
        self.level_size(None)
    }

    /// Number of visible rows below `parent` (or of the whole tree for
    /// `None`), whether or not `parent` itself is visible.
    fn level_size(&self, parent: Option<&T>) -> usize {
        let level = parent.cloned();
        if let Some(size) = self.caches.borrow().sizes.get(&level) {
            return *size;
        }
        let mut total = self.count_child_items(parent);
        for child in self.expanded_members(parent) {
            total += self.level_size(Some(&child));
        }
        self.caches.borrow_mut().sizes.insert(level, total);
        total
    }

    /// Expanded children of `parent`, in no particular order.
    fn expanded_members(&self, parent: Option<&T>) -> Vec<T> {
        if self.expanded.is_empty() {
            return Vec::new();
        }
        let level = parent.cloned();
        let needs_scan = {
            let caches = self.caches.borrow();
            let refreshed = caches.dirty.contains(&level)
                && self
                    .expanded
                    .iter()
                    .any(|e| caches.parents.get(e) == Some(&level));
            let unplaced = !caches.scanned.contains(&level)
                && self.expanded.iter().any(|e| !caches.parents.contains_key(e));
            refreshed || unplaced
        };
        if needs_scan {
            self.scan_level(parent);
        }
        let caches = self.caches.borrow();
        self.expanded
            .iter()
            .filter(|e| caches.parents.get(*e) == Some(&level))
            .cloned()
            .collect()
    }

    /// Expanded children of `parent` with their child index, in index order.
    fn positioned_children(&self, parent: Option<&T>) -> Vec<(usize, T)> {
        let members = self.expanded_members(parent);
        if members.is_empty() {
            return Vec::new();
        }
        let unindexed = {
            let caches = self.caches.borrow();
            members.iter().any(|m| !caches.indices.contains_key(m))
        };
        if unindexed {
            self.scan_level(parent);
        }
        let caches = self.caches.borrow();
        let mut children: Vec<(usize, T)> = members
            .into_iter()
            .filter_map(|m| caches.indices.get(&m).map(|index| (*index, m)))
            .collect();
        children.sort_by_key(|(index, _)| *index);
        children
    }

    /// Read the whole level. Afterwards its members and their indices are
    /// exactly what the backend returned.
    fn scan_level(&self, parent: Option<&T>) {
        #[cfg(feature = "tracing")]
        let _span = tracing::debug_span!("scan_level", chunk = self.scan_chunk).entered();
        let level = parent.cloned();
        {
            let mut caches = self.caches.borrow_mut();
            let Caches {
                parents,
                indices,
                dirty,
                ..
            } = &mut *caches;
            parents.retain(|item, p| {
                let stays = *p != level;
                if !stays {
                    indices.remove(item);
                }
                stays
            });
            dirty.remove(&level);
        }
        let mut offset = 0;
        loop {
            let items = self.fetch_child_items(parent, Range::with_length(offset, self.scan_chunk));
            let fetched = items.len();
            offset += fetched;
            if fetched < self.scan_chunk {
                break;
            }
        }
        self.caches.borrow_mut().scanned.insert(level);
        ftree_core::trace!(children = offset, "scanned level");
    }

    // --- Flat fetch ----------------------------------------------------

    /// The items at flat rows `range`, clamped to `[0, get_root_size())`.
    pub fn fetch_root_items(&self, range: Range) -> Vec<T> {
        #[cfg(feature = "tracing")]
        let _span = tracing::debug_span!(
            "fetch_root_items",
            start = range.start(),
            len = range.len()
        )
        .entered();
        let range = range.clamp_to(self.get_root_size());
        if range.is_empty() {
            return Vec::new();
        }
        let mut out = Vec::with_capacity(range.len());
        let mut cursor = Cursor {
            skip: range.start(),
            want: range.len(),
        };
        self.collect_level(None, &mut cursor, &mut out);
        out
    }

    /// Append rows below `parent` to `out`, skipping `cursor.skip` rows
    /// first and stopping after `cursor.want` rows.
    fn collect_level(&self, parent: Option<&T>, cursor: &mut Cursor, out: &mut Vec<T>) {
        let count = self.count_child_items(parent);
        let mut next_child = 0;
        for (pos, child) in self.positioned_children(parent) {
            if pos < next_child || pos >= count {
                continue;
            }
            // Plain rows up to and including the expanded child itself.
            self.collect_plain(parent, next_child, pos + 1 - next_child, cursor, out);
            if cursor.want == 0 {
                return;
            }
            next_child = pos + 1;
            let below = self.level_size(Some(&child));
            if cursor.skip >= below {
                cursor.skip -= below;
            } else {
                self.collect_level(Some(&child), cursor, out);
                if cursor.want == 0 {
                    return;
                }
            }
        }
        if next_child < count {
            self.collect_plain(parent, next_child, count - next_child, cursor, out);
        }
    }

    /// Consume up to `len` plain child rows starting at child `first`.
    fn collect_plain(
        &self,
        parent: Option<&T>,
        first: usize,
        len: usize,
        cursor: &mut Cursor,
        out: &mut Vec<T>,
    ) {
        if cursor.skip >= len {
            cursor.skip -= len;
            return;
        }
        let start = first + cursor.skip;
        let take = (len - cursor.skip).min(cursor.want);
        cursor.skip = 0;
        let items = self.fetch_child_items(parent, Range::with_length(start, take));
        cursor.want -= items.len().min(cursor.want);
        out.extend(items);
    }

    // --- Position queries ----------------------------------------------

    /// Parent of `item` (`Some(None)` for roots), walking levels when it
    /// has not been seen yet.
    fn parent_link(&self, item: &T) -> Option<Option<T>> {
        let known = self.caches.borrow().parents.get(item).cloned();
        match known {
            Some(parent) => Some(parent),
            None => self.locate(item),
        }
    }

    fn link_of(&self, item: &T) -> Option<Link<T>> {
        let parent = self.parent_link(item)?;
        let cached = self.caches.borrow().indices.get(item).copied();
        let index = match cached {
            Some(index) => index,
            None => {
                self.scan_level(parent.as_ref());
                self.caches.borrow().indices.get(item).copied()?
            }
        };
        Some(Link { parent, index })
    }

    /// Walk the root level and the levels below expanded items until `item`
    /// turns up. Returns its parent.
    fn locate(&self, item: &T) -> Option<Option<T>> {
        let mut queue: VecDeque<Option<T>> = VecDeque::new();
        queue.push_back(None);
        let mut seen: HashSet<Option<T>> = HashSet::new();
        while let Some(level) = queue.pop_front() {
            if !seen.insert(level.clone()) {
                continue;
            }
            let scanned = self.caches.borrow().scanned.contains(&level);
            if !scanned {
                self.scan_level(level.as_ref());
            }
            let caches = self.caches.borrow();
            if let Some(parent) = caches.parents.get(item) {
                return Some(parent.clone());
            }
            for expanded in &self.expanded {
                if caches.parents.get(expanded) == Some(&level) {
                    queue.push_back(Some(expanded.clone()));
                }
            }
        }
        None
    }

    /// Flat row of `item`, or `None` if it is not currently visible.
    #[must_use]
    pub fn get_index(&self, item: &T) -> Option<usize> {
        let link = self.link_of(item)?;
        let base = match &link.parent {
            None => 0,
            Some(parent) => {
                if !self.expanded.contains(parent) {
                    return None;
                }
                self.get_index(parent)? + 1
            }
        };
        if link.index >= self.count_child_items(link.parent.as_ref()) {
            return None;
        }
        let mut offset = link.index;
        for (pos, child) in self.positioned_children(link.parent.as_ref()) {
            if pos >= link.index {
                break;
            }
            offset += self.level_size(Some(&child));
        }
        Some(base + offset)
    }

    /// The parent of `item`, `None` for roots and unknown items.
    #[must_use]
    pub fn get_parent_of_item(&self, item: &T) -> Option<T> {
        self.parent_link(item).flatten()
    }

    /// Flat row of the parent of `item`, `None` for roots, unknown items,
    /// and hidden parents.
    #[must_use]
    pub fn get_parent_index(&self, item: &T) -> Option<usize> {
        let parent = self.get_parent_of_item(item)?;
        self.get_index(&parent)
    }

    /// Nesting depth of `item` (roots are 0), `None` if unknown.
    #[must_use]
    pub fn get_depth(&self, item: &T) -> Option<usize> {
        let mut depth = 0;
        let mut parent = self.parent_link(item)?;
        while let Some(current) = parent {
            depth += 1;
            parent = self.parent_link(&current)?;
        }
        Some(depth)
    }

    /// Whether `ancestor` is a known ancestor of `item`.
    #[must_use]
    pub fn is_ancestor_of(&self, ancestor: &T, item: &T) -> bool {
        let caches = self.caches.borrow();
        let mut cursor = caches.parents.get(item).cloned().flatten();
        while let Some(current) = cursor {
            if &current == ancestor {
                return true;
            }
            cursor = caches.parents.get(&current).cloned().flatten();
        }
        false
    }

    /// Whether the backend still lists `item` under its last known parent.
    #[must_use]
    pub fn contains(&self, item: &T) -> bool {
        let known = self.caches.borrow().parents.get(item).cloned();
        match known {
            Some(parent) => {
                let siblings = self
                    .provider
                    .fetch_children(&self.query(parent.as_ref(), 0, usize::MAX));
                siblings.contains(item)
            }
            None => self.locate(item).is_some(),
        }
    }

    // --- Teardown ------------------------------------------------------

    /// Forget `item` and everything known below it.
    ///
    /// Returns the forgotten items, `item` first.
    pub fn remove_item(&mut self, item: &T) -> Vec<T> {
        self.invalidate_ancestors(item);
        // Sibling indices after `item` shift.
        let Caches {
            parents, indices, ..
        } = self.caches.get_mut();
        match parents.get(item).cloned() {
            Some(level) => indices.retain(|sibling, _| parents.get(sibling) != Some(&level)),
            None => indices.clear(),
        }
        let descendants: Vec<T> = {
            let caches = self.caches.borrow();
            caches
                .parents
                .keys()
                .filter(|k| *k != item)
                .filter(|k| self.is_ancestor_of(item, k))
                .cloned()
                .collect()
        };
        let mut removed = Vec::with_capacity(descendants.len() + 1);
        removed.push(item.clone());
        removed.extend(descendants);
        let caches = self.caches.get_mut();
        for gone in &removed {
            self.expanded.remove(gone);
            caches.parents.remove(gone);
            caches.indices.remove(gone);
            let level = Some(gone.clone());
            caches.sizes.remove(&level);
            caches.scanned.remove(&level);
            caches.dirty.remove(&level);
        }
        ftree_core::debug!(?item, forgotten = removed.len(), "removed item from hierarchy");
        removed
    }

    /// Drop all expansion state and caches.
    pub fn destroy_all_data(&mut self) {
        self.expanded.clear();
        self.caches.get_mut().clear();
    }
}

#[derive(Debug)]
struct Cursor {
    skip: usize,
    want: usize,
}

impl<T: Item, F> fmt::Debug for HierarchyMapper<T, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let caches = self.caches.borrow();
        f.debug_struct("HierarchyMapper")
            .field("expanded", &self.expanded.len())
            .field("parents", &caches.parents.len())
            .field("indices", &caches.indices.len())
            .field("sizes", &caches.sizes.len())
            .field("sort_orders", &self.sort_orders)
            .field("filter", &self.filter.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::DataProvider;
    use crate::tree_data::{ItemFilter, TreeData, TreeDataProvider};

    type Mapper = HierarchyMapper<&'static str, ItemFilter<&'static str>>;

    /// ```text
    /// a
    ///   a1
    ///     a1x
    ///     a1y
    ///   a2
    /// b
    ///   b1
    /// c
    /// ```
    fn sample() -> Rc<TreeDataProvider<&'static str>> {
        let mut tree = TreeData::new();
        tree.add_root_items(["a", "b", "c"]).unwrap();
        tree.add_items(Some(&"a"), ["a1", "a2"]).unwrap();
        tree.add_items(Some(&"a1"), ["a1x", "a1y"]).unwrap();
        tree.add_item(Some(&"b"), "b1").unwrap();
        Rc::new(TreeDataProvider::from_tree(tree))
    }

    fn mapper() -> Mapper {
        HierarchyMapper::new(sample())
    }

    fn all_rows(m: &Mapper) -> Vec<&'static str> {
        m.fetch_root_items(Range::with_length(0, m.get_root_size()))
    }

    #[test]
    fn collapsed_tree_shows_roots() {
        let m = mapper();
        assert_eq!(m.get_root_size(), 3);
        assert_eq!(all_rows(&m), vec!["a", "b", "c"]);
        assert_eq!(m.root_item_count(), 3);
    }

    #[test]
    fn expanded_rows_are_pre_ordered() {
        let mut m = mapper();
        assert!(m.expand(&"a"));
        assert!(m.expand(&"a1"));
        assert!(m.expand(&"b"));
        assert_eq!(m.get_root_size(), 8);
        assert_eq!(
            all_rows(&m),
            vec!["a", "a1", "a1x", "a1y", "a2", "b", "b1", "c"]
        );
        for (i, item) in all_rows(&m).into_iter().enumerate() {
            assert_eq!(m.get_index(&item), Some(i), "{item}");
        }
    }

    #[test]
    fn partial_ranges_cross_levels() {
        let mut m = mapper();
        m.expand(&"a");
        m.expand(&"a1");
        assert_eq!(m.fetch_root_items(Range::between(2, 5)), vec!["a1x", "a1y", "a2"]);
        assert_eq!(m.fetch_root_items(Range::between(4, 100)), vec!["a2", "b", "c"]);
        assert!(m.fetch_root_items(Range::between(40, 50)).is_empty());
    }

    #[test]
    fn expand_is_idempotent() {
        let mut m = mapper();
        assert!(m.expand(&"a"));
        assert!(!m.expand(&"a"));
        assert!(m.collapse(&"a"));
        assert!(!m.collapse(&"a"));
    }

    #[test]
    fn leaves_and_unknown_items_do_not_expand() {
        let mut m = mapper();
        assert!(!m.expand(&"c"));
        assert!(!m.expand(&"zzz"));
        assert!(!m.collapse(&"zzz"));
        assert!(!m.has_expanded_items());
    }

    #[test]
    fn collapse_preserves_descendant_expansion() {
        let mut m = mapper();
        m.expand(&"a");
        m.expand(&"a1");
        m.collapse(&"a");
        assert_eq!(m.get_root_size(), 3);
        assert!(m.is_expanded(&"a1"));
        assert_eq!(m.get_index(&"a1x"), None);
        m.expand(&"a");
        assert_eq!(m.get_root_size(), 7);
        assert_eq!(m.get_index(&"a1x"), Some(2));
    }

    #[test]
    fn expanding_unfetched_item_resolves_position() {
        // a1 has never been returned by a fetch on this mapper.
        let mut fresh: Mapper = HierarchyMapper::new(sample());
        assert!(fresh.expand(&"a1"));
        assert!(fresh.expand(&"a"));
        assert_eq!(fresh.get_root_size(), 7);
        assert_eq!(fresh.get_index(&"a2"), Some(4));
    }

    #[test]
    fn parent_and_depth_queries() {
        let mut m = mapper();
        m.expand(&"a");
        m.expand(&"a1");
        assert_eq!(m.get_parent_of_item(&"a1x"), Some("a1"));
        assert_eq!(m.get_parent_index(&"a1x"), Some(1));
        assert_eq!(m.get_parent_index(&"a"), None);
        assert_eq!(m.get_depth(&"a1y"), Some(2));
        assert_eq!(m.get_depth(&"b"), Some(0));
        assert_eq!(m.get_depth(&"nope"), None);
        assert!(m.is_ancestor_of(&"a", &"a1x"));
        assert!(!m.is_ancestor_of(&"b", &"a1x"));
    }

    #[test]
    fn filter_change_recomputes_sizes() {
        let mut m = mapper();
        m.expand(&"a");
        assert_eq!(m.get_root_size(), 5);
        let hide_a1: ItemFilter<&'static str> = Rc::new(|s: &&str| !s.starts_with("a1"));
        m.set_filter(Some(hide_a1));
        assert_eq!(all_rows(&m), vec!["a", "a2", "b", "c"]);
        m.set_filter(None);
        assert_eq!(m.get_root_size(), 5);
    }

    #[test]
    fn in_memory_sorting_reorders_levels() {
        let mut m = mapper();
        m.expand(&"a");
        let reverse: SortComparator<&'static str> = Rc::new(|x: &&str, y: &&str| y.cmp(x));
        m.set_in_memory_sorting(Some(reverse));
        assert_eq!(all_rows(&m), vec!["c", "b", "a", "a2", "a1"]);
        assert_eq!(m.get_index(&"a1"), Some(4));
    }

    #[test]
    fn remove_item_forgets_subtree() {
        let provider = sample();
        let mut m: Mapper = HierarchyMapper::new(provider.clone());
        m.expand(&"a");
        m.expand(&"a1");
        assert_eq!(m.get_root_size(), 7);
        provider.tree_data().borrow_mut().remove_item(&"a1").unwrap();
        let removed = m.remove_item(&"a1");
        assert_eq!(removed[0], "a1");
        assert!(removed.contains(&"a1x"));
        assert!(!m.is_expanded(&"a1"));
        assert_eq!(m.get_root_size(), 4);
        assert!(!m.contains(&"a1"));
        assert!(m.contains(&"a2"));
    }

    #[test]
    fn destroy_all_data_resets_expansion() {
        let mut m = mapper();
        m.expand(&"a");
        m.destroy_all_data();
        assert!(!m.has_expanded_items());
        assert_eq!(m.get_root_size(), 3);
    }

    struct CountingProvider {
        inner: Rc<TreeDataProvider<u32>>,
        fetched_parents: RefCell<Vec<Option<u32>>>,
    }

    impl DataProvider<u32, ItemFilter<u32>> for CountingProvider {
        fn size(&self, query: &HierarchicalQuery<'_, u32, ItemFilter<u32>>) -> usize {
            self.inner.size(query)
        }
        fn fetch(&self, query: &HierarchicalQuery<'_, u32, ItemFilter<u32>>) -> Vec<u32> {
            self.inner.fetch(query)
        }
    }

    impl HierarchicalDataProvider<u32, ItemFilter<u32>> for CountingProvider {
        fn fetch_children(&self, query: &HierarchicalQuery<'_, u32, ItemFilter<u32>>) -> Vec<u32> {
            self.fetched_parents.borrow_mut().push(query.parent.copied());
            self.inner.fetch_children(query)
        }
        fn child_count(&self, query: &HierarchicalQuery<'_, u32, ItemFilter<u32>>) -> usize {
            self.inner.child_count(query)
        }
        fn has_children(&self, item: &u32) -> bool {
            self.inner.has_children(item)
        }
    }

    /// Roots 0..10, each with 100 children numbered `(root + 1) * 1000 + i`.
    /// The first child of every root holds five grandchildren when
    /// `grandchildren` is set.
    fn counting(grandchildren: bool) -> Rc<CountingProvider> {
        let mut tree = TreeData::new();
        tree.add_root_items(0..10).unwrap();
        for root in 0..10u32 {
            let first = (root + 1) * 1000;
            tree.add_items(Some(&root), (0..100).map(|i| first + i)).unwrap();
            if grandchildren {
                tree.add_items(Some(&first), (0..5).map(|j| 100_000 + root * 10 + j))
                    .unwrap();
            }
        }
        Rc::new(CountingProvider {
            inner: Rc::new(TreeDataProvider::from_tree(tree)),
            fetched_parents: RefCell::new(Vec::new()),
        })
    }

    #[test]
    fn fetch_skips_subtrees_outside_range() {
        let provider = counting(false);
        let mut m: HierarchyMapper<u32, ItemFilter<u32>> = HierarchyMapper::new(provider.clone());
        m.fetch_root_items(Range::with_length(0, 10));
        for root in 0..10 {
            assert!(m.expand(&root));
        }
        provider.fetched_parents.borrow_mut().clear();

        // Root 2 sits at row 202, so rows 205..208 are its children 2..5.
        let rows = m.fetch_root_items(Range::with_length(205, 3));
        assert_eq!(rows, vec![3002, 3003, 3004]);
        let parents = provider.fetched_parents.borrow();
        assert!(parents.iter().all(|p| matches!(p, None | Some(2))), "{parents:?}");
    }

    #[test]
    fn fetch_skips_subtrees_outside_range_after_sort_change() {
        let provider = counting(true);
        let mut m: HierarchyMapper<u32, ItemFilter<u32>> = HierarchyMapper::new(provider.clone());
        m.fetch_root_items(Range::with_length(0, 10));
        for root in 0..10u32 {
            assert!(m.expand(&root));
            assert!(m.expand(&((root + 1) * 1000)));
        }
        assert_eq!(m.get_root_size(), 1060);
        provider.fetched_parents.borrow_mut().clear();

        let ascending: SortComparator<u32> = Rc::new(|a: &u32, b: &u32| a.cmp(b));
        m.set_in_memory_sorting(Some(ascending));

        // Every root spans 106 rows, so root 9 sits at row 954 and its first
        // child at 955.
        let rows = m.fetch_root_items(Range::with_length(960, 3));
        assert_eq!(rows, vec![100_094, 10_001, 10_002]);
        let parents = provider.fetched_parents.borrow();
        assert!(
            parents
                .iter()
                .all(|p| matches!(p, None | Some(9) | Some(10_000))),
            "{parents:?}"
        );
    }

    #[test]
    fn invalidate_picks_up_new_children() {
        let provider = sample();
        let mut m: Mapper = HierarchyMapper::new(provider.clone());
        m.expand(&"a");
        m.expand(&"a1");
        assert_eq!(m.get_root_size(), 7);
        provider
            .tree_data()
            .borrow_mut()
            .add_item(Some(&"a1"), "a1z")
            .unwrap();
        // Stale until told.
        assert_eq!(m.get_root_size(), 7);
        m.invalidate(&"a1");
        assert_eq!(
            all_rows(&m),
            vec!["a", "a1", "a1x", "a1y", "a1z", "a2", "b", "c"]
        );
        assert_eq!(m.get_index(&"a2"), Some(5));
    }

    #[test]
    fn invalidate_rereads_reordered_level() {
        let provider = sample();
        let mut m: Mapper = HierarchyMapper::new(provider.clone());
        m.expand(&"a");
        m.expand(&"a1");
        assert_eq!(all_rows(&m)[1], "a1");
        provider
            .tree_data()
            .borrow_mut()
            .move_after(&"a2", None)
            .unwrap();
        m.invalidate(&"a");
        assert_eq!(
            all_rows(&m),
            vec!["a", "a2", "a1", "a1x", "a1y", "b", "c"]
        );
        assert_eq!(m.get_index(&"a1x"), Some(3));
    }
}
