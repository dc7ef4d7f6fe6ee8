#![forbid(unsafe_code)]

//! Backend contract consumed by the hierarchy layer.
//!
//! A backend answers three questions per parent: how many children are
//! there, give me a page of them, and does this item have children at all.
//! Root items are the children of the `None` parent. Every answer must honour
//! the sort and filter carried by the [`HierarchicalQuery`] and be
//! deterministic for equal queries.
//!
//! Backends also keep a change journal ([`DataChange`]) that the communicator
//! drains once per turn, so data edits reach the client on the next flush.

use std::cmp::Ordering;
use std::rc::Rc;

use ftree_core::Item;

/// Sort direction of a backend sort order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SortDirection {
    /// Smallest first.
    #[default]
    Ascending,
    /// Largest first.
    Descending,
}

impl SortDirection {
    /// The opposite direction.
    #[must_use]
    pub const fn reverse(self) -> Self {
        match self {
            Self::Ascending => Self::Descending,
            Self::Descending => Self::Ascending,
        }
    }
}

/// A backend sort order on a named property.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QuerySortOrder {
    /// Backend property name.
    pub property: String,
    /// Direction.
    pub direction: SortDirection,
}

impl QuerySortOrder {
    /// Ascending order on `property`.
    #[must_use]
    pub fn asc(property: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            direction: SortDirection::Ascending,
        }
    }

    /// Descending order on `property`.
    #[must_use]
    pub fn desc(property: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            direction: SortDirection::Descending,
        }
    }
}

/// In-memory comparator applied by in-memory backends.
pub type SortComparator<T> = Rc<dyn Fn(&T, &T) -> Ordering>;

/// One backend request: which parent, which page, which sort and filter.
///
/// A flat query is a hierarchical query whose `parent` is `None`.
pub struct HierarchicalQuery<'a, T, F> {
    /// Parent whose children are requested, `None` for roots.
    pub parent: Option<&'a T>,
    /// First child index.
    pub offset: usize,
    /// Maximum number of children.
    pub limit: usize,
    /// Backend sort orders, most significant first.
    pub sort_orders: &'a [QuerySortOrder],
    /// Comparator for in-memory backends.
    pub in_memory_sorting: Option<&'a SortComparator<T>>,
    /// Current filter.
    pub filter: Option<&'a F>,
}

impl<'a, T, F> HierarchicalQuery<'a, T, F> {
    /// Query all children of `parent` with no sort or filter.
    #[must_use]
    pub fn all(parent: Option<&'a T>) -> Self {
        Self {
            parent,
            offset: 0,
            limit: usize::MAX,
            sort_orders: &[],
            in_memory_sorting: None,
            filter: None,
        }
    }

    /// Same query with a different page.
    #[must_use]
    pub fn with_page(&self, offset: usize, limit: usize) -> Self {
        Self {
            parent: self.parent,
            offset,
            limit,
            sort_orders: self.sort_orders,
            in_memory_sorting: self.in_memory_sorting,
            filter: self.filter,
        }
    }
}

impl<T, F> Clone for HierarchicalQuery<'_, T, F> {
    fn clone(&self) -> Self {
        self.with_page(self.offset, self.limit)
    }
}

impl<T: std::fmt::Debug, F> std::fmt::Debug for HierarchicalQuery<'_, T, F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HierarchicalQuery")
            .field("parent", &self.parent)
            .field("offset", &self.offset)
            .field("limit", &self.limit)
            .field("sort_orders", &self.sort_orders)
            .field("in_memory_sorting", &self.in_memory_sorting.is_some())
            .field("filter", &self.filter.is_some())
            .finish()
    }
}

/// An entry in a backend's change journal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataChange<T> {
    /// Anything may have changed.
    RefreshAll,
    /// This item changed or was removed.
    RefreshItem(T),
}

/// A flat backend.
pub trait DataProvider<T: Item, F> {
    /// Number of root items matching the query.
    fn size(&self, query: &HierarchicalQuery<'_, T, F>) -> usize;

    /// A page of root items.
    fn fetch(&self, query: &HierarchicalQuery<'_, T, F>) -> Vec<T>;

    /// Whether all data lives in memory.
    fn is_in_memory(&self) -> bool {
        false
    }

    /// Drain the change journal.
    fn take_changes(&self) -> Vec<DataChange<T>> {
        Vec::new()
    }

    /// The hierarchical view of this provider, if it has one.
    fn into_hierarchical(self: Rc<Self>) -> Option<Rc<dyn HierarchicalDataProvider<T, F>>> {
        None
    }
}

/// A backend that knows parent/child relationships.
pub trait HierarchicalDataProvider<T: Item, F>: DataProvider<T, F> {
    /// A page of the children of `query.parent`.
    fn fetch_children(&self, query: &HierarchicalQuery<'_, T, F>) -> Vec<T>;

    /// Number of children of `query.parent` matching the query.
    fn child_count(&self, query: &HierarchicalQuery<'_, T, F>) -> usize;

    /// Whether `item` has children at all.
    fn has_children(&self, item: &T) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sort_order_constructors() {
        assert_eq!(QuerySortOrder::asc("name").direction, SortDirection::Ascending);
        assert_eq!(QuerySortOrder::desc("name").direction, SortDirection::Descending);
        assert_eq!(SortDirection::Ascending.reverse(), SortDirection::Descending);
    }

    #[test]
    fn with_page_keeps_parent_and_filter() {
        let parent = 7u32;
        let filter = 3u8;
        let base: HierarchicalQuery<'_, u32, u8> = HierarchicalQuery {
            filter: Some(&filter),
            ..HierarchicalQuery::all(Some(&parent))
        };
        let paged = base.with_page(10, 5);
        assert_eq!(paged.parent, Some(&7));
        assert_eq!(paged.filter, Some(&3));
        assert_eq!((paged.offset, paged.limit), (10, 5));
    }
}
