#![forbid(unsafe_code)]

//! In-memory forest and the provider that serves it.
//!
//! [`TreeData`] stores parent/child links with sibling order. It is shared
//! behind `Rc<RefCell<_>>` by [`TreeDataProvider`], so the host can edit the
//! tree and then call [`TreeDataProvider::refresh_item`] or
//! [`TreeDataProvider::refresh_all`] to journal the change.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::rc::Rc;

use ftree_core::Item;

use crate::error::TreeDataError;
use crate::provider::{DataChange, DataProvider, HierarchicalDataProvider, HierarchicalQuery};

/// Filter predicate used by in-memory providers.
pub type ItemFilter<T> = Rc<dyn Fn(&T) -> bool>;

/// An ordered forest of items.
#[derive(Debug, Clone)]
pub struct TreeData<T: Item> {
    roots: Vec<T>,
    children: HashMap<T, Vec<T>>,
    parents: HashMap<T, Option<T>>,
}

impl<T: Item> TreeData<T> {
    /// Create an empty forest.
    #[must_use]
    pub fn new() -> Self {
        Self {
            roots: Vec::new(),
            children: HashMap::new(),
            parents: HashMap::new(),
        }
    }

    /// Append `item` as the last child of `parent` (or as a root).
    pub fn add_item(&mut self, parent: Option<&T>, item: T) -> Result<&mut Self, TreeDataError> {
        if self.parents.contains_key(&item) {
            return Err(TreeDataError::DuplicateItem(format!("{item:?}")));
        }
        if let Some(parent) = parent
            && !self.parents.contains_key(parent)
        {
            return Err(TreeDataError::ParentNotFound(format!("{parent:?}")));
        }
        self.siblings_mut(parent).push(item.clone());
        self.parents.insert(item, parent.cloned());
        Ok(self)
    }

    /// Append several children of `parent` in order.
    pub fn add_items(
        &mut self,
        parent: Option<&T>,
        items: impl IntoIterator<Item = T>,
    ) -> Result<&mut Self, TreeDataError> {
        for item in items {
            self.add_item(parent, item)?;
        }
        Ok(self)
    }

    /// Append several root items in order.
    pub fn add_root_items(
        &mut self,
        items: impl IntoIterator<Item = T>,
    ) -> Result<&mut Self, TreeDataError> {
        self.add_items(None, items)
    }

    /// Remove `item` and its whole subtree.
    pub fn remove_item(&mut self, item: &T) -> Result<&mut Self, TreeDataError> {
        let Some(parent) = self.parents.get(item).cloned() else {
            return Err(TreeDataError::ItemNotFound(format!("{item:?}")));
        };
        self.siblings_mut(parent.as_ref()).retain(|s| s != item);
        let mut stack = vec![item.clone()];
        while let Some(next) = stack.pop() {
            self.parents.remove(&next);
            if let Some(kids) = self.children.remove(&next) {
                stack.extend(kids);
            }
        }
        Ok(self)
    }

    /// Move `item` right after `sibling` among its siblings.
    ///
    /// `None` moves it to the first position.
    pub fn move_after(&mut self, item: &T, sibling: Option<&T>) -> Result<&mut Self, TreeDataError> {
        let Some(parent) = self.parents.get(item).cloned() else {
            return Err(TreeDataError::ItemNotFound(format!("{item:?}")));
        };
        if let Some(sibling) = sibling
            && self.parents.get(sibling) != Some(&parent)
        {
            return Err(TreeDataError::NotASibling(format!("{sibling:?}")));
        }
        let siblings = self.siblings_mut(parent.as_ref());
        siblings.retain(|s| s != item);
        let at = match sibling {
            Some(sibling) => siblings
                .iter()
                .position(|s| s == sibling)
                .map_or(siblings.len(), |i| i + 1),
            None => 0,
        };
        siblings.insert(at, item.clone());
        Ok(self)
    }

    /// Reattach `item` (with its subtree) as the last child of `parent`.
    pub fn set_parent(&mut self, item: &T, parent: Option<&T>) -> Result<&mut Self, TreeDataError> {
        let Some(old_parent) = self.parents.get(item).cloned() else {
            return Err(TreeDataError::ItemNotFound(format!("{item:?}")));
        };
        if let Some(parent) = parent {
            if !self.parents.contains_key(parent) {
                return Err(TreeDataError::ParentNotFound(format!("{parent:?}")));
            }
            let mut cursor = Some(parent.clone());
            while let Some(ancestor) = cursor {
                if &ancestor == item {
                    return Err(TreeDataError::Cycle(format!("{item:?}")));
                }
                cursor = self.parents.get(&ancestor).cloned().flatten();
            }
        }
        if old_parent.as_ref() == parent {
            return Ok(self);
        }
        self.siblings_mut(old_parent.as_ref()).retain(|s| s != item);
        self.siblings_mut(parent).push(item.clone());
        self.parents.insert(item.clone(), parent.cloned());
        Ok(self)
    }

    /// Whether `item` is in the tree.
    #[must_use]
    pub fn contains(&self, item: &T) -> bool {
        self.parents.contains_key(item)
    }

    /// Children of `parent` (roots for `None`), empty for unknown parents.
    #[must_use]
    pub fn children(&self, parent: Option<&T>) -> &[T] {
        match parent {
            None => &self.roots,
            Some(parent) => self.children.get(parent).map_or(&[], Vec::as_slice),
        }
    }

    /// Root items.
    #[must_use]
    pub fn root_items(&self) -> &[T] {
        &self.roots
    }

    /// Parent of `item`; `None` for roots and unknown items.
    #[must_use]
    pub fn parent(&self, item: &T) -> Option<&T> {
        self.parents.get(item).and_then(Option::as_ref)
    }

    /// Number of items in the forest.
    #[must_use]
    pub fn len(&self) -> usize {
        self.parents.len()
    }

    /// Whether the forest is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.parents.is_empty()
    }

    /// Remove everything.
    pub fn clear(&mut self) {
        self.roots.clear();
        self.children.clear();
        self.parents.clear();
    }

    fn siblings_mut(&mut self, parent: Option<&T>) -> &mut Vec<T> {
        match parent {
            None => &mut self.roots,
            Some(parent) => self.children.entry(parent.clone()).or_default(),
        }
    }
}

impl<T: Item> Default for TreeData<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Serves a shared [`TreeData`] as a hierarchical provider.
pub struct TreeDataProvider<T: Item> {
    data: Rc<RefCell<TreeData<T>>>,
    changes: RefCell<Vec<DataChange<T>>>,
}

impl<T: Item> TreeDataProvider<T> {
    /// Wrap a shared tree.
    #[must_use]
    pub fn new(data: Rc<RefCell<TreeData<T>>>) -> Self {
        Self {
            data,
            changes: RefCell::new(Vec::new()),
        }
    }

    /// Take ownership of a tree.
    #[must_use]
    pub fn from_tree(data: TreeData<T>) -> Self {
        Self::new(Rc::new(RefCell::new(data)))
    }

    /// The shared tree.
    #[must_use]
    pub fn tree_data(&self) -> Rc<RefCell<TreeData<T>>> {
        Rc::clone(&self.data)
    }

    /// Journal that anything may have changed.
    pub fn refresh_all(&self) {
        self.changes.borrow_mut().push(DataChange::RefreshAll);
    }

    /// Journal that `item` changed or was removed.
    pub fn refresh_item(&self, item: &T) {
        self.changes
            .borrow_mut()
            .push(DataChange::RefreshItem(item.clone()));
    }

    fn visible_children(&self, query: &HierarchicalQuery<'_, T, ItemFilter<T>>) -> Vec<T> {
        let data = self.data.borrow();
        let mut items: Vec<T> = data
            .children(query.parent)
            .iter()
            .filter(|item| query.filter.is_none_or(|accept| accept(*item)))
            .cloned()
            .collect();
        if let Some(compare) = query.in_memory_sorting {
            items.sort_by(|a, b| compare(a, b));
        }
        items
    }
}

impl<T: Item> DataProvider<T, ItemFilter<T>> for TreeDataProvider<T> {
    fn size(&self, query: &HierarchicalQuery<'_, T, ItemFilter<T>>) -> usize {
        self.child_count(&HierarchicalQuery {
            parent: None,
            ..query.clone()
        })
    }

    fn fetch(&self, query: &HierarchicalQuery<'_, T, ItemFilter<T>>) -> Vec<T> {
        self.fetch_children(&HierarchicalQuery {
            parent: None,
            ..query.clone()
        })
    }

    fn is_in_memory(&self) -> bool {
        true
    }

    fn take_changes(&self) -> Vec<DataChange<T>> {
        std::mem::take(&mut *self.changes.borrow_mut())
    }

    fn into_hierarchical(
        self: Rc<Self>,
    ) -> Option<Rc<dyn HierarchicalDataProvider<T, ItemFilter<T>>>> {
        Some(self)
    }
}

impl<T: Item> HierarchicalDataProvider<T, ItemFilter<T>> for TreeDataProvider<T> {
    fn fetch_children(&self, query: &HierarchicalQuery<'_, T, ItemFilter<T>>) -> Vec<T> {
        self.visible_children(query)
            .into_iter()
            .skip(query.offset)
            .take(query.limit)
            .collect()
    }

    fn child_count(&self, query: &HierarchicalQuery<'_, T, ItemFilter<T>>) -> usize {
        match query.filter {
            None => self.data.borrow().children(query.parent).len(),
            Some(accept) => self
                .data
                .borrow()
                .children(query.parent)
                .iter()
                .filter(|item| accept(*item))
                .count(),
        }
    }

    fn has_children(&self, item: &T) -> bool {
        !self.data.borrow().children(Some(item)).is_empty()
    }
}

impl<T: Item> std::fmt::Debug for TreeDataProvider<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreeDataProvider")
            .field("items", &self.data.borrow().len())
            .field("pending_changes", &self.changes.borrow().len())
            .finish()
    }
}

/// Build a comparator from a key extractor.
pub fn comparing<T: 'static, K: Ord + 'static>(
    key: impl Fn(&T) -> K + 'static,
) -> crate::provider::SortComparator<T> {
    Rc::new(move |a: &T, b: &T| -> Ordering { key(a).cmp(&key(b)) })
}
