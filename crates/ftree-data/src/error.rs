#![forbid(unsafe_code)]

//! Error types.
//!
//! Only programmer errors surface here. Stale client references are no-ops
//! and never produce an error.

use std::fmt;

/// Misuse of the hierarchical communicator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommunicatorError {
    /// A flat provider was attached where a hierarchical one is required.
    UnsupportedProvider,
}

impl fmt::Display for CommunicatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedProvider => {
                write!(f, "only hierarchical data providers are supported")
            }
        }
    }
}

impl std::error::Error for CommunicatorError {}

/// Invalid structural edit of a [`crate::TreeData`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeDataError {
    /// The item is already part of the tree.
    DuplicateItem(String),
    /// The referenced parent is not part of the tree.
    ParentNotFound(String),
    /// The item is not part of the tree.
    ItemNotFound(String),
    /// The referenced sibling does not share the item's parent.
    NotASibling(String),
    /// Moving the item would make it its own ancestor.
    Cycle(String),
}

impl fmt::Display for TreeDataError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateItem(item) => write!(f, "item {item} is already in the tree"),
            Self::ParentNotFound(item) => write!(f, "parent {item} is not in the tree"),
            Self::ItemNotFound(item) => write!(f, "item {item} is not in the tree"),
            Self::NotASibling(item) => write!(f, "item {item} is not a sibling"),
            Self::Cycle(item) => write!(f, "item {item} cannot become its own descendant"),
        }
    }
}

impl std::error::Error for TreeDataError {}
