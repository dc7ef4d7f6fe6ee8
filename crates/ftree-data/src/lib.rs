#![forbid(unsafe_code)]

//! Hierarchical data windowing for tree grids.
//!
//! A virtual-scrolling client sees a tree as one flat list of rows addressed
//! by index and keyed by opaque strings. This crate keeps that view in sync
//! with a lazily fetched backend:
//!
//! - [`HierarchyMapper`] projects the tree and its expansion state onto flat
//!   row indices.
//! - [`CommunicationController`] owns the window the client asked for under
//!   one parent and releases keys that left it.
//! - [`HierarchicalDataCommunicator`] ties both to the [`ftree_core::KeyMapper`]
//!   and batches every client operation of a turn into one flush.
//!
//! # Example
//!
//! ```
//! use std::rc::Rc;
//! use ftree_data::{HierarchicalDataCommunicator, RecordingChannel, TreeData, TreeDataProvider};
//!
//! let mut tree = TreeData::new();
//! tree.add_root_items(["docs", "src"]).unwrap();
//! tree.add_items(Some(&"src"), ["lib.rs", "main.rs"]).unwrap();
//!
//! let provider = Rc::new(TreeDataProvider::from_tree(tree));
//! let mut comm: HierarchicalDataCommunicator<&str> =
//!     HierarchicalDataCommunicator::new(provider).unwrap();
//!
//! comm.expand(&["src"], 0, true);
//! comm.set_requested_range(0, 50);
//! assert_eq!(comm.get_data_provider_size(), 4);
//!
//! let mut channel = RecordingChannel::new();
//! let report = comm.flush(&mut channel);
//! assert_eq!(report.controller_flushes, 1);
//! assert_eq!(comm.fetch_from_provider(1, 2), vec!["src", "lib.rs"]);
//! ```

pub mod communicator;
pub mod config;
pub mod controller;
pub mod error;
pub mod generator;
pub mod mapper;
pub mod provider;
pub mod tree_data;
pub mod update;

pub use communicator::{DeferredTask, FlushReport, HierarchicalDataCommunicator};
pub use config::CommunicatorConfig;
pub use controller::{CommunicationController, ControllerFlush, ControllerState, RowSource};
pub use error::{CommunicatorError, TreeDataError};
pub use generator::{CompositeDataGenerator, DataGenerator, PropertyGenerator};
pub use mapper::HierarchyMapper;
pub use provider::{
    DataChange, DataProvider, HierarchicalDataProvider, HierarchicalQuery, QuerySortOrder,
    SortComparator, SortDirection,
};
pub use tree_data::{ItemFilter, TreeData, TreeDataProvider, comparing};
pub use update::{ClientCall, ClientChannel, RecordingChannel, UpdateQueue, ops};
