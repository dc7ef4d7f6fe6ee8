#![forbid(unsafe_code)]

//! `ftree-web` wires the ftree data layer to a browser tree grid.
//!
//! Design goals:
//! - **Host-driven I/O**: the embedding server pushes client messages and
//!   decides when a turn ends.
//! - **One batch per turn**: all client calls of a turn are committed by a
//!   single flush.
//! - **No blocking / no threads**: everything runs on the caller's thread.
//!
//! # Example
//!
//! ```
//! use std::rc::Rc;
//! use ftree_data::{TreeData, TreeDataProvider};
//! use ftree_web::{TreeGrid, TreeGridSession};
//!
//! let mut tree = TreeData::new();
//! tree.add_root_items(["inbox", "archive"]).unwrap();
//! tree.add_item(Some(&"inbox"), "today").unwrap();
//!
//! let grid: TreeGrid<&str> = TreeGrid::new(Rc::new(TreeDataProvider::from_tree(tree))).unwrap();
//! let mut session = TreeGridSession::new(grid);
//! session.grid_mut().expand(&["inbox"]);
//! session
//!     .push_message(r#"{"type":"setRequestedRange","start":0,"length":20}"#)
//!     .unwrap();
//!
//! let step = session.step();
//! assert_eq!(step.report.tree_updates, 1);
//! assert!(!session.take_outputs().is_empty());
//! ```

pub mod protocol;
pub mod session;
pub mod tree_grid;

pub use protocol::{ClientRequest, ProtocolError};
pub use session::{StepResult, TreeGridSession};
pub use tree_grid::{CollapseAllowed, TreeGrid, TreeGridEvent};
