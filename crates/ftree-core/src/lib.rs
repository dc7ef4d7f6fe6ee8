#![forbid(unsafe_code)]

//! Core: ranges, item identity, key mapping, and the logging facade shared by
//! the ftree crates.

pub mod identity;
pub mod key_mapper;
pub mod logging;
pub mod range;

pub use identity::{ById, HasId, Item};
pub use key_mapper::KeyMapper;
pub use range::Range;

#[cfg(feature = "tracing")]
pub use logging::{debug, debug_span, info, trace, warn};
