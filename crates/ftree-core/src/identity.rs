#![forbid(unsafe_code)]

//! Item identity.
//!
//! All index, size, and key bookkeeping is keyed by item *identity*, never
//! by where an instance lives in memory. Identity is `Eq + Hash`:
//!
//! - For most item types that is simply natural equality ([`Item`] is
//!   implemented for anything cloneable, hashable, and comparable).
//! - For types whose equality is not the right identity (mutable beans,
//!   records compared by all fields) implement [`HasId`] and wrap the item in
//!   [`ById`], which compares and hashes by `id()` only.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Deref;

/// Bound for values flowing through the hierarchy layer.
pub trait Item: Clone + Eq + Hash + fmt::Debug + 'static {}

impl<T> Item for T where T: Clone + Eq + Hash + fmt::Debug + 'static {}

/// A caller-supplied identifier for an item.
pub trait HasId {
    /// The identifier type.
    type Id: Eq + Hash + Clone + fmt::Debug;

    /// The stable identifier of this item.
    fn id(&self) -> Self::Id;
}

/// Wraps an item so that equality and hashing use [`HasId::id`].
///
/// ```
/// use ftree_core::identity::{ById, HasId};
///
/// #[derive(Clone, Debug)]
/// struct Account { id: u32, balance: i64 }
///
/// impl HasId for Account {
///     type Id = u32;
///     fn id(&self) -> u32 { self.id }
/// }
///
/// let before = ById(Account { id: 7, balance: 10 });
/// let after = ById(Account { id: 7, balance: 99 });
/// assert_eq!(before, after);
/// assert_eq!(after.balance, 99);
/// ```
#[derive(Clone, Debug)]
pub struct ById<T>(pub T);

impl<T> ById<T> {
    /// Unwrap the item.
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T: HasId> PartialEq for ById<T> {
    fn eq(&self, other: &Self) -> bool {
        self.0.id() == other.0.id()
    }
}

impl<T: HasId> Eq for ById<T> {}

impl<T: HasId> Hash for ById<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.id().hash(state);
    }
}

impl<T> Deref for ById<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T> From<T> for ById<T> {
    fn from(item: T) -> Self {
        ById(item)
    }
}
