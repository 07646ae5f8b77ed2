//! Network lists, name resolution and the address index used by the matcher.

pub mod cache;
pub mod index;
pub mod list;
pub mod resolver;

pub use cache::{NetlistCache, NetlistSnapshot, NetlistSource};
pub use index::AddressIndex;
pub use list::{NetworkList, NetworkListItem};
pub use resolver::{NameMapper, NameResolver};
