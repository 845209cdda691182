//! Core data model types for the data layer

mod change;
mod hash;
mod node;
mod store_id;

pub use change::{decode_hex, parse_changelist, Change, ChangeDescriptor, SideField};
pub use hash::{Hash, NodeHash};
pub use node::{Node, Side};
pub use store_id::StoreId;
