//! Miscellaneous common structs used throughout the library.

mod closest_nodes;
mod contact;
mod id;
pub mod messages;
mod routing_table;
mod store;

pub use closest_nodes::*;
pub use contact::*;
pub use id::*;
pub use messages::*;
pub use routing_table::*;
pub use store::*;
