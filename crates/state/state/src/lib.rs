pub mod batch;
pub mod error;
pub mod key;
pub mod store;
pub mod testing;

pub use batch::{StateOp, WriteBatch};
pub use error::StateError;
pub use key::{KeyKind, StateKey};
pub use store::StateStore;
