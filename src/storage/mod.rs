pub mod buffer_pool;
pub mod codec;
pub mod page;
pub mod store;

pub use codec::{FixedString, FixedWidth};
pub use page::{Internal, Leaf};
pub use store::PageStore;
