// handlers/public/mod.rs - Public handlers (no authentication required)

pub mod root;
pub mod storage;

pub use root::{health, root};
pub use storage::get_object as storage_get;
