pub mod migrate;
pub mod protocol;
pub mod role;
pub mod token;
