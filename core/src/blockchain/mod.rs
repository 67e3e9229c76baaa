pub mod block;
pub mod consensus;
