pub mod identity;
pub mod lock;
pub mod sync;
