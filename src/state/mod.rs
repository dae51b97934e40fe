pub mod atom;
pub mod reactive;
pub mod selection;
pub mod store;
pub mod sync;

pub use store::WordStore;
