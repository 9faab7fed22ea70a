mod doer;
mod sync;

pub use doer::Doer;
