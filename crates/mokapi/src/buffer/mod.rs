//! Pooled byte buffers.

mod page;

pub use page::{PageBuffer, PagePool, Slice, PAGE_SIZE};
