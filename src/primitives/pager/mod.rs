#![forbid(unsafe_code)]

mod cache;
mod index;
mod page;
mod pager;
mod policy;
mod store;

pub use cache::PageCache;
pub use index::{load_side_index, persist_side_index, side_index_path, LineIndex, LineLoc, SourceStamp};
pub use page::Page;
pub use pager::{Access, BufferStats, Pager};
pub use policy::EvictionPolicy;
pub use store::PageStore;
