//! Block cache, code versioning, and inter-block link bookkeeping (spec.md §3 "Basic Block" cache
//! ownership, §8 "Invalidation consistency", SPEC_FULL.md §C.2/§C.3).

mod block_cache;
mod code_version;
mod linker;

pub use block_cache::{BlockCache, CachedBlock};
pub use code_version::CodeVersionTable;
pub use linker::Linker;
