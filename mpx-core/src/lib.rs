// mpx-core/src/lib.rs
pub mod cache;
pub mod driver;
pub mod fetch;

// Re-export key types
pub use cache::{CacheReader, Cacher, DirCacher};
pub use driver::{Driver, GoDriver};
pub use fetch::{Fetch, FetchOps, FetchResult};
