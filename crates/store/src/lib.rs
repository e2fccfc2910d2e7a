//! Seams to the object store.
//!
//! The bulk engine talks to storage only through two traits:
//!
//! - [`ObjectStore`]: listing, probing, small-object get/put and deletion
//! - [`TransferEngine`]: asynchronous unit transfers that report bytes to a
//!   [`ProgressSink`](stowage_transfer::ProgressSink) and resolve through a
//!   [`TransferHandle`]
//!
//! [`MemoryStore`] implements both in process, for tests and local work.

pub mod error;
pub mod handle;
pub mod memory;
pub mod traits;

pub use error::StoreError;
pub use handle::TransferHandle;
pub use memory::{CallCounts, MemoryStore, MemoryStoreConfig};
pub use traits::{
    DownloadRequest, GetObjectOutput, ObjectStore, StoreFuture, TransferEngine, UploadRequest,
};
