pub mod car;
pub mod error;
pub mod index;
pub mod pipeline;
pub mod source;
pub mod store;
pub mod worker;

pub use car::{CarBlock, CarBlockReader};
pub use error::CarlinkError;
pub use index::CidIndex;
pub use pipeline::{ReconcileOutcome, reconcile};
pub use source::{CarSourceLike, DirectoryCarSource, InMemoryCarSource};
pub use store::{CarFile, FileRange, InMemoryStore, PostgresStore, StoreLike};
pub use worker::{Job, WorkerEvent};

/// Installs the fmt subscriber, honoring `RUST_LOG` and defaulting to `info`.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
