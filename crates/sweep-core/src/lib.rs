pub mod addr;
pub mod batcher;
pub mod load;
pub mod metrics;
pub mod prober;
pub mod ranges;
pub mod scheduler;
pub mod store;

pub use batcher::{run_batcher, BATCH_SIZE, MAX_WRITERS};
pub use load::run_load_monitor;
pub use metrics::ScanMetrics;
pub use prober::{IcmpProber, Outcome, Pinger};
pub use ranges::{run_range_source, ScanTask, RANGE_SIZE};
pub use scheduler::{run_scheduler, AdmissionController};
pub use store::{PgStore, ResultStore, StoreConfig};
