//! Normalizer, dedup window, dead-letter sinks and the partitioned
//! ingestion bus.

pub mod bus;
pub mod dead_letter;
pub mod dedup;
pub mod error;
pub mod normalizer;
pub mod stage;

pub use bus::{
    partition_for, BusConsumer, BusHandle, BusStats, BusStatsSnapshot, BusWorkers, IngestionBus,
};
pub use dead_letter::{DeadLetter, DeadLetterSink, JsonlDeadLetterSink, MemoryDeadLetterSink};
pub use dedup::{dedup_key, DedupWindow};
pub use error::{BusClosed, ConsumeError, DeadLetterError, RejectReason, Rejected};
pub use normalizer::normalize;
pub use stage::{IngestOutcome, IngestStage, IngestStats, IngestStatsSnapshot};
