//! Acquisition data path: sample records, the acquisition queue and the persistent log.
pub mod log;
pub mod medium;
pub mod queue;
pub mod sample;

pub use log::{PersistentLog, StreamNames};
pub use medium::{FsMedium, LogStream, MemoryMedium, StorageMedium};
pub use queue::{AcquisitionQueue, Delivery};
pub use sample::{RecordMeta, Sample, SensorValue, META_SIZE, SAMPLE_SIZE};
