pub mod convert;
pub mod metrics;
pub mod progress;
pub mod sink;
pub mod storage;
pub mod worker;
