pub mod pool;
pub mod proxy;

#[cfg(test)]
mod proxy_test;

pub use pool::TrackingWorkerPool;
pub use proxy::{
    classify, Classification, ClassificationOutcome, ProxyOutcome, ReportKind, SkipReason,
    TrackingProxy,
};
