pub mod cli;
pub mod http;
pub mod ingest;
pub mod service;

pub use http::{SharedService, router};
pub use service::{PayrollService, ServiceError};
