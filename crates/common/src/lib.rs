pub mod dto;
pub mod error;
pub mod observability;


pub use dto::*;
pub use error::{Error, ErrorDetail, ErrorResponse, Result};
pub use observability::{MetricsSnapshot, ObservableMetrics, RequestId};
