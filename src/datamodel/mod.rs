pub mod aggregation;
pub mod metric;
pub mod metric_query;

pub use aggregation::Aggregation;
pub use metric::{Metric, MetricTags, unencodable_reason};
pub use metric_query::{DEFAULT_LOOKBACK_HOURS, MetricQuery, RecentWindow, TimeRange};
