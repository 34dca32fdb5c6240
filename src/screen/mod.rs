pub mod filter;
pub mod metrics;
pub mod row;
pub mod sort;

pub use filter::Filters;
pub use metrics::{AggregateMetrics, Leader, SectorLeader};
pub use row::Row;
pub use sort::{sort_rows, SortDirection, SortKey, SortSpec};
