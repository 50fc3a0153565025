//! Shared types for the insight analytics query gateway.

mod classification;
mod invocation;
mod kpi;
mod query;

pub use classification::*;
pub use invocation::*;
pub use kpi::*;
pub use query::*;
