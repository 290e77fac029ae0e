pub mod api;
mod columns;
pub mod control;
pub mod error;
pub mod family;
pub mod ids;
pub mod report;
pub mod schema;
pub mod value;

pub use api::*;
pub use control::{JobControl, JobSignal, JobState, NoopJobControl, ProgressThrottle};
pub use error::{StrataError, StrataResult};
pub use family::DatasetFamily;
pub use ids::*;
pub use report::*;
pub use schema::*;
pub use value::*;
