pub mod entities;
pub mod ports;
pub mod repositories;
pub mod runnable;
pub mod value_objects;

pub use entities::*;
pub use ports::*;
pub use repositories::*;
pub use runnable::*;
pub use value_objects::*;

pub use jobstore_errors::{JobResult, JobStoreError};
