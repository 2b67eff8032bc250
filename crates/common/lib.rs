pub mod assignment;
pub mod constants;
pub mod error;
pub mod handle;
pub mod hasher;
pub mod properties;
pub mod shared_queue;

pub use assignment::Assignment;
pub use error::CommonError;
pub use handle::Handle;
pub use properties::{Properties, PropertyValue};
pub use shared_queue::SharedQueue;
