pub mod engine;
pub mod error;
pub mod postprocess;

pub use engine::{StoreBy, TransferEngine, TransferResult};
pub use error::{IntegrityError, TransferError};
pub use postprocess::postprocess;
