pub mod buffer2;
pub mod log_setup;
pub mod parallel;
pub mod serde_format;
pub mod test_utils;

pub use buffer2::Buffer2;
pub use serde_format::{SerdeFormat, SerdeFormatError};
