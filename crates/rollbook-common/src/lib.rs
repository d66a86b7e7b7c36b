pub mod error;

pub use error::{ConstraintKind, ConstraintViolation, Error, Result};
