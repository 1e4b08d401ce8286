//! Data models mirroring the database schema.

mod activation;
mod binding;
mod purchase;
mod validation;

pub use activation::*;
pub use binding::*;
pub use purchase::*;
pub use validation::*;
