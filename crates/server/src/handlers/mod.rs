//! HTTP request handlers.

pub mod packages;
pub mod proxy;
pub mod tarballs;
pub mod welcome;

pub use packages::*;
pub use proxy::*;
pub use tarballs::*;
pub use welcome::*;
