pub mod error;
pub mod traits;
pub mod watch;

#[cfg(feature = "memory")]
pub mod memory;

pub use error::*;
pub use traits::*;
pub use watch::*;
