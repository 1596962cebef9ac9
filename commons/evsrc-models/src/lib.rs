pub mod child;
pub mod condition;
pub mod meta;
pub mod source;
pub mod validation;

pub use child::*;
pub use condition::*;
pub use meta::*;
pub use source::*;
pub use validation::*;
