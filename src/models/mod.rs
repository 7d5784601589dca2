pub mod enums;
pub mod field;

pub use enums::*;
pub use field::*;
