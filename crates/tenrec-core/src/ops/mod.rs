//! Operation dispatch layer: self-contained algorithms parameterized by
//! geometry. Every algorithm reads and writes cells through the shared
//! array-index computation and consults the mask predicate before including
//! a value, so it is independent of the storage variant underneath.

pub mod conv;
pub mod dot;
pub mod elementwise;
pub mod pool;
pub mod reduce;
pub mod structural;
pub mod winograd;

pub use conv::ConvMode;
pub use elementwise::{BinaryFn, UnaryFn};
pub use pool::{CyclicPool, PositionMap};
pub use reduce::Direction;
pub use winograd::WinogradTransforms;
