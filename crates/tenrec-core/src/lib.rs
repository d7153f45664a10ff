//! # tenrec-core
//!
//! Rank-<=3 dense/sparse matrix core with an embedded, lazily recorded
//! computation graph for reverse-mode gradient construction.
//!
//! This crate provides:
//! - [`Matrix`] — dense or sparse row/column/depth container with
//!   transpose-as-view, slice windows and scalar broadcasting
//! - [`Mask`] — stackable per-element/row/column exclusion masks consulted
//!   by every element-wise and reduction algorithm
//! - [`Recorder`] / [`Expression`] — the procedure-factory contract: each
//!   differentiable operation registers one typed expression so an external
//!   replay engine can rebuild and differentiate the forward pass
//! - the operation dispatch layer ([`ops`]) — arithmetic, reductions, dot,
//!   convolution/cross-correlation/Winograd, pooling, join/split/flatten
//! - statistics, sampling and initialization utilities built on top
//!
//! Graph construction is single-threaded by design: handles are reference
//! counted without locks and do not cross threads.
//!
//! # Example
//!
//! ```ignore
//! use tenrec_core::{Matrix, Recorder};
//!
//! let recorder = Recorder::new();
//! let x = Matrix::from_values(2, 2, 1, &[1.0, 2.0, 3.0, 4.0])?;
//! x.set_recorder(Some(recorder.clone()));
//!
//! let y = x.multiply(&x)?.sum_as_matrix()?;   // records two expressions
//! assert_eq!(recorder.len(), 2);
//! ```

pub mod error;
pub mod graph;
pub mod init;
pub mod mask;
pub mod matrix;
pub mod ops;
pub mod sample;
pub mod shape;
pub mod stats;
pub mod storage;

pub use error::{Error, ErrorKind, Result};
pub use graph::{synchronize, Expression, ExpressionLock, MatrixId, Recorder};
pub use init::Initialization;
pub use mask::Mask;
pub use matrix::Matrix;
pub use ops::{BinaryFn, ConvMode, CyclicPool, Direction, PositionMap, UnaryFn, WinogradTransforms};
pub use shape::{Dims, View};
pub use storage::{Storage, StorageKind};
