use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use rand::Rng;

use crate::error::{Error, Result};
use crate::graph::{ExpressionLock, MatrixId, Recorder};
use crate::mask::Mask;
use crate::ops::conv::{self, ConvGeometry, ConvMode};
use crate::ops::dot;
use crate::ops::elementwise::{self, BinaryFn, UnaryFn};
use crate::ops::pool::{self, CyclicPool, PoolGeometry, PositionMap};
use crate::ops::reduce::{self, Direction};
use crate::ops::structural;
use crate::ops::winograd::{self, WinogradTransforms};
use crate::shape::{Dims, View};
use crate::storage::{Storage, StorageKind};

// Matrix — the central rank-<=3 numeric container
//
// A Matrix is a handle: the cell storage sits behind Rc<RefCell<...>> so
// that reference() produces a shallow alias observing the same mutations,
// while copy() duplicates everything. Geometry (the View), spatial operator
// parameters, the optional name and the recorder cell are per-instance and
// never shared between aliases.
//
// Every differentiable operation follows one protocol: without a recorder
// anywhere it just runs; with one, the operands synchronize their recorder
// references (adopt-or-conflict), the result adopts it, an expression scope
// opens, the algorithm runs, and a typed expression is registered. The
// recorded graph is replayed and differentiated elsewhere; this type only
// guarantees the recording is faithful and complete.

/// Parameters for the spatial operators, stored on the input matrix because
/// convolution and pooling are invoked as methods on it.
#[derive(Debug, Clone, Copy)]
struct Spatial {
    stride: usize,
    dilation: usize,
    filter_rows: usize,
    filter_columns: usize,
    filter_depth: usize,
    depth_separable: bool,
}

impl Default for Spatial {
    fn default() -> Self {
        Spatial {
            stride: 1,
            dilation: 1,
            filter_rows: 0,
            filter_columns: 0,
            filter_depth: 0,
            depth_separable: false,
        }
    }
}

/// Dense or sparse rank-<=3 matrix with an optional mask and an optional
/// reference to a gradient recorder.
pub struct Matrix {
    id: MatrixId,
    data: Rc<RefCell<Storage>>,
    view: View,
    mask: RefCell<Option<Mask>>,
    recorder: RefCell<Option<Rc<Recorder>>>,
    spatial: Cell<Spatial>,
    name: RefCell<Option<String>>,
}

impl fmt::Debug for Matrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Matrix(id={:?}, dims={}, kind={}{})",
            self.id,
            self.dims(),
            self.kind().name(),
            match self.name.borrow().as_deref() {
                Some(name) => format!(", name={name}"),
                None => String::new(),
            }
        )
    }
}

impl Matrix {
    // Construction

    /// New zero matrix of the given storage variant and geometry.
    pub fn new(kind: StorageKind, rows: usize, columns: usize, depth: usize) -> Matrix {
        let view = View::new(rows, columns, depth);
        Matrix {
            id: MatrixId::new(),
            data: Rc::new(RefCell::new(Storage::new(kind, view.pure_size()))),
            view,
            mask: RefCell::new(None),
            recorder: RefCell::new(None),
            spatial: Cell::new(Spatial::default()),
            name: RefCell::new(None),
        }
    }

    /// New dense zero matrix.
    pub fn dense(rows: usize, columns: usize, depth: usize) -> Matrix {
        Matrix::new(StorageKind::Dense, rows, columns, depth)
    }

    /// New sparse zero matrix.
    pub fn sparse(rows: usize, columns: usize, depth: usize) -> Matrix {
        Matrix::new(StorageKind::Sparse, rows, columns, depth)
    }

    /// New zero matrix that rejects slice requests regardless of size.
    pub fn unsliceable(kind: StorageKind, rows: usize, columns: usize, depth: usize) -> Matrix {
        let view = View::unsliceable(rows, columns, depth);
        Matrix {
            id: MatrixId::new(),
            data: Rc::new(RefCell::new(Storage::new(kind, view.pure_size()))),
            view,
            mask: RefCell::new(None),
            recorder: RefCell::new(None),
            spatial: Cell::new(Spatial::default()),
            name: RefCell::new(None),
        }
    }

    /// New 1x1x1 scalar; broadcasts against any operand.
    pub fn scalar(value: f64) -> Matrix {
        let matrix = Matrix::dense(1, 1, 1);
        matrix.set(0, 0, 0, value);
        matrix
    }

    /// New dense matrix from values laid out row-major per depth plane.
    pub fn from_values(rows: usize, columns: usize, depth: usize, values: &[f64]) -> Result<Matrix> {
        let expected = rows * columns * depth;
        if values.len() != expected {
            return Err(Error::Parameter(format!(
                "expected {} values for a {}x{}x{} matrix, got {}",
                expected,
                rows,
                columns,
                depth,
                values.len()
            )));
        }
        let matrix = Matrix::dense(rows, columns, depth);
        for d in 0..depth {
            for row in 0..rows {
                for column in 0..columns {
                    matrix.set(row, column, d, values[(d * rows + row) * columns + column]);
                }
            }
        }
        Ok(matrix)
    }

    /// New matrix populated by an initializer function of (row, column),
    /// applied to every depth plane.
    pub fn with_initializer(
        kind: StorageKind,
        rows: usize,
        columns: usize,
        depth: usize,
        initializer: impl Fn(usize, usize) -> f64,
    ) -> Matrix {
        let matrix = Matrix::new(kind, rows, columns, depth);
        matrix.initialize(&initializer);
        matrix
    }

    /// Populate this matrix with an initializer function of (row, column).
    pub fn initialize(&self, initializer: &dyn Fn(usize, usize) -> f64) {
        for depth in 0..self.depth() {
            for column in 0..self.columns() {
                for row in 0..self.rows() {
                    self.set(row, column, depth, initializer(row, column));
                }
            }
        }
    }

    /// Zero matrix with this matrix's storage variant and effective
    /// geometry (transpose and slice resolved).
    pub fn zeros_like(&self) -> Matrix {
        Matrix::new(self.kind(), self.rows(), self.columns(), self.depth())
    }

    /// Result placeholder for a binary operation: the non-scalar operand
    /// decides the geometry.
    fn result_matrix(&self, other: &Matrix) -> Matrix {
        if !self.is_scalar() {
            self.zeros_like()
        } else {
            other.zeros_like()
        }
    }

    // Aliasing and duplication

    /// Shallow alias: shares storage and mask with this matrix, so writes
    /// through either handle are visible to both. Geometry, spatial
    /// parameters and the recorder reference are copied per-instance.
    pub fn reference(&self) -> Matrix {
        Matrix {
            id: self.id,
            data: Rc::clone(&self.data),
            view: self.view.clone(),
            mask: RefCell::new(self.mask.borrow().as_ref().map(Mask::reference)),
            recorder: RefCell::new(self.recorder.borrow().clone()),
            spatial: Cell::new(self.spatial.get()),
            name: RefCell::new(self.name.borrow().clone()),
        }
    }

    /// Full independent duplicate, mask included.
    pub fn copy(&self) -> Matrix {
        Matrix {
            id: MatrixId::new(),
            data: Rc::new(RefCell::new(self.data.borrow().clone())),
            view: self.view.clone(),
            mask: RefCell::new(self.mask.borrow().as_ref().map(Mask::copy)),
            recorder: RefCell::new(self.recorder.borrow().clone()),
            spatial: Cell::new(self.spatial.get()),
            name: RefCell::new(self.name.borrow().clone()),
        }
    }

    /// Handle with the recorder reference cleared; what expressions store
    /// so the recorder never owns matrices that point back at it.
    pub(crate) fn detached(&self) -> Matrix {
        let detached = self.reference();
        *detached.recorder.borrow_mut() = None;
        detached
    }

    /// Alias sharing this matrix's storage under a different view.
    fn view_alias(&self, view: View, mask: Option<Mask>) -> Matrix {
        Matrix {
            id: MatrixId::new(),
            data: Rc::clone(&self.data),
            view,
            mask: RefCell::new(mask),
            recorder: RefCell::new(self.recorder.borrow().clone()),
            spatial: Cell::new(self.spatial.get()),
            name: RefCell::new(None),
        }
    }

    /// Whether two handles alias the same storage.
    pub fn shares_data_with(&self, other: &Matrix) -> bool {
        Rc::ptr_eq(&self.data, &other.data)
    }

    // Geometry

    pub fn id(&self) -> MatrixId {
        self.id
    }

    pub fn kind(&self) -> StorageKind {
        self.data.borrow().kind()
    }

    /// Effective row count (transpose and slice composed).
    pub fn rows(&self) -> usize {
        self.view.rows()
    }

    /// Effective column count (transpose and slice composed).
    pub fn columns(&self) -> usize {
        self.view.columns()
    }

    /// Effective depth count.
    pub fn depth(&self) -> usize {
        self.view.depth()
    }

    /// Effective geometry triple.
    pub fn dims(&self) -> Dims {
        self.view.dims()
    }

    /// Element count of the effective (sliced) view.
    pub fn size(&self) -> usize {
        self.view.size()
    }

    pub fn is_scalar(&self) -> bool {
        self.view.is_scalar()
    }

    pub fn is_transposed(&self) -> bool {
        self.view.is_transposed()
    }

    /// Strict per-axis equality of effective geometry.
    pub fn has_equal_size(&self, other: &Matrix) -> bool {
        self.rows() == other.rows()
            && self.columns() == other.columns()
            && self.depth() == other.depth()
    }

    pub fn set_name(&self, name: impl Into<String>) {
        *self.name.borrow_mut() = Some(name.into());
    }

    pub fn name(&self) -> Option<String> {
        self.name.borrow().clone()
    }

    // Cell access

    /// Value at logical (row, column, depth).
    pub fn get(&self, row: usize, column: usize, depth: usize) -> f64 {
        self.data.borrow().get(self.view.array_index(row, column, depth))
    }

    /// Write the value at logical (row, column, depth).
    pub fn set(&self, row: usize, column: usize, depth: usize, value: f64) {
        self.data
            .borrow_mut()
            .set(self.view.array_index(row, column, depth), value);
    }

    /// Add to the value at logical (row, column, depth).
    pub fn increment(&self, row: usize, column: usize, depth: usize, value: f64) {
        let index = self.view.array_index(row, column, depth);
        let mut data = self.data.borrow_mut();
        let current = data.get(index);
        data.set(index, current + value);
    }

    /// Reset every cell to zero and clear the mask layers.
    pub fn reset(&self) {
        self.data.borrow_mut().reset();
        if let Some(mask) = self.mask.borrow().as_ref() {
            mask.clear();
        }
    }

    // Slicing

    /// Install a slice window over this instance. Coordinates are given in
    /// the current effective orientation.
    pub fn slice_at(
        &mut self,
        start_row: usize,
        start_column: usize,
        start_depth: usize,
        rows: usize,
        columns: usize,
        depth: usize,
    ) -> Result<()> {
        self.view
            .slice_at(start_row, start_column, start_depth, rows, columns, depth)
    }

    /// Reset this instance's slice window to the full extent.
    pub fn unslice(&mut self) {
        self.view.unslice();
    }

    /// A sliced alias of this matrix; the receiver is left untouched.
    pub fn slice(
        &self,
        start_row: usize,
        start_column: usize,
        start_depth: usize,
        rows: usize,
        columns: usize,
        depth: usize,
    ) -> Result<Matrix> {
        let mut sliced = self.reference();
        sliced.slice_at(start_row, start_column, start_depth, rows, columns, depth)?;
        Ok(sliced)
    }

    // Masking

    /// Attach a mask. Its variant must match this matrix's storage variant
    /// and its geometry this matrix's effective geometry.
    pub fn set_mask(&self, mask: Mask) -> Result<()> {
        if mask.kind() != self.kind() {
            return Err(Error::StorageVariantMismatch {
                mask: mask.kind().name(),
                matrix: self.kind().name(),
            });
        }
        if mask.dims() != self.dims() {
            return Err(Error::MaskDimensionMismatch {
                mask: mask.dims(),
                matrix: self.dims(),
            });
        }
        *self.mask.borrow_mut() = Some(mask);
        Ok(())
    }

    /// Create an unset mask of matching variant and geometry if none is
    /// attached yet.
    pub fn ensure_mask(&self) {
        let mut mask = self.mask.borrow_mut();
        if mask.is_none() {
            *mask = Some(Mask::new(
                self.kind(),
                self.rows(),
                self.columns(),
                self.depth(),
            ));
        }
    }

    /// Detach the mask.
    pub fn unset_mask(&self) {
        *self.mask.borrow_mut() = None;
    }

    /// Handle to the attached mask, if any (cheap alias).
    pub fn mask(&self) -> Option<Mask> {
        self.mask.borrow().as_ref().map(Mask::reference)
    }

    pub fn has_mask(&self) -> bool {
        self.mask.borrow().is_some()
    }

    /// Whether a mask exists and covers (row, column, depth). Coordinates
    /// beyond the mask's geometry count as unmasked.
    pub fn has_mask_at(&self, row: usize, column: usize, depth: usize) -> bool {
        match self.mask.borrow().as_ref() {
            Some(mask) => {
                row < mask.rows()
                    && column < mask.columns()
                    && depth < mask.depth()
                    && mask.is_masked(row, column, depth)
            }
            None => false,
        }
    }

    // Recorder plumbing

    pub fn set_recorder(&self, recorder: Option<Rc<Recorder>>) {
        *self.recorder.borrow_mut() = recorder;
    }

    pub fn recorder(&self) -> Option<Rc<Recorder>> {
        self.recorder.borrow().clone()
    }

    pub fn remove_recorder(&self) {
        *self.recorder.borrow_mut() = None;
    }

    pub fn has_recorder(&self) -> bool {
        self.recorder.borrow().is_some()
    }

    /// Reconcile the recorder references of two operands: a bare matrix
    /// adopts the other's recorder; two distinct recorders cannot be merged.
    pub fn synchronize_with(&self, other: &Matrix) -> Result<()> {
        let mine = self.recorder();
        let theirs = other.recorder();
        match (mine, theirs) {
            (None, Some(recorder)) => {
                self.set_recorder(Some(recorder));
                Ok(())
            }
            (Some(recorder), None) => {
                other.set_recorder(Some(recorder));
                Ok(())
            }
            (Some(mine), Some(theirs)) => {
                if Rc::ptr_eq(&mine, &theirs) {
                    Ok(())
                } else {
                    Err(Error::GraphConflict)
                }
            }
            (None, None) => Ok(()),
        }
    }

    /// Run `compute` under the recording protocol: synchronize operands,
    /// attach the recorder to the result, open an expression scope, execute,
    /// register via `record`. Without a recorder anywhere, just execute.
    pub(crate) fn recorded(
        &self,
        other: Option<&Matrix>,
        result: &Matrix,
        compute: impl FnOnce() -> Result<()>,
        record: impl FnOnce(&Recorder, ExpressionLock),
    ) -> Result<()> {
        let recording = self.has_recorder() || other.map_or(false, Matrix::has_recorder);
        if !recording {
            return compute();
        }
        if let Some(other) = other {
            self.synchronize_with(other)?;
        }
        let recorder = self.recorder().expect("recorder present after synchronize");
        result.set_recorder(Some(Rc::clone(&recorder)));
        let lock = recorder.start_expression();
        if let Err(error) = compute() {
            recorder.abort_expression(lock);
            return Err(error);
        }
        record(recorder.as_ref(), lock);
        Ok(())
    }

    // Unary and binary function application

    /// Apply a named single-variable function, producing a new matrix.
    pub fn apply(&self, function: UnaryFn) -> Result<Matrix> {
        let result = self.zeros_like();
        self.apply_into(&result, function)?;
        Ok(result)
    }

    /// Apply a named single-variable function into `result`. Passing the
    /// receiver itself makes this the in-place variant.
    pub fn apply_into(&self, result: &Matrix, function: UnaryFn) -> Result<()> {
        self.recorded(
            None,
            result,
            || elementwise::apply_unary(self, result, |v| function.apply(v)),
            |recorder, lock| recorder.create_unary_expression(lock, self, result, function),
        )
    }

    /// Apply a named two-variable function against another matrix.
    pub fn apply_binary(&self, other: &Matrix, function: BinaryFn) -> Result<Matrix> {
        let result = self.result_matrix(other);
        self.apply_binary_into(other, &result, function)?;
        Ok(result)
    }

    /// Apply a named two-variable function into `result`.
    pub fn apply_binary_into(
        &self,
        other: &Matrix,
        result: &Matrix,
        function: BinaryFn,
    ) -> Result<()> {
        self.recorded(
            Some(other),
            result,
            || elementwise::apply_binary(self, other, result, |a, b| function.apply(a, b)),
            |recorder, lock| {
                recorder.create_binary_expression(lock, self, other, result, function)
            },
        )
    }

    /// Element-wise power: self ^ power.
    pub fn power(&self, power: f64) -> Result<Matrix> {
        self.apply_binary(&Matrix::scalar(power), BinaryFn::Pow)
    }

    /// Element-wise maximum with another matrix.
    pub fn max_with(&self, other: &Matrix) -> Result<Matrix> {
        self.apply_binary(other, BinaryFn::Max)
    }

    /// Element-wise minimum with another matrix.
    pub fn min_with(&self, other: &Matrix) -> Result<Matrix> {
        self.apply_binary(other, BinaryFn::Min)
    }

    // Arithmetic

    /// Element-wise sum with another matrix (scalars broadcast).
    pub fn add(&self, other: &Matrix) -> Result<Matrix> {
        let result = self.result_matrix(other);
        self.add_into(other, &result)?;
        Ok(result)
    }

    /// Element-wise sum into `result`.
    pub fn add_into(&self, other: &Matrix, result: &Matrix) -> Result<()> {
        self.recorded(
            Some(other),
            result,
            || elementwise::apply_binary(self, other, result, |a, b| a + b),
            |recorder, lock| recorder.create_add_expression(lock, self, other, result),
        )
    }

    /// Add a constant to every cell.
    pub fn add_value(&self, constant: f64) -> Result<Matrix> {
        self.add(&Matrix::scalar(constant))
    }

    /// Element-wise difference.
    pub fn subtract(&self, other: &Matrix) -> Result<Matrix> {
        let result = self.result_matrix(other);
        self.subtract_into(other, &result)?;
        Ok(result)
    }

    /// Element-wise difference into `result`.
    pub fn subtract_into(&self, other: &Matrix, result: &Matrix) -> Result<()> {
        self.recorded(
            Some(other),
            result,
            || elementwise::apply_binary(self, other, result, |a, b| a - b),
            |recorder, lock| recorder.create_subtract_expression(lock, self, other, result),
        )
    }

    /// Subtract a constant from every cell.
    pub fn subtract_value(&self, constant: f64) -> Result<Matrix> {
        self.subtract(&Matrix::scalar(constant))
    }

    /// Element-wise product.
    pub fn multiply(&self, other: &Matrix) -> Result<Matrix> {
        let result = self.result_matrix(other);
        self.multiply_into(other, &result)?;
        Ok(result)
    }

    /// Element-wise product into `result`.
    pub fn multiply_into(&self, other: &Matrix, result: &Matrix) -> Result<()> {
        self.recorded(
            Some(other),
            result,
            || elementwise::apply_binary(self, other, result, |a, b| a * b),
            |recorder, lock| recorder.create_multiply_expression(lock, self, other, result),
        )
    }

    /// Multiply every cell by a constant.
    pub fn multiply_value(&self, constant: f64) -> Result<Matrix> {
        self.multiply(&Matrix::scalar(constant))
    }

    /// Element-wise quotient. A zero divisor yields positive infinity
    /// rather than NaN, keeping gradients finite-signed.
    pub fn divide(&self, other: &Matrix) -> Result<Matrix> {
        let result = self.result_matrix(other);
        self.divide_into(other, &result)?;
        Ok(result)
    }

    /// Element-wise quotient into `result`.
    pub fn divide_into(&self, other: &Matrix, result: &Matrix) -> Result<()> {
        self.recorded(
            Some(other),
            result,
            || {
                elementwise::apply_binary(self, other, result, |a, b| {
                    if b != 0.0 {
                        a / b
                    } else {
                        f64::INFINITY
                    }
                })
            },
            |recorder, lock| recorder.create_divide_expression(lock, self, other, result),
        )
    }

    /// Divide every cell by a constant.
    pub fn divide_value(&self, constant: f64) -> Result<Matrix> {
        self.divide(&Matrix::scalar(constant))
    }

    // Dot product

    /// Matrix product: (self rows) x (other columns) per depth slice.
    pub fn dot(&self, other: &Matrix) -> Result<Matrix> {
        if self.columns() != other.rows() {
            return Err(Error::InnerDimensionMismatch {
                lhs_columns: self.columns(),
                rhs_rows: other.rows(),
            });
        }
        let result = Matrix::new(self.kind(), self.rows(), other.columns(), self.depth());
        self.dot_into(other, &result)?;
        Ok(result)
    }

    /// Matrix product into `result`.
    pub fn dot_into(&self, other: &Matrix, result: &Matrix) -> Result<()> {
        self.recorded(
            Some(other),
            result,
            || dot::apply_dot(self, other, result),
            |recorder, lock| recorder.create_dot_expression(lock, self, other, result),
        )
    }

    // Reductions — plain value forms and recorded matrix forms

    /// Sum of all unmasked cells.
    pub fn sum(&self) -> f64 {
        reduce::sum(self)
    }

    /// Directional sum as a reduced matrix; recorded.
    pub fn sum_along(&self, direction: Direction) -> Result<Matrix> {
        let result = reduce::sum_along(self, direction);
        self.recorded(
            None,
            &result,
            || Ok(()),
            |recorder, lock| recorder.create_sum_expression(lock, self, &result, direction),
        )?;
        Ok(result)
    }

    /// Total sum as a 1x1x1 matrix; recorded.
    pub fn sum_as_matrix(&self) -> Result<Matrix> {
        self.sum_along(Direction::All)
    }

    /// Mean of all unmasked cells.
    pub fn mean(&self) -> f64 {
        reduce::mean(self)
    }

    /// Directional mean as a reduced matrix; recorded.
    pub fn mean_along(&self, direction: Direction) -> Result<Matrix> {
        let result = reduce::mean_along(self, direction);
        self.recorded(
            None,
            &result,
            || Ok(()),
            |recorder, lock| recorder.create_mean_expression(lock, self, &result, direction),
        )?;
        Ok(result)
    }

    /// Total mean as a 1x1x1 matrix; recorded.
    pub fn mean_as_matrix(&self) -> Result<Matrix> {
        self.mean_along(Direction::All)
    }

    /// Variance around the matrix mean.
    pub fn variance(&self) -> f64 {
        reduce::variance(self, self.mean())
    }

    /// Variance around a precomputed mean.
    pub fn variance_with_mean(&self, mean: f64) -> f64 {
        reduce::variance(self, mean)
    }

    /// Directional variance as a reduced matrix; recorded.
    pub fn variance_along(&self, direction: Direction) -> Result<Matrix> {
        let result = reduce::variance_along(self, direction);
        self.recorded(
            None,
            &result,
            || Ok(()),
            |recorder, lock| recorder.create_variance_expression(lock, self, &result, direction),
        )?;
        Ok(result)
    }

    /// Total variance as a 1x1x1 matrix; recorded.
    pub fn variance_as_matrix(&self) -> Result<Matrix> {
        self.variance_along(Direction::All)
    }

    /// Bessel-corrected standard deviation around the matrix mean.
    pub fn standard_deviation(&self) -> f64 {
        reduce::standard_deviation(self, self.mean())
    }

    /// Standard deviation around a precomputed mean.
    pub fn standard_deviation_with_mean(&self, mean: f64) -> f64 {
        reduce::standard_deviation(self, mean)
    }

    /// Standard deviation as a 1x1x1 matrix; recorded.
    pub fn standard_deviation_as_matrix(&self) -> Result<Matrix> {
        let result = Matrix::scalar(self.standard_deviation());
        self.recorded(
            None,
            &result,
            || Ok(()),
            |recorder, lock| {
                recorder.create_standard_deviation_expression(
                    lock,
                    self,
                    &result,
                    Direction::All,
                )
            },
        )?;
        Ok(result)
    }

    /// Cumulative p-norm of unmasked cells, p >= 1.
    pub fn norm(&self, p: u32) -> Result<f64> {
        reduce::norm(self, p)
    }

    /// p-norm as a 1x1x1 matrix; recorded.
    pub fn norm_as_matrix(&self, p: u32) -> Result<Matrix> {
        let result = Matrix::scalar(self.norm(p)?);
        self.recorded(
            None,
            &result,
            || Ok(()),
            |recorder, lock| recorder.create_norm_expression(lock, self, &result, p),
        )?;
        Ok(result)
    }

    /// Shannon entropy of unmasked cells.
    pub fn entropy(&self) -> f64 {
        reduce::entropy(self)
    }

    /// Directional entropy as a reduced matrix; recorded.
    pub fn entropy_along(&self, direction: Direction) -> Result<Matrix> {
        let result = reduce::entropy_along(self, direction);
        self.recorded(
            None,
            &result,
            || Ok(()),
            |recorder, lock| recorder.create_entropy_expression(lock, self, &result, direction),
        )?;
        Ok(result)
    }

    /// Minimum unmasked value.
    pub fn min(&self) -> f64 {
        reduce::min(self)
    }

    /// Directional minimum as a reduced matrix.
    pub fn min_along(&self, direction: Direction) -> Matrix {
        reduce::min_along(self, direction)
    }

    /// Maximum unmasked value.
    pub fn max(&self) -> f64 {
        reduce::max(self)
    }

    /// Directional maximum as a reduced matrix.
    pub fn max_along(&self, direction: Direction) -> Matrix {
        reduce::max_along(self, direction)
    }

    /// Coordinate of the minimum unmasked value.
    pub fn argmin(&self) -> (usize, usize, usize) {
        reduce::argmin(self)
    }

    /// Coordinate of the maximum unmasked value.
    pub fn argmax(&self) -> (usize, usize, usize) {
        reduce::argmax(self)
    }

    // Spatial operator parameters

    pub fn set_stride(&self, stride: usize) {
        let mut spatial = self.spatial.get();
        spatial.stride = stride;
        self.spatial.set(spatial);
    }

    pub fn stride(&self) -> usize {
        self.spatial.get().stride
    }

    pub fn set_dilation(&self, dilation: usize) {
        let mut spatial = self.spatial.get();
        spatial.dilation = dilation;
        self.spatial.set(spatial);
    }

    pub fn dilation(&self) -> usize {
        self.spatial.get().dilation
    }

    pub fn set_filter_row_size(&self, filter_rows: usize) {
        let mut spatial = self.spatial.get();
        spatial.filter_rows = filter_rows;
        self.spatial.set(spatial);
    }

    pub fn filter_row_size(&self) -> usize {
        self.spatial.get().filter_rows
    }

    pub fn set_filter_column_size(&self, filter_columns: usize) {
        let mut spatial = self.spatial.get();
        spatial.filter_columns = filter_columns;
        self.spatial.set(spatial);
    }

    pub fn filter_column_size(&self) -> usize {
        self.spatial.get().filter_columns
    }

    pub fn set_filter_depth(&self, filter_depth: usize) {
        let mut spatial = self.spatial.get();
        spatial.filter_depth = filter_depth;
        self.spatial.set(spatial);
    }

    pub fn filter_depth(&self) -> usize {
        self.spatial.get().filter_depth
    }

    pub fn set_depth_separable(&self, depth_separable: bool) {
        let mut spatial = self.spatial.get();
        spatial.depth_separable = depth_separable;
        self.spatial.set(spatial);
    }

    pub fn is_depth_separable(&self) -> bool {
        self.spatial.get().depth_separable
    }

    /// Convolution geometry for a filter operand: configured filter sizes,
    /// falling back to the operand's own spatial extents.
    fn conv_geometry(&self, filter: &Matrix) -> ConvGeometry {
        let spatial = self.spatial.get();
        ConvGeometry {
            filter_rows: if spatial.filter_rows > 0 {
                spatial.filter_rows
            } else {
                filter.rows()
            },
            filter_columns: if spatial.filter_columns > 0 {
                spatial.filter_columns
            } else {
                filter.columns()
            },
            stride: spatial.stride,
            dilation: spatial.dilation,
            depth_separable: spatial.depth_separable,
        }
    }

    /// Result placeholder for a convolution with the given geometry.
    fn conv_result(&self, filter: &Matrix, geometry: &ConvGeometry) -> Result<Matrix> {
        if geometry.stride == 0 || geometry.dilation == 0 {
            return Err(Error::Parameter(
                "stride and dilation must be at least 1".into(),
            ));
        }
        let out_rows = geometry
            .output_extent(self.rows(), geometry.dilated_rows())
            .ok_or(Error::DimensionMismatch {
                lhs: self.dims(),
                rhs: filter.dims(),
            })?;
        let out_columns = geometry
            .output_extent(self.columns(), geometry.dilated_columns())
            .ok_or(Error::DimensionMismatch {
                lhs: self.dims(),
                rhs: filter.dims(),
            })?;
        let out_depth = if geometry.depth_separable {
            self.depth()
        } else {
            if self.depth() == 0 || filter.depth() % self.depth() != 0 {
                return Err(Error::DimensionMismatch {
                    lhs: self.dims(),
                    rhs: filter.dims(),
                });
            }
            filter.depth() / self.depth()
        };
        Ok(Matrix::new(self.kind(), out_rows, out_columns, out_depth))
    }

    // Convolution and cross-correlation

    /// Valid-mode convolution of this matrix with a filter.
    pub fn convolve(&self, filter: &Matrix) -> Result<Matrix> {
        let geometry = self.conv_geometry(filter);
        let result = self.conv_result(filter, &geometry)?;
        self.convolve_into(filter, &result)?;
        Ok(result)
    }

    /// Valid-mode convolution into `result`.
    pub fn convolve_into(&self, filter: &Matrix, result: &Matrix) -> Result<()> {
        let geometry = self.conv_geometry(filter);
        self.recorded(
            Some(filter),
            result,
            || conv::apply(self, filter, result, ConvMode::Convolution, geometry),
            |recorder, lock| {
                recorder.create_convolve_expression(
                    lock,
                    self,
                    filter,
                    result,
                    geometry.stride,
                    geometry.dilation,
                    geometry.filter_rows,
                    geometry.filter_columns,
                    geometry.depth_separable,
                )
            },
        )
    }

    /// Valid-mode cross-correlation of this matrix with a filter.
    pub fn crosscorrelate(&self, filter: &Matrix) -> Result<Matrix> {
        let geometry = self.conv_geometry(filter);
        let result = self.conv_result(filter, &geometry)?;
        self.crosscorrelate_into(filter, &result)?;
        Ok(result)
    }

    /// Valid-mode cross-correlation into `result`.
    pub fn crosscorrelate_into(&self, filter: &Matrix, result: &Matrix) -> Result<()> {
        let geometry = self.conv_geometry(filter);
        self.recorded(
            Some(filter),
            result,
            || conv::apply(self, filter, result, ConvMode::Crosscorrelation, geometry),
            |recorder, lock| {
                recorder.create_crosscorrelate_expression(
                    lock,
                    self,
                    filter,
                    result,
                    geometry.stride,
                    geometry.dilation,
                    geometry.filter_rows,
                    geometry.filter_columns,
                    geometry.depth_separable,
                )
            },
        )
    }

    /// Input extent a spatial operator's gradient scatters back into.
    fn gradient_extent(&self, out: usize, window: usize) -> usize {
        (out - 1) * self.stride() + window
    }

    /// Gradient of convolution for the input, taking self as the output
    /// gradient.
    pub fn convolve_input_gradient(&self, filter: &Matrix) -> Result<Matrix> {
        let geometry = self.conv_geometry(filter);
        let input_gradient = Matrix::new(
            self.kind(),
            self.gradient_extent(self.rows(), geometry.dilated_rows()),
            self.gradient_extent(self.columns(), geometry.dilated_columns()),
            if geometry.depth_separable {
                self.depth()
            } else {
                filter.depth() / self.depth().max(1)
            },
        );
        conv::apply_input_gradient(self, filter, &input_gradient, ConvMode::Convolution, geometry)?;
        Ok(input_gradient)
    }

    /// Gradient of cross-correlation for the input.
    pub fn crosscorrelate_input_gradient(&self, filter: &Matrix) -> Result<Matrix> {
        let geometry = self.conv_geometry(filter);
        let input_gradient = Matrix::new(
            self.kind(),
            self.gradient_extent(self.rows(), geometry.dilated_rows()),
            self.gradient_extent(self.columns(), geometry.dilated_columns()),
            if geometry.depth_separable {
                self.depth()
            } else {
                filter.depth() / self.depth().max(1)
            },
        );
        conv::apply_input_gradient(
            self,
            filter,
            &input_gradient,
            ConvMode::Crosscorrelation,
            geometry,
        )?;
        Ok(input_gradient)
    }

    /// Geometry for a filter-gradient pass; the filter extents must have
    /// been configured on this matrix, there is no operand to read them off.
    fn filter_gradient_geometry(&self) -> Result<ConvGeometry> {
        let spatial = self.spatial.get();
        if spatial.filter_rows == 0 || spatial.filter_columns == 0 {
            return Err(Error::Parameter(
                "filter gradient requires configured filter row and column sizes".into(),
            ));
        }
        Ok(ConvGeometry {
            filter_rows: spatial.filter_rows,
            filter_columns: spatial.filter_columns,
            stride: spatial.stride,
            dilation: spatial.dilation,
            depth_separable: spatial.depth_separable,
        })
    }

    /// Gradient of convolution for the filter, taking self as the output
    /// gradient and `input` as the forward input.
    pub fn convolve_filter_gradient(&self, input: &Matrix) -> Result<Matrix> {
        let geometry = self.filter_gradient_geometry()?;
        let filter_gradient = Matrix::new(
            self.kind(),
            geometry.filter_rows,
            geometry.filter_columns,
            if geometry.depth_separable {
                input.depth()
            } else {
                input.depth() * self.depth()
            },
        );
        conv::apply_filter_gradient(self, input, &filter_gradient, ConvMode::Convolution, geometry)?;
        Ok(filter_gradient)
    }

    /// Gradient of cross-correlation for the filter.
    pub fn crosscorrelate_filter_gradient(&self, input: &Matrix) -> Result<Matrix> {
        let geometry = self.filter_gradient_geometry()?;
        let filter_gradient = Matrix::new(
            self.kind(),
            geometry.filter_rows,
            geometry.filter_columns,
            if geometry.depth_separable {
                input.depth()
            } else {
                input.depth() * self.depth()
            },
        );
        conv::apply_filter_gradient(
            self,
            input,
            &filter_gradient,
            ConvMode::Crosscorrelation,
            geometry,
        )?;
        Ok(filter_gradient)
    }

    // Winograd convolution

    /// F(2x2, 3x3) Winograd convolution with the standard transform set.
    pub fn winograd_convolve(&self, filter: &Matrix) -> Result<Matrix> {
        self.winograd_convolve_inner(filter, &WinogradTransforms::standard(), false)
    }

    /// Winograd convolution with caller-supplied transform matrices.
    #[allow(clippy::too_many_arguments)]
    pub fn winograd_convolve_with_transforms(
        &self,
        filter: &Matrix,
        a: &Matrix,
        at: &Matrix,
        c: &Matrix,
        ct: &Matrix,
        g: &Matrix,
        gt: &Matrix,
    ) -> Result<Matrix> {
        let transforms = WinogradTransforms::from_matrices(a, at, c, ct, g, gt)?;
        self.winograd_convolve_inner(filter, &transforms, false)
    }

    /// Winograd convolution with a filter already in the transform domain.
    pub fn winograd_convolve_preprocessed(
        &self,
        preprocessed_filter: &Matrix,
        a: &Matrix,
        at: &Matrix,
        c: &Matrix,
        ct: &Matrix,
    ) -> Result<Matrix> {
        let transforms = WinogradTransforms::data_only(a, at, c, ct)?;
        self.winograd_convolve_inner(preprocessed_filter, &transforms, true)
    }

    fn winograd_convolve_inner(
        &self,
        filter: &Matrix,
        transforms: &WinogradTransforms,
        preprocessed: bool,
    ) -> Result<Matrix> {
        if self.rows() < 3 || self.columns() < 3 {
            return Err(Error::DimensionMismatch {
                lhs: self.dims(),
                rhs: filter.dims(),
            });
        }
        let result = Matrix::new(self.kind(), self.rows() - 2, self.columns() - 2, self.depth());
        let spatial = self.spatial.get();
        self.recorded(
            Some(filter),
            &result,
            || winograd::apply(self, filter, &result, transforms, preprocessed),
            |recorder, lock| {
                recorder.create_winograd_convolve_expression(
                    lock,
                    self,
                    filter,
                    &result,
                    spatial.stride,
                    spatial.dilation,
                    3,
                    3,
                )
            },
        )?;
        Ok(result)
    }

    // Pooling

    /// Pooling geometry from the configured spatial parameters.
    fn pool_geometry(&self) -> Result<PoolGeometry> {
        let spatial = self.spatial.get();
        if spatial.filter_rows == 0 || spatial.filter_columns == 0 {
            return Err(Error::Parameter(
                "pooling requires configured filter row and column sizes".into(),
            ));
        }
        if spatial.stride == 0 {
            return Err(Error::Parameter("pooling stride must be at least 1".into()));
        }
        Ok(PoolGeometry {
            filter_rows: spatial.filter_rows,
            filter_columns: spatial.filter_columns,
            stride: spatial.stride,
        })
    }

    fn pool_result(&self, geometry: &PoolGeometry) -> Result<Matrix> {
        if self.rows() < geometry.filter_rows || self.columns() < geometry.filter_columns {
            return Err(Error::DimensionMismatch {
                lhs: self.dims(),
                rhs: Dims::new(geometry.filter_rows, geometry.filter_columns, self.depth()),
            });
        }
        Ok(Matrix::new(
            self.kind(),
            (self.rows() - geometry.filter_rows) / geometry.stride + 1,
            (self.columns() - geometry.filter_columns) / geometry.stride + 1,
            self.depth(),
        ))
    }

    /// Max pooling; returns the pooled matrix and the position map the
    /// gradient pass scatters through.
    pub fn max_pool(&self) -> Result<(Matrix, PositionMap)> {
        let geometry = self.pool_geometry()?;
        let result = self.pool_result(&geometry)?;
        let mut positions = PositionMap::new();
        self.recorded(
            None,
            &result,
            || pool::max_pool(self, &result, geometry, &mut positions),
            |recorder, lock| {
                recorder.create_max_pool_expression(
                    lock,
                    self,
                    &result,
                    geometry.stride,
                    geometry.filter_rows,
                    geometry.filter_columns,
                )
            },
        )?;
        Ok((result, positions))
    }

    /// Random pooling, drawing each source cell proportionally to its
    /// magnitude.
    pub fn random_pool(&self, rng: &mut impl Rng) -> Result<(Matrix, PositionMap)> {
        let geometry = self.pool_geometry()?;
        let result = self.pool_result(&geometry)?;
        let mut positions = PositionMap::new();
        self.recorded(
            None,
            &result,
            || pool::random_pool(self, &result, geometry, rng, &mut positions),
            |recorder, lock| {
                recorder.create_random_pool_expression(
                    lock,
                    self,
                    &result,
                    geometry.stride,
                    geometry.filter_rows,
                    geometry.filter_columns,
                )
            },
        )?;
        Ok((result, positions))
    }

    /// Cyclic pooling; the cursor carried by `pool` keeps cycling across
    /// successive calls.
    pub fn cyclic_pool(&self, pool: &mut CyclicPool) -> Result<(Matrix, PositionMap)> {
        let geometry = self.pool_geometry()?;
        let result = self.pool_result(&geometry)?;
        let mut positions = PositionMap::new();
        self.recorded(
            None,
            &result,
            || pool.apply(self, &result, geometry, &mut positions),
            |recorder, lock| {
                recorder.create_cyclic_pool_expression(
                    lock,
                    self,
                    &result,
                    geometry.stride,
                    geometry.filter_rows,
                    geometry.filter_columns,
                )
            },
        )?;
        Ok((result, positions))
    }

    /// Average pooling.
    pub fn average_pool(&self) -> Result<Matrix> {
        let geometry = self.pool_geometry()?;
        let result = self.pool_result(&geometry)?;
        self.recorded(
            None,
            &result,
            || pool::average_pool(self, &result, geometry),
            |recorder, lock| {
                recorder.create_average_pool_expression(
                    lock,
                    self,
                    &result,
                    geometry.stride,
                    geometry.filter_rows,
                    geometry.filter_columns,
                )
            },
        )?;
        Ok(result)
    }

    /// Gradient of the positional pooling operators, taking self as the
    /// output gradient.
    pub fn positional_pool_gradient(&self, positions: &PositionMap) -> Result<Matrix> {
        let geometry = self.pool_geometry()?;
        let input_gradient = Matrix::new(
            self.kind(),
            self.gradient_extent(self.rows(), geometry.filter_rows),
            self.gradient_extent(self.columns(), geometry.filter_columns),
            self.depth(),
        );
        pool::positional_pool_gradient(self, &input_gradient, positions)?;
        Ok(input_gradient)
    }

    /// Gradient of average pooling, taking self as the output gradient.
    pub fn average_pool_gradient(&self) -> Result<Matrix> {
        let geometry = self.pool_geometry()?;
        let input_gradient = Matrix::new(
            self.kind(),
            self.gradient_extent(self.rows(), geometry.filter_rows),
            self.gradient_extent(self.columns(), geometry.filter_columns),
            self.depth(),
        );
        pool::average_pool_gradient(self, &input_gradient, geometry)?;
        Ok(input_gradient)
    }

    // Structural operators

    /// Concatenate with another matrix along rows (`vertical`) or columns.
    pub fn join(&self, other: &Matrix, vertical: bool) -> Result<Matrix> {
        let result = structural::join(self, other, vertical)?;
        self.recorded(
            Some(other),
            &result,
            || Ok(()),
            |recorder, lock| recorder.create_join_expression(lock, self, other, &result, vertical),
        )?;
        Ok(result)
    }

    /// Extract a window starting at the given origin.
    pub fn unjoin(
        &self,
        start_row: usize,
        start_column: usize,
        start_depth: usize,
        rows: usize,
        columns: usize,
        depth: usize,
    ) -> Result<Matrix> {
        let result = structural::unjoin(
            self,
            start_row,
            start_column,
            start_depth,
            rows,
            columns,
            depth,
        )?;
        self.recorded(
            None,
            &result,
            || Ok(()),
            |recorder, lock| {
                recorder.create_unjoin_expression(
                    lock,
                    self,
                    &result,
                    start_row,
                    start_column,
                    start_depth,
                )
            },
        )?;
        Ok(result)
    }

    /// Cut into two matrices at `position` along rows (`vertical`) or
    /// columns. Both halves are recorded as window extractions.
    pub fn split(&self, position: usize, vertical: bool) -> Result<(Matrix, Matrix)> {
        let limit = if vertical { self.rows() } else { self.columns() };
        if position < 1 || position >= limit {
            return Err(Error::CutOutOfBounds { position, limit });
        }
        if vertical {
            let first = self.unjoin(0, 0, 0, position, self.columns(), self.depth())?;
            let second = self.unjoin(
                position,
                0,
                0,
                self.rows() - position,
                self.columns(),
                self.depth(),
            )?;
            Ok((first, second))
        } else {
            let first = self.unjoin(0, 0, 0, self.rows(), position, self.depth())?;
            let second = self.unjoin(
                0,
                position,
                0,
                self.rows(),
                self.columns() - position,
                self.depth(),
            )?;
            Ok((first, second))
        }
    }

    /// Linearize into a single column in array-index order.
    pub fn flatten(&self) -> Result<Matrix> {
        let result = structural::flatten(self);
        self.recorded(
            None,
            &result,
            || Ok(()),
            |recorder, lock| recorder.create_flatten_expression(lock, self, &result),
        )?;
        Ok(result)
    }

    /// Rebuild a geometry from a flattened column.
    pub fn unflatten(&self, rows: usize, columns: usize, depth: usize) -> Result<Matrix> {
        let result = structural::unflatten(self, rows, columns, depth)?;
        self.recorded(
            None,
            &result,
            || Ok(()),
            |recorder, lock| recorder.create_unflatten_expression(lock, self, &result),
        )?;
        Ok(result)
    }

    /// Transposed view: shares storage with this matrix, swapping the
    /// row/column interpretation (the mask is viewed transposed as well).
    pub fn transpose(&self) -> Result<Matrix> {
        let mask = self.mask.borrow().as_ref().map(Mask::transpose);
        let result = self.view_alias(self.view.transposed(), mask);
        self.recorded(
            None,
            &result,
            || Ok(()),
            |recorder, lock| recorder.create_transpose_expression(lock, self, &result),
        )?;
        Ok(result)
    }

    // Equality

    /// Cell-for-cell equality; geometries must match.
    pub fn equals(&self, other: &Matrix) -> Result<bool> {
        structural::equals(self, other)
    }

    /// Overwrite this matrix's cells with another's.
    pub fn set_equal_to(&self, other: &Matrix) -> Result<()> {
        structural::copy_into(other, self)
    }

    // Free-function application (for callers composing their own cell math)

    /// Apply an arbitrary single-variable function; not recorded.
    pub fn apply_fn(&self, function: impl Fn(f64) -> f64) -> Result<Matrix> {
        let result = self.zeros_like();
        elementwise::apply_unary(self, &result, function)?;
        Ok(result)
    }

    /// Apply an arbitrary two-variable function; not recorded.
    pub fn apply_binary_fn(
        &self,
        other: &Matrix,
        function: impl Fn(f64, f64) -> f64,
    ) -> Result<Matrix> {
        let result = self.result_matrix(other);
        elementwise::apply_binary(self, other, &result, function)?;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_invariant_under_transpose_and_slice() {
        let matrix = Matrix::dense(6, 4, 2);
        assert_eq!(matrix.rows() * matrix.columns() * matrix.depth(), matrix.size());

        let transposed = matrix.transpose().unwrap();
        assert_eq!(transposed.dims(), Dims::new(4, 6, 2));
        assert_eq!(
            transposed.rows() * transposed.columns() * transposed.depth(),
            transposed.size()
        );

        let sliced = matrix.slice(1, 1, 0, 3, 2, 1).unwrap();
        assert_eq!(sliced.dims(), Dims::new(3, 2, 1));
        assert_eq!(sliced.size(), 6);
    }

    #[test]
    fn test_double_transpose_identity() {
        let matrix = Matrix::from_values(2, 3, 1, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        let back = matrix.transpose().unwrap().transpose().unwrap();
        assert_eq!(back.dims(), matrix.dims());
        assert!(matrix.equals(&back).unwrap());
    }

    #[test]
    fn test_transpose_is_a_view() {
        let matrix = Matrix::from_values(2, 2, 1, &[1.0, 2.0, 3.0, 4.0]).unwrap();
        let transposed = matrix.transpose().unwrap();
        assert!(matrix.shares_data_with(&transposed));
        assert_eq!(transposed.get(0, 1, 0), 3.0);
        // Writes through the view land in the shared storage.
        transposed.set(1, 0, 0, 20.0);
        assert_eq!(matrix.get(0, 1, 0), 20.0);
    }

    #[test]
    fn test_reference_aliases_copy_detaches() {
        let matrix = Matrix::from_values(2, 2, 1, &[1.0, 2.0, 3.0, 4.0]).unwrap();
        let alias = matrix.reference();
        let copy = matrix.copy();

        matrix.set(0, 0, 0, 9.0);
        assert_eq!(alias.get(0, 0, 0), 9.0);
        assert_eq!(copy.get(0, 0, 0), 1.0);
        assert_eq!(alias.id(), matrix.id());
        assert_ne!(copy.id(), matrix.id());
    }

    #[test]
    fn test_add_and_broadcast() {
        let matrix = Matrix::from_values(2, 2, 1, &[1.0, 2.0, 3.0, 4.0]).unwrap();
        let sum = matrix.add(&matrix).unwrap();
        assert_eq!(sum.get(1, 1, 0), 8.0);

        let shifted = matrix.add_value(0.5).unwrap();
        assert_eq!(shifted.get(0, 0, 0), 1.5);

        let other = Matrix::dense(3, 2, 1);
        let err = matrix.add(&other).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Dimension);
    }

    #[test]
    fn test_divide_by_scalar_zero_yields_infinity() {
        let matrix = Matrix::from_values(2, 2, 1, &[1.0, 2.0, 3.0, 4.0]).unwrap();
        let quotient = matrix.divide(&Matrix::scalar(0.0)).unwrap();
        for row in 0..2 {
            for column in 0..2 {
                assert_eq!(quotient.get(row, column, 0), f64::INFINITY);
            }
        }
    }

    #[test]
    fn test_mask_variant_must_match() {
        let matrix = Matrix::dense(2, 2, 1);
        let sparse_mask = Mask::new(StorageKind::Sparse, 2, 2, 1);
        let err = matrix.set_mask(sparse_mask).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::TypeMismatch);

        let wrong_size = Mask::new(StorageKind::Dense, 3, 2, 1);
        let err = matrix.set_mask(wrong_size).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Dimension);

        let mask = Mask::new(StorageKind::Dense, 2, 2, 1);
        assert!(matrix.set_mask(mask).is_ok());
    }

    #[test]
    fn test_synchronize_adopts_and_conflicts() {
        let a = Matrix::dense(2, 2, 1);
        let b = Matrix::dense(2, 2, 1);
        let recorder = Recorder::new();
        a.set_recorder(Some(Rc::clone(&recorder)));

        a.synchronize_with(&b).unwrap();
        assert!(b.has_recorder());

        let c = Matrix::dense(2, 2, 1);
        c.set_recorder(Some(Recorder::new()));
        let err = a.synchronize_with(&c).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::GraphConflict);
    }

    #[test]
    fn test_sum_as_matrix_records_once() {
        let matrix = Matrix::from_values(2, 2, 1, &[1.0, 2.0, 3.0, 4.0]).unwrap();
        let recorder = Recorder::new();
        matrix.set_recorder(Some(Rc::clone(&recorder)));

        let total = matrix.sum_as_matrix().unwrap();
        assert_eq!(total.get(0, 0, 0), 10.0);
        assert_eq!(recorder.len(), 1);
        assert!(total.has_recorder());
    }

    #[test]
    fn test_conv_geometry_from_filter_operand() {
        let input = Matrix::from_values(
            3,
            3,
            1,
            &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0],
        )
        .unwrap();
        let filter = Matrix::from_values(2, 2, 1, &[1.0, 0.0, 0.0, 1.0]).unwrap();
        let result = input.crosscorrelate(&filter).unwrap();
        assert_eq!(result.dims(), Dims::new(2, 2, 1));
        assert_eq!(result.get(0, 0, 0), 6.0);
    }
}
