use std::cell::{Cell, Ref, RefCell};
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::Result;
use crate::matrix::Matrix;
use crate::ops::elementwise::{BinaryFn, UnaryFn};
use crate::ops::reduce::Direction;

// Recorder — the procedure-factory contract for lazy graph construction
//
// A matrix either has no recorder (eager execution, nothing is remembered)
// or points at exactly one. Every differentiable operation wraps its
// algorithm in the same protocol:
//
//   1. synchronize the recorders of all operands (adopt-or-conflict)
//   2. attach the recorder to the result
//   3. open an expression scope (take the lock)
//   4. run the algorithm
//   5. register one typed expression and release the lock
//
// The lock is what keeps composite operations honest: while the outermost
// call holds it, nested operations receive the zero continuation token and
// their create calls are silently ignored, so a softmax built from
// exp/sum/divide records as a single expression. An external replay engine
// later walks the expression list to rebuild the forward graph and derive
// the gradient computation; this module only guarantees faithful recording.

/// Unique identifier for a matrix instance. References preserve the id,
/// copies allocate a fresh one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MatrixId(u64);

impl MatrixId {
    /// Next id from a global atomic counter.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        MatrixId(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for MatrixId {
    fn default() -> Self {
        Self::new()
    }
}

/// Token returned by [`Recorder::start_expression`]. The zero token marks a
/// nested call that must not register anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpressionLock(u64);

impl ExpressionLock {
    /// Whether this token belongs to a nested (non-recording) scope.
    pub fn is_continuation(&self) -> bool {
        self.0 == 0
    }
}

/// One recorded graph node: operator discriminant, detached input/output
/// handles, and the operator-specific parameters the replay engine needs.
#[derive(Debug)]
pub enum Expression {
    Unary {
        input: Matrix,
        output: Matrix,
        function: UnaryFn,
    },
    Binary {
        lhs: Matrix,
        rhs: Matrix,
        output: Matrix,
        function: BinaryFn,
    },
    Add {
        lhs: Matrix,
        rhs: Matrix,
        output: Matrix,
    },
    Subtract {
        lhs: Matrix,
        rhs: Matrix,
        output: Matrix,
    },
    Multiply {
        lhs: Matrix,
        rhs: Matrix,
        output: Matrix,
    },
    Divide {
        lhs: Matrix,
        rhs: Matrix,
        output: Matrix,
    },
    Dot {
        lhs: Matrix,
        rhs: Matrix,
        output: Matrix,
    },
    Sum {
        input: Matrix,
        output: Matrix,
        direction: Direction,
    },
    Mean {
        input: Matrix,
        output: Matrix,
        direction: Direction,
    },
    Variance {
        input: Matrix,
        output: Matrix,
        direction: Direction,
    },
    StandardDeviation {
        input: Matrix,
        output: Matrix,
        direction: Direction,
    },
    Norm {
        input: Matrix,
        output: Matrix,
        p: u32,
    },
    Entropy {
        input: Matrix,
        output: Matrix,
        direction: Direction,
    },
    Softmax {
        input: Matrix,
        output: Matrix,
        temperature: f64,
    },
    Dropout {
        input: Matrix,
        output: Matrix,
        probability: f64,
        monte_carlo: bool,
    },
    GradientClip {
        input: Matrix,
        output: Matrix,
        threshold: f64,
    },
    Convolve {
        input: Matrix,
        filter: Matrix,
        output: Matrix,
        stride: usize,
        dilation: usize,
        filter_rows: usize,
        filter_columns: usize,
        depth_separable: bool,
    },
    Crosscorrelate {
        input: Matrix,
        filter: Matrix,
        output: Matrix,
        stride: usize,
        dilation: usize,
        filter_rows: usize,
        filter_columns: usize,
        depth_separable: bool,
    },
    WinogradConvolve {
        input: Matrix,
        filter: Matrix,
        output: Matrix,
        stride: usize,
        dilation: usize,
        filter_rows: usize,
        filter_columns: usize,
    },
    MaxPool {
        input: Matrix,
        output: Matrix,
        stride: usize,
        filter_rows: usize,
        filter_columns: usize,
    },
    RandomPool {
        input: Matrix,
        output: Matrix,
        stride: usize,
        filter_rows: usize,
        filter_columns: usize,
    },
    CyclicPool {
        input: Matrix,
        output: Matrix,
        stride: usize,
        filter_rows: usize,
        filter_columns: usize,
    },
    AveragePool {
        input: Matrix,
        output: Matrix,
        stride: usize,
        filter_rows: usize,
        filter_columns: usize,
    },
    Join {
        lhs: Matrix,
        rhs: Matrix,
        output: Matrix,
        vertical: bool,
    },
    Unjoin {
        input: Matrix,
        output: Matrix,
        start_row: usize,
        start_column: usize,
        start_depth: usize,
    },
    Flatten {
        input: Matrix,
        output: Matrix,
    },
    Unflatten {
        input: Matrix,
        output: Matrix,
    },
    Transpose {
        input: Matrix,
        output: Matrix,
    },
}

impl Expression {
    /// Short operator name for diagnostics.
    pub fn operator(&self) -> &'static str {
        match self {
            Expression::Unary { .. } => "unary",
            Expression::Binary { .. } => "binary",
            Expression::Add { .. } => "add",
            Expression::Subtract { .. } => "subtract",
            Expression::Multiply { .. } => "multiply",
            Expression::Divide { .. } => "divide",
            Expression::Dot { .. } => "dot",
            Expression::Sum { .. } => "sum",
            Expression::Mean { .. } => "mean",
            Expression::Variance { .. } => "variance",
            Expression::StandardDeviation { .. } => "standard-deviation",
            Expression::Norm { .. } => "norm",
            Expression::Entropy { .. } => "entropy",
            Expression::Softmax { .. } => "softmax",
            Expression::Dropout { .. } => "dropout",
            Expression::GradientClip { .. } => "gradient-clip",
            Expression::Convolve { .. } => "convolve",
            Expression::Crosscorrelate { .. } => "crosscorrelate",
            Expression::WinogradConvolve { .. } => "winograd-convolve",
            Expression::MaxPool { .. } => "max-pool",
            Expression::RandomPool { .. } => "random-pool",
            Expression::CyclicPool { .. } => "cyclic-pool",
            Expression::AveragePool { .. } => "average-pool",
            Expression::Join { .. } => "join",
            Expression::Unjoin { .. } => "unjoin",
            Expression::Flatten { .. } => "flatten",
            Expression::Unflatten { .. } => "unflatten",
            Expression::Transpose { .. } => "transpose",
        }
    }

    /// References to the input matrices of this expression.
    pub fn inputs(&self) -> Vec<&Matrix> {
        match self {
            Expression::Unary { input, .. }
            | Expression::Sum { input, .. }
            | Expression::Mean { input, .. }
            | Expression::Variance { input, .. }
            | Expression::StandardDeviation { input, .. }
            | Expression::Norm { input, .. }
            | Expression::Entropy { input, .. }
            | Expression::Softmax { input, .. }
            | Expression::Dropout { input, .. }
            | Expression::GradientClip { input, .. }
            | Expression::MaxPool { input, .. }
            | Expression::RandomPool { input, .. }
            | Expression::CyclicPool { input, .. }
            | Expression::AveragePool { input, .. }
            | Expression::Unjoin { input, .. }
            | Expression::Flatten { input, .. }
            | Expression::Unflatten { input, .. }
            | Expression::Transpose { input, .. } => vec![input],
            Expression::Binary { lhs, rhs, .. }
            | Expression::Add { lhs, rhs, .. }
            | Expression::Subtract { lhs, rhs, .. }
            | Expression::Multiply { lhs, rhs, .. }
            | Expression::Divide { lhs, rhs, .. }
            | Expression::Dot { lhs, rhs, .. }
            | Expression::Join { lhs, rhs, .. } => vec![lhs, rhs],
            Expression::Convolve { input, filter, .. }
            | Expression::Crosscorrelate { input, filter, .. }
            | Expression::WinogradConvolve { input, filter, .. } => vec![input, filter],
        }
    }

    /// Reference to the output matrix of this expression.
    pub fn output(&self) -> &Matrix {
        match self {
            Expression::Unary { output, .. }
            | Expression::Binary { output, .. }
            | Expression::Add { output, .. }
            | Expression::Subtract { output, .. }
            | Expression::Multiply { output, .. }
            | Expression::Divide { output, .. }
            | Expression::Dot { output, .. }
            | Expression::Sum { output, .. }
            | Expression::Mean { output, .. }
            | Expression::Variance { output, .. }
            | Expression::StandardDeviation { output, .. }
            | Expression::Norm { output, .. }
            | Expression::Entropy { output, .. }
            | Expression::Softmax { output, .. }
            | Expression::Dropout { output, .. }
            | Expression::GradientClip { output, .. }
            | Expression::Convolve { output, .. }
            | Expression::Crosscorrelate { output, .. }
            | Expression::WinogradConvolve { output, .. }
            | Expression::MaxPool { output, .. }
            | Expression::RandomPool { output, .. }
            | Expression::CyclicPool { output, .. }
            | Expression::AveragePool { output, .. }
            | Expression::Join { output, .. }
            | Expression::Unjoin { output, .. }
            | Expression::Flatten { output, .. }
            | Expression::Unflatten { output, .. }
            | Expression::Transpose { output, .. } => output,
        }
    }
}

/// Records the chain of executed matrix operations so an external replay
/// engine can rebuild the forward computation and differentiate it.
///
/// Shared across every matrix of one graph via `Rc`; identity comparison
/// (`Rc::ptr_eq`) is what the synchronization rule checks.
#[derive(Debug)]
pub struct Recorder {
    lock: Cell<u64>,
    next_lock: Cell<u64>,
    expressions: RefCell<Vec<Expression>>,
}

impl Recorder {
    pub fn new() -> Rc<Recorder> {
        Rc::new(Recorder {
            lock: Cell::new(0),
            next_lock: Cell::new(1),
            expressions: RefCell::new(Vec::new()),
        })
    }

    /// Open an expression scope. Returns the zero continuation token when a
    /// scope is already open, so nested operations silently stay quiet.
    pub fn start_expression(&self) -> ExpressionLock {
        if self.lock.get() != 0 {
            return ExpressionLock(0);
        }
        let token = self.next_lock.get();
        self.next_lock.set(token + 1);
        self.lock.set(token);
        ExpressionLock(token)
    }

    /// Release a held scope without registering anything. Called when the
    /// wrapped algorithm fails so the lock does not leak.
    pub fn abort_expression(&self, lock: ExpressionLock) {
        if lock.0 != 0 && self.lock.get() == lock.0 {
            self.lock.set(0);
        }
    }

    /// Whether a create call bearing this token belongs to a nested scope
    /// and must be ignored.
    fn is_nested(&self, lock: ExpressionLock) -> bool {
        self.lock.get() != lock.0
    }

    /// Register an expression and release the lock; nested tokens no-op.
    fn register(&self, lock: ExpressionLock, expression: Expression) {
        if self.is_nested(lock) {
            return;
        }
        self.expressions.borrow_mut().push(expression);
        self.lock.set(0);
    }

    /// The recorded expressions, in execution order.
    pub fn expressions(&self) -> Ref<'_, Vec<Expression>> {
        self.expressions.borrow()
    }

    /// Number of recorded expressions.
    pub fn len(&self) -> usize {
        self.expressions.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.expressions.borrow().is_empty()
    }

    // Typed creation methods — one per operator family, mirroring the
    // operation wrappers that call them.

    pub fn create_unary_expression(
        &self,
        lock: ExpressionLock,
        input: &Matrix,
        output: &Matrix,
        function: UnaryFn,
    ) {
        self.register(
            lock,
            Expression::Unary {
                input: input.detached(),
                output: output.detached(),
                function,
            },
        );
    }

    pub fn create_binary_expression(
        &self,
        lock: ExpressionLock,
        lhs: &Matrix,
        rhs: &Matrix,
        output: &Matrix,
        function: BinaryFn,
    ) {
        self.register(
            lock,
            Expression::Binary {
                lhs: lhs.detached(),
                rhs: rhs.detached(),
                output: output.detached(),
                function,
            },
        );
    }

    pub fn create_add_expression(
        &self,
        lock: ExpressionLock,
        lhs: &Matrix,
        rhs: &Matrix,
        output: &Matrix,
    ) {
        self.register(
            lock,
            Expression::Add {
                lhs: lhs.detached(),
                rhs: rhs.detached(),
                output: output.detached(),
            },
        );
    }

    pub fn create_subtract_expression(
        &self,
        lock: ExpressionLock,
        lhs: &Matrix,
        rhs: &Matrix,
        output: &Matrix,
    ) {
        self.register(
            lock,
            Expression::Subtract {
                lhs: lhs.detached(),
                rhs: rhs.detached(),
                output: output.detached(),
            },
        );
    }

    pub fn create_multiply_expression(
        &self,
        lock: ExpressionLock,
        lhs: &Matrix,
        rhs: &Matrix,
        output: &Matrix,
    ) {
        self.register(
            lock,
            Expression::Multiply {
                lhs: lhs.detached(),
                rhs: rhs.detached(),
                output: output.detached(),
            },
        );
    }

    pub fn create_divide_expression(
        &self,
        lock: ExpressionLock,
        lhs: &Matrix,
        rhs: &Matrix,
        output: &Matrix,
    ) {
        self.register(
            lock,
            Expression::Divide {
                lhs: lhs.detached(),
                rhs: rhs.detached(),
                output: output.detached(),
            },
        );
    }

    pub fn create_dot_expression(
        &self,
        lock: ExpressionLock,
        lhs: &Matrix,
        rhs: &Matrix,
        output: &Matrix,
    ) {
        self.register(
            lock,
            Expression::Dot {
                lhs: lhs.detached(),
                rhs: rhs.detached(),
                output: output.detached(),
            },
        );
    }

    pub fn create_sum_expression(
        &self,
        lock: ExpressionLock,
        input: &Matrix,
        output: &Matrix,
        direction: Direction,
    ) {
        self.register(
            lock,
            Expression::Sum {
                input: input.detached(),
                output: output.detached(),
                direction,
            },
        );
    }

    pub fn create_mean_expression(
        &self,
        lock: ExpressionLock,
        input: &Matrix,
        output: &Matrix,
        direction: Direction,
    ) {
        self.register(
            lock,
            Expression::Mean {
                input: input.detached(),
                output: output.detached(),
                direction,
            },
        );
    }

    pub fn create_variance_expression(
        &self,
        lock: ExpressionLock,
        input: &Matrix,
        output: &Matrix,
        direction: Direction,
    ) {
        self.register(
            lock,
            Expression::Variance {
                input: input.detached(),
                output: output.detached(),
                direction,
            },
        );
    }

    pub fn create_standard_deviation_expression(
        &self,
        lock: ExpressionLock,
        input: &Matrix,
        output: &Matrix,
        direction: Direction,
    ) {
        self.register(
            lock,
            Expression::StandardDeviation {
                input: input.detached(),
                output: output.detached(),
                direction,
            },
        );
    }

    pub fn create_norm_expression(
        &self,
        lock: ExpressionLock,
        input: &Matrix,
        output: &Matrix,
        p: u32,
    ) {
        self.register(
            lock,
            Expression::Norm {
                input: input.detached(),
                output: output.detached(),
                p,
            },
        );
    }

    pub fn create_entropy_expression(
        &self,
        lock: ExpressionLock,
        input: &Matrix,
        output: &Matrix,
        direction: Direction,
    ) {
        self.register(
            lock,
            Expression::Entropy {
                input: input.detached(),
                output: output.detached(),
                direction,
            },
        );
    }

    pub fn create_softmax_expression(
        &self,
        lock: ExpressionLock,
        input: &Matrix,
        output: &Matrix,
        temperature: f64,
    ) {
        self.register(
            lock,
            Expression::Softmax {
                input: input.detached(),
                output: output.detached(),
                temperature,
            },
        );
    }

    pub fn create_dropout_expression(
        &self,
        lock: ExpressionLock,
        input: &Matrix,
        output: &Matrix,
        probability: f64,
        monte_carlo: bool,
    ) {
        self.register(
            lock,
            Expression::Dropout {
                input: input.detached(),
                output: output.detached(),
                probability,
                monte_carlo,
            },
        );
    }

    pub fn create_gradient_clip_expression(
        &self,
        lock: ExpressionLock,
        input: &Matrix,
        output: &Matrix,
        threshold: f64,
    ) {
        self.register(
            lock,
            Expression::GradientClip {
                input: input.detached(),
                output: output.detached(),
                threshold,
            },
        );
    }

    #[allow(clippy::too_many_arguments)]
    pub fn create_convolve_expression(
        &self,
        lock: ExpressionLock,
        input: &Matrix,
        filter: &Matrix,
        output: &Matrix,
        stride: usize,
        dilation: usize,
        filter_rows: usize,
        filter_columns: usize,
        depth_separable: bool,
    ) {
        self.register(
            lock,
            Expression::Convolve {
                input: input.detached(),
                filter: filter.detached(),
                output: output.detached(),
                stride,
                dilation,
                filter_rows,
                filter_columns,
                depth_separable,
            },
        );
    }

    #[allow(clippy::too_many_arguments)]
    pub fn create_crosscorrelate_expression(
        &self,
        lock: ExpressionLock,
        input: &Matrix,
        filter: &Matrix,
        output: &Matrix,
        stride: usize,
        dilation: usize,
        filter_rows: usize,
        filter_columns: usize,
        depth_separable: bool,
    ) {
        self.register(
            lock,
            Expression::Crosscorrelate {
                input: input.detached(),
                filter: filter.detached(),
                output: output.detached(),
                stride,
                dilation,
                filter_rows,
                filter_columns,
                depth_separable,
            },
        );
    }

    #[allow(clippy::too_many_arguments)]
    pub fn create_winograd_convolve_expression(
        &self,
        lock: ExpressionLock,
        input: &Matrix,
        filter: &Matrix,
        output: &Matrix,
        stride: usize,
        dilation: usize,
        filter_rows: usize,
        filter_columns: usize,
    ) {
        self.register(
            lock,
            Expression::WinogradConvolve {
                input: input.detached(),
                filter: filter.detached(),
                output: output.detached(),
                stride,
                dilation,
                filter_rows,
                filter_columns,
            },
        );
    }

    pub fn create_max_pool_expression(
        &self,
        lock: ExpressionLock,
        input: &Matrix,
        output: &Matrix,
        stride: usize,
        filter_rows: usize,
        filter_columns: usize,
    ) {
        self.register(
            lock,
            Expression::MaxPool {
                input: input.detached(),
                output: output.detached(),
                stride,
                filter_rows,
                filter_columns,
            },
        );
    }

    pub fn create_random_pool_expression(
        &self,
        lock: ExpressionLock,
        input: &Matrix,
        output: &Matrix,
        stride: usize,
        filter_rows: usize,
        filter_columns: usize,
    ) {
        self.register(
            lock,
            Expression::RandomPool {
                input: input.detached(),
                output: output.detached(),
                stride,
                filter_rows,
                filter_columns,
            },
        );
    }

    pub fn create_cyclic_pool_expression(
        &self,
        lock: ExpressionLock,
        input: &Matrix,
        output: &Matrix,
        stride: usize,
        filter_rows: usize,
        filter_columns: usize,
    ) {
        self.register(
            lock,
            Expression::CyclicPool {
                input: input.detached(),
                output: output.detached(),
                stride,
                filter_rows,
                filter_columns,
            },
        );
    }

    pub fn create_average_pool_expression(
        &self,
        lock: ExpressionLock,
        input: &Matrix,
        output: &Matrix,
        stride: usize,
        filter_rows: usize,
        filter_columns: usize,
    ) {
        self.register(
            lock,
            Expression::AveragePool {
                input: input.detached(),
                output: output.detached(),
                stride,
                filter_rows,
                filter_columns,
            },
        );
    }

    pub fn create_join_expression(
        &self,
        lock: ExpressionLock,
        lhs: &Matrix,
        rhs: &Matrix,
        output: &Matrix,
        vertical: bool,
    ) {
        self.register(
            lock,
            Expression::Join {
                lhs: lhs.detached(),
                rhs: rhs.detached(),
                output: output.detached(),
                vertical,
            },
        );
    }

    pub fn create_unjoin_expression(
        &self,
        lock: ExpressionLock,
        input: &Matrix,
        output: &Matrix,
        start_row: usize,
        start_column: usize,
        start_depth: usize,
    ) {
        self.register(
            lock,
            Expression::Unjoin {
                input: input.detached(),
                output: output.detached(),
                start_row,
                start_column,
                start_depth,
            },
        );
    }

    pub fn create_flatten_expression(&self, lock: ExpressionLock, input: &Matrix, output: &Matrix) {
        self.register(
            lock,
            Expression::Flatten {
                input: input.detached(),
                output: output.detached(),
            },
        );
    }

    pub fn create_unflatten_expression(
        &self,
        lock: ExpressionLock,
        input: &Matrix,
        output: &Matrix,
    ) {
        self.register(
            lock,
            Expression::Unflatten {
                input: input.detached(),
                output: output.detached(),
            },
        );
    }

    pub fn create_transpose_expression(
        &self,
        lock: ExpressionLock,
        input: &Matrix,
        output: &Matrix,
    ) {
        self.register(
            lock,
            Expression::Transpose {
                input: input.detached(),
                output: output.detached(),
            },
        );
    }
}

/// Synchronize the recorders of a set of matrices: a bare matrix adopts the
/// recorder of any recorded one; two distinct recorders are a conflict.
pub fn synchronize(matrices: &[&Matrix]) -> Result<()> {
    for window in matrices.windows(2) {
        window[0].synchronize_with(window[1])?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_protocol_outer_wins() {
        let recorder = Recorder::new();
        let outer = recorder.start_expression();
        assert!(!outer.is_continuation());

        // A nested scope gets the continuation token and its create call
        // registers nothing.
        let nested = recorder.start_expression();
        assert!(nested.is_continuation());
        let a = Matrix::dense(1, 1, 1);
        let b = Matrix::dense(1, 1, 1);
        recorder.create_add_expression(nested, &a, &a, &b);
        assert!(recorder.is_empty());

        // The outer create registers and releases the lock.
        recorder.create_add_expression(outer, &a, &a, &b);
        assert_eq!(recorder.len(), 1);
        assert!(!recorder.start_expression().is_continuation());
    }

    #[test]
    fn test_abort_releases_lock() {
        let recorder = Recorder::new();
        let lock = recorder.start_expression();
        recorder.abort_expression(lock);
        assert!(!recorder.start_expression().is_continuation());
        assert!(recorder.is_empty());
    }

    #[test]
    fn test_expression_accessors() {
        let recorder = Recorder::new();
        let lock = recorder.start_expression();
        let a = Matrix::dense(2, 2, 1);
        let b = Matrix::dense(2, 2, 1);
        let out = Matrix::dense(2, 2, 1);
        recorder.create_multiply_expression(lock, &a, &b, &out);

        let expressions = recorder.expressions();
        assert_eq!(expressions[0].operator(), "multiply");
        assert_eq!(expressions[0].inputs().len(), 2);
        assert_eq!(expressions[0].output().dims(), out.dims());
    }
}
