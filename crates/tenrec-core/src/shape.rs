use std::fmt;

use crate::error::{Error, Result};

// View — row/column/depth geometry composed with transpose and slicing
//
// A View describes how logical (row, column, depth) coordinates map onto a
// flat storage buffer. It owns everything geometric about a matrix instance:
//
//   1. The pure dimensions of the underlying storage (never change)
//   2. The transpose flag (swaps the meaning of row/column, no data copy)
//   3. An optional slice window (re-reads a sub-region, no data copy)
//   4. The scalar flag (a 1x1x1 matrix that broadcasts against anything)
//
// The array-index computation below is shared by every operation in the
// crate; two matrices with identical geometry index identically.

/// Row/column/depth extent triple. Used for geometry reporting and errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dims {
    pub rows: usize,
    pub columns: usize,
    pub depth: usize,
}

impl Dims {
    pub fn new(rows: usize, columns: usize, depth: usize) -> Self {
        Dims {
            rows,
            columns,
            depth,
        }
    }

    /// Total number of elements.
    pub fn size(&self) -> usize {
        self.rows * self.columns * self.depth
    }
}

impl fmt::Display for Dims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{}", self.rows, self.columns, self.depth)
    }
}

impl From<(usize, usize, usize)> for Dims {
    fn from((rows, columns, depth): (usize, usize, usize)) -> Self {
        Dims::new(rows, columns, depth)
    }
}

/// A slice window in pure (untransposed) coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SliceWindow {
    start_row: usize,
    start_column: usize,
    start_depth: usize,
    rows: usize,
    columns: usize,
    depth: usize,
}

/// Geometry of one matrix instance: pure dimensions plus transpose and
/// slice state. Views are per-instance and never shared between aliases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct View {
    rows: usize,
    columns: usize,
    depth: usize,
    scalar: bool,
    transposed: bool,
    sliceable: bool,
    slice: Option<SliceWindow>,
}

impl View {
    /// Geometry for a freshly constructed matrix. A 1x1x1 matrix is scalar
    /// and broadcasts against any operand.
    pub fn new(rows: usize, columns: usize, depth: usize) -> Self {
        let scalar = rows == 1 && columns == 1 && depth == 1;
        View {
            rows,
            columns,
            depth,
            scalar,
            transposed: false,
            // Scalars have nothing to slice.
            sliceable: !scalar,
            slice: None,
        }
    }

    /// Geometry with slicing support disabled regardless of size.
    pub fn unsliceable(rows: usize, columns: usize, depth: usize) -> Self {
        let mut view = View::new(rows, columns, depth);
        view.sliceable = false;
        view
    }

    // Pure accessors — the underlying storage geometry.

    pub fn pure_rows(&self) -> usize {
        self.rows
    }

    pub fn pure_columns(&self) -> usize {
        self.columns
    }

    pub fn pure_depth(&self) -> usize {
        self.depth
    }

    /// Element count of the underlying storage.
    pub fn pure_size(&self) -> usize {
        self.rows * self.columns * self.depth
    }

    // Effective accessors — transpose applied first, then the slice window.

    /// Effective row count.
    pub fn rows(&self) -> usize {
        if self.transposed {
            self.sliced_columns()
        } else {
            self.sliced_rows()
        }
    }

    /// Effective column count.
    pub fn columns(&self) -> usize {
        if self.transposed {
            self.sliced_rows()
        } else {
            self.sliced_columns()
        }
    }

    /// Effective depth count (transpose never touches depth).
    pub fn depth(&self) -> usize {
        match self.slice {
            Some(window) => window.depth,
            None => self.depth,
        }
    }

    fn sliced_rows(&self) -> usize {
        match self.slice {
            Some(window) => window.rows,
            None => self.rows,
        }
    }

    fn sliced_columns(&self) -> usize {
        match self.slice {
            Some(window) => window.columns,
            None => self.columns,
        }
    }

    /// Effective geometry as a triple.
    pub fn dims(&self) -> Dims {
        Dims::new(self.rows(), self.columns(), self.depth())
    }

    /// Element count of the effective (sliced) view.
    pub fn size(&self) -> usize {
        self.rows() * self.columns() * self.depth()
    }

    pub fn is_scalar(&self) -> bool {
        self.scalar
    }

    pub fn is_transposed(&self) -> bool {
        self.transposed
    }

    pub fn is_sliceable(&self) -> bool {
        self.sliceable
    }

    pub fn is_sliced(&self) -> bool {
        self.slice.is_some()
    }

    /// The same geometry with the row/column interpretation flipped.
    pub fn transposed(&self) -> View {
        let mut view = self.clone();
        view.transposed = !view.transposed;
        view
    }

    /// Install a slice window. The window is given in the caller's effective
    /// orientation and validated against the pure dimensions; a scalar or an
    /// otherwise unsliceable matrix rejects the request.
    pub fn slice_at(
        &mut self,
        start_row: usize,
        start_column: usize,
        start_depth: usize,
        rows: usize,
        columns: usize,
        depth: usize,
    ) -> Result<()> {
        if !self.sliceable {
            return Err(Error::NotSliceable);
        }
        // Transpose swaps the meaning of row/column before slicing applies,
        // so map the requested window back into pure coordinates.
        let (start_row, start_column, rows, columns) = if self.transposed {
            (start_column, start_row, columns, rows)
        } else {
            (start_row, start_column, rows, columns)
        };
        if rows == 0
            || columns == 0
            || depth == 0
            || start_row + rows > self.rows
            || start_column + columns > self.columns
            || start_depth + depth > self.depth
        {
            return Err(Error::SliceOutOfBounds {
                start_row,
                start_column,
                start_depth,
                window: Dims::new(rows, columns, depth),
                dims: Dims::new(self.rows, self.columns, self.depth),
            });
        }
        self.slice = Some(SliceWindow {
            start_row,
            start_column,
            start_depth,
            rows,
            columns,
            depth,
        });
        Ok(())
    }

    /// Reset the slice window to the full pure extent.
    pub fn unslice(&mut self) {
        self.slice = None;
    }

    /// Flat storage index for logical (row, column, depth).
    ///
    /// This is a pure function of the coordinate, the transpose flag, the
    /// slice origin and the pure dimensions. Depth contributes only when the
    /// pure depth exceeds one and columns only when the pure column count
    /// exceeds one, so vectors and single-plane matrices index compactly.
    pub fn array_index(&self, row: usize, column: usize, depth: usize) -> usize {
        if self.scalar {
            return 0;
        }
        let (row, column) = if self.transposed {
            (column, row)
        } else {
            (row, column)
        };
        let (start_row, start_column, start_depth) = match self.slice {
            Some(window) => (window.start_row, window.start_column, window.start_depth),
            None => (0, 0, 0),
        };
        let mut index = start_row + row;
        if self.columns > 1 {
            index += (start_column + column) * self.rows;
        }
        if self.depth > 1 {
            index += (start_depth + depth) * self.rows * self.columns;
        }
        index
    }
}
