use crate::error::{Error, Result};
use crate::matrix::Matrix;

// Winograd convolution — F(2x2, 3x3)
//
// An algebraic reformulation of 3x3 valid-mode convolution: the input is
// read in 4x4 tiles, both tile and filter are moved into the transform
// domain, combined with an element-wise product, and transformed back into
// a 2x2 output tile:
//
//   Y = AT . ((G g GT) (.) (CT d C)) . A
//
// with (.) the Hadamard product and g the filter flipped on both axes so
// the operator agrees with direct convolution. Output extents the tiling
// cannot cover (odd sizes) are computed by the direct algorithm, keeping
// the whole operator numerically equivalent to `convolve`.
//
// Reference: Lavin & Gray, "Fast Algorithms for Convolutional Neural
// Networks" (the F(2x2, 3x3) instance).

const AT: [[f64; 4]; 2] = [[1.0, 1.0, 1.0, 0.0], [0.0, 1.0, -1.0, -1.0]];

const CT: [[f64; 4]; 4] = [
    [1.0, 0.0, -1.0, 0.0],
    [0.0, 1.0, 1.0, 0.0],
    [0.0, -1.0, 1.0, 0.0],
    [0.0, 1.0, 0.0, -1.0],
];

const G: [[f64; 3]; 4] = [
    [1.0, 0.0, 0.0],
    [0.5, 0.5, 0.5],
    [0.5, -0.5, 0.5],
    [0.0, 0.0, 1.0],
];

/// The six transform matrices. Callers may supply their own (e.g. scaled
/// variants with better numerical range) or rely on the standard constants;
/// the filter transform pair is absent when the caller pre-transforms the
/// filter itself.
#[derive(Debug, Clone)]
pub struct WinogradTransforms {
    a: [[f64; 2]; 4],
    at: [[f64; 4]; 2],
    c: [[f64; 4]; 4],
    ct: [[f64; 4]; 4],
    g: Option<[[f64; 3]; 4]>,
    gt: Option<[[f64; 4]; 3]>,
}

fn transpose<const R: usize, const C: usize>(m: &[[f64; C]; R]) -> [[f64; R]; C] {
    let mut out = [[0.0; R]; C];
    for (r, row) in m.iter().enumerate() {
        for (c, value) in row.iter().enumerate() {
            out[c][r] = *value;
        }
    }
    out
}

fn matmul<const M: usize, const K: usize, const N: usize>(
    a: &[[f64; K]; M],
    b: &[[f64; N]; K],
) -> [[f64; N]; M] {
    let mut out = [[0.0; N]; M];
    for m in 0..M {
        for n in 0..N {
            let mut acc = 0.0;
            for (k, b_row) in b.iter().enumerate() {
                acc += a[m][k] * b_row[n];
            }
            out[m][n] = acc;
        }
    }
    out
}

/// Read a fixed-size block out of a matrix, validating its geometry.
fn read_block<const R: usize, const C: usize>(matrix: &Matrix) -> Result<[[f64; C]; R]> {
    if matrix.rows() != R || matrix.columns() != C || matrix.depth() != 1 {
        return Err(Error::ResultDimensionMismatch {
            expected: crate::Dims::new(R, C, 1),
            got: matrix.dims(),
        });
    }
    let mut out = [[0.0; C]; R];
    for (r, row) in out.iter_mut().enumerate() {
        for (c, value) in row.iter_mut().enumerate() {
            *value = matrix.get(r, c, 0);
        }
    }
    Ok(out)
}

impl WinogradTransforms {
    /// The standard F(2x2, 3x3) transform set.
    pub fn standard() -> Self {
        WinogradTransforms {
            a: transpose(&AT),
            at: AT,
            c: transpose(&CT),
            ct: CT,
            g: Some(G),
            gt: Some(transpose(&G)),
        }
    }

    /// Caller-supplied transform set, filter transforms included.
    pub fn from_matrices(
        a: &Matrix,
        at: &Matrix,
        c: &Matrix,
        ct: &Matrix,
        g: &Matrix,
        gt: &Matrix,
    ) -> Result<Self> {
        Ok(WinogradTransforms {
            a: read_block::<4, 2>(a)?,
            at: read_block::<2, 4>(at)?,
            c: read_block::<4, 4>(c)?,
            ct: read_block::<4, 4>(ct)?,
            g: Some(read_block::<4, 3>(g)?),
            gt: Some(read_block::<3, 4>(gt)?),
        })
    }

    /// Caller-supplied data transforms only, for use with a filter that is
    /// already in the transform domain.
    pub fn data_only(a: &Matrix, at: &Matrix, c: &Matrix, ct: &Matrix) -> Result<Self> {
        Ok(WinogradTransforms {
            a: read_block::<4, 2>(a)?,
            at: read_block::<2, 4>(at)?,
            c: read_block::<4, 4>(c)?,
            ct: read_block::<4, 4>(ct)?,
            g: None,
            gt: None,
        })
    }
}

/// Winograd convolution of `input` with `filter` into `result`, one depth
/// plane at a time. With `preprocessed` the filter is expected in the
/// 4x4 transform domain; otherwise it must be 3x3 and is transformed here.
pub fn apply(
    input: &Matrix,
    filter: &Matrix,
    result: &Matrix,
    transforms: &WinogradTransforms,
    preprocessed: bool,
) -> Result<()> {
    let (filter_rows, filter_columns) = if preprocessed { (4, 4) } else { (3, 3) };
    if filter.rows() != filter_rows || filter.columns() != filter_columns {
        return Err(Error::Parameter(format!(
            "winograd convolution requires a {}x{} filter, got {}",
            filter_rows,
            filter_columns,
            filter.dims()
        )));
    }
    if !preprocessed && transforms.g.is_none() {
        return Err(Error::Parameter(
            "winograd transform set lacks the filter transform pair".into(),
        ));
    }
    if filter.depth() != input.depth() || result.depth() != input.depth() {
        return Err(Error::DimensionMismatch {
            lhs: input.dims(),
            rhs: filter.dims(),
        });
    }
    if input.rows() < 3 || input.columns() < 3 {
        return Err(Error::DimensionMismatch {
            lhs: input.dims(),
            rhs: filter.dims(),
        });
    }
    let out_rows = input.rows() - 2;
    let out_columns = input.columns() - 2;
    let expected = crate::Dims::new(out_rows, out_columns, input.depth());
    if result.dims() != expected {
        return Err(Error::ResultDimensionMismatch {
            expected,
            got: result.dims(),
        });
    }

    // Tiles cover an even prefix of each output axis; the remainder falls
    // back to the direct algorithm below. With a pre-transformed filter the
    // spatial taps are gone, so there is nothing to fall back to.
    let covered_rows = out_rows & !1;
    let covered_columns = out_columns & !1;
    if preprocessed && (covered_rows != out_rows || covered_columns != out_columns) {
        return Err(Error::Parameter(
            "preprocessed winograd filters require even output extents".into(),
        ));
    }

    for depth in 0..input.depth() {
        // Filter into the transform domain: U = G g_flipped GT.
        let u: [[f64; 4]; 4] = if preprocessed {
            let mut u = [[0.0; 4]; 4];
            for (r, row) in u.iter_mut().enumerate() {
                for (c, value) in row.iter_mut().enumerate() {
                    *value = filter.get(r, c, depth);
                }
            }
            u
        } else {
            let mut flipped = [[0.0; 3]; 3];
            for (r, row) in flipped.iter_mut().enumerate() {
                for (c, value) in row.iter_mut().enumerate() {
                    *value = filter.get(2 - r, 2 - c, depth);
                }
            }
            let g = transforms.g.as_ref().expect("checked above");
            let gt = transforms.gt.as_ref().expect("checked above");
            matmul(&matmul(g, &flipped), gt)
        };

        for tile_row in (0..covered_rows).step_by(2) {
            for tile_column in (0..covered_columns).step_by(2) {
                // Data tile into the transform domain: V = CT d C.
                let mut d = [[0.0; 4]; 4];
                for (r, row) in d.iter_mut().enumerate() {
                    for (c, value) in row.iter_mut().enumerate() {
                        *value = input.get(tile_row + r, tile_column + c, depth);
                    }
                }
                let v = matmul(&matmul(&transforms.ct, &d), &transforms.c);

                // Hadamard product and the inverse transform.
                let mut m = [[0.0; 4]; 4];
                for r in 0..4 {
                    for c in 0..4 {
                        m[r][c] = u[r][c] * v[r][c];
                    }
                }
                let y = matmul(&matmul(&transforms.at, &m), &transforms.a);
                for (r, row) in y.iter().enumerate() {
                    for (c, value) in row.iter().enumerate() {
                        result.set(tile_row + r, tile_column + c, depth, *value);
                    }
                }
            }
        }

        // Ragged edges: direct convolution for the uncovered cells.
        if !preprocessed {
            for row in 0..out_rows {
                for column in 0..out_columns {
                    if row < covered_rows && column < covered_columns {
                        continue;
                    }
                    let mut accumulator = 0.0;
                    for fr in 0..3 {
                        for fc in 0..3 {
                            accumulator += input.get(row + fr, column + fc, depth)
                                * filter.get(2 - fr, 2 - fc, depth);
                        }
                    }
                    result.set(row, column, depth, accumulator);
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::Matrix;
    use crate::ops::conv::{self, ConvGeometry, ConvMode};

    fn direct_convolve(input: &Matrix, filter: &Matrix) -> Matrix {
        let result = Matrix::dense(input.rows() - 2, input.columns() - 2, 1);
        conv::apply(
            input,
            filter,
            &result,
            ConvMode::Convolution,
            ConvGeometry {
                filter_rows: 3,
                filter_columns: 3,
                stride: 1,
                dilation: 1,
                depth_separable: false,
            },
        )
        .unwrap();
        result
    }

    #[test]
    fn test_matches_direct_convolution_on_even_output() {
        let values: Vec<f64> = (0..36).map(|i| (i as f64 * 0.37).sin()).collect();
        let input = Matrix::from_values(6, 6, 1, &values).unwrap();
        let filter =
            Matrix::from_values(3, 3, 1, &[0.5, -1.0, 0.25, 2.0, 0.0, -0.5, 1.5, 1.0, -2.0])
                .unwrap();
        let result = Matrix::dense(4, 4, 1);
        apply(&input, &filter, &result, &WinogradTransforms::standard(), false).unwrap();
        let direct = direct_convolve(&input, &filter);
        for r in 0..4 {
            for c in 0..4 {
                assert!((result.get(r, c, 0) - direct.get(r, c, 0)).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn test_matches_direct_convolution_on_odd_output() {
        // 5x5 input -> 3x3 output: one ragged row and column.
        let values: Vec<f64> = (0..25).map(|i| (i as f64) * 0.5 - 3.0).collect();
        let input = Matrix::from_values(5, 5, 1, &values).unwrap();
        let filter =
            Matrix::from_values(3, 3, 1, &[1.0, 2.0, 3.0, -1.0, 0.5, 0.0, 2.0, -2.0, 1.0])
                .unwrap();
        let result = Matrix::dense(3, 3, 1);
        apply(&input, &filter, &result, &WinogradTransforms::standard(), false).unwrap();
        let direct = direct_convolve(&input, &filter);
        for r in 0..3 {
            for c in 0..3 {
                assert!((result.get(r, c, 0) - direct.get(r, c, 0)).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn test_filter_size_enforced() {
        let input = Matrix::dense(6, 6, 1);
        let filter = Matrix::dense(2, 2, 1);
        let result = Matrix::dense(4, 4, 1);
        let err = apply(&input, &filter, &result, &WinogradTransforms::standard(), false)
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Parameter);
    }
}
