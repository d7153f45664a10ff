use crate::error::{Error, Result};
use crate::matrix::Matrix;

// Convolution and cross-correlation — valid-mode spatial operators
//
// Cross-correlation slides the filter as stored; convolution reads it
// flipped on both spatial axes. Dilation spreads the filter taps over the
// input, stride steps the window origin. No padding: the output extent is
// (input - ((F - 1) * dilation + 1)) / stride + 1 per axis, which is the
// familiar input - F + 1 at the defaults.
//
// Channel mixing follows the filter-position law: the filter plane for
// input depth d_in and output depth d_out sits at depth index
// out_depth * d_in + d_out. The depth-separable form restricts mixing to
// matching depth indices, with one filter plane per channel.

/// Spatial orientation of the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvMode {
    /// Filter read as stored.
    Crosscorrelation,
    /// Filter flipped on both spatial axes.
    Convolution,
}

/// Geometry parameters shared by the forward and gradient algorithms.
#[derive(Debug, Clone, Copy)]
pub struct ConvGeometry {
    pub filter_rows: usize,
    pub filter_columns: usize,
    pub stride: usize,
    pub dilation: usize,
    pub depth_separable: bool,
}

impl ConvGeometry {
    /// Span of the dilated filter over the input, per axis.
    pub fn dilated_rows(&self) -> usize {
        (self.filter_rows - 1) * self.dilation + 1
    }

    pub fn dilated_columns(&self) -> usize {
        (self.filter_columns - 1) * self.dilation + 1
    }

    /// Valid-mode output extent for an input extent, or None when the
    /// filter does not fit.
    pub fn output_extent(&self, input: usize, dilated_filter: usize) -> Option<usize> {
        if input < dilated_filter {
            None
        } else {
            Some((input - dilated_filter) / self.stride + 1)
        }
    }

    fn validate(&self, input: &Matrix, filter: &Matrix, result: &Matrix) -> Result<()> {
        if self.stride == 0 || self.dilation == 0 {
            return Err(Error::Parameter(
                "stride and dilation must be at least 1".into(),
            ));
        }
        let out_rows = self
            .output_extent(input.rows(), self.dilated_rows())
            .ok_or(Error::DimensionMismatch {
                lhs: input.dims(),
                rhs: filter.dims(),
            })?;
        let out_columns = self
            .output_extent(input.columns(), self.dilated_columns())
            .ok_or(Error::DimensionMismatch {
                lhs: input.dims(),
                rhs: filter.dims(),
            })?;
        let out_depth = result.depth();
        if self.depth_separable {
            // One filter plane per channel, channels preserved.
            if filter.depth() != input.depth() || out_depth != input.depth() {
                return Err(Error::DimensionMismatch {
                    lhs: input.dims(),
                    rhs: filter.dims(),
                });
            }
        } else if filter.depth() != input.depth() * out_depth {
            return Err(Error::DimensionMismatch {
                lhs: input.dims(),
                rhs: filter.dims(),
            });
        }
        let expected = crate::Dims::new(out_rows, out_columns, out_depth);
        if result.rows() != out_rows || result.columns() != out_columns {
            return Err(Error::ResultDimensionMismatch {
                expected,
                got: result.dims(),
            });
        }
        Ok(())
    }
}

/// Filter plane index for an (input depth, output depth) pair.
fn filter_plane(geometry: &ConvGeometry, out_depth: usize, d_in: usize, d_out: usize) -> usize {
    if geometry.depth_separable {
        d_in
    } else {
        out_depth * d_in + d_out
    }
}

/// Spatial filter coordinate actually read, honoring the mode's flip.
fn filter_tap(mode: ConvMode, geometry: &ConvGeometry, fr: usize, fc: usize) -> (usize, usize) {
    match mode {
        ConvMode::Crosscorrelation => (fr, fc),
        ConvMode::Convolution => (
            geometry.filter_rows - 1 - fr,
            geometry.filter_columns - 1 - fc,
        ),
    }
}

/// Forward convolution/cross-correlation of `input` with `filter` into
/// `result`.
pub fn apply(
    input: &Matrix,
    filter: &Matrix,
    result: &Matrix,
    mode: ConvMode,
    geometry: ConvGeometry,
) -> Result<()> {
    geometry.validate(input, filter, result)?;
    let masked = input.has_mask() || filter.has_mask();
    let out_depth = result.depth();
    for d_out in 0..out_depth {
        for row in 0..result.rows() {
            for column in 0..result.columns() {
                let mut accumulator = 0.0;
                for d_in in 0..input.depth() {
                    if geometry.depth_separable && d_in != d_out {
                        continue;
                    }
                    let plane = filter_plane(&geometry, out_depth, d_in, d_out);
                    for fr in 0..geometry.filter_rows {
                        for fc in 0..geometry.filter_columns {
                            let input_row = row * geometry.stride + fr * geometry.dilation;
                            let input_column = column * geometry.stride + fc * geometry.dilation;
                            let (tap_row, tap_column) = filter_tap(mode, &geometry, fr, fc);
                            if masked
                                && (input.has_mask_at(input_row, input_column, d_in)
                                    || filter.has_mask_at(tap_row, tap_column, plane))
                            {
                                continue;
                            }
                            accumulator += input.get(input_row, input_column, d_in)
                                * filter.get(tap_row, tap_column, plane);
                        }
                    }
                }
                result.set(row, column, d_out, accumulator);
            }
        }
    }
    Ok(())
}

/// Scatter the output gradient back through the filter into the input
/// gradient. `output_gradient` has the forward result's geometry and
/// `input_gradient` the forward input's.
pub fn apply_input_gradient(
    output_gradient: &Matrix,
    filter: &Matrix,
    input_gradient: &Matrix,
    mode: ConvMode,
    geometry: ConvGeometry,
) -> Result<()> {
    geometry.validate(input_gradient, filter, output_gradient)?;
    let out_depth = output_gradient.depth();
    for d_out in 0..out_depth {
        for row in 0..output_gradient.rows() {
            for column in 0..output_gradient.columns() {
                let gradient = output_gradient.get(row, column, d_out);
                for d_in in 0..input_gradient.depth() {
                    if geometry.depth_separable && d_in != d_out {
                        continue;
                    }
                    let plane = filter_plane(&geometry, out_depth, d_in, d_out);
                    for fr in 0..geometry.filter_rows {
                        for fc in 0..geometry.filter_columns {
                            let input_row = row * geometry.stride + fr * geometry.dilation;
                            let input_column = column * geometry.stride + fc * geometry.dilation;
                            let (tap_row, tap_column) = filter_tap(mode, &geometry, fr, fc);
                            input_gradient.increment(
                                input_row,
                                input_column,
                                d_in,
                                gradient * filter.get(tap_row, tap_column, plane),
                            );
                        }
                    }
                }
            }
        }
    }
    Ok(())
}

/// Accumulate the output gradient against the forward input into the
/// filter gradient.
pub fn apply_filter_gradient(
    output_gradient: &Matrix,
    input: &Matrix,
    filter_gradient: &Matrix,
    mode: ConvMode,
    geometry: ConvGeometry,
) -> Result<()> {
    geometry.validate(input, filter_gradient, output_gradient)?;
    let out_depth = output_gradient.depth();
    for d_out in 0..out_depth {
        for row in 0..output_gradient.rows() {
            for column in 0..output_gradient.columns() {
                let gradient = output_gradient.get(row, column, d_out);
                for d_in in 0..input.depth() {
                    if geometry.depth_separable && d_in != d_out {
                        continue;
                    }
                    let plane = filter_plane(&geometry, out_depth, d_in, d_out);
                    for fr in 0..geometry.filter_rows {
                        for fc in 0..geometry.filter_columns {
                            let input_row = row * geometry.stride + fr * geometry.dilation;
                            let input_column = column * geometry.stride + fc * geometry.dilation;
                            let (tap_row, tap_column) = filter_tap(mode, &geometry, fr, fc);
                            filter_gradient.increment(
                                tap_row,
                                tap_column,
                                plane,
                                gradient * input.get(input_row, input_column, d_in),
                            );
                        }
                    }
                }
            }
        }
    }
    Ok(())
}
