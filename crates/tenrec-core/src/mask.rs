use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

use rand::Rng;

use crate::error::{Error, Result};
use crate::shape::Dims;
use crate::storage::StorageKind;

// Mask — boolean/probabilistic exclusion co-indexed with a matrix
//
// A mask has three independent layers: per-element, per-row and per-column
// bits. A cell counts as masked when any layer covers it; every element-wise
// and reduction algorithm consults that predicate before including a value.
//
// Each layer is independently stackable: push the current state (optionally
// starting fresh), mutate, pop to restore. Nested operation scopes — dropout
// inside a convolution, the zero-skip masks of the Winograd transforms —
// rely on this discipline.
//
// The mask variant (dense bit vector vs sparse index set) must match the
// owning matrix's storage variant.

/// Bit container shared by the three mask layers.
#[derive(Debug, Clone)]
enum BitStore {
    Dense(Vec<bool>),
    Sparse(HashSet<usize>),
}

impl BitStore {
    fn new(kind: StorageKind, size: usize) -> Self {
        match kind {
            StorageKind::Dense => BitStore::Dense(vec![false; size]),
            StorageKind::Sparse => BitStore::Sparse(HashSet::new()),
        }
    }

    fn get(&self, index: usize) -> bool {
        match self {
            BitStore::Dense(bits) => bits[index],
            BitStore::Sparse(bits) => bits.contains(&index),
        }
    }

    fn set(&mut self, index: usize, value: bool) {
        match self {
            BitStore::Dense(bits) => bits[index] = value,
            BitStore::Sparse(bits) => {
                if value {
                    bits.insert(index);
                } else {
                    bits.remove(&index);
                }
            }
        }
    }

    fn clear(&mut self) {
        match self {
            BitStore::Dense(bits) => bits.iter_mut().for_each(|bit| *bit = false),
            BitStore::Sparse(bits) => bits.clear(),
        }
    }
}

/// Shared interior of a mask: the three layers, their stacks, and the
/// Bernoulli masking probability.
#[derive(Debug, Clone)]
struct MaskData {
    kind: StorageKind,
    rows: usize,
    columns: usize,
    depth: usize,
    probability: f64,
    element: BitStore,
    row: BitStore,
    column: BitStore,
    element_stack: Vec<BitStore>,
    row_stack: Vec<BitStore>,
    column_stack: Vec<BitStore>,
}

impl MaskData {
    fn element_index(&self, row: usize, column: usize, depth: usize) -> usize {
        row + column * self.rows + depth * self.rows * self.columns
    }
}

/// Exclusion mask for one matrix. Cloning via [`Mask::reference`] aliases
/// the underlying layers (both views observe the same mutations);
/// [`Mask::copy`] duplicates them. [`Mask::transpose`] is a view that swaps
/// the row/column interpretation without touching the shared state.
#[derive(Debug, Clone)]
pub struct Mask {
    data: Rc<RefCell<MaskData>>,
    transposed: bool,
}

impl Mask {
    /// New unset mask of the given variant and geometry.
    pub fn new(kind: StorageKind, rows: usize, columns: usize, depth: usize) -> Self {
        Mask {
            data: Rc::new(RefCell::new(MaskData {
                kind,
                rows,
                columns,
                depth,
                probability: 0.0,
                element: BitStore::new(kind, rows * columns * depth),
                row: BitStore::new(kind, rows),
                column: BitStore::new(kind, columns),
                element_stack: Vec::new(),
                row_stack: Vec::new(),
                column_stack: Vec::new(),
            })),
            transposed: false,
        }
    }

    pub fn kind(&self) -> StorageKind {
        self.data.borrow().kind
    }

    /// Effective row count (swapped under transpose).
    pub fn rows(&self) -> usize {
        let data = self.data.borrow();
        if self.transposed {
            data.columns
        } else {
            data.rows
        }
    }

    /// Effective column count (swapped under transpose).
    pub fn columns(&self) -> usize {
        let data = self.data.borrow();
        if self.transposed {
            data.rows
        } else {
            data.columns
        }
    }

    pub fn depth(&self) -> usize {
        self.data.borrow().depth
    }

    pub fn dims(&self) -> Dims {
        Dims::new(self.rows(), self.columns(), self.depth())
    }

    pub fn size(&self) -> usize {
        self.dims().size()
    }

    /// Shallow alias: both handles observe the same layer mutations.
    pub fn reference(&self) -> Mask {
        self.clone()
    }

    /// Independent deep duplicate, stacks included.
    pub fn copy(&self) -> Mask {
        Mask {
            data: Rc::new(RefCell::new(self.data.borrow().clone())),
            transposed: self.transposed,
        }
    }

    /// Transposed view over the same shared layers.
    pub fn transpose(&self) -> Mask {
        Mask {
            data: Rc::clone(&self.data),
            transposed: !self.transposed,
        }
    }

    /// Whether two handles alias the same underlying layers.
    pub fn shares_data_with(&self, other: &Mask) -> bool {
        Rc::ptr_eq(&self.data, &other.data)
    }

    // Probability configuration

    /// Set the Bernoulli masking probability. Values outside [0, 1] are
    /// rejected with a parameter error.
    pub fn set_probability(&self, probability: f64) -> Result<()> {
        if !(0.0..=1.0).contains(&probability) {
            return Err(Error::Parameter(format!(
                "masking probability must be within [0, 1], got {probability}"
            )));
        }
        self.data.borrow_mut().probability = probability;
        Ok(())
    }

    pub fn probability(&self) -> f64 {
        self.data.borrow().probability
    }

    // Element layer

    /// Map externally supplied (row, column) to the underlying layer's
    /// orientation, swapping the pair when this handle is a transposed view.
    fn oriented(&self, row: usize, column: usize) -> (usize, usize) {
        if self.transposed {
            (column, row)
        } else {
            (row, column)
        }
    }

    pub fn set_mask(&self, row: usize, column: usize, depth: usize, value: bool) {
        let (row, column) = self.oriented(row, column);
        let mut data = self.data.borrow_mut();
        let index = data.element_index(row, column, depth);
        data.element.set(index, value);
    }

    pub fn get_mask(&self, row: usize, column: usize, depth: usize) -> bool {
        let (row, column) = self.oriented(row, column);
        let data = self.data.borrow();
        data.element.get(data.element_index(row, column, depth))
    }

    // Row and column layers — a transposed view reads row state from the
    // shared column layer and vice versa, so aliases stay consistent.

    pub fn set_row_mask(&self, row: usize, value: bool) {
        let mut data = self.data.borrow_mut();
        if self.transposed {
            data.column.set(row, value);
        } else {
            data.row.set(row, value);
        }
    }

    pub fn get_row_mask(&self, row: usize) -> bool {
        let data = self.data.borrow();
        if self.transposed {
            data.column.get(row)
        } else {
            data.row.get(row)
        }
    }

    pub fn set_column_mask(&self, column: usize, value: bool) {
        let mut data = self.data.borrow_mut();
        if self.transposed {
            data.row.set(column, value);
        } else {
            data.column.set(column, value);
        }
    }

    pub fn get_column_mask(&self, column: usize) -> bool {
        let data = self.data.borrow();
        if self.transposed {
            data.row.get(column)
        } else {
            data.column.get(column)
        }
    }

    /// Whether (row, column, depth) is excluded: the OR of the row layer,
    /// the column layer and the element layer.
    pub fn is_masked(&self, row: usize, column: usize, depth: usize) -> bool {
        self.get_row_mask(row) || self.get_column_mask(column) || self.get_mask(row, column, depth)
    }

    // Probabilistic materialization. A draw above the configured keep
    // probability masks the cell/row/column.

    pub fn mask_by_probability(&self, rng: &mut impl Rng) {
        let (rows, columns, depth) = (self.rows(), self.columns(), self.depth());
        let probability = self.probability();
        for d in 0..depth {
            for column in 0..columns {
                for row in 0..rows {
                    self.set_mask(row, column, d, rng.gen::<f64>() > probability);
                }
            }
        }
    }

    pub fn mask_row_by_probability(&self, rng: &mut impl Rng) {
        let probability = self.probability();
        for row in 0..self.rows() {
            self.set_row_mask(row, rng.gen::<f64>() > probability);
        }
    }

    pub fn mask_column_by_probability(&self, rng: &mut impl Rng) {
        let probability = self.probability();
        for column in 0..self.columns() {
            self.set_column_mask(column, rng.gen::<f64>() > probability);
        }
    }

    // Stacking — one stack per layer, independently pushable.

    /// Push the current element layer; with `reset` the live layer starts
    /// unset for the nested scope.
    pub fn stack_mask(&self, reset: bool) {
        let mut data = self.data.borrow_mut();
        let saved = data.element.clone();
        data.element_stack.push(saved);
        if reset {
            data.element.clear();
        }
    }

    /// Pop the element layer, restoring the previous state bit for bit.
    pub fn unstack_mask(&self) -> Result<()> {
        let mut data = self.data.borrow_mut();
        match data.element_stack.pop() {
            Some(saved) => {
                data.element = saved;
                Ok(())
            }
            None => Err(Error::EmptyMaskStack { layer: "element" }),
        }
    }

    pub fn stack_row_mask(&self, reset: bool) {
        let mut data = self.data.borrow_mut();
        let saved = data.row.clone();
        data.row_stack.push(saved);
        if reset {
            data.row.clear();
        }
    }

    pub fn unstack_row_mask(&self) -> Result<()> {
        let mut data = self.data.borrow_mut();
        match data.row_stack.pop() {
            Some(saved) => {
                data.row = saved;
                Ok(())
            }
            None => Err(Error::EmptyMaskStack { layer: "row" }),
        }
    }

    pub fn stack_column_mask(&self, reset: bool) {
        let mut data = self.data.borrow_mut();
        let saved = data.column.clone();
        data.column_stack.push(saved);
        if reset {
            data.column.clear();
        }
    }

    pub fn unstack_column_mask(&self) -> Result<()> {
        let mut data = self.data.borrow_mut();
        match data.column_stack.pop() {
            Some(saved) => {
                data.column = saved;
                Ok(())
            }
            None => Err(Error::EmptyMaskStack { layer: "column" }),
        }
    }

    /// Unset every layer (stacks are left alone).
    pub fn clear(&self) {
        let mut data = self.data.borrow_mut();
        data.element.clear();
        data.row.clear();
        data.column.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_layer_or_predicate() {
        let mask = Mask::new(StorageKind::Dense, 3, 3, 1);
        mask.set_row_mask(0, true);
        mask.set_column_mask(2, true);
        mask.set_mask(1, 1, 0, true);

        assert!(mask.is_masked(0, 1, 0)); // row layer
        assert!(mask.is_masked(1, 2, 0)); // column layer
        assert!(mask.is_masked(1, 1, 0)); // element layer
        assert!(!mask.is_masked(2, 0, 0));
    }

    #[test]
    fn test_stack_restores_exact_state() {
        let mask = Mask::new(StorageKind::Dense, 4, 4, 1);
        mask.set_mask(1, 2, 0, true);
        mask.set_mask(3, 3, 0, true);

        mask.stack_mask(true);
        assert!(!mask.get_mask(1, 2, 0)); // fresh nested scope
        mask.set_mask(0, 0, 0, true);

        mask.unstack_mask().unwrap();
        assert!(mask.get_mask(1, 2, 0));
        assert!(mask.get_mask(3, 3, 0));
        assert!(!mask.get_mask(0, 0, 0));
    }

    #[test]
    fn test_unstack_empty_is_state_error() {
        let mask = Mask::new(StorageKind::Sparse, 2, 2, 1);
        let err = mask.unstack_row_mask().unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::State);
    }

    #[test]
    fn test_probability_validation() {
        let mask = Mask::new(StorageKind::Dense, 2, 2, 1);
        assert!(mask.set_probability(1.5).is_err());
        assert!(mask.set_probability(0.5).is_ok());
    }

    #[test]
    fn test_probability_one_keeps_everything() {
        let mask = Mask::new(StorageKind::Dense, 4, 4, 1);
        mask.set_probability(1.0).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        mask.mask_by_probability(&mut rng);
        for row in 0..4 {
            for column in 0..4 {
                assert!(!mask.is_masked(row, column, 0));
            }
        }
    }

    #[test]
    fn test_transposed_view_shares_state() {
        let mask = Mask::new(StorageKind::Dense, 2, 3, 1);
        let transposed = mask.transpose();
        assert_eq!(transposed.rows(), 3);
        assert_eq!(transposed.columns(), 2);

        mask.set_mask(0, 2, 0, true);
        assert!(transposed.get_mask(2, 0, 0));

        // A row of the transposed view is a column of the original.
        transposed.set_row_mask(1, true);
        assert!(mask.get_column_mask(1));
    }

    #[test]
    fn test_reference_aliases_and_copy_detaches() {
        let mask = Mask::new(StorageKind::Sparse, 3, 3, 1);
        let alias = mask.reference();
        let copy = mask.copy();

        mask.set_mask(1, 1, 0, true);
        assert!(alias.get_mask(1, 1, 0));
        assert!(!copy.get_mask(1, 1, 0));
    }
}
