//! Compressed sparse row storage for the user x item interaction matrix.

/// One (row, column) contribution before aggregation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cell {
    pub row: usize,
    pub col: usize,
    /// Decayed weight
    pub weight: f64,
    /// Raw number of interactions behind the weight
    pub count: f64,
}

/// Sparse matrix in CSR layout. Rows are users, columns are items.
///
/// Column indices inside a row are strictly increasing, so every stored cell is a distinct
/// (row, column) pair. The matrix is never mutated once built.
#[derive(Debug, Clone, PartialEq)]
pub struct InteractionMatrix {
    rows: usize,
    cols: usize,
    /// `row_ptr[r]..row_ptr[r + 1]` is the slice of row r in the arrays below
    row_ptr: Vec<usize>,
    col_idx: Vec<usize>,
    values: Vec<f64>,
    counts: Vec<f64>,
}

/// Borrowed view of a single row
#[derive(Debug, Clone, Copy)]
pub struct RowView<'a> {
    pub cols: &'a [usize],
    pub values: &'a [f64],
    pub counts: &'a [f64],
}

impl<'a> RowView<'a> {
    pub fn len(&self) -> usize {
        self.cols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cols.is_empty()
    }

    /// (column, decayed weight) pairs in column order
    pub fn iter(&self) -> impl Iterator<Item = (usize, f64)> + 'a {
        self.cols.iter().copied().zip(self.values.iter().copied())
    }
}

impl InteractionMatrix {
    /// A matrix with no rows and no columns
    pub fn empty() -> InteractionMatrix {
        InteractionMatrix {
            rows: 0,
            cols: 0,
            row_ptr: vec![0],
            col_idx: Vec::new(),
            values: Vec::new(),
            counts: Vec::new(),
        }
    }

    /// Builds a `rows` x `cols` matrix, summing cells that land on the same position.
    ///
    /// Cells outside the shape are ignored.
    pub fn from_cells(rows: usize, cols: usize, mut cells: Vec<Cell>) -> InteractionMatrix {
        cells.retain(|cell| cell.row < rows && cell.col < cols);
        cells.sort_unstable_by_key(|cell| (cell.row, cell.col));

        let mut row_ptr = vec![0; rows + 1];
        let mut col_idx: Vec<usize> = Vec::with_capacity(cells.len());
        let mut values: Vec<f64> = Vec::with_capacity(cells.len());
        let mut counts: Vec<f64> = Vec::with_capacity(cells.len());
        let mut last: Option<(usize, usize)> = None;

        for cell in cells {
            if last == Some((cell.row, cell.col)) {
                // Sorted, so duplicates are always adjacent
                if let (Some(value), Some(count)) = (values.last_mut(), counts.last_mut()) {
                    *value += cell.weight;
                    *count += cell.count;
                }
                continue;
            }

            row_ptr[cell.row + 1] += 1;
            col_idx.push(cell.col);
            values.push(cell.weight);
            counts.push(cell.count);
            last = Some((cell.row, cell.col));
        }

        for r in 0..rows {
            row_ptr[r + 1] += row_ptr[r];
        }

        InteractionMatrix {
            rows,
            cols,
            row_ptr,
            col_idx,
            values,
            counts,
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Number of stored cells
    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    pub fn row(&self, row: usize) -> RowView<'_> {
        let range = self.row_ptr[row]..self.row_ptr[row + 1];
        RowView {
            cols: &self.col_idx[range.clone()],
            values: &self.values[range.clone()],
            counts: &self.counts[range],
        }
    }

    /// Decayed weight at (row, col), zero when nothing is stored there
    pub fn get(&self, row: usize, col: usize) -> f64 {
        if row >= self.rows {
            return 0.0;
        }
        let view = self.row(row);
        match view.cols.binary_search(&col) {
            Ok(position) => view.values[position],
            Err(_) => 0.0,
        }
    }

    /// Marks every column that has a stored cell in `row`
    pub fn row_mask(&self, row: usize) -> Vec<bool> {
        let mut mask = vec![false; self.cols];
        for &col in self.row(row).cols {
            mask[col] = true;
        }
        mask
    }

    /// Sum of each column, using decayed weights or raw counts
    pub fn column_sums(&self, use_counts: bool) -> Vec<f64> {
        let source = if use_counts {
            &self.counts
        } else {
            &self.values
        };
        let mut sums = vec![0.0; self.cols];
        for (&col, &value) in self.col_idx.iter().zip(source.iter()) {
            sums[col] += value;
        }
        sums
    }

    /// The same cells with rows and columns swapped, still in CSR layout
    pub fn transpose(&self) -> InteractionMatrix {
        let mut row_ptr = vec![0; self.cols + 1];
        for &col in &self.col_idx {
            row_ptr[col + 1] += 1;
        }
        for c in 0..self.cols {
            row_ptr[c + 1] += row_ptr[c];
        }

        let mut next = row_ptr.clone();
        let mut col_idx = vec![0; self.nnz()];
        let mut values = vec![0.0; self.nnz()];
        let mut counts = vec![0.0; self.nnz()];

        // Walking rows in order keeps each transposed row sorted
        for row in 0..self.rows {
            for position in self.row_ptr[row]..self.row_ptr[row + 1] {
                let col = self.col_idx[position];
                let target = next[col];
                col_idx[target] = row;
                values[target] = self.values[position];
                counts[target] = self.counts[position];
                next[col] += 1;
            }
        }

        InteractionMatrix {
            rows: self.cols,
            cols: self.rows,
            row_ptr,
            col_idx,
            values,
            counts,
        }
    }
}

impl Default for InteractionMatrix {
    fn default() -> Self {
        Self::empty()
    }
}
