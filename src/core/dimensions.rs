//! Mapping of tensor shapes onto vector-addressed memory.
//!
//! Every memory of the accelerator is addressed in vectors of `array_size`
//! scalars. A tensor's innermost dimension is split into `tiles` of one
//! vector each; all outer dimensions collapse into `rows`. Vectors are laid
//! out tile-major, so the `rows` vectors of one tile are contiguous and
//! consecutive tiles are `stride` vectors apart. This is the layout the
//! systolic array consumes: one `MatMul` streams one input tile.
//!
//! Layouts whose vector count does not fit in `usize` cannot be built.

/// Layout of one tensor in local, accumulator or DRAM memory.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemoryDimensions {
    shape: Vec<usize>,
    vector_size: usize,
    rows: usize,
    tiles: usize,
    alignment: usize,
}

impl MemoryDimensions {
    /// Layout for activations: no padding of the outer dimensions.
    pub fn vars(shape: &[usize], vector_size: usize) -> Option<Self> {
        let (rows, inner) = split_shape(shape)?;
        let dims = Self {
            shape: shape.to_vec(),
            vector_size,
            rows,
            tiles: inner.div_ceil(vector_size),
            alignment: 1,
        };
        dims.checked_depth()?;
        Some(dims)
    }

    /// Layout for constants.
    ///
    /// Two dimensional constants are weight matrices: their rows are padded
    /// to a multiple of the vector size so that every `vector_size` x
    /// `vector_size` weight tile is a contiguous run of vectors, and their
    /// base is aligned to a tile boundary.
    pub fn consts(shape: &[usize], vector_size: usize) -> Option<Self> {
        let mut dims = Self::vars(shape, vector_size)?;
        if shape.len() >= 2 {
            dims.rows = dims.rows.div_ceil(vector_size).checked_mul(vector_size)?;
            dims.alignment = vector_size;
            dims.checked_depth()?;
        }
        Some(dims)
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn vector_size(&self) -> usize {
        self.vector_size
    }

    /// Vectors per tile.
    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn tiles(&self) -> usize {
        self.tiles
    }

    /// Distance in vectors between the starts of consecutive tiles.
    pub fn stride(&self) -> usize {
        self.rows
    }

    /// Total number of vectors.
    pub fn depth(&self) -> usize {
        self.rows * self.tiles
    }

    fn checked_depth(&self) -> Option<usize> {
        self.rows.checked_mul(self.tiles)
    }

    /// Required alignment of the base address, in vectors.
    pub fn alignment(&self) -> usize {
        self.alignment
    }
}

/// Split a shape into (product of outer dimensions, innermost dimension).
fn split_shape(shape: &[usize]) -> Option<(usize, usize)> {
    match shape.split_last() {
        Some((&inner, outer)) => {
            let rows = outer.iter().try_fold(1usize, |rows, &dim| rows.checked_mul(dim))?;
            Some((rows, inner))
        }
        None => Some((1, 1)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vars_layout() {
        let dims = MemoryDimensions::vars(&[4, 20], 8).unwrap();
        assert_eq!(dims.rows(), 4);
        assert_eq!(dims.tiles(), 3);
        assert_eq!(dims.stride(), 4);
        assert_eq!(dims.depth(), 12);
        assert_eq!(dims.alignment(), 1);
    }

    #[test]
    fn test_one_dimensional_shape() {
        let dims = MemoryDimensions::vars(&[10], 8).unwrap();
        assert_eq!(dims.rows(), 1);
        assert_eq!(dims.tiles(), 2);
        assert_eq!(dims.depth(), 2);

        let bias = MemoryDimensions::consts(&[10], 8).unwrap();
        assert_eq!(bias, dims);
    }

    #[test]
    fn test_consts_pad_rows_and_align() {
        let dims = MemoryDimensions::consts(&[12, 8], 8).unwrap();
        assert_eq!(dims.rows(), 16);
        assert_eq!(dims.tiles(), 1);
        assert_eq!(dims.depth(), 16);
        assert_eq!(dims.alignment(), 8);
        assert_eq!(dims.shape(), &[12, 8]);
    }

    #[test]
    fn test_higher_rank_collapses_outer_dims() {
        let dims = MemoryDimensions::vars(&[2, 3, 8], 8).unwrap();
        assert_eq!(dims.rows(), 6);
        assert_eq!(dims.tiles(), 1);
    }

    #[test]
    fn test_overflowing_shapes_have_no_layout() {
        assert_eq!(MemoryDimensions::vars(&[usize::MAX / 2, 4, 8], 8), None);
        assert_eq!(MemoryDimensions::vars(&[usize::MAX, 16], 8), None);
        assert_eq!(MemoryDimensions::consts(&[usize::MAX, 8], 8), None);
        assert!(MemoryDimensions::vars(&[usize::MAX, 8], 8).is_some());
    }
}
