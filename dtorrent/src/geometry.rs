//! Piece/block geometry: pure functions of total size, piece size, and the block cap.
//!
//! Every other module reads these derived fields rather than recomputing them.

pub const MAX_BLOCK_SIZE: u64 = 16 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub total_size: u64,
    pub piece_size: u64,
    pub piece_count: u32,
    pub block_size: u64,
    pub final_piece_size: u64,
    pub whole_piece_block_count: u32,
    pub whole_piece_final_block_size: u64,
    pub final_piece_block_count: u32,
    pub final_piece_final_block_size: u64,
    pub block_count: u64,
}

#[derive(Debug, PartialEq, Eq)]
pub enum GeometryError {
    ZeroPieceSize,
    ZeroTotalSize,
    PieceCountOverflow,
}

impl Geometry {
    pub fn new(total_size: u64, piece_size: u64) -> Result<Self, GeometryError> {
        if piece_size == 0 {
            return Err(GeometryError::ZeroPieceSize);
        }
        if total_size == 0 {
            return Err(GeometryError::ZeroTotalSize);
        }

        let piece_count_u64 = div_ceil(total_size, piece_size);
        let piece_count: u32 = piece_count_u64
            .try_into()
            .map_err(|_| GeometryError::PieceCountOverflow)?;

        let block_size = piece_size.min(MAX_BLOCK_SIZE);
        let final_piece_size = ((total_size - 1) % piece_size) + 1;

        let whole_piece_block_count = div_ceil(piece_size, block_size) as u32;
        let whole_piece_final_block_size = ((piece_size - 1) % block_size) + 1;

        let final_piece_block_count = div_ceil(final_piece_size, block_size) as u32;
        let final_piece_final_block_size = ((final_piece_size - 1) % block_size) + 1;

        let block_count = (piece_count as u64 - 1) * whole_piece_block_count as u64
            + final_piece_block_count as u64;

        let geometry = Self {
            total_size,
            piece_size,
            piece_count,
            block_size,
            final_piece_size,
            whole_piece_block_count,
            whole_piece_final_block_size,
            final_piece_block_count,
            final_piece_final_block_size,
            block_count,
        };

        debug_assert_eq!(
            (geometry.piece_count as u64 - 1) * geometry.piece_size + geometry.final_piece_size,
            geometry.total_size
        );
        debug_assert_eq!(
            (geometry.whole_piece_block_count as u64 - 1) * geometry.block_size
                + geometry.whole_piece_final_block_size,
            geometry.piece_size
        );

        Ok(geometry)
    }

    /// Byte size of piece `p` (0-indexed).
    pub fn piece_size(&self, p: u32) -> u64 {
        if p as u64 == self.piece_count as u64 - 1 {
            self.final_piece_size
        } else {
            self.piece_size
        }
    }

    /// Number of blocks in piece `p`.
    pub fn block_count_in_piece(&self, p: u32) -> u32 {
        if p as u64 == self.piece_count as u64 - 1 {
            self.final_piece_block_count
        } else {
            self.whole_piece_block_count
        }
    }

    /// Byte size of the final block of piece `p`.
    pub fn final_block_size_in_piece(&self, p: u32) -> u64 {
        if p as u64 == self.piece_count as u64 - 1 {
            self.final_piece_final_block_size
        } else {
            self.whole_piece_final_block_size
        }
    }

    /// Offset in the overall byte stream of the first byte of piece `p`.
    pub fn piece_start(&self, p: u32) -> u64 {
        p as u64 * self.piece_size
    }

    /// Index of the piece containing byte offset `offset`.
    pub fn byte_to_piece(&self, offset: u64) -> u32 {
        (offset / self.piece_size) as u32
    }
}

fn div_ceil(a: u64, b: u64) -> u64 {
    (a + b - 1) / b
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geometry_scenario() {
        // total_size=1,048,577, piece_size=524,288 -> piece_count=3, final_piece_size=1,
        // whole_piece_block_count=32, final_piece_block_count=1, block_count=65.
        let g = Geometry::new(1_048_577, 524_288).unwrap();
        assert_eq!(g.piece_count, 3);
        assert_eq!(g.final_piece_size, 1);
        assert_eq!(g.whole_piece_block_count, 32);
        assert_eq!(g.final_piece_block_count, 1);
        assert_eq!(g.block_count, 65);
        assert_eq!(g.block_size, 16384);
    }

    #[test]
    fn test_geometry_single_piece_exact() {
        let g = Geometry::new(16384, 16384).unwrap();
        assert_eq!(g.piece_count, 1);
        assert_eq!(g.final_piece_size, 16384);
        assert_eq!(g.whole_piece_block_count, 1);
        assert_eq!(g.block_count, 1);
    }

    #[test]
    fn test_geometry_piece_bigger_than_block_cap() {
        let g = Geometry::new(32768, 32768).unwrap();
        assert_eq!(g.block_size, 16384);
        assert_eq!(g.whole_piece_block_count, 2);
        assert_eq!(g.whole_piece_final_block_size, 16384);
    }

    #[test]
    fn test_geometry_zero_piece_size_rejected() {
        assert_eq!(Geometry::new(10, 0), Err(GeometryError::ZeroPieceSize));
    }

    #[test]
    fn test_geometry_zero_total_size_rejected() {
        assert_eq!(Geometry::new(0, 10), Err(GeometryError::ZeroTotalSize));
    }

    #[test]
    fn test_byte_to_piece() {
        let g = Geometry::new(1_048_577, 524_288).unwrap();
        assert_eq!(g.byte_to_piece(0), 0);
        assert_eq!(g.byte_to_piece(524_288), 1);
        assert_eq!(g.byte_to_piece(1_048_576), 2);
    }

    #[test]
    fn test_final_block_size_of_final_piece_is_not_block_size() {
        // final block of final piece uses final_piece_final_block_size, not block_size.
        let g = Geometry::new(1_048_577, 524_288).unwrap();
        assert_eq!(g.final_block_size_in_piece(g.piece_count - 1), 1);
        assert_ne!(
            g.final_block_size_in_piece(g.piece_count - 1),
            g.block_size
        );
    }
}
