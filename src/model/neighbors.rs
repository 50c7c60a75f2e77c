//! Spatial neighbour queries over the scan8 grid
//!
//! The model predicts a sub-block's nonzero count from its left and
//! above neighbours. Within a macroblock those are adjacent cells of the
//! scan8 grid; across macroblock edges the query wraps to the opposite
//! side of the neighbouring macroblock. DC blocks live outside the grid
//! proper and navigate their own small coefficient matrix instead.

use super::tables::{
    INVALID_SCAN8, REVERSE_SCAN_8, SCAN_8, SCAN8_DC_BASE, UNZIGZAG_16, UNZIGZAG_64, ZIGZAG_16,
    ZIGZAG_64,
};

/// A coefficient position: macroblock, sub-block, and scan index.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CoefficientCoord {
    pub mb_x: u32,
    pub mb_y: u32,
    pub scan8_index: u8,
    pub zigzag_index: u8,
}

/// Dimensions of a DC coefficient matrix for the given sub-block size.
fn dc_dims(sub_mb_size: u8) -> (u8, u8) {
    match sub_mb_size {
        16 => (4, 4),
        8 => (2, 4),
        _ => (2, 2),
    }
}

/// Raster position of a DC coefficient. The luma 4x4 DC matrix is
/// zigzag ordered; the chroma DC matrices are raster ordered.
fn dc_raster(sub_mb_size: u8, zigzag_index: u8) -> u8 {
    if sub_mb_size == 16 {
        ZIGZAG_16[zigzag_index as usize]
    } else {
        zigzag_index
    }
}

fn dc_unraster(sub_mb_size: u8, raster: u8) -> u8 {
    if sub_mb_size == 16 {
        UNZIGZAG_16[raster as usize]
    } else {
        raster
    }
}

/// Top and bottom grid rows of the plane containing `row`.
fn plane_rows(row: usize) -> Option<(usize, usize)> {
    match row {
        1..=4 => Some((1, 4)),
        6..=9 => Some((6, 9)),
        11..=14 => Some((11, 14)),
        _ => None,
    }
}

fn dc_neighbor(above: bool, sub_mb_size: u8, input: &CoefficientCoord) -> Option<CoefficientCoord> {
    let (width, height) = dc_dims(sub_mb_size);
    let raster = dc_raster(sub_mb_size, input.zigzag_index);
    let (mut x, mut y) = (raster % width, raster / width);
    let (mut mb_x, mut mb_y) = (input.mb_x, input.mb_y);
    if above {
        if y == 0 {
            if mb_y == 0 {
                return None;
            }
            mb_y -= 1;
            y = height - 1;
        } else {
            y -= 1;
        }
    } else if x == 0 {
        if mb_x == 0 {
            return None;
        }
        mb_x -= 1;
        x = width - 1;
    } else {
        x -= 1;
    }
    Some(CoefficientCoord {
        mb_x,
        mb_y,
        scan8_index: input.scan8_index,
        zigzag_index: dc_unraster(sub_mb_size, x + y * width),
    })
}

/// Position of the sub-block above (or left of) the given coefficient's
/// sub-block. Returns `None` when the neighbour falls outside the frame.
pub fn get_neighbor(
    above: bool,
    sub_mb_size: u8,
    input: &CoefficientCoord,
) -> Option<CoefficientCoord> {
    if input.scan8_index >= SCAN8_DC_BASE {
        return dc_neighbor(above, sub_mb_size, input);
    }

    let pos = SCAN_8[input.scan8_index as usize] as usize;
    let (mut row, mut col) = (pos / 8, pos % 8);
    let (mut mb_x, mut mb_y) = (input.mb_x, input.mb_y);
    if above {
        let (top, bottom) = plane_rows(row)?;
        if row == top {
            if mb_y == 0 {
                return None;
            }
            mb_y -= 1;
            row = bottom;
        } else {
            row -= 1;
        }
    } else if col == 4 {
        if mb_x == 0 {
            return None;
        }
        mb_x -= 1;
        col = 7;
    } else {
        col -= 1;
    }

    let scan8_index = REVERSE_SCAN_8[row][col];
    if scan8_index == INVALID_SCAN8 {
        return None;
    }
    Some(CoefficientCoord {
        mb_x,
        mb_y,
        scan8_index,
        zigzag_index: input.zigzag_index,
    })
}

/// Position of the coefficient above (or left of) the given one,
/// crossing into the neighbouring sub-block at the edge.
pub fn get_neighbor_coefficient(
    above: bool,
    sub_mb_size: u8,
    input: &CoefficientCoord,
) -> Option<CoefficientCoord> {
    if input.scan8_index >= SCAN8_DC_BASE {
        return dc_neighbor(above, sub_mb_size, input);
    }

    let width: u8 = if sub_mb_size > 32 { 8 } else { 4 };
    let raster = if sub_mb_size > 32 {
        ZIGZAG_64[input.zigzag_index as usize]
    } else {
        ZIGZAG_16[input.zigzag_index as usize]
    };
    let (x, y) = (raster % width, raster / width);

    let (target, x, y) = if above {
        if y == 0 {
            (get_neighbor(true, sub_mb_size, input)?, x, width - 1)
        } else {
            (*input, x, y - 1)
        }
    } else if x == 0 {
        (get_neighbor(false, sub_mb_size, input)?, width - 1, y)
    } else {
        (*input, x - 1, y)
    };

    let raster = (x + y * width) as usize;
    let zigzag_index = if sub_mb_size > 32 {
        UNZIGZAG_64[raster]
    } else {
        UNZIGZAG_16[raster]
    };
    Some(CoefficientCoord {
        mb_x: target.mb_x,
        mb_y: target.mb_y,
        scan8_index: target.scan8_index,
        zigzag_index,
    })
}
