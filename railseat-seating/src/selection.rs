//! Seat selection over a single carriage grid.

use crate::layout::{SeatGrid, SeatPosition};

/// First contiguous run of `n` free seats within one row, scanning rows top to
/// bottom and columns left to right. Never spans rows.
pub fn adjacent(n: usize, grid: &SeatGrid) -> Option<Vec<SeatPosition>> {
    if n == 0 {
        return Some(Vec::new());
    }
    for row in 0..grid.rows() {
        let mut run = 0;
        for col in 0..grid.cols() {
            if grid.is_free(SeatPosition::new(row, col)) {
                run += 1;
                if run == n {
                    let start = col + 1 - n;
                    return Some((start..=col).map(|c| SeatPosition::new(row, c)).collect());
                }
            } else {
                run = 0;
            }
        }
    }
    None
}

/// First `n` free seats in row-major order, adjacency ignored.
/// Returns fewer than `n` when the grid runs out; callers must check the length.
pub fn non_adjacent(n: usize, grid: &SeatGrid) -> Vec<SeatPosition> {
    let mut selected = Vec::with_capacity(n);
    if n == 0 {
        return selected;
    }
    for row in 0..grid.rows() {
        for col in 0..grid.cols() {
            let pos = SeatPosition::new(row, col);
            if grid.is_free(pos) {
                selected.push(pos);
                if selected.len() == n {
                    return selected;
                }
            }
        }
    }
    selected
}
