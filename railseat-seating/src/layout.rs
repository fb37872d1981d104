use railseat_shared::{SeatClass, VehicleType};
use serde::{Deserialize, Serialize};

/// Zero-based seat coordinate inside one carriage.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SeatPosition {
    pub row: usize,
    pub col: usize,
}

impl SeatPosition {
    pub fn new(row: usize, col: usize) -> Self {
        Self { row, col }
    }
}

pub const FREE: u8 = 0;
pub const TAKEN: u8 = 1;

/// Row-major availability matrix for one carriage on one segment. 0 = sellable, 1 = sold/blocked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeatGrid {
    rows: usize,
    cols: usize,
    cells: Vec<u8>,
}

impl SeatGrid {
    /// All seats free.
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            cells: vec![FREE; rows * cols],
        }
    }

    /// Panics if the rows are ragged.
    pub fn from_rows(rows: Vec<Vec<u8>>) -> Self {
        let cols = rows.first().map_or(0, Vec::len);
        assert!(rows.iter().all(|r| r.len() == cols), "ragged seat grid");
        Self {
            rows: rows.len(),
            cols,
            cells: rows.into_iter().flatten().collect(),
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn contains(&self, pos: SeatPosition) -> bool {
        pos.row < self.rows && pos.col < self.cols
    }

    pub fn is_free(&self, pos: SeatPosition) -> bool {
        self.contains(pos) && self.cells[pos.row * self.cols + pos.col] == FREE
    }

    pub fn occupy(&mut self, pos: SeatPosition) {
        if self.contains(pos) {
            self.cells[pos.row * self.cols + pos.col] = TAKEN;
        }
    }

    pub fn occupy_all(&mut self, positions: &[SeatPosition]) {
        for pos in positions {
            self.occupy(*pos);
        }
    }

    pub fn release(&mut self, pos: SeatPosition) {
        if self.contains(pos) {
            self.cells[pos.row * self.cols + pos.col] = FREE;
        }
    }

    pub fn free_count(&self) -> usize {
        self.cells.iter().filter(|c| **c == FREE).count()
    }

    pub fn row(&self, row: usize) -> &[u8] {
        &self.cells[row * self.cols..(row + 1) * self.cols]
    }
}

/// Fixed physical layout and preference rules of one (vehicle type, seat class).
#[derive(Debug)]
pub struct SeatClassLayout {
    pub vehicle_type: VehicleType,
    pub seat_class: SeatClass,
    pub rows: usize,
    /// Column letters, left to right.
    pub columns: &'static [char],
    /// Cells that are never sold, as zero-based (row, col).
    pub blocked: &'static [(usize, usize)],
    /// Parties of this size or larger are seated in pairs.
    pub grouping_threshold: usize,
    /// Same-row stand-in for a taken preferred seat.
    pub aisle_substitutes: &'static [(char, char)],
    /// Try the preferred shape shifted to other rows before substituting.
    pub slide_rows: bool,
}

impl SeatClassLayout {
    pub fn cols(&self) -> usize {
        self.columns.len()
    }

    pub fn capacity(&self) -> usize {
        self.rows * self.cols() - self.blocked.len()
    }

    pub fn is_blocked(&self, pos: SeatPosition) -> bool {
        self.blocked.contains(&(pos.row, pos.col))
    }

    /// `01A` style label: two-digit 1-based row, then the column letter.
    pub fn label(&self, pos: SeatPosition) -> String {
        format!("{:02}{}", pos.row + 1, self.columns[pos.col])
    }

    /// Accepts `01A`, `1A` and `A1`. Case-insensitive.
    pub fn parse_label(&self, label: &str) -> Option<SeatPosition> {
        let label = label.trim().to_ascii_uppercase();
        let mut letters = label.chars().filter(|c| c.is_ascii_alphabetic());
        let letter = letters.next()?;
        if letters.next().is_some() {
            return None;
        }
        let digits: String = label.chars().filter(|c| c.is_ascii_digit()).collect();
        if digits.len() + 1 != label.len() {
            return None;
        }
        let row: usize = digits.parse().ok()?;
        let col = self.columns.iter().position(|c| *c == letter)?;
        if row == 0 || row > self.rows {
            return None;
        }
        let pos = SeatPosition::new(row - 1, col);
        (!self.is_blocked(pos)).then_some(pos)
    }

    pub fn substitute_for(&self, pos: SeatPosition) -> Option<SeatPosition> {
        let letter = *self.columns.get(pos.col)?;
        let (_, target) = self.aisle_substitutes.iter().find(|(from, _)| *from == letter)?;
        let col = self.columns.iter().position(|c| c == target)?;
        Some(SeatPosition::new(pos.row, col))
    }

    /// Builds the availability grid from the labels the store reports as sellable.
    pub fn grid_from_available(&self, available: &[String]) -> SeatGrid {
        let mut grid = SeatGrid::new(self.rows, self.cols());
        for row in 0..self.rows {
            for col in 0..self.cols() {
                grid.occupy(SeatPosition::new(row, col));
            }
        }
        for label in available {
            if let Some(pos) = self.parse_label(label) {
                grid.release(pos);
            }
        }
        grid
    }
}

pub static LAYOUTS: &[SeatClassLayout] = &[
    SeatClassLayout {
        vehicle_type: VehicleType::HighSpeed,
        seat_class: SeatClass::BusinessClass,
        rows: 2,
        columns: &['A', 'C', 'F'],
        blocked: &[(0, 1)],
        grouping_threshold: 3,
        aisle_substitutes: &[('A', 'C'), ('C', 'A'), ('F', 'C')],
        slide_rows: false,
    },
    SeatClassLayout {
        vehicle_type: VehicleType::HighSpeed,
        seat_class: SeatClass::FirstClass,
        rows: 7,
        columns: &['A', 'C', 'D', 'F'],
        blocked: &[],
        grouping_threshold: 5,
        aisle_substitutes: &[('A', 'C'), ('C', 'D'), ('D', 'C'), ('F', 'D')],
        slide_rows: true,
    },
    SeatClassLayout {
        vehicle_type: VehicleType::HighSpeed,
        seat_class: SeatClass::SecondClass,
        rows: 18,
        columns: &['A', 'B', 'C', 'D', 'F'],
        blocked: &[],
        grouping_threshold: 5,
        aisle_substitutes: &[('A', 'C'), ('B', 'C'), ('C', 'D'), ('D', 'C'), ('F', 'D')],
        slide_rows: true,
    },
    SeatClassLayout {
        vehicle_type: VehicleType::Bullet,
        seat_class: SeatClass::SecondClassCabinSeat,
        rows: 16,
        columns: &['A', 'B', 'C', 'D', 'F'],
        blocked: &[],
        grouping_threshold: 5,
        aisle_substitutes: &[('A', 'C'), ('B', 'C'), ('C', 'D'), ('D', 'C'), ('F', 'D')],
        slide_rows: false,
    },
    SeatClassLayout {
        vehicle_type: VehicleType::Bullet,
        seat_class: SeatClass::FirstSleeper,
        rows: 8,
        columns: &['A', 'B', 'C', 'D'],
        blocked: &[],
        grouping_threshold: 3,
        aisle_substitutes: &[('A', 'B'), ('B', 'A'), ('C', 'D'), ('D', 'C')],
        slide_rows: false,
    },
];

pub fn find_layout(vehicle_type: VehicleType, seat_class: SeatClass) -> Option<&'static SeatClassLayout> {
    LAYOUTS
        .iter()
        .find(|l| l.vehicle_type == vehicle_type && l.seat_class == seat_class)
}
