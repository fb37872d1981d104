//! Party placement across the carriages of one seat class.
//!
//! All functions work on scratch copies of the carriage grids and mark every
//! seat they hand out as taken, so one plan never assigns a seat twice.

use std::cmp::Reverse;

use crate::layout::{SeatClassLayout, SeatGrid, SeatPosition};
use crate::selection::{adjacent, non_adjacent};

#[derive(Debug, Clone)]
pub struct CarriageGrid {
    pub carriage_number: String,
    pub grid: SeatGrid,
}

impl CarriageGrid {
    pub fn new(carriage_number: impl Into<String>, grid: SeatGrid) -> Self {
        Self {
            carriage_number: carriage_number.into(),
            grid,
        }
    }

    fn take(&mut self, positions: Vec<SeatPosition>, out: &mut Vec<Placement>) {
        self.grid.occupy_all(&positions);
        out.extend(positions.into_iter().map(|position| Placement {
            carriage_number: self.carriage_number.clone(),
            position,
        }));
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    pub carriage_number: String,
    pub position: SeatPosition,
}

/// Seats for a party of `n`, one per passenger in passenger order.
/// `None` only when the carriages hold fewer than `n` free seats.
pub fn plan(
    layout: &SeatClassLayout,
    carriages: &mut [CarriageGrid],
    n: usize,
    preferred: &[SeatPosition],
) -> Option<Vec<Placement>> {
    if n == 0 {
        return Some(Vec::new());
    }
    let free: usize = carriages.iter().map(|c| c.grid.free_count()).sum();
    if free < n {
        return None;
    }
    if !preferred.is_empty() {
        place_preferred(layout, carriages, n, preferred)
    } else if n < layout.grouping_threshold {
        place_group(carriages, n)
    } else {
        place_in_pairs(carriages, n)
    }
}

/// Whole party side by side in the first carriage that has the run, then degrade.
pub fn place_group(carriages: &mut [CarriageGrid], n: usize) -> Option<Vec<Placement>> {
    let mut out = Vec::with_capacity(n);
    for carriage in carriages.iter_mut() {
        if let Some(run) = adjacent(n, &carriage.grid) {
            carriage.take(run, &mut out);
            return Some(out);
        }
    }
    degrade(carriages, n)
}

/// Pairs seated first-fit, each pair side by side. Whoever is left over goes
/// through the degrade path.
pub fn place_in_pairs(carriages: &mut [CarriageGrid], n: usize) -> Option<Vec<Placement>> {
    let mut seated: Vec<Option<Placement>> = vec![None; n];
    let mut start = 0;
    while start < n {
        let size = (n - start).min(2);
        for carriage in carriages.iter_mut() {
            if let Some(run) = adjacent(size, &carriage.grid) {
                let mut pair = Vec::with_capacity(size);
                carriage.take(run, &mut pair);
                for (offset, placement) in pair.into_iter().enumerate() {
                    seated[start + offset] = Some(placement);
                }
                break;
            }
        }
        start += size;
    }

    let unseated: Vec<usize> = seated
        .iter()
        .enumerate()
        .filter_map(|(i, p)| p.is_none().then_some(i))
        .collect();
    if !unseated.is_empty() {
        tracing::debug!(count = unseated.len(), "Pair placement incomplete, degrading");
        let rest = degrade(carriages, unseated.len())?;
        for (index, placement) in unseated.into_iter().zip(rest) {
            seated[index] = Some(placement);
        }
    }
    seated.into_iter().collect()
}

/// Preference-aware placement. Honors as much of `preferred` as one carriage
/// allows, then fills the rest of the party.
pub fn place_preferred(
    layout: &SeatClassLayout,
    carriages: &mut [CarriageGrid],
    n: usize,
    preferred: &[SeatPosition],
) -> Option<Vec<Placement>> {
    let preferred = &preferred[..preferred.len().min(n)];

    let mut best: Option<(usize, Vec<SeatPosition>)> = None;
    for (index, carriage) in carriages.iter().enumerate() {
        let honored = honor(layout, &carriage.grid, preferred);
        let better = best
            .as_ref()
            .map_or(true, |(_, current)| honored.len() > current.len());
        let complete = honored.len() == preferred.len();
        if better {
            best = Some((index, honored));
        }
        if complete {
            break;
        }
    }

    let (home, honored) = match best {
        Some((index, honored)) if !honored.is_empty() => (index, honored),
        // Nothing honorable anywhere: start from the emptiest carriage.
        _ => (emptiest(carriages)?, Vec::new()),
    };

    let mut out = Vec::with_capacity(n);
    carriages[home].take(honored, &mut out);

    let remaining = n - out.len();
    if remaining > 0 {
        let same = non_adjacent(remaining, &carriages[home].grid);
        carriages[home].take(same, &mut out);
    }

    let remaining = n - out.len();
    if remaining > 0 {
        let next = by_remaining(carriages)
            .into_iter()
            .find(|i| *i != home && carriages[*i].grid.free_count() >= remaining);
        match next {
            Some(index) => {
                let seats = non_adjacent(remaining, &carriages[index].grid);
                carriages[index].take(seats, &mut out);
            }
            None => out.extend(spill_over(carriages, remaining)?),
        }
    }
    (out.len() == n).then_some(out)
}

/// Exact set, then the same shape on another row (where the class allows it),
/// then seat by seat with the aisle substitute.
fn honor(layout: &SeatClassLayout, grid: &SeatGrid, preferred: &[SeatPosition]) -> Vec<SeatPosition> {
    if preferred.iter().all(|p| grid.is_free(*p)) {
        return preferred.to_vec();
    }
    if layout.slide_rows {
        if let Some(shifted) = slide(grid, preferred) {
            return shifted;
        }
    }
    let mut chosen: Vec<SeatPosition> = Vec::with_capacity(preferred.len());
    for seat in preferred {
        let pick = if grid.is_free(*seat) && !chosen.contains(seat) {
            Some(*seat)
        } else {
            layout
                .substitute_for(*seat)
                .filter(|s| grid.is_free(*s) && !chosen.contains(s))
        };
        if let Some(pos) = pick {
            chosen.push(pos);
        }
    }
    chosen
}

/// Nearest row offset at which every preferred seat is free.
fn slide(grid: &SeatGrid, preferred: &[SeatPosition]) -> Option<Vec<SeatPosition>> {
    let rows = grid.rows() as isize;
    let mut offsets: Vec<isize> = (1 - rows..rows).filter(|d| *d != 0).collect();
    offsets.sort_by_key(|d| (d.abs(), *d));
    offsets.into_iter().find_map(|delta| {
        let shifted: Option<Vec<SeatPosition>> = preferred
            .iter()
            .map(|p| {
                let row = p.row as isize + delta;
                (0..rows)
                    .contains(&row)
                    .then(|| SeatPosition::new(row as usize, p.col))
            })
            .collect();
        shifted.filter(|seats| seats.iter().all(|p| grid.is_free(*p)))
    })
}

/// One carriage that holds the whole party, scattered; otherwise spill over.
fn degrade(carriages: &mut [CarriageGrid], n: usize) -> Option<Vec<Placement>> {
    if let Some(carriage) = carriages.iter_mut().find(|c| c.grid.free_count() >= n) {
        let mut out = Vec::with_capacity(n);
        let seats = non_adjacent(n, &carriage.grid);
        carriage.take(seats, &mut out);
        return Some(out);
    }
    spill_over(carriages, n)
}

/// Fills from the carriage with the most free seats downwards.
fn spill_over(carriages: &mut [CarriageGrid], n: usize) -> Option<Vec<Placement>> {
    let mut out = Vec::with_capacity(n);
    for index in by_remaining(carriages) {
        let remaining = n - out.len();
        if remaining == 0 {
            break;
        }
        let seats = non_adjacent(remaining, &carriages[index].grid);
        carriages[index].take(seats, &mut out);
    }
    (out.len() == n).then_some(out)
}

fn by_remaining(carriages: &[CarriageGrid]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..carriages.len()).collect();
    order.sort_by_key(|i| Reverse(carriages[*i].grid.free_count()));
    order
}

fn emptiest(carriages: &[CarriageGrid]) -> Option<usize> {
    by_remaining(carriages).into_iter().next()
}
