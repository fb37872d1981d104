//! Decomposition of a train route into salable segments.

use railseat_shared::Segment;

pub fn station_index(stations: &[String], station: &str) -> Option<usize> {
    stations.iter().position(|s| s == station)
}

/// Every ordered pair `(s_i, s_j)` with `i < j`.
pub fn salable_segments(stations: &[String]) -> Vec<Segment> {
    let mut segments = Vec::new();
    for i in 0..stations.len() {
        for j in (i + 1)..stations.len() {
            segments.push(Segment::new(stations[i].clone(), stations[j].clone()));
        }
    }
    segments
}

/// Segments sharing at least one leg with `segment`, the requested segment included.
/// `None` if either end is off the route or the ends are out of order.
pub fn affected_segments(stations: &[String], segment: &Segment) -> Option<Vec<Segment>> {
    let (from, to) = segment_bounds(stations, segment)?;
    let mut segments = Vec::new();
    for i in 0..to {
        for j in (i + 1).max(from + 1)..stations.len() {
            segments.push(Segment::new(stations[i].clone(), stations[j].clone()));
        }
    }
    Some(segments)
}

/// Departure stations of the adjacent legs covered by `segment`.
pub fn leg_starts(stations: &[String], segment: &Segment) -> Option<Vec<String>> {
    let (from, to) = segment_bounds(stations, segment)?;
    Some(stations[from..to].to_vec())
}

/// Leg index range `[from, to)` covered by `segment`.
pub fn segment_bounds(stations: &[String], segment: &Segment) -> Option<(usize, usize)> {
    let from = station_index(stations, &segment.origin)?;
    let to = station_index(stations, &segment.destination)?;
    (from < to).then_some((from, to))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route() -> Vec<String> {
        ["A", "B", "C", "D"].iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_salable_segments_cover_every_ordered_pair() {
        let segments = salable_segments(&route());
        assert_eq!(segments.len(), 6);
        assert_eq!(segments[0], Segment::new("A", "B"));
        assert_eq!(segments[5], Segment::new("C", "D"));
    }

    #[test]
    fn test_affected_segments_share_a_leg() {
        let affected = affected_segments(&route(), &Segment::new("B", "C")).unwrap();
        // Every segment except A->B and C->D overlaps the B->C leg.
        assert_eq!(affected.len(), 4);
        assert!(affected.contains(&Segment::new("A", "C")));
        assert!(affected.contains(&Segment::new("A", "D")));
        assert!(affected.contains(&Segment::new("B", "C")));
        assert!(affected.contains(&Segment::new("B", "D")));
        assert!(!affected.contains(&Segment::new("A", "B")));
        assert!(!affected.contains(&Segment::new("C", "D")));
    }

    #[test]
    fn test_full_route_affects_everything() {
        let affected = affected_segments(&route(), &Segment::new("A", "D")).unwrap();
        assert_eq!(affected.len(), salable_segments(&route()).len());
    }

    #[test]
    fn test_reversed_or_unknown_segment_rejected() {
        assert!(affected_segments(&route(), &Segment::new("C", "A")).is_none());
        assert!(affected_segments(&route(), &Segment::new("A", "Z")).is_none());
        assert!(leg_starts(&route(), &Segment::new("B", "B")).is_none());
    }

    #[test]
    fn test_leg_starts() {
        let legs = leg_starts(&route(), &Segment::new("A", "C")).unwrap();
        assert_eq!(legs, vec!["A".to_string(), "B".to_string()]);
    }
}
