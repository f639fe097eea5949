//! Breakpoint scheduling: the set of times the integrator must land on
//! exactly, tagged *simple* (just a discontinuity) or *pause* (hand control
//! back to the driver).
//!
//! Kept as a time-ordered `Vec`; circuits rarely carry more than a few dozen
//! live breakpoints at once; a `BTreeMap` keyed on a float-ordering wrapper
//! would buy nothing here.

use std::cmp::Ordering;

/// Precedence: `Pause` always outranks `Simple` at a coincident time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BreakpointKind {
    Simple,
    Pause,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Breakpoint {
    time: f64,
    kind: BreakpointKind,
}

/// A time-ordered, merge-tolerance-deduplicated set of breakpoints.
///
/// **Precedence on coincident times** (resolves an ambiguity in the
/// original implementation, which inserted a new entry before erasing the
/// old one and so did not reliably document which kind survives): when two
/// entries fall within [`Self::merge_tolerance`] of each other, they are
/// replaced by a single entry at the *earlier* of the two times, with kind
/// `Pause` if either input was `Pause`, else `Simple`. This is applied as a
/// fixed point: merging can cascade, so passes repeat until one leaves the
/// set unchanged.
#[derive(Debug, Clone)]
pub struct BreakpointSet {
    points: Vec<Breakpoint>,
    merge_tolerance: f64,
    pause_time: Option<f64>,
}

impl BreakpointSet {
    pub fn new(merge_tolerance: f64) -> Self {
        Self {
            points: Vec::new(),
            merge_tolerance,
            pause_time: None,
        }
    }

    /// Seeds the set with `{initialTime, tStart (if > initialTime), finalTime
    /// as Pause}`, per the initial condition for a fresh transient run.
    pub fn initialize(&mut self, initial_time: f64, t_start: f64, final_time: f64) {
        self.points.clear();
        self.pause_time = None;
        self.set_break_point(initial_time, BreakpointKind::Simple);
        if t_start > initial_time {
            self.set_break_point(t_start, BreakpointKind::Simple);
        }
        self.set_break_point(final_time, BreakpointKind::Pause);
    }

    pub fn set_merge_tolerance(&mut self, merge_tolerance: f64) {
        self.merge_tolerance = merge_tolerance;
    }

    pub fn merge_tolerance(&self) -> f64 {
        self.merge_tolerance
    }

    /// Inserts one breakpoint, applying the coincident-time precedence rule
    /// against the nearest existing entry.
    pub fn set_break_point(&mut self, time: f64, kind: BreakpointKind) {
        self.insert_one(Breakpoint { time, kind });
        self.refresh_pause_time();
    }

    fn insert_one(&mut self, bp: Breakpoint) {
        if let Some(idx) = self
            .points
            .iter()
            .position(|p| (p.time - bp.time).abs() < self.merge_tolerance)
        {
            let existing = self.points[idx];
            self.points[idx] = Breakpoint {
                time: existing.time.min(bp.time),
                kind: existing.kind.max(bp.kind),
            };
        } else {
            self.points.push(bp);
        }
        self.points
            .sort_by(|a, b| a.time.partial_cmp(&b.time).unwrap_or(Ordering::Equal));
        self.merge_fixed_point();
    }

    /// Runs merge-by-tolerance to a fixed point: repeats full passes until
    /// one leaves the set unchanged.
    fn merge_fixed_point(&mut self) {
        loop {
            let before = self.points.len();
            let mut merged: Vec<Breakpoint> = Vec::with_capacity(self.points.len());
            for bp in self.points.drain(..) {
                if let Some(last) = merged.last_mut() {
                    if (last.time - bp.time).abs() < self.merge_tolerance {
                        *last = Breakpoint {
                            time: last.time.min(bp.time),
                            kind: last.kind.max(bp.kind),
                        };
                        continue;
                    }
                }
                merged.push(bp);
            }
            self.points = merged;
            if self.points.len() == before {
                break;
            }
        }
    }

    /// Absorbs a loader-supplied list: entries at or before `last_time` are
    /// rejected outright; the rest go through the normal merge-by-tolerance
    /// insertion.
    pub fn update_from_loader(&mut self, entries: &[(f64, BreakpointKind)], last_time: f64) {
        for &(time, kind) in entries {
            if time > last_time {
                self.set_break_point(time, kind);
            }
        }
    }

    /// Drops every breakpoint at or before `current_time`.
    pub fn purge_up_to(&mut self, current_time: f64) {
        self.points.retain(|p| p.time > current_time);
        self.refresh_pause_time();
    }

    /// Least breakpoint value strictly greater than `t`.
    pub fn next_stop_after(&self, t: f64) -> Option<f64> {
        self.points
            .iter()
            .filter(|p| p.time > t)
            .map(|p| p.time)
            .fold(None, |acc, v| Some(acc.map_or(v, |a: f64| a.min(v))))
    }

    /// Time of the earliest live `Pause` breakpoint, if any.
    pub fn pause_time(&self) -> Option<f64> {
        self.pause_time
    }

    fn refresh_pause_time(&mut self) {
        self.pause_time = self
            .points
            .iter()
            .filter(|p| p.kind == BreakpointKind::Pause)
            .map(|p| p.time)
            .fold(None, |acc, v| Some(acc.map_or(v, |a: f64| a.min(v))));
    }

    /// Call once the driver has paused at `current_time`: erases the
    /// breakpoint at that time and invalidates the cached pause marker so a
    /// subsequent resume recomputes it from what remains.
    pub fn simulation_paused(&mut self, current_time: f64) {
        self.points
            .retain(|p| (p.time - current_time).abs() >= self.merge_tolerance);
        self.refresh_pause_time();
    }

    /// No two live breakpoints are within `merge_tolerance` of each other
    /// (the invariant this structure exists to maintain).
    pub fn is_deduplicated(&self) -> bool {
        self.points
            .windows(2)
            .all(|w| (w[1].time - w[0].time).abs() >= self.merge_tolerance)
    }

    pub fn iter(&self) -> impl Iterator<Item = (f64, BreakpointKind)> + '_ {
        self.points.iter().map(|p| (p.time, p.kind))
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initialize_seeds_three_points() {
        let mut bps = BreakpointSet::new(1e-12);
        bps.initialize(0.0, 0.0, 10.0);
        let points: Vec<_> = bps.iter().collect();
        assert_eq!(points.len(), 2); // tStart == initialTime, so it's folded in
        assert_eq!(points[0], (0.0, BreakpointKind::Simple));
        assert_eq!(points[1], (10.0, BreakpointKind::Pause));
        assert_eq!(bps.pause_time(), Some(10.0));
    }

    #[test]
    fn tstart_after_initial_is_kept_separate() {
        let mut bps = BreakpointSet::new(1e-12);
        bps.initialize(0.0, 0.5, 10.0);
        let points: Vec<_> = bps.iter().collect();
        assert_eq!(points.len(), 3);
        assert_eq!(points[1].0, 0.5);
    }

    #[test]
    fn coincident_pause_wins_over_simple() {
        let mut bps = BreakpointSet::new(1e-9);
        bps.set_break_point(1.0, BreakpointKind::Simple);
        bps.set_break_point(1.0 + 1e-12, BreakpointKind::Pause);
        let points: Vec<_> = bps.iter().collect();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].1, BreakpointKind::Pause);
    }

    #[test]
    fn no_two_points_within_tolerance() {
        let mut bps = BreakpointSet::new(1e-6);
        for i in 0..20 {
            bps.set_break_point(i as f64 * 1e-7, BreakpointKind::Simple);
        }
        assert!(bps.is_deduplicated());
    }

    #[test]
    fn next_stop_after_skips_past_points() {
        let mut bps = BreakpointSet::new(1e-12);
        bps.initialize(0.0, 0.0, 10.0);
        bps.set_break_point(3.0, BreakpointKind::Simple);
        assert_eq!(bps.next_stop_after(1.0), Some(3.0));
        assert_eq!(bps.next_stop_after(3.0), Some(10.0));
        assert_eq!(bps.next_stop_after(10.0), None);
    }

    #[test]
    fn loader_entries_at_or_before_last_time_rejected() {
        let mut bps = BreakpointSet::new(1e-12);
        bps.initialize(0.0, 0.0, 10.0);
        bps.update_from_loader(&[(0.0, BreakpointKind::Simple), (5.0, BreakpointKind::Simple)], 2.0);
        let points: Vec<_> = bps.iter().collect();
        assert!(points.iter().any(|&(t, _)| t == 5.0));
        assert!(!points.iter().any(|&(t, _)| t == 0.0 && points.len() > 2));
    }

    #[test]
    fn simulation_paused_clears_pause_marker_at_current_time() {
        let mut bps = BreakpointSet::new(1e-12);
        bps.initialize(0.0, 0.0, 4.0);
        assert_eq!(bps.pause_time(), Some(4.0));
        bps.simulation_paused(4.0);
        assert_eq!(bps.pause_time(), None);
        assert!(bps.iter().all(|(t, _)| t != 4.0));
    }

    #[test]
    fn fixed_point_merge_cascades() {
        // Three points each within tolerance of the next, but first and
        // third are not within tolerance of each other directly.
        let mut bps = BreakpointSet::new(0.6);
        bps.set_break_point(0.0, BreakpointKind::Simple);
        bps.set_break_point(0.5, BreakpointKind::Simple);
        bps.set_break_point(1.0, BreakpointKind::Pause);
        let points: Vec<_> = bps.iter().collect();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].1, BreakpointKind::Pause);
    }
}
