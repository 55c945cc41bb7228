//! Cross-board synchronization check.
//!
//! After all boards of one trigger are decoded, the last board is taken as
//! the master clock and every other board's pivot pixel is compared against
//! it. Desynchronization is reported, never fatal.

use crate::config::SyncConfig;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::{info, warn};

/// Pivot comparison of one slave board against the master.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlaveOffset {
    /// Position of the board in decode order
    pub board: usize,
    pub pivot: u32,
    /// `master - slave`
    pub delta: i64,
    pub desync: bool,
}

/// Result of comparing all boards of one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncCheck {
    pub master: u32,
    pub slaves: Vec<SlaveOffset>,
}

impl SyncCheck {
    /// True when at least one slave is off by the threshold or more.
    pub fn is_desynchronized(&self) -> bool {
        self.slaves.iter().any(|s| s.desync)
    }

    pub fn desynchronized(&self) -> impl Iterator<Item = &SlaveOffset> {
        self.slaves.iter().filter(|s| s.desync)
    }
}

/// Every board as `board:pivot(delta)`, the master last.
impl fmt::Display for SyncCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for slave in &self.slaves {
            write!(f, "{}:{}({:+}) ", slave.board, slave.pivot, slave.delta)?;
        }
        write!(f, "{}:{}(master)", self.slaves.len(), self.master)
    }
}

/// Compares every pivot against the last one. Returns `None` for fewer than
/// two boards.
pub fn check_sync(pivots: &[u32], threshold: u32) -> Option<SyncCheck> {
    let (&master, slaves) = pivots.split_last()?;
    if slaves.is_empty() {
        return None;
    }

    let slaves = slaves
        .iter()
        .enumerate()
        .map(|(board, &pivot)| {
            let delta = i64::from(master) - i64::from(pivot);
            SlaveOffset {
                board,
                pivot,
                delta,
                desync: delta.unsigned_abs() >= u64::from(threshold),
            }
        })
        .collect();

    Some(SyncCheck { master, slaves })
}

/// Applies the per-run reporting policy to successive sync checks.
///
/// The first `report_limit` desynchronized records are logged in detail, the
/// next one logs a single summary and later ones are silent.
#[derive(Debug)]
pub struct SyncMonitor {
    threshold: u32,
    report_limit: u32,
    desynced: AtomicU32,
}

impl SyncMonitor {
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            threshold: config.threshold,
            report_limit: config.report_limit,
            desynced: AtomicU32::new(0),
        }
    }

    /// Checks one record's pivots and logs according to the policy.
    pub fn observe(&self, event_number: u32, pivots: &[u32]) -> Option<SyncCheck> {
        let check = check_sync(pivots, self.threshold)?;
        if !check.is_desynchronized() {
            return Some(check);
        }

        let seen = self.desynced.fetch_add(1, Ordering::Relaxed);
        if seen < self.report_limit {
            warn!(event = event_number, "Pivot pixels: {}", check);
            for slave in check.desynchronized() {
                warn!(
                    event = event_number,
                    board = slave.board,
                    pivot = slave.pivot,
                    master = check.master,
                    delta = slave.delta,
                    "Plane {} is desynchronized from master (delta {})",
                    slave.board,
                    slave.delta
                );
            }
        } else if seen == self.report_limit {
            info!(
                event = event_number,
                count = seen + 1,
                "Further desynchronized events will not be reported (run is probably asynchronous)"
            );
        }

        Some(check)
    }

    /// Number of desynchronized records seen so far.
    pub fn desynced_count(&self) -> u32 {
        self.desynced.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[test]
    fn test_threshold_boundary_flags() {
        let check = check_sync(&[100, 101, 103], 2).unwrap();
        assert_eq!(check.master, 103);
        assert_eq!(
            check.slaves,
            vec![
                SlaveOffset { board: 0, pivot: 100, delta: 3, desync: true },
                SlaveOffset { board: 1, pivot: 101, delta: 2, desync: true },
            ]
        );
    }

    #[test]
    fn test_in_sync_and_single_board() {
        let check = check_sync(&[500, 499, 500], 2).unwrap();
        assert!(!check.is_desynchronized());
        assert_eq!(check.slaves[1].delta, 1);

        assert_eq!(check_sync(&[7], 2), None);
        assert_eq!(check_sync(&[], 2), None);
    }

    #[test]
    fn test_report_lists_every_board() {
        let check = check_sync(&[100, 104, 103], 2).unwrap();
        assert_eq!(check.to_string(), "0:100(+3) 1:104(-1) 2:103(master)");
    }

    #[test]
    fn test_negative_delta() {
        let check = check_sync(&[10, 4], 2).unwrap();
        assert_eq!(check.slaves[0].delta, -6);
        assert!(check.slaves[0].desync);
    }

    #[test]
    #[traced_test]
    fn test_report_limit_then_summary_then_silence() {
        let monitor = SyncMonitor::new(&SyncConfig {
            threshold: 2,
            report_limit: 3,
        });

        for event in 0..6 {
            monitor.observe(event, &[0, 50]);
        }
        // synchronized records do not count
        monitor.observe(6, &[50, 50]);

        assert_eq!(monitor.desynced_count(), 6);
        assert!(logs_contain("Pivot pixels: 0:0(+50) 1:50(master)"));
        logs_assert(|lines: &[&str]| {
            let boards = lines.iter().filter(|l| l.contains("Pivot pixels")).count();
            let detailed = lines.iter().filter(|l| l.contains("is desynchronized")).count();
            let summary = lines.iter().filter(|l| l.contains("will not be reported")).count();
            match (boards, detailed, summary) {
                (3, 3, 1) => Ok(()),
                other => Err(format!("unexpected report counts {other:?}")),
            }
        });
    }
}
