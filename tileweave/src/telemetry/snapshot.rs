//! Point-in-time copy of the counters.

use std::fmt;

/// Counter values at one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub tiles_initialized: u64,
    pub tiles_recycled: u64,
    pub registrations: u64,
    pub data_completions: u64,
    pub ready_announcements: u64,
    pub tiles_finished: u64,
    pub fetch_errors: u64,
    pub decode_errors: u64,
    pub stale_operations: u64,
    pub invariant_violations: u64,
}

impl MetricsSnapshot {
    /// Tiles initialized but not yet recycled.
    pub fn active_tiles(&self) -> u64 {
        self.tiles_initialized.saturating_sub(self.tiles_recycled)
    }

    /// Fetch plus decode failures.
    pub fn total_errors(&self) -> u64 {
        self.fetch_errors + self.decode_errors
    }
}

impl fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Tiles initialized:     {}", self.tiles_initialized)?;
        writeln!(f, "Tiles recycled:        {}", self.tiles_recycled)?;
        writeln!(f, "Registrations:         {}", self.registrations)?;
        writeln!(f, "Data completions:      {}", self.data_completions)?;
        writeln!(f, "Ready for geometry:    {}", self.ready_announcements)?;
        writeln!(f, "Tiles finished:        {}", self.tiles_finished)?;
        writeln!(f, "Fetch errors:          {}", self.fetch_errors)?;
        writeln!(f, "Decode errors:         {}", self.decode_errors)?;
        writeln!(f, "Stale operations:      {}", self.stale_operations)?;
        write!(f, "Invariant violations:  {}", self.invariant_violations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derived_values() {
        let snapshot = MetricsSnapshot {
            tiles_initialized: 10,
            tiles_recycled: 4,
            fetch_errors: 2,
            decode_errors: 1,
            ..Default::default()
        };
        assert_eq!(snapshot.active_tiles(), 6);
        assert_eq!(snapshot.total_errors(), 3);
    }

    #[test]
    fn test_display_lists_every_counter() {
        let text = MetricsSnapshot::default().to_string();
        assert!(text.contains("Tiles finished"));
        assert!(text.contains("Invariant violations"));
        assert_eq!(text.lines().count(), 10);
    }
}
