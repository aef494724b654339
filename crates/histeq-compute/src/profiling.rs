//! Device timestamps and per-stage timings.
//!
//! Every dispatch yields a completion token. With profiling enabled the
//! token carries four device timestamps in nanoseconds:
//!
//! ```text
//! queued ──► submitted ──► start ──► end
//!   queue delay   submit delay   execution
//! ```
//!
//! Only `end - start` counts as a stage's execution time.

use std::fmt;

/// Device timestamps of one completed command, in nanoseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProfilingInfo {
    pub queued: u64,
    pub submitted: u64,
    pub start: u64,
    pub end: u64,
}

impl ProfilingInfo {
    /// Execution time, `end - start`.
    #[inline]
    pub fn elapsed_ns(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    /// Time spent waiting in the queue before submission.
    #[inline]
    pub fn queue_delay_ns(&self) -> u64 {
        self.submitted.saturating_sub(self.queued)
    }

    /// Time between submission and the start of execution.
    #[inline]
    pub fn submit_delay_ns(&self) -> u64 {
        self.start.saturating_sub(self.submitted)
    }

    /// Queued to end.
    #[inline]
    pub fn total_ns(&self) -> u64 {
        self.end.saturating_sub(self.queued)
    }

    /// Full breakdown in the given unit:
    /// `Queued 12, Submitted 3, Executed 40, Total 55 [us]`.
    pub fn describe(&self, resolution: ProfilingResolution) -> String {
        format!(
            "Queued {}, Submitted {}, Executed {}, Total {} [{}]",
            resolution.convert(self.queue_delay_ns()),
            resolution.convert(self.submit_delay_ns()),
            resolution.convert(self.elapsed_ns()),
            resolution.convert(self.total_ns()),
            resolution.suffix(),
        )
    }
}

/// Unit used when printing timestamps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ProfilingResolution {
    #[default]
    Ns,
    Us,
    Ms,
    S,
}

impl ProfilingResolution {
    fn divisor(&self) -> u64 {
        match self {
            Self::Ns => 1,
            Self::Us => 1_000,
            Self::Ms => 1_000_000,
            Self::S => 1_000_000_000,
        }
    }

    /// Whole units in `ns` (truncating).
    pub fn convert(&self, ns: u64) -> u64 {
        ns / self.divisor()
    }

    pub fn suffix(&self) -> &'static str {
        match self {
            Self::Ns => "ns",
            Self::Us => "us",
            Self::Ms => "ms",
            Self::S => "s",
        }
    }
}

/// The three timed device stages of an equalization run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Histogram,
    Scan,
    Apply,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::Histogram, Stage::Scan, Stage::Apply];

    /// Tag used on dispatch errors and in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Histogram => "histogram",
            Self::Scan => "scan",
            Self::Apply => "apply",
        }
    }

    /// Label printed next to a stage time.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Histogram => "Histogram population",
            Self::Scan => "Blelloch scan",
            Self::Apply => "Histogram application",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Execution times of the stages of one run, in recording order.
///
/// Empty when the device was opened without profiling.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageTimings {
    entries: Vec<(Stage, u64)>,
}

impl StageTimings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, stage: Stage, elapsed_ns: u64) {
        self.entries.push((stage, elapsed_ns));
    }

    /// Record when a time is present.
    pub fn record_opt(&mut self, stage: Stage, elapsed_ns: Option<u64>) {
        if let Some(ns) = elapsed_ns {
            self.record(stage, ns);
        }
    }

    /// Time of a stage, summed if it was recorded more than once.
    pub fn get(&self, stage: Stage) -> Option<u64> {
        self.entries
            .iter()
            .filter(|(s, _)| *s == stage)
            .map(|(_, ns)| *ns)
            .reduce(|a, b| a + b)
    }

    /// Sum of every recorded stage.
    pub fn total_ns(&self) -> u64 {
        self.entries.iter().map(|(_, ns)| ns).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Stage, u64)> + '_ {
        self.entries.iter().copied()
    }
}

impl fmt::Display for StageTimings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (stage, ns) in &self.entries {
            writeln!(f, "{} kernel execution time [ns]: {}", stage.label(), ns)?;
        }
        write!(f, "Total execution time [ns]: {}", self.total_ns())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profiling_breakdown() {
        let info = ProfilingInfo { queued: 1_000, submitted: 3_000, start: 4_000, end: 54_000 };
        assert_eq!(info.queue_delay_ns(), 2_000);
        assert_eq!(info.submit_delay_ns(), 1_000);
        assert_eq!(info.elapsed_ns(), 50_000);
        assert_eq!(
            info.describe(ProfilingResolution::Us),
            "Queued 2, Submitted 1, Executed 50, Total 53 [us]"
        );
    }

    #[test]
    fn test_out_of_order_timestamps_saturate() {
        let info = ProfilingInfo { queued: 10, submitted: 5, start: 20, end: 15 };
        assert_eq!(info.queue_delay_ns(), 0);
        assert_eq!(info.elapsed_ns(), 0);
    }

    #[test]
    fn test_stage_timings_total() {
        let mut t = StageTimings::new();
        t.record(Stage::Histogram, 100);
        t.record(Stage::Scan, 20);
        t.record_opt(Stage::Apply, None);
        assert_eq!(t.get(Stage::Scan), Some(20));
        assert_eq!(t.get(Stage::Apply), None);
        assert_eq!(t.total_ns(), 120);

        let text = t.to_string();
        assert!(text.starts_with("Histogram population kernel execution time [ns]: 100"));
        assert!(text.ends_with("Total execution time [ns]: 120"));
    }

    #[test]
    fn test_empty_timings() {
        let t = StageTimings::default();
        assert!(t.is_empty());
        assert_eq!(t.total_ns(), 0);
    }
}
