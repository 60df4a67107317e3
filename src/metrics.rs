//! Training progress reporting.
//!
//! The training loop computes per-batch loss and accuracy and hands them to a
//! [`MetricsSink`]. Sinks decide what to do with them (collect, log, ignore); the loop
//! itself never formats output.

use std::time::Instant;

use log::info;

/// Aggregate metrics for one training batch.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BatchReport {
    /// Zero-based epoch index.
    pub epoch: usize,
    pub epochs: usize,
    /// Zero-based batch index within the epoch.
    pub batch: usize,
    pub batches: usize,
    /// Mean loss over the batch samples.
    pub train_loss: f32,
    /// Mean loss over the validation set, if one was given.
    pub validation_loss: Option<f32>,
    pub train_accuracy: f32,
    pub validation_accuracy: Option<f32>,
}

/// Receives one report per training batch.
pub trait MetricsSink {
    fn on_batch(&mut self, report: &BatchReport);
}

/// Discards every report.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl MetricsSink for NullSink {
    fn on_batch(&mut self, _report: &BatchReport) {}
}

/// Keeps every report in order.
#[derive(Debug, Clone, Default)]
pub struct History {
    pub reports: Vec<BatchReport>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last(&self) -> Option<&BatchReport> {
        self.reports.last()
    }

    /// Reports of the last batch of every epoch.
    pub fn epoch_ends(&self) -> impl Iterator<Item = &BatchReport> {
        self.reports.iter().filter(|r| r.batch + 1 == r.batches)
    }
}

impl MetricsSink for History {
    fn on_batch(&mut self, report: &BatchReport) {
        self.reports.push(*report);
    }
}

/// Logs the last batch of every epoch at `info` level, with elapsed time.
#[derive(Debug, Clone)]
pub struct LogSink {
    started: Instant,
    epoch_started: Instant,
}

impl LogSink {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            started: now,
            epoch_started: now,
        }
    }
}

impl Default for LogSink {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsSink for LogSink {
    fn on_batch(&mut self, r: &BatchReport) {
        if r.batch + 1 != r.batches {
            return;
        }
        let epoch_secs = self.epoch_started.elapsed().as_secs_f32();
        self.epoch_started = Instant::now();

        let mut line = format!(
            "epoch {}/{} train_loss={:.6} train_acc={:.2}%",
            r.epoch + 1,
            r.epochs,
            r.train_loss,
            r.train_accuracy * 100.0
        );
        if let (Some(loss), Some(acc)) = (r.validation_loss, r.validation_accuracy) {
            line.push_str(&format!(" val_loss={loss:.6} val_acc={:.2}%", acc * 100.0));
        }
        info!(
            "{line} epoch_time={epoch_secs:.3}s elapsed={:.3}s",
            self.started.elapsed().as_secs_f32()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(epoch: usize, batch: usize) -> BatchReport {
        BatchReport {
            epoch,
            epochs: 2,
            batch,
            batches: 3,
            ..BatchReport::default()
        }
    }

    #[test]
    fn history_collects_in_order() {
        let mut history = History::new();
        for epoch in 0..2 {
            for batch in 0..3 {
                history.on_batch(&report(epoch, batch));
            }
        }
        assert_eq!(history.reports.len(), 6);
        assert_eq!(history.last(), Some(&report(1, 2)));
        let ends: Vec<_> = history.epoch_ends().map(|r| r.epoch).collect();
        assert_eq!(ends, [0, 1]);
    }

    #[test]
    fn log_sink_accepts_reports() {
        let mut sink = LogSink::new();
        sink.on_batch(&report(0, 2));
        sink.on_batch(&report(1, 0));
    }
}
