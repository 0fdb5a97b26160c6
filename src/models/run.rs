//! Per-run accumulator and the report produced when a run ends.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::extraction::{ExtractionStats, COST_PER_LLM_CALL};
use crate::solver::COST_PER_SOLVE;

/// Shared stop flag. Set from a signal handler or by a fatal error, read between items.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle(Arc<AtomicBool>);

impl AbortHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Run counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Counter {
    Attempted,
    Solved,
    Skipped,
    Failed,
    Extracted,
    Recoveries,
    SolverCalls,
    PagesCompleted,
}

/// Counts for one run. Increment-only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    attempted: u64,
    solved: u64,
    skipped: u64,
    failed: u64,
    extracted: u64,
    recoveries: u64,
    solver_calls: u64,
    pages_completed: u64,
}

impl RunStats {
    pub fn increment(&mut self, counter: Counter) {
        *self.slot(counter) += 1;
    }

    pub fn get(&self, counter: Counter) -> u64 {
        match counter {
            Counter::Attempted => self.attempted,
            Counter::Solved => self.solved,
            Counter::Skipped => self.skipped,
            Counter::Failed => self.failed,
            Counter::Extracted => self.extracted,
            Counter::Recoveries => self.recoveries,
            Counter::SolverCalls => self.solver_calls,
            Counter::PagesCompleted => self.pages_completed,
        }
    }

    fn slot(&mut self, counter: Counter) -> &mut u64 {
        match counter {
            Counter::Attempted => &mut self.attempted,
            Counter::Solved => &mut self.solved,
            Counter::Skipped => &mut self.skipped,
            Counter::Failed => &mut self.failed,
            Counter::Extracted => &mut self.extracted,
            Counter::Recoveries => &mut self.recoveries,
            Counter::SolverCalls => &mut self.solver_calls,
            Counter::PagesCompleted => &mut self.pages_completed,
        }
    }

    pub fn attempted(&self) -> u64 {
        self.attempted
    }

    pub fn solved(&self) -> u64 {
        self.solved
    }

    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    pub fn failed(&self) -> u64 {
        self.failed
    }

    pub fn extracted(&self) -> u64 {
        self.extracted
    }

    pub fn recoveries(&self) -> u64 {
        self.recoveries
    }

    pub fn solver_calls(&self) -> u64 {
        self.solver_calls
    }

    pub fn pages_completed(&self) -> u64 {
        self.pages_completed
    }
}

/// Mutable context threaded through every component call of one run.
#[derive(Debug)]
pub struct RunState {
    seen: HashSet<String>,
    stats: RunStats,
    current_page: usize,
    abort: AbortHandle,
    abort_reason: Option<String>,
}

impl RunState {
    pub fn new(abort: AbortHandle) -> Self {
        Self {
            seen: HashSet::new(),
            stats: RunStats::default(),
            current_page: 1,
            abort,
            abort_reason: None,
        }
    }

    /// Record an identifier. Returns false if it was already processed this run.
    pub fn mark_seen(&mut self, id: &str) -> bool {
        self.seen.insert(id.to_string())
    }

    pub fn is_seen(&self, id: &str) -> bool {
        self.seen.contains(id)
    }

    pub fn seen_count(&self) -> usize {
        self.seen.len()
    }

    pub fn increment(&mut self, counter: Counter) {
        self.stats.increment(counter);
    }

    pub fn stats(&self) -> RunStats {
        self.stats
    }

    /// Last results page that was loaded and verified.
    pub fn current_page(&self) -> usize {
        self.current_page
    }

    pub fn set_current_page(&mut self, page: usize) {
        self.current_page = page;
    }

    /// Stop the run after the current item. The first reason given is kept.
    pub fn request_abort(&mut self, reason: impl Into<String>) {
        if self.abort_reason.is_none() {
            self.abort_reason = Some(reason.into());
        }
        self.abort.trigger();
    }

    pub fn should_stop(&self) -> bool {
        self.abort.is_triggered()
    }

    /// Reason for stopping; external triggers without a reason report as interrupted.
    pub fn abort_reason(&self) -> Option<String> {
        match (&self.abort_reason, self.abort.is_triggered()) {
            (Some(reason), _) => Some(reason.clone()),
            (None, true) => Some("interrupted".to_string()),
            (None, false) => None,
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Aborted { reason: String },
    /// The run never got past the search; nothing was written.
    SearchFailed { reason: String },
}

impl RunOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            RunOutcome::Completed => 0,
            RunOutcome::SearchFailed { .. } => 1,
            RunOutcome::Aborted { .. } => 2,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, RunOutcome::Completed)
    }
}

/// Summary returned by every run, completed or not.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub source: String,
    pub outcome: RunOutcome,
    pub stats: RunStats,
    pub extraction: ExtractionStats,
    pub output: Option<PathBuf>,
    pub rows_written: u64,
    pub elapsed: Duration,
    pub time_paced: Duration,
}

impl RunReport {
    pub fn solver_cost(&self) -> f64 {
        self.stats.solver_calls() as f64 * COST_PER_SOLVE
    }

    pub fn llm_cost(&self) -> f64 {
        self.extraction.llm_calls as f64 * COST_PER_LLM_CALL
    }

    pub fn total_cost(&self) -> f64 {
        self.solver_cost() + self.llm_cost()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seen_set_rejects_duplicates() {
        let mut run = RunState::new(AbortHandle::new());
        assert!(run.mark_seen("852667"));
        assert!(!run.mark_seen("852667"));
        assert!(run.is_seen("852667"));
        assert_eq!(run.seen_count(), 1);
    }

    #[test]
    fn first_abort_reason_wins() {
        let mut run = RunState::new(AbortHandle::new());
        assert!(!run.should_stop());
        run.request_abort("session lost");
        run.request_abort("later");
        assert!(run.should_stop());
        assert_eq!(run.abort_reason().as_deref(), Some("session lost"));
    }

    #[test]
    fn external_trigger_reports_interrupted() {
        let handle = AbortHandle::new();
        let run = RunState::new(handle.clone());
        handle.trigger();
        assert!(run.should_stop());
        assert_eq!(run.abort_reason().as_deref(), Some("interrupted"));
    }

    #[test]
    fn counters_only_go_up() {
        let mut run = RunState::new(AbortHandle::new());
        run.increment(Counter::Attempted);
        run.increment(Counter::Attempted);
        run.increment(Counter::Skipped);
        let stats = run.stats();
        assert_eq!(stats.attempted(), 2);
        assert_eq!(stats.get(Counter::Skipped), 1);
        assert_eq!(stats.extracted(), 0);
    }

    #[test]
    fn exit_codes() {
        assert_eq!(RunOutcome::Completed.exit_code(), 0);
        assert_eq!(
            RunOutcome::Aborted {
                reason: "x".into()
            }
            .exit_code(),
            2
        );
        assert_eq!(
            RunOutcome::SearchFailed {
                reason: "x".into()
            }
            .exit_code(),
            1
        );
    }
}
