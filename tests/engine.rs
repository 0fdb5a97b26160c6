//! End-to-end runs of the browser engine against the in-memory portal.

mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use common::{Captcha, FakeSite, FakeSolver};
use pubnotice::extraction::FallbackExtractor;
use pubnotice::models::{AbortHandle, RunOutcome};
use pubnotice::scrapers::RunOrchestrator;
use pubnotice::solver::{ChallengeSolver, SolverError};
use pubnotice::vpn::{NoVpn, VpnController, VpnError};

fn assert_unique(ids: &[String]) {
    let distinct: HashSet<&String> = ids.iter().collect();
    assert_eq!(distinct.len(), ids.len(), "duplicate notice ids: {:?}", ids);
}

#[tokio::test]
async fn every_notice_written_once_across_uneven_pages() {
    let dir = tempfile::tempdir().unwrap();
    let site = FakeSite::new(23, 10);

    let report = common::orchestrator(dir.path(), None)
        .run(site.driver(), common::criteria(), AbortHandle::new())
        .await;

    assert_eq!(report.outcome, RunOutcome::Completed);
    let output = report.output.clone().unwrap();
    assert!(output.ends_with("mn_notices_2026-03-02.csv"));

    let ids = common::notice_ids(&output);
    assert_eq!(ids.len(), 23);
    assert_unique(&ids);
    assert_eq!(ids.first().map(String::as_str), Some("1001"));
    assert_eq!(ids.last().map(String::as_str), Some("1023"));

    assert_eq!(report.rows_written, 23);
    assert_eq!(report.stats.attempted(), 23);
    assert_eq!(report.stats.extracted(), 23);
    assert_eq!(report.stats.pages_completed(), 3);
    // Returning from a detail view is ordinary navigation.
    assert_eq!(report.stats.recoveries(), 0);
    assert_eq!(report.extraction.pattern_fallbacks, 23);
    assert!(site.is_closed());
}

#[tokio::test]
async fn rows_carry_extracted_fields() {
    let dir = tempfile::tempdir().unwrap();
    let site = FakeSite::new(1, 10);

    let report = common::orchestrator(dir.path(), None)
        .run(site.driver(), common::criteria(), AbortHandle::new())
        .await;

    let rows = common::rows(&report.output.unwrap());
    assert_eq!(
        rows,
        vec![
            "Jane,Doe,123 Main St,Minneapolis,MN,55401,\"March 5, 2026\",First National Bank,\
             https://notices.test/Details.aspx?SID=abc&ID=1001,1001"
                .to_string()
        ]
    );
}

#[tokio::test]
async fn challenges_are_solved_or_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let site = FakeSite::new(12, 5)
        .with_captcha("1002", Captcha::Checkbox)
        .with_captcha("1003", Captcha::Image)
        .with_captcha("1007", Captcha::Unsolvable);
    let solver = Arc::new(FakeSolver::default());

    let report = common::orchestrator(
        dir.path(),
        Some(solver.clone() as Arc<dyn ChallengeSolver>),
    )
    .run(site.driver(), common::criteria(), AbortHandle::new())
    .await;

    assert_eq!(report.outcome, RunOutcome::Completed);
    let ids = common::notice_ids(&report.output.clone().unwrap());
    assert_eq!(ids.len(), 11);
    assert_unique(&ids);
    assert!(!ids.contains(&"1007".to_string()));
    assert!(ids.contains(&"1002".to_string()));
    assert!(ids.contains(&"1003".to_string()));

    assert_eq!(report.stats.attempted(), 12);
    assert_eq!(report.stats.skipped(), 1);
    assert_eq!(report.stats.solved(), 2);
    assert_eq!(report.stats.solver_calls(), 1);
    assert_eq!(solver.submissions(), 1);
    assert!((report.solver_cost() - 0.003).abs() < 1e-9);
}

#[tokio::test]
async fn image_challenge_without_solver_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let site = FakeSite::new(3, 10).with_captcha("1002", Captcha::Image);

    let report = common::orchestrator(dir.path(), None)
        .run(site.driver(), common::criteria(), AbortHandle::new())
        .await;

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.stats.skipped(), 1);
    assert_eq!(report.stats.solver_calls(), 0);
    assert_eq!(
        common::notice_ids(&report.output.unwrap()),
        vec!["1001", "1003"]
    );
}

/// Accepts submissions but never produces a token.
struct StalledSolver;

#[async_trait]
impl ChallengeSolver for StalledSolver {
    async fn submit(&self, _site_key: &str, _page_url: &str) -> Result<String, SolverError> {
        Ok("ticket-1".to_string())
    }

    async fn poll(&self, _ticket: &str, _timeout: Duration) -> Result<String, SolverError> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Err(SolverError::Timeout(Duration::from_secs(30)))
    }
}

#[tokio::test]
async fn solver_bound_comes_from_run_config() {
    let dir = tempfile::tempdir().unwrap();
    let site = FakeSite::new(3, 10).with_captcha("1002", Captcha::Image);
    let mut config = common::test_config(dir.path());
    config.solver_timeout = Duration::from_millis(50);

    let report = RunOrchestrator::new(
        config,
        Arc::new(FallbackExtractor::patterns_only()),
        Some(Arc::new(StalledSolver) as Arc<dyn ChallengeSolver>),
        Box::new(NoVpn),
    )
    .run(site.driver(), common::criteria(), AbortHandle::new())
    .await;

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.stats.solver_calls(), 1);
    assert_eq!(report.stats.skipped(), 1);
    assert_eq!(
        common::notice_ids(&report.output.unwrap()),
        vec!["1001", "1003"]
    );
}

#[tokio::test]
async fn dropped_session_mid_run_is_restored() {
    let dir = tempfile::tempdir().unwrap();
    let site = FakeSite::new(50, 10).redirect_on_open_at(3);

    let report = common::orchestrator(dir.path(), None)
        .run(site.driver(), common::criteria(), AbortHandle::new())
        .await;

    assert_eq!(report.outcome, RunOutcome::Completed);
    let ids = common::notice_ids(&report.output.clone().unwrap());
    assert_eq!(ids.len(), 50);
    assert_unique(&ids);
    assert_eq!(report.stats.recoveries(), 1);
    assert_eq!(report.stats.pages_completed(), 5);

    // Pages 1 and 2 were never revisited after the reset.
    let opened = site.opened();
    for page in 1..=2 {
        for id in site.ids_on_page(page) {
            assert_eq!(opened.iter().filter(|o| **o == id).count(), 1, "{}", id);
        }
    }
    // The notice that hit the redirect is clicked again, once.
    assert_eq!(opened.iter().filter(|o| *o == "1021").count(), 2);
}

#[tokio::test]
async fn stale_page_after_next_is_recovered() {
    let dir = tempfile::tempdir().unwrap();
    let site = FakeSite::new(30, 10).stale_after(1);

    let report = common::orchestrator(dir.path(), None)
        .run(site.driver(), common::criteria(), AbortHandle::new())
        .await;

    assert_eq!(report.outcome, RunOutcome::Completed);
    let ids = common::notice_ids(&report.output.unwrap());
    assert_eq!(ids.len(), 30);
    assert_unique(&ids);
    assert_eq!(report.stats.recoveries(), 1);
}

#[tokio::test]
async fn next_control_pages_without_indicator() {
    let dir = tempfile::tempdir().unwrap();
    let site = FakeSite::new(23, 10).without_pager();

    let report = common::orchestrator(dir.path(), None)
        .run(site.driver(), common::criteria(), AbortHandle::new())
        .await;

    assert_eq!(report.outcome, RunOutcome::Completed);
    let ids = common::notice_ids(&report.output.unwrap());
    assert_eq!(ids.len(), 23);
    assert_unique(&ids);
    assert_eq!(report.stats.pages_completed(), 3);
    assert_eq!(report.stats.recoveries(), 0);
}

#[tokio::test]
async fn stale_then_redirect_without_indicator_loses_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let site = FakeSite::new(30, 10)
        .without_pager()
        .stale_after(1)
        .redirect_on_open_at(2);

    let report = common::orchestrator(dir.path(), None)
        .run(site.driver(), common::criteria(), AbortHandle::new())
        .await;

    assert_eq!(report.outcome, RunOutcome::Completed);
    let ids = common::notice_ids(&report.output.clone().unwrap());
    assert_eq!(ids.len(), 30);
    assert_unique(&ids);
    for id in site.ids_on_page(2) {
        assert!(ids.contains(&id), "notice {} missing", id);
    }
    assert_eq!(report.stats.recoveries(), 2);
    assert_eq!(report.stats.pages_completed(), 3);

    let opened = site.opened();
    for id in site.ids_on_page(1) {
        assert_eq!(opened.iter().filter(|o| **o == id).count(), 1, "{}", id);
    }
    assert_eq!(opened.iter().filter(|o| *o == "1011").count(), 2);
}

#[tokio::test]
async fn hidden_and_repeated_controls_open_each_notice_once() {
    let dir = tempfile::tempdir().unwrap();
    let site = FakeSite::new(25, 10).with_duplicate_controls();

    let report = common::orchestrator(dir.path(), None)
        .run(site.driver(), common::criteria(), AbortHandle::new())
        .await;

    assert_eq!(report.outcome, RunOutcome::Completed);
    let ids = common::notice_ids(&report.output.unwrap());
    assert_eq!(ids.len(), 25);
    assert_unique(&ids);
    assert_eq!(report.stats.attempted(), 25);

    let opened = site.opened();
    assert_eq!(opened.len(), 25);
    assert_unique(&opened);
}

#[tokio::test]
async fn unreadable_url_after_detail_returns_to_results() {
    let dir = tempfile::tempdir().unwrap();
    let site = FakeSite::new(12, 10).url_glitch_after("1003");

    let report = common::orchestrator(dir.path(), None)
        .run(site.driver(), common::criteria(), AbortHandle::new())
        .await;

    assert_eq!(report.outcome, RunOutcome::Completed);
    let ids = common::notice_ids(&report.output.unwrap());
    assert_eq!(ids.len(), 12);
    assert_unique(&ids);
    assert_eq!(report.stats.recoveries(), 0);
    assert_eq!(site.opened().len(), 12);
}

#[tokio::test]
async fn empty_search_writes_header_only() {
    let dir = tempfile::tempdir().unwrap();
    let site = FakeSite::new(0, 10);

    let report = common::orchestrator(dir.path(), None)
        .run(site.driver(), common::criteria(), AbortHandle::new())
        .await;

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert!(common::rows(&report.output.unwrap()).is_empty());
    assert_eq!(report.stats.attempted(), 0);
}

#[tokio::test]
async fn failed_search_creates_no_file() {
    let dir = tempfile::tempdir().unwrap();
    let site = FakeSite::new(10, 10).broken_search();

    let report = common::orchestrator(dir.path(), None)
        .run(site.driver(), common::criteria(), AbortHandle::new())
        .await;

    assert!(matches!(report.outcome, RunOutcome::SearchFailed { .. }));
    assert_eq!(report.outcome.exit_code(), 1);
    assert!(report.output.is_none());
    assert!(common::files_in(dir.path()).is_empty());
    assert!(site.is_closed());
}

struct UnreachableVpn {
    disconnects: usize,
}

#[async_trait]
impl VpnController for UnreachableVpn {
    async fn connect_fresh(&mut self) -> Result<(), VpnError> {
        Err(VpnError::NotConnected(Duration::from_secs(30)))
    }

    async fn disconnect(&mut self) -> Result<(), VpnError> {
        self.disconnects += 1;
        Ok(())
    }

    async fn status(&mut self) -> Result<String, VpnError> {
        Ok("Disconnected".to_string())
    }
}

#[tokio::test]
async fn vpn_failure_stops_before_search() {
    let dir = tempfile::tempdir().unwrap();
    let site = FakeSite::new(10, 10);

    let report = common::with_vpn(
        dir.path(),
        None,
        Box::new(UnreachableVpn { disconnects: 0 }),
    )
    .run(site.driver(), common::criteria(), AbortHandle::new())
    .await;

    assert!(matches!(report.outcome, RunOutcome::SearchFailed { .. }));
    assert!(site.opened().is_empty());
    assert!(common::files_in(dir.path()).is_empty());
    assert!(site.is_closed());
}

#[tokio::test]
async fn abort_keeps_rows_written_so_far() {
    let dir = tempfile::tempdir().unwrap();
    let abort = AbortHandle::new();
    let site = FakeSite::new(20, 10).abort_after(4, abort.clone());

    let report = common::orchestrator(dir.path(), None)
        .run(site.driver(), common::criteria(), abort)
        .await;

    assert_eq!(
        report.outcome,
        RunOutcome::Aborted {
            reason: "interrupted".to_string()
        }
    );
    assert_eq!(report.outcome.exit_code(), 2);
    assert_eq!(report.rows_written, 4);
    assert_eq!(common::notice_ids(&report.output.unwrap()).len(), 4);
    assert!(site.is_closed());
}

#[tokio::test]
async fn second_run_never_touches_first_file() {
    let dir = tempfile::tempdir().unwrap();

    let first = common::orchestrator(dir.path(), None)
        .run(FakeSite::new(3, 10).driver(), common::criteria(), AbortHandle::new())
        .await;
    let first_path = first.output.unwrap();
    let before = std::fs::read_to_string(&first_path).unwrap();

    let second = common::orchestrator(dir.path(), None)
        .run(FakeSite::new(5, 10).driver(), common::criteria(), AbortHandle::new())
        .await;
    let second_path = second.output.unwrap();

    assert_ne!(first_path, second_path);
    assert!(second_path.ends_with("mn_notices_2026-03-02-2.csv"));
    assert_eq!(std::fs::read_to_string(&first_path).unwrap(), before);
    assert_eq!(common::rows(&second_path).len(), 5);
    assert_eq!(common::files_in(dir.path()).len(), 2);
}
