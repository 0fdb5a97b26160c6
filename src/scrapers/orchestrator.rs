//! One end-to-end pass over a query.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use super::challenge::ChallengeGate;
use super::recovery::{Anomaly, NavigationRecovery};
use super::traversal::PageTraversal;
use super::{pause, PacingConfig, RateLimiter, SearchSession, SiteProfile, TimingConfig};
use crate::browser::BrowserDriver;
use crate::error::ScrapeError;
use crate::extraction::Extractor;
use crate::models::{
    AbortHandle, Counter, ExtractionRecord, ItemReference, RunOutcome, RunReport, RunState,
    SearchCriteria,
};
use crate::solver::{ChallengeSolver, SolverConfig};
use crate::storage::{StreamPersister, DEFAULT_RELEASE_EVERY};
use crate::vpn::VpnController;

/// Static settings for a run.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub profile: SiteProfile,
    pub timings: TimingConfig,
    pub pacing: PacingConfig,
    pub per_page: u32,
    pub output_dir: PathBuf,
    pub release_every: u64,
    /// Longest time one challenge submission may take.
    pub solver_timeout: Duration,
    /// Output file name prefix; the target date is appended.
    pub file_prefix: String,
}

impl OrchestratorConfig {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            profile: SiteProfile::default(),
            timings: TimingConfig::default(),
            pacing: PacingConfig::default(),
            per_page: 50,
            output_dir: output_dir.into(),
            release_every: DEFAULT_RELEASE_EVERY,
            solver_timeout: SolverConfig::default().timeout_duration(),
            file_prefix: "mn_notices".to_string(),
        }
    }
}

/// Drives search, traversal, challenges, extraction and output for one run.
pub struct RunOrchestrator {
    config: OrchestratorConfig,
    extractor: Arc<dyn Extractor>,
    solver: Option<Arc<dyn ChallengeSolver>>,
    vpn: Box<dyn VpnController>,
}

/// Per-run collaborators built from the configuration.
struct Engine {
    traversal: PageTraversal,
    recovery: NavigationRecovery,
    gate: ChallengeGate,
    limiter: RateLimiter,
}

impl RunOrchestrator {
    pub fn new(
        config: OrchestratorConfig,
        extractor: Arc<dyn Extractor>,
        solver: Option<Arc<dyn ChallengeSolver>>,
        vpn: Box<dyn VpnController>,
    ) -> Self {
        Self {
            config,
            extractor,
            solver,
            vpn,
        }
    }

    /// Run the query to completion or abort.
    ///
    /// The browser session is closed, the output file flushed and the VPN
    /// disconnected on every exit path.
    pub async fn run(
        &mut self,
        mut driver: Box<dyn BrowserDriver>,
        criteria: SearchCriteria,
        abort: AbortHandle,
    ) -> RunReport {
        let started = Instant::now();
        let mut run = RunState::new(abort);
        let mut persister: Option<StreamPersister> = None;

        let mut time_paced = Duration::ZERO;
        let outcome = self
            .execute(driver.as_mut(), &criteria, &mut run, &mut persister, &mut time_paced)
            .await;

        let mut rows_written = 0;
        let mut output = None;
        if let Some(mut p) = persister.take() {
            if let Err(e) = p.close() {
                error!("Failed to close output: {}", e);
            }
            rows_written = p.rows_written();
            output = Some(p.path().to_path_buf());
        }
        if let Err(e) = driver.close().await {
            warn!("Failed to close browser: {}", e);
        }
        if let Err(e) = self.vpn.disconnect().await {
            warn!("Failed to disconnect VPN: {}", e);
        }

        RunReport {
            source: self.config.file_prefix.clone(),
            outcome,
            stats: run.stats(),
            extraction: self.extractor.stats(),
            output,
            rows_written,
            elapsed: started.elapsed(),
            time_paced,
        }
    }

    async fn execute(
        &mut self,
        driver: &mut dyn BrowserDriver,
        criteria: &SearchCriteria,
        run: &mut RunState,
        persister: &mut Option<StreamPersister>,
        time_paced: &mut Duration,
    ) -> RunOutcome {
        if let Err(e) = self.vpn.connect_fresh().await {
            error!("VPN connection failed: {}", e);
            return RunOutcome::SearchFailed {
                reason: format!("VPN connection failed: {}", e),
            };
        }

        let cfg = &self.config;
        let session = SearchSession::new(cfg.profile.clone(), cfg.timings.clone(), cfg.per_page);
        let first = match session.submit(driver, criteria).await {
            Ok(page) => page,
            Err(e) => {
                error!("Search failed: {}", e);
                return RunOutcome::SearchFailed {
                    reason: e.to_string(),
                };
            }
        };

        let stem = format!("{}_{}", cfg.file_prefix, criteria.run_identifier());
        match StreamPersister::open_with_release(&cfg.output_dir, &stem, cfg.release_every) {
            Ok(p) => *persister = Some(p),
            Err(e) => {
                error!("Cannot open output: {}", e);
                return RunOutcome::SearchFailed {
                    reason: e.to_string(),
                };
            }
        }
        let Some(out) = persister.as_mut() else {
            return RunOutcome::SearchFailed {
                reason: "output not open".to_string(),
            };
        };

        let mut engine = Engine {
            traversal: PageTraversal::new(cfg.profile.clone(), cfg.timings.clone(), first),
            recovery: NavigationRecovery::new(
                cfg.profile.clone(),
                cfg.timings.clone(),
                session,
                criteria.clone(),
            ),
            gate: ChallengeGate::new(
                cfg.profile.clone(),
                cfg.timings.clone(),
                self.solver.clone(),
                cfg.solver_timeout,
            ),
            limiter: RateLimiter::with_config(cfg.pacing.clone()),
        };

        let outcome = self.process_all(driver, run, out, &mut engine).await;
        *time_paced = engine.limiter.stats().total_paced;
        outcome
    }

    async fn process_all(
        &self,
        driver: &mut dyn BrowserDriver,
        run: &mut RunState,
        out: &mut StreamPersister,
        engine: &mut Engine,
    ) -> RunOutcome {
        loop {
            if run.should_stop() {
                break;
            }

            let item = match engine
                .traversal
                .next_item(driver, run, &engine.recovery)
                .await
            {
                Ok(Some(item)) => item,
                Ok(None) => break,
                Err(e) => {
                    error!("Traversal stopped: {}", e);
                    run.request_abort(e.to_string());
                    break;
                }
            };

            run.increment(Counter::Attempted);
            engine.limiter.pace(run.stats().attempted()).await;

            match self.process_item(driver, run, engine, &item).await {
                Ok(record) => match out.append(&record) {
                    Ok(appended) => {
                        run.increment(Counter::Extracted);
                        info!(
                            "Saved notice {} ({} {}), {} rows",
                            item.id, record.first_name, record.last_name, appended.rows
                        );
                        if appended.release_due {
                            if let Err(e) = driver.release_transient_state().await {
                                debug!("Memory release failed: {}", e);
                            }
                        }
                    }
                    Err(e) => {
                        error!("Cannot write output: {}", e);
                        run.request_abort(e.to_string());
                    }
                },
                Err(ScrapeError::ChallengeUnsolvable(reason)) => {
                    run.increment(Counter::Skipped);
                    warn!("Skipping notice {}: {}", item.id, reason);
                }
                Err(e) if e.is_fatal() => {
                    error!("Fatal error on notice {}: {}", item.id, e);
                    run.request_abort(e.to_string());
                }
                Err(e) => {
                    run.increment(Counter::Failed);
                    warn!("Notice {} failed: {}", item.id, e);
                }
            }
        }

        match run.abort_reason() {
            Some(reason) => {
                warn!("Run ended early: {}", reason);
                RunOutcome::Aborted { reason }
            }
            None => RunOutcome::Completed,
        }
    }

    async fn process_item(
        &self,
        driver: &mut dyn BrowserDriver,
        run: &mut RunState,
        engine: &mut Engine,
        item: &ItemReference,
    ) -> Result<ExtractionRecord, ScrapeError> {
        self.open_detail(driver, run, engine, item).await?;
        engine.gate.pass(driver, run).await?;

        let link = driver.current_url().await?;
        let content = driver.content().await?;
        let timeout = self.config.timings.extraction_timeout();
        let mut record =
            match tokio::time::timeout(timeout, self.extractor.extract(&content, &link)).await {
                Ok(Ok(record)) => record,
                Ok(Err(e)) => return Err(ScrapeError::ExtractionFailure(e.to_string())),
                Err(_) => {
                    return Err(ScrapeError::ExtractionFailure(format!(
                        "no answer within {:?}",
                        timeout
                    )))
                }
            };
        record.notice_id = item.id.clone();
        record.link = item.detail_url.clone().unwrap_or(link);
        Ok(record)
    }

    /// Click through to the detail view, repairing a dropped session once.
    async fn open_detail(
        &self,
        driver: &mut dyn BrowserDriver,
        run: &mut RunState,
        engine: &mut Engine,
        item: &ItemReference,
    ) -> Result<(), ScrapeError> {
        let profile = &self.config.profile;
        driver.click(item.control).await?;
        pause(self.config.timings.settle()).await;

        let url = driver.current_url().await?;
        if profile.is_detail_url(&url) {
            return Ok(());
        }
        if !profile.is_home_url(&url) {
            return Err(ScrapeError::TransientNavigation(format!(
                "notice {} opened {} instead of its detail view",
                item.id, url
            )));
        }

        run.set_current_page(item.page);
        let expected = engine.traversal.current_page().ids();
        let page = engine
            .recovery
            .restore(driver, run, Anomaly::Redirect { url }, Some(&expected))
            .await?;
        let control = page.items.iter().find(|i| i.id == item.id).map(|i| i.control);

        match (control, &item.detail_url) {
            (Some(control), _) => driver.click(control).await?,
            (None, Some(detail_url)) => driver.navigate(detail_url).await?,
            (None, None) => {
                return Err(ScrapeError::TransientNavigation(format!(
                    "notice {} not on page {} after recovery",
                    item.id, item.page
                )))
            }
        }
        pause(self.config.timings.settle()).await;

        let url = driver.current_url().await?;
        if profile.is_detail_url(&url) {
            Ok(())
        } else {
            Err(ScrapeError::TransientNavigation(format!(
                "notice {} still unreachable ({})",
                item.id, url
            )))
        }
    }
}
