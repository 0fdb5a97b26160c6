//! Run command.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::NaiveDate;
use console::style;

use pubnotice::extraction::{Extractor, FallbackExtractor};
use pubnotice::models::{AbortHandle, RunReport, SearchCriteria};
use pubnotice::scrapers::{RunOrchestrator, StarTribuneSource};
use pubnotice::solver::{ChallengeSolver, TwoCaptchaSolver};
use pubnotice::vpn::{NoVpn, VpnController};
use pubnotice::Config;

use super::super::helpers::print_report;
use super::super::Source;

/// Flags given to `pubnotice run`.
pub struct RunOptions {
    pub source: Source,
    pub date: Option<NaiveDate>,
    pub keywords: Option<Vec<String>>,
    pub output_dir: Option<PathBuf>,
    pub headed: bool,
    pub no_vpn: bool,
}

/// Run one pass over the chosen source and print the summary.
pub async fn cmd_run(mut config: Config, options: RunOptions) -> anyhow::Result<()> {
    if let Some(dir) = &options.output_dir {
        config.output.dir = dir.to_string_lossy().into_owned();
    }
    if options.headed {
        config.browser.headless = false;
    }
    if let Some(keywords) = options.keywords.clone() {
        config.search.keywords = keywords;
    }

    let extractor = FallbackExtractor::new(config.llm.clone())
        .context("building the notice extractor")?;
    if !extractor.uses_llm() {
        println!(
            "{} OPENAI_API_KEY not set, using pattern extraction only",
            style("!").yellow()
        );
    }
    let extractor: Arc<dyn Extractor> = Arc::new(extractor);

    let abort = AbortHandle::new();
    watch_ctrl_c(abort.clone());

    let report = match options.source {
        Source::MnPublicNotice => run_portal(&config, &options, extractor, abort).await?,
        Source::StarTribune => {
            let source = StarTribuneSource::new(config.star_tribune_config(), extractor)
                .context("building the HTTP client")?;
            source.run(abort).await
        }
    };

    print_report(&report);

    if !report.outcome.is_completed() {
        std::process::exit(report.outcome.exit_code());
    }
    Ok(())
}

async fn run_portal(
    config: &Config,
    options: &RunOptions,
    extractor: Arc<dyn Extractor>,
    abort: AbortHandle,
) -> anyhow::Result<RunReport> {
    let solver: Option<Arc<dyn ChallengeSolver>> =
        match TwoCaptchaSolver::from_config(config.solver.clone())
            .context("building the challenge solver")?
        {
            Some(solver) => Some(Arc::new(solver) as Arc<dyn ChallengeSolver>),
            None => {
                println!(
                    "{} TWO_CAPTCHA_API_KEY not set, image challenges will be skipped",
                    style("!").yellow()
                );
                None
            }
        };

    let vpn: Box<dyn VpnController> = if options.no_vpn {
        Box::new(NoVpn)
    } else {
        config.vpn.controller().context("setting up the VPN")?
    };

    let criteria = match options.date {
        Some(day) => SearchCriteria::for_day(
            config.search.keywords.clone(),
            config.search.match_mode,
            day,
        ),
        None => SearchCriteria::for_previous_day(
            config.search.keywords.clone(),
            config.search.match_mode,
        ),
    };

    println!(
        "{} Searching mnpublicnotice.com for \"{}\" on {}",
        style("→").cyan(),
        criteria.query(),
        criteria.run_identifier()
    );

    let driver = launch_browser(config).await?;
    let mut orchestrator =
        RunOrchestrator::new(config.orchestrator_config(), extractor, solver, vpn);
    Ok(orchestrator.run(driver, criteria, abort).await)
}

#[cfg(feature = "browser")]
async fn launch_browser(
    config: &Config,
) -> anyhow::Result<Box<dyn pubnotice::browser::BrowserDriver>> {
    let driver = pubnotice::browser::ChromiumDriver::launch(config.browser.clone())
        .await
        .context("launching Chromium")?;
    Ok(Box::new(driver))
}

#[cfg(not(feature = "browser"))]
async fn launch_browser(
    _config: &Config,
) -> anyhow::Result<Box<dyn pubnotice::browser::BrowserDriver>> {
    anyhow::bail!("browser support not compiled (enable the browser feature)")
}

/// Trigger the abort flag on Ctrl-C so the run stops between items.
fn watch_ctrl_c(abort: AbortHandle) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!(
                "\n{} Interrupted, finishing the current notice",
                style("!").yellow()
            );
            abort.trigger();
        }
    });
}
