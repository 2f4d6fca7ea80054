use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use gazette_core::config_file::{
    self, BrowserConfig, ClassifierConfig, ConfigFile, PortalConfig, StoreConfig, TimeoutsConfig,
};
use gazette_core::{MemoryStore, PdfBackend, ProgressEvent, PublicationStore, SqliteStore};
use gazette_parsing::{FieldExtractor, ParsingConfigBuilder, RelevanceClassifier};
use gazette_scraper::{
    ChromeLauncher, ExtractionJob, HttpDocumentFetcher, Orchestrator, ScraperConfig, run_job,
};
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod output;

use output::ColorMode;

/// DJE gazette extractor - find and store INSS small-value payment notices
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Search the gazette over a date range and store accepted notices
    Extract {
        /// First gazette day (YYYY-MM-DD)
        #[arg(long)]
        from: NaiveDate,

        /// Last gazette day (YYYY-MM-DD), defaults to --from
        #[arg(long)]
        to: Option<NaiveDate>,

        /// Run one search per gazette day instead of a single range search
        #[arg(long)]
        per_day: bool,

        /// Keep results in memory instead of writing to the database
        #[arg(long)]
        dry_run: bool,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Extract yesterday's gazette (for schedulers)
    Daily {
        #[command(flatten)]
        run: RunArgs,
    },

    /// Dry run the extractor and classifier on a local text or PDF file
    Parse {
        /// Path to a .txt or .pdf file holding one notice
        file_path: PathBuf,

        /// Disable colored output
        #[arg(long)]
        no_color: bool,

        /// Relevance threshold override
        #[arg(long)]
        threshold: Option<f64>,
    },

    /// Print the resolved configuration as TOML
    Config,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Path to the publication database
    #[arg(long)]
    db: Option<PathBuf>,

    /// Attach to a running WebDriver server instead of spawning chromedriver
    #[arg(long)]
    webdriver_url: Option<String>,

    /// Path to the chromedriver binary
    #[arg(long)]
    chromedriver: Option<PathBuf>,

    /// Show the browser window
    #[arg(long)]
    no_headless: bool,

    /// Relevance threshold override
    #[arg(long)]
    threshold: Option<f64>,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Extract {
            from,
            to,
            per_day,
            dry_run,
            run,
        } => extract(from, to.unwrap_or(from), per_day, dry_run, run).await,
        Command::Daily { run } => daily(run).await,
        Command::Parse {
            file_path,
            no_color,
            threshold,
        } => parse(file_path, no_color, threshold),
        Command::Config => print_config(),
    }
}

/// Settings after the config file, environment and flags were applied.
struct Resolved {
    file: ConfigFile,
    scraper: ScraperConfig,
    database_path: PathBuf,
}

fn resolve(run: Option<&RunArgs>) -> anyhow::Result<Resolved> {
    let file = config_file::load_config();
    let mut scraper = ScraperConfig::default();
    scraper
        .apply_file(&file)
        .context("invalid configuration file")?;

    // Resolve configuration: CLI flags > env vars > config file > defaults
    if let Some(url) = run
        .and_then(|r| r.webdriver_url.clone())
        .or_else(|| std::env::var("GAZETTE_WEBDRIVER_URL").ok())
    {
        scraper.browser.webdriver_url = Some(url);
    }
    if let Some(path) = run
        .and_then(|r| r.chromedriver.as_ref())
        .map(|p| p.display().to_string())
        .or_else(|| std::env::var("GAZETTE_CHROMEDRIVER").ok())
    {
        scraper.browser.chromedriver_path = path;
    }
    if let Some(headless) = std::env::var("GAZETTE_HEADLESS")
        .ok()
        .and_then(|v| parse_bool(&v))
    {
        scraper.browser.headless = headless;
    }
    if run.is_some_and(|r| r.no_headless) {
        scraper.browser.headless = false;
    }
    if let Some(threshold) = run.and_then(|r| r.threshold) {
        scraper.parsing = classifier_config(&file, threshold)?;
    }

    let database_path = run
        .and_then(|r| r.db.clone())
        .or_else(|| std::env::var("GAZETTE_DB_PATH").ok().map(PathBuf::from))
        .or_else(|| {
            file.store
                .as_ref()
                .and_then(|s| s.database_path.as_ref())
                .map(PathBuf::from)
        })
        .unwrap_or_else(config_file::default_database_path);

    Ok(Resolved {
        file,
        scraper,
        database_path,
    })
}

/// Classifier settings from the file's term lists with `threshold` on top.
fn classifier_config(
    file: &ConfigFile,
    threshold: f64,
) -> anyhow::Result<gazette_parsing::ParsingConfig> {
    let mut builder = ParsingConfigBuilder::new().threshold(threshold);
    if let Some(classifier) = &file.classifier {
        if let Some(terms) = &classifier.extra_domain_terms {
            builder = builder.add_domain_terms(terms.clone());
        }
        if let Some(terms) = &classifier.extra_party_terms {
            builder = builder.add_party_terms(terms.clone());
        }
        if let Some(terms) = &classifier.extra_payment_terms {
            builder = builder.add_payment_terms(terms.clone());
        }
    }
    builder.build().context("invalid classifier terms")
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(feature = "pdf")]
fn pdf_backend() -> Arc<dyn PdfBackend> {
    Arc::new(gazette_pdf_mupdf::MupdfBackend::new())
}

#[cfg(not(feature = "pdf"))]
fn pdf_backend() -> Arc<dyn PdfBackend> {
    Arc::new(gazette_core::DisabledPdfBackend)
}

fn build_orchestrator(
    resolved: &Resolved,
    store: Arc<dyn PublicationStore>,
) -> anyhow::Result<Orchestrator> {
    let config = resolved.scraper.clone();
    let fetcher = HttpDocumentFetcher::new(
        &config.browser.user_agent,
        config.document_timeout,
        config.portal.max_document_bytes,
    )
    .context("failed to build document HTTP client")?;
    let launcher = ChromeLauncher::new(config.browser.clone());

    Orchestrator::new(
        config,
        Arc::new(launcher),
        Arc::new(fetcher),
        pdf_backend(),
        store,
    )
    .context("invalid scraper configuration")
}

fn open_store(resolved: &Resolved, dry_run: bool) -> anyhow::Result<Arc<dyn PublicationStore>> {
    if dry_run {
        return Ok(Arc::new(MemoryStore::new()));
    }
    let store = SqliteStore::open(&resolved.database_path).with_context(|| {
        format!(
            "failed to open database {}",
            resolved.database_path.display()
        )
    })?;
    Ok(Arc::new(store))
}

/// Spinner plus scrollback lines for notable events.
fn progress_reporter(color: ColorMode) -> (ProgressBar, impl Fn(ProgressEvent) + Send + Sync) {
    let spinner = ProgressBar::new_spinner();
    let style = ProgressStyle::with_template("{spinner:.green} {msg} [{elapsed}]")
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    spinner.set_style(style);
    spinner.set_message("Starting browser...");
    spinner.enable_steady_tick(Duration::from_millis(120));

    let bar = spinner.clone();
    let callback = move |event: ProgressEvent| {
        if let Some(line) = output::progress_line(&event, color) {
            bar.println(line);
        }
        if let Some(message) = output::spinner_message(&event) {
            bar.set_message(message);
        }
    };
    (spinner, callback)
}

async fn extract(
    from: NaiveDate,
    to: NaiveDate,
    per_day: bool,
    dry_run: bool,
    run: RunArgs,
) -> anyhow::Result<()> {
    let color = ColorMode(!run.no_color);
    let resolved = resolve(Some(&run))?;
    tracing::info!(%from, %to, per_day, dry_run, "extract requested");
    let store = open_store(&resolved, dry_run)?;
    let mut orchestrator = build_orchestrator(&resolved, store)?;
    let criteria = orchestrator
        .criteria_for(from, to)
        .context("invalid date range")?;

    let (spinner, progress) = progress_reporter(color);
    let result = tokio::select! {
        result = async {
            if per_day {
                orchestrator.run_days(&criteria, &progress).await
            } else {
                orchestrator.run(&criteria, &progress).await
            }
        } => Some(result),
        _ = tokio::signal::ctrl_c() => None,
    };
    spinner.finish_and_clear();

    let Some(result) = result else {
        orchestrator.shutdown().await;
        anyhow::bail!("interrupted");
    };
    let summary = result.context("extraction failed")?;

    let mut stdout = std::io::stdout();
    output::print_run_summary(&mut stdout, &summary, color)?;
    if dry_run {
        writeln!(stdout, "(dry run: nothing was written to the database)")?;
    }
    Ok(())
}

async fn daily(run: RunArgs) -> anyhow::Result<()> {
    let color = ColorMode(!run.no_color);
    let resolved = resolve(Some(&run))?;
    let store = open_store(&resolved, false)?;
    let mut orchestrator = build_orchestrator(&resolved, store)?;

    let job = ExtractionJob::yesterday();
    let (spinner, progress) = progress_reporter(color);
    let result = tokio::select! {
        result = run_job(&mut orchestrator, job, &progress) => Some(result),
        _ = tokio::signal::ctrl_c() => None,
    };
    spinner.finish_and_clear();

    let Some(result) = result else {
        orchestrator.shutdown().await;
        anyhow::bail!("interrupted");
    };
    let summary = result.context("daily extraction failed")?;
    output::print_job_summary(&mut std::io::stdout(), &summary, color)?;
    Ok(())
}

fn parse(file_path: PathBuf, no_color: bool, threshold: Option<f64>) -> anyhow::Result<()> {
    let color = ColorMode(!no_color);
    let resolved = resolve(None)?;
    let parsing = match threshold {
        Some(threshold) => classifier_config(&resolved.file, threshold)?,
        None => resolved.scraper.parsing.clone(),
    };

    let is_pdf = file_path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));
    let text = if is_pdf {
        let bytes = std::fs::read(&file_path)
            .with_context(|| format!("failed to read {}", file_path.display()))?;
        pdf_backend()
            .extract_text(&bytes)
            .with_context(|| format!("failed to extract text from {}", file_path.display()))?
    } else {
        std::fs::read_to_string(&file_path)
            .with_context(|| format!("failed to read {}", file_path.display()))?
    };

    let extractor = FieldExtractor::with_config(&parsing);
    let classifier = RelevanceClassifier::new(&parsing);
    let mut stdout = std::io::stdout();

    let fields = match extractor.extract(&text) {
        Ok(fields) => fields,
        Err(e) => {
            writeln!(stdout, "{}: {}", file_path.display(), e)?;
            return Ok(());
        }
    };
    let decision = classifier.classify(&fields, &fields.raw_text);
    output::print_parse_report(&mut stdout, &fields, &decision, classifier.threshold(), color)?;
    Ok(())
}

fn print_config() -> anyhow::Result<()> {
    let resolved = resolve(None)?;
    let scraper = &resolved.scraper;
    let file_classifier = resolved.file.classifier.clone().unwrap_or_default();

    let effective = ConfigFile {
        portal: Some(PortalConfig {
            search_url: Some(scraper.form.url.clone()),
            category: Some(scraper.portal.category.clone()),
            query_text: Some(scraper.portal.query_text.clone()),
            max_pages: Some(scraper.portal.max_pages),
            detail_pages_per_second: Some(scraper.portal.detail_pages_per_second),
            document_url_pattern: Some(scraper.portal.document_url_pattern.clone()),
            max_document_mb: Some((scraper.portal.max_document_bytes / (1024 * 1024)) as u32),
        }),
        browser: Some(BrowserConfig {
            webdriver_url: scraper.browser.webdriver_url.clone(),
            chromedriver_path: Some(scraper.browser.chromedriver_path.clone()),
            headless: Some(scraper.browser.headless),
            user_agent: Some(scraper.browser.user_agent.clone()),
            launch_retries: Some(scraper.browser.launch_retries),
        }),
        timeouts: Some(TimeoutsConfig {
            wait_secs: Some(scraper.wait.timeout.as_secs()),
            poll_ms: Some(scraper.wait.poll_interval.as_millis() as u64),
            page_load_secs: Some(scraper.browser.page_load_timeout.as_secs()),
            document_fetch_secs: Some(scraper.document_timeout.as_secs()),
            navigation_attempts: Some(scraper.wait.navigation_attempts),
        }),
        classifier: Some(ClassifierConfig {
            threshold: Some(scraper.parsing.threshold()),
            ..file_classifier
        }),
        store: Some(StoreConfig {
            database_path: Some(resolved.database_path.display().to_string()),
        }),
    };

    let mut stdout = std::io::stdout();
    if let Some(path) = config_file::config_path() {
        writeln!(stdout, "# platform config: {}", path.display())?;
    }
    writeln!(stdout, "# local override: .gazette.toml")?;
    write!(
        stdout,
        "{}",
        toml::to_string_pretty(&effective).context("failed to render config")?
    )?;
    Ok(())
}
