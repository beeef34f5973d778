//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr};
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use optout_core::{
    Delivery, PassSummary, Pipeline, ProgressReporter, Resolution, send_emails, send_test_email,
};
use optout_crawler::PageExtractor;
use optout_discovery::BraveSearch;
use optout_mailer::{MessageTemplate, SmtpMailer};
use optout_shared::{
    AppConfig, MailSettings, OrgStatus, expand_home, init_config, load_config, search_api_key,
};
use optout_storage::{ResetScope, Storage};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// optout: find a contact channel for each organization and ask it to forget you.
#[derive(Parser)]
#[command(
    name = "optout",
    version,
    about = "Resolve contact channels for a list of organizations and send opt-out requests.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Database path (defaults to `defaults.database` from the config file).
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Import organization names from a file, one per line.
    Import {
        /// Text file of names. Blank lines and `#` comments are skipped.
        file: PathBuf,
    },

    /// Look up the website of pending organizations that have none.
    Search(LimitArgs),

    /// Look up and cache the contact page of pending organizations.
    ContactSearch(LimitArgs),

    /// Extract contacts from cached contact pages.
    FindContacts(LimitArgs),

    /// Run the full resolution pipeline over pending organizations.
    Batch(LimitArgs),

    /// Show store statistics.
    Status {
        /// Also list the organizations in this status.
        #[arg(long, value_parser = parse_status)]
        list: Option<OrgStatus>,
    },

    /// Put organizations back to pending.
    Reset(ResetArgs),

    /// Send the opt-out email to every resolved email contact not yet mailed.
    SendEmails {
        /// Render and record messages without sending them.
        #[arg(long)]
        dry_run: bool,

        #[command(flatten)]
        limit: LimitArgs,
    },

    /// Send one rendered message to the given address to check mail setup.
    TestEmail {
        /// Recipient address.
        to: String,
    },

    /// Manage configuration.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Args)]
pub(crate) struct LimitArgs {
    /// Process at most this many organizations.
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub limit: Option<u64>,
}

impl LimitArgs {
    fn get(&self) -> Option<usize> {
        self.limit.map(|n| usize::try_from(n).unwrap_or(usize::MAX))
    }
}

#[derive(Args)]
#[group(required = true, multiple = false)]
pub(crate) struct ResetArgs {
    /// Reset one organization by exact name.
    pub name: Option<String>,

    /// Reset every organization.
    #[arg(long)]
    pub all: bool,

    /// Reset every organization in this status.
    #[arg(long, value_parser = parse_status)]
    pub status: Option<OrgStatus>,
}

impl ResetArgs {
    fn scope(&self) -> ResetScope {
        match (&self.name, self.status) {
            (Some(name), _) => ResetScope::Name(name.clone()),
            (None, Some(status)) => ResetScope::Status(status),
            (None, None) => ResetScope::All,
        }
    }
}

#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show current configuration.
    Show,
}

fn parse_status(s: &str) -> std::result::Result<OrgStatus, String> {
    s.parse::<OrgStatus>().map_err(|e| e.to_string())
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing subscriber based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    // `optout` prefixes the binary and every optout_* crate target.
    let filter = match cli.verbose {
        0 => "optout=info",
        1 => "optout=debug",
        _ => "optout=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    if let Command::Config { action } = &cli.command {
        return match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(),
        };
    }

    let config = load_config()?;
    let db_path = match &cli.db {
        Some(path) => path.clone(),
        None => expand_home(&config.defaults.database)?,
    };

    match &cli.command {
        Command::Import { file } => cmd_import(&db_path, file).await,
        Command::Search(limit) => cmd_search(&config, &db_path, limit.get()).await,
        Command::ContactSearch(limit) => cmd_contact_search(&config, &db_path, limit.get()).await,
        Command::FindContacts(limit) => cmd_find_contacts(&config, &db_path, limit.get()).await,
        Command::Batch(limit) => cmd_batch(&config, &db_path, limit.get()).await,
        Command::Status { list } => cmd_status(&db_path, *list).await,
        Command::Reset(args) => cmd_reset(&db_path, &args.scope()).await,
        Command::SendEmails { dry_run, limit } => {
            cmd_send_emails(&config, &db_path, *dry_run, limit.get()).await
        }
        Command::TestEmail { to } => cmd_test_email(&config, to).await,
        // Handled above, before any config is loaded.
        Command::Config { .. } => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// Progress reporting
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn org_started(&self, name: &str, current: usize, total: usize) {
        self.spinner.set_message(format!("[{current}/{total}] {name}"));
    }

    fn org_finished(&self, name: &str, resolution: Resolution) {
        let mark = match resolution {
            Resolution::Success => "ok",
            Resolution::Failed => "failed",
            Resolution::Manual => "manual",
        };
        self.spinner.println(format!("  {mark:<7} {name}"));
    }

    fn done(&self, _summary: &PassSummary) {
        self.spinner.finish_and_clear();
    }
}

/// Race a pass against Ctrl-C. `None` means the operator interrupted it.
///
/// Terminal writes are single transactions, so dropping the pass between
/// organizations leaves the store consistent.
async fn interruptible<T>(
    progress: &CliProgress,
    pass: impl Future<Output = optout_shared::Result<T>>,
) -> Result<Option<T>> {
    tokio::select! {
        result = pass => Ok(Some(result?)),
        _ = tokio::signal::ctrl_c() => {
            progress.spinner.finish_and_clear();
            warn!("interrupted; unprocessed organizations stay pending");
            Ok(None)
        }
    }
}

fn print_pass(title: &str, summary: Option<PassSummary>) {
    let Some(summary) = summary else {
        println!("  {title} interrupted.");
        return;
    };
    println!();
    println!("  {title} complete.");
    println!("  Processed: {}", summary.processed);
    println!("  Succeeded: {}", summary.succeeded);
    println!("  Failed:    {}", summary.failed);
    if summary.manual > 0 {
        println!("  Manual:    {}", summary.manual);
    }
    println!("  Elapsed:   {:.1}s", summary.elapsed.as_secs_f64());
    println!();
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// Names from an import file: trimmed, skipping blanks and `#` comments.
fn read_names(content: &str) -> Vec<&str> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .collect()
}

async fn cmd_import(db_path: &Path, file: &Path) -> Result<()> {
    let content = std::fs::read_to_string(file)
        .wrap_err_with(|| format!("failed to read {}", file.display()))?;
    let names = read_names(&content);

    let store = Storage::open(db_path).await?;
    let created = store.import(&names).await?;
    info!(file = %file.display(), read = names.len(), created, "import finished");

    println!(
        "  Imported {created} new organizations ({} names read).",
        names.len()
    );
    Ok(())
}

fn brave_search(config: &AppConfig) -> Result<BraveSearch> {
    let api_key = search_api_key(config)?;
    Ok(BraveSearch::new(&config.search, api_key)?)
}

async fn cmd_search(config: &AppConfig, db_path: &Path, limit: Option<usize>) -> Result<()> {
    let search = brave_search(config)?;
    let store = Storage::open(db_path).await?;
    let pipeline = Pipeline::new(&store).with_search(&search);

    let progress = CliProgress::new();
    let summary = interruptible(&progress, pipeline.discover_websites(limit, &progress)).await?;
    print_pass("Website search", summary);
    Ok(())
}

async fn cmd_contact_search(config: &AppConfig, db_path: &Path, limit: Option<usize>) -> Result<()> {
    let search = brave_search(config)?;
    let store = Storage::open(db_path).await?;
    let pipeline = Pipeline::new(&store).with_search(&search);

    let progress = CliProgress::new();
    let summary =
        interruptible(&progress, pipeline.discover_contact_pages(limit, &progress)).await?;
    print_pass("Contact page search", summary);
    Ok(())
}

async fn cmd_find_contacts(config: &AppConfig, db_path: &Path, limit: Option<usize>) -> Result<()> {
    let extractor = PageExtractor::new(&config.extraction)?;
    let store = Storage::open(db_path).await?;
    let pipeline = Pipeline::new(&store).with_extractor(&extractor);

    let progress = CliProgress::new();
    let summary =
        interruptible(&progress, pipeline.run_extraction_pass(limit, &progress)).await?;
    print_pass("Contact extraction", summary);
    Ok(())
}

async fn cmd_batch(config: &AppConfig, db_path: &Path, limit: Option<usize>) -> Result<()> {
    let search = brave_search(config)?;
    let extractor = PageExtractor::new(&config.extraction)?;
    let store = Storage::open(db_path).await?;
    let pipeline = Pipeline::new(&store)
        .with_search(&search)
        .with_extractor(&extractor);

    let progress = CliProgress::new();
    let summary = interruptible(&progress, pipeline.run_pass(limit, &progress)).await?;
    print_pass("Batch", summary);
    Ok(())
}

async fn cmd_status(db_path: &Path, list: Option<OrgStatus>) -> Result<()> {
    let store = Storage::open_readonly(db_path).await?;
    let stats = store.stats().await?;

    println!();
    println!("  Organizations: {}", stats.total);
    println!("  Pending:       {}", stats.pending);
    println!("  Success:       {}", stats.success);
    println!("  Failed:        {}", stats.failed);
    println!("  Manual:        {}", stats.manual);
    println!();
    println!("  Email only:    {}", stats.with_email);
    println!("  Form only:     {}", stats.with_form);
    println!("  Email + form:  {}", stats.with_both);
    println!("  No contact:    {}", stats.without_contact);
    println!("  Emailed:       {}", stats.emailed);
    println!();

    if let Some(status) = list {
        let orgs = store.list_by_status(status).await?;
        println!("  {status} ({}):", orgs.len());
        for org in orgs {
            let detail = match (&org.contact_value, &org.error_message) {
                (Some(value), _) => format!("{}: {value}", org.contact_type),
                (None, Some(err)) => err.clone(),
                (None, None) => org.website.clone().unwrap_or_default(),
            };
            if detail.is_empty() {
                println!("    {}", org.name);
            } else {
                println!("    {}  {detail}", org.name);
            }
        }
        println!();
    }
    Ok(())
}

async fn cmd_reset(db_path: &Path, scope: &ResetScope) -> Result<()> {
    let store = Storage::open(db_path).await?;
    let count = store.reset(scope).await?;
    info!(?scope, count, "reset finished");
    println!("  Reset {count} organizations to pending.");
    Ok(())
}

async fn cmd_send_emails(
    config: &AppConfig,
    db_path: &Path,
    dry_run: bool,
    limit: Option<usize>,
) -> Result<()> {
    let template = MessageTemplate::from_config(&config.message);
    let transcript_dir = expand_home(&config.defaults.transcript_dir)?;

    let mailer = if dry_run {
        None
    } else {
        Some(SmtpMailer::new(&MailSettings::from_config(config)?)?)
    };
    let delivery = match &mailer {
        Some(mailer) => Delivery::Live(mailer),
        None => Delivery::DryRun,
    };

    let store = Storage::open(db_path).await?;
    let progress = CliProgress::new();

    // Ctrl-C only stops the run between organizations; a message already
    // handed to the mailer is always finished and recorded.
    let shutdown = CancellationToken::new();
    let listener = tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received; stopping after the current message");
                shutdown.cancel();
            }
        }
    });
    let result = send_emails(
        &store,
        delivery,
        &template,
        &transcript_dir,
        limit,
        &shutdown,
        &progress,
    )
    .await;
    listener.abort();
    progress.spinner.finish_and_clear();
    let summary = result?;

    println!();
    if summary.interrupted {
        println!("  Send interrupted. Remaining organizations will be mailed on the next run.");
    } else if dry_run {
        println!("  Dry run complete. Nothing was sent.");
    } else {
        println!("  Send run complete.");
    }
    println!("  Run:        {}", summary.run_id);
    println!("  Sent:       {}", summary.tally.sent);
    println!("  Failed:     {}", summary.tally.failed);
    println!("  Skipped:    {}", summary.tally.skipped);
    if summary.tally.unrecorded > 0 {
        println!(
            "  Unrecorded: {} (delivered but not stored; see the transcript)",
            summary.tally.unrecorded
        );
    }
    println!("  Transcript: {}", summary.transcript.display());
    println!();
    Ok(())
}

async fn cmd_test_email(config: &AppConfig, to: &str) -> Result<()> {
    let mailer = SmtpMailer::new(&MailSettings::from_config(config)?)?;
    let template = MessageTemplate::from_config(&config.message);

    let receipt = send_test_email(&mailer, &template, to).await?;
    println!("  Test email sent to {to}");
    println!("  Message-ID: {}", receipt.message_id);
    Ok(())
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}
