//! CLI command implementations.
//!
//! Provides subcommand handlers for:
//! - `rad-analyse serve` - run the HTTP server
//! - `rad-analyse browse` - page through the study table in the terminal
//! - `rad-analyse upload FILE...` - upload study files to a running server
//! - `rad-analyse import FILE...` - write study files straight into the database
//! - `rad-analyse stats` - request log summary
//! - `rad-analyse filters show|clear` - persisted table filters
//! - `rad-analyse config show|init|set|reset` - configuration management

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use colored::Colorize;

use crate::config::{self, RadConfig};
use crate::engine::context::NoticeLevel;
use crate::engine::storage::FILTERS_KEY;
use crate::engine::upload::{UploadFile, UploadState};
use crate::engine::{
    FileFilterStore, FilterManager, FilterStore, HttpRowSource, HttpUploadSink, LoadOutcome,
    SessionConfig, StudyBrowser, UiContext, UploadManager, Viewport,
};
use crate::logging::reporter::{self, RequestStats};
use crate::logging::requests::REQUEST_LOG_FILE;
use crate::store::StudyStore;
use crate::study::validation::check_file;
use crate::study::{column_label, validate_batch};
use crate::web;

/// Poll interval of the terminal event loop.
const TICK: Duration = Duration::from_millis(20);

/// Output format for report commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
    Csv,
}

impl OutputFormat {
    pub fn from_str_opt(s: Option<&str>) -> Self {
        match s {
            Some("json") => Self::Json,
            Some("csv") => Self::Csv,
            _ => Self::Table,
        }
    }
}

/// Millisecond clock for driving the engine.
struct Clock(Instant);

impl Clock {
    fn start() -> Self {
        Self(Instant::now())
    }

    fn now(&self) -> u64 {
        u64::try_from(self.0.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

fn client_store() -> Result<FileFilterStore> {
    FileFilterStore::default_location().context("could not determine home directory")
}

// ---------------------------------------------------------------------------
// rad-analyse serve
// ---------------------------------------------------------------------------

pub fn run_serve(config: &RadConfig) -> Result<()> {
    let db_path = config.database.resolved_path();
    let store = StudyStore::open(&db_path)?;
    tracing::info!(db = %db_path.display(), studies = store.count()?, "database ready");
    web::serve(config, store)
}

// ---------------------------------------------------------------------------
// rad-analyse browse
// ---------------------------------------------------------------------------

/// Options of `rad-analyse browse`.
#[derive(Debug, Clone, Default)]
pub struct BrowseOptions {
    /// Extra pages to load after the first one.
    pub pages: u32,
    /// Load until the server returns an empty page.
    pub all: bool,
    pub search: Option<String>,
    /// Direct filters as `column=value`; persisted like header filters.
    pub filters: Vec<String>,
    /// Maximum rows printed.
    pub limit: usize,
}

pub fn run_browse(config: &RadConfig, options: &BrowseOptions, format: OutputFormat) -> Result<()> {
    let clock = Clock::start();
    let ctx = UiContext::new(Viewport::default(), Box::new(client_store()?));
    let server_url = &config.client.server_url;
    let mut browser = StudyBrowser::new(
        SessionConfig::from_config(config),
        ctx,
        Box::new(HttpRowSource::new(server_url.clone())),
        Box::new(HttpUploadSink::new(server_url.clone())),
    );

    let extra = load_pages(&mut browser, &clock, options);
    tracing::debug!(extra, rows = browser.table().rows().len(), "pages loaded");

    for pair in &options.filters {
        let Some((column, value)) = pair.split_once('=') else {
            bail!("invalid filter '{pair}', expected column=value");
        };
        if browser.begin_direct_filter(column.trim()).is_none() {
            bail!("unknown column '{}'", column.trim());
        }
        browser.edit_direct_filter(value);
        browser.confirm_direct_filter(clock.now());
    }
    if let Some(query) = &options.search {
        browser.set_search(query, clock.now());
    }

    for notice in browser.context().notifier.notices() {
        match notice.level {
            NoticeLevel::Error => eprintln!("{} {}", "✗".red().bold(), notice.message.red()),
            NoticeLevel::Success => eprintln!("{} {}", "✓".green().bold(), notice.message),
        }
    }

    match format {
        OutputFormat::Json => print_rows_json(&browser, options.limit)?,
        OutputFormat::Csv => print_rows_csv(&browser, options.limit),
        OutputFormat::Table => print_rows_table(&browser, options.limit),
    }
    Ok(())
}

/// Load the first page and then the requested extra pages. Stops at end of
/// data or at the first failed fetch, which is not retried. Returns the
/// number of extra pages loaded.
fn load_pages(browser: &mut StudyBrowser, clock: &Clock, options: &BrowseOptions) -> u32 {
    browser.init(clock.now());
    if settle(browser, clock).contains(&LoadOutcome::Failed) {
        return 0;
    }

    let mut extra = 0;
    while (options.all || extra < options.pages) && !browser.table().is_exhausted() {
        if !browser.load_next() {
            break;
        }
        if settle(browser, clock).contains(&LoadOutcome::Failed) {
            tracing::debug!(page = browser.table().current_page(), "page fetch failed");
            break;
        }
        extra += 1;
    }
    extra
}

/// Tick until no page fetch is outstanding. Returns the load outcomes seen.
fn settle(browser: &mut StudyBrowser, clock: &Clock) -> Vec<LoadOutcome> {
    let mut outcomes = browser.tick(clock.now()).outcomes;
    while !browser.is_idle() {
        std::thread::sleep(TICK);
        outcomes.extend(browser.tick(clock.now()).outcomes);
    }
    outcomes
}

fn print_rows_table(browser: &StudyBrowser, limit: usize) {
    let columns = browser.table().columns();
    if columns.is_empty() {
        println!("{}", "No studies yet. Upload some files first.".yellow());
        return;
    }

    let view = browser.render();
    println!("{}", "Radiologie-Studien".bold().cyan());
    println!(
        "  {} geladen, {} sichtbar",
        format_number(view.loaded),
        format_number(view.matching)
    );
    for header in view.headers.iter().filter(|h| h.state.filtered) {
        if let Some(title) = &header.state.title {
            println!("  {} {}", column_label(&header.column.id).bold(), title.dimmed());
        }
    }
    println!();

    let header: Vec<String> = columns
        .iter()
        .map(|c| format!("{:<14}", truncate(&column_label(&c.id), 14)))
        .collect();
    println!("  {}", header.join(" ").bold());
    println!("  {}", "-".repeat(15 * columns.len()));

    for (i, row) in browser.matching_rows().take(limit).enumerate() {
        let line: Vec<String> = row
            .cells
            .iter()
            .map(|cell| format!("{:<14}", truncate(cell, 14)))
            .collect();
        let line = format!("  {}", line.join(" "));
        if i % 2 == 0 {
            println!("{line}");
        } else {
            println!("{}", line.dimmed());
        }
    }

    let matching = browser.visible().matching.len();
    if matching > limit {
        println!(
            "  {}",
            format!("... {} weitere", format_number(matching - limit)).dimmed()
        );
    }
}

fn rows_as_objects(browser: &StudyBrowser, limit: usize) -> Vec<BTreeMap<String, String>> {
    let ids = browser.table().column_ids();
    browser
        .matching_rows()
        .take(limit)
        .map(|row| {
            ids.iter()
                .enumerate()
                .map(|(idx, id)| (id.clone(), row.cell(idx).to_string()))
                .collect()
        })
        .collect()
}

fn print_rows_json(browser: &StudyBrowser, limit: usize) -> Result<()> {
    let value = serde_json::json!({
        "loaded": browser.table().rows().len(),
        "matching": browser.visible().matching.len(),
        "filters": browser.filters().active_filters(),
        "search": browser.filters().search_query(),
        "rows": rows_as_objects(browser, limit),
    });
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

fn print_rows_csv(browser: &StudyBrowser, limit: usize) {
    let ids = browser.table().column_ids();
    println!("{}", ids.join(","));
    for row in browser.matching_rows().take(limit) {
        let cells: Vec<String> = row.cells.iter().map(|c| csv_field(c)).collect();
        println!("{}", cells.join(","));
    }
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

// ---------------------------------------------------------------------------
// rad-analyse upload
// ---------------------------------------------------------------------------

pub fn run_upload(config: &RadConfig, paths: &[PathBuf]) -> Result<()> {
    let files = paths
        .iter()
        .map(|p| UploadFile::from_path(p))
        .collect::<Result<Vec<_>>>()?;

    let clock = Clock::start();
    let mut ctx = UiContext::new(
        Viewport::default(),
        Box::new(crate::engine::MemoryFilterStore::new()),
    );
    let mut sink = HttpUploadSink::new(config.client.server_url.clone());
    let mut manager =
        UploadManager::new(config.upload.max_concurrent, config.upload.max_size_bytes);

    let ids = manager.enqueue(files, &mut ctx, clock.now());
    manager.pump(&mut sink);

    let mut last_progress = None;
    let summary = loop {
        if let Some(summary) = manager.tick(&mut sink, &mut ctx, clock.now()) {
            break Some(summary);
        }
        if manager.is_idle() {
            break None;
        }
        let progress = manager.progress();
        if last_progress != Some(progress) {
            eprintln!("  {} {progress}%", "Upload:".dimmed());
            last_progress = Some(progress);
        }
        std::thread::sleep(TICK);
    };

    let mut failed = 0;
    for id in ids {
        let Some(item) = manager.item(id) else { continue };
        match &item.state {
            UploadState::Succeeded { records } => println!(
                "{} {} ({} Datensätze)",
                "✓".green().bold(),
                item.name,
                records
            ),
            UploadState::Failed { error } => {
                failed += 1;
                println!("{} {}: {}", "✗".red().bold(), item.name, error.red());
            }
            other => println!("{} {}: {other:?}", "·".dimmed(), item.name),
        }
    }

    if let Some(summary) = summary {
        tracing::debug!(?summary, "upload batch summary");
    }
    if failed > 0 {
        bail!("{failed} file(s) failed to upload");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// rad-analyse import
// ---------------------------------------------------------------------------

/// Validate files and insert them straight into the database.
pub fn run_import(config: &RadConfig, paths: &[PathBuf], dry_run: bool) -> Result<()> {
    let mut store = if dry_run {
        StudyStore::open_in_memory()?
    } else {
        StudyStore::open(&config.database.resolved_path())?
    };

    let mut failed = 0;
    for path in paths {
        match import_file(&mut store, path, config.upload.max_size_bytes) {
            Ok(records) => println!(
                "{} {} ({} Datensätze){}",
                "✓".green().bold(),
                path.display(),
                records,
                if dry_run { " [dry run]" } else { "" }
            ),
            Err(e) => {
                failed += 1;
                println!("{} {}: {}", "✗".red().bold(), path.display(), format!("{e:#}").red());
            }
        }
    }

    if failed > 0 {
        bail!("{failed} file(s) could not be imported");
    }
    Ok(())
}

fn import_file(store: &mut StudyStore, path: &Path, max_size: u64) -> Result<usize> {
    let file = UploadFile::from_path(path)?;
    check_file(&file.content_type, file.size(), max_size)?;
    let content = String::from_utf8(file.content).context("file is not valid UTF-8")?;
    let records = validate_batch(&content)?;
    store.insert_batch(&records)
}

// ---------------------------------------------------------------------------
// rad-analyse stats
// ---------------------------------------------------------------------------

/// Summarize the request log.
pub fn run_stats(config: &RadConfig, format: OutputFormat, days: Option<u32>) -> Result<()> {
    let path = config.logging.resolved_dir().join(REQUEST_LOG_FILE);
    let stats = reporter::compute_stats(&path, days);

    if stats.total_requests == 0 {
        println!(
            "{}",
            "No requests logged yet. Start the server with `rad-analyse serve`.".yellow()
        );
        return Ok(());
    }

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&stats)?),
        OutputFormat::Csv => print_stats_csv(&stats),
        OutputFormat::Table => print_stats_table(&stats, days),
    }
    Ok(())
}

fn print_stats_table(stats: &RequestStats, days: Option<u32>) {
    let title = match days {
        Some(d) => format!("rad-analyse Requests (last {d} days)"),
        None => "rad-analyse Requests".to_string(),
    };
    println!("{}", title.bold().cyan());
    println!("{}", "=".repeat(60));
    println!();
    println!("  {} {}", "Requests:    ".bold(), format_number(stats.total_requests));
    println!("  {} {}", "Errors:      ".bold(), stats.error_count);
    println!(
        "  {} {:.1} ms avg, {} ms max",
        "Latency:     ".bold(),
        stats.avg_duration_ms,
        stats.max_duration_ms
    );
    println!(
        "  {} {:.1}% ({} hits, {} misses)",
        "Cache:       ".bold(),
        stats.cache_hit_pct(),
        stats.cache_hits,
        stats.cache_misses
    );
    println!();

    if stats.routes.is_empty() {
        return;
    }
    println!("{}", "Routes".bold().cyan());
    println!(
        "  {:<28} {:>7} {:>7} {:>9} {:>8}",
        "Route", "Count", "Errors", "Avg ms", "Max ms"
    );
    println!("  {}", "-".repeat(62));
    for (i, route) in stats.routes.iter().take(15).enumerate() {
        let line = format!(
            "  {:<28} {:>7} {:>7} {:>9.1} {:>8}",
            truncate(&route.route, 28),
            route.count,
            route.errors,
            route.avg_duration_ms,
            route.max_duration_ms,
        );
        if i % 2 == 0 {
            println!("{line}");
        } else {
            println!("{}", line.dimmed());
        }
    }
}

fn print_stats_csv(stats: &RequestStats) {
    println!("route,count,errors,avg_duration_ms,max_duration_ms");
    for route in &stats.routes {
        println!(
            "{},{},{},{:.1},{}",
            csv_field(&route.route),
            route.count,
            route.errors,
            route.avg_duration_ms,
            route.max_duration_ms,
        );
    }
}

// ---------------------------------------------------------------------------
// rad-analyse filters
// ---------------------------------------------------------------------------

pub fn run_filters_show(format: OutputFormat) -> Result<()> {
    let store = client_store()?;
    let stored = store.get(FILTERS_KEY);
    let filters: BTreeMap<String, Vec<String>> = match stored.as_deref() {
        None => BTreeMap::new(),
        Some(raw) => serde_json::from_str(raw).with_context(|| {
            format!("stored filters in {} are malformed", store.path().display())
        })?,
    };
    let active: BTreeMap<&String, &Vec<String>> =
        filters.iter().filter(|(_, v)| !v.is_empty()).collect();

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&active)?),
        OutputFormat::Csv => {
            println!("column,value");
            for (column, values) in &active {
                for value in values.iter() {
                    println!("{},{}", csv_field(column), csv_field(value));
                }
            }
        }
        OutputFormat::Table => {
            if active.is_empty() {
                println!("{}", "No active filters.".yellow());
                return Ok(());
            }
            println!("{}", "Active filters".bold().cyan());
            for (column, values) in &active {
                println!(
                    "  {:<24} {} {}",
                    column_label(column).bold(),
                    values.join(", "),
                    format!("({} Filter aktiv)", values.len()).dimmed()
                );
            }
        }
    }
    Ok(())
}

/// Clear one column's filter, or all of them.
pub fn run_filters_clear(column: Option<&str>) -> Result<()> {
    let mut ctx = UiContext::new(Viewport::default(), Box::new(client_store()?));
    let mut filters = FilterManager::new(0);
    filters.restore(&mut ctx);

    match column {
        Some(column) => {
            if !filters.clear_column(column, &mut ctx) {
                bail!("no stored filter for column '{column}'");
            }
            println!("{} Cleared filter on {}", "✓".green().bold(), column.bold());
        }
        None => {
            filters.clear_all(&mut ctx);
            println!("{} Cleared all filters", "✓".green().bold());
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// rad-analyse config
// ---------------------------------------------------------------------------

pub fn run_config_show() -> Result<()> {
    let toml_str = config::show_effective_config()?;
    println!("{}", "Effective rad-analyse Configuration".bold().cyan());
    println!("{}", "=".repeat(50));
    println!();
    println!("{toml_str}");

    let global_exists = config::global_config_file().is_some_and(|p| p.exists());
    let project_exists = config::project_config_file().is_some_and(|p| p.exists());
    println!("{}", "Sources (highest priority last):".dimmed());
    println!("  {} built-in defaults", "·".dimmed());
    print_source("~/.rad-analyse/config.toml", global_exists);
    print_source(".rad-analyse.toml", project_exists);
    println!("  {} {}", "·".dimmed(), "RAD_* environment variables".dimmed());
    Ok(())
}

fn print_source(name: &str, exists: bool) {
    if exists {
        println!("  {} {}", "✓".green(), name.dimmed());
    } else {
        println!("  {} {}", "·".dimmed(), format!("{name} (not found)").dimmed());
    }
}

pub fn run_config_init(force: bool) -> Result<()> {
    let path = config::init_config(force)?;
    println!("{} Config written to {}", "✓".green().bold(), path.display());
    Ok(())
}

pub fn run_config_set(key: &str, value: &str) -> Result<()> {
    config::set_config_value(key, value)?;
    println!("{} Set {} = {}", "✓".green().bold(), key.bold(), value);
    Ok(())
}

pub fn run_config_reset() -> Result<()> {
    let path = config::reset_config()?;
    println!(
        "{} Config reset to defaults at {}",
        "✓".green().bold(),
        path.display()
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// Formatting helpers
// ---------------------------------------------------------------------------

/// Format a number with dot separators, German style.
fn format_number(n: usize) -> String {
    let s = n.to_string();
    let mut result = String::new();
    for (i, ch) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push('.');
        }
        result.push(ch);
    }
    result.chars().rev().collect()
}

/// Truncate to `max_len` characters, appending "…" if truncated.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(1)).collect();
        format!("{kept}…")
    }
}
