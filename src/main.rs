use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use rad_analyse::cli::{self, BrowseOptions, OutputFormat};
use rad_analyse::config;
use rad_analyse::logging::{self, Verbosity};

#[derive(Debug, Parser)]
#[command(name = "rad-analyse")]
#[command(about = "Upload, store and browse radiology study metadata")]
#[command(version)]
struct App {
    /// Debug logging on stderr
    #[arg(short, long, global = true)]
    verbose: bool,
    /// Errors only
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the HTTP server (upload endpoint, study pages, web page)
    Serve,
    /// Load study pages from the server and print the filtered table
    Browse {
        /// Additional pages to load after the first one
        #[arg(long, default_value = "0")]
        pages: u32,
        /// Load every page until the end of data
        #[arg(long)]
        all: bool,
        /// Global search, case-insensitive substring over all cells
        #[arg(long)]
        search: Option<String>,
        /// Direct column filter `column=value` (repeatable, persisted)
        #[arg(long = "filter")]
        filters: Vec<String>,
        /// Maximum rows printed
        #[arg(long, default_value = "50")]
        limit: usize,
        /// Output format: table (default), json, csv
        #[arg(long, default_value = "table")]
        format: String,
    },
    /// Upload study files to the configured server
    Upload {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Validate study files and insert them directly into the database
    Import {
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Validate and insert into a throwaway in-memory database
        #[arg(long)]
        dry_run: bool,
    },
    /// Show request statistics from the server's request log
    Stats {
        /// Output format: table (default), json, csv
        #[arg(long, default_value = "table")]
        format: String,
        /// Only include the last N days of data
        #[arg(long)]
        days: Option<u32>,
    },
    /// Show or clear the persisted table filters
    Filters {
        #[command(subcommand)]
        action: FiltersAction,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Debug, Subcommand)]
enum FiltersAction {
    /// Print the active filters
    Show {
        /// Output format: table (default), json, csv
        #[arg(long, default_value = "table")]
        format: String,
    },
    /// Clear one column's filter, or all filters
    Clear {
        /// Column identifier, e.g. `modalitaet`
        column: Option<String>,
    },
}

#[derive(Debug, Subcommand)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Write a default config file to ~/.rad-analyse/config.toml
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Set a dotted key, e.g. `server.port 8080`
    Set { key: String, value: String },
    /// Restore the default config file
    Reset,
}

fn main() -> Result<()> {
    let app = App::parse();
    let verbosity = Verbosity::from_flags(app.verbose, app.quiet);
    let config = config::load();

    // only the server logs at the configured level by default
    let configured = match app.command {
        Commands::Serve => Some(config.logging.level.as_str()),
        _ => None,
    };
    logging::init_subscriber(verbosity, configured);

    match app.command {
        Commands::Serve => cli::run_serve(&config),
        Commands::Browse {
            pages,
            all,
            search,
            filters,
            limit,
            format,
        } => {
            let options = BrowseOptions {
                pages,
                all,
                search,
                filters,
                limit,
            };
            cli::run_browse(&config, &options, OutputFormat::from_str_opt(Some(&format)))
        }
        Commands::Upload { files } => cli::run_upload(&config, &files),
        Commands::Import { files, dry_run } => cli::run_import(&config, &files, dry_run),
        Commands::Stats { format, days } => {
            cli::run_stats(&config, OutputFormat::from_str_opt(Some(&format)), days)
        }
        Commands::Filters { action } => match action {
            FiltersAction::Show { format } => {
                cli::run_filters_show(OutputFormat::from_str_opt(Some(&format)))
            }
            FiltersAction::Clear { column } => cli::run_filters_clear(column.as_deref()),
        },
        Commands::Config { action } => match action {
            ConfigAction::Show => cli::run_config_show(),
            ConfigAction::Init { force } => cli::run_config_init(force),
            ConfigAction::Set { key, value } => cli::run_config_set(&key, &value),
            ConfigAction::Reset => cli::run_config_reset(),
        },
    }
}
