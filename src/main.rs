mod archive;
mod entity;
mod error;
mod fixture;
mod reference;
mod router;
mod settings;
mod util;
mod xml;

use std::path::PathBuf;
use std::time::Instant;

use anyhow::Result;
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use tracing::error;

use reference::providers::ProviderTable;
use settings::Settings;

#[derive(Parser)]
#[command(
    name = "alto2fixture",
    about = "Turn alto2txt newspaper metadata archives into database fixtures"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    options: Options,
}

#[derive(Subcommand)]
enum Commands {
    /// Cache every archive, write fixtures, then offer to clear the cache
    Run,
    /// Cache entities from the metadata archives only
    Route,
    /// Write fixtures from an existing cache only
    Parse,
    /// Print the resolved setup and fixture tables
    Show,
}

#[derive(Args)]
struct Options {
    /// Collections to process (comma separated)
    #[arg(short, long, global = true, value_delimiter = ',')]
    collections: Vec<String>,
    /// Directory holding the `{collection}-alto2txt` mounts
    #[arg(short, long, global = true)]
    mountpoint: Option<PathBuf>,
    /// Fixture output directory
    #[arg(short, long, global = true)]
    output: Option<PathBuf>,
    #[arg(long, global = true)]
    cache_home: Option<PathBuf>,
    #[arg(long, global = true)]
    report_dir: Option<PathBuf>,
    /// JISC papers CSV
    #[arg(long, global = true)]
    jisc_papers: Option<PathBuf>,
    #[arg(long, global = true)]
    max_elements_per_file: Option<usize>,
    /// Process the largest archives first
    #[arg(long, global = true)]
    start_with_largest: bool,
    /// Write null for relational fields that cannot be resolved
    #[arg(long, global = true)]
    allow_null_relations: bool,
    /// DataProvider field matched against collection names (legacy_code, code or name)
    #[arg(long, global = true)]
    data_provider_field: Option<String>,
    #[arg(long, global = true)]
    no_show_fixture_tables: bool,
    #[arg(long, global = true)]
    no_export_fixture_tables: bool,
    /// Answer yes to every prompt
    #[arg(short = 'y', long, global = true)]
    yes: bool,
}

impl Options {
    fn apply(&self, settings: &mut Settings) {
        if !self.collections.is_empty() {
            settings.collections = self.collections.clone();
        }
        if let Some(p) = &self.mountpoint {
            settings.mountpoint = p.clone();
        }
        if let Some(p) = &self.output {
            settings.output = p.clone();
        }
        if let Some(p) = &self.cache_home {
            settings.cache_home = p.clone();
        }
        if let Some(p) = &self.report_dir {
            settings.report_dir = p.clone();
        }
        if let Some(p) = &self.jisc_papers {
            settings.jisc_papers_csv = p.clone();
        }
        if let Some(n) = self.max_elements_per_file {
            settings.max_elements_per_file = n;
        }
        if let Some(f) = &self.data_provider_field {
            settings.data_provider_index = f.clone();
        }
        settings.start_with_largest |= self.start_with_largest;
        settings.allow_null_relations |= self.allow_null_relations;
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let t0 = Instant::now();
    let mut settings = Settings::load()?;
    cli.options.apply(&mut settings);
    settings.normalize_collections();
    settings.validate()?;
    let settings = settings;

    let providers = ProviderTable::new(&settings.data_provider_index);
    let now = util::timestamp(Utc::now());
    let opts = &cli.options;

    match cli.command {
        Commands::Show => {
            settings.print();
            providers.unmatched_collections(&settings.collections);
            providers.print();
            return Ok(());
        }
        Commands::Route => {
            setup(&settings, &providers, opts, &now)?;
            route_phase(&settings, &providers)?;
        }
        Commands::Parse => {
            setup(&settings, &providers, opts, &now)?;
            parse_phase(&settings, opts, &now)?;
        }
        Commands::Run => {
            setup(&settings, &providers, opts, &now)?;
            route_phase(&settings, &providers)?;
            parse_phase(&settings, opts, &now)?;
            let removed = entity::cache::clear(&settings, opts.yes)?;
            if removed > 0 {
                println!("Cleared {} cached collections", removed);
            }
        }
    }

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", util::format_duration(elapsed));
    }
    Ok(())
}

fn setup(settings: &Settings, providers: &ProviderTable, opts: &Options, now: &str) -> Result<()> {
    settings.print();
    providers.unmatched_collections(&settings.collections);
    if !opts.no_show_fixture_tables {
        providers.print();
    }
    if !opts.no_export_fixture_tables {
        let paths = providers.export(&settings.fixture_tables_output, now)?;
        for p in paths {
            println!("Exported {}", p.display());
        }
    }
    Ok(())
}

fn route_phase(settings: &Settings, providers: &ProviderTable) -> Result<()> {
    let t = Instant::now();
    println!("Routing {} collections...", settings.collections.len());
    let summary = router::route(settings, providers)?;
    summary.print();
    println!("Routed in {}", util::format_duration(t.elapsed()));
    Ok(())
}

fn parse_phase(settings: &Settings, opts: &Options, now: &str) -> Result<()> {
    let t = Instant::now();
    let removed = fixture::reset_fixture_dir(&settings.output, opts.yes)?;
    if removed > 0 {
        println!("Removed {} old fixture files", removed);
    }
    println!("Writing fixtures to {}...", settings.output.display());
    let summary = fixture::parse(settings, now)?;
    summary.print();
    println!("Parsed in {}", util::format_duration(t.elapsed()));
    Ok(())
}
