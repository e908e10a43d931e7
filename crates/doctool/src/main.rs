use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use clap::{Args, CommandFactory, Parser, Subcommand};
use doctool_core::config::{DEFAULT_CONFIG_FILENAME, DocToolConfig, load_config};
use doctool_core::links::{Credentials, HttpProbe, HttpProbeConfig, login_and_audit};
use doctool_core::redirects::build_redirect_map;
use doctool_core::registry::JsonFileRegistry;
use doctool_core::sitemap::{SitemapFormatKind, write_sitemap};
use doctool_core::wiki::{MediaWikiClient, MediaWikiClientConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "DOCTOOL_LOG";

#[derive(Debug, Parser)]
#[command(
    name = "doctool",
    version,
    about = "Maintenance utilities for the documentation site and wiki"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Print resolved configuration")]
    diagnostics: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Generate an Apache rewrite map from old algorithm paths to current docs")]
    Redirects(RedirectsArgs),
    #[command(about = "Check external links on wiki pages reachable from the root pages")]
    Links(LinksArgs),
    #[command(about = "Create a sitemap of the HTML files under START_DIR")]
    Sitemap(SitemapArgs),
}

#[derive(Debug, Args)]
struct RedirectsArgs {
    #[arg(long, value_name = "PATH", help = "JSON export of the algorithm registry")]
    registry: Option<PathBuf>,
    #[arg(long, value_name = "URL", help = "Destination prefix for algorithm pages")]
    base_url: Option<String>,
    #[arg(short = 'o', long, value_name = "FILENAME", help = "Write to a file instead of stdout")]
    output: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct LinksArgs {
    #[arg(value_name = "PAGE", help = "Contents pages to start from")]
    pages: Vec<String>,
    #[arg(long, value_name = "URL")]
    api_url: Option<String>,
    #[arg(long, value_name = "NAME", help = "Wiki user (defaults to WIKI_BOT_USER)")]
    username: Option<String>,
    #[arg(long, help = "Exit non-zero when any link is broken")]
    fail_on_broken: bool,
}

#[derive(Debug, Args)]
struct SitemapArgs {
    #[arg(value_name = "START_DIR")]
    start_dir: PathBuf,
    #[arg(
        short = 'o',
        long,
        value_name = "FILENAME",
        help = "Store the output in the given file. The format is derived from the extension"
    )]
    output: Option<PathBuf>,
    #[arg(
        short = 'p',
        long,
        value_name = "PREFIX",
        help = "Replace START_DIR with this prefix on all locations"
    )]
    prefix: Option<String>,
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(error) => return report_parse_error(&error),
    };
    init_logging();

    match run(cli) {
        Ok(code) => code,
        Err(error) => {
            eprintln!("Error: {error:#}");
            ExitCode::FAILURE
        }
    }
}

/// Usage errors exit 1; `--help` and `--version` keep clap's own handling.
fn report_parse_error(error: &clap::Error) -> ExitCode {
    if !error.use_stderr() {
        error.exit();
    }
    if let Err(print_error) = error.print() {
        eprintln!("failed to print usage: {print_error}");
    }
    ExitCode::FAILURE
}

fn run(cli: Cli) -> Result<ExitCode> {
    dotenvy::dotenv().ok();
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILENAME));
    let config = load_config(&config_path)?;
    if cli.diagnostics {
        eprintln!(
            "[diagnostics]\nconfig_path: {}\n{}",
            normalize_path(&config_path),
            config.diagnostics()
        );
    }

    match cli.command {
        Some(Commands::Redirects(args)) => run_redirects(&config, args),
        Some(Commands::Links(args)) => run_links(&config, args),
        Some(Commands::Sitemap(args)) => run_sitemap(&config, args),
        None => {
            let mut command = Cli::command();
            command.print_help()?;
            println!();
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn run_redirects(config: &DocToolConfig, args: RedirectsArgs) -> Result<ExitCode> {
    let registry_path = args.registry.unwrap_or_else(|| config.registry_path());
    let registry = JsonFileRegistry::open(&registry_path)?;
    let base_url = args.base_url.unwrap_or_else(|| config.algorithms_url());
    let map = build_redirect_map(&registry, &base_url)?;

    match &args.output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("failed to create {}", path.display()))?;
            map.write_to(&mut BufWriter::new(file))?;
        }
        None => map.write_to(&mut io::stdout().lock())?,
    }
    info!(
        registry = %normalize_path(registry.path()),
        redirects = map.redirects.len(),
        "redirect map written"
    );
    Ok(ExitCode::SUCCESS)
}

fn run_links(config: &DocToolConfig, args: LinksArgs) -> Result<ExitCode> {
    let credentials = Credentials::from_env(args.username.as_deref())?;
    let root_pages = if args.pages.is_empty() {
        config.root_pages()
    } else {
        args.pages
    };

    let mut client_config = MediaWikiClientConfig::from_config(config);
    if let Some(api_url) = args.api_url {
        client_config.api_url = api_url;
    }
    let mut site = MediaWikiClient::new(client_config)?;
    let probe = HttpProbe::new(HttpProbeConfig::from_config(config))?;

    let report = login_and_audit(
        &mut site,
        &credentials,
        &probe,
        &root_pages,
        &mut io::stdout().lock(),
    )?;
    info!(requests = site.request_count(), "wiki requests issued");

    if report.fails_run(args.fail_on_broken) {
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

fn run_sitemap(config: &DocToolConfig, args: SitemapArgs) -> Result<ExitCode> {
    if let Err(error) = SitemapFormatKind::from_output_path(args.output.as_deref()) {
        eprintln!("ERROR: {error}");
        eprintln!();
        print_subcommand_help("sitemap")?;
        return Ok(ExitCode::FAILURE);
    }
    let prefix = args.prefix.unwrap_or_else(|| config.docs_url());
    let entries = write_sitemap(&args.start_dir, &prefix, args.output.as_deref())?;
    info!(
        start_dir = %normalize_path(&args.start_dir),
        entries,
        "sitemap written"
    );
    Ok(ExitCode::SUCCESS)
}

fn print_subcommand_help(name: &str) -> Result<()> {
    let mut command = Cli::command();
    let Some(subcommand) = command.find_subcommand_mut(name) else {
        bail!("unknown subcommand: {name}");
    };
    let help = subcommand.render_help();
    let mut stderr = io::stderr().lock();
    writeln!(stderr, "{help}").context("failed to print usage")?;
    Ok(())
}

fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn normalize_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::process::ExitCode;

    use clap::Parser;

    use super::{Cli, Commands, report_parse_error};

    #[test]
    fn sitemap_accepts_short_options() {
        let cli = Cli::try_parse_from([
            "doctool",
            "sitemap",
            "site",
            "-o",
            "sitemap.txt",
            "-p",
            "http://docs.example.org",
        ])
        .expect("parse");
        let Some(Commands::Sitemap(args)) = cli.command else {
            panic!("expected sitemap command");
        };
        assert_eq!(args.start_dir, PathBuf::from("site"));
        assert_eq!(args.output, Some(PathBuf::from("sitemap.txt")));
        assert_eq!(args.prefix.as_deref(), Some("http://docs.example.org"));
    }

    #[test]
    fn sitemap_requires_exactly_one_start_dir() {
        assert!(Cli::try_parse_from(["doctool", "sitemap"]).is_err());
        assert!(Cli::try_parse_from(["doctool", "sitemap", "a", "b"]).is_err());
    }

    #[test]
    fn wrong_argument_count_exits_with_failure() {
        for args in [
            vec!["doctool", "sitemap"],
            vec!["doctool", "sitemap", "a", "b"],
        ] {
            let error = Cli::try_parse_from(args).expect_err("must fail");
            assert_eq!(report_parse_error(&error), ExitCode::FAILURE);
        }
    }

    #[test]
    fn links_collects_root_pages() {
        let cli = Cli::try_parse_from([
            "doctool",
            "links",
            "Python_In_Mantid",
            "Mantid_Basic_Course",
            "--fail-on-broken",
        ])
        .expect("parse");
        let Some(Commands::Links(args)) = cli.command else {
            panic!("expected links command");
        };
        assert_eq!(args.pages, vec!["Python_In_Mantid", "Mantid_Basic_Course"]);
        assert!(args.fail_on_broken);
    }

    #[test]
    fn global_config_flag_applies_to_subcommands() {
        let cli = Cli::try_parse_from(["doctool", "redirects", "--config", "alt.toml"])
            .expect("parse");
        assert_eq!(cli.config, Some(PathBuf::from("alt.toml")));
        assert!(matches!(cli.command, Some(Commands::Redirects(_))));
    }
}
