use std::env;
use std::path::PathBuf;

use anyhow::{Result, bail};
use chrono::{Local, NaiveDate};
use clap::{Args, CommandFactory, Parser, Subcommand};

use blogtool_core::cards::{CardOptions, CardReport, generate_cards};
use blogtool_core::config::{BlogConfig, load_config};
use blogtool_core::draft::{DraftOptions, DraftPassReport, update_draft_status};
use blogtool_core::newpost::{NewPostOptions, create_post};
use blogtool_core::posts::{scan_posts, scan_stats};
use blogtool_core::runtime::{
    PathOverrides, ResolutionContext, ResolvedPaths, ensure_posts_dir, inspect_runtime,
    resolve_paths,
};
use blogtool_core::summarize::SummaryBackend;

/// Environment flag set by the site generator when it renders the whole
/// project; the draft pass only runs under a full render.
const RENDER_ALL_ENV: &str = "QUARTO_PROJECT_RENDER_ALL";

#[derive(Debug, Parser)]
#[command(
    name = "blogtool",
    version,
    about = "Maintenance CLI for a notebook-based static blog"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    project_root: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Print resolved runtime diagnostics")]
    diagnostics: bool,
    #[arg(long, global = true, help = "Print the full report as JSON")]
    json: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone)]
struct RuntimeOptions {
    project_root: Option<PathBuf>,
    config: Option<PathBuf>,
    diagnostics: bool,
    json: bool,
}

impl RuntimeOptions {
    fn from_cli(cli: &Cli) -> Self {
        Self {
            project_root: cli.project_root.clone(),
            config: cli.config.clone(),
            diagnostics: cli.diagnostics,
            json: cli.json,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Create a post notebook, optionally summarizing a URL")]
    New(NewArgs),
    #[command(about = "Reconcile draft flags with post dates (full renders only)")]
    Drafts(DraftsArgs),
    #[command(about = "Capture social-media cards for posts without one")]
    Cards(CardsArgs),
    #[command(about = "Scan the posts tree and report header health")]
    Status,
}

#[derive(Debug, Args)]
struct NewArgs {
    title: String,
    #[arg(long, help = "URL to fetch and summarize into the first cell")]
    url: Option<String>,
    #[arg(
        long,
        default_value = "llama3.1",
        help = "Summary model: `openai` or an Ollama model name"
    )]
    model: String,
}

#[derive(Debug, Args)]
struct DraftsArgs {
    #[arg(long, help = "Show header diffs without writing")]
    dry_run: bool,
    #[arg(long, help = "Run even without the render-all environment flag")]
    force: bool,
}

#[derive(Debug, Args)]
struct CardsArgs {
    #[arg(long, value_name = "N", help = "Capture at most N cards")]
    limit: Option<usize>,
    #[arg(long, help = "Report what would be captured without invoking the tool")]
    dry_run: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let runtime = RuntimeOptions::from_cli(&cli);

    match cli.command {
        Some(Commands::New(args)) => run_new(&runtime, args),
        Some(Commands::Drafts(args)) => run_drafts(&runtime, args),
        Some(Commands::Cards(args)) => run_cards(&runtime, args),
        Some(Commands::Status) => run_status(&runtime),
        None => {
            let mut command = Cli::command();
            command.print_help()?;
            println!();
            Ok(())
        }
    }
}

fn run_new(runtime: &RuntimeOptions, args: NewArgs) -> Result<()> {
    let (paths, config) = resolve_runtime(runtime)?;
    let report = create_post(
        &paths,
        &config,
        &NewPostOptions {
            title: args.title,
            url: args.url,
            backend: SummaryBackend::parse(&args.model),
        },
        today(),
    )?;

    if runtime.json {
        return print_json(&report);
    }
    println!("new post");
    println!("slug: {}", report.slug);
    println!("date: {}", report.date);
    println!("notebook: {}", report.notebook_path);
    println!("summarized: {}", format_flag(report.summarized));
    if let Some(error) = &report.summary_error {
        println!("summary_error: {error}");
    }
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_drafts(runtime: &RuntimeOptions, args: DraftsArgs) -> Result<()> {
    let (paths, _config) = resolve_runtime(runtime)?;
    let status = inspect_runtime(&paths);
    ensure_posts_dir(&paths, &status)?;

    let render_all = args.force || render_all_flag_set();
    let report = update_draft_status(
        &paths,
        today(),
        &DraftOptions {
            render_all,
            dry_run: args.dry_run,
        },
    )?;

    if runtime.json {
        print_json(&report)?;
    } else {
        print_draft_report(&report);
        print_diagnostics(runtime, &paths);
    }
    if !report.success {
        bail!("draft pass failed for {} post(s)", report.errors.len());
    }
    Ok(())
}

fn run_cards(runtime: &RuntimeOptions, args: CardsArgs) -> Result<()> {
    let (paths, config) = resolve_runtime(runtime)?;
    let status = inspect_runtime(&paths);
    ensure_posts_dir(&paths, &status)?;

    let report = generate_cards(
        &paths,
        &config,
        &CardOptions {
            limit: args.limit,
            dry_run: args.dry_run,
        },
    )?;

    if runtime.json {
        print_json(&report)?;
    } else {
        print_card_report(&report);
        print_diagnostics(runtime, &paths);
    }
    if !report.success {
        bail!("card pass failed for {} post(s)", report.errors.len());
    }
    Ok(())
}

fn run_status(runtime: &RuntimeOptions) -> Result<()> {
    let (paths, _config) = resolve_runtime(runtime)?;
    let status = inspect_runtime(&paths);
    ensure_posts_dir(&paths, &status)?;

    let posts = scan_posts(&paths)?;
    let stats = scan_stats(&posts, today());

    if runtime.json {
        return print_json(&serde_json::json!({ "stats": stats, "posts": posts }));
    }

    println!("posts status");
    println!("total_posts: {}", stats.total_posts);
    println!("drafts: {}", stats.drafts);
    println!("published: {}", stats.published);
    println!("future_dated: {}", stats.future_dated);
    println!("missing_image: {}", stats.missing_image);
    println!("header_errors: {}", stats.header_errors);
    for post in &posts {
        if let Some(error) = &post.header_error {
            println!("problem.{}: {}", post.slug, error);
        }
    }
    if !status.warnings.is_empty() {
        println!("warnings:");
        for warning in &status.warnings {
            println!("  - {warning}");
        }
    }
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn print_draft_report(report: &DraftPassReport) {
    println!("draft pass");
    if report.gated {
        println!("gated: yes ({RENDER_ALL_ENV} is not set; pass --force to override)");
        return;
    }
    println!("dry_run: {}", format_flag(report.dry_run));
    println!("examined: {}", report.examined);
    println!("updated: {}", report.updated);
    println!("unchanged: {}", report.unchanged);
    println!("skipped: {}", report.skipped);
    for post in &report.posts {
        match &post.detail {
            Some(detail) if detail.contains('\n') => {
                println!("{}: {}", post.slug, post.action);
                for line in detail.lines() {
                    println!("  {line}");
                }
            }
            Some(detail) => println!("{}: {} ({detail})", post.slug, post.action),
            None => println!("{}: {}", post.slug, post.action),
        }
    }
    for error in &report.errors {
        println!("error: {error}");
    }
}

fn print_card_report(report: &CardReport) {
    println!("card pass");
    println!("capture_command: {}", report.capture_command);
    println!("capture_available: {}", format_flag(report.capture_available));
    println!("examined: {}", report.examined);
    println!("captured: {}", report.captured);
    println!("skipped: {}", report.skipped);
    for post in &report.posts {
        match &post.detail {
            Some(detail) => println!("{}: {} ({detail})", post.slug, post.action),
            None => println!("{}: {}", post.slug, post.action),
        }
    }
    for error in &report.errors {
        println!("error: {error}");
    }
}

fn resolve_runtime(runtime: &RuntimeOptions) -> Result<(ResolvedPaths, BlogConfig)> {
    dotenvy::dotenv().ok();

    let context = ResolutionContext::from_process()?;
    let overrides = PathOverrides {
        project_root: runtime.project_root.clone(),
        config: runtime.config.clone(),
    };

    let initial = resolve_paths(&context, &overrides)?;
    let project_env = initial.project_root.join(".env");
    if project_env.exists() {
        let _ = dotenvy::from_path_override(&project_env);
    }

    let paths = resolve_paths(&context, &overrides)?;
    let config = load_config(&paths.config_path)?;
    Ok((paths, config))
}

fn render_all_flag_set() -> bool {
    env::var(RENDER_ALL_ENV)
        .map(|value| !value.trim().is_empty())
        .unwrap_or(false)
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_diagnostics(runtime: &RuntimeOptions, paths: &ResolvedPaths) {
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", paths.diagnostics());
    }
}

fn format_flag(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}
