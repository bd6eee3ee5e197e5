use crate::config::Config;
use crate::log_debug;
use crate::orchestrator::{Generation, Orchestrator, ProviderResult};
use crate::pricing::{PricingTable, format_cost};
use crate::providers::Provider;
use crate::types::{Answer, GenerationMode, ImageAttachment, Message};
use crate::usage::{EntitlementService, LimitKind, UsageAggregate, UsageCheck};

use anyhow::{Context, Result, anyhow, bail};
use clap::builder::{Styles, styling::AnsiColor};
use clap::{Parser, Subcommand, crate_version};
use colored::Colorize;
use std::path::{Path, PathBuf};

const LOG_FILE: &str = "homework-solver-debug.log";
const LOCAL_USER: &str = "local";

/// CLI structure defining the available commands and global arguments
#[derive(Parser)]
#[command(
    author,
    version = crate_version!(),
    about = "Homework solver: answers from several LLM providers, metered per user",
    after_help = get_dynamic_help(),
    styles = get_styles(),
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Use a specific configuration file
    #[arg(long = "config", global = true, help = "Path to a configuration file")]
    pub config: Option<PathBuf>,

    /// Log debug messages to a file
    #[arg(short = 'l', long = "log", global = true, help = "Log debug messages to a file")]
    pub log: bool,

    /// Specify a custom log file path
    #[arg(long = "log-file", global = true, help = "Specify a custom log file path")]
    pub log_file: Option<PathBuf>,
}

/// Enumeration of available subcommands
#[derive(Subcommand)]
pub enum Commands {
    /// Answer a homework question
    #[command(
        about = "Answer a homework question",
        long_about = "Check the user's entitlement, ask the configured providers, print the answer and record usage."
    )]
    Solve {
        /// The question text
        question: String,

        /// Generation mode
        #[arg(short, long, default_value = "regular", help = "fast, regular or expert")]
        mode: GenerationMode,

        /// Attach an image of the problem
        #[arg(short, long, help = "Attach an image of the problem")]
        image: Option<PathBuf>,

        /// User to meter the generation against
        #[arg(short, long, default_value = LOCAL_USER)]
        user: String,

        /// Print every provider's answer, not just the primary one
        #[arg(long, help = "Print every provider's answer")]
        all: bool,

        /// Print the full generation as JSON
        #[arg(long, help = "Print the full generation as JSON")]
        json: bool,
    },

    /// Show a user's entitlement and today's usage
    #[command(about = "Show a user's entitlement and today's usage")]
    Usage {
        user: String,

        /// Check against a specific mode
        #[arg(short, long)]
        mode: Option<GenerationMode>,
    },

    /// Show the pricing table
    #[command(about = "Show per-million-token prices")]
    Pricing {
        /// Show a single model
        model: Option<String>,
    },
}

fn get_styles() -> Styles {
    Styles::styled()
        .header(AnsiColor::Magenta.on_default().bold())
        .usage(AnsiColor::Cyan.on_default().bold())
        .literal(AnsiColor::Green.on_default().bold())
        .placeholder(AnsiColor::Yellow.on_default())
        .valid(AnsiColor::Blue.on_default().bold())
        .invalid(AnsiColor::Red.on_default().bold())
        .error(AnsiColor::Red.on_default().bold())
}

/// Parse the command-line arguments
pub fn parse_args() -> Cli {
    Cli::parse()
}

fn get_dynamic_help() -> String {
    let providers = Provider::ALL
        .iter()
        .map(|p| format!("{}", p.name().bold()))
        .collect::<Vec<_>>()
        .join(" • ");
    format!("\nSupported providers: {providers}")
}

/// Main function to parse arguments and handle the command
pub async fn main() -> Result<()> {
    let cli = parse_args();

    if cli.log {
        crate::logger::init().map_err(|e| anyhow!(e))?;
        crate::logger::enable_logging();
        let log_file = cli
            .log_file
            .clone()
            .unwrap_or_else(|| PathBuf::from(LOG_FILE));
        crate::logger::set_log_file(&log_file)
            .with_context(|| format!("Failed to open log file {}", log_file.display()))?;
    } else {
        crate::logger::disable_logging();
    }

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    handle_command(cli.command, &config).await
}

/// Dispatch a parsed subcommand
pub async fn handle_command(command: Commands, config: &Config) -> Result<()> {
    match command {
        Commands::Solve {
            question,
            mode,
            image,
            user,
            all,
            json,
        } => {
            let options = SolveOptions {
                mode,
                image,
                user,
                all,
                json,
            };
            handle_solve(config, question, options).await
        }
        Commands::Usage { user, mode } => handle_usage(config, &user, mode).await,
        Commands::Pricing { model } => handle_pricing(model.as_deref()),
    }
}

struct SolveOptions {
    mode: GenerationMode,
    image: Option<PathBuf>,
    user: String,
    all: bool,
    json: bool,
}

async fn handle_solve(config: &Config, question: String, options: SolveOptions) -> Result<()> {
    let service = EntitlementService::from_config(config).context("Failed to open usage store")?;
    let check = service.check_limit(&options.user, Some(options.mode)).await;
    if !check.allowed {
        bail!(
            "{}",
            check
                .reason
                .unwrap_or_else(|| "Generation not allowed".to_string())
        );
    }

    let orchestrator = Orchestrator::from_config(config).with_context(|| {
        format!(
            "Set an API key for at least one provider ({})",
            Provider::ALL
                .iter()
                .map(|p| p.api_key_env())
                .collect::<Vec<_>>()
                .join(", ")
        )
    })?;

    let mut message = Message::user(question);
    if let Some(path) = &options.image {
        message = message.with_image(load_image(path)?);
    }

    log_debug!(
        "Solving in {} mode with {:?} for {}",
        options.mode,
        orchestrator.providers(),
        options.user
    );
    let generation = orchestrator.generate(options.mode, &[message]).await?;

    if generation.all_failed() {
        print_generation(&generation, true, service.pricing());
        bail!("Every provider failed");
    }

    let usage = generation.token_usage();
    service
        .record_generation(&options.user, options.mode, &usage)
        .await;

    if options.json {
        println!("{}", serde_json::to_string_pretty(&generation)?);
    } else {
        print_generation(&generation, options.all, service.pricing());
    }
    Ok(())
}

fn load_image(path: &Path) -> Result<ImageAttachment> {
    let data =
        std::fs::read(path).with_context(|| format!("Failed to read image {}", path.display()))?;
    Ok(ImageAttachment::new(
        ImageAttachment::media_type_for_path(path),
        data,
    ))
}

async fn handle_usage(config: &Config, user: &str, mode: Option<GenerationMode>) -> Result<()> {
    let service = EntitlementService::from_config(config).context("Failed to open usage store")?;
    let check = service.check_limit(user, mode).await;
    print_check(user, &check);

    match service.today_usage(user).await? {
        Some(aggregate) => print_aggregate(&aggregate),
        None => println!("{}", "No usage recorded today".dimmed()),
    }
    Ok(())
}

fn handle_pricing(model: Option<&str>) -> Result<()> {
    let table = PricingTable::standard();
    if let Some(model) = model {
        let price = table.price(model)?;
        println!("{}", model.bold());
        println!("  input     ${:.2} / 1M tokens", price.input);
        println!("  output    ${:.2} / 1M tokens", price.output);
        if let Some(thinking) = price.thinking {
            println!("  thinking  ${thinking:.2} / 1M tokens");
        }
        return Ok(());
    }

    println!(
        "{:<28} {:>10} {:>10} {:>10}",
        "model".bold(),
        "input".bold(),
        "output".bold(),
        "thinking".bold()
    );
    for (name, price) in table.models() {
        let thinking = price
            .thinking
            .map_or_else(|| "-".to_string(), |t| format!("{t:.2}"));
        println!(
            "{:<28} {:>10.2} {:>10.2} {:>10}",
            name, price.input, price.output, thinking
        );
    }
    for (legacy, successor) in table.aliases() {
        println!("{}", format!("{legacy} → {successor}").dimmed());
    }
    Ok(())
}

fn print_generation(generation: &Generation, all: bool, pricing: &PricingTable) {
    if all {
        for result in &generation.providers {
            print_provider_result(result, result.provider == generation.primary_provider);
        }
    } else {
        print_answer(&generation.primary);
    }

    match pricing.total_cost(&generation.token_usage()) {
        Ok(cost) => println!(
            "\n{} {} ({} mode, primary: {})",
            "Cost:".dimmed(),
            format_cost(cost),
            generation.mode,
            generation.primary_provider
        ),
        Err(e) => println!("\n{} {}", "Cost unavailable:".yellow(), e),
    }
}

fn print_provider_result(result: &ProviderResult, primary: bool) {
    let marker = if primary { "★" } else { "•" };
    println!(
        "\n{} {} {} {}",
        marker.magenta(),
        result.provider.name().bold(),
        result.model.cyan(),
        format!("{}ms", result.latency_ms).dimmed()
    );
    if let Some(failure) = &result.error {
        println!("  {} {}", failure.code.to_string().red(), failure.message);
        return;
    }
    print_answer(&result.answer);
}

fn print_answer(answer: &Answer) {
    println!("{}", answer.short_answer.bold().green());
    for (i, step) in answer.steps.iter().enumerate() {
        println!("  {}. {}", i + 1, step);
    }
    for warning in &answer.warnings {
        println!("  {} {}", "⚠".yellow(), warning.yellow());
    }
    println!(
        "  {}",
        format!(
            "confidence {:?} via {:?}",
            answer.confidence, answer.parse_method
        )
        .dimmed()
    );
}

fn print_check(user: &str, check: &UsageCheck) {
    let status = if check.allowed {
        "allowed".green().bold()
    } else {
        "denied".red().bold()
    };
    let plan = check
        .plan
        .map_or_else(|| "unknown".to_string(), |p| p.to_string());
    println!("{} on {} plan: {}", user.bold(), plan.cyan(), status);

    let render = |value: f64| match check.limit_kind {
        LimitKind::Cost => format_cost(value),
        _ => format!("{value}"),
    };
    match (check.limit_kind, check.limit) {
        (LimitKind::Unlimited, _) | (_, None) => println!("  unlimited"),
        (_, Some(limit)) => {
            println!("  used      {} of {}", render(check.used), render(limit));
            if let Some(remaining) = check.remaining {
                println!("  remaining {}", render(remaining));
            }
        }
    }
    if let Some(reason) = &check.reason {
        println!("  {}", reason.yellow());
    }
}

fn print_aggregate(aggregate: &UsageAggregate) {
    println!(
        "\nToday ({}): {} solves (fast {}, regular {}, expert {}), {}",
        aggregate.date,
        aggregate.solves(),
        aggregate.solves_fast,
        aggregate.solves_regular,
        aggregate.solves_expert,
        format_cost(aggregate.total_cost)
    );
    for model in &aggregate.models {
        println!(
            "  {:<10} {:<24} in {:>8} out {:>8} {}",
            model.provider.name(),
            model.model,
            model.usage.input_tokens,
            model.usage.output_tokens,
            format_cost(model.cost)
        );
    }
}
