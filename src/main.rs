//! chorus CLI - Ask several LLMs the same question and compare answers, cost and usage.

use anyhow::{Context, Result, bail};
use chorus::{
    AggregatedRecord, ChatResult, Comparison, ComparisonPipeline, Config, GatewayClient,
    GenerationParams, Model, credential_provider,
};
use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{Level, info, warn};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "chorus")]
#[command(version)]
#[command(about = "Send one prompt to several LLMs through an OpenAI-compatible gateway")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file (built-in defaults when omitted)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List the gateway's model catalog
    Models {
        /// Only show models whose name or id contains this text
        #[arg(short, long)]
        filter: Option<String>,
    },

    /// Send a prompt to one or more models
    Ask {
        /// Model id to query (repeatable)
        #[arg(short, long = "model", required = true)]
        models: Vec<String>,

        /// System prompt (defaults to the configured one)
        #[arg(short, long)]
        system: Option<String>,

        /// Sampling temperature, 0.0 to 1.0
        #[arg(short, long)]
        temperature: Option<f64>,

        /// Maximum completion tokens
        #[arg(long, allow_negative_numbers = true)]
        max_tokens: Option<i64>,

        /// Directory to write the JSON export into
        #[arg(short, long)]
        export: Option<PathBuf>,

        /// The prompt
        input: String,
    },

    /// Validate configuration and credential
    Validate,

    /// Show example configuration
    Example,
}

fn setup_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set subscriber: {e}");
    }
}

fn print_example_config() {
    let example = r#"# chorus configuration file

[gateway]
base_url = "https://openrouter.ai/api/v1"
# API key; ${VAR} placeholders are expanded on every request.
# When unset, the variables below are looked up instead.
# api_key = "${OPENROUTER_API_KEY}"
api_key_env = ["OPENAI_API_KEY", "OPENROUTER_API_KEY"]
# Dotenv file re-read on every request (default: config/.env, else .env)
# dotenv_path = ".env"
chat_timeout_secs = 180
metadata_timeout_secs = 60
referer = "http://localhost:3000"
title = "chorus"

[defaults]
system_prompt = "You are a helpful assistant."
temperature = 0.0
max_tokens = 2048
"#;
    println!("{example}");
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = Config::load(path)
        .with_context(|| format!("Failed to load config from {path:?}"))?;
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn build_client(config: &Config) -> Result<Arc<GatewayClient>> {
    let credentials = credential_provider(&config.gateway);
    let client = GatewayClient::new(&config.gateway, credentials)
        .context("Failed to create gateway client")?;
    Ok(Arc::new(client))
}

/// Map requested ids onto catalog entries, preserving request order.
fn resolve_models(catalog: Vec<Model>, requested: &[String]) -> Result<Vec<Model>> {
    let by_id: HashMap<String, Model> = catalog.into_iter().map(|m| (m.id.clone(), m)).collect();
    let unknown: Vec<&str> = requested
        .iter()
        .filter(|id| !by_id.contains_key(*id))
        .map(String::as_str)
        .collect();
    if !unknown.is_empty() {
        bail!(
            "Unknown model id(s): {} (run `chorus models` to list available models)",
            unknown.join(", ")
        );
    }
    Ok(requested.iter().filter_map(|id| by_id.get(id).cloned()).collect())
}

/// Render `n` with comma thousands separators.
fn group_thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

fn print_models_table(models: &[Model]) {
    println!(
        "| Name | ID | Prompt price | Completion price | Context length | Max completion tokens | Tokenizer | Instruct type |"
    );
    println!("|---|---|---|---|---|---|---|---|");
    for model in models {
        println!(
            "| {} | {} | ${:.10} | ${:.10} | {} | {} | {} | {} |",
            model.name,
            model.id,
            model.pricing_prompt,
            model.pricing_completion,
            group_thousands(model.context_length),
            group_thousands(model.max_completion_tokens),
            model.tokenizer,
            model.instruct_type.as_deref().unwrap_or("-"),
        );
    }
}

fn print_record(record: &AggregatedRecord) {
    println!("\n=== {} ===", record.model);
    match &record.chat {
        ChatResult::Response(response) => {
            println!("{}", response.answer);
            println!("---");
            println!("Finish:      {}", response.finish_reason);
            println!("Latency:     {} ms", response.elapsed_ms);
        }
        ChatResult::Failure(failure) => {
            match failure.status {
                Some(status) => println!("✗ Error ({}, HTTP {status}): {}", failure.kind, failure.message),
                None => println!("✗ Error ({}): {}", failure.kind, failure.message),
            }
            return;
        }
    }

    match record.cost_and_stats() {
        Some(stats) => {
            println!("Cost:        ${:.6}", stats.cost);
            println!(
                "Tokens:      {} prompt + {} completion = {}",
                stats.tokens_prompt,
                stats.tokens_completion,
                stats.tokens_total()
            );
            println!(
                "Native:      {} prompt + {} completion = {}",
                stats.native_tokens_prompt,
                stats.native_tokens_completion,
                stats.native_tokens_total()
            );
        }
        None => println!("Cost and statistics not available for this response"),
    }
}

fn print_summary(comparison: &Comparison) {
    let summary = &comparison.summary;
    println!("\n=== Comparison Complete ===");
    println!("Models:      {}", summary.total_models);
    println!("Responses:   {}", summary.responses);
    println!("Failures:    {}", summary.failures);
    println!(
        "Stats:       {} available, {} unavailable",
        summary.stats_available, summary.stats_unavailable
    );
    println!("Total cost:  ${:.6}", summary.total_cost_usd);
    println!("Runtime:     {:.1}s", summary.runtime_secs);
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    match cli.command {
        Commands::Example => {
            print_example_config();
        }

        Commands::Validate => {
            let config = load_config(cli.config.as_deref())?;
            let credentials = credential_provider(&config.gateway);
            credentials
                .api_key()
                .with_context(|| format!("Failed to resolve API key from {}", credentials.describe()))?;

            info!("Configuration is valid");
            info!("  Gateway: {}", config.gateway.base_url);
            info!("  Credential: {}", credentials.describe());
            if config.gateway.api_key.is_none() {
                info!("  Dotenv: {}", config.gateway.resolve_dotenv_path().display());
            }
            info!(
                "  Timeouts: chat {}s, metadata {}s",
                config.gateway.chat_timeout_secs, config.gateway.metadata_timeout_secs
            );
            info!(
                "  Defaults: temperature {}, max tokens {}",
                config.defaults.temperature, config.defaults.max_tokens
            );
        }

        Commands::Models { filter } => {
            let config = load_config(cli.config.as_deref())?;
            let client = build_client(&config)?;

            let mut models = client
                .list_models()
                .await
                .context("Failed to fetch model catalog")?;
            if let Some(filter) = filter {
                let needle = filter.to_lowercase();
                models.retain(|m| {
                    m.name.to_lowercase().contains(&needle) || m.id.to_lowercase().contains(&needle)
                });
            }
            Model::sort_by_name(&mut models);

            print_models_table(&models);
            info!(count = models.len(), "Listed models");
        }

        Commands::Ask {
            models,
            system,
            temperature,
            max_tokens,
            export,
            input,
        } => {
            let config = load_config(cli.config.as_deref())?;

            let params = GenerationParams::new(
                temperature.unwrap_or(config.defaults.temperature),
                max_tokens.unwrap_or(config.defaults.max_tokens as i64),
            )
            .context("Invalid generation parameters")?;
            let system_prompt = system.unwrap_or_else(|| config.defaults.system_prompt.clone());

            let client = build_client(&config)?;
            let catalog = client
                .list_models()
                .await
                .context("Failed to fetch model catalog")?;
            let selected = resolve_models(catalog, &models)?;

            for model in &selected {
                if model.exceeds_completion_ceiling(params.max_tokens) {
                    warn!(
                        model = %model.id,
                        max_tokens = params.max_tokens,
                        ceiling = model.max_completion_tokens,
                        "Max tokens exceed the model's completion limit"
                    );
                }
            }

            let pipeline = ComparisonPipeline::new(client).with_progress(true);
            let comparison = pipeline
                .run(&selected, &system_prompt, &input, params)
                .await
                .context("Comparison failed")?;

            for record in &comparison.records {
                print_record(record);
            }
            print_summary(&comparison);

            if let Some(dir) = export {
                let path = comparison
                    .write_json(&dir)
                    .with_context(|| format!("Failed to export to {dir:?}"))?;
                println!("Output:      {path:?}");
            }
        }
    }

    Ok(())
}
