use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use imageforge_contracts::generation::{GenerationRequest, ProviderKeys};
use imageforge_engine::config::EngineConfig;
use imageforge_engine::dispatch::Dispatcher;
use imageforge_engine::{reference_image_from_path, ImageForge};
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "imageforge", version, about = "Prompt-to-image dispatcher with signed storage links")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Generate an image, store it, and print the signed URLs.
    Generate(RequestArgs),
    /// Print the vendor request `generate` would send, without sending it.
    Preview(RequestArgs),
    /// List the supported models.
    Models,
}

#[derive(Debug, Args)]
struct RequestArgs {
    #[arg(long)]
    prompt: String,
    #[arg(long)]
    uid: String,
    #[arg(long)]
    model: String,
    #[arg(long)]
    reference: Option<PathBuf>,
    /// Spend platform credits; uses the operator's vendor keys.
    #[arg(long)]
    use_credits: bool,
    #[arg(long)]
    credits: Option<u64>,
    #[arg(long)]
    openai_key: Option<String>,
    #[arg(long)]
    fireworks_key: Option<String>,
    #[arg(long)]
    stability_key: Option<String>,
    #[arg(long)]
    bucket_dir: Option<PathBuf>,
    #[arg(long)]
    events: Option<PathBuf>,
}

fn main() {
    init_tracing();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("imageforge error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Generate(args) => run_generate(args),
        Command::Preview(args) => run_preview(args),
        Command::Models => run_models(),
    }
}

fn run_generate(args: RequestArgs) -> Result<i32> {
    let forge = ImageForge::from_config(engine_config(&args)?)?;
    let request = generation_request(&args)?;
    let result = forge.generate(request)?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(0)
}

fn run_preview(args: RequestArgs) -> Result<i32> {
    let forge = ImageForge::from_config(engine_config(&args)?)?;
    let request = generation_request(&args)?;
    let preview = forge.preview(&request)?;
    let rendered = json!({
        "model": preview.model,
        "provider": preview.provider,
        "credential_source": preview.credential_source.as_str(),
        "request": Value::Object(preview.request),
    });
    println!("{}", serde_json::to_string_pretty(&rendered)?);
    Ok(0)
}

fn run_models() -> Result<i32> {
    let config = EngineConfig::from_env()?;
    for spec in Dispatcher::new(config.api_bases).models() {
        println!(
            "{}\t{}\t{}\t{}",
            spec.name(),
            spec.provider,
            spec.vendor_model,
            spec.capabilities.join(",")
        );
    }
    Ok(0)
}

fn engine_config(args: &RequestArgs) -> Result<EngineConfig> {
    let mut config = EngineConfig::from_env()?;
    if let Some(dir) = args.bucket_dir.as_ref() {
        config = config.with_bucket_dir(dir);
    }
    if let Some(events) = args.events.as_ref() {
        config = config.with_events_path(events);
    }
    Ok(config)
}

fn generation_request(args: &RequestArgs) -> Result<GenerationRequest> {
    let mut request = GenerationRequest::new(&args.prompt, &args.uid, &args.model).with_keys(
        ProviderKeys {
            openai: args.openai_key.clone(),
            fireworks: args.fireworks_key.clone(),
            stability: args.stability_key.clone(),
        },
    );
    if args.use_credits {
        request = request.with_credits(args.credits);
    }
    if let Some(path) = args.reference.as_ref() {
        let reference = reference_image_from_path(path)
            .with_context(|| format!("failed loading reference image {}", path.display()))?;
        request = request.with_reference(reference);
    }
    Ok(request)
}
