use anyhow::{Context, Result};
use clap::Parser;
use weather_pipeline::cli::{Cli, Commands, PublishArgs, ScoreArgs};
use weather_pipeline::config::PipelineConfig;
use weather_pipeline::fetch::ReqwestSource;
use weather_pipeline::pipeline::{score_file, Pipeline};
use weather_pipeline::publish::S3ObjectStore;
use weather_pipeline::scoring::stats::render_table;

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = PipelineConfig::from_env(cli.globals.overrides())?;
    tracing::debug!(?config, "loaded configuration");

    let result = match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(&config),
        Commands::Publish(args) => publish(&config, args),
        Commands::Score(args) => score(&config, args),
    };
    if let Err(err) = &result {
        tracing::error!(error = %format!("{err:#}"), "weather pipeline failed");
    }
    result
}

fn connect(config: &PipelineConfig) -> Result<(ReqwestSource, S3ObjectStore)> {
    let http = ReqwestSource::new()?;
    let objects = S3ObjectStore::connect(&config.region, config.endpoint_url.as_deref())
        .context("failed to set up S3 client")?;
    Ok((http, objects))
}

fn run(config: &PipelineConfig) -> Result<()> {
    let (http, objects) = connect(config)?;
    let summary = Pipeline::new(config, &http, &objects).run(&mut std::thread::sleep)?;
    println!("{}", summary.render());
    Ok(())
}

fn publish(config: &PipelineConfig, args: PublishArgs) -> Result<()> {
    let artifact = args
        .artifact
        .unwrap_or_else(|| config.processed_csv_path.clone());
    let (http, objects) = connect(config)?;
    let (publication, verification, warnings) =
        Pipeline::new(config, &http, &objects).publish_existing(&artifact)?;
    println!("Public URL: {}", publication.url);
    println!("sha256: {} ({} bytes)", publication.sha256_short, publication.bytes);
    match verification {
        Some(result) => {
            println!("Verify GET: {} - {} bytes", result.status, result.bytes);
            println!("First bytes:\n{}", result.snippet);
        }
        None => println!("Verify GET: FAIL"),
    }
    for warning in warnings {
        println!("warning: {warning}");
    }
    Ok(())
}

fn score(config: &PipelineConfig, args: ScoreArgs) -> Result<()> {
    let (counts, columns) = score_file(&args.input, &args.output, config.contamination, config.seed)
        .with_context(|| format!("failed to score {}", args.input.display()))?;
    println!("{}", render_table(&columns));
    println!(
        "Counts: anomalous={} normal={}",
        counts.anomalies, counts.normals
    );
    println!("Saved: {}", args.output.display());
    Ok(())
}
