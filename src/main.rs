mod cli;

use webpforge::{
    cleanup, config,
    pipeline::{PipelineSettings, TaskPipeline},
    progress::ProgressBroker,
    server::{self, auth, AppContext},
    state::{CompressionConfig, TaskStatus, TaskStore},
};
use webpforge_av::{Codec, Preset, ToolRegistry, WebpTools};

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn build_codec(config: &config::Config) -> Result<Arc<dyn Codec>> {
    let registry = ToolRegistry::discover(&config.tools);
    registry.validate()?;
    Ok(Arc::new(WebpTools::new(Arc::new(registry))))
}

async fn start_server(
    host: Option<String>,
    port: Option<u16>,
    config_path: Option<&Path>,
) -> Result<()> {
    let mut config = config::load_config_or_default(config_path)?;

    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
    config::validate_config(&config)?;

    tracing::info!("Starting webpforge server");
    tracing::info!(
        "Server will listen on {}:{}",
        config.server.host,
        config.server.port
    );

    tokio::fs::create_dir_all(&config.tasks.upload_dir).await?;
    tokio::fs::create_dir_all(&config.tasks.output_dir).await?;

    let codec = build_codec(&config)?;
    let ctx = AppContext::new(config, codec);

    ctx.processor.start();
    let cleanup_handle = cleanup::start_cleanup_task(
        ctx.store.clone(),
        ctx.config.tasks.retention(),
        Duration::from_secs(ctx.config.tasks.cleanup_interval_secs.max(1)),
    );

    let server_result = server::start_server(ctx.clone()).await;

    // HTTP first, then workers, then live subscribers.
    tracing::info!("Shutting down...");
    cleanup_handle.abort();
    ctx.processor.stop().await;
    ctx.broker.shutdown_all();

    server_result
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "webpforge=trace,webpforge_av=trace,tower_http=debug".to_string()
        } else {
            "webpforge=debug,webpforge_av=info,tower_http=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .init();

    match cli.command {
        Commands::Start { host, port } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(start_server(host, port, cli.config.as_deref()))
        }
        Commands::Compress {
            input,
            output,
            quality,
            preset,
            lossless,
            sequential,
        } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(compress_file(
                cli.config.as_deref(),
                CompressArgs {
                    input,
                    output,
                    quality,
                    preset,
                    lossless,
                    sequential,
                },
            ))
        }
        Commands::CheckTools => check_tools(cli.config.as_deref()),
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::GenerateToken => {
            println!("{}", auth::generate_token());
            Ok(())
        }
        Commands::Version => {
            println!("webpforge {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

struct CompressArgs {
    input: PathBuf,
    output: Option<PathBuf>,
    quality: Option<u8>,
    preset: Option<String>,
    lossless: bool,
    sequential: bool,
}

async fn compress_file(config_path: Option<&Path>, args: CompressArgs) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;

    if !args.input.is_file() {
        anyhow::bail!("Input file does not exist: {:?}", args.input);
    }

    let quality = args.quality.unwrap_or(config.processing.default_quality);
    if quality > 100 {
        anyhow::bail!("Quality must be 0-100, got {}", quality);
    }

    let mut compression = CompressionConfig::new(quality);
    compression.preset = match args.preset.as_deref() {
        Some(name) => Preset::from_str(name)?,
        None => config.processing.default_preset,
    };
    compression.lossless = args.lossless;
    compression.enable_parallel = config.processing.enable_parallel && !args.sequential;
    compression.max_concurrency = config.processing.frame_workers;

    let output = args.output.unwrap_or_else(|| {
        let stem = args
            .input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "output".to_string());
        args.input
            .with_file_name(format!("{stem}_compressed_{quality}.webp"))
    });

    let codec = build_codec(&config)?;
    let store = Arc::new(TaskStore::new());
    let broker = Arc::new(ProgressBroker::new(config.tasks.progress_buffer));
    let pipeline = TaskPipeline::new(
        codec,
        store.clone(),
        broker.clone(),
        PipelineSettings {
            temp_dir: config.tasks.temp_dir.clone(),
            default_frame_workers: config.processing.frame_workers,
            timeout: config.tasks.timeout(),
        },
    );

    let task = store.create(args.input, output, compression);
    let Some(task) = store.claim(task.id)? else {
        anyhow::bail!("Task {} could not be started", task.id);
    };

    let mut subscription = broker.subscribe(task.id);
    let printer = tokio::spawn(async move {
        while let Some(event) = subscription.recv().await {
            println!("[{:>5.1}%] {}", event.progress, event.message);
        }
    });

    let task = pipeline.run(task, CancellationToken::new()).await;
    broker.shutdown_all();
    let _ = printer.await;

    match (task.status, task.result) {
        (TaskStatus::Completed, Some(result)) => {
            println!("\nOutput: {}", task.output_file.display());
            println!(
                "Size: {} -> {} bytes ({:.1}%)",
                result.original_size, result.compressed_size, result.compression_ratio
            );
            println!(
                "Frames: {} in {} ms with {} worker(s)",
                result.frames_processed, result.processing_time_ms, result.parallel_workers
            );
            Ok(())
        }
        _ => anyhow::bail!(
            "Compression failed: {}",
            task.error.unwrap_or_else(|| task.message.clone())
        ),
    }
}

fn check_tools(config_path: Option<&Path>) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;
    println!("Checking external tools...\n");

    let tools = ToolRegistry::discover(&config.tools).check_all();
    let mut all_ok = true;

    for tool in &tools {
        let status = if tool.available {
            "✓"
        } else {
            all_ok = false;
            "✗"
        };

        print!("{} {}", status, tool.name);

        if let Some(ref version) = tool.version {
            print!(" ({})", version.lines().next().unwrap_or(""));
        }

        if let Some(ref path) = tool.path {
            print!(" - {}", path.display());
        }

        println!();
    }

    println!();
    if all_ok {
        println!("All required tools are available!");
    } else {
        println!("Some tools are missing. Install libwebp (webpmux, cwebp) to process tasks.");
    }

    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            let config = config::load_config(p)?;
            println!("✓ Configuration is valid");
            println!("  Server: {}:{}", config.server.host, config.server.port);
            println!("  Auth enabled: {}", config.server.auth.enabled);
            println!(
                "  Task workers: {} (queue {})",
                config.tasks.workers,
                config.tasks.workers * 2
            );
            println!("  Frame workers: {}", config.processing.frame_workers);
            println!("  Task timeout: {}s", config.tasks.timeout_secs);
            println!("  Retention: {}h", config.tasks.retention_hours);
        }
        None => {
            println!("No config file specified, using defaults");
            let config = config::Config::default();
            println!("Default config:");
            println!("  Server: {}:{}", config.server.host, config.server.port);
        }
    }

    Ok(())
}
