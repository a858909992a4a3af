use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "webpforge")]
#[command(author, version, about = "Animated WebP recompression service")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP API and task workers
    Start {
        /// Host to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Recompress one animation without starting the server
    Compress {
        /// Animated WebP to recompress
        #[arg(required = true)]
        input: PathBuf,

        /// Output file (defaults to <stem>_compressed_<quality>.webp next to the input)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Encoder quality, 0-100
        #[arg(short, long)]
        quality: Option<u8>,

        /// cwebp preset
        #[arg(long)]
        preset: Option<String>,

        /// Encode frames losslessly
        #[arg(long)]
        lossless: bool,

        /// Compress frames one at a time
        #[arg(long)]
        sequential: bool,
    },

    /// Check that required external tools are available
    CheckTools,

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },

    /// Generate a random token for the API auth gate
    GenerateToken,

    /// Display version information
    Version,
}
