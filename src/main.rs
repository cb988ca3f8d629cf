use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "appforge")]
#[command(version, about = "Turn natural-language app requests into generated file sets")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Directory holding `.appforge/appforge.toml` (defaults to the current directory)
    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Generate an app from a natural-language request
    Generate {
        /// What to build, e.g. "an online store for handmade soap"
        prompt: String,
        /// Run the full five-phase pipeline instead of a single generation call
        #[arg(long)]
        pipeline: bool,
        /// Directory to write generated files into
        #[arg(short, long, default_value = "appforge-out")]
        out: PathBuf,
        /// Use the built-in scripted model instead of the model CLI
        #[arg(long)]
        offline: bool,
    },
    /// Print the application domain detected for a request
    Classify {
        text: String,
        /// Also print the keyword hits per domain
        #[arg(long)]
        scores: bool,
    },
    /// Recover JSON from malformed model output
    Repair {
        /// Input file (reads stdin if omitted)
        file: Option<PathBuf>,
    },
    /// Run the HTTP job server
    Serve {
        #[arg(short, long)]
        port: Option<u16>,
        #[arg(long)]
        host: Option<String>,
        /// Use the built-in scripted model instead of the model CLI
        #[arg(long)]
        offline: bool,
    },
    /// View, validate or initialize configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone, Copy)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Write a default appforge.toml
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    appforge::logging::init_tracing(cli.verbose, cli.log_json)?;

    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    match cli.command {
        Commands::Generate {
            prompt,
            pipeline,
            out,
            offline,
        } => {
            let args = cmd::GenerateArgs {
                prompt,
                pipeline,
                out,
                offline,
            };
            cmd::cmd_generate(&project_dir, args, cli.verbose).await?;
        }
        Commands::Classify { text, scores } => cmd::cmd_classify(&project_dir, &text, scores)?,
        Commands::Repair { file } => cmd::cmd_repair(file.as_deref())?,
        Commands::Serve {
            port,
            host,
            offline,
        } => cmd::cmd_serve(&project_dir, port, host, offline).await?,
        Commands::Config { command } => cmd::cmd_config(&project_dir, command)?,
    }

    Ok(())
}
