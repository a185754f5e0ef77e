mod cli;
mod context;
mod engine;
mod media;
mod server;
mod state;
mod ui;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use context::AppContext;
use engine::sdcpp::DEFAULT_BINARY;
use state::paths::AppPaths;

#[derive(Parser)]
#[command(name = "kami")]
#[command(about = "Kami - Local SDXL Station: generate, browse and serve images")]
#[command(version)]
struct Cli {
    /// Installation root holding the library, settings and images
    #[arg(long, global = true, env = "KAMI_HOME")]
    root: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    /// stable-diffusion.cpp executable
    #[arg(long, global = true, env = "KAMI_SD_BINARY", default_value = DEFAULT_BINARY)]
    sd_binary: PathBuf,

    /// CPU threads for stable-diffusion.cpp (0 or unset lets it decide)
    #[arg(long, global = true, env = "KAMI_THREADS")]
    threads: Option<u32>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Open the desktop app (default)
    Gui {
        /// Also serve the HTTP API on this port while the window is open
        #[arg(long)]
        api_port: Option<u16>,
    },

    /// Serve the HTTP API
    Serve {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        #[arg(long, default_value_t = 8000)]
        port: u16,
    },

    /// Generate one image from a text prompt
    Generate(cli::GenerateArgs),

    /// Menu-driven terminal session
    Interactive,

    /// Import PNGs written outside Kami into the library
    Rescan {
        /// Folder to scan; the output folder by default
        dir: Option<PathBuf>,
    },

    /// Fix moved image paths and drop records whose files are gone
    Repair,
}

fn init_logging(verbose: bool) {
    let default = if verbose { "kami=debug,info" } else { "kami=info,warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn serve_blocking(ctx: AppContext, host: &str, port: u16) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("could not start the async runtime")?;

    runtime
        .block_on(server::serve(ctx, host, port))
        .with_context(|| format!("API server on {}:{} failed", host, port))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let root = cli.root.unwrap_or_else(AppPaths::default_root);
    info!("📁 Using {}", root.display());

    let ctx = AppContext::bootstrap(root, cli.sd_binary, cli.threads)
        .context("Failed to initialize the library. Check permissions and disk space.")?;

    match cli.command.unwrap_or(Command::Gui { api_port: None }) {
        Command::Gui { api_port } => {
            if let Some(port) = api_port {
                let api_ctx = ctx.clone();
                std::thread::spawn(move || {
                    if let Err(e) = serve_blocking(api_ctx, "0.0.0.0", port) {
                        error!("{:#}", e);
                    }
                });
            }
            ui::run(ctx).context("desktop app failed")?;
        }
        Command::Serve { host, port } => serve_blocking(ctx, &host, port)?,
        Command::Generate(args) => {
            cli::generate(&ctx, &args)?;
        }
        Command::Interactive => cli::interactive::run(ctx)?,
        Command::Rescan { dir } => {
            cli::rescan(&ctx, dir.as_deref())?;
        }
        Command::Repair => cli::repair(&ctx)?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_default_command_and_globals() {
        let cli = Cli::try_parse_from(["kami", "--root", "/tmp/kami", "-v", "--threads", "6"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.threads, Some(6));
        assert_eq!(cli.root, Some(PathBuf::from("/tmp/kami")));
        assert!(cli.verbose);
    }

    #[test]
    fn test_serve_defaults() {
        let cli = Cli::try_parse_from(["kami", "serve", "--port", "9000"]).unwrap();
        match cli.command {
            Some(Command::Serve { host, port }) => {
                assert_eq!(host, "127.0.0.1");
                assert_eq!(port, 9000);
            }
            _ => panic!("expected serve"),
        }
    }

    #[test]
    fn test_generate_arguments() {
        let cli = Cli::try_parse_from(["kami", "generate", "a cat", "--steps", "20", "--refiner"]).unwrap();
        match cli.command {
            Some(Command::Generate(args)) => {
                assert_eq!(args.prompt, "a cat");
                assert_eq!(args.steps, Some(20));
                assert!(args.refiner);
            }
            _ => panic!("expected generate"),
        }
    }
}
