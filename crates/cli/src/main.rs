//! Rigger CLI - resolve, bootstrap and run pinned external tools
//! Composition root: wires the system and fetch adapters into the ToolInvoker

mod logging;
mod settings;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tabled::{Table, Tabled};
use tracing::{debug, info};

use rigger_core::application::ToolInvoker;
use rigger_core::domain::{Platform, ToolSpec};
use rigger_core::port::time_provider::SystemTimeProvider;
use rigger_core::port::{ToolInstaller, ToolLocator};
use rigger_infra_fetch::{ArchiveToolInstaller, CachingArtifactFetcher, HttpArtifactFetcher};
use rigger_infra_system::{PathToolLocator, SubprocessRunner};

use settings::Settings;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "rigger")]
#[command(about = "Resolve, bootstrap and run version-pinned external tools", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Settings file (defaults to rigger.toml in the platform config dir)
    #[arg(long, global = true, env = "RIGGER_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// List configured tools and where they currently resolve
    Tools,

    /// Make a tool available, bootstrapping it if needed
    Ensure {
        /// Tool name as configured under [tools.<name>]
        tool: String,
    },

    /// Run a tool and forward its output and exit code
    Run {
        /// Tool name as configured under [tools.<name>]
        tool: String,

        /// Working directory (default: current directory)
        #[arg(long)]
        cwd: Option<PathBuf>,

        /// Kill the tool after this many milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Fail with the tool's stderr on a non-zero exit
        #[arg(long)]
        check: bool,

        /// Arguments passed to the tool (after `--`)
        #[arg(last = true)]
        args: Vec<String>,
    },
}

#[derive(Tabled)]
struct ToolRow {
    name: String,
    required: String,
    executable: String,
    on_path: String,
    installed: String,
    bootstrap: String,
}

/// Adapters shared by the invoker and the `tools` listing
struct Wiring {
    invoker: ToolInvoker,
    locator: Arc<PathToolLocator>,
    installer: Arc<ArchiveToolInstaller>,
}

fn wire(settings: &Settings) -> Result<Wiring> {
    let time_provider = Arc::new(SystemTimeProvider);

    let mut runner = SubprocessRunner::new(time_provider);
    if let Some(allowlist) = &settings.env_allowlist {
        runner = runner.with_env_allowlist(allowlist.clone());
    }

    let fetcher = CachingArtifactFetcher::new(HttpArtifactFetcher::new(), &settings.cache_dir)
        .context("Failed to prepare archive cache")?;
    let locator = Arc::new(PathToolLocator::new());
    let installer = Arc::new(ArchiveToolInstaller::new(&settings.install_root));

    let invoker = ToolInvoker::new(
        Arc::new(runner),
        locator.clone(),
        Arc::new(fetcher),
        installer.clone(),
        settings.invoker_config(),
    );

    Ok(Wiring {
        invoker,
        locator,
        installer,
    })
}

fn tool_row(spec: &ToolSpec, wiring: &Wiring) -> ToolRow {
    let host = Platform::current();
    let executable = spec.host_executable_name();
    let display = |path: Option<PathBuf>| {
        path.map(|p| p.display().to_string())
            .unwrap_or_else(|| "-".to_string())
    };

    ToolRow {
        name: spec.name().to_string(),
        required: spec.required_version().to_string(),
        on_path: display(wiring.locator.find_on_path(&executable)),
        installed: display(host.and_then(|p| wiring.installer.find_installed(spec, p))),
        executable,
        bootstrap: spec
            .bootstrap_platforms()
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join(", "),
    }
}

fn list_tools(settings: &Settings, wiring: &Wiring) -> Result<()> {
    let specs = settings.tool_specs()?;
    if specs.is_empty() {
        println!("{}", "No tools configured".yellow());
        return Ok(());
    }

    let rows: Vec<ToolRow> = specs.iter().map(|spec| tool_row(spec, wiring)).collect();
    println!("{}", "Configured tools".cyan().bold());
    println!();
    println!("{}", Table::new(rows));
    println!();
    println!("  {} {}", "Install root:".bold(), wiring.installer.install_root().display());
    Ok(())
}

async fn ensure(settings: &Settings, wiring: &Wiring, tool: &str) -> Result<()> {
    let spec = settings.tool_spec(tool)?;
    let path = wiring
        .invoker
        .ensure_available(&spec)
        .await
        .with_context(|| format!("Failed to make '{}' available", tool))?;

    println!(
        "{} {} {} → {}",
        "✓".green().bold(),
        spec.name().bold(),
        spec.required_version(),
        path.display()
    );
    Ok(())
}

async fn run(
    settings: &Settings,
    wiring: &Wiring,
    tool: &str,
    cwd: Option<&Path>,
    timeout_ms: Option<u64>,
    check: bool,
    args: &[String],
) -> Result<ExitCode> {
    let spec = settings.tool_spec(tool)?;
    let working_dir = match cwd {
        Some(dir) => dir.to_path_buf(),
        None => std::env::current_dir().context("Failed to read current directory")?,
    };

    let result = match timeout_ms {
        Some(ms) => {
            wiring
                .invoker
                .run_with_timeout(&spec, args, &working_dir, Some(Duration::from_millis(ms)))
                .await
        }
        None => wiring.invoker.run(&spec, args, &working_dir).await,
    }
    .with_context(|| format!("Failed to run '{}'", tool))?;

    std::io::stdout()
        .write_all(result.stdout.as_bytes())
        .context("Failed to forward stdout")?;
    std::io::stderr()
        .write_all(result.stderr.as_bytes())
        .context("Failed to forward stderr")?;

    let exit_code = result.exit_code.unwrap_or(0);
    debug!(tool = %tool, exit_code = exit_code, duration_ms = result.duration_ms, "Tool finished");

    if check {
        wiring
            .invoker
            .require_success(result)
            .with_context(|| format!("'{}' failed", tool))?;
    }

    Ok(ExitCode::from(u8::try_from(exit_code).unwrap_or(1)))
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // 1. Load configuration
    let settings = Settings::load(cli.config.as_deref()).context("Failed to load settings")?;

    // 2. Initialize logging (file sink only when log_dir is set)
    let _log_guard = logging::init(settings.log_dir.as_deref().map(Path::new))?;
    info!(
        version = VERSION,
        install_root = %settings.install_root,
        cache_dir = %settings.cache_dir,
        "Rigger starting"
    );

    // 3. Setup dependencies (DI wiring)
    let wiring = wire(&settings)?;

    match cli.command {
        Commands::Tools => list_tools(&settings, &wiring)?,
        Commands::Ensure { tool } => ensure(&settings, &wiring, &tool).await?,
        Commands::Run {
            tool,
            cwd,
            timeout_ms,
            check,
            args,
        } => {
            return run(
                &settings,
                &wiring,
                &tool,
                cwd.as_deref(),
                timeout_ms,
                check,
                &args,
            )
            .await;
        }
    }

    Ok(ExitCode::SUCCESS)
}
