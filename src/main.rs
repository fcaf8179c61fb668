mod cli;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use tokio_util::sync::CancellationToken;

use docforge::{JobReport, Supervisor};
use docforge_common::config::Config;
use docforge_common::{JobId, JobStatus};
use docforge_exec::{Converter, ConverterTools, SofficeRunner};

/// Options for the `convert` command.
struct ConvertOptions {
    files: Vec<PathBuf>,
    target_format: Option<String>,
    sync: bool,
    out_dir: Option<PathBuf>,
}

async fn convert(config: Config, options: ConvertOptions) -> Result<bool> {
    let tools = ConverterTools::discover(&config.converter);
    let runner: Arc<dyn Converter> = Arc::new(SofficeRunner::from_config(&config.converter, &tools)?);

    let supervisor = Supervisor::new(config)?;
    let cancel = CancellationToken::new();
    let maintenance = supervisor.spawn_maintenance(cancel.clone());

    if let Some(dir) = &options.out_dir {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("creating {}", dir.display()))?;
    }

    let mut ids = Vec::with_capacity(options.files.len());
    let mut handles = Vec::new();

    for file in &options.files {
        let job = supervisor.create_job(file.clone(), options.target_format.clone())?;
        supervisor
            .stage_input(job.id, file)
            .await
            .with_context(|| format!("staging {}", file.display()))?;
        ids.push(job.id);

        if options.sync {
            if let Err(e) = supervisor.run_immediately(job.id, runner.as_ref()).await {
                tracing::debug!(job_id = %job.id, "Immediate run failed: {e}");
            }
            report(&supervisor, job.id, options.out_dir.as_deref()).await?;
        } else {
            match supervisor.submit(job.id, Arc::clone(&runner)) {
                Ok(handle) => handles.push(handle),
                Err(e) => tracing::warn!(job_id = %job.id, "Not queued: {e}"),
            }
        }
    }

    if !options.sync {
        let scheduled = futures::future::join_all(handles);
        tokio::pin!(scheduled);
        tokio::select! {
            _ = &mut scheduled => {}
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("Interrupted; abandoning queued jobs");
                supervisor.shutdown();
                // Waiting jobs fail on the closed gate; running ones finish.
                scheduled.await;
            }
        }
        for id in &ids {
            report(&supervisor, *id, options.out_dir.as_deref()).await?;
        }
    }

    cancel.cancel();
    maintenance.join().await;

    Ok(ids
        .iter()
        .all(|id| supervisor.get(*id).is_some_and(|job| job.status == JobStatus::Done)))
}

/// Print a job's report as one JSON line, copying its output first when
/// requested.
async fn report(supervisor: &Supervisor, id: JobId, out_dir: Option<&Path>) -> Result<()> {
    let Some(mut report) = supervisor.status(id) else {
        return Ok(());
    };

    if let (Some(dir), Some(output)) = (out_dir, report.output_path.as_ref()) {
        if let Some(name) = output.file_name() {
            let dest = dir.join(name);
            tokio::fs::copy(output, &dest)
                .await
                .with_context(|| format!("copying {} to {}", output.display(), dest.display()))?;
            report = JobReport {
                output_path: Some(dest),
                ..report
            };
        }
    }

    println!("{}", serde_json::to_string(&report)?);
    Ok(())
}

fn check_tools(config: &Config) -> Result<()> {
    println!("Checking external tools...\n");

    let tools = ConverterTools::discover(&config.converter).check_all();
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
            print!(" ({version})");
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
        println!("LibreOffice was not found. Install it or set converter.soffice_path.");
    }

    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    let config = match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            let raw = std::fs::read_to_string(p).with_context(|| format!("reading {}", p.display()))?;
            let config = Config::from_json(&raw)?;
            println!("✓ Configuration is valid");
            config
        }
        None => {
            println!("No config file specified, using defaults");
            Config::default()
        }
    };

    println!("  Data dir: {}", config.storage.data_dir.display());
    println!("  Max concurrency: {}", config.queue.gate_size());
    println!("  Max retries: {}", config.queue.max_retries);
    println!("  Max queue size: {}", config.queue.max_queue_size);
    println!("  Convert timeout: {}s", config.converter.convert_timeout_secs);

    for warning in config.validate() {
        println!("  ⚠ {warning}");
    }

    Ok(())
}

fn status(config: Config) -> Result<()> {
    let supervisor = Supervisor::new(config)?;
    println!("{}", serde_json::to_string_pretty(&supervisor.system_status())?);
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "docforge=trace,docforge_exec=trace,docforge_common=debug".to_string()
        } else {
            "docforge=info,docforge_exec=info".to_string()
        }
    });

    // Logs go to stderr so stdout stays machine-readable.
    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    let mut config = Config::load_or_default(cli.config.as_deref());
    if let Some(dir) = cli.data_dir {
        config.storage.data_dir = dir;
    }

    match cli.command {
        Commands::Convert {
            files,
            to,
            sync,
            out_dir,
            max_concurrency,
            timeout,
            retries,
        } => {
            if let Some(n) = max_concurrency {
                config.queue.max_concurrency = n;
            }
            if let Some(secs) = timeout {
                config.converter.convert_timeout_secs = secs;
            }
            if let Some(n) = retries {
                config.queue.max_retries = n;
            }
            for warning in config.validate() {
                tracing::warn!("{warning}");
            }

            let options = ConvertOptions {
                files,
                target_format: to,
                sync,
                out_dir,
            };
            let rt = tokio::runtime::Runtime::new()?;
            if !rt.block_on(convert(config, options))? {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::CheckTools => check_tools(&config),
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Status => status(config),
        Commands::Version => {
            println!("docforge {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
