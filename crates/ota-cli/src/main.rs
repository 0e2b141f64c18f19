use std::{
    process,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex, PoisonError,
    },
};

use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use ota_core::{
    ControllerBuilder, EnvOverrides, HostRuntime, LoadOutcome, UpdatesConfig, UpdatesController,
    UpdatesError, UpdatesEvent,
};
use serde_json::{json, Value};
use tracing::info;

mod cli;

use cli::{CommandGroupCli, OtaCli};

fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = OtaCli::parse();
    init_tracing(cli.trace, cli.verbose);

    let config = build_config(&cli)?;
    match execute(&cli.command, config) {
        Ok(output) => emit_output(&cli, &output),
        Err(err) if cli.json => {
            let payload = json!({
                "status": "error",
                "code": err.code(),
                "message": err.to_string(),
            });
            println!("{}", serde_json::to_string_pretty(&payload)?);
            process::exit(1);
        }
        Err(err) => Err(err.into()),
    }
}

fn init_tracing(trace: bool, verbose: u8) {
    let level = if trace {
        "trace"
    } else {
        match verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(format!("ota={level}"))
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_level(true)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}

/// Environment first, then command-line flags on top.
fn build_config(cli: &OtaCli) -> Result<UpdatesConfig> {
    let overrides = EnvOverrides {
        root: cli.root.clone(),
        binary_version: cli.binary_version.clone(),
    };
    let mut config = UpdatesConfig::from_env_with(&overrides).map_err(|err| eyre!("{err:#}"))?;
    if let Some(url) = &cli.manifest_url {
        config = config.with_manifest_url(url.clone());
    }
    if let Some(dir) = &cli.embedded_dir {
        config = config.with_embedded_dir(dir);
    }
    if let Some(parallelism) = cli.parallelism {
        config.download.parallelism = parallelism.max(1);
    }
    if cli.offline {
        config.online = false;
    }
    if cli.no_reload {
        config.reload_on_update = false;
    }
    Ok(config)
}

struct CommandOutput {
    message: String,
    details: Value,
}

/// Host for the CLI: there is no running bundle, so reloads are only counted.
#[derive(Default)]
struct CliHost {
    reloads: AtomicUsize,
    events: Mutex<Vec<UpdatesEvent>>,
}

impl CliHost {
    fn events(&self) -> Vec<UpdatesEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl HostRuntime for CliHost {
    fn request_reload(&self) {
        self.reloads.fetch_add(1, Ordering::SeqCst);
        info!("relaunch requested");
    }

    fn emit(&self, event: &UpdatesEvent) {
        info!(?event, "updates event");
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
    }
}

fn build_controller(config: UpdatesConfig) -> Result<(Arc<UpdatesController>, Arc<CliHost>), UpdatesError> {
    let host = Arc::new(CliHost::default());
    let controller = ControllerBuilder::new(config).host(host.clone()).build()?;
    Ok((controller, host))
}

fn execute(command: &CommandGroupCli, mut config: UpdatesConfig) -> Result<CommandOutput, UpdatesError> {
    match command {
        CommandGroupCli::Launch(args) => {
            if args.no_check {
                config.check_on_launch = false;
            }
            let (controller, host) = build_controller(config)?;
            let first = controller.start()?;
            controller.shutdown();
            let current = controller
                .launched_app()
                .unwrap_or_else(|| Arc::clone(&first));

            let mut lines = vec![format!(
                "launched {} ({})",
                current.update.id,
                current.update.status.as_str()
            )];
            if current.update.id != first.update.id {
                lines.push(format!("relaunched from {}", first.update.id));
            }
            lines.push(format!("launch asset: {}", current.launch_asset_path.display()));
            for (key, path) in &current.asset_files {
                lines.push(format!("  {key} -> {}", path.display()));
            }
            Ok(CommandOutput {
                message: lines.join("\n"),
                details: json!({
                    "launched": &*current,
                    "reloads": host.reloads.load(Ordering::SeqCst),
                    "events": host.events(),
                }),
            })
        }
        CommandGroupCli::Check => {
            config.check_on_launch = false;
            let (controller, _host) = build_controller(config)?;
            let launched = controller.start()?;
            let candidate = controller.check_for_update()?;
            let message = match &candidate {
                Some(update) => format!(
                    "update {} is available (running {})",
                    update.id, launched.update.id
                ),
                None => format!("no update newer than {}", launched.update.id),
            };
            Ok(CommandOutput {
                message,
                details: json!({
                    "launched": launched.update.id,
                    "available": candidate.map(|update| update.id),
                }),
            })
        }
        CommandGroupCli::Fetch => {
            config.check_on_launch = false;
            let (controller, host) = build_controller(config)?;
            controller.start()?;
            let outcome = controller.fetch_update()?;
            let message = match &outcome {
                LoadOutcome::Loaded(update) => format!("fetched {}", update.id),
                LoadOutcome::AlreadyPresent(update) => format!("{} is already in the store", update.id),
                LoadOutcome::Skipped(update) => {
                    format!("{} is not newer than the launched update", update.id)
                }
            };
            Ok(CommandOutput {
                message,
                details: json!({
                    "update": outcome.update().id,
                    "launched": controller.launched_app().map(|app| app.update.id.clone()),
                    "pending": controller.pending_update().map(|update| update.id),
                    "events": host.events(),
                }),
            })
        }
        CommandGroupCli::Status => {
            let (controller, _host) = build_controller(config)?;
            let entries = controller.catalog().all_updates()?;
            let mut lines = Vec::with_capacity(entries.len() + 1);
            lines.push(format!("{} updates in {}", entries.len(), controller.catalog().root().display()));
            for entry in &entries {
                lines.push(format!(
                    "  {:<24} {:<9} commit {:>15} assets {:>3}{}",
                    entry.update.id,
                    entry.update.status.as_str(),
                    entry.update.commit_time,
                    entry.asset_count,
                    if entry.marked_for_deletion { "  (marked)" } else { "" }
                ));
            }
            Ok(CommandOutput {
                message: lines.join("\n"),
                details: json!({ "updates": entries }),
            })
        }
        CommandGroupCli::Gc => {
            config.check_on_launch = false;
            let (controller, _host) = build_controller(config)?;
            let launched = controller.start()?;
            let summary = controller.last_gc_summary().unwrap_or_default();
            Ok(CommandOutput {
                message: format!(
                    "kept {}; removed {} updates and {} files ({} bytes)",
                    launched.update.id,
                    summary.updates_deleted,
                    summary.files_deleted + summary.orphans_removed,
                    summary.bytes_reclaimed
                ),
                details: json!({ "launched": launched.update.id, "summary": summary }),
            })
        }
    }
}

fn emit_output(cli: &OtaCli, output: &CommandOutput) -> Result<()> {
    if cli.json {
        let payload = json!({
            "status": "ok",
            "message": output.message,
            "details": output.details,
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        println!("{}", output.message);
    }
    Ok(())
}
