use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};

use actuator::actuator::create_actuator;
use actuator::actuator::state::JobId;
use actuator::common::setup::setup_logging;
use actuator::common::utils::time::format_hms_duration;
use actuator::config::Config;
use actuator::schema::{SchemaGate, VersionFile};

// Root CLI options
#[derive(Parser)]
#[command(
    author,
    about,
    version(actuator::ACTUATOR_VERSION),
    disable_help_subcommand(true),
    help_expected(true)
)]
struct RootOptions {
    /// Enables more detailed log output
    #[arg(long, env = "ACTUATOR_DEBUG", global = true)]
    verbose: bool,

    /// Path to the TOML configuration file
    #[arg(long, env = "ACTUATOR_CONFIG")]
    config: PathBuf,

    #[clap(subcommand)]
    subcmd: SubCommand,
}

#[derive(Subcommand)]
enum SubCommand {
    /// Render the submission of a batch without submitting it
    Render(BatchOpts),
    /// Submit agents to a resource
    Launch(BatchOpts),
    /// Cancel scheduler jobs of a resource
    Cancel(CancelOpts),
    /// Inspect or recreate the persistent schema
    Schema {
        #[clap(subcommand)]
        subcmd: SchemaCommand,
    },
}

#[derive(Parser)]
struct BatchOpts {
    /// Name of the configured resource
    resource: String,

    /// Number of agents in the batch
    #[arg(long, default_value_t = 1)]
    agents: u32,
}

#[derive(Parser)]
struct CancelOpts {
    /// Name of the configured resource
    resource: String,

    /// Scheduler job ids to cancel
    #[arg(required = true)]
    job_ids: Vec<JobId>,
}

#[derive(Subcommand)]
enum SchemaCommand {
    /// Check that the installed schema is compatible with this build
    Check,
    /// Drop the schema and recreate it at the required version
    Reset,
}

fn new_agent_ids(count: u32) -> Vec<uuid::Uuid> {
    (0..count).map(|_| uuid::Uuid::new_v4()).collect()
}

fn command_render(config: &Config, opts: BatchOpts) -> anyhow::Result<()> {
    let resource = config.resource(&opts.resource)?;
    let actuator = create_actuator(resource, config.broker().clone());
    let batch_size = u64::from(opts.agents);

    let arguments = actuator
        .dialect()
        .render_arguments(batch_size, &resource.requirements)?;
    println!("Arguments: {}", arguments.join(" "));
    match actuator.dialect().walltime(&resource.requirements)? {
        Some(walltime) => println!(
            "Walltime: {}",
            format_hms_duration(&Duration::from_secs(walltime))
        ),
        None => println!("Walltime: <not set>"),
    }

    let (batch, script) = actuator.dry_run(new_agent_ids(opts.agents))?;
    println!("Script path: {}", batch.script_path.display());
    println!();
    print!("{script}");
    Ok(())
}

async fn command_launch(config: &Config, opts: BatchOpts) -> anyhow::Result<()> {
    let resource = config.resource(&opts.resource)?;
    let actuator = create_actuator(resource, config.broker().clone());

    let mut failed = 0;
    for outcome in actuator.launch(new_agent_ids(opts.agents)).await {
        match outcome.result {
            Ok(job_id) => {
                for agent in &outcome.agent_ids {
                    println!("{job_id}\t{agent}");
                }
            }
            Err(error) => {
                log::error!(
                    "Batch {} with {} agent(s) was not submitted: {error}",
                    outcome.batch_id,
                    outcome.agent_ids.len()
                );
                failed += 1;
            }
        }
    }
    if failed > 0 {
        anyhow::bail!("{failed} batch(es) could not be submitted");
    }
    Ok(())
}

async fn command_cancel(config: &Config, opts: CancelOpts) -> anyhow::Result<()> {
    let resource = config.resource(&opts.resource)?;
    let actuator = create_actuator(resource, config.broker().clone());
    if !actuator.kill_jobs(&opts.job_ids).await {
        anyhow::bail!("Cancellation of job(s) {} failed", opts.job_ids.join(", "));
    }
    Ok(())
}

fn command_schema(config: &Config, command: SchemaCommand) -> anyhow::Result<()> {
    let schema = config
        .schema()
        .context("The configuration does not contain a [schema] section")?;
    let mut gate = SchemaGate::new(
        VersionFile::new(schema.directory.clone()),
        schema.required.clone(),
    );
    match command {
        SchemaCommand::Check => {
            gate.check()?;
            println!("Schema is compatible with version {}", gate.required());
        }
        SchemaCommand::Reset => {
            gate.reset()?;
            println!("Schema was reset to version {}", gate.required());
        }
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let opts = RootOptions::parse();
    setup_logging(opts.verbose);

    let config = Config::load(&opts.config)
        .with_context(|| format!("Cannot load configuration {}", opts.config.display()))?;

    let result = match opts.subcmd {
        SubCommand::Render(opts) => command_render(&config, opts),
        SubCommand::Launch(opts) => command_launch(&config, opts).await,
        SubCommand::Cancel(opts) => command_cancel(&config, opts).await,
        SubCommand::Schema { subcmd } => command_schema(&config, subcmd),
    };

    if let Err(error) = result {
        log::error!("{error:?}");
        std::process::exit(1);
    }
    Ok(())
}
