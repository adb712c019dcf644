use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use clap::Subcommand;
use owrt_frontend::config::BuildConfig;
use owrt_frontend::executionservice::{self, BuildOpts, ResultRef};
use owrt_frontend::graph::config_to_llb;
use owrt_frontend::signing_keys::SigningKeys;
use owrt_tracing::LogFormat;
use tracing::{error, info, warn, Level};

/// Prefix of the environment variables BuildKit passes frontend options in,
/// as `key=value`.
const FRONTEND_OPT_ENV_PREFIX: &str = "BUILDKIT_FRONTEND_OPT_";

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// A global log level to use when printing logs.
    /// It's also possible to set `RUST_LOG` according to
    /// `tracing_subscriber::filter::EnvFilter`, which will always have
    /// priority.
    #[arg(long, default_value_t=Level::INFO)]
    log_level: Level,

    /// Whether to log in JSON
    #[arg(long)]
    json_logs: bool,

    /// Show progress spinners for the build stages.
    #[arg(long)]
    progress: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Runs a build against the execution service.
    Build {
        #[arg(long, env, default_value = "grpc+unix:///run/buildkit/frontend.sock")]
        execution_service_addr: String,

        /// The client session providing the build context.
        #[arg(long, env = "BUILDKIT_SESSION_ID", default_value = "")]
        session_id: String,

        /// Frontend options, like `filename=owrtfile`. These take precedence
        /// over the ones passed in the environment.
        #[arg(long = "opt", value_name = "KEY=VALUE", value_parser = parse_key_val)]
        opts: Vec<(String, String)>,

        /// Abort the build after this many seconds.
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Prints the configuration as passed to the image builder, and the
    /// build graph, without contacting any service.
    Render {
        #[clap(value_name = "PATH")]
        path: PathBuf,
    },
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("invalid KEY=VALUE: no `=` found in `{s}`"))
}

/// Collects the frontend options passed by BuildKit in the environment.
fn opts_from_env() -> BTreeMap<String, String> {
    std::env::vars()
        .filter(|(k, _)| k.starts_with(FRONTEND_OPT_ENV_PREFIX))
        .filter_map(|(k, v)| match parse_key_val(&v) {
            Ok(kv) => Some(kv),
            Err(e) => {
                warn!(env = %k, err = %e, "ignoring frontend option");
                None
            }
        })
        .collect()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut tracing_builder = owrt_tracing::TracingBuilder::default()
        .level(cli.log_level)
        .format(if cli.json_logs {
            LogFormat::Json
        } else {
            LogFormat::Compact
        });
    if cli.progress {
        tracing_builder = tracing_builder.enable_progressbar();
    }
    let tracing_handle = tracing_builder.build()?;

    match cli.command {
        Commands::Build {
            execution_service_addr,
            session_id,
            opts,
            timeout,
        } => {
            let mut build_opts = BuildOpts {
                session_id,
                opts: opts_from_env(),
            };
            build_opts.opts.extend(opts);

            let service = executionservice::from_addr(&execution_service_addr, build_opts).await?;

            let build = async {
                let build = owrt_frontend::build(service.as_ref());
                match timeout {
                    None => build.await.map_err(|e| e.to_string()),
                    Some(secs) => match tokio::time::timeout(Duration::from_secs(secs), build).await
                    {
                        Ok(outcome) => outcome.map_err(|e| e.to_string()),
                        Err(_) => Err(format!("build timed out after {secs}s")),
                    },
                }
            };

            let outcome: Result<ResultRef, String> = tokio::select! {
                outcome = build => outcome,
                _ = tokio::signal::ctrl_c() => {
                    warn!("interrupted, aborting build");
                    return Err("interrupted".into());
                }
            };

            match &outcome {
                Ok(reference) => info!(%reference, "build finished"),
                Err(e) => error!(err = %e, "build failed"),
            }
            service.return_result(outcome.clone()).await?;

            outcome?;
        }
        Commands::Render { path } => {
            let data = tokio::fs::read(&path).await?;
            let config = BuildConfig::from_bytes(&data)?;
            let definition = config_to_llb(&config, &SigningKeys::builtin())?.marshal()?;

            let mut out = tracing_handle.get_stdout_writer();
            writeln!(out, "{}", String::from_utf8_lossy(&config.to_json()?))?;
            for (digest, _) in definition.ops() {
                writeln!(
                    out,
                    "{} {}",
                    digest,
                    definition.custom_name(digest).unwrap_or("-")
                )?;
            }
        }
    }

    Ok(())
}
