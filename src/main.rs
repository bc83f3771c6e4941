use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tokio::io::AsyncReadExt;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use converge::apply::Applier;
use converge::cache::{LoggingHandler, Reflector};
use converge::config::AppConfig;
use converge::gateway::types::Selectors;
use converge::manifest::{gvk_from_api_version, gvk_label};
use converge::shutdown::wait_for_shutdown;

#[derive(Parser)]
#[command(name = "converge", about = "Converge cluster objects toward their manifests")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Three-way merge the manifest into the cluster
    Apply(ManifestArgs),
    /// Create the objects; fail if any already exists
    Create(ManifestArgs),
    /// Create missing objects and overwrite existing ones
    CreateOrUpdate(ManifestArgs),
    /// Mirror a collection and log its changes until interrupted
    Watch(WatchArgs),
}

#[derive(Args)]
struct ManifestArgs {
    /// Manifest file, or `-` for stdin
    #[arg(short = 'f', long = "filename")]
    file: PathBuf,
}

#[derive(Args)]
struct WatchArgs {
    #[arg(long)]
    api_version: String,

    #[arg(long)]
    kind: String,

    /// Namespace to watch; defaults to the configured one
    #[arg(short, long)]
    namespace: Option<String>,

    /// Watch every namespace
    #[arg(short = 'A', long, conflicts_with = "namespace")]
    all_namespaces: bool,

    /// Label selector, e.g. `app=web`
    #[arg(short = 'l', long)]
    selector: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Stdout carries the result; logs go to stderr
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    log_subscriber(cli.log_json, filter, std::io::stderr).init();

    let config = AppConfig::load(cli.config.as_deref())?;
    tracing::debug!(cluster = ?config.cluster, "Loaded configuration");

    let applier = Applier::from_config(&config).await?;

    let result = match cli.command {
        Command::Apply(args) => applier.apply(&read_manifest(&args.file).await?).await?,
        Command::Create(args) => applier.create(&read_manifest(&args.file).await?).await?,
        Command::CreateOrUpdate(args) => {
            applier
                .create_or_update(&read_manifest(&args.file).await?)
                .await?
        }
        Command::Watch(args) => return watch(&config, &applier, args).await,
    };

    println!("{result}");
    Ok(())
}

fn log_subscriber<W>(
    log_json: bool,
    filter: EnvFilter,
    writer: W,
) -> impl tracing::Subscriber + Send + Sync
where
    W: for<'a> MakeWriter<'a> + Clone + Send + Sync + 'static,
{
    let fmt_layer = (!log_json).then(|| tracing_subscriber::fmt::layer().with_writer(writer.clone()));
    let json_layer = log_json.then(|| tracing_subscriber::fmt::layer().json().with_writer(writer));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .with(json_layer)
}

async fn read_manifest(path: &Path) -> anyhow::Result<Vec<u8>> {
    if path.as_os_str() == "-" {
        let mut data = Vec::new();
        tokio::io::stdin()
            .read_to_end(&mut data)
            .await
            .context("Failed to read manifest from stdin")?;
        return Ok(data);
    }
    tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read manifest {}", path.display()))
}

async fn watch(config: &AppConfig, applier: &Applier, args: WatchArgs) -> anyhow::Result<()> {
    let gvk = gvk_from_api_version(&args.api_version, &args.kind)?;
    let gateway = applier.gateway();
    let resource = gateway.resolve(&gvk).await?;

    let namespace = match (args.all_namespaces, args.namespace) {
        (true, _) => None,
        (false, Some(ns)) => Some(ns),
        (false, None) => Some(config.cluster.namespace.clone()),
    };
    let selectors = Selectors {
        label_selector: args.selector,
        ..Selectors::default()
    };

    tracing::info!(kind = %gvk_label(&gvk), namespace = ?namespace, "Starting watch");

    let reflector = Reflector::new(gateway, resource, namespace.as_deref())
        .with_selectors(selectors)
        .with_resync_period(Duration::from_secs(config.cache.resync_period_secs))
        .add_handler(Arc::new(LoggingHandler));
    reflector.run_until(wait_for_shutdown()).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Captured {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for Captured {
        type Writer = Self;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[test]
    fn test_logs_go_to_the_given_writer() {
        let captured = Captured::default();
        let subscriber = log_subscriber(false, EnvFilter::new("info"), captured.clone());
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(object = "default/a", "Object added");
            tracing::debug!("filtered out");
        });

        let text = captured.text();
        assert!(text.contains("Object added"));
        assert!(text.contains("default/a"));
        assert!(!text.contains("filtered out"));
    }

    #[test]
    fn test_json_logs_are_one_object_per_line() {
        let captured = Captured::default();
        let subscriber = log_subscriber(true, EnvFilter::new("info"), captured.clone());
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(object = "default/a", "Object added");
        });

        let text = captured.text();
        let line: serde_json::Value = serde_json::from_str(text.trim()).unwrap();
        assert_eq!(line["fields"]["message"], "Object added");
        assert_eq!(line["fields"]["object"], "default/a");
    }

    #[test]
    fn test_watch_args() {
        let cli = Cli::try_parse_from([
            "converge", "watch", "--api-version", "apps/v1", "--kind", "Deployment", "-A", "-l", "app=web",
        ])
        .unwrap();
        match cli.command {
            Command::Watch(args) => {
                assert!(args.all_namespaces);
                assert_eq!(args.selector.as_deref(), Some("app=web"));
            }
            _ => panic!("expected watch"),
        }
    }
}
