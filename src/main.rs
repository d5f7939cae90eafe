use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use kodegen_bundler_collect::macos::{
    EmbeddedPlistDecoder, Keychain, ProfileDirectory, SecurityCmsDecoder,
};
use kodegen_bundler_collect::{Collector, CollectorConfig, DecoderKind, RunLog, RunReport};

// Failures of the run itself are reported by the collector (log file, notices
// and exit status 1). Errors returned from `main` are setup problems that
// happen before a diagnostic log exists.

#[derive(Parser)]
#[command(name = "kodegen_collect")]
#[command(version, about = "Collect iOS signing files and upload them to the build service")]
struct Cli {
    /// Path to collector config file (TOML); flags override its values
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Signing files collection endpoint
    #[arg(long, env = "SIGNING_FILES_COLLECTION_URL")]
    collection_url: Option<String>,

    /// Upload signing files here instead of opening a collection
    #[arg(long, requires = "log_url")]
    files_url: Option<String>,

    /// Upload the diagnostic log here instead of opening a collection
    #[arg(long, requires = "files_url")]
    log_url: Option<String>,

    /// Value of the Authorization header
    #[arg(long, env = "SIGNING_FILES_UPLOAD_KEY", hide_env_values = true)]
    upload_key: Option<String>,

    /// Directory for the diagnostic log (defaults to the system temp dir)
    #[arg(long)]
    working_dir: Option<PathBuf>,

    /// Keychain holding the codesigning identities
    #[arg(long)]
    keychain: Option<String>,

    /// Provisioning profile search root
    #[arg(long)]
    profiles_dir: Option<PathBuf>,

    /// Profile decoder: security or embedded
    #[arg(long)]
    decoder: Option<DecoderKind>,

    /// Keep expired and non-iOS identities
    #[arg(long)]
    include_unsuitable: bool,

    /// Debug output on stderr
    #[arg(long, short = 'v')]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("collector={level},kodegen_bundler_collect={level}").into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .init();

    let config = load_config(&cli).await?;
    config.validate()?;

    let log = RunLog::create_in(&config.working_dir)?;
    tracing::debug!(log = %log.path().display(), "diagnostic log created");

    let keychain = Keychain::new(config.keychain.clone());
    let profiles = ProfileDirectory::new(config.profiles_dir()?);

    let report = match config.decoder {
        DecoderKind::Security => {
            Collector::new(config, keychain, profiles, SecurityCmsDecoder, log)
                .run()
                .await
        }
        DecoderKind::Embedded => {
            Collector::new(config, keychain, profiles, EmbeddedPlistDecoder, log)
                .run()
                .await
        }
    };

    finish(&report);
    Ok(())
}

async fn load_config(cli: &Cli) -> Result<CollectorConfig> {
    let mut config = match &cli.config {
        Some(path) => CollectorConfig::load(path).await?,
        None => CollectorConfig::default(),
    };

    if let Some(url) = &cli.collection_url {
        config.collection_url = Some(url.clone());
    }
    if let (Some(files_url), Some(log_url)) = (&cli.files_url, &cli.log_url) {
        config.files_url = Some(files_url.clone());
        config.log_url = Some(log_url.clone());
    }
    if let Some(key) = &cli.upload_key {
        config.upload_key = key.clone();
    }
    if let Some(dir) = &cli.working_dir {
        config.working_dir = dir.clone();
    }
    if let Some(keychain) = &cli.keychain {
        config.keychain = keychain.clone();
    }
    if let Some(dir) = &cli.profiles_dir {
        config.profiles_dir = Some(dir.clone());
    }
    if let Some(decoder) = cli.decoder {
        config.decoder = decoder;
    }
    if cli.include_unsuitable {
        config.include_unsuitable = true;
    }

    Ok(config)
}

fn finish(report: &RunReport) {
    tracing::debug!(
        states = ?report.states,
        log_uploaded = report.log_uploaded,
        "run finished"
    );

    if !report.is_success() {
        std::process::exit(1);
    }
}
