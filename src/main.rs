// src/main.rs
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use spice_record::cli::Cli;
use spice_record::display::screendump::ScreendumpClient;
use spice_record::encoder::FfmpegEncoder;
use spice_record::hypervisor::VirshHypervisor;
use spice_record::tty::{watch_stop_key, CbreakGuard};
use spice_record::{RecordConfig, RecordError, Recorder};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // RUST_LOG wins over --loglevel when set
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.loglevel.as_filter()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = RecordConfig::from(cli);
    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let code = match e.downcast_ref::<RecordError>() {
                Some(err) => {
                    eprintln!("spice-record: {} failed: {err}", err.stage());
                    err.exit_code()
                }
                None => {
                    eprintln!("spice-record: {e:#}");
                    1
                }
            };
            ExitCode::from(code)
        }
    }
}

async fn run(config: RecordConfig) -> Result<()> {
    let cancel = CancellationToken::new();

    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Received Ctrl+C, stopping recording");
            ctrl_c.cancel();
        }
    });

    let hypervisor = VirshHypervisor::connect(config.libvirt_uri.clone()).await?;
    let display = ScreendumpClient::new(hypervisor.virsh().clone(), config.framerate);

    // restored on every return path below
    let _cbreak = CbreakGuard::enter();
    watch_stop_key(cancel.clone());

    let mut recorder = Recorder::new(config, cancel);
    let report = recorder
        .run(&hypervisor, &display, FfmpegEncoder::new)
        .await?;
    debug!(?report, "session closed");
    Ok(())
}
