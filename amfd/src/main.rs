use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;

use amfd::amf::{self, Amf};
use amfd::config::{AmfConfig, DEFAULT_CONFIG_PATH, ENV_CONFIG_PATH};
use amfd::n1n2::run_n2_listener;
use amfd::sbi::build_router;

#[derive(Parser, Debug)]
#[command(name = "amfd")]
#[command(about = "Simplified 5G core AMF daemon")]
struct Args {
    /// Path to the key=value configuration file
    #[arg(long, value_name = "PATH", env = ENV_CONFIG_PATH, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    match run(args).await {
        Ok(()) => {
            println!("[amfd] shut down cleanly");
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("[amfd] startup failed: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = AmfConfig::load(&args.config).context("loading configuration")?;

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.log_level.clone()),
    )
    .init();

    println!("[amfd] starting AMF daemon");
    println!("[amfd] instance id: {}", config.amf_instance_id);
    println!("[amfd] plmn: {}", config.plmn_id);

    // Bind both ports before wiring anything: configuration and socket
    // failures must exit with code 1 without touching any state.
    let sbi_addr = format!("{}:{}", config.sbi_bind_address, config.sbi_port);
    let sbi_listener = TcpListener::bind(&sbi_addr)
        .await
        .with_context(|| format!("binding SBI listener on {sbi_addr}"))?;
    let n2_addr = format!("{}:{}", config.n1n2_bind_address, config.n2_port);
    let n2_listener = TcpListener::bind(&n2_addr)
        .await
        .with_context(|| format!("binding N2 listener on {n2_addr}"))?;

    let (amf, inbound) = Amf::new(config);
    amf.bootstrap().context("bootstrapping AMF components")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(run_n2_listener(
        amf.n1n2_handle(),
        n2_listener,
        shutdown_rx.clone(),
    ));
    tokio::spawn(amf::run_demux(
        Arc::clone(&amf),
        inbound,
        shutdown_rx.clone(),
    ));
    tokio::spawn(amf::run_monitor(Arc::clone(&amf), shutdown_rx.clone()));
    tokio::spawn(amf::run_nf_sweeper(Arc::clone(&amf), shutdown_rx.clone()));
    tokio::spawn(amf::run_self_heartbeat(
        Arc::clone(&amf),
        shutdown_rx.clone(),
    ));

    println!("[amfd] SBI listening on {sbi_addr}");
    println!("[amfd] N2 listening on {n2_addr}");

    let app = build_router(Arc::clone(&amf));
    let mut server_shutdown = shutdown_rx.clone();
    let server = axum::serve(sbi_listener, app).with_graceful_shutdown(async move {
        let _ = server_shutdown.changed().await;
    });

    let signal_task = tokio::spawn(wait_for_signal());

    let result = tokio::select! {
        served = server => served.context("SBI server"),
        _ = signal_task => Ok(()),
    };

    println!("[amfd] shutting down...");
    let _ = shutdown_tx.send(true);
    amf.shutdown();
    result
}

async fn wait_for_signal() {
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(err) => {
            log::error!("[amfd] cannot install SIGTERM handler: {err}");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => println!("\n[amfd] SIGINT received"),
        _ = sigterm.recv() => println!("[amfd] SIGTERM received"),
    }
}
