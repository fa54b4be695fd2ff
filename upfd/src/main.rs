use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;

use upfd::config::{UpfConfig, DEFAULT_CONFIG_PATH, ENV_CONFIG_PATH};
use upfd::queue::FastPathEngine;
use upfd::session::{SessionTable, UpfSession};

#[derive(Parser, Debug)]
#[command(name = "upfd")]
#[command(about = "Simplified 5G UPF fast path daemon")]
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
            println!("[upfd] shut down cleanly");
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("[upfd] startup failed: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = UpfConfig::load(&args.config).context("loading configuration")?;

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.log_level.clone()),
    )
    .init();

    println!("[upfd] starting UPF fast path");
    println!("[upfd] local ip: {}", config.local_ip);

    let mut table = SessionTable::new(config.local_ip);
    for s in &config.sessions {
        table
            .insert(UpfSession::new(
                s.ue_ip, s.dl_teid, s.ul_teid, s.gnb_ip, s.gnb_port, s.dn_ip, s.qos_priority,
                s.qos_dscp,
            ))
            .with_context(|| format!("installing session for UE {}", s.ue_ip))?;
        println!(
            "[upfd] session: ue={} dl-teid={:#010x} ul-teid={:#010x} gnb={}",
            s.ue_ip, s.dl_teid, s.ul_teid, s.gnb_ip
        );
    }
    let table = Arc::new(table);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (engine, mut tx_queues) = FastPathEngine::spawn(
        Arc::clone(&table),
        config.num_queues,
        config.num_workers,
        shutdown_rx.clone(),
    )
    .context("starting queue workers")?;

    // Stand-in TX rings: with no NIC attached, drain the peer-facing
    // queues so forwarded frames are accounted and released.
    {
        let mut shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            let mut forwarded = 0u64;
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    frame = tx_queues.ran_tx.recv() => {
                        let Some(frame) = frame else { break };
                        forwarded += 1;
                        log::debug!("[upfd] ran tx: {} bytes (total {forwarded})", frame.len());
                    }
                    packet = tx_queues.dn_tx.recv() => {
                        let Some(packet) = packet else { break };
                        forwarded += 1;
                        log::debug!("[upfd] dn tx: {} bytes (total {forwarded})", packet.len());
                    }
                }
            }
        });
    }

    println!(
        "[upfd] {} rx queues per direction, {} workers, {} sessions",
        config.num_queues,
        config.num_workers,
        table.len()
    );
    println!("[upfd] waiting for packets (Ctrl+C to exit)");

    wait_for_signal().await;

    println!("[upfd] shutting down...");
    let _ = shutdown_tx.send(true);

    for session in table.iter() {
        println!(
            "[upfd] session ue={}: tx {} pkts / {} bytes, rx {} pkts / {} bytes",
            session.ue_ip,
            session.packets_tx(),
            session.bytes_tx(),
            session.packets_rx(),
            session.bytes_rx()
        );
    }
    println!(
        "[upfd] engine: dl {} / ul {} forwarded, {} dropped",
        engine.stats().dl_forwarded(),
        engine.stats().ul_forwarded(),
        engine.stats().dropped()
    );
    Ok(())
}

async fn wait_for_signal() {
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(err) => {
            log::error!("[upfd] cannot install SIGTERM handler: {err}");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => println!("\n[upfd] SIGINT received"),
        _ = sigterm.recv() => println!("[upfd] SIGTERM received"),
    }
}
