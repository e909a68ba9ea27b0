mod config;
mod directory;
mod events;
mod server;

use std::net::IpAddr;

use anyhow::Result;
use clap::Parser;
use tokio::sync::watch;

use config::{MAX_PLAYER_ID, ServerConfig};
use server::SpaceServer;

#[derive(Parser)]
#[command(name = "spacesync-server")]
#[command(about = "Control and relay server for shared spaces")]
struct Args {
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: IpAddr,

    #[arg(short, long, default_value_t = spacesync::DEFAULT_CONTROL_PORT)]
    port: u16,

    #[arg(short, long, default_value_t = spacesync::DEFAULT_DATA_PORT)]
    data_port: u16,

    #[arg(long, help = "Address advertised for the data socket")]
    public_ip: Option<IpAddr>,

    #[arg(short, long, default_value_t = MAX_PLAYER_ID as usize)]
    max_players: usize,

    #[arg(long, default_value_t = 10, help = "Seconds a connection may take to join")]
    join_timeout: u64,

    #[arg(long, default_value_t = 30, help = "Seconds between stats lines")]
    stats_interval: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = ServerConfig {
        bind: args.bind,
        control_port: args.port,
        data_port: args.data_port,
        public_ip: args.public_ip,
        max_players: args.max_players,
        join_timeout_secs: args.join_timeout,
        stats_interval_secs: args.stats_interval,
    };

    let server = SpaceServer::bind(config).await?;
    log::info!(
        "Server started: control {}, data {}",
        server.control_addr()?,
        server.data_addr()?
    );

    let (shutdown, signal) = watch::channel(false);
    let task = tokio::spawn(server.run(signal));

    tokio::signal::ctrl_c().await?;
    log::info!("Server shutting down");
    shutdown.send_replace(true);

    let stats = task.await??;
    log::info!(
        "Relayed {} frames, dropped {}",
        stats.frames_relayed,
        stats.frames_dropped
    );
    Ok(())
}
