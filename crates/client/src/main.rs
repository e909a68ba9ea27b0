mod bot;
mod demo;

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use clap::Parser;
use spacesync::net::ControlMessage;
use spacesync::{ConnectionState, HeadlessBackend, Session, SpaceConfig, TcpNetwork};
use tokio::time::{self, MissedTickBehavior};

use bot::Wanderer;

#[derive(Parser)]
#[command(name = "spacesync-client")]
#[command(about = "Headless client that walks around a shared space")]
struct Args {
    #[arg(
        short,
        long,
        help = "Control address of the server (e.g., 127.0.0.1:4000)"
    )]
    server: Option<SocketAddr>,

    #[arg(long, default_value = "lobby")]
    space: String,

    #[arg(short, long)]
    name: Option<String>,

    #[arg(long, help = "Chat line to send once streaming")]
    say: Option<String>,

    #[arg(long, default_value_t = 3.0)]
    speed: f32,

    #[arg(long, default_value_t = 4, help = "Seconds between jumps, 0 to never jump")]
    jump_every: u64,

    #[arg(long, default_value_t = 5, help = "Seconds between status lines")]
    status_every: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = SpaceConfig::default();

    let mut session = Session::start(config.clone(), HeadlessBackend::new())?;
    let demo = demo::build(session.scene_mut())?;
    let mut wanderer = Wanderer::new(demo.landmarks(session.scene()), args.speed)
        .with_jumps(Duration::from_secs(args.jump_every));

    if let Some(server) = args.server {
        log::info!("Connecting to {server}, space {}", args.space);
        session.connect(TcpNetwork::new(server), &args.space, args.name.clone());
    }
    let mut greeting = args.say;

    let mut steer = time::interval(config.publish_interval());
    steer.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut status = time::interval(Duration::from_secs(args.status_every.max(1)));
    status.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last_steer = Instant::now();

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            _ = steer.tick() => {
                let now = Instant::now();
                let position = session.kinematics().position();
                let steering = wanderer.steer(position, now - last_steer);
                last_steer = now;

                session.set_input(steering.horizontal, steering.yaw);
                if steering.jump {
                    session.jump();
                }
            }
            _ = status.tick() => {
                let state = session.kinematics().load();
                log::info!(
                    "At ({:.2}, {:.2}, {:.2}){}",
                    state.position.x,
                    state.position.y,
                    state.position.z,
                    if state.is_falling { ", falling" } else { "" }
                );

                if let Some(network) = session.network() {
                    let stats = network.stats();
                    log::info!(
                        "{}: {} frames out, {} in, {} dropped, {} reconnects",
                        stats.state(),
                        stats.frames_sent(),
                        stats.frames_received(),
                        stats.frames_dropped(),
                        stats.reconnects()
                    );

                    if stats.state() == ConnectionState::Streaming
                        && let Some(text) = greeting.take()
                        && let Err(e) = network.request(ControlMessage::Chat { text })
                    {
                        log::warn!("Chat not sent: {e}");
                    }

                    if network.is_finished() {
                        log::error!("Network gave up");
                        break;
                    }
                }
            }
        }
    }

    log::info!("Leaving");
    if let Some(mirror) = session.leave() {
        log::info!(
            "Rendered {} frames, {} mirror failures",
            mirror.backend().frames(),
            mirror.failures()
        );
    }
    if let Err(e) = session.closed().await {
        log::warn!("Network ended with: {e}");
    }

    Ok(())
}
