//! NetSync demo client
//!
//! Connects to a relay server, runs the sample behaviours at a fixed frame
//! rate and periodically publishes a random cube color.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use netsync_client::samples::{
    ColorCube, DebugOverlay, RpcReceiver, ScaleSync, VariableInspector, XrModeSwitch,
};
use netsync_client::{Session, SessionConfig, SessionEvent, Transform};
use parking_lot::Mutex;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const FRAME_INTERVAL: Duration = Duration::from_millis(33);
const ANNOUNCE_INTERVAL: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = SessionConfig::from_env().context("Invalid session configuration")?;
    let session = Session::init(config);
    let client_no = session.connect().await.with_context(|| {
        format!(
            "Failed to join room '{}' on {}",
            session.config().room_id,
            session.config().server_addr
        )
    })?;
    tracing::info!(client_no, "Joined");

    let overlay = Arc::new(Mutex::new(DebugOverlay::default()));
    let cube = Arc::new(Mutex::new(ColorCube::default()));
    let scale = Arc::new(Mutex::new(ScaleSync::default()));
    session.subscribe(Arc::clone(&overlay));
    session.subscribe(Arc::clone(&cube));
    session.subscribe(Arc::clone(&scale));
    session.subscribe(RpcReceiver::default());
    session.subscribe(XrModeSwitch::default());
    session.subscribe_fn(|_, event| match event {
        SessionEvent::AvatarConnected { client_no } => tracing::info!(client_no, "Avatar joined"),
        SessionEvent::AvatarDisconnected { client_no } => tracing::info!(client_no, "Avatar left"),
        SessionEvent::RpcReceived(rpc) => {
            tracing::info!(sender = rpc.sender, function = %rpc.function, args = ?rpc.args, "RPC");
        }
        _ => {}
    });

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    let mut frame = tokio::time::interval(FRAME_INTERVAL);
    let mut announce = tokio::time::interval(ANNOUNCE_INTERVAL);
    let mut angle = 0.0_f32;

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = frame.tick() => {
                angle += FRAME_INTERVAL.as_secs_f32();
                session.set_local_transform(Transform::from_position([angle.cos(), 1.0, angle.sin()]));
                session.poll();
                if !session.is_connected() {
                    tracing::warn!("Connection lost, exiting");
                    break;
                }
            }
            _ = announce.tick() => {
                if let Some(color) = cube.lock().randomize(session) {
                    RpcReceiver::send_color(session, color);
                }
                #[allow(clippy::cast_precision_loss)]
                let target_scale = 1.0 + (client_no % 4) as f32 * 0.25;
                scale.lock().publish(session, target_scale);
                tracing::info!("\n{}", overlay.lock().text());
                tracing::info!("\n{}", VariableInspector::render_all(session));
            }
        }
    }

    session.disconnect();
    session.poll();
    Ok(())
}
