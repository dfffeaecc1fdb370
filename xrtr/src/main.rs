use std::fs;

use log::{error, info};
use tokio::sync::{broadcast, mpsc};

mod bundle;
mod catalogue;
mod common;
mod config;
mod link;
mod nodeagent;
mod outbound;
mod priority_tree;
mod queue;
mod router;
mod supervisor;
mod transport;
mod unrouted;
mod wildmap;

use crate::common::settings::Settings;
use crate::common::shutdown::Shutdown;
use crate::supervisor::{ReloadConfig, Supervisor};

use actix::{Actor, System};

#[actix_rt::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    info!("Starting up");
    let settings: Settings = Settings::from_env();
    info!("Starting with settings: {settings:?}");

    let (outbound_tx, outbound_rx) = mpsc::channel(1024);
    let supervisor_addr = Supervisor::new(outbound_tx, settings.local_admin_node).start();

    if let Some(path) = &settings.config_path {
        match fs::read_to_string(path) {
            Ok(text) => {
                let directives = config::parse_file(&text);
                info!("loaded {} directives from {path}", directives.len());
                supervisor_addr.do_send(ReloadConfig(directives));
            }
            Err(e) => error!("failed to read config file {path}: {e}"),
        }
    }

    let (notify_shutdown, _) = broadcast::channel::<()>(1);
    let (shutdown_complete_tx, mut shutdown_complete_rx) = mpsc::channel::<()>(1);

    let transport_settings = settings.clone();
    let transport_supervisor = supervisor_addr.clone();
    let transport_cancel = notify_shutdown.subscribe();
    let transport_shutdown_complete_tx = shutdown_complete_tx.clone();
    let transport_task = tokio::task::Builder::new()
        .name("Transport")
        .spawn(async move {
            transport::run(transport_settings, transport_supervisor, outbound_rx, transport_cancel).await;
            drop(transport_shutdown_complete_tx);
        })
        .unwrap();

    let ctrl_c = tokio::signal::ctrl_c();

    tokio::select! {
        res = transport_task => {
            if res.is_err() {
                error!("transport task panicked. Aborting...");
            }
        }
        _ = ctrl_c => {
            info!("Shutting down");
        }
    }

    info!("Stopping external connections");
    // When `notify_shutdown` is dropped, all tasks which have `subscribe`d will
    // receive the shutdown signal and can exit
    drop(notify_shutdown);
    drop(shutdown_complete_tx);

    info!("Stopping individual actors");
    supervisor_addr.do_send(Shutdown {});

    info!("Now stopping actor system");
    System::current().stop();

    let _ = shutdown_complete_rx.recv().await;

    info!("All done, see you");
}
