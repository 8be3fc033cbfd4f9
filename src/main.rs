// src/main.rs - Kiln host entry point
use clap::Parser;
use kiln_rs::config::{self, Config};
use kiln_rs::hardware::SerialLink;
use kiln_rs::scheduler::SystemClock;
use kiln_rs::web::{self, AppState};
use kiln_rs::shutdown::shut_down;
use kiln_rs::{KilnSources, RelayLink, Scheduler, SshLauncher, ThermalController};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

#[derive(Parser, Debug)]
#[command(name = "kiln-host", about = "Kiln controller: PID relay control, firing schedules and remote status relay.")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(default_value = "kiln.toml")]
    config: String,

    /// Address for the HTTP API (overrides `[web] bind`)
    #[arg(long)]
    bind: Option<String>,
}

const RELAY_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), BoxError> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let cli = Cli::parse();
    tracing::info!("Starting kiln host");
    tracing::info!("Loading configuration from: {}", cli.config);

    let mut config: Config = config::load_config(&cli.config).map_err(|e| {
        tracing::error!("Failed to load config from '{}': {}", cli.config, e);
        Box::new(e) as BoxError
    })?;
    if let Some(bind) = cli.bind {
        config.web.bind = bind;
    }

    tracing::info!(
        "Kiln: {} @ {} baud, {}..{} degrees",
        config.controller.device,
        config.controller.baud,
        config.controller.min_temperature,
        config.controller.max_temperature
    );

    let serial = SerialLink::open(&config.controller.device, config.controller.baud)?;
    tracing::info!("Listening for kiln lines on {}", serial.name());
    let lines = serial.lines();
    let clock = Arc::new(SystemClock);
    let limits = config.controller.limits();
    let controller = ThermalController::new(config.controller.clone(), Arc::new(serial), clock.clone());
    let scheduler = Scheduler::new(&config.schedule, limits, Arc::new(controller.clone()), clock);

    let control_loop = {
        let controller = controller.clone();
        tokio::spawn(async move { controller.run(lines).await })
    };

    let relay = config.relay.as_ref().map(|relay_config| {
        tracing::info!("Relaying status to {}@{}", relay_config.user, relay_config.hostname);
        RelayLink::spawn(
            Arc::new(SshLauncher::new(relay_config)),
            Arc::new(KilnSources {
                controller: controller.clone(),
                scheduler: scheduler.clone(),
            }),
            relay_config.reconnect_delay(),
        )
    });

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let server = {
        let state = AppState {
            controller: controller.clone(),
            scheduler: scheduler.clone(),
        };
        let bind = config.web.bind.clone();
        tokio::spawn(async move {
            let shutdown = async move {
                let _ = shutdown_rx.wait_for(|stop| *stop).await;
            };
            if let Err(e) = web::serve(&bind, state, shutdown).await {
                tracing::error!("Web server failed: {}", e);
            }
        })
    };

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");

    shut_down(&controller, &scheduler, relay, RELAY_SHUTDOWN_TIMEOUT).await;
    shutdown_tx.send_replace(true);

    let _ = control_loop.await;
    let _ = server.await;
    tracing::info!("Kiln host stopped");
    Ok(())
}
