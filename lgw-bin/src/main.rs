mod logger;
mod server;
mod settings;

use actix_web::{App, HttpServer};
use clap::Parser;
use lgw_core::{GatewayServer, IoCounters};
use lgw_error::GwResult;
use lgw_frontend_basicstation::LbsFrontend;
use logger::Logger;
use server::StandaloneServer;
use settings::Settings;
use std::{path::PathBuf, sync::Arc};
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};

/// LoRaWAN Gateway Server - gateway-facing I/O layer
///
/// Terminates Semtech UDP and LoRa Basics Station gateway connections and
/// normalizes their traffic into a single in-memory representation.
#[derive(Parser)]
#[command(name = "lora-gateway-server")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "LoRaWAN Gateway Server", long_about = None)]
struct Cli {
    /// Sets a custom config file with full path
    #[arg(short, long, env = "LGW_CONFIG")]
    config: Option<PathBuf>,
}

#[actix_web::main]
async fn main() -> GwResult<()> {
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;

    let level = settings.log.level.parse::<Level>().unwrap_or(Level::INFO);
    let mut logger = Logger::new(Some(level));
    logger.initialize()?;

    let cancel = CancellationToken::new();
    let server = StandaloneServer::new(cancel.clone());
    let counters = IoCounters::global();

    let udp_socket = UdpSocket::bind(&settings.udp.listen).await?;
    info!(listen = %settings.udp.listen, "Semtech UDP frontend");
    let udp_task = tokio::spawn(lgw_frontend_udp::serve(
        Arc::clone(&server) as Arc<dyn GatewayServer>,
        udp_socket,
        settings.udp.to_config(),
        Arc::clone(&counters),
        cancel.child_token(),
    ));

    let lbs = LbsFrontend::new(
        Arc::clone(&server) as Arc<dyn GatewayServer>,
        settings.ws.to_config(),
        Arc::clone(&counters),
        cancel.child_token(),
    );
    let web_state = Arc::new(lgw_web::WebState {
        server: Arc::clone(&server) as Arc<dyn GatewayServer>,
        config: settings.web.to_config(),
    });
    info!(listen = %settings.ws.listen, "LBS LNS frontend and web API");
    let http = HttpServer::new(move || {
        App::new()
            .configure(lgw_frontend_basicstation::configure(Arc::clone(&lbs)))
            .configure(lgw_web::configure(Arc::clone(&web_state)))
    })
    .bind(&settings.ws.listen)?
    .run();

    tokio::select! {
        result = http => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }

    cancel.cancel();
    let _ = udp_task.await;
    info!("gateway server stopped");
    Ok(())
}
