use clap::Parser;
use std::fs;
use tlsfactory::{
    config::Config,
    constants::*,
    emit_system_event,
    endpoint::EndpointRegistry,
    events::{model::LogLevel, EventDispatcher},
    factory::FactoryService,
    network::{bind_factory_listener, serve_factory},
};
use tokio::signal;
use tokio::sync::watch;

#[derive(Parser, Debug)]
#[command(author, version, about = "TLS endpoint factory for handshake test matrices")]
struct Args {
    /// Optional path to config file (TOML)
    #[arg(short, long)]
    config: Option<String>,

    /// Override the factory RPC listen address (e.g. 127.0.0.1:12010)
    #[arg(short, long)]
    listen: Option<String>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| "config.toml".to_string());
    let config = match fs::read_to_string(&config_path) {
        Ok(content) => match Config::from_toml_str(&content) {
            Ok(cfg) => {
                println!("{}Loaded config from: {}", ICON_PLACEHOLDER, config_path);
                cfg
            }
            Err(err) => {
                eprintln!("❌ Failed to load config file '{}': {}", config_path, err);
                std::process::exit(1);
            }
        },
        Err(_) => {
            println!(
                "⚠️ No config file found at '{}', falling back to default config.",
                config_path
            );
            Config::default()
        }
    };

    // Events first so endpoint and listener activity is captured from the start
    tlsfactory::events::init_events_from_config(config.logging.as_ref()).await;

    let listen = args
        .listen
        .clone()
        .unwrap_or_else(|| config.factory_listen_addr());
    let listener = match bind_factory_listener(&listen).await {
        Ok(l) => l,
        Err(e) => {
            eprintln!("❌ Cannot bind factory listener on {}: {}", listen, e);
            std::process::exit(1);
        }
    };
    let bound = listener
        .local_addr()
        .map(|a| a.to_string())
        .unwrap_or(listen);

    let registry = EndpointRegistry::new(config.endpoint_settings());
    let service = FactoryService::new(registry.clone());
    let mut remote_shutdown = service.shutdown_signal();
    let (stop_tx, stop_rx) = watch::channel(false);
    let server = tokio::spawn(serve_factory(listener, service.clone(), stop_rx));

    emit_system_event!(
        "factory",
        LogLevel::Info,
        "factory_ready",
        Some(format!("listen={} version={}", bound, full_version()))
    );
    let app_name = config.app_name();
    println!(
        "🟢 {} {} listening on {}. Press Ctrl+C to shut down...",
        app_name,
        full_version(),
        bound
    );

    tokio::select! {
        res = signal::ctrl_c() => {
            if let Err(e) = res {
                eprintln!("❌ Failed to listen for shutdown signal: {}", e);
            }
            println!("🛑 {} shutting down gracefully.", app_name);
        }
        _ = remote_shutdown.changed() => {
            println!("🛑 {} shutting down on remote request.", app_name);
        }
    }

    let closed = registry.shutdown().await;
    let _ = stop_tx.send(true);
    let _ = server.await;
    emit_system_event!(
        "factory",
        LogLevel::Info,
        "factory_stopped",
        Some(format!("endpoints_closed={}", closed))
    );
    // let the dispatcher task hand queued events to the sinks before flushing
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    if let Some(d) = EventDispatcher::global() {
        d.flush().await;
    }
}
