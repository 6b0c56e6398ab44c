use std::{net::SocketAddr, sync::Arc, time::Duration};

use tokio::{signal, sync::mpsc};
use tracing::{error, info};

use despensa_api as api;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cfg = api::config::load_config()?;
    api::config::init_tracing(cfg.log_level(), cfg.log_json);

    // Init DB
    let db_pool = api::db::establish_connection_from_app_config(&cfg).await?;
    if cfg.auto_migrate {
        api::db::run_migrations(&db_pool).await.map_err(|e| {
            error!("Failed running migrations: {}", e);
            e
        })?;
    }
    let db_arc = Arc::new(db_pool);

    // Init events
    let (event_tx, event_rx) = mpsc::channel(1024);
    let event_sender = api::events::EventSender::new(event_tx);
    tokio::spawn(api::events::process_events(event_rx));

    // Card gateway client
    let gateway: Arc<dyn api::gateway::PaymentGateway> = Arc::new(
        api::gateway::CardGatewayClient::new(
            cfg.gateway_base_url.clone(),
            cfg.gateway_secret_key.clone(),
            Duration::from_secs(cfg.gateway_timeout_secs),
        )
        .map_err(|e| format!("failed to build gateway client: {e}"))?,
    );

    // Collaborators: cart/pricing and saved addresses live in sibling
    // services; the in-memory implementations back local development.
    let cart_store: Arc<dyn api::collaborators::CartStore> =
        Arc::new(api::collaborators::InMemoryCartStore::new());
    let address_book: Arc<dyn api::collaborators::AddressBook> =
        Arc::new(api::collaborators::InMemoryAddressBook::new());
    let queue: Arc<dyn api::message_queue::MessageQueue> =
        Arc::new(api::message_queue::InMemoryMessageQueue::new());

    let services = api::handlers::AppServices::new(
        db_arc.clone(),
        &cfg,
        Arc::new(event_sender.clone()),
        gateway,
        cart_store,
        address_book,
        queue,
    );

    let app_state = api::AppState {
        db: db_arc,
        config: cfg.clone(),
        event_sender,
        services,
    };

    let router = api::build_router(app_state);

    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port).parse()?;
    info!("listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received");
}
