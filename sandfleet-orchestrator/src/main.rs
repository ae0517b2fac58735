use sandfleet_orchestrator::config::{FleetConfig, MachineInventory};
use sandfleet_orchestrator::provider_manager::ProviderManager;
use sandfleet_orchestrator::result_server::SharedResultPort;
use sandfleet_orchestrator::store::{InMemoryMachineStore, MachineStore, PgMachineStore};
use sandfleet_orchestrator::{capacity_job, http, FleetController, Machinery};
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::time::Duration;

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt::init();

    let config = FleetConfig::from_env().expect("invalid configuration");

    // 1. Machine table
    let store: Arc<dyn MachineStore> = match std::env::var("DATABASE_URL") {
        Ok(database_url) if !database_url.trim().is_empty() => {
            let pool = PgPoolOptions::new()
                .max_connections(5)
                .connect(&database_url)
                .await
                .expect("Failed to connect to DB");
            sqlx::migrate!("../sqlx-migrations")
                .run(&pool)
                .await
                .expect("Failed to run database migrations");
            tracing::info!("✅ Database migrations applied");
            Arc::new(PgMachineStore::new(pool))
        }
        _ => {
            tracing::warn!("DATABASE_URL not set, using in-memory machine table");
            Arc::new(InMemoryMachineStore::new())
        }
    };

    // 2. Static inventory
    if let Ok(path) = std::env::var("MACHINES_FILE") {
        let inventory = MachineInventory::load(&path).expect("invalid machine inventory");
        for machine in &inventory.machines {
            store
                .upsert_machine(&machine.to_new_machine(&config))
                .await
                .expect("Failed to seed machine inventory");
        }
        tracing::info!("📋 {} static machine(s) loaded from {}", inventory.machines.len(), path);
    }

    // 3. Provider + controller
    let provider_name = ProviderManager::current_provider_name();
    let provider = ProviderManager::get_provider(&provider_name, &config)
        .expect("cloud provider not available");
    tracing::info!("☁️ provider={} zone={}", provider_name, config.region);

    let resultserver_port: u16 = std::env::var("RESULTSERVER_PORT")
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(2042);
    let result_server = Arc::new(SharedResultPort::new(resultserver_port));

    let controller = Arc::new(FleetController::new(
        provider,
        store,
        result_server,
        config,
    ));
    controller
        .initialize()
        .await
        .expect("fleet initialization failed");

    // 4. Background jobs
    let every: u64 = std::env::var("CAPACITY_JOB_INTERVAL_SECS")
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(0);
    if every > 0 {
        let controller_job = controller.clone();
        tokio::spawn(async move {
            capacity_job::run(controller_job, Duration::from_secs(every)).await;
        });
    }

    // 5. HTTP server
    let port: u16 = std::env::var("ORCHESTRATOR_PORT")
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(8002);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Orchestrator listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, http::router(controller)).await.unwrap();
}
