use vagon_core::Config;

// Use mimalloc as the global allocator for better performance and lower fragmentation,
// especially when running on musl-based systems inside containers.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let config = Config::from_env()?;

    vagon_infra::init_telemetry(config.json_logs())
        .map_err(|e| anyhow::anyhow!("Failed to initialize telemetry: {}", e))?;

    // Initialize the application (record store, storage, services, routes)
    let (state, router) = vagon_api::setup::initialize_app(config.clone()).await?;

    vagon_api::setup::server::start_server(&config, state, router).await?;

    Ok(())
}
