use std::error::Error;

use cloudpilot::{init_logger, server, Settings};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    dotenvy::dotenv().ok();
    init_logger();

    let settings = Settings::from_env()?;
    log::info!(
        "starting with providers {:?}, vector backend '{}'",
        settings.cloud_providers,
        settings.vector_backend.name()
    );

    let state = server::AppState::build(settings)?;
    server::serve(state).await
}
