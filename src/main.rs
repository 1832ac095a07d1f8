use jobconsult::{app, state::AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    app::init_tracing("jobconsult=debug,axum=info,tower_http=info");

    let state = AppState::init().await?;
    let addr = app::bind_addr()?;
    app::serve(app::build_app(state), addr).await
}
