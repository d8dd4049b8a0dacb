use radiocast::{init, server, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::load_from_env();
    config.validate()?;

    let ctx = init(config)?;
    log::info!("radiocast {} initialized", env!("CARGO_PKG_VERSION"));

    let result = server::serve(ctx.clone()).await;

    // Orderly teardown: stop any live session, then let the job worker
    // drain and mark still-pending jobs failed.
    ctx.supervisor.shutdown().await;
    ctx.jobs.shutdown().await;

    result
}
