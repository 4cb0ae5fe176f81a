use anyhow::Context;
use clap::Parser;
use tracing::info;

use hcproxy::cache::{CacheStore, CachingInterceptor, MemoryStore, RedisStore};
use hcproxy::config::{Cli, StoreKind};
use hcproxy::proxy::{ProxyOptions, ProxyServer};
use hcproxy::{CachePolicy, telemetry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    telemetry::init(cli.debug).context("failed to install tracing subscriber")?;

    let policy = cli.policy().context("failed to load caching policy")?;
    let options = cli.proxy_options()?;
    let listen = cli.listen_addr();

    match cli.store {
        StoreKind::Redis => {
            let settings = cli.redis_settings();
            let store = RedisStore::connect(&settings).await.with_context(|| {
                format!("cannot reach redis at {}:{}", settings.host, settings.port)
            })?;
            serve(&listen, options, policy, store).await
        }
        StoreKind::Memory => {
            info!(capacity = cli.memory_capacity, "using in-memory cache store");
            let store = MemoryStore::with_capacity(cli.memory_capacity);
            serve(&listen, options, policy, store).await
        }
    }
}

async fn serve<S>(listen: &str, options: ProxyOptions, policy: CachePolicy, store: S) -> anyhow::Result<()>
where
    S: CacheStore + 'static,
{
    let proxy = ProxyServer::bind(listen, options).await?;
    println!("Start HTTP caching proxy on {}", proxy.local_addr());

    let interceptor = CachingInterceptor::new(policy, store);
    tokio::select! {
        result = proxy.run(interceptor) => result?,
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for shutdown signal")?;
            info!("shutting down");
        }
    }
    Ok(())
}
