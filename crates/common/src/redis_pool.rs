use redis::Client;
use redis::aio::ConnectionManager;

/// Open a Redis client and a multiplexed connection manager on top of it.
///
/// The client is kept alongside the manager because blocking commands
/// (`BLPOP` in the delivery queue) need a dedicated connection of their own.
pub async fn create_redis_pool(redis_url: &str) -> anyhow::Result<(Client, ConnectionManager)> {
    let client = Client::open(redis_url)?;
    let manager = ConnectionManager::new(client.clone()).await?;

    tracing::info!("Connected to Redis");
    Ok((client, manager))
}
