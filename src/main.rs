use std::sync::Arc;

use telemetry_ingest::{
    broker::{spawn_monitor, Listener},
    buffers::{spawn_sweeper, MessageBuffers},
    config::Config,
    pipeline::Pipeline,
    repository::{memory::MemoryRepository, redis::RedisRepository, DeviceRepository},
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = Config::from_env()?;
    log::info!(
        "MQTT {}:{} as {}",
        config.mqtt.host,
        config.mqtt.port,
        config.mqtt.client_id
    );

    let mut error_count = 0;
    loop {
        if let Err(e) = consumer(&config).await {
            log::error!("{}", e);
            error_count += 1;
            log::error!("count errors: {}", error_count);
        }
        tokio::time::sleep(config.mqtt.retry_interval).await;
    }
}

async fn consumer(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let repository: Arc<dyn DeviceRepository> = match &config.redis_url {
        Some(url) => Arc::new(RedisRepository::connect(url).await?),
        None => {
            log::warn!("REDIS_URL not specified, telemetry is kept in memory only");
            Arc::new(MemoryRepository::new())
        }
    };
    let pipeline = Arc::new(Pipeline::new(repository));

    let buffers = MessageBuffers::new();
    let sweeper = spawn_sweeper(buffers);

    let listener = Listener::new(&config.mqtt, pipeline);
    let monitor = spawn_monitor(listener.connection_state());

    listener.run().await;

    sweeper.abort();
    monitor.abort();
    Ok(())
}
