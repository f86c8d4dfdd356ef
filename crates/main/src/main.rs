//! 主程序入口
//!
//! 加载配置、初始化日志、装配服务，运行邮件投递 worker 直到收到退出信号。

mod app;

use infrastructure::Infrastructure;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = config::AppConfig::load()?;
    tracing::info!(config = %config.sanitize(), "配置已加载");

    let infra = Infrastructure::connect(&config).await?;
    let (services, email_worker) = app::build(&config, &infra);
    tracing::info!(storage = ?config.storage, "服务已就绪");

    tokio::signal::ctrl_c().await?;
    tracing::info!("收到退出信号，等待邮件队列排空");

    // 丢弃所有持有队列句柄的服务，worker 才会退出
    drop(services);
    email_worker.await?;

    tracing::info!("已退出");
    Ok(())
}
