//! Simple example of using crawl-proxy-rotator.

use crawl_proxy_rotator::{
    CrawlLifecycle, ProxyProvider, RotationMode, RotatorConfig, RotatorMiddleware,
};
use reqwest_middleware::ClientBuilder;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let config = RotatorConfig::builder()
        // local forward proxies, e.g. started with `tinyproxy` or `mitmproxy`
        .provider(ProxyProvider::new("local-a", "127.0.0.1", 8888))
        .provider(ProxyProvider::new("local-b", "127.0.0.1", 8889).with_credentials("user", "secret"))
        .ban_threshold(2)
        .cooldown(Duration::from_secs(30))
        .rotation_mode(RotationMode::RoundRobin)
        .request_timeout(Duration::from_secs(5))
        .build();

    let rotator = RotatorMiddleware::smart(&config)?;

    let client = ClientBuilder::new(reqwest::Client::new())
        .with(rotator.clone())
        .build();

    for _ in 0..4 {
        match client.get("https://httpbin.org/ip").send().await {
            Ok(response) => println!("Status: {}", response.status()),
            Err(e) => println!("Request failed: {}", e),
        }
    }

    for entry in rotator.on_crawl_closed() {
        println!("{}", entry);
    }

    Ok(())
}
