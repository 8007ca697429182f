/// Entry point for the Sysdig Monitor.
///
/// Traces all containers on the host with `sysdig` and serves their statistics
/// over HTTP. The tracer needs root privileges.
///
/// # Examples
///
/// ```bash
/// LISTEN_ADDR=127.0.0.1:8080 RUST_LOG=info sysdig-monitor
/// ```
#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let config = sysdig_monitor::config::Config::from_env()?;
    sysdig_monitor::run(config).await
}
