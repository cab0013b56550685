use tokio::net::TcpStream;
use tokio::time::{self, Duration, Instant};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(1);
pub const RETRY_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    TimedOut,
    /// `gave_up` reported that waiting is pointless (the process died).
    Abandoned,
}

/// Polls `host:port` with bare TCP connects until one succeeds or `timeout`
/// elapses. `gave_up` is checked between attempts.
pub async fn wait_for_port(
    host: &str,
    port: u16,
    timeout: Duration,
    gave_up: impl Fn() -> bool,
) -> Readiness {
    let started = Instant::now();
    loop {
        let attempt = time::timeout(CONNECT_TIMEOUT, TcpStream::connect((host, port))).await;
        if let Ok(Ok(_stream)) = attempt {
            return Readiness::Ready;
        }
        if started.elapsed() >= timeout {
            return Readiness::TimedOut;
        }
        if gave_up() {
            return Readiness::Abandoned;
        }
        time::sleep(RETRY_INTERVAL).await;
    }
}
