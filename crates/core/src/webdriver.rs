//! WebDriver server sessions - spawning and health checking driver processes

use std::net::TcpListener;
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Settings;
use crate::error::PoolError;
use crate::model::DriverKind;
use crate::pool::{DriverSession, SessionFactory};

/// A running WebDriver server process
pub struct WebDriverSession {
    id: String,
    kind: DriverKind,
    child: Child,
    endpoint: String,
    closed: bool,
}

impl DriverSession for WebDriverSession {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> DriverKind {
        self.kind
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        info!("Stopping {} driver (pid: {})", self.kind, self.child.id());
        terminate(&mut self.child);
    }
}

impl Drop for WebDriverSession {
    fn drop(&mut self) {
        self.close();
    }
}

/// Try SIGTERM first, then force kill
fn terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let pid = Pid::from_raw(child.id() as i32);
        if kill(pid, Signal::SIGTERM).is_ok() {
            for _ in 0..10 {
                if let Ok(Some(_)) = child.try_wait() {
                    return;
                }
                std::thread::sleep(Duration::from_millis(20));
            }
        }
    }

    let _ = child.kill();
    let _ = child.wait();
}

/// Launches WebDriver servers (`chromedriver`, `geckodriver`, ...) on free
/// local ports
pub struct WebDriverFactory {
    settings: Settings,
    client: reqwest::Client,
}

impl WebDriverFactory {
    pub fn new(settings: Settings) -> Result<Self, PoolError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(2))
            .build()
            .map_err(|e| PoolError::Launch {
                kind: settings.default_driver,
                reason: format!("failed to build HTTP client: {}", e),
            })?;
        Ok(Self { settings, client })
    }

    /// Poll `GET /status` until the driver answers
    async fn wait_for_ready(
        &self,
        kind: DriverKind,
        endpoint: &str,
        child: &mut Child,
        timeout: Duration,
    ) -> Result<(), PoolError> {
        let status_url = format!("{}/status", endpoint);
        let start = std::time::Instant::now();
        let mut attempts = 0;

        while start.elapsed() < timeout {
            attempts += 1;

            if let Ok(Some(status)) = child.try_wait() {
                return Err(PoolError::Launch {
                    kind,
                    reason: format!("driver exited during startup ({})", status),
                });
            }

            match self.client.get(&status_url).send().await {
                Ok(resp) if resp.status().is_success() => {
                    debug!(kind = %kind, attempts, "Driver is ready at {}", endpoint);
                    return Ok(());
                }
                Ok(resp) => {
                    warn!("Driver status check returned {}", resp.status());
                }
                Err(e) => {
                    // Connection refused is expected while the driver starts
                    if !e.is_connect() {
                        warn!("Driver status check error: {}", e);
                    }
                }
            }

            sleep(Duration::from_millis(100)).await;
        }

        Err(PoolError::Launch {
            kind,
            reason: format!(
                "driver not ready after {} status checks ({} s)",
                attempts,
                timeout.as_secs()
            ),
        })
    }
}

#[async_trait]
impl SessionFactory for WebDriverFactory {
    async fn launch(&self, kind: DriverKind) -> Result<Box<dyn DriverSession>, PoolError> {
        let driver = self.settings.driver(kind);
        let binary = driver
            .binary
            .clone()
            .unwrap_or_else(|| kind.default_binary().into());
        let port = find_free_port().map_err(|e| PoolError::Launch {
            kind,
            reason: format!("no free port: {}", e),
        })?;
        let endpoint = format!("http://127.0.0.1:{}", port);

        info!("Spawning {} driver on port {}", kind, port);

        let mut cmd = Command::new(&binary);
        cmd.args(kind.port_args(port))
            .args(&driver.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        let mut child = cmd.spawn().map_err(|e| PoolError::Launch {
            kind,
            reason: format!("failed to spawn {}: {}", binary.display(), e),
        })?;

        let timeout = Duration::from_secs(driver.startup_timeout_secs);
        if let Err(e) = self.wait_for_ready(kind, &endpoint, &mut child, timeout).await {
            terminate(&mut child);
            return Err(e);
        }

        Ok(Box::new(WebDriverSession {
            id: Uuid::new_v4().to_string(),
            kind,
            child,
            endpoint,
            closed: false,
        }))
    }
}

/// Find a free port to use
fn find_free_port() -> std::io::Result<u16> {
    Ok(TcpListener::bind("127.0.0.1:0")?.local_addr()?.port())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DriverSettings;

    #[test]
    fn test_find_free_port() {
        let port1 = find_free_port().unwrap();
        let port2 = find_free_port().unwrap();

        // Ports should be in valid range
        assert!(port1 > 1024);
        assert!(port2 > 1024);
    }

    #[tokio::test]
    async fn test_missing_binary_is_a_launch_error() {
        let mut settings = Settings::default();
        settings.drivers.insert(
            "chrome".into(),
            DriverSettings {
                binary: Some("/nonexistent/golem-chromedriver".into()),
                ..Default::default()
            },
        );
        let factory = WebDriverFactory::new(settings).unwrap();
        let err = factory.launch(DriverKind::Chrome).await.err().unwrap();
        assert!(matches!(err, PoolError::Launch { kind: DriverKind::Chrome, .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_driver_exiting_during_startup_is_reported() {
        let mut settings = Settings::default();
        settings.drivers.insert(
            "firefox".into(),
            DriverSettings {
                binary: Some("false".into()),
                startup_timeout_secs: 5,
                ..Default::default()
            },
        );
        let factory = WebDriverFactory::new(settings).unwrap();
        let err = factory.launch(DriverKind::Firefox).await.err().unwrap();
        match err {
            PoolError::Launch { reason, .. } => assert!(reason.contains("exited"), "{reason}"),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
