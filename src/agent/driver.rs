//! WebDriver binary lookup and the local driver service
//!
//! Driver paths are resolved once per browser for the whole process and
//! never re-resolved mid-run.

use crate::agent::{AgentError, AgentResult};
use crate::config::Browser;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

static CHROMEDRIVER_PATH: OnceCell<PathBuf> = OnceCell::new();
static GECKODRIVER_PATH: OnceCell<PathBuf> = OnceCell::new();

/// How long a freshly spawned driver gets to open its port
const STARTUP_TIMEOUT: Duration = Duration::from_secs(15);

fn binary_name(browser: Browser) -> &'static str {
    match (browser, cfg!(windows)) {
        (Browser::Chrome, false) => "chromedriver",
        (Browser::Chrome, true) => "chromedriver.exe",
        (Browser::Firefox, false) => "geckodriver",
        (Browser::Firefox, true) => "geckodriver.exe",
    }
}

fn env_var(browser: Browser) -> &'static str {
    match browser {
        Browser::Chrome => "CHROMEDRIVER_PATH",
        Browser::Firefox => "GECKODRIVER_PATH",
    }
}

/// Returns the driver binary for `browser`, locating it on first use
///
/// # Lookup Order
///
/// 1. `CHROMEDRIVER_PATH` / `GECKODRIVER_PATH` environment variable
/// 2. Directories on `PATH`
/// 3. The offline driver cache under `~/.wdm/drivers`, newest version first
pub fn driver_path(browser: Browser) -> AgentResult<&'static Path> {
    let cell = match browser {
        Browser::Chrome => &CHROMEDRIVER_PATH,
        Browser::Firefox => &GECKODRIVER_PATH,
    };

    cell.get_or_try_init(|| {
        let path = locate_driver(browser)?;
        info!("Using {} at {}", binary_name(browser), path.display());
        Ok(path)
    })
    .map(PathBuf::as_path)
}

fn locate_driver(browser: Browser) -> AgentResult<PathBuf> {
    let name = binary_name(browser);

    if let Some(explicit) = std::env::var_os(env_var(browser)) {
        let path = PathBuf::from(explicit);
        if path.is_file() {
            return Ok(path);
        }
        warn!(
            "{} points to {} which is not a file",
            env_var(browser),
            path.display()
        );
    }

    if let Some(paths) = std::env::var_os("PATH") {
        if let Some(found) = std::env::split_paths(&paths)
            .map(|dir| dir.join(name))
            .find(|candidate| candidate.is_file())
        {
            return Ok(found);
        }
    }

    if let Some(home) = std::env::var_os("HOME").or_else(|| std::env::var_os("USERPROFILE")) {
        let cache_dir = Path::new(&home).join(".wdm").join("drivers");
        if let Some(found) = search_cache(&cache_dir, name, 6) {
            debug!("Found cached driver {}", found.display());
            return Ok(found);
        }
    }

    Err(AgentError::Driver(format!(
        "{} not found; set {} or install it on PATH",
        name,
        env_var(browser)
    )))
}

/// Depth-limited search for `name`; among matches the greatest path wins,
/// which picks the newest version directory in the cache layout
fn search_cache(dir: &Path, name: &str, depth: usize) -> Option<PathBuf> {
    let entries = std::fs::read_dir(dir).ok()?;
    let mut best: Option<PathBuf> = None;

    for entry in entries.flatten() {
        let path = entry.path();
        let candidate = if path.is_dir() {
            if depth == 0 {
                continue;
            }
            search_cache(&path, name, depth - 1)
        } else if path.file_name().is_some_and(|f| f == name) {
            Some(path)
        } else {
            None
        };

        if let Some(candidate) = candidate {
            if best.as_ref().map_or(true, |b| candidate > *b) {
                best = Some(candidate);
            }
        }
    }

    best
}

/// A driver process spawned for this run
///
/// Killed on [`shutdown`](DriverService::shutdown) or when dropped.
pub struct DriverService {
    endpoint: String,
    child: Mutex<Option<Child>>,
}

impl DriverService {
    /// Spawns the driver on a free local port and waits until it accepts connections
    pub async fn start(browser: Browser) -> AgentResult<Self> {
        let binary = driver_path(browser)?;
        let port = free_port()?;

        let mut command = Command::new(binary);
        match browser {
            Browser::Chrome => {
                command.arg(format!("--port={}", port)).arg("--log-level=SEVERE");
            }
            Browser::Firefox => {
                command.arg("--port").arg(port.to_string());
            }
        }
        command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = command
            .spawn()
            .map_err(|e| AgentError::Driver(format!("failed to spawn {}: {}", binary.display(), e)))?;

        let started = Instant::now();
        loop {
            if port_open(port).await {
                break;
            }

            if let Ok(Some(status)) = child.try_wait() {
                return Err(AgentError::Driver(format!(
                    "{} exited early with status {}",
                    binary.display(),
                    status
                )));
            }

            if started.elapsed() > STARTUP_TIMEOUT {
                let _ = child.kill().await;
                return Err(AgentError::Driver(format!(
                    "{} did not open port {} within {:?}",
                    binary.display(),
                    port,
                    STARTUP_TIMEOUT
                )));
            }

            tokio::time::sleep(Duration::from_millis(200)).await;
        }

        let endpoint = format!("http://127.0.0.1:{}", port);
        info!("Driver service listening on {}", endpoint);

        Ok(Self {
            endpoint,
            child: Mutex::new(Some(child)),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Stops the driver process
    pub async fn shutdown(&self) {
        let child = self.child.lock().take();
        if let Some(mut child) = child {
            if let Err(e) = child.kill().await {
                debug!("Driver process already gone: {}", e);
            }
        }
    }
}

/// True once something accepts connections on the local port
async fn port_open(port: u16) -> bool {
    let connect = tokio::net::TcpStream::connect(("127.0.0.1", port));
    matches!(
        tokio::time::timeout(Duration::from_millis(200), connect).await,
        Ok(Ok(_))
    )
}

fn free_port() -> AgentResult<u16> {
    let listener = TcpListener::bind(("127.0.0.1", 0))
        .map_err(|e| AgentError::Driver(format!("no free local port: {}", e)))?;
    let port = listener
        .local_addr()
        .map_err(|e| AgentError::Driver(e.to_string()))?
        .port();
    Ok(port)
}
