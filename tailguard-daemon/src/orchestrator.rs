//! Session orchestration -- assembly, signal handling, and lifecycle management.
//!
//! The [`Orchestrator`] is the central coordinator of `tailguard-daemon`.
//! It resolves the configured patterns, builds the monitoring session and
//! its notifier, runs the main event loop, and shuts everything down in order.
//!
//! # Main loop
//!
//! - `SIGTERM` / `SIGINT` -> graceful stop
//! - `SIGHUP` -> re-read `patterns`/`patterns_file` and swap the rule set
//! - health interval tick -> log an aggregated [`DaemonHealth`] report

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use tailguard_core::config::{MonitorConfig, TailguardConfig};
use tailguard_core::metrics as m;
use tailguard_core::pipeline::Pipeline;
use tailguard_monitor::{
    Alert, CommandNotifier, MonitorSession, Notifier, PatternLoader, RuleSet, SessionConfig,
};

use crate::health::{self, DaemonHealth};
use crate::metrics_server;

/// Signals the main loop reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonSignal {
    /// SIGTERM or SIGINT.
    Shutdown(&'static str),
    /// SIGHUP.
    Reload,
}

/// The main daemon orchestrator.
pub struct Orchestrator {
    /// Loaded and validated configuration.
    config: TailguardConfig,
    /// Config file to re-read on SIGHUP (None when built from memory).
    config_path: Option<PathBuf>,
    /// The monitoring session (built, not yet started).
    session: MonitorSession,
    /// Shutdown broadcast for background tasks.
    shutdown_tx: broadcast::Sender<()>,
    /// Daemon start time (for uptime reporting).
    start_time: Instant,
}

impl Orchestrator {
    /// Load configuration and build the orchestrator.
    ///
    /// # Errors
    ///
    /// - Configuration file cannot be read, parsed, or validated
    /// - Patterns cannot be loaded or compiled
    pub async fn build(config_path: &Path) -> Result<Self> {
        let config = TailguardConfig::load(config_path)
            .await
            .with_context(|| format!("failed to load config {}", config_path.display()))?;
        Self::build_with_path(config, Some(config_path.to_path_buf())).await
    }

    /// Build from an already-loaded configuration.
    ///
    /// SIGHUP reloads are unavailable without a config path.
    pub async fn build_from_config(config: TailguardConfig) -> Result<Self> {
        Self::build_with_path(config, None).await
    }

    async fn build_with_path(config: TailguardConfig, config_path: Option<PathBuf>) -> Result<Self> {
        config.validate().context("config validation failed")?;

        if config.metrics.enabled {
            metrics_server::install_metrics_recorder(&config.metrics)?;
        }

        let session_config = session_config(&config).await?;

        let mut builder = MonitorSession::builder().config(session_config);
        if config.notifier.enabled {
            let notifier: Arc<dyn Notifier> =
                Arc::new(CommandNotifier::from_config(&config.notifier));
            tracing::info!(command = %config.notifier.command, "notifier enabled");
            builder = builder.notifier(notifier);
        } else {
            tracing::info!("notifier disabled, alerts are audited only");
        }
        let session = builder.build().context("failed to build monitoring session")?;

        if config.metrics.enabled {
            record_daemon_metrics();
        }

        let (shutdown_tx, _) = broadcast::channel(4);

        tracing::info!(
            session_id = %session.id(),
            sources = config.monitor.sources.len(),
            "orchestrator initialized"
        );

        Ok(Self {
            config,
            config_path,
            session,
            shutdown_tx,
            start_time: Instant::now(),
        })
    }

    /// Start the session and run until SIGTERM/SIGINT.
    ///
    /// # Errors
    ///
    /// - PID file cannot be written
    /// - The session fails to start (e.g. no readable sources)
    /// - Signal handlers cannot be installed
    pub async fn run(&mut self) -> Result<()> {
        let pid_file = self.pid_file();
        if let Some(path) = &pid_file {
            write_pid_file(path)?;
        }

        let result = self.run_session().await;

        if let Some(path) = &pid_file {
            remove_pid_file(path);
        }
        result
    }

    async fn run_session(&mut self) -> Result<()> {
        self.session
            .start()
            .await
            .context("failed to start monitoring session")?;

        let mut background = vec![spawn_alert_logger(
            self.session.subscribe(),
            self.shutdown_tx.subscribe(),
        )];
        if self.config.metrics.enabled {
            background.push(spawn_uptime_updater(
                self.start_time,
                self.shutdown_tx.subscribe(),
            ));
        }

        let loop_result = self.event_loop().await;

        let _ = self.shutdown_tx.send(());
        for task in background {
            let _ = task.await;
        }

        tracing::info!("stopping monitoring session");
        let stop_result = self
            .session
            .stop()
            .await
            .context("failed to stop monitoring session");

        loop_result.and(stop_result)
    }

    async fn event_loop(&mut self) -> Result<()> {
        let mut signals = SignalListener::install()?;
        let mut health_tick = tokio::time::interval(Duration::from_secs(
            self.config.general.health_interval_secs,
        ));
        health_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // interval fires immediately; skip the startup report
        health_tick.tick().await;

        tracing::info!(session_id = %self.session.id(), "entering main event loop");
        loop {
            tokio::select! {
                signal = signals.recv() => match signal {
                    DaemonSignal::Shutdown(name) => {
                        tracing::info!(signal = name, "shutdown signal received");
                        return Ok(());
                    }
                    DaemonSignal::Reload => {
                        tracing::info!("SIGHUP received, reloading patterns");
                        if let Err(e) = self.reload_patterns().await {
                            tracing::error!(error = %e, "pattern reload failed, keeping current rules");
                        }
                    }
                },
                _ = health_tick.tick() => {
                    health::log_report(&self.health());
                }
            }
        }
    }

    /// Re-read the pattern configuration and swap the session's rule set.
    ///
    /// On any failure the current rule set stays active.
    pub async fn reload_patterns(&mut self) -> Result<usize> {
        let Some(path) = &self.config_path else {
            anyhow::bail!("no config file to reload from");
        };

        let fresh = TailguardConfig::load(path)
            .await
            .with_context(|| format!("failed to reload config {}", path.display()))?;
        let patterns = resolve_patterns(&fresh.monitor).await?;
        let count = self
            .session
            .reload_rules(&patterns)
            .context("failed to compile reloaded patterns")?;

        self.config.monitor.patterns = fresh.monitor.patterns;
        self.config.monitor.patterns_file = fresh.monitor.patterns_file;
        Ok(count)
    }

    /// Current aggregated health report.
    pub fn health(&self) -> DaemonHealth {
        let uptime_secs = self.start_time.elapsed().as_secs();
        if self.config.metrics.enabled {
            #[allow(clippy::cast_precision_loss)]
            metrics::gauge!(m::DAEMON_UPTIME_SECONDS).set(uptime_secs as f64);
        }
        health::report(&self.session.health(), uptime_secs)
    }

    /// Enable SIGHUP reloads from `path`.
    pub fn set_config_path(&mut self, path: PathBuf) {
        self.config_path = Some(path);
    }

    /// The monitoring session.
    pub fn session(&self) -> &MonitorSession {
        &self.session
    }

    /// Mutable access to the monitoring session.
    pub fn session_mut(&mut self) -> &mut MonitorSession {
        &mut self.session
    }

    /// Loaded configuration.
    pub fn config(&self) -> &TailguardConfig {
        &self.config
    }

    fn pid_file(&self) -> Option<PathBuf> {
        let pid_file = self.config.general.pid_file.trim();
        (!pid_file.is_empty()).then(|| PathBuf::from(pid_file))
    }
}

/// Combine inline patterns with the pattern file, if any.
pub async fn resolve_patterns(monitor: &MonitorConfig) -> Result<Vec<String>> {
    let file = monitor.patterns_file.trim();
    let file = (!file.is_empty()).then(|| Path::new(file));
    PatternLoader::resolve(&monitor.patterns, file)
        .await
        .context("failed to load patterns")
}

/// Build the session configuration from the daemon configuration.
pub async fn session_config(config: &TailguardConfig) -> Result<SessionConfig> {
    let mut session = SessionConfig::from_core(&config.monitor);
    session.patterns = resolve_patterns(&config.monitor).await?;
    session.alert_title = config.notifier.title.clone();
    session
        .validate()
        .context("invalid monitoring session config")?;
    Ok(session)
}

/// Check a configuration without starting anything.
///
/// Returns the number of compiled patterns.
pub async fn validate_config(config: &TailguardConfig) -> Result<usize> {
    config.validate().context("config validation failed")?;
    let session = session_config(config).await?;
    let rules = RuleSet::compile(&session.patterns).context("invalid alert pattern")?;
    Ok(rules.len())
}

/// SIGTERM/SIGINT/SIGHUP receivers.
struct SignalListener {
    sigterm: tokio::signal::unix::Signal,
    sigint: tokio::signal::unix::Signal,
    sighup: tokio::signal::unix::Signal,
}

impl SignalListener {
    fn install() -> Result<Self> {
        use tokio::signal::unix::{SignalKind, signal};

        Ok(Self {
            sigterm: signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?,
            sigint: signal(SignalKind::interrupt()).context("failed to install SIGINT handler")?,
            sighup: signal(SignalKind::hangup()).context("failed to install SIGHUP handler")?,
        })
    }

    async fn recv(&mut self) -> DaemonSignal {
        tokio::select! {
            _ = self.sigterm.recv() => DaemonSignal::Shutdown("SIGTERM"),
            _ = self.sigint.recv() => DaemonSignal::Shutdown("SIGINT"),
            _ = self.sighup.recv() => DaemonSignal::Reload,
        }
    }
}

/// Write the current process PID to a file.
///
/// # Security
///
/// - `create_new(true)` refuses to overwrite a live instance's file
/// - The created file must be a regular file
/// - Parent directory is created with mode 0o700, the file with 0o600
///
/// # Errors
///
/// Returns an error if the file exists or cannot be written.
pub fn write_pid_file(path: &Path) -> Result<()> {
    use std::fs::{self, OpenOptions};
    use std::io::{ErrorKind, Write};

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            fs::DirBuilder::new()
                .mode(0o700)
                .recursive(true)
                .create(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        #[cfg(not(unix))]
        fs::create_dir_all(parent)?;
    }

    let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            let existing = fs::read_to_string(path).unwrap_or_else(|_| "unknown".to_owned());
            anyhow::bail!(
                "PID file {} already exists with PID {}; is another instance running?",
                path.display(),
                existing.trim()
            );
        }
        Err(e) => {
            return Err(e).with_context(|| format!("failed to create {}", path.display()));
        }
    };

    if !file.metadata()?.is_file() {
        let _ = fs::remove_file(path);
        anyhow::bail!("PID file {} is not a regular file", path.display());
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(fs::Permissions::from_mode(0o600))?;
    }

    let pid = std::process::id();
    writeln!(file, "{pid}")?;

    tracing::info!(pid, path = %path.display(), "PID file written");
    Ok(())
}

/// Remove the PID file. Failure is logged, not returned.
pub fn remove_pid_file(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => tracing::info!(path = %path.display(), "PID file removed"),
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to remove PID file"),
    }
}

/// Log every emitted alert on the daemon's own stream.
///
/// The supervisor capturing stdout sees alerts even with the notifier disabled.
fn spawn_alert_logger(
    mut alerts: broadcast::Receiver<Alert>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                received = alerts.recv() => match received {
                    Ok(alert) => {
                        tracing::warn!(
                            alert_id = %alert.id,
                            seq = alert.seq,
                            source = %alert.line.source.display(),
                            pattern = %alert.rule.pattern,
                            line = %alert.line.text,
                            "alert"
                        );
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "alert logger lagged behind");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        tracing::debug!("alert channel closed, exiting alert logger");
                        break;
                    }
                },
                _ = shutdown_rx.recv() => {
                    tracing::debug!("alert logger shutting down");
                    break;
                }
            }
        }
    })
}

/// Build info gauge, recorded once.
fn record_daemon_metrics() {
    metrics::gauge!(m::DAEMON_BUILD_INFO, "version" => env!("CARGO_PKG_VERSION")).set(1.0);
    tracing::debug!(version = env!("CARGO_PKG_VERSION"), "daemon metrics recorded");
}

/// Refresh the uptime gauge every 10 seconds.
fn spawn_uptime_updater(
    start_time: Instant,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(10));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    #[allow(clippy::cast_precision_loss)]
                    metrics::gauge!(m::DAEMON_UPTIME_SECONDS)
                        .set(start_time.elapsed().as_secs() as f64);
                }
                _ = shutdown_rx.recv() => {
                    tracing::debug!("uptime updater shutting down");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_write_pid_file_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("run").join("tailguard.pid");

        write_pid_file(&pid_file).unwrap();

        let content = fs::read_to_string(&pid_file).unwrap();
        assert_eq!(content.trim(), std::process::id().to_string());
    }

    #[test]
    fn test_write_pid_file_fails_if_already_exists() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("tailguard.pid");
        fs::write(&pid_file, "12345").unwrap();

        let err = write_pid_file(&pid_file).unwrap_err().to_string();
        assert!(err.contains("already exists"), "got: {err}");
        assert!(err.contains("12345"), "got: {err}");
    }

    #[test]
    fn test_remove_pid_file_handles_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("gone.pid");
        remove_pid_file(&pid_file);
        assert!(!pid_file.exists());
    }

    #[tokio::test]
    async fn test_resolve_patterns_appends_file_patterns() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("patterns.txt");
        fs::write(&file, "# extra\noom-killer\n\nsegfault\n").unwrap();

        let monitor = MonitorConfig {
            patterns: vec!["error".to_owned()],
            patterns_file: file.display().to_string(),
            ..MonitorConfig::default()
        };
        let patterns = resolve_patterns(&monitor).await.unwrap();
        assert_eq!(patterns, vec!["error", "oom-killer", "segfault"]);
    }

    #[tokio::test]
    async fn test_session_config_uses_notifier_title() {
        let mut config = TailguardConfig::default();
        config.notifier.title = "web-01".to_owned();
        config.monitor.audit_path = String::new();

        let session = session_config(&config).await.unwrap();
        assert_eq!(session.alert_title, "web-01");
        assert_eq!(session.patterns, config.monitor.patterns);
        assert!(session.audit_path.is_none());
    }

    #[tokio::test]
    async fn test_validate_config_rejects_bad_pattern() {
        let mut config = TailguardConfig::default();
        config.monitor.patterns = vec!["(unclosed".to_owned()];
        assert!(validate_config(&config).await.is_err());
    }

    #[tokio::test]
    async fn test_alert_logger_stops_on_shutdown() {
        let (_alert_tx, alert_rx) = broadcast::channel::<Alert>(8);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let task = spawn_alert_logger(alert_rx, shutdown_rx);
        shutdown_tx.send(()).unwrap();

        let result = tokio::time::timeout(Duration::from_millis(200), task).await;
        assert!(result.is_ok(), "alert logger should stop on shutdown");
    }
}
