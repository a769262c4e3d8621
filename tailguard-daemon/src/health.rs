//! Aggregated health reporting.
//!
//! Turns a [`SessionHealth`] snapshot into a [`DaemonHealth`] report with one
//! entry per component (each source, the audit sink, alert delivery). The
//! overall status is the worst component status.
//!
//! # Aggregation Rule
//!
//! - All Healthy -> Healthy
//! - Any Degraded, none Unhealthy -> Degraded(reason)
//! - Any Unhealthy -> Unhealthy(reason)

use serde::Serialize;

use tailguard_core::pipeline::HealthStatus;
use tailguard_monitor::{SessionHealth, SessionState, WatcherState};

/// Aggregated health report for the daemon.
#[derive(Debug, Clone, Serialize)]
pub struct DaemonHealth {
    /// Overall status (worst of all components).
    pub status: HealthStatus,
    /// Seconds since the daemon started.
    pub uptime_secs: u64,
    /// Monitoring session id.
    pub session_id: String,
    /// Per-component reports.
    pub components: Vec<ComponentHealth>,
    /// Lines observed since start.
    pub lines_observed: u64,
    /// Alerts emitted since start.
    pub alerts_emitted: u64,
    /// Alerts suppressed by the throttler.
    pub alerts_suppressed: u64,
}

/// Health of one component.
#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    /// Component name (e.g., "source:/var/log/syslog", "audit").
    pub name: String,
    /// Current status.
    pub status: HealthStatus,
}

impl ComponentHealth {
    fn new(name: impl Into<String>, status: HealthStatus) -> Self {
        Self {
            name: name.into(),
            status,
        }
    }
}

/// Aggregate component statuses into one.
///
/// Returns the worst status found: Unhealthy > Degraded > Healthy.
pub fn aggregate_status(components: &[ComponentHealth]) -> HealthStatus {
    let mut worst = HealthStatus::Healthy;
    let mut reasons = Vec::new();

    for component in components {
        match &component.status {
            HealthStatus::Healthy => {}
            HealthStatus::Degraded(reason) => {
                if !worst.is_unhealthy() {
                    reasons.push(format!("{}: {}", component.name, reason));
                    worst = HealthStatus::Degraded(String::new());
                }
            }
            HealthStatus::Unhealthy(reason) => {
                if !worst.is_unhealthy() {
                    reasons.clear();
                }
                reasons.push(format!("{}: {}", component.name, reason));
                worst = HealthStatus::Unhealthy(String::new());
            }
        }
    }

    match worst {
        HealthStatus::Healthy => HealthStatus::Healthy,
        HealthStatus::Degraded(_) => HealthStatus::Degraded(reasons.join("; ")),
        HealthStatus::Unhealthy(_) => HealthStatus::Unhealthy(reasons.join("; ")),
    }
}

/// Split a session snapshot into components.
pub fn components_from_session(session: &SessionHealth) -> Vec<ComponentHealth> {
    let mut components = Vec::with_capacity(session.sources.len() + 3);

    components.push(ComponentHealth::new(
        "session",
        match session.state {
            SessionState::Running => HealthStatus::Healthy,
            other => HealthStatus::Unhealthy(format!("session {other:?}").to_lowercase()),
        },
    ));

    for source in &session.sources {
        let status = match (&source.state, &source.last_error) {
            (WatcherState::Open, _) => HealthStatus::Healthy,
            (state, Some(error)) => HealthStatus::Degraded(format!("{state}: {error}")),
            (state, None) => HealthStatus::Degraded(state.to_string()),
        };
        components.push(ComponentHealth::new(
            format!("source:{}", source.path.display()),
            status,
        ));
    }

    components.push(ComponentHealth::new(
        "audit",
        if session.audit_degraded {
            HealthStatus::Degraded(format!("{} record(s) in backlog", session.audit_backlog))
        } else {
            HealthStatus::Healthy
        },
    ));

    components.push(ComponentHealth::new(
        "delivery",
        if session.deliveries_failed > 0 && session.deliveries_succeeded == 0 {
            HealthStatus::Degraded(format!(
                "{} delivery failure(s), none succeeded",
                session.deliveries_failed
            ))
        } else {
            HealthStatus::Healthy
        },
    ));

    components
}

/// Build the daemon report from a session snapshot.
pub fn report(session: &SessionHealth, uptime_secs: u64) -> DaemonHealth {
    let components = components_from_session(session);
    DaemonHealth {
        status: aggregate_status(&components),
        uptime_secs,
        session_id: session.session_id.clone(),
        components,
        lines_observed: session.lines_observed,
        alerts_emitted: session.alerts_emitted,
        alerts_suppressed: session.alerts_suppressed,
    }
}

/// Log a report at a level matching its status.
pub fn log_report(report: &DaemonHealth) {
    match &report.status {
        HealthStatus::Healthy => tracing::info!(
            session_id = %report.session_id,
            uptime_secs = report.uptime_secs,
            lines_observed = report.lines_observed,
            alerts_emitted = report.alerts_emitted,
            alerts_suppressed = report.alerts_suppressed,
            "health: healthy"
        ),
        HealthStatus::Degraded(reason) => tracing::warn!(
            session_id = %report.session_id,
            uptime_secs = report.uptime_secs,
            reason = %reason,
            "health: degraded"
        ),
        HealthStatus::Unhealthy(reason) => tracing::error!(
            session_id = %report.session_id,
            uptime_secs = report.uptime_secs,
            reason = %reason,
            "health: unhealthy"
        ),
    }
}
