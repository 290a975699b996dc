/// Row-count activity monitor.
///
/// Captures a baseline row count for every table at startup, then samples
/// all of them once per interval. If no table changed, an alert goes out;
/// once `max_tries` alerts have been sent for the same quiet spell, the
/// loop ends and reports exhaustion to the caller.
use crate::config::WatchSettings;
use crate::inspector::{InspectionError, TableInspector};
use crate::notifier::{AlertMessage, DeliveryError, Notifier};
use crate::retry::{AlertDecision, AlertPolicy};
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Last observed row count for one tracked table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSnapshot {
    name: String,
    last_row_count: u64,
}

/// Everything the monitoring loop carries between ticks.
///
/// Table membership is fixed at [`initialize`]; tables created later are
/// never sampled.
#[derive(Debug)]
pub struct WatchdogState {
    snapshots: Vec<TableSnapshot>,
    frequency_minutes: u64,
    policy: AlertPolicy,
    mode: String,
    last_activity: DateTime<Utc>,
    ticks: u64,
    alerts_sent: u64,
}

impl WatchdogState {
    pub fn snapshots(&self) -> &[TableSnapshot] {
        &self.snapshots
    }

    #[allow(dead_code)]
    pub fn consecutive_inactive(&self) -> u32 {
        self.policy.consecutive_inactive()
    }

    pub fn max_tries(&self) -> u32 {
        self.policy.max_tries()
    }

    pub fn mode(&self) -> &str {
        &self.mode
    }

    /// Sleep between ticks.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.frequency_minutes.saturating_mul(60))
    }
}

/// Result of a single tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// At least one table's row count moved.
    Active { changed_tables: usize },
    /// Nothing moved; an alert was delivered.
    Alerted { attempt: u32 },
    /// Nothing moved and no alerts remain.
    Exhausted,
}

/// How the monitoring loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Inactivity outlasted `max_tries` alerts.
    Exhausted { ticks: u64, alerts_sent: u64 },
}

/// Errors that stop the watchdog.
#[derive(Debug)]
pub enum WatchdogError {
    Inspection(InspectionError),
    Delivery(DeliveryError),
}

impl std::fmt::Display for WatchdogError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WatchdogError::Inspection(e) => write!(f, "table inspection failed: {e}"),
            WatchdogError::Delivery(e) => write!(f, "notification failed: {e}"),
        }
    }
}

impl std::error::Error for WatchdogError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WatchdogError::Inspection(e) => Some(e),
            WatchdogError::Delivery(e) => Some(e),
        }
    }
}

impl From<InspectionError> for WatchdogError {
    fn from(e: InspectionError) -> Self {
        WatchdogError::Inspection(e)
    }
}

impl From<DeliveryError> for WatchdogError {
    fn from(e: DeliveryError) -> Self {
        WatchdogError::Delivery(e)
    }
}

/// Capture the baseline: enumerate tables and count each one.
///
/// Any failed count aborts startup.
pub fn initialize(
    settings: &WatchSettings,
    mode: &str,
    inspector: &dyn TableInspector,
) -> Result<WatchdogState, InspectionError> {
    let tables = inspector.list_tables()?;
    let mut snapshots = Vec::with_capacity(tables.len());
    for name in tables {
        info!(table = %name, "initializing table");
        let last_row_count = inspector.row_count(&name)?;
        debug!(table = %name, rows = last_row_count, "baseline captured");
        snapshots.push(TableSnapshot {
            name,
            last_row_count,
        });
    }

    if snapshots.is_empty() {
        warn!("database has no tables; every check will look inactive");
    }

    Ok(WatchdogState {
        snapshots,
        frequency_minutes: settings.frequency,
        policy: AlertPolicy::new(settings.max_tries),
        mode: mode.to_string(),
        last_activity: Utc::now(),
        ticks: 0,
        alerts_sent: 0,
    })
}

/// Sample every tracked table once and apply the alert policy.
///
/// All snapshots are refreshed before the verdict, whatever it is.
pub fn tick(
    state: &mut WatchdogState,
    inspector: &dyn TableInspector,
    notifier: &dyn Notifier,
    message: &AlertMessage,
) -> Result<TickOutcome, WatchdogError> {
    state.ticks += 1;

    let mut changed_tables = 0;
    for snapshot in &mut state.snapshots {
        let current = inspector.row_count(&snapshot.name)?;
        if current != snapshot.last_row_count {
            debug!(
                table = %snapshot.name,
                previous = snapshot.last_row_count,
                current,
                "row count changed"
            );
            changed_tables += 1;
        }
        snapshot.last_row_count = current;
    }

    let activity = changed_tables > 0;
    if activity {
        state.last_activity = Utc::now();
    }

    match state.policy.evaluate(activity) {
        AlertDecision::Active => {
            info!(tick = state.ticks, changed_tables, "database is active");
            Ok(TickOutcome::Active { changed_tables })
        }
        AlertDecision::Alert { attempt } => {
            warn!(
                tick = state.ticks,
                attempt,
                max_tries = state.policy.max_tries(),
                last_activity = %state.last_activity.to_rfc3339(),
                "database does not appear to be active, sending notification"
            );
            notifier.deliver(message)?;
            state.policy.record_alert();
            state.alerts_sent += 1;
            Ok(TickOutcome::Alerted { attempt })
        }
        AlertDecision::Exhausted => Ok(TickOutcome::Exhausted),
    }
}

/// Run ticks forever, sleeping `frequency` minutes before each one.
///
/// Returns only when inactivity exhausts the alert budget or a collaborator
/// fails. Whether that ends the process is up to the caller.
///
/// Ticks run synchronously on the calling task: row counts and alert
/// delivery block it. Dropping this future (Ctrl-C in `main`'s `select!`)
/// therefore only takes effect while it sleeps between ticks.
pub async fn run(
    mut state: WatchdogState,
    inspector: &dyn TableInspector,
    notifier: &dyn Notifier,
    message: &AlertMessage,
) -> Result<RunOutcome, WatchdogError> {
    info!(
        mode = %state.mode,
        frequency_minutes = state.frequency_minutes,
        max_tries = state.policy.max_tries(),
        tables = state.snapshots.len(),
        "starting watchdog"
    );

    let interval = state.interval();
    loop {
        tokio::time::sleep(interval).await;

        if tick(&mut state, inspector, notifier, message)? == TickOutcome::Exhausted {
            debug!(ticks = state.ticks, "alert budget exhausted");
            return Ok(RunOutcome::Exhausted {
                ticks: state.ticks,
                alerts_sent: state.alerts_sent,
            });
        }
    }
}
