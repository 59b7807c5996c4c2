use crate::service::RefreshReport;

#[derive(Debug, Clone)]
pub struct AppState {
    pub running: bool,
    pub status: String,
    pub report: Option<RefreshReport>,
    pub last_refresh: String,
    pub refreshes: u64,
}

impl Default for AppState {
    fn default() -> Self {
        Self {
            running: true,
            status: "starting".into(),
            report: None,
            last_refresh: "never".into(),
            refreshes: 0,
        }
    }
}

impl AppState {
    /// Replaces the whole view with a fresh cycle's output.
    pub fn apply_report(&mut self, report: RefreshReport, at: String) {
        self.status = match report.warnings().first() {
            Some(warning) => format!("stale: {warning}"),
            None => "ok".into(),
        };
        self.report = Some(report);
        self.last_refresh = at;
        self.refreshes += 1;
    }

    /// The previous report stays on screen; only the status line changes.
    pub fn refresh_failed(&mut self, message: &str) {
        self.status = format!("refresh failed: {message}");
    }
}
