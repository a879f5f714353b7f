//! Read-only health probes for support and debugging.
//!
//! The harness checks environment configuration and the reachability of the
//! identity provider, the token-exchange service and the profile store, and
//! folds the results into a [`DiagnosticReport`]. It only calls health and
//! ping endpoints and never touches controller state.

use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::auth::{AuthSessionController, IdentityGateway, TokenExchangeClient};
use crate::config::AuthConfig;
use crate::recovery::ErrorRecord;
use crate::traits::ProfileStore;

pub const PROBE_ENV: &str = "environment";
pub const PROBE_PROVIDER: &str = "identity_provider";
pub const PROBE_EXCHANGE: &str = "token_exchange";
pub const PROBE_PROFILES: &str = "profile_store";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeStatus {
    Pass,
    Fail,
}

/// Outcome of one probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeResult {
    pub name: &'static str,
    pub status: ProbeStatus,
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,
}

impl ProbeResult {
    pub fn pass(name: &'static str, detail: impl Into<String>, started: Option<Instant>) -> Self {
        Self {
            name,
            status: ProbeStatus::Pass,
            detail: detail.into(),
            response_time_ms: started.map(elapsed_ms),
        }
    }

    pub fn fail(name: &'static str, detail: impl Into<String>, started: Option<Instant>) -> Self {
        Self {
            name,
            status: ProbeStatus::Fail,
            detail: detail.into(),
            response_time_ms: started.map(elapsed_ms),
        }
    }

    pub fn passed(&self) -> bool {
        self.status == ProbeStatus::Pass
    }
}

/// Combined probe results.
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticReport {
    pub generated_at: DateTime<Utc>,
    pub passed: bool,
    pub summary: String,
    pub probes: Vec<ProbeResult>,
    pub issues: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub recent_errors: Vec<ErrorRecord>,
}

impl DiagnosticReport {
    pub fn from_probes(probes: Vec<ProbeResult>) -> Self {
        let passed_count = probes.iter().filter(|p| p.passed()).count();
        let issues = probes
            .iter()
            .filter(|p| !p.passed())
            .map(|p| format!("{}: {}", p.name, p.detail))
            .collect::<Vec<_>>();
        Self {
            generated_at: Utc::now(),
            passed: issues.is_empty(),
            summary: format!("{}/{} checks passed", passed_count, probes.len()),
            probes,
            issues,
            recent_errors: Vec::new(),
        }
    }

    pub fn with_recent_errors(mut self, errors: Vec<ErrorRecord>) -> Self {
        self.recent_errors = errors;
        self
    }

    pub fn probe(&self, name: &str) -> Option<&ProbeResult> {
        self.probes.iter().find(|p| p.name == name)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Human-readable rendering for terminals.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        for probe in &self.probes {
            let mark = if probe.passed() { '✓' } else { '✗' };
            match probe.response_time_ms {
                Some(ms) => out.push_str(&format!(
                    "{} {} ({}ms): {}\n",
                    mark, probe.name, ms, probe.detail
                )),
                None => out.push_str(&format!("{} {}: {}\n", mark, probe.name, probe.detail)),
            }
        }
        if !self.recent_errors.is_empty() {
            out.push_str(&format!("\nRecent errors: {}\n", self.recent_errors.len()));
            for record in &self.recent_errors {
                out.push_str(&format!(
                    "  • [{}] {} ({})\n",
                    record.kind, record.context.operation, record.message
                ));
            }
        }
        if self.passed {
            out.push_str(&format!("\n✓ {}\n", self.summary));
        } else {
            out.push_str(&format!("\n✗ {}\n", self.summary));
            for issue in &self.issues {
                out.push_str(&format!("  • {}\n", issue));
            }
        }
        out
    }
}

/// Environment probe on its own; usable before a config can even be built.
pub fn probe_environment() -> ProbeResult {
    let missing = AuthConfig::missing_env();
    if missing.is_empty() {
        ProbeResult::pass(PROBE_ENV, "required variables set", None)
    } else {
        ProbeResult::fail(
            PROBE_ENV,
            format!("missing environment variables: {}", missing.join(", ")),
            None,
        )
    }
}

/// Runs read-only probes against the controller's collaborators.
pub struct DiagnosticsHarness<'a> {
    gateway: &'a IdentityGateway,
    exchange: &'a TokenExchangeClient,
    profiles: &'a dyn ProfileStore,
    history: Vec<ErrorRecord>,
    check_env: bool,
}

impl<'a> DiagnosticsHarness<'a> {
    pub fn new(
        gateway: &'a IdentityGateway,
        exchange: &'a TokenExchangeClient,
        profiles: &'a dyn ProfileStore,
    ) -> Self {
        Self {
            gateway,
            exchange,
            profiles,
            history: Vec::new(),
            check_env: true,
        }
    }

    /// Probe the same collaborators the controller uses.
    pub fn for_controller(controller: &'a AuthSessionController) -> Self {
        let mut harness = Self::new(
            controller.gateway(),
            controller.exchange_client(),
            controller.profile_store().as_ref(),
        );
        harness.history = controller.error_history();
        harness
    }

    /// Skip the environment probe, for configs built in code.
    pub fn without_env_check(mut self) -> Self {
        self.check_env = false;
        self
    }

    pub async fn run(&self) -> DiagnosticReport {
        let (provider, exchange, profiles) = tokio::join!(
            self.probe_provider(),
            self.probe_exchange(),
            self.probe_profiles()
        );

        let mut probes = Vec::with_capacity(4);
        if self.check_env {
            probes.push(probe_environment());
        }
        probes.extend([provider, exchange, profiles]);

        let report = DiagnosticReport::from_probes(probes).with_recent_errors(self.history.clone());
        if report.passed {
            debug!(summary = %report.summary, "Diagnostics passed");
        } else {
            warn!(summary = %report.summary, issues = ?report.issues, "Diagnostics found issues");
        }
        report
    }

    async fn probe_provider(&self) -> ProbeResult {
        let started = Instant::now();
        match self.gateway.health().await {
            Ok(()) => ProbeResult::pass(PROBE_PROVIDER, "reachable", Some(started)),
            Err(e) => ProbeResult::fail(PROBE_PROVIDER, e.to_string(), Some(started)),
        }
    }

    async fn probe_exchange(&self) -> ProbeResult {
        let started = Instant::now();
        match self.exchange.ping().await {
            Ok(status) if status < 500 => ProbeResult::pass(
                PROBE_EXCHANGE,
                format!("reachable (HTTP {})", status),
                Some(started),
            ),
            Ok(status) => ProbeResult::fail(
                PROBE_EXCHANGE,
                format!("service error (HTTP {})", status),
                Some(started),
            ),
            Err(e) => ProbeResult::fail(PROBE_EXCHANGE, e.to_string(), Some(started)),
        }
    }

    async fn probe_profiles(&self) -> ProbeResult {
        let started = Instant::now();
        match self.profiles.ping().await {
            Ok(()) => ProbeResult::pass(PROBE_PROFILES, "reachable", Some(started)),
            Err(e) => ProbeResult::fail(PROBE_PROFILES, e.to_string(), Some(started)),
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
