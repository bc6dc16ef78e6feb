//! Enrollment orchestration.
//!
//! One [`EnrollmentEvent`] drives one host through the enrollment state
//! machine: eligibility checks, agent readiness polling, certificate
//! issuance, setup script dispatch, completion polling, and the selector
//! tag transition. Every event terminates in exactly one of
//! [`EnrollPhase::Completed`], [`EnrollPhase::Failed`], or
//! [`EnrollPhase::Skipped`].

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use certfleet_common::error::ErrorCode;
use certfleet_common::retry::{poll_bounded, poll_until};

use crate::config::OrchestratorConfig;
use crate::error::EnrollError;
use crate::issuance::CertIssuer;
use crate::providers::{
    AgentRegistry, ArtifactStore, FleetInventory, RemoteExecutionChannel, SendOptions,
};
use crate::script::render_template;

/// Interval between agent readiness probes.
pub const AGENT_POLL_INTERVAL: Duration = Duration::from_secs(12);

/// Number of agent readiness probes before giving up (about two minutes).
pub const AGENT_POLL_MAX_ATTEMPTS: u32 = 10;

/// Interval between command completion probes. Completion polling is
/// unbounded; the dispatch options' own timeout is the backstop.
pub const COMPLETION_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Enrollment state machine phases.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnrollPhase {
    Received,
    Eligible,
    AgentReady,
    CertIssued,
    Dispatched,
    Completed,
    Failed,
    Skipped,
}

/// A host joining (or re-enrolling into) the fleet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EnrollmentEvent {
    pub host_id: String,
    /// Re-issue the certificate on an already-enrolled host instead of
    /// running the full first-time setup.
    #[serde(default)]
    pub certificate_only: bool,
}

/// Terminal record for one processed event.
#[derive(Debug)]
pub struct EnrollmentOutcome {
    pub host_id: String,
    pub phase: EnrollPhase,
    /// Dispatched command id, when the event got that far.
    pub command_id: Option<String>,
    pub error: Option<EnrollError>,
}

enum Progress {
    Completed { command_id: String },
    Skipped { reason: &'static str },
}

/// The enrollment orchestrator.
pub struct Orchestrator {
    issuer: Arc<CertIssuer>,
    inventory: Arc<dyn FleetInventory>,
    exec: Arc<dyn RemoteExecutionChannel>,
    agents: Arc<dyn AgentRegistry>,
    store: Arc<dyn ArtifactStore>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        issuer: Arc<CertIssuer>,
        inventory: Arc<dyn FleetInventory>,
        exec: Arc<dyn RemoteExecutionChannel>,
        agents: Arc<dyn AgentRegistry>,
        store: Arc<dyn ArtifactStore>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            issuer,
            inventory,
            exec,
            agents,
            store,
            config,
        }
    }

    /// Process one event to its terminal phase. Failures are recorded
    /// in the outcome, never propagated; one bad host must not take
    /// down a batch.
    pub async fn handle_event(&self, event: &EnrollmentEvent) -> EnrollmentOutcome {
        tracing::debug!(host_id = %event.host_id, phase = ?EnrollPhase::Received, "Enrollment event received");
        match self.enroll(event).await {
            Ok(Progress::Completed { command_id }) => {
                tracing::info!(host_id = %event.host_id, command_id = %command_id, "Enrollment completed");
                EnrollmentOutcome {
                    host_id: event.host_id.clone(),
                    phase: EnrollPhase::Completed,
                    command_id: Some(command_id),
                    error: None,
                }
            }
            Ok(Progress::Skipped { reason }) => {
                tracing::debug!(host_id = %event.host_id, reason, "Enrollment skipped");
                EnrollmentOutcome {
                    host_id: event.host_id.clone(),
                    phase: EnrollPhase::Skipped,
                    command_id: None,
                    error: None,
                }
            }
            Err(error) => {
                let code = ErrorCode::from(&error);
                tracing::warn!(
                    host_id = %event.host_id,
                    code = code.as_str(),
                    per_host = code.is_per_host(),
                    %error,
                    "Enrollment failed"
                );
                let command_id = match &error {
                    EnrollError::RemoteScriptFailed { command_id, .. } => Some(command_id.clone()),
                    _ => None,
                };
                EnrollmentOutcome {
                    host_id: event.host_id.clone(),
                    phase: EnrollPhase::Failed,
                    command_id,
                    error: Some(error),
                }
            }
        }
    }

    /// [`Self::handle_event`] under a wall-clock deadline. When the
    /// deadline expires mid-flight the event fails proactively instead
    /// of being cut off without a record.
    pub async fn handle_event_with_deadline(
        &self,
        event: &EnrollmentEvent,
        deadline: Duration,
    ) -> EnrollmentOutcome {
        match tokio::time::timeout(deadline, self.handle_event(event)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                let error = EnrollError::DeadlineExceeded {
                    host_id: event.host_id.clone(),
                };
                let code = ErrorCode::from(&error);
                tracing::warn!(
                    host_id = %event.host_id,
                    code = code.as_str(),
                    per_host = code.is_per_host(),
                    %error,
                    "Enrollment failed"
                );
                EnrollmentOutcome {
                    host_id: event.host_id.clone(),
                    phase: EnrollPhase::Failed,
                    command_id: None,
                    error: Some(error),
                }
            }
        }
    }

    async fn enroll(&self, event: &EnrollmentEvent) -> Result<Progress, EnrollError> {
        let host_id = &event.host_id;
        let provider_err = |source| EnrollError::Provider {
            host_id: host_id.clone(),
            source,
        };

        let member = self.inventory.describe_host(host_id).map_err(provider_err)?;
        if !member.is_running() {
            return Err(EnrollError::NotRunning {
                host_id: host_id.clone(),
                state: member.state,
            });
        }
        if let Some(vpc) = &self.config.vpc_restriction {
            if member.vpc_id != *vpc {
                return Ok(Progress::Skipped {
                    reason: "host outside the restricted network",
                });
            }
        }
        let tag_value = member.tags.get(&self.config.selector_tag_name);
        let eligible = tag_value == Some(&self.config.pending_tag_value)
            || (event.certificate_only && tag_value == Some(&self.config.result_tag_value));
        if !eligible {
            return Ok(Progress::Skipped {
                reason: "selector tag does not mark the host for enrollment",
            });
        }
        tracing::debug!(host_id = %host_id, phase = ?EnrollPhase::Eligible, "Host eligible for enrollment");

        // A freshly launched host takes a while to bring its agent up.
        let targets = [host_id.clone()];
        let agent_online = poll_bounded(AGENT_POLL_INTERVAL, AGENT_POLL_MAX_ATTEMPTS, || {
            let online = self
                .agents
                .describe_online_agents(&targets)
                .map_err(provider_err)?;
            Ok(if online > 0 { Some(()) } else { None })
        })
        .await?;
        if agent_online.is_none() {
            return Err(EnrollError::AgentUnreachable {
                host_id: host_id.clone(),
            });
        }
        tracing::debug!(host_id = %host_id, phase = ?EnrollPhase::AgentReady, "Management agent online");

        let issued = self.issuer.issue(host_id).map_err(|source| EnrollError::Issuance {
            host_id: host_id.clone(),
            source,
        })?;
        tracing::debug!(host_id = %host_id, phase = ?EnrollPhase::CertIssued, "Certificate issued");

        let template = self
            .store
            .get(&self.config.source_bucket, &self.config.setup_script_key)
            .map_err(provider_err)?;
        let template = String::from_utf8(template).map_err(|_| {
            provider_err(crate::providers::ProviderError::Backend(
                "setup script template is not utf-8".to_string(),
            ))
        })?;
        let payload = serde_json::to_string(&issued).map_err(|e| {
            provider_err(crate::providers::ProviderError::Backend(e.to_string()))
        })?;
        let values = BTreeMap::from([
            ("configBucket", self.config.source_bucket.clone()),
            ("certificate", payload),
            ("certificate_only", event.certificate_only.to_string()),
        ]);
        let script = render_template(&template, &values);

        let command_id = self
            .exec
            .send(&targets, &script, &SendOptions::default())
            .map_err(provider_err)?;
        tracing::debug!(host_id = %host_id, phase = ?EnrollPhase::Dispatched, command_id = %command_id, "Setup script dispatched");

        let status = poll_until(COMPLETION_POLL_INTERVAL, || {
            let status = self.exec.status(&command_id).map_err(provider_err)?;
            Ok(if status.is_complete() { Some(status) } else { None })
        })
        .await?;

        if status.error_count != 0 {
            // Leave the selector tag alone so the host stays visibly
            // pending for a retry or manual intervention.
            return Err(EnrollError::RemoteScriptFailed {
                host_id: host_id.clone(),
                command_id,
            });
        }

        self.inventory
            .remove_tag(
                host_id,
                &self.config.selector_tag_name,
                &self.config.pending_tag_value,
            )
            .map_err(provider_err)?;
        self.inventory
            .set_tag(
                host_id,
                &self.config.selector_tag_name,
                &self.config.result_tag_value,
            )
            .map_err(provider_err)?;

        Ok(Progress::Completed { command_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phases_serialize_screaming_snake_case() {
        assert_eq!(
            serde_json::to_value(EnrollPhase::AgentReady).unwrap(),
            "AGENT_READY"
        );
        assert_eq!(
            serde_json::to_value(EnrollPhase::CertIssued).unwrap(),
            "CERT_ISSUED"
        );
    }

    #[test]
    fn certificate_only_defaults_to_false() {
        let event: EnrollmentEvent = serde_json::from_str(r#"{"host_id":"i-1"}"#).unwrap();
        assert!(!event.certificate_only);
    }

    #[test]
    fn agent_polling_window_is_about_two_minutes() {
        let window = AGENT_POLL_INTERVAL * AGENT_POLL_MAX_ATTEMPTS;
        assert_eq!(window, Duration::from_secs(120));
    }
}
