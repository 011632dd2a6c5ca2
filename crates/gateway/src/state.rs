use std::{fmt, sync::Arc};

use {serde::Serialize, tokio::sync::watch, tracing::debug};

use crate::error::GatewayError;

// ── Lifecycle phase ──────────────────────────────────────────────────────────

/// Startup lifecycle of the gateway process.
///
/// Phases only move forward one step at a time; any phase but `Serving` may
/// fall to `Failed`, which is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayPhase {
    Created,
    RegistrarStarted,
    ResourcesActivated,
    Serving,
    Failed,
}

impl GatewayPhase {
    /// The only phase this one may advance to on success.
    pub fn successor(self) -> Option<Self> {
        match self {
            Self::Created => Some(Self::RegistrarStarted),
            Self::RegistrarStarted => Some(Self::ResourcesActivated),
            Self::ResourcesActivated => Some(Self::Serving),
            Self::Serving | Self::Failed => None,
        }
    }
}

impl fmt::Display for GatewayPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::RegistrarStarted => "registrar_started",
            Self::ResourcesActivated => "resources_activated",
            Self::Serving => "serving",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

// ── Gateway state ────────────────────────────────────────────────────────────

/// Process-wide lifecycle tracker. Clones observe the same phase.
#[derive(Clone)]
pub struct GatewayState {
    phase: Arc<watch::Sender<GatewayPhase>>,
}

impl Default for GatewayState {
    fn default() -> Self {
        Self::new()
    }
}

impl GatewayState {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(GatewayPhase::Created);
        Self {
            phase: Arc::new(tx),
        }
    }

    pub fn phase(&self) -> GatewayPhase {
        *self.phase.borrow()
    }

    /// Watch phase changes.
    pub fn subscribe(&self) -> watch::Receiver<GatewayPhase> {
        self.phase.subscribe()
    }

    /// Move to `to`, which must be the current phase's successor.
    pub fn advance(&self, to: GatewayPhase) -> Result<(), GatewayError> {
        let from = self.phase();
        if from.successor() != Some(to) {
            return Err(GatewayError::InvalidTransition { from, to });
        }
        self.phase.send_replace(to);
        debug!(%from, %to, "gateway phase changed");
        Ok(())
    }

    /// Record a startup failure. No-op once serving.
    pub fn fail(&self) {
        let from = self.phase();
        if matches!(from, GatewayPhase::Serving | GatewayPhase::Failed) {
            return;
        }
        self.phase.send_replace(GatewayPhase::Failed);
        debug!(%from, "gateway startup failed");
    }
}
