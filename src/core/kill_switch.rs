use crate::domain::model::KillSwitchState;
use crate::domain::ports::{Alert, AlertSink, Clock, SharedCounterStore};
use crate::utils::best_effort::best_effort;
use crate::utils::error::Result;
use std::sync::Arc;
use tracing::{info, warn};

pub const KILL_SWITCH_KEY: &str = "system:kill_switch";

/// Global stop flag every job reads before doing any work.
pub struct KillSwitch {
    store: Arc<dyn SharedCounterStore>,
    alerts: Option<Arc<dyn AlertSink>>,
    clock: Arc<dyn Clock>,
}

impl KillSwitch {
    pub fn new(store: Arc<dyn SharedCounterStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            alerts: None,
            clock,
        }
    }

    pub fn with_alerts(mut self, alerts: Arc<dyn AlertSink>) -> Self {
        self.alerts = Some(alerts);
        self
    }

    /// Current flag. A missing key means inactive.
    pub async fn state(&self) -> Result<KillSwitchState> {
        match self.store.get(KILL_SWITCH_KEY).await? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(KillSwitchState::default()),
        }
    }

    pub async fn is_active(&self) -> Result<bool> {
        Ok(self.state().await?.active)
    }

    pub async fn activate(&self, reason: &str, requested_by: &str) -> Result<KillSwitchState> {
        let state = KillSwitchState {
            active: true,
            reason: Some(reason.to_string()),
            requested_by: Some(requested_by.to_string()),
            timestamp: Some(self.clock.now()),
        };
        self.write(&state).await?;
        warn!(reason, requested_by, "kill switch activated");

        self.alert(Alert {
            title: "Kill Switch Activated".to_string(),
            message: format!("Reason: {}\nRequested by: {}", reason, requested_by),
            details: serde_json::to_value(&state).ok(),
        })
        .await;
        Ok(state)
    }

    pub async fn deactivate(&self, requested_by: &str) -> Result<KillSwitchState> {
        let state = KillSwitchState {
            active: false,
            reason: None,
            requested_by: Some(requested_by.to_string()),
            timestamp: Some(self.clock.now()),
        };
        self.write(&state).await?;
        info!(requested_by, "kill switch deactivated");

        self.alert(Alert {
            title: "Kill Switch Deactivated".to_string(),
            message: format!("Jobs resumed by {}", requested_by),
            details: None,
        })
        .await;
        Ok(state)
    }

    async fn write(&self, state: &KillSwitchState) -> Result<()> {
        let raw = serde_json::to_string(state)?;
        self.store.set(KILL_SWITCH_KEY, &raw, None).await
    }

    async fn alert(&self, alert: Alert) {
        if let Some(sink) = &self.alerts {
            best_effort("kill_switch.alert", sink.notify(&alert)).await;
        }
    }
}
