use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::domain::alert::Alert;
use crate::domain::notification::Notification;

/// Outbound message types pushed to subscribed clients.
pub const MSG_ALERT_TRIGGERED: &str = "alert_triggered";
pub const MSG_NOTIFICATION_UPDATE: &str = "notification_update";
pub const MSG_CRYPTO_DATA_UPDATE: &str = "crypto_data_update";
pub const MSG_TECHNICAL_INDICATOR_UPDATE: &str = "technical_indicator_update";
pub const MSG_PULLBACK_SIGNAL: &str = "pullback_signal";
pub const MSG_MARKET_SUMMARY: &str = "market_summary";
pub const MSG_SYSTEM_ALERT: &str = "system_alert";

/// Well-known room names.
pub const ROOM_MARKET_SUMMARY: &str = "market_summary";
pub const ROOM_SYSTEM: &str = "system";

pub fn crypto_room(symbol: &str) -> String {
    format!("crypto:{}", symbol)
}

pub fn indicators_room(symbol: &str) -> String {
    format!("indicators:{}", symbol)
}

pub fn user_alerts_room(user_id: uuid::Uuid) -> String {
    format!("alerts_user:{}", user_id)
}

/// The envelope every outbound WebSocket message is wrapped in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsEnvelope {
    #[serde(rename = "type")]
    pub message_type: String,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

impl WsEnvelope {
    pub fn new(message_type: impl Into<String>, data: Value) -> Self {
        Self {
            message_type: message_type.into(),
            data,
            timestamp: Utc::now(),
        }
    }
}

/// Payload for `alert_triggered` pushed to the owning user.
pub fn alert_triggered_payload(
    alert: &Alert,
    current_value: rust_decimal::Decimal,
    message: &str,
    context: &std::collections::HashMap<String, Value>,
    triggered_at: DateTime<Utc>,
) -> Value {
    json!({
        "alert_id": alert.id,
        "symbol": alert.symbol,
        "alert_type": alert.alert_type,
        "condition_type": alert.canonical_condition(),
        "target_value": alert.target_value,
        "current_value": current_value,
        "message": message,
        "timeframe": alert.timeframe,
        "triggered_at": triggered_at,
        "context": context,
    })
}

/// Payload for `notification_update` pushed when an in-app record is created.
pub fn notification_update_payload(notification: &Notification) -> Value {
    json!({
        "notification_id": notification.id,
        "title": notification.title,
        "message": notification.message,
        "notification_type": notification.notification_type,
        "alert_id": notification.alert_id,
        "read_at": notification.read_at,
        "created_at": notification.created_at,
    })
}
