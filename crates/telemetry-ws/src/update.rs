//! Inbound update messages and the discriminator that tells them apart.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::command::{CmdId, EntityId, EntityKeyType};
use crate::error::{TelemetryWsError, TelemetryWsResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CmdUpdateType {
    EntityData,
    AlarmData,
    AlarmCountData,
    CountData,
    NotificationsCount,
    Notifications,
}

impl CmdUpdateType {
    pub fn as_str(self) -> &'static str {
        match self {
            CmdUpdateType::EntityData => "ENTITY_DATA",
            CmdUpdateType::AlarmData => "ALARM_DATA",
            CmdUpdateType::AlarmCountData => "ALARM_COUNT_DATA",
            CmdUpdateType::CountData => "COUNT_DATA",
            CmdUpdateType::NotificationsCount => "NOTIFICATIONS_COUNT",
            CmdUpdateType::Notifications => "NOTIFICATIONS",
        }
    }
}

/// The seven inbound shapes, in discriminator priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateKind {
    Subscription,
    EntityData,
    AlarmData,
    AlarmCount,
    EntityCount,
    NotificationsCount,
    Notifications,
}

impl UpdateKind {
    pub const ALL: [UpdateKind; 7] = [
        UpdateKind::Subscription,
        UpdateKind::EntityData,
        UpdateKind::AlarmData,
        UpdateKind::AlarmCount,
        UpdateKind::EntityCount,
        UpdateKind::NotificationsCount,
        UpdateKind::Notifications,
    ];

    pub fn name(self) -> &'static str {
        match self {
            UpdateKind::Subscription => "subscription",
            UpdateKind::EntityData => "entity data",
            UpdateKind::AlarmData => "alarm data",
            UpdateKind::AlarmCount => "alarm count",
            UpdateKind::EntityCount => "entity count",
            UpdateKind::NotificationsCount => "notifications count",
            UpdateKind::Notifications => "notifications",
        }
    }

    fn update_type(self) -> Option<CmdUpdateType> {
        match self {
            UpdateKind::Subscription => None,
            UpdateKind::EntityData => Some(CmdUpdateType::EntityData),
            UpdateKind::AlarmData => Some(CmdUpdateType::AlarmData),
            UpdateKind::AlarmCount => Some(CmdUpdateType::AlarmCountData),
            UpdateKind::EntityCount => Some(CmdUpdateType::CountData),
            UpdateKind::NotificationsCount => Some(CmdUpdateType::NotificationsCount),
            UpdateKind::Notifications => Some(CmdUpdateType::Notifications),
        }
    }

    /// Whether `raw` has this kind's shape. Null fields count as absent.
    pub fn matches(self, raw: &Value) -> bool {
        let present = |field: &str| raw.get(field).is_some_and(|v| !v.is_null());
        match self.update_type() {
            None => present("subscriptionId") && !present("cmdUpdateType"),
            Some(tag) => {
                present("cmdId")
                    && raw.get("cmdUpdateType").and_then(Value::as_str) == Some(tag.as_str())
            }
        }
    }

    pub fn classify(raw: &Value) -> Option<UpdateKind> {
        UpdateKind::ALL.into_iter().find(|kind| kind.matches(raw))
    }
}

pub fn is_subscription_update(raw: &Value) -> bool {
    UpdateKind::Subscription.matches(raw)
}

pub fn is_entity_data_update(raw: &Value) -> bool {
    UpdateKind::EntityData.matches(raw)
}

pub fn is_alarm_data_update(raw: &Value) -> bool {
    UpdateKind::AlarmData.matches(raw)
}

pub fn is_alarm_count_update(raw: &Value) -> bool {
    UpdateKind::AlarmCount.matches(raw)
}

pub fn is_entity_count_update(raw: &Value) -> bool {
    UpdateKind::EntityCount.matches(raw)
}

pub fn is_notifications_count_update(raw: &Value) -> bool {
    UpdateKind::NotificationsCount.matches(raw)
}

pub fn is_notifications_update(raw: &Value) -> bool {
    UpdateKind::Notifications.matches(raw)
}

/// One `[ts, value, count?]` element of a raw subscription update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Value>", into = "Vec<Value>")]
pub struct TsSample {
    pub ts: i64,
    pub value: Value,
    pub count: Option<i64>,
}

impl TsSample {
    pub fn new(ts: i64, value: impl Into<Value>) -> Self {
        Self {
            ts,
            value: value.into(),
            count: None,
        }
    }
}

impl TryFrom<Vec<Value>> for TsSample {
    type Error = String;

    fn try_from(parts: Vec<Value>) -> Result<Self, Self::Error> {
        let mut parts = parts.into_iter();
        let ts = match parts.next() {
            Some(Value::Number(n)) => n.as_i64().ok_or_else(|| format!("timestamp {n} out of range"))?,
            Some(Value::String(s)) => s.parse().map_err(|_| format!("timestamp {s:?} is not an integer"))?,
            Some(other) => return Err(format!("unexpected timestamp {other}")),
            None => return Err("empty sample".to_string()),
        };
        let value = parts.next().unwrap_or(Value::Null);
        let count = parts.next().and_then(|c| c.as_i64());
        Ok(Self { ts, value, count })
    }
}

impl From<TsSample> for Vec<Value> {
    fn from(sample: TsSample) -> Self {
        let mut parts = vec![Value::from(sample.ts), sample.value];
        if let Some(count) = sample.count {
            parts.push(Value::from(count));
        }
        parts
    }
}

/// Raw attribute/timeseries update addressed by `subscriptionId`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionUpdate {
    pub subscription_id: CmdId,
    #[serde(default)]
    pub error_code: i32,
    #[serde(default)]
    pub error_msg: Option<String>,
    #[serde(default)]
    pub data: BTreeMap<String, Vec<TsSample>>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TsValue {
    pub ts: i64,
    #[serde(default, deserialize_with = "string_or_null")]
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<i64>,
}

/// Null reads as empty; numbers and booleans keep their JSON text.
fn string_or_null<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s,
        Some(other) => other.to_string(),
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageData<T> {
    #[serde(default = "Vec::new")]
    pub data: Vec<T>,
    #[serde(default)]
    pub total_pages: u32,
    #[serde(default)]
    pub total_elements: u64,
    #[serde(default)]
    pub has_next: bool,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityData {
    pub entity_id: EntityId,
    #[serde(default)]
    pub latest: HashMap<EntityKeyType, HashMap<String, TsValue>>,
    #[serde(default)]
    pub timeseries: HashMap<String, Vec<TsValue>>,
    /// Row fields this layer does not interpret (`aggLatest`, ...).
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlarmData {
    #[serde(default)]
    pub entity_id: Option<EntityId>,
    #[serde(default)]
    pub latest: HashMap<EntityKeyType, HashMap<String, TsValue>>,
    #[serde(default)]
    pub created_time: i64,
    #[serde(default)]
    pub start_ts: i64,
    #[serde(default)]
    pub end_ts: i64,
    #[serde(default)]
    pub ack_ts: i64,
    #[serde(default)]
    pub clear_ts: i64,
    /// Alarm fields this layer carries through untouched (id, type, severity, details, ...).
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityDataUpdate {
    pub cmd_id: CmdId,
    #[serde(default)]
    pub error_code: i32,
    #[serde(default)]
    pub error_msg: Option<String>,
    #[serde(default)]
    pub data: Option<PageData<EntityData>>,
    #[serde(default)]
    pub update: Option<Vec<EntityData>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlarmDataUpdate {
    pub cmd_id: CmdId,
    #[serde(default)]
    pub error_code: i32,
    #[serde(default)]
    pub error_msg: Option<String>,
    #[serde(default)]
    pub data: Option<PageData<AlarmData>>,
    #[serde(default)]
    pub update: Option<Vec<AlarmData>>,
    #[serde(default)]
    pub allowed_entities: u64,
    #[serde(default)]
    pub total_entities: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityCountUpdate {
    pub cmd_id: CmdId,
    #[serde(default)]
    pub error_code: i32,
    #[serde(default)]
    pub error_msg: Option<String>,
    #[serde(default)]
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlarmCountUpdate {
    pub cmd_id: CmdId,
    #[serde(default)]
    pub error_code: i32,
    #[serde(default)]
    pub error_msg: Option<String>,
    #[serde(default)]
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationCountUpdate {
    pub cmd_id: CmdId,
    #[serde(default)]
    pub error_code: i32,
    #[serde(default)]
    pub error_msg: Option<String>,
    #[serde(default)]
    pub total_unread_count: u64,
    #[serde(default)]
    pub sequence_number: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationsUpdate {
    pub cmd_id: CmdId,
    #[serde(default)]
    pub error_code: i32,
    #[serde(default)]
    pub error_msg: Option<String>,
    #[serde(default)]
    pub total_unread_count: u64,
    #[serde(default)]
    pub sequence_number: u64,
    /// A single new or changed notification.
    #[serde(default)]
    pub update: Option<Value>,
    /// Full unread list, sent on subscribe.
    #[serde(default)]
    pub notifications: Option<Vec<Value>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WsUpdate {
    Subscription(SubscriptionUpdate),
    EntityData(EntityDataUpdate),
    AlarmData(AlarmDataUpdate),
    AlarmCount(AlarmCountUpdate),
    EntityCount(EntityCountUpdate),
    NotificationsCount(NotificationCountUpdate),
    Notifications(NotificationsUpdate),
}

impl WsUpdate {
    /// Classifies and decodes one inbound JSON message.
    pub fn from_value(raw: Value) -> TelemetryWsResult<WsUpdate> {
        let kind = UpdateKind::classify(&raw)
            .ok_or_else(|| TelemetryWsError::UnrecognizedMessage(preview(&raw)))?;
        let decode_err = |source| TelemetryWsError::Decode {
            kind: kind.name(),
            source,
        };
        let update = match kind {
            UpdateKind::Subscription => {
                WsUpdate::Subscription(serde_json::from_value(raw).map_err(decode_err)?)
            }
            UpdateKind::EntityData => {
                WsUpdate::EntityData(serde_json::from_value(raw).map_err(decode_err)?)
            }
            UpdateKind::AlarmData => {
                WsUpdate::AlarmData(serde_json::from_value(raw).map_err(decode_err)?)
            }
            UpdateKind::AlarmCount => {
                WsUpdate::AlarmCount(serde_json::from_value(raw).map_err(decode_err)?)
            }
            UpdateKind::EntityCount => {
                WsUpdate::EntityCount(serde_json::from_value(raw).map_err(decode_err)?)
            }
            UpdateKind::NotificationsCount => {
                WsUpdate::NotificationsCount(serde_json::from_value(raw).map_err(decode_err)?)
            }
            UpdateKind::Notifications => {
                WsUpdate::Notifications(serde_json::from_value(raw).map_err(decode_err)?)
            }
        };
        Ok(update)
    }

    pub fn from_slice(bytes: &[u8]) -> TelemetryWsResult<WsUpdate> {
        let raw: Value = serde_json::from_slice(bytes)?;
        WsUpdate::from_value(raw)
    }

    pub fn kind(&self) -> UpdateKind {
        match self {
            WsUpdate::Subscription(_) => UpdateKind::Subscription,
            WsUpdate::EntityData(_) => UpdateKind::EntityData,
            WsUpdate::AlarmData(_) => UpdateKind::AlarmData,
            WsUpdate::AlarmCount(_) => UpdateKind::AlarmCount,
            WsUpdate::EntityCount(_) => UpdateKind::EntityCount,
            WsUpdate::NotificationsCount(_) => UpdateKind::NotificationsCount,
            WsUpdate::Notifications(_) => UpdateKind::Notifications,
        }
    }

    /// `subscriptionId` for raw updates, `cmdId` otherwise.
    pub fn cmd_id(&self) -> CmdId {
        match self {
            WsUpdate::Subscription(u) => u.subscription_id,
            WsUpdate::EntityData(u) => u.cmd_id,
            WsUpdate::AlarmData(u) => u.cmd_id,
            WsUpdate::AlarmCount(u) => u.cmd_id,
            WsUpdate::EntityCount(u) => u.cmd_id,
            WsUpdate::NotificationsCount(u) => u.cmd_id,
            WsUpdate::Notifications(u) => u.cmd_id,
        }
    }

    pub fn error_code(&self) -> i32 {
        match self {
            WsUpdate::Subscription(u) => u.error_code,
            WsUpdate::EntityData(u) => u.error_code,
            WsUpdate::AlarmData(u) => u.error_code,
            WsUpdate::AlarmCount(u) => u.error_code,
            WsUpdate::EntityCount(u) => u.error_code,
            WsUpdate::NotificationsCount(u) => u.error_code,
            WsUpdate::Notifications(u) => u.error_code,
        }
    }

    pub fn error_msg(&self) -> Option<&str> {
        match self {
            WsUpdate::Subscription(u) => u.error_msg.as_deref(),
            WsUpdate::EntityData(u) => u.error_msg.as_deref(),
            WsUpdate::AlarmData(u) => u.error_msg.as_deref(),
            WsUpdate::AlarmCount(u) => u.error_msg.as_deref(),
            WsUpdate::EntityCount(u) => u.error_msg.as_deref(),
            WsUpdate::NotificationsCount(u) => u.error_msg.as_deref(),
            WsUpdate::Notifications(u) => u.error_msg.as_deref(),
        }
    }
}

fn preview(raw: &Value) -> String {
    let mut text = raw.to_string();
    if text.len() > 160 {
        let mut cut = 160;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
        text.push_str("...");
    }
    text
}
