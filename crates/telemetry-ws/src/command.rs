//! Outbound command catalog.
//!
//! Every command serializes as `{ "cmdId": .., "type": "<TAG>", ..fields }`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub type CmdId = i32;

/// Entity query shapes are owned by the page/query layer; the wire carries them opaquely.
pub type EntityFilter = Value;
pub type KeyFilter = Value;
pub type AlarmDataQuery = Value;
pub type EntityCountQuery = Value;
pub type AlarmCountQuery = Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WsCommandType {
    Auth,
    Attributes,
    Timeseries,
    TimeseriesHistory,
    EntityData,
    EntityCount,
    AlarmData,
    AlarmCount,
    Notifications,
    NotificationsCount,
    MarkNotificationsAsRead,
    MarkAllNotificationsAsRead,
    EntityDataUnsubscribe,
    EntityCountUnsubscribe,
    AlarmDataUnsubscribe,
    AlarmCountUnsubscribe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TelemetryScope {
    /// Pseudo-scope selecting the latest time-series values instead of attributes.
    LatestTelemetry,
    ClientScope,
    ServerScope,
    SharedScope,
}

impl TelemetryScope {
    pub fn is_attribute_scope(self) -> bool {
        !matches!(self, TelemetryScope::LatestTelemetry)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityId {
    pub entity_type: String,
    pub id: String,
}

impl EntityId {
    pub fn new(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityKeyType {
    Attribute,
    ClientAttribute,
    SharedAttribute,
    ServerAttribute,
    TimeSeries,
    EntityField,
    AlarmField,
    Constant,
    Count,
    /// Key types added by newer servers.
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityKey {
    #[serde(rename = "type")]
    pub key_type: EntityKeyType,
    pub key: String,
}

impl EntityKey {
    pub fn new(key_type: EntityKeyType, key: impl Into<String>) -> Self {
        Self {
            key_type,
            key: key.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AggregationType {
    Min,
    Max,
    Avg,
    Sum,
    Count,
    None,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityDataPageLink {
    pub page_size: u32,
    pub page: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_search: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_order: Option<Value>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub dynamic: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityDataQuery {
    pub entity_filter: EntityFilter,
    pub page_link: EntityDataPageLink,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entity_fields: Vec<EntityKey>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub latest_values: Vec<EntityKey>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub key_filters: Vec<KeyFilter>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LatestValueCmd {
    pub keys: Vec<EntityKey>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeSeriesCmd {
    pub keys: Vec<String>,
    pub start_ts: i64,
    pub time_window: i64,
    pub interval: i64,
    pub limit: u32,
    pub agg: AggregationType,
    #[serde(default)]
    pub fetch_latest_previous_point: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityHistoryCmd {
    pub keys: Vec<String>,
    pub start_ts: i64,
    pub end_ts: i64,
    pub interval: i64,
    pub limit: u32,
    pub agg: AggregationType,
    #[serde(default)]
    pub fetch_latest_previous_point: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthCmd {
    pub cmd_id: CmdId,
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributesCmd {
    pub cmd_id: CmdId,
    pub entity_type: String,
    pub entity_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<TelemetryScope>,
    /// Comma-delimited; empty lets the server pick every key.
    #[serde(default)]
    pub keys: String,
    #[serde(default)]
    pub unsubscribe: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeseriesCmd {
    pub cmd_id: CmdId,
    pub entity_type: String,
    pub entity_id: String,
    #[serde(default)]
    pub keys: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_ts: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_window: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agg: Option<AggregationType>,
    #[serde(default)]
    pub unsubscribe: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeseriesHistoryCmd {
    pub cmd_id: CmdId,
    pub entity_type: String,
    pub entity_id: String,
    pub keys: String,
    pub start_ts: i64,
    pub end_ts: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agg: Option<AggregationType>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityDataCmd {
    pub cmd_id: CmdId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<EntityDataQuery>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_cmd: Option<LatestValueCmd>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ts_cmd: Option<TimeSeriesCmd>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history_cmd: Option<EntityHistoryCmd>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityCountCmd {
    pub cmd_id: CmdId,
    pub query: EntityCountQuery,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlarmDataCmd {
    pub cmd_id: CmdId,
    pub query: AlarmDataQuery,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlarmCountCmd {
    pub cmd_id: CmdId,
    pub query: AlarmCountQuery,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationsCmd {
    pub cmd_id: CmdId,
    pub limit: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub types: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationsCountCmd {
    pub cmd_id: CmdId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkNotificationsAsReadCmd {
    pub cmd_id: CmdId,
    pub notifications: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkAllNotificationsAsReadCmd {
    pub cmd_id: CmdId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnsubscribeCmd {
    pub cmd_id: CmdId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WsCommand {
    Auth(AuthCmd),
    Attributes(AttributesCmd),
    Timeseries(TimeseriesCmd),
    TimeseriesHistory(TimeseriesHistoryCmd),
    EntityData(EntityDataCmd),
    EntityCount(EntityCountCmd),
    AlarmData(AlarmDataCmd),
    AlarmCount(AlarmCountCmd),
    Notifications(NotificationsCmd),
    NotificationsCount(NotificationsCountCmd),
    MarkNotificationsAsRead(MarkNotificationsAsReadCmd),
    MarkAllNotificationsAsRead(MarkAllNotificationsAsReadCmd),
    EntityDataUnsubscribe(UnsubscribeCmd),
    EntityCountUnsubscribe(UnsubscribeCmd),
    AlarmDataUnsubscribe(UnsubscribeCmd),
    AlarmCountUnsubscribe(UnsubscribeCmd),
}

impl WsCommand {
    pub fn command_type(&self) -> WsCommandType {
        match self {
            WsCommand::Auth(_) => WsCommandType::Auth,
            WsCommand::Attributes(_) => WsCommandType::Attributes,
            WsCommand::Timeseries(_) => WsCommandType::Timeseries,
            WsCommand::TimeseriesHistory(_) => WsCommandType::TimeseriesHistory,
            WsCommand::EntityData(_) => WsCommandType::EntityData,
            WsCommand::EntityCount(_) => WsCommandType::EntityCount,
            WsCommand::AlarmData(_) => WsCommandType::AlarmData,
            WsCommand::AlarmCount(_) => WsCommandType::AlarmCount,
            WsCommand::Notifications(_) => WsCommandType::Notifications,
            WsCommand::NotificationsCount(_) => WsCommandType::NotificationsCount,
            WsCommand::MarkNotificationsAsRead(_) => WsCommandType::MarkNotificationsAsRead,
            WsCommand::MarkAllNotificationsAsRead(_) => WsCommandType::MarkAllNotificationsAsRead,
            WsCommand::EntityDataUnsubscribe(_) => WsCommandType::EntityDataUnsubscribe,
            WsCommand::EntityCountUnsubscribe(_) => WsCommandType::EntityCountUnsubscribe,
            WsCommand::AlarmDataUnsubscribe(_) => WsCommandType::AlarmDataUnsubscribe,
            WsCommand::AlarmCountUnsubscribe(_) => WsCommandType::AlarmCountUnsubscribe,
        }
    }

    pub fn cmd_id(&self) -> CmdId {
        match self {
            WsCommand::Auth(cmd) => cmd.cmd_id,
            WsCommand::Attributes(cmd) => cmd.cmd_id,
            WsCommand::Timeseries(cmd) => cmd.cmd_id,
            WsCommand::TimeseriesHistory(cmd) => cmd.cmd_id,
            WsCommand::EntityData(cmd) => cmd.cmd_id,
            WsCommand::EntityCount(cmd) => cmd.cmd_id,
            WsCommand::AlarmData(cmd) => cmd.cmd_id,
            WsCommand::AlarmCount(cmd) => cmd.cmd_id,
            WsCommand::Notifications(cmd) => cmd.cmd_id,
            WsCommand::NotificationsCount(cmd) => cmd.cmd_id,
            WsCommand::MarkNotificationsAsRead(cmd) => cmd.cmd_id,
            WsCommand::MarkAllNotificationsAsRead(cmd) => cmd.cmd_id,
            WsCommand::EntityDataUnsubscribe(cmd)
            | WsCommand::EntityCountUnsubscribe(cmd)
            | WsCommand::AlarmDataUnsubscribe(cmd)
            | WsCommand::AlarmCountUnsubscribe(cmd) => cmd.cmd_id,
        }
    }

    pub fn set_cmd_id(&mut self, cmd_id: CmdId) {
        let slot = match self {
            WsCommand::Auth(cmd) => &mut cmd.cmd_id,
            WsCommand::Attributes(cmd) => &mut cmd.cmd_id,
            WsCommand::Timeseries(cmd) => &mut cmd.cmd_id,
            WsCommand::TimeseriesHistory(cmd) => &mut cmd.cmd_id,
            WsCommand::EntityData(cmd) => &mut cmd.cmd_id,
            WsCommand::EntityCount(cmd) => &mut cmd.cmd_id,
            WsCommand::AlarmData(cmd) => &mut cmd.cmd_id,
            WsCommand::AlarmCount(cmd) => &mut cmd.cmd_id,
            WsCommand::Notifications(cmd) => &mut cmd.cmd_id,
            WsCommand::NotificationsCount(cmd) => &mut cmd.cmd_id,
            WsCommand::MarkNotificationsAsRead(cmd) => &mut cmd.cmd_id,
            WsCommand::MarkAllNotificationsAsRead(cmd) => &mut cmd.cmd_id,
            WsCommand::EntityDataUnsubscribe(cmd)
            | WsCommand::EntityCountUnsubscribe(cmd)
            | WsCommand::AlarmDataUnsubscribe(cmd)
            | WsCommand::AlarmCountUnsubscribe(cmd) => &mut cmd.cmd_id,
        };
        *slot = cmd_id;
    }

    /// Comma-delimited key list carried by attribute/timeseries commands.
    pub fn keys(&self) -> Option<&str> {
        match self {
            WsCommand::Attributes(cmd) => Some(cmd.keys.as_str()),
            WsCommand::Timeseries(cmd) => Some(cmd.keys.as_str()),
            WsCommand::TimeseriesHistory(cmd) => Some(cmd.keys.as_str()),
            _ => None,
        }
    }

    /// Whether the server answers this command with updates addressed to its id.
    pub fn expects_updates(&self) -> bool {
        !matches!(
            self,
            WsCommand::Auth(_)
                | WsCommand::MarkNotificationsAsRead(_)
                | WsCommand::MarkAllNotificationsAsRead(_)
                | WsCommand::EntityDataUnsubscribe(_)
                | WsCommand::EntityCountUnsubscribe(_)
                | WsCommand::AlarmDataUnsubscribe(_)
                | WsCommand::AlarmCountUnsubscribe(_)
        )
    }

    /// The command that cancels this subscription, if the protocol has one.
    pub fn to_unsubscribe(&self) -> Option<WsCommand> {
        let cmd_id = self.cmd_id();
        match self {
            WsCommand::Attributes(cmd) => Some(WsCommand::Attributes(AttributesCmd {
                unsubscribe: true,
                ..cmd.clone()
            })),
            WsCommand::Timeseries(cmd) => Some(WsCommand::Timeseries(TimeseriesCmd {
                unsubscribe: true,
                ..cmd.clone()
            })),
            WsCommand::EntityData(_) => {
                Some(WsCommand::EntityDataUnsubscribe(UnsubscribeCmd { cmd_id }))
            }
            WsCommand::EntityCount(_) => {
                Some(WsCommand::EntityCountUnsubscribe(UnsubscribeCmd { cmd_id }))
            }
            WsCommand::AlarmData(_) => Some(WsCommand::AlarmDataUnsubscribe(UnsubscribeCmd { cmd_id })),
            WsCommand::AlarmCount(_) => {
                Some(WsCommand::AlarmCountUnsubscribe(UnsubscribeCmd { cmd_id }))
            }
            _ => None,
        }
    }
}

/// Splits a comma-delimited key string, dropping blanks.
pub fn split_keys(keys: &str) -> Vec<String> {
    keys.split(',')
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .map(str::to_string)
        .collect()
}
