//! Turns subscription intent into commands.
//!
//! The `create_*` functions allocate a fresh subscriber holding exactly one
//! command. Nothing is sent until the subscriber is handed to the service.

use std::sync::Arc;

use crate::command::{
    AlarmCountCmd, AlarmCountQuery, AlarmDataCmd, AlarmDataQuery, AggregationType, AttributesCmd,
    EntityCountCmd, EntityCountQuery, EntityDataCmd, EntityDataPageLink, EntityDataQuery,
    EntityFilter, EntityId, EntityKey, LatestValueCmd, MarkAllNotificationsAsReadCmd,
    MarkNotificationsAsReadCmd, NotificationsCmd, NotificationsCountCmd, TelemetryScope,
    TimeseriesCmd, TimeseriesHistoryCmd, WsCommand,
};
use crate::subscriber::{SubscriberOptions, TelemetrySubscriber};

/// Ids are stamped by the service at subscribe time.
const UNASSIGNED: i32 = 0;

/// Latest telemetry becomes TIMESERIES, any attribute scope becomes ATTRIBUTES.
/// An empty key list asks for every key.
pub fn entity_attributes_command(
    entity_id: &EntityId,
    scope: TelemetryScope,
    keys: &[&str],
) -> WsCommand {
    let keys = keys.join(",");
    if scope.is_attribute_scope() {
        WsCommand::Attributes(AttributesCmd {
            cmd_id: UNASSIGNED,
            entity_type: entity_id.entity_type.clone(),
            entity_id: entity_id.id.clone(),
            scope: Some(scope),
            keys,
            unsubscribe: false,
        })
    } else {
        WsCommand::Timeseries(TimeseriesCmd {
            cmd_id: UNASSIGNED,
            entity_type: entity_id.entity_type.clone(),
            entity_id: entity_id.id.clone(),
            keys,
            start_ts: None,
            time_window: None,
            interval: None,
            limit: None,
            agg: None,
            unsubscribe: false,
        })
    }
}

/// Single-row entity query whose latest values are streamed. No keys means all latest keys.
pub fn entity_filter_latest_command(filter: EntityFilter, keys: Vec<EntityKey>) -> WsCommand {
    let query = EntityDataQuery {
        entity_filter: filter,
        page_link: EntityDataPageLink {
            page_size: 1,
            page: 0,
            ..Default::default()
        },
        entity_fields: Vec::new(),
        latest_values: keys.clone(),
        key_filters: Vec::new(),
    };
    WsCommand::EntityData(EntityDataCmd {
        cmd_id: UNASSIGNED,
        query: Some(query),
        latest_cmd: Some(LatestValueCmd { keys }),
        ts_cmd: None,
        history_cmd: None,
    })
}

pub fn timeseries_history_command(
    entity_id: &EntityId,
    keys: &[&str],
    start_ts: i64,
    end_ts: i64,
    interval: Option<i64>,
    limit: Option<u32>,
    agg: Option<AggregationType>,
) -> WsCommand {
    WsCommand::TimeseriesHistory(TimeseriesHistoryCmd {
        cmd_id: UNASSIGNED,
        entity_type: entity_id.entity_type.clone(),
        entity_id: entity_id.id.clone(),
        keys: keys.join(","),
        start_ts,
        end_ts,
        interval,
        limit,
        agg,
    })
}

pub fn entity_count_command(query: EntityCountQuery) -> WsCommand {
    WsCommand::EntityCount(EntityCountCmd {
        cmd_id: UNASSIGNED,
        query,
    })
}

pub fn alarm_data_command(query: AlarmDataQuery) -> WsCommand {
    WsCommand::AlarmData(AlarmDataCmd {
        cmd_id: UNASSIGNED,
        query,
    })
}

pub fn alarm_count_command(query: AlarmCountQuery) -> WsCommand {
    WsCommand::AlarmCount(AlarmCountCmd {
        cmd_id: UNASSIGNED,
        query,
    })
}

pub fn notifications_command(limit: u32, types: Vec<String>) -> WsCommand {
    WsCommand::Notifications(NotificationsCmd {
        cmd_id: UNASSIGNED,
        limit,
        types,
    })
}

pub fn notifications_count_command() -> WsCommand {
    WsCommand::NotificationsCount(NotificationsCountCmd { cmd_id: UNASSIGNED })
}

pub fn mark_notifications_as_read_command(notifications: Vec<String>) -> WsCommand {
    WsCommand::MarkNotificationsAsRead(MarkNotificationsAsReadCmd {
        cmd_id: UNASSIGNED,
        notifications,
    })
}

pub fn mark_all_notifications_as_read_command() -> WsCommand {
    WsCommand::MarkAllNotificationsAsRead(MarkAllNotificationsAsReadCmd { cmd_id: UNASSIGNED })
}

/// Fresh subscriber owning just `cmd`.
pub fn create_subscription(cmd: WsCommand, options: SubscriberOptions) -> Arc<TelemetrySubscriber> {
    let subscriber = TelemetrySubscriber::new(options);
    subscriber.add_command(cmd);
    Arc::new(subscriber)
}

pub fn create_entity_attributes_subscription(
    entity_id: &EntityId,
    scope: TelemetryScope,
    keys: &[&str],
    options: SubscriberOptions,
) -> Arc<TelemetrySubscriber> {
    create_subscription(entity_attributes_command(entity_id, scope, keys), options)
}

pub fn create_entity_filter_latest_subscription(
    filter: EntityFilter,
    keys: Vec<EntityKey>,
    options: SubscriberOptions,
) -> Arc<TelemetrySubscriber> {
    create_subscription(entity_filter_latest_command(filter, keys), options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{EntityKeyType, WsCommandType};
    use serde_json::json;

    fn device() -> EntityId {
        EntityId::new("DEVICE", "7d0c")
    }

    #[test]
    fn latest_telemetry_scope_builds_timeseries() {
        let cmd = entity_attributes_command(&device(), TelemetryScope::LatestTelemetry, &["temp"]);
        assert_eq!(cmd.command_type(), WsCommandType::Timeseries);
        assert_eq!(cmd.keys(), Some("temp"));
    }

    #[test]
    fn attribute_scopes_build_attributes() {
        for scope in [
            TelemetryScope::ClientScope,
            TelemetryScope::ServerScope,
            TelemetryScope::SharedScope,
        ] {
            let cmd = entity_attributes_command(&device(), scope, &["a", "b"]);
            assert_eq!(cmd.command_type(), WsCommandType::Attributes);
            let WsCommand::Attributes(attrs) = cmd else {
                panic!("expected attributes");
            };
            assert_eq!(attrs.scope, Some(scope));
            assert_eq!(attrs.keys, "a,b");
            assert_eq!(attrs.entity_type, "DEVICE");
            assert_eq!(attrs.entity_id, "7d0c");
        }
    }

    #[test]
    fn no_keys_means_all_keys() {
        let cmd = entity_attributes_command(&device(), TelemetryScope::ServerScope, &[]);
        assert_eq!(cmd.keys(), Some(""));
    }

    #[test]
    fn filter_latest_requests_single_row_page() {
        let filter = json!({ "type": "singleEntity", "singleEntity": { "entityType": "DEVICE", "id": "7d0c" } });
        let keys = vec![EntityKey::new(EntityKeyType::TimeSeries, "temp")];
        let cmd = entity_filter_latest_command(filter.clone(), keys.clone());
        let WsCommand::EntityData(cmd) = cmd else {
            panic!("expected entity data");
        };
        let query = cmd.query.expect("query");
        assert_eq!(query.entity_filter, filter);
        assert_eq!(query.page_link.page_size, 1);
        assert_eq!(query.latest_values, keys);
        assert_eq!(cmd.latest_cmd.expect("latest").keys, keys);
    }

    #[test]
    fn builders_create_one_command_per_subscriber() {
        let first = create_entity_attributes_subscription(
            &device(),
            TelemetryScope::SharedScope,
            &["fw"],
            SubscriberOptions::default(),
        );
        let second = create_entity_filter_latest_subscription(json!({}), Vec::new(), SubscriberOptions::default());
        assert_eq!(first.commands().len(), 1);
        assert_eq!(second.commands().len(), 1);
        assert!(!Arc::ptr_eq(&first, &second));
        let WsCommand::EntityData(cmd) = &second.commands()[0] else {
            panic!("expected entity data");
        };
        assert!(cmd.latest_cmd.as_ref().expect("latest").keys.is_empty());
    }

    #[test]
    fn notification_commands_serialize_with_their_tags() {
        let value = serde_json::to_value(mark_notifications_as_read_command(vec!["n1".into()]))
            .expect("encode");
        assert_eq!(
            value,
            json!({ "type": "MARK_NOTIFICATIONS_AS_READ", "cmdId": 0, "notifications": ["n1"] })
        );
    }
}
