//! Payload normalization: clock-skew correction and attribute reduction.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::command::EntityKeyType;
use crate::update::{
    AlarmData, AlarmDataUpdate, EntityData, EntityDataUpdate, SubscriptionUpdate, TsValue,
};

/// Latest-value fields whose *value* is an epoch millisecond timestamp.
const ENTITY_TIME_FIELDS: &[&str] = &["createdTime"];
const ALARM_TIME_FIELDS: &[&str] = &[
    "createdTime",
    "startTs",
    "endTs",
    "ackTs",
    "clearTs",
    "startTime",
    "endTime",
    "ackTime",
    "clearTime",
];

pub fn correct_entity_data_update(update: &mut EntityDataUpdate, offset: i64) {
    if offset == 0 {
        return;
    }
    if let Some(page) = update.data.as_mut() {
        page.data
            .iter_mut()
            .for_each(|entity| correct_entity_data(entity, offset));
    }
    if let Some(changes) = update.update.as_mut() {
        changes
            .iter_mut()
            .for_each(|entity| correct_entity_data(entity, offset));
    }
}

pub fn correct_alarm_data_update(update: &mut AlarmDataUpdate, offset: i64) {
    if offset == 0 {
        return;
    }
    if let Some(page) = update.data.as_mut() {
        page.data
            .iter_mut()
            .for_each(|alarm| correct_alarm_data(alarm, offset));
    }
    if let Some(changes) = update.update.as_mut() {
        changes
            .iter_mut()
            .for_each(|alarm| correct_alarm_data(alarm, offset));
    }
}

fn correct_entity_data(entity: &mut EntityData, offset: i64) {
    correct_latest(&mut entity.latest, offset, &[(EntityKeyType::EntityField, ENTITY_TIME_FIELDS)]);
    for samples in entity.timeseries.values_mut() {
        for sample in samples {
            sample.ts += offset;
        }
    }
}

fn correct_alarm_data(alarm: &mut AlarmData, offset: i64) {
    alarm.created_time += offset;
    for ts in [
        &mut alarm.start_ts,
        &mut alarm.end_ts,
        &mut alarm.ack_ts,
        &mut alarm.clear_ts,
    ] {
        // zero means "never happened"
        if *ts != 0 {
            *ts += offset;
        }
    }
    correct_latest(
        &mut alarm.latest,
        offset,
        &[
            (EntityKeyType::EntityField, ENTITY_TIME_FIELDS),
            (EntityKeyType::AlarmField, ALARM_TIME_FIELDS),
        ],
    );
}

fn correct_latest(
    latest: &mut HashMap<EntityKeyType, HashMap<String, TsValue>>,
    offset: i64,
    time_fields: &[(EntityKeyType, &[&str])],
) {
    for (key_type, values) in latest.iter_mut() {
        let fields = time_fields
            .iter()
            .find(|(kt, _)| kt == key_type)
            .map(|(_, fields)| *fields)
            .unwrap_or(&[]);
        for (key, ts_value) in values.iter_mut() {
            ts_value.ts += offset;
            if fields.contains(&key.as_str()) {
                shift_encoded_timestamp(&mut ts_value.value, offset);
            }
        }
    }
}

/// Shifts a string-encoded epoch value. Non-numeric, empty and `"0"` (unset)
/// values are left alone.
fn shift_encoded_timestamp(value: &mut String, offset: i64) {
    if let Ok(ts) = value.trim().parse::<i64>() {
        if ts != 0 {
            *value = (ts + offset).to_string();
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeValue {
    pub value: Value,
    pub last_update_ts: i64,
}

/// Latest value per key, accumulated across raw updates.
pub type AttributeSnapshot = BTreeMap<String, AttributeValue>;

/// Folds the newest sample of each key into `snapshot`. Keys absent from the
/// update, or delivered with no samples, keep their previous value.
pub fn merge_attribute_update(snapshot: &mut AttributeSnapshot, update: &SubscriptionUpdate) {
    for (key, samples) in &update.data {
        let newest = samples
            .iter()
            .reduce(|best, sample| if sample.ts > best.ts { sample } else { best });
        if let Some(sample) = newest {
            snapshot.insert(
                key.clone(),
                AttributeValue {
                    value: sample.value.clone(),
                    last_update_ts: sample.ts,
                },
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::EntityId;
    use crate::update::{PageData, TsSample};

    fn ts_value(ts: i64, value: &str) -> TsValue {
        TsValue {
            ts,
            value: value.to_string(),
            count: None,
        }
    }

    fn entity(latest: Vec<(EntityKeyType, &str, TsValue)>) -> EntityData {
        let mut map: HashMap<EntityKeyType, HashMap<String, TsValue>> = HashMap::new();
        for (key_type, key, value) in latest {
            map.entry(key_type).or_default().insert(key.to_string(), value);
        }
        EntityData {
            entity_id: EntityId::new("DEVICE", "d1"),
            latest: map,
            timeseries: HashMap::from([(
                "temp".to_string(),
                vec![ts_value(100, "1"), ts_value(200, "2")],
            )]),
            fields: serde_json::Map::new(),
        }
    }

    #[test]
    fn shifts_latest_and_timeseries_timestamps() {
        let mut update = EntityDataUpdate {
            cmd_id: 1,
            error_code: 0,
            error_msg: None,
            data: Some(PageData {
                data: vec![entity(vec![
                    (EntityKeyType::EntityField, "createdTime", ts_value(0, "5000")),
                    (EntityKeyType::EntityField, "name", ts_value(0, "pump")),
                    (EntityKeyType::TimeSeries, "temp", ts_value(300, "21")),
                ])],
                total_pages: 1,
                total_elements: 1,
                has_next: false,
                fields: serde_json::Map::new(),
            }),
            update: None,
        };

        correct_entity_data_update(&mut update, 50);

        let page = update.data.expect("page");
        let entity = &page.data[0];
        let fields = &entity.latest[&EntityKeyType::EntityField];
        assert_eq!(fields["createdTime"].value, "5050");
        assert_eq!(fields["createdTime"].ts, 50);
        assert_eq!(fields["name"].value, "pump");
        assert_eq!(entity.latest[&EntityKeyType::TimeSeries]["temp"].ts, 350);
        assert_eq!(entity.latest[&EntityKeyType::TimeSeries]["temp"].value, "21");
        let series: Vec<i64> = entity.timeseries["temp"].iter().map(|v| v.ts).collect();
        assert_eq!(series, vec![150, 250]);
    }

    #[test]
    fn zero_offset_is_a_no_op() {
        let original = EntityDataUpdate {
            cmd_id: 1,
            error_code: 0,
            error_msg: None,
            data: None,
            update: Some(vec![entity(vec![(
                EntityKeyType::EntityField,
                "createdTime",
                ts_value(10, "10"),
            )])]),
        };
        let mut update = original.clone();
        correct_entity_data_update(&mut update, 0);
        assert_eq!(update, original);
    }

    #[test]
    fn zero_alarm_times_are_unset_and_stay_zero() {
        let mut alarm = AlarmData {
            entity_id: Some(EntityId::new("DEVICE", "d1")),
            latest: HashMap::from([(
                EntityKeyType::AlarmField,
                HashMap::from([
                    ("startTime".to_string(), ts_value(10, "1000")),
                    ("clearTime".to_string(), ts_value(10, "")),
                    ("endTime".to_string(), ts_value(10, "0")),
                    ("severity".to_string(), ts_value(10, "MAJOR")),
                ]),
            )]),
            created_time: 1000,
            start_ts: 1000,
            end_ts: 2000,
            ack_ts: 0,
            clear_ts: 0,
            fields: serde_json::Map::new(),
        };
        alarm.fields.insert("type".into(), Value::from("High Temperature"));

        let mut update = AlarmDataUpdate {
            cmd_id: 2,
            error_code: 0,
            error_msg: None,
            data: None,
            update: Some(vec![alarm]),
            allowed_entities: 0,
            total_entities: 0,
        };
        correct_alarm_data_update(&mut update, -100);

        let alarm = &update.update.expect("alarms")[0];
        assert_eq!(alarm.created_time, 900);
        assert_eq!(alarm.start_ts, 900);
        assert_eq!(alarm.end_ts, 1900);
        assert_eq!(alarm.ack_ts, 0);
        assert_eq!(alarm.clear_ts, 0);
        let fields = &alarm.latest[&EntityKeyType::AlarmField];
        assert_eq!(fields["startTime"].value, "900");
        assert_eq!(fields["startTime"].ts, -90);
        assert_eq!(fields["clearTime"].value, "");
        assert_eq!(fields["endTime"].value, "0");
        assert_eq!(fields["endTime"].ts, -90);
        assert_eq!(fields["severity"].value, "MAJOR");
        assert_eq!(alarm.fields["type"], "High Temperature");
    }

    #[test]
    fn attribute_snapshot_keeps_absent_keys_and_takes_newest_sample() {
        let mut snapshot = AttributeSnapshot::new();
        let first = SubscriptionUpdate {
            subscription_id: 1,
            data: BTreeMap::from([
                ("temp".to_string(), vec![TsSample::new(1000, "20")]),
                ("hum".to_string(), vec![TsSample::new(1000, "40")]),
            ]),
            ..Default::default()
        };
        merge_attribute_update(&mut snapshot, &first);

        let second = SubscriptionUpdate {
            subscription_id: 1,
            data: BTreeMap::from([
                (
                    "temp".to_string(),
                    vec![TsSample::new(1500, "21"), TsSample::new(2000, "22")],
                ),
                ("hum".to_string(), vec![]),
            ]),
            ..Default::default()
        };
        merge_attribute_update(&mut snapshot, &second);

        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot["temp"].value, Value::from("22"));
        assert_eq!(snapshot["temp"].last_update_ts, 2000);
        assert_eq!(snapshot["hum"].value, Value::from("40"));
        assert_eq!(snapshot["hum"].last_update_ts, 1000);
    }
}
