use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::command::{split_keys, CmdId, WsCommand};
use crate::config::{TelemetryWsConfig, DEFAULT_CHANNEL_CAPACITY};
use crate::context::{ExecutionContext, Task};
use crate::error::{TelemetryWsError, TelemetryWsResult};
use crate::normalize::{
    correct_alarm_data_update, correct_entity_data_update, merge_attribute_update,
    AttributeSnapshot,
};
use crate::replay::{ReplayChannel, ReplayReceiver};
use crate::update::{
    AlarmCountUpdate, AlarmDataUpdate, EntityCountUpdate, EntityDataUpdate,
    NotificationCountUpdate, NotificationsUpdate, SubscriptionUpdate, WsUpdate,
};

#[derive(Clone)]
pub struct SubscriberOptions {
    pub context: Option<Arc<dyn ExecutionContext>>,
    pub channel_capacity: usize,
}

impl Default for SubscriberOptions {
    fn default() -> Self {
        Self {
            context: None,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl SubscriberOptions {
    pub fn from_config(config: &TelemetryWsConfig) -> Self {
        Self {
            channel_capacity: config.channel_capacity,
            ..Self::default()
        }
    }

    pub fn with_context(mut self, context: impl ExecutionContext + 'static) -> Self {
        self.context = Some(Arc::new(context));
        self
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }
}

/// Owns the commands of one logical subscription and republishes the updates
/// addressed to them, one replaying channel per update kind.
///
/// Delivery is expected to be serialized by the caller (the service pump does
/// this). Once [`TelemetrySubscriber::complete`] runs, the subscriber is spent.
pub struct TelemetrySubscriber {
    commands: Mutex<Vec<WsCommand>>,
    ts_offset: Mutex<Option<i64>>,
    context: Option<Arc<dyn ExecutionContext>>,
    completed: AtomicBool,
    data: ReplayChannel<SubscriptionUpdate>,
    entity_data: ReplayChannel<EntityDataUpdate>,
    alarm_data: ReplayChannel<AlarmDataUpdate>,
    entity_count: ReplayChannel<EntityCountUpdate>,
    alarm_count: ReplayChannel<AlarmCountUpdate>,
    notifications_count: ReplayChannel<NotificationCountUpdate>,
    notifications: ReplayChannel<NotificationsUpdate>,
    attributes: Arc<Mutex<AttributeSnapshot>>,
    attribute_data: ReplayChannel<AttributeSnapshot>,
}

impl Default for TelemetrySubscriber {
    fn default() -> Self {
        Self::new(SubscriberOptions::default())
    }
}

impl TelemetrySubscriber {
    pub fn new(options: SubscriberOptions) -> Self {
        let capacity = options.channel_capacity;
        Self {
            commands: Mutex::new(Vec::new()),
            ts_offset: Mutex::new(None),
            context: options.context,
            completed: AtomicBool::new(false),
            data: ReplayChannel::new(capacity),
            entity_data: ReplayChannel::new(capacity),
            alarm_data: ReplayChannel::new(capacity),
            entity_count: ReplayChannel::new(capacity),
            alarm_count: ReplayChannel::new(capacity),
            notifications_count: ReplayChannel::new(capacity),
            notifications: ReplayChannel::new(capacity),
            attributes: Arc::new(Mutex::new(AttributeSnapshot::new())),
            attribute_data: ReplayChannel::new(capacity),
        }
    }

    pub fn add_command(&self, cmd: WsCommand) {
        self.commands.lock().push(cmd);
    }

    pub fn commands(&self) -> Vec<WsCommand> {
        self.commands.lock().clone()
    }

    pub fn command_ids(&self) -> Vec<CmdId> {
        self.commands.lock().iter().map(WsCommand::cmd_id).collect()
    }

    /// Stamps every command with an id from `next_id` and returns the stamped copies.
    pub(crate) fn assign_cmd_ids(&self, mut next_id: impl FnMut() -> CmdId) -> Vec<WsCommand> {
        let mut commands = self.commands.lock();
        for cmd in commands.iter_mut() {
            cmd.set_cmd_id(next_id());
        }
        commands.clone()
    }

    /// Records the client/server clock skew. Returns true when a previously set
    /// offset changed, i.e. data already delivered was corrected with a stale value.
    pub fn set_ts_offset(&self, offset: i64) -> bool {
        let mut current = self.ts_offset.lock();
        match current.replace(offset) {
            Some(previous) => previous != offset,
            None => false,
        }
    }

    pub fn ts_offset(&self) -> Option<i64> {
        *self.ts_offset.lock()
    }

    pub fn is_completed(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }

    /// Routes a decoded update to the matching `on_*` handler.
    pub fn dispatch(&self, update: WsUpdate) -> TelemetryWsResult<()> {
        match update {
            WsUpdate::Subscription(u) => self.on_data(u),
            WsUpdate::EntityData(u) => self.on_entity_data(u),
            WsUpdate::AlarmData(u) => self.on_alarm_data(u),
            WsUpdate::EntityCount(u) => self.on_entity_count(u),
            WsUpdate::AlarmCount(u) => self.on_alarm_count(u),
            WsUpdate::NotificationsCount(u) => self.on_notifications_count(u),
            WsUpdate::Notifications(u) => self.on_notifications(u),
        }
    }

    pub fn on_data(&self, mut update: SubscriptionUpdate) -> TelemetryWsResult<()> {
        self.ensure_active(update.subscription_id)?;
        let expected_keys = self
            .commands
            .lock()
            .iter()
            .find(|cmd| cmd.cmd_id() == update.subscription_id)
            .and_then(WsCommand::keys)
            .map(split_keys);
        if let Some(keys) = expected_keys {
            for key in keys {
                update.data.entry(key).or_default();
            }
        }
        log_server_error(update.subscription_id, update.error_code, update.error_msg.as_deref());

        let data = self.data.clone();
        let attributes = Arc::clone(&self.attributes);
        let attribute_data = self.attribute_data.clone();
        self.run(Box::new(move || {
            let snapshot = {
                let mut attributes = attributes.lock();
                merge_attribute_update(&mut attributes, &update);
                attributes.clone()
            };
            data.publish(update);
            attribute_data.publish(snapshot);
        }));
        Ok(())
    }

    pub fn on_entity_data(&self, mut update: EntityDataUpdate) -> TelemetryWsResult<()> {
        self.ensure_active(update.cmd_id)?;
        if let Some(offset) = self.active_offset() {
            correct_entity_data_update(&mut update, offset);
        }
        log_server_error(update.cmd_id, update.error_code, update.error_msg.as_deref());
        self.emit(&self.entity_data, update);
        Ok(())
    }

    pub fn on_alarm_data(&self, mut update: AlarmDataUpdate) -> TelemetryWsResult<()> {
        self.ensure_active(update.cmd_id)?;
        if let Some(offset) = self.active_offset() {
            correct_alarm_data_update(&mut update, offset);
        }
        log_server_error(update.cmd_id, update.error_code, update.error_msg.as_deref());
        self.emit(&self.alarm_data, update);
        Ok(())
    }

    pub fn on_entity_count(&self, update: EntityCountUpdate) -> TelemetryWsResult<()> {
        self.ensure_active(update.cmd_id)?;
        log_server_error(update.cmd_id, update.error_code, update.error_msg.as_deref());
        self.emit(&self.entity_count, update);
        Ok(())
    }

    pub fn on_alarm_count(&self, update: AlarmCountUpdate) -> TelemetryWsResult<()> {
        self.ensure_active(update.cmd_id)?;
        log_server_error(update.cmd_id, update.error_code, update.error_msg.as_deref());
        self.emit(&self.alarm_count, update);
        Ok(())
    }

    pub fn on_notifications_count(&self, update: NotificationCountUpdate) -> TelemetryWsResult<()> {
        self.ensure_active(update.cmd_id)?;
        log_server_error(update.cmd_id, update.error_code, update.error_msg.as_deref());
        self.emit(&self.notifications_count, update);
        Ok(())
    }

    pub fn on_notifications(&self, update: NotificationsUpdate) -> TelemetryWsResult<()> {
        self.ensure_active(update.cmd_id)?;
        log_server_error(update.cmd_id, update.error_code, update.error_msg.as_deref());
        self.emit(&self.notifications, update);
        Ok(())
    }

    pub fn data(&self) -> ReplayReceiver<SubscriptionUpdate> {
        self.data.subscribe()
    }

    pub fn entity_data(&self) -> ReplayReceiver<EntityDataUpdate> {
        self.entity_data.subscribe()
    }

    pub fn alarm_data(&self) -> ReplayReceiver<AlarmDataUpdate> {
        self.alarm_data.subscribe()
    }

    pub fn entity_count(&self) -> ReplayReceiver<EntityCountUpdate> {
        self.entity_count.subscribe()
    }

    pub fn alarm_count(&self) -> ReplayReceiver<AlarmCountUpdate> {
        self.alarm_count.subscribe()
    }

    pub fn notifications_count(&self) -> ReplayReceiver<NotificationCountUpdate> {
        self.notifications_count.subscribe()
    }

    pub fn notifications(&self) -> ReplayReceiver<NotificationsUpdate> {
        self.notifications.subscribe()
    }

    /// Full key → latest value table, re-emitted after every raw update.
    pub fn attribute_data(&self) -> ReplayReceiver<AttributeSnapshot> {
        self.attribute_data.subscribe()
    }

    /// Closes every channel. Runs through the execution context so updates
    /// already handed to it are still delivered first.
    pub fn complete(&self) {
        if self.completed.swap(true, Ordering::AcqRel) {
            return;
        }
        let data = self.data.clone();
        let entity_data = self.entity_data.clone();
        let alarm_data = self.alarm_data.clone();
        let entity_count = self.entity_count.clone();
        let alarm_count = self.alarm_count.clone();
        let notifications_count = self.notifications_count.clone();
        let notifications = self.notifications.clone();
        let attribute_data = self.attribute_data.clone();
        self.run(Box::new(move || {
            data.close();
            entity_data.close();
            alarm_data.close();
            entity_count.close();
            alarm_count.close();
            notifications_count.close();
            notifications.close();
            attribute_data.close();
        }));
    }

    fn ensure_active(&self, cmd_id: CmdId) -> TelemetryWsResult<()> {
        if self.is_completed() {
            debug!(target = "telemetry.ws.subscriber", cmd_id, "update for completed subscriber dropped");
            return Err(TelemetryWsError::Completed);
        }
        Ok(())
    }

    fn active_offset(&self) -> Option<i64> {
        self.ts_offset().filter(|offset| *offset != 0)
    }

    fn emit<T: Clone + Send + 'static>(&self, channel: &ReplayChannel<T>, value: T) {
        let channel = channel.clone();
        self.run(Box::new(move || {
            channel.publish(value);
        }));
    }

    fn run(&self, task: Task) {
        match &self.context {
            Some(context) => context.run(task),
            None => task(),
        }
    }
}

fn log_server_error(cmd_id: CmdId, error_code: i32, error_msg: Option<&str>) {
    if error_code != 0 {
        debug!(
            target = "telemetry.ws.subscriber",
            cmd_id,
            error_code,
            error_msg = error_msg.unwrap_or_default(),
            "server reported subscription error"
        );
    }
}
