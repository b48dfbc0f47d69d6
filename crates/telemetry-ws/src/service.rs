use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use telemetry_transport::Transport;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace, warn};

use crate::command::{CmdId, WsCommand};
use crate::config::TelemetryWsConfig;
use crate::error::{TelemetryWsError, TelemetryWsResult};
use crate::queue::CommandQueue;
use crate::subscriber::{SubscriberOptions, TelemetrySubscriber};
use crate::update::WsUpdate;

/// Multiplexes many subscribers over one transport: allocates command ids,
/// batches outbound commands and routes inbound updates by id.
pub struct TelemetryWsService<T: Transport + ?Sized> {
    transport: Arc<T>,
    config: TelemetryWsConfig,
    last_cmd_id: AtomicI32,
    routes: RwLock<HashMap<CmdId, Arc<TelemetrySubscriber>>>,
    active: Mutex<Vec<Arc<TelemetrySubscriber>>>,
    queue: Mutex<CommandQueue>,
}

impl<T: Transport + ?Sized> TelemetryWsService<T> {
    pub fn new(transport: Arc<T>, config: TelemetryWsConfig) -> Self {
        Self {
            transport,
            config,
            last_cmd_id: AtomicI32::new(0),
            routes: RwLock::new(HashMap::new()),
            active: Mutex::new(Vec::new()),
            queue: Mutex::new(CommandQueue::new()),
        }
    }

    pub fn config(&self) -> &TelemetryWsConfig {
        &self.config
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Options for new subscribers, sized from the configured channel capacity.
    pub fn subscriber_options(&self) -> SubscriberOptions {
        SubscriberOptions::from_config(&self.config)
    }

    pub fn subscriber_count(&self) -> usize {
        self.active.lock().len()
    }

    pub fn pending_commands(&self) -> usize {
        self.queue.lock().len()
    }

    fn next_cmd_id(&self) -> CmdId {
        self.last_cmd_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn is_active(&self, subscriber: &Arc<TelemetrySubscriber>) -> bool {
        self.active
            .lock()
            .iter()
            .any(|existing| Arc::ptr_eq(existing, subscriber))
    }

    /// Stamps fresh ids on the subscriber's commands, registers it for the
    /// replies and queues the commands for the next publish.
    pub fn subscribe(&self, subscriber: &Arc<TelemetrySubscriber>) -> TelemetryWsResult<()> {
        if subscriber.is_completed() {
            return Err(TelemetryWsError::Completed);
        }
        if self.is_active(subscriber) {
            debug!(target = "telemetry.ws.service", "subscriber already active, ignoring subscribe");
            return Ok(());
        }

        let cmds = subscriber.assign_cmd_ids(|| self.next_cmd_id());
        let mut routed = false;
        {
            let mut routes = self.routes.write();
            for cmd in cmds.iter().filter(|cmd| cmd.expects_updates()) {
                routes.insert(cmd.cmd_id(), Arc::clone(subscriber));
                routed = true;
            }
        }
        // fire-and-forget only: nothing to route, resend or cancel later
        if routed {
            self.active.lock().push(Arc::clone(subscriber));
        }
        debug!(
            target = "telemetry.ws.service",
            cmd_ids = ?cmds.iter().map(WsCommand::cmd_id).collect::<Vec<_>>(),
            "subscriber registered"
        );
        self.queue.lock().extend(cmds);
        Ok(())
    }

    /// Queues the cancelling counterpart of every command, drops the routes and
    /// completes the subscriber.
    pub fn unsubscribe(&self, subscriber: &Arc<TelemetrySubscriber>) {
        let removed = {
            let mut active = self.active.lock();
            let before = active.len();
            active.retain(|existing| !Arc::ptr_eq(existing, subscriber));
            before != active.len()
        };
        if !removed {
            subscriber.complete();
            return;
        }

        let cmds = subscriber.commands();
        {
            let mut routes = self.routes.write();
            for cmd in &cmds {
                let owned = routes
                    .get(&cmd.cmd_id())
                    .is_some_and(|routed| Arc::ptr_eq(routed, subscriber));
                if owned {
                    routes.remove(&cmd.cmd_id());
                }
            }
        }
        self.queue
            .lock()
            .extend(cmds.iter().filter_map(WsCommand::to_unsubscribe));
        subscriber.complete();
        debug!(target = "telemetry.ws.service", "subscriber removed");
    }

    /// Re-sends entity and alarm queries under their existing ids after the
    /// caller changed them.
    pub fn update(&self, subscriber: &Arc<TelemetrySubscriber>) {
        if !self.is_active(subscriber) {
            return;
        }
        let cmds = subscriber
            .commands()
            .into_iter()
            .filter(|cmd| matches!(cmd, WsCommand::EntityData(_) | WsCommand::AlarmData(_)));
        self.queue.lock().extend(cmds);
    }

    /// Replaces anything pending with the full command set of every active
    /// subscriber, ids unchanged. For use after the transport reconnects.
    pub fn resubscribe_all(&self) {
        let active = self.active.lock().clone();
        let mut queue = self.queue.lock();
        queue.clear();
        for subscriber in &active {
            queue.extend(
                subscriber
                    .commands()
                    .into_iter()
                    .filter(WsCommand::expects_updates),
            );
        }
        debug!(
            target = "telemetry.ws.service",
            subscribers = active.len(),
            pending = queue.len(),
            "resubscribing after reconnect"
        );
    }

    /// Drains the queue in batches of at most `max_publish_commands` and hands
    /// each batch to the transport. A failed batch is lost, not retried.
    pub fn publish_commands(&self) -> TelemetryWsResult<usize> {
        let max = self.config.max_publish_commands.max(1);
        let mut published = 0;
        loop {
            let batch = {
                let mut queue = self.queue.lock();
                if !queue.has_pending() {
                    break;
                }
                queue.drain(max)
            };
            let count = batch.len();
            let payload = match serde_json::to_vec(&batch) {
                Ok(payload) => payload,
                Err(err) => {
                    warn!(
                        target = "telemetry.ws.service",
                        error = %err,
                        dropped = count,
                        "failed to encode command batch"
                    );
                    return Err(TelemetryWsError::Encode(err));
                }
            };
            if let Err(err) = self.transport.publish(Bytes::from(payload)) {
                warn!(
                    target = "telemetry.ws.service",
                    error = %err,
                    dropped = count,
                    "failed to publish command batch"
                );
                return Err(err.into());
            }
            trace!(target = "telemetry.ws.service", count, "published command batch");
            published += count;
        }
        Ok(published)
    }

    /// Decodes one inbound frame and dispatches it to the subscriber that owns its id.
    pub fn on_message(&self, frame: &[u8]) -> TelemetryWsResult<()> {
        let update = match WsUpdate::from_slice(frame) {
            Ok(update) => update,
            Err(err) => {
                warn!(target = "telemetry.ws.service", error = %err, "dropping inbound frame");
                return Err(err);
            }
        };
        let cmd_id = update.cmd_id();
        let subscriber = self.routes.read().get(&cmd_id).cloned();
        match subscriber {
            Some(subscriber) => subscriber.dispatch(update),
            None => {
                debug!(
                    target = "telemetry.ws.service",
                    cmd_id,
                    kind = update.kind().name(),
                    "no subscriber for update"
                );
                Ok(())
            }
        }
    }
}

impl<T: Transport + ?Sized + 'static> TelemetryWsService<T> {
    /// Serializes inbound delivery and periodic publishing onto one task.
    /// The task ends when the transport's inbound stream closes.
    pub fn spawn_pump(self: &Arc<Self>) -> JoinHandle<()> {
        let mut inbound = self.transport.subscribe();
        let mut ticker = tokio::time::interval(self.config.publish_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let service = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    frame = inbound.recv() => match frame {
                        // failures are logged where they happen
                        Some(frame) => {
                            let _ = service.on_message(&frame);
                        }
                        None => break,
                    },
                    _ = ticker.tick() => {
                        let _ = service.publish_commands();
                    }
                }
            }
            debug!(target = "telemetry.ws.service", "pump stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{
        create_entity_attributes_subscription, create_subscription, entity_count_command,
        mark_all_notifications_as_read_command,
    };
    use crate::command::{EntityId, TelemetryScope, WsCommandType};
    use crate::subscriber::SubscriberOptions;
    use serde_json::{json, Value};
    use telemetry_transport::LocalTransport;

    fn service(max: usize) -> TelemetryWsService<LocalTransport> {
        TelemetryWsService::new(
            Arc::new(LocalTransport::new()),
            TelemetryWsConfig {
                max_publish_commands: max,
                ..Default::default()
            },
        )
    }

    fn attrs(keys: &[&str]) -> Arc<TelemetrySubscriber> {
        create_entity_attributes_subscription(
            &EntityId::new("DEVICE", "d1"),
            TelemetryScope::ServerScope,
            keys,
            SubscriberOptions::default(),
        )
    }

    fn sent_batches(service: &TelemetryWsService<LocalTransport>) -> Vec<Value> {
        service
            .transport()
            .take_sent()
            .iter()
            .map(|bytes| serde_json::from_slice(bytes).expect("json batch"))
            .collect()
    }

    #[test]
    fn assigns_increasing_ids() {
        let service = service(10);
        let first = attrs(&["a"]);
        let second = attrs(&["b"]);
        service.subscribe(&first).expect("subscribe");
        service.subscribe(&second).expect("subscribe");
        assert_eq!(first.command_ids(), vec![1]);
        assert_eq!(second.command_ids(), vec![2]);
        assert_eq!(service.subscriber_count(), 2);
        assert_eq!(service.pending_commands(), 2);
    }

    #[test]
    fn publishes_in_bounded_batches() {
        let service = service(2);
        for _ in 0..5 {
            service.subscribe(&attrs(&["a"])).expect("subscribe");
        }
        assert_eq!(service.publish_commands().expect("publish"), 5);
        let batches = sent_batches(&service);
        let sizes: Vec<usize> = batches
            .iter()
            .map(|batch| batch["cmds"].as_array().expect("cmds").len())
            .collect();
        assert_eq!(sizes, vec![2, 2, 1]);
        let ids: Vec<i64> = batches
            .iter()
            .flat_map(|batch| batch["cmds"].as_array().expect("cmds").clone())
            .map(|cmd| cmd["cmdId"].as_i64().expect("id"))
            .collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn publishing_nothing_sends_nothing() {
        let service = service(10);
        assert_eq!(service.publish_commands().expect("publish"), 0);
        assert_eq!(service.transport().sent_count(), 0);
    }

    #[test]
    fn failed_publish_is_not_retried() {
        let service = service(10);
        service.subscribe(&attrs(&["a"])).expect("subscribe");
        service.transport().set_open(false);
        assert!(matches!(
            service.publish_commands(),
            Err(TelemetryWsError::Transport(_))
        ));
        service.transport().set_open(true);
        assert_eq!(service.publish_commands().expect("publish"), 0);
    }

    #[test]
    fn routes_updates_to_the_owning_subscriber() {
        let service = service(10);
        let first = attrs(&["a"]);
        let second = attrs(&["b", "c"]);
        service.subscribe(&first).expect("subscribe");
        service.subscribe(&second).expect("subscribe");

        let frame = json!({ "subscriptionId": 2, "errorCode": 0, "data": { "b": [[5, "1"]] } });
        service
            .on_message(frame.to_string().as_bytes())
            .expect("dispatch");

        assert!(first.data().try_recv().is_none());
        let update = second.data().try_recv().expect("routed");
        assert_eq!(update.data["b"].len(), 1);
        assert!(update.data["c"].is_empty());
    }

    #[test]
    fn unknown_ids_are_ignored_and_bad_shapes_rejected() {
        let service = service(10);
        let frame = json!({ "cmdId": 42, "cmdUpdateType": "COUNT_DATA", "count": 1 });
        service
            .on_message(frame.to_string().as_bytes())
            .expect("unknown id is not an error");

        let err = service
            .on_message(br#"{"hello":"world"}"#)
            .expect_err("unrecognized");
        assert!(matches!(err, TelemetryWsError::UnrecognizedMessage(_)));

        let err = service.on_message(b"not json").expect_err("garbage");
        assert!(matches!(err, TelemetryWsError::Json(_)));
    }

    #[test]
    fn unsubscribe_queues_counterparts_and_completes() {
        let service = service(10);
        let attrs_sub = attrs(&["a"]);
        let count_sub = create_subscription(
            entity_count_command(json!({ "entityFilter": {} })),
            SubscriberOptions::default(),
        );
        service.subscribe(&attrs_sub).expect("subscribe");
        service.subscribe(&count_sub).expect("subscribe");
        service.publish_commands().expect("publish");
        service.transport().take_sent();

        service.unsubscribe(&attrs_sub);
        service.unsubscribe(&count_sub);
        service.unsubscribe(&count_sub);
        assert!(attrs_sub.is_completed());
        assert_eq!(service.subscriber_count(), 0);

        service.publish_commands().expect("publish");
        let batches = sent_batches(&service);
        assert_eq!(
            batches,
            vec![json!({ "cmds": [
                {
                    "type": "ATTRIBUTES", "cmdId": 1, "entityType": "DEVICE", "entityId": "d1",
                    "scope": "SERVER_SCOPE", "keys": "a", "unsubscribe": true
                },
                { "type": "ENTITY_COUNT_UNSUBSCRIBE", "cmdId": 2 }
            ] })]
        );

        let frame = json!({ "subscriptionId": 1, "data": { "a": [[1, "x"]] } });
        service
            .on_message(frame.to_string().as_bytes())
            .expect("route dropped quietly");
    }

    #[test]
    fn fire_and_forget_commands_are_not_routed() {
        let service = service(10);
        let sub = create_subscription(mark_all_notifications_as_read_command(), SubscriberOptions::default());
        service.subscribe(&sub).expect("subscribe");
        assert!(service.routes.read().is_empty());
        assert_eq!(service.pending_commands(), 1);
    }

    #[test]
    fn fire_and_forget_subscribers_are_not_kept_or_resent() {
        let service = service(10);
        for _ in 0..3 {
            let sub = create_subscription(mark_all_notifications_as_read_command(), SubscriberOptions::default());
            service.subscribe(&sub).expect("subscribe");
        }
        let live = TelemetrySubscriber::default();
        live.add_command(entity_count_command(json!({})));
        live.add_command(mark_all_notifications_as_read_command());
        let live = Arc::new(live);
        service.subscribe(&live).expect("subscribe");
        assert_eq!(service.subscriber_count(), 1);
        assert_eq!(service.publish_commands().expect("publish"), 5);

        service.resubscribe_all();
        let pending = service.queue.lock().clone().into_vec();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].command_type(), WsCommandType::EntityCount);
    }

    #[test]
    fn subscriber_options_follow_configured_capacity() {
        let service = TelemetryWsService::new(
            Arc::new(LocalTransport::new()),
            TelemetryWsConfig {
                channel_capacity: 3,
                ..Default::default()
            },
        );
        assert_eq!(service.subscriber_options().channel_capacity, 3);
    }

    #[test]
    fn subscribe_rejects_completed_subscribers() {
        let service = service(10);
        let sub = attrs(&["a"]);
        sub.complete();
        assert!(matches!(service.subscribe(&sub), Err(TelemetryWsError::Completed)));
    }

    #[test]
    fn update_resends_only_query_commands() {
        let service = service(10);
        let sub = TelemetrySubscriber::default();
        sub.add_command(crate::builder::entity_filter_latest_command(json!({}), Vec::new()));
        sub.add_command(entity_count_command(json!({})));
        let sub = Arc::new(sub);
        service.subscribe(&sub).expect("subscribe");
        service.publish_commands().expect("publish");

        service.update(&sub);
        assert_eq!(service.pending_commands(), 1);
        service.publish_commands().expect("publish");
        let batch = sent_batches(&service).pop().expect("batch");
        assert_eq!(batch["cmds"][0]["type"], "ENTITY_DATA");
        assert_eq!(batch["cmds"][0]["cmdId"], 1);
    }

    #[test]
    fn resubscribe_all_requeues_with_existing_ids() {
        let service = service(10);
        let sub = attrs(&["a"]);
        service.subscribe(&sub).expect("subscribe");
        service.publish_commands().expect("publish");

        service.resubscribe_all();
        let pending = service.queue.lock().clone().into_vec();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].cmd_id(), 1);
        assert_eq!(pending[0].command_type(), WsCommandType::Attributes);
    }
}
