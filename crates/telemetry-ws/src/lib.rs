//! Telemetry WS: client-side multiplexing of telemetry subscriptions over one websocket.
//!
//! Responsibilities:
//! - building subscription commands and batching them into `{ "cmds": [...] }` frames
//! - classifying inbound updates and routing them to subscribers by command id
//! - shifting server timestamps by a per-subscriber offset
//! - folding raw attribute updates into a latest-value snapshot
//! - delivering updates on replay channels through a caller-supplied execution context

pub mod builder;
pub mod command;
pub mod config;
pub mod context;
pub mod error;
pub mod normalize;
pub mod queue;
pub mod replay;
pub mod service;
pub mod subscriber;
pub mod update;

pub use builder::{
    create_entity_attributes_subscription, create_entity_filter_latest_subscription,
    create_subscription, entity_attributes_command, entity_filter_latest_command,
};
pub use command::{CmdId, EntityId, EntityKey, EntityKeyType, TelemetryScope, WsCommand, WsCommandType};
pub use config::TelemetryWsConfig;
pub use context::{ExecutionContext, Inline, Task, TokioContext};
pub use error::{TelemetryWsError, TelemetryWsResult};
pub use normalize::{AttributeSnapshot, AttributeValue};
pub use queue::CommandQueue;
pub use replay::{ReplayChannel, ReplayReceiver};
pub use service::TelemetryWsService;
pub use subscriber::{SubscriberOptions, TelemetrySubscriber};
pub use update::{UpdateKind, WsUpdate};
