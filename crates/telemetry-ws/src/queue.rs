use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::command::WsCommand;

/// Pending outbound commands, oldest first.
///
/// Serializes as the publish envelope `{ "cmds": [...] }`. [`CommandQueue::drain`]
/// hands back a detached queue so a failed send cannot resurrect commands that
/// already left the pending set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandQueue {
    cmds: VecDeque<WsCommand>,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, cmd: WsCommand) {
        self.cmds.push_back(cmd);
    }

    pub fn has_pending(&self) -> bool {
        !self.cmds.is_empty()
    }

    pub fn len(&self) -> usize {
        self.cmds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cmds.is_empty()
    }

    pub fn clear(&mut self) {
        self.cmds.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &WsCommand> {
        self.cmds.iter()
    }

    /// Removes up to `max` commands from the head, preserving order.
    pub fn drain(&mut self, max: usize) -> CommandQueue {
        let take = max.min(self.cmds.len());
        CommandQueue {
            cmds: self.cmds.drain(..take).collect(),
        }
    }

    pub fn into_vec(self) -> Vec<WsCommand> {
        self.cmds.into()
    }
}

impl Extend<WsCommand> for CommandQueue {
    fn extend<I: IntoIterator<Item = WsCommand>>(&mut self, iter: I) {
        self.cmds.extend(iter);
    }
}
