use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
    time::Duration,
};

use shared::{
    domain::{ConversationId, GroupId, ThreadRef, UserId},
    protocol::ClientRequest,
};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::{lock_unpoisoned, transport::EventChannel};

/// Remote "currently typing" sets per thread.
///
/// Entries have no expiry of their own: a dropped "stopped" event leaves the
/// user listed until the thread is re-entered or the session resyncs.
#[derive(Debug, Default)]
pub struct TypingTracker {
    threads: HashMap<ThreadRef, HashSet<UserId>>,
}

impl TypingTracker {
    pub fn apply(&mut self, thread: ThreadRef, user_id: UserId, is_typing: bool) -> bool {
        if is_typing {
            return self.threads.entry(thread).or_default().insert(user_id);
        }
        let Some(users) = self.threads.get_mut(&thread) else {
            return false;
        };
        let removed = users.remove(&user_id);
        if users.is_empty() {
            self.threads.remove(&thread);
        }
        removed
    }

    pub fn typing_in(&self, thread: ThreadRef) -> Vec<UserId> {
        let mut users: Vec<_> = self
            .threads
            .get(&thread)
            .map(|users| users.iter().copied().collect())
            .unwrap_or_default();
        users.sort();
        users
    }

    pub fn clear_thread(&mut self, thread: ThreadRef) {
        self.threads.remove(&thread);
    }

    pub fn clear(&mut self) {
        self.threads.clear();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypingTarget {
    Direct {
        conversation_id: ConversationId,
        recipient_id: UserId,
    },
    Group(GroupId),
}

impl TypingTarget {
    pub fn thread(&self) -> ThreadRef {
        match self {
            TypingTarget::Direct {
                conversation_id, ..
            } => ThreadRef::Direct(*conversation_id),
            TypingTarget::Group(group_id) => ThreadRef::Group(*group_id),
        }
    }

    fn request(&self, is_typing: bool) -> ClientRequest {
        match *self {
            TypingTarget::Direct {
                conversation_id,
                recipient_id,
            } => ClientRequest::TypingIndicator {
                conversation_id,
                recipient_id,
                is_typing,
            },
            TypingTarget::Group(group_id) => ClientRequest::GroupTypingIndicator {
                group_id,
                is_typing,
            },
        }
    }
}

struct ArmedTimer {
    generation: u64,
    target: TypingTarget,
    handle: JoinHandle<()>,
}

/// Debounces local keystrokes into one "started" per burst and a "stopped"
/// after `idle` without input.
pub struct TypingEmitter {
    channel: Arc<dyn EventChannel>,
    idle: Duration,
    timers: Mutex<HashMap<ThreadRef, ArmedTimer>>,
    next_generation: Mutex<u64>,
}

impl TypingEmitter {
    pub fn new(channel: Arc<dyn EventChannel>, idle: Duration) -> Arc<Self> {
        Arc::new(Self {
            channel,
            idle,
            timers: Mutex::new(HashMap::new()),
            next_generation: Mutex::new(0),
        })
    }

    pub fn note_input(self: &Arc<Self>, target: TypingTarget) {
        let thread = target.thread();
        let generation = {
            let mut next = lock_unpoisoned(&self.next_generation);
            *next += 1;
            *next
        };

        let mut timers = lock_unpoisoned(&self.timers);
        let already_typing = match timers.remove(&thread) {
            Some(armed) => {
                armed.handle.abort();
                true
            }
            None => false,
        };
        if !already_typing {
            self.publish(target, true);
        }

        let emitter = Arc::clone(self);
        let idle = self.idle;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(idle).await;
            emitter.expire(thread, generation);
        });
        timers.insert(
            thread,
            ArmedTimer {
                generation,
                target,
                handle,
            },
        );
    }

    /// Explicit stop, e.g. right before a send.
    pub fn stop(&self, thread: ThreadRef) {
        let armed = lock_unpoisoned(&self.timers).remove(&thread);
        if let Some(armed) = armed {
            armed.handle.abort();
            self.publish(armed.target, false);
        }
    }

    pub fn is_typing(&self, thread: ThreadRef) -> bool {
        lock_unpoisoned(&self.timers).contains_key(&thread)
    }

    /// Drops every armed timer without emitting anything.
    pub fn cancel_all(&self) {
        for (_, armed) in lock_unpoisoned(&self.timers).drain() {
            armed.handle.abort();
        }
    }

    fn expire(&self, thread: ThreadRef, generation: u64) {
        let target = {
            let mut timers = lock_unpoisoned(&self.timers);
            match timers.get(&thread) {
                Some(armed) if armed.generation == generation => {
                    timers.remove(&thread).map(|armed| armed.target)
                }
                _ => None,
            }
        };
        if let Some(target) = target {
            self.publish(target, false);
        }
    }

    fn publish(&self, target: TypingTarget, is_typing: bool) {
        if let Err(err) = self.channel.emit(target.request(is_typing)) {
            debug!(thread = ?target.thread(), is_typing, "typing: indicator not sent: {err}");
        }
    }
}

#[cfg(test)]
#[path = "tests/typing_tests.rs"]
mod tests;
