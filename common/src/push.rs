use std::{
    fmt::Display,
    sync::mpsc::{self, Receiver, Sender},
};

use log::debug;

pub type SessionId = i32;

#[derive(Debug)]
enum SubscriberChange<S> {
    Joined(SessionId, S),
    Left(SessionId),
}

// Registration side, held by the transport's connection handler. Never
// blocks, so it cannot wait on a broadcast that is waiting on the transport.
#[derive(Debug)]
pub struct SubscriberHandle<S> {
    changes: Sender<SubscriberChange<S>>,
}

impl<S> Clone for SubscriberHandle<S> {
    fn clone(&self) -> Self {
        Self {
            changes: self.changes.clone(),
        }
    }
}

impl<S> SubscriberHandle<S> {
    pub fn joined(&self, session: SessionId, sender: S) {
        if self
            .changes
            .send(SubscriberChange::Joined(session, sender))
            .is_err()
        {
            debug!("push subscriber {session} ignored, broadcaster stopped");
        }
    }

    pub fn left(&self, session: SessionId) {
        let _ = self.changes.send(SubscriberChange::Left(session));
    }
}

// Owned by the broadcasting loop; no lock is held while frames are sent.
#[derive(Debug)]
pub struct SubscriberRegistry<S> {
    changes: Receiver<SubscriberChange<S>>,
    subscribers: Vec<(SessionId, S)>,
}

impl<S> SubscriberRegistry<S> {
    pub fn new() -> (Self, SubscriberHandle<S>) {
        let (tx, rx) = mpsc::channel();
        let registry = Self {
            changes: rx,
            subscribers: Vec::new(),
        };
        (registry, SubscriberHandle { changes: tx })
    }

    pub fn sessions(&mut self) -> Vec<SessionId> {
        self.sync();
        self.subscribers.iter().map(|(session, _)| *session).collect()
    }

    // Returns how many subscribers took the frame; failed ones are dropped.
    pub fn broadcast<E, F>(&mut self, mut send: F) -> usize
    where
        E: Display,
        F: FnMut(&mut S) -> Result<(), E>,
    {
        self.sync();
        self.subscribers
            .retain_mut(|(session, sender)| match send(sender) {
                Ok(()) => true,
                Err(err) => {
                    debug!("dropping push subscriber {session}: {err}");
                    false
                }
            });
        self.subscribers.len()
    }

    fn sync(&mut self) {
        for change in self.changes.try_iter() {
            match change {
                SubscriberChange::Joined(session, sender) => {
                    self.subscribers.retain(|(id, _)| *id != session);
                    self.subscribers.push((session, sender));
                    debug!("push subscriber {session} connected");
                }
                SubscriberChange::Left(session) => {
                    self.subscribers.retain(|(id, _)| *id != session);
                    debug!("push subscriber {session} closed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use pretty_assertions::assert_eq;

    #[derive(Debug, Default)]
    struct FrameLog {
        frames: Vec<String>,
        broken: bool,
    }

    fn send_text(frame: &str) -> impl FnMut(&mut FrameLog) -> Result<(), String> + '_ {
        move |log| {
            if log.broken {
                return Err("socket closed".into());
            }
            log.frames.push(frame.to_string());
            Ok(())
        }
    }

    #[test]
    fn registration_does_not_wait_for_the_broadcaster() {
        let (mut registry, handle) = SubscriberRegistry::<FrameLog>::new();

        // Connection handlers on another task finish while the registry is
        // busy elsewhere and never touched.
        let joiner = {
            let handle = handle.clone();
            thread::spawn(move || {
                handle.joined(7, FrameLog::default());
                handle.joined(8, FrameLog::default());
                handle.left(7);
            })
        };
        joiner.join().unwrap();

        assert_eq!(registry.broadcast(send_text("ping")), 1);
        assert_eq!(registry.sessions(), vec![8]);
    }

    #[test]
    fn failed_sends_drop_the_subscriber() {
        let (mut registry, handle) = SubscriberRegistry::new();
        handle.joined(1, FrameLog::default());
        handle.joined(
            2,
            FrameLog {
                broken: true,
                ..Default::default()
            },
        );

        assert_eq!(registry.broadcast(send_text("new_readings")), 1);
        assert_eq!(registry.sessions(), vec![1]);
    }

    #[test]
    fn rejoined_session_replaces_stale_sender() {
        let (mut registry, handle) = SubscriberRegistry::new();
        handle.joined(
            3,
            FrameLog {
                broken: true,
                ..Default::default()
            },
        );
        handle.joined(3, FrameLog::default());

        assert_eq!(registry.broadcast(send_text("ping")), 1);
        assert_eq!(registry.subscribers[0].1.frames, vec!["ping".to_string()]);
    }

    #[test]
    fn changes_after_a_broadcast_apply_to_the_next_one() {
        let (mut registry, handle) = SubscriberRegistry::new();
        handle.joined(1, FrameLog::default());
        assert_eq!(registry.broadcast(send_text("a")), 1);

        handle.left(1);
        handle.joined(2, FrameLog::default());
        assert_eq!(registry.broadcast(send_text("b")), 1);
        assert_eq!(registry.subscribers[0].0, 2);
        assert_eq!(registry.subscribers[0].1.frames, vec!["b".to_string()]);
    }
}
