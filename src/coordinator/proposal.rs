//! Proposals and their bounded wait
//!
//! Each state-mutating request is wrapped in a [`Proposal`] tagged with a
//! random id. The replica that proposed it registers a waiter in
//! [`PendingProposals`]; the apply loop resolves the waiter when the entry
//! carrying that id is applied. Waiters are bounded in number and expire.

use crate::common::{Error, ProposalConfig, Result};
use crate::coordinator::state::{Event, Outcome};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use uuid::Uuid;

/// Payload of a raft log entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    pub id: Uuid,
    /// Replica that received the node's request
    pub origin: u64,
    pub event: Event,
}

impl Proposal {
    pub fn new(origin: u64, event: Event) -> Self {
        Self {
            id: Uuid::new_v4(),
            origin,
            event,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(data)?)
    }
}

/// How the proposing replica waits for its proposal
#[derive(Debug, Clone)]
pub struct ProposalPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub apply_timeout: Duration,
}

impl From<&ProposalConfig> for ProposalPolicy {
    fn from(config: &ProposalConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
            apply_timeout: Duration::from_millis(config.apply_timeout_ms),
        }
    }
}

impl ProposalPolicy {
    /// Delay before attempt `attempt + 1` (attempts count from 1), with jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = self
            .initial_backoff
            .saturating_mul(1u32 << attempt.saturating_sub(1).min(16));
        let base = exp.min(self.max_backoff);
        let jitter_ms = base.as_millis() as u64 / 4;
        let jitter = if jitter_ms == 0 {
            0
        } else {
            rand::random::<u64>() % (jitter_ms + 1)
        };
        base + Duration::from_millis(jitter)
    }
}

/// Final state of a proposal as seen by the replica that made it
#[derive(Debug)]
pub enum ProposalOutcome {
    /// Entry committed and applied; carries the apply result.
    Applied(Outcome),
    /// Raft refused the proposal or the replica is going away.
    Failed(Error),
    /// Accepted by raft but not applied within the timeout. It may still apply.
    TimedOut,
}

impl ProposalOutcome {
    pub fn into_result(self) -> Result<Outcome> {
        match self {
            ProposalOutcome::Applied(outcome) => Ok(outcome),
            ProposalOutcome::Failed(e) => Err(e),
            ProposalOutcome::TimedOut => Err(Error::ProposalTimeout),
        }
    }
}

pub type ApplyReply = oneshot::Sender<Result<Outcome>>;

struct Waiter {
    reply: ApplyReply,
    deadline: Instant,
}

/// Waiters for proposals made by this replica
pub struct PendingProposals {
    waiters: HashMap<Uuid, Waiter>,
    capacity: usize,
    ttl: Duration,
}

impl PendingProposals {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            waiters: HashMap::new(),
            capacity,
            ttl,
        }
    }

    /// Track `id`. When full, the reply is handed back untouched.
    pub fn register(
        &mut self,
        id: Uuid,
        reply: ApplyReply,
        now: Instant,
    ) -> std::result::Result<(), ApplyReply> {
        if self.waiters.len() >= self.capacity {
            return Err(reply);
        }
        self.waiters.insert(
            id,
            Waiter {
                reply,
                deadline: now + self.ttl,
            },
        );
        Ok(())
    }

    /// Deliver the apply result. False if nobody here is waiting for `id`.
    pub fn resolve(&mut self, id: &Uuid, outcome: Outcome) -> bool {
        match self.waiters.remove(id) {
            Some(waiter) => {
                let _ = waiter.reply.send(Ok(outcome));
                true
            }
            None => false,
        }
    }

    pub fn fail(&mut self, id: &Uuid, error: Error) {
        if let Some(waiter) = self.waiters.remove(id) {
            let _ = waiter.reply.send(Err(error));
        }
    }

    /// Drop waiters past their deadline or whose caller went away.
    pub fn expire(&mut self, now: Instant) -> usize {
        let before = self.waiters.len();
        self.waiters
            .retain(|_, w| w.deadline > now && !w.reply.is_closed());
        before - self.waiters.len()
    }

    pub fn len(&self) -> usize {
        self.waiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }
}
