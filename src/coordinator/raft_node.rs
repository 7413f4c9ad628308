//! Raft consensus driver
//!
//! Each coordinator replica runs one [`RaftDriver`] task. The driver owns the
//! raft-rs [`RawNode`], the replicated [`CoordinatorState`] and the waiters
//! for proposals made on this replica; nothing else touches them. The rest of
//! the process talks to the driver through a cloneable [`ReplicaHandle`].
//!
//! Membership of the raft group is static (taken from configuration) and the
//! log is kept in memory. Snapshots are never produced, and receiving one is
//! fatal for the replica.

use crate::common::{CoordinatorConfig, Error, Result};
use crate::coordinator::aggregation::{spawn_engine, AggregationHandle, Aggregator};
use crate::coordinator::proposal::{
    ApplyReply, PendingProposals, Proposal, ProposalOutcome, ProposalPolicy,
};
use crate::coordinator::state::{CoordinatorState, Event, Outcome};
use crate::coordinator::transport::RaftTransport;
use raft::prelude::{Entry, EntryType, Message, RawNode};
use raft::Config as RaftConfig;
use raft::storage::MemStorage;
use raft::StateRole;
use serde::Serialize;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Raft role of a replica
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RaftRole {
    Follower,
    PreCandidate,
    Candidate,
    Leader,
}

impl From<StateRole> for RaftRole {
    fn from(role: StateRole) -> Self {
        match role {
            StateRole::Follower => RaftRole::Follower,
            StateRole::PreCandidate => RaftRole::PreCandidate,
            StateRole::Candidate => RaftRole::Candidate,
            StateRole::Leader => RaftRole::Leader,
        }
    }
}

impl std::fmt::Display for RaftRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RaftRole::Follower => write!(f, "follower"),
            RaftRole::PreCandidate => write!(f, "pre-candidate"),
            RaftRole::Candidate => write!(f, "candidate"),
            RaftRole::Leader => write!(f, "leader"),
        }
    }
}

/// Point-in-time view of a replica
#[derive(Debug, Clone, Serialize)]
pub struct ReplicaStatus {
    pub id: u64,
    pub role: RaftRole,
    /// Current leader, 0 when unknown
    pub leader: u64,
    pub term: u64,
    pub applied_index: u64,
    pub nodes: usize,
    pub commits: u64,
    pub pending_proposals: usize,
}

impl ReplicaStatus {
    pub fn is_leader(&self) -> bool {
        self.role == RaftRole::Leader
    }
}

type ReadFn = Box<dyn FnOnce(&CoordinatorState) + Send>;

enum Command {
    Propose {
        proposal: Proposal,
        reply: ApplyReply,
    },
    Step(Message),
    Read(ReadFn),
    Status(oneshot::Sender<ReplicaStatus>),
    Campaign,
}

enum LoopEvent {
    Tick,
    Command(Command),
    Shutdown,
}

/// Cloneable access to a running replica
#[derive(Clone)]
pub struct ReplicaHandle {
    id: u64,
    commands: mpsc::Sender<Command>,
    policy: ProposalPolicy,
}

impl ReplicaHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Replicate `event` and wait until this replica has applied it.
    ///
    /// Retries with backoff while raft drops the proposal (typically no
    /// leader is known yet). Once raft has accepted the entry the wait is
    /// bounded by the apply timeout and the proposal is never resubmitted,
    /// so a [`ProposalOutcome::TimedOut`] event may still be applied later.
    pub async fn propose(&self, event: Event) -> ProposalOutcome {
        let mut attempt = 1;
        loop {
            let proposal = Proposal::new(self.id, event.clone());
            let id = proposal.id;
            let (reply, rx) = oneshot::channel();
            if self
                .commands
                .send(Command::Propose { proposal, reply })
                .await
                .is_err()
            {
                return ProposalOutcome::Failed(Error::Shutdown);
            }

            match tokio::time::timeout(self.policy.apply_timeout, rx).await {
                Ok(Ok(Ok(outcome))) => return ProposalOutcome::Applied(outcome),
                Ok(Ok(Err(e))) if e.is_retryable() && attempt < self.policy.max_attempts => {
                    let delay = self.policy.backoff(attempt);
                    tracing::debug!(
                        replica = self.id,
                        proposal = %id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "proposal not accepted, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Ok(Ok(Err(e))) => return ProposalOutcome::Failed(e),
                Ok(Err(_)) => return ProposalOutcome::Failed(Error::Shutdown),
                Err(_) => {
                    tracing::warn!(
                        replica = self.id,
                        proposal = %id,
                        kind = event.kind(),
                        "proposal not applied before timeout"
                    );
                    return ProposalOutcome::TimedOut;
                }
            }
        }
    }

    /// Run `f` against the applied state on the driver task.
    pub async fn read<R, F>(&self, f: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&CoordinatorState) -> R + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let read: ReadFn = Box::new(move |state| {
            let _ = tx.send(f(state));
        });
        self.commands
            .send(Command::Read(read))
            .await
            .map_err(|_| Error::Shutdown)?;
        rx.await.map_err(|_| Error::Shutdown)
    }

    /// Hand a raft message from a peer to the driver.
    pub async fn step(&self, message: Message) -> Result<()> {
        self.commands
            .send(Command::Step(message))
            .await
            .map_err(|_| Error::Shutdown)
    }

    /// Like [`step`](Self::step) but drops the message when the queue is full.
    pub fn try_step(&self, message: Message) -> Result<()> {
        self.commands
            .try_send(Command::Step(message))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => Error::Busy,
                mpsc::error::TrySendError::Closed(_) => Error::Shutdown,
            })
    }

    pub async fn status(&self) -> Result<ReplicaStatus> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Status(tx))
            .await
            .map_err(|_| Error::Shutdown)?;
        rx.await.map_err(|_| Error::Shutdown)
    }

    /// Start an election now.
    pub async fn campaign(&self) -> Result<()> {
        self.commands
            .send(Command::Campaign)
            .await
            .map_err(|_| Error::Shutdown)
    }
}

pub struct RaftDriver {
    id: u64,
    node: RawNode<MemStorage>,
    state: CoordinatorState,
    proposals: PendingProposals,
    commands: mpsc::Receiver<Command>,
    transport: Box<dyn RaftTransport>,
    aggregation: AggregationHandle,
    tick_interval: Duration,
    status_every: u64,
    applied_index: u64,
}

impl RaftDriver {
    /// Drive the node until shutdown or a fatal error.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut ticker = tokio::time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut ticks: u64 = 0;

        tracing::info!(replica = self.id, "consensus driver started");

        loop {
            let event = tokio::select! {
                _ = ticker.tick() => LoopEvent::Tick,
                command = self.commands.recv() => match command {
                    Some(command) => LoopEvent::Command(command),
                    None => LoopEvent::Shutdown,
                },
                _ = shutdown.changed() => LoopEvent::Shutdown,
            };

            match event {
                LoopEvent::Tick => {
                    self.node.tick();
                    ticks += 1;
                    let expired = self.proposals.expire(Instant::now());
                    if expired > 0 {
                        tracing::debug!(
                            replica = self.id,
                            expired,
                            "dropped stale proposal waiters"
                        );
                    }
                    if ticks % self.status_every == 0 {
                        self.log_status();
                    }
                }
                LoopEvent::Command(command) => self.handle_command(command),
                LoopEvent::Shutdown => {
                    tracing::info!(replica = self.id, "consensus driver stopping");
                    return Ok(());
                }
            }

            if let Err(e) = self.on_ready().await {
                tracing::error!(replica = self.id, error = %e, "consensus driver failed");
                return Err(e);
            }
        }
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Propose { proposal, reply } => self.propose(proposal, reply),
            Command::Step(message) => {
                if let Err(e) = self.node.step(message) {
                    tracing::debug!(replica = self.id, error = %e, "ignored raft message");
                }
            }
            Command::Read(read) => read(&self.state),
            Command::Status(reply) => {
                let _ = reply.send(self.status());
            }
            Command::Campaign => {
                if let Err(e) = self.node.campaign() {
                    tracing::warn!(replica = self.id, error = %e, "campaign failed");
                }
            }
        }
    }

    fn propose(&mut self, proposal: Proposal, reply: ApplyReply) {
        let data = match proposal.encode() {
            Ok(data) => data,
            Err(e) => {
                let _ = reply.send(Err(e));
                return;
            }
        };
        let id = proposal.id;
        if let Err(reply) = self.proposals.register(id, reply, Instant::now()) {
            let _ = reply.send(Err(Error::Busy));
            return;
        }
        if let Err(e) = self.node.propose(vec![], data) {
            tracing::debug!(replica = self.id, proposal = %id, error = %e, "proposal refused");
            self.proposals.fail(&id, Error::Raft(e));
        }
    }

    async fn on_ready(&mut self) -> Result<()> {
        if !self.node.has_ready() {
            return Ok(());
        }
        let mut ready = self.node.ready();

        if !ready.messages().is_empty() {
            self.transport.send(ready.take_messages());
        }

        if !ready.snapshot().is_empty() {
            return Err(Error::SnapshotUnsupported(self.id));
        }

        self.apply_committed(ready.take_committed_entries()).await?;

        if !ready.entries().is_empty() {
            self.node.mut_store().wl().append(ready.entries())?;
        }
        if let Some(hs) = ready.hs() {
            self.node.mut_store().wl().set_hardstate(hs.clone());
        }
        if !ready.persisted_messages().is_empty() {
            self.transport.send(ready.take_persisted_messages());
        }

        let mut light = self.node.advance(ready);
        if let Some(commit) = light.commit_index() {
            self.node.mut_store().wl().mut_hard_state().set_commit(commit);
        }
        self.transport.send(light.take_messages());
        self.apply_committed(light.take_committed_entries()).await?;
        self.node.advance_apply();
        Ok(())
    }

    async fn apply_committed(&mut self, entries: Vec<Entry>) -> Result<()> {
        for entry in entries {
            self.applied_index = entry.get_index();
            if entry.get_data().is_empty() {
                // leader's no-op entry
                continue;
            }
            if entry.get_entry_type() != EntryType::EntryNormal {
                tracing::warn!(
                    replica = self.id,
                    index = entry.get_index(),
                    "ignoring configuration change entry"
                );
                continue;
            }

            let proposal = match Proposal::decode(entry.get_data()) {
                Ok(proposal) => proposal,
                Err(e) => {
                    tracing::error!(
                        replica = self.id,
                        index = entry.get_index(),
                        error = %e,
                        "skipping undecodable entry"
                    );
                    continue;
                }
            };

            let kind = proposal.event.kind();
            let outcome = self.state.apply(proposal.event);
            if let Outcome::TestAccepted { update } = &outcome {
                self.aggregation.submit(update.clone()).await?;
            }
            tracing::debug!(
                replica = self.id,
                index = entry.get_index(),
                proposal = %proposal.id,
                origin = proposal.origin,
                kind,
                "applied entry"
            );

            if proposal.origin == self.id {
                self.proposals.resolve(&proposal.id, outcome);
            }
        }
        Ok(())
    }

    fn status(&self) -> ReplicaStatus {
        ReplicaStatus {
            id: self.id,
            role: self.node.raft.state.into(),
            leader: self.node.raft.leader_id,
            term: self.node.raft.term,
            applied_index: self.applied_index,
            nodes: self.state.registry().len(),
            commits: self.state.ledger().commit_count(),
            pending_proposals: self.proposals.len(),
        }
    }

    fn log_status(&self) {
        let status = self.status();
        tracing::info!(
            replica = status.id,
            role = %status.role,
            leader = status.leader,
            term = status.term,
            applied = status.applied_index,
            nodes = status.nodes,
            commits = status.commits,
            pending = status.pending_proposals,
            "replica status"
        );
    }
}

/// A started replica
pub struct Replica {
    pub handle: ReplicaHandle,
    pub aggregation: AggregationHandle,
    pub driver: JoinHandle<Result<()>>,
}

/// Build the raft node, the aggregation engine and the driver task.
pub fn start_replica(
    config: &CoordinatorConfig,
    transport: impl RaftTransport,
    shutdown: watch::Receiver<bool>,
) -> Result<Replica> {
    config.validate()?;

    let raft_config = RaftConfig {
        id: config.replica_id,
        election_tick: config.election_tick,
        heartbeat_tick: config.heartbeat_tick,
        max_size_per_msg: config.max_size_per_msg,
        max_inflight_msgs: config.max_inflight_msgs,
        ..Default::default()
    };
    raft_config.validate()?;

    let storage = MemStorage::new_with_conf_state((config.voters(), Vec::<u64>::new()));
    let mut node = RawNode::new(&raft_config, storage, &raft::default_logger())?;
    if config.campaign_on_start {
        node.campaign()?;
    }

    let (aggregation, _engine) = spawn_engine(
        Aggregator::new(config.promotion_ratio),
        config.result_queue_capacity,
    );
    let policy = ProposalPolicy::from(&config.proposal);
    let (commands_tx, commands_rx) = mpsc::channel(config.command_queue_capacity);

    let driver = RaftDriver {
        id: config.replica_id,
        node,
        state: CoordinatorState::new(),
        proposals: PendingProposals::new(config.proposal.max_in_flight, policy.apply_timeout),
        commands: commands_rx,
        transport: Box::new(transport),
        aggregation: aggregation.clone(),
        tick_interval: config.tick_interval(),
        status_every: config.status_log_ticks(),
        applied_index: 0,
    };

    tracing::info!(
        replica = config.replica_id,
        voters = ?config.voters(),
        "starting raft replica"
    );

    Ok(Replica {
        handle: ReplicaHandle {
            id: config.replica_id,
            commands: commands_tx,
            policy,
        },
        aggregation,
        driver: tokio::spawn(driver.run(shutdown)),
    })
}
