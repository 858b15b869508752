//! Health engine
//!
//! Wires the recorder, aggregator, monitor, dispatcher, supervisor, and
//! experience library into one event-driven loop, sharded by task id. Each
//! task gets its own worker (a spawned tokio task fed by an mpsc channel),
//! so all of a task's state mutations are serialized on its shard while
//! different tasks proceed fully in parallel. Producer calls are spawned off
//! the shard and return as events, so ingestion for the task continues while
//! a proposal is being generated.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{mpsc, oneshot};

use crate::aggregator::MetricsAggregator;
use crate::config::Config;
use crate::dispatcher::{ImprovementDispatcher, ProducerBackoff};
use crate::domain::{
    ContinualMetrics, EvaluationRecord, EvaluationWindow, ExperienceEntry, Outcome, QueueEntry,
    TaskId, Version,
};
use crate::error::{Result, VigilError};
use crate::experience::ExperienceLibrary;
use crate::id::now_ms;
use crate::monitor::{ImprovementTrigger, StabilityMonitor, TaskHealth};
use crate::producer::ImprovementProducer;
use crate::recorder::ExecutionRecorder;
use crate::store::{ExecutionLog, StateStore};
use crate::supervisor::EvaluationSupervisor;
use crate::ticket::TicketSink;

const SHARD_QUEUE_DEPTH: usize = 64;
const NOTE_CAP: usize = 64;

/// Events delivered to a task's shard worker
enum ShardEvent {
    Execution {
        outcome: Outcome,
        accuracy: f64,
        duration_ms: u64,
        description: Option<String>,
        reply: oneshot::Sender<Result<String>>,
    },
    Tick {
        cycle: u64,
        done: oneshot::Sender<()>,
    },
    ProposalReady {
        trigger: Box<ImprovementTrigger>,
        proposal: crate::producer::ProposedChange,
    },
    ProposalFailed {
        error: String,
    },
    CancelWindow {
        reply: oneshot::Sender<Result<bool>>,
    },
}

/// State shared by all shards
struct EngineShared {
    config: Config,
    store: Mutex<StateStore>,
    producer: Arc<dyn ImprovementProducer>,
    tickets: Arc<dyn TicketSink>,
}

impl EngineShared {
    fn store(&self) -> MutexGuard<'_, StateStore> {
        self.store.lock().expect("state store lock poisoned")
    }
}

/// Top-level handle: routes executions to shards and drives monitoring cycles
pub struct HealthEngine {
    shared: Arc<EngineShared>,
    shards: tokio::sync::Mutex<HashMap<TaskId, mpsc::Sender<ShardEvent>>>,
    supervisor: EvaluationSupervisor,
    library: ExperienceLibrary,
    cycle: AtomicU64,
}

impl HealthEngine {
    pub fn new(
        config: Config,
        producer: Arc<dyn ImprovementProducer>,
        tickets: Arc<dyn TicketSink>,
    ) -> Result<Self> {
        let store = StateStore::open(&config.storage.data_dir)?;
        let supervisor =
            EvaluationSupervisor::new(MetricsAggregator::new(config.thresholds.window_size));
        let library = ExperienceLibrary::new(&config.experience);
        Ok(Self {
            shared: Arc::new(EngineShared {
                config,
                store: Mutex::new(store),
                producer,
                tickets,
            }),
            shards: tokio::sync::Mutex::new(HashMap::new()),
            supervisor,
            library,
            cycle: AtomicU64::new(0),
        })
    }

    /// Record one completed task invocation, returning its memory id
    pub async fn record_execution(
        &self,
        task_id: TaskId,
        outcome: Outcome,
        accuracy: f64,
        duration_ms: u64,
    ) -> Result<String> {
        self.record_described(task_id, outcome, accuracy, duration_ms, None)
            .await
    }

    /// Record an invocation with a free-text description; the description
    /// feeds experience harvesting if the execution is later admitted
    pub async fn record_described(
        &self,
        task_id: TaskId,
        outcome: Outcome,
        accuracy: f64,
        duration_ms: u64,
        description: Option<String>,
    ) -> Result<String> {
        let (reply, rx) = oneshot::channel();
        self.send(
            &task_id,
            ShardEvent::Execution {
                outcome,
                accuracy,
                duration_ms,
                description,
                reply,
            },
        )
        .await?;
        rx.await
            .map_err(|_| VigilError::InvalidState(format!("shard for {} dropped reply", task_id)))?
    }

    /// Run one monitoring cycle: mark stalled windows, then let every shard
    /// observe its task. Returns the cycle number.
    pub async fn tick(&self) -> Result<u64> {
        let cycle = self.cycle.fetch_add(1, Ordering::SeqCst) + 1;

        {
            let store = self.shared.store();
            self.supervisor
                .mark_stalled(&store, self.shared.config.evaluation.stall_age_ms, now_ms())?;
        }

        let senders: Vec<(TaskId, mpsc::Sender<ShardEvent>)> = {
            let shards = self.shards.lock().await;
            shards.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
        };

        let mut acks = Vec::with_capacity(senders.len());
        for (task_id, sender) in senders {
            let (done, rx) = oneshot::channel();
            if sender.send(ShardEvent::Tick { cycle, done }).await.is_err() {
                tracing::error!(task_id = %task_id, "Shard unavailable for tick");
                continue;
            }
            acks.push(rx);
        }
        for ack in acks {
            let _ = ack.await;
        }

        Ok(cycle)
    }

    /// Run monitoring cycles forever at the configured interval
    pub async fn run(&self) -> Result<()> {
        let interval = std::time::Duration::from_millis(self.shared.config.daemon.tick_interval_ms);
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            if let Err(e) = self.tick().await {
                tracing::error!(error = %e, "Monitoring cycle failed");
            }
        }
    }

    /// Cancel a task's open evaluation window; the version record is untouched
    pub async fn cancel_window(&self, task_id: &TaskId) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.send(task_id, ShardEvent::CancelWindow { reply }).await?;
        rx.await
            .map_err(|_| VigilError::InvalidState(format!("shard for {} dropped reply", task_id)))?
    }

    //=== Read-only projections ===

    pub fn metrics(&self, task_id: &TaskId) -> Result<Option<ContinualMetrics>> {
        self.shared.store().get_metrics(task_id)
    }

    pub fn queue_entries(&self) -> Result<Vec<QueueEntry>> {
        self.shared.store().list_queue()
    }

    pub fn open_windows(&self) -> Result<Vec<EvaluationWindow>> {
        self.shared.store().list_open_windows()
    }

    pub fn versions(&self, task_id: &TaskId) -> Result<Vec<Version>> {
        self.shared.store().list_versions(task_id)
    }

    pub fn learning_history(&self, task_id: &TaskId) -> Result<Vec<EvaluationRecord>> {
        self.shared.store().list_learning(task_id)
    }

    pub fn search_experience(&self, task_id: &TaskId, query: &str) -> Result<Vec<ExperienceEntry>> {
        self.library.retrieve(task_id, query, &self.shared.store())
    }

    /// Send an event to a task's shard, spawning the worker on first use or
    /// after a shard failure
    async fn send(&self, task_id: &TaskId, event: ShardEvent) -> Result<()> {
        let mut shards = self.shards.lock().await;
        let needs_spawn = match shards.get(task_id) {
            Some(sender) => sender.is_closed(),
            None => true,
        };
        if needs_spawn {
            let sender = ShardWorker::spawn(task_id.clone(), self.shared.clone())?;
            shards.insert(task_id.clone(), sender);
        }
        let sender = shards
            .get(task_id)
            .cloned()
            .ok_or_else(|| VigilError::InvalidState(format!("no shard for {}", task_id)))?;
        drop(shards);

        sender
            .send(event)
            .await
            .map_err(|_| VigilError::InvalidState(format!("shard for {} is down", task_id)))
    }
}

/// Per-task worker owning everything that mutates the task's state
struct ShardWorker {
    task_id: TaskId,
    shared: Arc<EngineShared>,
    recorder: ExecutionRecorder,
    aggregator: MetricsAggregator,
    monitor: StabilityMonitor,
    dispatcher: ImprovementDispatcher,
    supervisor: EvaluationSupervisor,
    library: ExperienceLibrary,
    backoff: ProducerBackoff,
    health: TaskHealth,
    /// Trigger awaiting a producer proposal; survives producer outages
    pending_trigger: Option<ImprovementTrigger>,
    inflight: bool,
    /// Recent caller-supplied descriptions, by memory id
    notes: VecDeque<(String, String)>,
    self_tx: mpsc::Sender<ShardEvent>,
}

impl ShardWorker {
    fn spawn(task_id: TaskId, shared: Arc<EngineShared>) -> Result<mpsc::Sender<ShardEvent>> {
        let (tx, rx) = mpsc::channel(SHARD_QUEUE_DEPTH);
        let config = &shared.config;

        let log = ExecutionLog::new(&config.storage.data_dir)?;
        let recorder = ExecutionRecorder::new(
            log,
            config.storage.write_retries,
            config.storage.write_backoff_ms,
        );
        let aggregator = MetricsAggregator::new(config.thresholds.window_size);
        let monitor = StabilityMonitor::new(config.thresholds.clone());
        let dispatcher = ImprovementDispatcher::new(
            config.evaluation.target_count,
            config.evaluation.producer_backoff_ms,
            config.evaluation.producer_backoff_max_ms,
        );
        let supervisor =
            EvaluationSupervisor::new(MetricsAggregator::new(config.thresholds.window_size));
        let library = ExperienceLibrary::new(&config.experience);
        let backoff = ProducerBackoff::new(
            config.evaluation.producer_backoff_ms,
            config.evaluation.producer_backoff_max_ms,
        );

        // Recover the health state from durable records
        let health = {
            let store = shared.store();
            if store.open_window(&task_id)?.is_some() {
                TaskHealth::Evaluating
            } else if store.get_queue_entry(&task_id)?.is_some() {
                TaskHealth::Queued
            } else {
                TaskHealth::Idle
            }
        };

        let worker = Self {
            task_id,
            shared,
            recorder,
            aggregator,
            monitor,
            dispatcher,
            supervisor,
            library,
            backoff,
            health,
            pending_trigger: None,
            inflight: false,
            notes: VecDeque::new(),
            self_tx: tx.clone(),
        };
        tokio::spawn(worker.run(rx));
        Ok(tx)
    }

    async fn run(mut self, mut rx: mpsc::Receiver<ShardEvent>) {
        while let Some(event) = rx.recv().await {
            self.handle(event).await;
        }
        tracing::debug!(task_id = %self.task_id, "Shard worker shutting down");
    }

    /// Handle one event; failures are logged and isolated to this shard
    async fn handle(&mut self, event: ShardEvent) {
        match event {
            ShardEvent::Execution {
                outcome,
                accuracy,
                duration_ms,
                description,
                reply,
            } => {
                let result = self.on_execution(outcome, accuracy, duration_ms, description);
                if let Err(e) = &result {
                    tracing::error!(task_id = %self.task_id, error = %e, "Execution handling failed");
                }
                let _ = reply.send(result);
            }
            ShardEvent::Tick { cycle, done } => {
                if let Err(e) = self.on_tick(cycle) {
                    tracing::error!(task_id = %self.task_id, cycle, error = %e, "Tick handling failed");
                }
                self.maybe_dispatch().await;
                let _ = done.send(());
            }
            ShardEvent::ProposalReady { trigger, proposal } => {
                self.inflight = false;
                self.backoff.reset();
                if let Err(e) = self.on_proposal(&trigger, &proposal) {
                    tracing::error!(task_id = %self.task_id, error = %e, "Deploy failed");
                }
            }
            ShardEvent::ProposalFailed { error } => {
                self.inflight = false;
                self.backoff.record_failure(now_ms());
                tracing::warn!(
                    task_id = %self.task_id,
                    error = %error,
                    "Producer unavailable, trigger stays queued"
                );
            }
            ShardEvent::CancelWindow { reply } => {
                let result = self.on_cancel();
                let _ = reply.send(result);
            }
        }
    }

    fn on_execution(
        &mut self,
        outcome: Outcome,
        accuracy: f64,
        duration_ms: u64,
        description: Option<String>,
    ) -> Result<String> {
        let memory = self
            .recorder
            .record(self.task_id.clone(), outcome, accuracy, duration_ms)?;

        if let Some(desc) = description {
            if self.notes.len() == NOTE_CAP {
                self.notes.pop_front();
            }
            self.notes.push_back((memory.id.clone(), desc));
        }

        let store = self.shared.store();
        self.aggregator
            .on_execution(&self.task_id, self.recorder.log(), &store)?;

        let closed = self.supervisor.observe_execution(
            &memory,
            self.recorder.log(),
            &store,
            self.shared.tickets.as_ref(),
        )?;
        if let Some(outcome) = closed {
            self.health = TaskHealth::Idle;
            if outcome.decision == crate::domain::EvaluationDecision::Promoted {
                self.harvest_experience(&store)?;
            }
        }

        Ok(memory.id)
    }

    fn on_tick(&mut self, cycle: u64) -> Result<()> {
        let store = self.shared.store();

        // Reconcile with window state changed outside this shard (stall
        // marking, external cancellation)
        let window = store.open_window(&self.task_id)?;
        if window.is_some() {
            self.health = TaskHealth::Evaluating;
        } else if self.health == TaskHealth::Evaluating {
            self.health = TaskHealth::Idle;
        }

        let Some(metrics) = store.get_metrics(&self.task_id)? else {
            return Ok(());
        };

        let mut queue = store.get_queue_entry(&self.task_id)?;
        let execution_ids: Vec<String> = self
            .recorder
            .log()
            .read_recent(&self.task_id, self.aggregator.window_size())?
            .into_iter()
            .map(|m| m.id)
            .collect();

        let mut health = self.health;
        let trigger = self.monitor.observe(
            cycle,
            &self.task_id,
            &metrics,
            &mut health,
            &mut queue,
            execution_ids,
        );
        self.health = health;

        match &queue {
            Some(entry) => store.put_queue_entry(entry)?,
            None => store.delete_queue_entry(&self.task_id)?,
        }

        if let Some(t) = trigger {
            self.pending_trigger = Some(t);
        }
        Ok(())
    }

    /// Kick off a producer call for the pending trigger if the backoff allows
    /// and no call is in flight
    async fn maybe_dispatch(&mut self) {
        if self.inflight || !self.backoff.ready(now_ms()) {
            return;
        }
        let Some(trigger) = self.pending_trigger.clone() else {
            return;
        };

        let request = {
            let store = self.shared.store();
            match self.dispatcher.build_request(&trigger, &store) {
                Ok(request) => request,
                Err(VigilError::DuplicateWindow(_)) => {
                    self.pending_trigger = None;
                    return;
                }
                Err(e) => {
                    tracing::error!(task_id = %self.task_id, error = %e, "Request assembly failed");
                    return;
                }
            }
        };

        self.inflight = true;
        let producer = self.shared.producer.clone();
        let tx = self.self_tx.clone();
        tokio::spawn(async move {
            let event = match producer.propose(request).await {
                Ok(proposal) => ShardEvent::ProposalReady {
                    trigger: Box::new(trigger),
                    proposal,
                },
                Err(e) => ShardEvent::ProposalFailed {
                    error: e.to_string(),
                },
            };
            let _ = tx.send(event).await;
        });
    }

    fn on_proposal(
        &mut self,
        trigger: &ImprovementTrigger,
        proposal: &crate::producer::ProposedChange,
    ) -> Result<()> {
        let store = self.shared.store();
        match self.dispatcher.deploy(trigger, proposal, &store) {
            Ok(_) => {
                self.pending_trigger = None;
                self.health = TaskHealth::Evaluating;
                Ok(())
            }
            Err(VigilError::DuplicateWindow(_)) => {
                // Raced with another deploy for this task; the open window wins
                self.pending_trigger = None;
                self.health = TaskHealth::Evaluating;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn on_cancel(&mut self) -> Result<bool> {
        let store = self.shared.store();
        let cancelled = self.supervisor.cancel_window(&self.task_id, &store)?;
        if cancelled {
            self.health = if store.get_queue_entry(&self.task_id)?.is_some() {
                TaskHealth::Queued
            } else {
                TaskHealth::Idle
            };
        }
        Ok(cancelled)
    }

    /// Copy recent successful executions into the experience library after a
    /// promotion
    fn harvest_experience(&self, store: &StateStore) -> Result<()> {
        let recent = self
            .recorder
            .log()
            .read_recent(&self.task_id, self.aggregator.window_size())?;
        if recent.is_empty() {
            return Ok(());
        }
        let avg_duration =
            recent.iter().map(|m| m.duration_ms as f64).sum::<f64>() / recent.len() as f64;

        let target = self.shared.config.evaluation.target_count;
        for memory in recent.iter().rev().take(target) {
            if memory.outcome != Outcome::Success {
                continue;
            }
            let description = self
                .notes
                .iter()
                .find(|(id, _)| *id == memory.id)
                .map(|(_, desc)| desc.clone())
                .unwrap_or_else(|| {
                    format!(
                        "{} run completed in {}ms with accuracy {:.2}",
                        self.task_id.name(),
                        memory.duration_ms,
                        memory.accuracy
                    )
                });
            self.library
                .admit(memory, &description, Vec::new(), Some(avg_duration), store)?;
        }
        Ok(())
    }
}
