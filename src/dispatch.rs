//! Fans one user turn out to every configured lane and folds the replies back into
//! the conversation.
//!
//! Each lane runs in its own task. A lane that fails (HTTP error, broken stream,
//! timeout, even a panic) produces a [`LaneOutcome::Failed`] for that lane only;
//! the other lanes complete and record their replies as usual.

use crate::conversation::ConversationState;
use crate::lane::{Lane, LaneId};
use crate::provider::{ChatRequest, Message, StreamEvent};
use crate::think::{self, ThinkSplit};
use anyhow::{bail, Context};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;

pub const DEFAULT_LANE_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
pub struct DispatchOptions {
    /// Upper bound for one lane's generation, from request start to terminal event.
    pub lane_timeout: Duration,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            lane_timeout: DEFAULT_LANE_TIMEOUT,
        }
    }
}

/// Progress of a running turn, for UIs that render text as it streams.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaneUpdate {
    Delta { lane: LaneId, text: String },
    Finished { lane: LaneId, elapsed: Duration },
    Failed { lane: LaneId, error: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaneOutcome {
    Completed { content: String, elapsed: Duration },
    Failed { error: String, elapsed: Duration },
}

impl LaneOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, LaneOutcome::Completed { .. })
    }

    /// Reasoning/answer split of the reply. `None` for a failed lane.
    pub fn display(&self) -> Option<ThinkSplit<'_>> {
        match self {
            LaneOutcome::Completed { content, .. } => Some(think::split(content)),
            LaneOutcome::Failed { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            LaneOutcome::Failed { error, .. } => Some(error),
            LaneOutcome::Completed { .. } => None,
        }
    }

    pub fn elapsed(&self) -> Duration {
        match self {
            LaneOutcome::Completed { elapsed, .. } | LaneOutcome::Failed { elapsed, .. } => *elapsed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaneResult {
    pub lane: LaneId,
    pub outcome: LaneOutcome,
}

#[derive(Debug, Clone)]
pub struct TurnReport {
    /// Conversation after the turn: the user message on every lane, plus the reply on each completed lane.
    pub state: ConversationState,
    /// One entry per lane, in lane order.
    pub results: Vec<LaneResult>,
}

/// Run one turn against `lanes`, starting from `state`.
///
/// `state` itself is not modified; the updated conversation is returned in the report.
pub async fn dispatch_turn(
    input: &str,
    state: &ConversationState,
    lanes: &[Lane],
    opts: &DispatchOptions,
    updates: Option<mpsc::UnboundedSender<LaneUpdate>>,
) -> anyhow::Result<TurnReport> {
    if input.trim().is_empty() {
        bail!("cannot dispatch an empty message");
    }

    let mut next = state.clone();
    for lane in lanes {
        next = next.with_message(lane.id, Message::user(input));
    }

    let handles: Vec<_> = lanes
        .iter()
        .map(|lane| {
            let req = ChatRequest {
                model: lane.model.clone(),
                messages: next.history(lane.id).to_vec(),
                reasoning_effort: lane.reasoning_effort.clone(),
            };
            let started = Instant::now();
            let handle = tokio::spawn(run_lane(lane.clone(), req, opts.lane_timeout, updates.clone()));
            (lane.id, started, handle)
        })
        .collect();

    let mut tasks = LaneTasks(handles);

    // Tasks already run concurrently; awaiting in order only fixes the report order.
    let mut results = Vec::with_capacity(tasks.0.len());
    for (lane, started, handle) in tasks.0.iter_mut() {
        let (lane, started) = (*lane, *started);
        let outcome = match handle.await {
            Ok(outcome) => outcome,
            Err(e) => {
                let error = format!("lane task failed: {e}");
                tracing::error!(%lane, %error, "lane task did not complete");
                send(&updates, LaneUpdate::Failed { lane, error: error.clone() });
                LaneOutcome::Failed {
                    error,
                    elapsed: started.elapsed(),
                }
            }
        };

        if let LaneOutcome::Completed { content, .. } = &outcome {
            next = next.with_message(lane, Message::assistant(content.clone()));
        }
        results.push(LaneResult { lane, outcome });
    }

    Ok(TurnReport { state: next, results })
}

/// Spawned lane tasks. Dropping the turn before it settles aborts whatever is still running.
struct LaneTasks(Vec<(LaneId, Instant, JoinHandle<LaneOutcome>)>);

impl Drop for LaneTasks {
    fn drop(&mut self) {
        for (_, _, handle) in &self.0 {
            handle.abort();
        }
    }
}

async fn run_lane(
    lane: Lane,
    req: ChatRequest,
    timeout: Duration,
    updates: Option<mpsc::UnboundedSender<LaneUpdate>>,
) -> LaneOutcome {
    let started = Instant::now();
    tracing::debug!(lane = %lane.id, model = %lane.model, history = req.messages.len(), "starting generation");

    let res = tokio::time::timeout(timeout, stream_lane(&lane, req, &updates)).await;
    let elapsed = started.elapsed();

    let res = match res {
        Ok(res) => res,
        Err(_) => Err(anyhow::anyhow!("no response within {}s", timeout.as_secs_f32())),
    };

    match res {
        Ok(content) => {
            tracing::info!(lane = %lane.id, elapsed_ms = elapsed.as_millis() as u64, chars = content.len(), "lane completed");
            send(&updates, LaneUpdate::Finished { lane: lane.id, elapsed });
            LaneOutcome::Completed { content, elapsed }
        }
        Err(e) => {
            let error = format!("{e:#}");
            tracing::warn!(lane = %lane.id, elapsed_ms = elapsed.as_millis() as u64, %error, "lane failed");
            send(&updates, LaneUpdate::Failed { lane: lane.id, error: error.clone() });
            LaneOutcome::Failed { error, elapsed }
        }
    }
}

/// Consume one generation stream. Returns the full text once the terminal event arrives.
async fn stream_lane(
    lane: &Lane,
    req: ChatRequest,
    updates: &Option<mpsc::UnboundedSender<LaneUpdate>>,
) -> anyhow::Result<String> {
    let mut stream = lane
        .provider
        .stream_chat(req)
        .await
        .with_context(|| format!("{} failed to start streaming", lane.provider.name()))?;

    let mut content = String::new();
    while let Some(item) = stream.next().await {
        match item.context("stream chunk error")? {
            StreamEvent::Delta(text) => {
                content.push_str(&text);
                send(updates, LaneUpdate::Delta { lane: lane.id, text });
            }
            StreamEvent::Done => return Ok(content),
        }
    }

    bail!("stream ended before the response was complete")
}

fn send(updates: &Option<mpsc::UnboundedSender<LaneUpdate>>, update: LaneUpdate) {
    if let Some(tx) = updates {
        // A UI that stopped listening doesn't stop the turn.
        let _ = tx.send(update);
    }
}

/// Conversation plus lanes for one interactive session.
///
/// Only one turn may be in flight at a time; `begin_turn` refuses new input until the
/// previous turn has been handed back through `finish_turn`.
#[derive(Debug)]
pub struct Session {
    lanes: Vec<Lane>,
    state: ConversationState,
    options: DispatchOptions,
    in_flight: bool,
}

/// A turn that has been accepted but not run yet. Owns everything it needs, so it can be moved into a task.
#[derive(Debug)]
pub struct PendingTurn {
    input: String,
    state: ConversationState,
    lanes: Vec<Lane>,
    options: DispatchOptions,
}

impl PendingTurn {
    pub async fn run(self, updates: Option<mpsc::UnboundedSender<LaneUpdate>>) -> anyhow::Result<TurnReport> {
        dispatch_turn(&self.input, &self.state, &self.lanes, &self.options, updates).await
    }
}

impl Session {
    pub fn new(lanes: Vec<Lane>, options: DispatchOptions) -> Self {
        Self {
            lanes,
            state: ConversationState::new(),
            options,
            in_flight: false,
        }
    }

    pub fn lanes(&self) -> &[Lane] {
        &self.lanes
    }

    pub fn state(&self) -> &ConversationState {
        &self.state
    }

    pub fn is_running(&self) -> bool {
        self.in_flight
    }

    /// Forget all histories. Not allowed while a turn is running.
    pub fn clear(&mut self) -> anyhow::Result<()> {
        if self.in_flight {
            bail!("a turn is still running");
        }
        self.state = ConversationState::new();
        Ok(())
    }

    pub fn begin_turn(&mut self, input: &str) -> anyhow::Result<PendingTurn> {
        if self.in_flight {
            bail!("a turn is still running; wait for every lane to finish");
        }
        if input.trim().is_empty() {
            bail!("cannot dispatch an empty message");
        }
        if self.lanes.is_empty() {
            bail!("no lanes are configured");
        }

        self.in_flight = true;
        Ok(PendingTurn {
            input: input.to_string(),
            state: self.state.clone(),
            lanes: self.lanes.clone(),
            options: self.options.clone(),
        })
    }

    /// Settle the running turn. On error the conversation is left as it was.
    pub fn finish_turn(&mut self, report: anyhow::Result<TurnReport>) -> anyhow::Result<Vec<LaneResult>> {
        self.in_flight = false;
        let report = report?;
        self.state = report.state;
        Ok(report.results)
    }

    /// Run one turn to completion.
    pub async fn submit(
        &mut self,
        input: &str,
        updates: Option<mpsc::UnboundedSender<LaneUpdate>>,
    ) -> anyhow::Result<Vec<LaneResult>> {
        let pending = self.begin_turn(input)?;
        let report = {
            let _reset = TurnGuard(&mut self.in_flight);
            pending.run(updates).await
        };
        self.finish_turn(report)
    }
}

/// Clears the in-flight flag when `submit` is dropped mid-turn.
struct TurnGuard<'a>(&'a mut bool);

impl Drop for TurnGuard<'_> {
    fn drop(&mut self) {
        *self.0 = false;
    }
}
