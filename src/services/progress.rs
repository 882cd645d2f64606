// Per-task progress registry with push subscriptions
//
// One task per in-flight menu. Every pipeline stage reports through this
// tracker; live status connections subscribe to a bounded channel per
// consumer so a slow or disconnected consumer never blocks an update.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::core::errors::ProgressError;

/// How long finished task state stays queryable before eviction.
const RETENTION: Duration = Duration::from_secs(300);

/// Per-subscriber channel capacity; sends beyond this drop the update.
const SUBSCRIBER_QUEUE: usize = 32;

/// Historical per-stage time estimates, in seconds.
const ESTIMATE_IMAGE_PROCESSING: f64 = 2.0;
const ESTIMATE_MENU_EXTRACTION: f64 = 3.5;
const ESTIMATE_LANGUAGE_DETECTION: f64 = 0.5;
const ESTIMATE_TRANSLATION: f64 = 1.5;
const ESTIMATE_DATABASE_OPERATIONS: f64 = 1.0;
const ESTIMATE_IMAGE_SEARCH_PER_ITEM: f64 = 0.3;

const LOADING_MESSAGES: &[(&str, &str)] = &[
    ("Teaching AI to read chef's handwriting...", "🤖✍️"),
    ("Negotiating with the menu for better prices...", "💰"),
    ("Asking the model what 'deconstructed' actually means...", "🤔"),
    ("Converting calories to happiness units...", "📊"),
    ("Translating 'artisanal' to 'expensive'...", "💸"),
    ("Finding images prettier than the actual food...", "📸"),
    ("Convincing vegetables they're delicious...", "🥗"),
    ("Teaching our AI the difference between 'crispy' and 'burnt'...", "🔥"),
    ("Googling what a 'gastropub' is... again...", "🍺"),
    ("Making your menu 73% more appetizing...", "✨"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadingMessage {
    pub text: String,
    pub emoji: String,
}

/// Immutable progress snapshot handed to pollers and subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub task_id: String,
    pub status: ProgressStatus,
    pub stage: String,
    pub progress: f32,
    pub message: LoadingMessage,
    pub started_at: DateTime<Utc>,
    pub estimated_time_remaining: f64,
    pub item_count: usize,
    pub elapsed_seconds: f64,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub stage_metadata: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize)]
struct StageTiming {
    stage: String,
    duration_seconds: f64,
}

struct TaskState {
    status: ProgressStatus,
    stage: String,
    progress: f32,
    started_at: Instant,
    started_at_utc: DateTime<Utc>,
    estimated_total_time: f64,
    estimated_time_remaining: f64,
    item_count: usize,
    stage_metadata: serde_json::Map<String, serde_json::Value>,
    stages_completed: Vec<StageTiming>,
    current_stage_start: Instant,
}

impl TaskState {
    fn snapshot(&self, task_id: &str) -> ProgressSnapshot {
        let message_index = std::cmp::min(
            (self.progress / 10.0) as usize,
            LOADING_MESSAGES.len() - 1,
        );
        let (text, emoji) = LOADING_MESSAGES[message_index];
        ProgressSnapshot {
            task_id: task_id.to_string(),
            status: self.status,
            stage: self.stage.clone(),
            progress: self.progress,
            message: LoadingMessage {
                text: text.to_string(),
                emoji: emoji.to_string(),
            },
            started_at: self.started_at_utc,
            estimated_time_remaining: self.estimated_time_remaining,
            item_count: self.item_count,
            elapsed_seconds: self.started_at.elapsed().as_secs_f64(),
            stage_metadata: self.stage_metadata.clone(),
        }
    }
}

pub type SubscriptionId = u64;

struct TrackerInner {
    tasks: Mutex<HashMap<String, TaskState>>,
    // Subscribers live outside the task map so a consumer can attach before
    // the task record exists
    subscribers: Mutex<HashMap<String, HashMap<SubscriptionId, mpsc::Sender<ProgressSnapshot>>>>,
    next_subscription: Mutex<SubscriptionId>,
    retention: Duration,
}

/// Process-wide progress tracker.
///
/// State is exclusively owned here; stages submit transitions, they never
/// mutate task state directly. Updates to one task are serialized by the
/// registry lock while independent tasks proceed concurrently.
#[derive(Clone)]
pub struct ProgressTracker {
    inner: Arc<TrackerInner>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::with_retention(RETENTION)
    }

    pub fn with_retention(retention: Duration) -> Self {
        Self {
            inner: Arc::new(TrackerInner {
                tasks: Mutex::new(HashMap::new()),
                subscribers: Mutex::new(HashMap::new()),
                next_subscription: Mutex::new(0),
                retention,
            }),
        }
    }

    /// Create the progress record for a task.
    ///
    /// The total-time estimate combines the fixed per-stage table with a
    /// per-item increment for image search.
    pub fn start_tracking(
        &self,
        task_id: &str,
        estimated_items: usize,
    ) -> Result<(), ProgressError> {
        let mut tasks = self.inner.tasks.lock();
        if tasks.contains_key(task_id) {
            return Err(ProgressError::AlreadyTracking(task_id.to_string()));
        }

        let total_time = estimate_total_time(estimated_items);
        let now = Instant::now();
        tasks.insert(
            task_id.to_string(),
            TaskState {
                status: ProgressStatus::Processing,
                stage: "starting".to_string(),
                progress: 0.0,
                started_at: now,
                started_at_utc: Utc::now(),
                estimated_total_time: total_time,
                estimated_time_remaining: total_time,
                item_count: estimated_items,
                stage_metadata: serde_json::Map::new(),
                stages_completed: Vec::new(),
                current_stage_start: now,
            },
        );
        info!(
            "Started tracking task {} with estimated time: {:.1}s",
            task_id, total_time
        );
        Ok(())
    }

    /// Record a stage transition and notify subscribers.
    ///
    /// Percent is clamped so it never moves backwards while the task is
    /// processing. Unknown task ids are a logged no-op; tasks may be
    /// updated after natural eviction.
    pub fn update_progress(
        &self,
        task_id: &str,
        stage: &str,
        percent: f32,
        extra: Option<serde_json::Value>,
    ) {
        let snapshot = {
            let mut tasks = self.inner.tasks.lock();
            let state = match tasks.get_mut(task_id) {
                Some(state) => state,
                None => {
                    warn!("Task {} not found in progress tracker", task_id);
                    return;
                }
            };

            let percent = percent.clamp(0.0, 100.0);
            if state.status == ProgressStatus::Processing {
                state.progress = state.progress.max(percent);
            }
            state.stage = stage.to_string();

            // Extrapolate time remaining from elapsed/percent
            let elapsed = state.started_at.elapsed().as_secs_f64();
            if state.progress > 0.0 {
                let estimated_total = elapsed / (state.progress as f64 / 100.0);
                state.estimated_time_remaining = (estimated_total - elapsed).max(0.0);
            } else {
                state.estimated_time_remaining = state.estimated_total_time;
            }

            state.stages_completed.push(StageTiming {
                stage: stage.to_string(),
                duration_seconds: state.current_stage_start.elapsed().as_secs_f64(),
            });
            state.current_stage_start = Instant::now();

            if let Some(serde_json::Value::Object(map)) = extra {
                for (k, v) in map {
                    state.stage_metadata.insert(k, v);
                }
            }

            state.snapshot(task_id)
        };

        self.notify(task_id, snapshot);
    }

    /// Finalize a task and schedule its eviction.
    pub fn complete_task(&self, task_id: &str, success: bool) {
        let snapshot = {
            let mut tasks = self.inner.tasks.lock();
            let state = match tasks.get_mut(task_id) {
                Some(state) => state,
                None => {
                    warn!("Task {} not found in progress tracker", task_id);
                    return;
                }
            };

            state.status = if success {
                ProgressStatus::Completed
            } else {
                ProgressStatus::Failed
            };
            if success {
                state.progress = 100.0;
            }
            state.estimated_time_remaining = 0.0;
            state.snapshot(task_id)
        };

        self.notify(task_id, snapshot);

        // Evict the record after the retention window
        let inner = Arc::clone(&self.inner);
        let task_id = task_id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(inner.retention).await;
            inner.tasks.lock().remove(&task_id);
            inner.subscribers.lock().remove(&task_id);
            debug!("Evicted progress state for task {}", task_id);
        });
    }

    /// Immutable snapshot, or None when the task is unknown or evicted.
    pub fn get_progress(&self, task_id: &str) -> Option<ProgressSnapshot> {
        let tasks = self.inner.tasks.lock();
        tasks.get(task_id).map(|state| state.snapshot(task_id))
    }

    /// Register a push subscriber for a task.
    ///
    /// Returns the subscription id (for `unsubscribe`) and the receiving
    /// end of a bounded channel. Updates that arrive while the channel is
    /// full are dropped for that subscriber only.
    pub fn subscribe(&self, task_id: &str) -> (SubscriptionId, mpsc::Receiver<ProgressSnapshot>) {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE);
        let id = {
            let mut next = self.inner.next_subscription.lock();
            *next += 1;
            *next
        };
        self.inner
            .subscribers
            .lock()
            .entry(task_id.to_string())
            .or_default()
            .insert(id, tx);
        (id, rx)
    }

    pub fn unsubscribe(&self, task_id: &str, subscription: SubscriptionId) {
        let mut subscribers = self.inner.subscribers.lock();
        if let Some(subs) = subscribers.get_mut(task_id) {
            subs.remove(&subscription);
            if subs.is_empty() {
                subscribers.remove(task_id);
            }
        }
    }

    /// Number of live tasks (diagnostics).
    pub fn active_tasks(&self) -> usize {
        self.inner.tasks.lock().len()
    }

    fn notify(&self, task_id: &str, snapshot: ProgressSnapshot) {
        let mut subscribers = self.inner.subscribers.lock();
        let Some(subs) = subscribers.get_mut(task_id) else {
            return;
        };
        // Non-blocking send; a full or closed consumer never stalls the
        // tracker or the other subscribers
        subs.retain(|id, tx| match tx.try_send(snapshot.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!("Subscriber {} for task {} is lagging, dropping update", id, task_id);
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

fn estimate_total_time(item_count: usize) -> f64 {
    let base = ESTIMATE_IMAGE_PROCESSING
        + ESTIMATE_MENU_EXTRACTION
        + ESTIMATE_LANGUAGE_DETECTION
        + ESTIMATE_TRANSLATION
        + ESTIMATE_DATABASE_OPERATIONS;
    base + ESTIMATE_IMAGE_SEARCH_PER_ITEM * item_count as f64
}
