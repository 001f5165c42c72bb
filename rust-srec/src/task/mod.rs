//! Task Manager (C5): accepts task creations, dispatches to a bounded worker
//! pool, allows cancellation, exposes snapshots, and cleans up terminal tasks.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{MetaMode, ServiceConfig};
use crate::domain::{Mode, Task, TaskStatus};
use crate::download;
use crate::error::{Error, Result};

/// Request fields accepted by `POST /api/tasks` (and the stream endpoint).
#[derive(Debug, Clone)]
pub struct TaskRequest {
    pub url: String,
    pub mode: Mode,
    pub quality: String,
    pub video_format: Option<String>,
    pub audio_format: Option<String>,
    pub subtitle_langs: Vec<String>,
    pub auto_captions: bool,
    pub geo_bypass: bool,
    pub container: Option<String>,
    pub filename_template: Option<String>,
    pub meta_mode: Option<MetaMode>,
    pub skip_probe: bool,
    pub known_title: Option<String>,
}

impl Default for TaskRequest {
    fn default() -> Self {
        Self {
            url: String::new(),
            mode: Mode::Merged,
            quality: "best".to_string(),
            video_format: None,
            audio_format: None,
            subtitle_langs: vec![],
            auto_captions: false,
            geo_bypass: false,
            container: None,
            filename_template: None,
            meta_mode: None,
            skip_probe: false,
            known_title: None,
        }
    }
}

/// Cleanup request (`POST /api/tasks/cleanup`).
#[derive(Debug, Clone, Copy, Default)]
pub struct CleanupRequest {
    pub max_keep: i64,
    pub remove_active: bool,
}

pub type SharedTask = Arc<RwLock<Task>>;

/// In-memory task store plus a fixed-size worker pool draining an unbounded
/// FIFO queue of task ids (§4.5).
pub struct TaskManager {
    tasks: DashMap<String, SharedTask>,
    cancellations: DashMap<String, CancellationToken>,
    queue_tx: mpsc::UnboundedSender<String>,
    config: Arc<ServiceConfig>,
}

impl TaskManager {
    pub fn new(config: Arc<ServiceConfig>) -> Arc<Self> {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let manager = Arc::new(Self {
            tasks: DashMap::new(),
            cancellations: DashMap::new(),
            queue_tx,
            config: config.clone(),
        });

        let worker_count = config.worker_count.max(1);
        let queue_rx = Arc::new(tokio::sync::Mutex::new(queue_rx));
        for worker_id in 0..worker_count {
            let manager = manager.clone();
            let queue_rx = queue_rx.clone();
            tokio::spawn(async move {
                manager.worker_loop(worker_id, queue_rx).await;
            });
        }

        manager
    }

    async fn worker_loop(
        self: Arc<Self>,
        worker_id: usize,
        queue_rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<String>>>,
    ) {
        loop {
            let task_id = {
                let mut rx = queue_rx.lock().await;
                rx.recv().await
            };
            let Some(task_id) = task_id else {
                break;
            };
            self.run_one(worker_id, &task_id).await;
        }
    }

    async fn run_one(self: &Arc<Self>, worker_id: usize, task_id: &str) {
        let Some(entry) = self.tasks.get(task_id) else {
            return;
        };
        let shared = entry.value().clone();
        drop(entry);

        if shared.read().canceled {
            let mut task = shared.write();
            task.status = TaskStatus::Canceled;
            task.updated_at = Utc::now();
            return;
        }

        let token = self
            .cancellations
            .entry(task_id.to_string())
            .or_insert_with(CancellationToken::new)
            .clone();

        info!(worker_id, task_id, "starting task");

        // `download::execute` mutates `shared` directly, taking short write
        // locks per log/progress/stage update, so readers observe live state
        // instead of a frozen snapshot for the task's entire runtime.
        if let Err(e) = download::execute(&shared, &self.config, &token).await {
            warn!(task_id, error = %e, "supervisor returned an error outside its own handling");
        }

        if shared.read().canceled {
            let mut task = shared.write();
            if !task.status.is_terminal() {
                task.status = TaskStatus::Canceled;
                task.updated_at = Utc::now();
            }
        }
        self.cancellations.remove(task_id);
    }

    /// `addTask` (§4.5): assigns an id, stores the task, enqueues it, and
    /// returns immediately. Never rejects.
    pub fn add_task(&self, request: TaskRequest) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        let task = Task {
            id: id.clone(),
            url: request.url,
            mode: request.mode,
            quality: request.quality,
            video_format: request.video_format,
            audio_format: request.audio_format,
            subtitle_langs: request.subtitle_langs,
            auto_captions: request.auto_captions,
            geo_bypass: request.geo_bypass,
            container: request.container,
            filename_template: request.filename_template,
            meta_mode: request.meta_mode.unwrap_or(self.config.meta_mode),
            skip_probe: request.skip_probe,
            status: TaskStatus::Queued,
            stage: "queued".to_string(),
            progress: 0.0,
            attempt: 0,
            canceled: false,
            title: request.known_title,
            file_path: None,
            width: None,
            height: None,
            vcodec: None,
            acodec: None,
            file_size: None,
            error_code: None,
            error_message: None,
            warning: None,
            log: vec![],
            created_at: now,
            updated_at: now,
        };
        self.tasks.insert(id.clone(), Arc::new(RwLock::new(task)));
        let _ = self.queue_tx.send(id.clone());
        id
    }

    pub fn get_task(&self, id: &str) -> Result<Task> {
        self.tasks
            .get(id)
            .map(|t| t.read().clone())
            .ok_or_else(|| Error::not_found("task", id))
    }

    /// `listTasks` (§4.5): a defensive snapshot sorted by status bucket then
    /// creation time.
    pub fn list_tasks(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self.tasks.iter().map(|e| e.value().read().clone()).collect();
        tasks.sort_by(|a, b| {
            a.status
                .sort_bucket()
                .cmp(&b.status.sort_bucket())
                .then(a.created_at.cmp(&b.created_at))
        });
        tasks
    }

    /// Cancel a task (idempotent). Kills any bound child process.
    pub fn cancel_task(&self, id: &str) -> Result<()> {
        let Some(entry) = self.tasks.get(id) else {
            return Err(Error::not_found("task", id));
        };
        {
            let mut task = entry.write();
            if task.status.is_terminal() {
                return Ok(());
            }
            task.canceled = true;
        }
        if let Some(token) = self.cancellations.get(id) {
            token.cancel();
        }
        Ok(())
    }

    /// Incremental log slice starting at `offset`.
    pub fn log_since(&self, id: &str, offset: u64) -> Result<Vec<crate::domain::LogLine>> {
        let task = self.get_task(id)?;
        Ok(task
            .log
            .into_iter()
            .filter(|l| l.offset >= offset)
            .collect())
    }

    /// Cleanup (§4.5): removes terminal tasks beyond `max_keep` (oldest
    /// first). `max_keep <= 0` clears all terminal tasks and, per spec,
    /// also activates `remove_active`.
    pub fn cleanup(&self, request: CleanupRequest) -> usize {
        let remove_active = request.remove_active || request.max_keep <= 0;

        if remove_active {
            for entry in self.tasks.iter() {
                if !entry.value().read().status.is_terminal() {
                    let id = entry.key().clone();
                    drop(entry);
                    let _ = self.cancel_task(&id);
                }
            }
        }

        let mut terminal: Vec<(String, chrono::DateTime<Utc>)> = self
            .tasks
            .iter()
            .filter(|e| e.value().read().status.is_terminal())
            .map(|e| (e.key().clone(), e.value().read().created_at))
            .collect();
        terminal.sort_by_key(|(_, created_at)| *created_at);

        let keep = if request.max_keep <= 0 {
            0
        } else {
            request.max_keep as usize
        };
        let to_remove = terminal.len().saturating_sub(keep);
        let mut removed = 0;
        for (id, _) in terminal.into_iter().take(to_remove) {
            if self.tasks.remove(&id).is_some() {
                removed += 1;
            }
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Arc<ServiceConfig> {
        Arc::new(ServiceConfig::from_env_or_default())
    }

    #[tokio::test]
    async fn add_task_assigns_id_and_queues_it() {
        let manager = TaskManager::new(test_config());
        let id = manager.add_task(TaskRequest {
            url: "https://example.com/a".to_string(),
            ..Default::default()
        });
        assert!(!id.is_empty());
    }

    #[tokio::test]
    async fn cancel_unknown_task_returns_not_found() {
        let manager = TaskManager::new(test_config());
        let result = manager.cancel_task("missing");
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn cleanup_with_max_keep_zero_clears_all_terminal_tasks() {
        let manager = TaskManager::new(test_config());
        let id = manager.add_task(TaskRequest {
            url: "https://example.com/a".to_string(),
            ..Default::default()
        });
        if let Some(entry) = manager.tasks.get(&id) {
            entry.write().status = TaskStatus::Finished;
        }
        let removed = manager.cleanup(CleanupRequest {
            max_keep: 0,
            remove_active: false,
        });
        assert_eq!(removed, 1);
        assert!(manager.get_task(&id).is_err());
    }

    #[tokio::test]
    async fn list_tasks_sorts_by_status_bucket() {
        let manager = TaskManager::new(test_config());
        let finished_id = manager.add_task(TaskRequest::default());
        let active_id = manager.add_task(TaskRequest::default());
        if let Some(entry) = manager.tasks.get(&finished_id) {
            entry.write().status = TaskStatus::Finished;
        }
        if let Some(entry) = manager.tasks.get(&active_id) {
            entry.write().status = TaskStatus::Downloading;
        }
        let tasks = manager.list_tasks();
        assert_eq!(tasks[0].id, active_id);
    }
}
