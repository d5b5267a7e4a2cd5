use std::{
    path::{Path, PathBuf},
    sync::{mpsc, Arc, Mutex},
    thread::{self, JoinHandle},
};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use log::{error, info};
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::oneshot;

mod migrations;

use crate::models::PersistedSession;
use migrations::run_migrations;

// Storage keys carried over from the extension's key-value store.
const SESSION_FOCUS_KEY: &str = "sessionFocus";
const SESSION_STARTED_AT_KEY: &str = "sessionStartedAt";
const SESSION_SEGMENT_START_KEY: &str = "sessionStartTime";
const IS_SESSION_PAUSED_KEY: &str = "isSessionPaused";
const PAUSED_ELAPSED_TIME_KEY: &str = "pausedElapsedTime";
const LAST_ASSESSMENT_KEY: &str = "lastAssessmentText";
const LAST_RELEVANT_URL_KEY: &str = "lastRelevantUrlForFocus";
const FOCUS_WHITELIST_KEY: &str = "focusWhitelist";

type StoreTask = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

enum StoreCommand {
    Execute(StoreTask),
    Shutdown,
}

struct StoreInner {
    sender: mpsc::Sender<StoreCommand>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for StoreInner {
    fn drop(&mut self) {
        let mut guard = match self.worker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(handle) = guard.take() {
            if let Err(err) = self.sender.send(StoreCommand::Shutdown) {
                error!("Failed to send shutdown to store thread: {err}");
            }
            if let Err(join_err) = handle.join() {
                error!("Failed to join store thread: {join_err:?}");
            }
        }
    }
}

fn parse_datetime(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| anyhow!("invalid datetime '{value}': {err}"))
}

fn kv_get(conn: &Connection, key: &str) -> rusqlite::Result<Option<String>> {
    conn.query_row(
        "SELECT value FROM app_state WHERE key = ?1",
        params![key],
        |row| row.get(0),
    )
    .optional()
}

fn kv_set(conn: &Connection, key: &str, value: &str, now: DateTime<Utc>) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO app_state (key, value, updated_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        params![key, value, now.to_rfc3339()],
    )?;
    Ok(())
}

fn kv_delete(conn: &Connection, key: &str) -> rusqlite::Result<()> {
    conn.execute("DELETE FROM app_state WHERE key = ?1", params![key])?;
    Ok(())
}

/// Process-wide persisted state: the session's key-value fields, the URL
/// whitelist, and the per-day focus ledger. SQLite lives on a dedicated
/// worker thread; callers submit closures and await the reply.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
    db_path: Arc<PathBuf>,
}

impl Store {
    pub fn new(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create store directory {}", parent.display()))?;
        }

        let (command_tx, command_rx) = mpsc::channel::<StoreCommand>();
        let (ready_tx, ready_rx) = mpsc::channel();
        let path_for_thread = db_path.clone();

        let worker = thread::Builder::new()
            .name("focusgate-store".into())
            .spawn(move || {
                let mut conn = match Connection::open(&path_for_thread) {
                    Ok(connection) => connection,
                    Err(err) => {
                        let _ = ready_tx.send(Err(
                            anyhow::Error::new(err).context("failed to open SQLite store")
                        ));
                        return;
                    }
                };

                if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
                    error!("Failed to enable WAL mode: {err}");
                }

                let init_result = run_migrations(&mut conn).context("failed to run store migrations");
                if ready_tx.send(init_result).is_err() {
                    error!("Store initialization receiver dropped before ready signal");
                    return;
                }

                while let Ok(command) = command_rx.recv() {
                    match command {
                        StoreCommand::Execute(task) => {
                            task(&mut conn);
                        }
                        StoreCommand::Shutdown => break,
                    }
                }

                info!("Store thread shutting down");
            })
            .with_context(|| "failed to spawn store worker thread")?;

        ready_rx
            .recv()
            .context("store worker exited before signaling readiness")??;

        info!("Store initialized at {}", db_path.as_path().display());

        Ok(Self {
            inner: Arc::new(StoreInner {
                sender: command_tx,
                worker: Mutex::new(Some(worker)),
            }),
            db_path: Arc::new(db_path),
        })
    }

    pub fn path(&self) -> &Path {
        self.db_path.as_path()
    }

    pub async fn execute<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let sender = self.inner.sender.clone();
        let (reply_tx, reply_rx) = oneshot::channel();

        let command = StoreCommand::Execute(Box::new(move |conn| {
            let result = task(conn);
            if reply_tx.send(result).is_err() {
                error!("Store caller dropped before receiving result");
            }
        }));

        sender
            .send(command)
            .map_err(|err| anyhow!("failed to send command to store thread: {err}"))?;

        reply_rx
            .await
            .map_err(|_| anyhow!("store thread terminated unexpectedly"))?
    }

    // --- session state ---

    pub async fn save_session(&self, session: &PersistedSession) -> Result<()> {
        let record = session.clone();
        self.execute(move |conn| {
            let now = Utc::now();
            kv_set(conn, SESSION_FOCUS_KEY, &record.focus_text, now)?;
            kv_set(
                conn,
                SESSION_STARTED_AT_KEY,
                &record.started_at.to_rfc3339(),
                now,
            )?;
            kv_set(
                conn,
                IS_SESSION_PAUSED_KEY,
                if record.paused { "true" } else { "false" },
                now,
            )?;
            kv_set(
                conn,
                PAUSED_ELAPSED_TIME_KEY,
                &record.active_ms_baseline.to_string(),
                now,
            )?;
            match record.segment_started_at {
                Some(started) => {
                    kv_set(conn, SESSION_SEGMENT_START_KEY, &started.to_rfc3339(), now)?
                }
                None => kv_delete(conn, SESSION_SEGMENT_START_KEY)?,
            }
            Ok(())
        })
        .await
        .context("failed to persist session state")
    }

    pub async fn load_session(&self) -> Result<Option<PersistedSession>> {
        self.execute(|conn| {
            let Some(focus_text) = kv_get(conn, SESSION_FOCUS_KEY)? else {
                return Ok(None);
            };
            if focus_text.trim().is_empty() {
                return Ok(None);
            }

            let started_at = match kv_get(conn, SESSION_STARTED_AT_KEY)? {
                Some(raw) => parse_datetime(&raw)?,
                None => Utc::now(),
            };
            let paused = kv_get(conn, IS_SESSION_PAUSED_KEY)?
                .map(|raw| raw == "true")
                .unwrap_or(false);
            let active_ms_baseline = kv_get(conn, PAUSED_ELAPSED_TIME_KEY)?
                .and_then(|raw| raw.parse::<u64>().ok())
                .unwrap_or(0);
            let segment_started_at = kv_get(conn, SESSION_SEGMENT_START_KEY)?
                .map(|raw| parse_datetime(&raw))
                .transpose()?;

            Ok(Some(PersistedSession {
                focus_text,
                started_at,
                paused,
                active_ms_baseline,
                segment_started_at,
            }))
        })
        .await
        .context("failed to load session state")
    }

    pub async fn clear_session(&self) -> Result<()> {
        self.execute(|conn| {
            for key in [
                SESSION_FOCUS_KEY,
                SESSION_STARTED_AT_KEY,
                SESSION_SEGMENT_START_KEY,
                IS_SESSION_PAUSED_KEY,
                PAUSED_ELAPSED_TIME_KEY,
                LAST_ASSESSMENT_KEY,
                LAST_RELEVANT_URL_KEY,
            ] {
                kv_delete(conn, key)?;
            }
            Ok(())
        })
        .await
        .context("failed to clear session state")
    }

    // --- assessment bookkeeping ---

    /// Forgets the previous session's verdict trail (used at session start).
    pub async fn clear_assessment_state(&self) -> Result<()> {
        self.execute(|conn| {
            kv_delete(conn, LAST_ASSESSMENT_KEY)?;
            kv_delete(conn, LAST_RELEVANT_URL_KEY)?;
            Ok(())
        })
        .await
    }

    pub async fn set_last_assessment_text(&self, text: &str) -> Result<()> {
        let text = text.to_string();
        self.execute(move |conn| {
            kv_set(conn, LAST_ASSESSMENT_KEY, &text, Utc::now())?;
            Ok(())
        })
        .await
    }

    pub async fn last_assessment_text(&self) -> Result<Option<String>> {
        self.execute(|conn| Ok(kv_get(conn, LAST_ASSESSMENT_KEY)?))
            .await
    }

    pub async fn set_last_relevant_url(&self, url: Option<&str>) -> Result<()> {
        let url = url.map(str::to_string);
        self.execute(move |conn| {
            match url {
                Some(url) => kv_set(conn, LAST_RELEVANT_URL_KEY, &url, Utc::now())?,
                None => kv_delete(conn, LAST_RELEVANT_URL_KEY)?,
            }
            Ok(())
        })
        .await
    }

    pub async fn last_relevant_url(&self) -> Result<Option<String>> {
        self.execute(|conn| Ok(kv_get(conn, LAST_RELEVANT_URL_KEY)?))
            .await
    }

    // --- whitelist ---

    pub async fn whitelist(&self) -> Result<Vec<String>> {
        self.execute(|conn| {
            let raw = kv_get(conn, FOCUS_WHITELIST_KEY)?;
            match raw {
                Some(json) => serde_json::from_str(&json)
                    .with_context(|| "whitelist value is not a JSON string array"),
                None => Ok(Vec::new()),
            }
        })
        .await
    }

    /// Adds a URL (exact string match). Returns false when already present.
    pub async fn add_to_whitelist(&self, url: &str) -> Result<bool> {
        let url = url.to_string();
        self.execute(move |conn| {
            let mut list: Vec<String> = match kv_get(conn, FOCUS_WHITELIST_KEY)? {
                Some(json) => serde_json::from_str(&json)
                    .with_context(|| "whitelist value is not a JSON string array")?,
                None => Vec::new(),
            };
            if list.iter().any(|entry| entry == &url) {
                return Ok(false);
            }
            list.push(url);
            kv_set(
                conn,
                FOCUS_WHITELIST_KEY,
                &serde_json::to_string(&list)?,
                Utc::now(),
            )?;
            Ok(true)
        })
        .await
    }

    pub async fn whitelist_contains(&self, url: &str) -> Result<bool> {
        let url = url.to_string();
        self.execute(move |conn| {
            let list: Vec<String> = match kv_get(conn, FOCUS_WHITELIST_KEY)? {
                Some(json) => serde_json::from_str(&json)
                    .with_context(|| "whitelist value is not a JSON string array")?,
                None => Vec::new(),
            };
            Ok(list.iter().any(|entry| entry == &url))
        })
        .await
    }

    pub async fn clear_whitelist(&self) -> Result<()> {
        self.execute(|conn| {
            kv_delete(conn, FOCUS_WHITELIST_KEY)?;
            Ok(())
        })
        .await
    }

    // --- daily ledger ---

    /// Folds a closed active segment into the day's running total. Callers
    /// invoke this only at pause/end boundaries, never from a poll loop.
    pub async fn add_daily_focus(&self, day: &str, delta_ms: u64) -> Result<()> {
        if delta_ms == 0 {
            return Ok(());
        }
        let day = day.to_string();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO daily_focus (day, total_ms, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(day) DO UPDATE SET
                     total_ms = total_ms + excluded.total_ms,
                     updated_at = excluded.updated_at",
                params![day, delta_ms as i64, Utc::now().to_rfc3339()],
            )
            .with_context(|| "failed to update daily focus total")?;
            Ok(())
        })
        .await
    }

    pub async fn daily_focus_total(&self, day: &str) -> Result<u64> {
        let day = day.to_string();
        self.execute(move |conn| {
            let total: Option<i64> = conn
                .query_row(
                    "SELECT total_ms FROM daily_focus WHERE day = ?1",
                    params![day],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(total.unwrap_or(0).max(0) as u64)
        })
        .await
    }
}

/// UTC calendar-date key for the daily ledger, e.g. "2025-06-01".
pub fn today_key(now: DateTime<Utc>) -> String {
    now.format("%Y-%m-%d").to_string()
}
