//! Engine sessions.
//!
//! A [`Session`] owns one engine behind an async `RwLock`. Mutating work
//! holds the write guard for its whole duration and runs on the blocking
//! pool; reads share the read guard. Engine calls cannot be cancelled: when
//! a call outlives its timeout, or the engine dies, the session is poisoned
//! and every later call reports [`BridgeError::SessionUnavailable`].

pub mod pool;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::engine::Engine;
use crate::error::{BridgeError, Result};
use crate::obs;

pub use pool::SessionPool;

/// Point-in-time status of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStatus {
    pub session_id: Uuid,
    pub engine: String,
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unavailable_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub uptime_secs: i64,
    pub idle_secs: i64,
    pub execution_count: u64,
}

pub struct Session {
    id: Uuid,
    engine_name: String,
    engine: Arc<RwLock<Box<dyn Engine>>>,
    poison: Mutex<Option<String>>,
    created_at: DateTime<Utc>,
    last_activity: Mutex<DateTime<Utc>>,
    executions: AtomicU64,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("engine", &self.engine_name)
            .field("available", &self.is_available())
            .finish()
    }
}

impl Session {
    pub fn new(engine: Box<dyn Engine>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            engine_name: engine.name().to_string(),
            engine: Arc::new(RwLock::new(engine)),
            poison: Mutex::new(None),
            created_at: now,
            last_activity: Mutex::new(now),
            executions: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn engine_name(&self) -> &str {
        &self.engine_name
    }

    pub fn is_available(&self) -> bool {
        self.poison_reason().is_none()
    }

    pub fn poison_reason(&self) -> Option<String> {
        self.poison
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Mark the session unusable. The first reason wins.
    pub fn poison(&self, reason: impl Into<String>) {
        let mut slot = self.poison.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            let reason = reason.into();
            obs::emit_session_poisoned(&self.id.to_string(), &reason);
            *slot = Some(reason);
        }
    }

    /// Allocate the next execution sequence number (1-based).
    pub fn next_seq(&self) -> u64 {
        self.executions.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn execution_count(&self) -> u64 {
        self.executions.load(Ordering::Relaxed)
    }

    pub fn touch(&self) {
        *self
            .last_activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Utc::now();
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        *self
            .last_activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// True while an engine call holds the engine lock.
    pub fn is_busy(&self) -> bool {
        self.engine.try_write().is_err()
    }

    pub fn idle_for(&self) -> chrono::Duration {
        Utc::now() - self.last_activity()
    }

    pub fn status(&self) -> SessionStatus {
        let now = Utc::now();
        let last_activity = self.last_activity();
        let reason = self.poison_reason();
        SessionStatus {
            session_id: self.id,
            engine: self.engine_name.clone(),
            available: reason.is_none(),
            unavailable_reason: reason,
            created_at: self.created_at,
            last_activity,
            uptime_secs: (now - self.created_at).num_seconds(),
            idle_secs: (now - last_activity).num_seconds(),
            execution_count: self.execution_count(),
        }
    }

    fn check_available(&self) -> Result<()> {
        match self.poison_reason() {
            Some(reason) => Err(BridgeError::SessionUnavailable { reason }),
            None => Ok(()),
        }
    }

    /// Run `f` with exclusive access to the engine.
    ///
    /// With a `timeout`, a call that has not finished in time poisons the
    /// session; the blocking call itself keeps running until it returns. A
    /// call that leaves the engine dead still returns its result, and the
    /// session is poisoned for later calls.
    pub async fn with_engine_mut<T, F>(&self, timeout: Option<Duration>, f: F) -> Result<T>
    where
        F: FnOnce(&mut dyn Engine) -> T + Send + 'static,
        T: Send + 'static,
    {
        self.check_available()?;
        let mut guard = Arc::clone(&self.engine).write_owned().await;
        self.check_available()?;
        self.touch();

        let task = tokio::task::spawn_blocking(move || {
            let out = f(&mut **guard);
            (out, guard.is_alive())
        });

        let joined = match timeout {
            Some(limit) => match tokio::time::timeout(limit, task).await {
                Ok(joined) => joined,
                Err(_) => {
                    let reason = format!("execution exceeded {} ms", limit.as_millis());
                    self.poison(reason.clone());
                    return Err(BridgeError::SessionUnavailable { reason });
                }
            },
            None => task.await,
        };
        self.touch();

        match joined {
            Ok((out, true)) => Ok(out),
            Ok((out, false)) => {
                self.poison("engine exited");
                Ok(out)
            }
            Err(join_error) => {
                let reason = format!("engine call failed: {join_error}");
                self.poison(reason.clone());
                Err(BridgeError::SessionUnavailable { reason })
            }
        }
    }

    /// Run `f` with shared access to the engine.
    pub async fn with_engine<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&dyn Engine) -> T + Send + 'static,
        T: Send + 'static,
    {
        self.check_available()?;
        let guard = Arc::clone(&self.engine).read_owned().await;
        self.check_available()?;
        self.touch();
        tokio::task::spawn_blocking(move || f(&**guard))
            .await
            .map_err(|e| {
                let reason = format!("engine call failed: {e}");
                self.poison(reason.clone());
                BridgeError::SessionUnavailable { reason }
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::FakeEngine;

    #[tokio::test]
    async fn sequence_numbers_start_at_one() {
        let session = Session::new(Box::new(FakeEngine::new()));
        assert_eq!(session.next_seq(), 1);
        assert_eq!(session.next_seq(), 2);
        assert_eq!(session.execution_count(), 2);
    }

    #[tokio::test]
    async fn engine_calls_see_the_same_workspace() {
        let session = Session::new(Box::new(FakeEngine::new()));
        session
            .with_engine_mut(None, |engine| {
                engine
                    .assign("x", crate::value::RuntimeValue::Scalar(2.0))
                    .unwrap()
            })
            .await
            .unwrap();
        let names = session
            .with_engine(|engine| engine.variable_names().unwrap())
            .await
            .unwrap();
        assert_eq!(names, vec!["x"]);
    }

    #[tokio::test]
    async fn timeout_poisons_session() {
        let session = Session::new(Box::new(FakeEngine::new()));
        let err = session
            .with_engine_mut(Some(Duration::from_millis(20)), |_| {
                std::thread::sleep(Duration::from_millis(300));
            })
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::SessionUnavailable { .. }));
        assert!(!session.is_available());
        assert!(session.status().unavailable_reason.unwrap().contains("exceeded"));

        let again = session.with_engine(|_| ()).await.unwrap_err();
        assert_eq!(again.kind(), "session_unavailable");
    }

    #[tokio::test]
    async fn dead_engine_poisons_later_calls() {
        let session = Session::new(Box::new(FakeEngine::new()));
        session
            .with_engine_mut(None, |engine| {
                engine.eval("exit").unwrap();
            })
            .await
            .unwrap();
        let err = session.with_engine(|_| ()).await.unwrap_err();
        assert!(matches!(err, BridgeError::SessionUnavailable { .. }));
    }

    #[tokio::test]
    async fn panic_in_engine_call_poisons_session() {
        let session = Session::new(Box::new(FakeEngine::new()));
        let err = session
            .with_engine_mut(None, |_| -> () { panic!("engine crashed") })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "session_unavailable");
        assert!(!session.is_available());
    }
}
