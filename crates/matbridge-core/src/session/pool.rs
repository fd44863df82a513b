//! Bounded pool of isolated engine sessions.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use uuid::Uuid;

use super::{Session, SessionStatus};
use crate::config::BridgeConfig;
use crate::engine::EngineFactory;
use crate::error::{BridgeError, Result};
use crate::metrics::METRICS;
use crate::obs;

pub struct SessionPool {
    factory: Arc<dyn EngineFactory>,
    sessions: Mutex<HashMap<Uuid, Arc<Session>>>,
    default: Mutex<Option<Uuid>>,
    /// Serializes default-session lookup, launch and replacement.
    launch: tokio::sync::Mutex<()>,
    max_sessions: usize,
    idle_timeout: Duration,
}

impl SessionPool {
    pub fn new(factory: Arc<dyn EngineFactory>, config: &BridgeConfig) -> Self {
        Self {
            factory,
            sessions: Mutex::new(HashMap::new()),
            default: Mutex::new(None),
            launch: tokio::sync::Mutex::new(()),
            max_sessions: config.max_sessions,
            idle_timeout: Duration::from_secs(config.idle_timeout_secs),
        }
    }

    fn sessions(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, Arc<Session>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.sessions().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Launch a new engine and register its session.
    pub async fn open(&self) -> Result<Arc<Session>> {
        if self.len() >= self.max_sessions {
            return Err(BridgeError::PoolExhausted {
                max_sessions: self.max_sessions,
            });
        }
        let factory = Arc::clone(&self.factory);
        let engine = tokio::task::spawn_blocking(move || factory.launch())
            .await
            .map_err(|e| BridgeError::SessionUnavailable {
                reason: format!("engine launch failed: {e}"),
            })??;

        let session = Arc::new(Session::new(engine));
        {
            let mut sessions = self.sessions();
            if sessions.len() >= self.max_sessions {
                return Err(BridgeError::PoolExhausted {
                    max_sessions: self.max_sessions,
                });
            }
            sessions.insert(session.id(), Arc::clone(&session));
        }
        METRICS.inc_sessions_opened();
        obs::emit_session_opened(&session.id().to_string(), session.engine_name());
        Ok(session)
    }

    pub fn get(&self, id: Uuid) -> Result<Arc<Session>> {
        self.sessions()
            .get(&id)
            .cloned()
            .ok_or(BridgeError::SessionNotFound(id))
    }

    /// Drop a session from the pool.
    pub fn close(&self, id: Uuid) -> Result<()> {
        if self.remove(id, "closed") {
            Ok(())
        } else {
            Err(BridgeError::SessionNotFound(id))
        }
    }

    fn remove(&self, id: Uuid, reason: &str) -> bool {
        if self.sessions().remove(&id).is_none() {
            return false;
        }
        let mut default = self.default.lock().unwrap_or_else(PoisonError::into_inner);
        if *default == Some(id) {
            *default = None;
        }
        obs::emit_session_closed(&id.to_string(), reason);
        true
    }

    /// Close `id` and open a fresh session in its place. A session that is
    /// already gone is simply replaced.
    pub async fn replace(&self, id: Uuid) -> Result<Arc<Session>> {
        let _launch = self.launch.lock().await;
        let was_default = {
            let default = self.default.lock().unwrap_or_else(PoisonError::into_inner);
            *default == Some(id)
        };
        self.replace_locked(id, was_default).await
    }

    async fn replace_locked(&self, id: Uuid, make_default: bool) -> Result<Arc<Session>> {
        self.remove(id, "replaced");
        let session = self.open().await?;
        if make_default {
            *self.default.lock().unwrap_or_else(PoisonError::into_inner) = Some(session.id());
        }
        Ok(session)
    }

    /// The session used by tool calls; opened on first use and replaced when
    /// it became unavailable. Concurrent callers get the same session.
    pub async fn acquire_default(&self) -> Result<Arc<Session>> {
        let _launch = self.launch.lock().await;
        match self.current_default() {
            Some(session) if session.is_available() => Ok(session),
            Some(session) => self.replace_locked(session.id(), true).await,
            None => {
                let session = self.open().await?;
                *self.default.lock().unwrap_or_else(PoisonError::into_inner) = Some(session.id());
                Ok(session)
            }
        }
    }

    /// The default session, if one is open; never launches an engine.
    pub fn current_default(&self) -> Option<Arc<Session>> {
        let default = *self.default.lock().unwrap_or_else(PoisonError::into_inner);
        default.and_then(|id| self.sessions().get(&id).cloned())
    }

    /// Close sessions that became unavailable, and sessions other than the
    /// default that sat idle longer than the configured timeout. Sessions
    /// with an engine call in flight are left alone. Returns the closed ids.
    pub fn reap_idle(&self) -> Vec<Uuid> {
        let limit = chrono::Duration::from_std(self.idle_timeout).unwrap_or(chrono::Duration::MAX);
        let default = *self.default.lock().unwrap_or_else(PoisonError::into_inner);
        let doomed: Vec<(Uuid, &'static str)> = self
            .sessions()
            .values()
            .filter_map(|s| {
                if !s.is_available() {
                    Some((s.id(), "unavailable"))
                } else if Some(s.id()) != default && !s.is_busy() && s.idle_for() > limit {
                    Some((s.id(), "idle"))
                } else {
                    None
                }
            })
            .collect();

        doomed
            .into_iter()
            .filter(|(id, reason)| self.remove(*id, reason))
            .map(|(id, _)| id)
            .collect()
    }

    pub fn statuses(&self) -> Vec<SessionStatus> {
        let mut statuses: Vec<SessionStatus> =
            self.sessions().values().map(|s| s.status()).collect();
        statuses.sort_by_key(|s| s.created_at);
        statuses
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Engine;
    use crate::error::EngineError;
    use crate::fakes::FakeEngine;

    fn make_pool(max_sessions: usize, idle_timeout_secs: u64) -> SessionPool {
        let factory = || -> std::result::Result<Box<dyn Engine>, EngineError> {
            Ok(Box::new(FakeEngine::new()))
        };
        let config = BridgeConfig {
            max_sessions,
            idle_timeout_secs,
            ..BridgeConfig::default()
        };
        SessionPool::new(Arc::new(factory), &config)
    }

    #[tokio::test]
    async fn open_respects_capacity() {
        let pool = make_pool(2, 300);
        pool.open().await.unwrap();
        pool.open().await.unwrap();
        let err = pool.open().await.unwrap_err();
        assert!(matches!(err, BridgeError::PoolExhausted { max_sessions: 2 }));
    }

    #[tokio::test]
    async fn get_and_close() {
        let pool = make_pool(3, 300);
        let session = pool.open().await.unwrap();
        assert_eq!(pool.get(session.id()).unwrap().id(), session.id());
        pool.close(session.id()).unwrap();
        assert!(matches!(
            pool.get(session.id()).unwrap_err(),
            BridgeError::SessionNotFound(_)
        ));
        assert!(pool.is_empty());
    }

    #[tokio::test]
    async fn default_session_is_reused() {
        let pool = make_pool(3, 300);
        let a = pool.acquire_default().await.unwrap();
        let b = pool.acquire_default().await.unwrap();
        assert_eq!(a.id(), b.id());
        assert_eq!(pool.len(), 1);
    }

    #[tokio::test]
    async fn unavailable_default_is_replaced() {
        let pool = make_pool(1, 300);
        let first = pool.acquire_default().await.unwrap();
        first.poison("test");
        let second = pool.acquire_default().await.unwrap();
        assert_ne!(first.id(), second.id());
        assert!(second.is_available());
        assert_eq!(pool.len(), 1);
    }

    #[tokio::test]
    async fn sessions_are_isolated() {
        let pool = make_pool(2, 300);
        let a = pool.open().await.unwrap();
        let b = pool.open().await.unwrap();
        a.with_engine_mut(None, |engine| {
            engine
                .assign("only_in_a", crate::value::RuntimeValue::Scalar(1.0))
                .unwrap()
        })
        .await
        .unwrap();
        let names = b
            .with_engine(|engine| engine.variable_names().unwrap())
            .await
            .unwrap();
        assert!(names.is_empty());
    }

    #[tokio::test]
    async fn reap_closes_idle_and_unavailable() {
        let pool = make_pool(3, 0);
        let idle = pool.open().await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let closed = pool.reap_idle();
        assert_eq!(closed, vec![idle.id()]);

        let pool = make_pool(3, 3600);
        let fresh = pool.open().await.unwrap();
        let broken = pool.open().await.unwrap();
        broken.poison("timed out");
        assert_eq!(pool.reap_idle(), vec![broken.id()]);
        assert!(pool.get(fresh.id()).is_ok());
    }

    #[tokio::test]
    async fn idle_default_and_busy_sessions_survive_reaping() {
        let pool = make_pool(3, 0);
        let default = pool.acquire_default().await.unwrap();
        let busy = pool.open().await.unwrap();
        let _held = busy.engine.write().await;
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert!(pool.reap_idle().is_empty());
        assert_eq!(pool.acquire_default().await.unwrap().id(), default.id());
        assert!(pool.get(busy.id()).is_ok());

        default.poison("engine exited");
        assert_eq!(pool.reap_idle(), vec![default.id()]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_first_calls_share_one_default() {
        let pool = Arc::new(make_pool(1, 300));
        let calls: Vec<_> = (0..8)
            .map(|_| {
                let pool = Arc::clone(&pool);
                tokio::spawn(async move { pool.acquire_default().await })
            })
            .collect();
        let mut ids = Vec::new();
        for call in calls {
            ids.push(call.await.unwrap().unwrap().id());
        }
        ids.dedup();
        assert_eq!(ids.len(), 1);
        assert_eq!(pool.len(), 1);
    }

    #[tokio::test]
    async fn replacing_a_closed_session_opens_a_new_one() {
        let pool = make_pool(1, 300);
        let first = pool.acquire_default().await.unwrap();
        pool.close(first.id()).unwrap();
        let second = pool.replace(first.id()).await.unwrap();
        assert_ne!(first.id(), second.id());
        assert_eq!(pool.len(), 1);
    }

    #[tokio::test]
    async fn failed_launch_is_session_unavailable() {
        let factory = || -> std::result::Result<Box<dyn Engine>, EngineError> {
            Err(EngineError::Launch("no license".into()))
        };
        let pool = SessionPool::new(Arc::new(factory), &BridgeConfig::default());
        let err = pool.open().await.unwrap_err();
        assert_eq!(err.kind(), "session_unavailable");
        assert!(err.to_string().contains("no license"));
    }
}
