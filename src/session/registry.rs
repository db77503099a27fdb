use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::{Session, Step};
use crate::UserId;

/// Time source for idle tracking.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// At most one session per user. Owned by the dispatcher, which hands it
/// events one at a time, so each user's transitions are serialised.
pub struct SessionRegistry {
    sessions: HashMap<UserId, Session>,
    clock: Arc<dyn Clock>,
    idle_timeout: chrono::Duration,
}

impl SessionRegistry {
    pub fn new(clock: Arc<dyn Clock>, idle_timeout: std::time::Duration) -> Self {
        Self {
            sessions: HashMap::new(),
            clock,
            idle_timeout: chrono::Duration::from_std(idle_timeout)
                .unwrap_or(chrono::Duration::MAX),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// The user's session, created in `AwaitingUpload` if there is none.
    /// The flag is true when a session was created.
    pub fn get_or_create(&mut self, user_id: UserId) -> (&mut Session, bool) {
        let now = self.clock.now();
        let mut created = false;
        let session = self.sessions.entry(user_id).or_insert_with(|| {
            created = true;
            log::info!("Session created for user {}", user_id);
            Session::new(user_id, now)
        });
        session.touch(now);
        (session, created)
    }

    /// Look up the session for an incoming event and refresh its idle timer.
    pub fn active(&mut self, user_id: UserId) -> Option<&mut Session> {
        let now = self.clock.now();
        let session = self.sessions.get_mut(&user_id)?;
        session.touch(now);
        Some(session)
    }

    pub fn lookup(&self, user_id: UserId) -> Option<&Session> {
        self.sessions.get(&user_id)
    }

    /// Store `session`, returning whatever it replaced.
    pub fn insert(&mut self, session: Session) -> Option<Session> {
        self.sessions.insert(session.user_id(), session)
    }

    /// Remove the user's session. Dropping it releases the source buffer.
    pub fn destroy(&mut self, user_id: UserId) -> Option<Session> {
        self.sessions.remove(&user_id)
    }

    /// Drop sessions idle longer than the timeout. Sessions waiting on a
    /// render are left alone. Returns the affected users.
    pub fn reap_idle(&mut self) -> Vec<UserId> {
        let Some(cutoff) = self.clock.now().checked_sub_signed(self.idle_timeout) else {
            return Vec::new();
        };
        let stale: Vec<UserId> = self
            .sessions
            .values()
            .filter(|s| !matches!(s.step(), Step::Processing { .. }))
            .filter(|s| s.last_activity() < cutoff)
            .map(|s| s.user_id())
            .collect();

        for user_id in &stale {
            self.sessions.remove(user_id);
            log::info!("Reaped idle session for user {}", user_id);
        }
        stale
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::audio::AudioBuffer;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Clock that only moves when told to.
    pub(crate) struct ManualClock(Mutex<DateTime<Utc>>);

    impl ManualClock {
        pub(crate) fn new() -> Arc<Self> {
            Arc::new(Self(Mutex::new(Utc::now())))
        }

        pub(crate) fn advance(&self, by: Duration) {
            let mut now = self.0.lock().unwrap();
            *now += chrono::Duration::from_std(by).unwrap();
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.0.lock().unwrap()
        }
    }

    #[test]
    fn test_get_or_create_is_idempotent() {
        let mut reg = SessionRegistry::new(Arc::new(SystemClock), Duration::from_secs(60));
        let (_, created) = reg.get_or_create(5);
        assert!(created);
        let (s, created) = reg.get_or_create(5);
        assert!(!created);
        assert_eq!(s.step(), Step::AwaitingUpload);
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_insert_replaces_and_destroy_removes() {
        let mut reg = SessionRegistry::new(Arc::new(SystemClock), Duration::from_secs(60));
        reg.get_or_create(5);

        let mut fresh = Session::new(5, reg.now());
        fresh.attach_upload(AudioBuffer::silent(4, 1, 8000), None).unwrap();
        let old = reg.insert(fresh).unwrap();
        assert_eq!(old.step(), Step::AwaitingUpload);
        assert_eq!(reg.lookup(5).unwrap().step(), Step::AwaitingSpeed);

        assert!(reg.destroy(5).unwrap().has_source());
        assert!(reg.destroy(5).is_none());
        assert!(reg.is_empty());
    }

    #[test]
    fn test_reap_idle_skips_active_and_processing() {
        let clock = ManualClock::new();
        let mut reg = SessionRegistry::new(clock.clone(), Duration::from_secs(60));

        reg.get_or_create(1);
        reg.get_or_create(2);

        let mut busy = Session::new(3, reg.now());
        busy.attach_upload(AudioBuffer::silent(4, 1, 8000), None).unwrap();
        busy.submit_text("1").unwrap();
        busy.submit_text("100 0.5").unwrap();
        busy.submit_text("0").unwrap();
        busy.begin_processing(1).unwrap();
        reg.insert(busy);

        clock.advance(Duration::from_secs(45));
        reg.active(2);
        clock.advance(Duration::from_secs(30));

        assert_eq!(reg.reap_idle(), vec![1]);
        assert!(reg.lookup(1).is_none());
        assert!(reg.lookup(2).is_some());
        assert!(reg.lookup(3).is_some());
    }
}
