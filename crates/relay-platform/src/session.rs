//! Shared platform session
//!
//! Signing in again with the same access token can invalidate the previous
//! session, so concurrent users share one session instead of each opening
//! their own. The first caller signs in, later callers reuse the session and
//! the last caller to release it signs out, so nothing stays open while the
//! relay is idle.

use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, warn};

use crate::error::Result;
use crate::tableau::{PlatformClient, Session};

struct ActiveSession {
    session: Session,
    holders: usize,
}

/// A session handed out by [`SessionManager::acquire`]
///
/// Must be given back through [`SessionManager::release`].
#[derive(Debug)]
pub struct SessionLease {
    session: Session,
}

impl SessionLease {
    pub fn session(&self) -> &Session {
        &self.session
    }
}

impl Deref for SessionLease {
    type Target = Session;

    fn deref(&self) -> &Session {
        &self.session
    }
}

/// Reference-counted access to a single platform session
pub struct SessionManager {
    client: Arc<dyn PlatformClient>,
    max_age: Duration,
    active: Mutex<Option<ActiveSession>>,
    drained: Notify,
}

impl SessionManager {
    pub fn new(client: Arc<dyn PlatformClient>, max_age: Duration) -> Self {
        Self {
            client,
            max_age,
            active: Mutex::new(None),
            drained: Notify::new(),
        }
    }

    pub fn client(&self) -> &Arc<dyn PlatformClient> {
        &self.client
    }

    /// Reuse the open session or sign in
    ///
    /// A session older than the maximum age takes no new holders. Callers
    /// wait until its last holder has signed it out, then sign in afresh,
    /// so two sessions for the same token never overlap.
    pub async fn acquire(&self) -> Result<SessionLease> {
        loop {
            let drained = {
                let mut active = self.active.lock().await;

                match active.as_mut() {
                    Some(current) if !current.session.is_expired(self.max_age) => {
                        current.holders += 1;
                        return Ok(SessionLease {
                            session: current.session.clone(),
                        });
                    }
                    Some(current) => {
                        debug!(
                            age = ?current.session.age(),
                            holders = current.holders,
                            "Session expired, waiting for its holders to finish"
                        );
                        // Registered before the lock is dropped, so the
                        // wakeup from the last release cannot be missed
                        self.drained.notified()
                    }
                    None => {
                        let session = self.client.sign_in().await?;
                        *active = Some(ActiveSession {
                            session: session.clone(),
                            holders: 1,
                        });
                        return Ok(SessionLease { session });
                    }
                }
            };

            drained.await;
        }
    }

    /// Give a lease back, signing out when no holder remains
    ///
    /// Sign-out failures are logged and otherwise ignored.
    pub async fn release(&self, lease: SessionLease) {
        let mut active = self.active.lock().await;

        let Some(current) = active.as_mut() else {
            return;
        };
        if current.session.token() != lease.session.token() {
            warn!("Released a lease for a session that is no longer open");
            return;
        }

        current.holders = current.holders.saturating_sub(1);
        if current.holders > 0 {
            return;
        }

        if let Some(finished) = active.take() {
            if let Err(e) = self.client.sign_out(&finished.session).await {
                warn!(error = %e, "Failed to sign out of Tableau Server");
            }
        }
        self.drained.notify_waiters();
    }

    /// Number of callers currently holding the open session
    pub async fn holders(&self) -> usize {
        self.active.lock().await.as_ref().map_or(0, |a| a.holders)
    }
}
