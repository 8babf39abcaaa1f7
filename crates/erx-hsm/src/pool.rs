//! Bounded HSM session pool.
//!
//! Each request acquires one session for the duration of one transaction and
//! releases it on drop. The TEE token is process-wide and swapped atomically
//! by an external refresh job; active sessions read the current value.

use std::sync::Arc;

use parking_lot::{Condvar, Mutex, RwLock};

use erx_types::Blob;

use crate::client::HsmClient;

const DEFAULT_MAX_SESSIONS: usize = 16;

struct PoolState {
    in_use: usize,
}

/// Pool of HSM sessions over one shared client.
#[derive(Clone)]
pub struct HsmPool {
    client: Arc<dyn HsmClient>,
    state: Arc<Mutex<PoolState>>,
    available: Arc<Condvar>,
    max_sessions: usize,
    tee_token: Arc<RwLock<Blob>>,
}

impl HsmPool {
    pub fn new(client: Arc<dyn HsmClient>) -> Self {
        Self::with_capacity(client, DEFAULT_MAX_SESSIONS)
    }

    pub fn with_capacity(client: Arc<dyn HsmClient>, max_sessions: usize) -> Self {
        Self {
            client,
            state: Arc::new(Mutex::new(PoolState { in_use: 0 })),
            available: Arc::new(Condvar::new()),
            max_sessions,
            tee_token: Arc::new(RwLock::new(Blob::default())),
        }
    }

    /// Acquire a session, blocking while the pool is exhausted.
    pub fn acquire(&self) -> HsmSession {
        let mut state = self.state.lock();
        while state.in_use >= self.max_sessions {
            self.available.wait(&mut state);
        }
        state.in_use += 1;
        HsmSession { pool: self.clone() }
    }

    /// Install a fresh TEE token (periodic external job).
    pub fn refresh_tee_token(&self, token: Blob) {
        *self.tee_token.write() = token;
    }

    /// Current TEE token as seen by active sessions.
    pub fn tee_token(&self) -> Blob {
        self.tee_token.read().clone()
    }

    fn release(&self) {
        let mut state = self.state.lock();
        state.in_use -= 1;
        self.available.notify_one();
    }
}

/// One checked-out session. Dereferences to the client operations.
pub struct HsmSession {
    pool: HsmPool,
}

impl HsmSession {
    pub fn session(&self) -> &dyn HsmClient {
        self.pool.client.as_ref()
    }
}

impl Drop for HsmSession {
    fn drop(&mut self) {
        self.pool.release();
    }
}
