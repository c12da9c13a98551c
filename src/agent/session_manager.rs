//! Session manager: owns the tenant → session table and the per-tenant
//! turn exclusion.
//!
//! Each tenant maps to a slot behind its own async mutex. Holding the slot's
//! owned guard *is* the right to run a turn; a second request that cannot
//! take it immediately is rejected with `SessionBusy`. The table lock is only
//! held for lookups and inserts, never across I/O.

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMappedMutexGuard, OwnedMutexGuard, RwLock};

use crate::agent::factory::{Agent, AgentFactory};
use crate::agent::session::AgentSession;
use crate::error::Error;
use crate::tenant::TenantId;
use crate::tools::{ToolBinder, ToolSet};
use crate::vault::{CredentialVault, TenantContext};

/// Table entry for one tenant.
#[derive(Default)]
struct Slot {
    session: Option<AgentSession>,
    /// Set once the slot has been removed from the table. A request that
    /// raced the removal must look the tenant up again.
    retired: bool,
}

/// Exclusive access to a tenant's session for the duration of one turn.
pub struct TurnGuard {
    tenant: TenantId,
    session: OwnedMappedMutexGuard<Slot, AgentSession>,
}

impl TurnGuard {
    pub fn tenant(&self) -> &TenantId {
        &self.tenant
    }
}

impl Deref for TurnGuard {
    type Target = AgentSession;

    fn deref(&self) -> &AgentSession {
        &self.session
    }
}

impl DerefMut for TurnGuard {
    fn deref_mut(&mut self) -> &mut AgentSession {
        &mut self.session
    }
}

/// Manages per-tenant sessions.
pub struct SessionManager {
    sessions: RwLock<HashMap<TenantId, Arc<Mutex<Slot>>>>,
    vault: CredentialVault,
    binder: ToolBinder,
    factory: AgentFactory,
    idle_timeout: Duration,
}

impl SessionManager {
    pub fn new(
        vault: CredentialVault,
        binder: ToolBinder,
        factory: AgentFactory,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            vault,
            binder,
            factory,
            idle_timeout,
        }
    }

    /// Take the tenant's turn exclusion, creating the session first if the
    /// tenant has none.
    ///
    /// Creation (vault load, tool binding, agent construction) runs while the
    /// exclusion is held. If it fails the tenant is left without a session
    /// and the error is returned. A session whose credential was rejected is
    /// rebuilt the same way, keeping its memory.
    pub async fn begin_turn(&self, tenant: &TenantId) -> Result<TurnGuard, Error> {
        loop {
            let slot = self.slot_for(tenant).await;

            let Ok(mut guard) = Arc::clone(&slot).try_lock_owned() else {
                tracing::debug!(tenant = %tenant, "Rejected turn: tenant busy");
                return Err(Error::SessionBusy {
                    tenant: tenant.clone(),
                });
            };

            if guard.retired {
                continue;
            }

            match guard.session.as_ref().map(AgentSession::is_stale) {
                None => match self.build(tenant).await {
                    Ok((agent, tools)) => {
                        tracing::info!(
                            tenant = %tenant,
                            ad_account = tools.ad_account_id(),
                            model = agent.model_name(),
                            "Session created"
                        );
                        guard.session = Some(AgentSession::new(tenant.clone(), agent, tools));
                    }
                    Err(e) => {
                        tracing::warn!(tenant = %tenant, error = %e, "Session setup failed");
                        guard.retired = true;
                        self.remove_slot(tenant, &slot).await;
                        return Err(e);
                    }
                },
                // The credential was rejected mid-session. Reload it; the
                // conversation so far stays.
                Some(true) => {
                    let (agent, tools) = match self.build(tenant).await {
                        Ok(built) => built,
                        Err(e) => {
                            tracing::warn!(tenant = %tenant, error = %e, "Session rebind failed");
                            return Err(e);
                        }
                    };
                    tracing::info!(
                        tenant = %tenant,
                        ad_account = tools.ad_account_id(),
                        "Session rebound to reloaded credential"
                    );
                    if let Some(session) = guard.session.as_mut() {
                        session.rebind(agent, tools);
                    }
                }
                Some(false) => {}
            }

            // The session was populated above, so the mapping always succeeds.
            if let Ok(session) = OwnedMutexGuard::try_map(guard, |slot| slot.session.as_mut()) {
                return Ok(TurnGuard {
                    tenant: tenant.clone(),
                    session,
                });
            }
        }
    }

    /// Alias of [`begin_turn`](Self::begin_turn).
    pub async fn get_or_create(&self, tenant: &TenantId) -> Result<TurnGuard, Error> {
        self.begin_turn(tenant).await
    }

    /// Mark the tenant's session as active now. Returns `false` if the tenant
    /// has no session or a turn is running (the turn refreshes it itself).
    pub async fn touch(&self, tenant: &TenantId) -> bool {
        let Some(slot) = self.sessions.read().await.get(tenant).cloned() else {
            return false;
        };
        let Ok(mut guard) = slot.try_lock() else {
            return false;
        };
        match guard.session.as_mut() {
            Some(session) => {
                session.touch(Utc::now());
                true
            }
            None => false,
        }
    }

    /// Destroy every session idle for longer than the configured window as of
    /// `now`. Tenants with a turn in progress are skipped.
    pub async fn evict_idle(&self, now: DateTime<Utc>) -> Vec<TenantId> {
        let mut evicted = Vec::new();
        let mut sessions = self.sessions.write().await;

        sessions.retain(|tenant, slot| {
            let Ok(mut guard) = slot.try_lock() else {
                return true;
            };
            let idle = match &guard.session {
                Some(session) => (now - session.last_active_at())
                    .to_std()
                    .is_ok_and(|idle_for| idle_for >= self.idle_timeout),
                None => true,
            };
            if !idle {
                return true;
            }
            guard.session = None;
            guard.retired = true;
            evicted.push(tenant.clone());
            false
        });
        drop(sessions);

        for tenant in &evicted {
            tracing::info!(tenant = %tenant, "Session evicted after idle timeout");
        }
        evicted
    }

    /// Explicitly end the tenant's session. Waits for an in-flight turn to
    /// finish first. Returns whether a session existed.
    pub async fn close(&self, tenant: &TenantId) -> bool {
        let Some(slot) = self.sessions.read().await.get(tenant).cloned() else {
            return false;
        };

        let mut guard = slot.lock().await;
        let closed = guard.session.take();
        guard.retired = true;
        self.remove_slot(tenant, &slot).await;
        drop(guard);

        match closed {
            Some(session) => {
                tracing::info!(
                    tenant = %tenant,
                    turns = session.turn_count(),
                    age_secs = (Utc::now() - session.created_at()).num_seconds(),
                    "Session closed"
                );
                true
            }
            None => false,
        }
    }

    /// Number of tenants with a table entry.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    pub async fn contains(&self, tenant: &TenantId) -> bool {
        self.sessions.read().await.contains_key(tenant)
    }

    /// Run [`evict_idle`](Self::evict_idle) every `interval` in the background.
    pub fn spawn_idle_sweeper(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // Skip immediate first tick
            loop {
                ticker.tick().await;
                let evicted = manager.evict_idle(Utc::now()).await;
                if !evicted.is_empty() {
                    tracing::debug!(count = evicted.len(), "Idle sweep finished");
                }
            }
        })
    }

    async fn slot_for(&self, tenant: &TenantId) -> Arc<Mutex<Slot>> {
        if let Some(slot) = self.sessions.read().await.get(tenant) {
            return Arc::clone(slot);
        }
        let mut sessions = self.sessions.write().await;
        Arc::clone(sessions.entry(tenant.clone()).or_default())
    }

    /// Remove `slot` from the table unless it has already been replaced.
    async fn remove_slot(&self, tenant: &TenantId, slot: &Arc<Mutex<Slot>>) {
        let mut sessions = self.sessions.write().await;
        if sessions
            .get(tenant)
            .is_some_and(|current| Arc::ptr_eq(current, slot))
        {
            sessions.remove(tenant);
        }
    }

    /// Vault load, tool binding and agent construction for `tenant`.
    async fn build(&self, tenant: &TenantId) -> Result<(Agent, ToolSet), Error> {
        let TenantContext {
            credential,
            profile,
        } = self.vault.load(tenant).await?;
        let tools = self.binder.bind(credential);
        let agent = self.factory.create(tenant, &profile, &tools)?;
        Ok((agent, tools))
    }
}
