//! In-process namespace service.
//!
//! Arbitrates well-known names between connections living in the same
//! process, following D-Bus ownership rules: unique connection names,
//! owner queues, replacement, and names dropped when a connection closes.
//! Ideal for:
//! - Testing registrars against a shared namespace
//! - Dry runs without a system bus

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tracing::{debug, info};

use super::{
    BusError, NameBus, Queueing, ReleaseNameReply, Replacement, RequestNameFlags,
    RequestNameReply, Result,
};

#[derive(Debug, Clone)]
struct Claim {
    unique_name: String,
    flags: RequestNameFlags,
}

#[derive(Debug)]
struct NameEntry {
    owner: Claim,
    queue: VecDeque<Claim>,
}

#[derive(Debug, Default)]
struct NamespaceState {
    names: HashMap<String, NameEntry>,
    next_serial: u64,
}

impl NamespaceState {
    fn request(
        &mut self,
        name: &str,
        requester: &str,
        flags: RequestNameFlags,
    ) -> RequestNameReply {
        let claim = Claim {
            unique_name: requester.to_string(),
            flags,
        };

        let Some(entry) = self.names.get_mut(name) else {
            self.names.insert(
                name.to_string(),
                NameEntry {
                    owner: claim,
                    queue: VecDeque::new(),
                },
            );
            return RequestNameReply::PrimaryOwner;
        };

        if entry.owner.unique_name == requester {
            entry.owner.flags = flags;
            return RequestNameReply::AlreadyOwner;
        }

        // A repeated request replaces any earlier queue slot.
        entry.queue.retain(|c| c.unique_name != requester);

        if flags.replace_existing && entry.owner.flags.replacement == Replacement::Allow {
            let previous = std::mem::replace(&mut entry.owner, claim);
            if previous.flags.queueing == Queueing::Queue {
                entry.queue.push_front(previous);
            }
            return RequestNameReply::PrimaryOwner;
        }

        if flags.queueing == Queueing::Queue {
            entry.queue.push_back(claim);
            return RequestNameReply::InQueue;
        }

        RequestNameReply::Exists
    }

    fn release(&mut self, name: &str, requester: &str) -> ReleaseNameReply {
        let Some(entry) = self.names.get_mut(name) else {
            return ReleaseNameReply::NonExistent;
        };

        if entry.owner.unique_name == requester {
            match entry.queue.pop_front() {
                Some(next) => entry.owner = next,
                None => {
                    self.names.remove(name);
                }
            }
            return ReleaseNameReply::Released;
        }

        let queued = entry.queue.len();
        entry.queue.retain(|c| c.unique_name != requester);
        if entry.queue.len() < queued {
            ReleaseNameReply::Released
        } else {
            ReleaseNameReply::NotOwner
        }
    }

    fn drop_connection(&mut self, unique_name: &str) -> usize {
        let held: Vec<String> = self
            .names
            .iter()
            .filter(|(_, entry)| {
                entry.owner.unique_name == unique_name
                    || entry.queue.iter().any(|c| c.unique_name == unique_name)
            })
            .map(|(name, _)| name.clone())
            .collect();

        for name in &held {
            self.release(name, unique_name);
        }
        held.len()
    }
}

/// Shared in-memory namespace.
///
/// Cloning yields another handle to the same namespace; every connection
/// made from any handle competes for the same names.
#[derive(Debug, Clone, Default)]
pub struct InProcessNamespace {
    state: Arc<Mutex<NamespaceState>>,
}

impl InProcessNamespace {
    /// Create a new, empty namespace.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, NamespaceState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Open a new connection with a fresh unique name.
    pub fn connect(&self) -> InProcessConnection {
        let unique_name = {
            let mut state = self.lock();
            state.next_serial += 1;
            format!(":1.{}", state.next_serial)
        };
        debug!(unique_name = %unique_name, "In-process connection opened");

        InProcessConnection {
            namespace: self.clone(),
            unique_name,
            connected: AtomicBool::new(true),
            fail_requests: AtomicBool::new(false),
        }
    }

    /// Current primary owner of `name`.
    pub fn owner_of(&self, name: &str) -> Option<String> {
        self.lock()
            .names
            .get(name)
            .map(|entry| entry.owner.unique_name.clone())
    }

    /// Connections waiting for `name`, in queue order.
    pub fn queued_for(&self, name: &str) -> Vec<String> {
        self.lock()
            .names
            .get(name)
            .map(|entry| entry.queue.iter().map(|c| c.unique_name.clone()).collect())
            .unwrap_or_default()
    }

    /// Number of names that currently have an owner.
    pub fn name_count(&self) -> usize {
        self.lock().names.len()
    }
}

/// Connection to an `InProcessNamespace`.
///
/// Dropping or disconnecting the connection releases everything it held.
pub struct InProcessConnection {
    namespace: InProcessNamespace,
    unique_name: String,
    connected: AtomicBool,
    fail_requests: AtomicBool,
}

impl InProcessConnection {
    /// Make every namespace call fail with an invalid-response error.
    pub fn set_fail_requests(&self, fail: bool) {
        self.fail_requests.store(fail, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(BusError::NotConnected);
        }
        if self.fail_requests.load(Ordering::SeqCst) {
            return Err(BusError::Protocol("Injected namespace failure".to_string()));
        }
        Ok(())
    }

    fn close(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            let dropped = self.namespace.lock().drop_connection(&self.unique_name);
            info!(
                unique_name = %self.unique_name,
                names_dropped = dropped,
                "In-process connection closed"
            );
        }
    }
}

#[async_trait]
impl NameBus for InProcessConnection {
    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn unique_name(&self) -> Result<String> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(BusError::NotConnected);
        }
        Ok(self.unique_name.clone())
    }

    async fn request_name(
        &self,
        name: &str,
        flags: RequestNameFlags,
    ) -> Result<RequestNameReply> {
        self.check()?;
        let reply = self.namespace.lock().request(name, &self.unique_name, flags);
        debug!(name = %name, requester = %self.unique_name, reply = ?reply, "RequestName");
        Ok(reply)
    }

    async fn release_name(&self, name: &str) -> Result<ReleaseNameReply> {
        self.check()?;
        let reply = self.namespace.lock().release(name, &self.unique_name);
        debug!(name = %name, requester = %self.unique_name, reply = ?reply, "ReleaseName");
        Ok(reply)
    }

    async fn name_owner(&self, name: &str) -> Result<Option<String>> {
        self.check()?;
        Ok(self.namespace.owner_of(name))
    }

    async fn disconnect(&self) {
        self.close();
    }
}

impl Drop for InProcessConnection {
    fn drop(&mut self) {
        self.close();
    }
}
