//! The broker: tree ownership, the command loop, and the upstream
//! lifecycle.
//!
//! All broker state lives on one task. Commands arrive on a channel, and
//! pending upstream actions drain between dispatches — the safe point at
//! which no listener or invoke is on the stack, so a poll and its entry
//! can be torn down without freeing state the current dispatch still
//! references.

use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use lattice_domain::{BrokerConfig, Error, Result};
use lattice_permission::{PermissionGroups, PermissionLevel};
use lattice_upstream::{
    PendingActions, PollTimers, UpstreamAction, UpstreamPoll, UpstreamSettings, UpstreamStore,
};

use crate::node::{BrokerNode, ChangeListener};
use crate::resolver;
use crate::sys;

const SYS_UPSTREAM_PATH: &str = "/sys/upstream";
const UPSTREAM_ROOT_PATH: &str = "/upstream";

/// The requester identity behind a command: the link's name on the tree
/// and the permission groups it asserted at session establishment.
#[derive(Debug, Clone)]
pub struct LinkSession {
    pub name: String,
    pub groups: PermissionGroups,
}

/// Commands the event loop accepts from link handlers.
#[derive(Debug)]
pub enum BrokerCommand {
    /// Write a node value; fires the node's change listener after commit.
    SetValue {
        path: String,
        value: Value,
        reply: Option<oneshot::Sender<Result<()>>>,
    },
    /// Invoke an action node (`add_connection`, `delete`).
    Invoke {
        path: String,
        params: Value,
        link: Option<LinkSession>,
        reply: Option<oneshot::Sender<Result<()>>>,
    },
    /// Resolve the effective permission level of a caller on a path.
    Resolve {
        path: String,
        groups: PermissionGroups,
        reply: oneshot::Sender<PermissionLevel>,
    },
}

pub struct Broker {
    root: BrokerNode,
    /// Live poll per upstream name. At most one per name; an entry whose
    /// poll was stopped simply has no slot here.
    polls: HashMap<String, UpstreamPoll>,
    pending: PendingActions,
    store: UpstreamStore,
    timers: PollTimers,
}

impl Broker {
    /// Build the tree, open storage, and materialize persisted upstream
    /// entries. Must run inside a tokio runtime: enabled entries start
    /// their polls immediately.
    pub fn new(config: &BrokerConfig) -> Result<Self> {
        let mut root = BrokerNode::new("");
        root.add_child(BrokerNode::new("sys"))
            .add_child(sys::build_upstream_parent());
        root.add_child(BrokerNode::new("upstream"));
        root.add_child(BrokerNode::new("downstream"));

        let store = UpstreamStore::open(&config.storage.root)?;
        let mut broker = Self {
            root,
            polls: HashMap::new(),
            pending: PendingActions::new(),
            store,
            timers: PollTimers::from(&config.upstream),
        };

        for settings in broker.store.load_all() {
            let name = settings.name.clone();
            if let Err(e) = broker.add_new_upstream(settings) {
                tracing::warn!(name = %name, error = %e, "skipping persisted upstream entry");
            }
        }
        Ok(broker)
    }

    pub fn root(&self) -> &BrokerNode {
        &self.root
    }

    pub fn root_mut(&mut self) -> &mut BrokerNode {
        &mut self.root
    }

    pub fn store(&self) -> &UpstreamStore {
        &self.store
    }

    pub fn has_poll(&self, name: &str) -> bool {
        self.polls.contains_key(name)
    }

    pub fn poll_count(&self) -> usize {
        self.polls.len()
    }

    pub fn entry_node(&self, name: &str) -> Option<&BrokerNode> {
        self.upstream_parent().child(name)
    }

    pub fn resolve_permission(&self, path: &str, caller: &PermissionGroups) -> PermissionLevel {
        resolver::resolve(path, &self.root, caller)
    }

    // ── command loop ─────────────────────────────────────────────────

    /// Run the event loop until every command sender is dropped. Pending
    /// actions drain after each dispatch, never during one.
    pub async fn run(mut self, mut commands: mpsc::Receiver<BrokerCommand>) {
        while let Some(command) = commands.recv().await {
            self.dispatch(command).await;
            // Safe point: no dispatch is on the stack.
            self.drain_pending().await;
        }
    }

    pub async fn dispatch(&mut self, command: BrokerCommand) {
        match command {
            BrokerCommand::SetValue { path, value, reply } => {
                let result = self.set_value(&path, value);
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                }
            }
            BrokerCommand::Invoke {
                path,
                params,
                link,
                reply,
            } => {
                let result = self.invoke(&path, &params, link.as_ref()).await;
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                }
            }
            BrokerCommand::Resolve { path, groups, reply } => {
                let _ = reply.send(self.resolve_permission(&path, &groups));
            }
        }
    }

    // ── value writes & listeners ─────────────────────────────────────

    /// Write a node value. The change listener (if any) fires after the
    /// write is committed, never during it.
    pub fn set_value(&mut self, path: &str, value: Value) -> Result<()> {
        let entry = upstream_entry_of(path);
        let node = self
            .root
            .get_path_mut(path)
            .ok_or_else(|| Error::InvalidParameter(format!("no such node: {path}")))?;
        let listener = node.update_value(value);

        match (listener, entry) {
            (Some(ChangeListener::UpstreamProperty), Some(entry)) => {
                self.upstream_prop_changed(&entry);
            }
            (Some(ChangeListener::UpstreamEnabled), Some(entry)) => {
                self.upstream_enable_changed(&entry);
            }
            _ => {}
        }
        Ok(())
    }

    fn upstream_prop_changed(&mut self, entry: &str) {
        if let Some(poll) = self.polls.get_mut(entry) {
            poll.set_pending_action(UpstreamAction::Reset);
            self.pending.schedule(entry);
            tracing::debug!(name = %entry, "upstream reset scheduled");
        } else if let Err(e) = self.rebuild_entry(entry) {
            tracing::warn!(name = %entry, error = %e, "failed to rebuild upstream entry");
        }
    }

    fn upstream_enable_changed(&mut self, entry: &str) {
        let Some(node) = self.upstream_parent().child(entry) else {
            return;
        };
        let snapshot = match sys::snapshot_entry(node) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!(name = %entry, error = %e, "entry has invalid settings");
                return;
            }
        };

        if snapshot.enabled {
            if let Some(poll) = self.polls.get_mut(entry) {
                // Re-enabled before the drain: supersede a scheduled stop
                // and keep the live poll.
                let _ = poll.take_pending_action();
            } else {
                self.polls
                    .insert(entry.to_owned(), UpstreamPoll::spawn(snapshot.clone(), self.timers.clone()));
                tracing::info!(name = %entry, "upstream poll started");
            }
        } else if let Some(poll) = self.polls.get_mut(entry) {
            poll.set_pending_action(UpstreamAction::Stop);
            self.pending.schedule(entry);
        }

        if let Err(e) = self.store.save(&snapshot) {
            tracing::warn!(name = %entry, error = %e, "failed to persist upstream entry");
        }
    }

    /// No live poll: apply edited properties by deleting the entry and
    /// recreating it from the current values, then re-save.
    fn rebuild_entry(&mut self, entry: &str) -> Result<()> {
        let node = self
            .upstream_parent()
            .child(entry)
            .ok_or_else(|| Error::InvalidParameter(format!("unknown upstream: {entry}")))?;
        let snapshot = sys::snapshot_entry(node)?;

        self.remove_runtime_node(entry);
        self.store.delete(entry);
        self.upstream_parent_mut().remove_child(entry);

        self.add_new_upstream(snapshot.clone())?;
        if let Err(e) = self.store.save(&snapshot) {
            tracing::warn!(name = %snapshot.name, error = %e, "failed to persist upstream entry");
        }
        Ok(())
    }

    // ── invokes ──────────────────────────────────────────────────────

    pub async fn invoke(
        &mut self,
        path: &str,
        params: &Value,
        link: Option<&LinkSession>,
    ) -> Result<()> {
        let node = self
            .root
            .get_path(path)
            .ok_or_else(|| Error::InvalidParameter(format!("no such node: {path}")))?;
        if node.meta("$invokable").is_none() {
            return Err(Error::InvalidParameter(format!("not invokable: {path}")));
        }

        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        match segments.as_slice() {
            ["sys", "upstream", sys::ADD_CONNECTION] => self.add_connection(params, link.is_some()),
            ["sys", "upstream", entry, sys::DELETE_ACTION] => {
                let entry = (*entry).to_owned();
                self.delete_entry(&entry, link).await
            }
            _ => Err(Error::InvalidParameter(format!("unknown action: {path}"))),
        }
    }

    /// `add_connection` — also the load path for persisted entries, which
    /// pass `from_link = false` to suppress the save side effect (the file
    /// just read is the source of truth).
    fn add_connection(&mut self, params: &Value, from_link: bool) -> Result<()> {
        let settings = UpstreamSettings::from_json(params)?;
        self.add_new_upstream(settings.clone())?;
        if from_link {
            if let Err(e) = self.store.save(&settings) {
                tracing::warn!(name = %settings.name, error = %e, "failed to persist upstream entry");
            }
        }
        Ok(())
    }

    fn add_new_upstream(&mut self, settings: UpstreamSettings) -> Result<()> {
        let parent = self.upstream_parent_mut();
        if parent.has_child(&settings.name) {
            return Err(Error::InvalidParameter(format!(
                "upstream `{}` already exists",
                settings.name
            )));
        }
        parent.add_child(sys::build_entry_node(&settings));
        self.ensure_runtime_node(&settings.name);

        tracing::info!(name = %settings.name, url = %settings.url, enabled = settings.enabled,
            "upstream added");

        if settings.enabled {
            let name = settings.name.clone();
            self.polls
                .insert(name, UpstreamPoll::spawn(settings, self.timers.clone()));
        }
        Ok(())
    }

    async fn delete_entry(&mut self, entry: &str, link: Option<&LinkSession>) -> Result<()> {
        if self.entry_node(entry).is_none() {
            return Err(Error::InvalidParameter(format!("unknown upstream: {entry}")));
        }

        if let Some(poll) = self.polls.get_mut(entry) {
            poll.set_pending_action(UpstreamAction::Delete);
            self.pending.schedule(entry);

            // The deferral protects the link driving the current dispatch.
            // A requester that is itself a *different* upstream is not that
            // link, so its target can go down right away.
            if let Some(link) = link {
                if link.name != entry && self.is_upstream_link(&link.name) {
                    self.apply_action(entry, UpstreamAction::Delete).await;
                }
            }
        } else {
            self.remove_entry_state(entry);
        }
        Ok(())
    }

    // ── pending actions ──────────────────────────────────────────────

    /// Apply every queued pending action. Runs at the safe point between
    /// command dispatches; names whose poll disappeared (or whose action
    /// was superseded) are skipped.
    pub async fn drain_pending(&mut self) {
        for name in self.pending.drain() {
            let Some(action) = self
                .polls
                .get_mut(&name)
                .and_then(UpstreamPoll::take_pending_action)
            else {
                continue;
            };
            self.apply_action(&name, action).await;
        }
    }

    async fn apply_action(&mut self, entry: &str, action: UpstreamAction) {
        let Some(poll) = self.polls.remove(entry) else {
            return;
        };
        // Teardown order: poll first, socket and ping with it, entry last.
        poll.shutdown().await;

        match action {
            UpstreamAction::Stop => {
                tracing::info!(name = %entry, "upstream poll stopped");
            }
            UpstreamAction::Delete => {
                self.remove_entry_state(entry);
            }
            UpstreamAction::Reset => {
                let snapshot = self
                    .entry_node(entry)
                    .ok_or_else(|| Error::InvalidParameter(format!("unknown upstream: {entry}")))
                    .and_then(sys::snapshot_entry);
                self.remove_entry_state(entry);

                match snapshot {
                    Ok(snapshot) => {
                        let name = snapshot.name.clone();
                        match self.add_new_upstream(snapshot.clone()) {
                            Ok(()) => {
                                if let Err(e) = self.store.save(&snapshot) {
                                    tracing::warn!(name = %name, error = %e,
                                        "failed to persist upstream entry");
                                }
                            }
                            Err(e) => {
                                tracing::warn!(name = %name, error = %e,
                                    "failed to recreate upstream after reset");
                            }
                        }
                    }
                    Err(e) => {
                        tracing::warn!(name = %entry, error = %e,
                            "upstream reset dropped entry with invalid settings");
                    }
                }
            }
        }
    }

    /// Remove the runtime node, the on-disk file, and the entry node.
    fn remove_entry_state(&mut self, entry: &str) {
        self.remove_runtime_node(entry);
        self.store.delete(entry);
        self.upstream_parent_mut().remove_child(entry);
        tracing::info!(name = %entry, "upstream deleted");
    }

    // ── tree helpers ─────────────────────────────────────────────────

    fn upstream_parent(&self) -> &BrokerNode {
        self.root
            .get_path(SYS_UPSTREAM_PATH)
            .expect("sys upstream subtree is built at startup")
    }

    fn upstream_parent_mut(&mut self) -> &mut BrokerNode {
        self.root
            .get_path_mut(SYS_UPSTREAM_PATH)
            .expect("sys upstream subtree is built at startup")
    }

    fn ensure_runtime_node(&mut self, name: &str) {
        let upstream_root = self
            .root
            .get_path_mut(UPSTREAM_ROOT_PATH)
            .expect("upstream subtree is built at startup");
        if !upstream_root.has_child(name) {
            upstream_root.add_child(BrokerNode::new_downstream(name));
        }
    }

    fn remove_runtime_node(&mut self, name: &str) {
        if let Some(upstream_root) = self.root.get_path_mut(UPSTREAM_ROOT_PATH) {
            upstream_root.remove_child(name);
        }
    }

    fn is_upstream_link(&self, name: &str) -> bool {
        self.root
            .get_path(UPSTREAM_ROOT_PATH)
            .map(|node| node.has_child(name))
            .unwrap_or(false)
    }
}

/// For `/sys/upstream/<entry>/<prop>`, the entry name.
fn upstream_entry_of(path: &str) -> Option<String> {
    let mut segments = path.strip_prefix('/')?.split('/').filter(|s| !s.is_empty());
    if segments.next() != Some("sys") || segments.next() != Some("upstream") {
        return None;
    }
    let entry = segments.next()?;
    let _prop = segments.next()?;
    segments.next().is_none().then(|| entry.to_owned())
}
