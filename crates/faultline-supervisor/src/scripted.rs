//! Scripted spawner
//!
//! Hands out in-memory peers instead of real processes, one script per role.

use std::collections::HashMap;
use std::sync::Arc;

use faultline_channel::scripted::{self, Script, ScriptedPeer};
use faultline_channel::Transcript;

use crate::error::LaunchFailure;
use crate::process::{ProcessHandle, ProcessRole};
use crate::spawner::{LaunchSpec, Spawner};
use crate::Result;

#[derive(Default)]
pub struct ScriptedSpawner {
    scripts: HashMap<ProcessRole, Script>,
    failures: HashMap<ProcessRole, LaunchFailure>,
    peers: HashMap<ProcessRole, Arc<ScriptedPeer>>,
    launches: Vec<LaunchSpec>,
}

impl ScriptedSpawner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script(mut self, role: ProcessRole, script: Script) -> Self {
        self.scripts.insert(role, script);
        self
    }

    /// Make every spawn for `role` fail
    pub fn failing(mut self, role: ProcessRole, failure: LaunchFailure) -> Self {
        self.failures.insert(role, failure);
        self
    }

    pub fn is_running(&self, role: ProcessRole) -> bool {
        self.peers.get(&role).map_or(false, |p| p.is_running())
    }

    /// Lines the peer for `role` has read so far
    pub fn received(&self, role: ProcessRole) -> Vec<String> {
        self.peers
            .get(&role)
            .map(|p| p.received())
            .unwrap_or_default()
    }

    /// Every spec this spawner was asked to start
    pub fn launches(&self) -> &[LaunchSpec] {
        &self.launches
    }
}

impl Spawner for ScriptedSpawner {
    async fn spawn(&mut self, spec: LaunchSpec, transcript: Transcript) -> Result<ProcessHandle> {
        let role = spec.role;
        self.launches.push(spec);

        if let Some(failure) = self.failures.get(&role) {
            return Err(failure.clone().into());
        }

        let script = self.scripts.get(&role).cloned().unwrap_or_default();
        let (channel, peer) = scripted::channel(role.channel_name(), script, transcript);
        let peer = Arc::new(peer);
        self.peers.insert(role, Arc::clone(&peer));

        tracing::debug!(role = %role, "Spawned scripted peer");

        let probe = Arc::clone(&peer);
        Ok(ProcessHandle::in_memory(
            role,
            channel,
            move || probe.is_running(),
            move || peer.stop(),
        ))
    }
}
