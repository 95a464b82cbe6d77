use crate::config::{ConfigError, ProjectConfig, ProjectStore};
use crate::environment::{EnvLoadReport, ProjectEnvironments};
use chrono::{DateTime, Utc};
use ptymux_channels::{
    Channel, ChannelResult, EnvOverlay, MultiplexerManager, ProcessChannel, SerialChannel,
    SocketChannel, TerminalChannel,
};
use ptymux_types::{ActiveProject, ChannelKind, ReadTimeouts};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// What `cleanup_all` did
#[derive(Debug, Default, Serialize)]
pub struct CleanupReport {
    pub closed: Vec<ChannelKind>,
    pub failures: Vec<CleanupFailure>,
    pub forgotten_multiplexer_sessions: usize,
}

#[derive(Debug, Serialize)]
pub struct CleanupFailure {
    pub channel: ChannelKind,
    pub error: String,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChannelStatus {
    pub kind: ChannelKind,
    pub active: bool,
    pub details: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub channels: Vec<ChannelStatus>,
    pub multiplexer_binary: String,
    pub tracked_multiplexer_sessions: Vec<String>,
    pub active_project: Option<ActiveProject>,
    pub started_at: DateTime<Utc>,
}

/// Owns every live channel for the lifetime of the server.
///
/// At most one channel per `ChannelKind`; slots are created lazily and
/// cleared when a channel is closed through `close_channel`.
pub struct SessionManager {
    terminal: Option<TerminalChannel>,
    process: Option<ProcessChannel>,
    socket: Option<SocketChannel>,
    serial: Option<SerialChannel>,
    multiplexer: Option<MultiplexerManager>,
    multiplexer_binary: String,
    multiplexer_socket: Option<String>,
    store: Box<dyn ProjectStore>,
    config: ProjectConfig,
    active_project: Option<ActiveProject>,
    environments: ProjectEnvironments,
    session_env: EnvOverlay,
    timeouts: ReadTimeouts,
    started_at: DateTime<Utc>,
}

impl fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("terminal", &self.terminal.is_some())
            .field("process", &self.process.is_some())
            .field("socket", &self.socket.is_some())
            .field("serial", &self.serial.is_some())
            .field("multiplexer", &self.multiplexer.is_some())
            .field("active_project", &self.active_project)
            .finish()
    }
}

impl SessionManager {
    /// Load project configuration from `store` and restore the active
    /// project if it is still registered.
    pub fn new(store: Box<dyn ProjectStore>) -> Result<Self, ConfigError> {
        let config = store.load()?;
        let active_project = config.active.as_ref().and_then(|name| {
            config.projects.get(name).map(|path| ActiveProject {
                name: name.clone(),
                path: path.clone(),
            })
        });

        let mut manager = Self {
            terminal: None,
            process: None,
            socket: None,
            serial: None,
            multiplexer: None,
            multiplexer_binary: ptymux_channels::tmux::DEFAULT_MULTIPLEXER.to_string(),
            multiplexer_socket: None,
            store,
            config,
            active_project,
            environments: ProjectEnvironments::new(),
            session_env: EnvOverlay::new(),
            timeouts: ReadTimeouts::default(),
            started_at: Utc::now(),
        };

        if let Some(project) = manager.active_project.clone() {
            if let Err(e) = manager.environments.load(&project.name, &project.path) {
                warn!(project = %project.name, error = %e, "failed to load project environment");
            }
        }
        Ok(manager)
    }

    pub fn with_multiplexer(mut self, binary: impl Into<String>, socket_name: Option<String>) -> Self {
        self.multiplexer_binary = binary.into();
        self.multiplexer_socket = socket_name;
        self
    }

    pub fn with_timeouts(mut self, timeouts: ReadTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn timeouts(&self) -> &ReadTimeouts {
        &self.timeouts
    }

    // ------------------------------------------------------------------
    // Channel slots
    // ------------------------------------------------------------------

    pub fn terminal(&mut self) -> &mut TerminalChannel {
        self.terminal.get_or_insert_with(TerminalChannel::new)
    }

    pub fn process(&mut self) -> &mut ProcessChannel {
        self.process.get_or_insert_with(ProcessChannel::new)
    }

    pub fn socket(&mut self) -> &mut SocketChannel {
        self.socket.get_or_insert_with(SocketChannel::new)
    }

    pub fn serial(&mut self) -> &mut SerialChannel {
        self.serial.get_or_insert_with(SerialChannel::new)
    }

    pub fn multiplexer(&mut self) -> &mut MultiplexerManager {
        let binary = &self.multiplexer_binary;
        let socket = &self.multiplexer_socket;
        self.multiplexer
            .get_or_insert_with(|| MultiplexerManager::new(binary.clone()).with_socket_name(socket.clone()))
    }

    /// Get-or-create the slot for `kind` behind the common trait
    pub fn channel_mut(&mut self, kind: ChannelKind) -> &mut dyn Channel {
        match kind {
            ChannelKind::Terminal => self.terminal(),
            ChannelKind::Process => self.process(),
            ChannelKind::Socket => self.socket(),
            ChannelKind::Serial => self.serial(),
        }
    }

    /// The slot for `kind` if it was ever created, without creating it
    pub fn existing_channel(&mut self, kind: ChannelKind) -> Option<&mut dyn Channel> {
        match kind {
            ChannelKind::Terminal => self.terminal.as_mut().map(|c| c as &mut dyn Channel),
            ChannelKind::Process => self.process.as_mut().map(|c| c as &mut dyn Channel),
            ChannelKind::Socket => self.socket.as_mut().map(|c| c as &mut dyn Channel),
            ChannelKind::Serial => self.serial.as_mut().map(|c| c as &mut dyn Channel),
        }
    }

    pub fn has_channel(&self, kind: ChannelKind) -> bool {
        match kind {
            ChannelKind::Terminal => self.terminal.is_some(),
            ChannelKind::Process => self.process.is_some(),
            ChannelKind::Socket => self.socket.is_some(),
            ChannelKind::Serial => self.serial.is_some(),
        }
    }

    fn take_channel(&mut self, kind: ChannelKind) -> Option<Box<dyn Channel>> {
        match kind {
            ChannelKind::Terminal => self.terminal.take().map(|c| Box::new(c) as Box<dyn Channel>),
            ChannelKind::Process => self.process.take().map(|c| Box::new(c) as Box<dyn Channel>),
            ChannelKind::Socket => self.socket.take().map(|c| Box::new(c) as Box<dyn Channel>),
            ChannelKind::Serial => self.serial.take().map(|c| Box::new(c) as Box<dyn Channel>),
        }
    }

    /// Close the channel for `kind` and clear its slot.
    /// The slot is cleared even when close reports an error.
    pub async fn close_channel(&mut self, kind: ChannelKind) -> ChannelResult<bool> {
        match self.take_channel(kind) {
            Some(mut channel) => {
                channel.close().await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Close and clear every slot whose channel is no longer active
    pub async fn prune_inactive(&mut self) -> Vec<ChannelKind> {
        let mut pruned = Vec::new();
        for kind in ChannelKind::ALL {
            let inactive = self
                .existing_channel(kind)
                .map(|c| !c.is_active())
                .unwrap_or(false);
            if inactive {
                if let Err(e) = self.close_channel(kind).await {
                    warn!(channel = %kind, error = %e, "failed to release stale channel");
                }
                pruned.push(kind);
            }
        }
        pruned
    }

    /// Close everything this manager holds. Never fails; problems are
    /// collected in the report and the remaining channels are still closed.
    pub async fn cleanup_all(&mut self) -> CleanupReport {
        let mut report = CleanupReport::default();

        for kind in ChannelKind::ALL {
            match self.close_channel(kind).await {
                Ok(true) => report.closed.push(kind),
                Ok(false) => {}
                Err(e) => {
                    warn!(channel = %kind, error = %e, "cleanup failed");
                    report.failures.push(CleanupFailure {
                        channel: kind,
                        error: e.to_string(),
                    });
                }
            }
        }

        if let Some(mut multiplexer) = self.multiplexer.take() {
            report.forgotten_multiplexer_sessions = multiplexer.tracked().len();
            multiplexer.cleanup_all();
        }

        info!(closed = report.closed.len(), failures = report.failures.len(), "session cleanup finished");
        report
    }

    pub fn status(&mut self) -> SessionStatus {
        let mut channels = Vec::new();
        for kind in ChannelKind::ALL {
            if let Some(channel) = self.existing_channel(kind) {
                channels.push(ChannelStatus {
                    kind,
                    active: channel.is_active(),
                    details: channel.describe(),
                });
            }
        }

        let mut tracked: Vec<String> = self
            .multiplexer
            .as_ref()
            .map(|m| m.tracked().keys().cloned().collect())
            .unwrap_or_default();
        tracked.sort();

        SessionStatus {
            channels,
            multiplexer_binary: self.multiplexer_binary.clone(),
            tracked_multiplexer_sessions: tracked,
            active_project: self.active_project.clone(),
            started_at: self.started_at,
        }
    }

    // ------------------------------------------------------------------
    // Projects
    // ------------------------------------------------------------------

    pub fn active_project(&self) -> Option<&ActiveProject> {
        self.active_project.as_ref()
    }

    pub fn project_config(&self) -> &ProjectConfig {
        &self.config
    }

    /// Add or replace a project and persist the registry
    pub fn register_project(&mut self, name: &str, path: impl Into<PathBuf>) -> Result<(), ConfigError> {
        self.config.projects.insert(name.to_string(), path.into());
        self.store.save(&self.config)
    }

    /// Make `name` the active project: its path becomes the default working
    /// directory and its `.env` joins the spawn environment.
    pub fn set_active_project(&mut self, name: &str) -> Result<EnvLoadReport, ConfigError> {
        let path = self
            .config
            .projects
            .get(name)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownProject {
                name: name.to_string(),
                available: self.config.projects.keys().cloned().collect::<Vec<_>>().join(", "),
            })?;
        if !path.exists() {
            return Err(ConfigError::MissingPath(path));
        }

        self.config.active = Some(name.to_string());
        self.store.save(&self.config)?;
        let report = self.environments.load(name, &path)?;

        info!(project = name, path = %path.display(), "project activated");
        self.active_project = Some(ActiveProject {
            name: name.to_string(),
            path,
        });
        Ok(report)
    }

    /// Explicit directory, else the active project path, else our own cwd
    pub fn working_dir_for(&self, explicit: Option<&str>) -> PathBuf {
        if let Some(dir) = explicit.filter(|d| !d.is_empty()) {
            return PathBuf::from(dir);
        }
        if let Some(project) = &self.active_project {
            return project.path.clone();
        }
        std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
    }

    pub fn environments(&self) -> &ProjectEnvironments {
        &self.environments
    }

    pub fn load_project_environment(&mut self, name: &str, path: &Path) -> Result<EnvLoadReport, ConfigError> {
        self.environments.load(name, path)
    }

    // ------------------------------------------------------------------
    // Environment overlay
    // ------------------------------------------------------------------

    /// Variables applied to every child: active project first, then
    /// session-level overrides.
    pub fn spawn_env(&self) -> EnvOverlay {
        let mut env = self
            .active_project
            .as_ref()
            .and_then(|p| self.environments.get(&p.name))
            .cloned()
            .unwrap_or_default();
        env.extend(&self.session_env);
        env
    }

    pub fn session_env(&self) -> &EnvOverlay {
        &self.session_env
    }

    pub fn set_env_var(&mut self, key: &str, value: &str) {
        self.session_env.set(key, value);
    }

    /// Remove a session-level override. Inherited and project variables are
    /// unaffected.
    pub fn unset_env_var(&mut self, key: &str) -> Option<String> {
        self.session_env.remove(key)
    }

    /// Value a spawned child would see for `key`
    pub fn env_value(&self, key: &str) -> Option<String> {
        self.spawn_env()
            .get(key)
            .map(str::to_string)
            .or_else(|| std::env::var(key).ok())
    }

    /// Every variable a spawned child would see
    pub fn effective_env(&self) -> BTreeMap<String, String> {
        let mut merged: BTreeMap<String, String> = std::env::vars().collect();
        for (key, value) in self.spawn_env().iter() {
            merged.insert(key.to_string(), value.to_string());
        }
        merged
    }
}
