//! LMS (Logitech Media Server) CLI bridge
//!
//! Talks to the server's line-oriented CLI on TCP port 9090.
//! Documentation: http://HOST:9000/html/docs/cli-api.html
//!
//! ## Layers
//!
//! ```text
//! LmsController   resolve → dispatch → request → status query → parse
//!   ├─ PlayerRegistry   human name / native id / ALL  → native id
//!   ├─ Dispatcher       action name                    → Command
//!   ├─ Connection       one serialized session, one reconnect on loss
//!   └─ codec + status   wire escaping, status reply records
//! ```
//!
//! The CLI has no correlation ids, so every exchange goes through the single
//! `Connection` mutex. Nothing here caches player status: every read is a
//! fresh status query.

pub mod codec;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod registry;
pub mod status;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub use codec::Command;
pub use connection::{Connection, ConnectionState};
pub use dispatch::{Action, Dispatcher};
pub use error::{LmsError, Result};
pub use registry::{PlayerId, PlayerRegistry};
pub use status::{PlayerInfo, StatusSchema, StatusValue};

use codec::QUERY;

/// Controller settings fixed for the process lifetime
#[derive(Debug, Clone)]
pub struct ControllerOptions {
    pub broadcast_target: String,
    pub volume_step: u8,
    pub default_player: Option<String>,
    pub schema: StatusSchema,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            broadcast_target: registry::DEFAULT_BROADCAST_TARGET.to_string(),
            volume_step: dispatch::DEFAULT_VOLUME_STEP,
            default_player: None,
            schema: StatusSchema::default(),
        }
    }
}

/// The bridge's core boundary: player lookup, status reads and actions.
///
/// Cheap to clone; clones share the connection and registry.
#[derive(Clone)]
pub struct LmsController {
    connection: Connection,
    registry: Arc<PlayerRegistry>,
    dispatcher: Arc<Dispatcher>,
    schema: Arc<StatusSchema>,
    default_player: Option<String>,
}

impl LmsController {
    pub fn new(connection: Connection, options: ControllerOptions) -> Self {
        Self {
            connection,
            registry: Arc::new(PlayerRegistry::new(options.broadcast_target)),
            dispatcher: Arc::new(Dispatcher::new(options.volume_step)),
            schema: Arc::new(options.schema),
            default_player: options.default_player,
        }
    }

    pub async fn connect(&self) -> Result<()> {
        self.connection.connect().await
    }

    /// Rebuild the player registry and return the new mapping
    pub async fn refresh_players(&self) -> Result<BTreeMap<String, String>> {
        self.registry.refresh(&self.connection).await?;
        Ok(self.registry.players())
    }

    /// Reopen the session (leaving `Failed`) and refresh the registry
    pub async fn restart(&self) -> Result<BTreeMap<String, String>> {
        self.connection.restart().await?;
        self.refresh_players().await
    }

    /// Human name → native id, including `ALL`
    pub fn list_players(&self) -> BTreeMap<String, String> {
        self.registry.players()
    }

    pub fn player_name(&self, native: &str) -> Option<String> {
        self.registry.name_of(native)
    }

    pub fn default_player(&self) -> Option<&str> {
        self.default_player.as_deref()
    }

    /// Native id of the configured default player
    pub fn default_player_native(&self) -> Result<String> {
        let name = self.default_player.as_deref().ok_or_else(|| {
            LmsError::NotFound("no default player configured".to_string())
        })?;
        self.registry.resolve(name)
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn action_names(&self) -> Vec<&'static str> {
        self.dispatcher.action_names()
    }

    /// CLI endpoint as `host:port`
    pub fn endpoint(&self) -> String {
        self.connection.endpoint()
    }

    pub fn io_timeout(&self) -> Duration {
        self.connection.io_timeout()
    }

    pub fn volume_step(&self) -> u8 {
        self.dispatcher.volume_step()
    }

    /// Status of a player addressed by human name or native id
    pub async fn get_player_info(&self, identifier: &str) -> Result<PlayerInfo> {
        let native = self.registry.resolve(identifier)?;
        self.query_status(&native).await
    }

    /// Status of a player addressed by native id only
    pub async fn get_player_info_by_native(&self, native: &str) -> Result<PlayerInfo> {
        let native = self.registry.resolve_native(native)?;
        self.query_status(&native).await
    }

    /// Run an action, then return the player's fresh status
    pub async fn run_action(&self, identifier: &str, action_name: &str) -> Result<PlayerInfo> {
        let native = self.registry.resolve(identifier)?;
        self.execute(&native, action_name).await
    }

    pub async fn run_action_by_native(&self, native: &str, action_name: &str) -> Result<PlayerInfo> {
        let native = self.registry.resolve_native(native)?;
        self.execute(&native, action_name).await
    }

    /// Run an action on the configured default player
    pub async fn run_default_action(&self, action: Action) -> Result<PlayerInfo> {
        let native = self.default_player_native()?;
        self.execute(&native, action.route_name()).await
    }

    /// Cheap round trip proving the session is usable; returns the player count
    pub async fn health(&self) -> Result<usize> {
        if self.connection.state() == ConnectionState::Failed {
            return Err(LmsError::connection(format!(
                "connection to {} failed",
                self.connection.endpoint()
            )));
        }

        let cmd = Command::new("player").args(["count", QUERY]);
        let reply = self.connection.request(&cmd).await?;
        let count = cmd.query_value(&reply)?;
        count
            .parse()
            .map_err(|_| LmsError::protocol(format!("player count '{}' is not a number", count)))
    }

    async fn execute(&self, native: &str, action_name: &str) -> Result<PlayerInfo> {
        let command = self.dispatcher.dispatch(action_name, native)?;
        info!("LMS {} -> {}", action_name, command.tokens().join(" "));

        // The acknowledgement carries no status; the echo check proves it is ours
        self.connection.request(&command).await?;
        self.query_status(native).await
    }

    async fn query_status(&self, native: &str) -> Result<PlayerInfo> {
        let cmd = Command::for_player(native, "status").args(["-", "1"]);
        let reply = self.connection.request(&cmd).await?;
        let info = status::parse_status(&reply, cmd.tokens().len(), &self.schema)?;

        if info.is_empty() {
            warn!("LMS returned an empty status for {}", native);
        } else {
            debug!("LMS status for {}: {} fields", native, info.len());
        }
        Ok(info)
    }
}
