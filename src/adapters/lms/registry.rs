//! Player registry: human names ↔ native player ids
//!
//! Native ids are the hardware-address form LMS uses on the wire
//! (`00:04:20:aa:bb:cc`). The reserved `ALL` name always maps to the
//! configured broadcast target. Resolution reads an immutable snapshot;
//! `refresh` builds a complete new snapshot and swaps it in, so readers see
//! either the old mapping or the new one, never a partial one.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

use super::codec::{Command, QUERY};
use super::connection::Connection;
use super::error::{LmsError, Result};

/// Reserved human identifier addressing every player
pub const BROADCAST_NAME: &str = "ALL";
/// Default native target for [`BROADCAST_NAME`]
pub const DEFAULT_BROADCAST_TARGET: &str = "ALL";

/// A player identifier as received at the boundary
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PlayerId {
    Broadcast,
    /// Hardware-address form
    Native(String),
    Name(String),
}

impl PlayerId {
    pub fn parse(identifier: &str) -> Self {
        if identifier == BROADCAST_NAME {
            Self::Broadcast
        } else if is_hardware_address(identifier) {
            Self::Native(identifier.to_string())
        } else {
            Self::Name(identifier.to_string())
        }
    }
}

/// `xx:xx:xx:xx:xx:xx` with hex digits
pub fn is_hardware_address(s: &str) -> bool {
    let groups: Vec<&str> = s.split(':').collect();
    groups.len() == 6
        && groups
            .iter()
            .all(|g| g.len() == 2 && g.bytes().all(|b| b.is_ascii_hexdigit()))
}

#[derive(Debug, Clone)]
struct Snapshot {
    by_name: BTreeMap<String, String>,
    by_native: HashMap<String, String>,
}

impl Snapshot {
    fn with_broadcast(target: &str) -> Self {
        let mut snapshot = Self {
            by_name: BTreeMap::new(),
            by_native: HashMap::new(),
        };
        snapshot.insert(BROADCAST_NAME.to_string(), target.to_string());
        snapshot
    }

    /// Returns false when either side is already registered
    fn insert(&mut self, name: String, native: String) -> bool {
        if self.by_name.contains_key(&name) || self.by_native.contains_key(&native) {
            return false;
        }
        self.by_native.insert(native.clone(), name.clone());
        self.by_name.insert(name, native);
        true
    }
}

pub struct PlayerRegistry {
    broadcast_target: String,
    snapshot: RwLock<Arc<Snapshot>>,
}

impl Default for PlayerRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_BROADCAST_TARGET)
    }
}

impl PlayerRegistry {
    pub fn new(broadcast_target: impl Into<String>) -> Self {
        let broadcast_target = broadcast_target.into();
        let snapshot = Arc::new(Snapshot::with_broadcast(&broadcast_target));
        Self {
            broadcast_target,
            snapshot: RwLock::new(snapshot),
        }
    }

    pub fn broadcast_target(&self) -> &str {
        &self.broadcast_target
    }

    fn current(&self) -> Arc<Snapshot> {
        match self.snapshot.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn replace(&self, snapshot: Snapshot) {
        let snapshot = Arc::new(snapshot);
        match self.snapshot.write() {
            Ok(mut guard) => *guard = snapshot,
            Err(poisoned) => *poisoned.into_inner() = snapshot,
        }
    }

    /// Rebuild the mapping from the server.
    ///
    /// Sends `player count ?`, then `player id <i> ?` and `player name <i> ?`
    /// per index. On any error the previous mapping stays in place.
    pub async fn refresh(&self, connection: &Connection) -> Result<()> {
        let count_cmd = Command::new("player").args(["count", QUERY]);
        let reply = connection.request(&count_cmd).await?;
        let raw_count = count_cmd.query_value(&reply)?;
        let count: usize = raw_count.parse().map_err(|_| {
            LmsError::protocol(format!("player count '{}' is not a number", raw_count))
        })?;

        let mut snapshot = Snapshot::with_broadcast(&self.broadcast_target);

        for index in 0..count {
            let index = index.to_string();

            let id_cmd = Command::new("player").args(["id", index.as_str(), QUERY]);
            let reply = connection.request(&id_cmd).await?;
            let native = id_cmd.query_value(&reply)?.to_string();

            let name_cmd = Command::new("player").args(["name", index.as_str(), QUERY]);
            let reply = connection.request(&name_cmd).await?;
            let mut name = name_cmd.query_value(&reply)?.to_string();

            if name.is_empty() || name == BROADCAST_NAME {
                warn!(
                    "Player {} has reserved or empty name '{}', registering by id",
                    native, name
                );
                name = native.clone();
            }

            if !snapshot.insert(name.clone(), native.clone()) {
                warn!("Skipping duplicate player '{}' ({})", name, native);
                continue;
            }
            debug!("Registered LMS player '{}' -> {}", name, native);
        }

        info!("LMS player registry refreshed: {} players", count);
        self.replace(snapshot);
        Ok(())
    }

    /// Map a human name, native id or `ALL` to the native id
    pub fn resolve(&self, identifier: &str) -> Result<String> {
        self.resolve_id(&PlayerId::parse(identifier))
    }

    pub fn resolve_id(&self, id: &PlayerId) -> Result<String> {
        let snapshot = self.current();
        let (primary, fallback) = match id {
            PlayerId::Broadcast => return Ok(self.broadcast_target.clone()),
            // Native ids that were never registered may still be a player's name
            PlayerId::Native(native) => (
                snapshot.by_native.get_key_value(native).map(|(k, _)| k),
                snapshot.by_name.get(native),
            ),
            // Names may also be native ids not in hardware-address form
            PlayerId::Name(name) => (
                snapshot.by_name.get(name),
                snapshot.by_native.get_key_value(name).map(|(k, _)| k),
            ),
        };

        primary
            .or(fallback)
            .cloned()
            .ok_or_else(|| LmsError::NotFound(self.not_found_message(id, &snapshot)))
    }

    /// Accept only an already-native id (including the broadcast target)
    pub fn resolve_native(&self, native: &str) -> Result<String> {
        let snapshot = self.current();
        if snapshot.by_native.contains_key(native) {
            Ok(native.to_string())
        } else {
            let known: Vec<&str> = snapshot.by_name.values().map(String::as_str).collect();
            Err(LmsError::NotFound(format!(
                "'{}'; player must be one of {:?}",
                native, known
            )))
        }
    }

    /// Human name registered for a native id
    pub fn name_of(&self, native: &str) -> Option<String> {
        self.current().by_native.get(native).cloned()
    }

    /// Human name → native id, including `ALL`
    pub fn players(&self) -> BTreeMap<String, String> {
        self.current().by_name.clone()
    }

    fn not_found_message(&self, id: &PlayerId, snapshot: &Snapshot) -> String {
        let identifier = match id {
            PlayerId::Broadcast => BROADCAST_NAME,
            PlayerId::Native(s) | PlayerId::Name(s) => s.as_str(),
        };
        let known: Vec<&str> = snapshot.by_name.keys().map(String::as_str).collect();
        format!("'{}'; player must be one of {:?}", identifier, known)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::lms::connection::testing::ScriptedConnector;
    use std::time::Duration;
    use tokio_test::io::{Builder, Mock};

    fn two_player_server() -> Mock {
        Builder::new()
            .write(b"player count %3F\n")
            .read(b"player count 2\n")
            .write(b"player id 0 %3F\n")
            .read(b"player id 0 aa%3Abb%3Acc%3Add%3Aee%3A01\n")
            .write(b"player name 0 %3F\n")
            .read(b"player name 0 Kitchen\n")
            .write(b"player id 1 %3F\n")
            .read(b"player id 1 aa%3Abb%3Acc%3Add%3Aee%3A02\n")
            .write(b"player name 1 %3F\n")
            .read(b"player name 1 Lounge\n")
            .build()
    }

    fn connection(connector: ScriptedConnector) -> Connection {
        Connection::new(connector, Duration::from_millis(500))
    }

    #[test]
    fn parses_identifier_forms() {
        assert_eq!(PlayerId::parse("ALL"), PlayerId::Broadcast);
        assert_eq!(
            PlayerId::parse("00:04:20:AA:bb:cc"),
            PlayerId::Native("00:04:20:AA:bb:cc".to_string())
        );
        assert_eq!(PlayerId::parse("Kitchen"), PlayerId::Name("Kitchen".to_string()));
        assert_eq!(PlayerId::parse("all"), PlayerId::Name("all".to_string()));
        assert!(!is_hardware_address("00:04:20:aa:bb"));
        assert!(!is_hardware_address("00:04:20:aa:bb:zz"));
    }

    #[test]
    fn broadcast_entry_exists_before_refresh() {
        let registry = PlayerRegistry::default();
        assert_eq!(registry.resolve("ALL").unwrap(), DEFAULT_BROADCAST_TARGET);
        assert_eq!(registry.players().len(), 1);
    }

    #[tokio::test]
    async fn refresh_builds_name_and_native_maps() {
        let conn = connection(ScriptedConnector::new().accept(two_player_server()));
        let registry = PlayerRegistry::new("ALL");
        registry.refresh(&conn).await.unwrap();

        let players = registry.players();
        assert_eq!(players.len(), 3);
        assert_eq!(players["Kitchen"], "aa:bb:cc:dd:ee:01");
        assert_eq!(players["Lounge"], "aa:bb:cc:dd:ee:02");
        assert_eq!(players["ALL"], "ALL");

        assert_eq!(registry.resolve("Kitchen").unwrap(), "aa:bb:cc:dd:ee:01");
        assert_eq!(registry.resolve("aa:bb:cc:dd:ee:02").unwrap(), "aa:bb:cc:dd:ee:02");
        assert_eq!(registry.name_of("aa:bb:cc:dd:ee:02").as_deref(), Some("Lounge"));
    }

    #[tokio::test]
    async fn resolve_is_idempotent_between_refreshes() {
        let conn = connection(ScriptedConnector::new().accept(two_player_server()));
        let registry = PlayerRegistry::default();
        registry.refresh(&conn).await.unwrap();

        let first = registry.resolve("Lounge").unwrap();
        for _ in 0..5 {
            assert_eq!(registry.resolve("Lounge").unwrap(), first);
        }
    }

    #[tokio::test]
    async fn zero_players_still_registers_broadcast() {
        let mock = Builder::new()
            .write(b"player count %3F\n")
            .read(b"player count 0\n")
            .build();
        let conn = connection(ScriptedConnector::new().accept(mock));
        let registry = PlayerRegistry::new("*");
        registry.refresh(&conn).await.unwrap();

        assert_eq!(registry.resolve("ALL").unwrap(), "*");
        assert_eq!(registry.players().len(), 1);
    }

    #[tokio::test]
    async fn failed_refresh_keeps_previous_mapping() {
        let broken = Builder::new()
            .write(b"player count %3F\n")
            .read(b"player count 1\n")
            .write(b"player id 0 %3F\n")
            .read(b"player count 1\n")
            .build();
        let conn = connection(
            ScriptedConnector::new()
                .accept(two_player_server())
                .accept(broken),
        );
        let registry = PlayerRegistry::default();
        registry.refresh(&conn).await.unwrap();

        // Second refresh fails mid-way on a misattributed reply
        conn.restart().await.unwrap();
        let err = registry.refresh(&conn).await.unwrap_err();
        assert!(matches!(err, LmsError::Protocol(_)));
        assert_eq!(registry.resolve("Kitchen").unwrap(), "aa:bb:cc:dd:ee:01");
        assert_eq!(registry.players().len(), 3);
    }

    #[tokio::test]
    async fn unknown_identifier_is_not_found() {
        let registry = PlayerRegistry::default();
        assert!(matches!(
            registry.resolve("nonexistent"),
            Err(LmsError::NotFound(_))
        ));
        assert!(matches!(
            registry.resolve("aa:bb:cc:dd:ee:99"),
            Err(LmsError::NotFound(_))
        ));
        assert!(matches!(
            registry.resolve_native("Kitchen"),
            Err(LmsError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn reserved_and_duplicate_names_are_handled() {
        let mock = Builder::new()
            .write(b"player count %3F\n")
            .read(b"player count 3\n")
            .write(b"player id 0 %3F\n")
            .read(b"player id 0 aa%3Abb%3Acc%3Add%3Aee%3A01\n")
            .write(b"player name 0 %3F\n")
            .read(b"player name 0 ALL\n")
            .write(b"player id 1 %3F\n")
            .read(b"player id 1 aa%3Abb%3Acc%3Add%3Aee%3A02\n")
            .write(b"player name 1 %3F\n")
            .read(b"player name 1 Den\n")
            .write(b"player id 2 %3F\n")
            .read(b"player id 2 aa%3Abb%3Acc%3Add%3Aee%3A03\n")
            .write(b"player name 2 %3F\n")
            .read(b"player name 2 Den\n")
            .build();
        let conn = connection(ScriptedConnector::new().accept(mock));
        let registry = PlayerRegistry::default();
        registry.refresh(&conn).await.unwrap();

        let players = registry.players();
        assert_eq!(players["ALL"], DEFAULT_BROADCAST_TARGET);
        assert_eq!(players["aa:bb:cc:dd:ee:01"], "aa:bb:cc:dd:ee:01");
        assert_eq!(players["Den"], "aa:bb:cc:dd:ee:02");
        assert!(registry.resolve("aa:bb:cc:dd:ee:03").is_err());
    }

    #[tokio::test]
    async fn resolve_native_accepts_registered_ids_only() {
        let conn = connection(ScriptedConnector::new().accept(two_player_server()));
        let registry = PlayerRegistry::default();
        registry.refresh(&conn).await.unwrap();

        assert_eq!(
            registry.resolve_native("aa:bb:cc:dd:ee:01").unwrap(),
            "aa:bb:cc:dd:ee:01"
        );
        assert_eq!(registry.resolve_native("ALL").unwrap(), "ALL");
    }
}
