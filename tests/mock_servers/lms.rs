//! Mock LMS (Logitech Media Server) for testing
//!
//! Simulates the line-oriented CLI on a random TCP port: percent-escaped
//! tokens, one reply line per request line, replies echo the request.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

/// Mock player state
#[derive(Debug, Clone)]
pub struct MockPlayer {
    pub playerid: String,
    pub name: String,
    pub power: bool,
    pub mode: String, // "play", "pause", "stop"
    pub volume: i32,
    pub playlist: Vec<String>,
    pub index: usize,
    pub remote_title: Option<String>,
}

impl MockPlayer {
    pub fn new(playerid: &str, name: &str) -> Self {
        Self {
            playerid: playerid.to_string(),
            name: name.to_string(),
            power: true,
            mode: "stop".to_string(),
            volume: 50,
            playlist: Vec::new(),
            index: 0,
            remote_title: None,
        }
    }
}

/// Mock LMS server state
struct MockLmsState {
    players: Vec<MockPlayer>,
    /// Raw request lines in arrival order
    requests: Vec<String>,
    /// Read requests but never reply
    muted: bool,
}

/// Mock LMS CLI Server
pub struct MockLmsServer {
    addr: SocketAddr,
    state: Arc<RwLock<MockLmsState>>,
    clients: Arc<Mutex<Vec<JoinHandle<()>>>>,
    accepted: Arc<AtomicUsize>,
    handle: JoinHandle<()>,
}

impl MockLmsServer {
    /// Start a mock LMS CLI server on a random port
    pub async fn start() -> Self {
        let state = Arc::new(RwLock::new(MockLmsState {
            players: Vec::new(),
            requests: Vec::new(),
            muted: false,
        }));
        let clients: Arc<Mutex<Vec<JoinHandle<()>>>> = Arc::new(Mutex::new(Vec::new()));
        let accepted = Arc::new(AtomicUsize::new(0));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = {
            let state = state.clone();
            let clients = clients.clone();
            let accepted = accepted.clone();
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    accepted.fetch_add(1, Ordering::SeqCst);
                    let client = tokio::spawn(handle_client(stream, state.clone()));
                    clients.lock().await.push(client);
                }
            })
        };

        Self {
            addr,
            state,
            clients,
            accepted,
            handle,
        }
    }

    /// Get the server address
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Number of CLI connections accepted so far
    pub fn connections(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    /// Add a player to the mock server
    pub async fn add_player(&self, playerid: &str, name: &str) {
        let mut state = self.state.write().await;
        state.players.push(MockPlayer::new(playerid, name));
    }

    /// Set player mode (play/pause/stop)
    pub async fn set_mode(&self, playerid: &str, mode: &str) {
        self.update(playerid, |p| p.mode = mode.to_string()).await;
    }

    /// Set player volume (0-100)
    pub async fn set_volume(&self, playerid: &str, volume: i32) {
        self.update(playerid, |p| p.volume = volume.clamp(0, 100)).await;
    }

    /// Set the playlist titles
    pub async fn set_playlist(&self, playerid: &str, titles: &[&str]) {
        let titles: Vec<String> = titles.iter().map(|t| t.to_string()).collect();
        self.update(playerid, |p| p.playlist = titles).await;
    }

    /// Set streamed remote metadata title
    pub async fn set_remote_title(&self, playerid: &str, title: &str) {
        self.update(playerid, |p| p.remote_title = Some(title.to_string()))
            .await;
    }

    pub async fn player(&self, playerid: &str) -> Option<MockPlayer> {
        let state = self.state.read().await;
        state.players.iter().find(|p| p.playerid == playerid).cloned()
    }

    /// Stop replying (requests are still read and logged)
    pub async fn set_muted(&self, muted: bool) {
        self.state.write().await.muted = muted;
    }

    /// Raw request lines received so far
    pub async fn requests(&self) -> Vec<String> {
        self.state.read().await.requests.clone()
    }

    /// Close every open client connection; the listener keeps accepting
    pub async fn drop_clients(&self) {
        for client in self.clients.lock().await.drain(..) {
            client.abort();
            let _ = client.await;
        }
    }

    /// Stop the mock server
    pub async fn stop(self) {
        self.handle.abort();
        let _ = self.handle.await;
        for client in self.clients.lock().await.drain(..) {
            client.abort();
            let _ = client.await;
        }
    }

    async fn update(&self, playerid: &str, f: impl FnOnce(&mut MockPlayer)) {
        let mut state = self.state.write().await;
        if let Some(player) = state.players.iter_mut().find(|p| p.playerid == playerid) {
            f(player);
        }
    }
}

async fn handle_client(stream: TcpStream, state: Arc<RwLock<MockLmsState>>) {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        let reply = {
            let mut state = state.write().await;
            state.requests.push(line.clone());
            if state.muted {
                continue;
            }
            let tokens: Vec<String> = line
                .split_ascii_whitespace()
                .map(|t| urlencoding::decode(t).unwrap().into_owned())
                .collect();
            respond(&mut state, tokens)
        };

        let encoded: Vec<String> = reply
            .iter()
            .map(|t| urlencoding::encode(t).into_owned())
            .collect();
        let framed = format!("{}\n", encoded.join(" "));
        if writer.write_all(framed.as_bytes()).await.is_err() {
            break;
        }
    }
}

/// Build the reply tokens for one request
fn respond(state: &mut MockLmsState, tokens: Vec<String>) -> Vec<String> {
    let words: Vec<&str> = tokens.iter().map(String::as_str).collect();
    let mut reply = tokens.clone();

    match words.as_slice() {
        ["player", "count", "?"] => {
            reply[2] = state.players.len().to_string();
        }
        ["player", "id", index, "?"] => {
            if let Some(p) = index.parse::<usize>().ok().and_then(|i| state.players.get(i)) {
                reply[3] = p.playerid.clone();
            }
        }
        ["player", "name", index, "?"] => {
            if let Some(p) = index.parse::<usize>().ok().and_then(|i| state.players.get(i)) {
                reply[3] = p.name.clone();
            }
        }
        [id, "status", "-", "1"] => {
            if let Some(p) = state.players.iter().find(|p| p.playerid == *id) {
                reply.extend(status_body(p));
            }
        }
        [id, rest @ ..] => {
            if let Some(p) = state.players.iter_mut().find(|p| p.playerid == *id) {
                apply(p, rest);
            }
        }
        [] => {}
    }

    reply
}

fn status_body(p: &MockPlayer) -> Vec<String> {
    let mut body = vec![
        "player_name".to_string(),
        p.name.clone(),
        "power".to_string(),
        if p.power { "1" } else { "0" }.to_string(),
        "mode".to_string(),
        p.mode.clone(),
        "mixer volume".to_string(),
        p.volume.to_string(),
        "playlist repeat".to_string(),
        "0".to_string(),
        "playlist_tracks".to_string(),
        p.playlist.len().to_string(),
    ];

    if let Some(title) = &p.remote_title {
        body.extend([
            "remoteMeta".to_string(),
            "title".to_string(),
            title.clone(),
            "remoteMeta_end".to_string(),
        ]);
    }

    for (i, title) in p.playlist.iter().enumerate() {
        body.extend([
            "playlist index".to_string(),
            i.to_string(),
            "title".to_string(),
            title.clone(),
        ]);
    }

    body
}

fn apply(p: &mut MockPlayer, command: &[&str]) {
    match command {
        ["play"] => p.mode = "play".to_string(),
        ["pause", "1"] => p.mode = "pause".to_string(),
        ["pause", "0"] => p.mode = "play".to_string(),
        ["power", v] => p.power = *v == "1",
        ["mixer", "volume", delta] => {
            if let Ok(d) = delta.parse::<i32>() {
                p.volume = if delta.starts_with(['+', '-']) {
                    (p.volume + d).clamp(0, 100)
                } else {
                    d.clamp(0, 100)
                };
            }
        }
        ["playlist", "index", delta] => {
            if let Ok(d) = delta.parse::<i64>() {
                let len = p.playlist.len().max(1) as i64;
                p.index = (p.index as i64 + d).rem_euclid(len) as usize;
            }
        }
        _ => {}
    }
}
