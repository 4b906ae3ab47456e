//! Shell-backed terminal manager.
//!
//! Terminals are keyed by `(cwd, name)`; a keyed mutex guarantees at most
//! one live terminal per key. Output accumulates in a bounded ring buffer
//! (replayed to new subscribers) and fans out on a broadcast channel. The
//! manager owns no child processes directly — each spawn creates background
//! tasks that write into the shared state.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::sync::{broadcast, mpsc};

use paseo_domain::{Error, Result};

/// Frames fanned out to terminal subscribers.
#[derive(Debug, Clone)]
pub enum TerminalFrame {
    Output(Vec<u8>),
    Exited(Option<i32>),
}

/// Summary of a terminal for list responses.
#[derive(Debug, Clone, Serialize)]
pub struct TerminalSummary {
    pub terminal_id: String,
    pub cwd: PathBuf,
    pub name: String,
    pub running: bool,
    pub created_at: DateTime<Utc>,
}

/// Bounded byte ring for terminal scrollback.
#[derive(Debug)]
struct OutputRing {
    bytes: Vec<u8>,
    max_bytes: usize,
}

impl OutputRing {
    fn new(max_bytes: usize) -> Self {
        Self {
            bytes: Vec::new(),
            max_bytes,
        }
    }

    fn push(&mut self, chunk: &[u8]) {
        self.bytes.extend_from_slice(chunk);
        if self.bytes.len() > self.max_bytes {
            let keep = self.max_bytes * 3 / 4;
            let mut drain = self.bytes.len() - keep;
            // Step past UTF-8 continuation bytes so a multi-byte sequence
            // straddling the trim point is dropped whole, not split.
            while drain < self.bytes.len() && (self.bytes[drain] & 0xC0) == 0x80 {
                drain += 1;
            }
            self.bytes.drain(..drain);
        }
    }

    fn snapshot(&self) -> Vec<u8> {
        self.bytes.clone()
    }
}

#[derive(Debug)]
struct TerminalState {
    running: bool,
    exit_code: Option<i32>,
}

/// One live (or recently exited) terminal.
#[derive(Debug)]
pub struct Terminal {
    pub id: String,
    pub cwd: PathBuf,
    pub name: String,
    pub created_at: DateTime<Utc>,
    state: RwLock<TerminalState>,
    output: Mutex<OutputRing>,
    events: broadcast::Sender<TerminalFrame>,
    stdin_tx: mpsc::Sender<Vec<u8>>,
    kill_tx: mpsc::Sender<()>,
}

impl Terminal {
    pub fn running(&self) -> bool {
        self.state.read().running
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.state.read().exit_code
    }

    fn summary(&self) -> TerminalSummary {
        TerminalSummary {
            terminal_id: self.id.clone(),
            cwd: self.cwd.clone(),
            name: self.name.clone(),
            running: self.running(),
            created_at: self.created_at,
        }
    }
}

const OUTPUT_RING_BYTES: usize = 256 * 1024;
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Registry of terminals, keyed by id with a `(cwd, name)` uniqueness map.
pub struct TerminalManager {
    terminals: RwLock<HashMap<String, Arc<Terminal>>>,
    /// Per-key creation locks so concurrent creates for the same `(cwd,
    /// name)` collapse to one terminal.
    create_locks: Mutex<HashMap<(PathBuf, String), Arc<tokio::sync::Mutex<()>>>>,
}

impl TerminalManager {
    pub fn new() -> Self {
        Self {
            terminals: RwLock::new(HashMap::new()),
            create_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Create (or return the existing live) terminal for `(cwd, name)`.
    pub async fn create(&self, cwd: &Path, name: &str) -> Result<Arc<Terminal>> {
        if !cwd.is_dir() {
            return Err(Error::BadRequest(format!(
                "cwd does not exist: {}",
                cwd.display()
            )));
        }

        let key = (cwd.to_path_buf(), name.to_string());
        let lock = {
            let mut locks = self.create_locks.lock();
            locks
                .entry(key.clone())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        let _guard = lock.lock().await;

        if let Some(existing) = self.find(cwd, name) {
            if existing.running() {
                return Ok(existing);
            }
            // Exited terminal under the same key gets replaced.
            self.terminals.write().remove(&existing.id);
        }

        let terminal = self.spawn_terminal(cwd, name).await?;
        self.terminals
            .write()
            .insert(terminal.id.clone(), terminal.clone());
        tracing::info!(
            terminal_id = %terminal.id,
            cwd = %cwd.display(),
            name = %name,
            "terminal created"
        );
        Ok(terminal)
    }

    async fn spawn_terminal(&self, cwd: &Path, name: &str) -> Result<Arc<Terminal>> {
        let shell = std::env::var("SHELL").unwrap_or_else(|_| "sh".to_string());
        let mut cmd = Command::new(shell);
        cmd.arg("-i")
            .current_dir(cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(Error::Io)?;

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (stdin_tx, mut stdin_rx) = mpsc::channel::<Vec<u8>>(64);
        let (kill_tx, mut kill_rx) = mpsc::channel::<()>(1);

        let terminal = Arc::new(Terminal {
            id: uuid::Uuid::new_v4().to_string(),
            cwd: cwd.to_path_buf(),
            name: name.to_string(),
            created_at: Utc::now(),
            state: RwLock::new(TerminalState {
                running: true,
                exit_code: None,
            }),
            output: Mutex::new(OutputRing::new(OUTPUT_RING_BYTES)),
            events,
            stdin_tx,
            kill_tx,
        });

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let mut stdin = child.stdin.take();

        // Stdin writer.
        tokio::spawn(async move {
            while let Some(data) = stdin_rx.recv().await {
                let Some(pipe) = stdin.as_mut() else { break };
                if pipe.write_all(&data).await.is_err() {
                    break;
                }
                let _ = pipe.flush().await;
            }
        });

        // Output readers.
        if let Some(stdout) = stdout {
            tokio::spawn(pump_output(stdout, terminal.clone()));
        }
        if let Some(stderr) = stderr {
            tokio::spawn(pump_output(stderr, terminal.clone()));
        }

        // Waiter: reap the child, honor kill requests.
        let waiter = terminal.clone();
        tokio::spawn(async move {
            let exit_code = tokio::select! {
                status = child.wait() => status.ok().and_then(|s| s.code()),
                _ = kill_rx.recv() => {
                    let _ = child.kill().await;
                    child.wait().await.ok().and_then(|s| s.code())
                }
            };

            {
                let mut state = waiter.state.write();
                state.running = false;
                state.exit_code = exit_code;
            }
            let _ = waiter.events.send(TerminalFrame::Exited(exit_code));
            tracing::info!(
                terminal_id = %waiter.id,
                exit_code = ?exit_code,
                "terminal exited"
            );
        });

        Ok(terminal)
    }

    pub fn get(&self, terminal_id: &str) -> Option<Arc<Terminal>> {
        self.terminals.read().get(terminal_id).cloned()
    }

    fn find(&self, cwd: &Path, name: &str) -> Option<Arc<Terminal>> {
        self.terminals
            .read()
            .values()
            .find(|t| t.cwd == cwd && t.name == name)
            .cloned()
    }

    /// List terminals, optionally restricted to one cwd.
    pub fn list(&self, cwd: Option<&Path>) -> Vec<TerminalSummary> {
        let mut out: Vec<TerminalSummary> = self
            .terminals
            .read()
            .values()
            .filter(|t| cwd.map_or(true, |c| t.cwd == c))
            .map(|t| t.summary())
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        out
    }

    /// Subscribe to a terminal. Returns the scrollback so far plus a live
    /// event receiver.
    pub fn subscribe(
        &self,
        terminal_id: &str,
    ) -> Option<(Vec<u8>, broadcast::Receiver<TerminalFrame>)> {
        let terminal = self.get(terminal_id)?;
        let history = terminal.output.lock().snapshot();
        Some((history, terminal.events.subscribe()))
    }

    /// Write bytes to a terminal's stdin. Fire-and-forget.
    pub async fn input(&self, terminal_id: &str, data: Vec<u8>) -> bool {
        match self.get(terminal_id) {
            Some(t) if t.running() => t.stdin_tx.send(data).await.is_ok(),
            _ => false,
        }
    }

    /// Kill a terminal. Returns whether a running terminal was signalled.
    pub fn kill(&self, terminal_id: &str) -> bool {
        match self.get(terminal_id) {
            Some(t) if t.running() => t.kill_tx.try_send(()).is_ok(),
            _ => false,
        }
    }

    /// Drop exited terminals from the registry.
    pub fn prune_exited(&self) -> usize {
        let mut terminals = self.terminals.write();
        let before = terminals.len();
        terminals.retain(|_, t| t.running());
        before - terminals.len()
    }
}

impl Default for TerminalManager {
    fn default() -> Self {
        Self::new()
    }
}

async fn pump_output(mut pipe: impl tokio::io::AsyncRead + Unpin, terminal: Arc<Terminal>) {
    let mut buf = [0u8; 4096];
    loop {
        match pipe.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let chunk = buf[..n].to_vec();
                terminal.output.lock().push(&chunk);
                let _ = terminal.events.send(TerminalFrame::Output(chunk));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn wait_for_output(
        rx: &mut broadcast::Receiver<TerminalFrame>,
        needle: &str,
    ) -> bool {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        let mut seen = Vec::new();
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return false;
            }
            match tokio::time::timeout(remaining, rx.recv()).await {
                Ok(Ok(TerminalFrame::Output(chunk))) => {
                    seen.extend_from_slice(&chunk);
                    if String::from_utf8_lossy(&seen).contains(needle) {
                        return true;
                    }
                }
                Ok(Ok(TerminalFrame::Exited(_))) => {
                    return String::from_utf8_lossy(&seen).contains(needle);
                }
                _ => return false,
            }
        }
    }

    #[tokio::test]
    async fn create_is_keyed_by_cwd_and_name() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = TerminalManager::new();

        let t1 = mgr.create(dir.path(), "build").await.unwrap();
        let t2 = mgr.create(dir.path(), "build").await.unwrap();
        assert_eq!(t1.id, t2.id);

        let t3 = mgr.create(dir.path(), "logs").await.unwrap();
        assert_ne!(t1.id, t3.id);
        assert_eq!(mgr.list(Some(dir.path())).len(), 2);

        mgr.kill(&t1.id);
        mgr.kill(&t3.id);
    }

    #[tokio::test]
    async fn echo_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = TerminalManager::new();

        let term = mgr.create(dir.path(), "t").await.unwrap();
        let (_, mut rx) = mgr.subscribe(&term.id).unwrap();

        assert!(mgr.input(&term.id, b"echo terminal_says_hi\n".to_vec()).await);
        assert!(wait_for_output(&mut rx, "terminal_says_hi").await);

        mgr.kill(&term.id);
    }

    #[tokio::test]
    async fn kill_marks_exited() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = TerminalManager::new();

        let term = mgr.create(dir.path(), "doomed").await.unwrap();
        let (_, mut rx) = mgr.subscribe(&term.id).unwrap();
        assert!(mgr.kill(&term.id));

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            assert!(!remaining.is_zero(), "terminal never exited");
            match tokio::time::timeout(remaining, rx.recv()).await {
                Ok(Ok(TerminalFrame::Exited(_))) => break,
                Ok(Ok(_)) => continue,
                other => panic!("unexpected: {other:?}"),
            }
        }
        assert!(!term.running());
        assert_eq!(mgr.prune_exited(), 1);
    }

    #[tokio::test]
    async fn create_rejects_missing_cwd() {
        let mgr = TerminalManager::new();
        let err = mgr
            .create(Path::new("/definitely/not/here"), "x")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BadRequest(_)));
    }

    #[test]
    fn output_ring_trims_front() {
        let mut ring = OutputRing::new(100);
        ring.push(&[b'a'; 80]);
        ring.push(&[b'b'; 80]);
        assert!(ring.bytes.len() <= 100);
        // The tail is intact.
        assert!(ring.snapshot().ends_with(&[b'b'; 75]));
    }

    #[test]
    fn output_ring_never_splits_multibyte_sequences() {
        let mut ring = OutputRing::new(100);
        // Two-byte chars guarantee the raw trim offset lands inside a
        // sequence at some point.
        let chunk = "é".repeat(30); // 60 bytes
        ring.push(chunk.as_bytes());
        ring.push(chunk.as_bytes());

        assert!(ring.bytes.len() <= 100);
        let text = String::from_utf8(ring.snapshot()).expect("ring split a UTF-8 sequence");
        assert!(text.chars().all(|c| c == 'é'));
    }
}
