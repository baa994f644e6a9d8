//! Control socket: server (during `loadify get`) and client (for `loadify pause` etc.).
//! Protocol: one request per line, "pause <id>", "resume <id>", "cancel <id>" or
//! "status". Control requests get one reply line ("ok <id> <STATE>" or
//! "error: <reason>"); status gets one JSON object per item. The server closes
//! the connection after the client shuts down its write half.

use anyhow::{bail, Context, Result};
use loadify_core::{DownloadManager, ItemId, ManagerError};
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlAction {
    Pause,
    Resume,
    Cancel,
}

impl ControlAction {
    pub fn verb(self) -> &'static str {
        match self {
            ControlAction::Pause => "pause",
            ControlAction::Resume => "resume",
            ControlAction::Cancel => "cancel",
        }
    }

    fn apply(self, manager: &DownloadManager, id: ItemId) -> Result<(), ManagerError> {
        match self {
            ControlAction::Pause => manager.pause(id),
            ControlAction::Resume => manager.resume(id),
            ControlAction::Cancel => manager.cancel(id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    Control(ControlAction, ItemId),
    Status,
}

/// Parses one request line. Returns the reply text for malformed input.
pub fn parse_request(line: &str) -> Result<Request, String> {
    let mut words = line.split_whitespace();
    let verb = words.next().unwrap_or_default();
    let action = match verb {
        "status" => return Ok(Request::Status),
        "pause" => ControlAction::Pause,
        "resume" => ControlAction::Resume,
        "cancel" => ControlAction::Cancel,
        "" => return Err("empty request".to_string()),
        other => return Err(format!("unknown command {:?}", other)),
    };
    let Some(raw_id) = words.next() else {
        return Err(format!("{} needs an item id", verb));
    };
    let id = raw_id.parse::<ItemId>().map_err(|e| e.to_string())?;
    Ok(Request::Control(action, id))
}

/// Reply lines for one request line.
pub fn answer(manager: &DownloadManager, line: &str) -> Vec<String> {
    match parse_request(line) {
        Ok(Request::Status) => manager
            .list()
            .iter()
            .filter_map(|item| serde_json::to_string(item).ok())
            .collect(),
        Ok(Request::Control(action, id)) => match action.apply(manager, id) {
            Ok(()) => {
                let state = manager
                    .get(id)
                    .map(|item| item.state.to_string())
                    .unwrap_or_default();
                tracing::info!(item = %id, "control socket: {}", action.verb());
                vec![format!("ok {} {}", id, state)]
            }
            Err(e) => vec![format!("error: {}", e)],
        },
        Err(reason) => vec![format!("error: {}", reason)],
    }
}

/// Binds `path` and spawns a task answering requests against `manager`.
/// Refuses to take over a socket another live `loadify get` is serving.
pub async fn spawn_control_listener(
    manager: Arc<DownloadManager>,
    path: impl AsRef<Path>,
) -> Result<tokio::task::JoinHandle<()>> {
    let path = path.as_ref().to_path_buf();
    if UnixStream::connect(&path).await.is_ok() {
        bail!("another loadify instance is listening on {}", path.display());
    }
    let _ = std::fs::remove_file(&path);
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    }
    let listener =
        UnixListener::bind(&path).with_context(|| format!("bind {}", path.display()))?;
    tracing::debug!(path = %path.display(), "control socket listening");

    let handle = tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let manager = Arc::clone(&manager);
                    tokio::spawn(async move {
                        if let Err(e) = serve(stream, &manager).await {
                            tracing::debug!("control connection: {}", e);
                        }
                    });
                }
                Err(e) => tracing::debug!("control socket accept: {}", e),
            }
        }
    });
    Ok(handle)
}

async fn serve(stream: UnixStream, manager: &DownloadManager) -> std::io::Result<()> {
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();
    while let Some(line) = lines.next_line().await? {
        for reply in answer(manager, line.trim()) {
            write.write_all(reply.as_bytes()).await?;
            write.write_all(b"\n").await?;
        }
    }
    write.shutdown().await
}

/// Sends one request line and collects every reply line.
pub async fn request(socket_path: &Path, line: &str) -> Result<Vec<String>> {
    let stream = UnixStream::connect(socket_path).await.with_context(|| {
        format!(
            "no running `loadify get` (control socket {})",
            socket_path.display()
        )
    })?;
    let (read, mut write) = stream.into_split();
    write.write_all(format!("{}\n", line).as_bytes()).await?;
    write.shutdown().await?;

    let mut replies = Vec::new();
    let mut lines = BufReader::new(read).lines();
    while let Some(reply) = lines.next_line().await? {
        replies.push(reply);
    }
    Ok(replies)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_control_requests() {
        assert_eq!(
            parse_request("pause dl_42"),
            Ok(Request::Control(ControlAction::Pause, ItemId::from(42)))
        );
        assert_eq!(
            parse_request("  cancel   7 "),
            Ok(Request::Control(ControlAction::Cancel, ItemId::from(7)))
        );
        assert_eq!(parse_request("status"), Ok(Request::Status));
    }

    #[test]
    fn rejects_malformed_requests() {
        assert!(parse_request("").is_err());
        assert!(parse_request("resume").unwrap_err().contains("needs an item id"));
        assert!(parse_request("pause dl_x").is_err());
        assert!(parse_request("explode 1").unwrap_err().contains("unknown command"));
    }

    #[tokio::test]
    async fn round_trip_over_the_socket() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("control.sock");
        let manager = Arc::new(
            DownloadManager::new(loadify_core::ManagerOptions::default(), None).unwrap(),
        );
        let handle = spawn_control_listener(Arc::clone(&manager), &socket)
            .await
            .unwrap();

        let replies = request(&socket, "status").await.unwrap();
        assert!(replies.is_empty());

        let replies = request(&socket, "pause dl_1").await.unwrap();
        assert_eq!(replies, vec!["error: unknown item dl_1".to_string()]);

        let err = spawn_control_listener(Arc::clone(&manager), &socket).await;
        assert!(err.is_err());
        handle.abort();
    }

    #[tokio::test]
    async fn client_reports_missing_server() {
        let dir = tempfile::tempdir().unwrap();
        let err = request(&dir.path().join("none.sock"), "status")
            .await
            .unwrap_err();
        assert!(format!("{:#}", err).contains("no running `loadify get`"));
    }
}
