//! HTTP endpoint streaming a log's raw lines.

use crate::config::ServerConfig;
use crate::error::{ReplicationError, ReplicationResult};
use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use bytes::Bytes;
use keeldb_core::log::line;
use keeldb_core::{LogEntry, Micros, Stream, StreamHead};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Body of `GET /status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponse {
    /// Number of entries.
    pub size: u64,
    /// Head timestamp.
    pub head: Micros,
    /// Whether the served stream accepts local appends.
    pub master: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LogQuery {
    from: u64,
    follow: bool,
}

struct ServerState<E> {
    stream: Stream<E>,
    config: ServerConfig,
    closing: Arc<watch::Sender<bool>>,
}

/// Builds the log router for `stream`.
///
/// Use this to nest the endpoints into a larger axum application. Follow
/// connections opened through this router only end when the client
/// disconnects; [`LogServer`] also closes them on shutdown.
pub fn router<E: LogEntry>(stream: Stream<E>, config: &ServerConfig) -> Router {
    let (closing, _) = watch::channel(false);
    build_router(stream, config.clone(), Arc::new(closing))
}

fn build_router<E: LogEntry>(
    stream: Stream<E>,
    config: ServerConfig,
    closing: Arc<watch::Sender<bool>>,
) -> Router {
    let state = Arc::new(ServerState {
        stream,
        config,
        closing,
    });

    Router::new()
        .route("/log", get(get_log::<E>))
        .route("/status", get(get_status::<E>))
        .with_state(state)
}

async fn get_status<E: LogEntry>(State(state): State<Arc<ServerState<E>>>) -> Json<StatusResponse> {
    let StreamHead { size, head } = state.stream.status();
    Json(StatusResponse {
        size,
        head,
        master: state.stream.is_master(),
    })
}

async fn get_log<E: LogEntry>(
    State(state): State<Arc<ServerState<E>>>,
    Query(query): Query<LogQuery>,
) -> Response {
    let size = state.stream.size();
    if query.from > size {
        return (
            StatusCode::BAD_REQUEST,
            format!("from {} is past the end of the log ({size} entries)", query.from),
        )
            .into_response();
    }

    tracing::debug!(from = query.from, follow = query.follow, "log stream opened");
    let tail = Tail {
        stream: state.stream.clone(),
        head_rx: state.stream.watch_head(),
        closing: state.closing.subscribe(),
        next: query.from,
        sent_head: 0,
        follow: query.follow,
        head_interval: state.config.head_interval,
        max_lines: state.config.max_chunk_lines.max(1),
        done: false,
    };
    let body = Body::from_stream(futures::stream::unfold(tail, |mut tail| async move {
        tail.next_chunk().await.map(|chunk| (chunk, tail))
    }));

    (
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        body,
    )
        .into_response()
}

/// Cursor of one `GET /log` response.
struct Tail<E> {
    stream: Stream<E>,
    head_rx: watch::Receiver<StreamHead>,
    closing: watch::Receiver<bool>,
    next: u64,
    sent_head: Micros,
    follow: bool,
    head_interval: Duration,
    max_lines: usize,
    done: bool,
}

impl<E: LogEntry> Tail<E> {
    async fn next_chunk(&mut self) -> Option<Result<Bytes, ReplicationError>> {
        if self.done {
            return None;
        }
        loop {
            if *self.closing.borrow() {
                return None;
            }
            // Anything published after this point wakes the wait below.
            let _ = self.head_rx.borrow_and_update();
            match self.collect() {
                Ok(chunk) if !chunk.is_empty() => return Some(Ok(Bytes::from(chunk))),
                Ok(_) => {}
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
            if !self.follow {
                return None;
            }

            tokio::select! {
                changed = self.head_rx.changed() => {
                    if changed.is_err() {
                        return None;
                    }
                }
                _ = self.closing.changed() => return None,
                () = tokio::time::sleep(self.head_interval) => {
                    let head = self.stream.head();
                    self.sent_head = self.sent_head.max(head);
                    return Some(Ok(Bytes::from(line::encode_head(head))));
                }
            }
        }
    }

    /// Raw lines from `next` on, or a head line once caught up.
    fn collect(&mut self) -> Result<String, ReplicationError> {
        let mut chunk = String::new();
        let mut lines = 0;
        while lines < self.max_lines {
            let Some((position, _)) = self.stream.get(self.next) else {
                break;
            };
            let Some(raw) = self.stream.raw_line(self.next)? else {
                break;
            };
            chunk.push_str(&raw);
            self.sent_head = self.sent_head.max(position.us);
            self.next += 1;
            lines += 1;
        }

        if lines == 0 {
            let status = self.stream.status();
            if status.size <= self.next && status.head > self.sent_head {
                self.sent_head = status.head;
                chunk.push_str(&line::encode_head(status.head));
            }
        }
        Ok(chunk)
    }
}

/// A running log server.
///
/// ```rust,ignore
/// let server = LogServer::bind(stream.clone(), ServerConfig::default()).await?;
/// println!("serving on {}", server.url());
/// server.shutdown().await?;
/// ```
pub struct LogServer {
    local_addr: SocketAddr,
    closing: Arc<watch::Sender<bool>>,
    handle: JoinHandle<std::io::Result<()>>,
}

impl LogServer {
    /// Binds `config.bind_addr` and serves `stream` on a background task.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn bind<E: LogEntry>(stream: Stream<E>, config: ServerConfig) -> ReplicationResult<Self> {
        let listener = TcpListener::bind(config.bind_addr).await?;
        let local_addr = listener.local_addr()?;
        let closing = Arc::new(watch::channel(false).0);
        let app = build_router(stream, config, Arc::clone(&closing));

        let mut closing_rx = closing.subscribe();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    while !*closing_rx.borrow_and_update() {
                        if closing_rx.changed().await.is_err() {
                            break;
                        }
                    }
                })
                .await
        });

        tracing::info!(%local_addr, "log server listening");
        Ok(Self {
            local_addr,
            closing,
            handle,
        })
    }

    /// Address actually bound, useful with port 0.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Base URL for a [`Replicator`](crate::Replicator).
    #[must_use]
    pub fn url(&self) -> String {
        format!("http://{}", self.local_addr)
    }

    /// Closes open log streams and stops accepting connections.
    ///
    /// # Errors
    ///
    /// Returns an error if the server task failed or panicked.
    pub async fn shutdown(self) -> ReplicationResult<()> {
        self.closing.send_replace(true);
        self.handle
            .await
            .map_err(|e| ReplicationError::Task(e.to_string()))??;
        tracing::info!(local_addr = %self.local_addr, "log server stopped");
        Ok(())
    }
}

impl fmt::Debug for LogServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogServer")
            .field("local_addr", &self.local_addr)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn tail(stream: &Stream<Value>, from: u64, max_lines: usize) -> Tail<Value> {
        let closing = watch::channel(false).1;
        Tail {
            stream: stream.clone(),
            head_rx: stream.watch_head(),
            closing,
            next: from,
            sent_head: 0,
            follow: false,
            head_interval: Duration::from_secs(1),
            max_lines,
            done: false,
        }
    }

    #[test]
    fn collect_respects_chunk_size() {
        let stream: Stream<Value> = Stream::in_memory();
        for i in 0..3 {
            stream.publish_at(json!(i), 10 + i).unwrap();
        }

        let mut tail = tail(&stream, 0, 2);
        let first = tail.collect().unwrap();
        assert_eq!(first.lines().count(), 2);
        let second = tail.collect().unwrap();
        assert_eq!(second, stream.raw_line(2).unwrap().unwrap());
        assert!(tail.collect().unwrap().is_empty());
    }

    #[test]
    fn collect_emits_head_once_caught_up() {
        let stream: Stream<Value> = Stream::in_memory();
        stream.publish_at(json!("a"), 10).unwrap();
        stream.update_head(25).unwrap();

        let mut tail = tail(&stream, 0, 16);
        assert_eq!(tail.collect().unwrap().lines().count(), 1);
        assert_eq!(tail.collect().unwrap(), "#head\t25\n");
        assert!(tail.collect().unwrap().is_empty());
    }

    #[tokio::test]
    async fn snapshot_ends_after_last_line() {
        let stream: Stream<Value> = Stream::in_memory();
        stream.publish_at(json!(1), 5).unwrap();

        let mut tail = tail(&stream, 0, 16);
        assert!(tail.next_chunk().await.is_some());
        assert!(tail.next_chunk().await.is_none());
    }
}
