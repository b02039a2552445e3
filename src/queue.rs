//! queue.rs
//!
//! Redis-backed vote queue client: connect with retry, non-blocking pop from
//! the `votes` list, and a cheap liveness flag the relay loop consults before
//! each poll.

use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, RedisError};
use serde::Deserialize;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::config::RetryPolicy;
use crate::errors::RelayError;

/// Name of the Redis list the producers push votes onto.
pub const VOTES_QUEUE: &str = "votes";

/// A single vote as produced on the wire: flat JSON, no envelope,
/// no version field. Unknown fields are ignored; missing ones are rejected.
#[derive(Debug, Clone, Deserialize)]
pub struct VoteEvent {
    pub voter_id: String,
    pub vote: String,
}

impl VoteEvent {
    /// Parse a raw queue payload into a `VoteEvent`.
    ///
    /// Both fields are required and must be non-empty. There is no schema
    /// versioning on this queue, so a payload we cannot read is unrecoverable
    /// and surfaces as a fatal error.
    pub fn parse(payload: &str) -> Result<Self, RelayError> {
        let event: VoteEvent = serde_json::from_str(payload)
            .map_err(|e| RelayError::MalformedPayload(payload.to_string(), e))?;

        if event.voter_id.is_empty() {
            return Err(RelayError::InvalidEvent("empty voter_id".into()));
        }
        if event.vote.is_empty() {
            return Err(RelayError::InvalidEvent("empty vote".into()));
        }

        Ok(event)
    }
}

/// Whether a Redis error means the connection itself is gone
/// (as opposed to a genuine command failure).
fn connection_lost(err: &RedisError) -> bool {
    err.is_io_error()
        || err.is_connection_dropped()
        || err.is_connection_refusal()
        || err.is_timeout()
}

/// Owned handle to the vote queue. The relay loop holds exactly one of these
/// and replaces it wholesale on reconnect.
#[derive(Debug)]
pub struct QueueClient {
    conn: MultiplexedConnection,
    alive: bool,
}

impl QueueClient {
    /// Connect to the queue, retrying with the policy's fixed backoff until
    /// the server accepts us and answers a PING.
    ///
    /// With an unbounded policy this only ever delays, never fails — except
    /// for an unparseable URL, which is a configuration error and returns
    /// immediately.
    pub async fn connect(url: &str, retry: &RetryPolicy) -> Result<Self, RelayError> {
        let client = redis::Client::open(url)?;
        let mut attempts: u32 = 0;

        loop {
            info!(%url, "Connecting to Redis");
            match Self::open_connection(&client).await {
                Ok(conn) => {
                    info!("Connected to Redis");
                    return Ok(QueueClient { conn, alive: true });
                }
                Err(e) => {
                    attempts += 1;
                    if let Some(max) = retry.max_attempts {
                        if attempts >= max {
                            return Err(RelayError::RetriesExhausted(
                                "queue",
                                attempts,
                                Box::new(e.into()),
                            ));
                        }
                    }
                    warn!(error = %e, "Waiting for Redis");
                    sleep(retry.backoff).await;
                }
            }
        }
    }

    async fn open_connection(client: &redis::Client) -> Result<MultiplexedConnection, RedisError> {
        let mut conn = client.get_multiplexed_async_connection().await?;
        // Round-trip a PING so we never hand back a half-open connection.
        let _pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(conn)
    }

    /// Non-blocking liveness check. Flips to `false` when an operation fails
    /// with a connection-level error; the relay reconnects before the next poll.
    pub fn is_alive(&self) -> bool {
        self.alive
    }

    /// Pop one vote off the head of the queue.
    ///
    /// Returns `Ok(None)` immediately when the queue is empty. A payload that
    /// does not parse is fatal; a connection-level failure marks this handle
    /// dead and surfaces the error for the relay to treat as reconnect-needed.
    pub async fn pop_event(&mut self) -> Result<Option<VoteEvent>, RelayError> {
        let payload: Option<String> = match self.conn.lpop(VOTES_QUEUE, None).await {
            Ok(payload) => payload,
            Err(e) => {
                if connection_lost(&e) {
                    self.alive = false;
                }
                return Err(e.into());
            }
        };

        match payload {
            Some(raw) => VoteEvent::parse(&raw).map(Some),
            None => Ok(None),
        }
    }
}
