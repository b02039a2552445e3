//! relay.rs
//!
//! The steady-state relay loop: poll the queue for one vote, upsert it, and
//! keep the database connection warm while the queue is idle. Owns both
//! connection handles and the reconnect policy for each.

use tokio::time::interval;
use tracing::{info, warn};

use crate::config::Settings;
use crate::errors::RelayError;
use crate::metrics::{DB_RECONNECTS, QUEUE_RECONNECTS, VOTES_COUNTER};
use crate::queue::QueueClient;
use crate::store::RecordStore;

/// The relay owns exactly one handle to each external service. Handles are
/// replaced wholesale on reconnect, never shared, so no locking is involved.
pub struct Relay {
    settings: Settings,
    queue: QueueClient,
    store: RecordStore,
}

impl Relay {
    /// Establish both outbound connections, database first, retrying each
    /// with the configured backoff until it succeeds.
    pub async fn connect(settings: Settings) -> Result<Self, RelayError> {
        let retry = settings.retry_policy();
        let store = RecordStore::connect(&settings.database_url, &retry).await?;
        let queue = QueueClient::connect(&settings.queue_url, &retry).await?;
        Ok(Relay { settings, queue, store })
    }

    /// Run the relay until a fatal error.
    ///
    /// Each iteration: pace, reconnect the queue if its handle died, pop one
    /// event. An event is upserted (reconnecting the database first if
    /// needed); an empty poll turns into a keep-alive ping instead, so idle
    /// periods don't silently drop the database connection.
    ///
    /// Connection-level failures are never fatal — the handle is marked dead
    /// and re-established on a later iteration. Everything else (malformed
    /// payloads, unexpected database errors) propagates out of this function
    /// and takes the process down.
    pub async fn run(mut self) -> Result<(), RelayError> {
        let retry = self.settings.retry_policy();
        let mut ticker = interval(self.settings.poll_interval);

        loop {
            ticker.tick().await;

            if !self.queue.is_alive() {
                info!("Reconnecting to Redis");
                QUEUE_RECONNECTS.inc();
                self.queue = QueueClient::connect(&self.settings.queue_url, &retry).await?;
            }

            let event = match self.queue.pop_event().await {
                Ok(event) => event,
                Err(e) if !self.queue.is_alive() => {
                    warn!(error = %e, "Lost queue connection");
                    continue;
                }
                Err(e) => return Err(e),
            };

            match event {
                Some(vote) => {
                    info!(
                        voter_id = %vote.voter_id,
                        vote = %vote.vote,
                        "Processing vote"
                    );

                    if !self.store.is_alive() {
                        info!("Reconnecting to Postgres");
                        DB_RECONNECTS.inc();
                        self.store =
                            RecordStore::connect(&self.settings.database_url, &retry).await?;
                    }

                    match self.store.upsert_vote(&vote.voter_id, &vote.vote).await {
                        Ok(()) => VOTES_COUNTER.inc(),
                        Err(e) if !self.store.is_alive() => {
                            // The queue already removed this event; without
                            // exactly-once delivery the vote is dropped and
                            // the connection re-established next iteration.
                            warn!(error = %e, "Lost database connection during upsert");
                        }
                        Err(e) => return Err(e),
                    }
                }
                None => {
                    // Idle. Keep the database connection warm; a handle that
                    // is already dead reconnects on the next event instead.
                    if self.store.is_alive() {
                        match self.store.ping().await {
                            Ok(()) => {}
                            Err(e) if !self.store.is_alive() => {
                                warn!(error = %e, "Lost database connection during keep-alive");
                            }
                            Err(e) => return Err(e),
                        }
                    }
                }
            }
        }
    }
}
