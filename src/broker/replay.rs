//! Pass-through broker with on-demand replay
//!
//! Sits between an upstream message source and a downstream consumer of the
//! same stream. Every upstream message is forwarded unchanged and also kept
//! in an internal broker, so the current state of any topic can be injected
//! into the downstream stream later.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::config::BrokerConfig;
use crate::error::{BrokerError, Result};
use crate::msg::Msg;

use super::store::Broker;

pub struct ReplayBroker {
    broker: Arc<Broker>,
    replays: mpsc::Sender<Msg>,
}

impl ReplayBroker {
    /// Start piping `input` into the returned receiver
    ///
    /// The receiver ends once `input` is exhausted; the internal broker is
    /// shut down at that point.
    pub fn pipe(
        config: BrokerConfig,
        mut input: mpsc::Receiver<Msg>,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<Msg>) {
        let broker = Arc::new(Broker::new(config));
        let (out_tx, out_rx) = mpsc::channel(capacity.max(1));
        let (replays, mut replay_rx) = mpsc::channel::<Msg>(capacity.max(1));

        let pipe_broker = broker.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    msg = input.recv() => {
                        let Some(msg) = msg else {
                            break;
                        };
                        if pipe_broker.publish(msg.clone()).await.is_err() {
                            break;
                        }
                        if out_tx.send(msg).await.is_err() {
                            break;
                        }
                    }
                    Some(msg) = replay_rx.recv() => {
                        if out_tx.send(msg).await.is_err() {
                            break;
                        }
                    }
                }
            }

            tracing::debug!("Replay pipe finished");
            replay_rx.close();
            pipe_broker.shutdown().await;
        });

        (Self { broker, replays }, out_rx)
    }

    /// Inject the current state of `topic` (or of every topic for `""`/`"*"`)
    /// into the output stream
    pub async fn replay(&self, topic: &str) -> Result<()> {
        let msgs = self.broker.replay(topic).await?;
        for msg in msgs {
            self.replays
                .send(msg)
                .await
                .map_err(|_| BrokerError::Closed)?;
        }
        Ok(())
    }

    /// The broker holding the piped state
    pub fn broker(&self) -> &Broker {
        &self.broker
    }
}
