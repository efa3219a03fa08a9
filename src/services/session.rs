//! The classification session: one actor task owns all session state.
//!
//! Callers talk to it through a [`SessionHandle`]. Gateway calls run on the
//! blocking pool and report back through the same command channel, so state
//! transitions and history appends are applied one at a time, in the order
//! the gateway calls resolve.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot, watch};

use crate::config::AppConfig;
use crate::error::AppError;
use crate::models::classify_types::{
    ClassificationRecord, ImageSource, Prediction, SessionState, SessionStatus,
};
use crate::services::classifier::ImageClassifier;
use crate::services::history::filter_history;

pub type RequestId = u64;

/// The inference backend, or the reason it could not be loaded at startup.
pub type Gateway = Result<Arc<dyn ImageClassifier>, AppError>;

type Outcome = Result<Arc<ClassificationRecord>, AppError>;

const COMMAND_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub enum SessionEvent {
    Started {
        request: RequestId,
    },
    Completed {
        request: RequestId,
        record: Arc<ClassificationRecord>,
    },
    Failed {
        request: RequestId,
        error: AppError,
    },
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub inference_timeout: Option<Duration>,
    pub event_capacity: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            inference_timeout: None,
            event_capacity: 64,
        }
    }
}

impl From<&AppConfig> for SessionOptions {
    fn from(config: &AppConfig) -> Self {
        Self {
            inference_timeout: config.inference_timeout(),
            event_capacity: config.event_capacity,
        }
    }
}

enum Command {
    Select {
        source: Arc<ImageSource>,
        reply: oneshot::Sender<(RequestId, oneshot::Receiver<Outcome>)>,
    },
    Finished {
        request: RequestId,
        outcome: Result<Vec<Prediction>, AppError>,
    },
}

/// Receipt for one `select_image` call.
pub struct Ticket {
    pub id: RequestId,
    done: oneshot::Receiver<Outcome>,
}

impl Ticket {
    /// Resolves once the gateway call behind this request has been applied
    /// to the session.
    pub async fn wait(self) -> Result<Arc<ClassificationRecord>, AppError> {
        self.done.await.map_err(|_| AppError::SessionClosed)?
    }
}

#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<SessionState>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionHandle {
    /// Makes `source` the current image and starts classifying it.
    ///
    /// Returns as soon as the session is `InProgress`. Overlapping calls are
    /// allowed; whichever resolves last owns `current_result`.
    pub async fn select_image(&self, source: ImageSource) -> Result<Ticket, AppError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Select {
                source: Arc::new(source),
                reply,
            })
            .await
            .map_err(|_| AppError::SessionClosed)?;

        let (id, done) = rx.await.map_err(|_| AppError::SessionClosed)?;
        Ok(Ticket { id, done })
    }

    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn history(&self) -> Vec<Arc<ClassificationRecord>> {
        self.state.borrow().history.clone()
    }

    pub fn search(&self, query: &str) -> Vec<Arc<ClassificationRecord>> {
        filter_history(&self.state.borrow().history, query)
    }

    /// Read model that changes after every mutation.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }
}

pub struct ClassificationSession {
    gateway: Gateway,
    options: SessionOptions,
    state: SessionState,
    next_request: RequestId,
    waiters: HashMap<RequestId, oneshot::Sender<Outcome>>,
    commands: mpsc::WeakSender<Command>,
    state_tx: watch::Sender<SessionState>,
    events: broadcast::Sender<SessionEvent>,
}

impl ClassificationSession {
    /// Starts the session actor on the current tokio runtime.
    ///
    /// The actor stops once every handle is dropped and no gateway call is
    /// still in flight.
    pub fn spawn(gateway: Gateway, options: SessionOptions) -> SessionHandle {
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (state_tx, state_rx) = watch::channel(SessionState::default());
        let (events, _) = broadcast::channel(options.event_capacity.max(1));

        if let Err(e) = &gateway {
            tracing::warn!(error = %e, "session started without a classifier");
        }

        let session = ClassificationSession {
            gateway,
            options,
            state: SessionState::default(),
            next_request: 1,
            waiters: HashMap::new(),
            commands: commands_tx.downgrade(),
            state_tx,
            events: events.clone(),
        };
        tokio::spawn(session.run(commands_rx));

        SessionHandle {
            commands: commands_tx,
            state: state_rx,
            events,
        }
    }

    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        while let Some(command) = commands.recv().await {
            match command {
                Command::Select { source, reply } => {
                    let (done_tx, done_rx) = oneshot::channel();
                    let request = self.start(source, done_tx);
                    let _ = reply.send((request, done_rx));
                }
                Command::Finished { request, outcome } => self.finish(request, outcome),
            }
        }
        tracing::debug!("classification session stopped");
    }

    fn start(&mut self, source: Arc<ImageSource>, done: oneshot::Sender<Outcome>) -> RequestId {
        let request = self.next_request;
        self.next_request += 1;
        self.waiters.insert(request, done);

        tracing::debug!(request, image = %source.describe(), "classification requested");

        self.state.current_image = Some(source.clone());
        self.state.status = SessionStatus::InProgress;
        self.state.current_result = None;
        self.state.pending += 1;
        self.publish();
        let _ = self.events.send(SessionEvent::Started { request });

        let classifier = match self.gateway.clone() {
            Ok(classifier) => classifier,
            Err(error) => {
                self.finish(request, Err(error));
                return request;
            }
        };

        let Some(commands) = self.commands.upgrade() else {
            self.finish(request, Err(AppError::SessionClosed));
            return request;
        };

        let timeout = self.options.inference_timeout;
        tokio::spawn(async move {
            let work = tokio::task::spawn_blocking(move || classifier.classify_source(&source));
            let outcome = match timeout {
                Some(limit) => match tokio::time::timeout(limit, work).await {
                    Ok(joined) => flatten(joined),
                    Err(_) => Err(AppError::Inference(format!(
                        "classification timed out after {} ms",
                        limit.as_millis()
                    ))),
                },
                None => flatten(work.await),
            };
            let _ = commands.send(Command::Finished { request, outcome }).await;
        });

        request
    }

    fn finish(&mut self, request: RequestId, outcome: Result<Vec<Prediction>, AppError>) {
        self.state.pending = self.state.pending.saturating_sub(1);

        let result = match outcome {
            Ok(predictions) => {
                // Named at completion time, so names follow completion order.
                let name = format!("Image {}", self.state.history.len() + 1);
                let record = Arc::new(ClassificationRecord::new(predictions, name));

                self.state.status = SessionStatus::Complete;
                self.state.current_result = Some(record.clone());
                self.state.last_error = None;
                self.state.history.push(record.clone());

                tracing::info!(
                    request,
                    image_name = %record.image_name,
                    top = record.predictions.first().map(|p| p.identifier.as_str()).unwrap_or("-"),
                    "classification complete"
                );
                let _ = self.events.send(SessionEvent::Completed {
                    request,
                    record: record.clone(),
                });
                Ok(record)
            }
            Err(error) => {
                self.state.status = SessionStatus::Failed;
                self.state.current_result = self.state.history.last().cloned();
                self.state.last_error = Some(error.clone());

                tracing::warn!(request, error = %error, "classification failed");
                let _ = self.events.send(SessionEvent::Failed {
                    request,
                    error: error.clone(),
                });
                Err(error)
            }
        };

        self.publish();
        if let Some(waiter) = self.waiters.remove(&request) {
            let _ = waiter.send(result);
        }
    }

    fn publish(&self) {
        self.state_tx.send_replace(self.state.clone());
    }
}

fn flatten(
    joined: Result<Result<Vec<Prediction>, AppError>, tokio::task::JoinError>,
) -> Result<Vec<Prediction>, AppError> {
    joined.map_err(|e| AppError::Inference(format!("classification worker failed: {}", e)))?
}
