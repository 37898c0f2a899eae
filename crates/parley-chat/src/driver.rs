use std::future::Future;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use parley_api::{ApiClient, ApiError, Draft};
use parley_gateway::{LiveStream, Subscription};
use parley_types::events::LiveEvent;
use parley_types::models::{ConversationTarget, Message, MessageId, TargetKey};

use crate::view::{ConversationView, FetchTicket};

/// The REST calls the chat pane needs.
pub trait ChatBackend: Clone + Send + Sync + 'static {
    fn history(
        &self,
        key: TargetKey,
    ) -> impl Future<Output = Result<Vec<Message>, ApiError>> + Send;

    fn send(
        &self,
        key: TargetKey,
        draft: Draft,
    ) -> impl Future<Output = Result<Message, ApiError>> + Send;

    fn delete(&self, id: MessageId) -> impl Future<Output = Result<(), ApiError>> + Send;
}

impl ChatBackend for ApiClient {
    async fn history(&self, key: TargetKey) -> Result<Vec<Message>, ApiError> {
        ApiClient::history(self, key).await
    }

    async fn send(&self, key: TargetKey, draft: Draft) -> Result<Message, ApiError> {
        self.send_message(key, &draft).await
    }

    async fn delete(&self, id: MessageId) -> Result<(), ApiError> {
        self.delete_message(id).await
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("chat driver has stopped")]
    Closed,
}

#[derive(Debug)]
enum Command {
    Select(ConversationTarget),
    Deselect,
    Send(Draft),
    Delete(MessageId),
}

#[derive(Debug)]
enum Completion {
    History {
        ticket: FetchTicket,
        result: Result<Vec<Message>, ApiError>,
    },
    Sent {
        epoch: u64,
        result: Result<Message, ApiError>,
    },
    Deleted {
        epoch: u64,
        id: MessageId,
        result: Result<(), ApiError>,
    },
}

/// Point-in-time copy of the chat pane published after every change.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ViewSnapshot {
    pub target: Option<ConversationTarget>,
    pub epoch: u64,
    pub messages: Vec<Message>,
    pub loading: bool,
    pub connected: bool,
    pub error: Option<String>,
}

impl ViewSnapshot {
    fn of(view: &ConversationView) -> Self {
        Self {
            target: view.target().cloned(),
            epoch: view.epoch(),
            messages: view.messages().to_vec(),
            loading: view.is_loading(),
            connected: view.is_connected(),
            error: view.error().map(String::from),
        }
    }

    pub fn key(&self) -> Option<TargetKey> {
        self.target.as_ref().map(ConversationTarget::key)
    }
}

/// Front-end side of a running [`ChatDriver`]. Cheap to clone.
#[derive(Clone)]
pub struct ChatHandle {
    commands: mpsc::UnboundedSender<Command>,
    snapshots: watch::Receiver<ViewSnapshot>,
}

impl ChatHandle {
    pub fn select(&self, target: ConversationTarget) -> Result<(), ChatError> {
        self.command(Command::Select(target))
    }

    pub fn deselect(&self) -> Result<(), ChatError> {
        self.command(Command::Deselect)
    }

    pub fn send(&self, draft: Draft) -> Result<(), ChatError> {
        self.command(Command::Send(draft))
    }

    pub fn delete(&self, id: MessageId) -> Result<(), ChatError> {
        self.command(Command::Delete(id))
    }

    pub fn snapshot(&self) -> ViewSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Wait for the next published change.
    pub async fn changed(&mut self) -> Result<ViewSnapshot, ChatError> {
        self.snapshots.changed().await.map_err(|_| ChatError::Closed)?;
        Ok(self.snapshots.borrow_and_update().clone())
    }

    /// Wait until a published snapshot satisfies `f`.
    pub async fn wait_for(
        &mut self,
        f: impl FnMut(&ViewSnapshot) -> bool,
    ) -> Result<ViewSnapshot, ChatError> {
        let snapshot = self
            .snapshots
            .wait_for(f)
            .await
            .map_err(|_| ChatError::Closed)?;
        Ok(snapshot.clone())
    }

    fn command(&self, command: Command) -> Result<(), ChatError> {
        self.commands.send(command).map_err(|_| ChatError::Closed)
    }
}

/// Owns the conversation view. Commands, live events and request
/// completions are applied one at a time by a single task.
pub struct ChatDriver<B, L> {
    backend: B,
    live: L,
    view: ConversationView,
    subscription: Option<Subscription>,
    commands: mpsc::UnboundedReceiver<Command>,
    completions: mpsc::UnboundedReceiver<Completion>,
    completions_tx: mpsc::UnboundedSender<Completion>,
    snapshots: watch::Sender<ViewSnapshot>,
}

impl<B, L> ChatDriver<B, L>
where
    B: ChatBackend,
    L: LiveStream + Send + 'static,
{
    pub fn new(backend: B, live: L) -> (Self, ChatHandle) {
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (completions_tx, completions) = mpsc::unbounded_channel();
        let (snapshots, snapshots_rx) = watch::channel(ViewSnapshot::default());

        let driver = Self {
            backend,
            live,
            view: ConversationView::new(),
            subscription: None,
            commands,
            completions,
            completions_tx,
            snapshots,
        };
        let handle = ChatHandle {
            commands: commands_tx,
            snapshots: snapshots_rx,
        };
        (driver, handle)
    }

    pub fn spawn(backend: B, live: L) -> (ChatHandle, JoinHandle<()>) {
        let (driver, handle) = Self::new(backend, live);
        (handle, tokio::spawn(driver.run()))
    }

    /// Run until every [`ChatHandle`] is dropped.
    pub async fn run(mut self) {
        loop {
            let changed = tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle(command),
                    None => break,
                },
                Some(done) = self.completions.recv() => self.complete(done),
                event = next_live(&mut self.subscription) => match event {
                    Some(event) => self.view.on_live(event),
                    None => {
                        warn!("Live stream ended for {:?}", self.view.key());
                        self.subscription = None;
                        match self.view.key() {
                            Some(target) => self.view.on_live(LiveEvent::Disconnected { target }),
                            None => false,
                        }
                    }
                },
            };
            if changed {
                self.publish();
            }
        }

        self.subscription = None;
        debug!("Chat driver stopped");
    }

    fn handle(&mut self, command: Command) -> bool {
        match command {
            Command::Select(target) => {
                // tear down before subscribing so at most one socket is live
                self.subscription = None;
                let ticket = self.view.select(target);
                self.subscription = Some(self.live.subscribe(ticket.target));

                let backend = self.backend.clone();
                let done = self.completions_tx.clone();
                tokio::spawn(async move {
                    let result = backend.history(ticket.target).await;
                    let _ = done.send(Completion::History { ticket, result });
                });
                true
            }
            Command::Deselect => {
                self.subscription = None;
                self.view.deselect();
                true
            }
            Command::Send(draft) => {
                let Some(key) = self.view.key() else {
                    self.view.set_error("no conversation selected");
                    return true;
                };
                if draft.is_empty() {
                    self.view.set_error("a message needs text or a file");
                    return true;
                }

                let epoch = self.view.epoch();
                let backend = self.backend.clone();
                let done = self.completions_tx.clone();
                tokio::spawn(async move {
                    let result = backend.send(key, draft).await;
                    let _ = done.send(Completion::Sent { epoch, result });
                });
                false
            }
            Command::Delete(id) => {
                self.view.remove(id);

                let epoch = self.view.epoch();
                let backend = self.backend.clone();
                let done = self.completions_tx.clone();
                tokio::spawn(async move {
                    let result = backend.delete(id).await;
                    let _ = done.send(Completion::Deleted { epoch, id, result });
                });
                true
            }
        }
    }

    fn complete(&mut self, done: Completion) -> bool {
        match done {
            Completion::History { ticket, result } => {
                self.view.apply_history(ticket, result.map_err(|e| e.to_string()))
            }
            // on_sent still filters by the selected target
            Completion::Sent { result: Ok(message), .. } => {
                info!("Message {} sent", message.id);
                self.view.on_sent(message)
            }
            Completion::Sent { epoch, result: Err(e) } => {
                warn!("Send failed: {}", e);
                self.report(epoch, format!("send failed: {}", e))
            }
            Completion::Deleted { id, result: Ok(()), .. } => {
                debug!("Message {} deleted on server", id);
                false
            }
            Completion::Deleted { epoch, id, result: Err(e) } => {
                warn!("Deleting message {} failed: {}", id, e);
                self.report(epoch, format!("delete failed: {}", e))
            }
        }
    }

    /// Surface an error only on the selection that caused it.
    fn report(&mut self, epoch: u64, error: String) -> bool {
        if epoch != self.view.epoch() {
            debug!("Dropping error from an earlier selection: {}", error);
            return false;
        }
        self.view.set_error(error);
        true
    }

    fn publish(&self) {
        self.snapshots.send_replace(ViewSnapshot::of(&self.view));
    }
}

async fn next_live(subscription: &mut Option<Subscription>) -> Option<LiveEvent> {
    match subscription {
        Some(sub) => sub.recv().await,
        None => std::future::pending().await,
    }
}
