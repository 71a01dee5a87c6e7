//! Per-collection processing loop.
//!
//! Every verb is turned into a [`Request`], queued on a bounded channel and
//! executed by a single background thread in submission order. The caller
//! blocks on a private reply channel created for that one call.

use crate::collection::{DropReport, Page};
use crate::error::{CoreError, CoreResult};
use crate::value::Document;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

/// The kinds of request a collection accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ActionKind {
    /// Paged query.
    Fetch,
    /// Create one record.
    New,
    /// Merge data into matching records.
    Replace,
    /// Merge data into matching records.
    Edit,
    /// Delete matching records.
    Drop,
    /// Create many records.
    Insert,
    /// Count matching records.
    Count,
}

impl ActionKind {
    /// Every action kind.
    pub const ALL: [ActionKind; 7] = [
        ActionKind::Fetch,
        ActionKind::New,
        ActionKind::Replace,
        ActionKind::Edit,
        ActionKind::Drop,
        ActionKind::Insert,
        ActionKind::Count,
    ];

    /// Returns true for actions that change stored state.
    pub fn is_mutation(self) -> bool {
        !matches!(self, ActionKind::Fetch | ActionKind::Count)
    }

    /// Builds this action's rejection error.
    pub fn failure(self, message: impl Into<String>) -> CoreError {
        match self {
            ActionKind::Fetch | ActionKind::Count => CoreError::fetch_failed(message),
            ActionKind::New | ActionKind::Insert => CoreError::new_failed(message),
            ActionKind::Replace => CoreError::replace_failed(message),
            ActionKind::Edit => CoreError::edit_failed(message),
            ActionKind::Drop => CoreError::drop_failed(message),
        }
    }

    /// Re-labels a filter rejection as this action's rejection, keeping the
    /// code.
    pub fn rebrand(self, err: CoreError) -> CoreError {
        match err {
            CoreError::FetchFailed { code, message } => self.failure(message).with_code(code),
            other => other,
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ActionKind::Fetch => "fetch",
            ActionKind::New => "new",
            ActionKind::Replace => "replace",
            ActionKind::Edit => "edit",
            ActionKind::Drop => "drop",
            ActionKind::Insert => "insert",
            ActionKind::Count => "count",
        };
        f.write_str(name)
    }
}

/// Data carried by a request.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// No data.
    None,
    /// One record or partial record.
    One(Document),
    /// A batch of records.
    Many(Vec<Document>),
}

/// A queued verb call.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    /// Which action to run.
    pub kind: ActionKind,
    /// Filter map; empty for `new` and `insert`.
    pub filter: Document,
    /// Data of the action.
    pub data: Payload,
}

impl Request {
    /// Creates a request.
    pub fn new(kind: ActionKind, filter: Document, data: Payload) -> Self {
        Self { kind, filter, data }
    }
}

/// Result of a processed request.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Records of a fetch, replace or edit.
    Page(Page),
    /// The created record.
    Created(Document),
    /// The created records of a bulk insert.
    Inserted(Vec<Document>),
    /// Outcome of a drop.
    Dropped(DropReport),
    /// Number of matches.
    Count(u64),
}

/// Function executing one action kind against a context.
pub type Handler<C> = fn(&C, &Request) -> CoreResult<Reply>;

/// Mapping from action kind to handler, complete by construction.
pub struct HandlerTable<C> {
    handlers: BTreeMap<ActionKind, Handler<C>>,
}

impl<C> HandlerTable<C> {
    /// Builds a table.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if an action kind has no handler.
    pub fn new<I>(entries: I) -> CoreResult<Self>
    where
        I: IntoIterator<Item = (ActionKind, Handler<C>)>,
    {
        let handlers: BTreeMap<ActionKind, Handler<C>> = entries.into_iter().collect();
        if let Some(missing) = ActionKind::ALL.iter().find(|k| !handlers.contains_key(*k)) {
            return Err(CoreError::invalid_operation(format!(
                "no handler registered for {missing}"
            )));
        }
        Ok(Self { handlers })
    }

    fn dispatch(&self, context: &C, request: &Request) -> CoreResult<Reply> {
        match self.handlers.get(&request.kind) {
            Some(handler) => handler(context, request),
            None => Err(CoreError::invalid_operation(format!(
                "no handler registered for {}",
                request.kind
            ))),
        }
    }
}

impl<C> fmt::Debug for HandlerTable<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerTable")
            .field("kinds", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

struct Envelope {
    request: Request,
    reply: SyncSender<CoreResult<Reply>>,
}

/// Handle to a running processing loop.
#[derive(Debug)]
pub struct WriteSerializer {
    name: String,
    sender: Mutex<Option<SyncSender<Envelope>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl WriteSerializer {
    /// Starts the loop over `context`.
    ///
    /// # Errors
    ///
    /// Returns an error if the thread cannot be spawned.
    pub fn spawn<C>(
        name: impl Into<String>,
        context: Arc<C>,
        table: HandlerTable<C>,
        capacity: usize,
    ) -> CoreResult<Self>
    where
        C: Send + Sync + 'static,
    {
        let name = name.into();
        let (sender, receiver) = mpsc::sync_channel::<Envelope>(capacity);
        let loop_name = name.clone();
        let worker = thread::Builder::new()
            .name(format!("shelfdb-{name}"))
            .spawn(move || run(&loop_name, &*context, &table, &receiver))?;

        Ok(Self {
            name,
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Queues `request` and waits for its reply.
    ///
    /// # Errors
    ///
    /// Returns the handler's error, or `CollectionClosed` if the loop is gone.
    pub fn call(&self, request: Request) -> CoreResult<Reply> {
        let sender = self
            .sender
            .lock()
            .clone()
            .ok_or(CoreError::CollectionClosed)?;
        let (reply, response) = mpsc::sync_channel(1);
        sender
            .send(Envelope { request, reply })
            .map_err(|_| CoreError::CollectionClosed)?;
        drop(sender);
        response.recv().map_err(|_| CoreError::CollectionClosed)?
    }

    /// Returns true once [`shutdown`](Self::shutdown) has run.
    pub fn is_closed(&self) -> bool {
        self.sender.lock().is_none()
    }

    /// Stops accepting requests, lets queued ones finish and joins the loop.
    pub fn shutdown(&self) {
        self.sender.lock().take();
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if worker.join().is_err() {
                warn!(collection = %self.name, "processing loop panicked");
            }
        }
    }
}

impl Drop for WriteSerializer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run<C>(name: &str, context: &C, table: &HandlerTable<C>, receiver: &Receiver<Envelope>) {
    debug!(collection = %name, "processing loop started");
    while let Ok(Envelope { request, reply }) = receiver.recv() {
        let kind = request.kind;
        let result = table.dispatch(context, &request);
        match &result {
            Ok(_) => debug!(collection = %name, action = %kind, "request processed"),
            Err(e) => debug!(collection = %name, action = %kind, error = %e, "request rejected"),
        }
        // The caller may have gone away; nothing to do then.
        let _ = reply.send(result);
    }
    debug!(collection = %name, "processing loop stopped");
}
