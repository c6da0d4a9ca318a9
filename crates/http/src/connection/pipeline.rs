//! Request/response ordering for one connection.
//!
//! Every parsed request gets an entry in `incoming` and a response slot. The slot of the oldest
//! request is *attached*: its bytes go straight to the socket. Slots of later requests wait in
//! `outgoing`, buffering whatever their response produced so far, and are attached one by one
//! as the responses before them finish. Responses may finish in any order, bytes always leave
//! in request order.

use std::collections::VecDeque;
use std::mem;

use bytes::{Bytes, BytesMut};
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

use crate::protocol::{FlushedSender, SendError, TimeoutHook};

/// Connection-side view of a request that has not been answered yet.
#[derive(Debug)]
pub(crate) struct RequestSlot {
    pub(crate) id: u64,
    pub(crate) aborted: CancellationToken,
    pub(crate) timeout: TimeoutHook,
    /// true once the whole body was received
    pub(crate) complete: bool,
}

/// Connection-side view of a response.
#[derive(Debug)]
pub(crate) struct ResponseSlot {
    id: u64,
    pending: BytesMut,
    /// `Some(last)` once the response finished
    finished: Option<bool>,
    /// set when the peer half-closed while this was the newest response
    force_last: bool,
    flushed: Option<FlushedSender>,
    timeout: TimeoutHook,
}

impl ResponseSlot {
    pub(crate) fn new(id: u64, flushed: FlushedSender, timeout: TimeoutHook) -> Self {
        Self { id, pending: BytesMut::new(), finished: None, force_last: false, flushed: Some(flushed), timeout }
    }
}

/// What the connection has to do after feeding an event into the pipeline.
#[derive(Debug)]
pub(crate) enum Action {
    /// append these bytes to the socket output
    Write(Bytes),
    /// a response completed and its request left `incoming`
    Finished { request: Option<RequestSlot>, flushed: Option<FlushedSender> },
    /// the finished response asked for the connection to be closed
    Close,
    /// nothing is attached and nothing is queued
    Idle,
}

#[derive(Debug, Default)]
pub(crate) struct Pipeline {
    incoming: VecDeque<RequestSlot>,
    attached: Option<ResponseSlot>,
    outgoing: VecDeque<ResponseSlot>,
    /// bytes buffered in queued slots
    pending_bytes: usize,
    closed: bool,
}

impl Pipeline {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Registers a new exchange. The response is attached right away when the socket is free.
    pub(crate) fn push(&mut self, request: RequestSlot, response: ResponseSlot) {
        debug_assert_eq!(request.id, response.id);
        self.incoming.push_back(request);
        if self.attached.is_none() {
            trace!(id = response.id, "response attached");
            self.attached = Some(response);
        } else {
            trace!(id = response.id, queued = self.outgoing.len() + 1, "response queued behind an unfinished one");
            self.outgoing.push_back(response);
        }
    }

    /// Number of requests still waiting for their response to finish.
    pub(crate) fn len(&self) -> usize {
        self.incoming.len()
    }

    pub(crate) fn is_idle(&self) -> bool {
        self.attached.is_none() && self.outgoing.is_empty()
    }

    pub(crate) fn pending_bytes(&self) -> usize {
        self.pending_bytes
    }

    /// The newest request, if its body is still being received.
    pub(crate) fn request_in_progress(&self) -> Option<&RequestSlot> {
        self.incoming.back().filter(|request| !request.complete)
    }

    pub(crate) fn request_mut(&mut self, id: u64) -> Option<&mut RequestSlot> {
        self.incoming.iter_mut().find(|request| request.id == id)
    }

    pub(crate) fn attached_timeout(&self) -> Option<&TimeoutHook> {
        self.attached.as_ref().map(|slot| &slot.timeout)
    }

    /// Routes serialized bytes of response `id`: returned when they can be written now,
    /// buffered otherwise.
    pub(crate) fn on_data(&mut self, id: u64, bytes: Bytes) -> Option<Bytes> {
        if self.closed {
            return None;
        }

        if self.attached.as_ref().is_some_and(|slot| slot.id == id) {
            return Some(bytes);
        }

        match self.outgoing.iter_mut().find(|slot| slot.id == id) {
            Some(slot) => {
                self.pending_bytes += bytes.len();
                slot.pending.extend_from_slice(&bytes);
            }
            None => warn!(id, len = bytes.len(), "data for a response that is no longer queued, dropped"),
        }
        None
    }

    /// Records that response `id` finished and returns the resulting actions, in order.
    pub(crate) fn on_finish(&mut self, id: u64, last: bool, actions: &mut Vec<Action>) {
        if self.closed {
            return;
        }

        if let Some(slot) = self.outgoing.iter_mut().find(|slot| slot.id == id) {
            trace!(id, "queued response finished early, kept until its turn");
            slot.finished = Some(last);
            return;
        }

        match &mut self.attached {
            Some(slot) if slot.id == id => slot.finished = Some(last),
            _ => {
                warn!(id, "finish for a response that is no longer queued");
                return;
            }
        }

        self.advance(actions);
    }

    /// Detaches finished responses from the head of the pipeline and attaches the next ones.
    fn advance(&mut self, actions: &mut Vec<Action>) {
        while let Some(mut slot) = self.attached.take_if(|slot| slot.finished.is_some()) {
            let last = slot.finished.unwrap_or(false) || slot.force_last;
            let request = self.incoming.pop_front();
            debug_assert!(request.as_ref().is_none_or(|request| request.id == slot.id));
            trace!(id = slot.id, last, "response detached");

            actions.push(Action::Finished { request, flushed: slot.flushed.take() });

            if last {
                actions.push(Action::Close);
                self.closed = true;
                return;
            }

            match self.outgoing.pop_front() {
                Some(mut next) => {
                    trace!(id = next.id, buffered = next.pending.len(), "response attached");
                    if !next.pending.is_empty() {
                        self.pending_bytes -= next.pending.len();
                        actions.push(Action::Write(mem::take(&mut next.pending).freeze()));
                    }
                    self.attached = Some(next);
                }
                None => {
                    actions.push(Action::Idle);
                    return;
                }
            }
        }
    }

    /// Makes the newest in-flight response the last one on this connection.
    ///
    /// Returns false when no response is in flight.
    pub(crate) fn mark_last(&mut self) -> bool {
        match self.outgoing.back_mut().or(self.attached.as_mut()) {
            Some(slot) => {
                slot.force_last = true;
                true
            }
            None => false,
        }
    }

    /// Aborts every request still waiting for its response and fails pending flush signals.
    ///
    /// Returns the number of aborted requests.
    pub(crate) fn abort(&mut self) -> usize {
        self.closed = true;
        let aborted = self.incoming.len();
        for request in self.incoming.drain(..) {
            request.aborted.cancel();
        }
        for mut slot in self.attached.take().into_iter().chain(self.outgoing.drain(..)) {
            if let Some(flushed) = slot.flushed.take() {
                let _ = flushed.send(Err(SendError::connection_closed()));
            }
        }
        self.pending_bytes = 0;
        aborted
    }
}
