//! Mailbox and background listener
//!
//! The mailbox holds at most one in-flight inbound message: its 8-byte
//! frame header followed by the payload bytes received so far. A dedicated
//! listener thread reads frames from the execution's endpoint, waits until
//! the previous message has been drained, then appends the new one and
//! notifies `IpcMessage` for every non-empty chunk.
//!
//! The receive sequence number advances only when a message has been read
//! completely, so every partial read of one message reports the same number.

use crate::threads;
use crate::{Shared, SyscallEvent};
use core_types::{ExecutionIndex, SysEvent};
use ipc::{encode_frame, Endpoint, FrameHeader};
use kernel_api::abi::{MAILBOX_LAYOUT, MAX_MESSAGE_LEN};
use kernel_api::{KernelError, MessageStatus, ReceivedMessage};
use parking_lot::{Condvar, Mutex};
use resources::SlotPool;
use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Pause between connection attempts of `send_message`.
const CONNECT_RETRY_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug)]
struct InboundState {
    pool: SlotPool<()>,
    buffer: Vec<u8>,
    read_offset: usize,
    rx_sequence: u32,
    closed: bool,
}

impl InboundState {
    fn header(&self) -> Option<FrameHeader> {
        FrameHeader::decode(&self.buffer).ok()
    }

    /// Payload bytes received but not yet read
    fn unread(&self) -> usize {
        self.buffer
            .len()
            .saturating_sub(FrameHeader::SIZE + self.read_offset)
    }
}

/// Receive side shared with the listener thread
#[derive(Debug)]
pub(crate) struct Inbound {
    state: Mutex<InboundState>,
    drained: Condvar,
}

impl Inbound {
    fn new() -> Self {
        Self {
            state: Mutex::new(InboundState {
                pool: SlotPool::new(MAILBOX_LAYOUT),
                buffer: Vec::new(),
                read_offset: 0,
                rx_sequence: 1,
                closed: false,
            }),
            drained: Condvar::new(),
        }
    }

    /// Blocks until no message is in flight; false once closed
    fn wait_drained(&self) -> bool {
        let mut state = self.state.lock();
        while !state.buffer.is_empty() && !state.closed {
            self.drained.wait(&mut state);
        }
        !state.closed
    }

    fn append(&self, header: Option<&[u8]>, chunk: &[u8]) {
        let mut state = self.state.lock();
        if let Some(header) = header {
            state.buffer.extend_from_slice(header);
        }
        state.buffer.extend_from_slice(chunk);
    }

    /// Drops a message whose sender went away mid-frame
    fn discard(&self) {
        let mut state = self.state.lock();
        state.buffer.clear();
        state.read_offset = 0;
        self.drained.notify_all();
    }

    pub(crate) fn close(&self) {
        self.state.lock().closed = true;
        self.drained.notify_all();
    }
}

/// Mailbox of one execution
pub(crate) struct Mailbox {
    inbound: Arc<Inbound>,
    outbound: Mutex<HashMap<ExecutionIndex, Box<dyn Write + Send>>>,
    tx_sequence: AtomicU32,
}

impl Mailbox {
    pub(crate) fn new() -> Self {
        Self {
            inbound: Arc::new(Inbound::new()),
            outbound: Mutex::new(HashMap::new()),
            tx_sequence: AtomicU32::new(0),
        }
    }

    pub(crate) fn is_initialised(&self) -> bool {
        self.inbound.state.lock().pool.is_initialised()
    }

    pub(crate) fn close(&self) {
        self.inbound.close();
    }
}

enum FrameOutcome {
    Delivered,
    Skipped,
    SessionEnded,
    Stopped,
}

/// Reads and drops `len` payload bytes of a rejected frame
fn skip_payload(reader: &mut dyn Read, len: usize) -> io::Result<()> {
    let copied = io::copy(&mut reader.take(len as u64), &mut io::sink())?;
    if copied < len as u64 {
        return Err(io::ErrorKind::UnexpectedEof.into());
    }
    Ok(())
}

fn read_frame(
    reader: &mut dyn Read,
    inbound: &Inbound,
    shared: &Weak<Shared>,
    index: ExecutionIndex,
) -> FrameOutcome {
    let mut header_bytes = [0u8; FrameHeader::SIZE];
    if let Err(err) = reader.read_exact(&mut header_bytes) {
        if err.kind() != io::ErrorKind::UnexpectedEof {
            warn!(execution = index.as_u8(), %err, "mailbox read failed");
        }
        return FrameOutcome::SessionEnded;
    }

    let header = match FrameHeader::decode(&header_bytes) {
        Ok(header) => header,
        Err(err) => {
            warn!(execution = index.as_u8(), %err, "dropping malformed frame");
            return FrameOutcome::Skipped;
        }
    };
    if let Err(err) = header.validate(MAX_MESSAGE_LEN) {
        warn!(execution = index.as_u8(), %err, "dropping malformed frame");
        // A length out of range cannot be trusted, so only the header goes.
        let declared = header.length as usize;
        if declared == 0 || declared > MAX_MESSAGE_LEN {
            return FrameOutcome::Skipped;
        }
        return match skip_payload(reader, declared) {
            Ok(()) => FrameOutcome::Skipped,
            Err(_) => FrameOutcome::SessionEnded,
        };
    }

    if !inbound.wait_drained() {
        return FrameOutcome::Stopped;
    }

    let mut chunk = [0u8; MAX_MESSAGE_LEN];
    let mut remaining = header.length as usize;
    let mut first = true;

    while remaining > 0 {
        let n = match reader.read(&mut chunk[..remaining]) {
            Ok(0) => {
                warn!(execution = index.as_u8(), remaining, "sender left mid-frame");
                inbound.discard();
                return FrameOutcome::SessionEnded;
            }
            Ok(n) => n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => {
                warn!(execution = index.as_u8(), %err, "mailbox read failed");
                inbound.discard();
                return FrameOutcome::SessionEnded;
            }
        };

        // The header only becomes visible together with payload bytes.
        inbound.append(first.then_some(&header_bytes[..]), &chunk[..n]);
        first = false;
        remaining -= n;

        match shared.upgrade() {
            Some(shared) => {
                shared.notify(SysEvent::IpcMessage, None);
            }
            None => return FrameOutcome::Stopped,
        }
    }

    FrameOutcome::Delivered
}

fn run_listener(
    index: ExecutionIndex,
    mut endpoint: Box<dyn Endpoint>,
    inbound: Arc<Inbound>,
    shared: Weak<Shared>,
) {
    loop {
        let mut reader = match endpoint.accept() {
            Ok(reader) => reader,
            Err(err) => {
                debug!(execution = index.as_u8(), %err, "mailbox listener stopped");
                return;
            }
        };
        debug!(execution = index.as_u8(), "sender session accepted");

        loop {
            match read_frame(reader.as_mut(), &inbound, &shared, index) {
                FrameOutcome::Delivered | FrameOutcome::Skipped => {}
                FrameOutcome::SessionEnded => break,
                FrameOutcome::Stopped => return,
            }
        }
    }
}

impl Shared {
    pub(crate) fn initialise_mailbox(
        self: &Arc<Self>,
        container: &mut [u8],
    ) -> Result<(), KernelError> {
        threads::checkpoint();
        let index = self.index();
        let inbound = Arc::clone(&self.mailbox.inbound);
        let mut state = inbound.state.lock();

        let capacity = state.pool.check(container)?;
        let endpoint = self.transport.bind(index).map_err(|err| {
            error!(execution = index.as_u8(), %err, "failed to bind mailbox endpoint");
            KernelError::Fail
        })?;

        let listener_inbound = Arc::clone(&inbound);
        let weak = Arc::downgrade(self);
        thread::Builder::new()
            .name(format!("exec{}-mailbox", index.as_u8()))
            .spawn(move || run_listener(index, endpoint, listener_inbound, weak))
            .map_err(|err| {
                error!(execution = index.as_u8(), %err, "failed to spawn mailbox listener");
                self.transport.unbind(index);
                KernelError::Fail
            })?;

        state.pool.initialise(container)?;
        drop(state);

        debug!(execution = index.as_u8(), capacity, "mailbox initialised");
        self.record_current(SyscallEvent::MailboxInitialised { capacity });
        Ok(())
    }

    pub(crate) fn send_message(
        &self,
        destination: ExecutionIndex,
        payload: &[u8],
    ) -> Result<u32, KernelError> {
        threads::checkpoint();
        let caller = self.caller()?;
        let index = self.index();

        if !self.mailbox.is_initialised() {
            return Err(KernelError::NotInitialised);
        }
        if destination == index || !destination.is_valid() {
            return Err(KernelError::InvalidDestination);
        }
        if payload.is_empty() || payload.len() > MAX_MESSAGE_LEN {
            return Err(KernelError::InvalidMessage);
        }

        let frame = encode_frame(index, payload);
        {
            let mut outbound = self.mailbox.outbound.lock();
            if !outbound.contains_key(&destination) {
                let writer = self.connect(destination)?;
                outbound.insert(destination, writer);
            }

            let written = match outbound.get_mut(&destination) {
                Some(writer) => writer.write_all(&frame).and_then(|()| writer.flush()),
                None => Err(io::Error::from(io::ErrorKind::NotConnected)),
            };
            if let Err(err) = written {
                outbound.remove(&destination);
                warn!(
                    execution = index.as_u8(),
                    destination = destination.as_u8(),
                    %err,
                    "message write failed"
                );
                return Err(KernelError::Fail);
            }
        }

        let sequence_no = self.mailbox.tx_sequence.fetch_add(1, Ordering::SeqCst) + 1;
        self.record(
            Some(caller),
            SyscallEvent::MessageSent {
                destination,
                sequence_no,
                len: payload.len(),
            },
        );
        Ok(sequence_no)
    }

    /// Connects to `destination`, retrying within the connect window
    fn connect(&self, destination: ExecutionIndex) -> Result<Box<dyn Write + Send>, KernelError> {
        let deadline = Instant::now() + Duration::from_millis(self.config.connect_timeout_ms);
        loop {
            match self.transport.connect(destination) {
                Ok(writer) => return Ok(writer),
                Err(err) if Instant::now() >= deadline => {
                    warn!(
                        execution = self.index().as_u8(),
                        destination = destination.as_u8(),
                        %err,
                        "destination has no mailbox"
                    );
                    return Err(KernelError::DestinationNotHaveMessageBox);
                }
                Err(_) => thread::sleep(CONNECT_RETRY_INTERVAL),
            }
        }
    }

    pub(crate) fn receive_message(
        &self,
        buffer: &mut [u8],
    ) -> Result<ReceivedMessage, KernelError> {
        threads::checkpoint();
        let caller = self.caller()?;

        let message = {
            let mut state = self.mailbox.inbound.state.lock();
            if !state.pool.is_initialised() {
                return Err(KernelError::NotInitialised);
            }
            let header = state.header().ok_or(KernelError::MessageBoxEmpty)?;

            let len = state.unread().min(buffer.len());
            let start = FrameHeader::SIZE + state.read_offset;
            buffer[..len].copy_from_slice(&state.buffer[start..start + len]);
            state.read_offset += len;

            let sequence_no = state.rx_sequence;
            let complete = state.read_offset == header.length as usize;
            if complete {
                state.buffer.clear();
                state.read_offset = 0;
                state.rx_sequence = state.rx_sequence.wrapping_add(1);
                self.mailbox.inbound.drained.notify_all();
            }

            ReceivedMessage {
                sender: header.sender(),
                sequence_no,
                len,
                complete,
            }
        };

        self.record(
            Some(caller),
            SyscallEvent::MessageReceived {
                sender: message.sender,
                sequence_no: message.sequence_no,
                len: message.len,
                complete: message.complete,
            },
        );
        Ok(message)
    }

    pub(crate) fn is_message_received(&self) -> Result<MessageStatus, KernelError> {
        threads::checkpoint();
        let state = self.mailbox.inbound.state.lock();
        if !state.pool.is_initialised() {
            return Err(KernelError::NotInitialised);
        }

        let remaining_len = state.unread() as u32;
        Ok(MessageStatus {
            received: state.buffer.len() > FrameHeader::SIZE,
            remaining_len,
            sequence_no: state.rx_sequence,
        })
    }
}
