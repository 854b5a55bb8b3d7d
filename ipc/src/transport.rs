//! Duplex byte channels between executions
//!
//! Each execution owns one inbound endpoint, addressed by its execution
//! index. Senders connect an outbound writer to the endpoint of the
//! destination and write whole frames.
//!
//! - [`MemoryTransport`]: executions living in one process
//! - [`UnixSocketTransport`]: executions in separate processes, one socket
//!   file per execution index

use core_types::ExecutionIndex;
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, VecDeque};
use std::io::{self, Read, Write};
use std::sync::Arc;

/// Inbound endpoint of one execution
pub trait Endpoint: Send {
    /// Blocks until a sender session is available and returns its reader
    ///
    /// A reader returning `Ok(0)` has reached the end of its session; the
    /// caller accepts again to wait for the next one.
    fn accept(&mut self) -> io::Result<Box<dyn Read + Send>>;
}

/// Channel factory shared by every execution of a simulated system
pub trait Transport: Send + Sync {
    /// Creates the inbound endpoint of `index`
    fn bind(&self, index: ExecutionIndex) -> io::Result<Box<dyn Endpoint>>;

    /// Opens an outbound writer to the endpoint of `index`
    ///
    /// Fails immediately when nothing is bound there; callers retry.
    fn connect(&self, index: ExecutionIndex) -> io::Result<Box<dyn Write + Send>>;

    /// Removes the endpoint of `index`, ending its sessions
    fn unbind(&self, index: ExecutionIndex);
}

#[derive(Debug, Default)]
struct PipeState {
    buffer: VecDeque<u8>,
    closed: bool,
}

/// In-process byte pipe feeding one endpoint
#[derive(Debug, Default)]
struct Pipe {
    state: Mutex<PipeState>,
    readable: Condvar,
}

impl Pipe {
    fn close(&self) {
        self.state.lock().closed = true;
        self.readable.notify_all();
    }
}

struct PipeReader {
    pipe: Arc<Pipe>,
}

impl Read for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        let mut state = self.pipe.state.lock();
        while state.buffer.is_empty() && !state.closed {
            self.pipe.readable.wait(&mut state);
        }

        let n = buf.len().min(state.buffer.len());
        for (slot, byte) in buf.iter_mut().zip(state.buffer.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

struct PipeWriter {
    pipe: Arc<Pipe>,
}

impl Write for PipeWriter {
    /// Appends the whole buffer in one step, so a frame written with a
    /// single `write_all` is never interleaved with another sender's.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.pipe.state.lock();
        if state.closed {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "endpoint closed",
            ));
        }
        state.buffer.extend(buf.iter().copied());
        drop(state);
        self.pipe.readable.notify_all();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

struct MemoryEndpoint {
    pipe: Arc<Pipe>,
}

impl Endpoint for MemoryEndpoint {
    fn accept(&mut self) -> io::Result<Box<dyn Read + Send>> {
        if self.pipe.state.lock().closed {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "endpoint closed",
            ));
        }
        Ok(Box::new(PipeReader {
            pipe: Arc::clone(&self.pipe),
        }))
    }
}

/// Transport connecting executions that share one process
///
/// Every sender writes into the same pipe of the destination, so every
/// session accepted from the endpoint reads that one pipe until `unbind`.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    pipes: Mutex<HashMap<ExecutionIndex, Arc<Pipe>>>,
}

impl MemoryTransport {
    /// Creates a transport with no bound endpoints
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks whether `index` has a bound endpoint
    pub fn is_bound(&self, index: ExecutionIndex) -> bool {
        self.pipes.lock().contains_key(&index)
    }
}

impl Transport for MemoryTransport {
    fn bind(&self, index: ExecutionIndex) -> io::Result<Box<dyn Endpoint>> {
        let mut pipes = self.pipes.lock();
        if pipes.contains_key(&index) {
            return Err(io::Error::new(
                io::ErrorKind::AddrInUse,
                format!("{} already bound", index),
            ));
        }
        let pipe = Arc::new(Pipe::default());
        pipes.insert(index, Arc::clone(&pipe));
        Ok(Box::new(MemoryEndpoint { pipe }))
    }

    fn connect(&self, index: ExecutionIndex) -> io::Result<Box<dyn Write + Send>> {
        let pipe = self.pipes.lock().get(&index).cloned().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::ConnectionRefused,
                format!("{} not bound", index),
            )
        })?;
        Ok(Box::new(PipeWriter { pipe }))
    }

    fn unbind(&self, index: ExecutionIndex) {
        if let Some(pipe) = self.pipes.lock().remove(&index) {
            pipe.close();
        }
    }
}

#[cfg(unix)]
pub use self::unix::UnixSocketTransport;

#[cfg(unix)]
mod unix {
    use super::{Endpoint, Transport};
    use core_types::ExecutionIndex;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::io::{self, Read, Write};
    use std::os::unix::net::{UnixListener, UnixStream};
    use std::path::{Path, PathBuf};
    use std::sync::Arc;

    /// Set once the endpoint is unbound; guards rebinding of its socket
    type Unbound = Arc<Mutex<bool>>;

    fn remove_socket(path: &Path) -> io::Result<()> {
        match std::fs::remove_file(path) {
            Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
            _ => Ok(()),
        }
    }

    fn unbound_error() -> io::Error {
        io::Error::new(io::ErrorKind::NotConnected, "endpoint unbound")
    }

    /// Listening socket of one execution
    ///
    /// The socket file exists only while no session is active. A sender
    /// arriving during a session finds nothing to connect to and retries.
    struct SocketEndpoint {
        path: PathBuf,
        listener: Option<UnixListener>,
        unbound: Unbound,
    }

    impl Endpoint for SocketEndpoint {
        fn accept(&mut self) -> io::Result<Box<dyn Read + Send>> {
            let listener = match self.listener.take() {
                Some(listener) => listener,
                None => {
                    let unbound = self.unbound.lock();
                    if *unbound {
                        return Err(unbound_error());
                    }
                    remove_socket(&self.path)?;
                    UnixListener::bind(&self.path)?
                }
            };

            let (stream, _) = listener.accept()?;
            let unbound = self.unbound.lock();
            drop(listener);
            remove_socket(&self.path)?;
            if *unbound {
                return Err(unbound_error());
            }
            Ok(Box::new(stream))
        }
    }

    /// Transport connecting executions through Unix domain sockets
    ///
    /// The endpoint of execution `n` is the socket `<dir>/ipc<n>.sock`. It
    /// serves one sender session at a time: the socket file is removed when
    /// a session starts and recreated when it ends.
    #[derive(Debug, Clone)]
    pub struct UnixSocketTransport {
        dir: PathBuf,
        endpoints: Arc<Mutex<HashMap<ExecutionIndex, Unbound>>>,
    }

    impl UnixSocketTransport {
        /// Creates a transport rooted at `dir`
        pub fn new(dir: impl Into<PathBuf>) -> Self {
            Self {
                dir: dir.into(),
                endpoints: Arc::new(Mutex::new(HashMap::new())),
            }
        }

        /// Directory holding the socket files
        pub fn dir(&self) -> &Path {
            &self.dir
        }

        /// Socket file of `index`
        pub fn socket_path(&self, index: ExecutionIndex) -> PathBuf {
            self.dir.join(format!("ipc{}.sock", index.as_u8()))
        }
    }

    impl Transport for UnixSocketTransport {
        fn bind(&self, index: ExecutionIndex) -> io::Result<Box<dyn Endpoint>> {
            let path = self.socket_path(index);
            // Stale socket left by an earlier run.
            remove_socket(&path)?;
            let listener = UnixListener::bind(&path)?;

            let unbound = Arc::new(Mutex::new(false));
            if let Some(previous) = self.endpoints.lock().insert(index, Arc::clone(&unbound)) {
                *previous.lock() = true;
            }
            Ok(Box::new(SocketEndpoint {
                path,
                listener: Some(listener),
                unbound,
            }))
        }

        fn connect(&self, index: ExecutionIndex) -> io::Result<Box<dyn Write + Send>> {
            let stream = UnixStream::connect(self.socket_path(index))?;
            Ok(Box::new(stream))
        }

        fn unbind(&self, index: ExecutionIndex) {
            let path = self.socket_path(index);
            let Some(unbound) = self.endpoints.lock().remove(&index) else {
                let _ = remove_socket(&path);
                return;
            };

            let mut unbound = unbound.lock();
            *unbound = true;
            // Wakes a listener blocked in accept; it sees the flag and stops.
            let _ = UnixStream::connect(&path);
            let _ = remove_socket(&path);
        }
    }
}
