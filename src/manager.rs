use crate::connection::WSConnection;
use crate::message::Message;
use crate::poller::{default_poller, Poller};
use log::{debug, info};
use std::collections::HashMap;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct ManagerState {
    websockets: HashMap<RawFd, Arc<Mutex<WSConnection>>>,
    poller: Box<dyn Poller>,
}

/// Tracks many endpoints and drives them from one thread.
///
/// Endpoints are keyed by their transport's file descriptor. The driver
/// thread polls for readable descriptors and advances the matching endpoint
/// by exactly one `once` step; an endpoint reporting itself done is removed
/// and terminated. Ownership of the endpoints is shared with whoever
/// created them -- removal only drops the manager's reference, the
/// endpoint's own teardown closes the transport.
pub struct WebSocketManager {
    state: Arc<Mutex<ManagerState>>,
    running: Arc<AtomicBool>,
    driver: Option<JoinHandle<()>>,
}

impl Default for WebSocketManager {
    fn default() -> Self {
        Self::new()
    }
}

impl WebSocketManager {
    pub fn new() -> Self {
        Self::with_poller(default_poller())
    }

    pub fn with_poller(poller: Box<dyn Poller>) -> Self {
        Self {
            state: Arc::new(Mutex::new(ManagerState {
                websockets: HashMap::new(),
                poller,
            })),
            running: Arc::new(AtomicBool::new(false)),
            driver: None,
        }
    }

    pub fn len(&self) -> usize {
        lock(&self.state).websockets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Spawns the driver thread. Safe to call more than once.
    pub fn start(&mut self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let state = self.state.clone();
        let running = self.running.clone();
        self.driver = Some(thread::spawn(move || Self::drive(state, running)));
    }

    /// Registers an endpoint: delivers its `opened` callback, stores it
    /// under its fd and adds the fd to the poller.
    pub fn add(&self, connection: Arc<Mutex<WSConnection>>) {
        let fd = {
            let mut conn = lock(&connection);
            info!("Managing websocket {}", conn.peer_description());
            conn.opened();
            conn.fileno()
        };

        let mut state = lock(&self.state);
        state.websockets.insert(fd, connection);
        state.poller.register(fd);
    }

    /// Forgets an endpoint without touching its transport; the endpoint's
    /// own teardown is responsible for closing it.
    pub fn remove(&self, connection: &Arc<Mutex<WSConnection>>) {
        let fd = {
            let conn = lock(connection);
            info!("Removing websocket {}", conn.peer_description());
            conn.fileno()
        };

        let mut state = lock(&self.state);
        state.websockets.remove(&fd);
        state.poller.unregister(fd);
    }

    /// Stops the driver thread, forgets every endpoint and releases the
    /// poller.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        {
            let mut state = lock(&self.state);
            state.websockets.clear();
            state.poller.release();
        }
        if let Some(driver) = self.driver.take() {
            let _ = driver.join();
        }
    }

    /// Sends `message` to every live endpoint. One endpoint failing to take
    /// the delivery never disrupts the others.
    pub fn broadcast(&self, message: Message) {
        let websockets: Vec<_> = lock(&self.state).websockets.values().cloned().collect();

        for connection in websockets {
            let conn = lock(&connection);
            if conn.terminated() {
                continue;
            }
            if let Err(err) = conn.send_message(message.clone()) {
                debug!(
                    "broadcast delivery to {} failed: {}",
                    conn.peer_description(),
                    err
                );
            }
        }
    }

    /// Initiates a graceful close on every endpoint. The driver keeps
    /// running so the close handshakes can complete.
    pub fn close_all(&self, code: u16, reason: &str) {
        info!("Closing all websockets with [{}] '{}'", code, reason);
        let websockets: Vec<_> = lock(&self.state).websockets.values().cloned().collect();

        for connection in websockets {
            lock(&connection).close(code, reason);
        }
    }

    fn drive(state: Arc<Mutex<ManagerState>>, running: Arc<AtomicBool>) {
        while running.load(Ordering::SeqCst) {
            let polled = lock(&state).poller.poll();

            if !running.load(Ordering::SeqCst) {
                break;
            }

            for fd in polled {
                if !running.load(Ordering::SeqCst) {
                    break;
                }

                let connection = lock(&state).websockets.get(&fd).cloned();
                let Some(connection) = connection else {
                    continue;
                };

                let mut conn = lock(&connection);
                if !conn.terminated() && !conn.once() {
                    {
                        let mut state = lock(&state);
                        state.websockets.remove(&fd);
                        state.poller.unregister(fd);
                    }

                    if !conn.terminated() {
                        info!("Terminating websocket {}", conn.peer_description());
                    }
                    conn.terminate();
                }
            }
        }
    }
}

impl Drop for WebSocketManager {
    fn drop(&mut self) {
        self.stop();
    }
}
