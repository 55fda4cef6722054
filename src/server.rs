// SPDX-License-Identifier: MIT

use crate::app::App;
use crate::config::Config;
use crate::error::{AppError, GENERIC_FAILURE_MESSAGE};
use crate::http::RawRequest;
use crate::request::Request;
use crate::response::Response;
use log::{debug, error, info, trace, warn};
use serde_json::json;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::{Duration, Instant};

/// Poll interval of the accept loop while no connection is pending.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Fixed-size pool of worker threads fed through a channel.
pub struct ThreadPool {
    workers: Vec<Worker>,
    sender: Option<mpsc::Sender<Job>>,
}

type Job = Box<dyn FnOnce() + Send + 'static>;

impl ThreadPool {
    /// A pool of `size` workers (at least one).
    pub fn new(size: usize) -> ThreadPool {
        let size = size.max(1);
        let (sender, receiver) = mpsc::channel();
        let receiver = Arc::new(Mutex::new(receiver));
        let workers = (0..size)
            .map(|id| Worker::new(id, Arc::clone(&receiver)))
            .collect();

        ThreadPool {
            workers,
            sender: Some(sender),
        }
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    pub fn execute<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let job = Box::new(f);

        if let Some(ref sender) = self.sender
            && sender.send(job).is_err()
        {
            warn!("Failed to send job to thread pool");
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        drop(self.sender.take());

        for worker in &mut self.workers {
            if let Some(thread) = worker.thread.take()
                && thread.join().is_err()
            {
                warn!("Worker thread {} panicked", worker.id);
            }
        }
    }
}

struct Worker {
    id: usize,
    thread: Option<thread::JoinHandle<()>>,
}

impl Worker {
    fn new(id: usize, receiver: Arc<Mutex<mpsc::Receiver<Job>>>) -> Worker {
        let thread = thread::spawn(move || {
            loop {
                let message = match receiver.lock() {
                    Ok(guard) => guard.recv(),
                    Err(_) => break,
                };

                match message {
                    Ok(job) => job(),
                    Err(_) => break,
                }
            }
            trace!("Worker {id} stopped");
        });

        Worker {
            id,
            thread: Some(thread),
        }
    }
}

/// Bind, accept and serve until a message arrives on `shutdown_rx`.
///
/// The bound address is reported on `addr_tx`, which lets callers bind port 0.
pub fn run_server(
    app: Arc<App>,
    config: &Config,
    shutdown_rx: Option<mpsc::Receiver<()>>,
    addr_tx: Option<mpsc::Sender<SocketAddr>>,
) -> Result<(), AppError> {
    let bind_address = format!("{}:{}", config.listen, config.port);
    debug!("Binding server to address: {bind_address}");
    let listener = TcpListener::bind(&bind_address)?;
    let local_addr = listener.local_addr()?;
    listener.set_nonblocking(true)?;

    if let Some(tx) = addr_tx
        && tx.send(local_addr).is_err()
    {
        return Err(AppError::internal(
            "Failed to report the bound server address",
        ));
    }

    let pool = ThreadPool::new(config.threads);
    info!(
        "{} listening on http://{local_addr} ({} environment, {} workers)",
        config.name,
        config.environment,
        pool.size()
    );

    let max_body_size = config.max_body_size;
    let read_timeout = config.read_timeout;

    'server_loop: loop {
        if let Some(ref rx) = shutdown_rx
            && rx.try_recv().is_ok()
        {
            info!("Shutdown signal received. Shutting down gracefully.");
            break 'server_loop;
        }

        match listener.accept() {
            Ok((stream, peer_addr)) => {
                trace!("Accepted connection from: {peer_addr}");
                if let Err(e) = stream.set_nonblocking(false) {
                    error!("Failed to set stream to blocking mode: {e}");
                    continue;
                }
                if let Err(e) = stream.set_read_timeout(Some(read_timeout)) {
                    warn!("Failed to set read timeout for {peer_addr}: {e}");
                }

                let app = Arc::clone(&app);
                pool.execute(move || {
                    if let Err(e) = handle_connection(&app, stream, peer_addr, max_body_size) {
                        debug!("Connection from {peer_addr} ended with error: {e}");
                    }
                });
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_BACKOFF);
            }
            Err(e) => {
                error!("Error accepting connection: {e}");
            }
        }
    }

    drop(pool);
    info!("Server shut down gracefully.");
    Ok(())
}

/// Serve the single request carried by `stream`.
fn handle_connection(
    app: &App,
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    max_body_size: usize,
) -> Result<(), AppError> {
    let start = Instant::now();

    let raw = match RawRequest::from_stream(&mut stream, max_body_size) {
        Ok(raw) => raw,
        Err(e) => {
            debug!("Malformed request from {peer_addr}: {e}");
            wire_error(&e).send(&mut stream)?;
            return Ok(());
        }
    };

    let mut request = match Request::from_raw(raw, Some(peer_addr)) {
        Ok(request) => request,
        Err(e) => {
            debug!("Rejected request from {peer_addr}: {e}");
            wire_error(&e).send(&mut stream)?;
            return Ok(());
        }
    };

    let response = match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        app.handle(&mut request)
    })) {
        Ok(response) => response,
        Err(_) => {
            error!(
                "Handler panicked on {} {} from {peer_addr}",
                request.method(),
                request.path()
            );
            panic_response()
        }
    };

    let status = response.status_code();
    response.send(&mut stream)?;

    let elapsed = start.elapsed();
    if elapsed > Duration::from_millis(1000) {
        warn!(
            "Slow request {} {} from {peer_addr}: {}ms",
            request.method(),
            request.path(),
            elapsed.as_millis()
        );
    }
    trace!("{peer_addr} answered {status} in {elapsed:?}");
    Ok(())
}

/// Answer for a request that never reached the router.
fn wire_error(e: &AppError) -> Response {
    if e.is_client_error() {
        let mut response = Response::new();
        response.error(e.to_string(), e.status_code(), None);
        response
    } else {
        e.to_response(false)
    }
}

fn panic_response() -> Response {
    let mut response = Response::new();
    response.set_status_code(500);
    response.json(json!({
        "status_code": 500,
        "message": GENERIC_FAILURE_MESSAGE,
    }));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_thread_pool_runs_every_job() {
        let counter = Arc::new(AtomicUsize::new(0));
        {
            let pool = ThreadPool::new(3);
            for _ in 0..20 {
                let counter = Arc::clone(&counter);
                pool.execute(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                });
            }
        }
        assert_eq!(counter.load(Ordering::SeqCst), 20);
    }

    #[test]
    fn test_zero_threads_still_gets_a_worker() {
        assert_eq!(ThreadPool::new(0).size(), 1);
    }

    #[test]
    fn test_wire_error_keeps_client_status() {
        let response = wire_error(&AppError::PayloadTooLarge(10));
        assert_eq!(response.status_code(), 413);
        assert_eq!(
            response.envelope_message().as_deref(),
            Some("Request body too large. Maximum allowed size: 10 bytes")
        );
        assert_eq!(panic_response().status_code(), 500);
    }
}
