use std::{
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
        mpsc,
    },
    thread,
    time::{Duration, Instant},
};

use log::{debug, error, warn};
use thiserror::Error;

pub type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("worker pool is shut down")]
    Closed,
}

/// Fixed set of worker threads fed from a shared queue.
///
/// At most `size + queue` jobs are in flight (running or waiting) at once;
/// callers check [`ThreadPool::is_saturated`] before submitting.
#[derive(Debug)]
pub struct ThreadPool {
    workers: Vec<Worker>,
    sender: Option<mpsc::Sender<Job>>,
    in_flight: Arc<AtomicUsize>,
    capacity: usize,
}

impl ThreadPool {
    pub fn new(size: usize, queue: usize) -> Self {
        assert!(size > 0);

        let mut workers = Vec::with_capacity(size);
        let (sender, receiver) = mpsc::channel();

        let receiver = Arc::new(Mutex::new(receiver));
        let in_flight = Arc::new(AtomicUsize::new(0));
        let sender = Some(sender);

        for i in 0..size {
            workers.push(Worker::new(i, Arc::clone(&receiver), Arc::clone(&in_flight)));
        }

        Self {
            workers,
            sender,
            in_flight,
            capacity: size + queue,
        }
    }

    /// Jobs submitted and not yet finished.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn is_saturated(&self) -> bool {
        self.in_flight() >= self.capacity
    }

    pub fn execute<F>(&self, f: F) -> Result<(), PoolError>
    where
        F: FnOnce() + Send + 'static,
    {
        let sender = self.sender.as_ref().ok_or(PoolError::Closed)?;
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        if sender.send(Box::new(f)).is_err() {
            self.in_flight.fetch_sub(1, Ordering::AcqRel);
            return Err(PoolError::Closed);
        }
        Ok(())
    }

    /// Stops taking jobs and waits for the workers to finish what is queued.
    ///
    /// With a `deadline`, workers still busy once it passes are detached and
    /// counted in the return value instead of being joined.
    pub fn shutdown(&mut self, deadline: Option<Duration>) -> usize {
        drop(self.sender.take());

        let started = Instant::now();
        let mut abandoned = 0;
        for worker in self.workers.drain(..) {
            if let Some(deadline) = deadline {
                while !worker.thread.is_finished() && started.elapsed() < deadline {
                    thread::sleep(Duration::from_millis(10));
                }
                if !worker.thread.is_finished() {
                    warn!("abandoning worker {} at shutdown deadline", worker.id);
                    abandoned += 1;
                    continue;
                }
            }

            debug!("shutting down worker {}", worker.id);
            if worker.thread.join().is_err() {
                error!("worker {} panicked", worker.id);
            }
        }
        abandoned
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shutdown(None);
    }
}

#[derive(Debug)]
struct Worker {
    id: usize,
    thread: thread::JoinHandle<()>,
}

impl Worker {
    fn new(
        id: usize,
        receiver: Arc<Mutex<mpsc::Receiver<Job>>>,
        in_flight: Arc<AtomicUsize>,
    ) -> Self {
        let thread = thread::spawn(move || {
            loop {
                let msg = match receiver.lock() {
                    Ok(receiver) => receiver.recv(),
                    Err(_) => break,
                };
                match msg {
                    Ok(job) => {
                        debug!("worker {id} handling a connection");
                        if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                            error!("worker {id} recovered from a panicking job");
                        }
                        in_flight.fetch_sub(1, Ordering::AcqRel);
                    }
                    Err(_) => {
                        debug!("worker {id} disconnected");
                        break;
                    }
                }
            }
        });

        Self { id, thread }
    }
}
