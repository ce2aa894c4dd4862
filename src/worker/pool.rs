//! Acquire/release discipline for workers.
//!
//! Two backends behind one surface, selected at construction:
//!
//! - **Bounded** (`size > 0`): exactly `size` workers are preallocated and
//!   exist for the lifetime of the pool. `get` blocks until one is free;
//!   `put` on a full pool is a contract violation and aborts.
//! - **Elastic** (`size == 0`): workers are built on demand and recycled
//!   through a free list. `get` never blocks on capacity.
//!
//! The contracts diverge (blocking vs non-blocking, fixed vs growing), so
//! the two are distinct types rather than one type with a flag checked in
//! every method.

use std::sync::Mutex;

use tokio::sync::Semaphore;
use tracing::error;

use super::{Worker, WorkerConfig};

/// A pool of interchangeable workers.
pub enum Pool {
    Bounded(BoundedPool),
    Elastic(ElasticPool),
}

impl Pool {
    pub fn new(size: usize, config: WorkerConfig) -> Self {
        if size > 0 {
            Pool::Bounded(BoundedPool::new(size, &config))
        } else {
            Pool::Elastic(ElasticPool::new(config))
        }
    }

    /// Take a worker out of the pool, waiting for one in bounded mode.
    pub async fn get(&self) -> Worker {
        match self {
            Pool::Bounded(pool) => pool.get().await,
            Pool::Elastic(pool) => pool.get(),
        }
    }

    /// Return a worker. Only workers previously obtained from `get` may be
    /// put back; a bounded pool aborts on overflow.
    pub fn put(&self, worker: Worker) {
        match self {
            Pool::Bounded(pool) => pool.put(worker),
            Pool::Elastic(pool) => pool.put(worker),
        }
    }

    pub fn close(&self) {
        match self {
            Pool::Bounded(pool) => pool.close(),
            Pool::Elastic(pool) => pool.close(),
        }
    }
}

/// Fixed set of preallocated workers behind a counting semaphore.
pub struct BoundedPool {
    workers: Mutex<Vec<Worker>>,
    available: Semaphore,
    capacity: usize,
}

impl BoundedPool {
    fn new(size: usize, config: &WorkerConfig) -> Self {
        let workers = (0..size).map(|_| Worker::new(config)).collect();
        Self {
            workers: Mutex::new(workers),
            available: Semaphore::new(size),
            capacity: size,
        }
    }

    async fn get(&self) -> Worker {
        let permit = self
            .available
            .acquire()
            .await
            .expect("get from a closed worker pool");
        permit.forget();
        self.workers
            .lock()
            .expect("worker pool mutex poisoned")
            .pop()
            .expect("worker pool semaphore out of sync")
    }

    fn put(&self, worker: Worker) {
        let mut workers = self.workers.lock().expect("worker pool mutex poisoned");
        if workers.len() >= self.capacity {
            // The worker accounting is broken and every connection served
            // from here on would be suspect. A panic would only kill the
            // task that happened to trip it; take the whole process down.
            error!(
                capacity = self.capacity,
                "put into a full bounded worker pool, aborting"
            );
            std::process::abort();
        }
        workers.push(worker);
        self.available.add_permits(1);
    }

    fn close(&self) {
        self.available.close();
        self.workers
            .lock()
            .expect("worker pool mutex poisoned")
            .clear();
    }
}

/// Free list that grows on demand; recycled workers keep their buffers.
pub struct ElasticPool {
    free: Mutex<Vec<Worker>>,
    config: WorkerConfig,
}

impl ElasticPool {
    fn new(config: WorkerConfig) -> Self {
        Self {
            free: Mutex::new(Vec::new()),
            config,
        }
    }

    fn get(&self) -> Worker {
        let recycled = self
            .free
            .lock()
            .expect("worker pool mutex poisoned")
            .pop();
        recycled.unwrap_or_else(|| Worker::new(&self.config))
    }

    fn put(&self, worker: Worker) {
        self.free
            .lock()
            .expect("worker pool mutex poisoned")
            .push(worker);
    }

    fn close(&self) {}
}
