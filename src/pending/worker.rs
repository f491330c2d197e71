use crate::pending::model::{QuerySink, SyncModel};
use crate::pending::queue::{ItemsGuard, PendingItemQueue};
use crate::time::Clock;
use std::io;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

impl<M: SyncModel, S: QuerySink, C: Clock> PendingItemQueue<M, S, C> {
    /// Activates the queue and spawns its worker thread. Enqueues are only accepted from here on.
    pub fn start(self: &Arc<Self>) -> io::Result<()> {
        let mut worker = self.worker.lock().expect("PendingItemQueue.worker mutex guard poison");
        if worker.is_some() {
            return Ok(());
        }

        self.active.store(true, Ordering::SeqCst);
        let queue = self.clone();
        let handle = thread::Builder::new()
            .name("pending-items".into())
            .spawn(move || queue.run_worker());
        match handle {
            Ok(handle) => {
                *worker = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.active.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    /// Deactivates the queue and waits for the worker to flush what it can.
    pub fn stop(&self) {
        self.active.store(false, Ordering::SeqCst);
        {
            // Under the lock, so the worker cannot miss the wakeup.
            let _items = self.lock_items();
            self.wakeup.notify_all();
        }

        let handle = self
            .worker
            .lock()
            .expect("PendingItemQueue.worker mutex guard poison")
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                slog::error!(self.logger, "Pending items worker panicked");
            }
        }
    }

    fn can_continue(&self, items: &ItemsGuard<'_, M>) -> bool {
        if !self.is_active() {
            return true;
        }

        !items.is_empty()
            && self.sink().is_connected()
            && self.sink().pending_query_count() < self.options.max_pending_queries as i64
    }

    fn run_worker(self: Arc<Self>) {
        slog::debug!(self.logger, "Pending items worker started");

        let mut items = self.lock_items();
        while self.is_active() {
            // Timed waits, so a reconnect without any enqueue still gets noticed.
            while !self.can_continue(&items) {
                items = self.wait(items, self.options.poll_interval);
            }
            if !self.is_active() {
                break;
            }

            let (guard, pass) = self.dequeue_locked(items);
            items = guard;
            if pass.retry_after > Duration::from_secs(0) {
                items = self.wait(items, pass.retry_after);
            }
        }

        self.drain(items);
    }

    /// Processes what is left without the debounce gate until a pass gets nothing done.
    fn drain<'a>(&'a self, mut items: ItemsGuard<'a, M>) {
        let mut flushed = 0usize;
        while !items.is_empty() {
            let (guard, pass) = self.dequeue_locked(items);
            items = guard;
            if !pass.progressed {
                break;
            }
            flushed += 1;
        }

        if items.is_empty() {
            slog::debug!(self.logger, "Flushed {} pending items on shutdown", flushed);
        } else {
            slog::warn!(
                self.logger,
                "Dropping {} pending items that could not be processed before shutdown",
                items.len()
            );
            items.clear();
        }
    }

    fn wait<'a>(&'a self, items: ItemsGuard<'a, M>, timeout: Duration) -> ItemsGuard<'a, M> {
        let (items, _) = self
            .wakeup
            .wait_timeout(items, timeout)
            .expect("PendingItemQueue.items mutex guard poison");
        items
    }
}
