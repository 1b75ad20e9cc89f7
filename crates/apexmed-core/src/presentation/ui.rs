use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;
use std::sync::Mutex;
use std::thread::{self, JoinHandle, ThreadId};

use tokio::sync::oneshot;
use tracing::{debug, warn};

use super::lifecycle::ContainerHandle;
use crate::cache::CachedBid;

pub type UiTask = Box<dyn FnOnce() + Send + 'static>;

/// Runs tasks on the host's UI-affinity thread.
pub trait UiExecutor: Send + Sync {
    /// Queue `task`. Returns false if the UI thread is gone.
    fn dispatch(&self, task: UiTask) -> bool;
}

/// Dedicated thread running UI tasks one at a time, in submission order.
#[derive(Debug)]
pub struct UiThread {
    sender: Mutex<Option<mpsc::Sender<UiTask>>>,
    thread_id: ThreadId,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl UiThread {
    pub fn spawn(name: &str) -> io::Result<Self> {
        let (sender, receiver) = mpsc::channel::<UiTask>();
        let join = thread::Builder::new().name(name.to_owned()).spawn(move || {
            for task in receiver {
                // A panicking task fails only its own presentation.
                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(task)) {
                    warn!(panic = panic_message(payload.as_ref()), "ui task panicked");
                }
            }
        })?;

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            thread_id: join.thread().id(),
            join: Mutex::new(Some(join)),
        })
    }

    pub fn is_current(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    /// Stop accepting tasks and wait for queued ones to finish.
    pub fn shutdown(&self) {
        self.sender
            .lock()
            .expect("ui thread lock is not poisoned")
            .take();
        let join = self
            .join
            .lock()
            .expect("ui thread lock is not poisoned")
            .take();
        if let Some(join) = join {
            if join.thread().id() != thread::current().id() && join.join().is_err() {
                warn!("ui thread panicked");
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

impl UiExecutor for UiThread {
    fn dispatch(&self, task: UiTask) -> bool {
        let sender = self.sender.lock().expect("ui thread lock is not poisoned");
        match sender.as_ref() {
            Some(sender) => sender.send(task).is_ok(),
            None => false,
        }
    }
}

impl Drop for UiThread {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Signals the end of a render back into the presentation state machine.
///
/// Dropping it without calling [`RenderCompletion::complete`] or
/// [`RenderCompletion::fail`] fails the presentation.
#[derive(Debug)]
pub struct RenderCompletion {
    sender: oneshot::Sender<Result<(), String>>,
}

impl RenderCompletion {
    pub(crate) fn channel() -> (Self, oneshot::Receiver<Result<(), String>>) {
        let (sender, receiver) = oneshot::channel();
        (Self { sender }, receiver)
    }

    pub fn complete(self) {
        if self.sender.send(Ok(())).is_err() {
            debug!("render completed after presentation ended");
        }
    }

    pub fn fail(self, message: impl Into<String>) {
        if self.sender.send(Err(message.into())).is_err() {
            debug!("render failed after presentation ended");
        }
    }
}

/// What the render primitive receives on the UI thread.
#[derive(Debug)]
pub struct RenderRequest {
    pub request_id: u64,
    pub container: ContainerHandle,
    pub bid: CachedBid,
    pub completion: RenderCompletion,
}

/// Host render primitive, invoked once per presentation on the UI thread.
pub type RenderAction = Box<dyn FnOnce(RenderRequest) + Send + 'static>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn tasks_run_on_the_ui_thread_in_order() {
        let ui = Arc::new(UiThread::spawn("apexmed-ui-test").expect("spawn"));
        let (tx, rx) = mpsc::channel();

        for index in 0..3 {
            let tx = tx.clone();
            let ui_ref = Arc::clone(&ui);
            assert!(ui.dispatch(Box::new(move || {
                tx.send((index, ui_ref.is_current())).expect("send");
            })));
        }

        let seen: Vec<(i32, bool)> = (0..3).map(|_| rx.recv().expect("recv")).collect();
        assert_eq!(seen, vec![(0, true), (1, true), (2, true)]);
        assert!(!ui.is_current());
    }

    #[test]
    fn panicking_task_does_not_stop_the_thread() {
        let ui = UiThread::spawn("apexmed-ui-test").expect("spawn");
        let (tx, rx) = mpsc::channel();

        assert!(ui.dispatch(Box::new(|| panic!("render blew up"))));
        assert!(ui.dispatch(Box::new(move || tx.send("ran").expect("send"))));

        assert_eq!(rx.recv().expect("recv"), "ran");
    }

    #[test]
    fn dispatch_after_shutdown_is_refused() {
        let ui = UiThread::spawn("apexmed-ui-test").expect("spawn");
        ui.shutdown();

        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        assert!(!ui.dispatch(Box::new(move || flag.store(true, Ordering::SeqCst))));
        assert!(!ran.load(Ordering::SeqCst));
    }
}
