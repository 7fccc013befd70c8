use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Condvar, Mutex};
use std::task::{Context, Poll, Waker};

use crate::error::TaskError;

struct State<T> {
    completed: bool,
    value: Option<Result<T, TaskError>>,
    wakers: Vec<Waker>,
}

struct Inner<T> {
    state: Mutex<State<T>>,
    ready: Condvar,
}

/// Single-assignment result slot.
///
/// The producer calls [`complete`](Promise::complete) once; later calls are
/// ignored. A consumer either blocks in [`wait`](Promise::wait) or awaits
/// the promise. The value is handed out once; a second consumer sees
/// [`TaskError::Consumed`].
pub struct Promise<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Promise<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    completed: false,
                    value: None,
                    wakers: Vec::new(),
                }),
                ready: Condvar::new(),
            }),
        }
    }

    /// A promise that is already complete.
    pub fn completed(result: Result<T, TaskError>) -> Self {
        let promise = Self::new();
        promise.complete(result);
        promise
    }

    /// Assign the result. Returns `false` if a result was already assigned.
    pub fn complete(&self, result: Result<T, TaskError>) -> bool {
        let wakers = {
            let mut state = self.inner.state.lock().expect("lock poisoned");
            if state.completed {
                return false;
            }
            state.completed = true;
            state.value = Some(result);
            std::mem::take(&mut state.wakers)
        };
        self.inner.ready.notify_all();
        for waker in wakers {
            waker.wake();
        }
        true
    }

    pub fn is_complete(&self) -> bool {
        self.inner.state.lock().expect("lock poisoned").completed
    }

    /// Block until the result is assigned, then take it.
    pub fn wait(&self) -> Result<T, TaskError> {
        let mut state = self.inner.state.lock().expect("lock poisoned");
        while !state.completed {
            state = self.inner.ready.wait(state).expect("lock poisoned");
        }
        state.value.take().unwrap_or(Err(TaskError::Consumed))
    }
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for Promise<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Future for Promise<T> {
    type Output = Result<T, TaskError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.inner.state.lock().expect("lock poisoned");
        if state.completed {
            return Poll::Ready(state.value.take().unwrap_or(Err(TaskError::Consumed)));
        }
        if !state.wakers.iter().any(|w| w.will_wake(cx.waker())) {
            state.wakers.push(cx.waker().clone());
        }
        Poll::Pending
    }
}

impl<T> std::fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Promise")
            .field("complete", &self.is_complete())
            .finish()
    }
}
