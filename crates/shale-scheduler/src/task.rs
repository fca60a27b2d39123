//! Task traits and boxed-closure adapters.
//!
//! A task is a single generic parameter of the scheduler, so dispatch
//! within each task kind is static. Heterogeneous task kinds flow through
//! one queue by wrapping them in an enum; `BasicTask` is the simplest
//! adapter, carrying one boxed closure.

use std::fmt;

use crate::context::Context;

/// A unit of work scheduled onto a worker.
///
/// Tasks are moved into queues and run to completion on the worker that
/// picks them up. A task with `sticky() == true` executes on the worker it
/// was submitted to and is never stolen.
pub trait Task: Send + fmt::Debug + 'static {
    /// The work body. Runs on a worker thread with that worker's context.
    fn run(&mut self, ctx: &mut Context);

    /// Whether this task is pinned to the worker it was submitted to.
    fn sticky(&self) -> bool {
        false
    }
}

/// A task deferred until its predicate first returns true.
///
/// The watcher thread evaluates `check()` on each scan and runs the body
/// exactly once when it first observes true. `check()` is expected to be
/// side-effect-free.
pub trait ConditionalTask: Send + fmt::Debug + 'static {
    /// The condition. Evaluated repeatedly by the watcher.
    fn check(&mut self) -> bool;

    /// The body. Executed exactly once after `check()` first returns true.
    fn run(&mut self);
}

/// A task wrapping a boxed closure.
pub struct BasicTask {
    body: Option<Box<dyn FnMut(&mut Context) + Send>>,
    sticky: bool,
}

impl BasicTask {
    /// Create a non-sticky task from a closure.
    pub fn new(body: impl FnMut(&mut Context) + Send + 'static) -> Self {
        BasicTask {
            body: Some(Box::new(body)),
            sticky: false,
        }
    }

    /// Create a sticky task from a closure.
    pub fn sticky(body: impl FnMut(&mut Context) + Send + 'static) -> Self {
        BasicTask {
            body: Some(Box::new(body)),
            sticky: true,
        }
    }
}

impl Task for BasicTask {
    fn run(&mut self, ctx: &mut Context) {
        if let Some(body) = self.body.as_mut() {
            body(ctx);
        }
    }

    fn sticky(&self) -> bool {
        self.sticky
    }
}

impl fmt::Debug for BasicTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicTask")
            .field("sticky", &self.sticky)
            .finish()
    }
}

/// A conditional task wrapping a predicate closure and a one-shot body.
pub struct BasicConditionalTask {
    check: Box<dyn FnMut() -> bool + Send>,
    body: Option<Box<dyn FnOnce() + Send>>,
}

impl BasicConditionalTask {
    pub fn new(
        check: impl FnMut() -> bool + Send + 'static,
        body: impl FnOnce() + Send + 'static,
    ) -> Self {
        BasicConditionalTask {
            check: Box::new(check),
            body: Some(Box::new(body)),
        }
    }
}

impl ConditionalTask for BasicConditionalTask {
    fn check(&mut self) -> bool {
        (self.check)()
    }

    fn run(&mut self) {
        if let Some(body) = self.body.take() {
            body();
        }
    }
}

impl fmt::Debug for BasicConditionalTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicConditionalTask")
            .field("pending", &self.body.is_some())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
