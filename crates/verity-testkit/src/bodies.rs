//! Test bodies with scripted behaviour

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use verity_core::{fail, Interrupt, TestBody};

/// Shared invocation counter
#[derive(Debug, Clone, Default)]
pub struct CallCounter(Arc<AtomicUsize>);

impl CallCounter {
    /// Counter at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment and return the 1-based call number
    pub fn hit(&self) -> usize {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Calls so far
    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

/// Ordered log of side effects observed by bodies
#[derive(Debug, Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    /// Empty log
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event
    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().push(event.into());
    }

    /// Snapshot of the events
    pub fn events(&self) -> Vec<String> {
        self.0.lock().clone()
    }
}

/// Body that passes and counts its calls
pub fn counting_body(calls: &CallCounter) -> TestBody {
    let calls = calls.clone();
    TestBody::sync(move |_| {
        calls.hit();
        Ok(())
    })
}

/// Body passing on its first `passes` calls and failing afterwards
pub fn pass_first(passes: usize, calls: &CallCounter) -> TestBody {
    let calls = calls.clone();
    TestBody::sync(move |_| {
        let n = calls.hit();
        if n <= passes {
            Ok(())
        } else {
            fail(format!("call {n} past the first {passes}"))
        }
    })
}

/// Body that panics with `message`
pub fn panicking_body(message: &'static str) -> TestBody {
    TestBody::sync(move |_| panic!("{message}"))
}

/// Body that returns a defect
pub fn erroring_body(message: &'static str) -> TestBody {
    TestBody::sync(move |_| Err(Interrupt::error(message)))
}

/// Async body sleeping for `delay` before passing
pub fn sleeping_body(delay: Duration) -> TestBody {
    TestBody::asynchronous(move |_| async move {
        tokio::time::sleep(delay).await;
        Ok(())
    })
}

/// Body that returns `interrupt()` after logging `before`, then would log
/// `after` had it continued
pub fn interrupting_body(log: &EventLog, interrupt: fn() -> Interrupt) -> TestBody {
    let log = log.clone();
    TestBody::sync(move |_| {
        log.push("before");
        let signal: Result<(), Interrupt> = Err(interrupt());
        signal?;
        log.push("after");
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_is_one_based() {
        let calls = CallCounter::new();
        assert_eq!(calls.hit(), 1);
        assert_eq!(calls.hit(), 2);
        assert_eq!(calls.get(), 2);
    }
}
