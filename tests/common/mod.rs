use std::sync::Once;

use promise_then::{MicrotaskQueue, Scheduler};

static INIT_LOGGING: Once = Once::new();

pub fn init_test_logging() {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_test_writer()
            .with_target(true)
            .with_ansi(false)
            .try_init();
    });
}

#[allow(dead_code)]
pub fn queue() -> (MicrotaskQueue, Scheduler) {
    init_test_logging();
    let queue = MicrotaskQueue::new();
    let scheduler = queue.scheduler();
    (queue, scheduler)
}
