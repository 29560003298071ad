//! Black-box scenarios exercising `green_runtime` the way a caller would:
//! through `init`/`spawn`/`join`/`yield_now`/`nap`/`hand_out`/message ports,
//! never the crate-internal scheduler machinery directly.
//!
//! `runtime::init` owns a single process-wide slot, so these tests cannot
//! run concurrently with each other; `serialize()` below enforces that with
//! a plain mutex guard around every test body.

use green_runtime::config::RuntimeConfig;
use green_runtime::error::RtError;
use green_runtime::runtime;
use green_runtime::tcb::Attr;
use std::sync::{Mutex, MutexGuard, OnceLock};
use std::time::{Duration, Instant};

fn serialize() -> MutexGuard<'static, ()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[test]
fn echo_via_message_port() {
    let _guard = serialize();
    runtime::init(RuntimeConfig::default()).unwrap();

    let worker = runtime::spawn(Attr::default(), || {
        let port = runtime::port_create(Some("worker")).expect("create named port");
        loop {
            let msg = runtime::port_get(port).expect("port_get");
            let text = *msg.payload.downcast::<&str>().expect("expected &str payload");
            if let Some(reply_to) = msg.reply_to {
                let upcased = text.to_uppercase();
                runtime::port_put(reply_to, Box::new(upcased), None).expect("reply put");
            }
        }
    })
    .unwrap();

    // One yield is enough to run `worker` up to its first block point: it
    // is freshly spawned (favoured to run next by default) and has nothing
    // to do but create its port and park in `port_get`.
    runtime::yield_now().unwrap();

    let worker_port = runtime::port_find("worker").expect("worker port registered");
    let my_port = runtime::port_create(None).unwrap();
    runtime::port_put(worker_port, Box::new("hello"), Some(my_port)).unwrap();

    let reply = runtime::port_get(my_port).unwrap();
    let text = *reply.payload.downcast::<String>().unwrap();
    assert_eq!(text, "HELLO");

    runtime::cancel(worker).unwrap();
    runtime::join(worker).unwrap();

    runtime::kill().unwrap();
}

#[test]
fn nested_spawn_and_multiplicative_join() {
    let _guard = serialize();
    runtime::init(RuntimeConfig::default()).unwrap();

    fn t2(n: i64) -> i64 {
        if n < 9 {
            let child = runtime::spawn(Attr::default(), move || t2(n + 1)).unwrap();
            let value = *runtime::join(child).unwrap().downcast::<i64>().unwrap();
            n * value
        } else {
            n
        }
    }

    let root = runtime::spawn(Attr::default(), || t2(1)).unwrap();
    let result = *runtime::join(root).unwrap().downcast::<i64>().unwrap();
    assert_eq!(result, 362_880); // 1*2*...*9

    runtime::kill().unwrap();
}

#[test]
fn cooperative_cpu_loop_and_targeted_yield() {
    let _guard = serialize();
    runtime::init(RuntimeConfig::default()).unwrap();

    let t1 = runtime::spawn(Attr::default(), || {
        let mut acc: i64 = 123;
        for _ in 0..100 {
            acc += 10;
            runtime::yield_now().unwrap();
        }
        acc
    })
    .unwrap();

    // `t1` is brand new and not yet admitted into `ready_q`; a targeted
    // yield at a NEW thread is rejected (spec.md §4.7 requires NEW or
    // READY, but `favor_next` only promotes within `ready_q` — see
    // DESIGN.md's open-question log).
    assert_eq!(runtime::yield_to(t1), Err(RtError::InvalidArgument));

    // Let the scheduler admit `t1` into the ready queue.
    runtime::yield_now().unwrap();

    // Now the explicit target exists in `ready_q` and can be promoted.
    runtime::yield_to(t1).unwrap();

    let result = *runtime::join(t1).unwrap().downcast::<i64>().unwrap();
    assert_eq!(result, 1123);

    // A dead thread is no longer a valid yield target.
    assert_eq!(runtime::yield_to(t1), Err(RtError::InvalidArgument));

    runtime::kill().unwrap();
}

#[test]
fn timer_precision() {
    let _guard = serialize();
    runtime::init(RuntimeConfig::default()).unwrap();

    assert_eq!(runtime::nap(Duration::ZERO), Err(RtError::InvalidArgument));

    let start = Instant::now();
    runtime::nap(Duration::from_millis(200)).unwrap();
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(200));
    assert!(elapsed < Duration::from_millis(200) + Duration::from_millis(300));

    runtime::kill().unwrap();
}

#[test]
fn blocking_syscall_offload_moves_to_a_worker_and_back() {
    let _guard = serialize();
    runtime::init(RuntimeConfig::default().with_worker_threads(2)).unwrap();

    let driver_tid = std::thread::current().id();
    let inner_tid = runtime::hand_out(|| {
        std::thread::sleep(Duration::from_millis(50));
        std::thread::current().id()
    })
    .unwrap();

    assert_ne!(inner_tid, driver_tid, "hand_out should run f() on a worker thread");
    assert_eq!(
        std::thread::current().id(),
        driver_tid,
        "get_back should restore execution to the original driver thread"
    );

    runtime::kill().unwrap();
}
