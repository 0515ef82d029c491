//! Integration tests for the worker pool and the output bridge.

use hyper::Method;
use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};
use strand::http::BufferedResponse;
use strand::pool::WorkerState;
use strand::prelude::*;
use strand_sdk::KeyValue;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Event {
    Header(String, Vec<u8>),
    Head(u16),
    Body(Vec<u8>),
    Finish,
}

/// Records every transport call in order.
#[derive(Clone, Default)]
struct Recorder(Arc<Mutex<Vec<Event>>>);

impl Recorder {
    fn sink(&self) -> Box<dyn ResponseSink> {
        Box::new(RecordingSink(self.0.clone()))
    }

    fn events(&self) -> Vec<Event> {
        self.0.lock().unwrap().clone()
    }

    fn body(&self) -> Vec<u8> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Body(data) => Some(data),
                _ => None,
            })
            .flatten()
            .collect()
    }
}

struct RecordingSink(Arc<Mutex<Vec<Event>>>);

impl ResponseSink for RecordingSink {
    fn set_header(&mut self, name: &str, value: &[u8]) {
        self.0
            .lock()
            .unwrap()
            .push(Event::Header(name.to_string(), value.to_vec()));
    }

    fn write_head(&mut self, status: u16) {
        self.0.lock().unwrap().push(Event::Head(status));
    }

    fn write_body(&mut self, data: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().push(Event::Body(data.to_vec()));
        Ok(data.len())
    }

    fn finish(self: Box<Self>) {
        self.0.lock().unwrap().push(Event::Finish);
    }
}

/// Blocks engine calls until opened.
#[derive(Default)]
struct Gate {
    open: Mutex<bool>,
    changed: Condvar,
}

impl Gate {
    fn wait(&self) {
        let mut open = self.open.lock().unwrap();
        while !*open {
            open = self.changed.wait(open).unwrap();
        }
    }

    fn open(&self) {
        *self.open.lock().unwrap() = true;
        self.changed.notify_all();
    }
}

fn pool(workers: usize, engine: Arc<dyn Engine>) -> Arc<WorkerPool> {
    Arc::new(WorkerPool::initialize(PoolConfig::new().workers(workers), engine).unwrap())
}

fn get(target: &str) -> Request {
    Request::new(Method::GET, target.parse().unwrap()).remote_addr("10.0.0.7:51234")
}

fn lookup<'a>(pairs: &'a [KeyValue], key: &str) -> Option<&'a [u8]> {
    pairs
        .iter()
        .find(|pair| pair.key == key.as_bytes())
        .map(|pair| pair.value.as_slice())
}

fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn test_end_to_end_get() {
    let seen = Arc::new(Mutex::new(None));
    let engine = {
        let seen = seen.clone();
        engine_fn(move |call, bridge| {
            let headers = strand_sdk::decode(call.headers).unwrap();
            let environment = strand_sdk::decode(call.environment).unwrap();
            *seen.lock().unwrap() = Some((headers, environment));

            bridge.emit_line(call.worker, b"HTTP/1.1 200 OK");
            bridge.emit_line(call.worker, b"Content-Type: text/plain");
            bridge.write_body(call.worker, b"hi");
            Ok(())
        })
    };
    let pool = pool(2, Arc::new(engine));

    let recorder = Recorder::default();
    let request = get("/index.php?a=1")
        .header("Host", "example.com")
        .header("Accept", "*/*");
    let outcome = pool.dispatch(request, recorder.sink()).unwrap();

    assert_eq!(outcome.status, 200);
    assert_eq!(outcome.bytes_written, 2);
    assert!(!outcome.failed);
    assert_eq!(
        recorder.events(),
        vec![
            Event::Header("Content-Type".into(), "text/plain".into()),
            Event::Head(200),
            Event::Body(b"hi".to_vec()),
            Event::Finish,
        ]
    );

    let (headers, environment) = seen.lock().unwrap().take().unwrap();
    assert_eq!(lookup(&headers, "host"), Some(&b"example.com"[..]));
    assert_eq!(lookup(&headers, "accept"), Some(&b"*/*"[..]));
    assert_eq!(lookup(&environment, "HTTP_HOST"), Some(&b"example.com"[..]));
    assert_eq!(lookup(&environment, "HTTP_ACCEPT"), Some(&b"*/*"[..]));
    assert_eq!(lookup(&environment, "REMOTE_ADDR"), Some(&b"10.0.0.7"[..]));
    assert_eq!(lookup(&environment, "REMOTE_PORT"), Some(&b"51234"[..]));
    assert_eq!(lookup(&environment, "QUERY_STRING"), Some(&b"a=1"[..]));
    assert_eq!(lookup(&environment, "SCRIPT_NAME"), Some(&b"index"[..]));

    pool.shutdown().unwrap();
}

#[test]
fn test_call_scalars() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let engine = {
        let seen = seen.clone();
        engine_fn(move |call, _bridge| {
            seen.lock().unwrap().push((
                call.protocol,
                call.method.to_string(),
                call.target.to_string(),
                call.query.to_string(),
            ));
            Ok(())
        })
    };
    let pool = pool(1, Arc::new(engine));

    let request = Request::new(Method::POST, "/submit?x=1&y=2".parse().unwrap())
        .version(hyper::Version::HTTP_10);
    pool.dispatch(request, Recorder::default().sink()).unwrap();

    assert_eq!(
        seen.lock().unwrap()[0],
        (
            1000,
            "POST".to_string(),
            "/submit?x=1&y=2".to_string(),
            "x=1&y=2".to_string()
        )
    );
}

#[test]
fn test_zero_byte_response() {
    let engine = engine_fn(|call, bridge| {
        bridge.emit_line(call.worker, b"HTTP/1.1 204 No Content");
        Ok(())
    });
    let pool = pool(1, Arc::new(engine));

    let recorder = Recorder::default();
    let outcome = pool.dispatch(get("/"), recorder.sink()).unwrap();

    assert_eq!(outcome.status, 204);
    assert_eq!(outcome.bytes_written, 0);
    assert_eq!(recorder.events(), vec![Event::Head(204), Event::Finish]);
}

#[test]
fn test_silent_engine_gets_implicit_ok() {
    let pool = pool(1, Arc::new(engine_fn(|_, _| Ok(()))));

    let recorder = Recorder::default();
    let outcome = pool.dispatch(get("/"), recorder.sink()).unwrap();

    assert_eq!(outcome.status, 200);
    assert_eq!(recorder.events(), vec![Event::Head(200), Event::Finish]);
}

#[test]
fn test_out_of_range_status_is_coerced() {
    let engine = engine_fn(|call, bridge| {
        bridge.emit_line(call.worker, b"HTTP/1.1 999 X");
        bridge.emit_line(call.worker, b"not a header line");
        Ok(())
    });
    let pool = pool(1, Arc::new(engine));

    let recorder = Recorder::default();
    let outcome = pool.dispatch(get("/"), recorder.sink()).unwrap();

    assert_eq!(outcome.status, 500);
    assert_eq!(recorder.events(), vec![Event::Head(500), Event::Finish]);
}

#[test]
fn test_headers_precede_status_and_body() {
    let engine = engine_fn(|call, bridge| {
        bridge.emit_line(call.worker, b"X-First: 1");
        bridge.emit_line(call.worker, b"HTTP/1.1 201 Created");
        bridge.emit_line(call.worker, b"X-Second: 2");
        bridge.write_body(call.worker, b"a");
        bridge.emit_line(call.worker, b"X-Late: 3");
        bridge.emit_line(call.worker, b"HTTP/1.1 404 Not Found");
        bridge.write_body(call.worker, b"b");
        Ok(())
    });
    let pool = pool(1, Arc::new(engine));

    let recorder = Recorder::default();
    let outcome = pool.dispatch(get("/"), recorder.sink()).unwrap();

    assert_eq!(outcome.status, 201);
    assert_eq!(
        recorder.events(),
        vec![
            Event::Header("X-First".into(), "1".into()),
            Event::Header("X-Second".into(), "2".into()),
            Event::Head(201),
            Event::Body(b"a".to_vec()),
            Event::Body(b"b".to_vec()),
            Event::Finish,
        ]
    );
}

#[test]
fn test_latin1_status_reason_and_header_value() {
    let engine = engine_fn(|call, bridge| {
        bridge.emit_line(call.worker, b"HTTP/1.1 404 Nicht gef\xfcnden");
        bridge.emit_line(
            call.worker,
            b"Content-Disposition: attachment; filename=\"r\xe9sum\xe9.pdf\"",
        );
        bridge.write_body(call.worker, b"x");
        Ok(())
    });
    let pool = pool(1, Arc::new(engine));

    let recorder = Recorder::default();
    let outcome = pool.dispatch(get("/"), recorder.sink()).unwrap();

    assert_eq!(outcome.status, 404);
    assert_eq!(
        recorder.events(),
        vec![
            Event::Header(
                "Content-Disposition".into(),
                b"attachment; filename=\"r\xe9sum\xe9.pdf\"".to_vec()
            ),
            Event::Head(404),
            Event::Body(b"x".to_vec()),
            Event::Finish,
        ]
    );
}

#[test]
fn test_body_read_in_chunks() {
    let reads = Arc::new(Mutex::new(Vec::new()));
    let engine = {
        let reads = reads.clone();
        engine_fn(move |call, bridge| {
            let mut buf = [0u8; 3];
            for _ in 0..3 {
                let n = bridge.read_body(call.worker, &mut buf);
                reads.lock().unwrap().push(buf[..n].to_vec());
                bridge.write_body(call.worker, &buf[..n]);
            }
            Ok(())
        })
    };
    let pool = pool(1, Arc::new(engine));

    let recorder = Recorder::default();
    let request = Request::new(Method::POST, "/".parse().unwrap()).body("abcdef");
    let outcome = pool.dispatch(request, recorder.sink()).unwrap();

    assert_eq!(
        *reads.lock().unwrap(),
        vec![b"abc".to_vec(), b"def".to_vec(), Vec::new()]
    );
    assert_eq!(recorder.body(), b"abcdef");
    assert_eq!(outcome.bytes_written, 6);
}

#[test]
fn test_read_without_body_returns_zero() {
    let read = Arc::new(AtomicUsize::new(usize::MAX));
    let engine = {
        let read = read.clone();
        engine_fn(move |call, bridge| {
            let mut buf = [0u8; 16];
            read.store(bridge.read_body(call.worker, &mut buf), Ordering::SeqCst);
            Ok(())
        })
    };
    let pool = pool(1, Arc::new(engine));

    pool.dispatch(get("/"), Recorder::default().sink()).unwrap();
    assert_eq!(read.load(Ordering::SeqCst), 0);
}

#[test]
fn test_short_write_is_reported() {
    let accepted = Arc::new(Mutex::new(Vec::new()));
    let engine = {
        let accepted = accepted.clone();
        engine_fn(move |call, bridge| {
            let mut accepted = accepted.lock().unwrap();
            accepted.push(bridge.write_body(call.worker, b"hello world"));
            accepted.push(bridge.write_body(call.worker, b"more"));
            Ok(())
        })
    };
    let pool = pool(1, Arc::new(engine));

    let outcome = pool
        .dispatch(get("/"), Box::new(BufferedResponse::new(4)))
        .unwrap();

    assert_eq!(*accepted.lock().unwrap(), vec![4, 0]);
    assert_eq!(outcome.bytes_written, 4);
    assert!(!outcome.failed);
}

#[test]
fn test_unknown_worker_id_is_noop() {
    let results = Arc::new(Mutex::new(Vec::new()));
    let engine = {
        let results = results.clone();
        engine_fn(move |call, bridge| {
            let stranger = WorkerId::new(99);
            bridge.emit_line(stranger, b"HTTP/1.1 418 I'm a teapot");
            bridge.log(stranger, "ignored", 6);
            let mut buf = [0u8; 4];
            let mut results = results.lock().unwrap();
            results.push(bridge.write_body(stranger, b"nope"));
            results.push(bridge.read_body(stranger, &mut buf));

            bridge.write_body(call.worker, b"ok");
            Ok(())
        })
    };
    let pool = pool(1, Arc::new(engine));

    let recorder = Recorder::default();
    let outcome = pool.dispatch(get("/"), recorder.sink()).unwrap();

    assert_eq!(*results.lock().unwrap(), vec![0, 0]);
    assert_eq!(outcome.status, 200);
    assert_eq!(recorder.body(), b"ok");
}

#[test]
fn test_callbacks_from_another_thread_are_rejected() {
    let written = Arc::new(AtomicUsize::new(usize::MAX));
    let engine = {
        let written = written.clone();
        engine_fn(move |call, bridge| {
            let worker = call.worker;
            thread::scope(|scope| {
                scope.spawn(|| {
                    written.store(bridge.write_body(worker, b"stray"), Ordering::SeqCst);
                    bridge.emit_line(worker, b"HTTP/1.1 500 Oops");
                });
            });
            bridge.write_body(worker, b"mine");
            Ok(())
        })
    };
    let pool = pool(1, Arc::new(engine));

    let recorder = Recorder::default();
    let outcome = pool.dispatch(get("/"), recorder.sink()).unwrap();

    assert_eq!(written.load(Ordering::SeqCst), 0);
    assert_eq!(outcome.status, 200);
    assert_eq!(recorder.body(), b"mine");
}

#[test]
fn test_backpressure_blocks_extra_dispatch() {
    let gate = Arc::new(Gate::default());
    let entered = Arc::new(AtomicUsize::new(0));
    let engine = {
        let gate = gate.clone();
        let entered = entered.clone();
        engine_fn(move |call, bridge| {
            entered.fetch_add(1, Ordering::SeqCst);
            gate.wait();
            bridge.write_body(call.worker, b"ok");
            Ok(())
        })
    };
    let pool = pool(2, Arc::new(engine));

    let dispatchers: Vec<_> = (0..3)
        .map(|_| {
            let pool = pool.clone();
            thread::spawn(move || pool.dispatch(get("/"), Recorder::default().sink()))
        })
        .collect();

    wait_until(|| entered.load(Ordering::SeqCst) == 2);
    thread::sleep(Duration::from_millis(100));
    assert_eq!(entered.load(Ordering::SeqCst), 2);
    let stats = pool.stats();
    assert_eq!(stats.idle, 0);
    assert_eq!(
        stats
            .workers
            .iter()
            .filter(|w| w.state == WorkerState::Busy)
            .count(),
        2
    );
    assert_eq!(dispatchers.iter().filter(|d| d.is_finished()).count(), 0);

    gate.open();
    for dispatcher in dispatchers {
        assert_eq!(dispatcher.join().unwrap().unwrap().status, 200);
    }
    assert_eq!(entered.load(Ordering::SeqCst), 3);
    assert_eq!(pool.stats().idle, 2);
}

#[test]
fn test_busy_count_never_exceeds_workers() {
    let busy = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let engine = {
        let busy = busy.clone();
        let peak = peak.clone();
        engine_fn(move |_, _| {
            let now = busy.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(5));
            busy.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        })
    };
    let pool = pool(3, Arc::new(engine));

    let dispatchers: Vec<_> = (0..8)
        .map(|_| {
            let pool = pool.clone();
            thread::spawn(move || {
                for _ in 0..10 {
                    pool.dispatch(get("/"), Recorder::default().sink()).unwrap();
                }
            })
        })
        .collect();
    for dispatcher in dispatchers {
        dispatcher.join().unwrap();
    }

    assert!(peak.load(Ordering::SeqCst) <= 3);
    let served: u64 = pool.stats().workers.iter().map(|w| w.served).sum();
    assert_eq!(served, 80);
}

#[test]
fn test_failed_worker_leaves_rotation() {
    let engine = engine_fn(|call, bridge| match call.target {
        "/fail" => Err(EngineError::new("script crashed")),
        "/panic" => panic!("interpreter state corrupted"),
        _ => {
            bridge.write_body(call.worker, b"ok");
            Ok(())
        }
    });
    let pool = pool(3, Arc::new(engine));

    let recorder = Recorder::default();
    let outcome = pool.dispatch(get("/fail"), recorder.sink()).unwrap();
    assert!(outcome.failed);
    assert_eq!(outcome.status, 500);
    assert_eq!(recorder.events(), vec![Event::Head(500), Event::Finish]);
    assert_eq!(pool.live_workers(), 2);
    let failed = outcome.worker;

    let outcome = pool.dispatch(get("/panic"), Recorder::default().sink()).unwrap();
    assert!(outcome.failed);
    assert_eq!(outcome.status, 500);
    assert_eq!(pool.live_workers(), 1);

    for _ in 0..3 {
        let recorder = Recorder::default();
        let outcome = pool.dispatch(get("/"), recorder.sink()).unwrap();
        assert_ne!(outcome.worker, failed);
        assert_eq!(recorder.body(), b"ok");
    }

    pool.dispatch(get("/fail"), Recorder::default().sink()).unwrap();
    assert_eq!(pool.live_workers(), 0);
    assert!(matches!(
        pool.dispatch(get("/"), Recorder::default().sink()),
        Err(StrandError::NoWorkers)
    ));
    assert!(pool
        .stats()
        .workers
        .iter()
        .all(|w| w.state == WorkerState::Failed));

    pool.shutdown().unwrap();
}

#[test]
fn test_failure_after_commit_keeps_status() {
    let engine = engine_fn(|call, bridge| {
        bridge.emit_line(call.worker, b"HTTP/1.1 201 Created");
        bridge.write_body(call.worker, b"partial");
        Err(EngineError::new("died mid-response"))
    });
    let pool = pool(2, Arc::new(engine));

    let recorder = Recorder::default();
    let outcome = pool.dispatch(get("/"), recorder.sink()).unwrap();

    assert!(outcome.failed);
    assert_eq!(outcome.status, 201);
    assert_eq!(outcome.bytes_written, 7);
    assert_eq!(recorder.events().last(), Some(&Event::Finish));
}

/// Records which thread every engine entry point ran on.
#[derive(Default)]
struct AffinityEngine {
    calls: Mutex<Vec<(WorkerId, &'static str, ThreadId, Option<String>)>>,
    shutdowns: AtomicUsize,
}

impl AffinityEngine {
    fn record(&self, worker: WorkerId, phase: &'static str) {
        let current = thread::current();
        self.calls.lock().unwrap().push((
            worker,
            phase,
            current.id(),
            current.name().map(str::to_string),
        ));
    }
}

impl Engine for AffinityEngine {
    fn start_worker(&self, worker: WorkerId) -> Result<(), EngineError> {
        self.record(worker, "start");
        Ok(())
    }

    fn execute(&self, call: &EngineCall<'_>, _bridge: &Bridge) -> Result<(), EngineError> {
        self.record(call.worker, "execute");
        Ok(())
    }

    fn stop_worker(&self, worker: WorkerId) {
        self.record(worker, "stop");
    }

    fn shutdown(&self) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn test_worker_stays_on_its_thread() {
    let engine = Arc::new(AffinityEngine::default());
    let pool = pool(3, engine.clone());

    let dispatchers: Vec<_> = (0..4)
        .map(|_| {
            let pool = pool.clone();
            thread::spawn(move || {
                for _ in 0..10 {
                    pool.dispatch(get("/"), Recorder::default().sink()).unwrap();
                }
            })
        })
        .collect();
    for dispatcher in dispatchers {
        dispatcher.join().unwrap();
    }
    pool.shutdown().unwrap();
    drop(pool);

    let calls = engine.calls.lock().unwrap();
    let mut threads: HashMap<WorkerId, ThreadId> = HashMap::new();
    for (worker, _, thread, name) in calls.iter() {
        assert_eq!(*threads.entry(*worker).or_insert(*thread), *thread);
        assert_eq!(name.as_deref(), Some(format!("strand-worker-{}", worker).as_str()));
    }
    assert_eq!(threads.len(), 3);
    let distinct: std::collections::HashSet<_> = threads.values().collect();
    assert_eq!(distinct.len(), 3);

    assert_eq!(calls.iter().filter(|c| c.1 == "execute").count(), 40);
    assert_eq!(calls.iter().filter(|c| c.1 == "start").count(), 3);
    assert_eq!(calls.iter().filter(|c| c.1 == "stop").count(), 3);
    assert_eq!(engine.shutdowns.load(Ordering::SeqCst), 1);
}

#[test]
fn test_shutdown_drains_in_flight_requests() {
    let gate = Arc::new(Gate::default());
    let entered = Arc::new(AtomicUsize::new(0));
    let engine = {
        let gate = gate.clone();
        let entered = entered.clone();
        engine_fn(move |call, bridge| {
            entered.fetch_add(1, Ordering::SeqCst);
            gate.wait();
            bridge.write_body(call.worker, b"done");
            Ok(())
        })
    };
    let pool = pool(2, Arc::new(engine));

    let recorder = Recorder::default();
    let in_flight = {
        let pool = pool.clone();
        let sink = recorder.sink();
        thread::spawn(move || pool.dispatch(get("/slow"), sink))
    };
    wait_until(|| entered.load(Ordering::SeqCst) == 1);

    let shutdown = {
        let pool = pool.clone();
        thread::spawn(move || pool.shutdown())
    };
    wait_until(|| pool.stats().closed);
    assert!(matches!(
        pool.dispatch(get("/"), Recorder::default().sink()),
        Err(StrandError::ShuttingDown)
    ));
    thread::sleep(Duration::from_millis(50));
    assert!(!shutdown.is_finished());

    gate.open();
    let outcome = in_flight.join().unwrap().unwrap();
    assert_eq!(outcome.status, 200);
    assert_eq!(recorder.body(), b"done");
    shutdown.join().unwrap().unwrap();

    assert!(pool
        .stats()
        .workers
        .iter()
        .all(|w| w.state == WorkerState::Stopped));
    assert!(matches!(pool.shutdown(), Err(StrandError::AlreadyShutdown)));
}

#[test]
fn test_engine_log_callback() {
    let engine = engine_fn(|call, bridge| {
        bridge.log(call.worker, "notice from script", strand_sdk::severity::LOG_NOTICE);
        bridge.log(call.worker, "warning from script", strand_sdk::severity::LOG_WARNING);
        Ok(())
    });
    let pool = pool(1, Arc::new(engine));

    let outcome = pool.dispatch(get("/"), Recorder::default().sink()).unwrap();
    assert_eq!(outcome.status, 200);
}
