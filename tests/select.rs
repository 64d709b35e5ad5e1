use std::cell::Cell;
use std::rc::Rc;
use tracing_subscriber::EnvFilter;
use warren::runtime::{block_on, Config, Runtime};
use warren::select;
use warren::sync::{chan, Fired, Select};
use warren::task::{spawn, yield_now, TaskError};
use warren::RuntimeError;

fn install() {
    dotenv::dotenv().ok();
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// With every case ready, each one is chosen about 1/N of the time.
#[test]
fn ready_cases_are_chosen_uniformly() {
    install();
    const CASES: usize = 4;
    const ROUNDS: usize = 4_000;
    let rt = Runtime::with_config(Config::default().seed(7));
    let counts = rt
        .block_on(async {
            let channels: Vec<_> = (0..CASES).map(|_| chan(1)).collect();
            let mut counts = [0usize; CASES];
            for _ in 0..ROUNDS {
                for ch in &channels {
                    if ch.is_empty() {
                        ch.send(()).await;
                    }
                }
                let mut select = Select::new();
                for ch in &channels {
                    let _ = select.recv(ch);
                }
                let fired = select.await.index().unwrap();
                counts[fired] += 1;
            }
            counts
        })
        .unwrap();
    let expected = ROUNDS / CASES;
    for count in counts {
        assert!(
            count.abs_diff(expected) < expected / 5,
            "unfair choice: {counts:?}"
        );
    }
}

#[test]
fn default_only_when_nothing_is_ready() {
    block_on(async {
        let ch = chan::<u32>(1);
        let got = select! {
            recv(ch) -> n => n,
            default => None,
        };
        assert_eq!(got, None);

        ch.send(3).await;
        let got = select! {
            recv(ch) -> n => n,
            default => None,
        };
        assert_eq!(got, Some(3));
    })
    .unwrap();
}

#[test]
fn empty_select_with_default() {
    block_on(async {
        let mut select = Select::new();
        select.default();
        assert_eq!(select.await, Fired::Default);
    })
    .unwrap();
}

/// A parked select completes exactly one case, and the others are withdrawn
/// from their channels.
#[test]
fn at_most_one_case_fires() {
    install();
    block_on(async {
        let a = chan::<u8>(0);
        let b = chan::<u8>(0);
        let fired = Rc::new(Cell::new(0));
        let (ra, rb, count) = (a.clone(), b.clone(), fired.clone());
        let selector = spawn(async move {
            select! {
                recv(ra) -> v => { count.set(count.get() + 1); v }
                recv(rb) -> v => { count.set(count.get() + 1); v }
            }
        });
        yield_now().await;
        // both channels see the parked receiver, only the first send lands
        assert!(a.try_send(1).is_ok());
        assert!(b.try_send(2).is_err());
        assert_eq!(selector.await.unwrap(), Some(1));
        assert_eq!(fired.get(), 1);
    })
    .unwrap();
}

#[test]
fn parked_send_case() {
    block_on(async {
        let out = chan(0);
        let quit = chan::<()>(0);
        let (tx, stop) = (out.clone(), quit.clone());
        let producer = spawn(async move {
            let mut sent = 0;
            loop {
                select! {
                    send(tx, sent) => sent += 1,
                    recv(stop) -> _ => return sent,
                }
            }
        });
        for expected in 0..5 {
            assert_eq!(out.recv().await, Some(expected));
        }
        quit.close();
        assert_eq!(producer.await.unwrap(), 5);
    })
    .unwrap();
}

#[test]
fn recv_case_sees_close() {
    block_on(async {
        let ch = chan::<String>(0);
        let closer = ch.clone();
        spawn(async move {
            yield_now().await;
            closer.close();
        });
        let mut select = Select::new();
        let case = select.recv(&ch);
        assert_eq!(select.await, Fired::Case(0));
        assert_eq!(case.take_ok(), (String::new(), false));
    })
    .unwrap();
}

#[test]
fn send_case_on_closed_channel_is_fatal() {
    install();
    let rt = Runtime::new();
    let task = rt.spawn(async {
        let ready = chan(1);
        ready.send(1).await;
        let closed = chan(1);
        closed.close();
        // the closed send is fatal even with another case ready
        select! {
            recv(ready) -> _ => (),
            send(closed, 2) => (),
        }
    });
    rt.run().unwrap();
    let result = rt.block_on(task).unwrap();
    assert!(matches!(
        result,
        Err(TaskError::Fatal(RuntimeError::SendOnClosed))
    ));
}

#[test]
fn detached_task_keeps_waiting() {
    block_on(async {
        let ch = chan::<u8>(0);
        let rx = ch.clone();
        let waiter = spawn(async move {
            let mut select = Select::new();
            let _ = select.recv(&rx);
            select.await;
        });
        yield_now().await;
        assert!(!waiter.is_finished());
        drop(waiter);
        // the task is detached, not cancelled, so its receive is still queued
        assert!(ch.try_send(1).is_ok());
    })
    .unwrap();
}

/// A ping pong match between two tasks, ended by closing a channel.
#[test]
fn ping_pong() {
    install();
    block_on(async {
        let ping = chan(0);
        let pong = chan(0);
        let done = chan::<()>(0);
        let (ping2, pong2, done2) = (ping.clone(), pong.clone(), done.clone());
        let player = spawn(async move {
            let mut hits = 0;
            loop {
                select! {
                    recv(ping2) -> ball => {
                        hits += 1;
                        pong2.send(ball.unwrap() + 1).await;
                    }
                    recv(done2) -> _ => return hits,
                }
            }
        });
        let mut ball = 0;
        for _ in 0..10 {
            ping.send(ball).await;
            ball = pong.recv().await.unwrap();
        }
        done.close();
        assert_eq!(ball, 10);
        assert_eq!(player.await.unwrap(), 10);
    })
    .unwrap();
}
