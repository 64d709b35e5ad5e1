use std::cell::{Cell, RefCell};
use std::rc::Rc;
use tracing_subscriber::EnvFilter;
use warren::runtime::{block_on, Runtime};
use warren::sync::{chan, Chan};
use warren::task::{spawn, yield_now, TaskError, TaskState};
use warren::unwind::{defer, frame, recover};
use warren::RuntimeError;

fn install() {
    dotenv::dotenv().ok();
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// `c` sends on a fresh channel never block, the next one blocks until a receive.
#[test]
fn capacity_bounds_blocking_sends() {
    install();
    for cap in 0..5 {
        let rt = Runtime::new();
        let ch = chan(cap);
        let tx = ch.clone();
        let sent = Rc::new(Cell::new(0));
        let count = sent.clone();
        let sender = rt.spawn(async move {
            for i in 0..=cap {
                tx.send(i).await;
                count.set(count.get() + 1);
            }
        });
        rt.block_on(async {
            yield_now().await;
            assert_eq!(sent.get(), cap);
            assert_eq!(sender.state(), TaskState::Blocked);
            assert_eq!(ch.len(), cap);
            assert_eq!(ch.recv().await, Some(0));
            yield_now().await;
            assert_eq!(sent.get(), cap + 1);
            assert!(sender.is_finished());
        })
        .unwrap();
    }
}

/// An unbuffered send hands the value straight to the receiver.
#[test]
fn unbuffered_rendezvous() {
    install();
    let rt = Runtime::new();
    let ch = chan(0);
    let observed = Rc::new(RefCell::new(Vec::new()));
    let (tx, log) = (ch.clone(), observed.clone());
    rt.spawn(async move {
        for i in 0..3 {
            tx.send(i).await;
            log.borrow_mut().push(tx.len());
        }
    });
    let received = rt
        .block_on(async {
            let mut received = vec![];
            for _ in 0..3 {
                received.push(ch.recv().await.unwrap());
                assert!(ch.is_empty());
            }
            received
        })
        .unwrap();
    rt.run().unwrap();
    assert_eq!(received, [0, 1, 2]);
    assert_eq!(*observed.borrow(), [0, 0, 0]);
}

#[test]
fn recv_on_closed_channel_keeps_returning_zero() {
    block_on(async {
        let ch = chan::<i64>(3);
        ch.send(5).await;
        ch.close();
        assert_eq!(ch.recv_ok().await, (5, true));
        for _ in 0..10 {
            assert_eq!(ch.recv_ok().await, (0, false));
            assert_eq!(ch.recv().await, None);
        }
    })
    .unwrap();
}

#[test]
fn send_on_closed_channel_is_fatal() {
    install();
    let rt = Runtime::new();
    let ch = chan::<u8>(4);
    ch.close();
    let deferred = Rc::new(Cell::new(false));
    let (tx, ran) = (ch.clone(), deferred.clone());
    let sender = rt.spawn(async move {
        defer(move || ran.set(true));
        // not even a frame that recovers can intercept it
        frame(async {
            defer(|| assert!(recover().is_none()));
            tx.send(1).await;
        })
        .await;
    });
    rt.run().unwrap();
    assert!(!deferred.get());
    let result = rt.block_on(sender).unwrap();
    assert!(matches!(
        result,
        Err(TaskError::Fatal(RuntimeError::SendOnClosed))
    ));
}

#[test]
fn double_close_is_fatal() {
    install();
    let result = block_on(async {
        let ch = chan::<()>(0);
        ch.close();
        ch.close();
    });
    assert!(matches!(
        result,
        Err(warren::Error::Main(TaskError::Fatal(
            RuntimeError::CloseOfClosed
        )))
    ));
}

#[test]
fn close_wakes_every_parked_task() {
    install();
    let rt = Runtime::new();
    let ch = chan::<u8>(0);
    let receivers: Vec<_> = (0..3)
        .map(|_| {
            let ch = ch.clone();
            rt.spawn(async move { ch.recv().await })
        })
        .collect();
    let senders = chan::<u8>(0);
    let parked_sender = {
        let senders = senders.clone();
        rt.spawn(async move { senders.send(1).await })
    };
    rt.block_on(async {
        yield_now().await;
        assert_eq!(warren::runtime::current().unwrap().runnable_tasks(), 1);
        ch.close();
        senders.close();
    })
    .unwrap();
    rt.run().unwrap();
    for receiver in receivers {
        assert_eq!(rt.block_on(receiver).unwrap().unwrap(), None);
    }
    let result = rt.block_on(parked_sender).unwrap();
    assert!(matches!(
        result,
        Err(TaskError::Fatal(RuntimeError::SendOnClosed))
    ));
}

/// Parked senders are served in arrival order, behind the buffered values.
#[test]
fn fifo_order() {
    block_on(async {
        let ch = chan(2);
        for i in 0..5 {
            let ch = ch.clone();
            spawn(async move { ch.send(i).await });
        }
        yield_now().await;
        let mut got = vec![];
        while got.len() < 5 {
            got.push(ch.recv().await.unwrap());
        }
        assert_eq!(got, [0, 1, 2, 3, 4]);
    })
    .unwrap();
}

#[test]
fn channels_of_channels() {
    block_on(async {
        let requests: Chan<(u32, Chan<u32>)> = chan(0);
        let server = requests.clone();
        spawn(async move {
            while let Some((n, reply)) = server.recv().await {
                reply.send(n * 2).await;
            }
        });
        for n in 1..4 {
            let reply = chan(0);
            requests.send((n, reply.clone())).await;
            assert_eq!(reply.recv().await, Some(n * 2));
        }
        requests.close();
    })
    .unwrap();
}

#[test]
fn try_ops_inside_tasks() {
    block_on(async {
        let ch = chan(0);
        let rx = ch.clone();
        let receiver = spawn(async move { rx.recv().await });
        yield_now().await;
        // the parked receiver makes an unbuffered send succeed without parking
        ch.try_send("now").unwrap();
        assert_eq!(receiver.await.unwrap(), Some("now"));
        assert!(ch.try_send("later").is_err());
    })
    .unwrap();
}
