//! End-to-end tests for the Multi-Paxos replicated queue: full replica
//! groups, competing leaders, and randomized replica-to-replica
//! delivery.

use std::thread;
use std::time;

use dds::channel::{Receiver, Sender};
use dds::paxos::{self, OpKind, QueueOperation, Request};
use dds::Reply;

/// Deterministically re-executes a replica's decided log from index 0,
/// mirroring replica execution: strictly in index order, stopping at the
/// first gap, ignoring an operation that already ran at a lower index.
/// Returns the dequeue results and the final queue.
fn replay(report: &paxos::Report) -> (Vec<Option<i64>>, Vec<i64>) {
    let mut queue = std::collections::VecDeque::new();
    let mut dequeued = Vec::new();
    let mut executed: Vec<QueueOperation> = Vec::new();
    let mut index = 0;
    while let Some(operation) = report.log.get(&index) {
        if !executed.contains(operation) {
            match operation.kind {
            | OpKind::Enqueue(value) => queue.push_back(value),
            | OpKind::Dequeue => dequeued.push(queue.pop_front()),
            }
            executed.push(operation.clone());
        }
        index += 1;
    }
    (dequeued, queue.into_iter().collect())
}

/// The report with the longest contiguous decided prefix; at least the
/// replica that decided the final acknowledged operation has them all.
fn most_complete(reports: &[paxos::Report]) -> &paxos::Report {
    reports
        .iter()
        .max_by_key(|report| {
            let mut index = 0;
            while report.log.contains_key(&index) {
                index += 1;
            }
            index
        })
        .expect("no reports")
}

fn assert_logs_agree(reports: &[paxos::Report]) {
    for a in reports {
        for b in reports {
            for (index, operation) in &a.log {
                if let Some(other) = b.log.get(index) {
                    assert_eq!(
                        operation, other,
                        "replicas {} and {} disagree at index {}",
                        a.id, b.id, index
                    );
                }
            }
        }
    }
}

fn dequeue_result(replies: &Receiver<Reply>) -> Option<i64> {
    match replies.recv() {
    | Some(Reply::Dequeued { value }) => value,
    | other => panic!("unexpected reply {:?}", other),
    }
}

#[test]
fn queue_is_fifo() {
    let cluster = paxos::Cluster::new(5);
    let (reply_tx, replies) = dds::channel::fifo();
    let requests: Sender<Request> = cluster.connect(1, reply_tx);

    for (invocation, value) in [(1, 10), (2, 20), (3, 30)] {
        requests.send(Request::Submit(QueueOperation::enqueue(1, invocation, value)));
    }
    for invocation in [4, 5, 6] {
        requests.send(Request::Submit(QueueOperation::dequeue(1, invocation)));
    }

    // Responses arrive from whichever replica decided each dequeue, so
    // arrival order is not significant; the decided order is.
    let mut results: Vec<Option<i64>> = (0..3).map(|_| dequeue_result(&replies)).collect();
    results.sort();
    assert_eq!(results, [Some(10), Some(20), Some(30)]);

    // Let straggling decisions drain before shutting down.
    thread::sleep(time::Duration::from_millis(200));
    requests.send(Request::Stop);
    let reports = cluster.join();

    assert_logs_agree(&reports);
    let (dequeued, queue) = replay(most_complete(&reports));
    assert_eq!(dequeued, [Some(10), Some(20), Some(30)]);
    assert!(queue.is_empty());
}

#[test]
fn end_to_end_five_replicas() {
    let cluster = paxos::Cluster::new(5);
    let (reply_tx, replies) = dds::channel::fifo();
    let requests = cluster.connect(1, reply_tx);

    requests.send(Request::Submit(QueueOperation::enqueue(1, 1, 100)));
    requests.send(Request::Submit(QueueOperation::dequeue(1, 2)));
    assert_eq!(dequeue_result(&replies), Some(100));

    requests.send(Request::Submit(QueueOperation::enqueue(1, 3, 200)));
    requests.send(Request::Submit(QueueOperation::dequeue(1, 4)));
    assert_eq!(dequeue_result(&replies), Some(200));

    thread::sleep(time::Duration::from_millis(200));
    requests.send(Request::Stop);
    let reports = cluster.join();
    assert_eq!(reports.len(), 5);
    assert_logs_agree(&reports);
}

#[test]
fn dequeue_of_empty_queue_reports_none() {
    let cluster = paxos::Cluster::new(3);
    let (reply_tx, replies) = dds::channel::fifo();
    let requests = cluster.connect(1, reply_tx);

    requests.send(Request::Submit(QueueOperation::dequeue(1, 1)));
    assert_eq!(dequeue_result(&replies), None);

    requests.send(Request::Stop);
    cluster.join();
}

#[test]
fn concurrent_submissions_agree_on_one_log() {
    let cluster = paxos::Cluster::new(5);
    let clients: Vec<_> = (1..=2)
        .map(|client| {
            let (reply_tx, replies) = dds::channel::fifo();
            let requests = cluster.connect(client, reply_tx);
            thread::spawn(move || {
                for invocation in 1..=3 {
                    let value = client as i64 * 100 + invocation as i64;
                    requests.send(Request::Submit(QueueOperation::enqueue(
                        client, invocation, value,
                    )));
                }
                // The dequeue response doubles as a barrier: all three
                // enqueues were decided before it.
                requests.send(Request::Submit(QueueOperation::dequeue(client, 4)));
                assert!(dequeue_result(&replies).is_some());
                requests
            })
        })
        .collect();

    let handles: Vec<_> = clients
        .into_iter()
        .map(|client| client.join().expect("client panicked"))
        .collect();
    thread::sleep(time::Duration::from_millis(200));
    handles[0].send(Request::Stop);
    let reports = cluster.join();

    assert_logs_agree(&reports);

    // Every decided operation is one that a client actually submitted.
    let submitted: Vec<QueueOperation> = (1..=2)
        .flat_map(|client| {
            (1..=3)
                .map(move |invocation| {
                    QueueOperation::enqueue(client, invocation, client as i64 * 100 + invocation as i64)
                })
                .chain(std::iter::once(QueueOperation::dequeue(client, 4)))
        })
        .collect();
    for report in &reports {
        for operation in report.log.values() {
            assert!(
                submitted.contains(operation),
                "replica {} decided an operation nobody submitted: {:?}",
                report.id,
                operation
            );
        }
    }

    // Replaying the most complete log yields defined dequeue results:
    // enqueues outnumber dequeues in every prefix-respecting order.
    let (dequeued, _) = replay(most_complete(&reports));
    assert!(dequeued.len() <= 2);
}
