//! Bounded, order-preserving fan-out over units of work.
//!
//! Up to `limit` units run concurrently. The stream announces each unit
//! with [`UnitEvent::Started`] before its work is first polled, and reports
//! [`UnitEvent::Finished`] in input order, so a consumer that emits a
//! progress event on start and a result event on finish keeps both in
//! scene order even when later scenes finish first. With `limit > 1` the
//! starts of later units may come before the finish of earlier ones.
//!
//! Cancellation is checked when a unit is admitted and again when it is
//! first polled, which makes it effective at the next unit boundary.

use std::future::Future;

use futures::future::BoxFuture;
use futures::stream::{self, BoxStream, FuturesOrdered, StreamExt};
use futures::FutureExt;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq)]
pub enum UnitOutcome<R> {
    Finished(R),
    /// The token was cancelled before this unit started.
    Cancelled,
}

#[derive(Debug, Clone, PartialEq)]
pub enum UnitEvent<T, R> {
    /// The unit was admitted; its work has not run yet. `index` is 0-based.
    Started { index: usize, item: T },
    Finished {
        index: usize,
        item: T,
        outcome: UnitOutcome<R>,
    },
}

type InFlight<'a, T, R> = FuturesOrdered<BoxFuture<'a, (usize, T, UnitOutcome<R>)>>;

/// Run `work` over `items` with at most `limit` in flight.
///
/// A unit cancelled before admission gets no `Started` event.
pub fn ordered_units<'a, T, R, F, Fut>(
    items: Vec<T>,
    limit: usize,
    cancel: CancellationToken,
    work: F,
) -> BoxStream<'a, UnitEvent<T, R>>
where
    T: Clone + Send + 'a,
    R: Send + 'a,
    F: Fn(T) -> Fut + Send + 'a,
    Fut: Future<Output = R> + Send + 'a,
{
    let limit = limit.max(1);
    let pending = items.into_iter().enumerate();
    let in_flight: InFlight<'a, T, R> = FuturesOrdered::new();

    stream::unfold(
        (pending, in_flight, work, cancel),
        move |(mut pending, mut in_flight, work, cancel)| async move {
            loop {
                if in_flight.len() < limit {
                    if let Some((index, item)) = pending.next() {
                        if cancel.is_cancelled() {
                            in_flight.push_back(
                                futures::future::ready((index, item, UnitOutcome::Cancelled)).boxed(),
                            );
                            continue;
                        }
                        let unit = work(item.clone());
                        let token = cancel.clone();
                        let owned = item.clone();
                        in_flight.push_back(
                            async move {
                                if token.is_cancelled() {
                                    return (index, owned, UnitOutcome::Cancelled);
                                }
                                (index, owned, UnitOutcome::Finished(unit.await))
                            }
                            .boxed(),
                        );
                        let event = UnitEvent::Started { index, item };
                        return Some((event, (pending, in_flight, work, cancel)));
                    }
                }
                let (index, item, outcome) = in_flight.next().await?;
                let event = UnitEvent::Finished {
                    index,
                    item,
                    outcome,
                };
                return Some((event, (pending, in_flight, work, cancel)));
            }
        },
    )
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    fn finished<T, R>(events: Vec<UnitEvent<T, R>>) -> Vec<(T, UnitOutcome<R>)> {
        events
            .into_iter()
            .filter_map(|e| match e {
                UnitEvent::Finished { item, outcome, .. } => Some((item, outcome)),
                UnitEvent::Started { .. } => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn results_keep_input_order() {
        let events: Vec<_> = ordered_units(vec![1u64, 2, 3, 4], 4, CancellationToken::new(), |n| async move {
            // Later items finish first.
            tokio::time::sleep(Duration::from_millis(40 - n * 10)).await;
            n * 10
        })
        .collect()
        .await;

        assert_eq!(
            finished(events),
            vec![
                (1, UnitOutcome::Finished(10)),
                (2, UnitOutcome::Finished(20)),
                (3, UnitOutcome::Finished(30)),
                (4, UnitOutcome::Finished(40)),
            ]
        );
    }

    #[tokio::test]
    async fn start_is_announced_before_work_runs() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut stream = {
            let log = Arc::clone(&log);
            ordered_units(vec![1, 2, 3], 1, CancellationToken::new(), move |n: i32| {
                let log = Arc::clone(&log);
                async move {
                    log.lock().unwrap().push(format!("run {n}"));
                    n
                }
            })
        };

        while let Some(event) = stream.next().await {
            let line = match event {
                UnitEvent::Started { index, .. } => format!("start {}", index + 1),
                UnitEvent::Finished { index, .. } => format!("finish {}", index + 1),
            };
            log.lock().unwrap().push(line);
        }

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "start 1", "run 1", "finish 1", "start 2", "run 2", "finish 2", "start 3", "run 3",
                "finish 3",
            ]
        );
    }

    #[tokio::test]
    async fn starts_and_finishes_are_each_in_order() {
        let events: Vec<_> = ordered_units(vec![3u64, 1, 2], 2, CancellationToken::new(), |n| async move {
            tokio::time::sleep(Duration::from_millis(n * 10)).await;
            n
        })
        .collect()
        .await;

        let starts: Vec<usize> = events
            .iter()
            .filter_map(|e| match e {
                UnitEvent::Started { index, .. } => Some(*index),
                UnitEvent::Finished { .. } => None,
            })
            .collect();
        let finishes: Vec<usize> = events
            .iter()
            .filter_map(|e| match e {
                UnitEvent::Finished { index, .. } => Some(*index),
                UnitEvent::Started { .. } => None,
            })
            .collect();
        assert_eq!(starts, vec![0, 1, 2]);
        assert_eq!(finishes, vec![0, 1, 2]);

        // Every unit is announced before it is reported.
        for index in 0..3 {
            let start = events
                .iter()
                .position(|e| matches!(e, UnitEvent::Started { index: i, .. } if *i == index));
            let finish = events
                .iter()
                .position(|e| matches!(e, UnitEvent::Finished { index: i, .. } if *i == index));
            assert!(start < finish);
        }
    }

    #[tokio::test]
    async fn concurrency_is_bounded() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let stream = {
            let in_flight = Arc::clone(&in_flight);
            let peak = Arc::clone(&peak);
            ordered_units((0..8).collect::<Vec<u32>>(), 3, CancellationToken::new(), move |_| {
                let in_flight = Arc::clone(&in_flight);
                let peak = Arc::clone(&peak);
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                }
            })
        };
        let results = finished(stream.collect().await);

        assert_eq!(results.len(), 8);
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert!(peak.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn cancelled_units_are_not_run() {
        let cancel = CancellationToken::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let mut stream = {
            let cancel = cancel.clone();
            let runs = Arc::clone(&runs);
            ordered_units(vec![1, 2, 3], 1, cancel, move |n: i32| {
                let runs = Arc::clone(&runs);
                async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                    n
                }
            })
        };

        assert_eq!(stream.next().await, Some(UnitEvent::Started { index: 0, item: 1 }));
        assert_eq!(
            stream.next().await,
            Some(UnitEvent::Finished {
                index: 0,
                item: 1,
                outcome: UnitOutcome::Finished(1)
            })
        );
        cancel.cancel();
        let rest = finished(stream.collect().await);
        assert_eq!(rest, vec![(2, UnitOutcome::Cancelled), (3, UnitOutcome::Cancelled)]);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }
}
