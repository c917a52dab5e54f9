use std::{
    future::Future,
    task::{Context, Poll},
    thread,
    time::Duration,
};

use futures::{task::noop_waker_ref, Stream, StreamExt};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Drives a store client future to completion from synchronous code.
///
/// The tokio runtime started in `main` owns the I/O driver, so the future makes
/// progress between polls even though nothing ever wakes this thread.
pub fn poll_until_ready<Fut, T>(future: Fut) -> T
where
    Fut: Future<Output = T>,
{
    let mut future = Box::pin(future);
    let mut context = Context::from_waker(noop_waker_ref());

    loop {
        match future.as_mut().poll(&mut context) {
            Poll::Ready(result) => {
                return result;
            }
            Poll::Pending => {
                thread::sleep(POLL_INTERVAL);
            }
        }
    }
}

/// Pulls the next item out of a stream, blocking until it is available.
pub fn poll_next<S>(stream: &mut S) -> Option<S::Item>
where
    S: Stream + Unpin,
{
    poll_until_ready(stream.next())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poll_until_ready() {
        let result: Result<u64, String> = poll_until_ready(async { Ok(7) });
        assert_eq!(result, Ok(7));
    }

    #[test]
    fn test_poll_next() {
        let mut stream = futures::stream::iter(vec![1, 2]);
        assert_eq!(poll_next(&mut stream), Some(1));
        assert_eq!(poll_next(&mut stream), Some(2));
        assert_eq!(poll_next(&mut stream), None);
    }
}
