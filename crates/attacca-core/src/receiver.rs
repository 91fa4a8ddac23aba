//! Correlates returnable events with their completions.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use smallvec::SmallVec;

use crate::fifo::MpmcFifo;
use crate::rt_event::{EventId, EventStatus, RtEvent};

const MAX_RETRIES: u32 = 100;

struct Node {
    id: EventId,
    status: bool,
}

/// Lets non-realtime callers block until the realtime thread has
/// acknowledged a returnable event.
///
/// Completions drained while waiting for a different id are stashed, so a
/// caller arriving after its completion was popped by someone else still
/// sees it.
pub struct AsynchronousEventReceiver {
    queue: Arc<MpmcFifo<RtEvent>>,
    receive_list: Mutex<SmallVec<[Node; 16]>>,
}

impl AsynchronousEventReceiver {
    pub fn new(queue: Arc<MpmcFifo<RtEvent>>) -> Self {
        Self {
            queue,
            receive_list: Mutex::new(SmallVec::new()),
        }
    }

    /// Poll the completion queue until the event with the given id has been
    /// acknowledged or the timeout expires. Returns true iff the realtime
    /// side reported the event handled ok within the timeout.
    pub fn wait_for_response(&self, id: EventId, timeout: Duration) -> bool {
        let poll_interval = timeout / MAX_RETRIES;
        for _ in 0..MAX_RETRIES {
            while let Some(event) = self.queue.pop() {
                if let RtEvent::EventCompletion { event_id, status } = event {
                    let ok = status == EventStatus::HandledOk;
                    if event_id == id {
                        return ok;
                    }
                    self.receive_list.lock().push(Node {
                        id: event_id,
                        status: ok,
                    });
                }
            }
            {
                let mut list = self.receive_list.lock();
                if let Some(index) = list.iter().position(|node| node.id == id) {
                    return list.swap_remove(index).status;
                }
            }
            std::thread::sleep(poll_interval);
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completion_before_wait() {
        let queue = Arc::new(MpmcFifo::new());
        let receiver = AsynchronousEventReceiver::new(queue.clone());
        queue.push(RtEvent::EventCompletion {
            event_id: 5,
            status: EventStatus::HandledOk,
        });
        assert!(receiver.wait_for_response(5, Duration::from_millis(10)));
    }

    #[test]
    fn test_error_status_reported() {
        let queue = Arc::new(MpmcFifo::new());
        let receiver = AsynchronousEventReceiver::new(queue.clone());
        queue.push(RtEvent::EventCompletion {
            event_id: 6,
            status: EventStatus::Error,
        });
        assert!(!receiver.wait_for_response(6, Duration::from_millis(10)));
    }

    #[test]
    fn test_missing_completion_times_out() {
        let queue = Arc::new(MpmcFifo::new());
        let receiver = AsynchronousEventReceiver::new(queue);
        assert!(!receiver.wait_for_response(7, Duration::from_millis(20)));
    }

    #[test]
    fn test_foreign_completion_is_stashed_for_later_caller() {
        let queue = Arc::new(MpmcFifo::new());
        let receiver = AsynchronousEventReceiver::new(queue.clone());
        queue.push(RtEvent::EventCompletion {
            event_id: 8,
            status: EventStatus::HandledOk,
        });
        queue.push(RtEvent::EventCompletion {
            event_id: 9,
            status: EventStatus::HandledOk,
        });
        assert!(receiver.wait_for_response(9, Duration::from_millis(10)));
        // Completion for id 8 was drained along the way and must still land
        assert!(receiver.wait_for_response(8, Duration::from_millis(10)));
    }

    #[test]
    fn test_completion_arriving_while_waiting() {
        let queue = Arc::new(MpmcFifo::new());
        let receiver = AsynchronousEventReceiver::new(queue.clone());
        let producer = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(5));
            queue.push(RtEvent::EventCompletion {
                event_id: 10,
                status: EventStatus::HandledOk,
            });
        });
        assert!(receiver.wait_for_response(10, Duration::from_millis(500)));
        producer.join().unwrap();
    }
}
