//! Host context handed to processors: a view of musical time plus a way to
//! post events back into the host.

use std::sync::Arc;

use crate::dispatcher::EventSender;
use crate::event::Event;
use crate::transport::TransportView;

/// Cheap to clone; every processor that needs host access gets its own.
#[derive(Clone)]
pub struct HostControl {
    transport: Arc<TransportView>,
    sender: EventSender,
}

impl HostControl {
    pub fn new(transport: Arc<TransportView>, sender: EventSender) -> Self {
        Self { transport, sender }
    }

    /// The transport state as of the most recent chunk.
    pub fn transport(&self) -> &TransportView {
        &self.transport
    }

    /// Queue an event with the host's event dispatcher.
    pub fn post_event(&self, event: Event) -> bool {
        self.sender.post(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventPayload, IMMEDIATE_PROCESS};

    #[test]
    fn test_post_and_transport_access() {
        let (sender, rx) = EventSender::channel();
        let control = HostControl::new(Arc::new(TransportView::default()), sender);
        assert!(!control.transport().playing());
        assert!(control.post_event(Event::new(
            EventPayload::SetEngineTempo(128.0),
            IMMEDIATE_PROCESS
        )));
        assert!(rx.try_recv().is_ok());
    }
}
