//! Hand-off of controller events from interrupt context to the service
//! routine.
//!
//! [`EventQueue`] is a bounded single-producer/single-consumer queue. The
//! interrupt handler owns the [`EventProducer`] and only ever pushes, in
//! constant time. The service routine owns the [`EventConsumer`] and drains it.
//! A push into a full queue drops the event and counts it; the consumer
//! reports the count as an overrun on its next pass.

use core::sync::atomic::{AtomicU32, Ordering};

use defmt::Format;
use heapless::spsc::{Consumer, Producer, Queue};

use crate::endpoint::EndpointAddress;
use crate::error::UsbError;

/// Normalized controller events, in occurrence order.
#[derive(Format, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    BusReset,
    /// Raw 8-byte setup packet received on endpoint 0.
    Setup([u8; 8]),
    TransferComplete {
        ep: EndpointAddress,
        bytes: u16,
    },
    /// The controller lost data on `ep`; the transfer on it is over.
    Overrun {
        ep: EndpointAddress,
    },
    Suspend,
    Resume,
    Unplugged,
}

/// Storage for the event hand-off. Usable capacity is `N - 1`.
pub struct EventQueue<const N: usize> {
    queue: Queue<Event, N>,
    dropped: AtomicU32,
}

impl<const N: usize> EventQueue<N> {
    pub const fn new() -> Self {
        Self {
            queue: Queue::new(),
            dropped: AtomicU32::new(0),
        }
    }

    pub fn split(&mut self) -> (EventProducer<'_, N>, EventConsumer<'_, N>) {
        let Self { queue, dropped } = self;
        let dropped = &*dropped;
        let (producer, consumer) = queue.split();
        (
            EventProducer {
                inner: producer,
                dropped,
            },
            EventConsumer {
                inner: consumer,
                dropped,
            },
        )
    }
}

impl<const N: usize> Default for EventQueue<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Interrupt-side half of an [`EventQueue`].
pub struct EventProducer<'q, const N: usize> {
    inner: Producer<'q, Event, N>,
    dropped: &'q AtomicU32,
}

impl<'q, const N: usize> EventProducer<'q, N> {
    /// Enqueues `event`, or drops it with `Overrun` when the queue is full.
    pub fn push(&mut self, event: Event) -> Result<(), UsbError> {
        self.inner.enqueue(event).map_err(|_| {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            UsbError::Overrun
        })
    }
}

/// Service-side half of an [`EventQueue`].
pub struct EventConsumer<'q, const N: usize> {
    inner: Consumer<'q, Event, N>,
    dropped: &'q AtomicU32,
}

impl<'q, const N: usize> EventConsumer<'q, N> {
    pub fn pop(&mut self) -> Option<Event> {
        self.inner.dequeue()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity()
    }

    /// Number of events dropped since the previous call.
    pub fn take_dropped(&mut self) -> u32 {
        self.dropped.swap(0, Ordering::Relaxed)
    }
}
