use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::Weak;
use subswap_core::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

struct Subscribers<T> {
    next_id: u64,
    queues: HashMap<u64, mpsc::Sender<T>>,
    stopped: bool,
}

/// Fans events out to any number of independently cancellable subscribers.
///
/// Each subscriber owns a bounded queue. Broadcasting never blocks: an event is dropped for a
/// subscriber whose queue is full.
pub struct Broker<T> {
    subscribers: Arc<Mutex<Subscribers<T>>>,
    queue_size: usize,
}

impl<T> Broker<T>
where
    T: Clone + Send + 'static,
{
    /// Create a broker whose subscribers each buffer up to `queue_size` events.
    pub fn new(queue_size: usize) -> Result<Self, Error> {
        if queue_size == 0 {
            return Err(Error::invalid_parameters("subscriber queue size must be positive"));
        }

        Ok(Self {
            subscribers: Arc::new(Mutex::new(Subscribers {
                next_id: 0,
                queues: HashMap::new(),
                stopped: false,
            })),
            queue_size,
        })
    }

    pub fn subscribe(&self) -> Result<Subscription<T>, Error> {
        let mut subscribers = self
            .subscribers
            .lock()
            .map_err(|_| Error::subscription("broker lock poisoned"))?;

        if subscribers.stopped {
            return Err(Error::subscription("broker is stopped"));
        }

        let id = subscribers.next_id;
        subscribers.next_id += 1;

        let (tx, rx) = mpsc::channel(self.queue_size);
        subscribers.queues.insert(id, tx);

        tracing::debug!(id, "Added subscriber");

        Ok(Subscription {
            id,
            receiver: rx,
            subscribers: Arc::downgrade(&self.subscribers),
        })
    }

    /// Queue `event` for every current subscriber.
    pub fn broadcast(&self, event: T) -> Result<(), Error> {
        let mut subscribers = self
            .subscribers
            .lock()
            .map_err(|_| Error::subscription("broker lock poisoned"))?;

        if subscribers.stopped {
            return Err(Error::subscription("broker is stopped"));
        }

        let mut closed = Vec::new();
        for (id, queue) in subscribers.queues.iter() {
            match queue.try_send(event.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(id, "Subscriber queue is full, dropping event");
                }
                Err(TrySendError::Closed(_)) => closed.push(*id),
            }
        }

        for id in closed {
            subscribers.queues.remove(&id);
            tracing::debug!(id, "Removed closed subscriber");
        }

        Ok(())
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .map(|s| s.queues.len())
            .unwrap_or_default()
    }

    /// End every subscription. Further calls to [`Broker::subscribe`] and [`Broker::broadcast`]
    /// fail.
    pub fn stop(&self) {
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.stopped = true;
            subscribers.queues.clear();
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.subscribers.lock().map(|s| s.stopped).unwrap_or(true)
    }
}

/// A single subscriber's view of a [`Broker`]. Dropping it unsubscribes.
pub struct Subscription<T> {
    id: u64,
    receiver: mpsc::Receiver<T>,
    subscribers: Weak<Mutex<Subscribers<T>>>,
}

impl<T> Subscription<T> {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The next event, in broadcast order. `None` once the broker has stopped.
    pub async fn recv(&mut self) -> Option<T> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<T> {
        self.receiver.try_recv().ok()
    }

    pub fn cancel(self) {}
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        if let Some(subscribers) = self.subscribers.upgrade() {
            if let Ok(mut subscribers) = subscribers.lock() {
                subscribers.queues.remove(&self.id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use subswap_core::ErrorKind;

    #[test]
    fn zero_queue_size_is_rejected() {
        let err = Broker::<u32>::new(0).err().map(|e| e.kind());

        assert_eq!(err, Some(ErrorKind::InvalidParameters));
    }

    #[tokio::test]
    async fn every_subscriber_sees_events_in_order() {
        let broker = Broker::new(8).unwrap();
        let mut a = broker.subscribe().unwrap();
        let mut b = broker.subscribe().unwrap();

        for i in 0..3 {
            broker.broadcast(i).unwrap();
        }

        for sub in [&mut a, &mut b] {
            assert_eq!(sub.recv().await, Some(0));
            assert_eq!(sub.recv().await, Some(1));
            assert_eq!(sub.recv().await, Some(2));
        }
    }

    #[tokio::test]
    async fn full_queue_drops_instead_of_blocking() {
        let broker = Broker::new(2).unwrap();
        let mut slow = broker.subscribe().unwrap();

        for i in 0..5 {
            broker.broadcast(i).unwrap();
        }

        assert_eq!(slow.try_recv(), Some(0));
        assert_eq!(slow.try_recv(), Some(1));
        assert_eq!(slow.try_recv(), None);
    }

    #[tokio::test]
    async fn cancelled_subscription_is_removed() {
        let broker = Broker::new(4).unwrap();
        let a = broker.subscribe().unwrap();
        let mut b = broker.subscribe().unwrap();
        assert_eq!(broker.subscriber_count(), 2);

        a.cancel();
        assert_eq!(broker.subscriber_count(), 1);

        broker.broadcast("event").unwrap();
        assert_eq!(b.recv().await, Some("event"));
    }

    #[tokio::test]
    async fn stop_ends_streams_and_rejects_new_work() {
        let broker = Broker::new(4).unwrap();
        let mut sub = broker.subscribe().unwrap();
        broker.broadcast(1).unwrap();

        broker.stop();

        // Already queued events are still delivered.
        assert_eq!(sub.recv().await, Some(1));
        assert_eq!(sub.recv().await, None);

        assert_eq!(
            broker.broadcast(2).unwrap_err().kind(),
            ErrorKind::Subscription
        );
        assert_eq!(
            broker.subscribe().err().map(|e| e.kind()),
            Some(ErrorKind::Subscription)
        );
        assert!(broker.is_stopped());
    }
}
