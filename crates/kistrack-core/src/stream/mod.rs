// ── Device snapshot stream ──
//
// Subscription to the tracker's global device collection. Each ingest that
// changes a device publishes a fresh snapshot; readers never take the
// tracker lock.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_core::Stream;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

use crate::model::{Device, PhyFilter};

/// Shared, immutable view of every tracked device in first-seen order.
pub type DeviceSnapshot = Arc<Vec<Arc<Device>>>;

/// A subscription to the tracked device collection.
///
/// Offers the snapshot taken at subscription time, the latest snapshot,
/// and change notification via [`changed`](Self::changed) or
/// [`into_stream`](Self::into_stream).
pub struct DeviceStream {
    current: DeviceSnapshot,
    receiver: watch::Receiver<DeviceSnapshot>,
}

impl DeviceStream {
    pub(crate) fn new(receiver: watch::Receiver<DeviceSnapshot>) -> Self {
        let current = receiver.borrow().clone();
        Self { current, receiver }
    }

    /// Snapshot captured at creation time or at the last `changed()`.
    pub fn current(&self) -> &DeviceSnapshot {
        &self.current
    }

    pub fn latest(&self) -> DeviceSnapshot {
        self.receiver.borrow().clone()
    }

    /// Devices from the latest snapshot that sit on `filter`'s PHY.
    pub fn latest_for(&self, filter: PhyFilter) -> Vec<Arc<Device>> {
        self.receiver
            .borrow()
            .iter()
            .filter(|d| filter.matches(d.phy))
            .cloned()
            .collect()
    }

    /// Wait for the next change. Returns `None` once the tracker is gone.
    pub async fn changed(&mut self) -> Option<DeviceSnapshot> {
        self.receiver.changed().await.ok()?;
        let snap = self.receiver.borrow_and_update().clone();
        self.current = snap.clone();
        Some(snap)
    }

    pub fn into_stream(self) -> DeviceWatchStream {
        DeviceWatchStream {
            inner: WatchStream::new(self.receiver),
        }
    }
}

/// `Stream` adapter yielding a snapshot per published change.
pub struct DeviceWatchStream {
    inner: WatchStream<DeviceSnapshot>,
}

impl Stream for DeviceWatchStream {
    type Item = DeviceSnapshot;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::{MacAddress, PhyId};
    use crate::tracker::DeviceTracker;
    use tokio_test::{assert_pending, assert_ready, task};

    fn device(mac: &str, phy: u32) -> Device {
        Device::new(MacAddress::new(mac), PhyId::new(phy))
    }

    #[test]
    fn stream_yields_current_then_waits_for_changes() {
        let tracker = DeviceTracker::new();
        let mut stream = task::spawn(tracker.subscribe_devices().into_stream());

        let first = assert_ready!(stream.poll_next()).unwrap();
        assert!(first.is_empty());
        assert_pending!(stream.poll_next());

        tracker.track_device(device("aa:bb:cc:00:00:01", 0));
        assert!(stream.is_woken());
        let next = assert_ready!(stream.poll_next()).unwrap();
        assert_eq!(next.len(), 1);
    }

    #[test]
    fn latest_for_filters_by_phy() {
        let tracker = DeviceTracker::new();
        let subscription = tracker.subscribe_devices();
        tracker.track_device(device("aa:bb:cc:00:00:01", 0));
        tracker.track_device(device("aa:bb:cc:00:00:02", 1));

        assert!(subscription.current().is_empty());
        assert_eq!(subscription.latest().len(), 2);
        let on_one = subscription.latest_for(PhyFilter::Phy(PhyId::new(1)));
        assert_eq!(on_one.len(), 1);
        assert_eq!(on_one[0].mac.as_str(), "aa:bb:cc:00:00:02");
    }

    #[tokio::test]
    async fn changed_ends_when_the_tracker_is_dropped() {
        let tracker = DeviceTracker::new();
        let mut subscription = tracker.subscribe_devices();
        tracker.track_device(device("aa:bb:cc:00:00:01", 0));

        let snap = subscription.changed().await.unwrap();
        assert_eq!(snap.len(), 1);
        assert_eq!(subscription.current().len(), 1);

        drop(tracker);
        assert!(subscription.changed().await.is_none());
    }
}
