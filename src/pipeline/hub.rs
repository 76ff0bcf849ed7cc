use std::{
    sync::{
        Arc, Mutex, Weak,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use crossbeam_channel::{Receiver, Sender, TryRecvError, TrySendError, bounded};

use crate::{
    gesture::GestureFlags,
    pose::PoseUpdate,
    segmentation::SegmentationResult,
    types::{FaceDetectionData, FormatDescription, Frame},
};

/// What the pixel channel delivers: the buffer to draw plus its geometry.
#[derive(Clone, Debug)]
pub struct PreviewFrame {
    pub frame: Frame,
    pub format: FormatDescription,
}

struct Slot<T> {
    id: u64,
    tx: Sender<T>,
    // Second handle on the slot's queue, used to evict a value the
    // subscriber has not picked up yet.
    evict: Receiver<T>,
}

struct Registry<T> {
    slots: Mutex<Vec<Slot<T>>>,
    next_id: AtomicU64,
}

impl<T> Registry<T> {
    fn remove(&self, id: u64) {
        if let Ok(mut slots) = self.slots.lock() {
            slots.retain(|slot| slot.id != id);
        }
    }
}

/// One independently-timed output channel.
///
/// Every subscriber holds at most one pending value; publishing replaces
/// whatever the subscriber has not consumed yet, so a slow consumer only ever
/// sees the newest result and never stalls the publisher.
pub struct Channel<T> {
    registry: Arc<Registry<T>>,
}

impl<T> Default for Channel<T> {
    fn default() -> Self {
        Self {
            registry: Arc::new(Registry {
                slots: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }
}

impl<T: Clone> Channel<T> {
    pub fn subscribe(&self) -> Subscription<T> {
        let (tx, rx) = bounded(1);
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);

        match self.registry.slots.lock() {
            Ok(mut slots) => slots.push(Slot {
                id,
                tx,
                evict: rx.clone(),
            }),
            Err(_) => log::warn!("subscriber registry poisoned, subscription {id} stays silent"),
        }

        Subscription {
            id,
            rx,
            registry: Arc::downgrade(&self.registry),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry.slots.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn publish(&self, value: T) {
        let Ok(slots) = self.registry.slots.lock() else {
            log::warn!("subscriber registry poisoned, dropping update");
            return;
        };

        for slot in slots.iter() {
            match slot.tx.try_send(value.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(value)) => {
                    let _ = slot.evict.try_recv();
                    // A concurrent reader may have emptied the slot already;
                    // either way there is room now unless another publisher
                    // raced us, in which case its value is just as fresh.
                    let _ = slot.tx.try_send(value);
                }
                Err(TrySendError::Disconnected(_)) => {}
            }
        }
    }
}

/// Receiving end of a [`Channel`]. Dropping it unregisters the subscriber.
pub struct Subscription<T> {
    id: u64,
    rx: Receiver<T>,
    registry: Weak<Registry<T>>,
}

impl<T> Subscription<T> {
    /// Takes the pending value, if any.
    pub fn try_recv(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Blocks until a value arrives. Returns `None` once the hub is gone.
    pub fn recv(&self) -> Option<T> {
        self.rx.recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<T> {
        self.rx.recv_timeout(timeout).ok()
    }

    pub fn is_closed(&self) -> bool {
        self.registry.strong_count() == 0
            && matches!(self.rx.try_recv(), Err(TryRecvError::Disconnected))
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
        }
    }
}

/// Fan-out point between the frame worker and its consumers. Each output has
/// its own channel; consumers subscribe to any subset.
#[derive(Default)]
pub struct DispatchHub {
    pub pixels: Channel<PreviewFrame>,
    pub gestures: Channel<GestureFlags>,
    pub poses: Channel<PoseUpdate>,
    pub faces: Channel<FaceDetectionData>,
    pub segmentation: Channel<SegmentationResult>,
}

impl DispatchHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn publish_pose(&self, update: PoseUpdate) {
        self.gestures.publish(update.flags);
        self.poses.publish(update);
    }

    /// Faces are delivered one message per box.
    pub fn publish_faces(&self, faces: Vec<FaceDetectionData>) {
        for face in faces {
            self.faces.publish(face);
        }
    }
}
