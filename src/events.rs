//! Completion signals for dependent UI (legend, layer manager, filters).
//! Fire-and-forget broadcast; emitting with no subscribers is fine.

use tokio::sync::broadcast;

#[derive(Clone, Debug)]
pub enum LayerEvent {
    /// A layer's registry entry was created or replaced.
    LayerRegistered { layer_id: String },
    /// The layer's default style finished loading after registration.
    StyleResolved { layer_id: String, style_id: String },
    /// The shared pool never appeared; the layer now owns an independent
    /// cluster group permanently.
    ClusterFallback { layer_id: String },
    /// All batches of a profile load settled.
    ProfileLoaded {
        registered: usize,
        skipped: usize,
        failed: usize,
    },
}

#[derive(Clone, Debug)]
pub struct EventBus {
    tx: broadcast::Sender<LayerEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(64);
        EventBus { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LayerEvent> {
        self.tx.subscribe()
    }

    pub(crate) fn emit(&self, event: LayerEvent) {
        // Send only fails when nobody listens; that is not an error here.
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
