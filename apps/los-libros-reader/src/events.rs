//! Reader events
//!
//! Renderer, book and locations each own an [`EventChannel`] and publish a
//! typed event enum on it. Subscribers get a `broadcast::Receiver`.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

const CHANNEL_CAPACITY: usize = 256;

/// Publish/subscribe channel for one event type
#[derive(Debug)]
pub struct EventChannel<E: Clone> {
    sender: broadcast::Sender<E>,
}

impl<E: Clone + std::fmt::Debug> EventChannel<E> {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<E> {
        self.sender.subscribe()
    }

    /// Publish an event. Events with no listener are dropped.
    pub fn emit(&self, event: E) {
        if let Err(broadcast::error::SendError(event)) = self.sender.send(event) {
            trace!(?event, "no subscribers");
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl<E: Clone + std::fmt::Debug> Default for EventChannel<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Start and end CFIs of what is on screen
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisibleRange {
    pub start: String,
    pub end: String,
}

/// Events published by the renderer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum RendererEvent {
    ChapterUnloaded { spine_pos: usize, href: String },
    ChapterDisplayed { spine_pos: usize, href: String, pages: u32 },
    LocationChanged { cfi: String },
    VisibleRangeChanged { range: VisibleRange, page: u32 },
    Resized { width: f64, height: f64 },
    SpreadsChanged { spreads: bool },
}

/// Page position in the book-wide page list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageChange {
    pub anchor_page: u32,
    pub percentage: f64,
    pub page_range: Vec<u32>,
}

/// Events published by the book
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum BookEvent {
    Ready,
    Rendered,
    LoadFailed { error: String },
    ChapterLoadFailed { href: String },
    PageChanged(PageChange),
    AtStart,
    AtEnd,
    Unloaded,
    Renderer(RendererEvent),
}

/// Events published by the locations index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum LocationsEvent {
    Changed { percentage: f64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_emit_and_receive() {
        let channel = EventChannel::new();
        let mut rx = channel.subscribe();

        channel.emit(BookEvent::Ready);
        channel.emit(BookEvent::AtEnd);

        assert_eq!(rx.recv().await.unwrap(), BookEvent::Ready);
        assert_eq!(rx.recv().await.unwrap(), BookEvent::AtEnd);
    }

    #[test]
    fn test_emit_without_subscribers() {
        let channel: EventChannel<LocationsEvent> = EventChannel::new();
        assert_eq!(channel.subscriber_count(), 0);
        channel.emit(LocationsEvent::Changed { percentage: 0.5 });
    }

    #[test]
    fn test_event_serialization() {
        let event = RendererEvent::LocationChanged {
            cfi: "epubcfi(/6/2!/4/2/1:0)".into(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(json, r#"{"type":"locationChanged","cfi":"epubcfi(/6/2!/4/2/1:0)"}"#);
    }
}
