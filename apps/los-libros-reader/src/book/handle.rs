//! Shared access to a book
//!
//! [`spawn_reader`] moves a [`Book`] onto its own task and returns a
//! cloneable [`ReaderHandle`]. Callers send commands over an mpsc channel
//! and await a oneshot reply. One operation runs at a time; commands that
//! arrive meanwhile wait in a display queue (anything that may load a
//! chapter) or a goto queue (everything else) and are served oldest first
//! once the running operation settles.

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::{Book, BookTask, ChapterTarget, Navigation};
use crate::error::{ReaderError, Result};
use crate::queue::TaskQueue;

const COMMAND_BUFFER: usize = 64;

enum Request {
    Task {
        task: BookTask,
        reply: oneshot::Sender<Result<Navigation>>,
    },
    Location {
        reply: oneshot::Sender<Option<String>>,
    },
}

impl Request {
    fn is_display(&self) -> bool {
        match self {
            Request::Task { task, .. } => task.is_display(),
            Request::Location { .. } => false,
        }
    }
}

/// A request captured while another one was running
struct Pending {
    seq: u64,
    request: Request,
}

/// Cloneable front end of a spawned book
#[derive(Debug, Clone)]
pub struct ReaderHandle {
    tx: mpsc::Sender<Request>,
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Request::Task { task, .. } => f.debug_tuple("Task").field(task).finish(),
            Request::Location { .. } => f.write_str("Location"),
        }
    }
}

/// Run `book` on its own task. The join handle gives the book back once
/// every handle is dropped.
pub fn spawn_reader(book: Book) -> (ReaderHandle, JoinHandle<Book>) {
    let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
    let task = tokio::spawn(serve(book, rx));
    (ReaderHandle { tx }, task)
}

impl ReaderHandle {
    /// Send a command and wait for its outcome
    pub async fn send(&self, task: BookTask) -> Result<Navigation> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Request::Task { task, reply })
            .await
            .map_err(|_| ReaderError::Closed)?;
        rx.await.map_err(|_| ReaderError::Closed)?
    }

    pub async fn display_chapter(&self, target: impl Into<ChapterTarget>, end: bool) -> Result<Navigation> {
        self.send(BookTask::DisplayChapter {
            target: target.into(),
            end,
        })
        .await
    }

    pub async fn next_page(&self) -> Result<Navigation> {
        self.send(BookTask::NextPage).await
    }

    pub async fn prev_page(&self) -> Result<Navigation> {
        self.send(BookTask::PrevPage).await
    }

    pub async fn next_chapter(&self) -> Result<Navigation> {
        self.send(BookTask::NextChapter).await
    }

    pub async fn prev_chapter(&self) -> Result<Navigation> {
        self.send(BookTask::PrevChapter).await
    }

    pub async fn goto(&self, target: &str) -> Result<Navigation> {
        self.send(BookTask::Goto(target.to_string())).await
    }

    pub async fn goto_cfi(&self, cfi: &str) -> Result<Navigation> {
        self.send(BookTask::GotoCfi(cfi.to_string())).await
    }

    pub async fn goto_href(&self, href: &str) -> Result<Navigation> {
        self.send(BookTask::GotoHref(href.to_string())).await
    }

    pub async fn goto_page(&self, page: u32) -> Result<Navigation> {
        self.send(BookTask::GotoPage(page)).await
    }

    pub async fn goto_percentage(&self, percent: f64) -> Result<Navigation> {
        self.send(BookTask::GotoPercentage(percent)).await
    }

    pub async fn set_style(&self, property: &str, value: &str) -> Result<Navigation> {
        self.send(BookTask::SetStyle {
            property: property.to_string(),
            value: value.to_string(),
        })
        .await
    }

    /// CFI of the first visible position
    pub async fn current_location(&self) -> Result<Option<String>> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Request::Location { reply })
            .await
            .map_err(|_| ReaderError::Closed)?;
        rx.await.map_err(|_| ReaderError::Closed)
    }
}

/// Oldest captured request across both queues
fn next_pending(displays: &mut TaskQueue<Pending>, moves: &mut TaskQueue<Pending>) -> Option<Request> {
    let take_display = match (displays.front(), moves.front()) {
        (Some(d), Some(m)) => d.seq < m.seq,
        (Some(_), None) => true,
        (None, Some(_)) => false,
        (None, None) => return None,
    };
    let pending = if take_display {
        displays.dequeue()
    } else {
        moves.dequeue()
    };
    pending.map(|p| p.request)
}

async fn serve(mut book: Book, mut rx: mpsc::Receiver<Request>) -> Book {
    let mut displays: TaskQueue<Pending> = TaskQueue::new();
    let mut moves: TaskQueue<Pending> = TaskQueue::new();
    let mut seq = 0u64;

    loop {
        let request = match next_pending(&mut displays, &mut moves) {
            Some(request) => request,
            None => match rx.recv().await {
                Some(request) => request,
                None => break,
            },
        };

        match request {
            Request::Location { reply } => {
                let _ = reply.send(book.current_location_cfi());
            }
            Request::Task { task, reply } => {
                debug!(?task, "running");
                let result = {
                    let op = book.run(task);
                    tokio::pin!(op);
                    loop {
                        tokio::select! {
                            biased;
                            result = &mut op => break result,
                            Some(incoming) = rx.recv() => {
                                seq += 1;
                                let display = incoming.is_display();
                                let pending = Pending { seq, request: incoming };
                                if display {
                                    displays.enqueue(pending);
                                } else {
                                    moves.enqueue(pending);
                                }
                            }
                        }
                    }
                };
                if reply.send(result).is_err() {
                    debug!("caller went away before the reply");
                }
            }
        }
    }

    info!("reader stopped");
    book
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::book::MemoryStore;
    use crate::config::ReaderSettings;
    use crate::package::CONTAINER_PATH;
    use crate::render::FlowSurface;
    use std::sync::Arc;

    fn book() -> Book {
        let chapter = |word: &str| {
            let p: String = (0..2)
                .map(|_| format!("<p>{}</p>", vec![word; 45].join(" ")))
                .collect();
            format!("<html><head/><body>{}</body></html>", p)
        };
        let store = MemoryStore::new()
            .with(
                CONTAINER_PATH,
                r#"<container><rootfiles><rootfile full-path="content.opf"/></rootfiles></container>"#,
            )
            .with(
                "content.opf",
                r#"<package>
  <metadata/>
  <manifest>
    <item id="a" href="a.xhtml" media-type="application/xhtml+xml"/>
    <item id="b" href="b.xhtml" media-type="application/xhtml+xml"/>
  </manifest>
  <spine><itemref idref="a"/><itemref idref="b"/></spine>
</package>"#,
            )
            .with("a.xhtml", chapter("aaaa"))
            .with("b.xhtml", chapter("bbbb"));
        let settings = ReaderSettings {
            width: Some(600.0),
            height: Some(48.0),
            gap: Some(75.0),
            spreads: false,
            ..ReaderSettings::default()
        };
        Book::new(settings, Arc::new(store))
    }

    #[test]
    fn test_next_pending_keeps_arrival_order() {
        let (reply, _rx) = oneshot::channel();
        let mut displays = TaskQueue::new();
        let mut moves = TaskQueue::new();
        moves.enqueue(Pending {
            seq: 1,
            request: Request::Location { reply },
        });
        let (reply, _rx) = oneshot::channel();
        displays.enqueue(Pending {
            seq: 2,
            request: Request::Task {
                task: BookTask::NextPage,
                reply,
            },
        });

        assert!(matches!(
            next_pending(&mut displays, &mut moves),
            Some(Request::Location { .. })
        ));
        assert!(matches!(
            next_pending(&mut displays, &mut moves),
            Some(Request::Task { .. })
        ));
        assert!(next_pending(&mut displays, &mut moves).is_none());
    }

    #[tokio::test]
    async fn test_commands_through_handle() {
        let mut book = book();
        book.open().await.unwrap();
        book.render_to(Box::new(FlowSurface::new(600.0, 48.0)))
            .await
            .unwrap();
        let (handle, task) = spawn_reader(book);

        let turns: Vec<_> = (0..3).map(|_| handle.next_page()).collect();
        let results = futures::future::join_all(turns).await;
        assert!(results.iter().all(|r| r.is_ok()));

        // Two pages per chapter: the third turn lands on the second chapter
        let location = handle.current_location().await.unwrap();
        assert_eq!(location.as_deref(), Some("epubcfi(/6/4[b]!/4/4/1:0)"));

        assert_eq!(handle.prev_chapter().await.unwrap(), Navigation::Moved {
            cfi: Some("epubcfi(/6/2[a]!/4/4/1:0)".into())
        });

        drop(handle);
        let book = task.await.unwrap();
        assert_eq!(book.spine_pos(), 0);
    }

    #[tokio::test]
    async fn test_closed_handle() {
        let (handle, task) = spawn_reader(book());
        task.abort();
        let _ = task.await;
        assert!(matches!(handle.next_page().await, Err(ReaderError::Closed)));
    }
}
