use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use camino::Utf8PathBuf;
use serde::Serialize;
use tungstenite::WebSocket;

use crate::error::WatchError;

/// Pushed to connected clients after a successful watched rebuild.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReloadEvent {
    /// Reload the page in its entirety.
    FullReload { paths: Vec<Utf8PathBuf> },
    /// Fetch and swap the named stylesheet assets in place, keeping
    /// client-side state intact.
    InjectStyle { paths: Vec<Utf8PathBuf> },
}

impl ReloadEvent {
    /// Picks the event kind for a set of changed outputs: style injection
    /// when every output is a stylesheet, a full reload otherwise.
    pub fn for_outputs(paths: Vec<Utf8PathBuf>) -> Self {
        let only_styles = !paths.is_empty()
            && paths
                .iter()
                .all(|p| p.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("css")));

        if only_styles {
            ReloadEvent::InjectStyle { paths }
        } else {
            ReloadEvent::FullReload { paths }
        }
    }

    pub fn paths(&self) -> &[Utf8PathBuf] {
        match self {
            ReloadEvent::FullReload { paths } | ReloadEvent::InjectStyle { paths } => paths,
        }
    }
}

/// One connected client channel. The concrete transport lives outside the
/// notifier; websockets are just the default.
pub trait Observer: Send {
    /// Delivers one serialized event. Returns false once the peer is gone,
    /// after which the notifier drops the observer.
    fn send(&mut self, payload: &str) -> bool;

    /// Called once when the notifier evicts the observer, for transports
    /// that need a clean shutdown.
    fn close(&mut self) {}
}

/// Fans reload events out to every connected observer. No retry and no
/// replay: a disconnected observer misses the event, and a reconnecting one
/// receives only future events.
#[derive(Clone)]
pub struct Notifier {
    observers: Arc<Mutex<Vec<Box<dyn Observer>>>>,
}

impl Notifier {
    pub fn new() -> Self {
        Self {
            observers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn attach(&self, observer: Box<dyn Observer>) {
        let mut observers = self.observers.lock().unwrap();
        observers.push(observer);

        // Keep only the most recent connections around.
        let len = observers.len();
        if len > 10 {
            for mut evicted in observers.drain(0..len - 10) {
                evicted.close();
            }
        }
    }

    pub fn observer_count(&self) -> usize {
        self.observers.lock().unwrap().len()
    }

    pub fn notify(&self, event: &ReloadEvent) {
        let payload = serde_json::to_string(event).expect("reload events serialize to JSON");

        let mut observers = self.observers.lock().unwrap();
        observers.retain_mut(|observer| observer.send(&payload));
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

struct WsObserver(WebSocket<TcpStream>);

impl Observer for WsObserver {
    fn send(&mut self, payload: &str) -> bool {
        use tungstenite::error::Error;

        match self.0.send(tungstenite::Message::text(payload)) {
            Ok(()) => true,
            Err(Error::ConnectionClosed | Error::AlreadyClosed) => false,
            Err(Error::Io(e)) if e.kind() == std::io::ErrorKind::BrokenPipe => false,
            Err(e) => {
                tracing::warn!("websocket send failed: {e}");
                true
            }
        }
    }

    fn close(&mut self) {
        self.0.close(None).ok();
    }
}

pub(crate) fn reserve_port() -> Result<(TcpListener, u16), WatchError> {
    let listener = match TcpListener::bind("127.0.0.1:1337") {
        Ok(sock) => sock,
        Err(_) => TcpListener::bind("127.0.0.1:0").map_err(WatchError::Bind)?,
    };

    let addr = listener.local_addr().map_err(WatchError::Bind)?;
    let port = addr.port();
    Ok((listener, port))
}

/// Accept loop attaching each websocket client to the notifier.
pub(crate) fn accept_websockets(server: TcpListener, notifier: Notifier) -> JoinHandle<()> {
    std::thread::spawn(move || {
        for stream in server.incoming() {
            let Ok(stream) = stream else { continue };

            match tungstenite::accept(stream) {
                Ok(socket) => notifier.attach(Box::new(WsObserver(socket))),
                Err(e) => tracing::warn!("websocket handshake failed: {e}"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Recorder {
        seen: Arc<Mutex<Vec<String>>>,
        alive: bool,
    }

    impl Observer for Recorder {
        fn send(&mut self, payload: &str) -> bool {
            if self.alive {
                self.seen.lock().unwrap().push(payload.to_string());
            }
            self.alive
        }
    }

    #[test]
    fn style_only_outputs_become_inject_events() {
        let event = ReloadEvent::for_outputs(vec![
            "dist/css/main.min.css".into(),
            "dist/css/vendor.css".into(),
        ]);

        assert!(matches!(event, ReloadEvent::InjectStyle { .. }));
    }

    #[test]
    fn mixed_outputs_force_a_full_reload() {
        let event = ReloadEvent::for_outputs(vec![
            "dist/css/main.min.css".into(),
            "dist/js/main.min.js".into(),
        ]);

        assert!(matches!(event, ReloadEvent::FullReload { .. }));
        assert_eq!(event.paths().len(), 2);
    }

    #[test]
    fn empty_output_set_is_a_full_reload() {
        assert!(matches!(
            ReloadEvent::for_outputs(vec![]),
            ReloadEvent::FullReload { .. }
        ));
    }

    #[test]
    fn disconnected_observers_are_dropped_without_retry() {
        let notifier = Notifier::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        notifier.attach(Box::new(Recorder {
            seen: seen.clone(),
            alive: true,
        }));
        notifier.attach(Box::new(Recorder {
            seen: seen.clone(),
            alive: false,
        }));

        notifier.notify(&ReloadEvent::FullReload { paths: vec![] });
        assert_eq!(notifier.observer_count(), 1);

        notifier.notify(&ReloadEvent::FullReload { paths: vec![] });
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[test]
    fn evicted_observers_get_a_clean_shutdown() {
        struct Counting {
            closed: Arc<Mutex<usize>>,
        }

        impl Observer for Counting {
            fn send(&mut self, _payload: &str) -> bool {
                true
            }

            fn close(&mut self) {
                *self.closed.lock().unwrap() += 1;
            }
        }

        let notifier = Notifier::new();
        let closed = Arc::new(Mutex::new(0));

        for _ in 0..11 {
            notifier.attach(Box::new(Counting {
                closed: closed.clone(),
            }));
        }

        assert_eq!(notifier.observer_count(), 10);
        assert_eq!(*closed.lock().unwrap(), 1);
    }

    #[test]
    fn events_serialize_with_a_kind_tag() {
        let event = ReloadEvent::InjectStyle {
            paths: vec!["dist/css/main.min.css".into()],
        };
        let json = serde_json::to_string(&event).unwrap();

        assert!(json.contains(r#""kind":"inject_style""#));
        assert!(json.contains("main.min.css"));
    }
}
