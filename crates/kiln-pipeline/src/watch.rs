//! Watch loop: rebuild changed categories and notify connected browsers.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use kiln_server::{DevServer, DevServerConfig, FileWatcher, HmrHub, HmrMessage, WatchEvent};

use crate::error::PipelineError;
use crate::paths::{Category, PathTable};
use crate::task::{TaskReport, TaskRunner};

/// Window in which events are coalesced into one rebuild.
pub const DEBOUNCE: Duration = Duration::from_millis(100);

/// Categories rebuilt by a dispatch run, in order.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WatchSummary {
    pub rebuilds: Vec<Category>,
}

/// Reruns the tasks of changed categories until shut down.
pub struct WatchLoop<R> {
    table: Arc<PathTable>,
    runner: Arc<R>,
    hub: HmrHub,
    debounce: Duration,
}

impl<R: TaskRunner> WatchLoop<R> {
    pub fn new(table: Arc<PathTable>, runner: Arc<R>, hub: HmrHub) -> Self {
        Self {
            table,
            runner,
            hub,
            debounce: DEBOUNCE,
        }
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Serve (unless `server` is `None`), watch the sources and dispatch
    /// until Ctrl-C.
    pub async fn run(self, server: Option<DevServerConfig>) -> Result<WatchSummary, PipelineError> {
        let server = match server {
            Some(config) => Some(DevServer::start(config, self.hub.clone()).await?),
            None => None,
        };

        let (watcher, events) = match FileWatcher::new(&self.table.watch_dirs()) {
            Ok(watching) => watching,
            Err(e) => {
                if let Some(server) = server {
                    server.stop().await?;
                }
                return Err(PipelineError::Watch(e.to_string()));
            }
        };
        tracing::info!("Watching for changes. Press Ctrl+C to stop.");

        let summary = self.dispatch(events, shutdown_signal()).await;

        drop(watcher);
        if let Some(server) = server {
            server.stop().await?;
        }
        tracing::info!("Stopped watching");
        Ok(summary)
    }

    /// Process events until `shutdown` resolves or the channel closes.
    ///
    /// Task errors are logged; they never end the loop.
    pub async fn dispatch(
        &self,
        mut events: mpsc::Receiver<WatchEvent>,
        shutdown: impl Future<Output = ()>,
    ) -> WatchSummary {
        let mut summary = WatchSummary::default();
        tokio::pin!(shutdown);

        loop {
            let first = tokio::select! {
                _ = &mut shutdown => break,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            let mut dirty = BTreeSet::new();
            self.mark(&mut dirty, &first);

            let window = tokio::time::sleep(self.debounce);
            tokio::pin!(window);
            let mut closed = false;
            loop {
                tokio::select! {
                    _ = &mut window => break,
                    event = events.recv() => match event {
                        Some(event) => self.mark(&mut dirty, &event),
                        None => {
                            closed = true;
                            break;
                        }
                    },
                }
            }

            for category in dirty {
                self.rebuild(category).await;
                summary.rebuilds.push(category);
            }

            if closed {
                break;
            }
        }

        summary
    }

    fn mark(&self, dirty: &mut BTreeSet<Category>, event: &WatchEvent) {
        let categories = self.table.classify(event.path());
        if categories.is_empty() {
            tracing::debug!("Ignoring change to {}", event.path().display());
        }
        for category in categories {
            tracing::debug!("{} changed ({})", event.path().display(), category);
            dirty.insert(category);
        }
    }

    async fn rebuild(&self, category: Category) {
        match self.runner.run(category).await {
            Ok(report) => {
                if let Some(msg) = self.notification(&report) {
                    self.hub.send(msg);
                }
            }
            Err(e) => tracing::error!("{} rebuild failed: {}", category, e),
        }
    }

    fn notification(&self, report: &TaskReport) -> Option<HmrMessage> {
        let urls = |ext: &str| -> Vec<String> {
            report
                .written
                .iter()
                .filter(|p| p.extension().is_some_and(|e| e == ext))
                .map(|p| self.table.url_path(report.category, p))
                .collect()
        };

        match report.category {
            Category::Html if !report.written.is_empty() => Some(HmrMessage::Reload),
            Category::Style => {
                let paths = urls("css");
                (!paths.is_empty()).then_some(HmrMessage::Css { paths })
            }
            Category::Scripts => {
                let paths = urls("js");
                (!paths.is_empty()).then_some(HmrMessage::Script { paths })
            }
            _ => None,
        }
    }
}

/// Resolves on Ctrl-C. If the handler cannot be installed it never resolves.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Could not listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{PipelineRunner, TaskSettings, TransformRegistry};
    use pretty_assertions::assert_eq;
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;
    use tempfile::tempdir;
    use tokio::sync::broadcast::error::TryRecvError;

    #[derive(Default)]
    struct RecordingRunner {
        runs: Mutex<Vec<Category>>,
        fail: Vec<Category>,
    }

    impl TaskRunner for RecordingRunner {
        async fn run(&self, category: Category) -> Result<TaskReport, PipelineError> {
            self.runs.lock().unwrap().push(category);
            if self.fail.contains(&category) {
                return Err(PipelineError::Watch("boom".into()));
            }
            let written = match category {
                Category::Style => vec![PathBuf::from("main.min.css"), PathBuf::from("main.min.css.map")],
                Category::Scripts => vec![PathBuf::from("main.min.js")],
                Category::Html => vec![PathBuf::from("index.html")],
                _ => vec![PathBuf::from("a.png")],
            };
            Ok(TaskReport {
                category,
                written,
                skipped: 0,
                failures: Vec::new(),
                duration: Duration::ZERO,
            })
        }
    }

    fn write(root: &Path, rel: &str, contents: &str) -> PathBuf {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, contents).unwrap();
        path
    }

    fn modified(table: &PathTable, rel: &str) -> WatchEvent {
        WatchEvent::Modified(table.root().join(rel))
    }

    fn drain(rx: &mut tokio::sync::broadcast::Receiver<HmrMessage>) -> Vec<HmrMessage> {
        let mut messages = Vec::new();
        loop {
            match rx.try_recv() {
                Ok(msg) => messages.push(msg),
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
                Err(TryRecvError::Lagged(_)) => continue,
            }
        }
        messages
    }

    #[tokio::test]
    async fn coalesces_events_into_one_rebuild_per_category() {
        let temp = tempdir().unwrap();
        let table = Arc::new(PathTable::new(temp.path()));
        let runner = Arc::new(RecordingRunner::default());
        let hub = HmrHub::new();
        let mut rx = hub.subscribe();
        let watch = WatchLoop::new(Arc::clone(&table), Arc::clone(&runner), hub)
            .with_debounce(Duration::from_millis(20));

        let (tx, events) = mpsc::channel(16);
        tx.send(modified(&table, "src/scss/main.scss")).await.unwrap();
        tx.send(modified(&table, "src/scss/_vars.scss")).await.unwrap();
        tx.send(modified(&table, "src/html/partials/nav.html")).await.unwrap();
        tx.send(modified(&table, "notes.txt")).await.unwrap();
        drop(tx);

        let summary = watch.dispatch(events, std::future::pending()).await;

        assert_eq!(summary.rebuilds, vec![Category::Style, Category::Html]);
        assert_eq!(
            drain(&mut rx),
            vec![
                HmrMessage::Css {
                    paths: vec!["/css/main.min.css".to_string()]
                },
                HmrMessage::Reload,
            ]
        );
    }

    #[tokio::test]
    async fn maps_categories_to_notifications() {
        let temp = tempdir().unwrap();
        let table = Arc::new(PathTable::new(temp.path()));
        let hub = HmrHub::new();
        let mut rx = hub.subscribe();
        let watch = WatchLoop::new(Arc::clone(&table), Arc::new(RecordingRunner::default()), hub)
            .with_debounce(Duration::from_millis(5));

        let (tx, events) = mpsc::channel(16);
        tx.send(modified(&table, "src/js/app.js")).await.unwrap();
        tx.send(modified(&table, "src/img/logo.png")).await.unwrap();
        tx.send(modified(&table, "src/font/a.ttf")).await.unwrap();
        drop(tx);

        let summary = watch.dispatch(events, std::future::pending()).await;

        assert_eq!(
            summary.rebuilds,
            vec![Category::Scripts, Category::Images, Category::Font]
        );
        assert_eq!(
            drain(&mut rx),
            vec![HmrMessage::Script {
                paths: vec!["/js/main.min.js".to_string()]
            }]
        );
    }

    #[tokio::test]
    async fn task_errors_do_not_stop_the_loop() {
        let temp = tempdir().unwrap();
        let table = Arc::new(PathTable::new(temp.path()));
        let runner = Arc::new(RecordingRunner {
            fail: vec![Category::Style],
            ..Default::default()
        });
        let watch = WatchLoop::new(Arc::clone(&table), Arc::clone(&runner), HmrHub::new())
            .with_debounce(Duration::from_millis(5));

        let (tx, events) = mpsc::channel(16);
        let driver = async {
            tx.send(modified(&table, "src/scss/main.scss")).await.unwrap();
            tokio::time::sleep(Duration::from_millis(100)).await;
            tx.send(modified(&table, "src/js/app.js")).await.unwrap();
            tokio::time::sleep(Duration::from_millis(100)).await;
        };

        let summary = watch.dispatch(events, driver).await;

        assert_eq!(summary.rebuilds, vec![Category::Style, Category::Scripts]);
        assert_eq!(*runner.runs.lock().unwrap(), vec![Category::Style, Category::Scripts]);
    }

    #[tokio::test]
    async fn stops_on_shutdown() {
        let temp = tempdir().unwrap();
        let table = Arc::new(PathTable::new(temp.path()));
        let watch = WatchLoop::new(table, Arc::new(RecordingRunner::default()), HmrHub::new());

        let (_tx, events) = mpsc::channel(16);
        let summary = tokio::time::timeout(
            Duration::from_secs(5),
            watch.dispatch(events, async {}),
        )
        .await
        .unwrap();
        assert!(summary.rebuilds.is_empty());
    }

    #[tokio::test]
    async fn style_edit_rebuilds_only_styles_and_swaps_stylesheet() {
        let temp = tempdir().unwrap();
        let table = Arc::new(PathTable::new(temp.path()));
        write(table.root(), "src/scss/main.scss", ".a { color: red; }");
        write(table.root(), "src/js/app.js", "console.log(1);");

        let runner = Arc::new(PipelineRunner::new(
            Arc::clone(&table),
            TransformRegistry::standard(),
            TaskSettings::default(),
        ));
        let hub = HmrHub::new();
        let mut rx = hub.subscribe();
        let watch = WatchLoop::new(Arc::clone(&table), runner, hub).with_debounce(Duration::from_millis(20));

        let main = write(table.root(), "src/scss/main.scss", ".a { color: blue; }");
        let (tx, events) = mpsc::channel(16);
        tx.send(WatchEvent::Modified(main.clone())).await.unwrap();
        tx.send(WatchEvent::Modified(main)).await.unwrap();
        drop(tx);

        let summary = watch.dispatch(events, std::future::pending()).await;

        assert_eq!(summary.rebuilds, vec![Category::Style]);
        assert!(table.root().join("dist/css/main.min.css").exists());
        assert!(!table.root().join("dist/js").exists());
        assert_eq!(
            drain(&mut rx),
            vec![HmrMessage::Css {
                paths: vec!["/css/main.min.css".to_string()]
            }]
        );
    }

    #[tokio::test]
    async fn broken_style_keeps_loop_alive_for_scripts() {
        let temp = tempdir().unwrap();
        let table = Arc::new(PathTable::new(temp.path()));
        let runner = Arc::new(PipelineRunner::new(
            Arc::clone(&table),
            TransformRegistry::standard(),
            TaskSettings::default(),
        ));
        let hub = HmrHub::new();
        let mut rx = hub.subscribe();
        let watch = WatchLoop::new(Arc::clone(&table), runner, hub).with_debounce(Duration::from_millis(10));

        let broken = write(table.root(), "src/scss/main.scss", ".a { color: ");
        let (tx, events) = mpsc::channel(16);
        let driver = async {
            tx.send(WatchEvent::Modified(broken)).await.unwrap();
            tokio::time::sleep(Duration::from_millis(200)).await;
            let script = write(table.root(), "src/js/app.js", "console.log(2);");
            tx.send(WatchEvent::Modified(script)).await.unwrap();
            tokio::time::sleep(Duration::from_millis(500)).await;
        };

        let summary = watch.dispatch(events, driver).await;

        assert_eq!(summary.rebuilds, vec![Category::Style, Category::Scripts]);
        assert!(!table.root().join("dist/css/main.min.css").exists());
        assert!(table.root().join("dist/js/main.min.js").exists());
        assert_eq!(
            drain(&mut rx),
            vec![HmrMessage::Script {
                paths: vec!["/js/main.min.js".to_string()]
            }]
        );
    }
}
