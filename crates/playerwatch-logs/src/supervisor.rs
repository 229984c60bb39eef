//! Reconnecting log stream supervisor.
//!
//! The supervisor loops through three states forever:
//!
//! ```text
//! Discovering --found--> Streaming --stream lost--> Backoff --> Discovering
//!      ^   |
//!      +---+ not found (wait discovery interval)
//! ```
//!
//! After a lost stream it always goes back to discovery, since the pod may
//! have been replaced while the stream was down.

use std::time::Duration;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use playerwatch_k8s::{InstanceLocator, LogSource, LogStreamError, StreamOptions};
use playerwatch_metrics::MetricsSink;
use playerwatch_types::{EventKind, LogTarget, TargetInstance};

use crate::parser::LineParser;

pub const DEFAULT_DISCOVERY_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_BACKOFF_INTERVAL: Duration = Duration::from_secs(5);

/// What to watch and how patiently
#[derive(Clone, Debug)]
pub struct SupervisorConfig {
    pub namespace: String,
    pub label_selector: String,
    /// Container whose logs are streamed. Required for pods with sidecars.
    pub container: String,
    pub discovery_interval: Duration,
    pub backoff_interval: Duration,
    /// Abandon a stream that has been silent this long. `None` waits forever.
    pub idle_timeout: Option<Duration>,
    pub stream_options: StreamOptions,
}

impl SupervisorConfig {
    pub fn new(
        namespace: impl Into<String>,
        label_selector: impl Into<String>,
        container: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            label_selector: label_selector.into(),
            container: container.into(),
            discovery_interval: DEFAULT_DISCOVERY_INTERVAL,
            backoff_interval: DEFAULT_BACKOFF_INTERVAL,
            idle_timeout: None,
            stream_options: StreamOptions::default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SupervisorState {
    Discovering,
    Streaming(TargetInstance),
    Backoff,
}

/// Why a stream stopped
#[derive(Debug)]
enum StreamEnd {
    Closed,
    Failed(LogStreamError),
    Idle(Duration),
}

pub struct LogStreamSupervisor<L, S> {
    locator: L,
    source: S,
    sink: MetricsSink,
    config: SupervisorConfig,
}

impl<L, S> LogStreamSupervisor<L, S>
where
    L: InstanceLocator,
    S: LogSource,
{
    pub fn new(locator: L, source: S, sink: MetricsSink, config: SupervisorConfig) -> Self {
        Self {
            locator,
            source,
            sink,
            config,
        }
    }

    /// Run until cancelled. Transient failures never end the loop.
    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!(
            namespace = %self.config.namespace,
            selector = %self.config.label_selector,
            container = %self.config.container,
            "Watching for player events"
        );

        let mut state = SupervisorState::Discovering;
        loop {
            state = tokio::select! {
                _ = cancel.cancelled() => break,
                next = self.step(state) => next,
            };
        }

        tracing::info!("Log stream supervisor stopped");
    }

    /// Perform one state transition
    pub async fn step(&self, state: SupervisorState) -> SupervisorState {
        match state {
            SupervisorState::Discovering => self.discover().await,
            SupervisorState::Streaming(instance) => {
                match self.stream(&instance).await {
                    StreamEnd::Closed => {
                        tracing::warn!(pod = %instance.name, "Log stream closed")
                    }
                    StreamEnd::Failed(e) => {
                        tracing::warn!(pod = %instance.name, error = %e, "Log stream failed")
                    }
                    StreamEnd::Idle(idle) => tracing::warn!(
                        pod = %instance.name,
                        idle_secs = idle.as_secs(),
                        "Log stream went silent, reconnecting"
                    ),
                }
                SupervisorState::Backoff
            }
            SupervisorState::Backoff => {
                tracing::info!(
                    backoff_secs = self.config.backoff_interval.as_secs(),
                    "Backing off before rediscovery"
                );
                tokio::time::sleep(self.config.backoff_interval).await;
                SupervisorState::Discovering
            }
        }
    }

    async fn discover(&self) -> SupervisorState {
        tracing::debug!(
            namespace = %self.config.namespace,
            selector = %self.config.label_selector,
            "Looking for target pod"
        );

        match self
            .locator
            .find(&self.config.namespace, &self.config.label_selector)
            .await
        {
            Some(instance) => {
                tracing::info!(pod = %instance.name, "Target pod found");
                if !instance.containers.is_empty() && !instance.has_container(&self.config.container)
                {
                    tracing::warn!(
                        pod = %instance.name,
                        container = %self.config.container,
                        available = ?instance.containers,
                        "Pod does not declare the configured container"
                    );
                }
                SupervisorState::Streaming(instance)
            }
            None => {
                self.sink.discovery_failed();
                tracing::info!(
                    selector = %self.config.label_selector,
                    retry_secs = self.config.discovery_interval.as_secs(),
                    "Target pod not found"
                );
                tokio::time::sleep(self.config.discovery_interval).await;
                SupervisorState::Discovering
            }
        }
    }

    async fn stream(&self, instance: &TargetInstance) -> StreamEnd {
        let target = LogTarget::new(
            self.config.namespace.as_str(),
            instance.name.as_str(),
            self.config.container.as_str(),
        );

        let mut lines = match self.source.open(&target, &self.config.stream_options).await {
            Ok(lines) => lines,
            Err(e) => return StreamEnd::Failed(e),
        };

        self.sink.stream_opened();
        tracing::info!(pod = %target.pod, container = %target.container, "Streaming logs");

        // Lines are applied strictly in arrival order
        let end = loop {
            let next = match self.config.idle_timeout {
                Some(idle) => match tokio::time::timeout(idle, lines.next()).await {
                    Ok(next) => next,
                    Err(_) => break StreamEnd::Idle(idle),
                },
                None => lines.next().await,
            };

            match next {
                Some(Ok(line)) => self.apply(&line, &target.pod),
                Some(Err(e)) => break StreamEnd::Failed(e),
                None => break StreamEnd::Closed,
            }
        };

        self.sink.stream_lost();
        end
    }

    /// Parse a line and record any player event it carries
    fn apply(&self, line: &str, pod: &str) {
        let Some(event) = LineParser::parse(line) else {
            return;
        };
        let changed = self.sink.set_online(&event.user, event.kind.is_online());
        let online = self.sink.online_count();

        match event.kind {
            EventKind::Login => {
                tracing::info!(user = %event.user, pod, changed, online, "Player connected")
            }
            EventKind::Logout => {
                tracing::info!(user = %event.user, pod, changed, online, "Player disconnected")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures::stream;
    use parking_lot::Mutex;
    use playerwatch_k8s::LineStream;
    use playerwatch_types::PodPhase;
    use tokio::time::Instant;

    /// Locator that replays scripted answers, then reports nothing
    #[derive(Default)]
    struct ScriptedLocator {
        answers: Mutex<VecDeque<Option<TargetInstance>>>,
        calls: AtomicUsize,
    }

    impl ScriptedLocator {
        fn new(answers: Vec<Option<&str>>) -> Self {
            Self {
                answers: Mutex::new(
                    answers
                        .into_iter()
                        .map(|a| a.map(running_pod))
                        .collect(),
                ),
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl InstanceLocator for ScriptedLocator {
        async fn find(&self, _: &str, _: &str) -> Option<TargetInstance> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.answers.lock().pop_front().flatten()
        }
    }

    enum Script {
        /// Yield the items, then end
        Lines(Vec<Result<String, LogStreamError>>),
        /// Yield the lines, then stay open without sending anything
        Hang(Vec<String>),
        /// Fail to open
        Refuse,
    }

    #[derive(Default)]
    struct ScriptedSource {
        scripts: Mutex<VecDeque<Script>>,
        opened: Mutex<Vec<LogTarget>>,
    }

    impl ScriptedSource {
        fn new(scripts: Vec<Script>) -> Self {
            Self {
                scripts: Mutex::new(scripts.into()),
                opened: Mutex::new(Vec::new()),
            }
        }

        fn opened_pods(&self) -> Vec<String> {
            self.opened.lock().iter().map(|t| t.pod.clone()).collect()
        }
    }

    impl LogSource for ScriptedSource {
        async fn open(
            &self,
            target: &LogTarget,
            _: &StreamOptions,
        ) -> Result<LineStream, LogStreamError> {
            self.opened.lock().push(target.clone());
            let script = self.scripts.lock().pop_front();
            match script {
                Some(Script::Lines(items)) => Ok(stream::iter(items).boxed()),
                Some(Script::Hang(lines)) => Ok(stream::iter(lines.into_iter().map(Ok))
                    .chain(stream::pending())
                    .boxed()),
                Some(Script::Refuse) => Err(LogStreamError::Aborted),
                None => Ok(stream::pending().boxed()),
            }
        }
    }

    fn running_pod(name: &str) -> TargetInstance {
        TargetInstance::new(name, PodPhase::Running).with_containers(["minecraft"])
    }

    fn line(text: &str) -> Result<String, LogStreamError> {
        Ok(text.to_string())
    }

    fn transport_error() -> Result<String, LogStreamError> {
        Err(LogStreamError::Transport(std::io::Error::other(
            "connection reset by peer",
        )))
    }

    fn supervisor(
        locator: ScriptedLocator,
        source: ScriptedSource,
        config: SupervisorConfig,
    ) -> (LogStreamSupervisor<ScriptedLocator, ScriptedSource>, MetricsSink) {
        let sink = MetricsSink::new().unwrap();
        let sup = LogStreamSupervisor::new(locator, source, sink.clone(), config);
        (sup, sink)
    }

    fn config() -> SupervisorConfig {
        SupervisorConfig::new("games", "app=minecraft-bedrock", "minecraft")
    }

    #[tokio::test(start_paused = true)]
    async fn test_applies_lines_then_backs_off_after_transport_error() {
        let (sup, sink) = supervisor(
            ScriptedLocator::new(vec![Some("mc-a")]),
            ScriptedSource::new(vec![Script::Lines(vec![
                line("[INFO] Player Alice connected"),
                line("[INFO] Player Bob connected"),
                line("[INFO] Player Alice disconnected"),
                transport_error(),
                line("[INFO] Player Carol connected"),
            ])]),
            config(),
        );

        let state = sup.step(SupervisorState::Discovering).await;
        assert_eq!(state, SupervisorState::Streaming(running_pod("mc-a")));

        let state = sup.step(state).await;
        assert_eq!(state, SupervisorState::Backoff);
        assert!(!sink.get("Alice").unwrap().online);
        assert!(sink.get("Bob").unwrap().online);
        assert!(sink.get("Carol").is_none());

        let started = Instant::now();
        let state = sup.step(state).await;
        assert_eq!(state, SupervisorState::Discovering);
        assert!(started.elapsed() >= DEFAULT_BACKOFF_INTERVAL);

        let text = sink.encode_text().unwrap();
        assert!(text.contains("playerwatch_log_streams_opened_total 1"));
        assert!(text.contains("playerwatch_log_streams_lost_total 1"));
        assert!(text.contains("playerwatch_log_stream_active 0"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_uses_newly_discovered_pod() {
        let (sup, sink) = supervisor(
            ScriptedLocator::new(vec![Some("mc-old"), Some("mc-new")]),
            ScriptedSource::new(vec![
                Script::Lines(vec![line("Player Alice connected")]),
                Script::Lines(vec![line("Player Alice disconnected")]),
            ]),
            config(),
        );

        let mut state = SupervisorState::Discovering;
        let mut visited = Vec::new();
        for _ in 0..6 {
            state = sup.step(state).await;
            visited.push(state.clone());
        }

        assert_eq!(
            visited,
            vec![
                SupervisorState::Streaming(running_pod("mc-old")),
                SupervisorState::Backoff,
                SupervisorState::Discovering,
                SupervisorState::Streaming(running_pod("mc-new")),
                SupervisorState::Backoff,
                SupervisorState::Discovering,
            ]
        );
        assert_eq!(sup.source.opened_pods(), vec!["mc-old", "mc-new"]);
        assert!(!sink.get("Alice").unwrap().online);
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_waits_discovery_interval() {
        let (sup, sink) = supervisor(
            ScriptedLocator::new(vec![None, Some("mc-a")]),
            ScriptedSource::default(),
            config(),
        );

        let started = Instant::now();
        let state = sup.step(SupervisorState::Discovering).await;
        assert_eq!(state, SupervisorState::Discovering);
        assert!(started.elapsed() >= DEFAULT_DISCOVERY_INTERVAL);

        let state = sup.step(state).await;
        assert_eq!(state, SupervisorState::Streaming(running_pod("mc-a")));
        assert!(sink
            .encode_text()
            .unwrap()
            .contains("playerwatch_discovery_failures_total 1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_failure_backs_off() {
        let (sup, sink) = supervisor(
            ScriptedLocator::default(),
            ScriptedSource::new(vec![Script::Refuse]),
            config(),
        );

        let state = sup
            .step(SupervisorState::Streaming(running_pod("mc-a")))
            .await;
        assert_eq!(state, SupervisorState::Backoff);

        let target = sup.source.opened.lock()[0].clone();
        assert_eq!(target, LogTarget::new("games", "mc-a", "minecraft"));
        assert!(sink
            .encode_text()
            .unwrap()
            .contains("playerwatch_log_streams_opened_total 0"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_stream_is_abandoned() {
        let mut config = config();
        config.idle_timeout = Some(Duration::from_secs(300));
        let (sup, sink) = supervisor(
            ScriptedLocator::default(),
            ScriptedSource::new(vec![Script::Hang(vec![
                "Player Dave connected".to_string(),
            ])]),
            config,
        );

        let started = Instant::now();
        let state = sup
            .step(SupervisorState::Streaming(running_pod("mc-a")))
            .await;
        assert_eq!(state, SupervisorState::Backoff);
        assert!(started.elapsed() >= Duration::from_secs(300));
        assert!(sink.get("Dave").unwrap().online);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_event_lines_are_ignored() {
        let (sup, sink) = supervisor(
            ScriptedLocator::default(),
            ScriptedSource::new(vec![Script::Lines(vec![
                line(""),
                line("Server started."),
                line("IPv4 supported, port: 19132"),
            ])]),
            config(),
        );

        let state = sup
            .step(SupervisorState::Streaming(running_pod("mc-a")))
            .await;
        assert_eq!(state, SupervisorState::Backoff);
        assert!(sink.players().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_retries_until_cancelled() {
        let (sup, sink) = supervisor(
            ScriptedLocator::new(vec![Some("mc-a"), None, Some("mc-b")]),
            ScriptedSource::new(vec![
                Script::Lines(vec![line("Player Alice connected"), transport_error()]),
                Script::Lines(vec![line("Player Bob connected")]),
            ]),
            config(),
        );

        let cancel = CancellationToken::new();
        let stopper = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(60)).await;
                cancel.cancel();
            })
        };

        sup.run(cancel).await;
        stopper.await.unwrap();

        assert_eq!(sup.source.opened_pods(), vec!["mc-a", "mc-b"]);
        assert!(sink.get("Alice").unwrap().online);
        assert!(sink.get("Bob").unwrap().online);
        // Discovery keeps going after the second stream is lost
        assert!(sup.locator.calls.load(Ordering::SeqCst) > 3);
    }
}
