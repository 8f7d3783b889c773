//! End-to-end tests for the QuickJS-hosted backend: a real render program
//! evaluated in the embedded engine, driving the full worker protocol.

use serde_json::json;
use tokio::sync::mpsc;

use outpost::worker::bootstrap::BootstrapError;
use outpost::worker::installer::PackageSpec;
use outpost::worker::WorkerHandle;
use outpost::{HostMessage, ScriptBackend, Worker, WorkerConfig, WorkerError, WorkerMessage};

const GREET_MODULE: &str = r#"
self.greet = (name) => `hello ${name}`;
"#;

const PROGRAM: &str = r#"
(() => {
    console.log('render program starting');
    const docs = { title: self.greet('graph'), defs: [] };
    globalThis.__locationParams = { theta: 0, zoom: 1 };
    sendPatch(JSON.stringify({ op: 'set', path: '/defs/-', value: 'seeded' }));
    return JSON.stringify([docs, [{ id: 'root' }], ['root']]);
})()
"#;

const MINIMAL_PROGRAM: &str = r#"
(() => JSON.stringify([{}, [], []]))()
"#;

const FAILING_PROGRAM: &str = r#"
(() => {
    throw new Error('data frame missing');
})()
"#;

async fn collect_until_render(
    rx: &mut mpsc::UnboundedReceiver<WorkerMessage>,
) -> Vec<WorkerMessage> {
    let mut messages = Vec::new();
    loop {
        let message = rx.recv().await.expect("worker message stream ended early");
        let done = matches!(message, WorkerMessage::Render { .. });
        messages.push(message);
        if done {
            return messages;
        }
    }
}

async fn drain(mut rx: mpsc::UnboundedReceiver<WorkerMessage>) -> Vec<WorkerMessage> {
    let mut messages = Vec::new();
    while let Some(message) = rx.recv().await {
        messages.push(message);
    }
    messages
}

fn status_lines(messages: &[WorkerMessage]) -> Vec<&str> {
    messages
        .iter()
        .filter_map(|message| match message {
            WorkerMessage::Status { msg } => Some(msg.as_str()),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn script_program_renders_installs_and_emits_patches() {
    let backend = ScriptBackend::new(PROGRAM).with_module("greet", GREET_MODULE);
    let packages = vec![PackageSpec::from_requirement(
        "https://cdn.example.org/wheels/greet-0.1.0-py3-none-any.whl",
    )];
    let (worker, handle) = Worker::new(backend, WorkerConfig::default().with_packages(packages));
    let WorkerHandle {
        to_worker,
        mut from_worker,
    } = handle;

    let driver = async move {
        let bootstrap = collect_until_render(&mut from_worker).await;
        to_worker.send(HostMessage::Rendered).expect("send rendered");
        to_worker
            .send(HostMessage::Location {
                location: r#"{"theta": 3, "bogus": 9}"#.to_string(),
            })
            .expect("send location");
        to_worker
            .send(HostMessage::Patch {
                patch: json!({"op": "set", "path": "/title", "value": "renamed"}),
            })
            .expect("send patch");
        let idle = from_worker.recv().await.expect("idle reply");
        drop(to_worker);
        (bootstrap, idle)
    };

    let (run_result, (bootstrap, idle)) = tokio::join!(worker.run(), driver);
    run_result.expect("worker shuts down cleanly");

    assert_eq!(
        status_lines(&bootstrap),
        vec!["loading runtime", "installing greet", "executing code"]
    );

    let emitted = bootstrap
        .iter()
        .find_map(|message| match message {
            WorkerMessage::Patch { patch, msg_id, .. } => Some((patch, msg_id)),
            _ => None,
        })
        .expect("program-emitted patch");
    assert_eq!(
        emitted.0,
        &json!({"op": "set", "path": "/defs/-", "value": "seeded"})
    );
    assert!(!emitted.1.is_empty());

    assert!(matches!(
        bootstrap.last(),
        Some(WorkerMessage::Render { docs_json, root_ids, .. })
            if docs_json == &json!({"title": "hello graph", "defs": []})
                && root_ids == &json!(["root"])
    ));
    assert_eq!(idle, WorkerMessage::Idle);
}

#[tokio::test]
async fn missing_module_sources_fail_softly() {
    let backend = ScriptBackend::new(MINIMAL_PROGRAM);
    let packages = vec![
        PackageSpec::from_requirement("unregistered"),
        PackageSpec::from_requirement("extras"),
    ];
    let (worker, handle) = Worker::new(backend, WorkerConfig::default().with_packages(packages));
    let WorkerHandle {
        to_worker,
        mut from_worker,
    } = handle;

    let driver = async move {
        let bootstrap = collect_until_render(&mut from_worker).await;
        drop(to_worker);
        bootstrap
    };

    let (run_result, bootstrap) = tokio::join!(worker.run(), driver);
    run_result.expect("worker shuts down cleanly");

    assert_eq!(
        status_lines(&bootstrap),
        vec![
            "loading runtime",
            "installing unregistered",
            "error installing unregistered",
            "installing extras",
            "error installing extras",
            "executing code",
        ]
    );
}

#[tokio::test]
async fn program_exceptions_surface_the_summary_line() {
    let backend = ScriptBackend::new(FAILING_PROGRAM);
    let (worker, handle) = Worker::new(backend, WorkerConfig::default());

    let (run_result, messages) = tokio::join!(worker.run(), drain(handle.from_worker));

    assert!(matches!(
        run_result,
        Err(WorkerError::Bootstrap(BootstrapError::Render(_)))
    ));
    let statuses = status_lines(&messages);
    assert_eq!(statuses.last(), Some(&"Error: data frame missing"));
}
