//! End-to-end tests: fake agent → runner → analyzer → verifier → run store.

#![cfg(unix)]

mod common;

use common::{scenario, Sandbox};
use scenario_harness::pipeline::{HarnessPipeline, ImprovementLoop, REMEDIATION_FILE};
use scenario_harness::storage::{export_json, import_json, RunFilter, RunStore};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

async fn pipeline(sandbox: &Sandbox) -> HarnessPipeline {
    let config = sandbox.config();
    let store = RunStore::open(&config.db_path).await.unwrap();
    HarnessPipeline::with_store(config, store).unwrap()
}

/// Agent emitting `turns` turn starts, a skill invocation and a sub-agent.
fn busy_agent(turns: u32) -> String {
    format!(
        r#"
event session.start '{{"sessionId":"sess-busy"}}'
i=0
while [ $i -lt {turns} ]; do
  event assistant.turn_start '{{}}'
  i=$((i+1))
done
event tool.execution_start '{{"toolCallId":"t1","toolName":"skill","arguments":{{"skill":"deploy-helper"}}}}'
event subagent.started '{{}}'
exit 0
"#
    )
}

#[tokio::test]
async fn test_clean_run_passes_and_is_stored() {
    let sandbox = Sandbox::new(&busy_agent(3));
    let pipeline = pipeline(&sandbox).await;
    let scenario = scenario(
        r#"
name: web-app
prompts:
  - text: build
scoring:
  max_turns: 10
  must_delegate: true
  must_invoke_skills: [deploy-helper]
"#,
    );

    let report = pipeline.run_once(&scenario, None).await.unwrap();

    let run = report.run();
    // the event log's declared id wins over the directory name
    assert!(report.execution.session_dir_name.starts_with("session-"));
    assert_eq!(run.session_id, "sess-busy");
    assert_eq!(run.turns, 3);
    assert!(run.delegated);
    assert_eq!(run.skills.get("deploy-helper"), Some(&true));
    assert_eq!(run.score, 100.0);
    assert!(report.passed());

    let stored = pipeline.store().get_run(report.run_id).await.unwrap();
    assert_eq!(stored.session_id, "sess-busy");
    assert_eq!(stored.turns, 3);
    assert_eq!(stored.skills, run.skills);
}

#[tokio::test]
async fn test_turn_limit_exceeded_halves_turn_points() {
    let sandbox = Sandbox::new(&busy_agent(20));
    let pipeline = pipeline(&sandbox).await;
    let scenario = scenario(
        r#"
name: chatty
prompts:
  - text: build
scoring:
  max_turns: 10
"#,
    );

    let report = pipeline.run_once(&scenario, None).await.unwrap();

    let turns = report.analysis.scorecard.get("turns").unwrap();
    assert_eq!(turns.earned, 10.0);
    assert_eq!(turns.weight, 20.0);
    assert_eq!(report.run().turns, 20);
    assert_eq!(report.run().score, 50.0);
    assert!(!report.passed());
}

#[tokio::test]
async fn test_regression_over_limit_fails_run() {
    let sandbox = Sandbox::new(
        r#"
event assistant.turn_start '{}'
echo "Error: login required"
echo "retrying with device code"
echo "Error: login required"
echo "Error: Login Required"
exit 0
"#,
    );
    let pipeline = pipeline(&sandbox).await;
    let scenario = scenario(
        r#"
name: auth
prompts:
  - text: deploy
scoring:
  regressions:
    - { name: auth-loop, pattern: "(?i)login required", max_occurrences: 2 }
"#,
    );

    let report = pipeline.run_once(&scenario, None).await.unwrap();

    let regression = &report.run().regressions["auth-loop"];
    assert_eq!(regression.occurrences, 3);
    assert_eq!(regression.limit, 2);
    assert!(!regression.passed);
    assert!(!report.passed());
}

async fn serve_page(body: &'static str) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let mut buf = [0u8; 2048];
            let _ = socket.read(&mut buf).await;
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
        }
    });
    format!("http://{}", addr)
}

#[tokio::test]
async fn test_deployed_run_is_verified_over_http() {
    let endpoint = serve_page("<h1>Welcome</h1>").await;
    let sandbox = Sandbox::new(
        r#"
event assistant.turn_start '{}'
event tool.execution_start '{"toolCallId":"d1","toolName":"bash","arguments":{"command":"azd up --no-prompt"}}'
event tool.execution_complete '{"toolCallId":"d1","success":true,"result":{"content":"Deployed."}}'
touch package.json
exit 0
"#,
    );
    let mut config = sandbox.config();
    config.endpoint_command = Some(format!("echo SERVICE_WEB_URI={}", endpoint));
    let store = RunStore::open(&config.db_path).await.unwrap();
    let pipeline = HarnessPipeline::with_store(config, store).unwrap();

    let scenario = scenario(
        r##"
name: deployed
prompts:
  - text: deploy it
    success_criteria:
      files_exist: [package.json, README.md]
      deployed: true
      endpoint_responds: true
scoring:
  max_deploy_calls: 2
verification:
  - { name: home, action: navigate, url: "{{endpoint}}/", value: "Welcome" }
  - { name: missing-text, action: navigate, url: "{{endpoint}}/", value: "Goodbye" }
  - { name: click-start, action: click, selector: "#start" }
"##,
    );

    let report = pipeline.run_once(&scenario, None).await.unwrap();

    assert_eq!(report.endpoint.as_deref(), Some(endpoint.as_str()));
    assert_eq!(report.run().deploy_calls, 1);
    assert!(report.run().deployed);

    let verification = &report.run().verification;
    assert!(verification["home"].passed, "{}", verification["home"].details);
    assert!(!verification["missing-text"].passed);
    // no WebDriver configured: browser steps fail without halting
    assert!(!verification["click-start"].passed);
    // verification does not affect the score
    assert!(report.passed());

    let criteria: Vec<(&str, bool)> = report
        .criteria
        .iter()
        .map(|c| (c.criterion.as_str(), c.passed))
        .collect();
    assert_eq!(
        criteria,
        vec![
            ("files_exist:package.json", true),
            ("files_exist:README.md", false),
            ("deployed", true),
            ("endpoint_responds", true),
        ]
    );

    let stored = pipeline.store().get_run(report.run_id).await.unwrap();
    assert_eq!(stored.verification.len(), 3);
    assert!(stored.verification["home"].passed);
}

#[tokio::test]
async fn test_improvement_loop_remediates_until_bound() {
    let sandbox = Sandbox::new(&busy_agent(3));
    let assets = sandbox.path().join("assets");
    let mut config = sandbox.config().with_max_iterations(3);
    config.assets_dir = Some(assets.clone());
    let store = RunStore::open(&config.db_path).await.unwrap();
    let pipeline = HarnessPipeline::with_store(config, store).unwrap();

    let scenario = scenario(
        r#"
name: strict
prompts:
  - text: build the app
scoring:
  max_turns: 1
"#,
    );

    let outcome = ImprovementLoop::new(&pipeline).run(&scenario).await.unwrap();

    assert!(!outcome.passed);
    assert_eq!(outcome.iterations.len(), 3);
    assert!(outcome.iterations[0].remediation.is_some());
    assert!(outcome.iterations[1].remediation.is_some());
    assert!(outcome.iterations[2].remediation.is_none());

    let remediation = std::fs::read_to_string(assets.join(REMEDIATION_FILE)).unwrap();
    assert!(remediation.contains("the number of turns at or below 1 (last attempt: 3)"));

    // the instruction is prepended to later first prompts
    let args = sandbox.args_log();
    assert_eq!(args.matches("Harness feedback: strict").count(), 2);

    assert_eq!(pipeline.store().count_runs().await.unwrap(), 3);
}

#[tokio::test]
async fn test_improvement_loop_stops_on_first_pass() {
    let sandbox = Sandbox::new(&busy_agent(2));
    let pipeline = pipeline(&sandbox).await;
    let scenario = scenario(
        r#"
name: easy
prompts:
  - text: build
scoring:
  max_turns: 5
"#,
    );

    let outcome = ImprovementLoop::new(&pipeline)
        .with_max_iterations(3)
        .run(&scenario)
        .await
        .unwrap();

    assert!(outcome.passed);
    assert_eq!(outcome.iterations.len(), 1);
    assert_eq!(outcome.final_score(), Some(100.0));
    assert!(!sandbox.args_log().contains("Harness feedback"));
}

#[tokio::test]
async fn test_stored_runs_survive_export_and_import() {
    let sandbox = Sandbox::new(&busy_agent(4));
    let pipeline = pipeline(&sandbox).await;
    let scenario = scenario(
        r#"
name: exchange
prompts:
  - text: build
scoring:
  max_turns: 10
  must_invoke_skills: [deploy-helper, diagnostics]
"#,
    );
    pipeline.run_once(&scenario, None).await.unwrap();

    let file = sandbox.path().join("export/runs.json");
    assert_eq!(export_json(pipeline.store(), &file).await.unwrap(), 1);

    let other = RunStore::open(&sandbox.path().join("other.db")).await.unwrap();
    let first = import_json(&other, &file).await.unwrap();
    assert_eq!((first.imported, first.skipped), (1, 0));
    let again = import_json(&other, &file).await.unwrap();
    assert_eq!((again.imported, again.skipped), (0, 1));

    let original = pipeline
        .store()
        .list_runs(&RunFilter::new().with_details(true))
        .await
        .unwrap();
    let copied = other
        .list_runs(&RunFilter::new().with_details(true))
        .await
        .unwrap();
    assert_eq!(copied.len(), 1);
    assert_eq!(copied[0].session_id, original[0].session_id);
    assert_eq!(copied[0].score, original[0].score);
    assert_eq!(copied[0].skills, original[0].skills);
    assert_eq!(copied[0].skills.get("diagnostics"), Some(&false));
}
