//! Message loop tests -- NDJSON in, NDJSON out.

use std::sync::Arc;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use vendorscope_core::config::VendorscopeConfig;
use vendorscope_core::store::{FileStateStore, MemoryStateStore, StateStore};
use vendorscope_daemon::{Router, RouterChannels, serve};
use vendorscope_detector::rule::{RuleCatalog, RuleLoader};
use vendorscope_detector::MemoryRuleSource;

const CATALOG: &str = r##"
rules:
  - id: cloudflare
    name: Cloudflare
    category: CDN
    detection:
      cookies:
        - name: __cf_bm
          confidence: 95
"##;

fn catalog() -> RuleCatalog {
    let parsed = RuleLoader::parse_documents(CATALOG, "test").expect("parse");
    RuleCatalog {
        version: semver::Version::new(1, 0, 0),
        rules: RuleLoader::compile_documents(&parsed.documents, "test").expect("compile"),
    }
}

fn assemble<S: StateStore>(
    state: Arc<S>,
    config: &VendorscopeConfig,
) -> (Router<MemoryRuleSource, S>, RouterChannels) {
    Router::assemble(MemoryRuleSource::new(catalog()), state, config).expect("assemble")
}

fn parse_output(output: &[u8]) -> Vec<Value> {
    String::from_utf8_lossy(output)
        .lines()
        .map(|line| serde_json::from_str(line).expect("output line is JSON"))
        .collect()
}

const SCRIPT: &str = concat!(
    r#"{"id":1,"type":"getRules"}"#,
    "\n",
    "this is not json\n",
    "\n",
    r#"{"id":2,"type":"submitSignals","tabId":5,"url":"https://a.test/","signals":[{"kind":"cookie","name":"__cf_bm","value":"x"}]}"#,
    "\n",
    r#"{"id":3,"type":"getSessionResults","tabId":5}"#,
    "\n",
);

#[tokio::test]
async fn answers_each_line_and_forwards_events() {
    let (mut router, mut channels) = assemble(
        Arc::new(MemoryStateStore::new()),
        &VendorscopeConfig::default(),
    );
    let mut output = Vec::new();

    let summary = serve(
        &mut router,
        &mut channels,
        SCRIPT.as_bytes(),
        &mut output,
        std::future::pending(),
    )
    .await
    .unwrap();

    assert_eq!(summary.requests, 4);
    assert_eq!(summary.events, 1);

    let lines = parse_output(&output);
    assert_eq!(lines.len(), 5);
    assert_eq!(lines[0]["id"], 1);
    assert_eq!(lines[0]["ok"], true);
    assert_eq!(lines[1]["id"], 0);
    assert_eq!(lines[1]["ok"], false);
    assert_eq!(lines[2]["id"], 2);
    assert_eq!(lines[3]["event"], "badgeUpdate");
    assert_eq!(lines[3]["tabId"], 5);
    assert_eq!(lines[3]["count"], 1);
    assert_eq!(lines[4]["id"], 3);
    assert_eq!(lines[4]["results"][0]["ruleId"], "cloudflare");
}

#[tokio::test]
async fn resolved_shutdown_stops_before_reading() {
    let (mut router, mut channels) = assemble(
        Arc::new(MemoryStateStore::new()),
        &VendorscopeConfig::default(),
    );
    let mut output = Vec::new();

    let summary = serve(&mut router, &mut channels, SCRIPT.as_bytes(), &mut output, async {})
        .await
        .unwrap();

    assert_eq!(summary.requests, 0);
    assert!(output.is_empty());
}

#[tokio::test]
async fn results_survive_restart_with_file_state() {
    let dir = tempfile::tempdir().unwrap();
    let config = VendorscopeConfig::default();

    {
        let state = Arc::new(FileStateStore::open(dir.path()).await.unwrap());
        let (mut router, mut channels) = assemble(state, &config);
        let input = concat!(
            r#"{"id":1,"type":"submitSignals","tabId":11,"url":"https://a.test/","signals":[{"kind":"cookie","name":"__cf_bm"}]}"#,
            "\n"
        );
        let mut output = Vec::new();
        serve(&mut router, &mut channels, input.as_bytes(), &mut output, std::future::pending())
            .await
            .unwrap();
    }

    let state = Arc::new(FileStateStore::open(dir.path()).await.unwrap());
    let (mut router, mut channels) = assemble(state, &config);
    let input = concat!(r#"{"id":2,"type":"getSessionResults","tabId":11}"#, "\n");
    let mut output = Vec::new();
    serve(&mut router, &mut channels, input.as_bytes(), &mut output, std::future::pending())
        .await
        .unwrap();

    let lines = parse_output(&output);
    assert_eq!(lines[0]["results"][0]["displayName"], "Cloudflare");
}

#[tokio::test(start_paused = true)]
async fn capture_expiry_is_reported_while_idle() {
    let (mut router, mut channels) = assemble(
        Arc::new(MemoryStateStore::new()),
        &VendorscopeConfig::default(),
    );
    let (client, server) = tokio::io::duplex(64 * 1024);
    let (server_read, server_write) = tokio::io::split(server);
    let (client_read, mut client_write) = tokio::io::split(client);

    let host = async move {
        let mut replies = BufReader::new(client_read).lines();
        client_write
            .write_all(
                concat!(
                    r#"{"id":1,"type":"navigationStarted","tabId":4,"url":"https://shop.test/"}"#,
                    "\n",
                    r#"{"id":2,"type":"armCapture","tabId":4,"targets":["recaptcha"],"windowMs":2000}"#,
                    "\n",
                )
                .as_bytes(),
            )
            .await
            .unwrap();

        let mut seen = Vec::new();
        while let Some(line) = replies.next_line().await.unwrap() {
            let value: Value = serde_json::from_str(&line).unwrap();
            let done = value["event"] == "captureFinished";
            seen.push(value);
            if done {
                break;
            }
        }
        client_write.shutdown().await.unwrap();
        seen
    };

    let (seen, summary) = tokio::join!(
        host,
        serve(
            &mut router,
            &mut channels,
            BufReader::new(server_read),
            server_write,
            std::future::pending(),
        )
    );
    let summary = summary.unwrap();
    assert_eq!(summary.requests, 2);

    let finished = seen.last().unwrap();
    assert_eq!(finished["event"], "captureFinished");
    assert_eq!(finished["tabId"], 4);
    assert_eq!(finished["state"], "expired");
    assert_eq!(finished["noCaptures"], true);
}
