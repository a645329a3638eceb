//! End-to-end tests of the library: config → scanner → pipeline → unban list.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

use scanban::cmd_abstraction::{CommandExecutor, CommandOutput};
use scanban::config::Config;
use scanban::pipeline::Pipeline;
use scanban::record::{Record, Rejection};
use scanban::scan::{ScanOptions, Scanner, Source};
use scanban::signal::ShutdownToken;
use scanban::unban::UnbanList;

/// Records every command and its environment, always succeeds.
#[derive(Default)]
struct RecordingExecutor {
    calls: Mutex<Vec<(String, Vec<(String, String)>)>>,
}

impl RecordingExecutor {
    fn commands(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(cmd, _)| cmd.clone())
            .collect()
    }

    fn env_of(&self, idx: usize, key: &str) -> Option<String> {
        let calls = self.calls.lock().unwrap();
        calls[idx]
            .1
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }
}

#[async_trait]
impl CommandExecutor for RecordingExecutor {
    async fn run(&self, command: &str, env: &[(String, String)]) -> Result<CommandOutput> {
        self.calls
            .lock()
            .unwrap()
            .push((command.to_string(), env.to_vec()));
        Ok(CommandOutput {
            success: true,
            code: Some(0),
            ..Default::default()
        })
    }
}

const CONFIG: &str = r#"
whitelist:
  - 127.0.0.1
  - 192.168.1.0/24
ip_regex: 'from (\d+\.\d+\.\d+\.\d+)'
action: ipsetblock
unban_action: ipsetunblock
bantime: 6
actions:
  ipsetblock: "ipset add scanban $ip"
  ipsetunblock: "ipset del scanban $ip"
rules:
  - pattern: "Failed password"
    desc: ssh brute force
    threshold: 1
  - pattern: "wp-login.php"
"#;

struct Harness {
    _dir: TempDir,
    executor: Arc<RecordingExecutor>,
    unban_list: Arc<UnbanList>,
    pipeline: Pipeline,
}

fn harness() -> Harness {
    let dir = TempDir::new().unwrap();
    let config = Config::parse(CONFIG).unwrap();
    config.validate().unwrap();

    let executor = Arc::new(RecordingExecutor::default());
    let unban_list = Arc::new(
        UnbanList::load(dir.path().join("unban.json"), executor.clone()).unwrap(),
    );
    let pipeline = Pipeline::standard(
        config.compile().unwrap(),
        config.whitelist(),
        config.action_map(),
        executor.clone(),
        unban_list.clone(),
    )
    .with_default_observers(true);

    Harness {
        _dir: dir,
        executor,
        unban_list,
        pipeline,
    }
}

async fn process(h: &mut Harness, line: &str, dry_run: bool) -> Record {
    let mut rec = Record::new("auth.log", line, dry_run);
    h.pipeline.process(&mut rec).await;
    rec
}

#[tokio::test]
async fn test_threshold_one_bans_on_second_hit() {
    let mut h = harness();

    let first = process(&mut h, "sshd[1]: Failed password for root from 1.2.3.4 port 1", false).await;
    assert_eq!(first.rejection(), Some(Rejection::ThresholdNotMet));
    assert!(!first.actioned());

    let second = process(&mut h, "sshd[2]: Failed password for root from 1.2.3.4 port 2", false).await;
    assert!(second.ok());
    assert!(second.actioned());
    assert!(second.unban_scheduled);

    assert_eq!(h.executor.commands(), vec!["ipset add scanban 1.2.3.4"]);
    assert_eq!(h.executor.env_of(0, "SB_DESC").as_deref(), Some("ssh brute force"));
    assert_eq!(h.executor.env_of(0, "SB_BANTIME").as_deref(), Some("6"));

    let pending = h.unban_list.pending().await;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].ip, "1.2.3.4");
    assert_eq!(pending[0].action, "ipset del scanban $ip");
    let expected = Utc::now() + ChronoDuration::hours(6);
    assert!((expected - pending[0].after).num_seconds().abs() <= 2);
}

#[tokio::test]
async fn test_whitelisted_ip_is_never_actioned() {
    let mut h = harness();
    for port in 0..4 {
        let line = format!("GET /wp-login.php from 192.168.1.77 port {}", port);
        let rec = process(&mut h, &line, false).await;
        assert_eq!(rec.rejection(), Some(Rejection::Whitelisted));
    }
    assert!(h.executor.commands().is_empty());
    assert!(h.unban_list.is_empty().await);
}

#[tokio::test]
async fn test_repeated_line_is_duplicate() {
    let mut h = harness();
    let line = "GET /wp-login.php from 5.6.7.8";

    let first = process(&mut h, line, false).await;
    assert!(first.actioned());

    let second = process(&mut h, line, false).await;
    assert_eq!(second.rejection(), Some(Rejection::Duplicate));
    assert_eq!(h.executor.commands().len(), 1);
}

#[tokio::test]
async fn test_dry_run_runs_nothing_and_persists_nothing() {
    let mut h = harness();
    let rec = process(&mut h, "GET /wp-login.php from 5.6.7.8", true).await;

    assert!(rec.actioned());
    assert!(rec.unban_scheduled);
    assert!(h.executor.commands().is_empty());
    assert!(h.unban_list.is_empty().await);
}

#[tokio::test]
async fn test_unmatched_and_ipless_lines() {
    let mut h = harness();

    let rec = process(&mut h, "session opened for user root", false).await;
    assert_eq!(rec.rejection(), Some(Rejection::NoMatch));

    let rec = process(&mut h, "GET /wp-login.php from 999.1.1.1", false).await;
    assert_eq!(rec.rejection(), Some(Rejection::NoIp));

    let metrics = h.pipeline.metrics();
    assert_eq!(metrics.lines(), 2);
    assert_eq!(metrics.rejected_for(Rejection::NoMatch), 1);
    assert_eq!(metrics.rejected_for(Rejection::NoIp), 1);
}

#[tokio::test]
async fn test_due_unban_runs_and_is_removed() {
    let mut h = harness();
    let rec = process(&mut h, "GET /wp-login.php from 9.8.7.6", false).await;
    assert!(rec.actioned());
    assert_eq!(h.unban_list.len().await, 1);

    // Not due yet
    assert_eq!(h.unban_list.reap(Utc::now()).await, 0);

    let later = Utc::now() + ChronoDuration::hours(7);
    assert_eq!(h.unban_list.reap(later).await, 1);
    assert!(h.unban_list.is_empty().await);
    assert_eq!(
        h.executor.commands(),
        vec!["ipset add scanban 9.8.7.6", "ipset del scanban 9.8.7.6"]
    );

    let reloaded = UnbanList::load(h.unban_list.path(), h.executor.clone()).unwrap();
    assert!(reloaded.is_empty().await);
}

#[tokio::test]
async fn test_scanner_feeds_pipeline_until_sources_finish() {
    let mut h = harness();
    let dir = TempDir::new().unwrap();
    let log = dir.path().join("access.log");
    std::fs::write(
        &log,
        "GET /wp-login.php from 10.0.0.1\n\
         GET /index.html from 10.0.0.2\n\
         GET /wp-login.php from 127.0.0.1\n\
         GET /wp-login.php from 10.0.0.3\n",
    )
    .unwrap();

    let scanner = Scanner::new(
        vec![Source::one_shot(log.to_str().unwrap())],
        ScanOptions {
            skip_existing: false,
            ..Default::default()
        },
    );
    let shutdown = ShutdownToken::new();
    let records = scanner.scan(shutdown.clone());

    tokio::time::timeout(Duration::from_secs(5), h.pipeline.run(records, shutdown))
        .await
        .expect("pipeline should end once the file is read");

    let metrics = h.pipeline.metrics();
    assert_eq!(metrics.lines(), 4);
    assert_eq!(metrics.actioned(), 2);
    assert_eq!(metrics.rejected_for(Rejection::NoMatch), 1);
    assert_eq!(metrics.rejected_for(Rejection::Whitelisted), 1);
    assert_eq!(h.unban_list.len().await, 2);
}
