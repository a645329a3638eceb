//! Persistent list of pending unbans.
//!
//! Every ban with an unban command adds an [`UnbanEntry`] to the list. The
//! list is rewritten to disk after every change so pending unbans survive a
//! restart. A background loop runs due unban commands at startup and then on
//! a fixed interval; entries whose command fails stay for the next round.
//!
//! The file on disk is the source of truth. The daemon and a one-shot `scan`
//! may share it, so every change reloads the file, applies the change and
//! rewrites it while holding an exclusive lock on `<path>.lock`. Within one
//! process the same changes are serialized by an async mutex that also guards
//! the in-memory copy.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::cmd_abstraction::{env_vars, CommandExecutor};
use crate::error::ScanbanError;
use crate::lock::LockGuard;
use crate::pipeline::Stage;
use crate::record::Record;
use crate::signal::ShutdownToken;

/// Default location of the persisted list
pub const DEFAULT_UNBAN_FILE: &str = "/var/lib/scanban/unban.json";

/// A scheduled unban.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnbanEntry {
    /// Command template, `$ip` is substituted at run time
    pub action: String,
    pub ip: String,
    /// Release time
    pub after: DateTime<Utc>,
}

impl UnbanEntry {
    pub fn command(&self) -> String {
        self.action.replace("$ip", &self.ip)
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        now > self.after
    }

    fn environment(&self) -> Vec<(String, String)> {
        env_vars([
            ("SB_IP", self.ip.clone()),
            ("SB_UNBANTIME", self.after.timestamp().to_string()),
            ("SB_NAME", self.action.clone()),
        ])
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct UnbanFile {
    #[serde(default)]
    entries: Vec<UnbanEntry>,
}

/// The shared, persisted list of pending unbans.
pub struct UnbanList {
    path: PathBuf,
    entries: Mutex<Vec<UnbanEntry>>,
    executor: Arc<dyn CommandExecutor>,
}

impl UnbanList {
    /// Load the list from `path`. A missing or empty file is an empty list.
    pub fn load(path: impl Into<PathBuf>, executor: Arc<dyn CommandExecutor>) -> Result<Self> {
        let path = path.into();
        let entries = read_entries(&path)?;

        debug!(
            "Loaded {} pending unbans from {}",
            entries.len(),
            path.display()
        );

        Ok(Self {
            path,
            entries: Mutex::new(entries),
            executor,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append an entry to the stored list.
    ///
    /// Entries written by other processes since the last change are kept. The
    /// entry stays in memory even if persisting fails.
    pub async fn schedule(&self, entry: UnbanEntry) -> Result<()> {
        let mut entries = self.entries.lock().await;
        let added = entry.clone();
        match self.update(move |stored| stored.push(added)).await {
            Ok(stored) => {
                *entries = stored;
                Ok(())
            }
            Err(e) => {
                entries.push(entry);
                Err(e)
            }
        }
    }

    /// Run the unban command of every due entry, newest first, and drop the
    /// entries whose command succeeded. Returns how many were removed.
    ///
    /// Commands run without the store lock; the successful entries are then
    /// removed from a fresh copy of the stored list.
    pub async fn reap(&self, now: DateTime<Utc>) -> usize {
        let mut entries = self.entries.lock().await;
        let snapshot = match read_entries(&self.path) {
            Ok(stored) => stored,
            Err(e) => {
                warn!("Failed to reload unban list, using cached copy: {:#}", e);
                entries.clone()
            }
        };

        let mut done = Vec::new();
        for entry in snapshot.iter().rev().filter(|e| e.is_due(now)) {
            info!("Unbanning {} with action {}", entry.ip, entry.action);
            if self.execute(entry).await {
                done.push(entry.clone());
            }
        }
        let removed = done.len();

        let finished = done.clone();
        match self.update(move |stored| remove_each(stored, &finished)).await {
            Ok(stored) => *entries = stored,
            Err(e) => {
                error!("Failed to save unban list: {:#}", e);
                *entries = snapshot;
                remove_each(&mut entries, &done);
            }
        }
        removed
    }

    /// Reload, change and rewrite the stored list under the store lock.
    async fn update<F>(&self, change: F) -> Result<Vec<UnbanEntry>>
    where
        F: FnOnce(&mut Vec<UnbanEntry>) + Send + 'static,
    {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || -> Result<Vec<UnbanEntry>> {
            let _lock = LockGuard::wait_at(&lock_path(&path))?;
            let mut stored = read_entries(&path)?;
            change(&mut stored);
            write_atomic(&path, &stored)?;
            Ok(stored)
        })
        .await
        .context("Unban store task failed")?
    }

    async fn execute(&self, entry: &UnbanEntry) -> bool {
        match self.executor.run(&entry.command(), &entry.environment()).await {
            Ok(output) if output.success => true,
            Ok(output) => {
                warn!(
                    "Failed to unban {} (exit {:?}): {}",
                    entry.ip,
                    output.code,
                    output.stderr.trim()
                );
                false
            }
            Err(e) => {
                warn!("Failed to unban {}: {:#}", entry.ip, e);
                false
            }
        }
    }

    /// Snapshot of the pending entries.
    pub async fn pending(&self) -> Vec<UnbanEntry> {
        self.entries.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

/// Remove one stored occurrence of each finished entry.
fn remove_each(stored: &mut Vec<UnbanEntry>, finished: &[UnbanEntry]) {
    for entry in finished {
        if let Some(pos) = stored.iter().position(|e| e == entry) {
            stored.remove(pos);
        }
    }
}

fn lock_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".lock");
    PathBuf::from(name)
}

fn read_entries(path: &Path) -> Result<Vec<UnbanEntry>> {
    match std::fs::read_to_string(path) {
        Ok(content) if content.trim().is_empty() => Ok(Vec::new()),
        Ok(content) => {
            let file: UnbanFile =
                serde_json::from_str(&content).map_err(|e| ScanbanError::Store {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                })?;
            Ok(file.entries)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => {
            Err(e).with_context(|| format!("Failed to read unban list: {}", path.display()))
        }
    }
}

/// Write the list to a temp file next to `path` (mode 0600), then rename it
/// over `path`.
fn write_atomic(path: &Path, entries: &[UnbanEntry]) -> Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)
        .with_context(|| format!("Failed to create directory: {}", parent.display()))?;

    let content = serde_json::to_string_pretty(&UnbanFile {
        entries: entries.to_vec(),
    })
    .context("Failed to serialize unban list")?;

    let mut temp_file =
        NamedTempFile::new_in(parent).context("Failed to create temporary file for unban list")?;
    temp_file
        .as_file()
        .set_permissions(std::fs::Permissions::from_mode(0o600))?;
    temp_file.write_all(content.as_bytes())?;
    temp_file.as_file().sync_all()?;

    temp_file
        .persist(path)
        .with_context(|| format!("Failed to persist unban list: {}", path.display()))?;
    Ok(())
}

/// Pipeline stage that schedules the unban of actioned records.
pub struct UnbanScheduler {
    list: Arc<UnbanList>,
}

impl UnbanScheduler {
    pub fn new(list: Arc<UnbanList>) -> Self {
        Self { list }
    }
}

#[async_trait]
impl Stage for UnbanScheduler {
    fn name(&self) -> &'static str {
        "unban"
    }

    async fn handle(&mut self, record: &mut Record) {
        if record.is_rejected() || !record.actioned() || record.unban_action.is_empty() {
            return;
        }

        let after = record.release_time();
        if !record.dry_run {
            let entry = UnbanEntry {
                action: record.unban_action.clone(),
                ip: record.ip.clone(),
                after,
            };
            if let Err(e) = self.list.schedule(entry).await {
                error!("Failed to save unban list: {:#}", e);
            }
        }

        record.unban_scheduled = true;
        record.unban_at = Some(after);
    }
}

/// Reap due entries now and then every `interval` until shutdown.
pub async fn reversal_loop(list: Arc<UnbanList>, interval: Duration, shutdown: ShutdownToken) {
    loop {
        let removed = list.reap(Utc::now()).await;
        if removed > 0 {
            info!("Lifted {} bans", removed);
        }

        tokio::select! {
            _ = shutdown.cancelled() => {
                debug!("Unban loop stopping");
                return;
            }
            _ = tokio::time::sleep(interval) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmd_abstraction::{CommandOutput, MockCommandExecutor};
    use chrono::Duration as ChronoDuration;
    use tempfile::TempDir;

    fn output(success: bool) -> CommandOutput {
        CommandOutput {
            success,
            code: Some(if success { 0 } else { 1 }),
            ..Default::default()
        }
    }

    fn executor(success: bool) -> Arc<dyn CommandExecutor> {
        let mut mock = MockCommandExecutor::new();
        mock.expect_run()
            .returning(move |_, _| Ok(output(success)));
        Arc::new(mock)
    }

    fn entry(ip: &str, offset_hours: i64) -> UnbanEntry {
        UnbanEntry {
            action: "echo $ip".to_string(),
            ip: ip.to_string(),
            after: Utc::now() + ChronoDuration::hours(offset_hours),
        }
    }

    #[test]
    fn test_entry_command() {
        let e = UnbanEntry {
            action: "ipset del scanban $ip".to_string(),
            ip: "1.2.3.4".to_string(),
            after: Utc::now(),
        };
        assert_eq!(e.command(), "ipset del scanban 1.2.3.4");
    }

    #[tokio::test]
    async fn test_reap_removes_due_entries() {
        let dir = TempDir::new().unwrap();
        let mut mock = MockCommandExecutor::new();
        mock.expect_run()
            .withf(|cmd, env| {
                cmd == "echo 1.2.3.4" && env.iter().any(|(k, v)| k == "SB_IP" && v == "1.2.3.4")
            })
            .times(1)
            .returning(|_, _| Ok(output(true)));

        let list = UnbanList::load(dir.path().join("unban.json"), Arc::new(mock)).unwrap();
        list.schedule(entry("1.2.3.4", -1)).await.unwrap();
        list.schedule(entry("5.6.7.8", 1)).await.unwrap();

        assert_eq!(list.reap(Utc::now()).await, 1);
        let pending = list.pending().await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].ip, "5.6.7.8");
    }

    #[tokio::test]
    async fn test_failed_unban_is_kept() {
        let dir = TempDir::new().unwrap();
        let list = UnbanList::load(dir.path().join("unban.json"), executor(false)).unwrap();
        list.schedule(entry("1.2.3.4", -1)).await.unwrap();

        assert_eq!(list.reap(Utc::now()).await, 0);
        assert_eq!(list.len().await, 1);
        // retried next round
        assert_eq!(list.reap(Utc::now()).await, 0);
        assert_eq!(list.len().await, 1);
    }

    #[tokio::test]
    async fn test_reap_walks_newest_first() {
        let dir = TempDir::new().unwrap();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen = order.clone();
        let mut mock = MockCommandExecutor::new();
        mock.expect_run().returning(move |cmd, _| {
            seen.lock().unwrap().push(cmd.to_string());
            Ok(output(true))
        });

        let list = UnbanList::load(dir.path().join("unban.json"), Arc::new(mock)).unwrap();
        list.schedule(entry("1.1.1.1", -3)).await.unwrap();
        list.schedule(entry("2.2.2.2", -2)).await.unwrap();
        list.schedule(entry("3.3.3.3", -1)).await.unwrap();

        assert_eq!(list.reap(Utc::now()).await, 3);
        assert!(list.is_empty().await);
        assert_eq!(
            *order.lock().unwrap(),
            vec!["echo 3.3.3.3", "echo 2.2.2.2", "echo 1.1.1.1"]
        );
    }

    #[tokio::test]
    async fn test_round_trip_through_disk() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("unban.json");
        let original = entry("101.102.103.104", 24);

        let list = UnbanList::load(&path, executor(true)).unwrap();
        list.schedule(original.clone()).await.unwrap();

        let reloaded = UnbanList::load(&path, executor(true)).unwrap();
        let pending = reloaded.pending().await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].ip, original.ip);
        assert_eq!(pending[0].action, original.action);
        assert_eq!(pending[0].after.timestamp(), original.after.timestamp());
    }

    #[tokio::test]
    async fn test_two_lists_on_one_store_keep_both_entries() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("unban.json");
        let scan = UnbanList::load(&path, executor(true)).unwrap();
        let daemon = UnbanList::load(&path, executor(true)).unwrap();

        scan.schedule(entry("1.1.1.1", 1)).await.unwrap();
        daemon.schedule(entry("2.2.2.2", 1)).await.unwrap();

        let reloaded = UnbanList::load(&path, executor(true)).unwrap();
        let ips: Vec<_> = reloaded.pending().await.into_iter().map(|e| e.ip).collect();
        assert_eq!(ips, vec!["1.1.1.1", "2.2.2.2"]);
        assert_eq!(daemon.len().await, 2);
    }

    #[tokio::test]
    async fn test_reap_keeps_entries_added_by_another_list() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("unban.json");
        let daemon = UnbanList::load(&path, executor(true)).unwrap();
        daemon.schedule(entry("1.2.3.4", -1)).await.unwrap();

        let scan = UnbanList::load(&path, executor(true)).unwrap();
        scan.schedule(entry("5.6.7.8", 1)).await.unwrap();
        scan.schedule(entry("9.9.9.9", -1)).await.unwrap();

        // The daemon never saw 9.9.9.9 in memory but reaps it from disk
        assert_eq!(daemon.reap(Utc::now()).await, 2);
        let ips: Vec<_> = daemon.pending().await.into_iter().map(|e| e.ip).collect();
        assert_eq!(ips, vec!["5.6.7.8"]);

        let reloaded = UnbanList::load(&path, executor(true)).unwrap();
        assert_eq!(reloaded.pending().await, daemon.pending().await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_lists_lose_nothing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("unban.json");

        let mut tasks = Vec::new();
        for i in 0..4 {
            let list = Arc::new(UnbanList::load(&path, executor(true)).unwrap());
            tasks.push(tokio::spawn(async move {
                for j in 0..10 {
                    list.schedule(entry(&format!("10.{}.0.{}", i, j), 1)).await.unwrap();
                }
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }

        let reloaded = UnbanList::load(&path, executor(true)).unwrap();
        assert_eq!(reloaded.len().await, 40);
    }

    #[tokio::test]
    async fn test_file_is_owner_only() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("unban.json");
        let list = UnbanList::load(&path, executor(true)).unwrap();
        list.schedule(entry("1.2.3.4", 1)).await.unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_load_missing_and_empty_file() {
        let dir = TempDir::new().unwrap();
        let missing = UnbanList::load(dir.path().join("nope.json"), executor(true));
        assert!(missing.is_ok());

        let empty = dir.path().join("empty.json");
        std::fs::write(&empty, "").unwrap();
        assert!(UnbanList::load(&empty, executor(true)).is_ok());
    }

    #[test]
    fn test_load_corrupt_file_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("unban.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(UnbanList::load(&path, executor(true)).is_err());
    }

    #[tokio::test]
    async fn test_scheduler_stage_adds_entry() {
        let dir = TempDir::new().unwrap();
        let list = Arc::new(UnbanList::load(dir.path().join("u.json"), executor(true)).unwrap());
        let mut stage = UnbanScheduler::new(list.clone());

        let mut rec = Record::new("auth.log", "line", false);
        rec.ip = "9.9.9.9".to_string();
        rec.unban_action = "ipset del scanban $ip".to_string();
        rec.bantime = 12;
        rec.mark_actioned();
        stage.handle(&mut rec).await;

        assert!(rec.unban_scheduled);
        let pending = list.pending().await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].ip, "9.9.9.9");
        assert_eq!(Some(pending[0].after), rec.unban_at);
        let hours = (pending[0].after - Utc::now()).num_minutes();
        assert!((11 * 60..=12 * 60).contains(&hours));
    }

    #[tokio::test]
    async fn test_scheduler_stage_skips_unactioned_and_dry_run() {
        let dir = TempDir::new().unwrap();
        let list = Arc::new(UnbanList::load(dir.path().join("u.json"), executor(true)).unwrap());
        let mut stage = UnbanScheduler::new(list.clone());

        let mut not_actioned = Record::new("f", "a", false);
        not_actioned.unban_action = "x $ip".to_string();
        stage.handle(&mut not_actioned).await;
        assert!(!not_actioned.unban_scheduled);

        let mut no_unban = Record::new("f", "b", false);
        no_unban.mark_actioned();
        stage.handle(&mut no_unban).await;
        assert!(!no_unban.unban_scheduled);

        let mut dry = Record::new("f", "c", true);
        dry.unban_action = "x $ip".to_string();
        dry.mark_actioned();
        stage.handle(&mut dry).await;
        assert!(dry.unban_scheduled);
        assert!(dry.unban_at.is_some());

        assert!(list.is_empty().await);
    }

    #[tokio::test]
    async fn test_reversal_loop_reaps_at_startup_and_stops() {
        let dir = TempDir::new().unwrap();
        let list = Arc::new(UnbanList::load(dir.path().join("u.json"), executor(true)).unwrap());
        list.schedule(entry("1.2.3.4", -1)).await.unwrap();

        let token = ShutdownToken::new();
        let handle = tokio::spawn(reversal_loop(
            list.clone(),
            Duration::from_secs(3600),
            token.clone(),
        ));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(list.is_empty().await);

        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("loop should stop on shutdown")
            .unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_schedule_and_reap() {
        let dir = TempDir::new().unwrap();
        let list = Arc::new(UnbanList::load(dir.path().join("u.json"), executor(true)).unwrap());

        let mut tasks = Vec::new();
        for i in 0..20 {
            let list = list.clone();
            tasks.push(tokio::spawn(async move {
                list.schedule(entry(&format!("10.0.0.{}", i), 1)).await.unwrap();
                list.reap(Utc::now()).await;
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }

        assert_eq!(list.len().await, 20);
        let reloaded = UnbanList::load(list.path(), executor(true)).unwrap();
        assert_eq!(reloaded.len().await, 20);
    }
}
