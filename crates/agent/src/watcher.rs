//! Module directory watcher
//!
//! Polls a directory of YAML module files and turns what changed since the
//! previous scan into hot-reload callbacks:
//!
//! | File event | Callback |
//! |---|---|
//! | new file | `init_module_callback` |
//! | content changed | `update_module_callback` |
//! | file removed | `update_module_callback` with an inactive module |
//!
//! A file that fails to parse is reported as an `invalid` module named after
//! the file stem, which the reloader ignores.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use nodewatch_control::HotReloader;
use nodewatch_pipeline::{Module, ModuleStatus};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What a scan found for one module
#[derive(Debug, Clone, PartialEq)]
pub enum ModuleChange {
    Added(Module),
    Changed(Module),
    Removed(String),
}

#[derive(Debug, Clone)]
struct KnownFile {
    module: String,
    content: String,
}

#[derive(Debug)]
pub struct ModuleWatcher {
    dir: PathBuf,
    interval: Duration,
    known: HashMap<PathBuf, KnownFile>,
}

impl ModuleWatcher {
    pub fn new(dir: impl Into<PathBuf>, interval: Duration) -> Self {
        Self {
            dir: dir.into(),
            interval,
            known: HashMap::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Compare the directory with the previous scan
    ///
    /// An unreadable directory yields no changes, so a transient failure does
    /// not remove every module.
    pub async fn scan(&mut self) -> Vec<ModuleChange> {
        let files = match list_module_files(&self.dir).await {
            Ok(files) => files,
            Err(e) => {
                warn!(dir = %self.dir.display(), error = %e, "Cannot read modules directory");
                return Vec::new();
            }
        };

        let mut changes = Vec::new();
        let mut seen = HashMap::with_capacity(files.len());

        for path in files {
            let content = match tokio::fs::read_to_string(&path).await {
                Ok(content) => content,
                Err(e) => {
                    warn!(file = %path.display(), error = %e, "Cannot read module file");
                    // Keep the previous state until the file is readable again
                    if let Some(previous) = self.known.get(&path) {
                        seen.insert(path, previous.clone());
                    }
                    continue;
                }
            };

            let previous = self.known.get(&path);
            if let Some(unchanged) = previous.filter(|p| p.content == content) {
                seen.insert(path, unchanged.clone());
                continue;
            }

            let module = parse_module(&path, &content);
            match previous {
                None => changes.push(ModuleChange::Added(module.clone())),
                Some(previous) if previous.module != module.name => {
                    changes.push(ModuleChange::Removed(previous.module.clone()));
                    changes.push(ModuleChange::Added(module.clone()));
                }
                Some(_) => changes.push(ModuleChange::Changed(module.clone())),
            }
            seen.insert(
                path,
                KnownFile {
                    module: module.name,
                    content,
                },
            );
        }

        for (path, file) in &self.known {
            if !seen.contains_key(path) {
                changes.push(ModuleChange::Removed(file.module.clone()));
            }
        }

        self.known = seen;
        changes
    }

    /// Scan every interval and forward changes until cancelled
    pub async fn run(mut self, reloader: Arc<HotReloader>, cancel: CancellationToken) {
        info!(
            dir = %self.dir.display(),
            interval_secs = self.interval.as_secs(),
            "Module watcher started"
        );
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let changes = self.scan().await;
            if !changes.is_empty() {
                debug!(changes = changes.len(), "Module directory changed");
            }
            for change in changes {
                dispatch(&reloader, change).await;
            }
        }
        info!("Module watcher stopped");
    }
}

async fn dispatch(reloader: &HotReloader, change: ModuleChange) {
    match change {
        ModuleChange::Added(module) => {
            info!(module = %module.name, "Module discovered");
            reloader.init_module_callback(module).await;
        }
        ModuleChange::Changed(module) => {
            info!(module = %module.name, "Module changed");
            reloader.update_module_callback(module).await;
        }
        ModuleChange::Removed(name) => {
            info!(module = %name, "Module removed");
            reloader
                .update_module_callback(Module::new(name).with_status(ModuleStatus::Inactive))
                .await;
        }
    }
}

fn parse_module(path: &Path, content: &str) -> Module {
    match Module::from_yaml(content) {
        Ok(module) => module,
        Err(e) => {
            let name = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            warn!(file = %path.display(), error = %e, "Invalid module file");
            Module::new(name).with_status(ModuleStatus::Invalid)
        }
    }
}

fn is_module_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext == "yaml" || ext == "yml")
}

async fn list_module_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if is_module_file(&path) && entry.file_type().await?.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TempDir(PathBuf);

    impl TempDir {
        fn new(name: &str) -> Self {
            let path = std::env::temp_dir().join(format!(
                "nodewatch-watcher-{}-{}",
                name,
                std::process::id()
            ));
            let _ = std::fs::remove_dir_all(&path);
            std::fs::create_dir_all(&path).unwrap();
            Self(path)
        }

        fn write(&self, file: &str, content: &str) {
            std::fs::write(self.0.join(file), content).unwrap();
        }

        fn remove(&self, file: &str) {
            std::fs::remove_file(self.0.join(file)).unwrap();
        }
    }

    impl Drop for TempDir {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.0);
        }
    }

    const MYSQL: &str = "name: mysql\npipelines: []\n";

    fn names(changes: &[ModuleChange]) -> Vec<String> {
        changes
            .iter()
            .map(|c| match c {
                ModuleChange::Added(m) => format!("added:{}", m.name),
                ModuleChange::Changed(m) => format!("changed:{}", m.name),
                ModuleChange::Removed(n) => format!("removed:{n}"),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_new_file_is_added_once() {
        let dir = TempDir::new("added");
        dir.write("mysql.yaml", MYSQL);
        let mut watcher = ModuleWatcher::new(&dir.0, Duration::from_secs(1));

        assert_eq!(names(&watcher.scan().await), vec!["added:mysql"]);
        assert!(watcher.scan().await.is_empty());
    }

    #[tokio::test]
    async fn test_changed_content_is_an_update() {
        let dir = TempDir::new("changed");
        dir.write("mysql.yml", MYSQL);
        let mut watcher = ModuleWatcher::new(&dir.0, Duration::from_secs(1));
        watcher.scan().await;

        dir.write("mysql.yml", "name: mysql\nstatus: inactive\n");
        let changes = watcher.scan().await;
        match changes.as_slice() {
            [ModuleChange::Changed(module)] => assert_eq!(module.status, ModuleStatus::Inactive),
            other => panic!("unexpected changes: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_removed_file_is_reported() {
        let dir = TempDir::new("removed");
        dir.write("mysql.yaml", MYSQL);
        dir.write("redis.yaml", "name: redis\n");
        let mut watcher = ModuleWatcher::new(&dir.0, Duration::from_secs(1));
        watcher.scan().await;

        dir.remove("redis.yaml");
        assert_eq!(names(&watcher.scan().await), vec!["removed:redis"]);
    }

    #[tokio::test]
    async fn test_renamed_module_removes_old_name() {
        let dir = TempDir::new("renamed");
        dir.write("db.yaml", MYSQL);
        let mut watcher = ModuleWatcher::new(&dir.0, Duration::from_secs(1));
        watcher.scan().await;

        dir.write("db.yaml", "name: mariadb\n");
        assert_eq!(
            names(&watcher.scan().await),
            vec!["removed:mysql", "added:mariadb"]
        );
    }

    #[tokio::test]
    async fn test_parse_failure_is_invalid() {
        let dir = TempDir::new("invalid");
        dir.write("broken.yaml", "name: [unterminated");
        let mut watcher = ModuleWatcher::new(&dir.0, Duration::from_secs(1));

        match watcher.scan().await.as_slice() {
            [ModuleChange::Added(module)] => {
                assert_eq!(module.name, "broken");
                assert_eq!(module.status, ModuleStatus::Invalid);
            }
            other => panic!("unexpected changes: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_other_files_are_ignored() {
        let dir = TempDir::new("ignored");
        dir.write("README.md", "# modules");
        dir.write("mysql.yaml.bak", MYSQL);
        let mut watcher = ModuleWatcher::new(&dir.0, Duration::from_secs(1));

        assert!(watcher.scan().await.is_empty());
    }

    #[tokio::test]
    async fn test_missing_directory_keeps_known_modules() {
        let dir = TempDir::new("missing");
        dir.write("mysql.yaml", MYSQL);
        let mut watcher = ModuleWatcher::new(&dir.0, Duration::from_secs(1));
        watcher.scan().await;

        std::fs::remove_dir_all(&dir.0).unwrap();
        assert!(watcher.scan().await.is_empty());

        std::fs::create_dir_all(&dir.0).unwrap();
        assert_eq!(names(&watcher.scan().await), vec!["removed:mysql"]);
    }
}
