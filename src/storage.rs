//! JSON file storage under the project's `.salvo/` directory.
//!
//! Layout:
//! ```text
//! runs/<run_id>.json                 suite results
//! traces/<trace_id>.json             raw traces
//! traces/<trace_id>.recorded.json    recorded (redacted) traces
//! traces/manifest.json               run_id -> [{trace_id, trial_index, status}]
//! traces/latest                      pointer to the last recorded trace
//! revals/<reval_id>.json             re-evaluation results
//! index.json                         scenario_id -> [run_id, ...]
//! ```
//!
//! Every write is tmp-then-rename; the manifest and index are additionally
//! serialized behind process-wide locks so concurrent trial finalizers never
//! interleave.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use once_cell::sync::Lazy;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SalvoError;
use crate::recording::models::{RecordedTrace, RevalResult};
use crate::redaction::{apply_trace_limits, Redactor};
use crate::suite::{SuiteResult, TrialStatus};
use crate::trace::Trace;

static MANIFEST_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));
static INDEX_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub trace_id: Uuid,
    pub trial_index: u32,
    pub status: TrialStatus,
}

pub type Manifest = BTreeMap<String, Vec<ManifestEntry>>;
pub type RunIndex = BTreeMap<String, Vec<String>>;

pub struct RunStore {
    root: PathBuf,
}

impl RunStore {
    pub fn new(project_root: &Path) -> Self {
        Self::with_storage_dir(project_root, ".salvo")
    }

    pub fn with_storage_dir(project_root: &Path, storage_dir: &str) -> Self {
        Self {
            root: project_root.join(storage_dir),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn runs_dir(&self) -> PathBuf {
        self.root.join("runs")
    }

    fn traces_dir(&self) -> PathBuf {
        self.root.join("traces")
    }

    fn revals_dir(&self) -> PathBuf {
        self.root.join("revals")
    }

    fn index_path(&self) -> PathBuf {
        self.root.join("index.json")
    }

    fn manifest_path(&self) -> PathBuf {
        self.traces_dir().join("manifest.json")
    }

    fn latest_path(&self) -> PathBuf {
        self.traces_dir().join("latest")
    }

    pub fn ensure_dirs(&self) -> Result<(), SalvoError> {
        for dir in [self.runs_dir(), self.traces_dir(), self.revals_dir()] {
            std::fs::create_dir_all(&dir)
                .map_err(|err| SalvoError::Storage(format!("create {}: {err}", dir.display())))?;
        }
        Ok(())
    }

    /// Atomic human-readable JSON write: serialize, write to a tmp sibling,
    /// rename into place.
    fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> Result<(), SalvoError> {
        let content = serde_json::to_string_pretty(value)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, content)
            .map_err(|err| SalvoError::Storage(format!("write {}: {err}", tmp.display())))?;
        std::fs::rename(&tmp, path)
            .map_err(|err| SalvoError::Storage(format!("rename {}: {err}", path.display())))?;
        Ok(())
    }

    fn read_json<T: DeserializeOwned>(&self, path: &Path) -> Result<Option<T>, SalvoError> {
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path)
            .map_err(|err| SalvoError::Storage(format!("read {}: {err}", path.display())))?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    // Suite results

    pub fn save_suite(&self, suite: &SuiteResult) -> Result<(), SalvoError> {
        self.ensure_dirs()?;

        // Embedded traces go through the same scrub as standalone trace
        // files; nothing secret-bearing reaches disk unredacted.
        let redactor = Redactor::new();
        let mut sanitized = suite.clone();
        for trial in &mut sanitized.trials {
            if let Some(trace) = &trial.trace {
                trial.trace = Some(apply_trace_limits(&redactor.redact_trace(trace)));
            }
        }

        let path = self.runs_dir().join(format!("{}.json", sanitized.run_id));
        self.write_json(&path, &sanitized)?;
        self.append_index(&sanitized.scenario_id, &sanitized.run_id.to_string())
    }

    pub fn load_suite(&self, run_id: &str) -> Result<Option<SuiteResult>, SalvoError> {
        self.read_json(&self.runs_dir().join(format!("{run_id}.json")))
    }

    /// Run ids, optionally filtered by scenario. UUIDv7 ids sort
    /// chronologically, so the listing is oldest-first.
    pub fn list_runs(&self, scenario_id: Option<&str>) -> Result<Vec<String>, SalvoError> {
        if let Some(scenario_id) = scenario_id {
            let index: RunIndex = self.read_json(&self.index_path())?.unwrap_or_default();
            return Ok(index.get(scenario_id).cloned().unwrap_or_default());
        }

        let runs_dir = self.runs_dir();
        if !runs_dir.exists() {
            return Ok(Vec::new());
        }
        let mut ids: Vec<String> = std::fs::read_dir(&runs_dir)
            .map_err(|err| SalvoError::Storage(format!("list {}: {err}", runs_dir.display())))?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().into_owned();
                name.strip_suffix(".json").map(str::to_string)
            })
            .collect();
        ids.sort();
        Ok(ids)
    }

    pub fn latest_run_id(&self) -> Result<Option<String>, SalvoError> {
        Ok(self.list_runs(None)?.pop())
    }

    fn append_index(&self, scenario_id: &str, run_id: &str) -> Result<(), SalvoError> {
        let _guard = INDEX_LOCK.lock().expect("index lock poisoned");
        let mut index: RunIndex = self.read_json(&self.index_path())?.unwrap_or_default();
        let runs = index.entry(scenario_id.to_string()).or_default();
        if !runs.iter().any(|existing| existing == run_id) {
            runs.push(run_id.to_string());
        }
        self.write_json(&self.index_path(), &index)
    }

    // Traces

    pub fn save_trace(&self, trace: &Trace) -> Result<(), SalvoError> {
        self.ensure_dirs()?;
        let path = self.traces_dir().join(format!("{}.json", trace.trace_id));
        self.write_json(&path, trace)
    }

    pub fn load_trace(&self, trace_id: &str) -> Result<Option<Trace>, SalvoError> {
        self.read_json(&self.traces_dir().join(format!("{trace_id}.json")))
    }

    /// Register a trace under its run in the manifest. Serialized process-wide
    /// so concurrent trial finalizers never interleave writes.
    pub fn append_manifest(
        &self,
        run_id: Uuid,
        trace_id: Uuid,
        trial_index: u32,
        status: TrialStatus,
    ) -> Result<(), SalvoError> {
        self.ensure_dirs()?;
        let _guard = MANIFEST_LOCK.lock().expect("manifest lock poisoned");
        let mut manifest: Manifest = self.read_json(&self.manifest_path())?.unwrap_or_default();
        manifest
            .entry(run_id.to_string())
            .or_default()
            .push(ManifestEntry {
                trace_id,
                trial_index,
                status,
            });
        self.write_json(&self.manifest_path(), &manifest)
    }

    pub fn load_manifest(&self) -> Result<Manifest, SalvoError> {
        Ok(self.read_json(&self.manifest_path())?.unwrap_or_default())
    }

    // Recorded traces

    pub fn save_recorded_trace(&self, recorded: &RecordedTrace) -> Result<(), SalvoError> {
        self.ensure_dirs()?;
        let path = self
            .traces_dir()
            .join(format!("{}.recorded.json", recorded.trace.trace_id));
        self.write_json(&path, recorded)
    }

    pub fn load_recorded_trace(&self, trace_id: &str) -> Result<Option<RecordedTrace>, SalvoError> {
        self.read_json(&self.traces_dir().join(format!("{trace_id}.recorded.json")))
    }

    /// Point `traces/latest` at a recorded trace. A plain pointer file
    /// written atomically, for portability where symlinks are unavailable.
    pub fn update_latest_pointer(&self, trace_id: Uuid) -> Result<(), SalvoError> {
        self.ensure_dirs()?;
        let tmp = self.traces_dir().join(".latest.tmp");
        std::fs::write(&tmp, trace_id.to_string())
            .map_err(|err| SalvoError::Storage(format!("write latest pointer: {err}")))?;
        std::fs::rename(&tmp, self.latest_path())
            .map_err(|err| SalvoError::Storage(format!("rename latest pointer: {err}")))?;
        Ok(())
    }

    pub fn latest_recorded_trace_id(&self) -> Result<Option<String>, SalvoError> {
        let path = self.latest_path();
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)
            .map_err(|err| SalvoError::Storage(format!("read latest pointer: {err}")))?;
        let trimmed = content.trim().to_string();
        Ok(if trimmed.is_empty() { None } else { Some(trimmed) })
    }

    pub fn load_latest_recorded_trace(&self) -> Result<Option<RecordedTrace>, SalvoError> {
        match self.latest_recorded_trace_id()? {
            Some(trace_id) => self.load_recorded_trace(&trace_id),
            None => Ok(None),
        }
    }

    // Re-evaluation results

    pub fn save_reval(&self, reval: &RevalResult) -> Result<(), SalvoError> {
        self.ensure_dirs()?;
        let path = self.revals_dir().join(format!("{}.json", reval.reval_id));
        self.write_json(&path, reval)
    }

    pub fn load_reval(&self, reval_id: &str) -> Result<Option<RevalResult>, SalvoError> {
        self.read_json(&self.revals_dir().join(format!("{reval_id}.json")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::suite::Verdict;
    use chrono::Utc;

    fn store() -> (tempfile::TempDir, RunStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = RunStore::new(dir.path());
        (dir, store)
    }

    fn sample_suite(scenario_id: &str) -> SuiteResult {
        SuiteResult {
            run_id: Uuid::now_v7(),
            scenario_id: scenario_id.to_string(),
            scenario_hash: "hash".into(),
            model: "gpt-4o".into(),
            adapter: "openai".into(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            trials: vec![],
            verdict: Verdict::Pass,
            pass_rate: 1.0,
            mean_score: 1.0,
            score_min: 1.0,
            score_p50: 1.0,
            score_p95: 1.0,
            threshold: 0.8,
            latency_p50: Some(1.0),
            latency_p95: Some(1.2),
            cost_total: Some(0.01),
            cost_avg_per_trial: Some(0.005),
            judge_cost_total: 0.0,
            total_retries: 0,
            trials_with_retries: 0,
            early_stopped: false,
            early_stop_reason: None,
            n_requested: 2,
            failure_ranking: vec![],
        }
    }

    #[test]
    fn suite_roundtrips_and_indexes() {
        let (_dir, store) = store();
        let suite = sample_suite("demo");
        store.save_suite(&suite).unwrap();

        let loaded = store.load_suite(&suite.run_id.to_string()).unwrap().unwrap();
        assert_eq!(loaded, suite);

        let runs = store.list_runs(Some("demo")).unwrap();
        assert_eq!(runs, vec![suite.run_id.to_string()]);
        assert_eq!(store.latest_run_id().unwrap(), Some(suite.run_id.to_string()));
    }

    #[test]
    fn missing_run_is_none() {
        let (_dir, store) = store();
        assert!(store.load_suite("nope").unwrap().is_none());
        assert!(store.list_runs(None).unwrap().is_empty());
    }

    #[test]
    fn uuid7_run_ids_list_chronologically() {
        let (_dir, store) = store();
        let first = sample_suite("s");
        let second = sample_suite("s");
        store.save_suite(&first).unwrap();
        store.save_suite(&second).unwrap();
        let runs = store.list_runs(None).unwrap();
        assert_eq!(runs.last(), Some(&second.run_id.to_string()));
    }

    #[test]
    fn manifest_accumulates_entries_per_run() {
        let (_dir, store) = store();
        let run_id = Uuid::now_v7();
        let t1 = Uuid::now_v7();
        let t2 = Uuid::now_v7();
        store
            .append_manifest(run_id, t1, 1, TrialStatus::Ok)
            .unwrap();
        store
            .append_manifest(run_id, t2, 2, TrialStatus::InfraError)
            .unwrap();

        let manifest = store.load_manifest().unwrap();
        let entries = &manifest[&run_id.to_string()];
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].trace_id, t1);
        assert_eq!(entries[1].status, TrialStatus::InfraError);
    }

    #[test]
    fn latest_pointer_tracks_last_write() {
        let (_dir, store) = store();
        let first = Uuid::now_v7();
        let second = Uuid::now_v7();
        store.update_latest_pointer(first).unwrap();
        store.update_latest_pointer(second).unwrap();
        assert_eq!(
            store.latest_recorded_trace_id().unwrap(),
            Some(second.to_string())
        );
    }

    #[test]
    fn written_json_is_two_space_indented() {
        let (dir, store) = store();
        let suite = sample_suite("pretty");
        store.save_suite(&suite).unwrap();
        let path = dir
            .path()
            .join(".salvo/runs")
            .join(format!("{}.json", suite.run_id));
        let content = std::fs::read_to_string(path).unwrap();
        assert!(content.starts_with("{\n  \""));
    }

    #[test]
    fn no_tmp_files_left_behind() {
        let (dir, store) = store();
        store.save_suite(&sample_suite("clean")).unwrap();
        let leftovers: Vec<_> = walk(dir.path())
            .into_iter()
            .filter(|p| p.to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty(), "tmp files left: {leftovers:?}");
    }

    fn walk(path: &Path) -> Vec<PathBuf> {
        let mut out = Vec::new();
        if let Ok(entries) = std::fs::read_dir(path) {
            for entry in entries.flatten() {
                let p = entry.path();
                if p.is_dir() {
                    out.extend(walk(&p));
                } else {
                    out.push(p);
                }
            }
        }
        out
    }
}
