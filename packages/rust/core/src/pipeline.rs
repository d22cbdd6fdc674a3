//! Run orchestration: topic → sources → documents → relevant sections →
//! mapped sections → brief → pull request.
//!
//! Stages run strictly in order and each consumes the previous stage's whole
//! output. Cancellation is checked before every stage. Whatever happens, the
//! run leaves a `run.json` record behind.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Local, NaiveDate, Utc};
use tracing::{info, instrument, warn};

use regbrief_artifacts::{ArtifactStore, RunDir};
use regbrief_discovery::{DiscoveryOptions, SearchProvider, SerpApiSearch};
use regbrief_extractor::{Extract, HttpExtractor};
use regbrief_llm::{Judge, OpenAiCompatibleJudge};
use regbrief_publish::{PublishRequest, Publisher};
use regbrief_shared::{
    CancelToken, RegBriefError, Result, RunConfig, RunId, RunOutcome, RunRecord, RunReport,
    Source, Stage, StoredArtifact,
};

use crate::mapping::{ControlRules, map_controls};
use crate::relevance::filter_relevant;
use crate::summary::{Summary, build_summary};

/// What the caller asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub topic: String,
    /// Maximum number of sources; must be greater than zero.
    pub limit: usize,
    /// Skip publishing; `pr_url` stays `None`.
    pub dry_run: bool,
}

/// Knobs the orchestrator passes down to the stages.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub concurrency: usize,
    pub primary_domains: Vec<String>,
    pub fallback_query: String,
    pub relevance_max_chars: usize,
    pub mapping_max_chars: usize,
    pub summary_section_max_chars: usize,
    /// Base branch pull requests target.
    pub base: String,
    pub branch_prefix: String,
    pub title_prefix: String,
}

impl PipelineSettings {
    pub fn from_config(config: &RunConfig) -> Self {
        Self {
            concurrency: config.concurrency.max(1),
            primary_domains: config.search.primary_domains.clone(),
            fallback_query: config.search.fallback_query.clone(),
            relevance_max_chars: config.llm.relevance_max_chars,
            mapping_max_chars: config.llm.mapping_max_chars,
            summary_section_max_chars: config.llm.summary_section_max_chars,
            base: config.publish.base.clone(),
            branch_prefix: config.publish.branch_prefix.clone(),
            title_prefix: config.publish.title_prefix.clone(),
        }
    }
}

/// Progress callback for reporting run status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a stage.
    fn stage(&self, stage: Stage);
    /// Called when a stage finishes, with a short human-readable result.
    fn stage_done(&self, stage: Stage, detail: &str);
    /// Called once when the run completes.
    fn done(&self, report: &RunReport);
    /// Called once when the run fails or is cancelled.
    fn failed(&self, error: &RegBriefError);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn stage(&self, _stage: Stage) {}
    fn stage_done(&self, _stage: Stage, _detail: &str) {}
    fn done(&self, _report: &RunReport) {}
    fn failed(&self, _error: &RegBriefError) {}
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Sequences every stage of a run against injected collaborators.
pub struct Orchestrator {
    search: Box<dyn SearchProvider>,
    extractor: Box<dyn Extract>,
    judge: Box<dyn Judge>,
    /// `Err` holds the configuration error reported by non-dry runs.
    publisher: std::result::Result<Box<dyn Publisher>, String>,
    rules: ControlRules,
    store: ArtifactStore,
    settings: PipelineSettings,
}

impl Orchestrator {
    /// Build an orchestrator with the built-in control rules and no publisher.
    pub fn new(
        search: Box<dyn SearchProvider>,
        extractor: Box<dyn Extract>,
        judge: Box<dyn Judge>,
        store: ArtifactStore,
        settings: PipelineSettings,
    ) -> Result<Self> {
        Ok(Self {
            search,
            extractor,
            judge,
            publisher: Err("no publisher configured".to_string()),
            rules: ControlRules::builtin()?,
            store,
            settings,
        })
    }

    pub fn with_publisher(mut self, publisher: Box<dyn Publisher>) -> Self {
        self.publisher = Ok(publisher);
        self
    }

    pub fn with_rules(mut self, rules: ControlRules) -> Self {
        self.rules = rules;
        self
    }

    /// Wire the production collaborators from the resolved runtime config.
    ///
    /// A missing model credential or an invalid rule file fails here. Publish
    /// configuration problems are kept and reported only by non-dry runs.
    pub fn from_config(config: &RunConfig) -> Result<Self> {
        let search = SerpApiSearch::from_config(config)?;
        let extractor = HttpExtractor::from_config(config)?;
        let judge = OpenAiCompatibleJudge::from_config(config)?;
        let rules = ControlRules::load(config.rules.path.as_deref().map(Path::new))?;

        let mut orchestrator = Self::new(
            Box::new(search),
            Box::new(extractor),
            Box::new(judge),
            ArtifactStore::from_config(config),
            PipelineSettings::from_config(config),
        )?
        .with_rules(rules);

        orchestrator.publisher = regbrief_publish::from_config(config).map_err(|e| {
            info!(error = %e, "publishing unavailable, only dry runs will succeed");
            e.to_string()
        });
        Ok(orchestrator)
    }

    /// Execute one run.
    ///
    /// Returns the report, or an error naming the stage that failed. The run
    /// record is written in both cases.
    #[instrument(skip_all, fields(topic = %request.topic, limit = request.limit, dry_run = request.dry_run))]
    pub async fn run(
        &self,
        request: &RunRequest,
        progress: &dyn ProgressReporter,
        cancel: &CancelToken,
    ) -> Result<RunReport> {
        let mut ctx = RunContext {
            run_id: RunId::generate(),
            date: Local::now().date_naive(),
            started_at: Utc::now(),
            run_dir: None,
            sources: Vec::new(),
            artifacts: Vec::new(),
            summary_path: None,
            pr_url: None,
        };
        info!(run_id = %ctx.run_id, date = %ctx.date, "starting run");

        let result = self.execute(request, &mut ctx, progress, cancel).await;

        let outcome = match &result {
            Ok(_) => RunOutcome::Completed,
            Err(e) => RunOutcome::Failed {
                stage: e.stage().unwrap_or(Stage::Failed),
                error: e.to_string(),
            },
        };
        self.write_record(request, ctx, outcome);

        match &result {
            Ok(report) => {
                info!(
                    run_id = %report.run_id,
                    found = report.found,
                    extracted = report.extracted,
                    kept = report.kept,
                    summary = %report.summary_file,
                    "run complete"
                );
                progress.stage(Stage::Done);
                progress.done(report);
            }
            Err(e) => {
                warn!(error = %e, "run failed");
                progress.stage(Stage::Failed);
                progress.failed(e);
            }
        }
        result
    }

    async fn execute(
        &self,
        request: &RunRequest,
        ctx: &mut RunContext,
        progress: &dyn ProgressReporter,
        cancel: &CancelToken,
    ) -> Result<RunReport> {
        let publisher = if request.dry_run {
            None
        } else {
            match &self.publisher {
                Ok(publisher) => Some(&**publisher),
                Err(message) => {
                    return Err(RegBriefError::config(message.clone()).at_stage(Stage::Publishing));
                }
            }
        };
        let concurrency = self.settings.concurrency;

        // --- Discovering ---
        enter(Stage::Discovering, progress, cancel)?;
        let opts = DiscoveryOptions {
            primary_domains: self.settings.primary_domains.clone(),
            fallback_query: self.settings.fallback_query.clone(),
            limit: request.limit,
        };
        let sources = regbrief_discovery::discover(self.search.as_ref(), &request.topic, &opts)
            .await
            .map_err(|e| e.at_stage(Stage::Discovering))?;
        ctx.sources = sources.clone();
        progress.stage_done(Stage::Discovering, &format!("{} sources", sources.len()));

        // --- Extracting ---
        enter(Stage::Extracting, progress, cancel)?;
        let run_dir = self
            .store
            .open_run(&ctx.run_id)
            .map_err(|e| e.at_stage(Stage::Extracting))?;
        let extracted =
            regbrief_extractor::extract_all(self.extractor.as_ref(), &sources, &run_dir, concurrency)
                .await;
        ctx.run_dir = Some(run_dir);
        let extracted = extracted.map_err(|e| e.at_stage(Stage::Extracting))?;
        let raw_sources: Vec<StoredArtifact> =
            extracted.iter().map(|d| d.stored.clone()).collect();
        ctx.artifacts.extend(raw_sources.iter().cloned());
        let extracted_count = extracted.len();
        progress.stage_done(Stage::Extracting, &format!("{extracted_count} documents"));

        // --- Filtering ---
        enter(Stage::Filtering, progress, cancel)?;
        let relevant = filter_relevant(
            self.judge.as_ref(),
            extracted,
            self.settings.relevance_max_chars,
            concurrency,
        )
        .await
        .map_err(|e| e.at_stage(Stage::Filtering))?;
        let kept = relevant.len();
        progress.stage_done(Stage::Filtering, &format!("{kept} relevant"));

        // --- Mapping ---
        enter(Stage::Mapping, progress, cancel)?;
        let mapped = map_controls(
            self.judge.as_ref(),
            &self.rules,
            relevant,
            self.settings.mapping_max_chars,
            concurrency,
        )
        .await
        .map_err(|e| e.at_stage(Stage::Mapping))?;
        let mapping_count: usize = mapped
            .iter()
            .flat_map(|d| &d.sections)
            .map(|s| s.mappings.len())
            .sum();
        progress.stage_done(Stage::Mapping, &format!("{mapping_count} mappings"));

        // --- Summarizing ---
        enter(Stage::Summarizing, progress, cancel)?;
        let summary = build_summary(
            self.judge.as_ref(),
            &mapped,
            ctx.date,
            &request.topic,
            self.settings.summary_section_max_chars,
        )
        .await
        .map_err(|e| e.at_stage(Stage::Summarizing))?;
        let stored_summary = self
            .store
            .write_summary(&summary.filename, &summary.markdown)
            .map_err(|e| e.at_stage(Stage::Summarizing))?;
        ctx.summary_path = Some(stored_summary.path.clone());
        ctx.artifacts.push(stored_summary.clone());
        progress.stage_done(Stage::Summarizing, &stored_summary.path);

        // --- Publishing ---
        enter(Stage::Publishing, progress, cancel)?;
        match publisher {
            None => {
                info!("dry run, publishing skipped");
                progress.stage_done(Stage::Publishing, "dry run, skipped");
            }
            Some(publisher) => {
                let pr = self
                    .compose_pull_request(ctx, &stored_summary, &summary, &raw_sources)
                    .map_err(|e| e.at_stage(Stage::Publishing))?;
                let url = publisher
                    .publish(&pr)
                    .await
                    .map_err(|e| e.at_stage(Stage::Publishing))?;
                info!(pr_url = %url, "pull request opened");
                progress.stage_done(Stage::Publishing, &url);
                ctx.pr_url = Some(url);
            }
        }

        Ok(RunReport {
            run_id: ctx.run_id.clone(),
            topic: request.topic.clone(),
            found: sources.len(),
            extracted: extracted_count,
            kept,
            summary_file: stored_summary.path,
            pr_url: ctx.pr_url.clone(),
            meta: summary.meta,
        })
    }

    /// Branch, title, body, and files for this run's pull request.
    fn compose_pull_request(
        &self,
        ctx: &RunContext,
        stored_summary: &StoredArtifact,
        summary: &Summary,
        raw_sources: &[StoredArtifact],
    ) -> Result<PublishRequest> {
        let date = ctx.date;
        let run_id = &ctx.run_id;

        let mut files = BTreeMap::new();
        files.insert(stored_summary.path.clone(), summary.markdown.clone());
        for artifact in raw_sources {
            files.insert(artifact.path.clone(), self.store.read(artifact)?);
        }

        Ok(PublishRequest {
            branch: format!("{}-{date}-{run_id}", self.settings.branch_prefix),
            title: format!("{} - {date}", self.settings.title_prefix),
            body: format!("Automated summary for {date}\n\nRun: `{run_id}`"),
            files,
            commit_message: Some(format!("chore: ingest NIST summary for {date}")),
            base: self.settings.base.clone(),
        })
    }

    /// Best-effort `run.json`; a failed write is logged, never raised.
    fn write_record(&self, request: &RunRequest, ctx: RunContext, outcome: RunOutcome) {
        let run_dir = match ctx.run_dir {
            Some(dir) => dir,
            None => match self.store.open_run(&ctx.run_id) {
                Ok(dir) => dir,
                Err(e) => {
                    warn!(error = %e, "could not open run directory for the run record");
                    return;
                }
            },
        };

        let record = RunRecord {
            run_id: ctx.run_id,
            date: ctx.date,
            topic: request.topic.clone(),
            dry_run: request.dry_run,
            sources: ctx.sources,
            summary_path: ctx.summary_path,
            pr_url: ctx.pr_url,
            artifacts: ctx.artifacts,
            outcome,
            started_at: ctx.started_at,
            finished_at: Utc::now(),
        };

        if let Err(e) = run_dir.write_record(&record) {
            warn!(error = %e, "failed to write run record");
        }
    }
}

/// Mutable per-run state; becomes the run record.
struct RunContext {
    run_id: RunId,
    date: NaiveDate,
    started_at: DateTime<Utc>,
    run_dir: Option<RunDir>,
    sources: Vec<Source>,
    artifacts: Vec<StoredArtifact>,
    summary_path: Option<String>,
    pr_url: Option<String>,
}

fn enter(stage: Stage, progress: &dyn ProgressReporter, cancel: &CancelToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(RegBriefError::Cancelled { stage });
    }
    info!(%stage, "stage started");
    progress.stage(stage);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    use serde_json::json;

    use crate::testing::{FakeExtractor, FakeSearch, FnJudge, RecordingPublisher};
    use regbrief_extractor::Extraction;
    use regbrief_llm::Judgment;

    const URL_A: &str = "https://csrc.nist.gov/pubs/sp/800/218/final";
    const URL_B: &str = "https://csrc.nist.gov/pubs/sp/800/53/r5/upd1/final";
    const URL_C: &str = "https://www.nist.gov/news/budget.pdf";

    fn settings() -> PipelineSettings {
        PipelineSettings {
            concurrency: 2,
            primary_domains: vec!["nist.gov".into(), "csrc.nist.gov".into()],
            fallback_query: "site:csrc.nist.gov \"SP 800\" update".into(),
            relevance_max_chars: 16_000,
            mapping_max_chars: 6_000,
            summary_section_max_chars: 3_000,
            base: "main".into(),
            branch_prefix: "feat/nist-summary".into(),
            title_prefix: "NIST SP 800 Updates".into(),
        }
    }

    /// Three distinct URLs plus two fragment duplicates of the first.
    fn search() -> FakeSearch {
        FakeSearch::new(&[
            URL_A,
            &format!("{URL_A}#section-2"),
            URL_B,
            &format!("{URL_A}#top"),
            URL_C,
        ])
    }

    /// The budget PDF fails to download; everything else extracts.
    fn extractor() -> FakeExtractor {
        let mut canned = HashMap::new();
        canned.insert(URL_A.to_string(), Extraction::Content("# SSDF\n\nProduce an SBOM.\n".into()));
        canned.insert(URL_B.to_string(), Extraction::Content("# 800-53\n\nPatch vulnerabilities.\n".into()));
        canned.insert(URL_C.to_string(), Extraction::Failed("connection reset".into()));
        FakeExtractor(canned)
    }

    /// Keeps every document except the failed one, proposes one mapping per
    /// section, and writes a fixed brief.
    fn judge() -> FnJudge {
        FnJudge::new(|req| {
            if req.instructions == crate::relevance::RELEVANCE_INSTRUCTIONS {
                if req.payload.contains("Extraction failed") {
                    return Ok(Judgment::Structured(json!({ "kept_sections": [] })));
                }
                let title = req.payload.lines().nth(2).unwrap_or_default().to_string();
                return Ok(Judgment::Structured(json!({
                    "kept_sections": [{ "title": title, "text": req.payload }]
                })));
            }
            if req.instructions == crate::mapping::MAPPING_INSTRUCTIONS {
                return Ok(Judgment::Structured(json!({
                    "mappings": [{ "framework": "800-53", "control": "SA-15", "reason": "process" }]
                })));
            }
            Ok(Judgment::Text("# NIST SP 800 brief\n\n- SBOM guidance updated\n".into()))
        })
    }

    fn orchestrator(root: &Path) -> Orchestrator {
        Orchestrator::new(
            Box::new(search()),
            Box::new(extractor()),
            Box::new(judge()),
            ArtifactStore::new(root, "artifacts", "docs/summaries"),
            settings(),
        )
        .unwrap()
    }

    fn request(dry_run: bool) -> RunRequest {
        RunRequest {
            topic: "NIST SP 800 updates".into(),
            limit: 5,
            dry_run,
        }
    }

    fn read_record(root: &Path, run_id: &RunId) -> serde_json::Value {
        let path = root.join("artifacts").join(run_id.as_str()).join("run.json");
        serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
    }

    /// Records every progress callback as a string.
    #[derive(Default)]
    struct RecordingProgress(Mutex<Vec<String>>);

    impl RecordingProgress {
        fn push(&self, event: String) {
            self.0.lock().unwrap().push(event);
        }
        fn events(&self) -> Vec<String> {
            self.0.lock().unwrap().clone()
        }
    }

    impl ProgressReporter for RecordingProgress {
        fn stage(&self, stage: Stage) {
            self.push(format!("start:{stage}"));
        }
        fn stage_done(&self, stage: Stage, _detail: &str) {
            self.push(format!("done:{stage}"));
        }
        fn done(&self, _report: &RunReport) {
            self.push("complete".into());
        }
        fn failed(&self, _error: &RegBriefError) {
            self.push("failed".into());
        }
    }

    #[tokio::test]
    async fn dry_run_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let progress = RecordingProgress::default();

        let report = orchestrator(dir.path())
            .run(&request(true), &progress, &CancelToken::new())
            .await
            .unwrap();

        assert_eq!(report.found, 3);
        assert_eq!(report.extracted, 3);
        assert_eq!(report.kept, 2);
        assert_eq!(report.pr_url, None);

        let today = Local::now().date_naive().to_string();
        assert!(report.summary_file.starts_with(&format!("docs/summaries/{today}-")));
        assert!(report.summary_file.ends_with(".md"));
        let brief = std::fs::read_to_string(dir.path().join(&report.summary_file)).unwrap();
        assert!(brief.starts_with("# NIST SP 800 brief"));

        let ids: Vec<_> = report.meta.sources.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["src01", "src02"]);

        let sources_dir = dir
            .path()
            .join("artifacts")
            .join(report.run_id.as_str())
            .join("sources");
        assert_eq!(std::fs::read_dir(sources_dir).unwrap().count(), 3);

        let events = progress.events();
        assert_eq!(events.first().map(String::as_str), Some("start:discovering"));
        assert!(events.contains(&"done:publishing".to_string()));
        assert_eq!(events[events.len() - 2..], ["start:done", "complete"]);
    }

    #[tokio::test]
    async fn dry_run_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = orchestrator(dir.path());

        let first = orchestrator
            .run(&request(true), &SilentProgress, &CancelToken::new())
            .await
            .unwrap();
        let second = orchestrator
            .run(&request(true), &SilentProgress, &CancelToken::new())
            .await
            .unwrap();

        assert_eq!(
            RunReport { run_id: second.run_id.clone(), ..first },
            second
        );
    }

    #[tokio::test]
    async fn run_record_describes_completed_run() {
        let dir = tempfile::tempdir().unwrap();
        let report = orchestrator(dir.path())
            .run(&request(true), &SilentProgress, &CancelToken::new())
            .await
            .unwrap();

        let record = read_record(dir.path(), &report.run_id);
        assert_eq!(record["outcome"]["status"], "completed");
        assert_eq!(record["dry_run"], true);
        assert_eq!(record["sources"].as_array().unwrap().len(), 3);
        assert_eq!(record["summary_path"], report.summary_file.as_str());
        assert!(record["pr_url"].is_null());
        // three raw sources plus the summary
        assert_eq!(record["artifacts"].as_array().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn publishes_summary_and_sources() {
        let dir = tempfile::tempdir().unwrap();
        let publisher = RecordingPublisher::new();
        let orchestrator = orchestrator(dir.path()).with_publisher(Box::new(publisher.clone()));

        let report = orchestrator
            .run(&request(false), &SilentProgress, &CancelToken::new())
            .await
            .unwrap();

        assert_eq!(
            report.pr_url.as_deref(),
            Some("https://github.com/acme/compliance/pull/42")
        );

        let requests = publisher.requests();
        assert_eq!(requests.len(), 1);
        let pr = &requests[0];
        let date = Local::now().date_naive();
        let run_id = report.run_id.as_str();

        assert_eq!(pr.branch, format!("feat/nist-summary-{date}-{run_id}"));
        assert_eq!(pr.title, format!("NIST SP 800 Updates - {date}"));
        assert_eq!(pr.body, format!("Automated summary for {date}\n\nRun: `{run_id}`"));
        assert_eq!(
            pr.commit_message.as_deref(),
            Some(format!("chore: ingest NIST summary for {date}").as_str())
        );
        assert_eq!(pr.base, "main");
        assert_eq!(pr.files.len(), 4);
        assert!(pr.files[&report.summary_file].starts_with("# NIST SP 800 brief"));
        assert!(
            pr.files
                .keys()
                .filter(|p| p.starts_with(&format!("artifacts/{run_id}/sources/")))
                .count()
                == 3
        );

        let record = read_record(dir.path(), &report.run_id);
        assert_eq!(record["pr_url"], "https://github.com/acme/compliance/pull/42");
    }

    #[tokio::test]
    async fn missing_publisher_fails_before_any_stage() {
        let dir = tempfile::tempdir().unwrap();
        let progress = RecordingProgress::default();

        let err = orchestrator(dir.path())
            .run(&request(false), &progress, &CancelToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.stage(), Some(Stage::Publishing));
        assert!(err.to_string().contains("no publisher configured"));
        assert_eq!(progress.events(), vec!["start:failed", "failed"]);
    }

    #[tokio::test]
    async fn publish_failure_is_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = orchestrator(dir.path())
            .with_publisher(Box::new(RecordingPublisher::failing("HTTP 422: branch exists")));

        let err = orchestrator
            .run(&request(false), &SilentProgress, &CancelToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.stage(), Some(Stage::Publishing));
        assert!(err.to_string().contains("branch exists"));

        // the summary was written before publishing failed
        let summaries = std::fs::read_dir(dir.path().join("docs/summaries")).unwrap();
        assert_eq!(summaries.count(), 1);

        let run_dir = std::fs::read_dir(dir.path().join("artifacts"))
            .unwrap()
            .next()
            .unwrap()
            .unwrap();
        let record: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(run_dir.path().join("run.json")).unwrap())
                .unwrap();
        assert_eq!(record["outcome"]["status"], "failed");
        assert_eq!(record["outcome"]["stage"], "publishing");
    }

    #[tokio::test]
    async fn cancelled_run_stops_at_stage_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();

        let err = orchestrator(dir.path())
            .run(&request(true), &SilentProgress, &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, RegBriefError::Cancelled { stage: Stage::Discovering }));
        assert!(!dir.path().join("docs").exists());
    }

    #[tokio::test]
    async fn judge_failure_names_the_stage() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = Orchestrator::new(
            Box::new(search()),
            Box::new(extractor()),
            Box::new(FnJudge::new(|_| Err(RegBriefError::Llm("HTTP 401: bad key".into())))),
            ArtifactStore::new(dir.path(), "artifacts", "docs/summaries"),
            settings(),
        )
        .unwrap();

        let err = orchestrator
            .run(&request(true), &SilentProgress, &CancelToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.stage(), Some(Stage::Filtering));
        assert_eq!(
            err.to_string(),
            "filtering stage failed: llm error: HTTP 401: bad key"
        );
    }

    #[tokio::test]
    async fn zero_limit_fails_in_discovery() {
        let dir = tempfile::tempdir().unwrap();
        let mut req = request(true);
        req.limit = 0;

        let err = orchestrator(dir.path())
            .run(&req, &SilentProgress, &CancelToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.stage(), Some(Stage::Discovering));
    }
}
