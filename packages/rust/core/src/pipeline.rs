//! End-to-end `convert` run: input folder → sources → jobs → Markdown files.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use folio_discovery::SourceSet;
use folio_markdown::DocumentConverter;
use folio_shared::{AppConfig, ConversionJob, FolioError, OnError, Result};

use crate::dispatcher;

/// Configuration for one run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Folder scanned for `.docx` sources; also receives the `.md` outputs.
    pub input_folder: PathBuf,
    /// Where extracted media goes. Defaults to the input folder.
    pub media_dir: Option<PathBuf>,
    /// Policy after a job fails.
    pub on_error: OnError,
    /// Maximum number of concurrent conversions.
    pub jobs: usize,
    /// Upper bound on a single conversion.
    pub timeout: Duration,
}

impl RunConfig {
    /// Run settings for `input_folder` taken from the loaded config file.
    pub fn from_app_config(input_folder: impl Into<PathBuf>, config: &AppConfig) -> Self {
        Self {
            input_folder: input_folder.into(),
            media_dir: config.run.media_dir.as_ref().map(PathBuf::from),
            on_error: config.run.on_error,
            jobs: config.run.jobs,
            timeout: Duration::from_secs(config.converter.timeout_secs),
        }
    }

    /// Directory that receives extracted media.
    pub fn media_target(&self) -> PathBuf {
        self.media_dir
            .clone()
            .unwrap_or_else(|| self.input_folder.clone())
    }
}

/// A job that did not produce its output.
#[derive(Debug, Clone)]
pub struct JobFailure {
    pub source: PathBuf,
    pub error: String,
}

/// Outcome of a run.
#[derive(Debug, Default)]
pub struct RunSummary {
    /// Sources enumerated.
    pub found: usize,
    pub converted: usize,
    pub failed: usize,
    /// Sources left untouched after an abort.
    pub not_attempted: usize,
    /// The abort policy stopped the run early.
    pub aborted: bool,
    pub failures: Vec<JobFailure>,
    pub elapsed: Duration,
}

impl RunSummary {
    /// True when every enumerated source was converted.
    pub fn is_success(&self) -> bool {
        self.failed == 0 && !self.aborted
    }
}

/// Progress callback for reporting run status.
pub trait ProgressReporter: Send + Sync {
    /// Called once the folder is validated and the converter is available.
    fn run_started(&self, folder: &Path, converter: &str);
    /// Called when the folder holds no `.docx` files.
    fn no_sources(&self, folder: &Path);
    /// Called when a job wrote its Markdown file.
    fn job_converted(&self, job: &ConversionJob);
    /// Called when a job failed without ending the run.
    fn job_failed(&self, source: &Path, error: &FolioError);
    /// Called when the run completes.
    fn done(&self, summary: &RunSummary);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn run_started(&self, _folder: &Path, _converter: &str) {}
    fn no_sources(&self, _folder: &Path) {}
    fn job_converted(&self, _job: &ConversionJob) {}
    fn job_failed(&self, _source: &Path, _error: &FolioError) {}
    fn done(&self, _summary: &RunSummary) {}
}

/// Output paths handed out so far in a run.
///
/// On a case-insensitive file system `Report.md` and `report.md` are the same
/// file, so paths are compared case-folded there.
struct OutputClaims {
    fold_case: bool,
    claimed: HashSet<PathBuf>,
}

impl OutputClaims {
    fn new(fold_case: bool) -> Self {
        Self {
            fold_case,
            claimed: HashSet::new(),
        }
    }

    /// Claim `path`; false when an earlier job already holds it.
    fn claim(&mut self, path: &Path) -> bool {
        let key = if self.fold_case {
            PathBuf::from(path.to_string_lossy().to_lowercase())
        } else {
            path.to_path_buf()
        };
        self.claimed.insert(key)
    }
}

/// Whether file names in `dir` are looked up case-insensitively.
///
/// Creates a lowercase marker file and looks for it under its uppercase name.
/// When the marker cannot be created the folder is treated as case-sensitive.
fn is_case_insensitive(dir: &Path) -> bool {
    let name = format!(".folio-case-{}", Uuid::now_v7().simple());
    let marker = dir.join(&name);
    if let Err(e) = fs::File::create(&marker) {
        debug!(dir = %dir.display(), error = %e, "cannot check file name case sensitivity");
        return false;
    }
    let insensitive = dir.join(name.to_uppercase()).exists();
    if let Err(e) = fs::remove_file(&marker) {
        warn!(marker = %marker.display(), error = %e, "failed to remove case marker file");
    }
    debug!(dir = %dir.display(), insensitive, "file name case sensitivity");
    insensitive
}

/// A job of the current batch, in enumeration order.
enum Pending {
    Running(ConversionJob, JoinHandle<Result<()>>),
    /// Failed before the converter was invoked.
    Rejected(PathBuf, FolioError),
}

/// Run the full conversion over `config.input_folder`.
///
/// 1. Validate the input folder
/// 2. Check the converter is available
/// 3. Convert sources in batches of `config.jobs`, reporting in enumeration order
///
/// Fatal errors (configuration, missing converter) are returned as `Err`.
/// Per-job failures are reported through `progress` and counted in the summary.
#[instrument(skip_all, fields(input = %config.input_folder.display(), converter = converter.name()))]
pub async fn run<C: DocumentConverter + 'static>(
    config: &RunConfig,
    converter: Arc<C>,
    progress: &dyn ProgressReporter,
) -> Result<RunSummary> {
    let start = Instant::now();

    if config.jobs == 0 {
        return Err(FolioError::config("jobs must be at least 1"));
    }

    let sources = SourceSet::open(&config.input_folder)?;
    converter.ensure_available()?;

    let media_target = config.media_target();
    info!(
        media_target = %media_target.display(),
        jobs = config.jobs,
        on_error = %config.on_error,
        "starting run"
    );
    progress.run_started(sources.folder(), converter.name());

    let semaphore = Arc::new(Semaphore::new(config.jobs));
    let mut claims: Option<OutputClaims> = None;
    let mut summary = RunSummary::default();
    let mut fatal: Option<FolioError> = None;
    let mut remaining = sources.iter()?;

    loop {
        let batch: Vec<PathBuf> = remaining.by_ref().take(config.jobs).collect();
        if batch.is_empty() {
            break;
        }
        summary.found += batch.len();
        debug!(size = batch.len(), "starting batch");

        let claims = claims
            .get_or_insert_with(|| OutputClaims::new(is_case_insensitive(&config.input_folder)));
        let mut pending = Vec::with_capacity(batch.len());
        for source in batch {
            let job = match ConversionJob::new(source.clone(), &config.input_folder, &media_target) {
                Ok(job) => job,
                Err(e) => {
                    pending.push(Pending::Rejected(source, e));
                    continue;
                }
            };

            if !claims.claim(&job.output_path) {
                let message = format!(
                    "output collides with {} written earlier in this run",
                    job.output_path.display()
                );
                pending.push(Pending::Rejected(source.clone(), FolioError::conversion(&source, message)));
                continue;
            }

            let converter = converter.clone();
            let sem = semaphore.clone();
            let timeout = config.timeout;
            let task_job = job.clone();

            let handle = tokio::spawn(async move {
                let _permit = sem.acquire().await.map_err(|e| {
                    FolioError::conversion(&task_job.source_path, format!("scheduler closed: {e}"))
                })?;
                dispatcher::convert_job(converter.as_ref(), &task_job, timeout).await
            });
            pending.push(Pending::Running(job, handle));
        }

        // Collect results in enumeration order.
        for item in pending {
            let (source, outcome) = match item {
                Pending::Running(job, handle) => {
                    let source = job.source_path.clone();
                    let outcome = match handle.await {
                        Ok(Ok(())) => Ok(job),
                        Ok(Err(e)) => Err(e),
                        Err(e) => Err(FolioError::conversion(
                            &source,
                            format!("conversion task failed: {e}"),
                        )),
                    };
                    (source, outcome)
                }
                Pending::Rejected(source, e) => (source, Err(e)),
            };

            match outcome {
                Ok(job) => {
                    info!(source = %job.source_path.display(), output = %job.output_path.display(), "converted");
                    summary.converted += 1;
                    progress.job_converted(&job);
                }
                Err(e) if e.is_fatal() => {
                    warn!(source = %source.display(), error = %e, "fatal error, stopping run");
                    fatal.get_or_insert(e);
                }
                Err(e) => {
                    info!(source = %source.display(), error = %e, "conversion failed");
                    summary.failed += 1;
                    progress.job_failed(&source, &e);
                    summary.failures.push(JobFailure {
                        source,
                        error: e.to_string(),
                    });
                }
            }
        }

        if let Some(e) = fatal.take() {
            return Err(e);
        }

        if config.on_error == OnError::Abort && summary.failed > 0 {
            summary.aborted = true;
            summary.not_attempted = remaining.by_ref().count();
            summary.found += summary.not_attempted;
            warn!(not_attempted = summary.not_attempted, "aborting run after failure");
            break;
        }
    }

    if summary.found == 0 {
        info!("no .docx files found");
        progress.no_sources(sources.folder());
    }

    summary.elapsed = start.elapsed();
    info!(
        found = summary.found,
        converted = summary.converted,
        failed = summary.failed,
        not_attempted = summary.not_attempted,
        elapsed_ms = summary.elapsed.as_millis() as u64,
        "run complete"
    );
    progress.done(&summary);

    Ok(summary)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::Mutex;

    use folio_markdown::fixture::{DocxBuilder, PNG_BYTES, write_corrupt_docx};
    use folio_markdown::{BuiltinConverter, ConvertOptions, ConvertOutput};

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("folio-pipeline-test-{}", uuid::Uuid::now_v7()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn run_config(dir: &Path) -> RunConfig {
        RunConfig {
            input_folder: dir.to_path_buf(),
            media_dir: None,
            on_error: OnError::Skip,
            jobs: 1,
            timeout: Duration::from_secs(30),
        }
    }

    fn sample_doc(title: &str) -> DocxBuilder {
        DocxBuilder::new()
            .heading(1, title)
            .paragraph("Some body text.")
    }

    fn md_files(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|n| n.ends_with(".md"))
            .collect();
        names.sort();
        names
    }

    fn leftover_staging(dir: &Path) -> bool {
        fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .any(|e| e.file_name().to_string_lossy().starts_with(dispatcher::STAGING_PREFIX))
    }

    /// Records every progress event as a line.
    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }

        fn push(&self, event: String) {
            self.events.lock().unwrap().push(event);
        }
    }

    impl ProgressReporter for Recorder {
        fn run_started(&self, _folder: &Path, converter: &str) {
            self.push(format!("start {converter}"));
        }
        fn no_sources(&self, _folder: &Path) {
            self.push("none".into());
        }
        fn job_converted(&self, job: &ConversionJob) {
            self.push(format!("ok {}", job.source_path.file_name().unwrap().to_string_lossy()));
        }
        fn job_failed(&self, source: &Path, _error: &FolioError) {
            self.push(format!("fail {}", source.file_name().unwrap().to_string_lossy()));
        }
        fn done(&self, _summary: &RunSummary) {
            self.push("done".into());
        }
    }

    struct MissingConverter;

    impl DocumentConverter for MissingConverter {
        fn name(&self) -> &'static str {
            "missing"
        }
        fn ensure_available(&self) -> Result<()> {
            Err(FolioError::dependency_missing("pandoc", "was not found on PATH"))
        }
        async fn describe(&self) -> Result<String> {
            Ok("missing".into())
        }
        async fn convert(&self, source: &Path, _options: &ConvertOptions) -> Result<ConvertOutput> {
            Err(FolioError::conversion(source, "unreachable"))
        }
    }

    struct SlowConverter;

    impl DocumentConverter for SlowConverter {
        fn name(&self) -> &'static str {
            "slow"
        }
        fn ensure_available(&self) -> Result<()> {
            Ok(())
        }
        async fn describe(&self) -> Result<String> {
            Ok("slow".into())
        }
        async fn convert(&self, _source: &Path, _options: &ConvertOptions) -> Result<ConvertOutput> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(ConvertOutput {
                markdown: String::new(),
            })
        }
    }

    #[tokio::test]
    async fn empty_folder_succeeds_with_notice() {
        let dir = temp_dir();
        fs::write(dir.join("notes.txt"), "x").unwrap();
        let recorder = Recorder::default();

        let summary = run(&run_config(&dir), Arc::new(BuiltinConverter::new()), &recorder)
            .await
            .unwrap();

        assert_eq!(summary.found, 0);
        assert!(summary.is_success());
        assert_eq!(recorder.events(), vec!["start builtin", "none", "done"]);
        assert!(md_files(&dir).is_empty());

        let _ = fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn missing_folder_is_config_error() {
        let dir = temp_dir().join("absent");
        let err = run(&run_config(&dir), Arc::new(BuiltinConverter::new()), &SilentProgress)
            .await
            .unwrap_err();
        assert!(matches!(err, FolioError::Config { .. }));
    }

    #[tokio::test]
    async fn zero_jobs_is_config_error() {
        let dir = temp_dir();
        let mut config = run_config(&dir);
        config.jobs = 0;
        let err = run(&config, Arc::new(BuiltinConverter::new()), &SilentProgress)
            .await
            .unwrap_err();
        assert!(matches!(err, FolioError::Config { .. }));
        let _ = fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn converts_every_source_next_to_it() {
        let dir = temp_dir();
        sample_doc("Alpha").write(&dir.join("alpha.docx")).unwrap();
        sample_doc("Report").write(&dir.join("report.v2.docx")).unwrap();
        fs::write(dir.join("readme"), "not a docx").unwrap();

        let summary = run(&run_config(&dir), Arc::new(BuiltinConverter::new()), &SilentProgress)
            .await
            .unwrap();

        assert_eq!(summary.found, 2);
        assert_eq!(summary.converted, 2);
        assert_eq!(md_files(&dir), vec!["alpha.md", "report.v2.md"]);
        assert_eq!(
            fs::read_to_string(dir.join("report.v2.md")).unwrap(),
            "# Report\n\nSome body text.\n"
        );
        assert!(!leftover_staging(&dir));

        let _ = fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn skip_policy_continues_past_corrupt_file() {
        let dir = temp_dir();
        sample_doc("Good").write(&dir.join("good.docx")).unwrap();
        write_corrupt_docx(&dir.join("bad.docx")).unwrap();
        let recorder = Recorder::default();

        let summary = run(&run_config(&dir), Arc::new(BuiltinConverter::new()), &recorder)
            .await
            .unwrap();

        assert_eq!(summary.converted, 1);
        assert_eq!(summary.failed, 1);
        assert!(!summary.aborted);
        assert!(!summary.is_success());
        assert_eq!(summary.failures[0].source, dir.join("bad.docx"));
        assert_eq!(md_files(&dir), vec!["good.md"]);

        let events = recorder.events();
        assert!(events.contains(&"ok good.docx".to_string()));
        assert!(events.contains(&"fail bad.docx".to_string()));

        let _ = fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn abort_policy_stops_after_first_failure() {
        let dir = temp_dir();
        for name in ["a.docx", "b.docx", "c.docx"] {
            write_corrupt_docx(&dir.join(name)).unwrap();
        }
        let mut config = run_config(&dir);
        config.on_error = OnError::Abort;

        let summary = run(&config, Arc::new(BuiltinConverter::new()), &SilentProgress)
            .await
            .unwrap();

        assert!(summary.aborted);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.not_attempted, 2);
        assert_eq!(summary.found, 3);

        let _ = fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn missing_converter_writes_nothing() {
        let dir = temp_dir();
        sample_doc("A").write(&dir.join("a.docx")).unwrap();
        let recorder = Recorder::default();

        let err = run(&run_config(&dir), Arc::new(MissingConverter), &recorder)
            .await
            .unwrap_err();

        assert!(matches!(err, FolioError::DependencyMissing { .. }));
        assert!(recorder.events().is_empty());
        assert!(md_files(&dir).is_empty());

        let _ = fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn rerun_overwrites_with_identical_output() {
        let dir = temp_dir();
        DocxBuilder::new()
            .heading(1, "Figures")
            .image("image1.png", PNG_BYTES, "one")
            .write(&dir.join("figs.docx"))
            .unwrap();
        let config = run_config(&dir);

        run(&config, Arc::new(BuiltinConverter::new()), &SilentProgress).await.unwrap();
        let first = fs::read_to_string(dir.join("figs.md")).unwrap();

        run(&config, Arc::new(BuiltinConverter::new()), &SilentProgress).await.unwrap();
        let second = fs::read_to_string(dir.join("figs.md")).unwrap();

        assert_eq!(first, second);
        assert_eq!(fs::read_dir(dir.join("media/figs")).unwrap().count(), 1);
        assert_eq!(md_files(&dir), vec!["figs.md"]);

        let _ = fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn media_links_resolve_from_output_folder() {
        let dir = temp_dir();
        DocxBuilder::new()
            .image("image1.png", b"one", "first")
            .image("image2.png", b"two", "second")
            .write(&dir.join("doc.docx"))
            .unwrap();
        let mut config = run_config(&dir);
        config.media_dir = Some(dir.join("assets"));

        run(&config, Arc::new(BuiltinConverter::new()), &SilentProgress).await.unwrap();

        let md = fs::read_to_string(dir.join("doc.md")).unwrap();
        for link in ["assets/media/doc/image1.png", "assets/media/doc/image2.png"] {
            assert!(md.contains(&format!("({link})")), "missing {link} in {md}");
            assert!(dir.join(link).is_file());
        }
        assert!(!leftover_staging(&dir.join("assets")));

        let _ = fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn same_named_images_of_different_documents_stay_apart() {
        let dir = temp_dir();
        DocxBuilder::new()
            .image("image1.png", b"CAT", "cat")
            .write(&dir.join("a.docx"))
            .unwrap();
        DocxBuilder::new()
            .image("image1.png", b"DOG", "dog")
            .write(&dir.join("b.docx"))
            .unwrap();

        run(&run_config(&dir), Arc::new(BuiltinConverter::new()), &SilentProgress)
            .await
            .unwrap();

        let a = fs::read_to_string(dir.join("a.md")).unwrap();
        let b = fs::read_to_string(dir.join("b.md")).unwrap();
        assert_eq!(a, "![cat](media/a/image1.png)\n");
        assert_eq!(b, "![dog](media/b/image1.png)\n");
        assert_eq!(fs::read(dir.join("media/a/image1.png")).unwrap(), b"CAT");
        assert_eq!(fs::read(dir.join("media/b/image1.png")).unwrap(), b"DOG");

        let _ = fs::remove_dir_all(&dir);
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn colliding_outputs_fail_the_later_job() {
        let dir = temp_dir();
        sample_doc("Lower").write(&dir.join("Doc.docx")).unwrap();
        sample_doc("Upper").write(&dir.join("Doc.DOCX")).unwrap();

        let summary = run(&run_config(&dir), Arc::new(BuiltinConverter::new()), &SilentProgress)
            .await
            .unwrap();

        assert_eq!(summary.converted, 1);
        assert_eq!(summary.failed, 1);
        assert!(summary.failures[0].error.contains("output collides with"));
        assert_eq!(md_files(&dir), vec!["Doc.md"]);

        let _ = fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn timeout_fails_only_that_job() {
        let dir = temp_dir();
        sample_doc("Slow").write(&dir.join("slow.docx")).unwrap();
        let mut config = run_config(&dir);
        config.timeout = Duration::from_millis(50);

        let summary = run(&config, Arc::new(SlowConverter), &SilentProgress)
            .await
            .unwrap();

        assert_eq!(summary.failed, 1);
        assert!(summary.failures[0].error.contains("timed out"));
        assert!(!leftover_staging(&dir));
        assert!(md_files(&dir).is_empty());

        let _ = fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn parallel_run_matches_sequential_order_and_output() {
        let dir = temp_dir();
        for i in 0..5 {
            sample_doc(&format!("Doc {i}"))
                .image("image1.png", PNG_BYTES, "pic")
                .write(&dir.join(format!("doc{i}.docx")))
                .unwrap();
        }
        let enumeration: Vec<String> = SourceSet::open(&dir)
            .unwrap()
            .iter()
            .unwrap()
            .map(|p| format!("ok {}", p.file_name().unwrap().to_string_lossy()))
            .collect();

        let mut config = run_config(&dir);
        config.jobs = 2;
        let recorder = Recorder::default();
        let summary = run(&config, Arc::new(BuiltinConverter::new()), &recorder)
            .await
            .unwrap();

        assert_eq!(summary.converted, 5);
        let events = recorder.events();
        assert_eq!(&events[1..events.len() - 1], enumeration.as_slice());

        for i in 0..5 {
            let md = fs::read_to_string(dir.join(format!("doc{i}.md"))).unwrap();
            assert_eq!(md, format!("# Doc {i}\n\nSome body text.\n\n![pic](media/doc{i}/image1.png)\n"));
        }
        assert!(!leftover_staging(&dir));

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn case_folded_claims_catch_case_variants() {
        let mut claims = OutputClaims::new(true);
        assert!(claims.claim(Path::new("/docs/Report.md")));
        assert!(!claims.claim(Path::new("/docs/report.md")));
        assert!(claims.claim(Path::new("/docs/other.md")));

        let mut claims = OutputClaims::new(false);
        assert!(claims.claim(Path::new("/docs/Report.md")));
        assert!(claims.claim(Path::new("/docs/report.md")));
        assert!(!claims.claim(Path::new("/docs/report.md")));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn case_test_leaves_no_marker() {
        let dir = temp_dir();
        assert!(!is_case_insensitive(&dir));
        assert_eq!(fs::read_dir(&dir).unwrap().count(), 0);
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn case_test_on_missing_folder_is_case_sensitive() {
        let dir = temp_dir();
        assert!(!is_case_insensitive(&dir.join("absent")));
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn run_config_from_app_config() {
        let mut app = AppConfig::default();
        app.run.jobs = 4;
        app.run.media_dir = Some("assets".into());
        let config = RunConfig::from_app_config("docs", &app);
        assert_eq!(config.jobs, 4);
        assert_eq!(config.media_target(), PathBuf::from("assets"));
        assert_eq!(config.timeout, Duration::from_secs(120));
    }
}
