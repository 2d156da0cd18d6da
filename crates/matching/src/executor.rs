//! Converts a region's raw pings into contact rows, one time chunk per
//! engine call, tuning chunk size and precision as it goes.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use grafo_core::dates::day_floor;
use grafo_core::Config;
use grafo_engine::{ContactWindowRequest, EngineError, QueryEngine, StagingRequest, TableSpec};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::controller::{ControllerConfig, ControllerState};
use crate::coverage::{CoverageError, CoverageRange, CoverageStore};
use crate::progress::{ProgressEntry, ProgressLog, ProgressLogError};
use crate::sink::{ContactSink, SinkError};

#[derive(Debug, thiserror::Error)]
pub enum MatchingError {
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Coverage error: {0}")]
    Coverage(#[from] CoverageError),

    #[error("Progress log error: {0}")]
    Progress(#[from] ProgressLogError),

    #[error("Contact sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("Empty matching range for {region}: [{start}, {end})")]
    InvalidRange {
        region: String,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
}

#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    pub raw_table: String,
    pub contacts_table: String,
    pub progress_dir: PathBuf,
    /// Regions never matched start here.
    pub min_time: DateTime<Utc>,
    pub controller: ControllerConfig,
}

impl ExecutorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            raw_table: config.matching.raw_table.clone(),
            contacts_table: config.matching.contacts_table.clone(),
            progress_dir: config.storage.progress_dir.clone(),
            min_time: config.matching.min_time,
            controller: ControllerConfig::from_matching_config(&config.matching),
        }
    }
}

/// Outcome of matching one region.
#[derive(Debug, Clone, Serialize)]
pub struct RegionReport {
    pub region: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Chunks the engine completed.
    pub chunks: usize,
    pub skipped_chunks: usize,
    /// Calls rejected as too expensive.
    pub faults: usize,
    pub rows_written: u64,
    pub final_state: ControllerState,
    pub elapsed: Duration,
}

pub struct MatchingExecutor {
    engine: Arc<dyn QueryEngine>,
    coverage: Arc<dyn CoverageStore>,
    clock: Arc<dyn Clock>,
    settings: ExecutorSettings,
    sink: Option<Arc<dyn ContactSink>>,
}

fn staging_table_name(region: &str) -> String {
    let safe: String = region
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("contacts_staging_{safe}")
}

impl MatchingExecutor {
    pub fn new(
        engine: Arc<dyn QueryEngine>,
        coverage: Arc<dyn CoverageStore>,
        clock: Arc<dyn Clock>,
        settings: ExecutorSettings,
    ) -> Self {
        Self {
            engine,
            coverage,
            clock,
            settings,
            sink: None,
        }
    }

    /// Commit each region's rows through `sink` before its coverage moves.
    pub fn with_sink(mut self, sink: Arc<dyn ContactSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn settings(&self) -> &ExecutorSettings {
        &self.settings
    }

    /// Match every region from where its coverage ends (or the global start)
    /// up to today's midnight. Regions already up to date are left alone.
    pub fn run_pending(&self, regions: &[String]) -> Result<Vec<RegionReport>, MatchingError> {
        let run_id = Uuid::new_v4();
        let end = day_floor(self.clock.now());
        let mut seen = HashSet::new();
        let mut reports = Vec::new();

        info!(run_id = %run_id, regions = regions.len(), end = %end, "Matching run starting");
        for region in regions.iter().filter(|r| seen.insert(r.as_str())) {
            let start = match self.coverage.get(region)? {
                Some(range) => range.max_date + chrono::Duration::hours(1),
                None => self.settings.min_time,
            };
            if start >= end {
                info!(region = %region, covered_until = %start, "Region up to date");
                continue;
            }
            reports.push(self.run_region(region, start, end)?);
        }

        info!(
            run_id = %run_id,
            matched = reports.len(),
            rows = reports.iter().map(|r| r.rows_written).sum::<u64>(),
            "Matching run finished"
        );
        Ok(reports)
    }

    /// Match `[start, end)` for one region and extend its coverage.
    pub fn run_region(
        &self,
        region: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<RegionReport, MatchingError> {
        if start >= end {
            return Err(MatchingError::InvalidRange {
                region: region.to_string(),
                start,
                end,
            });
        }
        info!(region = %region, start = %start, end = %end, "Matching region");

        match self
            .engine
            .create_table(&TableSpec::contacts(&self.settings.contacts_table))
        {
            Ok(()) | Err(EngineError::TableExists(_)) => {}
            Err(e) => return Err(e.into()),
        }

        let staging = staging_table_name(region);
        self.engine.drop_table(&staging, true)?;
        self.engine.create_table(&TableSpec::pings(&staging))?;
        let staged = self.engine.stage_pings(&StagingRequest {
            source_table: self.settings.raw_table.clone(),
            staging_table: staging.clone(),
            region_code: region.to_string(),
            start,
            end,
            max_accuracy: self.settings.controller.max_precision as f64,
        });

        let outcome = match staged {
            Ok(_) => self.match_chunks(region, start, end, &staging),
            Err(e) => Err(e.into()),
        };
        let dropped = self.engine.drop_table(&staging, true);
        let report = outcome?;
        dropped?;

        if let Some(sink) = &self.sink {
            sink.commit(region)?;
        }
        let min_date = self.coverage.get(region)?.map_or(start, |range| range.min_date);
        self.coverage.update(
            region,
            CoverageRange {
                min_date,
                max_date: end - chrono::Duration::hours(1),
            },
        )?;

        info!(
            region = %region,
            chunks = report.chunks,
            skipped = report.skipped_chunks,
            faults = report.faults,
            rows = report.rows_written,
            elapsed_m = report.elapsed.as_secs_f64() / 60.0,
            "Region matched"
        );
        Ok(report)
    }

    fn match_chunks(
        &self,
        region: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        staging: &str,
    ) -> Result<RegionReport, MatchingError> {
        let config = &self.settings.controller;
        let log = ProgressLog::open(&self.settings.progress_dir, region)?;
        let run_started = self.clock.now();
        let mut state = config.initial_state();
        let mut report = RegionReport {
            region: region.to_string(),
            start,
            end,
            chunks: 0,
            skipped_chunks: 0,
            faults: 0,
            rows_written: 0,
            final_state: state,
            elapsed: Duration::ZERO,
        };

        let mut t = start;
        while t < end {
            let chunk_end = (t + chrono::Duration::hours(state.window_hours as i64)).min(end);
            let entry = |state: ControllerState, elapsed: Duration, skipped: bool| ProgressEntry {
                window_start: t,
                window_end: chunk_end,
                window_hours: state.window_hours,
                precision: state.precision,
                elapsed_secs: elapsed.as_secs_f64(),
                cumulative_minutes: self.clock.elapsed_since(run_started).as_secs_f64() / 60.0,
                skipped,
            };

            if state.is_exhausted() {
                warn!(region = %region, start = %t, end = %chunk_end, "No precision left, skipping chunk");
                log.append(&entry(state, Duration::ZERO, true))?;
                report.skipped_chunks += 1;
                state = state.after_skip(config);
                t = chunk_end;
                continue;
            }

            let request = ContactWindowRequest::new(
                staging,
                &self.settings.contacts_table,
                region,
                t,
                chunk_end,
                state.precision as f64,
            );
            let call_started = self.clock.now();
            match self.engine.append_contacts(&request) {
                Ok(stats) => {
                    let elapsed = self.clock.elapsed_since(call_started);
                    log.append(&entry(state, elapsed, false))?;
                    info!(
                        region = %region,
                        start = %t,
                        end = %chunk_end,
                        window_hours = state.window_hours,
                        precision = state.precision,
                        elapsed_s = elapsed.as_secs_f64(),
                        rows = stats.rows_written,
                        "Chunk matched"
                    );
                    report.chunks += 1;
                    report.rows_written += stats.rows_written;
                    state = state.after_success(config, elapsed);
                    t = chunk_end;
                }
                Err(e) if e.is_resources_exceeded() => {
                    let elapsed = self.clock.elapsed_since(call_started);
                    report.faults += 1;
                    let response = state.after_fault(config);
                    if response.skip_chunk {
                        warn!(
                            region = %region,
                            start = %t,
                            end = %chunk_end,
                            "Limit reached, skipping chunk"
                        );
                        let exhausted = ControllerState {
                            precision: 0,
                            ..response.next
                        };
                        log.append(&entry(exhausted, elapsed, true))?;
                        report.skipped_chunks += 1;
                        t = chunk_end;
                    } else {
                        warn!(
                            region = %region,
                            start = %t,
                            end = %chunk_end,
                            window_hours = response.next.window_hours,
                            precision = response.next.precision,
                            error = %e,
                            "Chunk rejected, adjusting"
                        );
                    }
                    state = response.next;
                    self.clock.sleep(config.backoff);
                }
                Err(e) => return Err(e.into()),
            }
        }

        report.final_state = state;
        report.elapsed = self.clock.elapsed_since(run_started);
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use chrono::TimeZone;
    use grafo_engine::QueryStats;

    use super::*;
    use crate::clock::ManualClock;
    use crate::coverage::MemoryCoverageStore;

    #[derive(Debug, Clone, Copy)]
    enum Step {
        Fast,
        Slow,
        Fault,
        Fail,
    }

    /// Engine whose matching calls follow a script; unscripted calls are fast.
    struct ScriptedEngine {
        clock: Arc<ManualClock>,
        script: Mutex<VecDeque<Step>>,
        calls: Mutex<Vec<ContactWindowRequest>>,
        dropped: Mutex<Vec<String>>,
    }

    impl ScriptedEngine {
        fn new(clock: Arc<ManualClock>, script: impl IntoIterator<Item = Step>) -> Self {
            Self {
                clock,
                script: Mutex::new(script.into_iter().collect()),
                calls: Mutex::new(Vec::new()),
                dropped: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<ContactWindowRequest> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl QueryEngine for ScriptedEngine {
        fn create_table(&self, _spec: &TableSpec) -> Result<(), EngineError> {
            Ok(())
        }

        fn drop_table(&self, name: &str, _missing_ok: bool) -> Result<(), EngineError> {
            self.dropped.lock().unwrap().push(name.to_string());
            Ok(())
        }

        fn stage_pings(&self, _request: &StagingRequest) -> Result<QueryStats, EngineError> {
            Ok(QueryStats::default())
        }

        fn append_contacts(&self, request: &ContactWindowRequest) -> Result<QueryStats, EngineError> {
            self.calls.lock().unwrap().push(request.clone());
            let step = self.script.lock().unwrap().pop_front().unwrap_or(Step::Fast);
            match step {
                Step::Fast => {
                    self.clock.advance(Duration::from_secs(2));
                    Ok(QueryStats {
                        rows_written: 1,
                        ..QueryStats::default()
                    })
                }
                Step::Slow => {
                    self.clock.advance(Duration::from_secs(120));
                    Ok(QueryStats::default())
                }
                Step::Fault => Err(EngineError::ResourcesExceeded { used: 10, budget: 1 }),
                Step::Fail => Err(EngineError::QueryFailed("syntax".into())),
            }
        }
    }

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2021, 3, day, hour, 0, 0).unwrap()
    }

    struct Harness {
        dir: tempfile::TempDir,
        clock: Arc<ManualClock>,
        engine: Arc<ScriptedEngine>,
        coverage: Arc<MemoryCoverageStore>,
        executor: MatchingExecutor,
    }

    fn harness(script: Vec<Step>, controller: ControllerConfig) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(at(3, 10)));
        let engine = Arc::new(ScriptedEngine::new(Arc::clone(&clock), script));
        let coverage = Arc::new(MemoryCoverageStore::new());
        let settings = ExecutorSettings {
            raw_table: "raw_pings".into(),
            contacts_table: "contacts".into(),
            progress_dir: dir.path().to_path_buf(),
            min_time: at(1, 0),
            controller,
        };
        let executor = MatchingExecutor::new(
            Arc::clone(&engine) as Arc<dyn QueryEngine>,
            Arc::clone(&coverage) as Arc<dyn CoverageStore>,
            Arc::clone(&clock) as Arc<dyn Clock>,
            settings,
        );
        Harness {
            dir,
            clock,
            engine,
            coverage,
            executor,
        }
    }

    fn progress(h: &Harness, region: &str) -> Vec<ProgressEntry> {
        ProgressLog::read_entries(&h.dir.path().join(ProgressLog::file_name(region))).unwrap()
    }

    /// Chunks tile the range without gaps or overlaps.
    fn assert_contiguous(entries: &[ProgressEntry], start: DateTime<Utc>, end: DateTime<Utc>) {
        let mut cursor = start;
        for e in entries {
            assert_eq!(e.window_start, cursor);
            assert!(e.window_end > e.window_start);
            cursor = e.window_end;
        }
        assert_eq!(cursor, end);
    }

    #[test]
    fn fast_chunks_grow_the_window() {
        let h = harness(vec![], ControllerConfig::default());
        let report = h.executor.run_region("CO.34", at(1, 0), at(3, 0)).unwrap();

        assert!(report.chunks < 4);
        let windows: Vec<u32> = h.engine.calls().iter().map(|c| (c.end - c.start).num_hours() as u32).collect();
        assert_eq!(windows, vec![12, 18, 18]);
        assert_eq!(report.final_state.window_hours, 24);

        let entries = progress(&h, "CO.34");
        assert_contiguous(&entries, at(1, 0), at(3, 0));
        assert!(entries.iter().all(|e| !e.skipped));

        assert_eq!(
            h.coverage.get("CO.34").unwrap(),
            Some(CoverageRange {
                min_date: at(1, 0),
                max_date: at(2, 23),
            })
        );
        assert!(h.engine.dropped.lock().unwrap().contains(&"contacts_staging_CO_34".to_string()));
    }

    #[test]
    fn exhausted_chunk_is_skipped_and_work_continues() {
        let h = harness(vec![Step::Fault; 16], ControllerConfig::default());
        let report = h.executor.run_region("CO.34", at(1, 0), at(2, 0)).unwrap();

        assert_eq!(report.faults, 16);
        assert_eq!(report.skipped_chunks, 1);
        assert!(report.chunks > 0);
        assert_eq!(h.clock.slept(), Duration::from_secs(5 * 16));

        let entries = progress(&h, "CO.34");
        assert!(entries[0].skipped);
        assert_eq!(entries[0].precision, 0);
        assert_eq!((entries[0].window_start, entries[0].window_end), (at(1, 0), at(1, 1)));
        assert!(entries[1..].iter().all(|e| !e.skipped));
        assert_contiguous(&entries, at(1, 0), at(2, 0));

        // Precision restarts one step up after the skip.
        let calls = h.engine.calls();
        assert_eq!(calls[16].precision, 2.0);
        assert_eq!(calls[16].start, at(1, 1));
    }

    #[test]
    fn chunk_without_precision_is_skipped_without_a_call() {
        let controller = ControllerConfig {
            initial_window_hours: 1,
            initial_precision: 2,
            ..ControllerConfig::default()
        };
        let h = harness(vec![Step::Slow, Step::Fast], controller);
        let report = h.executor.run_region("CO.34", at(1, 0), at(1, 3)).unwrap();

        assert_eq!(h.engine.calls().len(), 2);
        assert_eq!(report.skipped_chunks, 1);
        let entries = progress(&h, "CO.34");
        assert_eq!(entries.iter().map(|e| e.skipped).collect::<Vec<_>>(), vec![false, true, false]);
        assert_contiguous(&entries, at(1, 0), at(1, 3));
    }

    #[test]
    fn other_engine_errors_abort_without_coverage() {
        let h = harness(vec![Step::Fast, Step::Fail], ControllerConfig::default());
        let err = h.executor.run_region("CO.34", at(1, 0), at(3, 0)).unwrap_err();
        assert!(matches!(err, MatchingError::Engine(EngineError::QueryFailed(_))));
        assert_eq!(h.coverage.get("CO.34").unwrap(), None);
        // Dropped before staging and again after the failure.
        assert_eq!(h.engine.dropped.lock().unwrap().len(), 2);
    }

    /// Records what coverage looked like when each commit arrived.
    struct RecordingSink {
        coverage: Arc<MemoryCoverageStore>,
        seen: Mutex<Vec<(String, Option<CoverageRange>)>>,
        fail_on: Option<&'static str>,
    }

    impl ContactSink for RecordingSink {
        fn commit(&self, region: &str) -> Result<usize, SinkError> {
            if self.fail_on == Some(region) {
                return Err(SinkError::Io(std::io::Error::other("disk full")));
            }
            let covered = self.coverage.get(region).unwrap();
            self.seen.lock().unwrap().push((region.to_string(), covered));
            Ok(1)
        }
    }

    #[test]
    fn contacts_are_committed_before_coverage_moves() {
        let h = harness(vec![], ControllerConfig::default());
        let sink = Arc::new(RecordingSink {
            coverage: Arc::clone(&h.coverage),
            seen: Mutex::new(Vec::new()),
            fail_on: Some("CO.34"),
        });
        let executor = MatchingExecutor::new(
            Arc::clone(&h.engine) as Arc<dyn QueryEngine>,
            Arc::clone(&h.coverage) as Arc<dyn CoverageStore>,
            Arc::clone(&h.clock) as Arc<dyn Clock>,
            h.executor.settings().clone(),
        )
        .with_sink(Arc::clone(&sink) as Arc<dyn ContactSink>);

        let err = executor
            .run_pending(&["CO.11".to_string(), "CO.34".to_string()])
            .unwrap_err();
        assert!(matches!(err, MatchingError::Sink(_)));

        assert_eq!(*sink.seen.lock().unwrap(), vec![("CO.11".to_string(), None)]);
        assert!(h.coverage.get("CO.11").unwrap().is_some());
        // The failed commit keeps the region pending.
        assert_eq!(h.coverage.get("CO.34").unwrap(), None);
    }

    #[test]
    fn empty_range_is_rejected() {
        let h = harness(vec![], ControllerConfig::default());
        let err = h.executor.run_region("CO.34", at(2, 0), at(2, 0)).unwrap_err();
        assert!(matches!(err, MatchingError::InvalidRange { .. }));
    }

    #[test]
    fn pending_regions_resume_from_coverage() {
        let h = harness(vec![], ControllerConfig::default());
        h.coverage
            .update(
                "CO.11",
                CoverageRange {
                    min_date: at(1, 0),
                    max_date: at(2, 23),
                },
            )
            .unwrap();
        h.coverage
            .update(
                "CO.25",
                CoverageRange {
                    min_date: at(1, 0),
                    max_date: at(1, 23),
                },
            )
            .unwrap();

        let regions = vec!["CO.11".to_string(), "CO.25".into(), "CO.34".into(), "CO.25".into()];
        let reports = h.executor.run_pending(&regions).unwrap();

        let ranges: Vec<(&str, DateTime<Utc>, DateTime<Utc>)> =
            reports.iter().map(|r| (r.region.as_str(), r.start, r.end)).collect();
        assert_eq!(ranges, vec![("CO.25", at(2, 0), at(3, 0)), ("CO.34", at(1, 0), at(3, 0))]);

        let coverage = h.coverage.get("CO.25").unwrap().unwrap();
        assert_eq!((coverage.min_date, coverage.max_date), (at(1, 0), at(2, 23)));

        // Everything is covered now.
        assert!(h.executor.run_pending(&regions).unwrap().is_empty());
    }
}
