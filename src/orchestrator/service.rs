//! Orchestrator service - run registry, event bus and stage drivers
//!
//! Each run executes on its own background thread. The registry map and each
//! run record sit behind their own mutexes; the two are never held at the
//! same time. Listeners are invoked synchronously from `emit`, outside the
//! record lock, with panics caught so one subscriber cannot corrupt the bus.

use std::collections::{HashMap, HashSet};
use std::env;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, Weak};
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::orchestrator::concurrency::map_with_concurrency;
use crate::orchestrator::llm::{call_llm, extract_json, run_json_agent, use_stubs, LlmCallOptions, LlmError, Message};
use crate::orchestrator::prompts::PromptStore;
use crate::orchestrator::stubs::{stub_candidates, stub_card, stub_profile, stub_report, stub_selection};
use crate::orchestrator::PipelineError;
use crate::schemas::candidate::Candidate;
use crate::schemas::events::Event;
use crate::schemas::name_card::NameCard;
use crate::schemas::profile::SessionProfile;
use crate::schemas::result::{Report, RunResult};
use crate::schemas::sanity_check::{Recommendation, SanityCheckResult, Severity};
use crate::schemas::selection::ExpertSelection;
use crate::tools::associations::{scan_celebrity_associations, scan_neg_associations};
use crate::tools::phonetics::{count_syllables, rough_ipa};
use crate::tools::popularity::get_popularity;
use crate::tools::validators::filter_candidates;

pub const MAX_SERIAL_NAMES: usize = 24;
pub const MAX_PARALLEL_NAMES: usize = 80;

/// Cap on per-run event retention; excess log/partial events rotate out.
pub const MAX_EVENTS_PER_RUN: usize = 500;

const DEFAULT_REGION: &str = "US";
const DEFAULT_CONCURRENCY: usize = 8;

fn agent_concurrency() -> usize {
    env::var("AGENT_CONCURRENCY")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|n| *n > 0)
        .unwrap_or(DEFAULT_CONCURRENCY)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    Serial,
    Parallel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }
}

pub type Listener = Arc<dyn Fn(&Event) + Send + Sync>;

/// Record of a pipeline run. Owned by the registry; mutated only through the
/// service while holding its mutex.
pub struct RunRecord {
    pub id: String,
    pub brief: String,
    pub mode: RunMode,
    pub status: RunStatus,
    pub events: Vec<Event>,
    pub result: Option<RunResult>,
    pub error: Option<String>,
    listeners: Vec<(u64, Listener)>,
    next_listener_id: u64,
}

impl RunRecord {
    fn new(id: String, brief: String, mode: RunMode) -> Self {
        RunRecord {
            id,
            brief,
            mode,
            status: RunStatus::Pending,
            events: Vec::new(),
            result: None,
            error: None,
            listeners: Vec::new(),
            next_listener_id: 0,
        }
    }
}

/// Handle returned by `subscribe`. Unsubscribing twice is a no-op.
#[derive(Debug)]
pub struct Subscription {
    run: Weak<Mutex<RunRecord>>,
    listener_id: u64,
}

impl Subscription {
    pub fn unsubscribe(&self) {
        if let Some(run) = self.run.upgrade() {
            run.lock()
                .unwrap()
                .listeners
                .retain(|(id, _)| *id != self.listener_id);
        }
    }
}

type SharedRecord = Arc<Mutex<RunRecord>>;

/// Service for managing pipeline runs.
pub struct OrchestratorService {
    runs: Mutex<HashMap<String, SharedRecord>>,
    prompts: PromptStore,
    allow_stubs: bool,
}

impl OrchestratorService {
    pub fn new(allow_stubs: bool) -> Arc<Self> {
        Arc::new(OrchestratorService {
            runs: Mutex::new(HashMap::new()),
            prompts: PromptStore::from_env(),
            allow_stubs,
        })
    }

    /// Start a new pipeline run on a background thread; returns the run id.
    pub fn start_run(self: &Arc<Self>, brief: &str, mode: RunMode) -> String {
        let run_id = Uuid::new_v4().to_string();
        let record = Arc::new(Mutex::new(RunRecord::new(
            run_id.clone(),
            brief.to_string(),
            mode,
        )));

        self.runs
            .lock()
            .unwrap()
            .insert(run_id.clone(), Arc::clone(&record));

        let service = Arc::clone(self);
        thread::spawn(move || service.execute(&record));

        run_id
    }

    pub fn get_run(&self, run_id: &str) -> Option<SharedRecord> {
        self.runs.lock().unwrap().get(run_id).cloned()
    }

    pub fn run_status(&self, run_id: &str) -> Option<RunStatus> {
        self.get_run(run_id).map(|record| record.lock().unwrap().status)
    }

    /// Poll until the run reaches a terminal status or the timeout expires.
    /// Returns the last observed status.
    pub fn wait(&self, run_id: &str, timeout: Duration) -> Option<RunStatus> {
        let deadline = Instant::now() + timeout;
        loop {
            let status = self.run_status(run_id)?;
            if status.is_terminal() || Instant::now() >= deadline {
                return Some(status);
            }
            thread::sleep(Duration::from_millis(50));
        }
    }

    /// Subscribe to a run's events. Fails when the run id is unknown.
    pub fn subscribe(
        &self,
        run_id: &str,
        listener: Listener,
    ) -> Result<Subscription, PipelineError> {
        let record = self
            .get_run(run_id)
            .ok_or_else(|| PipelineError::RunNotFound(run_id.to_string()))?;

        let mut rec = record.lock().unwrap();
        let listener_id = rec.next_listener_id;
        rec.next_listener_id += 1;
        rec.listeners.push((listener_id, listener));
        drop(rec);

        Ok(Subscription {
            run: Arc::downgrade(&record),
            listener_id,
        })
    }

    /// Append an event, rotate retention, then fan out to listeners.
    fn emit(&self, record: &SharedRecord, event: Event) {
        let listeners: Vec<Listener> = {
            let mut rec = record.lock().unwrap();
            rec.events.push(event.clone());
            if rec.events.len() > MAX_EVENTS_PER_RUN {
                rotate_events(&mut rec.events);
            }
            rec.listeners.iter().map(|(_, l)| Arc::clone(l)).collect()
        };

        // Listeners run outside the record lock; a panicking listener must
        // not take down the pipeline thread or block other listeners.
        for listener in listeners {
            let _ = panic::catch_unwind(AssertUnwindSafe(|| listener(&event)));
        }
    }

    fn check_stubs_allowed(&self) -> Result<(), PipelineError> {
        if !self.allow_stubs && use_stubs() {
            return Err(PipelineError::StubsDisabled);
        }
        Ok(())
    }

    fn execute(&self, record: &SharedRecord) {
        let (run_id, brief, mode) = {
            let mut rec = record.lock().unwrap();
            rec.status = RunStatus::Running;
            (rec.id.clone(), rec.brief.clone(), rec.mode)
        };

        if let Err(e) = self.run_stages(record, &run_id, &brief, mode) {
            let msg = e.to_string();
            {
                let mut rec = record.lock().unwrap();
                rec.status = RunStatus::Failed;
                rec.error = Some(msg.clone());
            }
            self.emit(
                record,
                Event::Error {
                    run_id,
                    agent: "orchestrator".to_string(),
                    msg,
                },
            );
        }
    }

    fn run_stages(
        &self,
        record: &SharedRecord,
        run_id: &str,
        brief: &str,
        mode: RunMode,
    ) -> Result<(), PipelineError> {
        let profile = self.run_brief_parser(record, run_id, brief)?;
        let candidates = self.run_name_generator(record, run_id, mode, &profile)?;
        let cards = self.run_research(record, run_id, mode, &profile, &candidates)?;
        let selection = self.run_expert_selector(record, run_id, &profile, &cards)?;
        let selection = self.run_sanity_checker(record, run_id, brief, selection)?;
        let report = self.run_report_composer(record, run_id, &profile, &cards, &selection)?;

        let result = RunResult {
            profile,
            candidates: cards,
            selection,
            report: report.clone(),
        };
        {
            let mut rec = record.lock().unwrap();
            rec.result = Some(result);
        }

        self.emit(
            record,
            Event::Result {
                run_id: run_id.to_string(),
                agent: "report-composer".to_string(),
                payload: payload_of(&report),
            },
        );
        self.emit(
            record,
            Event::Done {
                run_id: run_id.to_string(),
                agent: "report-composer".to_string(),
                name: None,
            },
        );

        // Give subscribers a chance to drain before the status flips
        thread::yield_now();
        record.lock().unwrap().status = RunStatus::Completed;
        Ok(())
    }

    // Stage 1: parse the brief into a SessionProfile.
    fn run_brief_parser(
        &self,
        record: &SharedRecord,
        run_id: &str,
        brief: &str,
    ) -> Result<SessionProfile, PipelineError> {
        self.emit(
            record,
            Event::Activity {
                run_id: run_id.to_string(),
                agent: "brief-parser".to_string(),
                msg: "parsing brief".to_string(),
            },
        );

        self.check_stubs_allowed()?;

        if use_stubs() {
            thread::sleep(Duration::from_millis(150));
            let profile = stub_profile(brief);
            self.emit_result(record, run_id, "brief-parser", payload_of(&profile));
            return Ok(profile);
        }

        match self.live_brief_parser(record, run_id, brief) {
            Ok(profile) => Ok(profile),
            Err(e) if self.allow_stubs => {
                self.emit_log(
                    record,
                    run_id,
                    "brief-parser",
                    format!("Falling back to stubbed profile due to error: {}", e),
                );
                let profile = stub_profile(brief);
                self.emit_result(record, run_id, "brief-parser", payload_of(&profile));
                Ok(profile)
            }
            Err(e) => Err(e),
        }
    }

    fn live_brief_parser(
        &self,
        record: &SharedRecord,
        run_id: &str,
        brief: &str,
    ) -> Result<SessionProfile, PipelineError> {
        let segments = self.prompts.load("brief-parser")?;
        let user_input = format!(
            "Client Brief:\n{}\n\nRespond with JSON following the SessionProfile schema.",
            brief
        );
        let content = format!("{}\n\n{}", segments.instruction, user_input)
            .trim()
            .to_string();

        let raw = call_llm(
            &[Message::user(content)],
            &LlmCallOptions {
                system: Some(segments.system),
                json_mode: true,
                temperature: 0.3,
                ..Default::default()
            },
        )?;

        let mut parsed = extract_json(&raw)?;
        // The model must never get to rewrite the brief it was given
        if let Value::Object(map) = &mut parsed {
            map.insert("raw_brief".to_string(), Value::String(brief.to_string()));
        }

        let profile: SessionProfile = serde_json::from_value(parsed)
            .map_err(|e| PipelineError::Llm(LlmError::SchemaInvalid(e.to_string())))?;

        self.emit_result(record, run_id, "brief-parser", payload_of(&profile));
        Ok(profile)
    }

    // Stage 2: generate candidate names.
    fn run_name_generator(
        &self,
        record: &SharedRecord,
        run_id: &str,
        mode: RunMode,
        profile: &SessionProfile,
    ) -> Result<Vec<Candidate>, PipelineError> {
        self.emit(
            record,
            Event::Activity {
                run_id: run_id.to_string(),
                agent: "generator".to_string(),
                msg: "creating name lanes".to_string(),
            },
        );

        let limit = match mode {
            RunMode::Serial => MAX_SERIAL_NAMES,
            RunMode::Parallel => MAX_PARALLEL_NAMES,
        };

        self.check_stubs_allowed()?;

        if use_stubs() {
            thread::sleep(Duration::from_millis(150));
            let candidates: Vec<Candidate> =
                stub_candidates(profile).into_iter().take(limit).collect();
            self.emit_candidate_events(record, run_id, &candidates);
            return Ok(candidates);
        }

        match self.live_name_generator(record, run_id, limit, profile) {
            Ok(candidates) => Ok(candidates),
            Err(e) if self.allow_stubs => {
                self.emit_log(
                    record,
                    run_id,
                    "generator",
                    format!("Falling back to stubbed candidate list due to error: {}", e),
                );
                let candidates: Vec<Candidate> =
                    stub_candidates(profile).into_iter().take(limit).collect();
                self.emit_candidate_events(record, run_id, &candidates);
                Ok(candidates)
            }
            Err(e) => Err(e),
        }
    }

    fn live_name_generator(
        &self,
        record: &SharedRecord,
        run_id: &str,
        limit: usize,
        profile: &SessionProfile,
    ) -> Result<Vec<Candidate>, PipelineError> {
        let segments = self.prompts.load("name-generator")?;
        let profile_json =
            serde_json::to_string_pretty(profile).unwrap_or_else(|_| "{}".to_string());
        let user_input = format!("SessionProfile JSON:\n{}", profile_json);
        let content = format!("{}\n\n{}", segments.instruction, user_input)
            .trim()
            .to_string();

        let raw = call_llm(
            &[Message::user(content)],
            &LlmCallOptions {
                system: Some(segments.system),
                json_mode: true,
                temperature: 0.6,
                ..Default::default()
            },
        )?;

        let mut parsed = extract_json(&raw)?;
        // The generator prompt has returned both a bare array and a
        // {"candidates": [...]} envelope; accept either
        if let Value::Object(map) = &mut parsed {
            if let Some(inner) = map.remove("candidates") {
                parsed = inner;
            }
        }

        let items = match parsed {
            Value::Array(items) => items,
            _ => {
                return Err(PipelineError::Llm(LlmError::SchemaInvalid(
                    "Expected array of candidates".to_string(),
                )))
            }
        };

        let candidates: Vec<Candidate> = items
            .into_iter()
            .take(limit)
            .map(|item| Candidate {
                name: str_field(&item, "name"),
                lane: str_field(&item, "lane"),
                rationale: str_field(&item, "rationale"),
                theme_links: item
                    .get("theme_links")
                    .and_then(Value::as_array)
                    .map(|links| {
                        links
                            .iter()
                            .filter_map(Value::as_str)
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default(),
            })
            .collect();

        // Code-enforced filtering; the model is not trusted to respect
        // vetoes or sibling constraints
        let original_count = candidates.len();
        let log = |msg: String| self.emit_log(record, run_id, "generator", msg);
        let candidates = filter_candidates(candidates, profile, Some(&log));

        if candidates.len() < original_count {
            self.emit_log(
                record,
                run_id,
                "generator",
                format!(
                    "Filtered {} candidates due to veto/sibling constraints",
                    original_count - candidates.len()
                ),
            );
        }

        self.emit_candidate_events(record, run_id, &candidates);
        Ok(candidates)
    }

    fn emit_candidate_events(&self, record: &SharedRecord, run_id: &str, candidates: &[Candidate]) {
        self.emit(
            record,
            Event::Partial {
                run_id: run_id.to_string(),
                agent: "generator".to_string(),
                name: None,
                field: "candidates".to_string(),
                value: payload_of(&candidates),
            },
        );
        self.emit_result(record, run_id, "generator", payload_of(&candidates));
    }

    // Stage 3: research each candidate with bounded fan-out.
    fn run_research(
        &self,
        record: &SharedRecord,
        run_id: &str,
        mode: RunMode,
        profile: &SessionProfile,
        candidates: &[Candidate],
    ) -> Result<Vec<NameCard>, PipelineError> {
        let region = profile
            .region
            .as_ref()
            .and_then(|r| r.first())
            .cloned()
            .unwrap_or_else(|| DEFAULT_REGION.to_string());
        let surname = profile.family.as_ref().and_then(|f| f.surname.clone());
        let concurrency = match mode {
            RunMode::Parallel => agent_concurrency(),
            RunMode::Serial => 1,
        };

        map_with_concurrency(candidates, concurrency, |candidate, _index| {
            self.research_candidate(record, run_id, profile, candidate, &region, surname.as_deref())
        })
    }

    fn research_candidate(
        &self,
        record: &SharedRecord,
        run_id: &str,
        profile: &SessionProfile,
        candidate: &Candidate,
        region: &str,
        surname: Option<&str>,
    ) -> Result<NameCard, PipelineError> {
        self.emit(
            record,
            Event::Start {
                run_id: run_id.to_string(),
                agent: "researcher".to_string(),
                name: Some(candidate.name.clone()),
            },
        );

        self.check_stubs_allowed()?;

        if use_stubs() {
            thread::sleep(Duration::from_millis(120));
            let card = stub_card(&candidate.name, &candidate.lane, profile);
            self.emit_card_events(record, run_id, &candidate.name, &card);
            return Ok(card);
        }

        match self.live_research_candidate(profile, candidate, region, surname) {
            Ok(card) => {
                self.emit_card_events(record, run_id, &candidate.name, &card);
                Ok(card)
            }
            Err(e) if self.allow_stubs => {
                self.emit(
                    record,
                    Event::Log {
                        run_id: run_id.to_string(),
                        agent: "researcher".to_string(),
                        name: Some(candidate.name.clone()),
                        msg: format!("Researcher fell back to stub data: {}: {}", e.kind(), e),
                    },
                );
                let card = stub_card(&candidate.name, &candidate.lane, profile);
                self.emit_card_events(record, run_id, &candidate.name, &card);
                Ok(card)
            }
            Err(e) => Err(e),
        }
    }

    fn live_research_candidate(
        &self,
        profile: &SessionProfile,
        candidate: &Candidate,
        region: &str,
        surname: Option<&str>,
    ) -> Result<NameCard, PipelineError> {
        let tools = gather_research_tools(&candidate.name, region, surname);
        let user_payload = json!({
            "sessionProfile": profile,
            "candidate": candidate,
            "tools": tools,
            "guidance": {
                "note": "Use the provided tool outputs (popularity, associations) and your own \
                         knowledge to fill the card. Do not attempt to use external tools."
            },
        });

        run_json_agent::<NameCard>(&self.prompts, "researcher", &user_payload.to_string(), 0.4)
    }

    fn emit_card_events(&self, record: &SharedRecord, run_id: &str, name: &str, card: &NameCard) {
        self.emit(
            record,
            Event::Partial {
                run_id: run_id.to_string(),
                agent: "researcher".to_string(),
                name: Some(name.to_string()),
                field: "card".to_string(),
                value: payload_of(card),
            },
        );
        self.emit(
            record,
            Event::Done {
                run_id: run_id.to_string(),
                agent: "researcher".to_string(),
                name: Some(name.to_string()),
            },
        );
    }

    // Stage 4: select finalists from the researched cards.
    fn run_expert_selector(
        &self,
        record: &SharedRecord,
        run_id: &str,
        profile: &SessionProfile,
        cards: &[NameCard],
    ) -> Result<ExpertSelection, PipelineError> {
        self.emit(
            record,
            Event::Activity {
                run_id: run_id.to_string(),
                agent: "expert-selector".to_string(),
                msg: "curating finalists".to_string(),
            },
        );

        self.check_stubs_allowed()?;

        if use_stubs() {
            thread::sleep(Duration::from_millis(150));
            let selection = stub_selection(cards);
            self.emit_result(record, run_id, "expert-selector", payload_of(&selection));
            return Ok(selection);
        }

        match self.live_expert_selector(record, run_id, profile, cards) {
            Ok(selection) => Ok(selection),
            Err(e) if self.allow_stubs => {
                self.emit_log(
                    record,
                    run_id,
                    "expert-selector",
                    format!("Falling back to stubbed shortlist due to error: {}", e),
                );
                let selection = stub_selection(cards);
                self.emit_result(record, run_id, "expert-selector", payload_of(&selection));
                Ok(selection)
            }
            Err(e) => Err(e),
        }
    }

    fn live_expert_selector(
        &self,
        record: &SharedRecord,
        run_id: &str,
        profile: &SessionProfile,
        cards: &[NameCard],
    ) -> Result<ExpertSelection, PipelineError> {
        let user_payload = json!({
            "sessionProfile": profile,
            "cards": cards,
        });

        let mut selection: ExpertSelection = run_json_agent(
            &self.prompts,
            "expert-selector",
            &user_payload.to_string(),
            0.3,
        )?;

        // Deduplicate near-misses case-insensitively, keeping the first
        let mut seen_names: HashSet<String> = HashSet::new();
        selection
            .near_misses
            .retain(|miss| seen_names.insert(miss.name.to_lowercase()));

        // Code-enforced filtering: the same rules as the generator stage
        let original_finalist_count = selection.finalists.len();
        let log = |msg: String| self.emit_log(record, run_id, "expert-selector", msg);
        selection.finalists = filter_candidates(selection.finalists, profile, Some(&log));

        // No log callback for near-misses to reduce noise
        let original_miss_count = selection.near_misses.len();
        selection.near_misses = filter_candidates(selection.near_misses, profile, None);

        let filtered_finalists = original_finalist_count - selection.finalists.len();
        let filtered_misses = original_miss_count - selection.near_misses.len();
        if filtered_finalists > 0 || filtered_misses > 0 {
            self.emit_log(
                record,
                run_id,
                "expert-selector",
                format!(
                    "Filtered {} finalists and {} near-misses due to constraint violations",
                    filtered_finalists, filtered_misses
                ),
            );
        }

        selection.drop_shadowed_near_misses();

        self.emit_result(record, run_id, "expert-selector", payload_of(&selection));
        Ok(selection)
    }

    // Stage 4.5: holistic sanity check against the original brief. Never
    // fails the run; model errors leave the selection untouched.
    fn run_sanity_checker(
        &self,
        record: &SharedRecord,
        run_id: &str,
        brief: &str,
        selection: ExpertSelection,
    ) -> Result<ExpertSelection, PipelineError> {
        self.emit(
            record,
            Event::Activity {
                run_id: run_id.to_string(),
                agent: "sanity-checker".to_string(),
                msg: "validating finalists against brief".to_string(),
            },
        );

        self.check_stubs_allowed()?;

        if use_stubs() {
            thread::sleep(Duration::from_millis(50));
            return Ok(selection);
        }

        match self.live_sanity_check(record, run_id, brief, selection.clone()) {
            Ok(checked) => Ok(checked),
            Err(e) => {
                self.emit_log(
                    record,
                    run_id,
                    "sanity-checker",
                    format!("Sanity check skipped due to error: {}", e),
                );
                Ok(selection)
            }
        }
    }

    fn live_sanity_check(
        &self,
        record: &SharedRecord,
        run_id: &str,
        brief: &str,
        mut selection: ExpertSelection,
    ) -> Result<ExpertSelection, PipelineError> {
        let finalist_names: Vec<&str> =
            selection.finalists.iter().map(|f| f.name.as_str()).collect();
        let names_json =
            serde_json::to_string_pretty(&finalist_names).unwrap_or_else(|_| "[]".to_string());

        let user_input = format!(
            "<original-brief>\n{}\n</original-brief>\n\n<finalist-names>\n{}\n</finalist-names>\n\n\
             Perform a holistic sanity check. Flag any names that obviously violate the client's \
             stated requirements.",
            brief, names_json
        );

        let result: SanityCheckResult =
            run_json_agent(&self.prompts, "sanity-checker", &user_input, 0.2)?;

        for flagged in &result.flagged_names {
            self.emit_log(
                record,
                run_id,
                "sanity-checker",
                format!(
                    "Flagged '{}' ({}): {}",
                    flagged.name, flagged.severity, flagged.violation
                ),
            );
        }

        let names_to_remove: HashSet<String> = result
            .flagged_names
            .iter()
            .filter(|f| f.severity == Severity::High && f.recommendation == Recommendation::Remove)
            .map(|f| f.name.to_lowercase())
            .collect();

        if !names_to_remove.is_empty() {
            let original_count = selection.finalists.len();
            selection
                .finalists
                .retain(|f| !names_to_remove.contains(&f.name.to_lowercase()));
            let removed_count = original_count - selection.finalists.len();

            if removed_count > 0 {
                self.emit_log(
                    record,
                    run_id,
                    "sanity-checker",
                    format!("Removed {} finalists due to constraint violations", removed_count),
                );
            }

            selection
                .near_misses
                .retain(|nm| !names_to_remove.contains(&nm.name.to_lowercase()));
        }

        if let Some(notes) = result.notes.as_deref().filter(|n| !n.is_empty()) {
            self.emit_log(
                record,
                run_id,
                "sanity-checker",
                format!("Validation notes: {}", notes),
            );
        }

        self.emit_result(
            record,
            run_id,
            "sanity-checker",
            json!({
                "overall_pass": result.overall_pass,
                "flagged_count": result.flagged_names.len(),
                "approved_count": result.approved_names.len(),
            }),
        );

        Ok(selection)
    }

    // Stage 5: compose the final report (plain markdown, not JSON mode).
    fn run_report_composer(
        &self,
        record: &SharedRecord,
        run_id: &str,
        profile: &SessionProfile,
        cards: &[NameCard],
        selection: &ExpertSelection,
    ) -> Result<Report, PipelineError> {
        self.emit(
            record,
            Event::Activity {
                run_id: run_id.to_string(),
                agent: "report-composer".to_string(),
                msg: "writing consultation".to_string(),
            },
        );

        self.check_stubs_allowed()?;

        if use_stubs() {
            thread::sleep(Duration::from_millis(150));
            return Ok(stub_report(profile, selection));
        }

        match self.live_report_composer(profile, cards, selection) {
            Ok(report) => Ok(report),
            Err(e) if self.allow_stubs => {
                self.emit_log(
                    record,
                    run_id,
                    "report-composer",
                    format!("Falling back to stubbed report due to error: {}", e),
                );
                Ok(stub_report(profile, selection))
            }
            Err(e) => Err(e),
        }
    }

    fn live_report_composer(
        &self,
        profile: &SessionProfile,
        cards: &[NameCard],
        selection: &ExpertSelection,
    ) -> Result<Report, PipelineError> {
        let user_payload = json!({
            "sessionProfile": profile,
            "selection": selection,
            "candidates": cards,
        });

        let segments = self.prompts.load("report-composer")?;
        let content = format!("{}\n\n{}", segments.instruction, user_payload);

        let markdown = call_llm(
            &[Message::user(content)],
            &LlmCallOptions {
                system: Some(segments.system),
                json_mode: false,
                temperature: 0.4,
                ..Default::default()
            },
        )?;

        Ok(compose_report(&markdown, selection))
    }

    fn emit_log(&self, record: &SharedRecord, run_id: &str, agent: &str, msg: String) {
        self.emit(
            record,
            Event::Log {
                run_id: run_id.to_string(),
                agent: agent.to_string(),
                name: None,
                msg,
            },
        );
    }

    fn emit_result(&self, record: &SharedRecord, run_id: &str, agent: &str, payload: Value) {
        self.emit(
            record,
            Event::Result {
                run_id: run_id.to_string(),
                agent: agent.to_string(),
                payload,
            },
        );
    }
}

/// Keep all critical events and the most recent rotatable events, critical
/// partition first, insertion order preserved within each partition.
fn rotate_events(events: &mut Vec<Event>) {
    let mut critical = Vec::new();
    let mut rotatable = Vec::new();

    for event in events.drain(..) {
        if event.is_critical() {
            critical.push(event);
        } else {
            rotatable.push(event);
        }
    }

    let max_rotatable = MAX_EVENTS_PER_RUN.saturating_sub(critical.len());
    let skip = rotatable.len().saturating_sub(max_rotatable);
    critical.extend(rotatable.into_iter().skip(skip));

    *events = critical;
}

fn payload_of<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

fn str_field(item: &Value, field: &str) -> String {
    item.get(field)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Best-effort research tool outputs for one name. Every section degrades to
/// notes when its backing data is unavailable.
fn gather_research_tools(name: &str, region: &str, surname: Option<&str>) -> Value {
    let popularity = get_popularity(name, region);
    let associations = scan_neg_associations(name);

    let timeseries: Vec<Value> = popularity
        .timeseries
        .unwrap_or_default()
        .iter()
        .map(|d| json!({"year": d.year, "rank": d.rank, "count": d.count}))
        .collect();

    let mut tools = json!({
        "heuristics": {
            "ipaSeed": rough_ipa(name),
            "syllables": count_syllables(name),
        },
        "popularity": {
            "timeseries": timeseries,
            "notes": popularity.notes,
        },
        "associations": {
            "items": associations.items,
            "notes": associations.notes,
        },
    });

    if let Some(surname) = surname {
        let celebrity = scan_celebrity_associations(name, surname);
        tools["celebrity_associations"] = json!({
            "items": celebrity.items,
            "notes": celebrity.notes,
        });
    }

    tools
}

/// Post-process the composer's raw markdown into a Report.
///
/// Models occasionally wrap the whole reply in quotes or emit literal `\n`
/// sequences; both are repaired before the summary is lifted from the
/// leading non-header paragraphs.
pub(crate) fn compose_report(raw: &str, selection: &ExpertSelection) -> Report {
    let mut full = raw.trim().to_string();

    if full.len() >= 2
        && ((full.starts_with('"') && full.ends_with('"'))
            || (full.starts_with('\'') && full.ends_with('\'')))
    {
        full = full[1..full.len() - 1].to_string();
    }

    if full.contains("\\n") && !full.contains('\n') {
        full = full.replace("\\n", "\n");
    }

    let paragraphs: Vec<&str> = full
        .split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();

    let mut summary_parts: Vec<&str> = Vec::new();
    let mut summary_len = 0;
    for paragraph in &paragraphs {
        if paragraph.starts_with('#') {
            // Stop at the first header once some content is collected
            if !summary_parts.is_empty() {
                break;
            }
            continue;
        }
        summary_parts.push(paragraph);
        summary_len += paragraph.len();
        if summary_parts.len() >= 2 || summary_len > 400 {
            break;
        }
    }

    let summary = if summary_parts.is_empty() {
        paragraphs.first().copied().unwrap_or_default().to_string()
    } else {
        summary_parts.join("\n\n")
    };

    let combos: Vec<_> = selection
        .finalists
        .iter()
        .filter_map(|f| f.combo.clone())
        .collect();

    Report {
        summary,
        markdown: Some(full),
        loved_names: Some(Vec::new()),
        finalists: selection.finalists.clone(),
        combos: Some(combos),
        tradeoffs: Some(vec!["Review the report for tradeoffs.".to_string()]),
        tie_break_tips: Some(vec!["Read the report for tie-break tips.".to_string()]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schemas::name_card::Combo;
    use crate::schemas::selection::Finalist;

    fn clear_backend_env() {
        env::remove_var("OPENROUTER_API_KEY");
    }

    fn bare_record(service: &OrchestratorService) -> SharedRecord {
        let record = Arc::new(Mutex::new(RunRecord::new(
            "test-run".to_string(),
            "brief".to_string(),
            RunMode::Serial,
        )));
        service
            .runs
            .lock()
            .unwrap()
            .insert("test-run".to_string(), Arc::clone(&record));
        record
    }

    fn log_event(i: usize) -> Event {
        Event::Log {
            run_id: "test-run".to_string(),
            agent: "generator".to_string(),
            name: None,
            msg: format!("log {}", i),
        }
    }

    #[test]
    fn test_rotation_keeps_critical_and_recent_rotatable() {
        let service = OrchestratorService::new(true);
        let record = bare_record(&service);

        // 600 log events with 5 result events scattered among them
        let result_positions = [100, 200, 300, 400, 500];
        let mut log_counter = 0;
        for i in 0..605 {
            if result_positions.contains(&i) {
                service.emit(
                    &record,
                    Event::Result {
                        run_id: "test-run".to_string(),
                        agent: "stage".to_string(),
                        payload: json!(i),
                    },
                );
            } else {
                service.emit(&record, log_event(log_counter));
                log_counter += 1;
            }
        }
        assert_eq!(log_counter, 600);

        let rec = record.lock().unwrap();
        assert_eq!(rec.events.len(), MAX_EVENTS_PER_RUN);

        let results: Vec<&Event> = rec
            .events
            .iter()
            .filter(|e| matches!(e, Event::Result { .. }))
            .collect();
        assert_eq!(results.len(), 5);

        // The 495 most recent logs survive, in insertion order
        let log_msgs: Vec<&str> = rec
            .events
            .iter()
            .filter_map(|e| match e {
                Event::Log { msg, .. } => Some(msg.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(log_msgs.len(), 495);
        assert_eq!(log_msgs[0], "log 105");
        assert_eq!(log_msgs[494], "log 599");
    }

    #[test]
    fn test_rotation_never_drops_critical_events() {
        let service = OrchestratorService::new(true);
        let record = bare_record(&service);

        for i in 0..520 {
            service.emit(
                &record,
                Event::Start {
                    run_id: "test-run".to_string(),
                    agent: "researcher".to_string(),
                    name: Some(format!("name {}", i)),
                },
            );
        }

        // Critical events are all retained even beyond the cap
        let rec = record.lock().unwrap();
        assert_eq!(rec.events.len(), 520);
    }

    #[test]
    fn test_listener_panic_does_not_block_other_listeners() {
        let service = OrchestratorService::new(true);
        let record = bare_record(&service);

        let _bad = service
            .subscribe("test-run", Arc::new(|_| panic!("listener bug")))
            .unwrap();

        let seen = Arc::new(Mutex::new(0usize));
        let seen_clone = Arc::clone(&seen);
        let _good = service
            .subscribe(
                "test-run",
                Arc::new(move |_| {
                    *seen_clone.lock().unwrap() += 1;
                }),
            )
            .unwrap();

        service.emit(&record, log_event(0));
        service.emit(&record, log_event(1));

        assert_eq!(*seen.lock().unwrap(), 2);
        assert_eq!(record.lock().unwrap().events.len(), 2);
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let service = OrchestratorService::new(true);
        let record = bare_record(&service);

        let seen = Arc::new(Mutex::new(0usize));
        let seen_clone = Arc::clone(&seen);
        let subscription = service
            .subscribe(
                "test-run",
                Arc::new(move |_| {
                    *seen_clone.lock().unwrap() += 1;
                }),
            )
            .unwrap();

        service.emit(&record, log_event(0));
        subscription.unsubscribe();
        subscription.unsubscribe();
        service.emit(&record, log_event(1));

        assert_eq!(*seen.lock().unwrap(), 1);
    }

    #[test]
    fn test_subscribe_unknown_run_fails() {
        let service = OrchestratorService::new(true);
        let err = service.subscribe("no-such-run", Arc::new(|_| {})).unwrap_err();
        assert!(matches!(err, PipelineError::RunNotFound(_)));
    }

    #[test]
    fn test_stub_mode_girl_run_end_to_end() {
        clear_backend_env();
        let service = OrchestratorService::new(true);

        let brief = "Surname: Thompson\nSiblings: Oliver, Charlotte\nWe want a girl";
        let run_id = service.start_run(brief, RunMode::Serial);

        let status = service.wait(&run_id, Duration::from_secs(60)).unwrap();
        assert_eq!(status, RunStatus::Completed);

        let record = service.get_run(&run_id).unwrap();
        let rec = record.lock().unwrap();
        assert!(rec.error.is_none());

        let result = rec.result.as_ref().unwrap();
        assert_eq!(result.profile.raw_brief, rec.brief);

        let family = result.profile.family.as_ref().unwrap();
        assert_eq!(family.surname.as_deref(), Some("Thompson"));
        assert_eq!(
            family.siblings.as_deref(),
            Some(["Oliver".to_string(), "Charlotte".to_string()].as_slice())
        );

        assert!(result.candidates.len() <= MAX_SERIAL_NAMES);
        assert!(result
            .candidates
            .iter()
            .all(|card| card.name != "Olive" && card.name != "Oliver"));

        assert!(!result.selection.finalists.is_empty());
        assert!(!result.report.summary.is_empty());

        // Terminal event ordering: the composer result precedes its done event
        let tags: Vec<&str> = rec.events.iter().map(|e| e.tag()).collect();
        let result_pos = rec
            .events
            .iter()
            .position(|e| matches!(e, Event::Result { agent, .. } if agent == "report-composer"))
            .unwrap();
        let done_pos = rec
            .events
            .iter()
            .position(|e| matches!(e, Event::Done { agent, .. } if agent == "report-composer"))
            .unwrap();
        assert!(result_pos < done_pos);
        assert!(tags.contains(&"activity"));
    }

    #[test]
    fn test_stub_mode_selection_is_disjoint() {
        clear_backend_env();
        let service = OrchestratorService::new(true);
        let run_id = service.start_run("We want a boy, surname: Reyes", RunMode::Serial);
        let status = service.wait(&run_id, Duration::from_secs(60)).unwrap();
        assert_eq!(status, RunStatus::Completed);

        let record = service.get_run(&run_id).unwrap();
        let rec = record.lock().unwrap();
        let selection = &rec.result.as_ref().unwrap().selection;

        let finalist_names: HashSet<String> = selection
            .finalists
            .iter()
            .map(|f| f.name.to_lowercase())
            .collect();
        assert!(selection
            .near_misses
            .iter()
            .all(|nm| !finalist_names.contains(&nm.name.to_lowercase())));
    }

    #[test]
    fn test_no_stubs_mode_fails_without_credentials() {
        clear_backend_env();
        let service = OrchestratorService::new(false);
        let run_id = service.start_run("We want a girl", RunMode::Serial);

        let status = service.wait(&run_id, Duration::from_secs(30)).unwrap();
        assert_eq!(status, RunStatus::Failed);

        let record = service.get_run(&run_id).unwrap();
        let rec = record.lock().unwrap();
        assert!(rec.result.is_none());
        let error = rec.error.as_deref().unwrap();
        assert!(error.contains("OPENROUTER_API_KEY"));

        // The failure is also visible on the bus
        assert!(rec.events.iter().any(|e| matches!(
            e,
            Event::Error { agent, .. } if agent == "orchestrator"
        )));
    }

    #[test]
    fn test_run_status_transitions_are_monotonic() {
        clear_backend_env();
        let service = OrchestratorService::new(true);
        let run_id = service.start_run("girl, surname: Quick", RunMode::Serial);

        // Observed statuses may skip states but never regress
        let order = [
            RunStatus::Pending,
            RunStatus::Running,
            RunStatus::Completed,
            RunStatus::Failed,
        ];
        let rank =
            |s: RunStatus| order.iter().position(|o| *o == s).unwrap();

        let mut last = rank(service.run_status(&run_id).unwrap());
        let deadline = Instant::now() + Duration::from_secs(60);
        loop {
            let status = service.run_status(&run_id).unwrap();
            let current = rank(status);
            assert!(current >= last, "status regressed");
            last = current;
            if status.is_terminal() || Instant::now() >= deadline {
                break;
            }
            thread::sleep(Duration::from_millis(20));
        }
        assert_eq!(last, rank(RunStatus::Completed));
    }

    #[test]
    fn test_events_stream_to_subscribers_in_order() {
        clear_backend_env();
        let service = OrchestratorService::new(true);
        let run_id = service.start_run("We want a girl", RunMode::Serial);

        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        let _subscription = service
            .subscribe(
                &run_id,
                Arc::new(move |event| {
                    seen_clone.lock().unwrap().push(event.tag().to_string());
                }),
            )
            .unwrap();

        let status = service.wait(&run_id, Duration::from_secs(60)).unwrap();
        assert_eq!(status, RunStatus::Completed);

        let seen = seen.lock().unwrap();
        // Subscription raced the first stage, but the terminal pair must be
        // present and ordered
        let result_pos = seen.iter().rposition(|t| t == "result").unwrap();
        let done_pos = seen.iter().rposition(|t| t == "done").unwrap();
        assert!(result_pos < done_pos);
    }

    #[test]
    fn test_get_run_unknown_id_is_none() {
        let service = OrchestratorService::new(true);
        assert!(service.get_run("missing").is_none());
        assert!(service.run_status("missing").is_none());
    }

    #[test]
    fn test_compose_report_unwraps_quotes_and_escaped_newlines() {
        let selection = ExpertSelection::default();
        let raw = "\"# Consultation\\n\\nYour shortlist is ready.\\n\\nThree names stood out.\"";
        let report = compose_report(raw, &selection);

        let markdown = report.markdown.as_deref().unwrap();
        assert!(!markdown.starts_with('"'));
        assert!(markdown.contains('\n'));
        assert_eq!(report.summary, "Your shortlist is ready.\n\nThree names stood out.");
    }

    #[test]
    fn test_compose_report_summary_skips_leading_headers() {
        let selection = ExpertSelection::default();
        let raw = "# Title\n\nFirst paragraph of prose.\n\n## Details\n\nMore prose.";
        let report = compose_report(raw, &selection);
        assert_eq!(report.summary, "First paragraph of prose.");
    }

    #[test]
    fn test_compose_report_summary_stops_after_two_paragraphs() {
        let selection = ExpertSelection::default();
        let raw = "Para one.\n\nPara two.\n\nPara three.";
        let report = compose_report(raw, &selection);
        assert_eq!(report.summary, "Para one.\n\nPara two.");
    }

    #[test]
    fn test_compose_report_header_only_falls_back_to_first_paragraph() {
        let selection = ExpertSelection::default();
        let raw = "# Only a header";
        let report = compose_report(raw, &selection);
        assert_eq!(report.summary, "# Only a header");
    }

    #[test]
    fn test_compose_report_collects_finalist_combos() {
        let selection = ExpertSelection {
            finalists: vec![
                Finalist {
                    name: "Iris".to_string(),
                    why: "w".to_string(),
                    combo: Some(Combo {
                        first: "Iris".to_string(),
                        middle: "Maeve".to_string(),
                        why: "flows".to_string(),
                    }),
                },
                Finalist {
                    name: "Wren".to_string(),
                    why: "w".to_string(),
                    combo: None,
                },
            ],
            near_misses: Vec::new(),
        };
        let report = compose_report("Prose.", &selection);
        assert_eq!(report.combos.as_ref().unwrap().len(), 1);
        assert_eq!(report.finalists.len(), 2);
    }

    #[test]
    fn test_agent_concurrency_default() {
        env::remove_var("AGENT_CONCURRENCY");
        assert_eq!(agent_concurrency(), DEFAULT_CONCURRENCY);
    }
}
