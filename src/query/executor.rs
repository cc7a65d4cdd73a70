//! Query Executor
//!
//! Runs an [`ExecutionPlan`] against a [`DataSource`]:
//!
//! ```text
//! FETCH → INCLUDE (for filter) → FILTER → INCLUDE → AGGREGATE → ORDER → LIMIT
//! ```
//!
//! Relationship lookups, `exists` subqueries and per-parent listings fan out
//! with at most `concurrency` requests in flight. Every data source call races the query
//! deadline; a run that hits the deadline or the record cap returns what it
//! has with `truncated` set instead of failing.

use super::aggregate::{apply_having, compute_aggregates, group_and_aggregate, row_value};
use super::ast::{ExistsSubquery, FieldPath, OrderBy, Query, SortDirection};
use super::cursor::{self, CursorPayload};
use super::dates::DateResolver;
use super::error::{QueryError, QueryResult};
use super::filter::{substitute_refs, Evaluator, ExistsAnswers};
use super::parser::{parse_query, parse_query_str, ParseResult};
use super::planner::{DryRunOutput, ExecutionPlan, Planner, Step, StepKind};
use super::progress::{NullProgress, ProgressCallback};
use super::pushdown::classify;
use super::result::{MemberFailure, QueryOutput, ResultSet};
use super::schema::{parent_ids, EntityKind, Relationship};
use crate::config::{ConfigError, EngineConfig, IncludeFailureMode};
use crate::source::{
    DataSource, FetchRequest, FieldSelector, Page, ServerFilter, ServerPredicate, SourceError,
};
use chrono::{FixedOffset, Utc};
use futures_util::future::join_all;
use serde::Serialize;
use serde_json::Value;
use std::cmp::Ordering as CmpOrdering;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Whether to run the query or only plan it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    #[default]
    Live,
    DryRun,
}

/// Either kind of response document
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum EngineOutput {
    Live(QueryOutput),
    DryRun(DryRunOutput),
}

/// Query executor
pub struct QueryExecutor {
    source: Arc<dyn DataSource>,
    config: EngineConfig,
    offset: FixedOffset,
    progress: Arc<dyn ProgressCallback>,
}

impl QueryExecutor {
    /// Create an executor over `source`. Fails on an unusable config.
    pub fn new(source: Arc<dyn DataSource>, config: EngineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let offset = config.offset()?;
        Ok(Self {
            source,
            config,
            offset,
            progress: Arc::new(NullProgress),
        })
    }

    /// Report step progress of live runs to `progress`
    pub fn with_progress(mut self, progress: Arc<dyn ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Parse and run a query given as JSON text
    pub async fn run_str(&self, input: &str, mode: ExecutionMode) -> QueryResult<EngineOutput> {
        let parsed = parse_query_str(input)?;
        self.run_parsed(&parsed, mode).await
    }

    /// Parse and run a query document
    pub async fn run(&self, query: &Value, mode: ExecutionMode) -> QueryResult<EngineOutput> {
        let parsed = parse_query(query)?;
        self.run_parsed(&parsed, mode).await
    }

    async fn run_parsed(&self, parsed: &ParseResult, mode: ExecutionMode) -> QueryResult<EngineOutput> {
        match mode {
            ExecutionMode::Live => self.execute(parsed).await.map(EngineOutput::Live),
            ExecutionMode::DryRun => Ok(EngineOutput::DryRun(self.dry_run(parsed).await)),
        }
    }

    /// Build the plan, sized by the adapter's record count when it has one
    pub async fn plan(&self, parsed: &ParseResult) -> ExecutionPlan {
        let entity = parsed.query.from;
        let count = match self.source.estimate_count(entity).await {
            Ok(count) => count,
            Err(e) => {
                debug!(entity = %entity, error = %e, "record count unavailable");
                None
            }
        };
        Planner::new(&self.config).plan(&parsed.query, count, &parsed.warnings)
    }

    /// Plan without executing: no `fetch` call is made
    pub async fn dry_run(&self, parsed: &ParseResult) -> DryRunOutput {
        let plan = self.plan(parsed).await;
        debug!(steps = plan.steps.len(), "dry run planned");
        plan.to_dry_run()
    }

    /// Execute a parsed query
    pub async fn execute(&self, parsed: &ParseResult) -> QueryResult<QueryOutput> {
        let query = &parsed.query;
        let span = info_span!("query", id = %Uuid::new_v4(), entity = %query.from);

        async move {
            let started = std::time::Instant::now();
            let deadline = Instant::now() + Duration::from_secs(self.config.timeout_secs);

            let resume = match &query.cursor {
                Some(token) => Some(cursor::validate(
                    token,
                    &query.fingerprint,
                    Utc::now().timestamp_millis(),
                    self.config.cursor_ttl_secs,
                )?),
                None => None,
            };

            let plan = self.plan(parsed).await;
            info!(steps = plan.steps.len(), "query started");

            let mut run = Run {
                executor: self,
                query,
                plan: &plan,
                dates: DateResolver::now(self.offset),
                deadline,
                calls: AtomicU64::new(0),
                truncated: false,
                timed_out: false,
                cap_cursor: None,
                failures: Vec::new(),
                warnings: parsed.warnings.clone(),
            };
            let result = run.execute(resume).await?;
            let warnings = std::mem::take(&mut run.warnings);

            info!(
                duration_ms = started.elapsed().as_millis() as u64,
                api_calls = result.api_calls_made,
                records = result.groups.as_ref().map_or(result.records.len(), Vec::len),
                truncated = result.truncated,
                "query finished"
            );

            Ok(result.into_output(
                query.select.as_deref(),
                query.includes(),
                started.elapsed(),
                warnings,
            ))
        }
        .instrument(span)
        .await
    }
}

/// Outcome of one fan-out member
enum Member<T, E> {
    Done(T),
    Failed(E),
    TimedOut,
}

/// Finished members of one fan-out step
struct Tally<'s> {
    step: &'s Step,
    done: AtomicUsize,
    total: usize,
}

impl<'s> Tally<'s> {
    fn new(step: &'s Step, total: usize) -> Self {
        Self {
            step,
            done: AtomicUsize::new(0),
            total,
        }
    }
}

/// State of one live execution
struct Run<'a> {
    executor: &'a QueryExecutor,
    query: &'a Query,
    plan: &'a ExecutionPlan,
    dates: DateResolver,
    deadline: Instant,
    calls: AtomicU64,
    truncated: bool,
    timed_out: bool,
    /// Adapter cursor left over when FETCH stopped at the record cap
    cap_cursor: Option<String>,
    failures: Vec<MemberFailure>,
    warnings: Vec<String>,
}

impl<'a> Run<'a> {
    async fn execute(&mut self, resume: Option<CursorPayload>) -> QueryResult<ResultSet> {
        let skip = resume.as_ref().map_or(0, |r| r.skip);
        let start_cursor = resume.and_then(|r| r.api_cursor);

        let plan = self.plan;
        let progress = self.progress();
        let limit = self.query.limit;
        let streams = self.streams_to_limit();
        let mut items: Vec<Value> = Vec::new();
        let mut aggregated = false;
        // Set once skip and limit have been applied
        let mut has_more: Option<bool> = None;

        for step in &plan.steps {
            debug!(step = step.step_id, kind = ?step.kind, "running step");
            progress.on_step_start(step);

            let input = std::mem::take(&mut items);
            let outcome = match step.kind {
                StepKind::Fetch => {
                    let fetched = self.fetch(step, skip, start_cursor.clone()).await;
                    // Cut the window before INCLUDE fans out over it
                    fetched.map(|mut records| {
                        if streams {
                            has_more = Some(window(&mut records, skip, limit));
                        }
                        records
                    })
                }
                StepKind::Include => self.include(step, input).await,
                StepKind::Filter => self.filter(step, input).await.map(|mut kept| {
                    self.strip_filter_includes(&mut kept);
                    kept
                }),
                StepKind::Aggregate => {
                    aggregated = true;
                    Ok(self.aggregate(&input))
                }
                StepKind::Order => {
                    let mut input = input;
                    if let Some(order_by) = &self.query.order_by {
                        sort_items(&mut input, order_by, aggregated);
                    }
                    Ok(input)
                }
                StepKind::Limit => {
                    let mut input = input;
                    if has_more.is_none() {
                        has_more = Some(window(&mut input, skip, limit));
                    }
                    Ok(input)
                }
            };

            match outcome {
                Ok(output) => {
                    progress.on_step_complete(step, output.len());
                    items = output;
                }
                Err(e) => {
                    progress.on_step_error(step, &e);
                    return Err(e);
                }
            }
        }

        // A resumed cap cursor may skip without a LIMIT step
        let has_more = match has_more {
            Some(has_more) => has_more,
            None => window(&mut items, skip, limit),
        };

        let mut next_cursor = match limit {
            Some(limit) if has_more && limit > 0 => {
                Some(self.cursor(skip + limit, start_cursor.clone()))
            }
            _ => None,
        };
        let mut has_more = has_more;
        if next_cursor.is_none() {
            if let Some(api_cursor) = self.cap_cursor.take() {
                has_more = true;
                next_cursor = Some(self.cursor(0, Some(api_cursor)));
            }
        }
        if self.timed_out {
            next_cursor = None;
        }

        let (records, groups) = if aggregated {
            let rows = items
                .into_iter()
                .filter_map(|item| match item {
                    Value::Object(row) => Some(row),
                    _ => None,
                })
                .collect();
            (Vec::new(), Some(rows))
        } else {
            (items, None)
        };

        Ok(ResultSet {
            records,
            groups,
            truncated: self.truncated,
            api_calls_made: self.calls.load(Ordering::SeqCst),
            cursor: next_cursor,
            has_more,
            failures: std::mem::take(&mut self.failures),
        })
    }

    fn cursor(&self, skip: usize, api_cursor: Option<String>) -> String {
        CursorPayload::new(
            &self.query.fingerprint,
            skip,
            api_cursor,
            Utc::now().timestamp_millis(),
        )
        .encode()
    }

    fn config(&self) -> &'a EngineConfig {
        &self.executor.config
    }

    fn progress(&self) -> &'a dyn ProgressCallback {
        self.executor.progress.as_ref()
    }

    /// Whether no client-side step sits between FETCH and LIMIT
    fn streams_to_limit(&self) -> bool {
        self.plan.client_filter.is_none()
            && !self.query.has_ordering()
            && self.query.aggregate.is_none()
    }

    fn note_cap(&mut self, cap: usize) {
        warn!(cap, "record cap reached");
        self.warnings
            .push(format!("Record cap of {} reached; results are truncated", cap));
        self.truncated = true;
    }

    fn expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    fn mark_timeout(&mut self, stage: &str) {
        self.truncated = true;
        if !self.timed_out {
            self.timed_out = true;
            warn!(stage, timeout_secs = self.config().timeout_secs, "query timed out");
            self.warnings.push(format!(
                "Query timed out after {}s during {}; results are truncated",
                self.config().timeout_secs,
                stage
            ));
        }
    }

    /// One counted call to the data source
    async fn fetch_page(&self, request: FetchRequest) -> Result<Page, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.executor.source.fetch(request).await
    }

    async fn fetch(
        &mut self,
        step: &Step,
        skip: usize,
        start_cursor: Option<String>,
    ) -> QueryResult<Vec<Value>> {
        let entity = self.query.from;
        let cap = self.config().max_records;

        let parent = entity.parent_filter();
        let parents = parent
            .map(|field| parent_ids(self.query.where_clause.as_ref(), field))
            .unwrap_or_default();
        let mut filter = self.plan.server_filter.clone();
        match (parent, parents.as_slice()) {
            (Some(field), [_, _, ..]) => return self.fetch_parents(step, field, &parents).await,
            (Some(field), [id]) => {
                filter = Some(filter.unwrap_or_default().and(ServerPredicate::Reference {
                    field: field.to_string(),
                    value: id.clone(),
                }));
            }
            _ => {}
        }

        // Without a client-side step between FETCH and LIMIT, one record past
        // the page is enough to know whether more remain
        let target = match self.query.limit {
            Some(limit) if self.streams_to_limit() => cap.min(skip + limit + 1),
            _ => cap,
        };

        let mut records: Vec<Value> = Vec::new();
        let mut cursor = start_cursor;
        loop {
            if self.expired() {
                self.mark_timeout("FETCH");
                break;
            }

            let remaining = target.saturating_sub(records.len()).max(1);
            let request = FetchRequest::new(entity, self.config().page_size.min(remaining))
                .fields(self.plan.field_selector.clone())
                .filter(filter.clone())
                .cursor(cursor.clone());

            let page = match timeout_at(self.deadline, self.fetch_page(request)).await {
                Err(_) => {
                    self.mark_timeout("FETCH");
                    break;
                }
                Ok(Err(e)) => return Err(QueryError::source(&format!("FETCH {} failed", entity), e)),
                Ok(Ok(page)) => page,
            };

            debug!(records = page.records.len(), more = page.next_cursor.is_some(), "fetched page");
            records.extend(page.records);
            cursor = page.next_cursor;
            self.progress().on_step_progress(step, records.len(), None);

            if records.len() >= target {
                let overflow = records.len() > target;
                records.truncate(target);
                if target == cap && (cursor.is_some() || overflow) {
                    self.note_cap(cap);
                    self.cap_cursor = cursor;
                }
                break;
            }
            if cursor.is_none() {
                break;
            }
        }

        Ok(records)
    }

    /// List every parent container concurrently and merge in parent order.
    ///
    /// A merged listing has no single adapter cursor, so the cap truncates
    /// without offering one.
    async fn fetch_parents(
        &mut self,
        step: &Step,
        field: &str,
        ids: &[Value],
    ) -> QueryResult<Vec<Value>> {
        let entity = self.query.from;
        let cap = self.config().max_records;
        debug!(parents = ids.len(), field, "fetching per parent");

        let semaphore = Semaphore::new(self.config().concurrency);
        let tally = Tally::new(step, ids.len());
        let outcomes = join_all(ids.iter().map(|id| {
            let filter = self
                .plan
                .server_filter
                .clone()
                .unwrap_or_default()
                .and(ServerPredicate::Reference {
                    field: field.to_string(),
                    value: id.clone(),
                });
            self.guarded(
                &semaphore,
                &tally,
                self.list_all(entity, filter, self.plan.field_selector.clone()),
            )
        }))
        .await;

        let mut records = Vec::new();
        let mut capped = false;
        let mut timed_out = false;
        for (id, outcome) in ids.iter().zip(outcomes) {
            match outcome {
                Member::Done((listed, more)) => {
                    capped |= more;
                    records.extend(listed);
                }
                Member::Failed(e) => {
                    return Err(QueryError::source(
                        &format!("FETCH {} in {} {} failed", entity, field, id),
                        e,
                    ))
                }
                Member::TimedOut => timed_out = true,
            }
        }

        if timed_out {
            self.mark_timeout("FETCH");
        }
        if capped || records.len() > cap {
            records.truncate(cap);
            self.note_cap(cap);
        }
        Ok(records)
    }

    /// Run `work` under a concurrency permit, racing the deadline
    async fn guarded<T, E>(
        &self,
        semaphore: &Semaphore,
        tally: &Tally<'_>,
        work: impl Future<Output = Result<T, E>>,
    ) -> Member<T, E> {
        let Ok(_permit) = semaphore.acquire().await else {
            return Member::TimedOut;
        };
        if self.expired() {
            return Member::TimedOut;
        }
        let outcome = match timeout_at(self.deadline, work).await {
            Err(_) => return Member::TimedOut,
            Ok(Ok(value)) => Member::Done(value),
            Ok(Err(e)) => Member::Failed(e),
        };
        let current = tally.done.fetch_add(1, Ordering::SeqCst) + 1;
        self.progress()
            .on_step_progress(tally.step, current, Some(tally.total));
        outcome
    }

    /// Drain every page of `entity` under `filter`, stopping at the record cap.
    /// The flag tells whether the cap cut the listing short.
    async fn list_all(
        &self,
        entity: EntityKind,
        filter: ServerFilter,
        fields: FieldSelector,
    ) -> Result<(Vec<Value>, bool), SourceError> {
        let cap = self.config().max_records;
        let mut records = Vec::new();
        let mut cursor = None;
        loop {
            let request = FetchRequest::new(entity, self.config().page_size)
                .fields(fields.clone())
                .filter(Some(filter.clone()))
                .cursor(cursor);
            let page = self.fetch_page(request).await?;
            records.extend(page.records);
            match page.next_cursor {
                Some(next) if records.len() < cap => cursor = Some(next),
                Some(_) => return Ok((records, true)),
                None => return Ok((records, false)),
            }
        }
    }

    /// Every record of `relationship` that references `parent`
    async fn fetch_related(
        &self,
        relationship: &'static Relationship,
        parent: &Value,
    ) -> Result<Vec<Value>, SourceError> {
        let Some(id) = parent.get("id").filter(|id| !id.is_null()) else {
            return Ok(Vec::new());
        };
        let filter = ServerFilter::default().and(ServerPredicate::Reference {
            field: relationship.reference_field.to_string(),
            value: id.clone(),
        });
        let (related, _) = self
            .list_all(relationship.target, filter, FieldSelector::All)
            .await?;
        Ok(related)
    }

    async fn include(&mut self, step: &Step, records: Vec<Value>) -> QueryResult<Vec<Value>> {
        let Some(relationship) = step.relationship else {
            return Ok(records);
        };

        let semaphore = Semaphore::new(self.config().concurrency);
        let tally = Tally::new(step, records.len());
        let outcomes = join_all(records.iter().map(|record| {
            self.guarded(&semaphore, &tally, self.fetch_related(relationship, record))
        }))
        .await;

        let mut kept = Vec::with_capacity(records.len());
        let mut dropped = 0usize;
        for (mut record, outcome) in records.into_iter().zip(outcomes) {
            match outcome {
                Member::Done(related) => {
                    set_key(&mut record, relationship.name, Value::Array(related));
                    kept.push(record);
                }
                Member::Failed(e) => {
                    let id = record.get("id").cloned().unwrap_or(Value::Null);
                    match self.config().include_failure {
                        IncludeFailureMode::FailFast => {
                            return Err(QueryError::source(
                                &format!(
                                    "INCLUDE {} failed for {} {}",
                                    relationship.name, self.query.from, id
                                ),
                                e,
                            ));
                        }
                        IncludeFailureMode::Skip => {
                            warn!(relationship = relationship.name, record = %id, error = %e, "include failed, skipping");
                            set_key(&mut record, relationship.name, Value::Null);
                            self.failures.push(MemberFailure {
                                record_id: id,
                                relationship: relationship.name.to_string(),
                                error: e.to_string(),
                            });
                            kept.push(record);
                        }
                    }
                }
                Member::TimedOut => dropped += 1,
            }
        }

        if dropped > 0 {
            debug!(dropped, relationship = relationship.name, "parents dropped at deadline");
            self.mark_timeout("INCLUDE");
        }
        Ok(kept)
    }

    async fn filter(&mut self, step: &Step, records: Vec<Value>) -> QueryResult<Vec<Value>> {
        let plan = self.plan;
        let Some(clause) = plan.client_filter.as_ref() else {
            return Ok(records);
        };

        let nodes = clause.exists_nodes();
        let answers: Vec<Option<ExistsAnswers>> = if nodes.is_empty() {
            records.iter().map(|_| Some(ExistsAnswers::default())).collect()
        } else {
            self.answer_exists(step, &nodes, &records).await?
        };

        let before = records.len();
        let dates = &self.dates;
        let kept: Vec<Value> = records
            .into_iter()
            .zip(answers)
            .filter_map(|(record, answers)| {
                let answers = answers?;
                Evaluator::new(dates)
                    .with_oracle(&answers)
                    .matches(clause, &record)
                    .then_some(record)
            })
            .collect();

        debug!(before, after = kept.len(), "filtered");
        Ok(kept)
    }

    /// Precompute every `exists` answer per record. `None` drops the record.
    async fn answer_exists(
        &mut self,
        step: &Step,
        nodes: &[&ExistsSubquery],
        records: &[Value],
    ) -> QueryResult<Vec<Option<ExistsAnswers>>> {
        let semaphore = Semaphore::new(self.config().concurrency);
        let tally = Tally::new(step, records.len());
        let outcomes = join_all(records.iter().map(|record| {
            self.guarded(&semaphore, &tally, self.exists_for_record(nodes, record))
        }))
        .await;

        let mut answers = Vec::with_capacity(records.len());
        let mut timed_out = false;
        for (record, outcome) in records.iter().zip(outcomes) {
            match outcome {
                Member::Done(found) => answers.push(Some(found)),
                Member::Failed((node, e)) => {
                    let id = record.get("id").cloned().unwrap_or(Value::Null);
                    let relationship = format!("exists:{}", node.from);
                    match self.config().include_failure {
                        IncludeFailureMode::FailFast => {
                            return Err(QueryError::source(
                                &format!("{} failed for {} {}", relationship, self.query.from, id),
                                e,
                            ));
                        }
                        IncludeFailureMode::Skip => {
                            warn!(relationship = %relationship, record = %id, error = %e, "subquery failed, skipping record");
                            self.failures.push(MemberFailure {
                                record_id: id,
                                relationship,
                                error: e.to_string(),
                            });
                            answers.push(None);
                        }
                    }
                }
                Member::TimedOut => {
                    timed_out = true;
                    answers.push(None);
                }
            }
        }

        if timed_out {
            self.mark_timeout("FILTER");
        }
        Ok(answers)
    }

    async fn exists_for_record<'n>(
        &self,
        nodes: &[&'n ExistsSubquery],
        record: &Value,
    ) -> Result<ExistsAnswers, (&'n ExistsSubquery, SourceError)> {
        let mut answers = HashMap::new();
        for &node in nodes {
            let found = self
                .exists_for(node, record)
                .await
                .map_err(|e| (node, e))?;
            answers.insert(node.id, found);
        }
        Ok(ExistsAnswers(answers))
    }

    /// Whether any `node.from` record matches for this outer record
    async fn exists_for(&self, node: &ExistsSubquery, outer: &Value) -> Result<bool, SourceError> {
        let condition = node
            .condition
            .as_deref()
            .map(|clause| substitute_refs(clause, outer));
        let split = classify(condition.as_ref());

        let mut filter = split.server.unwrap_or_default();
        if let Some(via) = &node.via {
            let Some(id) = outer.get("id").filter(|id| !id.is_null()) else {
                return Ok(false);
            };
            filter = filter.and(ServerPredicate::Reference {
                field: via.clone(),
                value: id.clone(),
            });
        }
        let filter = (!filter.is_empty()).then_some(filter);

        let mut cursor = None;
        let mut scanned = 0usize;
        loop {
            let request = FetchRequest::new(node.from, self.config().page_size)
                .filter(filter.clone())
                .cursor(cursor);
            let page = self.fetch_page(request).await?;
            scanned += page.records.len();

            let evaluator = Evaluator::new(&self.dates);
            let matched = page.records.iter().any(|candidate| {
                split
                    .client
                    .as_ref()
                    .map_or(true, |clause| evaluator.matches(clause, candidate))
            });
            if matched {
                return Ok(true);
            }
            match page.next_cursor {
                Some(next) if scanned < self.config().max_records => cursor = Some(next),
                _ => return Ok(false),
            }
        }
    }

    /// Remove relationships that were only fetched to evaluate the filter
    fn strip_filter_includes(&self, records: &mut [Value]) {
        let names: Vec<&str> = self
            .plan
            .steps
            .iter()
            .filter(|step| step.for_filter)
            .filter_map(|step| step.relationship.map(|r| r.name))
            .collect();
        if names.is_empty() {
            return;
        }
        for record in records.iter_mut() {
            if let Value::Object(map) = record {
                for name in &names {
                    map.remove(*name);
                }
            }
        }
    }

    fn aggregate(&mut self, records: &[Value]) -> Vec<Value> {
        let query = self.query;
        let Some(spec) = &query.aggregate else {
            return records.to_vec();
        };

        if self.truncated {
            warn!("skipping aggregation over truncated input");
            self.warnings.push(
                "Results were truncated before aggregation; aggregates were not computed".to_string(),
            );
            return Vec::new();
        }

        let refs: Vec<&Value> = records.iter().collect();
        let rows = match &query.group_by {
            Some(group_by) => group_and_aggregate(spec, group_by, &refs),
            None => vec![compute_aggregates(spec, &refs)],
        };
        let rows = match &query.having {
            Some(having) => apply_having(rows, having, &Evaluator::new(&self.dates)),
            None => rows,
        };

        debug!(input = records.len(), rows = rows.len(), "aggregated");
        rows.into_iter().map(Value::Object).collect()
    }
}

/// Drop the first `skip` items and cut at `limit`. Returns whether items
/// remained past the limit.
fn window(items: &mut Vec<Value>, skip: usize, limit: Option<usize>) -> bool {
    items.drain(..skip.min(items.len()));
    match limit {
        Some(limit) if items.len() > limit => {
            items.truncate(limit);
            true
        }
        _ => false,
    }
}

fn set_key(record: &mut Value, key: &str, value: Value) {
    if let Value::Object(map) = record {
        map.insert(key.to_string(), value);
    }
}

/// Stable multi-key sort. Nulls sort last ascending and first descending.
fn sort_items(items: &mut [Value], order_by: &[OrderBy], aggregated: bool) {
    items.sort_by(|a, b| {
        order_by
            .iter()
            .map(|key| {
                let ordering = compare_sort_values(
                    sort_value(a, &key.field, aggregated).as_ref(),
                    sort_value(b, &key.field, aggregated).as_ref(),
                );
                match key.direction {
                    SortDirection::Asc => ordering,
                    SortDirection::Desc => ordering.reverse(),
                }
            })
            .find(|ordering| *ordering != CmpOrdering::Equal)
            .unwrap_or(CmpOrdering::Equal)
    });
}

/// Aggregate rows are keyed by the raw path text, records are walked
fn sort_value(item: &Value, path: &FieldPath, aggregated: bool) -> Option<Value> {
    let value = if aggregated {
        row_value(item, path)
    } else {
        path.resolve(item)
    };
    value.map(|v| v.into_owned())
}

fn compare_sort_values(a: Option<&Value>, b: Option<&Value>) -> CmpOrdering {
    let a = a.filter(|v| !v.is_null());
    let b = b.filter(|v| !v.is_null());
    match (a, b) {
        (None, None) => CmpOrdering::Equal,
        (None, Some(_)) => CmpOrdering::Greater,
        (Some(_), None) => CmpOrdering::Less,
        (Some(a), Some(b)) => type_rank(a).cmp(&type_rank(b)).then_with(|| match (a, b) {
            (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
            (Value::Number(x), Value::Number(y)) => x
                .as_f64()
                .unwrap_or(0.0)
                .total_cmp(&y.as_f64().unwrap_or(0.0)),
            (Value::String(x), Value::String(y)) => x.cmp(y),
            _ => a.to_string().cmp(&b.to_string()),
        }),
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Bool(_) => 0,
        Value::Number(_) => 1,
        Value::String(_) => 2,
        _ => 3,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::schema::EntityKind;
    use crate::source::MemorySource;
    use serde_json::json;

    fn persons() -> Vec<Value> {
        vec![
            json!({"id": 1, "name": "Alice", "emails": ["alice@acme.com"], "fields": {"Tier": "Gold", "Employer": "Acme"}}),
            json!({"id": 2, "name": "Bob", "emails": ["bob@example.com"], "fields": {"Tier": "Silver", "Employer": "Umbrella"}}),
            json!({"id": 3, "name": "Carol", "emails": ["carol@acme.com"], "fields": {"Tier": "Gold", "Employer": "Globex"}}),
            json!({"id": 4, "name": "Dave", "emails": [], "fields": {"Tier": null}}),
            json!({"id": 5, "name": "Erin", "emails": ["erin@other.org"], "fields": {}}),
        ]
    }

    fn source() -> MemorySource {
        MemorySource::new()
            .with_records(EntityKind::Persons, persons())
            .with_records(
                EntityKind::Companies,
                vec![
                    json!({"id": 10, "name": "Acme", "personIds": [1, 3]}),
                    json!({"id": 11, "name": "Globex", "personIds": [2]}),
                    json!({"id": 12, "name": "Initech", "personIds": [99]}),
                ],
            )
            .with_records(
                EntityKind::Interactions,
                vec![
                    json!({"id": 100, "type": "meeting", "personIds": [1]}),
                    json!({"id": 101, "type": "email", "personIds": [1, 2]}),
                    json!({"id": 102, "type": "email", "personIds": [3]}),
                ],
            )
            .with_records(
                EntityKind::Opportunities,
                vec![
                    json!({"id": 20, "name": "Deal A", "fields": {"Status": "Active", "Amount": 100}}),
                    json!({"id": 21, "name": "Deal B", "fields": {"Status": "Closed", "Amount": 50}}),
                    json!({"id": 22, "name": "Deal C", "fields": {"Status": "Active", "Amount": 25}}),
                ],
            )
    }

    fn executor(source: Arc<MemorySource>, config: EngineConfig) -> QueryExecutor {
        QueryExecutor::new(source, config).unwrap()
    }

    async fn live(executor: &QueryExecutor, query: Value) -> QueryOutput {
        match executor.run(&query, ExecutionMode::Live).await.unwrap() {
            EngineOutput::Live(output) => output,
            other => panic!("expected live output, got {:?}", other),
        }
    }

    fn ids(output: &QueryOutput) -> Vec<i64> {
        output.data.iter().filter_map(|r| r["id"].as_i64()).collect()
    }

    #[tokio::test]
    async fn test_filter_contains_over_array() {
        let source = Arc::new(source());
        let executor = executor(source.clone(), EngineConfig::default());

        let output = live(
            &executor,
            json!({"from": "persons", "where": {"path": "emails", "op": "contains", "value": "ACME.com"}}),
        )
        .await;

        assert_eq!(ids(&output), vec![1, 3]);
        assert!(!output.meta.truncated);
        assert_eq!(output.meta.api_calls_made, 1);
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn test_group_by_count() {
        let executor = executor(Arc::new(source()), EngineConfig::default());

        let output = live(
            &executor,
            json!({
                "from": "opportunities",
                "groupBy": "fields.Status",
                "aggregate": {"n": {"count": true}, "total": {"sum": "fields.Amount"}},
                "orderBy": [{"field": "n", "direction": "desc"}]
            }),
        )
        .await;

        assert_eq!(
            output.data,
            vec![
                json!({"fields.Status": "Active", "n": 2, "total": 125}),
                json!({"fields.Status": "Closed", "n": 1, "total": 50}),
            ]
        );
    }

    #[tokio::test]
    async fn test_having_filters_groups() {
        let executor = executor(Arc::new(source()), EngineConfig::default());

        let output = live(
            &executor,
            json!({
                "from": "opportunities",
                "groupBy": "fields.Status",
                "aggregate": {"n": {"count": true}},
                "having": {"path": "n", "op": "gte", "value": 2}
            }),
        )
        .await;

        assert_eq!(output.data, vec![json!({"fields.Status": "Active", "n": 2})]);
    }

    #[tokio::test]
    async fn test_invalid_query_makes_no_calls() {
        let source = Arc::new(source());
        let executor = executor(source.clone(), EngineConfig::default());

        let err = executor
            .run(
                &json!({"from": "persons", "include": ["companies"], "aggregate": {"n": {"count": true}}}),
                ExecutionMode::Live,
            )
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "QueryValidationError");
        assert_eq!(err.field(), Some("aggregate"));
        assert_eq!(source.calls(), 0);
    }

    #[tokio::test]
    async fn test_dry_run_estimates_n_plus_one() {
        let source = Arc::new(source());
        let executor = executor(source.clone(), EngineConfig::default());

        let output = executor
            .run(&json!({"from": "persons", "include": ["companies"]}), ExecutionMode::DryRun)
            .await
            .unwrap();

        let EngineOutput::DryRun(dry) = output else {
            panic!("expected dry-run output");
        };
        assert_eq!(dry.estimated.api_calls, 1 + 5);
        assert_eq!(dry.steps.len(), 2);
        assert_eq!(source.calls(), 0);
    }

    #[tokio::test]
    async fn test_zero_timeout_truncates_without_calls() {
        let source = Arc::new(source());
        let config = EngineConfig {
            timeout_secs: 0,
            ..Default::default()
        };
        let executor = executor(source.clone(), config);

        let output = live(&executor, json!({"from": "persons"})).await;

        assert!(output.meta.truncated);
        assert!(output.data.is_empty());
        assert!(output.meta.pagination.is_none());
        assert_eq!(source.calls(), 0);
        assert!(output.warnings.iter().any(|w| w.contains("timed out")));
    }

    #[tokio::test]
    async fn test_record_cap_truncates_and_resumes() {
        let source = Arc::new(source());
        let config = EngineConfig {
            max_records: 3,
            page_size: 2,
            ..Default::default()
        };
        let executor = executor(source.clone(), config);

        let first = live(&executor, json!({"from": "persons"})).await;
        assert_eq!(ids(&first), vec![1, 2, 3]);
        assert!(first.meta.truncated);
        assert_eq!(first.meta.api_calls_made, 2);
        let pagination = first.meta.pagination.clone().unwrap();
        assert!(pagination.has_more);

        let second = live(
            &executor,
            json!({"from": "persons", "cursor": pagination.next_cursor.unwrap()}),
        )
        .await;
        assert_eq!(ids(&second), vec![4, 5]);
        assert!(!second.meta.truncated);
        assert!(second.meta.pagination.is_none());
    }

    #[tokio::test]
    async fn test_aggregate_skipped_when_truncated() {
        let config = EngineConfig {
            max_records: 2,
            ..Default::default()
        };
        let executor = executor(Arc::new(source()), config);

        let output = live(
            &executor,
            json!({"from": "persons", "aggregate": {"n": {"count": true}}}),
        )
        .await;

        assert!(output.meta.truncated);
        assert!(output.data.is_empty());
        assert!(output.warnings.iter().any(|w| w.contains("aggregates were not computed")));
    }

    #[tokio::test]
    async fn test_limit_cursor_pages_through_ordered_results() {
        let executor = executor(Arc::new(source()), EngineConfig::default());
        let query = json!({
            "from": "persons",
            "orderBy": [{"field": "name", "direction": "desc"}],
            "limit": 2
        });

        let first = live(&executor, query.clone()).await;
        assert_eq!(ids(&first), vec![5, 4]);
        let cursor = first.meta.pagination.unwrap().next_cursor.unwrap();

        let mut next = query.clone();
        next["cursor"] = json!(cursor);
        let second = live(&executor, next).await;
        assert_eq!(ids(&second), vec![3, 2]);
        let cursor = second.meta.pagination.unwrap().next_cursor.unwrap();

        let mut last = query.clone();
        last["cursor"] = json!(cursor);
        let third = live(&executor, last).await;
        assert_eq!(ids(&third), vec![1]);
        assert!(third.meta.pagination.is_none());
    }

    #[tokio::test]
    async fn test_cursor_from_other_query_rejected() {
        let executor = executor(Arc::new(source()), EngineConfig::default());
        let first = live(&executor, json!({"from": "persons", "limit": 2})).await;
        let cursor = first.meta.pagination.unwrap().next_cursor.unwrap();

        let err = executor
            .run(&json!({"from": "persons", "limit": 3, "cursor": cursor}), ExecutionMode::Live)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Query does not match cursor");
    }

    #[tokio::test]
    async fn test_include_preserves_order_under_concurrency() {
        let source = Arc::new(source().with_latency(Duration::from_millis(5)));
        let config = EngineConfig {
            concurrency: 2,
            ..Default::default()
        };
        let executor = executor(source.clone(), config);

        let output = live(
            &executor,
            json!({"from": "persons", "select": ["id"], "include": ["companies"]}),
        )
        .await;

        assert_eq!(ids(&output), vec![1, 2, 3, 4, 5]);
        assert_eq!(output.data[0], json!({"id": 1, "companies": [{"id": 10, "name": "Acme", "personIds": [1, 3]}]}));
        assert_eq!(output.data[3]["companies"], json!([]));
        assert_eq!(output.meta.api_calls_made, 1 + 5);
    }

    #[tokio::test]
    async fn test_include_failure_fail_fast() {
        let source = Arc::new(source().fail_reference(json!(2)));
        let executor = executor(source, EngineConfig::default());

        let err = executor
            .run(&json!({"from": "persons", "include": ["companies"]}), ExecutionMode::Live)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "QueryExecutionError");
        assert!(err.to_string().starts_with("INCLUDE companies failed for persons 2"));
    }

    #[tokio::test]
    async fn test_include_failure_skip_mode() {
        let source = Arc::new(source().fail_reference(json!(2)));
        let config = EngineConfig {
            include_failure: IncludeFailureMode::Skip,
            ..Default::default()
        };
        let executor = executor(source, config);

        let output = live(&executor, json!({"from": "persons", "include": ["companies"]})).await;

        assert_eq!(output.data.len(), 5);
        assert_eq!(output.data[1]["companies"], Value::Null);
        assert_eq!(output.meta.failures.len(), 1);
        assert_eq!(output.meta.failures[0].record_id, json!(2));
        assert_eq!(output.meta.failures[0].relationship, "companies");
    }

    #[tokio::test]
    async fn test_quantifier_include_is_stripped() {
        let executor = executor(Arc::new(source()), EngineConfig::default());

        let output = live(
            &executor,
            json!({"from": "persons", "where": {"none": {"path": "interactions",
                "where": {"path": "type", "op": "eq", "value": "meeting"}}}}),
        )
        .await;

        assert_eq!(ids(&output), vec![2, 3, 4, 5]);
        assert!(output.data.iter().all(|r| r.get("interactions").is_none()));
    }

    #[tokio::test]
    async fn test_quantifier_include_kept_when_requested() {
        let executor = executor(Arc::new(source()), EngineConfig::default());

        let output = live(
            &executor,
            json!({
                "from": "persons",
                "include": ["interactions"],
                "where": {"path": "interactions._count", "op": "gte", "value": 2}
            }),
        )
        .await;

        assert_eq!(ids(&output), vec![1]);
        assert_eq!(output.data[0]["interactions"].as_array().map(Vec::len), Some(2));
    }

    #[tokio::test]
    async fn test_exists_via_and_ref() {
        let executor = executor(Arc::new(source()), EngineConfig::default());

        let via = live(
            &executor,
            json!({"from": "persons", "where": {"exists": {"from": "interactions", "via": "personIds",
                "where": {"path": "type", "op": "eq", "value": "email"}}}}),
        )
        .await;
        assert_eq!(ids(&via), vec![1, 2, 3]);

        let by_ref = live(
            &executor,
            json!({"from": "persons", "where": {"exists": {"from": "companies",
                "where": {"path": "name", "op": "eq", "value": {"$ref": "fields.Employer"}}}}}),
        )
        .await;
        assert_eq!(ids(&by_ref), vec![1, 3]);
    }

    #[tokio::test]
    async fn test_pushdown_and_projection() {
        let source = Arc::new(source());
        let executor = executor(source.clone(), EngineConfig::default());

        let output = live(
            &executor,
            json!({
                "from": "opportunities",
                "select": ["name", "fields.Amount"],
                "where": {"path": "fields.Status", "op": "eq", "value": "Active"},
                "orderBy": [{"field": "fields.Amount", "direction": "asc"}]
            }),
        )
        .await;

        assert_eq!(
            output.data,
            vec![
                json!({"name": "Deal C", "fields": {"Amount": 25}}),
                json!({"name": "Deal A", "fields": {"Amount": 100}}),
            ]
        );
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn test_select_projects_group_rows() {
        let executor = executor(Arc::new(source()), EngineConfig::default());

        let output = live(
            &executor,
            json!({
                "from": "opportunities",
                "groupBy": "fields.Status",
                "aggregate": {"n": {"count": true}, "total": {"sum": "fields.Amount"}},
                "select": ["fields.Status", "n"]
            }),
        )
        .await;

        assert_eq!(
            output.data,
            vec![
                json!({"fields.Status": "Active", "n": 2}),
                json!({"fields.Status": "Closed", "n": 1}),
            ]
        );
    }

    #[tokio::test]
    async fn test_having_on_dotted_group_by() {
        let executor = executor(Arc::new(source()), EngineConfig::default());

        let output = live(
            &executor,
            json!({
                "from": "opportunities",
                "groupBy": "fields.Status",
                "aggregate": {"n": {"count": true}},
                "having": {"path": "fields.Status", "op": "eq", "value": "Active"},
                "orderBy": [{"field": "fields.Status"}]
            }),
        )
        .await;

        assert_eq!(output.data, vec![json!({"fields.Status": "Active", "n": 2})]);
    }

    #[derive(Default)]
    struct RecordingProgress {
        events: std::sync::Mutex<Vec<String>>,
    }

    impl RecordingProgress {
        fn push(&self, event: String) {
            self.events.lock().unwrap().push(event);
        }

        fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }
    }

    impl ProgressCallback for RecordingProgress {
        fn on_step_start(&self, step: &Step) {
            self.push(format!("start {:?}", step.kind));
        }

        fn on_step_progress(&self, step: &Step, current: usize, total: Option<usize>) {
            self.push(format!("progress {:?} {}/{:?}", step.kind, current, total));
        }

        fn on_step_complete(&self, step: &Step, records: usize) {
            self.push(format!("complete {:?} {}", step.kind, records));
        }

        fn on_step_error(&self, step: &Step, _error: &QueryError) {
            self.push(format!("error {:?}", step.kind));
        }
    }

    #[tokio::test]
    async fn test_progress_reports_steps_and_members() {
        let progress = Arc::new(RecordingProgress::default());
        let executor = executor(Arc::new(source()), EngineConfig::default())
            .with_progress(progress.clone());

        live(&executor, json!({"from": "persons", "include": ["companies"]})).await;

        assert_eq!(
            progress.events(),
            vec![
                "start Fetch",
                "progress Fetch 5/None",
                "complete Fetch 5",
                "start Include",
                "progress Include 1/Some(5)",
                "progress Include 2/Some(5)",
                "progress Include 3/Some(5)",
                "progress Include 4/Some(5)",
                "progress Include 5/Some(5)",
                "complete Include 5",
            ]
        );
    }

    #[tokio::test]
    async fn test_progress_reports_step_error() {
        let progress = Arc::new(RecordingProgress::default());
        let executor = executor(
            Arc::new(source().fail_reference(json!(2))),
            EngineConfig::default(),
        )
        .with_progress(progress.clone());

        let result = executor
            .run(&json!({"from": "persons", "include": ["companies"]}), ExecutionMode::Live)
            .await;

        assert!(result.is_err());
        let events = progress.events();
        assert_eq!(events.last().map(String::as_str), Some("error Include"));
        assert!(!events.iter().any(|e| e == "complete Include 5"));
    }

    fn list_entries() -> MemorySource {
        source().with_records(
            EntityKind::ListEntries,
            vec![
                json!({"id": 1, "listId": 7, "entityId": 1, "fields": {"Stage": "Lead"}}),
                json!({"id": 2, "listId": 8, "entityId": 2, "fields": {"Stage": "Won"}}),
                json!({"id": 3, "listId": 7, "entityId": 3, "fields": {"Stage": "Won"}}),
                json!({"id": 4, "listId": 9, "entityId": 4, "fields": {"Stage": "Lead"}}),
            ],
        )
    }

    #[tokio::test]
    async fn test_list_entries_single_parent() {
        let source = Arc::new(list_entries());
        let executor = executor(source.clone(), EngineConfig::default());

        let output = live(
            &executor,
            json!({"from": "listEntries", "where": {"path": "listId", "op": "eq", "value": 7}}),
        )
        .await;

        assert_eq!(ids(&output), vec![1, 3]);
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn test_list_entries_fan_out_per_parent() {
        let source = Arc::new(list_entries());
        let executor = executor(source.clone(), EngineConfig::default());

        let output = live(
            &executor,
            json!({"from": "listEntries", "where": {"and": [
                {"or": [
                    {"path": "listId", "op": "eq", "value": 8},
                    {"path": "listId", "op": "eq", "value": 7}
                ]},
                {"path": "fields.Stage", "op": "eq", "value": "Won"}
            ]}}),
        )
        .await;

        assert_eq!(ids(&output), vec![2, 3]);
        assert_eq!(output.meta.api_calls_made, 2);
    }

    #[tokio::test]
    async fn test_list_entries_without_parent_rejected() {
        let source = Arc::new(list_entries());
        let executor = executor(source.clone(), EngineConfig::default());

        let err = executor
            .run(&json!({"from": "listEntries"}), ExecutionMode::Live)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "QueryValidationError");
        assert_eq!(err.field(), Some("where"));
        assert_eq!(source.calls(), 0);
    }

    #[tokio::test]
    async fn test_list_entries_parent_failure() {
        let source = Arc::new(list_entries().fail_reference(json!(8)));
        let executor = executor(source, EngineConfig::default());

        let err = executor
            .run(
                &json!({"from": "listEntries", "where": {"path": "listId", "op": "in", "value": [7, 8]}}),
                ExecutionMode::Live,
            )
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "QueryExecutionError");
        assert!(err.to_string().starts_with("FETCH listEntries in listId 8 failed"));
    }

    #[tokio::test]
    async fn test_fan_out_respects_concurrency() {
        let source = Arc::new(source().with_latency(Duration::from_millis(20)));
        let config = EngineConfig {
            concurrency: 2,
            ..Default::default()
        };
        let executor = executor(source.clone(), config);

        live(&executor, json!({"from": "persons", "include": ["companies"]})).await;
        assert_eq!(source.max_in_flight(), 2);

        live(
            &executor,
            json!({"from": "persons", "where": {"exists": {"from": "interactions", "via": "personIds"}}}),
        )
        .await;
        assert_eq!(source.max_in_flight(), 2);
    }

    #[tokio::test]
    async fn test_exists_failure_skip_mode() {
        let source = Arc::new(source().fail_reference(json!(2)));
        let config = EngineConfig {
            include_failure: IncludeFailureMode::Skip,
            ..Default::default()
        };
        let executor = executor(source, config);

        let output = live(
            &executor,
            json!({"from": "persons", "where": {"exists": {"from": "interactions", "via": "personIds"}}}),
        )
        .await;

        assert_eq!(ids(&output), vec![1, 3]);
        assert!(!output.meta.truncated);
        assert_eq!(output.meta.failures.len(), 1);
        assert_eq!(output.meta.failures[0].record_id, json!(2));
        assert_eq!(output.meta.failures[0].relationship, "exists:interactions");
    }

    #[tokio::test]
    async fn test_timeout_during_include_keeps_finished_parents() {
        let source = Arc::new(source().with_latency(Duration::from_millis(400)));
        let config = EngineConfig {
            timeout_secs: 1,
            concurrency: 1,
            ..Default::default()
        };
        let executor = executor(source.clone(), config);

        let output = live(&executor, json!({"from": "persons", "include": ["companies"]})).await;

        // FETCH ends near 400ms, the first lookup near 800ms, the second is cut
        assert_eq!(ids(&output), vec![1]);
        assert!(output.meta.truncated);
        assert!(output.meta.pagination.is_none());
        assert!(output.warnings.iter().any(|w| w.contains("during INCLUDE")));
        assert_eq!(output.meta.api_calls_made, 3);
    }

    #[tokio::test]
    async fn test_limit_applied_before_include() {
        let executor = executor(Arc::new(source()), EngineConfig::default());
        let query = json!({"from": "persons", "include": ["companies"], "limit": 2});

        let first = live(&executor, query.clone()).await;
        assert_eq!(ids(&first), vec![1, 2]);
        assert_eq!(first.meta.api_calls_made, 1 + 2);
        let cursor = first.meta.pagination.unwrap().next_cursor.unwrap();

        let mut next = query.clone();
        next["cursor"] = json!(cursor);
        let second = live(&executor, next).await;
        assert_eq!(ids(&second), vec![3, 4]);
        assert_eq!(second.meta.api_calls_made, 1 + 2);
    }

    #[test]
    fn test_sort_nulls_last_ascending_first_descending() {
        let path = FieldPath::parse("fields.Tier").unwrap();
        let mut items = persons();
        sort_items(
            &mut items,
            &[OrderBy { field: path.clone(), direction: SortDirection::Asc }],
            false,
        );
        let names: Vec<&str> = items.iter().filter_map(|r| r["name"].as_str()).collect();
        assert_eq!(names, vec!["Alice", "Carol", "Bob", "Dave", "Erin"]);

        sort_items(
            &mut items,
            &[OrderBy { field: path, direction: SortDirection::Desc }],
            false,
        );
        let names: Vec<&str> = items.iter().filter_map(|r| r["name"].as_str()).collect();
        assert_eq!(names, vec!["Dave", "Erin", "Bob", "Alice", "Carol"]);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = EngineConfig {
            concurrency: 0,
            ..Default::default()
        };
        assert!(QueryExecutor::new(Arc::new(MemorySource::new()), config).is_err());
    }
}
