use crate::cache::{CachePolicy, Clock, SystemClock, TtlCache};
use crate::clusters::{ClusterMatcher, ClusterResult};
use crate::document::RawDocument;
use crate::error::{AnalyticsError, Result};
use crate::rates::SignalItem;
use crate::schema::{
    build_top_list, candidate_columns, columns_of, normalize_drug_name, resolve_fields, ExposureType,
    ResolvedFields, TopListEntry,
};
use crate::tokenizer::{boost_terms, merge_frequencies, rank_top, TermWeight, Tokenizer, BOOST_FACTOR};
use crate::upstream::DataSource;
use chrono::{DateTime, Days, NaiveDate, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// Label sections feeding the word cloud.
pub const WORD_CLOUD_FIELDS: &[&str] = &["adverse_reactions", "warnings_and_cautions", "warnings", "boxed_warning"];

/// Label sections scanned for interaction clusters.
pub const CLUSTER_FIELDS: &[&str] = &["drug_interactions", "drug_and_or_laboratory_test_interactions"];

const WORD_CLOUD_KEY: &str = "wordcloud";
const CLUSTERS_KEY: &str = "clusters";
const TOP_LIST_KEY: &str = "exposure-top-list";

const RATE_NOTE: &str = "Reports per 100k exposed is a relative signal only; it does not imply causation.";

/// Tunables for the pipelines.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub cache_ttl: Duration,
    pub label_limit: usize,
    pub top_terms: usize,
    pub event_lookback_days: i64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(6 * 60 * 60),
            label_limit: 100,
            top_terms: 80,
            event_lookback_days: 365,
        }
    }
}

// ========== Reports ==========

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WordCloudReport {
    pub generated_at: DateTime<Utc>,
    pub document_count: usize,
    pub terms: Vec<TermWeight>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug: Option<WordCloudDebug>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WordCloudDebug {
    pub fields: Vec<&'static str>,
    pub unique_terms: usize,
    pub total_tokens: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterReport {
    pub generated_at: DateTime<Utc>,
    pub document_count: usize,
    pub clusters: Vec<ClusterResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug: Option<ClusterDebug>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterDebug {
    pub fields: Vec<&'static str>,
    pub documents_with_text: usize,
    pub dictionary_size: usize,
}

/// How the adverse-event count was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventLookup {
    Fuzzy,
    Exact,
    /// Both queries failed; the reported count of zero is unverified.
    Failed,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalsReport {
    pub generated_at: DateTime<Utc>,
    pub drug: String,
    pub signal: SignalItem,
    pub exposure_type: ExposureType,
    pub top_list: Vec<TopListEntry>,
    pub note: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug: Option<SignalsDebug>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalsDebug {
    pub fields: ResolvedFields,
    pub candidate_columns: Vec<String>,
    pub row_count: usize,
    pub event_lookup: EventLookup,
    pub event_window: String,
}

/// Top list plus what went into it.
#[derive(Debug, Clone)]
pub struct TopList {
    pub fields: ResolvedFields,
    pub entries: Vec<TopListEntry>,
    pub candidate_columns: Vec<String>,
    pub row_count: usize,
}

impl TopList {
    pub fn find(&self, name: &str) -> Option<&TopListEntry> {
        self.entries.iter().find(|e| e.name == name)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Health {
    pub ok: bool,
    pub now: DateTime<Utc>,
    pub functions: bool,
}

// ========== Engine ==========

/// Runs the three analytics pipelines over a [`DataSource`], memoizing
/// results per cache key.
pub struct AnalyticsEngine {
    source: Arc<dyn DataSource>,
    settings: EngineSettings,
    clock: Arc<dyn Clock>,
    tokenizer: Tokenizer,
    matcher: &'static ClusterMatcher,
    word_clouds: TtlCache<WordCloudReport>,
    cluster_reports: TtlCache<ClusterReport>,
    top_lists: TtlCache<TopList>,
    signals: TtlCache<SignalsReport>,
}

impl AnalyticsEngine {
    pub fn new(source: Arc<dyn DataSource>, settings: EngineSettings) -> Self {
        Self::with_clock(source, settings, Arc::new(SystemClock))
    }

    pub fn with_clock(source: Arc<dyn DataSource>, settings: EngineSettings, clock: Arc<dyn Clock>) -> Self {
        let ttl = settings.cache_ttl;
        Self {
            source,
            settings,
            tokenizer: Tokenizer::new(),
            matcher: ClusterMatcher::builtin(),
            word_clouds: TtlCache::new(ttl, clock.clone()),
            cluster_reports: TtlCache::new(ttl, clock.clone()),
            top_lists: TtlCache::new(ttl, clock.clone()),
            signals: TtlCache::new(ttl, clock.clone()),
            clock,
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn health(&self) -> Health {
        Health {
            ok: true,
            now: self.clock.now(),
            functions: true,
        }
    }

    /// Most frequent label terms, with domain terms boosted.
    pub async fn word_cloud(&self, policy: CachePolicy) -> Result<WordCloudReport> {
        self.word_clouds
            .get_or_fetch(WORD_CLOUD_KEY, policy, || self.load_word_cloud(policy))
            .await
    }

    async fn load_word_cloud(&self, policy: CachePolicy) -> Result<WordCloudReport> {
        let search = exists_clause(WORD_CLOUD_FIELDS);
        let docs = self
            .source
            .fetch_labels(Some(&search), self.settings.label_limit)
            .await?;
        tracing::info!(documents = docs.len(), "fetched labels for word cloud");
        Ok(self.build_word_cloud(&docs, policy == CachePolicy::Bypass))
    }

    fn build_word_cloud(&self, docs: &[RawDocument], debug: bool) -> WordCloudReport {
        let per_document = docs.iter().map(|doc| {
            merge_frequencies(
                WORD_CLOUD_FIELDS
                    .iter()
                    .map(|field| self.tokenizer.analyze_with_frequencies(&doc.field_text(field))),
            )
        });
        let corpus = merge_frequencies(per_document);
        let terms = rank_top(&corpus, self.settings.top_terms, boost_terms(), BOOST_FACTOR);

        WordCloudReport {
            generated_at: self.clock.now(),
            document_count: docs.len(),
            debug: debug.then(|| WordCloudDebug {
                fields: WORD_CLOUD_FIELDS.to_vec(),
                unique_terms: corpus.len(),
                total_tokens: corpus.values().sum(),
            }),
            terms,
        }
    }

    /// Interaction clusters over label interaction sections.
    pub async fn clusters(&self, policy: CachePolicy) -> Result<ClusterReport> {
        self.cluster_reports
            .get_or_fetch(CLUSTERS_KEY, policy, || self.load_clusters(policy))
            .await
    }

    async fn load_clusters(&self, policy: CachePolicy) -> Result<ClusterReport> {
        let search = exists_clause(&CLUSTER_FIELDS[..1]);
        let docs = self
            .source
            .fetch_labels(Some(&search), self.settings.label_limit)
            .await?;
        tracing::info!(documents = docs.len(), "fetched labels for clusters");
        Ok(self.build_clusters(&docs, policy == CachePolicy::Bypass))
    }

    fn build_clusters(&self, docs: &[RawDocument], debug: bool) -> ClusterReport {
        let texts: Vec<String> = docs.iter().map(|doc| doc.joined_text(CLUSTER_FIELDS)).collect();
        let clusters = self.matcher.aggregate(texts.iter().map(String::as_str));

        ClusterReport {
            generated_at: self.clock.now(),
            document_count: docs.len(),
            clusters,
            debug: debug.then(|| ClusterDebug {
                fields: CLUSTER_FIELDS.to_vec(),
                documents_with_text: docs.iter().filter(|d| d.has_text(CLUSTER_FIELDS)).count(),
                dictionary_size: self.matcher.len(),
            }),
        }
    }

    /// The canonical top list of drugs by exposure.
    pub async fn top_list(&self, policy: CachePolicy) -> Result<TopList> {
        self.top_lists
            .get_or_fetch(TOP_LIST_KEY, policy, || self.load_top_list())
            .await
    }

    async fn load_top_list(&self) -> Result<TopList> {
        let rows = self.source.fetch_exposure_rows().await?;
        let columns = columns_of(&rows);
        let fields = resolve_fields(&columns)?;
        let entries = build_top_list(&rows, &fields);
        tracing::info!(
            rows = rows.len(),
            name_field = %fields.name_field,
            exposure_field = %fields.exposure_field,
            entries = entries.len(),
            "built exposure top list"
        );
        Ok(TopList {
            candidate_columns: candidate_columns(&columns),
            row_count: rows.len(),
            fields,
            entries,
        })
    }

    /// Report rate for `drug`, or for the top drug when none is given.
    ///
    /// The drug must be on the top list.
    pub async fn signals(&self, drug: Option<&str>, policy: CachePolicy) -> Result<SignalsReport> {
        let top = self.top_list(policy).await?;

        let requested = drug.map(normalize_drug_name).filter(|name| !name.is_empty());
        let entry = match requested {
            Some(name) => top
                .find(&name)
                .cloned()
                .ok_or(AnalyticsError::NotFound { drug: name })?,
            None => top
                .entries
                .first()
                .cloned()
                .ok_or_else(|| AnalyticsError::UpstreamShapeInvalid {
                    source_name: crate::upstream::EXPOSURE,
                    details: "no usable rows in exposure dataset".to_string(),
                })?,
        };

        let key = format!("signals:{}", entry.name);
        self.signals
            .get_or_fetch(&key, policy, || self.load_signals(&top, &entry, policy))
            .await
    }

    async fn load_signals(&self, top: &TopList, entry: &TopListEntry, policy: CachePolicy) -> Result<SignalsReport> {
        let window = self.event_window();
        let (reports, lookup) = self.count_reports(&entry.name, &window).await;
        tracing::info!(drug = %entry.name, reports, ?lookup, "counted adverse-event reports");

        Ok(SignalsReport {
            generated_at: self.clock.now(),
            drug: entry.name.clone(),
            signal: SignalItem::new(entry.name.clone(), reports, entry.exposure_count),
            exposure_type: top.fields.exposure_type,
            top_list: top.entries.clone(),
            note: RATE_NOTE,
            debug: (policy == CachePolicy::Bypass).then(|| SignalsDebug {
                fields: top.fields.clone(),
                candidate_columns: top.candidate_columns.clone(),
                row_count: top.row_count,
                event_lookup: lookup,
                event_window: window.clone(),
            }),
        })
    }

    /// openFDA `receivedate` range covering the lookback window.
    fn event_window(&self) -> String {
        let end = self.clock.now().date_naive();
        let days = Days::new(self.settings.event_lookback_days.max(0).unsigned_abs());
        let start = end.checked_sub_days(days).unwrap_or(NaiveDate::MIN);
        format!("[{} TO {}]", start.format("%Y%m%d"), end.format("%Y%m%d"))
    }

    /// Count reports naming `drug`: a fuzzy field match first, one exact
    /// match if that answers non-2xx, and zero if both fail.
    ///
    /// openFDA answers a search without hits with 404, which counts as a
    /// verified zero. A zero from [`EventLookup::Failed`] means "unknown",
    /// not "none".
    async fn count_reports(&self, drug: &str, window: &str) -> (u64, EventLookup) {
        let fuzzy = format!("{} AND receivedate:{window}", drug_clause(drug, false));

        let fallback = match self.source.count_events(&fuzzy).await {
            Ok(total) => return (total, EventLookup::Fuzzy),
            Err(err) if is_no_match(&err) => return (0, EventLookup::Fuzzy),
            Err(err @ AnalyticsError::UpstreamUnavailable { status: Some(_), .. }) => err,
            Err(err) => {
                tracing::warn!(drug, error = %err, details = %err.details(), "event lookup failed, reporting zero");
                return (0, EventLookup::Failed);
            }
        };
        tracing::debug!(drug, details = %fallback.details(), "fuzzy event lookup rejected, trying exact match");

        let exact = format!("{} AND receivedate:{window}", drug_clause(drug, true));
        match self.source.count_events(&exact).await {
            Ok(total) => (total, EventLookup::Exact),
            Err(err) if is_no_match(&err) => (0, EventLookup::Exact),
            Err(err) => {
                tracing::warn!(drug, error = %err, details = %err.details(), "event lookup failed, reporting zero");
                (0, EventLookup::Failed)
            }
        }
    }
}

/// Event fields that may carry a top-list name. Part D rows name drugs by
/// brand or by generic, so both are searched along with the free-text
/// product name.
const EVENT_DRUG_FIELDS: &[&str] = &[
    "patient.drug.medicinalproduct",
    "patient.drug.openfda.brand_name",
    "patient.drug.openfda.generic_name",
];

/// openFDA clause matching reports that name `drug` in any drug field.
fn drug_clause(drug: &str, exact: bool) -> String {
    let quoted = drug.replace('"', "");
    let suffix = if exact { ".exact" } else { "" };
    let terms: Vec<String> = EVENT_DRUG_FIELDS
        .iter()
        .map(|field| format!("{field}{suffix}:\"{quoted}\""))
        .collect();
    format!("({})", terms.join(" OR "))
}

fn is_no_match(err: &AnalyticsError) -> bool {
    matches!(err, AnalyticsError::UpstreamUnavailable { status: Some(404), .. })
}

/// openFDA clause matching records that carry any of `fields`.
fn exists_clause(fields: &[&str]) -> String {
    fields
        .iter()
        .map(|field| format!("_exists_:{field}"))
        .collect::<Vec<_>>()
        .join(" OR ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ManualClock;
    use crate::testing::FakeSource;
    use chrono::TimeZone;
    use serde_json::json;

    fn engine(source: Arc<FakeSource>) -> (Arc<ManualClock>, AnalyticsEngine) {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 15, 8, 0, 0).unwrap()));
        let settings = EngineSettings {
            cache_ttl: Duration::from_secs(600),
            ..EngineSettings::default()
        };
        let engine = AnalyticsEngine::with_clock(source, settings, clock.clone());
        (clock, engine)
    }

    #[tokio::test]
    async fn test_clusters_end_to_end() -> anyhow::Result<()> {
        let source = Arc::new(FakeSource::with_labels(vec![
            json!({"drug_interactions": ["Concomitant warfarin increases the chance of bleeding."]}),
            json!({"drug_interactions": "Cases of serotonin syndrome have occurred."}),
            json!({"indications_and_usage": "Hypertension."}),
        ]));
        let (_clock, engine) = engine(source);

        let report = engine.clusters(CachePolicy::Normal).await?;
        let summary: Vec<_> = report.clusters.iter().map(|c| (c.id.as_str(), c.count)).collect();

        assert_eq!(report.document_count, 3);
        assert_eq!(summary, vec![("bleeding", 1), ("serotonin", 1)]);
        assert_eq!(report.clusters[0].terms, vec!["bleeding", "warfarin"]);
        assert_eq!(report.clusters[1].terms, vec!["serotonin syndrome"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_word_cloud_merges_fields_and_boosts() -> anyhow::Result<()> {
        let source = Arc::new(FakeSource::with_labels(vec![
            json!({"adverse_reactions": "Nausea, nausea, headache.", "warnings": ["Bleeding.", "Nausea."]}),
            json!({"adverse_reactions": "Headache and bleeding.", "boxed_warning": 12}),
        ]));
        let (_clock, engine) = engine(source);

        let report = engine.word_cloud(CachePolicy::Normal).await?;
        let terms: Vec<_> = report.terms.iter().map(|t| (t.name.as_str(), t.value)).collect();

        // bleeding: 2 * 1.5 ties nausea and wins alphabetically
        assert_eq!(terms, vec![("bleeding", 3), ("nausea", 3), ("headache", 2)]);
        assert!(report.debug.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_cached_reports_are_identical_within_ttl() -> anyhow::Result<()> {
        let source = Arc::new(FakeSource::with_labels(vec![json!({"drug_interactions": "warfarin"})]));
        let (clock, engine) = engine(source.clone());

        let first = engine.clusters(CachePolicy::Normal).await?;
        clock.advance(Duration::from_secs(30));
        let second = engine.clusters(CachePolicy::Normal).await?;
        assert_eq!(serde_json::to_string(&first)?, serde_json::to_string(&second)?);
        assert_eq!(source.label_calls(), 1);

        let refreshed = engine.clusters(CachePolicy::Refresh).await?;
        assert_eq!(source.label_calls(), 2);
        assert!(refreshed.generated_at > first.generated_at);

        clock.advance(Duration::from_secs(601));
        engine.clusters(CachePolicy::Normal).await?;
        assert_eq!(source.label_calls(), 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_debug_bypasses_cache() -> anyhow::Result<()> {
        let source = Arc::new(FakeSource::with_labels(vec![json!({"warnings": "rash"})]));
        let (_clock, engine) = engine(source.clone());

        let cached = engine.word_cloud(CachePolicy::Normal).await?;
        let debug = engine.word_cloud(CachePolicy::Bypass).await?;
        assert!(debug.debug.is_some());
        assert_eq!(source.label_calls(), 2);

        let again = engine.word_cloud(CachePolicy::Normal).await?;
        assert_eq!(again.generated_at, cached.generated_at);
        assert!(again.debug.is_none());
        assert_eq!(source.label_calls(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_refresh_propagates() {
        let source = Arc::new(FakeSource::with_labels(vec![json!({"warnings": "rash"})]));
        let (_clock, engine) = engine(source.clone());

        engine.word_cloud(CachePolicy::Normal).await.unwrap();
        source.fail_labels_with(AnalyticsError::UpstreamTimeout {
            source_name: crate::upstream::LABELS,
            timeout_ms: 12000,
        });

        let err = engine.word_cloud(CachePolicy::Refresh).await.unwrap_err();
        assert_eq!(err.kind(), "upstream_timeout");
        // The earlier entry is still served to normal requests.
        assert!(engine.word_cloud(CachePolicy::Normal).await.is_ok());
    }

    fn exposure_rows() -> Vec<serde_json::Value> {
        vec![
            json!({"Brnd_Name": "Eliquis", "generic_name": "apixaban", "Tot_Benes": "3,000,000"}),
            json!({"Brnd_Name": "Coumadin", "generic_name": "warfarin", "Tot_Benes": 1_000_000}),
            json!({"Brnd_Name": "Zoloft", "generic_name": "sertraline", "Tot_Benes": null}),
        ]
    }

    #[tokio::test]
    async fn test_signals_for_requested_drug() -> anyhow::Result<()> {
        let source = Arc::new(FakeSource::with_exposure(exposure_rows()).events(|search| {
            if search.contains("WARFARIN") {
                Ok(250)
            } else {
                Ok(9)
            }
        }));
        let (_clock, engine) = engine(source.clone());

        let report = engine.signals(Some(" warfarin "), CachePolicy::Normal).await?;
        assert_eq!(report.drug, "WARFARIN");
        assert_eq!(report.signal.report_count, 250);
        assert_eq!(report.signal.exposure_count, 1_000_000);
        assert_eq!(report.signal.rate_per_100k, 25.0);
        assert_eq!(report.exposure_type, ExposureType::Beneficiaries);
        assert_eq!(report.top_list.len(), 2);
        assert_eq!(report.top_list[0].name, "APIXABAN");

        let searches = source.event_searches();
        assert_eq!(searches.len(), 1);
        assert!(searches[0].starts_with("(patient.drug.medicinalproduct:\"WARFARIN\" OR "));
        assert!(searches[0].contains("patient.drug.openfda.generic_name:\"WARFARIN\")"));
        assert!(searches[0].ends_with(" AND receivedate:[20230316 TO 20240315]"));
        Ok(())
    }

    #[tokio::test]
    async fn test_signals_defaults_to_top_drug() -> anyhow::Result<()> {
        let source = Arc::new(FakeSource::with_exposure(exposure_rows()).events(|_| Ok(30)));
        let (_clock, engine) = engine(source);

        let report = engine.signals(None, CachePolicy::Normal).await?;
        assert_eq!(report.drug, "APIXABAN");
        assert_eq!(report.signal.rate_per_100k, 1.0);
        Ok(())
    }

    #[tokio::test]
    async fn test_signals_unknown_drug_is_not_found() {
        let source = Arc::new(FakeSource::with_exposure(exposure_rows()));
        let (_clock, engine) = engine(source.clone());

        let err = engine.signals(Some("sertraline"), CachePolicy::Normal).await.unwrap_err();
        assert_eq!(err, AnalyticsError::NotFound { drug: "SERTRALINE".to_string() });
        assert!(source.event_searches().is_empty());
    }

    #[tokio::test]
    async fn test_signals_schema_failure() {
        let source = Arc::new(FakeSource::with_exposure(vec![json!({"brand": "x", "spend": 10})]));
        let (_clock, engine) = engine(source);

        let err = engine.signals(None, CachePolicy::Normal).await.unwrap_err();
        assert_eq!(err.kind(), "schema_resolution");
    }

    #[tokio::test]
    async fn test_event_lookup_falls_back_to_exact() -> anyhow::Result<()> {
        let source = Arc::new(FakeSource::with_exposure(exposure_rows()).events(|search| {
            if search.contains(".exact") {
                Ok(40)
            } else {
                Err(AnalyticsError::UpstreamUnavailable {
                    source_name: crate::upstream::EVENTS,
                    status: Some(400),
                    details: "bad query".to_string(),
                })
            }
        }));
        let (_clock, engine) = engine(source.clone());

        let report = engine.signals(Some("warfarin"), CachePolicy::Bypass).await?;
        assert_eq!(report.signal.report_count, 40);
        assert_eq!(report.debug.map(|d| d.event_lookup), Some(EventLookup::Exact));
        assert_eq!(source.event_searches().len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_event_lookup_failure_reports_zero() -> anyhow::Result<()> {
        let source = Arc::new(FakeSource::with_exposure(exposure_rows()).events(|_| {
            Err(AnalyticsError::UpstreamUnavailable {
                source_name: crate::upstream::EVENTS,
                status: Some(500),
                details: "boom".to_string(),
            })
        }));
        let (_clock, engine) = engine(source.clone());

        let report = engine.signals(Some("warfarin"), CachePolicy::Bypass).await?;
        assert_eq!(report.signal.report_count, 0);
        assert_eq!(report.signal.rate_per_100k, 0.0);
        assert_eq!(report.debug.map(|d| d.event_lookup), Some(EventLookup::Failed));
        assert_eq!(source.event_searches().len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_event_lookup_no_match_is_verified_zero() -> anyhow::Result<()> {
        let source = Arc::new(FakeSource::with_exposure(exposure_rows()).events(|_| {
            Err(AnalyticsError::UpstreamUnavailable {
                source_name: crate::upstream::EVENTS,
                status: Some(404),
                details: r#"{"error":{"code":"NOT_FOUND","message":"No matches found!"}}"#.to_string(),
            })
        }));
        let (_clock, engine) = engine(source.clone());

        let report = engine.signals(Some("warfarin"), CachePolicy::Bypass).await?;
        assert_eq!(report.signal.report_count, 0);
        assert_eq!(report.debug.map(|d| d.event_lookup), Some(EventLookup::Fuzzy));
        assert_eq!(source.event_searches().len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_exact_lookup_no_match_is_verified_zero() -> anyhow::Result<()> {
        let source = Arc::new(FakeSource::with_exposure(exposure_rows()).events(|search| {
            let status = if search.contains(".exact") { 404 } else { 400 };
            Err(AnalyticsError::UpstreamUnavailable {
                source_name: crate::upstream::EVENTS,
                status: Some(status),
                details: String::new(),
            })
        }));
        let (_clock, engine) = engine(source.clone());

        let report = engine.signals(Some("warfarin"), CachePolicy::Bypass).await?;
        assert_eq!(report.signal.report_count, 0);
        assert_eq!(report.debug.map(|d| d.event_lookup), Some(EventLookup::Exact));
        Ok(())
    }

    #[tokio::test]
    async fn test_signals_over_part_d_columns_search_brand_names() -> anyhow::Result<()> {
        let rows = vec![
            json!({"Brnd_Name": "Eliquis", "Gnrc_Name": "Apixaban", "Mftr_Name": "Bristol-Myers",
                   "Tot_Clms_2022": "20,000,000", "Tot_Benes_2022": "4,000,000"}),
            json!({"Brnd_Name": "Jardiance", "Gnrc_Name": "Empagliflozin", "Mftr_Name": "Boehringer",
                   "Tot_Clms_2022": "9,000,000", "Tot_Benes_2022": "1,500,000"}),
        ];
        let source = Arc::new(FakeSource::with_exposure(rows).events(|search| {
            if search.contains("patient.drug.openfda.brand_name:\"ELIQUIS\"") {
                Ok(800)
            } else {
                Ok(0)
            }
        }));
        let (_clock, engine) = engine(source.clone());

        let report = engine.signals(None, CachePolicy::Bypass).await?;
        let debug = report.debug.expect("debug payload");
        assert_eq!(debug.fields.name_field, "Brnd_Name");
        assert_eq!(debug.fields.exposure_field, "Tot_Benes_2022");
        assert_eq!(report.drug, "ELIQUIS");
        assert_eq!(report.signal.report_count, 800);
        assert_eq!(report.signal.rate_per_100k, 20.0);
        assert_eq!(debug.event_lookup, EventLookup::Fuzzy);
        Ok(())
    }

    #[tokio::test]
    async fn test_event_window_clamps_huge_lookback() -> anyhow::Result<()> {
        let source = Arc::new(FakeSource::with_exposure(exposure_rows()).events(|_| Ok(1)));
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 15, 8, 0, 0).unwrap()));
        let settings = EngineSettings {
            event_lookback_days: 100_000_000_000,
            ..EngineSettings::default()
        };
        let engine = AnalyticsEngine::with_clock(source.clone(), settings, clock);

        let report = engine.signals(Some("warfarin"), CachePolicy::Bypass).await?;
        assert!(report.debug.map(|d| d.event_window).unwrap().ends_with("TO 20240315]"));
        Ok(())
    }

    #[tokio::test]
    async fn test_event_lookup_timeout_skips_fallback() -> anyhow::Result<()> {
        let source = Arc::new(FakeSource::with_exposure(exposure_rows()).events(|_| {
            Err(AnalyticsError::UpstreamTimeout {
                source_name: crate::upstream::EVENTS,
                timeout_ms: 12000,
            })
        }));
        let (_clock, engine) = engine(source.clone());

        let report = engine.signals(Some("warfarin"), CachePolicy::Bypass).await?;
        assert_eq!(report.signal.report_count, 0);
        assert_eq!(source.event_searches().len(), 1);
        Ok(())
    }
}
