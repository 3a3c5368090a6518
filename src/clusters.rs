//! Categorise free text by a fixed dictionary of interaction-term groups.
//!
//! Each cluster owns an ordered list of phrases. A phrase matches as a whole
//! word or phrase, case-insensitively, with any run of whitespace allowed
//! between its words. A document counts once per cluster, however many of
//! the cluster's phrases it mentions.

use crate::text::normalize;
use regex::Regex;
use serde::Serialize;

/// Matched phrases reported per cluster.
pub const MAX_CLUSTER_TERMS: usize = 5;

/// A labelled group of related phrases.
#[derive(Debug, Clone)]
pub struct ClusterDefinition {
    pub id: String,
    pub label: String,
    pub patterns: Vec<String>,
}

impl ClusterDefinition {
    pub fn new(id: &str, label: &str, patterns: &[&str]) -> Self {
        Self {
            id: id.to_string(),
            label: label.to_string(),
            patterns: patterns.iter().map(|p| p.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClusterResult {
    pub id: String,
    pub label: String,
    pub count: usize,
    pub terms: Vec<String>,
}

lazy_static::lazy_static! {
    static ref DICTIONARY: ClusterMatcher = ClusterMatcher::new(builtin_definitions())
        .expect("built-in cluster patterns are escaped literals");
}

/// The built-in interaction dictionary, in display-tie order.
pub fn builtin_definitions() -> Vec<ClusterDefinition> {
    vec![
        ClusterDefinition::new(
            "bleeding",
            "Bleeding Risk",
            &[
                "bleeding", "hemorrhage", "haemorrhage", "anticoagulant", "antiplatelet",
                "warfarin", "INR", "platelet aggregation", "NSAID", "NSAIDs", "aspirin",
                "clopidogrel", "heparin",
            ],
        ),
        ClusterDefinition::new(
            "serotonin",
            "Serotonin Syndrome",
            &[
                "serotonin syndrome", "serotonergic", "SSRI", "SSRIs", "SNRI", "SNRIs",
                "MAOI", "MAOIs", "monoamine oxidase inhibitor", "triptan", "triptans",
                "tramadol", "linezolid", "St. John's Wort",
            ],
        ),
        ClusterDefinition::new(
            "qt",
            "QT Prolongation",
            &[
                "QT prolongation", "QT interval", "QTc", "torsades de pointes", "torsade",
                "ventricular arrhythmia", "ventricular arrhythmias",
            ],
        ),
        ClusterDefinition::new(
            "cyp450",
            "CYP450 Interactions",
            &[
                "CYP3A4", "CYP3A", "CYP2D6", "CYP2C9", "CYP2C19", "CYP1A2",
                "cytochrome P450", "strong inhibitors", "strong inducers", "ketoconazole",
                "rifampin",
            ],
        ),
        ClusterDefinition::new(
            "cns",
            "CNS Depression",
            &[
                "CNS depression", "central nervous system depression",
                "respiratory depression", "sedation", "opioid", "opioids",
                "benzodiazepine", "benzodiazepines", "alcohol", "drowsiness",
            ],
        ),
        ClusterDefinition::new(
            "hypotension",
            "Hypotension",
            &[
                "hypotension", "orthostatic", "blood pressure", "antihypertensive",
                "antihypertensives", "vasodilator", "nitrates", "PDE5 inhibitor",
            ],
        ),
        ClusterDefinition::new(
            "hyperkalemia",
            "Hyperkalemia",
            &[
                "hyperkalemia", "serum potassium", "potassium-sparing",
                "potassium supplements", "ACE inhibitor", "ACE inhibitors",
                "angiotensin receptor blocker", "angiotensin receptor blockers",
            ],
        ),
        ClusterDefinition::new(
            "renal",
            "Kidney Injury",
            &[
                "nephrotoxicity", "nephrotoxic", "renal impairment", "renal failure",
                "renal function", "acute kidney injury", "serum creatinine",
            ],
        ),
        ClusterDefinition::new(
            "hepatic",
            "Liver Injury",
            &[
                "hepatotoxicity", "hepatotoxic", "liver injury", "hepatic impairment",
                "liver enzymes", "transaminase", "transaminases",
            ],
        ),
        ClusterDefinition::new(
            "glycemic",
            "Glucose Control",
            &[
                "hypoglycemia", "hyperglycemia", "insulin", "sulfonylurea", "sulfonylureas",
                "blood glucose",
            ],
        ),
    ]
}

/// Build the whole-phrase regex for one pattern.
///
/// Returns `Ok(None)` when the pattern normalizes to nothing.
pub fn pattern_regex(pattern: &str) -> Result<Option<Regex>, regex::Error> {
    let normalized = normalize(pattern);
    let words: Vec<String> = normalized.split_whitespace().map(regex::escape).collect();
    if words.is_empty() {
        return Ok(None);
    }
    Regex::new(&format!(r"(?i)\b{}\b", words.join(r"\s+"))).map(Some)
}

struct CompiledPattern {
    phrase: String,
    regex: Regex,
}

struct CompiledCluster {
    definition: ClusterDefinition,
    patterns: Vec<CompiledPattern>,
}

impl CompiledCluster {
    fn compile(definition: ClusterDefinition) -> Result<Self, regex::Error> {
        let mut patterns = Vec::with_capacity(definition.patterns.len());
        for phrase in &definition.patterns {
            if let Some(regex) = pattern_regex(phrase)? {
                patterns.push(CompiledPattern {
                    phrase: phrase.clone(),
                    regex,
                });
            }
        }
        Ok(Self {
            definition,
            patterns,
        })
    }

    /// `normalized` must already be normalized text.
    fn matches(&self, normalized: &str) -> bool {
        self.patterns.iter().any(|p| p.regex.is_match(normalized))
    }

    /// Matching phrases in dictionary order, stopping at `max_terms`.
    fn top_terms(&self, normalized: &str, max_terms: usize) -> Vec<String> {
        self.patterns
            .iter()
            .filter(|p| p.regex.is_match(normalized))
            .take(max_terms)
            .map(|p| p.phrase.clone())
            .collect()
    }
}

/// Compiled form of a cluster dictionary.
pub struct ClusterMatcher {
    clusters: Vec<CompiledCluster>,
}

impl ClusterMatcher {
    pub fn new(definitions: Vec<ClusterDefinition>) -> Result<Self, regex::Error> {
        let clusters = definitions
            .into_iter()
            .map(CompiledCluster::compile)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { clusters })
    }

    /// The built-in dictionary, compiled once per process.
    pub fn builtin() -> &'static ClusterMatcher {
        &DICTIONARY
    }

    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    /// Tally every document against every cluster.
    ///
    /// Zero-hit clusters are dropped. The rest are ordered by hit count,
    /// descending, with dictionary order breaking ties.
    pub fn aggregate<'a, I>(&self, documents: I) -> Vec<ClusterResult>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut tallies: Vec<(usize, Vec<String>)> = vec![(0, Vec::new()); self.clusters.len()];

        for text in documents {
            let normalized = normalize(text);
            for (cluster, (hits, terms)) in self.clusters.iter().zip(tallies.iter_mut()) {
                if !cluster.matches(&normalized) {
                    continue;
                }
                *hits += 1;
                for term in cluster.top_terms(&normalized, MAX_CLUSTER_TERMS) {
                    if !terms.contains(&term) {
                        terms.push(term);
                    }
                }
            }
        }

        let mut ranked: Vec<(usize, ClusterResult)> = self
            .clusters
            .iter()
            .zip(tallies)
            .enumerate()
            .filter(|(_, (_, (hits, _)))| *hits > 0)
            .map(|(index, (cluster, (hits, mut terms)))| {
                terms.truncate(MAX_CLUSTER_TERMS);
                let result = ClusterResult {
                    id: cluster.definition.id.clone(),
                    label: cluster.definition.label.clone(),
                    count: hits,
                    terms,
                };
                (index, result)
            })
            .collect();

        ranked.sort_by(|(ia, a), (ib, b)| b.count.cmp(&a.count).then(ia.cmp(ib)));
        ranked.into_iter().map(|(_, result)| result).collect()
    }
}

/// True when any of `patterns` occurs in `text` as a whole word or phrase.
pub fn matches_cluster(text: &str, patterns: &[&str]) -> bool {
    let normalized = normalize(text);
    patterns.iter().any(|pattern| match pattern_regex(pattern) {
        Ok(Some(regex)) => regex.is_match(&normalized),
        _ => false,
    })
}

/// Up to `max_terms` of `patterns` that occur in `text`, in pattern order.
pub fn extract_top_terms(text: &str, patterns: &[&str], max_terms: usize) -> Vec<String> {
    let normalized = normalize(text);
    let mut found = Vec::new();
    for pattern in patterns {
        if found.len() >= max_terms {
            break;
        }
        if let Ok(Some(regex)) = pattern_regex(pattern) {
            if regex.is_match(&normalized) {
                found.push(pattern.to_string());
            }
        }
    }
    found
}
