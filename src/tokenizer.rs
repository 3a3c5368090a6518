use crate::text::normalize_collapsed;
use serde::Serialize;
use std::collections::{HashMap, HashSet};

/// Tokens shorter than this are dropped.
pub const MIN_TOKEN_LEN: usize = 3;

/// Multiplier applied to domain terms before ranking.
pub const BOOST_FACTOR: f64 = 1.5;

/// Token -> occurrence count
pub type FrequencyTable = HashMap<String, usize>;

lazy_static::lazy_static! {
    static ref STOPWORDS: HashSet<&'static str> = {
        [
            // English
            "about", "above", "after", "again", "against", "all", "and", "any", "are",
            "aren", "because", "been", "before", "being", "below", "between", "both",
            "but", "can", "cannot", "could", "couldn", "did", "didn", "does", "doesn",
            "doing", "don", "down", "during", "each", "few", "for", "from", "further",
            "had", "hadn", "has", "hasn", "have", "haven", "having", "her", "here",
            "hers", "herself", "him", "himself", "his", "how", "into", "isn", "its",
            "itself", "let", "more", "most", "mustn", "myself", "nor", "not", "off",
            "once", "only", "other", "ought", "our", "ours", "ourselves", "out", "over",
            "own", "same", "shan", "she", "should", "shouldn", "some", "such", "than",
            "that", "the", "their", "theirs", "them", "themselves", "then", "there",
            "these", "they", "this", "those", "through", "too", "under", "until", "very",
            "was", "wasn", "were", "weren", "what", "when", "where", "which", "while",
            "who", "whom", "why", "will", "with", "won", "would", "wouldn", "you",
            "your", "yours", "yourself", "yourselves", "also", "may", "within",
            // Label boilerplate
            "patients", "patient", "use", "used", "using", "including", "include",
            "includes", "reported", "reports", "see", "section", "table", "tablets",
            "tablet", "dose", "doses", "dosage", "mg", "treatment", "treated", "clinical",
            "studies", "study", "trials", "trial", "therapy", "drug", "drugs", "effects",
            "following", "observed", "occurred", "placebo", "compared", "less", "one",
            "two", "three", "administration", "administered",
            "warnings", "precautions", "adverse", "reactions", "reaction", "information",
            "daily", "day", "days", "week", "weeks", "based", "group", "however",
        ]
        .iter()
        .copied()
        .collect()
    };

    static ref BOOST_TERMS: HashSet<&'static str> = {
        [
            "bleeding", "hemorrhage", "hepatotoxicity", "hepatic", "serotonin", "suicidal",
            "suicide", "overdose", "anaphylaxis", "hypotension", "seizures", "seizure",
            "arrhythmia", "prolongation", "qtc", "hyperkalemia", "hypoglycemia",
            "neutropenia", "thrombocytopenia", "pancreatitis", "rhabdomyolysis",
            "nephrotoxicity", "respiratory", "depression", "dependence", "withdrawal",
            "angioedema", "stevens", "johnson", "lactic", "acidosis", "fatal", "death",
        ]
        .iter()
        .copied()
        .collect()
    };
}

/// Domain terms that get [`BOOST_FACTOR`] when ranking.
pub fn boost_terms() -> &'static HashSet<&'static str> {
    &BOOST_TERMS
}

/// One ranked term, as served to word-cloud clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TermWeight {
    pub name: String,
    pub value: u64,
}

pub struct Tokenizer {
    stopwords: HashSet<String>,
    min_len: usize,
}

impl Tokenizer {
    pub fn new() -> Self {
        Self::with_stopwords(STOPWORDS.iter().copied())
    }

    pub fn with_stopwords<'a, I>(stopwords: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        Self {
            stopwords: stopwords.into_iter().map(str::to_string).collect(),
            min_len: MIN_TOKEN_LEN,
        }
    }

    /// Normalize, split on whitespace, then drop short tokens and stop words.
    pub fn tokenize(&self, text: &str) -> Vec<String> {
        normalize_collapsed(text)
            .split(' ')
            .filter(|t| t.chars().count() >= self.min_len)
            .filter(|t| !self.stopwords.contains(*t))
            .map(str::to_string)
            .collect()
    }

    /// Tokenize and count term frequencies
    pub fn analyze_with_frequencies(&self, text: &str) -> FrequencyTable {
        count_frequencies(self.tokenize(text))
    }
}

impl Default for Tokenizer {
    fn default() -> Self {
        Self::new()
    }
}

pub fn count_frequencies<I>(tokens: I) -> FrequencyTable
where
    I: IntoIterator<Item = String>,
{
    let mut frequencies = FrequencyTable::new();
    for token in tokens {
        *frequencies.entry(token).or_insert(0) += 1;
    }
    frequencies
}

/// Sum counts per key across all tables.
pub fn merge_frequencies<I>(tables: I) -> FrequencyTable
where
    I: IntoIterator<Item = FrequencyTable>,
{
    let mut merged = FrequencyTable::new();
    for table in tables {
        for (term, count) in table {
            *merged.entry(term).or_insert(0) += count;
        }
    }
    merged
}

/// Rank the `n` heaviest terms after boosting.
///
/// Terms in `boost` have their count multiplied by `factor`. Equal weights
/// are ordered alphabetically. Values are rounded for display.
pub fn rank_top(
    table: &FrequencyTable,
    n: usize,
    boost: &HashSet<&str>,
    factor: f64,
) -> Vec<TermWeight> {
    let mut weighted: Vec<(&str, f64)> = table
        .iter()
        .map(|(term, &count)| {
            let weight = if boost.contains(term.as_str()) {
                count as f64 * factor
            } else {
                count as f64
            };
            (term.as_str(), weight)
        })
        .collect();

    weighted.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(b.0))
    });

    weighted
        .into_iter()
        .take(n)
        .map(|(term, weight)| TermWeight {
            name: term.to_string(),
            value: weight.round() as u64,
        })
        .collect()
}
