//! Column selection over exposure datasets that publish no schema contract.
//!
//! Columns are scored by substring heuristics on their lowercase name; the
//! best "drug name" and "exposure count" columns are then used to build the
//! canonical top list.

use crate::error::{AnalyticsError, Result};
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};

/// Entries kept in the top list.
pub const TOP_LIST_SIZE: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExposureType {
    Beneficiaries,
    #[default]
    Claims,
}

/// Score a column as the drug name column.
pub fn score_name_field(field: &str) -> u32 {
    let f = field.to_lowercase();
    let mut score = 0;

    if f == "generic_name" || f == "drug_name" {
        score += 100;
    }
    if f.contains("generic") && f.contains("name") {
        score += 50;
    }
    if f.contains("drug") && f.contains("name") {
        score += 40;
    }
    if f.contains("generic") {
        score += 20;
    }
    if f.contains("drug") {
        score += 15;
    }
    if f.contains("name") {
        score += 10;
    }
    score
}

/// Score a column as the exposure count column and say what it counts.
pub fn score_exposure_field(field: &str) -> (u32, ExposureType) {
    let f = field.to_lowercase();
    let mut score = 0;
    let mut kind = None;

    if f.contains("bene") || f.contains("beneficiar") {
        score += 100;
        kind = Some(ExposureType::Beneficiaries);
    }
    if f.contains("claim") {
        score += 50;
        kind.get_or_insert(ExposureType::Claims);
    }
    if f.contains("count") || f.contains("cnt") {
        score += 20;
    }
    if f.contains("total") || f.contains("tot") {
        score += 10;
    }
    (score, kind.unwrap_or_default())
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldChoice {
    pub name_field: Option<String>,
    pub exposure_field: Option<String>,
    pub exposure_type: ExposureType,
}

/// Pick the best column for each role. Earlier columns win ties and a role
/// whose best score is zero stays unset.
pub fn choose_fields(columns: &[String]) -> FieldChoice {
    let mut name: Option<(&String, u32)> = None;
    let mut exposure: Option<(&String, u32, ExposureType)> = None;

    for column in columns {
        let score = score_name_field(column);
        if score > 0 && name.map_or(true, |(_, best)| score > best) {
            name = Some((column, score));
        }

        let (score, kind) = score_exposure_field(column);
        if score > 0 && exposure.map_or(true, |(_, best, _)| score > best) {
            exposure = Some((column, score, kind));
        }
    }

    FieldChoice {
        name_field: name.map(|(c, _)| c.clone()),
        exposure_field: exposure.map(|(c, _, _)| c.clone()),
        exposure_type: exposure.map(|(_, _, k)| k).unwrap_or_default(),
    }
}

/// Columns scoring above zero for either role.
pub fn candidate_columns(columns: &[String]) -> Vec<String> {
    columns
        .iter()
        .filter(|c| score_name_field(c) > 0 || score_exposure_field(c).0 > 0)
        .cloned()
        .collect()
}

/// Both roles resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedFields {
    pub name_field: String,
    pub exposure_field: String,
    pub exposure_type: ExposureType,
}

pub fn resolve_fields(columns: &[String]) -> Result<ResolvedFields> {
    let choice = choose_fields(columns);
    match (choice.name_field, choice.exposure_field) {
        (Some(name_field), Some(exposure_field)) => Ok(ResolvedFields {
            name_field,
            exposure_field,
            exposure_type: choice.exposure_type,
        }),
        (name, _) => Err(AnalyticsError::SchemaResolution {
            role: if name.is_none() { "drug name" } else { "exposure count" },
            candidates: candidate_columns(columns),
        }),
    }
}

/// Keys of all object rows, in first-seen order.
pub fn columns_of(rows: &[Value]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut columns = Vec::new();
    for row in rows.iter().filter_map(Value::as_object) {
        for key in row.keys() {
            if seen.insert(key.as_str()) {
                columns.push(key.clone());
            }
        }
    }
    columns
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopListEntry {
    pub name: String,
    pub exposure_count: u64,
}

/// Trimmed, upper-cased drug name used for deduplication and lookup.
pub fn normalize_drug_name(name: &str) -> String {
    name.trim().to_uppercase()
}

fn name_value(value: &Value) -> Option<String> {
    let raw = match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    let name = normalize_drug_name(&raw);
    (!name.is_empty()).then_some(name)
}

/// Parse an exposure cell: numbers as is, strings with thousands separators
/// stripped. Non-positive or unparsable values yield `None`.
pub fn parse_exposure(value: &Value) -> Option<u64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.replace(',', "").trim().parse::<f64>().ok()?,
        _ => return None,
    };
    if !parsed.is_finite() || parsed <= 0.0 {
        return None;
    }
    let rounded = parsed.round();
    (rounded >= 1.0).then_some(rounded as u64)
}

/// Build the top list: one entry per name (largest exposure wins), sorted by
/// exposure descending and capped at [`TOP_LIST_SIZE`].
pub fn build_top_list(rows: &[Value], fields: &ResolvedFields) -> Vec<TopListEntry> {
    let mut entries: Vec<TopListEntry> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();

    for row in rows.iter().filter_map(Value::as_object) {
        let (Some(name), Some(exposure)) = (row.get(&fields.name_field), row.get(&fields.exposure_field)) else {
            continue;
        };
        let (Some(name), Some(exposure_count)) = (name_value(name), parse_exposure(exposure)) else {
            continue;
        };

        match positions.get(&name) {
            Some(&i) => {
                let existing = &mut entries[i];
                existing.exposure_count = existing.exposure_count.max(exposure_count);
            }
            None => {
                positions.insert(name.clone(), entries.len());
                entries.push(TopListEntry {
                    name,
                    exposure_count,
                });
            }
        }
    }

    entries.sort_by(|a, b| b.exposure_count.cmp(&a.exposure_count));
    entries.truncate(TOP_LIST_SIZE);
    entries
}
