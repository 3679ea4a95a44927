//! Trial corpus ingestion.
//!
//! Reads a tabular trial export into an ordered, immutable list of records.
//! Row order is the index used by every other component: record `i` here is
//! vector `i` in the corpus vector collection.

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Number of entries reported per category in [`CorpusStats`].
const STATS_TOP_N: usize = 10;

/// Errors raised while reading a corpus source.
#[derive(Debug, thiserror::Error)]
pub enum CorpusLoadError {
    #[error("failed to open corpus at {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed corpus header: {0}")]
    Header(#[source] csv::Error),

    #[error("malformed corpus row {row}: {source}")]
    Row {
        row: usize,
        #[source]
        source: csv::Error,
    },
}

/// snake_case column names and the registry header they stand for.
const COLUMN_ALIASES: &[(&str, &str)] = &[
    ("id", "NCTId"),
    ("nct_id", "NCTId"),
    ("title", "BriefTitle"),
    ("condition", "Condition"),
    ("summary", "BriefSummary"),
    ("inclusion_criteria", "InclusionCriteria"),
    ("exclusion_criteria", "ExclusionCriteria"),
    ("country", "LocationCountry"),
    ("status", "OverallStatus"),
    ("phase", "Phase"),
    ("enrollment", "EnrollmentCount"),
    ("contact_name", "ContactName"),
    ("contact_role", "ContactRole"),
    ("contact_phone", "ContactPhone"),
    ("contact_email", "ContactEmail"),
    ("lead_sponsor", "LeadSponsor"),
    ("sponsor_type", "SponsorType"),
];

/// Rewrite aliases to registry names. When several columns map to the same
/// field, the leftmost wins and the others are ignored.
fn canonical_headers(headers: &csv::StringRecord) -> csv::StringRecord {
    let mut seen: HashSet<&str> = HashSet::new();
    headers
        .iter()
        .enumerate()
        .map(|(idx, header)| {
            let name = COLUMN_ALIASES
                .iter()
                .find(|(alias, _)| *alias == header)
                .map_or(header, |(_, canonical)| *canonical);
            if seen.insert(name) {
                name.to_string()
            } else {
                log::warn!("Ignoring corpus column '{}': field already read from an earlier column", header);
                format!("__ignored_{}", idx)
            }
        })
        .collect()
}

/// Raw trial columns as they appear in the source table.
///
/// Accepts the registry export headers and snake_case aliases (see
/// [`COLUMN_ALIASES`]). Every column is optional; unknown columns are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialFields {
    #[serde(default, rename = "NCTId", alias = "id", alias = "nct_id")]
    pub id: Option<String>,
    #[serde(default, rename = "BriefTitle", alias = "title")]
    pub title: Option<String>,
    #[serde(default, rename = "Condition", alias = "condition")]
    pub condition: Option<String>,
    #[serde(default, rename = "BriefSummary", alias = "summary")]
    pub summary: Option<String>,
    #[serde(default, rename = "InclusionCriteria", alias = "inclusion_criteria")]
    pub inclusion_criteria: Option<String>,
    #[serde(default, rename = "ExclusionCriteria", alias = "exclusion_criteria")]
    pub exclusion_criteria: Option<String>,
    #[serde(default, rename = "LocationCountry", alias = "country")]
    pub country: Option<String>,

    #[serde(default, rename = "OverallStatus", alias = "status")]
    pub status: Option<String>,
    #[serde(default, rename = "Phase", alias = "phase")]
    pub phase: Option<String>,
    #[serde(default, rename = "EnrollmentCount", alias = "enrollment")]
    pub enrollment: Option<String>,
    #[serde(default, rename = "ContactName", alias = "contact_name")]
    pub contact_name: Option<String>,
    #[serde(default, rename = "ContactRole", alias = "contact_role")]
    pub contact_role: Option<String>,
    #[serde(default, rename = "ContactPhone", alias = "contact_phone")]
    pub contact_phone: Option<String>,
    #[serde(default, rename = "ContactEmail", alias = "contact_email")]
    pub contact_email: Option<String>,
    #[serde(default, rename = "LeadSponsor", alias = "lead_sponsor")]
    pub lead_sponsor: Option<String>,
    #[serde(default, rename = "SponsorType", alias = "sponsor_type")]
    pub sponsor_type: Option<String>,
}

/// One corpus entry with its derived searchable text.
///
/// Fields are only reachable through accessors, so `searchable_text` always
/// reflects the current source fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrialRecord {
    fields: TrialFields,
    searchable_text: String,
}

impl TrialRecord {
    pub fn new(fields: TrialFields) -> Self {
        let searchable_text = derive_searchable_text(&fields);
        Self {
            fields,
            searchable_text,
        }
    }

    /// Rebuild the record with modified fields.
    pub fn with_fields(self, update: impl FnOnce(&mut TrialFields)) -> Self {
        let mut fields = self.fields;
        update(&mut fields);
        Self::new(fields)
    }

    pub fn fields(&self) -> &TrialFields {
        &self.fields
    }

    pub fn searchable_text(&self) -> &str {
        &self.searchable_text
    }

    pub fn id(&self) -> &str {
        text_or_empty(&self.fields.id)
    }

    pub fn title(&self) -> &str {
        text_or_empty(&self.fields.title)
    }

    pub fn condition(&self) -> &str {
        text_or_empty(&self.fields.condition)
    }

    pub fn summary(&self) -> &str {
        text_or_empty(&self.fields.summary)
    }

    pub fn inclusion_criteria(&self) -> &str {
        text_or_empty(&self.fields.inclusion_criteria)
    }

    pub fn exclusion_criteria(&self) -> &str {
        text_or_empty(&self.fields.exclusion_criteria)
    }

    pub fn country(&self) -> &str {
        text_or_empty(&self.fields.country)
    }
}

/// Missing values render as empty strings. Sentinels such as "N/A" are kept.
pub(crate) fn text_or_empty(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("")
}

/// Join the text fields in fixed order with single spaces.
///
/// Missing fields contribute an empty string. No case folding happens here.
pub fn derive_searchable_text(fields: &TrialFields) -> String {
    [
        &fields.title,
        &fields.condition,
        &fields.summary,
        &fields.inclusion_criteria,
        &fields.exclusion_criteria,
        &fields.country,
    ]
    .iter()
    .map(|value| text_or_empty(value))
    .collect::<Vec<_>>()
    .join(" ")
}

/// Ordered, read-only collection of trial records.
#[derive(Debug, Clone)]
pub struct CorpusStore {
    records: Vec<TrialRecord>,
    fingerprint: [u8; 32],
}

impl CorpusStore {
    pub fn from_records(records: Vec<TrialRecord>) -> Self {
        let fingerprint = Self::compute_fingerprint(&records);
        Self {
            records,
            fingerprint,
        }
    }

    pub fn from_fields(fields: Vec<TrialFields>) -> Self {
        Self::from_records(fields.into_iter().map(TrialRecord::new).collect())
    }

    /// Parse a CSV file. Fails as a whole on the first bad row.
    pub fn load(path: &Path) -> Result<Self, CorpusLoadError> {
        let file = File::open(path).map_err(|source| CorpusLoadError::Open {
            path: path.to_path_buf(),
            source,
        })?;

        let now = Instant::now();
        let store = Self::from_reader(BufReader::new(file))?;

        log::info!(
            "Loaded {} trials from {} in {}ms",
            store.len(),
            path.display(),
            now.elapsed().as_micros() as f64 / 1000.0
        );

        Ok(store)
    }

    /// Parse CSV data with a header row.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, CorpusLoadError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_reader(reader);

        let headers = csv_reader.headers().map_err(CorpusLoadError::Header)?;
        let headers = canonical_headers(headers);
        csv_reader.set_headers(headers);

        let mut records = vec![];
        for (idx, result) in csv_reader.deserialize::<TrialFields>().enumerate() {
            let fields = result.map_err(|source| CorpusLoadError::Row {
                row: idx + 1,
                source,
            })?;
            records.push(TrialRecord::new(fields));
        }

        Ok(Self::from_records(records))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&TrialRecord> {
        self.records.get(index)
    }

    pub fn records(&self) -> &[TrialRecord] {
        &self.records
    }

    /// First record carrying the given identifier.
    pub fn find_by_id(&self, id: &str) -> Option<&TrialRecord> {
        if id.is_empty() {
            return None;
        }
        self.records.iter().find(|record| record.id() == id)
    }

    /// Searchable texts in corpus order.
    pub fn searchable_texts(&self) -> Vec<String> {
        self.records
            .iter()
            .map(|record| record.searchable_text().to_string())
            .collect()
    }

    /// SHA256 over identifiers and searchable texts, order-sensitive.
    pub fn fingerprint(&self) -> &[u8; 32] {
        &self.fingerprint
    }

    pub fn stats(&self) -> CorpusStats {
        CorpusStats {
            total_trials: self.records.len(),
            top_conditions: top_values(self.records.iter().map(|r| r.condition())),
            top_countries: top_values(self.records.iter().map(|r| r.country())),
        }
    }

    fn compute_fingerprint(records: &[TrialRecord]) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update((records.len() as u64).to_le_bytes());
        for record in records {
            hasher.update(record.id().as_bytes());
            hasher.update([0u8]);
            hasher.update(record.searchable_text().as_bytes());
            hasher.update([0u8]);
        }
        hasher.finalize().into()
    }
}

/// Summary counts over the loaded corpus.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorpusStats {
    pub total_trials: usize,
    pub top_conditions: Vec<ValueCount>,
    pub top_countries: Vec<ValueCount>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValueCount {
    pub value: String,
    pub count: usize,
}

fn top_values<'a>(values: impl Iterator<Item = &'a str>) -> Vec<ValueCount> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for value in values.map(str::trim).filter(|v| !v.is_empty()) {
        *counts.entry(value).or_default() += 1;
    }

    let mut counts: Vec<ValueCount> = counts
        .into_iter()
        .map(|(value, count)| ValueCount {
            value: value.to_string(),
            count,
        })
        .collect();
    counts.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.value.cmp(&b.value)));
    counts.truncate(STATS_TOP_N);
    counts
}

/// Something that can produce the corpus on first use.
pub trait CorpusSource: Send + Sync {
    /// Human-readable origin, used in logs.
    fn describe(&self) -> String;

    fn load(&self) -> Result<CorpusStore, CorpusLoadError>;
}

/// CSV file on disk.
#[derive(Debug, Clone)]
pub struct CsvCorpusSource {
    path: PathBuf,
}

impl CsvCorpusSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl CorpusSource for CsvCorpusSource {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn load(&self) -> Result<CorpusStore, CorpusLoadError> {
        CorpusStore::load(&self.path)
    }
}

/// Records already held in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCorpusSource {
    fields: Vec<TrialFields>,
}

impl InMemoryCorpusSource {
    pub fn new(fields: Vec<TrialFields>) -> Self {
        Self { fields }
    }
}

impl CorpusSource for InMemoryCorpusSource {
    fn describe(&self) -> String {
        format!("in-memory ({} records)", self.fields.len())
    }

    fn load(&self) -> Result<CorpusStore, CorpusLoadError> {
        Ok(CorpusStore::from_fields(self.fields.clone()))
    }
}
