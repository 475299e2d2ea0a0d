//! Species knowledge store.
//!
//! Static, read-only table of taxonomy and agronomic advice per species. The
//! class index is the canonical key; a name index is built at load time for
//! JSON stores (which are keyed by species name) and for direct lookups.
//!
//! Accepted sources:
//! - JSON object `{ "<species>": { "Kingdom": ..., "Host Crops": [...] } }`,
//!   taxonomy either flat or nested under `"Taxonomy"`
//! - CSV with a header row, one row per class
//! - XLSX/XLS/ODS, first sheet, same layout as CSV

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use calamine::{Data, Reader, open_workbook_auto};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::labels::{ClassLabels, normalize_name};
use crate::{Error, Result};

/// Placeholder shown for any field the store does not carry.
pub const NOT_AVAILABLE: &str = "Not available";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    CommonName,
    Kingdom,
    Phylum,
    Class,
    Order,
    Family,
    Genus,
    Species,
    HostCrops,
    DamageSymptoms,
    IpmMeasures,
    ChemicalControl,
}

impl Field {
    pub const ALL: [Field; 12] = [
        Field::CommonName,
        Field::Kingdom,
        Field::Phylum,
        Field::Class,
        Field::Order,
        Field::Family,
        Field::Genus,
        Field::Species,
        Field::HostCrops,
        Field::DamageSymptoms,
        Field::IpmMeasures,
        Field::ChemicalControl,
    ];

    pub const TAXONOMY: [Field; 7] = [
        Field::Kingdom,
        Field::Phylum,
        Field::Class,
        Field::Order,
        Field::Family,
        Field::Genus,
        Field::Species,
    ];

    pub fn title(self) -> &'static str {
        match self {
            Field::CommonName => "Common Name",
            Field::Kingdom => "Kingdom",
            Field::Phylum => "Phylum",
            Field::Class => "Class",
            Field::Order => "Order",
            Field::Family => "Family",
            Field::Genus => "Genus",
            Field::Species => "Species",
            Field::HostCrops => "Host Crops",
            Field::DamageSymptoms => "Damage Symptoms",
            Field::IpmMeasures => "IPM Measures",
            Field::ChemicalControl => "Chemical Control",
        }
    }

    fn aliases(self) -> &'static [&'static str] {
        match self {
            Field::HostCrops => &["hosts", "hostplants"],
            Field::DamageSymptoms => &["damage", "symptoms", "natureofdamage"],
            Field::IpmMeasures => &["ipm", "integratedpestmanagement", "management"],
            Field::ChemicalControl => &["chemical", "chemicalmanagement", "insecticides"],
            _ => &[],
        }
    }

    /// Match a JSON key or column header against this field.
    pub fn from_key(key: &str) -> Option<Field> {
        let key = header_key(key);
        Field::ALL.into_iter().find(|f| {
            header_key(f.title()) == key || f.aliases().iter().any(|a| *a == key)
        })
    }
}

// "Host Crops", "host_crops" and "HOST-CROPS" all become "hostcrops".
fn header_key(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Taxonomy {
    pub kingdom: Option<String>,
    pub phylum: Option<String>,
    pub class: Option<String>,
    pub order: Option<String>,
    pub family: Option<String>,
    pub genus: Option<String>,
    pub species: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SpeciesRecord {
    /// Label this record is filed under
    pub name: String,
    pub common_name: Option<String>,
    pub taxonomy: Taxonomy,
    pub host_crops: Option<String>,
    pub damage_symptoms: Option<String>,
    pub ipm_measures: Option<String>,
    pub chemical_control: Option<String>,
}

impl SpeciesRecord {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    fn slot(&self, field: Field) -> &Option<String> {
        match field {
            Field::CommonName => &self.common_name,
            Field::Kingdom => &self.taxonomy.kingdom,
            Field::Phylum => &self.taxonomy.phylum,
            Field::Class => &self.taxonomy.class,
            Field::Order => &self.taxonomy.order,
            Field::Family => &self.taxonomy.family,
            Field::Genus => &self.taxonomy.genus,
            Field::Species => &self.taxonomy.species,
            Field::HostCrops => &self.host_crops,
            Field::DamageSymptoms => &self.damage_symptoms,
            Field::IpmMeasures => &self.ipm_measures,
            Field::ChemicalControl => &self.chemical_control,
        }
    }

    fn slot_mut(&mut self, field: Field) -> &mut Option<String> {
        match field {
            Field::CommonName => &mut self.common_name,
            Field::Kingdom => &mut self.taxonomy.kingdom,
            Field::Phylum => &mut self.taxonomy.phylum,
            Field::Class => &mut self.taxonomy.class,
            Field::Order => &mut self.taxonomy.order,
            Field::Family => &mut self.taxonomy.family,
            Field::Genus => &mut self.taxonomy.genus,
            Field::Species => &mut self.taxonomy.species,
            Field::HostCrops => &mut self.host_crops,
            Field::DamageSymptoms => &mut self.damage_symptoms,
            Field::IpmMeasures => &mut self.ipm_measures,
            Field::ChemicalControl => &mut self.chemical_control,
        }
    }

    pub fn get(&self, field: Field) -> Option<&str> {
        self.slot(field).as_deref()
    }

    /// The one place a missing field turns into display text.
    pub fn field_or_placeholder(&self, field: Field) -> &str {
        self.get(field).unwrap_or(NOT_AVAILABLE)
    }

    /// Blank values are stored as missing.
    pub fn set(&mut self, field: Field, value: Option<String>) {
        *self.slot_mut(field) = value
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());
    }
}

/// Outcome of joining a prediction to the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "record", rename_all = "snake_case")]
pub enum RecordLookup {
    Found(SpeciesRecord),
    NotFound,
}

impl RecordLookup {
    pub fn record(&self) -> Option<&SpeciesRecord> {
        match self {
            RecordLookup::Found(record) => Some(record),
            RecordLookup::NotFound => None,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, RecordLookup::Found(_))
    }
}

/// How well the store covers the label list, reported once at startup.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Coverage {
    pub covered: usize,
    pub missing: Vec<(usize, String)>,
    /// Class index, label, and the name of the row filed under that index
    pub misfiled: Vec<(usize, String, String)>,
}

#[derive(Debug, Default)]
pub struct KnowledgeStore {
    records: Vec<SpeciesRecord>,
    by_index: HashMap<usize, usize>,
    by_name: HashMap<String, usize>,
}

impl KnowledgeStore {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Load a store, picking the parser from the file extension.
    pub fn load(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();

        let store = match ext.as_str() {
            "json" => {
                let content = std::fs::read_to_string(path).map_err(|e| {
                    Error::startup(format!("cannot read {}: {}", path.display(), e))
                })?;
                Self::from_json_str(&content)
            }
            "csv" => {
                let file = File::open(path).map_err(|e| {
                    Error::startup(format!("cannot open {}: {}", path.display(), e))
                })?;
                Self::from_csv_reader(file)
            }
            "xlsx" | "xlsm" | "xls" | "ods" => Self::from_workbook(path),
            other => Err(Error::startup(format!(
                "unsupported knowledge store format '{}' for {}",
                other,
                path.display()
            ))),
        }
        .map_err(|e| match e {
            Error::StartupFailure(_) => e,
            other => Error::startup(format!("{}: {}", path.display(), other)),
        })?;

        info!("Loaded {} species records from {}", store.len(), path.display());
        Ok(store)
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        let root: Value = serde_json::from_str(content)?;
        let Value::Object(entries) = root else {
            return Err(Error::startup("JSON knowledge store must be an object keyed by species"));
        };

        let mut store = Self::default();
        for (name, value) in entries {
            let mut record = SpeciesRecord::new(name.trim());
            match value {
                Value::Object(fields) => {
                    for (key, value) in fields {
                        apply_json_field(&mut record, &key, value);
                    }
                }
                other => warn!("Species '{}' has a non-object entry ({}), keeping it empty", name, other),
            }
            store.insert(None, record)?;
        }
        Ok(store)
    }

    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(reader);

        let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
        let mut rows = Vec::new();
        for row in reader.records() {
            rows.push(row?.iter().map(str::to_string).collect());
        }
        Self::from_rows(&headers, rows)
    }

    pub fn from_workbook(path: &Path) -> Result<Self> {
        let mut workbook = open_workbook_auto(path)
            .map_err(|e| Error::startup(format!("cannot open workbook {}: {}", path.display(), e)))?;
        let range = workbook
            .worksheet_range_at(0)
            .ok_or_else(|| Error::startup(format!("workbook {} has no sheets", path.display())))?
            .map_err(|e| Error::startup(format!("cannot read sheet of {}: {}", path.display(), e)))?;

        let mut grid = range
            .rows()
            .map(|row| row.iter().map(cell_to_string).collect::<Vec<String>>());
        let headers = grid
            .next()
            .ok_or_else(|| Error::startup(format!("workbook {} is empty", path.display())))?;
        Self::from_rows(&headers, grid.collect())
    }

    /// Build a store from a header row and data rows. Without an index column
    /// the row position (blank rows excluded) is the class index.
    pub fn from_rows(headers: &[String], rows: Vec<Vec<String>>) -> Result<Self> {
        let layout = ColumnLayout::from_headers(headers)?;

        let mut store = Self::default();
        let mut position = 0usize;
        for (line, row) in rows.into_iter().enumerate() {
            if row.iter().all(|c| c.trim().is_empty()) {
                continue;
            }
            let (index, record) = layout.parse_row(&row, position, line + 2)?;
            store.insert(Some(index), record)?;
            position += 1;
        }
        Ok(store)
    }

    fn insert(&mut self, index: Option<usize>, record: SpeciesRecord) -> Result<()> {
        let slot = self.records.len();
        if let Some(index) = index {
            if self.by_index.insert(index, slot).is_some() {
                return Err(Error::startup(format!("duplicate class index {}", index)));
            }
        }
        let key = normalize_name(&record.name);
        if self.by_name.contains_key(&key) {
            warn!("Duplicate species '{}' in knowledge store, first entry wins", record.name);
        } else {
            self.by_name.insert(key, slot);
        }
        self.records.push(record);
        Ok(())
    }

    pub fn get_by_index(&self, index: usize) -> Option<&SpeciesRecord> {
        self.by_index.get(&index).map(|&slot| &self.records[slot])
    }

    pub fn get_by_name(&self, name: &str) -> Option<&SpeciesRecord> {
        self.by_name
            .get(&normalize_name(name))
            .map(|&slot| &self.records[slot])
    }

    /// Record for class `index` named `label`. The index is tried first but
    /// only counts when the row carries the same name; otherwise the name
    /// decides. Never fails: absence is `NotFound`.
    pub fn lookup(&self, index: usize, label: &str) -> RecordLookup {
        match self.find(index, label) {
            Some(record) => RecordLookup::Found(record.clone()),
            None => RecordLookup::NotFound,
        }
    }

    pub fn has_record(&self, index: usize, label: &str) -> bool {
        self.find(index, label).is_some()
    }

    fn find(&self, index: usize, label: &str) -> Option<&SpeciesRecord> {
        let key = normalize_name(label);
        self.get_by_index(index)
            .filter(|record| normalize_name(&record.name) == key)
            .or_else(|| self.by_name.get(&key).map(|&slot| &self.records[slot]))
    }

    /// Whether rows carry class indices (tabular stores do, JSON does not).
    pub fn is_indexed(&self) -> bool {
        !self.by_index.is_empty()
    }

    /// Class labels implied by the row order of a tabular store.
    pub fn row_labels(&self) -> Result<ClassLabels> {
        if !self.is_indexed() {
            return Err(Error::startup(
                "knowledge store has no class indices; pass a labels file",
            ));
        }
        let mut names = Vec::with_capacity(self.by_index.len());
        for index in 0..self.by_index.len() {
            let slot = self.by_index.get(&index).ok_or_else(|| {
                Error::startup(format!("class index {} missing from knowledge store", index))
            })?;
            names.push(self.records[*slot].name.clone());
        }
        Ok(ClassLabels::new(names))
    }

    /// Compare the store against the labels and log what is missing.
    pub fn audit(&self, labels: &ClassLabels) -> Coverage {
        let mut coverage = Coverage::default();
        for (index, label) in labels.iter().enumerate() {
            if let Some(row) = self.get_by_index(index) {
                if normalize_name(&row.name) != normalize_name(label) {
                    warn!(
                        "Class {} is '{}' but row {} of the store is '{}'",
                        index, label, index, row.name
                    );
                    coverage.misfiled.push((index, label.to_string(), row.name.clone()));
                }
            }
            match self.find(index, label) {
                Some(_) => coverage.covered += 1,
                None => coverage.missing.push((index, label.to_string())),
            }
        }
        if !coverage.missing.is_empty() {
            warn!(
                "{} of {} labels have no species record",
                coverage.missing.len(),
                labels.len()
            );
            for (index, label) in &coverage.missing {
                debug!("No record for class {} '{}'", index, label);
            }
        }
        coverage
    }
}

fn apply_json_field(record: &mut SpeciesRecord, key: &str, value: Value) {
    let norm = header_key(key);
    if norm == "taxonomy" || norm == "taxonomicclassification" {
        if let Value::Object(nested) = value {
            for (key, value) in nested {
                apply_json_field(record, &key, value);
            }
        }
        return;
    }

    match Field::from_key(key) {
        Some(field) => record.set(field, json_text(value)),
        None => debug!("Ignoring key '{}' on '{}'", key, record.name),
    }
}

/// Strings pass through, numbers and bools are printed, lists are joined.
fn json_text(value: Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Array(items) => {
            let parts: Vec<String> = items
                .into_iter()
                .filter_map(json_text)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            if parts.is_empty() {
                None
            } else {
                Some(parts.join(", "))
            }
        }
        Value::Null | Value::Object(_) => None,
    }
}

fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Float(f) => {
            if f.fract() == 0.0 && f.abs() < 9_007_199_254_740_992.0 {
                format!("{:.0}", f)
            } else {
                f.to_string()
            }
        }
        Data::Int(i) => i.to_string(),
        Data::Bool(b) => b.to_string(),
        Data::DateTime(serial) => serial.as_f64().to_string(),
        Data::DateTimeIso(s) => s.clone(),
        Data::DurationIso(s) => s.clone(),
        Data::Error(e) => format!("#ERROR:{:?}", e),
    }
}

#[derive(Debug)]
struct ColumnLayout {
    index: Option<usize>,
    name: Option<usize>,
    fields: Vec<(usize, Field)>,
}

impl ColumnLayout {
    const INDEX_HEADERS: [&'static str; 4] = ["index", "classindex", "classid", "id"];
    const NAME_HEADERS: [&'static str; 6] =
        ["name", "insect", "insectname", "speciesname", "label", "classname"];

    fn from_headers(headers: &[String]) -> Result<Self> {
        let mut layout = ColumnLayout { index: None, name: None, fields: Vec::new() };
        for (col, header) in headers.iter().enumerate() {
            let key = header_key(header);
            if key.is_empty() {
                continue;
            }
            if Self::INDEX_HEADERS.contains(&key.as_str()) {
                layout.index.get_or_insert(col);
            } else if Self::NAME_HEADERS.contains(&key.as_str()) {
                layout.name.get_or_insert(col);
            } else if let Some(field) = Field::from_key(header) {
                layout.fields.push((col, field));
            } else {
                debug!("Ignoring column '{}'", header);
            }
        }

        let has_species = layout.fields.iter().any(|(_, f)| *f == Field::Species);
        if layout.name.is_none() && !has_species {
            return Err(Error::startup(
                "tabular knowledge store needs a Name or Species column",
            ));
        }
        Ok(layout)
    }

    fn parse_row(&self, row: &[String], position: usize, line: usize) -> Result<(usize, SpeciesRecord)> {
        let cell = |col: usize| row.get(col).map(|s| s.trim()).unwrap_or("");

        let index = match self.index {
            Some(col) => {
                let raw = cell(col);
                raw.parse::<usize>().map_err(|_| {
                    Error::startup(format!("row {}: class index '{}' is not a number", line, raw))
                })?
            }
            None => position,
        };

        let mut record = SpeciesRecord::default();
        for &(col, field) in &self.fields {
            record.set(field, Some(cell(col).to_string()));
        }

        record.name = match self.name {
            Some(col) => cell(col).to_string(),
            None => record.get(Field::Species).unwrap_or_default().to_string(),
        };
        if record.name.is_empty() {
            return Err(Error::startup(format!("row {}: species name is empty", line)));
        }
        Ok((index, record))
    }
}
