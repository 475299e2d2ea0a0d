//! Plain-text report for the `identify` command.

use std::fmt::{self, Write};

use crate::convert::{MSG_INVALID_IMAGE, MSG_NO_RECORD, MSG_UNIDENTIFIED};
use crate::knowledge::{Field, SpeciesRecord};
use crate::pipeline::{Outcome, PredictionResult};

/// One outcome laid out the way the details panel shows it.
pub struct Report<'a>(pub &'a Outcome);

impl fmt::Display for Report<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Outcome::Identified(p) => {
                write_prediction(f, p)?;
                if let Some(record) = p.record.record() {
                    write_record(f, record)?;
                }
                Ok(())
            }
            Outcome::NoRecord(p) => {
                write_prediction(f, p)?;
                writeln!(f, "\n{}", MSG_NO_RECORD)
            }
            Outcome::Unidentified { .. } => writeln!(f, "{}", MSG_UNIDENTIFIED),
            Outcome::InvalidImage(reason) => writeln!(f, "{} ({})", MSG_INVALID_IMAGE, reason),
        }
    }
}

pub fn render(outcome: &Outcome) -> String {
    Report(outcome).to_string()
}

fn write_prediction(out: &mut impl Write, p: &PredictionResult) -> fmt::Result {
    writeln!(out, "Identified as: {}", p.label)?;
    writeln!(out, "Confidence: {:.1}%", p.confidence * 100.0)?;
    writeln!(out, "Inference time: {:.2} ms", p.inference_time_ms)?;

    if p.top_k.len() > 1 {
        writeln!(out, "\nTop-{} predictions:", p.top_k.len())?;
        for (i, r) in p.top_k.iter().enumerate() {
            writeln!(
                out,
                "  {}. {} (class {}) - {:.2}%",
                i + 1,
                r.label.as_deref().unwrap_or("Unknown"),
                r.index,
                r.probability * 100.0
            )?;
        }
    }
    Ok(())
}

fn write_record(out: &mut impl Write, record: &SpeciesRecord) -> fmt::Result {
    if let Some(common) = record.get(Field::CommonName) {
        writeln!(out, "Common name: {}", common)?;
    }

    writeln!(out, "\n## Taxonomic Classification")?;
    for field in Field::TAXONOMY {
        writeln!(out, "{}: {}", field.title(), record.field_or_placeholder(field))?;
    }

    for field in [
        Field::HostCrops,
        Field::DamageSymptoms,
        Field::IpmMeasures,
        Field::ChemicalControl,
    ] {
        writeln!(out, "\n## {}\n{}", field.title(), record.field_or_placeholder(field))?;
    }
    Ok(())
}
