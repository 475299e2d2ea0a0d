use std::path::Path;

use insectifica::knowledge::Field;
use insectifica::{ClassLabels, Error, KnowledgeStore};

/// Writes `rows` to the first sheet, numbers as numeric cells and
/// `None` as blank cells.
fn write_workbook(path: &Path, rows: &[Vec<Option<&str>>]) {
    let mut book = umya_spreadsheet::new_file();
    let ws = book.get_sheet_by_name_mut("Sheet1").unwrap();
    for (r, row) in rows.iter().enumerate() {
        for (c, value) in row.iter().enumerate() {
            let Some(value) = value else { continue };
            let cell = ws.get_cell_mut((c as u32 + 1, r as u32 + 1));
            match value.parse::<f64>() {
                Ok(n) => cell.set_value_number(n),
                Err(_) => cell.set_value(value.to_string()),
            };
        }
    }
    umya_spreadsheet::writer::xlsx::write(&book, path).unwrap();
}

#[test]
fn xlsx_store_maps_headers_and_numeric_indices() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pest.xlsx");
    write_workbook(
        &path,
        &[
            vec![Some("Class ID"), Some("Insect Name"), Some("Order"), Some("Host Crops"), Some("Remarks")],
            vec![Some("2"), Some("Tuta absoluta"), Some("Lepidoptera"), Some("Tomato"), Some("x")],
            vec![None, None, None, None, None],
            vec![Some("0"), Some("Aphis craccivora"), Some("Hemiptera"), None, None],
            vec![Some("1"), Some("Apis mellifera"), Some("Hymenoptera"), Some("Sunflower"), None],
        ],
    );

    let store = KnowledgeStore::load(&path).unwrap();
    assert_eq!(store.len(), 3);
    assert!(store.is_indexed());

    let tuta = store.get_by_index(2).unwrap();
    assert_eq!(tuta.name, "Tuta absoluta");
    assert_eq!(tuta.get(Field::Order), Some("Lepidoptera"));
    assert_eq!(tuta.get(Field::HostCrops), Some("Tomato"));
    assert_eq!(store.get_by_index(0).unwrap().get(Field::HostCrops), None);

    let labels = store.row_labels().unwrap();
    assert_eq!(
        labels,
        ClassLabels::new(vec![
            "Aphis craccivora".into(),
            "Apis mellifera".into(),
            "Tuta absoluta".into(),
        ])
    );
    assert!(store.lookup(1, "apis mellifera").is_found());
}

#[test]
fn xlsx_without_index_uses_row_order() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pest.xlsx");
    write_workbook(
        &path,
        &[
            vec![Some("Species"), Some("Family")],
            vec![Some("Oryctes rhinoceros"), Some("Scarabaeidae")],
            vec![Some("Pieris brassicae"), Some("Pieridae")],
        ],
    );

    let store = KnowledgeStore::load(&path).unwrap();
    let labels = store.row_labels().unwrap();
    assert_eq!(labels.get(1), Some("Pieris brassicae"));
    assert_eq!(store.get_by_index(0).unwrap().get(Field::Family), Some("Scarabaeidae"));
}

#[test]
fn xlsx_fractional_index_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pest.xlsx");
    write_workbook(
        &path,
        &[
            vec![Some("Index"), Some("Name")],
            vec![Some("0.5"), Some("Tuta absoluta")],
        ],
    );
    assert!(matches!(KnowledgeStore::load(&path), Err(Error::StartupFailure(_))));
}
