//! Spreadsheet-style import and export of the reference collections.
//!
//! Rows are JSON objects keyed by column header. Headers are matched loosely
//! (accents, case and whitespace ignored) against a small synonym table.

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::model::{Asset, Vehicle};
use crate::text::{is_blank, normalize_header};

pub type Row = Map<String, Value>;

#[derive(Error, Debug)]
pub enum ImportError {
    #[error("import payload is not valid JSON: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("import payload must be an array of objects")]
    NotAnArray,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Column {
    FiscalCode,
    Patrimony,
    Description,
    Plate,
    Model,
    Unit,
    Sector,
}

impl Column {
    fn from_header(header: &str) -> Option<Self> {
        match normalize_header(header).as_str() {
            "codigofiscal" | "fiscalcode" | "codigo" | "code" => Some(Self::FiscalCode),
            "patrimonio" | "patrimony" => Some(Self::Patrimony),
            "descricao" | "description" | "desc" | "item" => Some(Self::Description),
            "placa" | "plate" => Some(Self::Plate),
            "modelo" | "model" => Some(Self::Model),
            "unidade" | "unit" => Some(Self::Unit),
            "setor" | "sector" => Some(Self::Sector),
            _ => None,
        }
    }

    fn export_header(self) -> &'static str {
        match self {
            Self::FiscalCode => "Código Fiscal",
            Self::Patrimony => "Patrimônio",
            Self::Description => "Descrição",
            Self::Plate => "Placa",
            Self::Model => "Modelo",
            Self::Unit => "Unidade",
            Self::Sector => "Setor",
        }
    }
}

/// Records recognized in an import plus how many rows were dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportReport<R> {
    pub records: Vec<R>,
    pub skipped: usize,
}

impl<R> Default for ImportReport<R> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
            skipped: 0,
        }
    }
}

fn cell_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

/// First non-blank cell whose header maps to `column`.
fn cell(row: &Row, column: Column) -> Option<String> {
    row.iter()
        .filter(|(header, _)| Column::from_header(header) == Some(column))
        .find_map(|(_, value)| cell_text(value).filter(|text| !is_blank(text)))
}

/// Parses a JSON array of header-keyed objects; non-object entries are dropped.
pub fn rows_from_json(payload: &str) -> Result<Vec<Row>, ImportError> {
    let Value::Array(items) = serde_json::from_str::<Value>(payload)? else {
        return Err(ImportError::NotAnArray);
    };
    Ok(items
        .into_iter()
        .filter_map(|item| match item {
            Value::Object(row) => Some(row),
            _ => None,
        })
        .collect())
}

/// Fiscal code and description are required; a missing patrimony becomes the placeholder.
#[must_use]
pub fn assets_from_rows(rows: &[Row]) -> ImportReport<Asset> {
    let mut report = ImportReport::default();
    for (index, row) in rows.iter().enumerate() {
        let fiscal_code = cell(row, Column::FiscalCode);
        let description = cell(row, Column::Description);
        match (fiscal_code, description) {
            (Some(fiscal_code), Some(description)) => {
                let patrimony = cell(row, Column::Patrimony).unwrap_or_default();
                report
                    .records
                    .push(Asset::new(fiscal_code, patrimony, description));
            }
            _ => {
                debug!(row = index, "asset row missing required columns");
                report.skipped += 1;
            }
        }
    }
    if report.skipped > 0 {
        warn!(
            skipped = report.skipped,
            imported = report.records.len(),
            "skipped incomplete asset rows"
        );
    }
    report
}

/// Plate and model are required; unit and sector fall back to the placeholder.
#[must_use]
pub fn vehicles_from_rows(rows: &[Row]) -> ImportReport<Vehicle> {
    let mut report = ImportReport::default();
    for (index, row) in rows.iter().enumerate() {
        match (cell(row, Column::Plate), cell(row, Column::Model)) {
            (Some(plate), Some(model)) => report.records.push(Vehicle::new(
                plate.to_uppercase(),
                model,
                cell(row, Column::Unit).unwrap_or_default(),
                cell(row, Column::Sector).unwrap_or_default(),
            )),
            _ => {
                debug!(row = index, "vehicle row missing required columns");
                report.skipped += 1;
            }
        }
    }
    if report.skipped > 0 {
        warn!(
            skipped = report.skipped,
            imported = report.records.len(),
            "skipped incomplete vehicle rows"
        );
    }
    report
}

fn export_row(cells: &[(Column, &str)]) -> Row {
    cells
        .iter()
        .map(|(column, value)| {
            (
                column.export_header().to_string(),
                Value::String((*value).to_string()),
            )
        })
        .collect()
}

#[must_use]
pub fn export_assets(assets: &[Asset]) -> Vec<Row> {
    assets
        .iter()
        .map(|a| {
            export_row(&[
                (Column::FiscalCode, a.fiscal_code.as_str()),
                (Column::Patrimony, a.patrimony.as_str()),
                (Column::Description, a.description.as_str()),
            ])
        })
        .collect()
}

#[must_use]
pub fn export_vehicles(vehicles: &[Vehicle]) -> Vec<Row> {
    vehicles
        .iter()
        .map(|v| {
            export_row(&[
                (Column::Plate, v.plate.as_str()),
                (Column::Model, v.model.as_str()),
                (Column::Unit, v.unit.as_str()),
                (Column::Sector, v.sector.as_str()),
            ])
        })
        .collect()
}
