use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::BTreeMap;
use std::fmt;

use crate::model::{TripRequest, VehicleRef};
use crate::text::is_blank;

lazy_static! {
    /// Old Brazilian plates (`ABC-1234`) and Mercosul plates (`ABC1C34`).
    static ref PLATE_PATTERN: Regex =
        Regex::new(r"(?i)^[A-Z]{3}[- ]?[0-9][A-Z0-9][0-9]{2}$").unwrap();
}

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMATS: [&str; 2] = ["%H:%M", "%H:%M:%S"];

pub const MSG_WORK_NAME_REQUIRED: &str = "Nome da obra é obrigatório";
pub const MSG_STRUCTURE_REQUIRED: &str = "Código da estrutura é obrigatório";
pub const MSG_STRUCTURE_DIGITS: &str = "A estrutura deve ter exatamente 6 dígitos";
pub const MSG_CITY_REQUIRED: &str = "Cidade destino é obrigatória";
pub const MSG_DRIVER_REQUIRED: &str = "Nome do motorista é obrigatório";
pub const MSG_VEHICLE_REQUIRED: &str = "Selecione um veículo";
pub const MSG_CUSTOM_PLATE_REQUIRED: &str = "Placa é obrigatória para outro veículo";
pub const MSG_CUSTOM_PLATE_PATTERN: &str =
    "A placa deve ser um padrão válido (ex: ABC-1234 ou ABC1C34)";
pub const MSG_EXIT_DATE_REQUIRED: &str = "Data de saída é obrigatória";
pub const MSG_EXIT_TIME_REQUIRED: &str = "Horário de saída é obrigatório";
pub const MSG_EXIT_IN_PAST: &str = "A saída deve ser igual ou depois da data e horário atual";
pub const MSG_RETURN_NOT_AFTER_EXIT: &str = "O retorno deve ser posterior à data e hora da saída";
pub const MSG_RETURN_INCOMPLETE: &str = "Informe data e horário de retorno";
pub const MSG_WEIGHT_NEGATIVE: &str = "Peso não pode ser negativo";
pub const MSG_VOLUME_NEGATIVE: &str = "Volume não pode ser negativo";
pub const MSG_INVALID_DATE_TIME: &str = "Data ou horário inválido";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FormField {
    WorkName,
    StructureId,
    DestinationCity,
    DriverName,
    Vehicle,
    CustomVehiclePlate,
    ExitDate,
    ExitTime,
    ReturnDate,
    ReturnTime,
    TotalWeight,
    Volume,
}

impl FormField {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::WorkName => "workName",
            Self::StructureId => "structureId",
            Self::DestinationCity => "destinationCity",
            Self::DriverName => "driverName",
            Self::Vehicle => "vehicle",
            Self::CustomVehiclePlate => "customVehiclePlate",
            Self::ExitDate => "exitDate",
            Self::ExitTime => "exitTime",
            Self::ReturnDate => "returnDate",
            Self::ReturnTime => "returnTime",
            Self::TotalWeight => "totalWeight",
            Self::Volume => "volume",
        }
    }
}

impl fmt::Display for FormField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Field-keyed messages. Empty means the request may move on to preview.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors(BTreeMap<FormField, String>);

impl ValidationErrors {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn get(&self, field: FormField) -> Option<&str> {
        self.0.get(&field).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (FormField, &str)> {
        self.0.iter().map(|(field, message)| (*field, message.as_str()))
    }

    pub fn remove(&mut self, field: FormField) -> Option<String> {
        self.0.remove(&field)
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    fn insert(&mut self, field: FormField, message: &str) {
        self.0.insert(field, message.to_string());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationPolicy {
    /// Structure ids must be exactly six ASCII digits.
    pub strict_structure_id: bool,
}

impl Default for ValidationPolicy {
    fn default() -> Self {
        Self {
            strict_structure_id: true,
        }
    }
}

#[must_use]
pub fn is_valid_plate(plate: &str) -> bool {
    PLATE_PATTERN.is_match(plate.trim())
}

/// Parses a free-text number, accepting `,` as the decimal separator.
#[must_use]
pub fn parse_decimal(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.replace(',', ".").parse().ok()
}

fn parse_date_time(date: &str, time: &str) -> Option<NaiveDateTime> {
    let date = NaiveDate::parse_from_str(date.trim(), DATE_FORMAT).ok()?;
    let time = TIME_FORMATS
        .iter()
        .find_map(|format| NaiveTime::parse_from_str(time.trim(), format).ok())?;
    Some(date.and_time(time))
}

/// Checks `request` against `now` (local wall-clock time). Never fails; problems come back as messages.
#[must_use]
pub fn validate(
    request: &TripRequest,
    now: NaiveDateTime,
    policy: &ValidationPolicy,
) -> ValidationErrors {
    let mut errors = ValidationErrors::default();

    if is_blank(&request.work_name) {
        errors.insert(FormField::WorkName, MSG_WORK_NAME_REQUIRED);
    }

    if is_blank(&request.structure_id) {
        errors.insert(FormField::StructureId, MSG_STRUCTURE_REQUIRED);
    } else if policy.strict_structure_id
        && !(request.structure_id.len() == 6
            && request.structure_id.bytes().all(|b| b.is_ascii_digit()))
    {
        errors.insert(FormField::StructureId, MSG_STRUCTURE_DIGITS);
    }

    if is_blank(&request.destination_city) {
        errors.insert(FormField::DestinationCity, MSG_CITY_REQUIRED);
    }
    if is_blank(&request.driver_name) {
        errors.insert(FormField::DriverName, MSG_DRIVER_REQUIRED);
    }

    match &request.vehicle {
        None => errors.insert(FormField::Vehicle, MSG_VEHICLE_REQUIRED),
        Some(VehicleRef::Known(plate)) if is_blank(plate) => {
            errors.insert(FormField::Vehicle, MSG_VEHICLE_REQUIRED);
        }
        Some(VehicleRef::Custom { plate, .. }) if is_blank(plate) => {
            errors.insert(FormField::CustomVehiclePlate, MSG_CUSTOM_PLATE_REQUIRED);
        }
        Some(VehicleRef::Custom { plate, .. }) if !is_valid_plate(plate) => {
            errors.insert(FormField::CustomVehiclePlate, MSG_CUSTOM_PLATE_PATTERN);
        }
        Some(_) => {}
    }

    if is_blank(&request.exit_date) {
        errors.insert(FormField::ExitDate, MSG_EXIT_DATE_REQUIRED);
    }
    if is_blank(&request.exit_time) {
        errors.insert(FormField::ExitTime, MSG_EXIT_TIME_REQUIRED);
    }

    let mut exit = None;
    if !is_blank(&request.exit_date) && !is_blank(&request.exit_time) {
        match parse_date_time(&request.exit_date, &request.exit_time) {
            None => errors.insert(FormField::ExitDate, MSG_INVALID_DATE_TIME),
            Some(at) if at < now => errors.insert(FormField::ExitDate, MSG_EXIT_IN_PAST),
            Some(at) => exit = Some(at),
        }
    }

    match (is_blank(&request.return_date), is_blank(&request.return_time)) {
        (true, true) => {}
        (true, false) => errors.insert(FormField::ReturnDate, MSG_RETURN_INCOMPLETE),
        (false, true) => errors.insert(FormField::ReturnTime, MSG_RETURN_INCOMPLETE),
        (false, false) => match parse_date_time(&request.return_date, &request.return_time) {
            None => errors.insert(FormField::ReturnDate, MSG_INVALID_DATE_TIME),
            Some(back) if exit.is_some_and(|exit| back <= exit) => {
                errors.insert(FormField::ReturnDate, MSG_RETURN_NOT_AFTER_EXIT);
            }
            Some(_) => {}
        },
    }

    if parse_decimal(&request.total_weight).is_some_and(|w| w < 0.0) {
        errors.insert(FormField::TotalWeight, MSG_WEIGHT_NEGATIVE);
    }
    if parse_decimal(&request.volume).is_some_and(|v| v < 0.0) {
        errors.insert(FormField::Volume, MSG_VOLUME_NEGATIVE);
    }

    errors
}
