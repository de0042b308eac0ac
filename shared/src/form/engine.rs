use chrono::NaiveDateTime;
use tracing::debug;

use crate::form::message::generate_message;
use crate::form::validation::{validate, FormField, ValidationErrors, ValidationPolicy};
use crate::model::{
    Asset, AssetKey, HistoryEntry, LineId, SelectedAssetLine, TripRequest, UnixTimeMs, Vehicle,
    VehicleRef,
};
use crate::{Confirmation, CUSTOM_VEHICLE_SENTINEL};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormMode {
    Editing,
    Preview,
}

/// Owns one trip request while it is being filled in and previewed.
#[derive(Debug, Clone)]
pub struct TripFormEngine {
    request: TripRequest,
    errors: ValidationErrors,
    mode: FormMode,
    policy: ValidationPolicy,
}

impl Default for TripFormEngine {
    fn default() -> Self {
        Self::new(ValidationPolicy::default())
    }
}

impl TripFormEngine {
    #[must_use]
    pub fn new(policy: ValidationPolicy) -> Self {
        Self {
            request: TripRequest::default(),
            errors: ValidationErrors::default(),
            mode: FormMode::Editing,
            policy,
        }
    }

    #[must_use]
    pub fn request(&self) -> &TripRequest {
        &self.request
    }

    #[must_use]
    pub fn errors(&self) -> &ValidationErrors {
        &self.errors
    }

    #[must_use]
    pub fn mode(&self) -> FormMode {
        self.mode
    }

    pub fn set_work_name(&mut self, value: impl Into<String>) {
        self.edit().work_name = value.into();
        self.errors.remove(FormField::WorkName);
    }

    pub fn set_structure_id(&mut self, value: impl Into<String>) {
        self.edit().structure_id = value.into();
        self.errors.remove(FormField::StructureId);
    }

    pub fn set_destination_city(&mut self, value: impl Into<String>) {
        self.edit().destination_city = value.into();
        self.errors.remove(FormField::DestinationCity);
    }

    pub fn set_driver_name(&mut self, value: impl Into<String>) {
        self.edit().driver_name = value.into();
        self.errors.remove(FormField::DriverName);
    }

    pub fn set_vehicle(&mut self, vehicle: Option<VehicleRef>) {
        self.edit().vehicle = vehicle;
        self.errors.remove(FormField::Vehicle);
        self.errors.remove(FormField::CustomVehiclePlate);
    }

    /// Applies a value coming from the vehicle picker: empty clears it, the
    /// custom sentinel starts a blank custom vehicle, free text becomes its plate.
    pub fn set_vehicle_from_picker(&mut self, value: &str, known: &[Vehicle]) {
        let value = value.trim();
        let vehicle = if value.is_empty() {
            None
        } else if value == CUSTOM_VEHICLE_SENTINEL {
            Some(VehicleRef::custom_empty())
        } else if known.iter().any(|v| v.plate == value) {
            Some(VehicleRef::Known(value.to_string()))
        } else {
            Some(VehicleRef::Custom {
                plate: value.to_uppercase(),
                model: String::new(),
                unit: String::new(),
                sector: String::new(),
            })
        };
        self.set_vehicle(vehicle);
    }

    pub fn set_exit_date(&mut self, value: impl Into<String>) {
        self.edit().exit_date = value.into();
        self.errors.remove(FormField::ExitDate);
    }

    pub fn set_exit_time(&mut self, value: impl Into<String>) {
        self.edit().exit_time = value.into();
        self.errors.remove(FormField::ExitTime);
        self.errors.remove(FormField::ExitDate);
    }

    pub fn set_return_date(&mut self, value: impl Into<String>) {
        self.edit().return_date = value.into();
        self.errors.remove(FormField::ReturnDate);
    }

    pub fn set_return_time(&mut self, value: impl Into<String>) {
        self.edit().return_time = value.into();
        self.errors.remove(FormField::ReturnTime);
        self.errors.remove(FormField::ReturnDate);
    }

    pub fn set_total_weight(&mut self, value: impl Into<String>) {
        self.edit().total_weight = value.into();
        self.errors.remove(FormField::TotalWeight);
    }

    pub fn set_volume(&mut self, value: impl Into<String>) {
        self.edit().volume = value.into();
        self.errors.remove(FormField::Volume);
    }

    pub fn set_has_materials(&mut self, value: bool) {
        self.edit().has_materials = value;
    }

    pub fn set_observations(&mut self, value: impl Into<String>) {
        self.edit().observations = value.into();
    }

    #[must_use]
    pub fn lines(&self) -> &[SelectedAssetLine] {
        &self.request.lines
    }

    pub fn add_line(&mut self) -> LineId {
        let line = SelectedAssetLine::new();
        let id = line.id;
        self.edit().lines.push(line);
        id
    }

    pub fn remove_line(&mut self, id: LineId) -> bool {
        let Some(index) = self.line_index(id) else {
            return false;
        };
        self.edit().lines.remove(index);
        true
    }

    pub fn set_line_asset(&mut self, id: LineId, asset: Option<AssetKey>) -> bool {
        let Some(line) = self.line_mut(id) else {
            return false;
        };
        line.asset = asset;
        true
    }

    /// Zero is raised to one.
    pub fn set_line_quantity(&mut self, id: LineId, quantity: u32) -> bool {
        let Some(line) = self.line_mut(id) else {
            return false;
        };
        line.quantity = quantity.max(1);
        true
    }

    pub fn clear_lines(&mut self, confirmation: Confirmation) -> usize {
        if !confirmation.is_confirmed() {
            return 0;
        }
        let count = self.request.lines.len();
        self.edit().lines.clear();
        count
    }

    /// Validates against `now`; moves to preview only when there are no errors.
    pub fn request_preview(&mut self, now: NaiveDateTime) -> Result<(), ValidationErrors> {
        self.errors = validate(&self.request, now, &self.policy);
        if self.errors.is_empty() {
            self.mode = FormMode::Preview;
            Ok(())
        } else {
            debug!(errors = self.errors.len(), "preview blocked by validation");
            Err(self.errors.clone())
        }
    }

    pub fn back_to_edit(&mut self) {
        self.mode = FormMode::Editing;
    }

    #[must_use]
    pub fn message(&self, assets: &[Asset], vehicles: &[Vehicle]) -> String {
        generate_message(&self.request, assets, vehicles)
    }

    pub fn reset(&mut self, confirmation: Confirmation) -> bool {
        if !confirmation.is_confirmed() {
            return false;
        }
        self.request = TripRequest::default();
        self.errors.clear();
        self.mode = FormMode::Editing;
        true
    }

    /// Copies a stored request into the form with fresh line ids.
    pub fn load_from_history(&mut self, entry: &HistoryEntry) {
        let mut request = entry.request.clone();
        request.lines = entry
            .request
            .lines
            .iter()
            .map(SelectedAssetLine::duplicate)
            .collect();
        self.request = request;
        self.errors.clear();
        self.mode = FormMode::Editing;
    }

    #[must_use]
    pub fn snapshot(&self, is_draft: bool, now: UnixTimeMs) -> HistoryEntry {
        HistoryEntry::new(self.request.clone(), is_draft, now)
    }

    /// Any change to the request leaves preview, so a shown preview always
    /// matches the message it was generated from.
    fn edit(&mut self) -> &mut TripRequest {
        if self.mode == FormMode::Preview {
            debug!("request edited during preview, back to editing");
            self.mode = FormMode::Editing;
        }
        &mut self.request
    }

    fn line_index(&self, id: LineId) -> Option<usize> {
        self.request.lines.iter().position(|line| line.id == id)
    }

    fn line_mut(&mut self, id: LineId) -> Option<&mut SelectedAssetLine> {
        let index = self.line_index(id)?;
        Some(&mut self.edit().lines[index])
    }
}
