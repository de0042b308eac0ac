//! Typeahead selection state machine.
//!
//! The UI feeds input events in and renders from the accessors; every
//! transition reports what happened through a [`SelectOutcome`].

use crate::model::{Asset, Record, Vehicle};
use crate::text::{contains_normalized, is_blank, normalize_text};
use crate::CUSTOM_VEHICLE_SENTINEL;

const CUSTOM_VEHICLE_LABEL: &str = "Outro veículo";
const CUSTOM_VEHICLE_SUB_LABEL: &str = "Digitar placa manualmente";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectOption {
    pub value: String,
    pub label: String,
    pub sub_label: Option<String>,
}

impl SelectOption {
    #[must_use]
    pub fn new(value: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            label: label.into(),
            sub_label: None,
        }
    }

    #[must_use]
    pub fn with_sub_label(mut self, sub_label: impl Into<String>) -> Self {
        self.sub_label = Some(sub_label.into());
        self
    }

    fn matches(&self, normalized_needle: &str) -> bool {
        contains_normalized(&self.label, normalized_needle)
            || self
                .sub_label
                .as_deref()
                .is_some_and(|sub| contains_normalized(sub, normalized_needle))
    }
}

/// Options for the asset picker: label is the description, secondary line `"{code} | {patrimony}"`.
#[must_use]
pub fn asset_options(assets: &[Asset]) -> Vec<SelectOption> {
    assets
        .iter()
        .map(|asset| {
            SelectOption::new(asset.key().to_string(), asset.description.clone()).with_sub_label(
                format!("{} | {}", asset.fiscal_code, asset.patrimony),
            )
        })
        .collect()
}

/// Options for the vehicle picker, followed by the free-entry option.
#[must_use]
pub fn vehicle_options(vehicles: &[Vehicle]) -> Vec<SelectOption> {
    vehicles
        .iter()
        .map(|v| {
            SelectOption::new(v.plate.clone(), format!("{} - {}", v.plate, v.model))
                .with_sub_label(format!("{} / {}", v.unit, v.sector))
        })
        .chain(std::iter::once(
            SelectOption::new(CUSTOM_VEHICLE_SENTINEL, CUSTOM_VEHICLE_LABEL)
                .with_sub_label(CUSTOM_VEHICLE_SUB_LABEL),
        ))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyInput {
    ArrowDown,
    ArrowUp,
    Enter,
    Escape,
    Tab,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectOutcome {
    None,
    Opened,
    /// An option was chosen; carries its value.
    Committed(String),
    /// Raw text accepted with no matching option.
    FreeText(String),
    /// Enter with nothing to choose; the caller moves on (e.g. adds a row).
    Continue,
    Closed,
    Cleared,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectedValue {
    Option(String),
    FreeText(String),
}

impl SelectedValue {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Option(value) | Self::FreeText(value) => value,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SearchableSelect {
    options: Vec<SelectOption>,
    value: Option<SelectedValue>,
    search: String,
    open: bool,
    focused: Option<usize>,
    filtered: Vec<usize>,
    allow_free_text: bool,
}

impl SearchableSelect {
    #[must_use]
    pub fn new(options: Vec<SelectOption>, allow_free_text: bool) -> Self {
        let mut select = Self {
            filtered: (0..options.len()).collect(),
            options,
            value: None,
            search: String::new(),
            open: false,
            focused: None,
            allow_free_text,
        };
        select.refilter();
        select
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open
    }

    #[must_use]
    pub fn search_text(&self) -> &str {
        &self.search
    }

    #[must_use]
    pub fn focused_index(&self) -> Option<usize> {
        self.focused
    }

    #[must_use]
    pub fn value(&self) -> Option<&SelectedValue> {
        self.value.as_ref()
    }

    /// Options matching the current search text, in their original order.
    #[must_use]
    pub fn filtered(&self) -> Vec<&SelectOption> {
        self.filtered.iter().map(|&i| &self.options[i]).collect()
    }

    pub fn set_options(&mut self, options: Vec<SelectOption>) {
        self.options = options;
        self.focused = None;
        if !self.open {
            self.search = self.committed_text();
        }
        self.refilter();
    }

    /// Programmatic value change; a value with no option is kept as free text.
    pub fn set_value(&mut self, value: Option<&str>) {
        self.value = match value {
            None => None,
            Some(v) if v.is_empty() => None,
            Some(v) if self.option_by_value(v).is_some() => Some(SelectedValue::Option(v.to_string())),
            Some(v) => Some(SelectedValue::FreeText(v.to_string())),
        };
        self.open = false;
        self.focused = None;
        self.search = self.committed_text();
        self.refilter();
    }

    pub fn focus(&mut self) -> SelectOutcome {
        self.focused = None;
        if self.open {
            return SelectOutcome::None;
        }
        self.open = true;
        SelectOutcome::Opened
    }

    pub fn type_text(&mut self, text: &str) -> SelectOutcome {
        let was_open = self.open;
        self.search = text.to_string();
        self.open = true;
        self.focused = None;
        self.refilter();

        if text.is_empty() && self.value.take().is_some() {
            SelectOutcome::Cleared
        } else if was_open {
            SelectOutcome::None
        } else {
            SelectOutcome::Opened
        }
    }

    pub fn key(&mut self, key: KeyInput) -> SelectOutcome {
        if !self.open {
            return match key {
                KeyInput::ArrowDown => self.focus(),
                KeyInput::Enter if self.value.is_some() => SelectOutcome::Continue,
                KeyInput::Enter => self.focus(),
                KeyInput::ArrowUp | KeyInput::Escape | KeyInput::Tab => SelectOutcome::None,
            };
        }

        match key {
            KeyInput::ArrowDown => {
                let last = self.filtered.len().checked_sub(1);
                self.focused = match (self.focused, last) {
                    (_, None) => None,
                    (None, Some(_)) => Some(0),
                    (Some(i), Some(last)) => Some((i + 1).min(last)),
                };
                SelectOutcome::None
            }
            KeyInput::ArrowUp => {
                self.focused = self.focused.map(|i| i.saturating_sub(1));
                SelectOutcome::None
            }
            KeyInput::Enter => self.enter(),
            KeyInput::Escape | KeyInput::Tab => self.close(),
        }
    }

    /// Click on the `index`-th visible option.
    pub fn select_index(&mut self, index: usize) -> SelectOutcome {
        match self.filtered.get(index) {
            Some(&option) => self.commit(option),
            None => SelectOutcome::None,
        }
    }

    /// Click outside the control.
    pub fn blur(&mut self) -> SelectOutcome {
        if self.open {
            self.close()
        } else {
            SelectOutcome::None
        }
    }

    pub fn clear(&mut self) -> SelectOutcome {
        self.value = None;
        self.search.clear();
        self.focused = None;
        self.open = true;
        self.refilter();
        SelectOutcome::Cleared
    }

    fn enter(&mut self) -> SelectOutcome {
        if let Some(&option) = self.focused.and_then(|i| self.filtered.get(i)) {
            return self.commit(option);
        }
        if let [only] = self.filtered[..] {
            return self.commit(only);
        }
        if self.filtered.is_empty() && self.allow_free_text && !is_blank(&self.search) {
            let text = self.search.trim().to_string();
            self.value = Some(SelectedValue::FreeText(text.clone()));
            self.search.clone_from(&text);
            self.open = false;
            self.focused = None;
            self.refilter();
            return SelectOutcome::FreeText(text);
        }
        SelectOutcome::Continue
    }

    fn commit(&mut self, option: usize) -> SelectOutcome {
        let chosen = &self.options[option];
        let value = chosen.value.clone();
        self.search.clone_from(&chosen.label);
        self.value = Some(SelectedValue::Option(value.clone()));
        self.open = false;
        self.focused = None;
        self.refilter();
        SelectOutcome::Committed(value)
    }

    fn close(&mut self) -> SelectOutcome {
        self.open = false;
        self.focused = None;
        self.search = self.committed_text();
        self.refilter();
        SelectOutcome::Closed
    }

    fn option_by_value(&self, value: &str) -> Option<&SelectOption> {
        self.options.iter().find(|o| o.value == value)
    }

    /// Text the input shows when nothing is being typed.
    fn committed_text(&self) -> String {
        match &self.value {
            Some(SelectedValue::Option(value)) => self
                .option_by_value(value)
                .map(|o| o.label.clone())
                .unwrap_or_default(),
            Some(SelectedValue::FreeText(text)) => text.clone(),
            None => String::new(),
        }
    }

    fn refilter(&mut self) {
        let needle = normalize_text(&self.search);
        self.filtered = self
            .options
            .iter()
            .enumerate()
            .filter(|(_, option)| option.matches(&needle))
            .map(|(i, _)| i)
            .collect();
    }
}
