use assert_matches::assert_matches;
use chrono::{NaiveDate, NaiveDateTime};
use std::sync::Arc;

use tripdesk_shared::capabilities::MemoryStorage;
use tripdesk_shared::config::DispatchConfig;
use tripdesk_shared::form::{dispatch_url, FormField, FormMode};
use tripdesk_shared::import::{assets_from_rows, rows_from_json};
use tripdesk_shared::model::{FixedClock, UnixTimeMs};
use tripdesk_shared::remote::MemoryRemote;
use tripdesk_shared::select::{asset_options, KeyInput};
use tripdesk_shared::{
    AssetKey, Confirmation, HistoryLog, SearchableSelect, SelectOutcome, SyncCoordinator,
    TripFormEngine, WriteOutcome,
};

fn morning() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 5, 10)
        .and_then(|d| d.and_hms_opt(8, 0, 0))
        .unwrap()
}

fn fill(engine: &mut TripFormEngine) {
    engine.set_work_name("Subestação Norte");
    engine.set_structure_id("123456");
    engine.set_destination_city("Chapecó");
    engine.set_driver_name("João");
    engine.set_exit_date("2024-05-10");
    engine.set_exit_time("09:30");
    engine.set_total_weight("120,5");
}

#[tokio::test]
async fn imported_asset_flows_into_dispatch_message_and_history() {
    let storage = Arc::new(MemoryStorage::new());
    let sync = SyncCoordinator::new(
        storage.clone(),
        Arc::new(MemoryRemote::new()),
        Arc::new(FixedClock::from_millis(1_715_000_000_000)),
    );

    let rows = rows_from_json(
        r#"[
            {"Código Fiscal": "X9", "Descrição": "Alicate amperímetro"},
            {"Codigo Fiscal": "X8", "Patrimonio": "12", "Descricao": "Trena a laser"},
            {"Descrição": "sem código"}
        ]"#,
    )
    .unwrap();
    let report = assets_from_rows(&rows);
    assert_eq!(report.skipped, 1);
    let (summary, outcome) = sync.import_assets(report.records).await.unwrap();
    assert_eq!(summary.inserted, 2);
    assert_eq!(outcome, WriteOutcome::Synced);

    let assets = sync.assets().await;
    let vehicles = sync.vehicles().await;

    let mut picker = SearchableSelect::new(asset_options(&assets), false);
    picker.type_text("ALICATE");
    let value = assert_matches!(picker.key(KeyInput::Enter), SelectOutcome::Committed(v) => v);
    let key: AssetKey = value.parse().unwrap();
    assert_eq!(key, AssetKey::new("X9", ""));

    let mut engine = TripFormEngine::default();
    fill(&mut engine);
    engine.set_vehicle_from_picker("XYZ-5678", &vehicles);
    let line = engine.add_line();
    engine.set_line_asset(line, Some(key));
    engine.set_line_quantity(line, 2);

    engine.request_preview(morning()).unwrap();
    assert_eq!(engine.mode(), FormMode::Preview);

    let message = engine.message(&assets, &vehicles);
    assert!(message.contains("Veículo: XYZ-5678 (Fiat Strada)"));
    assert!(message.contains("Peso: 120,5"));
    assert!(message.contains("Imobilizado:\n2 - X9 - Alicate amperímetro"));

    let url = dispatch_url(&DispatchConfig::default(), &message).unwrap();
    assert!(url
        .as_str()
        .starts_with("https://wa.me/554991109940?text=Favor%20solicitar%20NF"));

    let mut history = HistoryLog::load(storage.clone());
    let entry = engine.snapshot(false, UnixTimeMs(1_715_000_000_000));
    let id = entry.id;
    history.add(entry).unwrap();

    let reloaded = HistoryLog::load(storage);
    assert_eq!(reloaded.len(), 1);
    let stored = reloaded.get(id).unwrap();
    assert!(!stored.is_draft);

    assert!(engine.reset(Confirmation::Confirmed));
    engine.load_from_history(stored);
    assert_eq!(engine.mode(), FormMode::Editing);
    assert_eq!(engine.message(&assets, &vehicles), message);
}

#[test]
fn invalid_request_stays_in_edit_mode() {
    let mut engine = TripFormEngine::default();
    fill(&mut engine);
    engine.set_vehicle_from_picker("", &[]);
    engine.set_return_date("2024-05-10");
    engine.set_return_time("09:00");

    let errors = engine.request_preview(morning()).unwrap_err();
    assert!(errors.get(FormField::Vehicle).is_some());
    assert!(errors.get(FormField::ReturnDate).is_some());
    assert_eq!(engine.mode(), FormMode::Editing);

    engine.set_vehicle_from_picker("abc1d23", &[]);
    engine.set_return_time("17:00");
    assert!(engine.errors().get(FormField::Vehicle).is_none());
    assert!(engine.errors().get(FormField::ReturnDate).is_none());
    engine.request_preview(morning()).unwrap();
    assert!(engine.message(&[], &[]).contains("PREVISÃO DE RETORNO\nData: 10/05/2024\nHorário: 17:00"));
}

#[test]
fn history_is_bounded_and_newest_first() {
    let storage = Arc::new(MemoryStorage::new());
    let mut history = HistoryLog::load_with_capacity(storage, 2);
    let mut engine = TripFormEngine::default();

    for (i, name) in ["A", "B", "C"].into_iter().enumerate() {
        engine.set_work_name(name);
        let evicted = history
            .add(engine.snapshot(true, UnixTimeMs(i as u64)))
            .unwrap();
        assert_eq!(evicted.is_some(), i == 2);
    }

    let names: Vec<&str> = history
        .entries()
        .iter()
        .map(|e| e.request.work_name.as_str())
        .collect();
    assert_eq!(names, vec!["C", "B"]);
}
