use chrono::NaiveDate;
use url::form_urlencoded::byte_serialize;
use url::Url;

use crate::config::DispatchConfig;
use crate::model::{Asset, Record, TripRequest, Vehicle, VehicleRef};
use crate::text::is_blank;
use crate::UNKNOWN_ASSET_PLACEHOLDER;

const WORK_NAME_PLACEHOLDER: &str = "[Obra]";
const NO_ITEMS_LINE: &str = "(Nenhum item selecionado)";

/// `YYYY-MM-DD` to `DD/MM/YYYY`; anything else is printed as typed.
fn display_date(raw: &str) -> String {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_or_else(|_| raw.trim().to_string(), |d| d.format("%d/%m/%Y").to_string())
}

fn vehicle_line(vehicle: Option<&VehicleRef>, vehicles: &[Vehicle]) -> String {
    match vehicle {
        None => String::new(),
        Some(VehicleRef::Known(plate)) => match vehicles.iter().find(|v| &v.plate == plate) {
            Some(v) => format!("{} ({})", v.plate, v.model),
            None => plate.clone(),
        },
        Some(VehicleRef::Custom { plate, model, .. }) => {
            if is_blank(model) {
                plate.trim().to_string()
            } else {
                format!("{} ({})", plate.trim(), model.trim())
            }
        }
    }
}

fn asset_lines(request: &TripRequest, assets: &[Asset]) -> Vec<String> {
    request
        .lines
        .iter()
        .filter_map(|line| {
            let key = line.asset.as_ref()?;
            let description = assets
                .iter()
                .find(|a| &a.key() == key)
                .map_or(UNKNOWN_ASSET_PLACEHOLDER, |a| a.description.as_str());
            Some(format!("{} - {} - {}", line.quantity, key.fiscal_code(), description))
        })
        .collect()
}

/// Renders the dispatch text for `request`, resolving references against the given collections.
#[must_use]
pub fn generate_message(request: &TripRequest, assets: &[Asset], vehicles: &[Vehicle]) -> String {
    let work_name = if is_blank(&request.work_name) {
        WORK_NAME_PLACEHOLDER
    } else {
        request.work_name.trim()
    };

    let mut lines = vec![
        format!("Favor solicitar NF para a obra: {work_name}, segue informações:"),
        format!("Estrutura: {}", request.structure_id.trim()),
        format!("Data: {}", display_date(&request.exit_date)),
        format!("Horário: {}", request.exit_time.trim()),
        format!("Cidade destino: {}", request.destination_city.trim()),
        format!("Motorista: {}", request.driver_name.trim()),
        format!("Veículo: {}", vehicle_line(request.vehicle.as_ref(), vehicles)),
        format!("Peso: {}", request.total_weight.trim()),
        format!("Volume: {}", request.volume.trim()),
        format!(
            "Se Haverá Materiais: {}",
            if request.has_materials { "Sim" } else { "Não" }
        ),
        String::new(),
        "Imobilizado:".to_string(),
    ];

    let items = asset_lines(request, assets);
    if items.is_empty() {
        lines.push(NO_ITEMS_LINE.to_string());
    } else {
        lines.extend(items);
    }

    if !is_blank(&request.return_date) {
        lines.push(String::new());
        lines.push("PREVISÃO DE RETORNO".to_string());
        lines.push(format!("Data: {}", display_date(&request.return_date)));
        lines.push(format!("Horário: {}", request.return_time.trim()));
    }

    let mut message = lines.join("\n");
    if !is_blank(&request.observations) {
        message.push_str("\n\nObservações: ");
        message.push_str(request.observations.trim());
    }
    message
}

/// Deep link that opens the messaging app with `message` prefilled.
pub fn dispatch_url(config: &DispatchConfig, message: &str) -> Result<Url, url::ParseError> {
    let mut url = Url::parse(&config.base_url)?.join(config.phone.trim())?;
    let encoded: String = byte_serialize(message.as_bytes()).collect();
    // Form encoding turns spaces into '+'; literal '+' is already %2B.
    url.set_query(Some(&format!("text={}", encoded.replace('+', "%20"))));
    Ok(url)
}
