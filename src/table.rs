use crate::registry::Registry;
use comfy_table::{presets::UTF8_FULL, Attribute, Cell, Color, ContentArrangement, Table};

/// Summary table of a registry snapshot, one row per device
pub fn render_registry(registry: &Registry) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .apply_modifier(comfy_table::modifiers::UTF8_ROUND_CORNERS);

    table.set_header(vec![
        "MAC",
        "Address",
        "Hostname",
        "Vendor",
        "Type",
        "Signal",
        "Confidence",
        "Status",
        "Scans",
    ]);

    for device in registry.devices() {
        let status = if device.is_online {
            Cell::new("online").fg(Color::Green)
        } else {
            Cell::new("offline").fg(Color::DarkGrey)
        };
        let mac = if device.is_authorized {
            Cell::new(device.hardware_address.as_str())
        } else {
            Cell::new(device.hardware_address.as_str())
                .fg(Color::Red)
                .add_attribute(Attribute::Bold)
        };
        let signal = device
            .effective_signal()
            .map(|s| format!("{} dBm", s))
            .unwrap_or_else(|| "N/A".to_string());

        table.add_row(vec![
            mac,
            Cell::new(device.addresses.to_string()),
            Cell::new(device.hostname.as_deref().unwrap_or("N/A")),
            Cell::new(device.vendor.as_deref().unwrap_or("N/A")),
            Cell::new(device.device_type.as_str()),
            Cell::new(signal),
            Cell::new(format!("{:.2}", device.confidence)),
            status,
            Cell::new(device.scan_count),
        ]);
    }

    table
}
