use comfy_table::modifiers::UTF8_ROUND_CORNERS;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, Color as TableColor, ContentArrangement, Table};

/// Table and cell creation helpers
pub fn create_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

/// Milliseconds, colored against a good/poor threshold pair.
pub fn color_coded_timing_cell(millis: Option<f64>, good: f64, poor: f64) -> Cell {
    let Some(millis) = millis else {
        return Cell::new("-").fg(TableColor::DarkGrey);
    };

    let text = format!("{millis:.0} ms");
    if millis <= good {
        Cell::new(text).fg(TableColor::Green)
    } else if millis <= poor {
        Cell::new(text).fg(TableColor::Yellow)
    } else {
        Cell::new(text).fg(TableColor::Red)
    }
}

pub fn color_coded_status_cell(status_code: u16) -> Cell {
    if status_code == 200 {
        Cell::new(status_code).fg(TableColor::Green)
    } else {
        Cell::new(status_code).fg(TableColor::Red)
    }
}
