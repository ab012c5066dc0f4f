use std::fmt::Write;

use comfy_table::{Cell, Color as TableColor};

use crate::analyzer::SuppressReason;
use crate::report::PageSummary;

use super::styling::{bright, bright_green, bright_red, bright_yellow, dim};
use super::tables::{color_coded_status_cell, color_coded_timing_cell, create_table};

/// Prints a human-readable summary of the tested pages to stdout.
///
/// Displays:
/// - Overview: server, page counts
/// - Pages: first-view median SpeedIndex, start render, TTFB and fully loaded
/// - Without result: URLs whose test was suppressed, with the reason
///
/// Timings are green when good, yellow when they need improvement and red
/// when poor.
pub fn print_summary(host: &str, pages: &[PageSummary], suppressed: &[(String, SuppressReason)]) {
    println!("{}", render_summary(host, pages, suppressed));
}

fn create_cyan_header(labels: &[&str]) -> Vec<Cell> {
    labels
        .iter()
        .map(|label| Cell::new(*label).fg(TableColor::Cyan))
        .collect()
}

fn add_section_header(output: &mut String, emoji: &str, title: &str) {
    let _ = writeln!(output, "{} {}", bright(emoji), bright(title).underlined());
}

fn render_summary(
    host: &str,
    pages: &[PageSummary],
    suppressed: &[(String, SuppressReason)],
) -> String {
    let mut output = String::new();

    add_section_header(&mut output, "📊", "Overview");

    let suppressed_display = if suppressed.is_empty() {
        bright_green(suppressed.len())
    } else {
        bright_red(suppressed.len())
    };

    let _ = writeln!(
        output,
        "  {} {}\n  {} {}\n  {} {}\n",
        dim("WebPageTest server:"),
        bright_yellow(host),
        dim("Pages with result:"),
        bright_yellow(pages.len()),
        dim("Pages without result:"),
        suppressed_display,
    );

    if pages.is_empty() {
        let _ = writeln!(output, "{}", bright_yellow("No results collected."));
    } else {
        add_section_header(&mut output, "📋", "Pages (first view, median)");

        let mut table = create_table();
        table.set_header(create_cyan_header(&[
            "URL",
            "Status",
            "SpeedIndex",
            "Start Render",
            "TTFB",
            "Fully Loaded",
            "Result",
        ]));

        for page in pages {
            table.add_row(vec![
                Cell::new(&page.url),
                color_coded_status_cell(page.status_code),
                color_coded_timing_cell(page.speed_index, 3400.0, 5800.0),
                color_coded_timing_cell(page.render, 1800.0, 3000.0),
                color_coded_timing_cell(page.ttfb, 800.0, 1800.0),
                color_coded_timing_cell(page.fully_loaded, 5000.0, 10000.0),
                Cell::new(page.result_page.as_deref().unwrap_or("N/A")),
            ]);
        }

        let _ = writeln!(output, "{table}\n");
    }

    if !suppressed.is_empty() {
        add_section_header(&mut output, "⚠️", "Without result");

        let mut table = create_table();
        table.set_header(create_cyan_header(&["URL", "Reason"]));
        for (url, reason) in suppressed {
            table.add_row(vec![
                Cell::new(url),
                Cell::new(reason.to_string()).fg(TableColor::Yellow),
            ]);
        }

        let _ = writeln!(output, "{table}");
    }

    output
}
