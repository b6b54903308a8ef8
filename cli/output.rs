use byte_unit::{Byte, UnitType};
use colored::*;
use comfy_table::{Cell, CellAlignment, Color, ContentArrangement, Table, presets::UTF8_FULL};
use ctxpack_core::{AggregateStats, FlattenManifest, MissingDependency, ResolveWarning};
use std::path::Path;

pub fn readable_bytes(bytes: u64) -> String {
    let byte = Byte::from_u64(bytes);
    format!("{:.2}", byte.get_appropriate_unit(UnitType::Binary))
}

fn count_row(label: &str, value: String, color: Color) -> Vec<Cell> {
    vec![
        Cell::new(label).fg(Color::Green),
        Cell::new(value)
            .set_alignment(CellAlignment::Right)
            .fg(color),
    ]
}

fn summary_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

pub fn print_flatten_summary(
    manifest: &FlattenManifest,
    output: &Path,
    max_errors: usize,
    verbose: u8,
) {
    println!();
    println!("{}", " Flatten Summary ".green().bold().underline());
    let mut table = summary_table();
    table.add_row(count_row("Files seen", manifest.total_seen.to_string(), Color::Cyan));
    table.add_row(count_row("Included", manifest.included.to_string(), Color::Cyan));
    table.add_row(count_row(
        "Excluded by rule",
        manifest.excluded_by_rule.to_string(),
        Color::Yellow,
    ));
    table.add_row(count_row(
        "Binary skipped",
        manifest.excluded_binary.to_string(),
        Color::Yellow,
    ));
    let error_color = if manifest.errors.is_empty() {
        Color::Cyan
    } else {
        Color::Red
    };
    table.add_row(count_row("Errors", manifest.errors.len().to_string(), error_color));
    table.add_row(count_row(
        "Included size",
        readable_bytes(manifest.included_bytes),
        Color::DarkGrey,
    ));
    println!("{table}");

    if !manifest.errors.is_empty() {
        if verbose > 0 {
            println!("\n{}", " Errors ".red().bold().underline());
            for record in manifest.errors.iter().take(max_errors) {
                println!("  {} {}: {}", "✗".red(), record.path.yellow(), record.message);
            }
            print_remaining(manifest.errors.len(), max_errors);
        } else {
            println!(
                "{}",
                format!(
                    "{} file(s) could not be read; rerun with -v for details.",
                    manifest.errors.len()
                )
                .yellow()
            );
        }
    }
    println!(
        "{} Flattened into: {}",
        "✓".green(),
        output.display().to_string().blue()
    );
}

pub fn print_bundle_summary(
    stats: &AggregateStats,
    missing: &[MissingDependency],
    warnings: &[ResolveWarning],
    output: &Path,
    max_errors: usize,
    verbose: u8,
) {
    println!();
    println!("{}", " Bundle Summary ".green().bold().underline());
    let mut table = summary_table();
    table.add_row(count_row("Files bundled", stats.entries.to_string(), Color::Cyan));
    table.add_row(count_row("Content size", readable_bytes(stats.bytes), Color::DarkGrey));
    let missing_color = if missing.is_empty() {
        Color::Cyan
    } else {
        Color::Red
    };
    table.add_row(count_row("Missing", missing.len().to_string(), missing_color));
    table.add_row(count_row("Cycles", warnings.len().to_string(), Color::Yellow));
    println!("{table}");

    print_resolution_problems(missing, warnings, max_errors, verbose);
    println!(
        "{} Bundle written to: {}",
        "✓".green(),
        output.display().to_string().blue()
    );
}

pub fn print_resolution_problems(
    missing: &[MissingDependency],
    warnings: &[ResolveWarning],
    max_errors: usize,
    verbose: u8,
) {
    if missing.is_empty() && warnings.is_empty() {
        return;
    }
    if verbose == 0 {
        if !missing.is_empty() {
            println!(
                "{}",
                format!(
                    "{} dependency reference(s) could not be resolved; rerun with -v for details.",
                    missing.len()
                )
                .yellow()
            );
        }
        return;
    }
    if !missing.is_empty() {
        println!("\n{}", " Missing Dependencies ".red().bold().underline());
        for item in missing.iter().take(max_errors) {
            println!("  {} {}", "✗".red(), item);
        }
        print_remaining(missing.len(), max_errors);
    }
    if !warnings.is_empty() {
        println!("\n{}", " Warnings ".yellow().bold().underline());
        for warning in warnings.iter().take(max_errors) {
            println!("  {} {}", "!".yellow(), warning);
        }
        print_remaining(warnings.len(), max_errors);
    }
}

fn print_remaining(total: usize, shown: usize) {
    if total > shown {
        println!("  {}", format!("... and {} more", total - shown).dimmed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_are_humanized() {
        assert!(readable_bytes(0).starts_with('0'));
        let two_kib = readable_bytes(2048);
        assert!(two_kib.starts_with('2') && two_kib.ends_with("KiB"), "{two_kib}");
    }
}
