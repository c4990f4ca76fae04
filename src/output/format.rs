use std::time::Duration;

use comfy_table::{
    Attribute, Cell, CellAlignment, Color, ContentArrangement, Table, TableComponent,
    modifiers::UTF8_SOLID_INNER_BORDERS, presets::UTF8_FULL,
};

use crate::error::AppError;

/// Separators for counts and durations shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct NumberFormat {
    group_sep: char,
    decimal_sep: char,
}

const ENGLISH: NumberFormat = NumberFormat {
    group_sep: ',',
    decimal_sep: '.',
};

const IBERIAN: NumberFormat = NumberFormat {
    group_sep: '.',
    decimal_sep: ',',
};

/// Language prefixes the field teams use; anything else is rejected.
const LOCALES: &[(&str, NumberFormat)] = &[("en", ENGLISH), ("es", IBERIAN), ("pt", IBERIAN)];

impl Default for NumberFormat {
    fn default() -> Self {
        ENGLISH
    }
}

impl NumberFormat {
    /// `es`, `es-PE`, `pt_BR`, ... Only the language part matters.
    pub(crate) fn from_locale(locale: Option<&str>) -> Result<Self, AppError> {
        let tag = locale.map(str::trim).unwrap_or_default();
        if tag.is_empty() {
            return Ok(NumberFormat::default());
        }
        let language = tag.split(['-', '_']).next().unwrap_or(tag);
        LOCALES
            .iter()
            .find(|(prefix, _)| language.eq_ignore_ascii_case(prefix))
            .map(|(_, format)| *format)
            .ok_or_else(|| AppError::UnsupportedLocale {
                input: tag.to_string(),
            })
    }
}

pub(super) fn format_number(n: u64, format: NumberFormat) -> String {
    let digits = n.to_string();
    let mut result = String::new();
    for (i, c) in digits.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(format.group_sep);
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Elapsed time as seconds with two decimals, e.g. `1.25s`
pub(super) fn format_elapsed(elapsed: Duration, format: NumberFormat) -> String {
    let s = format!("{:.2}", elapsed.as_secs_f64());
    if format.decimal_sep == '.' {
        format!("{s}s")
    } else {
        format!("{}s", s.replace('.', &format.decimal_sep.to_string()))
    }
}

pub(super) fn styled_cell(text: &str, color: Option<Color>, bold: bool) -> Cell {
    let mut cell = Cell::new(text);
    if let Some(c) = color {
        cell = cell.fg(c);
    }
    if bold {
        cell = cell.add_attribute(Attribute::Bold);
    }
    cell
}

pub(super) fn header_cell(text: &str, use_color: bool) -> Cell {
    let mut cell = Cell::new(text).add_attribute(Attribute::Bold);
    if use_color {
        cell = cell.fg(Color::Cyan);
    }
    cell
}

/// Replace the double-line header separator (╞═╪═╡) with single-line (├─┼─┤)
fn normalize_header_separator(table: &mut Table) {
    table.set_style(TableComponent::HeaderLines, '─');
    table.set_style(TableComponent::LeftHeaderIntersection, '├');
    table.set_style(TableComponent::MiddleHeaderIntersections, '┼');
    table.set_style(TableComponent::RightHeaderIntersection, '┤');
}

/// Create a table with the standard preset, inner borders, and normalized header separator.
pub(super) fn create_styled_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_SOLID_INNER_BORDERS)
        .set_content_arrangement(ContentArrangement::Dynamic);
    normalize_header_separator(&mut table);
    table
}

pub(super) fn right_cell(text: &str, color: Option<Color>, bold: bool) -> Cell {
    let mut cell = Cell::new(text).set_alignment(CellAlignment::Right);
    if let Some(c) = color {
        cell = cell.fg(c);
    }
    if bold {
        cell = cell.add_attribute(Attribute::Bold);
    }
    cell
}

#[cfg(test)]
mod tests {
    use super::{ENGLISH, IBERIAN, NumberFormat, format_elapsed, format_number};
    use std::time::Duration;

    #[test]
    fn format_number_with_commas() {
        let fmt = NumberFormat::default();
        assert_eq!(format_number(0, fmt), "0");
        assert_eq!(format_number(999, fmt), "999");
        assert_eq!(format_number(1000, fmt), "1,000");
        assert_eq!(format_number(1_234_567, fmt), "1,234,567");
    }

    #[test]
    fn from_locale_none_returns_default() {
        let fmt = NumberFormat::from_locale(None).unwrap();
        assert_eq!(format_number(1000, fmt), "1,000");
    }

    #[test]
    fn from_locale_es_uses_dot_separator() {
        let fmt = NumberFormat::from_locale(Some("es-PE")).unwrap();
        assert_eq!(format_number(12_000, fmt), "12.000");
    }

    #[test]
    fn from_locale_matches_language_only() {
        assert_eq!(NumberFormat::from_locale(Some("PT_br")).unwrap(), IBERIAN);
        assert_eq!(NumberFormat::from_locale(Some(" en-GB ")).unwrap(), ENGLISH);
        assert_eq!(NumberFormat::from_locale(Some("")).unwrap(), ENGLISH);
    }

    #[test]
    fn from_locale_unsupported_returns_error() {
        for tag in ["fr", "ja", "esp"] {
            assert!(NumberFormat::from_locale(Some(tag)).is_err(), "{tag}");
        }
    }

    #[test]
    fn elapsed_uses_locale_decimal_separator() {
        let elapsed = Duration::from_millis(1250);
        assert_eq!(format_elapsed(elapsed, NumberFormat::default()), "1.25s");
        let es = NumberFormat::from_locale(Some("es")).unwrap();
        assert_eq!(format_elapsed(elapsed, es), "1,25s");
    }
}
