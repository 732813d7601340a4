use payvar_core::{AmountFormat, EMPLOYEE_ID_FIELD, FieldValue, NAME_FIELD, Record, Report};
use printpdf::{
    BuiltinFont, IndirectFontRef, Line as Rule, Mm, PdfDocument, PdfLayerReference, Point, Pt,
};

use crate::{RenderError, ReportRenderer};

// Landscape A4 in points.
const PAGE_WIDTH: f32 = 842.0;
const PAGE_HEIGHT: f32 = 595.0;
const MARGIN: f32 = 36.0;

const TITLE_SIZE: f32 = 14.0;
const TITLE_LEADING: f32 = 22.0;
const BODY_SIZE: f32 = 10.0;
const BODY_LEADING: f32 = 13.0;
const TABLE_SIZE: f32 = 8.0;
const TABLE_LEADING: f32 = 11.0;
const FOOTER_SIZE: f32 = 7.0;
const RULE_WIDTH: f32 = 0.5;

const LAYER_NAME: &str = "report";

// Courier advances 0.6em per glyph: 770pt of line at 10pt and 8pt.
const BODY_LINE_CHARS: usize = 128;
const TABLE_LINE_CHARS: usize = 160;
const BODY_LINES_PER_PAGE: usize = 36;
const TABLE_ROWS_PER_PAGE: usize = 44;

const MIN_COLUMN_CHARS: usize = 4;
const MAX_COLUMN_CHARS: usize = 28;
const COLUMN_GAP: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Font {
    Regular,
    Bold,
}

struct Fonts {
    regular: IndirectFontRef,
    bold: IndirectFontRef,
}

impl Fonts {
    fn get(&self, font: Font) -> &IndirectFontRef {
        match font {
            Font::Regular => &self.regular,
            Font::Bold => &self.bold,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Line {
    font: Font,
    size: f32,
    leading: f32,
    text: String,
    rule_below: bool,
}

impl Line {
    fn body(text: impl Into<String>) -> Self {
        Self {
            font: Font::Regular,
            size: BODY_SIZE,
            leading: BODY_LEADING,
            text: text.into(),
            rule_below: false,
        }
    }

    fn table(text: impl Into<String>) -> Self {
        Self {
            font: Font::Regular,
            size: TABLE_SIZE,
            leading: TABLE_LEADING,
            text: text.into(),
            rule_below: false,
        }
    }
}

/// Page 1 carries the narrative, later pages the row table with the header
/// repeated on each page.
#[derive(Debug, Clone, Default)]
pub struct PdfRenderer {
    format: AmountFormat,
}

impl PdfRenderer {
    pub fn new(format: AmountFormat) -> Self {
        Self { format }
    }

    fn pages(&self, report: &Report) -> Vec<Vec<Line>> {
        let mut pages = self.narrative_pages(report);
        pages.extend(self.table_pages(report));
        pages
    }

    fn narrative_pages(&self, report: &Report) -> Vec<Vec<Line>> {
        let mut lines = Vec::new();
        for paragraph in report.summary.split('\n') {
            lines.extend(wrap(&pdf_safe(paragraph), BODY_LINE_CHARS).into_iter().map(Line::body));
        }

        if !report.detected_columns.is_empty() {
            lines.push(Line::body(""));
            lines.push(Line {
                font: Font::Bold,
                ..Line::body("Detected columns")
            });
            for (raw, canonical) in report.detected_columns.iter() {
                let entry = format!("  {} -> {}", pdf_safe(raw), canonical);
                lines.push(Line::body(fit(&entry, BODY_LINE_CHARS)));
            }
        }

        let title = Line {
            font: Font::Bold,
            size: TITLE_SIZE,
            leading: TITLE_LEADING,
            text: fit(&pdf_safe(&report.title), BODY_LINE_CHARS),
            rule_below: true,
        };

        let mut pages: Vec<Vec<Line>> = lines
            .chunks(BODY_LINES_PER_PAGE)
            .map(|chunk| chunk.to_vec())
            .collect();
        if pages.is_empty() {
            pages.push(Vec::new());
        }
        pages[0].insert(0, title);
        pages
    }

    fn table_pages(&self, report: &Report) -> Vec<Vec<Line>> {
        let cells: Vec<Vec<String>> = report
            .rows
            .iter()
            .map(|row| {
                report
                    .columns
                    .iter()
                    .map(|column| pdf_safe(&cell_text(row, column, &self.format)))
                    .collect()
            })
            .collect();
        let numeric: Vec<bool> = report
            .columns
            .iter()
            .map(|column| {
                report
                    .rows
                    .iter()
                    .any(|row| matches!(row.field(column), Some(FieldValue::Number(_))))
            })
            .collect();
        let headers: Vec<String> = report.columns.iter().map(|column| pdf_safe(column)).collect();
        let widths = column_widths(&headers, &cells);

        let header = Line {
            font: Font::Bold,
            rule_below: true,
            ..Line::table(layout_row(&headers, &widths, &numeric))
        };

        if cells.is_empty() {
            return vec![vec![header, Line::table("(no rows)")]];
        }

        cells
            .chunks(TABLE_ROWS_PER_PAGE)
            .map(|chunk| {
                let mut page = Vec::with_capacity(chunk.len() + 1);
                page.push(header.clone());
                page.extend(
                    chunk
                        .iter()
                        .map(|row| Line::table(layout_row(row, &widths, &numeric))),
                );
                page
            })
            .collect()
    }
}

impl ReportRenderer for PdfRenderer {
    fn content_type(&self) -> &'static str {
        "application/pdf"
    }

    fn file_extension(&self) -> &'static str {
        "pdf"
    }

    fn render(&self, report: &Report) -> Result<Vec<u8>, RenderError> {
        let pages = self.pages(report);
        let total = pages.len();

        let (document, first_page, first_layer) = PdfDocument::new(
            pdf_safe(&report.title),
            Mm::from(Pt(PAGE_WIDTH)),
            Mm::from(Pt(PAGE_HEIGHT)),
            LAYER_NAME,
        );
        let fonts = Fonts {
            regular: document
                .add_builtin_font(BuiltinFont::Courier)
                .map_err(pdf_error)?,
            bold: document
                .add_builtin_font(BuiltinFont::CourierBold)
                .map_err(pdf_error)?,
        };

        for (index, lines) in pages.iter().enumerate() {
            let (page, layer) = if index == 0 {
                (first_page, first_layer)
            } else {
                document.add_page(Mm::from(Pt(PAGE_WIDTH)), Mm::from(Pt(PAGE_HEIGHT)), LAYER_NAME)
            };
            let layer = document.get_page(page).get_layer(layer);
            draw_page(&layer, &fonts, lines, index + 1, total);
        }

        let bytes = document.save_to_bytes().map_err(pdf_error)?;
        tracing::debug!(
            pages = total,
            rows = report.rows.len(),
            bytes = bytes.len(),
            "rendered pdf report"
        );
        Ok(bytes)
    }
}

fn pdf_error(err: impl std::fmt::Display) -> RenderError {
    RenderError::Pdf(err.to_string())
}

fn draw_page(
    layer: &PdfLayerReference,
    fonts: &Fonts,
    lines: &[Line],
    page_number: usize,
    page_count: usize,
) {
    layer.set_outline_thickness(RULE_WIDTH);
    let mut y = PAGE_HEIGHT - MARGIN;

    for line in lines {
        y -= line.leading;
        layer.use_text(
            line.text.as_str(),
            line.size,
            Mm::from(Pt(MARGIN)),
            Mm::from(Pt(y)),
            fonts.get(line.font),
        );

        if line.rule_below {
            let rule_y = y - line.leading * 0.3;
            layer.add_line(Rule {
                points: vec![
                    (Point::new(Mm::from(Pt(MARGIN)), Mm::from(Pt(rule_y))), false),
                    (
                        Point::new(Mm::from(Pt(PAGE_WIDTH - MARGIN)), Mm::from(Pt(rule_y))),
                        false,
                    ),
                ],
                is_closed: false,
            });
            y -= line.leading * 0.4;
        }
    }

    layer.use_text(
        page_footer(page_number, page_count),
        FOOTER_SIZE,
        Mm::from(Pt(PAGE_WIDTH - MARGIN - 72.0)),
        Mm::from(Pt(MARGIN / 2.0)),
        &fonts.regular,
    );
}

fn page_footer(page_number: usize, page_count: usize) -> String {
    format!("Page {page_number} of {page_count}")
}

fn cell_text(row: &Record, column: &str, format: &AmountFormat) -> String {
    if column == EMPLOYEE_ID_FIELD {
        return row.entity_id().to_owned();
    }
    if column == NAME_FIELD {
        return row.entity_name().unwrap_or_default().to_owned();
    }
    match row.field(column) {
        Some(FieldValue::Number(value)) => format.amount(*value),
        Some(FieldValue::Text(value)) => value.clone(),
        None => String::new(),
    }
}

/// Content-derived widths, clamped per column and shrunk widest-first until
/// the row fits the page.
fn column_widths(headers: &[String], cells: &[Vec<String>]) -> Vec<usize> {
    let mut widths: Vec<usize> = headers
        .iter()
        .enumerate()
        .map(|(index, header)| {
            let longest_cell = cells
                .iter()
                .filter_map(|row| row.get(index))
                .map(|cell| cell.chars().count())
                .max()
                .unwrap_or(0);
            header
                .chars()
                .count()
                .max(longest_cell)
                .clamp(MIN_COLUMN_CHARS, MAX_COLUMN_CHARS)
        })
        .collect();

    let gaps = COLUMN_GAP * widths.len().saturating_sub(1);
    while widths.iter().sum::<usize>() + gaps > TABLE_LINE_CHARS {
        let Some(widest) = widths.iter_mut().max() else {
            break;
        };
        if *widest <= MIN_COLUMN_CHARS {
            break;
        }
        *widest -= 1;
    }
    widths
}

fn layout_row(cells: &[String], widths: &[usize], numeric: &[bool]) -> String {
    let gap = " ".repeat(COLUMN_GAP);
    let line = cells
        .iter()
        .zip(widths)
        .zip(numeric)
        .map(|((cell, &width), &right_align)| {
            let cell = fit(cell, width);
            if right_align {
                format!("{cell:>width$}")
            } else {
                format!("{cell:<width$}")
            }
        })
        .collect::<Vec<_>>()
        .join(&gap);
    fit(line.trim_end(), TABLE_LINE_CHARS)
}

/// Truncates to `width` characters, marking the cut with `~`.
fn fit(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        return text.to_owned();
    }
    let mut truncated: String = text.chars().take(width.saturating_sub(1)).collect();
    truncated.push('~');
    truncated
}

fn wrap(text: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        let mut word = word.to_owned();
        while word.chars().count() > width {
            if !current.is_empty() {
                lines.push(std::mem::take(&mut current));
            }
            let head: String = word.chars().take(width).collect();
            word = word.chars().skip(width).collect();
            lines.push(head);
        }

        let needed = if current.is_empty() {
            word.chars().count()
        } else {
            current.chars().count() + 1 + word.chars().count()
        };
        if needed > width {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(&word);
    }

    if !current.is_empty() || lines.is_empty() {
        lines.push(current);
    }
    lines
}

/// Restricts text to what a WinAnsi Courier font can show.
fn pdf_safe(text: &str) -> String {
    let mut safe = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '\u{20b9}' => safe.push_str("Rs."),
            '\t' => safe.push(' '),
            ' '..='~' | '\u{a0}'..='\u{ff}' => safe.push(ch),
            _ => safe.push('?'),
        }
    }
    safe
}

#[cfg(test)]
mod tests {
    use payvar_core::{ColumnMapping, assemble_report};

    use super::*;

    fn report_with_rows(count: usize) -> Report {
        let rows = (1..=count)
            .map(|id| {
                Record::new(id.to_string())
                    .with_name(format!("Employee {id}"))
                    .with_group("department", "Engineering")
                    .with_amount("basic", 50000.0)
            })
            .collect();
        assemble_report(
            "Payroll variance 2024-01 to 2024-02",
            "Basic increased by 10.0% (\u{20b9}5,000).",
            rows,
            ColumnMapping::default(),
        )
    }

    fn texts(page: &[Line]) -> Vec<&str> {
        page.iter().map(|line| line.text.as_str()).collect()
    }

    #[test]
    fn renders_a_pdf_document() {
        let bytes = PdfRenderer::default()
            .render(&report_with_rows(3))
            .expect("render");

        assert!(bytes.starts_with(b"%PDF-"));
        assert!(String::from_utf8_lossy(&bytes).trim_end().ends_with("%%EOF"));
    }

    #[test]
    fn narrative_comes_first_then_the_table() {
        let pages = PdfRenderer::default().pages(&report_with_rows(3));

        assert_eq!(pages.len(), 2);
        let narrative = texts(&pages[0]);
        assert_eq!(narrative[0], "Payroll variance 2024-01 to 2024-02");
        assert!(pages[0][0].rule_below);
        assert_eq!(narrative[1], "Basic increased by 10.0% (Rs.5,000).");

        let table = texts(&pages[1]);
        assert!(table[0].starts_with("employee_id"));
        assert_eq!(pages[1][0].font, Font::Bold);
        assert_eq!(table.len(), 4);
        assert!(table[2].contains("Employee 2"));
        assert!(table[2].contains("50,000"));
    }

    #[test]
    fn long_tables_repeat_the_header_on_each_page() {
        let pages = PdfRenderer::default().pages(&report_with_rows(TABLE_ROWS_PER_PAGE + 5));

        assert_eq!(pages.len(), 3);
        assert_eq!(pages[1].len(), TABLE_ROWS_PER_PAGE + 1);
        assert_eq!(pages[2].len(), 6);
        assert_eq!(pages[1][0].text, pages[2][0].text);
        assert_eq!(page_footer(3, pages.len()), "Page 3 of 3");
    }

    #[test]
    fn empty_report_still_has_a_table_page() {
        let report = assemble_report("Empty", "No variance data found.", Vec::new(), ColumnMapping::default());

        let pages = PdfRenderer::default().pages(&report);

        assert_eq!(pages.len(), 2);
        assert_eq!(texts(&pages[1])[1], "(no rows)");
        assert!(PdfRenderer::default().render(&report).is_ok());
    }

    #[test]
    fn widths_are_capped_and_cells_truncated() {
        let headers = vec!["employee_id".to_owned(), "note".to_owned()];
        let cells = vec![vec!["1".to_owned(), "x".repeat(60)]];

        let widths = column_widths(&headers, &cells);

        assert_eq!(widths, vec![11, MAX_COLUMN_CHARS]);
        let row = layout_row(&cells[0], &widths, &[false, false]);
        assert!(row.ends_with('~'));
        assert_eq!(row.chars().count(), 11 + COLUMN_GAP + MAX_COLUMN_CHARS);
    }

    #[test]
    fn wide_tables_shrink_to_the_page() {
        let headers: Vec<String> = (0..12).map(|index| format!("column_{index:02}_{}", "w".repeat(20))).collect();

        let widths = column_widths(&headers, &[]);

        let total: usize = widths.iter().sum::<usize>() + COLUMN_GAP * (widths.len() - 1);
        assert!(total <= TABLE_LINE_CHARS);
    }

    #[test]
    fn text_is_mapped_to_the_font_encoding() {
        assert_eq!(pdf_safe("\u{20b9}2,000"), "Rs.2,000");
        assert_eq!(pdf_safe("Zo\u{eb} \u{4e2d}"), "Zo\u{eb} ?");
        assert_eq!(pdf_safe("a\tb"), "a b");
    }

    #[test]
    fn wrap_breaks_on_words_and_splits_long_words() {
        assert_eq!(wrap("one two three", 7), vec!["one two", "three"]);
        assert_eq!(wrap("abcdefghij", 4), vec!["abcd", "efgh", "ij"]);
        assert_eq!(wrap("", 10), vec![String::new()]);
    }
}
