//! Heuristic table detection over a page's text layer.
//!
//! pdfium gives us text, not structure. A run of consecutive lines that split
//! into the same number of cells (on tabs, pipes, or wide space gaps) is
//! almost always a table in the source, so we lift it out as rows of cells.
//! Anything subtler is left to the vision adapters.

use super::ExtractedTable;
use once_cell::sync::Lazy;
use regex::Regex;

/// Cells are separated by a tab, a pipe, or 2+ spaces.
static RE_CELL_SEP: Lazy<Regex> = Lazy::new(|| Regex::new(r"\t|\|| {2,}").unwrap());

/// Markdown separator rows (`|---|:--:|`) carry no data.
static RE_SEPARATOR_ROW: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*\|?\s*:?-{3,}:?\s*(\|\s*:?-{3,}:?\s*)*\|?\s*$").unwrap());

/// Fewer consecutive rows than this is a coincidence, not a table.
const MIN_ROWS: usize = 2;

/// Fewer cells than this is a sentence, not a row.
const MIN_CELLS: usize = 2;

/// Detect tables in page text, in reading order.
pub fn detect_tables(text: &str) -> Vec<ExtractedTable> {
    let mut tables = Vec::new();
    let mut run: Vec<Vec<String>> = Vec::new();

    for line in text.lines() {
        if RE_SEPARATOR_ROW.is_match(line) {
            continue;
        }
        let cells = split_cells(line);
        let continues = cells.len() >= MIN_CELLS
            && run.first().map_or(true, |first| first.len() == cells.len());

        if continues {
            run.push(cells);
            continue;
        }

        flush(&mut run, &mut tables);
        if cells.len() >= MIN_CELLS {
            run.push(cells);
        }
    }
    flush(&mut run, &mut tables);
    tables
}

fn flush(run: &mut Vec<Vec<String>>, tables: &mut Vec<ExtractedTable>) {
    if run.len() >= MIN_ROWS {
        let rows = std::mem::take(run);
        tables.push(ExtractedTable {
            data: serde_json::json!(rows),
        });
    } else {
        run.clear();
    }
}

fn split_cells(line: &str) -> Vec<String> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }
    RE_CELL_SEP
        .split(trimmed)
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn space_aligned_rows_form_a_table() {
        let text = "Quarterly results\n\
                    Region    Q1    Q2\n\
                    North     10    12\n\
                    South     7     9\n\
                    Totals are unaudited.";
        let tables = detect_tables(text);
        assert_eq!(tables.len(), 1);
        let rows = tables[0].data.as_array().unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1][0], "North");
        assert_eq!(rows[2][2], "9");
    }

    #[test]
    fn pipe_table_skips_separator_row() {
        let text = "| Name | Dose |\n|------|------|\n| A | 5mg |\n| B | 10mg |";
        let tables = detect_tables(text);
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].data.as_array().unwrap().len(), 3);
    }

    #[test]
    fn prose_has_no_tables() {
        let text = "This is an ordinary paragraph.\nIt continues on a second line.\n";
        assert!(detect_tables(text).is_empty());
    }

    #[test]
    fn single_aligned_line_is_not_a_table() {
        assert!(detect_tables("Total    42\nand then prose").is_empty());
    }

    #[test]
    fn column_count_change_splits_tables() {
        let text = "a\tb\nc\td\ne\tf\tg\nh\ti\tj";
        let tables = detect_tables(text);
        assert_eq!(tables.len(), 2);
    }
}
