use crate::config::OutputConfig;
use crate::error::{SpecError, SpecResult};
use crate::project::ColumnRow;
use chrono::NaiveDateTime;
use rust_xlsxwriter::{Color, DocProperties, Format, FormatAlign, FormatBorder, Workbook, XlsxError};
use std::path::{Path, PathBuf};
use tracing::info;

pub const SHEET_NAME: &str = "Table Specification";

pub const HEADERS: [&str; 9] = [
    "Table",
    "Table Comment",
    "Column",
    "Column Comment",
    "Data Type",
    "Nullable",
    "Primary Key",
    "Foreign Key",
    "Foreign Key Reference",
];

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const FILE_STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

const HEADER_ROW_HEIGHT: f64 = 25.0;
const DATA_ROW_HEIGHT: f64 = 20.0;
const WIDTH_PADDING: usize = 2;

fn flag(value: bool) -> &'static str {
    if value { "Y" } else { "N" }
}

/// The cell text of one row, in header order.
pub fn cells(row: &ColumnRow) -> [String; 9] {
    [
        row.table_name.clone(),
        row.table_comment.clone().unwrap_or_default(),
        row.column_name.clone(),
        row.column_comment.clone().unwrap_or_default(),
        row.data_type.clone(),
        flag(row.nullable).to_string(),
        flag(row.is_primary_key).to_string(),
        flag(row.has_foreign_key).to_string(),
        if row.has_foreign_key {
            row.foreign_key_label.clone()
        } else {
            String::new()
        },
    ]
}

/// Every cell of the sheet as text: the header row first, then one row per
/// `ColumnRow` in input order.
#[derive(Debug, Clone, PartialEq)]
pub struct SheetLayout {
    pub rows: Vec<[String; 9]>,
}

impl SheetLayout {
    pub fn new(rows: &[ColumnRow]) -> Self {
        let mut grid = Vec::with_capacity(rows.len() + 1);
        grid.push(HEADERS.map(str::to_string));
        grid.extend(rows.iter().map(cells));
        Self { rows: grid }
    }

    /// Grid rows 1, 3, 5, ... (Excel rows 2, 4, 6, ...) get the stripe fill,
    /// so the first data row is shaded.
    pub fn is_striped(row_idx: usize) -> bool {
        row_idx % 2 == 1
    }

    pub fn data_rows(&self) -> usize {
        self.rows.len() - 1
    }

    /// Widest cell per column in characters, plus padding, optionally capped.
    pub fn column_widths(&self, max_width: Option<f64>) -> [f64; 9] {
        let mut widths = [0.0; 9];
        for (col, width) in widths.iter_mut().enumerate() {
            let widest = self
                .rows
                .iter()
                .map(|row| row[col].chars().count())
                .max()
                .unwrap_or(0);
            let fitted = (widest + WIDTH_PADDING) as f64;
            *width = match max_width {
                Some(max) => fitted.min(max),
                None => fitted,
            };
        }
        widths
    }
}

/// `output.file` if set, otherwise `<dir>/<prefix>_<YYYYMMDD_HHMMSS>.xlsx`.
pub fn output_path(config: &OutputConfig, generated_at: NaiveDateTime) -> PathBuf {
    match &config.file {
        Some(file) => PathBuf::from(file),
        None => Path::new(&config.dir).join(format!(
            "{}_{}.xlsx",
            config.prefix,
            generated_at.format(FILE_STAMP_FORMAT)
        )),
    }
}

pub struct DocumentWriter {
    max_column_width: Option<f64>,
}

impl DocumentWriter {
    pub fn new(max_column_width: Option<f64>) -> Self {
        Self { max_column_width }
    }

    pub fn from_config(config: &OutputConfig) -> Self {
        Self::new(config.max_column_width)
    }

    /// Renders the rows into a single styled worksheet and saves it.
    pub fn write(&self, rows: &[ColumnRow], generated_at: NaiveDateTime, path: &Path) -> SpecResult<()> {
        let layout = SheetLayout::new(rows);
        let mut workbook = self.build_workbook(&layout, generated_at).map_err(write_error)?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| SpecError::Write(format!("Cannot create {}: {}", parent.display(), e)))?;
        }

        workbook.save(path).map_err(|e| match e {
            XlsxError::IoError(io) if io.kind() == std::io::ErrorKind::PermissionDenied => SpecError::Write(format!(
                "Cannot write {}: {}. Close the file if it is open in another program.",
                path.display(),
                io
            )),
            other => SpecError::Write(format!("Cannot write {}: {}", path.display(), other)),
        })?;

        info!("Wrote {} rows to {}", layout.data_rows(), path.display());
        Ok(())
    }

    fn build_workbook(&self, layout: &SheetLayout, generated_at: NaiveDateTime) -> Result<Workbook, XlsxError> {
        let stamp = generated_at.format(TIMESTAMP_FORMAT).to_string();
        let mut workbook = Workbook::new();

        let properties = DocProperties::new()
            .set_title(&format!("{} (generated {})", SHEET_NAME, stamp))
            .set_comment(&format!("Generated {}", stamp));
        workbook.set_properties(&properties);

        let header_format = Format::new()
            .set_bold()
            .set_font_color(Color::Black)
            .set_background_color(Color::RGB(0xBFBFBF))
            .set_align(FormatAlign::Center)
            .set_align(FormatAlign::VerticalCenter)
            .set_border(FormatBorder::Thin);

        let plain_format = Format::new()
            .set_align(FormatAlign::Left)
            .set_align(FormatAlign::VerticalCenter)
            .set_border(FormatBorder::Thin);

        let striped_format = plain_format.clone().set_background_color(Color::RGB(0xF2F2F2));

        let worksheet = workbook.add_worksheet();
        worksheet.set_name(SHEET_NAME)?;
        worksheet.set_footer(&format!("&LGenerated {}", stamp));

        for (row_idx, row) in layout.rows.iter().enumerate() {
            let xl_row = row_index(row_idx)?;
            let format = if row_idx == 0 {
                &header_format
            } else if SheetLayout::is_striped(row_idx) {
                &striped_format
            } else {
                &plain_format
            };

            for (col_idx, text) in row.iter().enumerate() {
                let xl_col = col_idx as u16;
                if text.is_empty() {
                    worksheet.write_blank(xl_row, xl_col, format)?;
                } else {
                    worksheet.write_string_with_format(xl_row, xl_col, text, format)?;
                }
            }

            let height = if row_idx == 0 { HEADER_ROW_HEIGHT } else { DATA_ROW_HEIGHT };
            worksheet.set_row_height(xl_row, height)?;
        }

        for (col_idx, width) in layout.column_widths(self.max_column_width).iter().enumerate() {
            worksheet.set_column_width(col_idx as u16, *width)?;
        }

        worksheet.set_freeze_panes(1, 0)?;
        let last_row = row_index(layout.data_rows())?;
        worksheet.autofilter(0, 0, last_row, (HEADERS.len() - 1) as u16)?;

        Ok(workbook)
    }
}

fn row_index(idx: usize) -> Result<u32, XlsxError> {
    u32::try_from(idx).map_err(|_| XlsxError::RowColumnLimitError)
}

fn write_error(err: XlsxError) -> SpecError {
    SpecError::Write(err.to_string())
}
