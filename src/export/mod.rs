mod csv;

pub use csv::{export_file_name, passes_to_rows, to_csv, ExportRow, HEADERS};
