//! tabingest - Pure-Rust readers for tabular data in foreign file formats
//!
//! This crate loads rectangular data from three sources into one in-memory
//! [`Table`] type:
//!
//! - a named range of an Excel workbook (`.xlsx`, `.xlsm`, `.xls`, `.xlsb`, `.ods`),
//! - a Stata data file (`.dta`, formats 113-115 and 117-119),
//! - an object stored in a saved R workspace (`.RData`).
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use tabingest::read_excel_range;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // sales.xlsx defines the name "Q1Data" as Sheet1!$A$1:$C$4
//!     let table = read_excel_range("sales.xlsx", "Q1Data", "%Y-%m-%d", "missing", true)?;
//!
//!     println!("{:?}", table.column_names());
//!     for row in table.rows() {
//!         println!("{:?}", row);
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! # Custom Configuration
//!
//! ```rust,no_run
//! use tabingest::{CellValue, ExcelRangeReaderBuilder};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let reader = ExcelRangeReaderBuilder::new()
//!         .with_date_format("%d/%m/%Y")
//!         .with_missing_value(CellValue::Missing)  // keep the sentinel
//!         .with_header_row(true)
//!         .with_sheet("Archive")  // prefer names local to this sheet
//!         .build()?;
//!
//!     let table = reader.read("sales.xlsx", "Q1Data")?;
//!     println!("{}", table.to_json()?);
//!
//!     Ok(())
//! }
//! ```
//!
//! # Stata and R
//!
//! ```rust,no_run
//! use tabingest::{read_stat_file, RSession, WorkspaceReader};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let survey = read_stat_file("survey.dta")?;
//!     println!("{} observations", survey.row_count());
//!
//!     // The session keeps its working directory and loaded objects between calls
//!     let mut session = RSession::new();
//!     let results = WorkspaceReader::read(&mut session, "/data/run3", "resultsDF")?;
//!     println!("{:?}", results.column_names());
//!     println!("{:?}", session.object_names());
//!
//!     Ok(())
//! }
//! ```

mod builder;
mod error;
mod header;
mod parser;
mod rdata;
mod security;
mod stata;
mod types;

// 公開API
pub use builder::{
    read_excel_range, ExcelRangeReader, ExcelRangeReaderBuilder, DEFAULT_DATE_FORMAT,
    DEFAULT_MISSING_MARKER,
};
pub use error::{Result, TabIngestError};
pub use rdata::{read_workspace, RObject, RSession, RValue, WorkspaceReader, WORKSPACE_FILE_NAME};
pub use stata::{read_stat_file, StatFileReader};
pub use types::{CellValue, Table};
