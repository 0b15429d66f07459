//! Builder Module
//!
//! Fluent Builder APIを提供し、`ExcelRangeReader`インスタンスを段階的に構築する。

use std::fmt::Write as _;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use chrono::format::{Item, StrftimeItems};
use chrono::NaiveDateTime;
use log::Level;

use crate::error::{Result, TabIngestError};
use crate::header::resolve_header_row;
use crate::parser::WorkbookParser;
use crate::security::SecurityConfig;
use crate::types::{CellValue, Table};

/// デフォルトの日付書式
pub const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// デフォルトの欠損値マーカー
pub const DEFAULT_MISSING_MARKER: &str = "missing";

/// 名前付き範囲の読み込み設定を保持する内部構造体
#[derive(Debug, Clone)]
pub(crate) struct RangeReadConfig {
    /// 日付書式（strftime形式）
    pub date_format: String,

    /// 空セルの代わりに出力する値
    pub missing_value: CellValue,

    /// 先頭行が列名を含むか
    pub has_header_row: bool,

    /// 優先するシート（Option: Noneの場合はワークブック全体の名前を優先）
    pub sheet: Option<String>,

    /// 診断ログをInfoレベルで出力するか
    pub verbose: bool,
}

impl Default for RangeReadConfig {
    fn default() -> Self {
        Self {
            date_format: DEFAULT_DATE_FORMAT.to_string(),
            missing_value: CellValue::Text(DEFAULT_MISSING_MARKER.to_string()),
            has_header_row: false,
            sheet: None,
            verbose: false,
        }
    }
}

impl RangeReadConfig {
    /// 日時を日付書式で整形
    ///
    /// 書式は`build()`で検証済みです。整形に失敗した場合はISO形式で出力します。
    pub fn render_date(&self, datetime: &NaiveDateTime) -> String {
        let mut rendered = String::new();
        if write!(rendered, "{}", datetime.format(&self.date_format)).is_err() {
            return datetime.format(DEFAULT_DATE_FORMAT).to_string();
        }
        rendered
    }

    fn log_level(&self) -> Level {
        if self.verbose {
            Level::Info
        } else {
            Level::Debug
        }
    }
}

/// Fluent Builder APIを提供する構造体
///
/// `ExcelRangeReader`インスタンスを段階的に構築するためのビルダーです。
/// すべての設定項目にデフォルト値が設定されており、必要な設定のみをオーバーライドできます。
///
/// # 使用例
///
/// ```rust,no_run
/// use tabingest::{CellValue, ExcelRangeReaderBuilder};
///
/// # fn main() -> Result<(), tabingest::TabIngestError> {
/// let reader = ExcelRangeReaderBuilder::new()
///     .with_date_format("%d/%m/%Y")
///     .with_missing_value(CellValue::Missing)
///     .with_header_row(true)
///     .build()?;
/// let table = reader.read("sales.xlsx", "Q1Data")?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct ExcelRangeReaderBuilder {
    /// 内部設定（構築中）
    config: RangeReadConfig,
}

impl ExcelRangeReaderBuilder {
    /// デフォルト設定を持つビルダーインスタンスを生成する
    ///
    /// # デフォルト設定
    ///
    /// - 日付書式: `%Y-%m-%d %H:%M:%S`
    /// - 欠損値マーカー: 文字列`"missing"`
    /// - ヘッダー行: なし（列名は`var1`..`varN`）
    /// - シート: 指定なし
    /// - 診断ログ: Debugレベル
    pub fn new() -> Self {
        Self::default()
    }

    /// 日付・時刻セルの書式を指定する
    ///
    /// chrono互換（strftime形式）のフォーマット文字列を指定します。
    ///
    /// # 使用例
    ///
    /// ```rust,no_run
    /// use tabingest::ExcelRangeReaderBuilder;
    ///
    /// let builder = ExcelRangeReaderBuilder::new()
    ///     .with_date_format("%d/%m/%Y %H:%M:%S");
    /// ```
    pub fn with_date_format(mut self, format: impl Into<String>) -> Self {
        self.config.date_format = format.into();
        self
    }

    /// 空セルの代わりに出力する値を指定する
    ///
    /// `CellValue::Missing`を指定すると、欠損値の番兵がそのまま出力されます。
    pub fn with_missing_value(mut self, value: impl Into<CellValue>) -> Self {
        self.config.missing_value = value.into();
        self
    }

    /// 範囲の先頭行が列名を含むかを指定する
    ///
    /// * `true`: 先頭行を列名として使用し、データから取り除く
    /// * `false`: 列名`var1`..`varN`を生成する（デフォルト）
    pub fn with_header_row(mut self, has_header_row: bool) -> Self {
        self.config.has_header_row = has_header_row;
        self
    }

    /// 名前の解決で優先するシートを指定する
    ///
    /// 指定したシートのローカル名が、ワークブック全体の同名の名前より優先されます。
    /// シートがワークブックに存在しない場合、読み込み時に
    /// `TabIngestError::SheetNotFound`を返します。
    pub fn with_sheet(mut self, sheet: impl Into<String>) -> Self {
        self.config.sheet = Some(sheet.into());
        self
    }

    /// 診断ログ（解決した範囲、行数、列名）をInfoレベルで出力するかを指定する
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.config.verbose = verbose;
        self
    }

    /// 設定を検証し、`ExcelRangeReader`インスタンスを生成する
    ///
    /// # 発生し得るエラー
    ///
    /// * `TabIngestError::Config(String)`: 日付書式が不正な書式文字列の場合
    pub fn build(self) -> Result<ExcelRangeReader> {
        if StrftimeItems::new(&self.config.date_format).any(|item| matches!(item, Item::Error)) {
            return Err(TabIngestError::Config(format!(
                "Invalid date format string: '{}'",
                self.config.date_format
            )));
        }

        Ok(ExcelRangeReader {
            config: self.config,
        })
    }
}

/// Excel名前付き範囲の読み込みのファサード
///
/// `ExcelRangeReaderBuilder`を使用して構築された設定に基づいて、
/// 名前付き範囲を`Table`として読み込みます。
#[derive(Debug, Clone)]
pub struct ExcelRangeReader {
    /// 読み込み設定
    config: RangeReadConfig,
}

impl ExcelRangeReader {
    #[cfg(test)]
    pub(crate) fn config(&self) -> &RangeReadConfig {
        &self.config
    }

    /// ワークブックファイルから名前付き範囲を読み込む
    ///
    /// # 引数
    ///
    /// * `path` - ワークブックのパス（`.xlsx`, `.xlsm`, `.xls`, `.xlsb`, `.ods`）
    /// * `range_name` - 名前付き範囲の名前
    ///
    /// # 戻り値
    ///
    /// * `Ok(Table)` - 読み込みに成功した場合
    /// * `Err(TabIngestError::FileNotFound)` - ファイルが存在しない場合
    /// * `Err(TabIngestError::RangeNotFound)` - 名前が定義されていない場合
    /// * `Err(TabIngestError::EmptyDataset)` - 範囲が0行の場合
    ///
    /// ファイルは全体をメモリに読み込んだ直後に閉じられます。
    pub fn read(&self, path: impl AsRef<Path>, range_name: &str) -> Result<Table> {
        let path = path.as_ref();
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(TabIngestError::FileNotFound(path.to_path_buf()))
            }
            Err(e) => return Err(e.into()),
        };

        log::log!(
            self.config.log_level(),
            "Reading named range '{}' from {}",
            range_name,
            path.display()
        );
        self.read_from(file, range_name)
    }

    /// 任意のリーダーから名前付き範囲を読み込む
    ///
    /// # 使用例
    ///
    /// ```rust,no_run
    /// use std::io::Cursor;
    /// use tabingest::ExcelRangeReaderBuilder;
    ///
    /// # fn main() -> Result<(), tabingest::TabIngestError> {
    /// let reader = ExcelRangeReaderBuilder::new().build()?;
    /// let workbook_bytes: Vec<u8> = vec![]; // ワークブックのバイト列
    /// let table = reader.read_from(Cursor::new(workbook_bytes), "Q1Data")?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn read_from<R: Read>(&self, input: R, range_name: &str) -> Result<Table> {
        let buffer = SecurityConfig::default().read_input(input)?;
        let level = self.config.log_level();

        let mut parser = WorkbookParser::open(buffer)?;
        let resolved = parser.resolve_named_range(range_name, self.config.sheet.as_deref())?;
        log::log!(
            level,
            "Named range '{}' -> '{}'!{}",
            range_name,
            resolved.sheet,
            resolved.extent.to_a1_notation()
        );

        let mut rows = parser.read_range(&resolved, &self.config)?;
        log::log!(level, "Read {} rows", rows.len());

        let column_names = resolve_header_row(&mut rows, self.config.has_header_row)?;
        for (i, name) in column_names.iter().enumerate() {
            log::log!(level, "var {}: {}", i + 1, name);
        }

        Ok(Table::from_parts(column_names, rows))
    }
}

/// Excel名前付き範囲を1回の呼び出しで読み込む
///
/// `ExcelRangeReaderBuilder`の各設定を引数で受け取る簡易関数です。
///
/// # 使用例
///
/// ```rust,no_run
/// use tabingest::read_excel_range;
///
/// # fn main() -> Result<(), tabingest::TabIngestError> {
/// let table = read_excel_range("sales.xlsx", "Q1Data", "%Y-%m-%d", "missing", true)?;
/// assert_eq!(table.column_names(), &["Date", "Region", "Amount"]);
/// # Ok(())
/// # }
/// ```
pub fn read_excel_range(
    path: impl AsRef<Path>,
    range_name: &str,
    date_format: &str,
    missing_value: impl Into<CellValue>,
    has_header_row: bool,
) -> Result<Table> {
    ExcelRangeReaderBuilder::new()
        .with_date_format(date_format)
        .with_missing_value(missing_value)
        .with_header_row(has_header_row)
        .build()?
        .read(path, range_name)
}
