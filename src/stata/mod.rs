//! Stata Reader Module
//!
//! Stataのデータファイル（`.dta`）を`Table`として読み込むモジュール。
//! 日付書式を持つ変数は日時に、値ラベルを持つ変数はラベル文字列に変換します。

mod dates;
mod dta;

use std::fs::File;
use std::path::{Path, PathBuf};

use crate::error::{Result, TabIngestError};
use crate::security::SecurityConfig;
use crate::types::{CellValue, Table};

use dates::DateKind;
use dta::{parse_dta, DtaFile, DtaValue, Variable};

/// Stataデータファイルのリーダー
///
/// デフォルトでは日付変換と値ラベル変換の両方が有効です。
///
/// # 使用例
///
/// ```rust,no_run
/// use tabingest::StatFileReader;
///
/// # fn main() -> Result<(), tabingest::TabIngestError> {
/// let table = StatFileReader::new()
///     .with_convert_categoricals(false)
///     .read("survey.dta")?;
/// println!("{} observations", table.row_count());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct StatFileReader {
    convert_dates: bool,
    convert_categoricals: bool,
}

impl Default for StatFileReader {
    fn default() -> Self {
        Self {
            convert_dates: true,
            convert_categoricals: true,
        }
    }
}

impl StatFileReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// 日付書式（`%td`, `%tc`など）を持つ変数を`CellValue::DateTime`に変換するか
    pub fn with_convert_dates(mut self, convert_dates: bool) -> Self {
        self.convert_dates = convert_dates;
        self
    }

    /// 値ラベルを持つ変数をラベル文字列に変換するか
    ///
    /// ラベルの付いていない値は数値のまま残ります。
    pub fn with_convert_categoricals(mut self, convert_categoricals: bool) -> Self {
        self.convert_categoricals = convert_categoricals;
        self
    }

    /// `.dta`ファイルを読み込む
    ///
    /// # 戻り値
    ///
    /// * `Ok(Table)` - 変数名を列名とするテーブル
    /// * `Err(TabIngestError::FileNotFound)` - ファイルが存在しない場合
    /// * `Err(TabIngestError::StatFileParse)` - ファイルを解析できない場合
    pub fn read(&self, path: impl AsRef<Path>) -> Result<Table> {
        let path = path.as_ref();
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(TabIngestError::FileNotFound(path.to_path_buf()))
            }
            Err(e) => return Err(e.into()),
        };
        let bytes = SecurityConfig::default().read_input(file)?;

        log::debug!("Reading Stata file {} ({} bytes)", path.display(), bytes.len());
        self.parse(&bytes, path)
    }

    /// メモリ上の`.dta`データを読み込む
    pub fn read_from_bytes(&self, bytes: &[u8]) -> Result<Table> {
        self.parse(bytes, Path::new("<memory>"))
    }

    fn parse(&self, bytes: &[u8], path: &Path) -> Result<Table> {
        let file = parse_dta(bytes).map_err(|e| TabIngestError::StatFileParse {
            path: PathBuf::from(path),
            message: e.to_string(),
        })?;

        log::debug!(
            "Stata format {}: {} variables, {} observations, {} value label tables",
            file.version,
            file.variables.len(),
            file.rows.len(),
            file.value_labels.len()
        );
        Ok(self.to_table(file))
    }

    fn to_table(&self, file: DtaFile) -> Table {
        let DtaFile {
            variables,
            rows,
            value_labels,
            ..
        } = file;

        let converters: Vec<ColumnConverter<'_>> = variables
            .iter()
            .map(|variable| ColumnConverter {
                date_kind: self
                    .convert_dates
                    .then(|| date_kind(variable))
                    .flatten(),
                labels: self
                    .convert_categoricals
                    .then(|| {
                        variable
                            .var_type
                            .is_integer()
                            .then(|| value_labels.get(&variable.value_label))
                            .flatten()
                    })
                    .flatten(),
            })
            .collect();

        let rows = rows
            .into_iter()
            .map(|row| {
                row.into_iter()
                    .zip(&converters)
                    .map(|(value, converter)| converter.convert(value))
                    .collect()
            })
            .collect();
        let column_names = variables.into_iter().map(|v| v.name).collect();

        Table::from_parts(column_names, rows)
    }
}

fn date_kind(variable: &Variable) -> Option<DateKind> {
    if variable.var_type.is_numeric() {
        DateKind::from_format(&variable.format)
    } else {
        None
    }
}

/// 列ごとの値変換
struct ColumnConverter<'a> {
    date_kind: Option<DateKind>,
    labels: Option<&'a std::collections::BTreeMap<i32, String>>,
}

impl ColumnConverter<'_> {
    fn convert(&self, value: DtaValue) -> CellValue {
        match value {
            DtaValue::Missing | DtaValue::StrLRef(..) => CellValue::Missing,
            DtaValue::Text(text) => CellValue::Text(text),
            DtaValue::Number(number) => {
                if let Some(kind) = self.date_kind {
                    if let Some(datetime) = kind.to_datetime(number) {
                        return CellValue::DateTime(datetime);
                    }
                }
                if let Some(labels) = self.labels {
                    if let Some(label) = labels.get(&(number as i32)) {
                        return CellValue::Text(label.clone());
                    }
                }
                CellValue::Number(number)
            }
        }
    }
}

/// `.dta`ファイルを既定の設定（日付・値ラベル変換あり）で読み込む
pub fn read_stat_file(path: impl AsRef<Path>) -> Result<Table> {
    StatFileReader::new().read(path)
}
