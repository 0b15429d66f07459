//! Workbook Parser Module
//!
//! calamineを使用したワークブック読み込みの実装。
//! 名前付き範囲を(シート, 矩形範囲)に解決し、範囲内のセルを`CellValue`に変換します。

use std::io::Cursor;

use calamine::{open_workbook_auto_from_rs, Data, Reader, Sheets};
use chrono::{NaiveDate, NaiveDateTime};

use crate::builder::RangeReadConfig;
use crate::error::{Result, TabIngestError};
use crate::parser::metadata::{DefinedName, XlsxMetadataParser};
use crate::parser::reference::parse_defined_reference;
use crate::types::{CellCoord, CellExtent, CellValue};

/// 名前付き範囲の解決結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ResolvedRange {
    /// 範囲のあるシート
    pub sheet: String,
    /// 矩形範囲
    pub extent: CellExtent,
}

/// ワークブックパーサー
///
/// calamineのラッパーとして、名前付き範囲の解決とセルの読み込みを提供します。
/// XLSX形式の場合は、XMLメタデータから名前のスコープも取得します。
pub(crate) struct WorkbookParser {
    /// calamineのワークブック（形式は自動判定）
    workbook: Sheets<Cursor<Vec<u8>>>,
    /// XMLメタデータ（XLSX形式のみ）
    metadata: Option<XlsxMetadataParser>,
}

impl WorkbookParser {
    /// メモリ上のワークブックを開く
    ///
    /// # 引数
    ///
    /// * `buffer` - ワークブックファイルの全バイト列
    ///
    /// # 戻り値
    ///
    /// * `Ok(WorkbookParser)` - ワークブックの読み込みに成功した場合
    /// * `Err(TabIngestError)` - 形式が不正、または破損している場合
    pub fn open(buffer: Vec<u8>) -> Result<Self> {
        let workbook = open_workbook_auto_from_rs(Cursor::new(buffer.clone()))?;

        let metadata = match &workbook {
            Sheets::Xlsx(_) => Some(XlsxMetadataParser::new(Cursor::new(buffer))?),
            _ => None,
        };

        Ok(Self { workbook, metadata })
    }

    /// すべてのシート名を取得
    pub fn sheet_names(&self) -> Vec<String> {
        match &self.metadata {
            Some(metadata) => metadata.sheet_names().to_vec(),
            None => self.workbook.sheet_names().to_vec(),
        }
    }

    /// 名前付き範囲の定義をすべて取得
    ///
    /// XLSX形式ではスコープ付きの定義を、それ以外の形式ではcalamineの
    /// 定義をワークブック全体の名前として返します。
    fn defined_names(&self) -> Vec<DefinedName> {
        match &self.metadata {
            Some(metadata) => metadata.defined_names().to_vec(),
            None => self
                .workbook
                .defined_names()
                .iter()
                .map(|(name, formula)| DefinedName {
                    name: name.clone(),
                    scope: None,
                    formula: formula.clone(),
                })
                .collect(),
        }
    }

    /// 名前付き範囲を(シート, 矩形範囲)に解決
    ///
    /// # 引数
    ///
    /// * `range_name` - 名前（大文字小文字を区別しない）
    /// * `sheet` - 優先するシート（指定した場合、そのシートのローカル名が優先される）
    ///
    /// # 戻り値
    ///
    /// * `Ok(ResolvedRange)` - 解決に成功した場合
    /// * `Err(TabIngestError::SheetNotFound)` - `sheet`がワークブックにない場合
    /// * `Err(TabIngestError::RangeNotFound)` - 名前が定義されていない場合
    /// * `Err(TabIngestError::InvalidRangeReference)` - 名前がセル範囲を参照していない場合
    pub fn resolve_named_range(
        &mut self,
        range_name: &str,
        sheet: Option<&str>,
    ) -> Result<ResolvedRange> {
        let sheet_names = self.sheet_names();
        if let Some(sheet) = sheet {
            if !sheet_names.iter().any(|name| name == sheet) {
                return Err(TabIngestError::SheetNotFound {
                    sheet: sheet.to_string(),
                });
            }
        }

        let defined = select_defined_name(&self.defined_names(), range_name, sheet).ok_or_else(
            || TabIngestError::RangeNotFound {
                name: range_name.to_string(),
            },
        )?;

        let invalid = || TabIngestError::InvalidRangeReference {
            name: defined.name.clone(),
            reference: defined.formula.clone(),
        };

        let areas = parse_defined_reference(&defined.formula).ok_or_else(invalid)?;
        if areas.len() > 1 {
            log::warn!(
                "Named range '{}' has {} areas; only the first one is read",
                defined.name,
                areas.len()
            );
        }
        let area = &areas[0];

        let target_sheet = area
            .sheet
            .clone()
            .or_else(|| defined.scope.clone())
            .or_else(|| sheet.map(str::to_string))
            .ok_or_else(invalid)?;
        if !sheet_names.contains(&target_sheet) {
            return Err(TabIngestError::SheetNotFound {
                sheet: target_sheet,
            });
        }

        let range = self.workbook.worksheet_range(&target_sheet)?;
        let used_end = range.end().map(|(row, col)| CellCoord::new(row, col));
        let extent = area.to_extent(used_end);

        Ok(ResolvedRange {
            sheet: target_sheet,
            extent,
        })
    }

    /// 解決済みの範囲を行優先で読み込む
    ///
    /// 範囲の行ごとに1つの出力行、列ごとに1つのセルを生成します。
    /// シートの使用範囲外のセルは空セルとして扱います。
    pub fn read_range(
        &mut self,
        resolved: &ResolvedRange,
        config: &RangeReadConfig,
    ) -> Result<Vec<Vec<CellValue>>> {
        let range = self.workbook.worksheet_range(&resolved.sheet)?;
        let extent = resolved.extent;
        let (_, width) = extent.size();

        let mut rows = Vec::new();
        for row in extent.start.row..=extent.end.row {
            let mut values = Vec::with_capacity(width as usize);
            for col in extent.start.col..=extent.end.col {
                let cell = range.get_value((row, col)).unwrap_or(&Data::Empty);
                values.push(convert_cell(cell, config));
            }
            rows.push(values);
        }

        Ok(rows)
    }
}

/// 名前に一致する定義を選択する
///
/// シート指定がある場合: そのシートのローカル名 > ワークブック全体の名前。
/// シート指定がない場合: ワークブック全体の名前 > 最初に見つかったローカル名。
fn select_defined_name(
    names: &[DefinedName],
    range_name: &str,
    sheet: Option<&str>,
) -> Option<DefinedName> {
    let matching: Vec<&DefinedName> = names
        .iter()
        .filter(|d| d.name.eq_ignore_ascii_case(range_name))
        .collect();

    let local = sheet.and_then(|sheet| {
        matching
            .iter()
            .find(|d| d.scope.as_deref() == Some(sheet))
            .copied()
    });
    let global = matching.iter().find(|d| d.scope.is_none()).copied();

    local
        .or(global)
        .or_else(|| if sheet.is_none() { matching.first().copied() } else { None })
        .cloned()
}

/// セルを`CellValue`に変換する
///
/// 判定の優先順位:
/// 1. 空セル -> 欠損値マーカー
/// 2. 日付・時刻セル -> 日付書式で整形した文字列
/// 3. それ以外 -> ネイティブ値（数式セルはキャッシュされた計算結果）
pub(crate) fn convert_cell(cell: &Data, config: &RangeReadConfig) -> CellValue {
    match cell {
        Data::Empty => config.missing_value.clone(),
        Data::DateTime(dt) if dt.is_datetime() => match dt.as_datetime() {
            Some(datetime) => CellValue::Text(config.render_date(&datetime)),
            None => CellValue::Number(dt.as_f64()),
        },
        Data::DateTime(duration) => CellValue::Number(duration.as_f64()),
        Data::DateTimeIso(s) => match parse_iso_datetime(s) {
            Some(datetime) => CellValue::Text(config.render_date(&datetime)),
            None => CellValue::Text(s.clone()),
        },
        Data::DurationIso(s) => CellValue::Text(s.clone()),
        Data::Int(i) => CellValue::Number(*i as f64),
        Data::Float(f) => CellValue::Number(*f),
        Data::String(s) => CellValue::Text(s.clone()),
        Data::Bool(b) => CellValue::Bool(*b),
        Data::Error(e) => CellValue::Error(e.to_string()),
    }
}

/// ISO 8601形式の日時（ODSなど）を解析
fn parse_iso_datetime(s: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::ExcelRangeReaderBuilder;
    use calamine::{CellErrorType, ExcelDateTime, ExcelDateTimeType};

    fn config() -> RangeReadConfig {
        ExcelRangeReaderBuilder::new().build().unwrap().config().clone()
    }

    fn defined(name: &str, scope: Option<&str>, formula: &str) -> DefinedName {
        DefinedName {
            name: name.to_string(),
            scope: scope.map(str::to_string),
            formula: formula.to_string(),
        }
    }

    #[test]
    fn test_convert_empty_cell_to_missing_marker() {
        assert_eq!(
            convert_cell(&Data::Empty, &config()),
            CellValue::Text("missing".to_string())
        );
    }

    #[test]
    fn test_convert_native_values() {
        let config = config();
        assert_eq!(convert_cell(&Data::Int(7), &config), CellValue::Number(7.0));
        assert_eq!(
            convert_cell(&Data::Float(2.5), &config),
            CellValue::Number(2.5)
        );
        assert_eq!(
            convert_cell(&Data::String("North".to_string()), &config),
            CellValue::Text("North".to_string())
        );
        assert_eq!(
            convert_cell(&Data::Bool(false), &config),
            CellValue::Bool(false)
        );
        assert_eq!(
            convert_cell(&Data::String(String::new()), &config),
            CellValue::Text(String::new())
        );
    }

    #[test]
    fn test_convert_error_cell_to_token() {
        assert_eq!(
            convert_cell(&Data::Error(CellErrorType::Div0), &config()),
            CellValue::Error("#DIV/0!".to_string())
        );
        assert_eq!(
            convert_cell(&Data::Error(CellErrorType::NA), &config()),
            CellValue::Error("#N/A".to_string())
        );
    }

    #[test]
    fn test_convert_date_cell_uses_date_format() {
        // 45306.5 = 2024-01-15 12:00:00
        let cell = Data::DateTime(ExcelDateTime::new(
            45306.5,
            ExcelDateTimeType::DateTime,
            false,
        ));
        assert_eq!(
            convert_cell(&cell, &config()),
            CellValue::Text("2024-01-15 12:00:00".to_string())
        );

        let date_only = ExcelRangeReaderBuilder::new()
            .with_date_format("%d/%m/%Y")
            .build()
            .unwrap();
        assert_eq!(
            convert_cell(&cell, date_only.config()),
            CellValue::Text("15/01/2024".to_string())
        );
    }

    #[test]
    fn test_convert_iso_datetime_cell() {
        let cell = Data::DateTimeIso("2024-02-29T08:15:00".to_string());
        assert_eq!(
            convert_cell(&cell, &config()),
            CellValue::Text("2024-02-29 08:15:00".to_string())
        );

        let cell = Data::DateTimeIso("2024-02-29".to_string());
        assert_eq!(
            convert_cell(&cell, &config()),
            CellValue::Text("2024-02-29 00:00:00".to_string())
        );
    }

    #[test]
    fn test_select_global_name_by_default() {
        let names = vec![
            defined("Q1Data", Some("Sheet2"), "Sheet2!$A$1:$A$2"),
            defined("Q1Data", None, "Sheet1!$A$1:$C$4"),
        ];

        let selected = select_defined_name(&names, "q1data", None).unwrap();
        assert_eq!(selected.formula, "Sheet1!$A$1:$C$4");
    }

    #[test]
    fn test_select_local_name_for_sheet() {
        let names = vec![
            defined("Q1Data", None, "Sheet1!$A$1:$C$4"),
            defined("Q1Data", Some("Sheet2"), "Sheet2!$A$1:$A$2"),
        ];

        let selected = select_defined_name(&names, "Q1Data", Some("Sheet2")).unwrap();
        assert_eq!(selected.scope.as_deref(), Some("Sheet2"));

        let selected = select_defined_name(&names, "Q1Data", Some("Sheet3")).unwrap();
        assert_eq!(selected.scope, None);
    }

    #[test]
    fn test_select_only_local_name_without_sheet() {
        let names = vec![defined("Totals", Some("Sheet2"), "$A$1")];

        assert!(select_defined_name(&names, "Totals", None).is_some());
        assert!(select_defined_name(&names, "Totals", Some("Sheet1")).is_none());
        assert!(select_defined_name(&names, "Other", None).is_none());
    }
}
