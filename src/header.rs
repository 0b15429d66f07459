//! Header Row Module
//!
//! 行データの先頭行を列名として扱うか、`var1`..`varN`の列名を生成するかを
//! 決定するモジュール。Excel名前付き範囲の取り込みで使用します。

use crate::error::{Result, TabIngestError};
use crate::types::CellValue;

/// 列名を解決し、必要に応じて先頭行を取り除く
///
/// # 引数
///
/// * `rows` - 行データ（`has_header_row`が`true`の場合、先頭行が取り除かれる）
/// * `has_header_row` - 先頭行が列名を含むかどうか
///
/// # 戻り値
///
/// * `Ok(Vec<String>)` - 列名
/// * `Err(TabIngestError::EmptyDataset)` - `rows`が空の場合
///
/// 先頭行の値はそのまま列名になります。重複する列名の検査は行いません。
pub(crate) fn resolve_header_row(
    rows: &mut Vec<Vec<CellValue>>,
    has_header_row: bool,
) -> Result<Vec<String>> {
    if rows.is_empty() {
        return Err(TabIngestError::EmptyDataset);
    }

    if has_header_row {
        let header = rows.remove(0);
        Ok(header.iter().map(|value| value.to_string()).collect())
    } else {
        Ok(synthesize_column_names(rows[0].len()))
    }
}

/// `var1`..`varN`の列名を生成
pub(crate) fn synthesize_column_names(width: usize) -> Vec<String> {
    (1..=width).map(|i| format!("var{}", i)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn q1_rows() -> Vec<Vec<CellValue>> {
        vec![
            vec!["Date".into(), "Region".into(), "Amount".into()],
            vec!["2024-01-05".into(), "North".into(), 120.0.into()],
            vec!["2024-02-11".into(), "South".into(), 80.5.into()],
            vec!["2024-03-20".into(), "East".into(), CellValue::Missing],
        ]
    }

    #[test]
    fn test_header_row_promoted_and_removed() {
        let mut rows = q1_rows();
        let names = resolve_header_row(&mut rows, true).unwrap();

        assert_eq!(names, vec!["Date", "Region", "Amount"]);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0][1], CellValue::Text("North".to_string()));
    }

    #[test]
    fn test_names_synthesized_without_header_row() {
        let mut rows = q1_rows();
        let names = resolve_header_row(&mut rows, false).unwrap();

        assert_eq!(names, vec!["var1", "var2", "var3"]);
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[0][0], CellValue::Text("Date".to_string()));
    }

    #[test]
    fn test_duplicate_header_text_kept() {
        let mut rows = vec![vec!["x".into(), "x".into()], vec![1.0.into(), 2.0.into()]];
        let names = resolve_header_row(&mut rows, true).unwrap();

        assert_eq!(names, vec!["x", "x"]);
    }

    #[test]
    fn test_non_text_header_cells() {
        let mut rows = vec![vec![2024.0.into(), CellValue::Bool(true), CellValue::Missing]];
        let names = resolve_header_row(&mut rows, true).unwrap();

        assert_eq!(names, vec!["2024", "true", ""]);
        assert!(rows.is_empty());
    }

    #[test]
    fn test_empty_dataset() {
        let mut rows: Vec<Vec<CellValue>> = Vec::new();

        assert!(matches!(
            resolve_header_row(&mut rows, true),
            Err(TabIngestError::EmptyDataset)
        ));
        assert!(matches!(
            resolve_header_row(&mut rows, false),
            Err(TabIngestError::EmptyDataset)
        ));
    }
}
