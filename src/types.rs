//! Types Module
//!
//! クレート全体で使用する共通データ型を定義するモジュール。

use std::fmt;

use chrono::NaiveDateTime;
use serde::Serialize;

use crate::error::{Result, TabIngestError};

/// セルの値を表す列挙型
///
/// 3つの取り込みアダプタはすべて、この閉じた和型に値を正規化します。
/// `Missing`は`Text("")`とは区別される欠損値の番兵です。
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum CellValue {
    /// 文字列
    Text(String),

    /// 数値（f64）
    Number(f64),

    /// 論理値
    Bool(bool),

    /// 日時
    DateTime(NaiveDateTime),

    /// エラー値（例: `#DIV/0!`）
    Error(String),

    /// 欠損値
    Missing,
}

impl CellValue {
    /// 値が欠損値かどうかを判定
    pub fn is_missing(&self) -> bool {
        matches!(self, CellValue::Missing)
    }

    /// 文字列値を取得
    pub fn as_text(&self) -> Option<&str> {
        match self {
            CellValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// 数値を取得
    pub fn as_number(&self) -> Option<f64> {
        match self {
            CellValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// 日時を取得
    pub fn as_datetime(&self) -> Option<NaiveDateTime> {
        match self {
            CellValue::DateTime(dt) => Some(*dt),
            _ => None,
        }
    }
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        CellValue::Text(s.to_string())
    }
}

impl From<String> for CellValue {
    fn from(s: String) -> Self {
        CellValue::Text(s)
    }
}

impl From<f64> for CellValue {
    fn from(n: f64) -> Self {
        CellValue::Number(n)
    }
}

impl From<bool> for CellValue {
    fn from(b: bool) -> Self {
        CellValue::Bool(b)
    }
}

impl fmt::Display for CellValue {
    /// 値をテキストとして表示する（ヘッダー名の生成に使用）
    ///
    /// 整数値の数値は小数部なしで、欠損値は空文字列で表示します。
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Text(s) => f.write_str(s),
            CellValue::Number(n) => {
                if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
                    write!(f, "{}", *n as i64)
                } else {
                    write!(f, "{}", n)
                }
            }
            CellValue::Bool(b) => write!(f, "{}", b),
            CellValue::DateTime(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S")),
            CellValue::Error(e) => f.write_str(e),
            CellValue::Missing => Ok(()),
        }
    }
}

/// 取り込み結果のテーブル
///
/// 行の順序付きシーケンスと列名の順序付きシーケンスを保持します。
/// すべての行は`column_names().len()`個の要素を持ちます。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Table {
    #[serde(rename = "columns")]
    column_names: Vec<String>,
    rows: Vec<Vec<CellValue>>,
}

impl Table {
    /// 列名と行から`Table`を生成
    ///
    /// 呼び出し側は、すべての行の幅が列数と一致することを保証します。
    pub(crate) fn from_parts(column_names: Vec<String>, rows: Vec<Vec<CellValue>>) -> Self {
        debug_assert!(rows.iter().all(|row| row.len() == column_names.len()));
        Self { column_names, rows }
    }

    /// 列名（列順）
    pub fn column_names(&self) -> &[String] {
        &self.column_names
    }

    /// すべての行
    pub fn rows(&self) -> &[Vec<CellValue>] {
        &self.rows
    }

    /// 行数
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// 列数
    pub fn column_count(&self) -> usize {
        self.column_names.len()
    }

    /// 指定した名前の列の値を取得
    ///
    /// 同名の列が複数ある場合は最初の列を返します。
    pub fn column(&self, name: &str) -> Option<Vec<&CellValue>> {
        let index = self.column_names.iter().position(|n| n == name)?;
        Some(self.rows.iter().map(|row| &row[index]).collect())
    }

    /// 列名と行に分解
    pub fn into_parts(self) -> (Vec<String>, Vec<Vec<CellValue>>) {
        (self.column_names, self.rows)
    }

    /// JSON文字列に変換
    ///
    /// 形式: `{"columns": [...], "rows": [[{"type": ..., "value": ...}, ...], ...]}`
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| TabIngestError::Io(e.into()))
    }
}

/// セル座標（0始まり）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct CellCoord {
    pub row: u32,
    pub col: u32,
}

impl CellCoord {
    /// 新しい座標を生成
    pub fn new(row: u32, col: u32) -> Self {
        Self { row, col }
    }

    /// A1形式の文字列に変換（例: (0, 0) -> "A1"）
    #[allow(clippy::wrong_self_convention)]
    pub fn to_a1_notation(&self) -> String {
        format!("{}{}", col_index_to_letter(self.col), self.row + 1)
    }

    /// A1形式の文字列から座標を生成（例: "$B$3" -> (2, 1)）
    pub fn from_a1_notation(s: &str) -> Option<Self> {
        match parse_a1_parts(s)? {
            (Some(col), Some(row)) => Some(Self::new(row, col)),
            _ => None,
        }
    }
}

/// 矩形のセル範囲（両端を含む）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CellExtent {
    pub start: CellCoord,
    pub end: CellCoord,
}

impl CellExtent {
    /// 新しい範囲を生成
    ///
    /// 開始・終了の順序は正規化されます（"C4:A1"は"A1:C4"と同じ）。
    pub fn new(a: CellCoord, b: CellCoord) -> Self {
        Self {
            start: CellCoord::new(a.row.min(b.row), a.col.min(b.col)),
            end: CellCoord::new(a.row.max(b.row), a.col.max(b.col)),
        }
    }

    /// 範囲のサイズ（行数, 列数）
    pub fn size(&self) -> (u32, u32) {
        (
            self.end.row - self.start.row + 1,
            self.end.col - self.start.col + 1,
        )
    }

    /// A1形式の文字列に変換（例: "A1:C4"）
    #[allow(clippy::wrong_self_convention)]
    pub fn to_a1_notation(&self) -> String {
        format!(
            "{}:{}",
            self.start.to_a1_notation(),
            self.end.to_a1_notation()
        )
    }
}

/// 列インデックスを文字列に変換（0 -> "A", 25 -> "Z", 26 -> "AA"）
fn col_index_to_letter(mut col: u32) -> String {
    let mut result = String::new();
    loop {
        let remainder = col % 26;
        result.insert(0, (b'A' + remainder as u8) as char);
        if col < 26 {
            break;
        }
        col = col / 26 - 1;
    }
    result
}

/// A1形式の参照を列部分と行部分に分解する
///
/// `$`は無視されます。列のみ（"$A"）、行のみ（"$3"）も受け付けます。
/// 戻り値は`(列, 行)`で、いずれも0始まりです。
pub(crate) fn parse_a1_parts(s: &str) -> Option<(Option<u32>, Option<u32>)> {
    let s = s.trim();
    let mut chars = s.chars().peekable();

    let mut col: Option<u32> = None;
    if chars.peek() == Some(&'$') {
        chars.next();
    }
    while let Some(&c) = chars.peek() {
        if !c.is_ascii_alphabetic() {
            break;
        }
        let digit = c.to_ascii_uppercase() as u32 - 'A' as u32 + 1;
        col = Some(col.unwrap_or(0).checked_mul(26)?.checked_add(digit)?);
        chars.next();
    }

    let mut row: Option<u32> = None;
    if chars.peek() == Some(&'$') {
        chars.next();
    }
    for c in chars {
        let digit = c.to_digit(10)?;
        row = Some(row.unwrap_or(0).checked_mul(10)?.checked_add(digit)?);
    }

    if col.is_none() && row.is_none() {
        return None;
    }
    // 行番号は1始まり
    if row == Some(0) {
        return None;
    }
    Some((col.map(|c| c - 1), row.map(|r| r - 1)))
}
