//! Defined Name Reference Module
//!
//! 名前付き範囲の定義式（例: `'Q1 Sales'!$A$1:$C$4`）を解析し、
//! シート名と矩形範囲に分解するモジュール。

use crate::types::{parse_a1_parts, CellCoord, CellExtent};

/// 参照領域の境界
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AreaBounds {
    /// セル範囲（"$A$1:$C$4"、単一セル"$A$1"）
    Cells(CellCoord, CellCoord),
    /// 列全体（"$A:$C"）
    Columns(u32, u32),
    /// 行全体（"$1:$4"）
    Rows(u32, u32),
}

/// 定義式の1つの領域
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct AreaRef {
    /// シート名（省略された場合は`None`）
    pub sheet: Option<String>,
    pub bounds: AreaBounds,
}

impl AreaRef {
    /// 具体的なセル範囲に変換
    ///
    /// 列全体・行全体の参照は、シートの使用範囲の終端（`used_end`）で打ち切ります。
    /// 使用範囲がない場合は先頭の1行（1列）に縮めます。
    pub fn to_extent(&self, used_end: Option<CellCoord>) -> CellExtent {
        let used_end = used_end.unwrap_or(CellCoord::new(0, 0));
        match self.bounds {
            AreaBounds::Cells(a, b) => CellExtent::new(a, b),
            AreaBounds::Columns(first, last) => CellExtent::new(
                CellCoord::new(0, first),
                CellCoord::new(used_end.row, last),
            ),
            AreaBounds::Rows(first, last) => CellExtent::new(
                CellCoord::new(first, 0),
                CellCoord::new(last, used_end.col),
            ),
        }
    }
}

/// 定義式を解析し、領域のリストを返す
///
/// 先頭の`=`は省略可能です。セル参照として解釈できない式
/// （`#REF!`、定数、外部参照、3D参照など）の場合は`None`を返します。
pub(crate) fn parse_defined_reference(formula: &str) -> Option<Vec<AreaRef>> {
    let formula = formula.trim();
    let formula = formula.strip_prefix('=').unwrap_or(formula);
    let formula = strip_parens(formula);

    let areas = split_outside_quotes(formula, ',')
        .into_iter()
        .map(parse_area)
        .collect::<Option<Vec<_>>>()?;

    if areas.is_empty() {
        None
    } else {
        Some(areas)
    }
}

fn strip_parens(s: &str) -> &str {
    s.strip_prefix('(')
        .and_then(|inner| inner.strip_suffix(')'))
        .unwrap_or(s)
}

fn parse_area(area: &str) -> Option<AreaRef> {
    let area = area.trim();
    let (sheet, reference) = match rfind_outside_quotes(area, '!') {
        Some(pos) => (Some(parse_sheet_name(&area[..pos])?), &area[pos + 1..]),
        None => (None, area),
    };

    let parts: Vec<&str> = reference.split(':').collect();
    let bounds = match parts.as_slice() {
        [single] => match parse_a1_parts(single)? {
            (Some(col), Some(row)) => {
                let coord = CellCoord::new(row, col);
                AreaBounds::Cells(coord, coord)
            }
            _ => return None,
        },
        [first, last] => match (parse_a1_parts(first)?, parse_a1_parts(last)?) {
            ((Some(c1), Some(r1)), (Some(c2), Some(r2))) => {
                AreaBounds::Cells(CellCoord::new(r1, c1), CellCoord::new(r2, c2))
            }
            ((Some(c1), None), (Some(c2), None)) => AreaBounds::Columns(c1.min(c2), c1.max(c2)),
            ((None, Some(r1)), (None, Some(r2))) => AreaBounds::Rows(r1.min(r2), r1.max(r2)),
            _ => return None,
        },
        _ => return None,
    };

    Some(AreaRef { sheet, bounds })
}

/// シート名部分を解析（`'It''s'` -> `It's`）
///
/// 外部ブック参照（`[1]Sheet1`）と3D参照（`Sheet1:Sheet3`）は受け付けません。
fn parse_sheet_name(raw: &str) -> Option<String> {
    let raw = raw.trim();
    let name = match raw.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')) {
        Some(quoted) => quoted.replace("''", "'"),
        None => {
            if raw.contains(':') {
                return None;
            }
            raw.to_string()
        }
    };

    if name.is_empty() || name.starts_with('[') {
        return None;
    }
    Some(name)
}

fn split_outside_quotes(s: &str, separator: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;

    for (i, c) in s.char_indices() {
        if c == '\'' {
            in_quotes = !in_quotes;
        } else if c == separator && !in_quotes {
            parts.push(&s[start..i]);
            start = i + c.len_utf8();
        }
    }
    if start < s.len() {
        parts.push(&s[start..]);
    }
    parts
}

fn rfind_outside_quotes(s: &str, target: char) -> Option<usize> {
    let mut in_quotes = false;
    let mut found = None;

    for (i, c) in s.char_indices() {
        if c == '\'' {
            in_quotes = !in_quotes;
        } else if c == target && !in_quotes {
            found = Some(i);
        }
    }
    found
}
