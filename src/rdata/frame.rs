//! R Object to Table Conversion
//!
//! `data.frame`と行列を`Table`に変換するモジュール。

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime};

use super::object::{RObject, RValue};
use crate::error::{Result, TabIngestError};
use crate::types::{CellValue, Table};

/// オブジェクトを`Table`に変換
///
/// * `data.frame`: リストの各要素を列とし、`names`属性を列名とする
/// * 行列（長さ2の`dim`属性を持つ原子ベクトル）: 列優先で値を並べ、
///   `dimnames[[2]]`を列名とする（なければ`V1`..`Vn`）
pub(crate) fn object_to_table(name: &str, object: &RObject) -> Result<Table> {
    let unsupported = || TabIngestError::UnsupportedObjectType {
        name: name.to_string(),
        kind: describe(object),
    };

    if object.inherits("data.frame") {
        data_frame_to_table(object).ok_or_else(unsupported)
    } else if object.attribute("dim").is_some() {
        matrix_to_table(object).ok_or_else(unsupported)
    } else {
        Err(unsupported())
    }
}

/// エラーメッセージ用のオブジェクトの説明（クラスがあればクラス名）
fn describe(object: &RObject) -> String {
    match object.class().first() {
        Some(class) => format!("'{}'", class),
        None => object.type_name().to_string(),
    }
}

fn data_frame_to_table(object: &RObject) -> Option<Table> {
    let columns = match object.value() {
        RValue::List(columns) => columns,
        _ => return None,
    };

    let column_names = match object.attribute("names") {
        Some(names) => names.as_strings()?,
        None => (1..=columns.len()).map(|i| format!("V{}", i)).collect(),
    };
    if column_names.len() != columns.len() {
        return None;
    }

    let values = columns
        .iter()
        .map(column_values)
        .collect::<Option<Vec<_>>>()?;

    let row_count = match values.first() {
        Some(first) => first.len(),
        None => compact_row_count(object),
    };
    if values.iter().any(|column| column.len() != row_count) {
        return None;
    }

    let mut columns: Vec<_> = values.into_iter().map(Vec::into_iter).collect();
    let rows = (0..row_count)
        .map(|_| {
            columns
                .iter_mut()
                .map(|column| column.next().unwrap_or(CellValue::Missing))
                .collect()
        })
        .collect();

    Some(Table::from_parts(column_names, rows))
}

/// `row.names`属性から行数を求める
///
/// 自動の行名は`c(NA, -n)`の形で圧縮されています。
fn compact_row_count(object: &RObject) -> usize {
    let Some(row_names) = object.attribute("row.names") else {
        return 0;
    };
    match row_names.value() {
        RValue::Integer(values) if values.len() == 2 && values[0].is_none() => {
            values[1].map_or(0, |n| n.unsigned_abs() as usize)
        }
        _ => row_names.len().unwrap_or(0),
    }
}

fn matrix_to_table(object: &RObject) -> Option<Table> {
    let dim = object.attribute("dim")?.as_integers()?;
    let (nrow, ncol) = match dim.as_slice() {
        [Some(nrow), Some(ncol)] => (usize::try_from(*nrow).ok()?, usize::try_from(*ncol).ok()?),
        _ => return None,
    };

    let values = atomic_values(object)?;
    if values.len() != nrow.checked_mul(ncol)? {
        return None;
    }

    let column_names = object
        .attribute("dimnames")
        .and_then(|dimnames| match dimnames.value() {
            RValue::List(dims) if dims.len() == 2 => dims[1].as_strings(),
            _ => None,
        })
        .filter(|names| names.len() == ncol)
        .unwrap_or_else(|| (1..=ncol).map(|i| format!("V{}", i)).collect());

    let rows = (0..nrow)
        .map(|row| (0..ncol).map(|col| values[col * nrow + row].clone()).collect())
        .collect();

    Some(Table::from_parts(column_names, rows))
}

/// 列ベクトルをセル値に変換（表現できない列は`None`）
fn column_values(column: &RObject) -> Option<Vec<CellValue>> {
    if column.inherits("factor") {
        return factor_values(column);
    }
    if column.inherits("Date") {
        return Some(
            numeric_values(column)?
                .into_iter()
                .map(|v| or_missing(v.and_then(date_from_days)))
                .collect(),
        );
    }
    if column.inherits("POSIXct") {
        return Some(
            numeric_values(column)?
                .into_iter()
                .map(|v| or_missing(v.and_then(datetime_from_seconds)))
                .collect(),
        );
    }
    atomic_values(column)
}

fn factor_values(column: &RObject) -> Option<Vec<CellValue>> {
    let levels = column.attribute("levels")?.as_strings()?;
    let codes = match column.value() {
        RValue::Integer(codes) => codes,
        _ => return None,
    };

    codes
        .iter()
        .map(|code| match code {
            None => Some(CellValue::Missing),
            Some(code) => {
                let index = usize::try_from(*code).ok()?.checked_sub(1)?;
                levels.get(index).cloned().map(CellValue::Text)
            }
        })
        .collect()
}

fn numeric_values(column: &RObject) -> Option<Vec<Option<f64>>> {
    match column.value() {
        RValue::Double(values) => Some(values.clone()),
        RValue::Integer(values) => Some(values.iter().map(|v| v.map(f64::from)).collect()),
        _ => None,
    }
}

fn atomic_values(object: &RObject) -> Option<Vec<CellValue>> {
    let values = match object.value() {
        RValue::Logical(values) => values
            .iter()
            .map(|v| or_missing(v.map(CellValue::Bool)))
            .collect(),
        RValue::Integer(values) => values
            .iter()
            .map(|v| or_missing(v.map(|x| CellValue::Number(x as f64))))
            .collect(),
        RValue::Double(values) => values
            .iter()
            .map(|v| or_missing(v.map(CellValue::Number)))
            .collect(),
        RValue::Character(values) => values
            .iter()
            .map(|v| or_missing(v.clone().map(CellValue::Text)))
            .collect(),
        RValue::Raw(values) => values.iter().map(|&b| CellValue::Number(b as f64)).collect(),
        _ => return None,
    };
    Some(values)
}

fn epoch() -> Option<NaiveDateTime> {
    NaiveDate::from_ymd_opt(1970, 1, 1)?.and_hms_opt(0, 0, 0)
}

fn date_from_days(days: f64) -> Option<CellValue> {
    if !days.is_finite() {
        return None;
    }
    let millis = (days * 86_400_000.0).round() as i64;
    epoch()?
        .checked_add_signed(Duration::try_milliseconds(millis)?)
        .map(CellValue::DateTime)
}

fn datetime_from_seconds(seconds: f64) -> Option<CellValue> {
    if !seconds.is_finite() {
        return None;
    }
    let whole = seconds.floor();
    let nanos = ((seconds - whole) * 1e9).round().min(999_999_999.0) as u32;
    DateTime::from_timestamp(whole as i64, nanos).map(|dt| CellValue::DateTime(dt.naive_utc()))
}

fn or_missing(value: Option<CellValue>) -> CellValue {
    value.unwrap_or(CellValue::Missing)
}
