//! Stata .dta Format Module
//!
//! Stataのバイナリデータファイルを解析するモジュール。
//!
//! 対応形式:
//! - 113, 114, 115: 固定長ヘッダーの旧形式（Stata 8 - 12）
//! - 117, 118, 119: タグ付きの新形式（Stata 13以降、strL対応）
//!
//! どちらの形式もビッグエンディアン（HILO / MSF）とリトルエンディアン（LOHI / LSF）の
//! 両方に対応します。

use std::collections::{BTreeMap, HashMap};

use encoding_rs::WINDOWS_1252;
use thiserror::Error;

/// `.dta`の解析エラー
#[derive(Error, Debug, PartialEq, Eq)]
pub(crate) enum DtaError {
    #[error("unexpected end of file at offset {offset} (needed {needed} bytes)")]
    Truncated { offset: usize, needed: usize },

    #[error("unsupported format version {0}")]
    UnsupportedVersion(u32),

    #[error("malformed file: {0}")]
    Malformed(String),
}

pub(crate) type DtaResult<T> = std::result::Result<T, DtaError>;

const FLOAT_MISSING: f32 = 1.701_411_8e38; // 2^127
const DOUBLE_MISSING: f64 = 8.988_465_674_311_579e307; // 2^1023

/// 変数の格納型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum VarType {
    Byte,
    Int,
    Long,
    Float,
    Double,
    /// 固定長文字列（バイト数）
    Str(usize),
    /// 長い文字列（GSOテーブルへの参照）
    StrL,
}

impl VarType {
    fn from_legacy_code(code: u8) -> DtaResult<Self> {
        match code {
            251 => Ok(VarType::Byte),
            252 => Ok(VarType::Int),
            253 => Ok(VarType::Long),
            254 => Ok(VarType::Float),
            255 => Ok(VarType::Double),
            1..=244 => Ok(VarType::Str(code as usize)),
            other => Err(DtaError::Malformed(format!(
                "unknown variable type code {}",
                other
            ))),
        }
    }

    fn from_tagged_code(code: u16) -> DtaResult<Self> {
        match code {
            65530 => Ok(VarType::Byte),
            65529 => Ok(VarType::Int),
            65528 => Ok(VarType::Long),
            65527 => Ok(VarType::Float),
            65526 => Ok(VarType::Double),
            32768 => Ok(VarType::StrL),
            1..=2045 => Ok(VarType::Str(code as usize)),
            other => Err(DtaError::Malformed(format!(
                "unknown variable type code {}",
                other
            ))),
        }
    }

    /// データ部での1値あたりのバイト数
    fn width(&self) -> usize {
        match self {
            VarType::Byte => 1,
            VarType::Int => 2,
            VarType::Long | VarType::Float => 4,
            VarType::Double | VarType::StrL => 8,
            VarType::Str(n) => *n,
        }
    }

    /// 整数型かどうか（値ラベルを付けられるのは整数型のみ）
    pub fn is_integer(&self) -> bool {
        matches!(self, VarType::Byte | VarType::Int | VarType::Long)
    }

    pub fn is_numeric(&self) -> bool {
        self.is_integer() || matches!(self, VarType::Float | VarType::Double)
    }
}

/// 変数の記述子
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Variable {
    pub name: String,
    pub var_type: VarType,
    /// 表示書式（例: `%td`, `%9.0g`）
    pub format: String,
    /// 値ラベルテーブル名（空文字列の場合はなし）
    pub value_label: String,
    /// 変数ラベル
    #[allow(dead_code)]
    pub label: String,
}

/// データ部の値
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum DtaValue {
    Number(f64),
    /// `.`, `.a` - `.z`
    Missing,
    Text(String),
    /// 未解決のstrL参照 (v, o)
    StrLRef(u64, u64),
}

/// 解析済みの`.dta`ファイル
#[derive(Debug, Clone)]
pub(crate) struct DtaFile {
    pub version: u16,
    #[allow(dead_code)]
    pub data_label: String,
    pub variables: Vec<Variable>,
    pub rows: Vec<Vec<DtaValue>>,
    /// 値ラベルテーブル名 -> (値 -> ラベル)
    pub value_labels: HashMap<String, BTreeMap<i32, String>>,
}

/// バイト列を先頭から読み進めるカーソル
struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
    big_endian: bool,
}

macro_rules! read_number {
    ($name:ident, $ty:ty, $size:literal) => {
        fn $name(&mut self) -> DtaResult<$ty> {
            let bytes = self.array::<$size>()?;
            Ok(if self.big_endian {
                <$ty>::from_be_bytes(bytes)
            } else {
                <$ty>::from_le_bytes(bytes)
            })
        }
    };
}

impl<'a> ByteReader<'a> {
    fn new(data: &'a [u8], big_endian: bool) -> Self {
        Self {
            data,
            pos: 0,
            big_endian,
        }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, n: usize) -> DtaResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.data.len())
            .ok_or(DtaError::Truncated {
                offset: self.pos,
                needed: n,
            })?;
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn array<const N: usize>(&mut self) -> DtaResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> DtaResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn i8(&mut self) -> DtaResult<i8> {
        Ok(self.u8()? as i8)
    }

    read_number!(u16, u16, 2);
    read_number!(i16, i16, 2);
    read_number!(u32, u32, 4);
    read_number!(i32, i32, 4);
    read_number!(u64, u64, 8);
    read_number!(f32, f32, 4);
    read_number!(f64, f64, 8);

    fn len_i32(&mut self) -> DtaResult<usize> {
        let len = self.i32()?;
        usize::try_from(len).map_err(|_| DtaError::Malformed(format!("negative length {}", len)))
    }

    fn peek(&self, tag: &[u8]) -> bool {
        self.data[self.pos..].starts_with(tag)
    }

    fn expect(&mut self, tag: &[u8]) -> DtaResult<()> {
        let offset = self.pos;
        if self.take(tag.len())? != tag {
            return Err(DtaError::Malformed(format!(
                "expected '{}' at offset {}",
                String::from_utf8_lossy(tag),
                offset
            )));
        }
        Ok(())
    }

    fn fixed_strings(&mut self, count: usize, width: usize, unicode: bool) -> DtaResult<Vec<String>> {
        (0..count)
            .map(|_| Ok(decode_text(self.take(width)?, unicode)))
            .collect()
    }
}

/// NUL終端の固定長文字列を復号する
///
/// 形式118以降はUTF-8、それ以前はWindows-1252として扱います。
fn decode_text(bytes: &[u8], unicode: bool) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    let bytes = &bytes[..end];
    if unicode {
        String::from_utf8_lossy(bytes).into_owned()
    } else {
        WINDOWS_1252
            .decode_without_bom_handling(bytes)
            .0
            .into_owned()
    }
}

/// `.dta`ファイル全体を解析
pub(crate) fn parse_dta(data: &[u8]) -> DtaResult<DtaFile> {
    if data.starts_with(b"<stata_dta>") {
        parse_tagged(data)
    } else {
        parse_legacy(data)
    }
}

fn parse_legacy(data: &[u8]) -> DtaResult<DtaFile> {
    let mut r = ByteReader::new(data, false);

    let version = r.u8()?;
    if !(113..=115).contains(&version) {
        return Err(DtaError::UnsupportedVersion(version as u32));
    }
    r.big_endian = match r.u8()? {
        1 => true,
        2 => false,
        other => {
            return Err(DtaError::Malformed(format!(
                "invalid byte order flag {}",
                other
            )))
        }
    };
    r.take(2)?; // filetype, unused

    let nvar = r.u16()? as usize;
    let nobs = r.u32()? as u64;
    let data_label = decode_text(r.take(81)?, false);
    r.take(18)?; // time stamp

    let types = (0..nvar)
        .map(|_| r.u8().and_then(VarType::from_legacy_code))
        .collect::<DtaResult<Vec<_>>>()?;
    let names = r.fixed_strings(nvar, 33, false)?;
    r.take((nvar + 1) * 2)?; // sortlist
    let format_width = if version >= 114 { 49 } else { 12 };
    let formats = r.fixed_strings(nvar, format_width, false)?;
    let value_label_names = r.fixed_strings(nvar, 33, false)?;
    let labels = r.fixed_strings(nvar, 81, false)?;

    // expansion fields
    loop {
        let data_type = r.u8()?;
        let len = r.len_i32()?;
        if data_type == 0 {
            break;
        }
        r.take(len)?;
    }

    let variables = build_variables(names, types, formats, value_label_names, labels);
    let rows = read_rows(&mut r, &variables, nobs, version as u16, false)?;

    let mut value_labels = HashMap::new();
    while r.remaining() > 0 {
        let len = r.len_i32()?;
        let name = decode_text(r.take(33)?, false);
        r.take(3)?; // padding
        let table = r.take(len)?;
        value_labels.insert(name, parse_value_label_table(table, r.big_endian, false)?);
    }

    Ok(DtaFile {
        version: version as u16,
        data_label,
        variables,
        rows,
        value_labels,
    })
}

fn parse_tagged(data: &[u8]) -> DtaResult<DtaFile> {
    let mut r = ByteReader::new(data, false);

    r.expect(b"<stata_dta><header><release>")?;
    let release = decode_text(r.take(3)?, false);
    let version: u16 = release
        .parse()
        .map_err(|_| DtaError::Malformed(format!("invalid release '{}'", release)))?;
    if !(117..=119).contains(&version) {
        return Err(DtaError::UnsupportedVersion(version as u32));
    }
    let unicode = version >= 118;

    r.expect(b"</release><byteorder>")?;
    r.big_endian = match r.take(3)? {
        b"MSF" => true,
        b"LSF" => false,
        other => {
            return Err(DtaError::Malformed(format!(
                "invalid byte order '{}'",
                String::from_utf8_lossy(other)
            )))
        }
    };
    r.expect(b"</byteorder><K>")?;
    let nvar = if version == 119 {
        r.u32()? as usize
    } else {
        r.u16()? as usize
    };
    r.expect(b"</K><N>")?;
    let nobs = if version == 117 {
        r.u32()? as u64
    } else {
        r.u64()?
    };
    r.expect(b"</N><label>")?;
    let label_len = if version == 117 {
        r.u8()? as usize
    } else {
        r.u16()? as usize
    };
    let data_label = decode_text(r.take(label_len)?, unicode);
    r.expect(b"</label><timestamp>")?;
    let timestamp_len = r.u8()? as usize;
    r.take(timestamp_len)?;
    r.expect(b"</timestamp></header>")?;

    // セクションは固定順で並ぶため、オフセット表は読み飛ばす
    r.expect(b"<map>")?;
    r.take(14 * 8)?;
    r.expect(b"</map>")?;

    let name_width = if version == 117 { 33 } else { 129 };

    r.expect(b"<variable_types>")?;
    let types = (0..nvar)
        .map(|_| r.u16().and_then(VarType::from_tagged_code))
        .collect::<DtaResult<Vec<_>>>()?;
    r.expect(b"</variable_types><varnames>")?;
    let names = r.fixed_strings(nvar, name_width, unicode)?;
    r.expect(b"</varnames><sortlist>")?;
    r.take((nvar + 1) * if version == 119 { 4 } else { 2 })?;
    r.expect(b"</sortlist><formats>")?;
    let formats = r.fixed_strings(nvar, if version == 117 { 49 } else { 57 }, unicode)?;
    r.expect(b"</formats><value_label_names>")?;
    let value_label_names = r.fixed_strings(nvar, name_width, unicode)?;
    r.expect(b"</value_label_names><variable_labels>")?;
    let labels = r.fixed_strings(nvar, if version == 117 { 81 } else { 321 }, unicode)?;
    r.expect(b"</variable_labels><characteristics>")?;
    while !r.peek(b"</characteristics>") {
        r.expect(b"<ch>")?;
        let len = r.u32()? as usize;
        r.take(len)?;
        r.expect(b"</ch>")?;
    }
    r.expect(b"</characteristics><data>")?;

    let variables = build_variables(names, types, formats, value_label_names, labels);
    let mut rows = read_rows(&mut r, &variables, nobs, version, unicode)?;

    r.expect(b"</data><strls>")?;
    let mut strls: HashMap<(u64, u64), String> = HashMap::new();
    while r.peek(b"GSO") {
        r.take(3)?;
        let v = r.u32()? as u64;
        let o = if version == 117 {
            r.u32()? as u64
        } else {
            r.u64()?
        };
        let binary = r.u8()? == 129;
        let len = r.u32()? as usize;
        let bytes = r.take(len)?;
        let text = if binary {
            String::from_utf8_lossy(bytes).into_owned()
        } else {
            decode_text(bytes, unicode)
        };
        strls.insert((v, o), text);
    }
    resolve_strls(&mut rows, &strls)?;

    r.expect(b"</strls><value_labels>")?;
    let mut value_labels = HashMap::new();
    while r.peek(b"<lbl>") {
        r.take(5)?;
        let len = r.len_i32()?;
        let name = decode_text(r.take(name_width)?, unicode);
        r.take(3)?; // padding
        let table = r.take(len)?;
        value_labels.insert(name, parse_value_label_table(table, r.big_endian, unicode)?);
        r.expect(b"</lbl>")?;
    }
    r.expect(b"</value_labels></stata_dta>")?;

    Ok(DtaFile {
        version,
        data_label,
        variables,
        rows,
        value_labels,
    })
}

fn build_variables(
    names: Vec<String>,
    types: Vec<VarType>,
    formats: Vec<String>,
    value_label_names: Vec<String>,
    labels: Vec<String>,
) -> Vec<Variable> {
    names
        .into_iter()
        .zip(types)
        .zip(formats)
        .zip(value_label_names)
        .zip(labels)
        .map(|((((name, var_type), format), value_label), label)| Variable {
            name,
            var_type,
            format,
            value_label,
            label,
        })
        .collect()
}

fn read_rows(
    r: &mut ByteReader<'_>,
    variables: &[Variable],
    nobs: u64,
    version: u16,
    unicode: bool,
) -> DtaResult<Vec<Vec<DtaValue>>> {
    if variables.is_empty() {
        return Ok(Vec::new());
    }

    let row_width: usize = variables.iter().map(|v| v.var_type.width()).sum();
    let needed = usize::try_from(nobs)
        .ok()
        .and_then(|n| n.checked_mul(row_width))
        .ok_or_else(|| DtaError::Malformed(format!("observation count {} is too large", nobs)))?;
    if needed > r.remaining() {
        return Err(DtaError::Truncated {
            offset: r.pos,
            needed,
        });
    }

    let mut rows = Vec::with_capacity(nobs as usize);
    for _ in 0..nobs {
        let row = variables
            .iter()
            .map(|v| read_value(r, v.var_type, version, unicode))
            .collect::<DtaResult<Vec<_>>>()?;
        rows.push(row);
    }
    Ok(rows)
}

fn read_value(
    r: &mut ByteReader<'_>,
    var_type: VarType,
    version: u16,
    unicode: bool,
) -> DtaResult<DtaValue> {
    let value = match var_type {
        VarType::Byte => {
            let v = r.i8()?;
            numeric(v > 100, v as f64)
        }
        VarType::Int => {
            let v = r.i16()?;
            numeric(v > 32_740, v as f64)
        }
        VarType::Long => {
            let v = r.i32()?;
            numeric(v > 2_147_483_620, v as f64)
        }
        VarType::Float => {
            let v = r.f32()?;
            numeric(v.is_nan() || v >= FLOAT_MISSING, v as f64)
        }
        VarType::Double => {
            let v = r.f64()?;
            numeric(v.is_nan() || v >= DOUBLE_MISSING, v)
        }
        VarType::Str(n) => DtaValue::Text(decode_text(r.take(n)?, unicode)),
        VarType::StrL => {
            let (v, o) = read_strl_ref(r, version)?;
            DtaValue::StrLRef(v, o)
        }
    };
    Ok(value)
}

fn numeric(missing: bool, value: f64) -> DtaValue {
    if missing {
        DtaValue::Missing
    } else {
        DtaValue::Number(value)
    }
}

/// データ部のstrL参照 (v, o) を読む
///
/// 117: v(4) o(4)、118: v(2) o(6)、119: v(3) o(5)
fn read_strl_ref(r: &mut ByteReader<'_>, version: u16) -> DtaResult<(u64, u64)> {
    if version == 117 {
        return Ok((r.u32()? as u64, r.u32()? as u64));
    }

    let v_bits = if version == 118 { 16 } else { 24 };
    let raw = r.u64()?;
    if r.big_endian {
        Ok((raw >> (64 - v_bits), raw & ((1u64 << (64 - v_bits)) - 1)))
    } else {
        Ok((raw & ((1u64 << v_bits) - 1), raw >> v_bits))
    }
}

fn resolve_strls(rows: &mut [Vec<DtaValue>], strls: &HashMap<(u64, u64), String>) -> DtaResult<()> {
    for value in rows.iter_mut().flatten() {
        if let DtaValue::StrLRef(v, o) = *value {
            let text = if (v, o) == (0, 0) {
                String::new()
            } else {
                strls
                    .get(&(v, o))
                    .cloned()
                    .ok_or_else(|| DtaError::Malformed(format!("strL ({}, {}) not found", v, o)))?
            };
            *value = DtaValue::Text(text);
        }
    }
    Ok(())
}

/// 値ラベルテーブルを解析
///
/// 構造: n(i32) txtlen(i32) off\[n\](i32) val\[n\](i32) txt\[txtlen\]
fn parse_value_label_table(
    table: &[u8],
    big_endian: bool,
    unicode: bool,
) -> DtaResult<BTreeMap<i32, String>> {
    let mut r = ByteReader::new(table, big_endian);
    let n = r.len_i32()?;
    let text_len = r.len_i32()?;
    let needed = n
        .checked_mul(8)
        .and_then(|bytes| bytes.checked_add(text_len))
        .ok_or_else(|| DtaError::Malformed("value label table is too large".to_string()))?;
    if needed > r.remaining() {
        return Err(DtaError::Truncated {
            offset: r.pos,
            needed,
        });
    }

    let offsets = (0..n).map(|_| r.i32()).collect::<DtaResult<Vec<_>>>()?;
    let values = (0..n).map(|_| r.i32()).collect::<DtaResult<Vec<_>>>()?;
    let text = r.take(text_len)?;

    let mut labels = BTreeMap::new();
    for (offset, value) in offsets.into_iter().zip(values) {
        let start = usize::try_from(offset)
            .ok()
            .filter(|&start| start < text.len())
            .ok_or_else(|| {
                DtaError::Malformed(format!("value label offset {} out of range", offset))
            })?;
        labels.insert(value, decode_text(&text[start..], unicode));
    }
    Ok(labels)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn label_table_le(entries: &[(i32, &str)]) -> Vec<u8> {
        let mut text = Vec::new();
        let mut offsets = Vec::new();
        for (_, label) in entries {
            offsets.push(text.len() as i32);
            text.extend_from_slice(label.as_bytes());
            text.push(0);
        }

        let mut out = Vec::new();
        out.extend_from_slice(&(entries.len() as i32).to_le_bytes());
        out.extend_from_slice(&(text.len() as i32).to_le_bytes());
        for offset in offsets {
            out.extend_from_slice(&offset.to_le_bytes());
        }
        for (value, _) in entries {
            out.extend_from_slice(&value.to_le_bytes());
        }
        out.extend_from_slice(&text);
        out
    }

    #[test]
    fn test_parse_value_label_table() {
        let table = label_table_le(&[(1, "male"), (2, "female")]);
        let labels = parse_value_label_table(&table, false, false).unwrap();

        assert_eq!(labels.get(&1).map(String::as_str), Some("male"));
        assert_eq!(labels.get(&2).map(String::as_str), Some("female"));
    }

    #[test]
    fn test_value_label_table_bad_offset() {
        let mut table = label_table_le(&[(1, "male")]);
        // off[0] を範囲外にする
        table[8..12].copy_from_slice(&100i32.to_le_bytes());

        assert!(matches!(
            parse_value_label_table(&table, false, false),
            Err(DtaError::Malformed(_))
        ));
    }

    #[test]
    fn test_missing_value_thresholds() {
        let mut data = Vec::new();
        data.push(100u8); // byte: 有効な最大値
        data.push(101u8); // byte: .
        data.extend_from_slice(&32_741i16.to_be_bytes()); // int: .
        data.extend_from_slice(&(-5i32).to_be_bytes()); // long: 有効
        data.extend_from_slice(&FLOAT_MISSING.to_be_bytes()); // float: .
        data.extend_from_slice(&f64::from_bits(0x7fe0_0000_0000_1a00).to_be_bytes()); // double: .z

        let mut r = ByteReader::new(&data, true);
        assert_eq!(
            read_value(&mut r, VarType::Byte, 114, false).unwrap(),
            DtaValue::Number(100.0)
        );
        assert_eq!(
            read_value(&mut r, VarType::Byte, 114, false).unwrap(),
            DtaValue::Missing
        );
        assert_eq!(
            read_value(&mut r, VarType::Int, 114, false).unwrap(),
            DtaValue::Missing
        );
        assert_eq!(
            read_value(&mut r, VarType::Long, 114, false).unwrap(),
            DtaValue::Number(-5.0)
        );
        assert_eq!(
            read_value(&mut r, VarType::Float, 114, false).unwrap(),
            DtaValue::Missing
        );
        assert_eq!(
            read_value(&mut r, VarType::Double, 114, false).unwrap(),
            DtaValue::Missing
        );
    }

    #[test]
    fn test_strl_ref_layouts() {
        // 118 LSF: v=3 (2 bytes), o=7 (6 bytes)
        let data = [3u8, 0, 7, 0, 0, 0, 0, 0];
        let mut r = ByteReader::new(&data, false);
        assert_eq!(read_strl_ref(&mut r, 118).unwrap(), (3, 7));

        // 119 MSF: v=2 (3 bytes), o=9 (5 bytes)
        let data = [0u8, 0, 2, 0, 0, 0, 0, 9];
        let mut r = ByteReader::new(&data, true);
        assert_eq!(read_strl_ref(&mut r, 119).unwrap(), (2, 9));

        // 117 LSF: v=1 (4 bytes), o=4 (4 bytes)
        let data = [1u8, 0, 0, 0, 4, 0, 0, 0];
        let mut r = ByteReader::new(&data, false);
        assert_eq!(read_strl_ref(&mut r, 117).unwrap(), (1, 4));
    }

    #[test]
    fn test_decode_text() {
        assert_eq!(decode_text(b"abc\0\0\0", false), "abc");
        assert_eq!(decode_text(&[0x63, 0x61, 0x66, 0xe9, 0], false), "café");
        assert_eq!(decode_text("café\0".as_bytes(), true), "café");
        // 0x80-0x9FはWindows-1252の文字
        assert_eq!(decode_text(&[0x80, b'5', 0x96, 0x93, b'x', 0x94], false), "€5–“x”");
    }

    #[test]
    fn test_unsupported_versions() {
        assert_eq!(
            parse_dta(&[110, 2, 1, 0]).unwrap_err(),
            DtaError::UnsupportedVersion(110)
        );
        assert_eq!(
            parse_dta(b"<stata_dta><header><release>120</release>").unwrap_err(),
            DtaError::UnsupportedVersion(120)
        );
    }

    #[test]
    fn test_truncated_header() {
        assert!(matches!(
            parse_dta(&[114, 2, 1, 0, 3]),
            Err(DtaError::Truncated { .. })
        ));
        assert!(matches!(parse_dta(&[]), Err(DtaError::Truncated { .. })));
    }

    #[test]
    fn test_invalid_byte_order() {
        assert!(matches!(
            parse_dta(&[114, 7, 1, 0]),
            Err(DtaError::Malformed(_))
        ));
    }
}
