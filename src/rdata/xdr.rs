//! R Serialization Format (XDR)
//!
//! `save()`が書き出すワークスペース（`RDX2` / `RDX3`）を復元するモジュール。
//! XDR（ビッグエンディアン）形式のみ対応し、ASCII形式とネイティブバイナリ形式は
//! エラーになります。
//!
//! 各項目は32ビットのフラグで始まります:
//!
//! | ビット | 内容 |
//! |--------|------|
//! | 0-7    | SEXPTYPE |
//! | 8      | オブジェクトビット |
//! | 9      | 属性あり |
//! | 10     | タグあり |
//! | 12-27  | gp（文字列のエンコーディングなど） |

use thiserror::Error;

use super::object::{RObject, RValue};

/// ワークスペースの復元エラー
#[derive(Error, Debug, PartialEq, Eq)]
pub(crate) enum XdrError {
    #[error("unexpected end of data at offset {offset} (needed {needed} bytes)")]
    Truncated { offset: usize, needed: usize },

    #[error("unsupported serialization: {0}")]
    Unsupported(String),

    #[error("malformed workspace: {0}")]
    Malformed(String),
}

pub(crate) type XdrResult<T> = std::result::Result<T, XdrError>;

// SEXPTYPE
const NILSXP: u8 = 0;
const SYMSXP: u8 = 1;
const LISTSXP: u8 = 2;
const CLOSXP: u8 = 3;
const ENVSXP: u8 = 4;
const PROMSXP: u8 = 5;
const LANGSXP: u8 = 6;
const SPECIALSXP: u8 = 7;
const BUILTINSXP: u8 = 8;
const CHARSXP: u8 = 9;
const LGLSXP: u8 = 10;
const INTSXP: u8 = 13;
const REALSXP: u8 = 14;
const CPLXSXP: u8 = 15;
const STRSXP: u8 = 16;
const DOTSXP: u8 = 17;
const VECSXP: u8 = 19;
const EXPRSXP: u8 = 20;
const BCODESXP: u8 = 21;
const EXTPTRSXP: u8 = 22;
const WEAKREFSXP: u8 = 23;
const RAWSXP: u8 = 24;
const S4SXP: u8 = 25;

// シリアライズ専用の疑似型
const ALTREP_SXP: u8 = 238;
const ATTRLISTSXP: u8 = 239;
const ATTRLANGSXP: u8 = 240;
const BASEENV_SXP: u8 = 241;
const EMPTYENV_SXP: u8 = 242;
const BCREPREF: u8 = 243;
const BCREPDEF: u8 = 244;
const GENERICREFSXP: u8 = 245;
const CLASSREFSXP: u8 = 246;
const PERSISTSXP: u8 = 247;
const PACKAGESXP: u8 = 248;
const NAMESPACESXP: u8 = 249;
const BASENAMESPACE_SXP: u8 = 250;
const MISSINGARG_SXP: u8 = 251;
const UNBOUNDVALUE_SXP: u8 = 252;
const GLOBALENV_SXP: u8 = 253;
const NILVALUE_SXP: u8 = 254;
const REFSXP: u8 = 255;

const LATIN1_MASK: u32 = 1 << 2;
const NA_INTEGER: i32 = i32::MIN;
const NA_REAL_LOW_WORD: u32 = 1954;
const MAX_DEPTH: usize = 512;
const MAX_COMPACT_LENGTH: f64 = 1e8;

#[derive(Debug, Clone, Copy)]
struct Flags {
    sexp_type: u8,
    levels: u32,
    has_attr: bool,
    has_tag: bool,
    raw: u32,
}

impl Flags {
    fn new(raw: u32) -> Self {
        Self {
            sexp_type: (raw & 0xFF) as u8,
            levels: raw >> 12,
            has_attr: raw & (1 << 9) != 0,
            has_tag: raw & (1 << 10) != 0,
            raw,
        }
    }
}

/// ワークスペースを復元し、(名前, オブジェクト)の組を返す
///
/// `bytes`は伸長済みのデータ（`RDX2\n`または`RDX3\n`で始まる）です。
pub(crate) fn parse_workspace(bytes: &[u8]) -> XdrResult<Vec<(String, RObject)>> {
    let body = match bytes.get(..5) {
        Some(b"RDX2\n") | Some(b"RDX3\n") => &bytes[5..],
        Some(b"RDA2\n") | Some(b"RDA3\n") => {
            return Err(XdrError::Unsupported("ASCII workspace format".to_string()))
        }
        Some(b"RDB2\n") | Some(b"RDB3\n") => {
            return Err(XdrError::Unsupported("native binary workspace format".to_string()))
        }
        _ => return Err(XdrError::Malformed("missing RDX2/RDX3 signature".to_string())),
    };

    let mut reader = XdrReader::new(body);
    reader.read_header()?;

    let root = reader.read_item()?;
    match root.value() {
        RValue::Null => Ok(Vec::new()),
        RValue::Pairlist(bindings) => bindings
            .iter()
            .map(|(tag, object)| {
                tag.clone()
                    .map(|name| (name, object.clone()))
                    .ok_or_else(|| XdrError::Malformed("untagged workspace binding".to_string()))
            })
            .collect(),
        _ => Err(XdrError::Malformed(format!(
            "workspace root is a {}, expected a pairlist",
            root.type_name()
        ))),
    }
}

/// XDRストリームのリーダー
struct XdrReader<'a> {
    data: &'a [u8],
    pos: usize,
    /// 参照テーブル（シンボル、環境など）
    refs: Vec<RObject>,
    depth: usize,
}

impl<'a> XdrReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            refs: Vec::new(),
            depth: 0,
        }
    }

    fn take(&mut self, n: usize) -> XdrResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.data.len())
            .ok_or(XdrError::Truncated {
                offset: self.pos,
                needed: n,
            })?;
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn i32(&mut self) -> XdrResult<i32> {
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(self.take(4)?);
        Ok(i32::from_be_bytes(bytes))
    }

    fn f64(&mut self) -> XdrResult<f64> {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(self.take(8)?);
        Ok(f64::from_be_bytes(bytes))
    }

    fn read_header(&mut self) -> XdrResult<()> {
        match self.take(2)? {
            b"X\n" => {}
            b"A\n" => return Err(XdrError::Unsupported("ASCII serialization".to_string())),
            b"B\n" => {
                return Err(XdrError::Unsupported(
                    "native binary serialization".to_string(),
                ))
            }
            other => {
                return Err(XdrError::Malformed(format!(
                    "unknown serialization format {:?}",
                    String::from_utf8_lossy(other)
                )))
            }
        }

        let version = self.i32()?;
        let _writer_version = self.i32()?;
        let _min_reader_version = self.i32()?;
        match version {
            2 => Ok(()),
            3 => {
                let len = self.length()?;
                self.take(len)?; // native encoding
                Ok(())
            }
            other => Err(XdrError::Unsupported(format!(
                "serialization version {}",
                other
            ))),
        }
    }

    /// 長さ（`-1`の場合は64ビット長が続く）
    fn length(&mut self) -> XdrResult<usize> {
        let len = self.i32()?;
        let len = if len == -1 {
            let upper = self.i32()? as u32 as u64;
            let lower = self.i32()? as u32 as u64;
            (upper << 32) | lower
        } else {
            u64::try_from(len)
                .map_err(|_| XdrError::Malformed(format!("negative length {}", len)))?
        };
        usize::try_from(len).map_err(|_| XdrError::Malformed(format!("length {} is too large", len)))
    }

    /// 要素数から必要なバイト数を検証した長さ
    fn vector_length(&mut self, element_size: usize) -> XdrResult<usize> {
        let len = self.length()?;
        let needed = len
            .checked_mul(element_size)
            .ok_or_else(|| XdrError::Malformed(format!("vector length {} is too large", len)))?;
        if needed > self.data.len() - self.pos {
            return Err(XdrError::Truncated {
                offset: self.pos,
                needed,
            });
        }
        Ok(len)
    }

    fn flags(&mut self) -> XdrResult<Flags> {
        Ok(Flags::new(self.i32()? as u32))
    }

    fn read_item(&mut self) -> XdrResult<RObject> {
        let flags = self.flags()?;
        self.read_item_with(flags)
    }

    fn read_item_with(&mut self, flags: Flags) -> XdrResult<RObject> {
        self.nested(|reader| reader.read_body(flags))
    }

    fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> XdrResult<T>) -> XdrResult<T> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(XdrError::Malformed(format!(
                "nesting deeper than {} levels",
                MAX_DEPTH
            )));
        }
        let result = f(self);
        self.depth -= 1;
        result
    }

    fn read_body(&mut self, flags: Flags) -> XdrResult<RObject> {
        match flags.sexp_type {
            NILVALUE_SXP | NILSXP => Ok(RObject::null()),
            EMPTYENV_SXP | BASEENV_SXP | GLOBALENV_SXP | BASENAMESPACE_SXP => {
                Ok(RObject::new(RValue::Opaque("environment")))
            }
            UNBOUNDVALUE_SXP | MISSINGARG_SXP => Ok(RObject::new(RValue::Opaque("symbol"))),
            REFSXP => {
                let packed = flags.raw >> 8;
                let index = if packed == 0 {
                    self.i32()? as u32 as usize
                } else {
                    packed as usize
                };
                index
                    .checked_sub(1)
                    .and_then(|i| self.refs.get(i))
                    .cloned()
                    .ok_or_else(|| XdrError::Malformed(format!("invalid reference {}", index)))
            }
            PERSISTSXP | PACKAGESXP | NAMESPACESXP => {
                self.read_string_vec()?;
                let object = RObject::new(RValue::Opaque("environment"));
                self.refs.push(object.clone());
                Ok(object)
            }
            SYMSXP => {
                let name = self.read_item()?;
                let name = match name.value() {
                    RValue::Character(values) => values.first().cloned().flatten().unwrap_or_default(),
                    _ => return Err(XdrError::Malformed("symbol name is not a string".to_string())),
                };
                let object = RObject::new(RValue::Symbol(name));
                self.refs.push(object.clone());
                Ok(object)
            }
            ENVSXP => {
                let _locked = self.i32()?;
                self.refs.push(RObject::new(RValue::Opaque("environment")));
                let _enclos = self.read_item()?;
                let _frame = self.read_item()?;
                let _hashtab = self.read_item()?;
                let _attributes = self.read_item()?;
                Ok(RObject::new(RValue::Opaque("environment")))
            }
            LISTSXP | LANGSXP | DOTSXP => self.read_pairlist(flags),
            CLOSXP | PROMSXP => {
                if flags.has_attr {
                    self.read_item()?;
                }
                if flags.has_tag {
                    self.read_item()?;
                }
                self.read_item()?;
                self.read_item()?;
                let kind = if flags.sexp_type == CLOSXP {
                    "closure"
                } else {
                    "promise"
                };
                Ok(RObject::new(RValue::Opaque(kind)))
            }
            EXTPTRSXP => {
                self.refs.push(RObject::new(RValue::Opaque("externalptr")));
                let _protected = self.read_item()?;
                let _tag = self.read_item()?;
                self.read_attributes(flags)?;
                Ok(RObject::new(RValue::Opaque("externalptr")))
            }
            WEAKREFSXP => {
                self.refs.push(RObject::new(RValue::Opaque("weakref")));
                self.read_attributes(flags)?;
                Ok(RObject::new(RValue::Opaque("weakref")))
            }
            ALTREP_SXP => self.read_altrep(),
            BCODESXP => {
                let _reps = self.i32()?;
                self.skip_bytecode()?;
                self.read_attributes(flags)?;
                Ok(RObject::new(RValue::Opaque("bytecode")))
            }
            BCREPDEF | BCREPREF | ATTRLANGSXP | ATTRLISTSXP => Err(XdrError::Malformed(format!(
                "byte code element {} outside of byte code",
                flags.sexp_type
            ))),
            CLASSREFSXP | GENERICREFSXP => Err(XdrError::Unsupported(format!(
                "internal reference type {}",
                flags.sexp_type
            ))),
            CHARSXP => {
                let value = self.read_char_body(flags)?;
                if flags.has_attr {
                    self.read_item()?;
                }
                Ok(RObject::new(RValue::Character(vec![value])))
            }
            _ => {
                let value = self.read_vector(flags)?;
                let attributes = self.read_attributes(flags)?;
                Ok(RObject::new(value).with_attributes(attributes))
            }
        }
    }

    fn read_vector(&mut self, flags: Flags) -> XdrResult<RValue> {
        let value = match flags.sexp_type {
            LGLSXP => {
                let len = self.vector_length(4)?;
                let mut values = Vec::with_capacity(len);
                for _ in 0..len {
                    let v = self.i32()?;
                    values.push((v != NA_INTEGER).then_some(v != 0));
                }
                RValue::Logical(values)
            }
            INTSXP => {
                let len = self.vector_length(4)?;
                let mut values = Vec::with_capacity(len);
                for _ in 0..len {
                    let v = self.i32()?;
                    values.push((v != NA_INTEGER).then_some(v));
                }
                RValue::Integer(values)
            }
            REALSXP => {
                let len = self.vector_length(8)?;
                let mut values = Vec::with_capacity(len);
                for _ in 0..len {
                    values.push(real_or_na(self.f64()?));
                }
                RValue::Double(values)
            }
            CPLXSXP => {
                let len = self.vector_length(16)?;
                let mut values = Vec::with_capacity(len);
                for _ in 0..len {
                    let re = real_or_na(self.f64()?);
                    let im = real_or_na(self.f64()?);
                    values.push(re.zip(im));
                }
                RValue::Complex(values)
            }
            STRSXP => {
                let len = self.vector_length(8)?;
                let mut values = Vec::with_capacity(len);
                for _ in 0..len {
                    let element = self.flags()?;
                    if element.sexp_type != CHARSXP {
                        return Err(XdrError::Malformed(format!(
                            "character vector element has type {}",
                            element.sexp_type
                        )));
                    }
                    values.push(self.read_char_body(element)?);
                }
                RValue::Character(values)
            }
            VECSXP | EXPRSXP => {
                let len = self.vector_length(4)?;
                let mut values = Vec::with_capacity(len);
                for _ in 0..len {
                    values.push(self.read_item()?);
                }
                if flags.sexp_type == VECSXP {
                    RValue::List(values)
                } else {
                    RValue::Expression(values)
                }
            }
            RAWSXP => {
                let len = self.vector_length(1)?;
                RValue::Raw(self.take(len)?.to_vec())
            }
            S4SXP => RValue::Opaque("S4"),
            SPECIALSXP | BUILTINSXP => {
                let len = self.vector_length(1)?;
                self.take(len)?;
                RValue::Opaque("builtin")
            }
            other => {
                return Err(XdrError::Malformed(format!("unknown SEXPTYPE {}", other)));
            }
        };
        Ok(value)
    }

    fn read_char_body(&mut self, flags: Flags) -> XdrResult<Option<String>> {
        let len = self.i32()?;
        if len == -1 {
            return Ok(None);
        }
        let len = usize::try_from(len)
            .map_err(|_| XdrError::Malformed(format!("negative string length {}", len)))?;
        let bytes = self.take(len)?;
        let text = if flags.levels & LATIN1_MASK != 0 {
            bytes.iter().map(|&b| b as char).collect()
        } else {
            String::from_utf8_lossy(bytes).into_owned()
        };
        Ok(Some(text))
    }

    fn read_attributes(&mut self, flags: Flags) -> XdrResult<Vec<(String, RObject)>> {
        if !flags.has_attr {
            return Ok(Vec::new());
        }
        let attributes = self.read_item()?;
        pairlist_to_attributes(attributes)
    }

    /// ペアリスト（`LISTSXP`などの連結セル）をループで読む
    ///
    /// 末尾の`cdr`が`NULL`以外のセルでない場合は、名前なしの要素として追加します。
    fn read_pairlist(&mut self, first: Flags) -> XdrResult<RObject> {
        let mut items = Vec::new();
        let mut attributes = Vec::new();
        let mut flags = first;

        loop {
            if flags.has_attr {
                let cell_attributes = pairlist_to_attributes(self.read_item()?)?;
                if items.is_empty() {
                    attributes = cell_attributes;
                }
            }
            let tag = if flags.has_tag {
                Some(symbol_name(&self.read_item()?)?)
            } else {
                None
            };
            items.push((tag, self.read_item()?));

            let next = self.flags()?;
            if matches!(next.sexp_type, LISTSXP | DOTSXP) {
                flags = next;
                continue;
            }
            let tail = self.read_item_with(next)?;
            if !tail.is_null() {
                items.push((None, tail));
            }
            break;
        }

        let value = if first.sexp_type == LANGSXP {
            RValue::Language(items)
        } else {
            RValue::Pairlist(items)
        };
        Ok(RObject::new(value).with_attributes(attributes))
    }

    /// バイトコード（命令列と定数プール）を読み飛ばす
    ///
    /// 定数中のシンボルや環境は参照テーブルに登録されるため、項目として読みます。
    fn skip_bytecode(&mut self) -> XdrResult<()> {
        self.nested(|reader| {
            let _code = reader.read_item()?;
            let count = reader.i32()?;
            if count < 0 {
                return Err(XdrError::Malformed(format!(
                    "negative byte code constant count {}",
                    count
                )));
            }
            for _ in 0..count {
                match reader.bytecode_type()? {
                    BCODESXP => reader.skip_bytecode()?,
                    kind @ (LANGSXP | LISTSXP | BCREPDEF | BCREPREF | ATTRLANGSXP
                    | ATTRLISTSXP) => reader.skip_bytecode_lang(kind)?,
                    _ => {
                        reader.read_item()?;
                    }
                }
            }
            Ok(())
        })
    }

    /// バイトコード定数中の言語オブジェクト（共有セルの定義・参照を含む）
    ///
    /// `cdr`側の連結はループで、`car`側は再帰で読みます。
    fn skip_bytecode_lang(&mut self, first: u8) -> XdrResult<()> {
        self.nested(|reader| {
            let mut kind = first;
            loop {
                match kind {
                    BCREPREF => {
                        let _index = reader.i32()?;
                        return Ok(());
                    }
                    BCREPDEF | LANGSXP | LISTSXP | ATTRLANGSXP | ATTRLISTSXP => {
                        if kind == BCREPDEF {
                            let _index = reader.i32()?;
                            kind = reader.bytecode_type()?;
                        }
                        if matches!(kind, ATTRLANGSXP | ATTRLISTSXP) {
                            reader.read_item()?;
                        }
                        let _tag = reader.read_item()?;
                        let car = reader.bytecode_type()?;
                        reader.skip_bytecode_lang(car)?;
                        kind = reader.bytecode_type()?;
                    }
                    _ => {
                        reader.read_item()?;
                        return Ok(());
                    }
                }
            }
        })
    }

    fn bytecode_type(&mut self) -> XdrResult<u8> {
        let value = self.i32()?;
        u8::try_from(value)
            .map_err(|_| XdrError::Malformed(format!("invalid byte code type {}", value)))
    }

    fn read_string_vec(&mut self) -> XdrResult<Vec<Option<String>>> {
        if self.i32()? != 0 {
            return Err(XdrError::Malformed(
                "names in persistent strings are not supported".to_string(),
            ));
        }
        let len = self.vector_length(4)?;
        let mut values = Vec::with_capacity(len);
        for _ in 0..len {
            let item = self.read_item()?;
            match item.value() {
                RValue::Character(chars) => values.push(chars.first().cloned().flatten()),
                _ => return Err(XdrError::Malformed("expected a string".to_string())),
            }
        }
        Ok(values)
    }

    /// ALTREP表現を通常のベクトルに展開
    ///
    /// 対応クラス: `compact_intseq`, `compact_realseq`, `wrap_*`, `deferred_string`
    fn read_altrep(&mut self) -> XdrResult<RObject> {
        let info = self.read_item()?;
        let state = self.read_item()?;
        let attributes = pairlist_to_attributes(self.read_item()?)?;

        let class = match info.value() {
            RValue::Pairlist(items) => match items.first().map(|(_, object)| object.value()) {
                Some(RValue::Symbol(name)) => name.clone(),
                _ => return Err(XdrError::Malformed("invalid ALTREP class".to_string())),
            },
            _ => return Err(XdrError::Malformed("invalid ALTREP info".to_string())),
        };

        let value = match class.as_str() {
            "compact_intseq" => {
                let (n, start, step) = compact_seq_state(&state)?;
                let (start, step) = (integral_i32(start)?, integral_i32(step)?);
                let values = (0..n)
                    .map(|i| {
                        i64::try_from(i)
                            .ok()
                            .and_then(|i| i64::from(step).checked_mul(i))
                            .and_then(|offset| offset.checked_add(i64::from(start)))
                            .and_then(|v| i32::try_from(v).ok())
                            .filter(|&v| v != NA_INTEGER)
                            .map(Some)
                            .ok_or_else(|| {
                                XdrError::Malformed(
                                    "compact integer sequence overflows".to_string(),
                                )
                            })
                    })
                    .collect::<XdrResult<Vec<_>>>()?;
                RValue::Integer(values)
            }
            "compact_realseq" => {
                let (n, start, step) = compact_seq_state(&state)?;
                RValue::Double((0..n).map(|i| Some(start + step * i as f64)).collect())
            }
            name if name.starts_with("wrap_") => match state.value() {
                RValue::Pairlist(items) => match items.first() {
                    Some((_, wrapped)) => wrapped.value().clone(),
                    None => return Err(XdrError::Malformed("empty ALTREP wrapper".to_string())),
                },
                _ => return Err(XdrError::Malformed("invalid ALTREP wrapper".to_string())),
            },
            "deferred_string" => match state.value() {
                RValue::Pairlist(items) => match items.first().map(|(_, arg)| arg.value()) {
                    Some(RValue::Integer(values)) => RValue::Character(
                        values.iter().map(|v| v.map(|v| v.to_string())).collect(),
                    ),
                    Some(RValue::Double(values)) => RValue::Character(
                        values.iter().map(|v| v.map(format_real)).collect(),
                    ),
                    Some(RValue::Character(values)) => RValue::Character(values.clone()),
                    _ => {
                        return Err(XdrError::Malformed(
                            "invalid deferred string state".to_string(),
                        ))
                    }
                },
                _ => {
                    return Err(XdrError::Malformed(
                        "invalid deferred string state".to_string(),
                    ))
                }
            },
            other => return Err(XdrError::Unsupported(format!("ALTREP class '{}'", other))),
        };

        Ok(RObject::new(value).with_attributes(attributes))
    }
}

fn real_or_na(value: f64) -> Option<f64> {
    // NA_real_はNaNのうち下位ワードが1954のもの
    if value.is_nan() && (value.to_bits() & 0xFFFF_FFFF) as u32 == NA_REAL_LOW_WORD {
        None
    } else {
        Some(value)
    }
}

/// `as.character(<double>)`と同じ表記（有効数字15桁）
///
/// 固定小数点表記と指数表記のうち、幅が狭い方を使います（同じ幅なら固定小数点）。
fn format_real(value: f64) -> String {
    if value.is_nan() {
        return "NaN".to_string();
    } else if value.is_infinite() {
        return if value > 0.0 { "Inf" } else { "-Inf" }.to_string();
    } else if value == 0.0 {
        return "0".to_string();
    }

    let scientific = format!("{:.14e}", value);
    let Some((mantissa, exponent)) = scientific.split_once('e') else {
        return scientific;
    };
    let exponent: i32 = exponent.parse().unwrap_or(0);
    let mantissa = mantissa.trim_end_matches('0').trim_end_matches('.');

    let digits = mantissa.chars().filter(char::is_ascii_digit).count() as i32;
    let decimals = (digits - 1 - exponent).max(0);
    let fixed_width = exponent.max(0) + 1 + if decimals > 0 { decimals + 1 } else { 0 };
    let exponent_digits = exponent.unsigned_abs().to_string().len().max(2) as i32;
    let scientific_width = digits + i32::from(digits > 1) + 2 + exponent_digits;

    if fixed_width <= scientific_width {
        format!("{:.*}", decimals as usize, value)
    } else {
        format!(
            "{}e{}{:02}",
            mantissa,
            if exponent < 0 { '-' } else { '+' },
            exponent.unsigned_abs()
        )
    }
}

fn integral_i32(value: f64) -> XdrResult<i32> {
    if value.fract() == 0.0 && (f64::from(i32::MIN)..=f64::from(i32::MAX)).contains(&value) {
        Ok(value as i32)
    } else {
        Err(XdrError::Malformed(format!(
            "compact integer sequence bound {} is not an integer",
            value
        )))
    }
}

fn compact_seq_state(state: &RObject) -> XdrResult<(usize, f64, f64)> {
    match state.value() {
        RValue::Double(values) if values.len() == 3 => match (values[0], values[1], values[2]) {
            (Some(n), Some(start), Some(step)) if (0.0..=MAX_COMPACT_LENGTH).contains(&n) => {
                Ok((n as usize, start, step))
            }
            _ => Err(XdrError::Malformed("invalid compact sequence".to_string())),
        },
        _ => Err(XdrError::Malformed("invalid compact sequence".to_string())),
    }
}

fn symbol_name(object: &RObject) -> XdrResult<String> {
    match object.value() {
        RValue::Symbol(name) => Ok(name.clone()),
        other => Err(XdrError::Malformed(format!(
            "expected a symbol tag, found {:?}",
            other
        ))),
    }
}

fn pairlist_to_attributes(object: RObject) -> XdrResult<Vec<(String, RObject)>> {
    match object.value() {
        RValue::Null => Ok(Vec::new()),
        RValue::Pairlist(items) => items
            .iter()
            .map(|(tag, value)| {
                tag.clone()
                    .map(|name| (name, value.clone()))
                    .ok_or_else(|| XdrError::Malformed("untagged attribute".to_string()))
            })
            .collect(),
        _ => Err(XdrError::Malformed("attributes are not a pairlist".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HAS_ATTR: u32 = 1 << 9;
    const HAS_TAG: u32 = 1 << 10;
    const UTF8: u32 = 1 << 3 << 12;
    const LATIN1: u32 = LATIN1_MASK << 12;

    /// テスト用のXDRストリーム組み立て
    #[derive(Default)]
    struct Xdr(Vec<u8>);

    impl Xdr {
        fn int(mut self, v: i32) -> Self {
            self.0.extend_from_slice(&v.to_be_bytes());
            self
        }

        fn real(mut self, v: f64) -> Self {
            self.0.extend_from_slice(&v.to_be_bytes());
            self
        }

        fn flags(self, sexp_type: u8, extra: u32) -> Self {
            self.int((sexp_type as u32 | extra) as i32)
        }

        fn chars(self, s: &str) -> Self {
            let mut out = self.flags(CHARSXP, UTF8).int(s.len() as i32);
            out.0.extend_from_slice(s.as_bytes());
            out
        }

        fn symbol(self, s: &str) -> Self {
            self.flags(SYMSXP, 0).chars(s)
        }

        fn nil(self) -> Self {
            self.flags(NILVALUE_SXP, 0)
        }

        fn header(self) -> Self {
            let mut out = Xdr(b"RDX2\nX\n".to_vec());
            out = out.int(2).int(0x040300).int(0x020300);
            out.0.extend_from_slice(&self.0);
            out
        }
    }

    #[test]
    fn test_single_integer_binding() {
        let bytes = Xdr::default()
            .flags(LISTSXP, HAS_TAG)
            .symbol("x")
            .flags(INTSXP, 0)
            .int(3)
            .int(1)
            .int(NA_INTEGER)
            .int(-7)
            .nil()
            .header();

        let bindings = parse_workspace(&bytes.0).unwrap();
        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings[0].0, "x");
        assert_eq!(
            bindings[0].1.value(),
            &RValue::Integer(vec![Some(1), None, Some(-7)])
        );
    }

    #[test]
    fn test_symbol_reference_and_attributes() {
        // a <- structure(c(1.5, NA), names = c("p", "q")); b <- "s"
        let bytes = Xdr::default()
            .flags(LISTSXP, HAS_TAG)
            .symbol("a")
            .flags(REALSXP, HAS_ATTR)
            .int(2)
            .real(1.5)
            .real(f64::from_bits(0x7FF0_0000_0000_07A2))
            .flags(LISTSXP, HAS_TAG)
            .symbol("names")
            .flags(STRSXP, 0)
            .int(2)
            .chars("p")
            .chars("q")
            .nil()
            .flags(LISTSXP, HAS_TAG)
            .flags(REFSXP, 1 << 8) // "a"を参照
            .flags(STRSXP, 0)
            .int(1)
            .flags(CHARSXP, LATIN1)
            .int(1)
            .header();
        let mut bytes = bytes;
        bytes.0.push(0xE9);
        let bytes = bytes.nil();

        let bindings = parse_workspace(&bytes.0).unwrap();
        assert_eq!(bindings[0].1.value(), &RValue::Double(vec![Some(1.5), None]));
        assert_eq!(
            bindings[0].1.attribute("names").and_then(RObject::as_strings),
            Some(vec!["p".to_string(), "q".to_string()])
        );
        assert_eq!(bindings[1].0, "a");
        assert_eq!(
            bindings[1].1.value(),
            &RValue::Character(vec![Some("é".to_string())])
        );
    }

    #[test]
    fn test_compact_intseq() {
        // x <- 1:4
        let bytes = Xdr::default()
            .flags(LISTSXP, HAS_TAG)
            .symbol("x")
            .flags(ALTREP_SXP, 0)
            .flags(LISTSXP, 0)
            .symbol("compact_intseq")
            .flags(LISTSXP, 0)
            .symbol("base")
            .flags(LISTSXP, 0)
            .flags(INTSXP, 0)
            .int(1)
            .int(13)
            .nil()
            .flags(REALSXP, 0)
            .int(3)
            .real(4.0)
            .real(1.0)
            .real(1.0)
            .nil()
            .nil()
            .header();

        let bindings = parse_workspace(&bytes.0).unwrap();
        assert_eq!(
            bindings[0].1.value(),
            &RValue::Integer(vec![Some(1), Some(2), Some(3), Some(4)])
        );
    }

    #[test]
    fn test_environment_is_opaque() {
        let bytes = Xdr::default()
            .flags(LISTSXP, HAS_TAG)
            .symbol("e")
            .flags(ENVSXP, 0)
            .int(0)
            .flags(GLOBALENV_SXP, 0)
            .nil()
            .nil()
            .nil()
            .nil()
            .header();

        let bindings = parse_workspace(&bytes.0).unwrap();
        assert_eq!(bindings[0].1.type_name(), "environment");
    }

    #[test]
    fn test_rejects_other_serializations() {
        assert!(matches!(
            parse_workspace(b"RDA2\nA\n"),
            Err(XdrError::Unsupported(_))
        ));
        assert!(matches!(
            parse_workspace(b"RDX2\nB\n"),
            Err(XdrError::Unsupported(_))
        ));
        assert!(matches!(
            parse_workspace(b"PK\x03\x04"),
            Err(XdrError::Malformed(_))
        ));
    }

    #[test]
    fn test_truncated_vector() {
        let bytes = Xdr::default()
            .flags(LISTSXP, HAS_TAG)
            .symbol("x")
            .flags(REALSXP, 0)
            .int(1_000_000)
            .header();

        assert!(matches!(
            parse_workspace(&bytes.0),
            Err(XdrError::Truncated { .. })
        ));
    }

    fn compact_intseq(n: f64, start: f64, step: f64) -> Xdr {
        Xdr::default()
            .flags(LISTSXP, HAS_TAG)
            .symbol("x")
            .flags(ALTREP_SXP, 0)
            .flags(LISTSXP, 0)
            .symbol("compact_intseq")
            .flags(LISTSXP, 0)
            .symbol("base")
            .flags(LISTSXP, 0)
            .flags(INTSXP, 0)
            .int(1)
            .int(13)
            .nil()
            .flags(REALSXP, 0)
            .int(3)
            .real(n)
            .real(start)
            .real(step)
            .nil()
            .nil()
            .header()
    }

    #[test]
    fn test_compact_intseq_overflow() {
        let huge_step = compact_intseq(3.0, 0.0, 1e19);
        assert!(matches!(
            parse_workspace(&huge_step.0),
            Err(XdrError::Malformed(_))
        ));

        let past_max = compact_intseq(3.0, f64::from(i32::MAX) - 1.0, 1.0);
        assert!(matches!(
            parse_workspace(&past_max.0),
            Err(XdrError::Malformed(_))
        ));

        let fractional = compact_intseq(3.0, 1.5, 1.0);
        assert!(matches!(
            parse_workspace(&fractional.0),
            Err(XdrError::Malformed(_))
        ));
    }

    #[test]
    fn test_compact_intseq_descending() {
        let bytes = compact_intseq(3.0, 10.0, -2.0);
        let bindings = parse_workspace(&bytes.0).unwrap();
        assert_eq!(
            bindings[0].1.value(),
            &RValue::Integer(vec![Some(10), Some(8), Some(6)])
        );
    }

    #[test]
    fn test_compiled_closure_is_skipped() {
        // f <- function(x) x + 1 （JITでコンパイル済み）; y <- 2L
        let bytes = Xdr::default()
            .flags(LISTSXP, HAS_TAG)
            .symbol("f")
            .flags(CLOSXP, HAS_TAG)
            .flags(GLOBALENV_SXP, 0) // 環境
            .flags(LISTSXP, HAS_TAG) // 仮引数
            .symbol("x")
            .flags(MISSINGARG_SXP, 0)
            .nil()
            .flags(BCODESXP, 0) // 本体
            .int(2) // 共有セル数
            .flags(INTSXP, 0) // 命令列
            .int(3)
            .int(12)
            .int(1)
            .int(0)
            .int(3) // 定数の数
            // 定数1: `x + 1` （共有セルとして定義）
            .int(BCREPDEF as i32)
            .int(0)
            .int(LANGSXP as i32)
            .nil() // タグ
            .int(0) // car: パディング + 項目
            .symbol("+")
            .int(LISTSXP as i32) // cdr
            .nil()
            .int(0)
            .flags(REFSXP, 2 << 8) // "x"を参照
            .int(ATTRLISTSXP as i32)
            .nil() // 属性
            .nil() // タグ
            .int(0)
            .flags(REALSXP, 0)
            .int(1)
            .real(1.0)
            .int(0)
            .nil()
            // 定数2: 共有セルの参照
            .int(BCREPREF as i32)
            .int(0)
            // 定数3: 入れ子のバイトコード
            .int(BCODESXP as i32)
            .flags(INTSXP, 0)
            .int(1)
            .int(12)
            .int(1)
            .int(SYMSXP as i32)
            .flags(REFSXP, 3 << 8) // "+"を参照
            .flags(LISTSXP, HAS_TAG)
            .symbol("y")
            .flags(INTSXP, 0)
            .int(1)
            .int(2)
            .nil()
            .header();

        let bindings = parse_workspace(&bytes.0).unwrap();
        assert_eq!(bindings.len(), 2);
        assert_eq!(bindings[0].1.type_name(), "closure");
        assert_eq!(bindings[1].0, "y");
        assert_eq!(bindings[1].1.value(), &RValue::Integer(vec![Some(2)]));
    }

    #[test]
    fn test_format_real() {
        assert_eq!(format_real(3.0), "3");
        assert_eq!(format_real(0.25), "0.25");
        assert_eq!(format_real(-1234.5), "-1234.5");
        assert_eq!(format_real(123456.0), "123456");
        assert_eq!(format_real(100000.0), "1e+05");
        assert_eq!(format_real(0.0001), "1e-04");
        assert_eq!(format_real(1.23456789012346e-10), "1.23456789012346e-10");
        assert_eq!(format_real(1.0 / 3.0), "0.333333333333333");
        assert_eq!(format_real(f64::NEG_INFINITY), "-Inf");
    }
}
