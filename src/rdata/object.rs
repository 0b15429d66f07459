//! R Object Model
//!
//! Rワークスペースから復元したオブジェクトの表現。
//! 表形式への変換に必要な型（ベクトル、リスト、属性）のみ値を保持し、
//! 環境・関数などはオブジェクトの種類だけを記録します。

/// Rのオブジェクト（値 + 属性）
#[derive(Debug, Clone, PartialEq)]
pub struct RObject {
    value: RValue,
    attributes: Vec<(String, RObject)>,
}

/// Rオブジェクトの値
///
/// 論理値・整数・実数・文字列の`None`は`NA`を表します。
#[derive(Debug, Clone, PartialEq)]
pub enum RValue {
    Null,
    Symbol(String),
    Logical(Vec<Option<bool>>),
    Integer(Vec<Option<i32>>),
    Double(Vec<Option<f64>>),
    Complex(Vec<Option<(f64, f64)>>),
    Character(Vec<Option<String>>),
    Raw(Vec<u8>),
    /// 汎用ベクトル（`list`）
    List(Vec<RObject>),
    /// 式ベクトル（`expression`）
    Expression(Vec<RObject>),
    /// タグ付きのペアリスト
    Pairlist(Vec<(Option<String>, RObject)>),
    /// 呼び出し式
    Language(Vec<(Option<String>, RObject)>),
    /// 値を保持しないオブジェクト（環境、関数、外部ポインタなど）
    Opaque(&'static str),
}

impl RObject {
    pub(crate) fn new(value: RValue) -> Self {
        Self {
            value,
            attributes: Vec::new(),
        }
    }

    pub(crate) fn null() -> Self {
        Self::new(RValue::Null)
    }

    pub(crate) fn with_attributes(mut self, attributes: Vec<(String, RObject)>) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn value(&self) -> &RValue {
        &self.value
    }

    pub fn attributes(&self) -> &[(String, RObject)] {
        &self.attributes
    }

    /// 名前で属性を取得
    pub fn attribute(&self, name: &str) -> Option<&RObject> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    pub fn is_null(&self) -> bool {
        matches!(self.value, RValue::Null)
    }

    /// `class`属性（未設定の場合は空）
    pub fn class(&self) -> Vec<&str> {
        match self.attribute("class").map(RObject::value) {
            Some(RValue::Character(classes)) => classes.iter().flatten().map(String::as_str).collect(),
            _ => Vec::new(),
        }
    }

    /// `inherits(x, what)`相当
    pub fn inherits(&self, class: &str) -> bool {
        self.class().contains(&class)
    }

    /// `typeof(x)`相当の型名
    pub fn type_name(&self) -> &'static str {
        match &self.value {
            RValue::Null => "NULL",
            RValue::Symbol(_) => "symbol",
            RValue::Logical(_) => "logical",
            RValue::Integer(_) => "integer",
            RValue::Double(_) => "double",
            RValue::Complex(_) => "complex",
            RValue::Character(_) => "character",
            RValue::Raw(_) => "raw",
            RValue::List(_) => "list",
            RValue::Expression(_) => "expression",
            RValue::Pairlist(_) => "pairlist",
            RValue::Language(_) => "language",
            RValue::Opaque(kind) => kind,
        }
    }

    /// ベクトルの長さ（ベクトル以外は`None`）
    pub fn len(&self) -> Option<usize> {
        match &self.value {
            RValue::Null => Some(0),
            RValue::Logical(v) => Some(v.len()),
            RValue::Integer(v) => Some(v.len()),
            RValue::Double(v) => Some(v.len()),
            RValue::Complex(v) => Some(v.len()),
            RValue::Character(v) => Some(v.len()),
            RValue::Raw(v) => Some(v.len()),
            RValue::List(v) | RValue::Expression(v) => Some(v.len()),
            RValue::Pairlist(v) => Some(v.len()),
            _ => None,
        }
    }

    /// 文字列ベクトルの要素（`NA`は`"NA"`）
    pub(crate) fn as_strings(&self) -> Option<Vec<String>> {
        match &self.value {
            RValue::Character(values) => Some(
                values
                    .iter()
                    .map(|v| v.clone().unwrap_or_else(|| "NA".to_string()))
                    .collect(),
            ),
            _ => None,
        }
    }

    /// 整数または実数ベクトルを整数として取り出す（`dim`など）
    pub(crate) fn as_integers(&self) -> Option<Vec<Option<i64>>> {
        match &self.value {
            RValue::Integer(values) => Some(values.iter().map(|v| v.map(i64::from)).collect()),
            RValue::Double(values) => Some(values.iter().map(|v| v.map(|x| x as i64)).collect()),
            _ => None,
        }
    }
}
