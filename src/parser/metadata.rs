//! XML Metadata Parser Module
//!
//! XLSX内部の`xl/workbook.xml`から、calamineでは取得できない情報を抽出するモジュール。
//! 名前付き範囲のスコープ（`localSheetId`）とシートの並び順を提供します。

use std::io::{Read, Seek};

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use zip::ZipArchive;

use crate::error::{Result, TabIngestError};
use crate::security::{validate_zip_path, SecurityConfig};

/// 名前付き範囲の定義
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DefinedName {
    /// 名前
    pub name: String,
    /// ローカルスコープのシート名（ワークブック全体の名前の場合は`None`）
    pub scope: Option<String>,
    /// 定義式（例: `Sheet1!$A$1:$C$4`）
    pub formula: String,
}

/// XLSXメタデータパーサー
///
/// XLSXファイル（ZIPアーカイブ）から`xl/workbook.xml`を直接解析します。
#[derive(Debug, Clone)]
pub(crate) struct XlsxMetadataParser {
    /// シート名（ワークブック内の順序）
    sheet_names: Vec<String>,
    /// 名前付き範囲の定義
    defined_names: Vec<DefinedName>,
}

impl XlsxMetadataParser {
    /// XLSXファイル（ZIPアーカイブ）からメタデータを解析
    ///
    /// アーカイブのエントリ数、サイズ、パスを`SecurityConfig`で検証してから
    /// `xl/workbook.xml`を読み込みます。
    pub fn new<R: Read + Seek>(xlsx_reader: R) -> Result<Self> {
        let security_config = SecurityConfig::default();

        let mut archive =
            ZipArchive::new(xlsx_reader).map_err(|e| TabIngestError::Zip(e.to_string()))?;

        if archive.len() > security_config.max_file_count {
            return Err(TabIngestError::SecurityViolation(format!(
                "ZIP archive contains too many files: {} (max: {})",
                archive.len(),
                security_config.max_file_count
            )));
        }

        let mut total_decompressed_size = 0u64;
        for i in 0..archive.len() {
            let file = archive
                .by_index(i)
                .map_err(|e| TabIngestError::Zip(e.to_string()))?;

            let file_name = file.name();
            validate_zip_path(file_name).map_err(|e| {
                TabIngestError::SecurityViolation(format!("Invalid ZIP path: {}", e))
            })?;

            let file_size = file.size();
            if file_size > security_config.max_file_size {
                return Err(TabIngestError::SecurityViolation(format!(
                    "File '{}' exceeds maximum size: {} bytes (max: {} bytes)",
                    file_name, file_size, security_config.max_file_size
                )));
            }

            total_decompressed_size = total_decompressed_size.saturating_add(file_size);
            if total_decompressed_size > security_config.max_decompressed_size {
                return Err(TabIngestError::SecurityViolation(format!(
                    "Total decompressed size exceeds maximum: {} bytes (max: {} bytes)",
                    total_decompressed_size, security_config.max_decompressed_size
                )));
            }
        }

        let mut workbook_file = archive
            .by_name("xl/workbook.xml")
            .map_err(|e| TabIngestError::Zip(format!("xl/workbook.xml: {}", e)))?;
        let mut xml_content = Vec::new();
        workbook_file.read_to_end(&mut xml_content)?;

        Self::parse_workbook_xml(&xml_content)
    }

    /// シート名（ワークブック内の順序）
    pub fn sheet_names(&self) -> &[String] {
        &self.sheet_names
    }

    /// 名前付き範囲の定義
    pub fn defined_names(&self) -> &[DefinedName] {
        &self.defined_names
    }

    /// `xl/workbook.xml`の解析
    ///
    /// `<sheets>`からシート名を、`<definedNames>`から名前付き範囲を抽出します。
    /// `localSheetId`は`<sheets>`内の0始まりの位置で、シート名に変換して保持します。
    fn parse_workbook_xml(xml_content: &[u8]) -> Result<Self> {
        let mut reader = Reader::from_reader(xml_content);
        reader.trim_text(true);

        let mut buf = Vec::new();
        let mut sheet_names = Vec::new();
        // (name, localSheetId, formula)
        let mut raw_names: Vec<(String, Option<usize>, String)> = Vec::new();
        let mut current_name: Option<(String, Option<usize>)> = None;
        let mut current_formula = String::new();

        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(e)) => match e.local_name().as_ref() {
                    b"sheet" => sheet_names.push(Self::required_attr(&e, b"name")?),
                    b"definedName" => {
                        current_name = Some(Self::defined_name_attrs(&e)?);
                        current_formula.clear();
                    }
                    _ => {}
                },
                Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                    b"sheet" => sheet_names.push(Self::required_attr(&e, b"name")?),
                    b"definedName" => {
                        let (name, local_sheet_id) = Self::defined_name_attrs(&e)?;
                        raw_names.push((name, local_sheet_id, String::new()));
                    }
                    _ => {}
                },
                Ok(Event::Text(e)) => {
                    if current_name.is_some() {
                        let text = e
                            .unescape()
                            .map_err(|e| TabIngestError::Xml(format!("XML text error: {}", e)))?;
                        current_formula.push_str(&text);
                    }
                }
                Ok(Event::End(e)) => {
                    if e.local_name().as_ref() == b"definedName" {
                        if let Some((name, local_sheet_id)) = current_name.take() {
                            raw_names.push((name, local_sheet_id, current_formula.clone()));
                        }
                    }
                }
                Ok(Event::Eof) => break,
                Err(e) => return Err(TabIngestError::Xml(e.to_string())),
                _ => {}
            }
            buf.clear();
        }

        let defined_names = raw_names
            .into_iter()
            .map(|(name, local_sheet_id, formula)| DefinedName {
                name,
                scope: local_sheet_id.and_then(|id| sheet_names.get(id).cloned()),
                formula,
            })
            .collect();

        Ok(Self {
            sheet_names,
            defined_names,
        })
    }

    fn defined_name_attrs(e: &BytesStart<'_>) -> Result<(String, Option<usize>)> {
        let name = Self::required_attr(e, b"name")?;
        let local_sheet_id = match Self::attr(e, b"localSheetId")? {
            Some(id) => Some(id.parse::<usize>().map_err(|err| {
                TabIngestError::Xml(format!("Invalid localSheetId '{}': {}", id, err))
            })?),
            None => None,
        };
        Ok((name, local_sheet_id))
    }

    fn attr(e: &BytesStart<'_>, key: &[u8]) -> Result<Option<String>> {
        for attr in e.attributes() {
            let attr =
                attr.map_err(|e| TabIngestError::Xml(format!("XML attribute error: {}", e)))?;
            if attr.key.local_name().as_ref() == key {
                let raw = std::str::from_utf8(&attr.value)
                    .map_err(|e| TabIngestError::Xml(format!("XML attribute error: {}", e)))?;
                let value = quick_xml::escape::unescape(raw)
                    .map_err(|e| TabIngestError::Xml(format!("XML attribute error: {}", e)))?;
                return Ok(Some(value.into_owned()));
            }
        }
        Ok(None)
    }

    fn required_attr(e: &BytesStart<'_>, key: &[u8]) -> Result<String> {
        Self::attr(e, key)?.ok_or_else(|| {
            TabIngestError::Xml(format!(
                "<{}> is missing the '{}' attribute",
                String::from_utf8_lossy(e.local_name().as_ref()),
                String::from_utf8_lossy(key)
            ))
        })
    }
}
