//! Parser Module
//!
//! calamineを使用したワークブック解析の実装。
//! 名前付き範囲の定義式の解析、XLSXメタデータの抽出、セル値の変換を提供します。

mod metadata;
mod reference;
mod workbook;

pub(crate) use workbook::WorkbookParser;
