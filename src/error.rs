//! Error Types Module
//!
//! クレート全体で使用する構造化エラー型を定義するモジュール。
//! `thiserror`を使用して、エラーの自動変換とメッセージフォーマットを実現する。

use std::path::PathBuf;

use thiserror::Error;

/// tabingestクレートの`Result`型
pub type Result<T> = std::result::Result<T, TabIngestError>;

/// tabingestクレート全体で使用するエラー型
///
/// 3つの取り込みアダプタ（Excel名前付き範囲、Stataファイル、Rワークスペース）が
/// 返すすべてのエラーを統一的に扱います。エラーはすべて即座に呼び出し元へ
/// 伝播され、部分的に構築された`Table`が返されることはありません。
///
/// # エラーの種類
///
/// - `EnvironmentUnavailable`: 必要なライブラリ（伸長コーデックなど）が利用できない
/// - `FileNotFound`: 入力ファイルが存在しない
/// - `RangeNotFound` / `SheetNotFound` / `InvalidRangeReference`: 名前付き範囲の解決失敗
/// - `EmptyDataset`: ヘッダー行の解決対象が0行
/// - `StatFileParse`: `.dta`ファイルの解析失敗（詳細分類なし）
/// - `WorkspaceLoad` / `ObjectNotFound` / `UnsupportedObjectType`: Rワークスペースの読み込み失敗
///
/// # 使用例
///
/// ```rust,no_run
/// use tabingest::{read_stat_file, TabIngestError};
///
/// match read_stat_file("missing.dta") {
///     Err(TabIngestError::FileNotFound(path)) => println!("not found: {}", path.display()),
///     Err(e) => println!("{}", e),
///     Ok(table) => println!("{} rows", table.row_count()),
/// }
/// ```
#[derive(Error, Debug)]
pub enum TabIngestError {
    /// 必要な外部ライブラリが利用できない
    ///
    /// 例えば、bzip2やxzで圧縮されたワークスペースは、このビルドに
    /// 含まれていない伸長コーデックを必要とします。
    #[error("Required library is not available: {0}")]
    EnvironmentUnavailable(String),

    /// 入力ファイルが存在しない
    #[error("File '{}' does not exist", .0.display())]
    FileNotFound(PathBuf),

    /// 名前付き範囲がワークブックに定義されていない
    #[error("No such named range of cells: '{name}'")]
    RangeNotFound {
        /// 検索した名前
        name: String,
    },

    /// 指定されたシートがワークブックに存在しない
    #[error("No such sheet in workbook: '{sheet}'")]
    SheetNotFound {
        /// 検索したシート名
        sheet: String,
    },

    /// 名前付き範囲がセル範囲を参照していない（`#REF!`、定数など）
    #[error("Named range '{name}' does not refer to a cell range: '{reference}'")]
    InvalidRangeReference {
        /// 名前
        name: String,
        /// 定義されている数式
        reference: String,
    },

    /// 行が1つもないデータセットからヘッダーを解決しようとした
    #[error("Dataset is empty: no first row to take column names or width from")]
    EmptyDataset,

    /// Stataファイルの解析中に発生したエラー
    ///
    /// マジックバイト不正、ファイルの切り詰め、未対応バージョンなどを
    /// 区別せず、1種類のエラーとして扱います。
    #[error("An error occurred reading data from Stata file '{}': {message}", .path.display())]
    StatFileParse {
        /// 対象ファイル
        path: PathBuf,
        /// 詳細メッセージ
        message: String,
    },

    /// ワークスペースの読み込みに失敗した
    #[error("Failed to load workspace '{}': {message}", .path.display())]
    WorkspaceLoad {
        /// 対象のディレクトリまたはファイル
        path: PathBuf,
        /// 詳細メッセージ
        message: String,
    },

    /// セッションの名前空間にオブジェクトが存在しない
    #[error("No object named '{0}' in the workspace")]
    ObjectNotFound(String),

    /// オブジェクトを矩形のテーブルとして表現できない
    #[error("Object '{name}' of type {kind} cannot be represented as a table")]
    UnsupportedObjectType {
        /// オブジェクト名
        name: String,
        /// オブジェクトの型の説明
        kind: String,
    },

    /// 設定の検証に失敗したエラー
    ///
    /// `ExcelRangeReaderBuilder::build()`時に設定を検証し、無効な設定
    /// （不正な日付書式文字列など）が検出された場合に発生します。
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O操作中に発生したエラー
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// ワークブックの解析中に発生したエラー（calamine由来）
    #[error("Failed to parse workbook: {0}")]
    Workbook(#[from] calamine::Error),

    /// ZIPアーカイブの解析エラー
    #[error("ZIP archive error: {0}")]
    Zip(String),

    /// XMLの解析エラー
    #[error("XML parse error: {0}")]
    Xml(String),

    /// セキュリティ制限に違反したエラー
    ///
    /// 入力サイズ、ZIPアーカイブ内のファイル数・展開後サイズ、
    /// パストラバーサルなどの制限に違反した場合に発生します。
    #[error("Security violation: {0}")]
    SecurityViolation(String),
}
