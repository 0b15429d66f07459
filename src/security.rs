//! Security Module
//!
//! 入力ファイルの読み込み制限を実装するモジュール。
//! 巨大ファイル、ZIP bomb、展開後サイズの膨張、パストラバーサルへの対策を提供します。

use std::io::Read;

use crate::error::{Result, TabIngestError};

/// セキュリティ設定
///
/// ファイル処理時のセキュリティ制限を定義します。
#[derive(Debug, Clone)]
pub(crate) struct SecurityConfig {
    /// 展開後の最大サイズ（バイト）
    /// デフォルト: 1GB (1_073_741_824 bytes)
    pub max_decompressed_size: u64,
    /// ZIPアーカイブ内の最大ファイル数
    /// デフォルト: 10000
    pub max_file_count: usize,
    /// ZIPアーカイブ内の単一ファイルの最大サイズ（バイト）
    /// デフォルト: 100MB (104_857_600 bytes)
    pub max_file_size: u64,
    /// 入力ファイルの最大サイズ（バイト）
    /// デフォルト: 2GB (2_147_483_648 bytes)
    pub max_input_file_size: u64,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            max_decompressed_size: 1_073_741_824, // 1GB
            max_file_count: 10_000,
            max_file_size: 104_857_600,         // 100MB
            max_input_file_size: 2_147_483_648, // 2GB
        }
    }
}

impl SecurityConfig {
    /// 入力全体をメモリに読み込む
    ///
    /// `max_input_file_size`を超える入力は`SecurityViolation`になります。
    /// 呼び出し元はこの関数の後でファイルハンドルを解放できます。
    pub fn read_input<R: Read>(&self, reader: R) -> Result<Vec<u8>> {
        self.read_limited(reader, self.max_input_file_size, "Input file size")
    }

    /// 伸長ストリームをメモリに読み込む
    ///
    /// `max_decompressed_size`を超える展開結果は`SecurityViolation`になります。
    pub fn read_decompressed<R: Read>(&self, reader: R) -> Result<Vec<u8>> {
        self.read_limited(reader, self.max_decompressed_size, "Decompressed size")
    }

    fn read_limited<R: Read>(&self, reader: R, limit: u64, what: &str) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        // 上限+1バイトまで読み、超過を検出する
        let bytes_read = reader.take(limit.saturating_add(1)).read_to_end(&mut buffer)?;

        if bytes_read as u64 > limit {
            return Err(TabIngestError::SecurityViolation(format!(
                "{} exceeds maximum: {} bytes",
                what, limit
            )));
        }
        Ok(buffer)
    }
}

/// ZIPエントリのパスの検証
///
/// # 戻り値
///
/// * `Ok(())` - パスが安全な場合
/// * `Err(String)` - パスが危険な場合（空、絶対パス、`..`、`\`を含む）
pub(crate) fn validate_zip_path(path: &str) -> std::result::Result<(), String> {
    if path.is_empty() {
        return Err("Empty path is not allowed".to_string());
    }

    if path.starts_with('/') || path.get(1..3) == Some(":\\") {
        return Err(format!("Absolute path is not allowed: {}", path));
    }

    if path.split('/').any(|segment| segment == "..") {
        return Err(format!("Path traversal detected: {}", path));
    }

    if path.contains('\\') {
        return Err(format!("Backslash in path is not allowed: {}", path));
    }

    Ok(())
}
