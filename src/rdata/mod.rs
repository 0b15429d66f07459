//! R Workspace Module
//!
//! 保存されたRワークスペース（`.RData`）からオブジェクトを取り出し、
//! `Table`として読み込むモジュール。
//!
//! ワークスペースの状態（作業ディレクトリと読み込んだオブジェクト）は
//! 呼び出し側が所有する`RSession`に保持されます。

mod frame;
mod object;
mod xdr;

use std::collections::BTreeMap;
use std::fs::File;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;

use crate::error::{Result, TabIngestError};
use crate::security::SecurityConfig;
use crate::types::Table;

pub use object::{RObject, RValue};

/// 既定のワークスペースファイル名
pub const WORKSPACE_FILE_NAME: &str = ".RData";

const GZIP_MAGIC: &[u8] = &[0x1f, 0x8b];
const BZIP2_MAGIC: &[u8] = b"BZh";
const XZ_MAGIC: &[u8] = &[0xfd, b'7', b'z', b'X', b'Z', 0x00];

/// Rセッション（作業ディレクトリとオブジェクトの名前空間）
///
/// `load()`で読み込んだオブジェクトは名前空間に追加され、同名のオブジェクトは
/// 上書きされます（グローバル環境への`load()`と同じ）。
/// 内部でロックは行わないため、複数スレッドで共有する場合は`Mutex`で包んでください。
///
/// # 使用例
///
/// ```rust,no_run
/// use tabingest::RSession;
///
/// # fn main() -> Result<(), tabingest::TabIngestError> {
/// let mut session = RSession::new();
/// session.set_working_directory("/data/run3")?;
/// let names = session.load(".RData")?;
/// println!("loaded: {:?}", names);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct RSession {
    working_directory: PathBuf,
    objects: BTreeMap<String, RObject>,
}

impl Default for RSession {
    fn default() -> Self {
        Self {
            working_directory: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            objects: BTreeMap::new(),
        }
    }
}

impl RSession {
    /// プロセスのカレントディレクトリを作業ディレクトリとする空のセッション
    pub fn new() -> Self {
        Self::default()
    }

    pub fn working_directory(&self) -> &Path {
        &self.working_directory
    }

    /// 作業ディレクトリを変更する（`setwd()`相当）
    ///
    /// 相対パスは現在の作業ディレクトリを基準に解決されます。
    ///
    /// # 発生し得るエラー
    ///
    /// * `TabIngestError::WorkspaceLoad`: ディレクトリが存在しない場合
    pub fn set_working_directory(&mut self, dir: impl AsRef<Path>) -> Result<()> {
        let dir = self.working_directory.join(dir.as_ref());
        if !dir.is_dir() {
            return Err(TabIngestError::WorkspaceLoad {
                path: dir,
                message: "directory does not exist".to_string(),
            });
        }

        log::debug!("R working directory: {}", dir.display());
        self.working_directory = dir;
        Ok(())
    }

    /// ワークスペースファイルを読み込み、名前空間に追加する（`load()`相当）
    ///
    /// # 戻り値
    ///
    /// 読み込んだオブジェクトの名前（ファイル内の順序）
    ///
    /// # 発生し得るエラー
    ///
    /// * `TabIngestError::WorkspaceLoad`: ファイルが存在しない、またはRワークスペースとして読めない場合
    /// * `TabIngestError::EnvironmentUnavailable`: bzip2 / xz圧縮のワークスペースの場合
    pub fn load(&mut self, file_name: impl AsRef<Path>) -> Result<Vec<String>> {
        let path = self.working_directory.join(file_name.as_ref());
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(TabIngestError::WorkspaceLoad {
                    path,
                    message: "file does not exist".to_string(),
                })
            }
            Err(e) => return Err(unreadable(&path, e.into())),
        };
        let bytes = SecurityConfig::default()
            .read_input(file)
            .and_then(decompress)
            .map_err(|e| unreadable(&path, e))?;

        let bindings = xdr::parse_workspace(&bytes).map_err(|e| TabIngestError::WorkspaceLoad {
            path: path.clone(),
            message: e.to_string(),
        })?;

        let names: Vec<String> = bindings.iter().map(|(name, _)| name.clone()).collect();
        log::debug!("Loaded {} objects from {}", names.len(), path.display());
        self.objects.extend(bindings);
        Ok(names)
    }

    /// 名前でオブジェクトを取得
    pub fn get(&self, name: &str) -> Option<&RObject> {
        self.objects.get(name)
    }

    /// 名前空間内のオブジェクト名（昇順、`ls()`相当）
    pub fn object_names(&self) -> Vec<&str> {
        self.objects.keys().map(String::as_str).collect()
    }
}

/// 入出力エラーを`WorkspaceLoad`に変換する（それ以外のエラーはそのまま）
fn unreadable(path: &Path, error: TabIngestError) -> TabIngestError {
    match error {
        TabIngestError::Io(e) => TabIngestError::WorkspaceLoad {
            path: path.to_path_buf(),
            message: format!("not a readable R workspace: {}", e),
        },
        other => other,
    }
}

/// 圧縮形式を判定して伸長する
fn decompress(bytes: Vec<u8>) -> Result<Vec<u8>> {
    if bytes.starts_with(GZIP_MAGIC) {
        SecurityConfig::default().read_decompressed(GzDecoder::new(bytes.as_slice()))
    } else if bytes.starts_with(BZIP2_MAGIC) {
        Err(TabIngestError::EnvironmentUnavailable(
            "bzip2-compressed workspaces require a bzip2 decoder, which is not available"
                .to_string(),
        ))
    } else if bytes.starts_with(XZ_MAGIC) {
        Err(TabIngestError::EnvironmentUnavailable(
            "xz-compressed workspaces require an xz decoder, which is not available".to_string(),
        ))
    } else {
        Ok(bytes)
    }
}

/// Rワークスペースのオブジェクトを`Table`として読み込むリーダー
pub struct WorkspaceReader;

impl WorkspaceReader {
    /// 作業ディレクトリを変更し、`.RData`を読み込み、オブジェクトを`Table`に変換する
    ///
    /// セッションの作業ディレクトリと名前空間は呼び出し後も変更されたままです。
    ///
    /// # 使用例
    ///
    /// ```rust,no_run
    /// use tabingest::{RSession, WorkspaceReader};
    ///
    /// # fn main() -> Result<(), tabingest::TabIngestError> {
    /// let mut session = RSession::new();
    /// let table = WorkspaceReader::read(&mut session, "/data/run3", "resultsDF")?;
    /// println!("{:?}", table.column_names());
    /// # Ok(())
    /// # }
    /// ```
    ///
    /// # 発生し得るエラー
    ///
    /// * `TabIngestError::WorkspaceLoad`: ディレクトリまたは`.RData`が存在しない、読めない場合
    /// * `TabIngestError::ObjectNotFound`: オブジェクトが存在しない場合
    /// * `TabIngestError::UnsupportedObjectType`: オブジェクトが矩形でない場合
    pub fn read(
        session: &mut RSession,
        working_directory: impl AsRef<Path>,
        object_name: &str,
    ) -> Result<Table> {
        session.set_working_directory(working_directory)?;
        session.load(WORKSPACE_FILE_NAME)?;

        let object = session
            .get(object_name)
            .ok_or_else(|| TabIngestError::ObjectNotFound(object_name.to_string()))?;
        frame::object_to_table(object_name, object)
    }
}

/// 新しいセッションでワークスペースのオブジェクトを読み込む
pub fn read_workspace(working_directory: impl AsRef<Path>, object_name: &str) -> Result<Table> {
    WorkspaceReader::read(&mut RSession::new(), working_directory, object_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_directory() {
        let mut session = RSession::new();
        let result = session.set_working_directory("/nonexistent/run3");
        assert!(matches!(result, Err(TabIngestError::WorkspaceLoad { .. })));
    }

    #[test]
    fn test_decompress_detection() {
        assert!(matches!(
            decompress(b"BZh91AY&SY".to_vec()),
            Err(TabIngestError::EnvironmentUnavailable(_))
        ));
        assert!(matches!(
            decompress(vec![0xfd, b'7', b'z', b'X', b'Z', 0x00, 0x00]),
            Err(TabIngestError::EnvironmentUnavailable(_))
        ));
        assert_eq!(decompress(b"RDX2\n".to_vec()).unwrap(), b"RDX2\n".to_vec());
    }

    #[test]
    fn test_truncated_gzip_is_a_load_error() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(WORKSPACE_FILE_NAME),
            [0x1f, 0x8b, 0x08, 0x00, 0x01, 0x02, 0x03],
        )
        .unwrap();

        let mut session = RSession::new();
        session.set_working_directory(dir.path()).unwrap();
        match session.load(WORKSPACE_FILE_NAME) {
            Err(TabIngestError::WorkspaceLoad { path, .. }) => {
                assert!(path.ends_with(WORKSPACE_FILE_NAME))
            }
            other => panic!("Expected WorkspaceLoad, got {:?}", other),
        }
    }

    #[test]
    fn test_directory_in_place_of_workspace_file() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join(WORKSPACE_FILE_NAME)).unwrap();

        let result = read_workspace(dir.path(), "resultsDF");
        assert!(matches!(result, Err(TabIngestError::WorkspaceLoad { .. })));
    }

    #[test]
    fn test_empty_session() {
        let session = RSession::new();
        assert!(session.object_names().is_empty());
        assert!(session.get("x").is_none());
    }
}
