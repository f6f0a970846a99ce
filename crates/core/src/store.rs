//! 영속 상태 저장소 경계
//!
//! [`StateStore`]는 문자열 키에 JSON 값을 저장하는 비동기 저장소를 추상화합니다.
//! 값의 스키마 검증은 저장소가 아니라 각 도메인 타입의 디코더가 담당하며,
//! 검증 실패는 [`CorruptedStateError`](crate::error::CorruptedStateError)로 표현됩니다.
//!
//! # 구현체
//! - [`MemoryStateStore`]: 프로세스 메모리 (테스트, 임베딩)
//! - [`FileStateStore`]: 키당 하나의 JSON 파일 (임시 파일 + rename으로 원자적 쓰기)

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::Value;

use crate::error::StorageError;

/// 키-값 영속 저장소
///
/// `Send + Sync + 'static` 바운드로 여러 비동기 컨텍스트에서 공유할 수 있습니다.
pub trait StateStore: Send + Sync + 'static {
    /// 키의 값을 읽습니다. 없으면 `None`.
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<Value>, StorageError>> + Send;

    /// 키에 값을 씁니다.
    fn put(&self, key: &str, value: Value) -> impl Future<Output = Result<(), StorageError>> + Send;

    /// 키를 삭제합니다. 없는 키는 성공으로 취급합니다.
    fn remove(&self, key: &str) -> impl Future<Output = Result<(), StorageError>> + Send;
}

/// 진단 메시지용 JSON 값 종류 이름
pub fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// 메모리 저장소
///
/// 장애 주입 플래그로 읽기/쓰기 실패를 재현할 수 있습니다.
#[derive(Default)]
pub struct MemoryStateStore {
    entries: Mutex<HashMap<String, Value>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl MemoryStateStore {
    /// 빈 저장소를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 이후 모든 읽기를 실패시킵니다.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// 이후 모든 쓰기/삭제를 실패시킵니다.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// 저장된 항목 수를 반환합니다.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// 저장소가 비어 있는지 확인합니다.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Value>> {
        // 잠금 중 패닉이 나도 맵 자체는 일관된 상태이므로 계속 사용합니다.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_write(&self, key: &str) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Write {
                key: key.to_owned(),
                reason: "injected write failure".to_owned(),
            });
        }
        Ok(())
    }
}

impl StateStore for MemoryStateStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StorageError::Read {
                key: key.to_owned(),
                reason: "injected read failure".to_owned(),
            });
        }
        Ok(self.lock().get(key).cloned())
    }

    async fn put(&self, key: &str, value: Value) -> Result<(), StorageError> {
        self.check_write(key)?;
        self.lock().insert(key.to_owned(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.check_write(key)?;
        self.lock().remove(key);
        Ok(())
    }
}

/// 파일 저장소 -- 키당 `<dir>/<key>.json`
pub struct FileStateStore {
    dir: PathBuf,
}

impl FileStateStore {
    /// 디렉토리를 루트로 하는 파일 저장소를 생성합니다.
    ///
    /// 디렉토리가 없으면 생성합니다.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, StorageError> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| StorageError::Write {
                key: dir.display().to_string(),
                reason: format!("failed to create state directory: {e}"),
            })?;
        Ok(Self { dir })
    }

    /// 저장소 루트 디렉토리
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(StorageError::Write {
                key: key.to_owned(),
                reason: "key must be non-empty [A-Za-z0-9_-]".to_owned(),
            });
        }
        Ok(self.dir.join(format!("{key}.json")))
    }
}

impl StateStore for FileStateStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        let path = self.path_for(key)?;
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(StorageError::Read {
                    key: key.to_owned(),
                    reason: e.to_string(),
                });
            }
        };
        // JSON 자체가 깨진 경우도 스키마 손상으로 취급합니다.
        serde_json::from_str(&content).map(Some).map_err(|e| {
            StorageError::Corrupted(crate::error::CorruptedStateError::new(
                key,
                format!("invalid JSON: {e}"),
            ))
        })
    }

    async fn put(&self, key: &str, value: Value) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_vec(&value).map_err(|e| StorageError::Write {
            key: key.to_owned(),
            reason: e.to_string(),
        })?;
        tokio::fs::write(&tmp, body)
            .await
            .map_err(|e| StorageError::Write {
                key: key.to_owned(),
                reason: e.to_string(),
            })?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| StorageError::Write {
                key: key.to_owned(),
                reason: e.to_string(),
            })
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Write {
                key: key.to_owned(),
                reason: e.to_string(),
            }),
        }
    }
}
