//! 규칙 파일 로더 -- YAML/JSON 규칙 문서를 디스크에서 로드합니다.
//!
//! 카탈로그는 `{ version, rules: [...] }` 형태의 단일 문서이거나
//! 벤더별 `.yml`/`.yaml`/`.json` 파일이 모인 디렉토리입니다.
//! 개별 문서나 파일의 파싱/검증 실패는 경고 로그를 남기고 건너뜁니다.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use semver::Version;
use serde::Serialize;
use serde_yaml::Value;
use tracing::{debug, info, warn};

use vendorscope_core::metrics as m;

use super::types::{RuleCatalog, RuleDefinition, RuleDocument};
use crate::error::DetectorError;

/// 규칙 파일 최대 크기
const MAX_RULE_FILE_SIZE: u64 = 10 * 1024 * 1024; // 10MB
/// 계층당 최대 규칙 수
const MAX_RULES_COUNT: usize = 10_000;

/// 파싱된 문서 묶음
#[derive(Debug, Default)]
pub struct ParsedDocuments {
    /// 문서가 선언한 카탈로그 버전
    pub version: Option<Version>,
    /// 역직렬화에 성공한 규칙 문서
    pub documents: Vec<RuleDocument>,
    /// 역직렬화에 실패해 건너뛴 항목 수
    pub skipped: usize,
}

#[derive(Serialize)]
struct LayerFile<'a> {
    rules: &'a [Value],
}

/// 규칙 파일 로더
pub struct RuleLoader;

impl RuleLoader {
    /// 기본 카탈로그를 로드합니다 (파일 또는 디렉토리).
    ///
    /// # Errors
    /// - 카탈로그 경로를 읽을 수 없는 경우
    /// - 규칙 수가 `MAX_RULES_COUNT`를 초과하는 경우
    pub async fn load_catalog(path: impl AsRef<Path>) -> Result<RuleCatalog, DetectorError> {
        let path = path.as_ref();
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| load_error(path, format!("failed to read catalog: {e}")))?;

        let (version, documents) = if metadata.is_dir() {
            Self::read_directory(path).await?
        } else {
            let parsed = Self::read_file(path).await?;
            (parsed.version, parsed.documents)
        };

        let rules = Self::compile_documents(&documents, &path.display().to_string())?;
        let version = version.unwrap_or_else(|| Version::new(0, 0, 0));

        info!(
            path = %path.display(),
            version = %version,
            count = rules.len(),
            "loaded base rule catalog"
        );

        Ok(RuleCatalog { version, rules })
    }

    /// 오버라이드/사용자 정의 계층 파일을 로드합니다.
    ///
    /// 파일이 없으면 빈 계층으로 취급합니다.
    pub async fn load_layer(path: impl AsRef<Path>) -> Result<Vec<RuleDefinition>, DetectorError> {
        let path = path.as_ref();
        let documents = Self::read_documents(path).await?;
        let rules = Self::compile_documents(&documents, &path.display().to_string())?;
        debug!(path = %path.display(), count = rules.len(), "loaded rule layer");
        Ok(rules)
    }

    /// 계층 파일의 원본 문서를 읽습니다. 파일이 없으면 빈 목록입니다.
    pub async fn read_documents(
        path: impl AsRef<Path>,
    ) -> Result<Vec<RuleDocument>, DetectorError> {
        let path = path.as_ref();
        if !Self::layer_exists(path).await? {
            return Ok(Vec::new());
        }
        Ok(Self::read_file(path).await?.documents)
    }

    /// 계층 파일의 항목을 역직렬화하지 않고 읽습니다.
    ///
    /// 편집 연산은 이 목록을 고쳐 [`write_entries`](Self::write_entries)로 되돌려 쓰므로
    /// 해석할 수 없는 항목도 그대로 보존됩니다.
    pub async fn read_entries(path: impl AsRef<Path>) -> Result<Vec<Value>, DetectorError> {
        let path = path.as_ref();
        if !Self::layer_exists(path).await? {
            return Ok(Vec::new());
        }
        let content = Self::read_text(path).await?;
        let (_, entries) = split_entries(&content, &path.display().to_string())?;
        Ok(entries)
    }

    /// 계층 파일에 항목을 씁니다 (임시 파일 + rename).
    pub async fn write_entries(path: impl AsRef<Path>, entries: &[Value]) -> Result<(), DetectorError> {
        let path = path.as_ref();
        let yaml = serde_yaml::to_string(&LayerFile { rules: entries })
            .map_err(|e| DetectorError::Source(format!("failed to serialize rules: {e}")))?;

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                DetectorError::Source(format!("failed to create {}: {e}", parent.display()))
            })?;
        }

        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, yaml).await.map_err(|e| {
            DetectorError::Source(format!("failed to write {}: {e}", tmp.display()))
        })?;
        tokio::fs::rename(&tmp, path).await.map_err(|e| {
            DetectorError::Source(format!("failed to replace {}: {e}", path.display()))
        })
    }

    /// YAML/JSON 문자열에서 규칙 문서를 파싱합니다.
    ///
    /// 지원 형태: 카탈로그 `{ version, rules }`, 문서 배열, 단일 문서.
    /// 개별 항목 실패는 건너뛰고 `skipped`에 집계합니다.
    pub fn parse_documents(text: &str, source: &str) -> Result<ParsedDocuments, DetectorError> {
        let (version, entries) = split_entries(text, source)?;
        let mut parsed = ParsedDocuments {
            version,
            ..ParsedDocuments::default()
        };

        for (idx, entry) in entries.into_iter().enumerate() {
            match serde_yaml::from_value::<RuleDocument>(entry) {
                Ok(doc) => parsed.documents.push(doc),
                Err(e) => {
                    warn!(source, index = idx, error = %e, "invalid rule document, skipping");
                    metrics::counter!(m::DETECTOR_RULES_SKIPPED_TOTAL).increment(1);
                    parsed.skipped += 1;
                }
            }
        }

        Ok(parsed)
    }

    /// 문서를 검증/컴파일합니다.
    ///
    /// 검증 실패와 중복 ID는 경고 후 건너뜁니다.
    pub fn compile_documents(
        documents: &[RuleDocument],
        source: &str,
    ) -> Result<Vec<RuleDefinition>, DetectorError> {
        let mut rules = Vec::with_capacity(documents.len());
        let mut seen_ids = HashSet::new();

        for doc in documents {
            let rule = match doc.compile() {
                Ok(rule) => rule,
                Err(e) => {
                    warn!(source, error = %e, "invalid rule, skipping");
                    metrics::counter!(m::DETECTOR_RULES_SKIPPED_TOTAL).increment(1);
                    continue;
                }
            };

            // 중복 ID 검사
            if !seen_ids.insert(rule.id.clone()) {
                warn!(source, rule_id = %rule.id, "duplicate rule id, skipping");
                metrics::counter!(m::DETECTOR_RULES_SKIPPED_TOTAL).increment(1);
                continue;
            }

            rules.push(rule);

            if rules.len() > MAX_RULES_COUNT {
                return Err(DetectorError::RuleLoad {
                    path: source.to_owned(),
                    reason: format!("too many rules: max {MAX_RULES_COUNT}"),
                });
            }
        }

        Ok(rules)
    }

    /// 단일 파일을 읽고 파싱합니다.
    async fn read_file(path: &Path) -> Result<ParsedDocuments, DetectorError> {
        let content = Self::read_text(path).await?;
        Self::parse_documents(&content, &path.display().to_string())
    }

    async fn layer_exists(path: &Path) -> Result<bool, DetectorError> {
        tokio::fs::try_exists(path)
            .await
            .map_err(|e| load_error(path, format!("failed to stat file: {e}")))
    }

    async fn read_text(path: &Path) -> Result<String, DetectorError> {
        // 파일 크기 검증
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| load_error(path, format!("failed to read file metadata: {e}")))?;

        if metadata.len() > MAX_RULE_FILE_SIZE {
            return Err(load_error(
                path,
                format!(
                    "file too large: {} bytes (max: {MAX_RULE_FILE_SIZE})",
                    metadata.len()
                ),
            ));
        }

        tokio::fs::read_to_string(path)
            .await
            .map_err(|e| load_error(path, format!("failed to read file: {e}")))
    }

    /// 디렉토리의 규칙 파일을 이름 순으로 읽습니다.
    ///
    /// 읽거나 파싱할 수 없는 파일은 건너뜁니다.
    async fn read_directory(
        dir: &Path,
    ) -> Result<(Option<Version>, Vec<RuleDocument>), DetectorError> {
        let mut entries = tokio::fs::read_dir(dir)
            .await
            .map_err(|e| load_error(dir, format!("failed to read directory: {e}")))?;

        let mut paths: Vec<PathBuf> = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| load_error(dir, format!("failed to read directory entry: {e}")))?
        {
            let path = entry.path();
            let is_rule_file = path
                .extension()
                .is_some_and(|ext| ext == "yml" || ext == "yaml" || ext == "json");
            if is_rule_file {
                paths.push(path);
            }
        }
        paths.sort();

        let mut version: Option<Version> = None;
        let mut documents = Vec::new();
        for path in paths {
            match Self::read_file(&path).await {
                Ok(parsed) => {
                    if let Some(v) = parsed.version {
                        version = Some(match version {
                            Some(current) if current >= v => current,
                            _ => v,
                        });
                    }
                    documents.extend(parsed.documents);
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to load rule file, skipping");
                    metrics::counter!(m::DETECTOR_RULES_SKIPPED_TOTAL).increment(1);
                }
            }
        }

        Ok((version, documents))
    }
}

/// 문서 루트를 카탈로그 버전과 개별 항목으로 나눕니다.
fn split_entries(text: &str, source: &str) -> Result<(Option<Version>, Vec<Value>), DetectorError> {
    let root: Value = serde_yaml::from_str(text).map_err(|e| DetectorError::RuleLoad {
        path: source.to_owned(),
        reason: format!("YAML parse error: {e}"),
    })?;

    match root {
        Value::Null => Ok((None, Vec::new())),
        Value::Sequence(items) => Ok((None, items)),
        Value::Mapping(mut map) => match map.remove("rules") {
            Some(Value::Sequence(items)) => {
                let version = map.get("version").and_then(|v| parse_version(v, source));
                Ok((version, items))
            }
            Some(_) => Err(DetectorError::RuleLoad {
                path: source.to_owned(),
                reason: "'rules' must be a list".to_owned(),
            }),
            None => Ok((None, vec![Value::Mapping(map)])),
        },
        _ => Err(DetectorError::RuleLoad {
            path: source.to_owned(),
            reason: "expected a rule document, a list, or a catalog".to_owned(),
        }),
    }
}

fn load_error(path: &Path, reason: String) -> DetectorError {
    DetectorError::RuleLoad {
        path: path.display().to_string(),
        reason,
    }
}

/// 버전 값을 semver로 해석합니다. `"2"`, `1.4` 같은 축약형은 0으로 채웁니다.
fn parse_version(value: &Value, source: &str) -> Option<Version> {
    let raw = match value {
        Value::String(s) => s.trim().trim_start_matches('v').to_owned(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    let padded = match raw.matches('.').count() {
        0 => format!("{raw}.0.0"),
        1 => format!("{raw}.0"),
        _ => raw.clone(),
    };
    match Version::parse(&padded) {
        Ok(v) => Some(v),
        Err(e) => {
            warn!(source, version = %raw, error = %e, "invalid catalog version, ignoring");
            None
        }
    }
}
