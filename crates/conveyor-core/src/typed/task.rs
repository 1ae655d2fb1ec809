//! Task trait - 型付き Task の定義
//!
//! # 学習ポイント
//! - Associated Constants (`const TYPE`, `const REQUIRED`)
//! - Trait bounds の組み合わせ (Serialize + DeserializeOwned + Send + Sync + 'static)

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::domain::TaskType;

/// Task は `type` と payload の型を対応付ける
///
/// # 使用例
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct MemoryTask {
///     text: String,
/// }
///
/// impl Task for MemoryTask {
///     const TYPE: &'static str = "memory";
///     const REQUIRED: &'static [&'static str] = &["text"];
/// }
/// ```
///
/// # Trait Bounds
/// - `DeserializeOwned`: envelope の payload から復元するため
/// - `Send + Sync + 'static`: Arc に格納して複数タスクから使うため
pub trait Task: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Value of the envelope's `type` field.
    const TYPE: &'static str;

    /// Payload fields that must be present (non-null, non-blank) before the
    /// handler runs. Checked by the envelope validator, not by serde.
    const REQUIRED: &'static [&'static str];
}

/// A document to chunk and index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentTask {
    pub name: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl Task for DocumentTask {
    const TYPE: &'static str = TaskType::DOCUMENT;
    const REQUIRED: &'static [&'static str] = &["name", "content"];
}

/// A source file to parse and index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeFileTask {
    pub name: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

impl Task for CodeFileTask {
    const TYPE: &'static str = TaskType::CODE_FILE;
    const REQUIRED: &'static [&'static str] = &["name", "content"];
}
