//! Typed - 型付き Task API
//!
//! `type` 文字列の typo を型で排除し、Handler との対応付けを静的に保証します。
//!
//! # 二層構造
//! - **表層（Typed）**: `Task` trait, `Handler<T>` trait - 型安全
//! - **内部（Dyn）**: `DynHandler` trait - object-safe, type erasure
//!
//! `ProcessorRegistry` is the `TaskProcessor` the consumer calls: it picks the
//! handler by the envelope's `type` and decodes the payload into `T`.

pub mod handler;
pub mod registry;
pub mod task;

pub use self::handler::{DynHandler, Handler, TypedHandler};
pub use self::registry::{ProcessorRegistry, RegistryError};
pub use self::task::{CodeFileTask, DocumentTask, Task};
