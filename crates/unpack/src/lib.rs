//! # Unpack
//!
//! Batch archive decompression pipeline: classifies archive files (including
//! self-extracting executables), resolves multi-volume sets and passwords,
//! extracts via an external engine and places the content into a destination
//! tree according to a configurable layout policy.
//!
//! The actual decompression is delegated to the [`engine::Engine`]
//! collaborator (7-Zip in production); this crate owns everything around it:
//!
//! - [`sfx`] — PE header walk and container-signature sniffing for SFX files
//! - [`volume`] — main/secondary volume classification and set enumeration
//! - [`password`] — ordered candidate selection against encrypted archives
//! - [`shape`] — locating the payload level beneath wrapper directories
//! - [`placement`] — layout policies for the extracted content
//! - [`orchestrator`] — the per-archive state machine and worker pool
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use unpack::{CancelToken, Config, Orchestrator, SevenZip};
//!
//! # async fn run() -> Result<(), unpack::UnpackError> {
//! let config = Config::new("/data/downloads");
//! let engine = Arc::new(SevenZip::default());
//! let orchestrator = Arc::new(Orchestrator::new(config, engine, CancelToken::new()));
//!
//! let summary = orchestrator.run().await?;
//! println!("{} archives succeeded", summary.succeeded().count());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod format;
pub mod orchestrator;
pub mod password;
pub mod placement;
pub mod scratch;
pub mod sfx;
pub mod shape;
pub mod volume;

// Re-export main types
pub use config::{Config, FailPolicy, SuccessPolicy};
pub use engine::{CancelToken, EncryptionProbe, Engine, SevenZip};
pub use error::UnpackError;
pub use format::ArchiveFormat;
pub use orchestrator::{ArchiveCandidate, Disposition, Orchestrator, Outcome, Summary};
pub use placement::DecompressPolicy;
