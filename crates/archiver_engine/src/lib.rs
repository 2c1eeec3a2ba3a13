//! Archiver engine: page loading, extraction, Markdown conversion and the on-disk archive.
mod archive;
mod decode;
mod document;
mod existence;
mod extract;
mod fetch;
mod filename;
mod markdown;
mod normalize;
mod persist;
mod pipeline;
mod render;
mod settings;
mod site;
mod stats;
mod store;
mod table;
mod types;

pub use archive::{ArchiveLayout, ArchiveWriter, SaveError, SavedArticle};
pub use decode::{decode_html, DecodeError, DecodedHtml};
pub use document::{parse_identifier, render_document};
pub use existence::{ExistencePolicy, PageProbe};
pub use extract::{find_date, ArticleExtractor, CategoryRules, ExtractError, ExtractSettings};
pub use fetch::{FetchSettings, Fetcher, ReqwestFetcher};
pub use filename::{article_filename, sanitize_title};
pub use markdown::{Converter, StructuralConverter};
pub use normalize::absolutize_fragment;
pub use persist::{ensure_output_dir, move_aside, AtomicFileWriter, PersistError};
pub use pipeline::{diagnose_archive, Archive, Pipeline, PipelineError, RunReport, StartupReport};
pub use render::{visible_text, HttpRenderer, Renderer};
pub use settings::{ArchiverSettings, RunSettings};
pub use site::Site;
pub use stats::{ArchiveStats, IndexTotals};
pub use store::{LedgerStore, LoadOrigin, LoadedLedger, StoreError};
pub use table::TableModel;
pub use types::{FailureKind, FetchError, FetchMetadata, FetchOutcome, FetchOutput, RenderedPage};
