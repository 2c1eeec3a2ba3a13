use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use archiver_core::{Article, ArticleId, Category, FilesystemScan, ScannedFile};
use archiver_logging::{archiver_debug, archiver_warn};
use serde::{Deserialize, Serialize};

use crate::{article_filename, parse_identifier, render_document, AtomicFileWriter, CategoryRules, PersistError};

/// Where category directories and the ledger live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveLayout {
    pub root: PathBuf,
    pub all_dir: String,
    pub macro_dir: String,
    pub industry_dir: String,
    pub ledger_file: String,
    pub stats_file: String,
}

impl Default for ArchiveLayout {
    fn default() -> Self {
        Self {
            root: PathBuf::from("docs"),
            all_dir: "全部研报".to_string(),
            macro_dir: "宏观分析".to_string(),
            industry_dir: "行业分析".to_string(),
            ledger_file: "index.json".to_string(),
            stats_file: "stats.json".to_string(),
        }
    }
}

impl ArchiveLayout {
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    pub fn category_dir(&self, category: Category) -> PathBuf {
        let name = match category {
            Category::All => &self.all_dir,
            Category::Macro => &self.macro_dir,
            Category::Industry => &self.industry_dir,
        };
        self.root.join(name)
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.root.join(&self.ledger_file)
    }

    pub fn stats_path(&self) -> PathBuf {
        self.root.join(&self.stats_file)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SaveError {
    #[error("could not archive article: {0}")]
    Write(#[source] PersistError),
    /// The catch-all copy was written but the category copy was not.
    #[error("article written to {written:?} only: {source}")]
    Partial {
        written: PathBuf,
        #[source]
        source: PersistError,
    },
}

/// Files produced for one article.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedArticle {
    pub id: ArticleId,
    pub paths: Vec<PathBuf>,
}

/// Writes article documents into the category directories and scans them back.
#[derive(Debug, Clone)]
pub struct ArchiveWriter {
    layout: ArchiveLayout,
    categories: CategoryRules,
}

impl ArchiveWriter {
    pub fn new(layout: ArchiveLayout, categories: CategoryRules) -> Self {
        Self { layout, categories }
    }

    pub fn layout(&self) -> &ArchiveLayout {
        &self.layout
    }

    /// Write `article` to the catch-all directory and, for a topical category, to that
    /// directory as well. Each file is atomic; the pair is not.
    pub fn save(&self, article: &Article) -> Result<SavedArticle, SaveError> {
        let filename = self.claim_filename(article);
        let content = render_document(article, self.categories.label(article.category));

        let written = AtomicFileWriter::new(self.layout.category_dir(Category::All))
            .write(&filename, &content)
            .map_err(SaveError::Write)?;
        let mut paths = vec![written];

        if article.category != Category::All {
            match AtomicFileWriter::new(self.layout.category_dir(article.category))
                .write(&filename, &content)
            {
                Ok(path) => paths.push(path),
                Err(source) => {
                    return Err(SaveError::Partial {
                        written: paths.remove(0),
                        source,
                    })
                }
            }
        }

        archiver_debug!("article {} archived as {:?}", article.id, paths);
        Ok(SavedArticle {
            id: article.id,
            paths,
        })
    }

    /// `{date}-{title}.md`, or with `-{id}` appended when a different article already holds
    /// that name in one of the directories this one goes to.
    fn claim_filename(&self, article: &Article) -> String {
        let preferred = article_filename(article);
        let mut dirs = vec![self.layout.category_dir(Category::All)];
        if article.category != Category::All {
            dirs.push(self.layout.category_dir(article.category));
        }
        if !dirs
            .iter()
            .any(|dir| held_by_other(&dir.join(&preferred), article.id))
        {
            return preferred;
        }
        let stem = preferred.strip_suffix(".md").unwrap_or(&preferred);
        let filename = format!("{stem}-{}.md", article.id);
        archiver_warn!(
            "{:?} belongs to another article; archiving {} as {:?}",
            preferred,
            article.id,
            filename
        );
        filename
    }

    /// Every Markdown document in the category directories with the identifier from its header.
    ///
    /// Directories that do not exist yet contribute nothing; `README.md` files are skipped.
    pub fn scan(&self) -> Result<FilesystemScan, PersistError> {
        let mut files = Vec::new();
        for category in Category::EVERY {
            let dir = self.layout.category_dir(category);
            scan_dir(&dir, category, &mut files)?;
        }
        files.sort_by(|a, b| (a.category, &a.file_name).cmp(&(b.category, &b.file_name)));
        Ok(FilesystemScan::new(files))
    }
}

fn scan_dir(dir: &Path, category: Category, files: &mut Vec<ScannedFile>) -> Result<(), PersistError> {
    if dir.exists() && !dir.is_dir() {
        archiver_warn!("{:?} is not a directory, nothing scanned for {}", dir, category);
        return Ok(());
    }
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(source) => {
            return Err(PersistError::Io {
                path: dir.to_path_buf(),
                source,
            })
        }
    };

    for entry in entries {
        let path = entry
            .map_err(|source| PersistError::Io {
                path: dir.to_path_buf(),
                source,
            })?
            .path();
        if !is_article_file(&path) {
            continue;
        }
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let id = match fs::read_to_string(&path) {
            Ok(content) => parse_identifier(&content),
            Err(err) => {
                archiver_warn!("skipping unreadable archive file {:?}: {}", path, err);
                None
            }
        };
        files.push(ScannedFile {
            category,
            file_name,
            id,
        });
    }
    Ok(())
}

/// Whether `path` is an existing document for anything but `id`. Unreadable files count as taken.
fn held_by_other(path: &Path, id: ArticleId) -> bool {
    if !path.is_file() {
        return false;
    }
    match fs::read_to_string(path) {
        Ok(content) => parse_identifier(&content) != Some(id),
        Err(_) => true,
    }
}

fn is_article_file(path: &Path) -> bool {
    let is_markdown = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("md"));
    let is_readme = path
        .file_stem()
        .is_some_and(|stem| stem.eq_ignore_ascii_case("readme"));
    path.is_file() && is_markdown && !is_readme
}
