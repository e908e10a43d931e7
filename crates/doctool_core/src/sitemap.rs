use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use thiserror::Error;
use tracing::{debug, warn};
use walkdir::WalkDir;

pub const SITEMAP_EXTENSION: &str = ".html";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SitemapError {
    #[error("unknown format '{format}'. Currently supported formats={{.txt}}")]
    UnsupportedFormat { format: String },
}

/// Output representation of a sitemap. New formats implement this trait.
pub trait SitemapFormat {
    fn add_location(&mut self, url: String);
    fn write(&self, writer: &mut dyn Write) -> Result<()>;
}

/// One absolute URL per line, no header.
#[derive(Debug, Clone, Default)]
pub struct TextSitemap {
    locations: Vec<String>,
}

impl TextSitemap {
    pub fn locations(&self) -> &[String] {
        &self.locations
    }
}

impl SitemapFormat for TextSitemap {
    fn add_location(&mut self, url: String) {
        self.locations.push(url);
    }

    fn write(&self, writer: &mut dyn Write) -> Result<()> {
        for location in &self.locations {
            writeln!(writer, "{location}").context("failed to write sitemap entry")?;
        }
        writer.flush().context("failed to flush sitemap")?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SitemapFormatKind {
    Text,
}

impl SitemapFormatKind {
    pub fn parse(value: &str) -> Result<Self, SitemapError> {
        if value == "txt" {
            return Ok(Self::Text);
        }
        Err(SitemapError::UnsupportedFormat {
            format: value.to_string(),
        })
    }

    /// Derive the format from an output file name; no output file means text.
    pub fn from_output_path(path: Option<&Path>) -> Result<Self, SitemapError> {
        match path {
            None => Ok(Self::Text),
            Some(path) => Self::parse(
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .unwrap_or_default(),
            ),
        }
    }

    pub fn create(self) -> Box<dyn SitemapFormat> {
        match self {
            Self::Text => Box::new(TextSitemap::default()),
        }
    }
}

/// Collects `.html` files under `start_dir` as URLs under `url_prefix`.
pub struct SitemapBuilder {
    start_dir: PathBuf,
    url_prefix: String,
    format: Box<dyn SitemapFormat>,
}

impl SitemapBuilder {
    pub fn new(start_dir: &Path, url_prefix: &str, format: Box<dyn SitemapFormat>) -> Self {
        Self {
            start_dir: start_dir.to_path_buf(),
            url_prefix: normalize_prefix(url_prefix),
            format,
        }
    }

    pub fn url_prefix(&self) -> &str {
        &self.url_prefix
    }

    /// Walk the tree and freeze the collected entries. Only a failure at the
    /// start directory itself aborts; unreadable entries below it are skipped.
    pub fn build(mut self) -> Result<BuiltSitemap> {
        let mut entries = 0usize;
        for entry in WalkDir::new(&self.start_dir).follow_links(false) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(error) if error.depth() == 0 => {
                    return Err(error)
                        .with_context(|| format!("failed to walk {}", self.start_dir.display()));
                }
                Err(error) => {
                    warn!(path = ?error.path(), error = %error, "skipping unreadable entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str() else {
                warn!(path = ?entry.path(), "skipping non UTF-8 file name");
                continue;
            };
            if !name.ends_with(SITEMAP_EXTENSION) {
                continue;
            }
            if self.add_path(entry.path())? {
                entries += 1;
            }
        }
        debug!(
            start_dir = %self.start_dir.display(),
            entries,
            "sitemap walk finished"
        );
        Ok(BuiltSitemap {
            format: self.format,
            entries,
        })
    }

    /// Add `path` as a location. Returns `false` when the path relative to the
    /// start directory is not valid UTF-8 and was skipped.
    pub fn add_path(&mut self, path: &Path) -> Result<bool> {
        let relative = path.strip_prefix(&self.start_dir).with_context(|| {
            format!(
                "{} is not under {}",
                path.display(),
                self.start_dir.display()
            )
        })?;
        let Some(relative) = relative.to_str() else {
            warn!(path = ?path, "skipping non UTF-8 path");
            return Ok(false);
        };
        let location = location_for(&self.url_prefix, relative);
        self.format.add_location(location);
        Ok(true)
    }
}

pub struct BuiltSitemap {
    format: Box<dyn SitemapFormat>,
    entries: usize,
}

impl BuiltSitemap {
    pub fn len(&self) -> usize {
        self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }

    pub fn write(self, writer: &mut dyn Write) -> Result<()> {
        self.format.write(writer)
    }
}

/// Ensure the prefix ends with exactly one `/`.
pub fn normalize_prefix(prefix: &str) -> String {
    format!("{}/", prefix.trim_end_matches('/'))
}

/// Join a normalized prefix with a relative path, using URL separators.
pub fn location_for(prefix: &str, relative: &str) -> String {
    format!("{prefix}{}", relative.replace('\\', "/"))
}

/// Build the sitemap for `start_dir` in `format` and write it to `writer`.
pub fn build_sitemap(
    start_dir: &Path,
    url_prefix: &str,
    format: SitemapFormatKind,
    writer: &mut dyn Write,
) -> Result<usize> {
    let built = SitemapBuilder::new(start_dir, url_prefix, format.create()).build()?;
    let entries = built.len();
    built.write(writer)?;
    Ok(entries)
}

/// Resolve the format from `output`, walk `start_dir`, then write to `output`
/// or stdout. An unsupported format fails before the walk and before any file
/// is created.
pub fn write_sitemap(start_dir: &Path, url_prefix: &str, output: Option<&Path>) -> Result<usize> {
    let format = SitemapFormatKind::from_output_path(output)?;
    let built = SitemapBuilder::new(start_dir, url_prefix, format.create()).build()?;
    let entries = built.len();
    match output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("failed to create {}", path.display()))?;
            built.write(&mut BufWriter::new(file))?;
        }
        None => built.write(&mut io::stdout().lock())?,
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use tempfile::tempdir;

    use super::{
        SitemapBuilder, SitemapError, SitemapFormatKind, TextSitemap, build_sitemap, location_for,
        normalize_prefix, write_sitemap,
    };

    fn write_site(root: &Path) {
        fs::create_dir_all(root.join("a")).expect("mkdir a");
        fs::create_dir_all(root.join("b/c")).expect("mkdir b/c");
        fs::write(root.join("a/index.html"), "<html></html>").expect("write");
        fs::write(root.join("b/c/page.html"), "<html></html>").expect("write");
        fs::write(root.join("b/notes.txt"), "skip").expect("write");
        fs::write(root.join("b/c/page.html.bak"), "skip").expect("write");
    }

    fn sorted_lines(output: Vec<u8>) -> Vec<String> {
        let mut lines = String::from_utf8(output)
            .expect("utf8")
            .lines()
            .map(ToString::to_string)
            .collect::<Vec<_>>();
        lines.sort();
        lines
    }

    #[test]
    fn prefix_gets_exactly_one_trailing_slash() {
        assert_eq!(normalize_prefix("http://docs.example.org"), "http://docs.example.org/");
        assert_eq!(normalize_prefix("http://docs.example.org/"), "http://docs.example.org/");
        assert_eq!(normalize_prefix("http://docs.example.org//"), "http://docs.example.org/");
    }

    #[test]
    fn backslashes_become_forward_slashes() {
        let location = location_for("http://docs.example.org/", "b\\c\\page.html");
        assert_eq!(location, "http://docs.example.org/b/c/page.html");
        assert!(!location.contains('\\'));
    }

    #[test]
    fn html_files_are_listed_under_prefix() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("site");
        write_site(&root);

        let mut output = Vec::new();
        let entries = build_sitemap(
            &root,
            "http://docs.example.org",
            SitemapFormatKind::Text,
            &mut output,
        )
        .expect("build");

        assert_eq!(entries, 2);
        assert_eq!(
            sorted_lines(output),
            vec![
                "http://docs.example.org/a/index.html".to_string(),
                "http://docs.example.org/b/c/page.html".to_string(),
            ]
        );
    }

    #[test]
    fn rebuilding_yields_the_same_entries() {
        let temp = tempdir().expect("tempdir");
        write_site(temp.path());

        let mut first = Vec::new();
        build_sitemap(temp.path(), "/docs", SitemapFormatKind::Text, &mut first).expect("first");
        let mut second = Vec::new();
        build_sitemap(temp.path(), "/docs", SitemapFormatKind::Text, &mut second).expect("second");
        assert_eq!(sorted_lines(first), sorted_lines(second));
    }

    #[test]
    fn empty_tree_writes_nothing() {
        let temp = tempdir().expect("tempdir");
        let built = SitemapBuilder::new(temp.path(), "/", Box::new(TextSitemap::default()))
            .build()
            .expect("build");
        assert!(built.is_empty());
        let mut output = Vec::new();
        built.write(&mut output).expect("write");
        assert!(output.is_empty());
    }

    #[test]
    fn missing_start_dir_is_an_error() {
        let temp = tempdir().expect("tempdir");
        let mut output = Vec::new();
        let error = build_sitemap(
            &temp.path().join("missing"),
            "/",
            SitemapFormatKind::Text,
            &mut output,
        )
        .expect_err("must fail");
        assert!(error.to_string().contains("failed to walk"));
        assert!(output.is_empty());
    }

    #[test]
    fn format_follows_output_extension() {
        assert_eq!(
            SitemapFormatKind::from_output_path(None),
            Ok(SitemapFormatKind::Text)
        );
        assert_eq!(
            SitemapFormatKind::from_output_path(Some(Path::new("out/sitemap.txt"))),
            Ok(SitemapFormatKind::Text)
        );
        assert_eq!(
            SitemapFormatKind::from_output_path(Some(Path::new("sitemap.xml"))),
            Err(SitemapError::UnsupportedFormat {
                format: "xml".to_string()
            })
        );
        assert!(SitemapFormatKind::from_output_path(Some(Path::new("sitemap"))).is_err());
    }

    #[test]
    fn format_extension_is_case_sensitive() {
        assert_eq!(
            SitemapFormatKind::from_output_path(Some(Path::new("sitemap.TXT"))),
            Err(SitemapError::UnsupportedFormat {
                format: "TXT".to_string()
            })
        );
        assert!(SitemapFormatKind::parse("Txt").is_err());
    }

    #[test]
    fn unsupported_format_message_lists_supported_formats() {
        let error = SitemapFormatKind::parse("xml").expect_err("must fail");
        assert_eq!(
            error.to_string(),
            "unknown format 'xml'. Currently supported formats={.txt}"
        );
    }

    #[test]
    fn add_path_rejects_paths_outside_start_dir() {
        let mut builder = SitemapBuilder::new(
            Path::new("/srv/site"),
            "http://docs.example.org",
            Box::new(TextSitemap::default()),
        );
        assert_eq!(builder.url_prefix(), "http://docs.example.org/");
        assert!(
            builder
                .add_path(Path::new("/srv/site/a/index.html"))
                .expect("inside")
        );
        assert!(builder.add_path(Path::new("/srv/other/x.html")).is_err());
    }

    #[test]
    fn unsupported_output_fails_before_walking() {
        let temp = tempdir().expect("tempdir");
        let output = temp.path().join("sitemap.xml");
        let error = write_sitemap(
            &temp.path().join("does-not-exist"),
            "http://docs.example.org",
            Some(&output),
        )
        .expect_err("must fail");
        assert!(error.downcast_ref::<SitemapError>().is_some());
        assert!(!output.exists());
    }

    #[test]
    fn text_output_file_receives_entries() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("site");
        write_site(&root);
        let output = temp.path().join("sitemap.txt");

        let entries =
            write_sitemap(&root, "http://docs.example.org/", Some(&output)).expect("write");
        assert_eq!(entries, 2);
        let written = fs::read(&output).expect("read output");
        assert_eq!(
            sorted_lines(written),
            vec![
                "http://docs.example.org/a/index.html".to_string(),
                "http://docs.example.org/b/c/page.html".to_string(),
            ]
        );
    }

    #[cfg(unix)]
    #[test]
    fn unreadable_subdirectory_is_skipped() {
        use std::os::unix::fs::PermissionsExt;

        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("site");
        write_site(&root);
        let locked = root.join("locked");
        fs::create_dir_all(&locked).expect("mkdir locked");
        fs::write(locked.join("hidden.html"), "<html></html>").expect("write");
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).expect("chmod");

        // Permission bits do not restrict root.
        let readable = fs::read_dir(&locked).is_ok();
        let mut output = Vec::new();
        let result = build_sitemap(
            &root,
            "http://docs.example.org",
            SitemapFormatKind::Text,
            &mut output,
        );
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).expect("restore");
        if readable {
            return;
        }

        assert_eq!(result.expect("build"), 2);
        assert_eq!(
            sorted_lines(output),
            vec![
                "http://docs.example.org/a/index.html".to_string(),
                "http://docs.example.org/b/c/page.html".to_string(),
            ]
        );
    }

    #[cfg(unix)]
    #[test]
    fn non_utf8_file_names_are_skipped() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("site");
        write_site(&root);
        let bad = root.join(OsStr::from_bytes(b"bad\xff.html"));
        if fs::write(&bad, "<html></html>").is_err() {
            // Some filesystems refuse non UTF-8 names outright.
            return;
        }

        let mut output = Vec::new();
        let entries = build_sitemap(
            &root,
            "http://docs.example.org",
            SitemapFormatKind::Text,
            &mut output,
        )
        .expect("build");
        assert_eq!(entries, 2);
        assert_eq!(
            sorted_lines(output),
            vec![
                "http://docs.example.org/a/index.html".to_string(),
                "http://docs.example.org/b/c/page.html".to_string(),
            ]
        );
    }

    #[cfg(unix)]
    #[test]
    fn add_path_skips_non_utf8_relative_paths() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let mut builder = SitemapBuilder::new(
            Path::new("/srv/site"),
            "http://docs.example.org",
            Box::new(TextSitemap::default()),
        );
        let path = Path::new("/srv/site").join(OsStr::from_bytes(b"dir\xfe/page.html"));
        assert!(!builder.add_path(&path).expect("inside start dir"));
    }
}
