use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::url_utils::NormalizedUrl;

/// Mirrors accepted pages to disk as `<root>/<host>/<path>`, one HTML file per URL.
#[derive(Debug, Clone)]
pub struct PageWriter {
    root: PathBuf,
}

impl PageWriter {
    pub const DIR_NAME: &'static str = "pages";

    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where `url` lands, relative to [`root`](Self::root), as a `/`-joined
    /// path. Directory-style paths get an `index.html` and a query string is
    /// folded into the file name. `attempt` > 0 picks an alternative name
    /// (`index~2.html`, `index~3.html`, ...) for when the first choice
    /// already belongs to another URL.
    pub fn relative_path(&self, url: &NormalizedUrl, attempt: u32) -> String {
        let mut parts = vec![sanitize_segment(&url.authority().replace(':', "_"))];

        let raw_path = url.path();
        let segments: Vec<&str> = raw_path.split('/').filter(|s| !s.is_empty()).collect();
        let directory_style = raw_path.ends_with('/') || segments.is_empty();

        let (dirs, file) = match segments.split_last() {
            Some((last, dirs)) if !directory_style => (dirs, Some(*last)),
            _ => (segments.as_slice(), None),
        };
        parts.extend(dirs.iter().map(|dir| sanitize_segment(dir)));

        let mut file_name = match file {
            Some(last) if last.contains('.') => sanitize_segment(last),
            Some(last) => {
                parts.push(sanitize_segment(last));
                "index.html".to_string()
            }
            None => "index.html".to_string(),
        };

        let mut suffix = String::new();
        if let Some(query) = url.as_url().query() {
            suffix.push_str("__");
            suffix.push_str(&sanitize_segment(query));
        }
        if attempt > 0 {
            suffix.push_str(&format!("~{}", attempt + 1));
        }
        if !suffix.is_empty() {
            file_name = match file_name.rsplit_once('.') {
                Some((stem, ext)) => format!("{}{}.{}", stem, suffix, ext),
                None => format!("{}{}", file_name, suffix),
            };
        }

        parts.push(file_name);
        parts.join("/")
    }

    /// Absolute location of a path produced by [`relative_path`](Self::relative_path).
    pub fn path_of(&self, relative: &str) -> PathBuf {
        let mut path = self.root.clone();
        path.extend(relative.split('/'));
        path
    }

    pub fn write(&self, relative: &str, html: &str) -> std::io::Result<PathBuf> {
        let path = self.path_of(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut writer = BufWriter::new(File::create(&path)?);
        writer.write_all(html.as_bytes())?;
        writer.flush()?;
        Ok(path)
    }

    /// Remove a page written for a URL that ended up not being kept.
    pub fn remove(&self, relative: &str) -> std::io::Result<()> {
        match fs::remove_file(self.path_of(relative)) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

/// Keep a path segment filesystem-safe: no separators, no `..`, no control characters.
fn sanitize_segment(segment: &str) -> String {
    let cleaned: String = segment
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '.' | '-' | '_' | '%' | '~' | '+' | '=' | ',' => c,
            _ => '_',
        })
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => "_".to_string(),
        _ => cleaned,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn url(raw: &str) -> NormalizedUrl {
        NormalizedUrl::from_stored(raw).unwrap()
    }

    #[test]
    fn test_path_mapping() {
        let writer = PageWriter::new("/out/pages");
        let rel = |u: &str| writer.relative_path(&url(u), 0);

        assert_eq!(rel("https://ex.com/"), "ex.com/index.html");
        assert_eq!(rel("https://ex.com/docs/"), "ex.com/docs/index.html");
        assert_eq!(rel("https://ex.com/docs/a"), "ex.com/docs/a/index.html");
        assert_eq!(rel("https://ex.com/docs/a.html"), "ex.com/docs/a.html");
        assert_eq!(rel("https://ex.com:8080/x.html"), "ex.com_8080/x.html");
        assert_eq!(rel("https://ex.com/p.html?v=2&x=y"), "ex.com/p__v=2_x=y.html");
        assert_eq!(rel("https://ex.com/search?q=a"), "ex.com/search/index__q=a.html");
    }

    #[test]
    fn test_alternative_names() {
        let writer = PageWriter::new("/out/pages");
        assert_eq!(
            writer.relative_path(&url("https://ex.com/docs/a/"), 1),
            "ex.com/docs/a/index~2.html"
        );
        assert_eq!(
            writer.relative_path(&url("https://ex.com/p.html?v=2"), 2),
            "ex.com/p__v=2~3.html"
        );
        assert_ne!(
            writer.relative_path(&url("https://ex.com/docs/a"), 0),
            writer.relative_path(&url("https://ex.com/docs/a/"), 1)
        );
    }

    #[test]
    fn test_never_escapes_root() {
        let writer = PageWriter::new("/out/pages");
        let relative = writer.relative_path(&url("https://ex.com/a/%2E%2E/%2E%2E/etc"), 0);
        let path = writer.path_of(&relative);
        assert!(path.starts_with("/out/pages/ex.com"));
        assert!(!relative.split('/').any(|part| part == ".."));
    }

    #[test]
    fn test_write_and_remove() {
        let dir = TempDir::new().unwrap();
        let writer = PageWriter::new(dir.path().join(PageWriter::DIR_NAME));
        let relative = writer.relative_path(&url("https://ex.com/docs/intro"), 0);

        let path = writer.write(&relative, "<html>hi</html>").unwrap();
        assert_eq!(path, writer.path_of(&relative));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "<html>hi</html>");

        writer.remove(&relative).unwrap();
        assert!(!path.exists());
        writer.remove(&relative).unwrap();
    }
}
