//! URLs and relative paths of collection artifacts.
//!
//! A collection lives under a *container* URL, a URL whose path ends with `/`
//! (e.g. `https://huggingface.co/datasets/org/wiki/resolve/main/`). Artifacts
//! are addressed by a [`RelativePath`] below that container and may never
//! escape it.
//!
//! Accepted URLs carry no credentials, query or fragment, and must already be in
//! canonical form.

use diskcorpus_common::{
    Result,
    error::{Error, ErrorKind},
};
use url::Url;

/// A verified URL of a collection container or artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectUrl(Url);

impl ObjectUrl {
    /// Parses and verifies a URL string.
    ///
    /// The string must round-trip through the URL parser unchanged, which rules
    /// out non-canonical spellings and dot segments.
    pub fn parse(url_str: &str) -> Result<ObjectUrl> {
        let url = Url::parse(url_str)
            .map_err(|e| url_error(url_str, None, &format!("failed to parse url: {e}")))?;
        let checks = [
            (url.username().is_empty() && url.password().is_none(), "credentials"),
            (url.query().is_none(), "query"),
            (url.fragment().is_none(), "fragment"),
            (!url.cannot_be_a_base() && url.path().starts_with('/'), "non-hierarchical url"),
            (url.as_str() == url_str, "non-canonical url"),
        ];
        if let Some((_, reason)) = checks.iter().find(|(ok, _)| !ok) {
            return Err(url_error(url_str, None, reason));
        }
        Ok(ObjectUrl(url))
    }

    /// Container of a named collection, following the
    /// `{base}{collection}/resolve/{revision}/` layout of dataset hubs.
    ///
    /// `collection` is usually `org/name`.
    pub fn collection_container(
        base: &ObjectUrl,
        collection: &str,
        revision: &str,
    ) -> Result<ObjectUrl> {
        if revision.is_empty() || revision.contains('/') {
            return Err(url_error(base.as_str(), Some(revision), "invalid revision"));
        }
        let relative = format!("{collection}/resolve/{revision}/");
        let relative = RelativePath::new(&relative)
            .map_err(|_| url_error(base.as_str(), Some(collection), "invalid collection id"))?;
        base.join(relative)
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Returns `true` if the URL path ends with `/`.
    pub fn is_container(&self) -> bool {
        self.0.path().ends_with('/')
    }

    /// URL of `path` within this container.
    pub fn join(&self, path: RelativePath) -> Result<ObjectUrl> {
        if !self.is_container() {
            return Err(url_error(self.as_str(), Some(path.as_str()), "not a container"));
        }
        let joined = self
            .0
            .join(path.as_str())
            .map_err(|e| url_error(self.as_str(), Some(path.as_str()), &e.to_string()))?;
        if !joined.as_str().starts_with(self.as_str()) {
            return Err(url_error(
                self.as_str(),
                Some(path.as_str()),
                "path escapes the container",
            ));
        }
        Ok(ObjectUrl(joined))
    }
}

/// Path of an artifact relative to its collection, using `/` separators.
///
/// Verified on construction: no leading `/`, no empty segments except a
/// trailing `/`, no `.`/`..` segments (also percent-encoded), no backslashes,
/// and no URL scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelativePath<'a>(&'a str);

impl<'a> RelativePath<'a> {
    pub fn new(path: &'a str) -> Result<RelativePath<'a>> {
        let body = path.strip_suffix('/').unwrap_or(path);
        let valid = !path.contains('\\') && body.split('/').all(is_plain_segment);
        if !valid {
            return Err(url_error("", Some(path), "invalid relative path"));
        }
        Ok(RelativePath(path))
    }

    pub fn as_str(&self) -> &'a str {
        self.0
    }

    /// The `/`-separated segments of the path.
    pub fn segments(&self) -> impl Iterator<Item = &'a str> {
        self.0.split('/').filter(|segment| !segment.is_empty())
    }
}

impl std::fmt::Display for RelativePath<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.0)
    }
}

/// A non-empty segment that is neither a dot segment nor a scheme prefix.
fn is_plain_segment(segment: &str) -> bool {
    let decoded = segment.to_ascii_lowercase().replace("%2e", ".");
    !segment.is_empty() && decoded != "." && decoded != ".." && !segment.contains(':')
}

fn url_error(url: &str, relative: Option<&str>, reason: &str) -> Error {
    ErrorKind::ResolveUrl {
        url: url.to_string(),
        relative: relative.map(String::from),
        reason: reason.to_string(),
    }
    .into()
}
