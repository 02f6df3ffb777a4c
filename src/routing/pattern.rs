//! Route template parsing

use std::fmt;

use crate::error::Error;

const PARAM_MARKER: char = ':';
const INDEX_SEGMENT: &str = "index";

/// File extensions the scanner strips when deriving a template.
const SOURCE_EXTENSIONS: [&str; 6] = ["js", "mjs", "cjs", "ts", "jsx", "tsx"];

/// One segment of a compiled route template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Segment {
    /// Must match the request segment byte-wise.
    Literal(String),
    /// Binds the request segment to the named parameter.
    Param(String),
}

/// A compiled route template such as `/api/users/:id`.
#[derive(Debug, Clone)]
pub struct RoutePattern {
    template: String,
    segments: Vec<Segment>,
    param_names: Vec<String>,
    is_static: bool,
}

impl RoutePattern {
    /// Parses a path template with `:name` parameter segments.
    ///
    /// Duplicate parameter names within one template are rejected.
    ///
    /// # Example
    /// ```
    /// use sluice::routing::RoutePattern;
    ///
    /// let pattern = RoutePattern::parse("/api/users/:id").unwrap();
    ///
    /// assert!(!pattern.is_static());
    /// assert_eq!(pattern.param_names(), ["id"]);
    /// ```
    pub fn parse(template: &str) -> Result<Self, Error> {
        let mut segments = Vec::new();
        let mut param_names: Vec<String> = Vec::new();

        for raw in template.split('/').filter(|s| !s.is_empty()) {
            if let Some(name) = raw.strip_prefix(PARAM_MARKER) {
                if name.is_empty() {
                    return Err(Error::config(format!(
                        "route template `{template}` has an unnamed parameter segment"
                    )));
                }
                if param_names.iter().any(|existing| existing == name) {
                    return Err(Error::config(format!(
                        "route template `{template}` binds parameter `{name}` twice"
                    )));
                }
                param_names.push(name.to_owned());
                segments.push(Segment::Param(name.to_owned()));
            } else {
                segments.push(Segment::Literal(raw.to_owned()));
            }
        }

        let is_static = param_names.is_empty();
        let template = Self::render(&segments);
        Ok(Self { template, segments, param_names, is_static })
    }

    /// Derives a template from a scanned handler file path, then parses it.
    ///
    /// Recognized source extensions are stripped, a trailing `index`
    /// segment collapses to the directory path, and `[name]` segments
    /// become `:name` parameters.
    ///
    /// # Example
    /// ```
    /// use sluice::routing::RoutePattern;
    ///
    /// let pattern = RoutePattern::from_file_path("users/[id].ts").unwrap();
    ///
    /// assert_eq!(pattern.template(), "/users/:id");
    /// ```
    pub fn from_file_path(path: &str) -> Result<Self, Error> {
        let mut segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

        if let Some(last) = segments.pop() {
            let stem = match last.rsplit_once('.') {
                Some((stem, ext)) if SOURCE_EXTENSIONS.contains(&ext) => stem,
                _ => last,
            };
            if stem != INDEX_SEGMENT {
                segments.push(stem);
            }
        }

        let template: String = segments
            .iter()
            .map(|segment| {
                let converted = segment
                    .strip_prefix('[')
                    .and_then(|s| s.strip_suffix(']'))
                    .map(|name| format!(":{name}"))
                    .unwrap_or_else(|| (*segment).to_owned());
                format!("/{converted}")
            })
            .collect();

        if template.is_empty() {
            Self::parse("/")
        } else {
            Self::parse(&template)
        }
    }

    /// The normalized template string.
    #[inline]
    pub fn template(&self) -> &str {
        &self.template
    }

    /// `true` when the template has no parameter segments.
    #[inline]
    pub fn is_static(&self) -> bool {
        self.is_static
    }

    /// Parameter names in template order.
    #[inline]
    pub fn param_names(&self) -> &[String] {
        &self.param_names
    }

    /// Matches decoded request `segments` against this pattern, binding
    /// parameters on success.
    pub(crate) fn matches(&self, segments: &[&str]) -> Option<Vec<(String, String)>> {
        if segments.len() != self.segments.len() {
            return None;
        }
        let mut params = Vec::with_capacity(self.param_names.len());
        for (own, given) in self.segments.iter().zip(segments) {
            match own {
                Segment::Literal(literal) if literal == given => (),
                Segment::Literal(_) => return None,
                Segment::Param(name) => params.push((name.clone(), (*given).to_owned())),
            }
        }
        Some(params)
    }

    /// A name-erased key identifying this pattern's segment list; two
    /// patterns with the same key occupy the same table slot.
    pub(crate) fn shape(&self) -> String {
        let mut shape = String::new();
        for segment in &self.segments {
            shape.push('/');
            match segment {
                Segment::Literal(literal) => shape.push_str(literal),
                Segment::Param(_) => shape.push(PARAM_MARKER),
            }
        }
        if shape.is_empty() {
            shape.push('/');
        }
        shape
    }

    fn render(segments: &[Segment]) -> String {
        if segments.is_empty() {
            return "/".to_owned();
        }
        let mut template = String::new();
        for segment in segments {
            template.push('/');
            match segment {
                Segment::Literal(literal) => template.push_str(literal),
                Segment::Param(name) => {
                    template.push(PARAM_MARKER);
                    template.push_str(name);
                }
            }
        }
        template
    }
}

impl fmt::Display for RoutePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.template)
    }
}
