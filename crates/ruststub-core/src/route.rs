//! Route patterns and per-route handler chains.

use std::collections::HashMap;
use std::fmt;

use http::Method;
use parking_lot::RwLock;
use regex::{Regex, RegexBuilder};

use crate::auth::AuthScheme;
use crate::error::{StubError, StubResult};
use crate::pipeline::{HandlerChain, Pipeline};

/// Result of matching a request path against a route pattern.
///
/// Group 0 is the whole path. Groups that did not participate in the match
/// are `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteMatch {
    success: bool,
    groups: Vec<Option<String>>,
    named: HashMap<String, String>,
}

impl RouteMatch {
    /// The empty, unsuccessful match seen by global handlers.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    fn from_captures(regex: &Regex, captures: &regex::Captures<'_>) -> Self {
        let groups = captures
            .iter()
            .map(|group| group.map(|m| m.as_str().to_owned()))
            .collect();
        let named = regex
            .capture_names()
            .flatten()
            .filter_map(|name| {
                captures
                    .name(name)
                    .map(|m| (name.to_owned(), m.as_str().to_owned()))
            })
            .collect();
        Self {
            success: true,
            groups,
            named,
        }
    }

    /// Whether the route matched.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.success
    }

    /// Positional group `index`; 0 is the whole path.
    #[must_use]
    pub fn group(&self, index: usize) -> Option<&str> {
        self.groups.get(index).and_then(Option::as_deref)
    }

    /// Named group `name`.
    #[must_use]
    pub fn name(&self, name: &str) -> Option<&str> {
        self.named.get(name).map(String::as_str)
    }

    /// Number of positional groups including group 0.
    #[must_use]
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// Whether there are no groups (always true for an unsuccessful match).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

/// How a route's path is given at registration.
///
/// Plain strings are literal paths and match exactly. Patterns are regular
/// expressions; both forms are anchored to the whole path. A prebuilt
/// [`Regex`] keeps the flags it was built with and must match the whole path.
///
/// ```
/// use ruststub_core::RoutePath;
///
/// let literal = RoutePath::from("/items/1.json");
/// let pattern = RoutePath::pattern(r"/items/(?P<id>\d+)");
/// let insensitive = RoutePath::literal("/Hello").ignore_case();
/// # let _ = (literal, pattern, insensitive);
/// ```
#[derive(Debug, Clone)]
pub struct RoutePath {
    source: String,
    form: PathForm,
    ignore_case: bool,
}

#[derive(Debug, Clone)]
enum PathForm {
    /// Regex text, anchored when compiled.
    Text(String),
    /// Caller-built regex, used as given.
    Compiled(Regex),
}

impl RoutePath {
    /// A literal path; regex metacharacters are escaped.
    pub fn literal(path: impl Into<String>) -> Self {
        let source = path.into();
        let regex = regex::escape(&source);
        Self {
            source,
            form: PathForm::Text(regex),
            ignore_case: false,
        }
    }

    /// A regular expression matched against the whole path.
    pub fn pattern(pattern: impl Into<String>) -> Self {
        let source = pattern.into();
        Self {
            form: PathForm::Text(source.clone()),
            source,
            ignore_case: false,
        }
    }

    /// Match case-insensitively.
    #[must_use]
    pub fn ignore_case(mut self) -> Self {
        self.ignore_case = true;
        self
    }

    /// The path or pattern as given by the caller.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    fn compile(&self, ignore_case: bool) -> StubResult<PathMatcher> {
        match &self.form {
            PathForm::Text(regex) => self
                .build(&format!("^(?:{regex})$"), ignore_case)
                .map(PathMatcher::Anchored),
            PathForm::Compiled(regex) => {
                // A compiled regex does not expose its builder flags, so case
                // folding is added as a second matcher next to the original.
                let folded = if ignore_case {
                    Some(self.build(regex.as_str(), true)?)
                } else {
                    None
                };
                Ok(PathMatcher::Whole {
                    regex: regex.clone(),
                    folded,
                })
            }
        }
    }

    fn build(&self, pattern: &str, ignore_case: bool) -> StubResult<Regex> {
        RegexBuilder::new(pattern)
            .case_insensitive(ignore_case)
            .build()
            .map_err(|source| StubError::InvalidRoutePattern {
                pattern: self.source.clone(),
                source,
            })
    }
}

impl From<&str> for RoutePath {
    fn from(path: &str) -> Self {
        Self::literal(path)
    }
}

impl From<String> for RoutePath {
    fn from(path: String) -> Self {
        Self::literal(path)
    }
}

impl From<&Regex> for RoutePath {
    fn from(regex: &Regex) -> Self {
        Self::from(regex.clone())
    }
}

impl From<Regex> for RoutePath {
    fn from(regex: Regex) -> Self {
        Self {
            source: regex.as_str().to_owned(),
            form: PathForm::Compiled(regex),
            ignore_case: false,
        }
    }
}

/// Compiled form of a [`RoutePath`].
#[derive(Debug, Clone)]
enum PathMatcher {
    /// `^(?:...)$` built from a literal or pattern.
    Anchored(Regex),
    /// A caller-built regex, optionally paired with a case-folded copy.
    Whole { regex: Regex, folded: Option<Regex> },
}

impl PathMatcher {
    fn matches(&self, path: &str) -> RouteMatch {
        let found = match self {
            Self::Anchored(regex) => whole_match(regex, path),
            Self::Whole { regex, folded } => whole_match(regex, path)
                .or_else(|| folded.as_ref().and_then(|folded| whole_match(folded, path))),
        };
        found.unwrap_or_else(RouteMatch::none)
    }

    fn as_str(&self) -> &str {
        match self {
            Self::Anchored(regex) | Self::Whole { regex, .. } => regex.as_str(),
        }
    }
}

/// Captures for `path` when the leftmost match spans all of it.
fn whole_match(regex: &Regex, path: &str) -> Option<RouteMatch> {
    let captures = regex.captures(path)?;
    let whole = captures.get(0)?;
    (whole.start() == 0 && whole.end() == path.len())
        .then(|| RouteMatch::from_captures(regex, &captures))
}

/// A registered route: method, anchored pattern, pipeline and auth scheme.
pub struct ResourceHandler {
    method: Method,
    path: RoutePath,
    matcher: RwLock<PathMatcher>,
    pipeline: Pipeline,
    auth_scheme: RwLock<Option<AuthScheme>>,
}

impl ResourceHandler {
    /// Compile `path` for `method`.
    pub fn new(method: Method, path: RoutePath) -> StubResult<Self> {
        let matcher = path.compile(path.ignore_case)?;
        Ok(Self {
            method,
            path,
            matcher: RwLock::new(matcher),
            pipeline: Pipeline::new(),
            auth_scheme: RwLock::new(None),
        })
    }

    /// The route's HTTP method.
    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The path or pattern as registered.
    #[must_use]
    pub fn path(&self) -> &str {
        self.path.source()
    }

    /// Match a request. A method mismatch never matches.
    #[must_use]
    pub fn matches(&self, method: &Method, path: &str) -> RouteMatch {
        if *method != self.method {
            return RouteMatch::none();
        }
        self.matcher.read().matches(path)
    }

    /// Also match the path case-insensitively. Later requests see the change.
    pub fn ignore_path_case(&self) -> StubResult<&Self> {
        let matcher = self.path.compile(true)?;
        *self.matcher.write() = matcher;
        Ok(self)
    }
}

impl HandlerChain for ResourceHandler {
    fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    fn auth_scheme(&self) -> Option<AuthScheme> {
        *self.auth_scheme.read()
    }

    fn set_auth_scheme(&self, scheme: AuthScheme) {
        *self.auth_scheme.write() = Some(scheme);
    }
}

impl fmt::Debug for ResourceHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceHandler")
            .field("method", &self.method)
            .field("path", &self.path.source())
            .field("pattern", &self.matcher.read().as_str())
            .field("pipeline", &self.pipeline)
            .field("auth_scheme", &self.auth_scheme())
            .finish()
    }
}
