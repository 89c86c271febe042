use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};

use regex::Regex;
use serde_json::Value;
use thiserror::Error;
use tracing::error;
use urlencoding::{decode, encode};

/// Pathname parameters as captured from the URL, before adapter validation.
///
/// An absent optional parameter maps to [`None`].
pub type RawParams = BTreeMap<String, Option<String>>;

/// Validated parameters, as produced by a
/// [`ParamAdapter`](crate::route::ParamAdapter) (or the default conversion
/// when a route has none).
pub type Params = BTreeMap<String, Value>;

/// An error found while parsing a pathname template.
///
/// All variants carry the byte index of the offending character within the
/// template string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatternError {
    /// A `:` appeared after the start of a segment.
    #[error("parameter must take up a whole segment (at index {index})")]
    ParamMidSegment {
        /// Byte index of the offending character.
        index: usize,
    },
    /// A `:` was not followed by a parameter name.
    #[error("parameter name is empty (at index {index})")]
    EmptyParamName {
        /// Byte index of the offending character.
        index: usize,
    },
    /// A `*` appeared anywhere but directly after a parameter name.
    #[error("wildcard must directly follow a parameter (at index {index})")]
    MisplacedWildcard {
        /// Byte index of the offending character.
        index: usize,
    },
    /// A `?` appeared where no segment could be made optional.
    #[error("optional flag is not allowed here (at index {index})")]
    MisplacedOptional {
        /// Byte index of the offending character.
        index: usize,
    },
    /// A character that is not valid in the current position.
    #[error("unexpected character {found:?} (at index {index})")]
    UnexpectedChar {
        /// Byte index of the offending character.
        index: usize,
        /// The character itself.
        found: char,
    },
}

/// An error found while building a pathname from a template and parameters.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildPathnameError {
    /// A required parameter was absent (or `null`).
    #[error("missing required parameter {name:?}")]
    MissingParam {
        /// Name of the parameter.
        name: String,
    },
    /// A parameter value rendered to an empty string.
    #[error("parameter {name:?} must not be empty")]
    EmptyParam {
        /// Name of the parameter.
        name: String,
    },
    /// A parameter value was neither a string nor a number.
    #[error("parameter {name:?} must be a string or a number")]
    UnsupportedValue {
        /// Name of the parameter.
        name: String,
    },
}

/// A single segment of a parsed pathname template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PatternSegment {
    /// The literal text, or the parameter name for param segments.
    pub(crate) value: String,
    /// Whether this segment captures a parameter.
    pub(crate) param: bool,
    /// Whether this segment captures one-or-more remaining segments.
    pub(crate) wildcard: bool,
    /// Whether this segment may be absent from the pathname.
    pub(crate) optional: bool,
}

/// The result of matching a pathname against a [`PathPattern`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathnameMatch {
    /// The prefix of the pathname consumed by the pattern.
    pub pathname: String,
    /// The part of the pathname left for child routes. `/` when the pattern
    /// consumed the whole pathname.
    pub child_pathname: String,
    /// Captured parameters, percent-decoded. Absent optional parameters map
    /// to [`None`].
    pub params: RawParams,
}

/// A compiled pathname template.
///
/// A template is an ordered list of `/`-separated segments. Each segment is
/// either a literal or a `:name` parameter. A parameter may be followed by
/// `*` to capture one-or-more remaining segments (slash-joined), and any
/// segment may be followed by `?` to make it optional.
///
/// ```rust
/// # use waymark_core::PathPattern;
/// let pattern = PathPattern::parse("/users/:id").unwrap();
/// let m = pattern.match_pathname("/users/42").unwrap();
/// assert_eq!(m.params["id"].as_deref(), Some("42"));
/// assert_eq!(m.child_pathname, "/");
/// ```
///
/// Patterns are immutable once compiled.
#[derive(Debug, Clone)]
pub struct PathPattern {
    segments: Vec<PatternSegment>,
    trailing_separator: bool,
    regex: Regex,
    param_names: Vec<String>,
}

impl PartialEq for PathPattern {
    fn eq(&self, other: &Self) -> bool {
        // `regex` and `param_names` are derived from these fields.
        self.segments == other.segments && self.trailing_separator == other.trailing_separator
    }
}

impl Eq for PathPattern {}

impl PathPattern {
    /// Compile a template string.
    ///
    /// Syntax errors report the byte index of the offending character.
    pub fn parse(template: &str) -> Result<Self, PatternError> {
        enum Stage {
            Separator,
            Literal,
            ParamStart,
            ParamName,
            Wildcard,
            Optional,
        }

        let mut segments: Vec<PatternSegment> = Vec::new();
        let mut trailing_separator = false;

        let mut stage = Stage::Separator;
        let mut value = String::new();
        let mut param = false;
        let mut wildcard = false;
        let mut optional = false;

        macro_rules! flush {
            () => {{
                segments.push(PatternSegment {
                    value: std::mem::take(&mut value),
                    param,
                    wildcard,
                    optional,
                });
                param = false;
                wildcard = false;
                optional = false;
                stage = Stage::Separator;
            }};
        }

        for (index, found) in template.char_indices() {
            match stage {
                Stage::Separator => match found {
                    '/' if index == 0 => {}
                    '/' => return Err(PatternError::UnexpectedChar { index, found }),
                    ':' => {
                        param = true;
                        stage = Stage::ParamStart;
                    }
                    '*' => return Err(PatternError::MisplacedWildcard { index }),
                    '?' => return Err(PatternError::MisplacedOptional { index }),
                    _ => {
                        value.push(found);
                        stage = Stage::Literal;
                    }
                },
                Stage::Literal => match found {
                    '/' => flush!(),
                    ':' => return Err(PatternError::ParamMidSegment { index }),
                    '*' => return Err(PatternError::MisplacedWildcard { index }),
                    '?' => {
                        optional = true;
                        stage = Stage::Optional;
                    }
                    _ => value.push(found),
                },
                Stage::ParamStart => match found {
                    c if is_name_char(c) => {
                        value.push(c);
                        stage = Stage::ParamName;
                    }
                    _ => return Err(PatternError::EmptyParamName { index }),
                },
                Stage::ParamName => match found {
                    '/' => flush!(),
                    ':' => return Err(PatternError::ParamMidSegment { index }),
                    '*' => {
                        wildcard = true;
                        stage = Stage::Wildcard;
                    }
                    '?' => {
                        optional = true;
                        stage = Stage::Optional;
                    }
                    c if is_name_char(c) => value.push(c),
                    _ => return Err(PatternError::UnexpectedChar { index, found }),
                },
                Stage::Wildcard => match found {
                    '/' => flush!(),
                    '*' => return Err(PatternError::MisplacedWildcard { index }),
                    '?' => {
                        optional = true;
                        stage = Stage::Optional;
                    }
                    _ => return Err(PatternError::UnexpectedChar { index, found }),
                },
                Stage::Optional => match found {
                    '/' => flush!(),
                    '*' => return Err(PatternError::MisplacedWildcard { index }),
                    _ => return Err(PatternError::MisplacedOptional { index }),
                },
            }
        }

        match stage {
            Stage::Separator => {
                if !segments.is_empty() {
                    trailing_separator = true;
                }
            }
            Stage::ParamStart => {
                return Err(PatternError::EmptyParamName {
                    index: template.len(),
                })
            }
            _ => flush!(),
        }

        let regex = build_regex(&segments, trailing_separator);
        let param_names = segments
            .iter()
            .filter(|s| s.param)
            .map(|s| s.value.clone())
            .collect();

        Ok(Self {
            segments,
            trailing_separator,
            regex,
            param_names,
        })
    }

    /// The names of the parameters this pattern declares, in template order.
    pub fn param_names(&self) -> &[String] {
        &self.param_names
    }

    /// Match a pathname against this pattern.
    ///
    /// The pattern consumes a prefix of the pathname; the remainder is
    /// returned as [`PathnameMatch::child_pathname`] for child routes to
    /// match against. The consumed prefix must end on a segment boundary,
    /// unless the template itself ends with a `/`.
    pub fn match_pathname(&self, pathname: &str) -> Option<PathnameMatch> {
        let captures = self.regex.captures(pathname)?;
        let consumed = captures.get(0)?;

        let rest = &pathname[consumed.end()..];
        if !self.trailing_separator && !rest.is_empty() && !rest.starts_with('/') {
            // the match ended in the middle of a segment
            return None;
        }

        let child_pathname = if rest.is_empty() || rest == "/" {
            String::from("/")
        } else if rest.starts_with('/') {
            rest.to_string()
        } else {
            format!("/{rest}")
        };

        let mut params = RawParams::new();
        let mut group = 1;
        for segment in &self.segments {
            if !segment.param {
                continue;
            }
            let raw = captures.get(group).map(|m| decode_component(m.as_str()));
            params.insert(segment.value.clone(), raw);
            group += 1;
        }

        let consumed = consumed.as_str();
        Some(PathnameMatch {
            pathname: if consumed.is_empty() {
                String::from("/")
            } else {
                consumed.to_string()
            },
            child_pathname,
            params,
        })
    }

    /// Build a pathname by substituting `params` into the template.
    ///
    /// Optional segments whose parameter is absent (or `null`) are omitted.
    /// Required parameters must be present and render to a non-empty string;
    /// only strings and numbers are accepted as values.
    pub fn to_pathname(&self, params: &Params) -> Result<String, BuildPathnameError> {
        let mut out = String::new();

        for segment in &self.segments {
            if !segment.param {
                out.push('/');
                out.push_str(&segment.value);
                continue;
            }

            let value = params.get(&segment.value).filter(|v| !v.is_null());
            let value = match value {
                Some(value) => value,
                None if segment.optional => continue,
                None => {
                    return Err(BuildPathnameError::MissingParam {
                        name: segment.value.clone(),
                    })
                }
            };

            let text = match value {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                _ => {
                    return Err(BuildPathnameError::UnsupportedValue {
                        name: segment.value.clone(),
                    })
                }
            };
            if text.is_empty() {
                return Err(BuildPathnameError::EmptyParam {
                    name: segment.value.clone(),
                });
            }

            out.push('/');
            if segment.wildcard {
                // encode per segment, slashes stay separators
                let mut first = true;
                for piece in text.split('/') {
                    if !first {
                        out.push('/');
                    }
                    out.push_str(&encode(piece));
                    first = false;
                }
            } else {
                out.push_str(&encode(&text));
            }
        }

        if self.trailing_separator {
            out.push('/');
        }
        if out.is_empty() {
            out.push('/');
        }
        Ok(out)
    }

    pub(crate) fn segments(&self) -> &[PatternSegment] {
        &self.segments
    }
}

impl Display for PathPattern {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return f.write_str("/");
        }
        for segment in &self.segments {
            f.write_str("/")?;
            if segment.param {
                write!(f, ":{}", segment.value)?;
            } else {
                f.write_str(&segment.value)?;
            }
            if segment.wildcard {
                f.write_str("*")?;
            }
            if segment.optional {
                f.write_str("?")?;
            }
        }
        if self.trailing_separator {
            f.write_str("/")?;
        }
        Ok(())
    }
}

/// Derive the anchored matching expression for the parsed segments.
fn build_regex(segments: &[PatternSegment], trailing_separator: bool) -> Regex {
    let mut source = String::from("^");

    for segment in segments {
        let part = if !segment.param {
            format!("/{}", regex::escape(&segment.value))
        } else if segment.wildcard {
            String::from("/(.+)")
        } else {
            String::from("/([^/]+)")
        };

        if segment.optional {
            source.push_str("(?:");
            source.push_str(&part);
            source.push_str(")?");
        } else {
            source.push_str(&part);
        }
    }

    if trailing_separator {
        source.push('/');
    }

    // the source is derived from an already validated template
    debug_assert!(Regex::new(&source).is_ok(), "invalid derived regex: {source}");
    Regex::new(&source).unwrap_or_else(|_| Regex::new("^\\z").unwrap())
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '$'
}

fn decode_component(raw: &str) -> String {
    match decode(raw) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => {
            error!(r#"failed to percent-decode parameter value: "{raw}""#);
            raw.to_string()
        }
    }
}
