//! Label selectors
//!
//! Comma separated requirements, all of which must hold:
//!
//! - `key=value`, `key==value` equality, `*` wildcards allowed in key and value
//! - `key!=value` inequality, also true when the key is absent
//! - `key>n`, `key<n`, `key>=n`, `key<=n` numeric comparison
//! - `key` existence, `!key` absence
//!
//! Only plain equality, inequality and existence can be evaluated by the
//! Kubernetes API server, see [`Selector::server_side`].

use crate::error::{Error, Result};
use glob::Pattern;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq)]
enum Matcher {
    Exact(String),
    Glob(Pattern),
}

impl Matcher {
    fn compile(raw: &str) -> Result<Self> {
        if raw.contains('*') {
            Pattern::new(raw)
                .map(Matcher::Glob)
                .map_err(|e| Error::InvalidSelector(format!("bad pattern '{}': {}", raw, e)))
        } else {
            Ok(Matcher::Exact(raw.to_string()))
        }
    }

    fn matches(&self, candidate: &str) -> bool {
        match self {
            Matcher::Exact(s) => s == candidate,
            Matcher::Glob(p) => p.matches(candidate),
        }
    }

    fn exact(&self) -> Option<&str> {
        match self {
            Matcher::Exact(s) => Some(s),
            Matcher::Glob(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Comparison {
    Gt,
    Lt,
    Ge,
    Le,
}

impl Comparison {
    fn holds(&self, lhs: f64, rhs: f64) -> bool {
        match self {
            Comparison::Gt => lhs > rhs,
            Comparison::Lt => lhs < rhs,
            Comparison::Ge => lhs >= rhs,
            Comparison::Le => lhs <= rhs,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Requirement {
    Equals(Matcher, Matcher),
    NotEquals(Matcher, String),
    Compare(Matcher, Comparison, f64),
    Exists(Matcher),
    Absent(Matcher),
}

impl Requirement {
    fn parse(part: &str) -> Result<Self> {
        let invalid = |why: &str| Error::InvalidSelector(format!("'{}': {}", part, why));

        let Some(idx) = part.find(|c: char| matches!(c, '=' | '!' | '<' | '>')) else {
            return Ok(Requirement::Exists(Matcher::compile(valid_key(part, part)?)?));
        };

        let key = part[..idx].trim();
        let rest = &part[idx..];

        if idx == 0 && rest.starts_with('!') && !rest.starts_with("!=") {
            let key = valid_key(rest[1..].trim(), part)?;
            return Ok(Requirement::Absent(Matcher::compile(key)?));
        }

        let (op, value) = ["==", "!=", ">=", "<=", "=", ">", "<"]
            .iter()
            .find_map(|op| rest.strip_prefix(op).map(|v| (*op, v.trim())))
            .ok_or_else(|| invalid("unknown operator"))?;

        let key = Matcher::compile(valid_key(key, part)?)?;
        if value.is_empty() {
            return Err(invalid("missing value"));
        }

        let numeric = |cmp| {
            value
                .parse::<f64>()
                .map(|n| Requirement::Compare(key.clone(), cmp, n))
                .map_err(|_| invalid("numeric comparison needs a number"))
        };

        match op {
            "=" | "==" => Ok(Requirement::Equals(key.clone(), Matcher::compile(value)?)),
            "!=" => Ok(Requirement::NotEquals(key.clone(), value.to_string())),
            ">" => numeric(Comparison::Gt),
            "<" => numeric(Comparison::Lt),
            ">=" => numeric(Comparison::Ge),
            "<=" => numeric(Comparison::Le),
            _ => Err(invalid("unknown operator")),
        }
    }

    fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        let matching = |key: &Matcher| {
            labels
                .iter()
                .filter(move |(k, _)| key.matches(k))
                .map(|(_, v)| v.as_str())
                .collect::<Vec<_>>()
        };

        match self {
            Requirement::Equals(key, value) => matching(key).iter().any(|v| value.matches(v)),
            Requirement::NotEquals(key, value) => matching(key).iter().all(|v| *v != value.as_str()),
            Requirement::Compare(key, cmp, rhs) => matching(key)
                .iter()
                .filter_map(|v| v.parse::<f64>().ok())
                .any(|lhs| cmp.holds(lhs, *rhs)),
            Requirement::Exists(key) => !matching(key).is_empty(),
            Requirement::Absent(key) => matching(key).is_empty(),
        }
    }

    /// Rendering understood by the API server, if any
    fn server_side(&self) -> Option<String> {
        match self {
            Requirement::Equals(key, value) => {
                Some(format!("{}={}", key.exact()?, value.exact()?))
            }
            Requirement::NotEquals(key, value) => Some(format!("{}!={}", key.exact()?, value)),
            Requirement::Exists(key) => key.exact().map(str::to_string),
            Requirement::Absent(key) => Some(format!("!{}", key.exact()?)),
            Requirement::Compare(..) => None,
        }
    }
}

fn valid_key<'a>(key: &'a str, part: &str) -> Result<&'a str> {
    let key = key.trim();
    let ok = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '*' | '/' | '-'));
    if ok {
        Ok(key)
    } else {
        Err(Error::InvalidSelector(format!("'{}': invalid key '{}'", part, key)))
    }
}

/// Parsed label selector
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Selector {
    requirements: Vec<Requirement>,
}

impl Selector {
    pub fn parse(raw: &str) -> Result<Self> {
        let requirements = raw
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(Requirement::parse)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { requirements })
    }

    /// Parse an optional selector, `None` matches everything
    pub fn parse_opt(raw: Option<&str>) -> Result<Self> {
        raw.map(Self::parse).transpose().map(Option::unwrap_or_default)
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.requirements.iter().all(|r| r.matches(labels))
    }

    /// The subset of requirements the Kubernetes API server can evaluate.
    /// The full selector must still be applied to the returned objects.
    pub fn server_side(&self) -> Option<String> {
        let parts: Vec<String> = self
            .requirements
            .iter()
            .filter_map(Requirement::server_side)
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(","))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_equality_and_inequality() {
        let l = labels(&[("tier", "gold"), ("env", "prod")]);
        assert!(Selector::parse("tier=gold").unwrap().matches(&l));
        assert!(Selector::parse("tier==gold, env=prod").unwrap().matches(&l));
        assert!(!Selector::parse("tier=silver").unwrap().matches(&l));
        assert!(Selector::parse("tier!=silver").unwrap().matches(&l));
        assert!(!Selector::parse("tier!=gold").unwrap().matches(&l));
        // absent key satisfies inequality
        assert!(Selector::parse("zone!=a").unwrap().matches(&l));
    }

    #[test]
    fn test_numeric_comparison() {
        let l = labels(&[("size", "100"), ("name", "disk")]);
        assert!(Selector::parse("size>50").unwrap().matches(&l));
        assert!(Selector::parse("size>=100").unwrap().matches(&l));
        assert!(!Selector::parse("size<100").unwrap().matches(&l));
        assert!(Selector::parse("size<=100.5").unwrap().matches(&l));
        // non-numeric label values never compare
        assert!(!Selector::parse("name>1").unwrap().matches(&l));
        assert_matches!(Selector::parse("size>big"), Err(Error::InvalidSelector(_)));
    }

    #[test]
    fn test_wildcards() {
        let l = labels(&[("env", "prod-eu"), ("team.io/owner", "storage")]);
        assert!(Selector::parse("env=prod-*").unwrap().matches(&l));
        assert!(!Selector::parse("env=dev-*").unwrap().matches(&l));
        assert!(Selector::parse("team.io/*=storage").unwrap().matches(&l));
    }

    #[test]
    fn test_existence() {
        let l = labels(&[("tier", "gold")]);
        assert!(Selector::parse("tier").unwrap().matches(&l));
        assert!(!Selector::parse("!tier").unwrap().matches(&l));
        assert!(Selector::parse("!zone").unwrap().matches(&l));
    }

    #[test]
    fn test_empty_selector_matches_everything() {
        let selector = Selector::parse_opt(None).unwrap();
        assert!(selector.is_empty());
        assert!(selector.matches(&BTreeMap::new()));
        assert!(Selector::parse(" , ").unwrap().is_empty());
    }

    #[test]
    fn test_invalid_selectors() {
        assert_matches!(Selector::parse("tier="), Err(Error::InvalidSelector(_)));
        assert_matches!(Selector::parse("=gold"), Err(Error::InvalidSelector(_)));
        assert_matches!(Selector::parse("ti er=gold"), Err(Error::InvalidSelector(_)));
    }

    #[test]
    fn test_server_side_subset() {
        let selector = Selector::parse("tier=gold,size>10,env=prod-*,zone!=a,backup").unwrap();
        assert_eq!(
            selector.server_side().as_deref(),
            Some("tier=gold,zone!=a,backup")
        );
        assert_eq!(Selector::parse("size>10").unwrap().server_side(), None);
    }
}
