//! Path-rewrite validation and middlewares

use regex::Regex;

use wr_core::model::Target;
use wr_core::types::{PathMatchType, RewritePathType};

use super::document::Middleware;

/// Why a target's path configuration cannot be routed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RewriteConfigError {
    #[error("path rewriting requires path matching to be configured")]
    MissingPathMatch,

    #[error("rewritePath and rewritePathType must be specified together")]
    Incomplete,

    #[error("invalid regex pattern in path: {0}")]
    InvalidRegex(String),
}

/// Check the path-match and rewrite fields of a target.
///
/// `stripPrefix` may omit the rewrite path. A regex path must compile.
pub fn validate(target: &Target) -> Result<(), RewriteConfigError> {
    let path = target.path.as_deref().filter(|p| !p.is_empty());
    let rewrite_path = target.rewrite_path.as_deref().filter(|p| !p.is_empty());
    let rewrite_type = target.rewrite_path_type;

    let (Some(path), Some(match_type)) = (path, target.path_match_type) else {
        if rewrite_path.is_some() || rewrite_type.is_some() {
            return Err(RewriteConfigError::MissingPathMatch);
        }
        return Ok(());
    };

    if rewrite_type != Some(RewritePathType::StripPrefix)
        && rewrite_path.is_some() != rewrite_type.is_some()
    {
        return Err(RewriteConfigError::Incomplete);
    }

    let Some(rewrite_type) = rewrite_type else {
        return Ok(());
    };
    if rewrite_path.is_none() {
        return Ok(());
    }

    if match_type == PathMatchType::Regex && Regex::new(path).is_err() {
        return Err(RewriteConfigError::InvalidRegex(path.to_string()));
    }

    if rewrite_type == RewritePathType::StripPrefix && match_type != PathMatchType::Prefix {
        tracing::warn!(
            match_type = match_type.as_str(),
            "stripPrefix rewrite is most effective with prefix path matching"
        );
    }

    Ok(())
}

/// Middlewares implementing a rewrite, and the names to chain on the router
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathRewrite {
    pub middlewares: Vec<(String, Middleware)>,
    pub chain: Vec<String>,
}

/// Build the rewrite middleware(s) named `name`
pub fn path_rewrite(
    name: &str,
    path: &str,
    match_type: PathMatchType,
    rewrite_path: &str,
    rewrite_type: RewritePathType,
) -> PathRewrite {
    let path = if match_type != PathMatchType::Regex && !path.starts_with('/') {
        format!("/{}", path)
    } else {
        path.to_string()
    };
    let rewrite = if rewrite_type != RewritePathType::Regex
        && !rewrite_path.is_empty()
        && !rewrite_path.starts_with('/')
    {
        format!("/{}", rewrite_path)
    } else {
        rewrite_path.to_string()
    };

    let exact = || format!("^{}$", escape_regex(&path));
    let prefix = || format!("^{}(.*)", escape_regex(&path));

    let middleware = match rewrite_type {
        RewritePathType::Exact => Middleware::replace_path_regex(exact(), rewrite),
        RewritePathType::Prefix => match match_type {
            PathMatchType::Prefix => {
                Middleware::replace_path_regex(prefix(), format!("{}$1", rewrite))
            }
            PathMatchType::Exact => Middleware::replace_path_regex(exact(), rewrite),
            PathMatchType::Regex => Middleware::replace_path_regex(path.clone(), rewrite),
        },
        RewritePathType::Regex => {
            let pattern = match match_type {
                PathMatchType::Regex => path.clone(),
                PathMatchType::Prefix => prefix(),
                PathMatchType::Exact => exact(),
            };
            Middleware::replace_path_regex(pattern, rewrite)
        }
        RewritePathType::StripPrefix => match match_type {
            PathMatchType::Prefix => {
                let strip = (name.to_string(), Middleware::strip_prefix(path.clone()));
                if rewrite.is_empty() || rewrite == "/" {
                    return PathRewrite {
                        middlewares: vec![strip],
                        chain: vec![name.to_string()],
                    };
                }

                let add_name = format!("addprefix-{}", name.replacen("rewrite-", "", 1));
                return PathRewrite {
                    middlewares: vec![strip, (add_name.clone(), Middleware::add_prefix(rewrite))],
                    chain: vec![name.to_string(), add_name],
                };
            }
            PathMatchType::Exact => Middleware::replace_path_regex(exact(), or_root(rewrite)),
            PathMatchType::Regex => {
                Middleware::replace_path_regex(path.clone(), or_root(rewrite))
            }
        },
    };

    PathRewrite {
        middlewares: vec![(name.to_string(), middleware)],
        chain: vec![name.to_string()],
    }
}

fn or_root(rewrite: String) -> String {
    if rewrite.is_empty() {
        "/".to_string()
    } else {
        rewrite
    }
}

/// Escape the regex metacharacters `.*+?^${}()|[]\`
pub fn escape_regex(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        if matches!(
            c,
            '.' | '*' | '+' | '?' | '^' | '$' | '{' | '}' | '(' | ')' | '|' | '[' | ']' | '\\'
        ) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
