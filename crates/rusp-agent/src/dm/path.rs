// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Data-model path parsing.
//!
//! Canonical schema form: `Device.A.B.{i}.C.Leaf`. A concrete path
//! substitutes `{i}` with decimal instance numbers. Paths addressing
//! objects may carry a trailing dot on the wire (`Device.LocalAgent.MTP.`);
//! parsing strips it and records the fact.

use crate::config::{MAX_DM_INSTANCE_ORDER, MAX_DM_PATH, MAX_PATH_SEGMENTS};
use crate::error::{Result, UspError};
use std::fmt;

/// One dotted segment of a concrete path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    /// A schema name (`Device`, `MTP`, `Enable`).
    Name(String),
    /// An instance number substituted for `{i}`.
    Instance(u32),
}

/// A parsed concrete data-model path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DmPath {
    segments: Vec<Segment>,
    /// The textual form ended with a dot (object addressing).
    trailing_dot: bool,
}

impl DmPath {
    /// Parse a concrete path. Rejects wildcards and search expressions;
    /// those belong to the resolver.
    pub fn parse(path: &str) -> Result<Self> {
        if path.is_empty() {
            return Err(UspError::InvalidPath("empty path".into()));
        }
        if path.len() > MAX_DM_PATH {
            return Err(UspError::InvalidPath(format!(
                "path exceeds {MAX_DM_PATH} characters"
            )));
        }

        let trailing_dot = path.ends_with('.');
        let trimmed = path.strip_suffix('.').unwrap_or(path);

        let mut segments = Vec::new();
        let mut names = 0usize;
        let mut instances = 0usize;
        for part in trimmed.split('.') {
            if part.is_empty() {
                return Err(UspError::InvalidPath(format!("empty segment in '{path}'")));
            }
            if part.bytes().all(|b| b.is_ascii_digit()) {
                let n: u32 = part
                    .parse()
                    .map_err(|_| UspError::InvalidPath(format!("instance number '{part}' is out of range")))?;
                if n == 0 {
                    return Err(UspError::InvalidPath(format!(
                        "instance numbers start at 1 in '{path}'"
                    )));
                }
                segments.push(Segment::Instance(n));
                instances += 1;
            } else {
                if !part
                    .bytes()
                    .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
                {
                    return Err(UspError::InvalidPath(format!(
                        "illegal characters in segment '{part}'"
                    )));
                }
                segments.push(Segment::Name(part.to_string()));
                names += 1;
            }
        }

        if names > MAX_PATH_SEGMENTS {
            return Err(UspError::InvalidPath(format!(
                "more than {MAX_PATH_SEGMENTS} segments in '{path}'"
            )));
        }
        if instances > MAX_DM_INSTANCE_ORDER {
            return Err(UspError::InvalidPath(format!(
                "more than {MAX_DM_INSTANCE_ORDER} instance numbers in '{path}'"
            )));
        }

        Ok(Self {
            segments,
            trailing_dot,
        })
    }

    /// Build a path from already-parsed segments (resolver internals).
    pub(crate) fn from_segments(segments: Vec<Segment>, trailing_dot: bool) -> Self {
        Self {
            segments,
            trailing_dot,
        }
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Whether the textual form addressed an object (trailing dot).
    pub fn is_object_form(&self) -> bool {
        self.trailing_dot
    }

    /// Instance numbers in path order.
    pub fn instances(&self) -> Vec<u32> {
        self.segments
            .iter()
            .filter_map(|s| match s {
                Segment::Instance(n) => Some(*n),
                Segment::Name(_) => None,
            })
            .collect()
    }

    /// Schema template form: every instance number replaced with `{i}`.
    pub fn schema_path(&self) -> String {
        let parts: Vec<&str> = self
            .segments
            .iter()
            .map(|s| match s {
                Segment::Name(n) => n.as_str(),
                Segment::Instance(_) => "{i}",
            })
            .collect();
        parts.join(".")
    }

    /// The last segment, if it is a name (parameter or object name).
    pub fn leaf_name(&self) -> Option<&str> {
        match self.segments.last() {
            Some(Segment::Name(n)) => Some(n.as_str()),
            _ => None,
        }
    }

    /// Path with the last segment removed, or `None` at the root.
    pub fn parent(&self) -> Option<DmPath> {
        if self.segments.len() <= 1 {
            return None;
        }
        Some(DmPath {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
            trailing_dot: true,
        })
    }

    /// Append an instance number.
    pub fn child_instance(&self, n: u32) -> DmPath {
        let mut segments = self.segments.clone();
        segments.push(Segment::Instance(n));
        DmPath {
            segments,
            trailing_dot: true,
        }
    }

    /// Append a name segment.
    pub fn child_name(&self, name: &str) -> DmPath {
        let mut segments = self.segments.clone();
        segments.push(Segment::Name(name.to_string()));
        DmPath {
            segments,
            trailing_dot: false,
        }
    }

    /// Concrete textual form without a trailing dot.
    pub fn to_param_string(&self) -> String {
        let parts: Vec<String> = self
            .segments
            .iter()
            .map(|s| match s {
                Segment::Name(n) => n.clone(),
                Segment::Instance(i) => i.to_string(),
            })
            .collect();
        parts.join(".")
    }

    /// Concrete textual form with a trailing dot (object addressing).
    pub fn to_object_string(&self) -> String {
        let mut s = self.to_param_string();
        s.push('.');
        s
    }
}

impl fmt::Display for DmPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.trailing_dot {
            write!(f, "{}", self.to_object_string())
        } else {
            write!(f, "{}", self.to_param_string())
        }
    }
}

/// Derive the schema template of a textual path without fully parsing it
/// (used for registry lookups on template strings that already contain
/// `{i}` placeholders).
pub fn template_of(path: &str) -> String {
    let trimmed = path.strip_suffix('.').unwrap_or(path);
    let parts: Vec<&str> = trimmed
        .split('.')
        .map(|p| {
            if !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit()) {
                "{i}"
            } else {
                p
            }
        })
        .collect();
    parts.join(".")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_concrete_param_path() {
        let p = DmPath::parse("Device.LocalAgent.MTP.3.Enable").unwrap();
        assert_eq!(p.schema_path(), "Device.LocalAgent.MTP.{i}.Enable");
        assert_eq!(p.instances(), vec![3]);
        assert_eq!(p.leaf_name(), Some("Enable"));
        assert!(!p.is_object_form());
        assert_eq!(p.to_param_string(), "Device.LocalAgent.MTP.3.Enable");
    }

    #[test]
    fn trailing_dot_marks_object_form() {
        let p = DmPath::parse("Device.LocalAgent.MTP.").unwrap();
        assert!(p.is_object_form());
        assert_eq!(p.schema_path(), "Device.LocalAgent.MTP");
        assert_eq!(p.to_object_string(), "Device.LocalAgent.MTP.");
    }

    #[test]
    fn rejects_zero_instance_and_bad_characters() {
        assert!(DmPath::parse("Device.MTP.0.Enable").is_err());
        assert!(DmPath::parse("Device..MTP").is_err());
        assert!(DmPath::parse("Device.MTP.*.Enable").is_err());
        assert!(DmPath::parse("Device.MTP.[Enable==true]").is_err());
        assert!(DmPath::parse("").is_err());
    }

    #[test]
    fn enforces_length_and_depth_limits() {
        let long = "Device.".to_string() + &"X.".repeat(MAX_PATH_SEGMENTS + 1);
        assert!(DmPath::parse(&long).is_err());

        let deep = format!("Device{}", ".T.1".repeat(MAX_DM_INSTANCE_ORDER + 1));
        assert!(DmPath::parse(&deep).is_err());

        let wide = "D".repeat(MAX_DM_PATH + 1);
        assert!(DmPath::parse(&wide).is_err());
    }

    #[test]
    fn parent_and_children_navigate_the_tree() {
        let table = DmPath::parse("Device.LocalAgent.MTP").unwrap();
        let inst = table.child_instance(2);
        assert_eq!(inst.to_object_string(), "Device.LocalAgent.MTP.2.");
        let param = inst.child_name("Enable");
        assert_eq!(param.to_param_string(), "Device.LocalAgent.MTP.2.Enable");
        assert_eq!(
            param.parent().unwrap().to_object_string(),
            "Device.LocalAgent.MTP.2."
        );
    }

    #[test]
    fn template_of_substitutes_numbers() {
        assert_eq!(
            template_of("Device.LocalAgent.MTP.11.STOMP.Reference"),
            "Device.LocalAgent.MTP.{i}.STOMP.Reference"
        );
        assert_eq!(
            template_of("Device.LocalAgent.MTP.{i}.Enable"),
            "Device.LocalAgent.MTP.{i}.Enable"
        );
    }
}
