//! Condition trees over the attribute indexes.

use std::fmt;
use std::sync::Arc;

use crate::storage::index::{Attribute, IndexId, Indexes, Role};
use crate::storage::record::EventRecord;
use crate::types::{Result, TraceError};

/// Opaque match function applied to decoded records.
pub type RecordFilter = Arc<dyn Fn(&EventRecord) -> bool + Send + Sync>;

/// Query-time expression selecting events.
#[derive(Clone)]
pub enum Condition {
    /// Every event.
    All,
    /// Events indexed under `value` in one physical index, optionally only
    /// under roles accepted by `role`.
    Attribute {
        /// Index to scan.
        index: IndexId,
        /// Indexed value (a component for split attributes).
        value: u64,
        /// Role filter for role-tagged indexes.
        role: Option<Role>,
    },
    /// Events matched by every child.
    And {
        /// Operands.
        children: Vec<Condition>,
        /// Require role-tagged children to agree on a role.
        match_roles: bool,
        /// Emit each event once.
        dedup: bool,
    },
    /// Events matched by any child, each once.
    Or(Vec<Condition>),
    /// Events of `base` for which `filter` holds. Only valid at the root.
    Predicate {
        /// Indexed condition narrowing the scan.
        base: Box<Condition>,
        /// Test run against each decoded record.
        filter: RecordFilter,
    },
}

impl Condition {
    /// Leaf over a whole (unsplit) attribute.
    pub fn attribute(attribute: Attribute, value: u64) -> Self {
        Condition::Attribute {
            index: IndexId::whole(attribute),
            value,
            role: None,
        }
    }

    /// Deduplicating conjunction without role matching.
    pub fn and(children: Vec<Condition>) -> Self {
        Condition::And {
            children,
            match_roles: false,
            dedup: true,
        }
    }

    /// Matches events matched by any child.
    pub fn or(children: Vec<Condition>) -> Self {
        Condition::Or(children)
    }

    /// Wraps `base` with a record filter.
    pub fn predicate(base: Condition, filter: impl Fn(&EventRecord) -> bool + Send + Sync + 'static) -> Self {
        Condition::Predicate {
            base: Box::new(base),
            filter: Arc::new(filter),
        }
    }

    /// Rejects trees that cannot be evaluated: predicates below the root, a
    /// predicate over a predicate, or empty merges.
    pub fn validate(&self) -> Result<()> {
        match self {
            Condition::Predicate { base, .. } => base.validate_nested(),
            other => other.validate_nested(),
        }
    }

    fn validate_nested(&self) -> Result<()> {
        match self {
            Condition::All | Condition::Attribute { .. } => Ok(()),
            Condition::And { children, .. } | Condition::Or(children) => {
                if children.is_empty() {
                    return Err(TraceError::Invalid("merge condition without operands"));
                }
                children.iter().try_for_each(Condition::validate_nested)
            }
            Condition::Predicate { .. } => Err(TraceError::Invalid("predicate must be the outermost condition")),
        }
    }

    /// Stable textual key for the count cache; `None` when the tree holds a
    /// predicate, whose filter has no identity.
    pub fn cache_key(&self) -> Option<String> {
        let mut out = String::new();
        self.write_key(&mut out).then_some(out)
    }

    fn write_key(&self, out: &mut String) -> bool {
        use std::fmt::Write;
        match self {
            Condition::All => out.push('*'),
            Condition::Attribute { index, value, role } => {
                let _ = write!(out, "{index}={value}");
                if let Some(role) = role {
                    let _ = write!(out, "@{role}");
                }
            }
            Condition::And {
                children,
                match_roles,
                dedup,
            } => {
                let _ = write!(out, "and{}{}(", u8::from(*match_roles), u8::from(*dedup));
                for child in children {
                    if !child.write_key(out) {
                        return false;
                    }
                    out.push(',');
                }
                out.push(')');
            }
            Condition::Or(children) => {
                out.push_str("or(");
                for child in children {
                    if !child.write_key(out) {
                        return false;
                    }
                    out.push(',');
                }
                out.push(')');
            }
            Condition::Predicate { .. } => return false,
        }
        true
    }
}

impl fmt::Debug for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::All => f.write_str("All"),
            Condition::Attribute { index, value, role } => f
                .debug_struct("Attribute")
                .field("index", &format_args!("{index}"))
                .field("value", value)
                .field("role", role)
                .finish(),
            Condition::And {
                children,
                match_roles,
                dedup,
            } => f
                .debug_struct("And")
                .field("children", children)
                .field("match_roles", match_roles)
                .field("dedup", dedup)
                .finish(),
            Condition::Or(children) => f.debug_tuple("Or").field(children).finish(),
            Condition::Predicate { base, .. } => f.debug_struct("Predicate").field("base", base).finish_non_exhaustive(),
        }
    }
}

/// Builds the condition matching `value` of `attribute`.
///
/// Split attributes become a conjunction of one partial-equality leaf per
/// component; for role-tagged ones the components must agree on the role
/// of each event.
pub fn create_condition(indexes: &Indexes, attribute: Attribute, value: u64, role: Option<Role>) -> Result<Condition> {
    if role.is_some() && attribute.role_domain().is_none() {
        return Err(TraceError::Invalid("attribute is not role-tagged"));
    }
    let Some(scheme) = indexes.split_scheme(attribute) else {
        return Ok(Condition::Attribute {
            index: IndexId::whole(attribute),
            value,
            role,
        });
    };
    let parts = scheme.split(value)?;
    let mut children = Vec::with_capacity(parts.len());
    for (part, component) in parts.iter().enumerate() {
        children.push(Condition::Attribute {
            index: IndexId {
                attribute,
                part: u8::try_from(part).map_err(|_| TraceError::Invalid("too many key components"))?,
            },
            value: *component,
            role,
        });
    }
    if children.len() == 1 {
        return Ok(children.remove(0));
    }
    Ok(Condition::And {
        children,
        match_roles: attribute.role_domain().is_some(),
        dedup: true,
    })
}
