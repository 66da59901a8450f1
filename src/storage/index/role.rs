use std::fmt;

use serde::{Deserialize, Serialize};

use crate::primitives::bytes::{TypedReader, TypedWriter};
use crate::storage::btree::Payload;
use crate::types::{InternalPointer, Limits, Result, TraceError};

/// Semantic slot of an event an index entry refers to.
///
/// Behavior roles and object roles share the `i8` space but never the same
/// index, so a role is only meaningful together with its [`RoleDomain`].
/// Positive object roles are argument positions, starting at 1.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct Role(pub i8);

/// Which family of roles an index carries.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum RoleDomain {
    /// Behavior indexes.
    Behavior,
    /// Object indexes.
    Object,
}

impl Role {
    /// Any behavior role.
    pub const BEHAVIOR_ANY: Role = Role(0);
    /// `CALLED` or `EXECUTED`.
    pub const ANY_ENTER: Role = Role(1);
    /// Behavior named at the call site.
    pub const CALLED: Role = Role(2);
    /// Behavior that actually ran.
    pub const EXECUTED: Role = Role(3);
    /// Behavior being left.
    pub const EXIT: Role = Role(4);
    /// Behavior a non-call event happened in.
    pub const OPERATION: Role = Role(5);

    /// Receiver, owner or written array.
    pub const TARGET: Role = Role(-1);
    /// Written value.
    pub const VALUE: Role = Role(-2);
    /// Returned value.
    pub const RESULT: Role = Role(-3);
    /// Thrown exception.
    pub const EXCEPTION: Role = Role(-4);
    /// Any argument position.
    pub const ANY_ARG: Role = Role(-5);
    /// Any object role.
    pub const ANY: Role = Role(-6);

    /// Argument at 0-based position `index`.
    pub fn argument(index: usize) -> Result<Role> {
        i8::try_from(index + 1)
            .map(Role)
            .map_err(|_| TraceError::EncodingOverflow {
                field: "argument role",
                value: index as u64,
                bits: 7,
            })
    }

    /// 0-based argument position, for argument roles.
    pub fn argument_index(self) -> Option<usize> {
        (self.0 > 0).then(|| (self.0 - 1) as usize)
    }

    /// True when the role stands for a set of stored roles.
    pub fn is_wildcard(self, domain: RoleDomain) -> bool {
        match domain {
            RoleDomain::Behavior => self == Role::BEHAVIOR_ANY || self == Role::ANY_ENTER,
            RoleDomain::Object => self == Role::ANY || self == Role::ANY_ARG,
        }
    }

    /// True when an entry stored under `stored` satisfies a query for `self`.
    pub fn accepts(self, domain: RoleDomain, stored: Role) -> bool {
        match domain {
            RoleDomain::Behavior => match self {
                Role::BEHAVIOR_ANY => true,
                Role::ANY_ENTER => stored == Role::CALLED || stored == Role::EXECUTED,
                _ => self == stored,
            },
            RoleDomain::Object => match self {
                Role::ANY => true,
                Role::ANY_ARG => stored.0 > 0,
                _ => self == stored,
            },
        }
    }

    /// Name for the given domain.
    pub fn describe(self, domain: RoleDomain) -> String {
        let name = match (domain, self) {
            (RoleDomain::Behavior, Role::BEHAVIOR_ANY) => "any",
            (RoleDomain::Behavior, Role::ANY_ENTER) => "any-enter",
            (RoleDomain::Behavior, Role::CALLED) => "called",
            (RoleDomain::Behavior, Role::EXECUTED) => "executed",
            (RoleDomain::Behavior, Role::EXIT) => "exit",
            (RoleDomain::Behavior, Role::OPERATION) => "operation",
            (RoleDomain::Object, Role::TARGET) => "target",
            (RoleDomain::Object, Role::VALUE) => "value",
            (RoleDomain::Object, Role::RESULT) => "result",
            (RoleDomain::Object, Role::EXCEPTION) => "exception",
            (RoleDomain::Object, Role::ANY_ARG) => "any-arg",
            (RoleDomain::Object, Role::ANY) => "any",
            (RoleDomain::Object, Role(n)) if n > 0 => return format!("arg{}", n - 1),
            _ => return format!("role{}", self.0),
        };
        name.to_string()
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Tuple payload of role-tagged indexes.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct RoleRef {
    /// Event the tuple points at.
    pub pointer: InternalPointer,
    /// Slot of the event the indexed value appeared in.
    pub role: Role,
}

impl Payload for RoleRef {
    fn encoded_len(limits: &Limits) -> usize {
        limits.pointer_size() + 1
    }

    fn encode<W: TypedWriter + ?Sized>(&self, w: &mut W) -> Result<()> {
        w.write_internal_pointer(self.pointer)?;
        w.write_u8(self.role.0 as u8)
    }

    fn decode<R: TypedReader + ?Sized>(r: &mut R) -> Result<Self> {
        Ok(Self {
            pointer: r.read_internal_pointer()?,
            role: Role(r.read_u8()? as i8),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcards_follow_their_domain() {
        let d = RoleDomain::Behavior;
        assert!(Role::ANY_ENTER.accepts(d, Role::CALLED));
        assert!(Role::ANY_ENTER.accepts(d, Role::EXECUTED));
        assert!(!Role::ANY_ENTER.accepts(d, Role::EXIT));
        assert!(Role::BEHAVIOR_ANY.accepts(d, Role::OPERATION));

        let d = RoleDomain::Object;
        let arg = Role::argument(0).unwrap();
        assert!(Role::ANY_ARG.accepts(d, arg));
        assert!(!Role::ANY_ARG.accepts(d, Role::TARGET));
        assert!(Role::ANY.accepts(d, Role::EXCEPTION));
        assert!(!Role::VALUE.accepts(d, Role::TARGET));
        assert_eq!(arg.argument_index(), Some(0));
        assert_eq!(arg.describe(d), "arg0");
    }

    #[test]
    fn argument_role_overflow() {
        assert!(Role::argument(126).is_ok());
        assert!(Role::argument(127).is_err());
    }
}
