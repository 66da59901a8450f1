#![forbid(unsafe_code)]

mod registry;
mod role;
mod set;
mod split;

pub use registry::{
    Attribute, IndexId, IndexTree, Indexes, IndexesRoot, NoProbes, ProbeCatalog, ProbeInfo,
    StaticProbes,
};
pub use role::{Role, RoleDomain, RoleRef};
pub use set::{IndexSet, IndexSetRoot};
pub use split::{SplitParts, SplitScheme};
